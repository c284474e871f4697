//! Forward-mode dual numbers over the calibration parameter vector
//!
//! A [`Dual`] carries a value together with its exact gradient with respect
//! to every entry of [`Parameters`](crate::model::Parameters). Arithmetic on
//! duals applies the chain rule eagerly, so the gradient of any quantity
//! computed during a simulation run is available as soon as the value is.
//!
//! Each operation touches one `SVector<f64, 6>`; no tape is recorded.
//!
//! # Straight-through values
//!
//! [`Dual::straight_through`] replaces the value while keeping the gradient,
//! which is how a hard Bernoulli outcome is given the gradient of its
//! probability.

use nalgebra::SVector;
use serde::{Deserialize, Serialize};
use std::iter::{Product, Sum};
use std::ops::{Add, AddAssign, Div, Mul, MulAssign, Neg, Sub};

/// Number of trainable scalars tracked by every dual
pub const PARAM_COUNT: usize = 6;

/// Gradient (or any vector) over the trainable parameters
pub type Gradient = SVector<f64, PARAM_COUNT>;

/// Value with its gradient with respect to the trainable parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Dual {
    /// Primal value
    pub value: f64,
    /// d(value)/d(parameters)
    pub grad: Gradient,
}

impl Default for Dual {
    fn default() -> Self {
        Self::zero()
    }
}

impl Dual {
    /// A value that does not depend on the parameters
    #[inline]
    pub fn constant(value: f64) -> Self {
        Self {
            value,
            grad: Gradient::zeros(),
        }
    }

    /// Constant zero
    #[inline]
    pub fn zero() -> Self {
        Self::constant(0.0)
    }

    /// Constant one
    #[inline]
    pub fn one() -> Self {
        Self::constant(1.0)
    }

    /// The parameter with index `index`, seeded with a unit gradient
    #[inline]
    pub fn variable(value: f64, index: usize) -> Self {
        let mut grad = Gradient::zeros();
        grad[index] = 1.0;
        Self { value, grad }
    }

    /// Keep the gradient, replace the value
    #[inline]
    pub fn straight_through(self, value: f64) -> Self {
        Self {
            value,
            grad: self.grad,
        }
    }

    /// Drop the gradient
    #[inline]
    pub fn detach(self) -> Self {
        Self::constant(self.value)
    }

    /// Whether the value and every gradient entry are finite
    #[inline]
    pub fn is_finite(&self) -> bool {
        self.value.is_finite() && self.grad.iter().all(|g| g.is_finite())
    }

    /// Logistic sigmoid `1 / (1 + e^{-x})`
    #[inline]
    pub fn sigmoid(self) -> Self {
        let s = stable_sigmoid(self.value);
        Self {
            value: s,
            grad: self.grad * (s * (1.0 - s)),
        }
    }

    /// Natural logarithm
    #[inline]
    pub fn ln(self) -> Self {
        Self {
            value: self.value.ln(),
            grad: self.grad / self.value,
        }
    }

    /// Exponential
    #[inline]
    pub fn exp(self) -> Self {
        let e = self.value.exp();
        Self {
            value: e,
            grad: self.grad * e,
        }
    }

    /// `ln(1 + e^x)`, numerically stable for large `|x|`
    #[inline]
    pub fn softplus(self) -> Self {
        let value = if self.value > 30.0 {
            self.value
        } else {
            self.value.exp().ln_1p()
        };
        Self {
            value,
            grad: self.grad * stable_sigmoid(self.value),
        }
    }

    /// Clamp the value; the gradient is zeroed where the clamp is active
    #[inline]
    pub fn clamp(self, lo: f64, hi: f64) -> Self {
        if self.value < lo {
            Self::constant(lo)
        } else if self.value > hi {
            Self::constant(hi)
        } else {
            self
        }
    }

    /// `1 - self`
    #[inline]
    pub fn complement(self) -> Self {
        Self {
            value: 1.0 - self.value,
            grad: -self.grad,
        }
    }
}

/// Sigmoid that never evaluates `exp` of a large positive argument
#[inline]
pub fn stable_sigmoid(x: f64) -> f64 {
    if x >= 0.0 {
        1.0 / (1.0 + (-x).exp())
    } else {
        let e = x.exp();
        e / (1.0 + e)
    }
}

impl Add for Dual {
    type Output = Dual;

    #[inline]
    fn add(self, rhs: Dual) -> Dual {
        Dual {
            value: self.value + rhs.value,
            grad: self.grad + rhs.grad,
        }
    }
}

impl Add<f64> for Dual {
    type Output = Dual;

    #[inline]
    fn add(self, rhs: f64) -> Dual {
        Dual {
            value: self.value + rhs,
            grad: self.grad,
        }
    }
}

impl AddAssign for Dual {
    #[inline]
    fn add_assign(&mut self, rhs: Dual) {
        self.value += rhs.value;
        self.grad += rhs.grad;
    }
}

impl Sub for Dual {
    type Output = Dual;

    #[inline]
    fn sub(self, rhs: Dual) -> Dual {
        Dual {
            value: self.value - rhs.value,
            grad: self.grad - rhs.grad,
        }
    }
}

impl Sub<f64> for Dual {
    type Output = Dual;

    #[inline]
    fn sub(self, rhs: f64) -> Dual {
        Dual {
            value: self.value - rhs,
            grad: self.grad,
        }
    }
}

impl Mul for Dual {
    type Output = Dual;

    #[inline]
    fn mul(self, rhs: Dual) -> Dual {
        Dual {
            value: self.value * rhs.value,
            grad: self.grad * rhs.value + rhs.grad * self.value,
        }
    }
}

impl Mul<f64> for Dual {
    type Output = Dual;

    #[inline]
    fn mul(self, rhs: f64) -> Dual {
        Dual {
            value: self.value * rhs,
            grad: self.grad * rhs,
        }
    }
}

impl MulAssign for Dual {
    #[inline]
    fn mul_assign(&mut self, rhs: Dual) {
        *self = *self * rhs;
    }
}

impl Div for Dual {
    type Output = Dual;

    #[inline]
    fn div(self, rhs: Dual) -> Dual {
        let inv = 1.0 / rhs.value;
        Dual {
            value: self.value * inv,
            grad: (self.grad * rhs.value - rhs.grad * self.value) * (inv * inv),
        }
    }
}

impl Div<f64> for Dual {
    type Output = Dual;

    #[inline]
    fn div(self, rhs: f64) -> Dual {
        Dual {
            value: self.value / rhs,
            grad: self.grad / rhs,
        }
    }
}

impl Neg for Dual {
    type Output = Dual;

    #[inline]
    fn neg(self) -> Dual {
        Dual {
            value: -self.value,
            grad: -self.grad,
        }
    }
}

impl Sum for Dual {
    fn sum<I: Iterator<Item = Dual>>(iter: I) -> Dual {
        iter.fold(Dual::zero(), |acc, x| acc + x)
    }
}

impl Product for Dual {
    fn product<I: Iterator<Item = Dual>>(iter: I) -> Dual {
        iter.fold(Dual::one(), |acc, x| acc * x)
    }
}
