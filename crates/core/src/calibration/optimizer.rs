//! Gradient-based optimizers and parameter constraints
//!
//! Optimizers work on a raw vector. Under [`ConstraintPolicy::Reparameterize`]
//! the raw vector lives in an unconstrained space mapped onto the bounds;
//! otherwise it is the parameter vector itself.

use crate::core_types::{stable_sigmoid, Gradient};
use crate::model::{Bound, ParamName, ParameterBounds, Parameters};
use serde::{Deserialize, Serialize};

/// Keeps reparameterized values strictly inside their bounds
const INTERIOR_EPS: f64 = 1e-9;

/// Update rule
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum OptimizerKind {
    /// Plain gradient descent
    Sgd,
    /// Heavy-ball momentum
    Momentum {
        /// Decay of the velocity, in `[0, 1)`
        beta: f64,
    },
    /// Adam (Kingma & Ba 2015) with bias correction
    Adam {
        /// Decay of the first moment, in `[0, 1)`
        beta1: f64,
        /// Decay of the second moment, in `[0, 1)`
        beta2: f64,
        /// Denominator offset
        epsilon: f64,
    },
}

impl Default for OptimizerKind {
    fn default() -> Self {
        OptimizerKind::Adam {
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-8,
        }
    }
}

/// Optimizer memory between iterations
///
/// [`OptimizerState::propose`] never mutates; the caller commits the returned
/// state together with the parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OptimizerState {
    kind: OptimizerKind,
    first_moment: Gradient,
    second_moment: Gradient,
    steps: u32,
}

impl OptimizerState {
    /// Fresh state
    pub fn new(kind: OptimizerKind) -> Self {
        Self {
            kind,
            first_moment: Gradient::zeros(),
            second_moment: Gradient::zeros(),
            steps: 0,
        }
    }

    /// Updates committed so far
    pub fn steps(&self) -> u32 {
        self.steps
    }

    /// Compute the step to subtract from the raw vector and the next state
    pub fn propose(&self, gradient: &Gradient, learning_rate: f64) -> (Gradient, OptimizerState) {
        let mut next = *self;
        next.steps += 1;
        let delta = match self.kind {
            OptimizerKind::Sgd => gradient * learning_rate,
            OptimizerKind::Momentum { beta } => {
                next.first_moment = self.first_moment * beta + gradient;
                next.first_moment * learning_rate
            }
            OptimizerKind::Adam {
                beta1,
                beta2,
                epsilon,
            } => {
                next.first_moment = self.first_moment * beta1 + gradient * (1.0 - beta1);
                next.second_moment =
                    self.second_moment * beta2 + gradient.component_mul(gradient) * (1.0 - beta2);
                let t = i32::try_from(next.steps).unwrap_or(i32::MAX);
                let m_hat = next.first_moment / (1.0 - beta1.powi(t));
                let v_hat = next.second_moment / (1.0 - beta2.powi(t));
                m_hat.zip_map(&v_hat, |m, v| learning_rate * m / (v.sqrt() + epsilon))
            }
        };
        (delta, next)
    }
}

/// Rescale `gradient` so its Euclidean norm is at most `max_norm`
pub fn clip_gradient(gradient: &Gradient, max_norm: f64) -> Gradient {
    let norm = gradient.norm();
    if norm > max_norm && norm > 0.0 {
        gradient * (max_norm / norm)
    } else {
        *gradient
    }
}

/// How parameter bounds are enforced during calibration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ConstraintPolicy {
    /// Project onto the bounds after every update
    #[default]
    Clip,
    /// Optimize raw values mapped through sigmoid or softplus onto the bounds
    Reparameterize,
    /// Ignore bounds
    Unconstrained,
}

impl ConstraintPolicy {
    /// Raw vector the optimizer starts from
    pub fn encode(self, params: &Parameters, bounds: &ParameterBounds) -> Gradient {
        match self {
            ConstraintPolicy::Clip => bounds.clip(params).to_vector(),
            ConstraintPolicy::Unconstrained => params.to_vector(),
            ConstraintPolicy::Reparameterize => Gradient::from_fn(|i, _| {
                let name = ParamName::ALL[i];
                to_raw(bounds.get(name), params.get(name))
            }),
        }
    }

    /// Parameters for a raw vector
    pub fn decode(self, raw: &Gradient, bounds: &ParameterBounds) -> Parameters {
        match self {
            ConstraintPolicy::Clip => bounds.clip(&Parameters::from_vector(raw)),
            ConstraintPolicy::Unconstrained => Parameters::from_vector(raw),
            ConstraintPolicy::Reparameterize => {
                let mut params = Parameters::from_vector(raw);
                for name in ParamName::ALL {
                    params.set(name, from_raw(bounds.get(name), raw[name.index()]));
                }
                params
            }
        }
    }

    /// Chain `d loss / d params` into `d loss / d raw`
    pub fn raw_gradient(
        self,
        raw: &Gradient,
        bounds: &ParameterBounds,
        gradient: &Gradient,
    ) -> Gradient {
        match self {
            ConstraintPolicy::Clip | ConstraintPolicy::Unconstrained => *gradient,
            ConstraintPolicy::Reparameterize => Gradient::from_fn(|i, _| {
                let bound = bounds.get(ParamName::ALL[i]);
                gradient[i] * raw_derivative(bound, raw[i])
            }),
        }
    }
}

fn softplus(x: f64) -> f64 {
    if x > 30.0 {
        x
    } else {
        x.exp().ln_1p()
    }
}

/// Inverse of [`softplus`] for `y > 0`
fn inverse_softplus(y: f64) -> f64 {
    if y > 30.0 {
        y
    } else {
        y.exp_m1().ln()
    }
}

fn to_raw(bound: Bound, value: f64) -> f64 {
    match (bound.lower, bound.upper) {
        (None, None) => value,
        (Some(lo), None) => inverse_softplus((value - lo).max(INTERIOR_EPS)),
        (None, Some(hi)) => inverse_softplus((hi - value).max(INTERIOR_EPS)),
        (Some(lo), Some(hi)) => {
            let width = hi - lo;
            if width <= 0.0 {
                return 0.0;
            }
            let frac = ((value - lo) / width).clamp(INTERIOR_EPS, 1.0 - INTERIOR_EPS);
            (frac / (1.0 - frac)).ln()
        }
    }
}

fn from_raw(bound: Bound, raw: f64) -> f64 {
    match (bound.lower, bound.upper) {
        (None, None) => raw,
        (Some(lo), None) => lo + softplus(raw),
        (None, Some(hi)) => hi - softplus(raw),
        (Some(lo), Some(hi)) => lo + (hi - lo) * stable_sigmoid(raw),
    }
}

fn raw_derivative(bound: Bound, raw: f64) -> f64 {
    match (bound.lower, bound.upper) {
        (None, None) => 1.0,
        (Some(_), None) => stable_sigmoid(raw),
        (None, Some(_)) => -stable_sigmoid(raw),
        (Some(lo), Some(hi)) => {
            let s = stable_sigmoid(raw);
            (hi - lo) * s * (1.0 - s)
        }
    }
}
