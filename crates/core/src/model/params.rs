//! Trainable spread parameters and their physical bounds

use crate::core_types::{Dual, Gradient, PARAM_COUNT};
use crate::error::{FireCaError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Name of one trainable parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamName {
    /// Baseline logit of spread between two cells
    Intercept,
    /// Weight of the receiving cell's fuel load
    Fuel,
    /// Weight of the receiving cell's fuel moisture (enters negatively)
    Moisture,
    /// Weight of the incline toward the receiving cell
    Slope,
    /// Weight of the wind component toward the receiving cell
    Wind,
    /// Weight of the extra slope-adjusted distance (enters negatively)
    Distance,
}

impl ParamName {
    /// Every parameter, in vector order
    pub const ALL: [ParamName; PARAM_COUNT] = [
        ParamName::Intercept,
        ParamName::Fuel,
        ParamName::Moisture,
        ParamName::Slope,
        ParamName::Wind,
        ParamName::Distance,
    ];

    /// Position in gradient vectors
    pub const fn index(self) -> usize {
        match self {
            ParamName::Intercept => 0,
            ParamName::Fuel => 1,
            ParamName::Moisture => 2,
            ParamName::Slope => 3,
            ParamName::Wind => 4,
            ParamName::Distance => 5,
        }
    }

    /// Snake-case name used in configuration files and logs
    pub const fn as_str(self) -> &'static str {
        match self {
            ParamName::Intercept => "intercept",
            ParamName::Fuel => "fuel",
            ParamName::Moisture => "moisture",
            ParamName::Slope => "slope",
            ParamName::Wind => "wind",
            ParamName::Distance => "distance",
        }
    }
}

impl fmt::Display for ParamName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ParamName {
    type Err = FireCaError;

    fn from_str(s: &str) -> Result<Self> {
        ParamName::ALL
            .into_iter()
            .find(|name| name.as_str() == s)
            .ok_or_else(|| FireCaError::config("parameter", format!("unknown parameter `{s}`")))
    }
}

/// Coefficients of the spread-rate function
///
/// The defaults are starting values for calibration, not fitted constants.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Parameters {
    /// Baseline logit
    pub intercept: f64,
    /// Fuel load coefficient
    pub fuel: f64,
    /// Fuel moisture coefficient
    pub moisture: f64,
    /// Slope (incline) coefficient
    pub slope: f64,
    /// Wind coefficient
    pub wind: f64,
    /// Distance decay coefficient
    pub distance: f64,
}

impl Default for Parameters {
    fn default() -> Self {
        Self {
            intercept: -1.0,
            fuel: 1.0,
            moisture: 4.0,
            slope: 2.0,
            wind: 0.25,
            distance: 1.0,
        }
    }
}

impl Parameters {
    /// Value of one parameter
    pub fn get(&self, name: ParamName) -> f64 {
        match name {
            ParamName::Intercept => self.intercept,
            ParamName::Fuel => self.fuel,
            ParamName::Moisture => self.moisture,
            ParamName::Slope => self.slope,
            ParamName::Wind => self.wind,
            ParamName::Distance => self.distance,
        }
    }

    /// Set one parameter
    pub fn set(&mut self, name: ParamName, value: f64) {
        match name {
            ParamName::Intercept => self.intercept = value,
            ParamName::Fuel => self.fuel = value,
            ParamName::Moisture => self.moisture = value,
            ParamName::Slope => self.slope = value,
            ParamName::Wind => self.wind = value,
            ParamName::Distance => self.distance = value,
        }
    }

    /// Copy with one parameter replaced
    pub fn with(mut self, name: ParamName, value: f64) -> Self {
        self.set(name, value);
        self
    }

    /// Parameters in [`ParamName::ALL`] order
    pub fn to_vector(&self) -> Gradient {
        Gradient::from_fn(|i, _| self.get(ParamName::ALL[i]))
    }

    /// Inverse of [`Parameters::to_vector`]
    pub fn from_vector(vector: &Gradient) -> Self {
        let mut params = Self::default();
        for name in ParamName::ALL {
            params.set(name, vector[name.index()]);
        }
        params
    }

    /// Whether every parameter is finite
    pub fn is_finite(&self) -> bool {
        ParamName::ALL.iter().all(|&name| self.get(name).is_finite())
    }

    /// Seed each parameter as an independent variable for forward-mode derivatives
    pub fn duals(&self) -> DualParameters {
        let var = |name: ParamName| Dual::variable(self.get(name), name.index());
        DualParameters {
            intercept: var(ParamName::Intercept),
            fuel: var(ParamName::Fuel),
            moisture: var(ParamName::Moisture),
            slope: var(ParamName::Slope),
            wind: var(ParamName::Wind),
            distance: var(ParamName::Distance),
        }
    }
}

/// Parameters lifted to dual numbers
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DualParameters {
    /// Baseline logit
    pub intercept: Dual,
    /// Fuel load coefficient
    pub fuel: Dual,
    /// Fuel moisture coefficient
    pub moisture: Dual,
    /// Slope coefficient
    pub slope: Dual,
    /// Wind coefficient
    pub wind: Dual,
    /// Distance decay coefficient
    pub distance: Dual,
}

/// Closed interval with optional ends
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Bound {
    /// Inclusive lower end
    pub lower: Option<f64>,
    /// Inclusive upper end
    pub upper: Option<f64>,
}

impl Bound {
    /// No constraint
    pub const fn unbounded() -> Self {
        Self {
            lower: None,
            upper: None,
        }
    }

    /// `[0, ∞)`
    pub const fn non_negative() -> Self {
        Self {
            lower: Some(0.0),
            upper: None,
        }
    }

    /// `[lower, upper]`
    pub const fn between(lower: f64, upper: f64) -> Self {
        Self {
            lower: Some(lower),
            upper: Some(upper),
        }
    }

    /// Whether `value` lies inside the interval
    pub fn contains(&self, value: f64) -> bool {
        self.lower.is_none_or(|lo| value >= lo) && self.upper.is_none_or(|hi| value <= hi)
    }

    /// Project `value` onto the interval
    pub fn clip(&self, value: f64) -> f64 {
        let value = self.lower.map_or(value, |lo| value.max(lo));
        self.upper.map_or(value, |hi| value.min(hi))
    }

    fn validate(&self, name: ParamName) -> Result<()> {
        let ends = [self.lower, self.upper];
        if ends.iter().flatten().any(|v| !v.is_finite()) {
            return Err(FireCaError::config(
                format!("bounds.{name}"),
                "bound ends must be finite",
            ));
        }
        if let (Some(lo), Some(hi)) = (self.lower, self.upper) {
            if lo > hi {
                return Err(FireCaError::config(
                    format!("bounds.{name}"),
                    format!("lower {lo} exceeds upper {hi}"),
                ));
            }
        }
        Ok(())
    }
}

/// Physically valid range of every parameter
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParameterBounds {
    bounds: [Bound; PARAM_COUNT],
}

impl Default for ParameterBounds {
    /// Intercept free, every physical coefficient non-negative
    fn default() -> Self {
        let mut bounds = [Bound::non_negative(); PARAM_COUNT];
        bounds[ParamName::Intercept.index()] = Bound::unbounded();
        Self { bounds }
    }
}

impl ParameterBounds {
    /// No parameter constrained
    pub fn unbounded() -> Self {
        Self {
            bounds: [Bound::unbounded(); PARAM_COUNT],
        }
    }

    /// Bound of one parameter
    pub fn get(&self, name: ParamName) -> Bound {
        self.bounds[name.index()]
    }

    /// Copy with one bound replaced
    pub fn with(mut self, name: ParamName, bound: Bound) -> Self {
        self.bounds[name.index()] = bound;
        self
    }

    /// Project every parameter onto its bound
    pub fn clip(&self, params: &Parameters) -> Parameters {
        let mut clipped = *params;
        for name in ParamName::ALL {
            clipped.set(name, self.get(name).clip(params.get(name)));
        }
        clipped
    }

    /// Fail unless every parameter is finite and inside its bound
    ///
    /// # Errors
    ///
    /// Returns `Configuration` naming the first offending parameter.
    pub fn check(&self, params: &Parameters) -> Result<()> {
        for name in ParamName::ALL {
            let value = params.get(name);
            if !value.is_finite() || !self.get(name).contains(value) {
                return Err(FireCaError::config(
                    format!("params.{name}"),
                    format!("{value} is outside {:?}", self.get(name)),
                ));
            }
        }
        Ok(())
    }

    /// Fail if any bound is malformed
    ///
    /// # Errors
    ///
    /// Returns `Configuration` for non-finite ends or `lower > upper`.
    pub fn validate(&self) -> Result<()> {
        ParamName::ALL
            .into_iter()
            .try_for_each(|name| self.get(name).validate(name))
    }
}
