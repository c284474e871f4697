//! Observed burn data

use crate::error::{FireCaError, Result};
use crate::grid::{GridSnapshot, Raster};
use serde::{Deserialize, Serialize};

/// Burn mask observed at one step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimedMask {
    /// Steps after the initial grid
    pub step: u32,
    /// Burned fraction per cell in `[0, 1]`
    pub mask: Raster,
}

/// What the calibration is fitted against
///
/// Mask values may be fractional where a sensor pixel only partly covers
/// burned cells.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Observation {
    /// Burn mask at the end of the run
    Final(Raster),
    /// Burn masks at increasing steps
    Series(Vec<TimedMask>),
}

impl Observation {
    /// Time series of burned masks taken from simulated snapshots
    ///
    /// Useful for synthetic calibration targets.
    pub fn from_snapshots<'a>(snapshots: impl IntoIterator<Item = &'a GridSnapshot>) -> Self {
        Observation::Series(
            snapshots
                .into_iter()
                .map(|s| TimedMask {
                    step: s.step,
                    mask: s.burned_mask(),
                })
                .collect(),
        )
    }

    /// Check shapes, values and step ordering against a run of `n_steps`
    ///
    /// # Errors
    ///
    /// - `InvalidGeometry` if a mask is not `rows x cols`
    /// - `Configuration` for values outside `[0, 1]`, an empty series,
    ///   duplicate or decreasing steps, or steps beyond `n_steps`
    pub fn validate(&self, rows: usize, cols: usize, n_steps: usize) -> Result<()> {
        match self {
            Observation::Final(mask) => check_mask("observation", mask, rows, cols),
            Observation::Series(masks) => {
                if masks.is_empty() {
                    return Err(FireCaError::config("observation", "series is empty"));
                }
                let mut last: Option<u32> = None;
                for timed in masks {
                    let name = format!("observation[step {}]", timed.step);
                    if last.is_some_and(|prev| timed.step <= prev) {
                        return Err(FireCaError::config(name, "steps must strictly increase"));
                    }
                    if timed.step as usize > n_steps {
                        return Err(FireCaError::config(
                            name,
                            format!("beyond the {n_steps}-step horizon"),
                        ));
                    }
                    check_mask(&name, &timed.mask, rows, cols)?;
                    last = Some(timed.step);
                }
                Ok(())
            }
        }
    }

    /// `(step, mask)` pairs the loss is summed over
    ///
    /// A final mask is compared at step `n_steps`.
    pub fn targets(&self, n_steps: usize) -> Vec<(usize, &Raster)> {
        match self {
            Observation::Final(mask) => vec![(n_steps, mask)],
            Observation::Series(masks) => {
                masks.iter().map(|t| (t.step as usize, &t.mask)).collect()
            }
        }
    }

    /// Last observed mask and its step
    pub fn final_target(&self, n_steps: usize) -> Option<(usize, &Raster)> {
        self.targets(n_steps).into_iter().last()
    }

    /// First observed step each cell reached a burned fraction of 0.5
    ///
    /// `None` for a final mask, which carries no timing.
    pub fn arrival_steps(&self) -> Option<Vec<Option<u32>>> {
        let Observation::Series(masks) = self else {
            return None;
        };
        let cells = masks.first()?.mask.len();
        let mut arrival = vec![None; cells];
        for timed in masks {
            for (slot, &value) in arrival.iter_mut().zip(timed.mask.as_slice()) {
                if slot.is_none() && value >= 0.5 {
                    *slot = Some(timed.step);
                }
            }
        }
        Some(arrival)
    }
}

fn check_mask(name: &str, mask: &Raster, rows: usize, cols: usize) -> Result<()> {
    mask.ensure_shape(name, rows, cols)?;
    match mask.as_slice().iter().find(|v| !(0.0..=1.0).contains(*v)) {
        Some(bad) => Err(FireCaError::config(
            name,
            format!("burn fraction {bad} is outside [0, 1]"),
        )),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mask(rows: usize, cols: usize, burned: &[(usize, usize)]) -> Raster {
        let mut m = Raster::new(rows, cols);
        for &(r, c) in burned {
            m.set(r, c, 1.0);
        }
        m
    }

    #[test]
    fn test_final_mask_validation() {
        let obs = Observation::Final(mask(3, 3, &[(1, 1)]));
        assert!(obs.validate(3, 3, 5).is_ok());
        assert!(matches!(
            obs.validate(3, 4, 5).unwrap_err(),
            FireCaError::InvalidGeometry { .. }
        ));

        let mut fractional = Raster::new(3, 3);
        fractional.set(0, 0, 0.25);
        assert!(Observation::Final(fractional.clone()).validate(3, 3, 5).is_ok());
        fractional.set(0, 1, 1.5);
        assert!(Observation::Final(fractional).validate(3, 3, 5).is_err());
    }

    #[test]
    fn test_series_step_rules() {
        let series = |steps: &[u32]| {
            Observation::Series(
                steps
                    .iter()
                    .map(|&step| TimedMask {
                        step,
                        mask: Raster::new(2, 2),
                    })
                    .collect(),
            )
        };
        assert!(series(&[1, 3, 4]).validate(2, 2, 4).is_ok());
        let duplicate = series(&[1, 3, 3]).validate(2, 2, 4).unwrap_err();
        assert!(duplicate.to_string().contains("strictly increase"), "{duplicate}");
        assert!(series(&[0, 2, 0]).validate(2, 2, 4).is_err());
        assert!(series(&[3, 1]).validate(2, 2, 4).is_err());
        assert!(series(&[1, 5]).validate(2, 2, 4).is_err());
        assert!(series(&[]).validate(2, 2, 4).is_err());
    }

    #[test]
    fn test_json_with_short_mask_is_rejected() {
        let json = r#"{"Final":{"data":[1.0],"rows":5,"cols":5}}"#;
        assert!(serde_json::from_str::<Observation>(json).is_err());

        let good = Observation::Final(mask(2, 2, &[(1, 0)]));
        let json = serde_json::to_string(&good).unwrap();
        let decoded: Observation = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, good);
        assert!(decoded.validate(2, 2, 1).is_ok());
    }

    #[test]
    fn test_targets() {
        let final_obs = Observation::Final(mask(2, 2, &[]));
        assert_eq!(final_obs.targets(7)[0].0, 7);
        assert!(final_obs.arrival_steps().is_none());

        let series = Observation::Series(vec![
            TimedMask {
                step: 2,
                mask: mask(2, 2, &[(0, 0)]),
            },
            TimedMask {
                step: 5,
                mask: mask(2, 2, &[(0, 0), (1, 1)]),
            },
        ]);
        let steps: Vec<usize> = series.targets(9).iter().map(|t| t.0).collect();
        assert_eq!(steps, vec![2, 5]);
        assert_eq!(series.final_target(9).unwrap().0, 5);
        assert_eq!(
            series.arrival_steps().unwrap(),
            vec![Some(2), None, None, Some(5)]
        );
    }
}
