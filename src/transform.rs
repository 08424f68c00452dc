// src/transform.rs

//! Parameter value spaces.
//!
//! * **CTL**: values as written in the control data.
//! * **NUM**: optimizer space; log-transformed parameters hold `log10` of the
//!   control value and only adjustable parameters are present.
//! * **MODEL**: simulator input; every parameter, with `scale`/`offset` applied
//!   and tied parameters derived from their parents.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::error::ThreadSafeStdError;
use crate::scenario::{ControlScenario, ParameterRecord, TransformKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransformStatus {
    Ctl,
    Num,
    Model,
}

impl fmt::Display for TransformStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TransformStatus::Ctl => "CTL",
            TransformStatus::Num => "NUM",
            TransformStatus::Model => "MODEL",
        };
        f.write_str(label)
    }
}

/// Per-parameter transforms driven by the control records.
#[derive(Debug, Clone, Copy)]
pub struct ParameterTransforms<'a> {
    scenario: &'a ControlScenario,
}

impl<'a> ParameterTransforms<'a> {
    pub fn new(scenario: &'a ControlScenario) -> Self {
        Self { scenario }
    }

    fn record(&self, name: &str) -> Result<&'a ParameterRecord, ThreadSafeStdError> {
        self.scenario
            .parameter(name)
            .ok_or_else(|| format!("parameter '{}' is not in the control data", name).into())
    }

    pub fn ctl_to_num(&self, name: &str, value: f64) -> Result<f64, ThreadSafeStdError> {
        let rec = self.record(name)?;
        if rec.is_log() {
            if value <= 0.0 {
                return Err(format!("cannot log-transform non-positive value {} of parameter {}", value, rec.name).into());
            }
            Ok(value.log10())
        } else {
            Ok(value)
        }
    }

    pub fn num_to_ctl(&self, name: &str, value: f64) -> Result<f64, ThreadSafeStdError> {
        let rec = self.record(name)?;
        Ok(if rec.is_log() { 10f64.powf(value) } else { value })
    }

    pub fn ctl_to_model(&self, name: &str, value: f64) -> Result<f64, ThreadSafeStdError> {
        let rec = self.record(name)?;
        Ok(value * rec.scale + rec.offset)
    }

    pub fn model_to_ctl(&self, name: &str, value: f64) -> Result<f64, ThreadSafeStdError> {
        let rec = self.record(name)?;
        if rec.scale == 0.0 {
            return Err(format!("parameter {} has a zero scale", rec.name).into());
        }
        Ok((value - rec.offset) / rec.scale)
    }

    /// Bounds in NUM space.
    pub fn num_bounds(&self, name: &str) -> Result<(f64, f64), ThreadSafeStdError> {
        let rec = self.record(name)?;
        Ok((self.ctl_to_num(name, rec.lower_bound)?, self.ctl_to_num(name, rec.upper_bound)?))
    }

    /// Fills tied parameters from their parents' values in `ctl`.
    pub fn apply_ties(&self, ctl: &mut HashMap<String, f64>) -> Result<(), ThreadSafeStdError> {
        for rec in self.scenario.parameters() {
            if let TransformKind::Tied { parent } = &rec.transform {
                let parent_rec = self.record(parent)?;
                let parent_value = ctl
                    .get(parent)
                    .copied()
                    .ok_or_else(|| format!("tied parameter {} needs a value for parent {}", rec.name, parent))?;
                let ratio = rec.initial_value / parent_rec.initial_value;
                ctl.insert(rec.name.clone(), parent_value * ratio);
            }
        }
        Ok(())
    }

    /// Converts a full CTL parameter set to MODEL space, deriving tied values first.
    pub fn ctl_set_to_model(&self, ctl: &HashMap<String, f64>) -> Result<HashMap<String, f64>, ThreadSafeStdError> {
        let mut tied = ctl.clone();
        self.apply_ties(&mut tied)?;
        let mut model = HashMap::with_capacity(tied.len());
        for (name, v) in tied {
            let converted = self.ctl_to_model(&name, v)?;
            model.insert(name, converted);
        }
        Ok(model)
    }

    /// Converts a MODEL parameter set back to CTL space.
    pub fn model_set_to_ctl(&self, model: &HashMap<String, f64>) -> Result<HashMap<String, f64>, ThreadSafeStdError> {
        let mut ctl = HashMap::with_capacity(model.len());
        for (name, &v) in model {
            ctl.insert(name.clone(), self.model_to_ctl(name, v)?);
        }
        Ok(ctl)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scenario::{EnsembleOptions, ParameterRecord};
    use approx::assert_abs_diff_eq;

    fn scenario() -> ControlScenario {
        ControlScenario::new(
            vec![
                ParameterRecord::new("hk", 10.0, 0.1, 1000.0).with_transform(TransformKind::Log),
                ParameterRecord::new("ss", 1e-4, 1e-5, 1e-3).with_scale_offset(2.0, 1.0),
                ParameterRecord::new("vk", 5.0, 0.1, 100.0).with_transform(TransformKind::Tied { parent: "hk".into() }),
            ],
            vec![],
            vec![],
            EnsembleOptions::default(),
        )
        .unwrap()
    }

    #[test]
    fn log_parameters_round_trip_through_num() {
        let s = scenario();
        let t = ParameterTransforms::new(&s);
        assert_abs_diff_eq!(t.ctl_to_num("HK", 100.0).unwrap(), 2.0, epsilon = 1e-12);
        assert_abs_diff_eq!(t.num_to_ctl("HK", 2.0).unwrap(), 100.0, epsilon = 1e-9);
        assert!(t.ctl_to_num("HK", 0.0).is_err());
        let (lo, hi) = t.num_bounds("HK").unwrap();
        assert_abs_diff_eq!(lo, -1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(hi, 3.0, epsilon = 1e-12);
    }

    #[test]
    fn model_space_applies_scale_offset_and_ties() {
        let s = scenario();
        let t = ParameterTransforms::new(&s);
        let mut ctl = HashMap::new();
        ctl.insert("HK".to_string(), 20.0);
        ctl.insert("SS".to_string(), 3.0);
        let model = t.ctl_set_to_model(&ctl).unwrap();
        assert_abs_diff_eq!(model["SS"], 7.0);
        assert_abs_diff_eq!(model["VK"], 10.0);
        let back = t.model_set_to_ctl(&model).unwrap();
        assert_abs_diff_eq!(back["SS"], 3.0);
    }
}
