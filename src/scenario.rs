// src/scenario.rs

//! Control data consumed by the ensemble layer.
//!
//! Parsing control files happens elsewhere; this module only holds the
//! ordered records that parsing produces, plus the seams through which the
//! ensemble layer talks to the outside world.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::PathBuf;

use crate::error::{find_duplicates, normalize_label, ThreadSafeStdError};
use crate::rsvd::RsvdConfig;

/// How a parameter relates to the optimizer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransformKind {
    None,
    /// Stored as log10 of the control value in numeric space.
    Log,
    /// Held at its control value; not drawn.
    Fixed,
    /// Follows `parent` with the ratio of the two initial values; not drawn.
    Tied { parent: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterRecord {
    pub name: String,
    pub initial_value: f64,
    pub lower_bound: f64,
    pub upper_bound: f64,
    pub transform: TransformKind,
    pub group: String,
    pub scale: f64,
    pub offset: f64,
}

impl ParameterRecord {
    pub fn new(name: &str, initial_value: f64, lower_bound: f64, upper_bound: f64) -> Self {
        Self {
            name: normalize_label(name),
            initial_value,
            lower_bound,
            upper_bound,
            transform: TransformKind::None,
            group: "DEFAULT".to_string(),
            scale: 1.0,
            offset: 0.0,
        }
    }

    pub fn with_transform(mut self, transform: TransformKind) -> Self {
        self.transform = match transform {
            TransformKind::Tied { parent } => TransformKind::Tied { parent: normalize_label(&parent) },
            other => other,
        };
        self
    }

    pub fn with_group(mut self, group: &str) -> Self {
        self.group = normalize_label(group);
        self
    }

    pub fn with_scale_offset(mut self, scale: f64, offset: f64) -> Self {
        self.scale = scale;
        self.offset = offset;
        self
    }

    /// Neither fixed nor tied.
    pub fn is_adjustable(&self) -> bool {
        matches!(self.transform, TransformKind::None | TransformKind::Log)
    }

    pub fn is_log(&self) -> bool {
        self.transform == TransformKind::Log
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservationRecord {
    pub name: String,
    pub value: f64,
    pub weight: f64,
    pub group: String,
}

impl ObservationRecord {
    pub fn new(name: &str, value: f64, weight: f64, group: &str) -> Self {
        Self {
            name: normalize_label(name),
            value,
            weight,
            group: normalize_label(group),
        }
    }
}

/// Prior-information equation; only its name and weight matter here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriorInformationRecord {
    pub name: String,
    pub weight: f64,
}

impl PriorInformationRecord {
    pub fn new(name: &str, weight: f64) -> Self {
        Self { name: normalize_label(name), weight }
    }
}

/// Ensemble-generation options.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EnsembleOptions {
    /// Number of standard deviations spanned by a parameter's bounds.
    pub par_sigma_range: f64,
    /// Draw each parameter/observation group as an independent block.
    pub group_draws: bool,
    /// Clamp drawn parameter values into their bounds.
    pub enforce_bounds: bool,
    /// 0 silent, 1 events, >2 matrix dumps.
    pub diagnostics_level: u8,
    pub random_seed: u64,
    pub rsvd: RsvdConfig,
    /// Prior parameter covariance file (`.unc` or any matrix file); bounds are used when unset.
    pub par_cov_filename: Option<PathBuf>,
    /// Observation noise covariance file; weights are used when unset.
    pub obs_cov_filename: Option<PathBuf>,
}

impl Default for EnsembleOptions {
    fn default() -> Self {
        EnsembleOptions {
            par_sigma_range: 4.0,
            group_draws: false,
            enforce_bounds: true,
            diagnostics_level: 1,
            random_seed: 1_123_433_458,
            rsvd: RsvdConfig::default(),
            par_cov_filename: None,
            obs_cov_filename: None,
        }
    }
}

/// Ordered parameter, observation and prior-information records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlScenario {
    parameters: Vec<ParameterRecord>,
    observations: Vec<ObservationRecord>,
    prior_information: Vec<PriorInformationRecord>,
    pub options: EnsembleOptions,
}

impl ControlScenario {
    pub fn new(
        parameters: Vec<ParameterRecord>,
        observations: Vec<ObservationRecord>,
        prior_information: Vec<PriorInformationRecord>,
        options: EnsembleOptions,
    ) -> Result<Self, ThreadSafeStdError> {
        let par_names: Vec<String> = parameters.iter().map(|p| p.name.clone()).collect();
        let dups = find_duplicates(&par_names);
        if !dups.is_empty() {
            return Err(format!("ControlScenario: duplicate parameter names: {}", dups.join(",")).into());
        }
        let obs_names: Vec<String> = observations
            .iter()
            .map(|o| o.name.clone())
            .chain(prior_information.iter().map(|p| p.name.clone()))
            .collect();
        let dups = find_duplicates(&obs_names);
        if !dups.is_empty() {
            return Err(format!("ControlScenario: duplicate observation/prior names: {}", dups.join(",")).into());
        }
        let by_name: HashMap<&str, &ParameterRecord> = parameters.iter().map(|p| (p.name.as_str(), p)).collect();
        for p in &parameters {
            if p.lower_bound > p.upper_bound {
                return Err(format!("ControlScenario: parameter {} has lower bound above upper bound", p.name).into());
            }
            if p.is_log() && p.lower_bound <= 0.0 {
                return Err(format!("ControlScenario: log-transformed parameter {} needs a positive lower bound", p.name).into());
            }
            if let TransformKind::Tied { parent } = &p.transform {
                match by_name.get(parent.as_str()) {
                    Some(rec) if rec.is_adjustable() => {
                        if rec.initial_value == 0.0 {
                            return Err(format!("ControlScenario: tied parent {} has a zero initial value", parent).into());
                        }
                    }
                    Some(_) => {
                        return Err(format!("ControlScenario: parameter {} is tied to non-adjustable {}", p.name, parent).into())
                    }
                    None => return Err(format!("ControlScenario: parameter {} is tied to unknown {}", p.name, parent).into()),
                }
            }
        }
        Ok(Self { parameters, observations, prior_information, options })
    }

    pub fn parameters(&self) -> &[ParameterRecord] {
        &self.parameters
    }

    pub fn observations(&self) -> &[ObservationRecord] {
        &self.observations
    }

    pub fn prior_information(&self) -> &[PriorInformationRecord] {
        &self.prior_information
    }

    pub fn parameter(&self, name: &str) -> Option<&ParameterRecord> {
        let key = normalize_label(name);
        self.parameters.iter().find(|p| p.name == key)
    }

    pub fn observation(&self, name: &str) -> Option<&ObservationRecord> {
        let key = normalize_label(name);
        self.observations.iter().find(|o| o.name == key)
    }

    pub fn parameter_names(&self) -> Vec<String> {
        self.parameters.iter().map(|p| p.name.clone()).collect()
    }

    /// Parameters that are neither fixed nor tied, in control order.
    pub fn adjustable_parameter_names(&self) -> Vec<String> {
        self.parameters.iter().filter(|p| p.is_adjustable()).map(|p| p.name.clone()).collect()
    }

    pub fn fixed_parameter_names(&self) -> Vec<String> {
        self.parameters
            .iter()
            .filter(|p| p.transform == TransformKind::Fixed)
            .map(|p| p.name.clone())
            .collect()
    }

    pub fn tied_parameter_names(&self) -> Vec<String> {
        self.parameters
            .iter()
            .filter(|p| matches!(p.transform, TransformKind::Tied { .. }))
            .map(|p| p.name.clone())
            .collect()
    }

    pub fn observation_names(&self) -> Vec<String> {
        self.observations.iter().map(|o| o.name.clone()).collect()
    }

    pub fn nonzero_weight_observation_names(&self) -> Vec<String> {
        self.observations.iter().filter(|o| o.weight > 0.0).map(|o| o.name.clone()).collect()
    }

    pub fn ctl_parameter_values(&self) -> HashMap<String, f64> {
        self.parameters.iter().map(|p| (p.name.clone(), p.initial_value)).collect()
    }

    pub fn observation_values(&self) -> HashMap<String, f64> {
        self.observations.iter().map(|o| (o.name.clone(), o.value)).collect()
    }

    /// Adjustable parameters partitioned by group: groups in order of first appearance,
    /// names sorted within each group.
    pub fn parameter_groups(&self) -> Vec<(String, Vec<String>)> {
        group_names_by(self.parameters.iter().filter(|p| p.is_adjustable()).map(|p| (&p.group, &p.name)))
    }

    /// Nonzero-weight observations partitioned by group, same ordering rules as
    /// [`parameter_groups`](Self::parameter_groups).
    pub fn observation_groups(&self) -> Vec<(String, Vec<String>)> {
        group_names_by(self.observations.iter().filter(|o| o.weight > 0.0).map(|o| (&o.group, &o.name)))
    }
}

fn group_names_by<'a, I>(items: I) -> Vec<(String, Vec<String>)>
where
    I: Iterator<Item = (&'a String, &'a String)>,
{
    let mut order: Vec<String> = Vec::new();
    let mut members: HashMap<String, Vec<String>> = HashMap::new();
    for (group, name) in items {
        if !members.contains_key(group) {
            order.push(group.clone());
        }
        members.entry(group.clone()).or_default().push(name.clone());
    }
    order
        .into_iter()
        .map(|g| {
            let mut names = members.remove(&g).unwrap_or_default();
            names.sort();
            (g, names)
        })
        .collect()
}

/// Source of per-variable center values.
pub trait ValueProvider {
    fn value(&self, name: &str) -> Option<f64>;

    /// Looks up every name, reporting all that are absent.
    fn values_for(&self, names: &[String]) -> Result<Vec<f64>, ThreadSafeStdError> {
        let mut out = Vec::with_capacity(names.len());
        let mut missing = Vec::new();
        for name in names {
            match self.value(name) {
                Some(v) => out.push(v),
                None => missing.push(name.clone()),
            }
        }
        if missing.is_empty() {
            Ok(out)
        } else {
            Err(format!("value provider is missing: {}", missing.join(",")).into())
        }
    }
}

impl ValueProvider for HashMap<String, f64> {
    fn value(&self, name: &str) -> Option<f64> {
        self.get(name).copied()
    }
}

impl ValueProvider for BTreeMap<String, f64> {
    fn value(&self, name: &str) -> Option<f64> {
        self.get(name).copied()
    }
}

/// External model-run layer.
pub trait RunManager {
    /// Queues a run with model-space parameter values; returns its run id.
    fn add_run(&mut self, parameters: &HashMap<String, f64>) -> Result<usize, ThreadSafeStdError>;

    fn failed_run_ids(&self) -> BTreeSet<usize>;

    /// Parameters and simulated observations of a completed run.
    fn get_run(&self, run_id: usize) -> Result<(HashMap<String, f64>, HashMap<String, f64>), ThreadSafeStdError>;
}

/// Names present in `required` but not in `available`, in `required` order.
pub fn missing_names(required: &[String], available: &[String]) -> Vec<String> {
    let set: HashSet<&str> = available.iter().map(String::as_str).collect();
    required.iter().filter(|n| !set.contains(n.as_str())).cloned().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scenario() -> ControlScenario {
        ControlScenario::new(
            vec![
                ParameterRecord::new("k2", 2.0, 1.0, 10.0).with_group("hk"),
                ParameterRecord::new("rch", 0.5, 0.1, 1.0).with_group("rch").with_transform(TransformKind::Log),
                ParameterRecord::new("k1", 3.0, 1.0, 10.0).with_group("hk"),
                ParameterRecord::new("fx", 7.0, 7.0, 7.0).with_transform(TransformKind::Fixed),
                ParameterRecord::new("tk", 6.0, 1.0, 20.0).with_transform(TransformKind::Tied { parent: "k1".into() }),
            ],
            vec![
                ObservationRecord::new("h1", 10.0, 1.0, "heads"),
                ObservationRecord::new("h0", 11.0, 0.0, "heads"),
                ObservationRecord::new("q1", 5.0, 2.0, "flux"),
            ],
            vec![PriorInformationRecord::new("pi1", 0.5)],
            EnsembleOptions::default(),
        )
        .unwrap()
    }

    #[test]
    fn adjustable_names_skip_fixed_and_tied() {
        let s = scenario();
        assert_eq!(s.adjustable_parameter_names(), vec!["K2", "RCH", "K1"]);
        assert_eq!(s.fixed_parameter_names(), vec!["FX"]);
        assert_eq!(s.tied_parameter_names(), vec!["TK"]);
    }

    #[test]
    fn groups_keep_first_appearance_and_sort_members() {
        let s = scenario();
        let groups = s.parameter_groups();
        assert_eq!(groups[0], ("HK".to_string(), vec!["K1".to_string(), "K2".to_string()]));
        assert_eq!(groups[1].0, "RCH");
        let obs_groups = s.observation_groups();
        assert_eq!(obs_groups[0].1, vec!["H1".to_string()]);
    }

    #[test]
    fn tie_to_unknown_parent_is_rejected() {
        let bad = ControlScenario::new(
            vec![ParameterRecord::new("a", 1.0, 0.0, 2.0).with_transform(TransformKind::Tied { parent: "zz".into() })],
            vec![],
            vec![],
            EnsembleOptions::default(),
        );
        assert!(bad.is_err());
    }

    #[test]
    fn value_provider_reports_all_missing() {
        let mut map = HashMap::new();
        map.insert("A".to_string(), 1.0);
        let err = map.values_for(&["A".into(), "B".into(), "C".into()]).unwrap_err().to_string();
        assert!(err.contains("B,C"));
    }

    #[test]
    fn default_options_match_documented_values() {
        let o = EnsembleOptions::default();
        assert_eq!(o.par_sigma_range, 4.0);
        assert_eq!(o.random_seed, 1123433458);
    }
}
