// src/parameter_ensemble.rs

use log::{debug, info, trace, warn};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::ops::Deref;
use std::path::Path;
use std::sync::Arc;

use crate::covariance::CovarianceMatrix;
use crate::diagnostics::DiagnosticsSink;
use crate::draw::RandomDrawEngine;
use crate::ensemble::Ensemble;
use crate::error::{normalize_label, NameLookupError, ThreadSafeStdError};
use crate::sampling::SamplingContext;
use crate::scenario::{ControlScenario, RunManager};
use crate::transform::{ParameterTransforms, TransformStatus};

/// Realization name under which control-file values of fixed parameters are kept.
pub const BASE_REAL_NAME: &str = "BASE";

/// Ensemble of parameter realizations bound to a control scenario.
///
/// Values live in one of the [`TransformStatus`] spaces. Fixed parameters are
/// remembered per realization so that files and model runs always carry them,
/// even after the NUM transform drops them from the columns. Row changes go
/// through the wrappers below so the saved values follow their realizations.
#[derive(Debug, Clone)]
pub struct ParameterEnsemble {
    ensemble: Ensemble,
    scenario: Arc<ControlScenario>,
    tstat: TransformStatus,
    fixed_names: Vec<String>,
    fixed_map: HashMap<(String, String), f64>,
}

impl Deref for ParameterEnsemble {
    type Target = Ensemble;

    fn deref(&self) -> &Ensemble {
        &self.ensemble
    }
}

impl ParameterEnsemble {
    pub fn new(scenario: Arc<ControlScenario>) -> Self {
        Self {
            ensemble: Ensemble::new(),
            scenario,
            tstat: TransformStatus::Ctl,
            fixed_names: Vec::new(),
            fixed_map: HashMap::new(),
        }
    }

    /// Wraps existing values; every variable must be a control parameter.
    pub fn from_array(
        scenario: Arc<ControlScenario>,
        real_names: Vec<String>,
        var_names: Vec<String>,
        reals: ndarray::Array2<f64>,
        tstat: TransformStatus,
    ) -> Result<Self, ThreadSafeStdError> {
        let ensemble = Ensemble::from_array(real_names, var_names, reals)?;
        let mut unknown = NameLookupError::new("ParameterEnsemble::from_array (not control parameters)");
        unknown.missing_cols = ensemble
            .var_names()
            .iter()
            .filter(|n| scenario.parameter(n).is_none())
            .cloned()
            .collect();
        unknown.into_result()?;
        let mut pe = Self::new(scenario);
        pe.ensemble = ensemble;
        pe.tstat = tstat;
        pe.fixed_names = pe.scenario.fixed_parameter_names();
        pe.save_fixed()?;
        Ok(pe)
    }

    pub fn scenario(&self) -> &ControlScenario {
        &self.scenario
    }

    pub fn transform_status(&self) -> TransformStatus {
        self.tstat
    }

    pub fn fixed_names(&self) -> &[String] {
        &self.fixed_names
    }

    pub fn ensemble(&self) -> &Ensemble {
        &self.ensemble
    }

    pub fn into_ensemble(self) -> Ensemble {
        self.ensemble
    }

    pub fn zeros_like(&self) -> ParameterEnsemble {
        let mut pe = self.clone();
        pe.ensemble = self.ensemble.zeros_like();
        pe
    }

    pub fn set_zeros(&mut self) {
        self.ensemble.set_zeros();
    }

    /// Forgets saved fixed values of realizations no longer in the ensemble.
    fn prune_fixed(&mut self) {
        let live: HashSet<&str> = self.ensemble.real_names().iter().map(String::as_str).collect();
        let before = self.fixed_map.len();
        self.fixed_map
            .retain(|(real, _), _| real == BASE_REAL_NAME || live.contains(real.as_str()));
        trace!("prune_fixed: {} saved values dropped", before - self.fixed_map.len());
    }

    pub fn drop_rows(&mut self, names: &[String]) {
        self.ensemble.drop_rows(names);
        self.prune_fixed();
    }

    pub fn drop_rows_by_index(&mut self, indices: &[usize]) -> Result<(), ThreadSafeStdError> {
        self.ensemble.drop_rows_by_index(indices)?;
        self.prune_fixed();
        Ok(())
    }

    pub fn keep_rows(&mut self, names: &[String]) -> Result<(), ThreadSafeStdError> {
        self.ensemble.keep_rows(names)?;
        self.prune_fixed();
        Ok(())
    }

    pub fn keep_rows_by_index(&mut self, indices: &[usize]) -> Result<(), ThreadSafeStdError> {
        self.ensemble.keep_rows_by_index(indices)?;
        self.prune_fixed();
        Ok(())
    }

    /// Renames realizations positionally; saved fixed values move with them.
    pub fn set_real_names(&mut self, real_names: Vec<String>) -> Result<(), ThreadSafeStdError> {
        let old = self.ensemble.real_names().to_vec();
        self.ensemble.set_real_names(real_names)?;
        let renamed: HashMap<&str, &str> = old
            .iter()
            .map(String::as_str)
            .zip(self.ensemble.real_names().iter().map(String::as_str))
            .collect();
        self.fixed_map = self
            .fixed_map
            .drain()
            .filter_map(|((real, name), v)| {
                if real == BASE_REAL_NAME {
                    return Some(((real, name), v));
                }
                renamed.get(real.as_str()).map(|new| ((new.to_string(), name), v))
            })
            .collect();
        Ok(())
    }

    /// Appends the rows of `other`, which must be in the same transform space.
    pub fn append_other_rows(&mut self, other: &ParameterEnsemble) -> Result<(), ThreadSafeStdError> {
        if other.tstat != self.tstat {
            return Err(format!(
                "ParameterEnsemble::append_other_rows: other is in {} space, this is in {}",
                other.tstat, self.tstat
            )
            .into());
        }
        self.ensemble.append_other_rows(&other.ensemble)?;
        for ((real, name), &v) in &other.fixed_map {
            if real != BASE_REAL_NAME {
                self.fixed_map.insert((real.clone(), name.clone()), v);
            }
        }
        Ok(())
    }

    /// Draws `num_reals` realizations of the adjustable parameters around their
    /// control values, in NUM space.
    ///
    /// With `group_draws` set, each parameter group is correlated independently
    /// of the others; the columns still come out in control order. Bounds are
    /// enforced afterwards when the scenario asks for it.
    pub fn draw(
        &mut self,
        num_reals: usize,
        covariance: &CovarianceMatrix,
        ctx: &mut SamplingContext,
        sink: &mut DiagnosticsSink,
    ) -> Result<(), ThreadSafeStdError> {
        let scenario = Arc::clone(&self.scenario);
        let transforms = ParameterTransforms::new(&scenario);
        let adjustable = scenario.adjustable_parameter_names();
        let ctl = scenario.ctl_parameter_values();
        let mut center = HashMap::with_capacity(adjustable.len());
        for name in &adjustable {
            let value = ctl
                .get(name)
                .copied()
                .ok_or_else(|| format!("ParameterEnsemble::draw: no control value for {}", name))?;
            center.insert(name.clone(), transforms.ctl_to_num(name, value)?);
        }

        let (draw_names, groups) = if scenario.options.group_draws {
            let groups = scenario.parameter_groups();
            let sorted: Vec<String> = groups.iter().flat_map(|(_, names)| names.iter().cloned()).collect();
            if sorted != adjustable {
                sink.log_event("parameters reordered by group for drawing");
            }
            (sorted, groups)
        } else {
            (adjustable.clone(), Vec::new())
        };

        let engine = RandomDrawEngine::new(scenario.options.rsvd.clone());
        let mut ensemble = Ensemble::reserve(Vec::new(), adjustable)?;
        ensemble.draw(num_reals, covariance, &center, &draw_names, &groups, &engine, ctx, sink)?;
        self.ensemble = ensemble;
        self.tstat = TransformStatus::Num;
        self.fixed_names = scenario.fixed_parameter_names();
        self.fixed_map.clear();
        self.save_fixed()?;

        if scenario.options.enforce_bounds {
            let clamped = self.enforce_bounds()?;
            sink.log_event(format!("{} drawn values clamped to parameter bounds", clamped));
        }
        Ok(())
    }

    /// Clamps every value into its parameter's NUM-space bounds; returns how many moved.
    pub fn enforce_bounds(&mut self) -> Result<usize, ThreadSafeStdError> {
        if self.tstat != TransformStatus::Num {
            return Err(format!(
                "ParameterEnsemble::enforce_bounds: requires NUM transform status, currently {}",
                self.tstat
            )
            .into());
        }
        let scenario = Arc::clone(&self.scenario);
        let transforms = ParameterTransforms::new(&scenario);
        let bounds = self
            .ensemble
            .var_names()
            .iter()
            .map(|name| transforms.num_bounds(name))
            .collect::<Result<Vec<_>, _>>()?;
        let mut clamped = 0usize;
        let mut reals = self.ensemble.reals_mut();
        for (mut col, (lb, ub)) in reals.columns_mut().into_iter().zip(bounds) {
            col.mapv_inplace(|v| {
                let c = v.clamp(lb, ub);
                if c != v {
                    clamped += 1;
                }
                c
            });
        }
        debug!("enforce_bounds: {} values clamped", clamped);
        Ok(clamped)
    }

    /// Moves the values to another space. CTL to NUM keeps only adjustable
    /// parameters; other conversions are not supported.
    pub fn transform_ip(&mut self, to: TransformStatus) -> Result<(), ThreadSafeStdError> {
        if to == self.tstat {
            return Ok(());
        }
        if !(self.tstat == TransformStatus::Ctl && to == TransformStatus::Num) {
            return Err(format!("ParameterEnsemble::transform_ip: {} to {} not supported", self.tstat, to).into());
        }
        let scenario = Arc::clone(&self.scenario);
        let transforms = ParameterTransforms::new(&scenario);
        let adjustable: Vec<String> = scenario
            .adjustable_parameter_names()
            .into_iter()
            .filter(|n| self.ensemble.var_index(n).is_some())
            .collect();
        self.save_fixed()?;
        self.ensemble.reorder(&[], &adjustable)?;
        let mut reals = self.ensemble.reals_mut();
        for (name, mut col) in adjustable.iter().zip(reals.columns_mut()) {
            for v in col.iter_mut() {
                *v = transforms.ctl_to_num(name, *v)?;
            }
        }
        self.tstat = TransformStatus::Num;
        Ok(())
    }

    fn to_ctl(&self, transforms: &ParameterTransforms<'_>, name: &str, value: f64) -> Result<f64, ThreadSafeStdError> {
        match self.tstat {
            TransformStatus::Ctl => Ok(value),
            TransformStatus::Num => transforms.num_to_ctl(name, value),
            TransformStatus::Model => transforms.model_to_ctl(name, value),
        }
    }

    /// Records fixed-parameter values per realization, plus the control values
    /// under [`BASE_REAL_NAME`] as the fallback.
    pub fn save_fixed(&mut self) -> Result<(), ThreadSafeStdError> {
        if self.fixed_names.is_empty() {
            return Ok(());
        }
        let scenario = Arc::clone(&self.scenario);
        let transforms = ParameterTransforms::new(&scenario);
        let ctl = scenario.ctl_parameter_values();
        for name in &self.fixed_names {
            if let Some(&v) = ctl.get(name) {
                self.fixed_map.insert((BASE_REAL_NAME.to_string(), name.clone()), v);
            }
        }
        let mut saved = Vec::new();
        for name in &self.fixed_names {
            let Some(j) = self.ensemble.var_index(name) else {
                continue;
            };
            for (real, &v) in self.ensemble.real_names().iter().zip(self.ensemble.reals().column(j)) {
                saved.push(((real.clone(), name.clone()), self.to_ctl(&transforms, name, v)?));
            }
        }
        self.fixed_map.extend(saved);
        Ok(())
    }

    /// Sets fixed columns that were not read from a file to their control values.
    pub fn fill_fixed(&mut self, found: &[String]) -> Result<usize, ThreadSafeStdError> {
        let found: HashSet<String> = found.iter().map(|n| normalize_label(n)).collect();
        let ctl = self.scenario.ctl_parameter_values();
        let mut filled = 0usize;
        for name in &self.fixed_names {
            if found.contains(name) {
                continue;
            }
            let Some(j) = self.ensemble.var_index(name) else {
                continue;
            };
            let v = ctl
                .get(name)
                .copied()
                .ok_or_else(|| format!("ParameterEnsemble::fill_fixed: no control value for {}", name))?;
            self.ensemble.reals_mut().column_mut(j).fill(v);
            filled += 1;
        }
        Ok(filled)
    }

    /// Writes the saved fixed values of `real_name` into `values`; returns the
    /// number that fell back to the control values.
    pub fn replace_fixed(&self, real_name: &str, values: &mut HashMap<String, f64>) -> usize {
        let mut fallbacks = 0usize;
        for name in &self.fixed_names {
            if let Some(&v) = self.fixed_map.get(&(real_name.to_string(), name.clone())) {
                values.insert(name.clone(), v);
            } else if let Some(&v) = self.fixed_map.get(&(BASE_REAL_NAME.to_string(), name.clone())) {
                values.insert(name.clone(), v);
                fallbacks += 1;
            }
        }
        fallbacks
    }

    /// Complete CTL parameter set of realization `index`: control values
    /// overlaid with the ensemble's, fixed values restored, ties applied.
    pub fn ctl_realization(&self, index: usize) -> Result<(HashMap<String, f64>, usize), ThreadSafeStdError> {
        let transforms = ParameterTransforms::new(&self.scenario);
        let row = self.ensemble.get_real_vector(index)?;
        let mut values = self.scenario.ctl_parameter_values();
        for (name, &v) in self.ensemble.var_names().iter().zip(row.iter()) {
            values.insert(name.clone(), self.to_ctl(&transforms, name, v)?);
        }
        let fallbacks = self.replace_fixed(&self.ensemble.real_names()[index], &mut values);
        transforms.apply_ties(&mut values)?;
        Ok((values, fallbacks))
    }

    /// Every control parameter in CTL space, in control order.
    pub fn to_ctl_ensemble(&self) -> Result<Ensemble, ThreadSafeStdError> {
        let names = self.scenario.parameter_names();
        let (nreals, _) = self.ensemble.shape();
        let mut out = Ensemble::reserve(self.ensemble.real_names().to_vec(), names.clone())?;
        let mut total_fallbacks = 0usize;
        {
            let mut reals = out.reals_mut();
            for i in 0..nreals {
                let (values, fallbacks) = self.ctl_realization(i)?;
                total_fallbacks += fallbacks;
                for (j, name) in names.iter().enumerate() {
                    reals[[i, j]] = values.get(name).copied().unwrap_or(0.0);
                }
            }
        }
        if total_fallbacks > 0 {
            debug!("{} fixed values taken from the control data", total_fallbacks);
        }
        Ok(out)
    }

    pub fn to_csv<P: AsRef<Path>>(&self, path: P) -> Result<(), ThreadSafeStdError> {
        self.to_ctl_ensemble()?.to_csv(path)
    }

    pub fn to_binary<P: AsRef<Path>>(&self, path: P) -> Result<(), ThreadSafeStdError> {
        self.to_ctl_ensemble()?.to_binary(path)
    }

    /// Reads CTL values; every adjustable parameter must have a column.
    pub fn from_csv<P: AsRef<Path>>(scenario: Arc<ControlScenario>, path: P) -> Result<Self, ThreadSafeStdError> {
        let wanted = scenario.parameter_names();
        let required = scenario.adjustable_parameter_names();
        let (ensemble, found) = Ensemble::from_csv_columns(path.as_ref(), &wanted, &required)?;
        Self::from_loaded(scenario, ensemble, &found)
    }

    pub fn from_binary<P: AsRef<Path>>(scenario: Arc<ControlScenario>, path: P) -> Result<Self, ThreadSafeStdError> {
        let wanted = scenario.parameter_names();
        let required = scenario.adjustable_parameter_names();
        let (ensemble, found) = Ensemble::from_binary_columns(path.as_ref(), false, &wanted, &required)?;
        Self::from_loaded(scenario, ensemble, &found)
    }

    fn from_loaded(scenario: Arc<ControlScenario>, ensemble: Ensemble, found: &[String]) -> Result<Self, ThreadSafeStdError> {
        let mut pe = Self::new(scenario);
        pe.ensemble = ensemble;
        pe.fixed_names = pe.scenario.fixed_parameter_names();
        let filled = pe.fill_fixed(found)?;
        if filled > 0 {
            info!("{} fixed parameters not found in file, filled with control values", filled);
        }
        pe.save_fixed()?;
        Ok(pe)
    }

    /// Queues one model run per selected realization (all if `real_idxs` is
    /// empty). Returns realization index to run id.
    pub fn add_runs(&self, run_mgr: &mut dyn RunManager, real_idxs: &[usize]) -> Result<BTreeMap<usize, usize>, ThreadSafeStdError> {
        let transforms = ParameterTransforms::new(&self.scenario);
        let indices: Vec<usize> = if real_idxs.is_empty() {
            (0..self.ensemble.shape().0).collect()
        } else {
            real_idxs.to_vec()
        };
        let mut run_ids = BTreeMap::new();
        for idx in indices {
            let (ctl, _) = self.ctl_realization(idx)?;
            let model = transforms.ctl_set_to_model(&ctl)?;
            let run_id = run_mgr.add_run(&model)?;
            run_ids.insert(idx, run_id);
        }
        if run_ids.is_empty() {
            warn!("ParameterEnsemble::add_runs: no runs queued");
        }
        Ok(run_ids)
    }

    /// Diagonal covariance of the ensemble in NUM space.
    pub fn get_diagonal_cov_matrix(&mut self) -> Result<CovarianceMatrix, ThreadSafeStdError> {
        self.transform_ip(TransformStatus::Num)?;
        self.ensemble.get_diagonal_cov_matrix()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scenario::{EnsembleOptions, ParameterRecord, TransformKind};
    use float_cmp::assert_approx_eq;
    use std::collections::BTreeSet;

    fn scenario(options: EnsembleOptions) -> Arc<ControlScenario> {
        Arc::new(
            ControlScenario::new(
                vec![
                    ParameterRecord::new("hk", 10.0, 0.1, 1000.0).with_transform(TransformKind::Log).with_group("k"),
                    ParameterRecord::new("rch", 1.0, 0.5, 1.5).with_group("r").with_scale_offset(2.0, 1.0),
                    ParameterRecord::new("fx", 3.0, 3.0, 3.0).with_transform(TransformKind::Fixed),
                    ParameterRecord::new("vk", 5.0, 0.1, 100.0).with_transform(TransformKind::Tied { parent: "hk".into() }),
                    ParameterRecord::new("sy", 0.2, 0.01, 0.3).with_group("k"),
                ],
                vec![],
                vec![],
                options,
            )
            .unwrap(),
        )
    }

    fn quiet_sink() -> DiagnosticsSink {
        DiagnosticsSink::new(0, std::env::temp_dir())
    }

    #[derive(Default)]
    struct RecordingRuns {
        runs: Vec<HashMap<String, f64>>,
    }

    impl RunManager for RecordingRuns {
        fn add_run(&mut self, parameters: &HashMap<String, f64>) -> Result<usize, ThreadSafeStdError> {
            self.runs.push(parameters.clone());
            Ok(self.runs.len() - 1)
        }

        fn failed_run_ids(&self) -> BTreeSet<usize> {
            BTreeSet::new()
        }

        fn get_run(&self, run_id: usize) -> Result<(HashMap<String, f64>, HashMap<String, f64>), ThreadSafeStdError> {
            Ok((self.runs[run_id].clone(), HashMap::new()))
        }
    }

    #[test]
    fn draw_is_in_num_space_within_bounds() {
        let sc = scenario(EnsembleOptions::default());
        let cov = CovarianceMatrix::from_scenario(&sc, true).unwrap();
        let mut pe = ParameterEnsemble::new(Arc::clone(&sc));
        pe.draw(200, &cov, &mut SamplingContext::new(3), &mut quiet_sink()).unwrap();
        assert_eq!(pe.transform_status(), TransformStatus::Num);
        assert_eq!(pe.var_names(), &sc.adjustable_parameter_names()[..]);
        let hk = pe.reals().column(0);
        assert!(hk.iter().all(|&v| (-1.0..=3.0).contains(&v)));
    }

    #[test]
    fn grouped_draw_keeps_control_order() {
        let options = EnsembleOptions {
            group_draws: true,
            ..Default::default()
        };
        let sc = scenario(options);
        let cov = CovarianceMatrix::from_scenario(&sc, true).unwrap();
        let mut pe = ParameterEnsemble::new(Arc::clone(&sc));
        pe.draw(10, &cov, &mut SamplingContext::new(3), &mut quiet_sink()).unwrap();
        assert_eq!(pe.var_names(), &["HK".to_string(), "RCH".to_string(), "SY".to_string()][..]);
    }

    #[test]
    fn csv_output_restores_fixed_and_tied_values() {
        let sc = scenario(EnsembleOptions::default());
        let cov = CovarianceMatrix::from_scenario(&sc, true).unwrap();
        let mut pe = ParameterEnsemble::new(Arc::clone(&sc));
        pe.draw(4, &cov, &mut SamplingContext::new(11), &mut quiet_sink()).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pe.csv");
        pe.to_csv(&path).unwrap();
        let back = ParameterEnsemble::from_csv(Arc::clone(&sc), &path).unwrap();
        assert_eq!(back.var_names(), &sc.parameter_names()[..]);
        let fx = back.var_index("FX").unwrap();
        assert!(back.reals().column(fx).iter().all(|&v| v == 3.0));
        let (hk, vk) = (back.var_index("HK").unwrap(), back.var_index("VK").unwrap());
        for row in back.reals().rows() {
            assert_approx_eq!(f64, row[vk], row[hk] * 0.5, epsilon = 1e-9);
        }
    }

    #[test]
    fn missing_adjustable_column_is_named() {
        let sc = scenario(EnsembleOptions::default());
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("short.csv");
        std::fs::write(&path, "real_name,hk,sy\n0,10.0,0.2\n").unwrap();
        let err = ParameterEnsemble::from_csv(sc, &path).unwrap_err();
        assert!(err.to_string().contains("RCH"));
    }

    #[test]
    fn ctl_to_num_takes_log_and_drops_fixed() {
        let sc = scenario(EnsembleOptions::default());
        let mut pe = ParameterEnsemble::from_array(
            Arc::clone(&sc),
            vec!["a".into()],
            vec!["hk".into(), "rch".into(), "fx".into(), "sy".into()],
            ndarray::array![[100.0, 1.2, 7.0, 0.1]],
            TransformStatus::Ctl,
        )
        .unwrap();
        pe.transform_ip(TransformStatus::Num).unwrap();
        assert_eq!(pe.var_names(), &["HK".to_string(), "RCH".to_string(), "SY".to_string()][..]);
        assert_approx_eq!(f64, pe.reals()[[0, 0]], 2.0, epsilon = 1e-12);
        assert!(pe.transform_ip(TransformStatus::Model).is_err());

        let (values, fallbacks) = pe.ctl_realization(0).unwrap();
        assert_eq!(fallbacks, 0);
        assert_approx_eq!(f64, values["FX"], 7.0, epsilon = 1e-12);
        assert_approx_eq!(f64, values["HK"], 100.0, epsilon = 1e-9);
    }

    #[test]
    fn add_runs_sends_model_space_values() {
        let sc = scenario(EnsembleOptions::default());
        let pe = ParameterEnsemble::from_array(
            Arc::clone(&sc),
            vec!["a".into(), "b".into()],
            vec!["hk".into(), "rch".into(), "sy".into()],
            ndarray::array![[20.0, 1.0, 0.1], [40.0, 1.5, 0.2]],
            TransformStatus::Ctl,
        )
        .unwrap();
        let mut runs = RecordingRuns::default();
        let ids = pe.add_runs(&mut runs, &[1]).unwrap();
        assert_eq!(ids.get(&1), Some(&0));
        let sent = &runs.runs[0];
        assert_approx_eq!(f64, sent["RCH"], 4.0, epsilon = 1e-12);
        assert_approx_eq!(f64, sent["VK"], 20.0, epsilon = 1e-9);
        assert_approx_eq!(f64, sent["FX"], 3.0, epsilon = 1e-12);
    }

    #[test]
    fn enforce_bounds_requires_num() {
        let sc = scenario(EnsembleOptions::default());
        let mut pe = ParameterEnsemble::from_array(
            sc,
            vec!["a".into()],
            vec!["rch".into()],
            ndarray::array![[9.0]],
            TransformStatus::Ctl,
        )
        .unwrap();
        assert!(pe.enforce_bounds().is_err());
        pe.transform_ip(TransformStatus::Num).unwrap();
        assert_eq!(pe.enforce_bounds().unwrap(), 1);
        assert_approx_eq!(f64, pe.reals()[[0, 0]], 1.5, epsilon = 1e-12);
    }

    #[test]
    fn row_changes_carry_saved_fixed_values() {
        let sc = scenario(EnsembleOptions::default());
        let mut pe = ParameterEnsemble::from_array(
            Arc::clone(&sc),
            vec!["a".into(), "b".into(), "c".into()],
            vec!["hk".into(), "rch".into(), "fx".into(), "sy".into()],
            ndarray::array![[10.0, 1.0, 4.0, 0.2], [20.0, 1.1, 5.0, 0.2], [30.0, 1.2, 6.0, 0.2]],
            TransformStatus::Ctl,
        )
        .unwrap();
        pe.transform_ip(TransformStatus::Num).unwrap();

        pe.set_real_names(vec!["x".into(), "y".into(), "z".into()]).unwrap();
        let (values, fallbacks) = pe.ctl_realization(1).unwrap();
        assert_eq!(fallbacks, 0);
        assert_approx_eq!(f64, values["FX"], 5.0, epsilon = 1e-12);
        assert!(pe.fixed_map.keys().all(|(real, _)| ["X", "Y", "Z", BASE_REAL_NAME].contains(&real.as_str())));

        pe.drop_rows(&["x".to_string()]);
        pe.keep_rows_by_index(&[1]).unwrap();
        assert_eq!(pe.real_names(), &["Z".to_string()][..]);
        let saved: Vec<&str> = pe.fixed_map.keys().map(|(real, _)| real.as_str()).collect();
        assert_eq!(saved.len(), 2);
        assert!(saved.contains(&"Z") && saved.contains(&BASE_REAL_NAME));

        let mut other = ParameterEnsemble::from_array(
            Arc::clone(&sc),
            vec!["w".into()],
            vec!["hk".into(), "rch".into(), "fx".into(), "sy".into()],
            ndarray::array![[40.0, 1.3, 9.0, 0.2]],
            TransformStatus::Ctl,
        )
        .unwrap();
        assert!(pe.append_other_rows(&other).is_err());
        other.transform_ip(TransformStatus::Num).unwrap();
        pe.append_other_rows(&other).unwrap();
        let (values, _) = pe.ctl_realization(1).unwrap();
        assert_approx_eq!(f64, values["FX"], 9.0, epsilon = 1e-12);
    }
}
