// src/observation_ensemble.rs

use log::{info, warn};
use ndarray::{Array1, Array2};
use std::collections::BTreeMap;
use std::ops::{Deref, DerefMut};
use std::path::Path;
use std::sync::Arc;

use crate::covariance::CovarianceMatrix;
use crate::diagnostics::DiagnosticsSink;
use crate::draw::RandomDrawEngine;
use crate::ensemble::Ensemble;
use crate::error::{normalize_label, NameLookupError, ThreadSafeStdError};
use crate::sampling::SamplingContext;
use crate::scenario::{missing_names, ControlScenario, RunManager, ValueProvider};

/// Ensemble of observation realizations bound to a control scenario.
#[derive(Debug, Clone)]
pub struct ObservationEnsemble {
    ensemble: Ensemble,
    scenario: Arc<ControlScenario>,
}

impl Deref for ObservationEnsemble {
    type Target = Ensemble;

    fn deref(&self) -> &Ensemble {
        &self.ensemble
    }
}

impl DerefMut for ObservationEnsemble {
    fn deref_mut(&mut self) -> &mut Ensemble {
        &mut self.ensemble
    }
}

impl ObservationEnsemble {
    pub fn new(scenario: Arc<ControlScenario>) -> Self {
        Self {
            ensemble: Ensemble::new(),
            scenario,
        }
    }

    /// Wraps existing values; every observation of the scenario must be a column.
    pub fn from_array(
        scenario: Arc<ControlScenario>,
        real_names: Vec<String>,
        var_names: Vec<String>,
        reals: Array2<f64>,
    ) -> Result<Self, ThreadSafeStdError> {
        let ensemble = Ensemble::from_array(real_names, var_names, reals)?;
        let mut missing = NameLookupError::new("ObservationEnsemble::from_array (observations without a column)");
        missing.missing_cols = missing_names(&scenario.observation_names(), ensemble.var_names());
        missing.into_result()?;
        Ok(Self { ensemble, scenario })
    }

    pub fn scenario(&self) -> &ControlScenario {
        &self.scenario
    }

    pub fn ensemble(&self) -> &Ensemble {
        &self.ensemble
    }

    pub fn into_ensemble(self) -> Ensemble {
        self.ensemble
    }

    pub fn zeros_like(&self) -> ObservationEnsemble {
        Self {
            ensemble: self.ensemble.zeros_like(),
            scenario: Arc::clone(&self.scenario),
        }
    }

    /// Draws noise realizations around the observed values. Every observation
    /// gets a column; only nonzero-weight ones are drawn, the rest stay zero.
    pub fn draw(
        &mut self,
        num_reals: usize,
        covariance: &CovarianceMatrix,
        ctx: &mut SamplingContext,
        sink: &mut DiagnosticsSink,
    ) -> Result<(), ThreadSafeStdError> {
        let scenario = Arc::clone(&self.scenario);
        let center = scenario.observation_values();
        let (draw_names, groups) = if scenario.options.group_draws {
            let groups = scenario.observation_groups();
            let names: Vec<String> = groups.iter().flat_map(|(_, names)| names.iter().cloned()).collect();
            (names, groups)
        } else {
            (scenario.nonzero_weight_observation_names(), Vec::new())
        };
        if draw_names.is_empty() {
            return Err("ObservationEnsemble::draw: no observations with nonzero weight".into());
        }
        let engine = RandomDrawEngine::new(scenario.options.rsvd.clone());
        let mut ensemble = Ensemble::reserve(Vec::new(), scenario.observation_names())?;
        ensemble.draw(num_reals, covariance, &center, &draw_names, &groups, &engine, ctx, sink)?;
        self.ensemble = ensemble;
        Ok(())
    }

    /// Overwrites realization `index` with values from `obs`.
    pub fn update_from_obs(&mut self, index: usize, obs: &dyn ValueProvider) -> Result<(), ThreadSafeStdError> {
        let (nreals, _) = self.ensemble.shape();
        if index >= nreals {
            return Err(format!(
                "ObservationEnsemble::update_from_obs: index {} >= number of realizations {}",
                index, nreals
            )
            .into());
        }
        let row = obs
            .values_for(self.ensemble.var_names())
            .map_err(|e| format!("ObservationEnsemble::update_from_obs: {}", e))?;
        self.ensemble.reals_mut().row_mut(index).assign(&Array1::from(row));
        Ok(())
    }

    pub fn update_from_obs_by_name(&mut self, real_name: &str, obs: &dyn ValueProvider) -> Result<(), ThreadSafeStdError> {
        let name = normalize_label(real_name);
        let index = self
            .ensemble
            .real_names()
            .iter()
            .position(|n| *n == name)
            .ok_or_else(|| format!("ObservationEnsemble::update_from_obs: realization '{}' not found", name))?;
        self.update_from_obs(index, obs)
    }

    /// Copies simulated outputs of completed runs into the mapped realizations.
    /// Returns the realization indices whose runs failed; those rows are left as they were.
    pub fn update_from_runs(
        &mut self,
        real_run_ids: &BTreeMap<usize, usize>,
        run_mgr: &dyn RunManager,
    ) -> Result<Vec<usize>, ThreadSafeStdError> {
        let failed_runs = run_mgr.failed_run_ids();
        let (nreals, _) = self.ensemble.shape();
        let mut failed = Vec::new();
        let mut rows = Vec::with_capacity(real_run_ids.len());
        for (&real_idx, &run_id) in real_run_ids {
            if failed_runs.contains(&run_id) {
                failed.push(real_idx);
                continue;
            }
            if real_idx >= nreals {
                return Err(format!(
                    "ObservationEnsemble::update_from_runs: index {} >= number of realizations {}",
                    real_idx, nreals
                )
                .into());
            }
            let (_, obs) = run_mgr.get_run(run_id)?;
            let row = obs
                .values_for(self.ensemble.var_names())
                .map_err(|e| format!("ObservationEnsemble::update_from_runs: run {}: {}", run_id, e))?;
            rows.push((real_idx, Array1::from(row)));
        }
        // nothing is written until every run has been read
        let mut reals = self.ensemble.reals_mut();
        for (real_idx, row) in rows {
            reals.row_mut(real_idx).assign(&row);
        }
        if !failed.is_empty() {
            warn!("{} of {} runs failed", failed.len(), real_run_ids.len());
        }
        Ok(failed)
    }

    /// Reads observation values; extra columns are ignored, and every
    /// nonzero-weight observation must be present.
    pub fn from_csv<P: AsRef<Path>>(scenario: Arc<ControlScenario>, path: P) -> Result<Self, ThreadSafeStdError> {
        let wanted = scenario.observation_names();
        let required = scenario.nonzero_weight_observation_names();
        let (ensemble, found) = Ensemble::from_csv_columns(path.as_ref(), &wanted, &required)?;
        Self::from_loaded(scenario, ensemble, &found, &wanted)
    }

    /// Reads either binary layout; legacy files hold observations as rows.
    pub fn from_binary<P: AsRef<Path>>(scenario: Arc<ControlScenario>, path: P) -> Result<Self, ThreadSafeStdError> {
        let wanted = scenario.observation_names();
        let required = scenario.nonzero_weight_observation_names();
        let (ensemble, found) = Ensemble::from_binary_columns(path.as_ref(), true, &wanted, &required)?;
        Self::from_loaded(scenario, ensemble, &found, &wanted)
    }

    fn from_loaded(
        scenario: Arc<ControlScenario>,
        ensemble: Ensemble,
        found: &[String],
        wanted: &[String],
    ) -> Result<Self, ThreadSafeStdError> {
        let absent = wanted.len() - found.len();
        if absent > 0 {
            info!("{} zero-weight observations not found in file, left at zero", absent);
        }
        Ok(Self { ensemble, scenario })
    }

    /// Legacy layout, observations as rows.
    pub fn to_binary_legacy<P: AsRef<Path>>(&self, path: P) -> Result<(), ThreadSafeStdError> {
        self.ensemble.to_binary_legacy(path, true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scenario::{EnsembleOptions, ObservationRecord};
    use approx::assert_abs_diff_eq;
    use std::collections::{BTreeSet, HashMap};

    fn scenario(options: EnsembleOptions) -> Arc<ControlScenario> {
        Arc::new(
            ControlScenario::new(
                vec![],
                vec![
                    ObservationRecord::new("h1", 10.0, 1.0, "heads"),
                    ObservationRecord::new("q1", 5.0, 0.5, "flux"),
                    ObservationRecord::new("h2", 12.0, 1.0, "heads"),
                    ObservationRecord::new("zz", 1.0, 0.0, "heads"),
                ],
                vec![],
                options,
            )
            .unwrap(),
        )
    }

    struct FixedRuns {
        outputs: Vec<HashMap<String, f64>>,
        failed: BTreeSet<usize>,
    }

    impl RunManager for FixedRuns {
        fn add_run(&mut self, _parameters: &HashMap<String, f64>) -> Result<usize, ThreadSafeStdError> {
            Err("not used".into())
        }

        fn failed_run_ids(&self) -> BTreeSet<usize> {
            self.failed.clone()
        }

        fn get_run(&self, run_id: usize) -> Result<(HashMap<String, f64>, HashMap<String, f64>), ThreadSafeStdError> {
            let obs = self.outputs.get(run_id).cloned().ok_or("run not available")?;
            Ok((HashMap::new(), obs))
        }
    }

    fn outputs(v: f64) -> HashMap<String, f64> {
        ["H1", "Q1", "H2", "ZZ"].iter().map(|n| (n.to_string(), v)).collect()
    }

    #[test]
    fn zero_weight_observation_is_not_drawn() {
        let sc = scenario(EnsembleOptions::default());
        let cov = CovarianceMatrix::from_scenario(&sc, false).unwrap();
        let mut oe = ObservationEnsemble::new(Arc::clone(&sc));
        oe.draw(500, &cov, &mut SamplingContext::new(5), &mut DiagnosticsSink::new(0, std::env::temp_dir()))
            .unwrap();
        assert_eq!(oe.var_names(), &sc.observation_names()[..]);
        let zz = oe.var_index("ZZ").unwrap();
        assert!(oe.reals().column(zz).iter().all(|&v| v == 0.0));
        let mean = oe.get_mean_vector();
        assert_abs_diff_eq!(mean[0], 10.0, epsilon = 0.2);
        assert_abs_diff_eq!(mean[1], 5.0, epsilon = 0.4);
    }

    #[test]
    fn grouped_draw_accepts_interleaved_groups() {
        let options = EnsembleOptions {
            group_draws: true,
            ..Default::default()
        };
        let sc = scenario(options);
        let cov = CovarianceMatrix::from_scenario(&sc, false).unwrap();
        let mut oe = ObservationEnsemble::new(Arc::clone(&sc));
        oe.draw(5, &cov, &mut SamplingContext::new(5), &mut DiagnosticsSink::new(0, std::env::temp_dir()))
            .unwrap();
        assert_eq!(oe.shape(), (5, 4));
    }

    #[test]
    fn update_from_runs_reports_failures() {
        let sc = scenario(EnsembleOptions::default());
        let names = sc.observation_names();
        let mut oe = ObservationEnsemble::from_array(
            Arc::clone(&sc),
            vec!["a".into(), "b".into()],
            names,
            Array2::zeros((2, 4)),
        )
        .unwrap();
        let runs = FixedRuns {
            outputs: vec![outputs(1.0), outputs(2.0)],
            failed: [1].into_iter().collect(),
        };
        let mapping: BTreeMap<usize, usize> = [(0, 1), (1, 0)].into_iter().collect();
        let failed = oe.update_from_runs(&mapping, &runs).unwrap();
        assert_eq!(failed, vec![0]);
        assert_eq!(oe.get_real_vector(1).unwrap().to_vec(), vec![1.0; 4]);
        assert_eq!(oe.get_real_vector(0).unwrap().to_vec(), vec![0.0; 4]);

        oe.update_from_obs_by_name("A", &outputs(3.0)).unwrap();
        assert_eq!(oe.get_real_vector(0).unwrap().to_vec(), vec![3.0; 4]);
    }

    #[test]
    fn unreadable_run_leaves_every_row_untouched() {
        let sc = scenario(EnsembleOptions::default());
        let values = Array2::from_elem((3, 4), 7.0);
        let mut oe = ObservationEnsemble::from_array(
            Arc::clone(&sc),
            vec!["a".into(), "b".into(), "c".into()],
            sc.observation_names(),
            values.clone(),
        )
        .unwrap();
        let runs = FixedRuns {
            outputs: vec![outputs(1.0)],
            failed: BTreeSet::new(),
        };
        let mapping: BTreeMap<usize, usize> = [(0, 0), (1, 5), (2, 0)].into_iter().collect();
        assert!(oe.update_from_runs(&mapping, &runs).is_err());
        assert_eq!(oe.reals(), &values);

        let mut partial = outputs(2.0);
        partial.remove("Q1");
        let runs = FixedRuns {
            outputs: vec![outputs(1.0), partial],
            failed: BTreeSet::new(),
        };
        let mapping: BTreeMap<usize, usize> = [(0, 0), (1, 1)].into_iter().collect();
        let err = oe.update_from_runs(&mapping, &runs).unwrap_err();
        assert!(err.to_string().contains("Q1"), "{}", err);
        assert_eq!(oe.reals(), &values);
    }

    #[test]
    fn from_array_requires_every_observation() {
        let sc = scenario(EnsembleOptions::default());
        let err = ObservationEnsemble::from_array(sc, vec!["a".into()], vec!["h1".into()], Array2::zeros((1, 1))).unwrap_err();
        assert!(err.to_string().contains("Q1"));
    }

    #[test]
    fn csv_tolerates_missing_zero_weight_columns() {
        let sc = scenario(EnsembleOptions::default());
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("oe.csv");
        std::fs::write(&path, "real_name,h2,q1,h1,extra\n0,1,2,3,4\n").unwrap();
        let oe = ObservationEnsemble::from_csv(Arc::clone(&sc), &path).unwrap();
        assert_eq!(oe.get_real_vector(0).unwrap().to_vec(), vec![3.0, 2.0, 1.0, 0.0]);

        std::fs::write(&path, "real_name,h1\n0,1\n").unwrap();
        assert!(ObservationEnsemble::from_csv(sc, &path).is_err());
    }

    #[test]
    fn legacy_binary_round_trip_is_transposed_on_disk() {
        let sc = scenario(EnsembleOptions::default());
        let oe = ObservationEnsemble::from_array(
            Arc::clone(&sc),
            vec!["r0".into(), "r1".into()],
            sc.observation_names(),
            ndarray::array![[1.0, 2.0, 3.0, 4.0], [5.0, 6.0, 7.0, 8.0]],
        )
        .unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("oe.jcb");
        oe.to_binary_legacy(&path).unwrap();
        let back = ObservationEnsemble::from_binary(sc, &path).unwrap();
        assert_eq!(back.ensemble(), oe.ensemble());
    }
}
