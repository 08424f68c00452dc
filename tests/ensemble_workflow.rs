// In tests/ensemble_workflow.rs

use ndarray::array;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use uq_ensemble::{
    ControlScenario, CovarianceMatrix, DiagnosticsSink, Ensemble, EnsembleOptions, ObservationEnsemble,
    ObservationRecord, ParameterEnsemble, ParameterRecord, ParameterTransforms, RunManager, SamplingContext,
    ThreadSafeStdError, TransformKind, TransformStatus,
};

/// Runs a trivial model synchronously; runs whose HK exceeds `fail_above` are marked failed.
struct InMemoryRunManager {
    fail_above: f64,
    params: Vec<HashMap<String, f64>>,
}

impl InMemoryRunManager {
    fn new(fail_above: f64) -> Self {
        Self {
            fail_above,
            params: Vec::new(),
        }
    }
}

impl RunManager for InMemoryRunManager {
    fn add_run(&mut self, parameters: &HashMap<String, f64>) -> Result<usize, ThreadSafeStdError> {
        self.params.push(parameters.clone());
        Ok(self.params.len() - 1)
    }

    fn failed_run_ids(&self) -> BTreeSet<usize> {
        self.params
            .iter()
            .enumerate()
            .filter(|(_, p)| p["HK"] > self.fail_above)
            .map(|(i, _)| i)
            .collect()
    }

    fn get_run(&self, run_id: usize) -> Result<(HashMap<String, f64>, HashMap<String, f64>), ThreadSafeStdError> {
        let p = self.params.get(run_id).ok_or("unknown run")?;
        let mut obs = HashMap::new();
        obs.insert("H1".to_string(), p["HK"] + p["RCH"]);
        obs.insert("H2".to_string(), 2.0 * p["RCH"]);
        obs.insert("ZW".to_string(), 0.0);
        Ok((p.clone(), obs))
    }
}

fn scenario(options: EnsembleOptions) -> Arc<ControlScenario> {
    Arc::new(
        ControlScenario::new(
            vec![
                ParameterRecord::new("hk", 10.0, 1.0, 100.0).with_transform(TransformKind::Log).with_group("k"),
                ParameterRecord::new("rch", 1.0, 0.5, 1.5).with_group("r"),
                ParameterRecord::new("top", 30.0, 30.0, 30.0).with_transform(TransformKind::Fixed),
            ],
            vec![
                ObservationRecord::new("h1", 11.0, 2.0, "heads"),
                ObservationRecord::new("h2", 2.0, 1.0, "heads"),
                ObservationRecord::new("zw", 0.0, 0.0, "heads"),
            ],
            vec![],
            options,
        )
        .unwrap(),
    )
}

fn quiet_sink() -> DiagnosticsSink {
    DiagnosticsSink::new(0, std::env::temp_dir())
}

#[test]
fn parameter_csv_missing_adjustable_column_fails_naming_it() {
    let sc = scenario(EnsembleOptions::default());
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("par.csv");
    std::fs::write(&path, "real_name,hk,top\n0,10.0,30.0\n1,20.0,30.0\n").unwrap();
    let err = ParameterEnsemble::from_csv(sc, &path).unwrap_err();
    assert!(err.to_string().contains("RCH"), "error was: {}", err);
}

#[test]
fn duplicate_append_does_not_mutate() {
    let mut en = Ensemble::from_array(
        vec!["base".into(), "r1".into()],
        vec!["a".into(), "b".into()],
        array![[1.0, 2.0], [3.0, 4.0]],
    )
    .unwrap();
    let snapshot = en.clone();
    let values: HashMap<String, f64> = [("A".to_string(), 9.0), ("B".to_string(), 9.0)].into_iter().collect();
    assert!(en.append("BASE", &values).is_err());
    assert_eq!(en, snapshot);

    en.append("r2", &values).unwrap();
    assert_eq!(en.get_real_vector_by_name("r2").unwrap(), array![9.0, 9.0]);
}

#[test]
fn ctl_to_num_then_bounds_are_respected() {
    let sc = scenario(EnsembleOptions::default());
    let mut pe = ParameterEnsemble::from_array(
        Arc::clone(&sc),
        vec!["a".into(), "b".into(), "c".into()],
        vec!["hk".into(), "rch".into(), "top".into()],
        array![[0.5, 1.0, 30.0], [50.0, 2.0, 30.0], [500.0, 0.1, 30.0]],
        TransformStatus::Ctl,
    )
    .unwrap();
    pe.transform_ip(TransformStatus::Num).unwrap();
    pe.enforce_bounds().unwrap();

    let transforms = ParameterTransforms::new(&sc);
    for (j, name) in pe.var_names().iter().enumerate() {
        let (lb, ub) = transforms.num_bounds(name).unwrap();
        for &v in pe.reals().column(j) {
            assert!(v >= lb && v <= ub, "{} = {} outside [{}, {}]", name, v, lb, ub);
        }
    }
}

#[test]
fn draw_run_and_collect_results() {
    let sc = scenario(EnsembleOptions {
        group_draws: true,
        ..Default::default()
    });
    let mut ctx = SamplingContext::new(77);
    let mut sink = quiet_sink();

    let par_cov = CovarianceMatrix::from_scenario(&sc, true).unwrap();
    let mut pe = ParameterEnsemble::new(Arc::clone(&sc));
    pe.draw(40, &par_cov, &mut ctx, &mut sink).unwrap();
    assert_eq!(pe.shape(), (40, 2));

    let mut runs = InMemoryRunManager::new(30.0);
    let run_ids: BTreeMap<usize, usize> = pe.add_runs(&mut runs, &[]).unwrap();
    assert_eq!(run_ids.len(), 40);
    assert!(runs.params.iter().all(|p| p["TOP"] == 30.0));

    let obs_cov = CovarianceMatrix::from_scenario(&sc, false).unwrap();
    let mut oe = ObservationEnsemble::new(Arc::clone(&sc));
    oe.draw(40, &obs_cov, &mut ctx, &mut sink).unwrap();
    let noise = oe.clone();

    let failed = oe.update_from_runs(&run_ids, &runs).unwrap();
    let expected_failed: Vec<usize> = runs.failed_run_ids().into_iter().collect();
    assert_eq!(failed, expected_failed);
    for (idx, _) in run_ids.iter().filter(|(i, _)| !failed.contains(i)) {
        let hk = runs.params[*idx]["HK"];
        let rch = runs.params[*idx]["RCH"];
        let row = oe.get_real_vector(*idx).unwrap();
        assert!((row[0] - (hk + rch)).abs() < 1e-9);
    }
    for &idx in &failed {
        assert_eq!(oe.get_real_vector(idx).unwrap(), noise.get_real_vector(idx).unwrap());
    }
}

#[test]
fn same_seed_gives_same_parameter_ensemble() {
    let sc = scenario(EnsembleOptions::default());
    let cov = CovarianceMatrix::from_scenario(&sc, true).unwrap();
    let mut first = ParameterEnsemble::new(Arc::clone(&sc));
    let mut second = ParameterEnsemble::new(Arc::clone(&sc));
    let mut ctx = SamplingContext::new(5);
    first.draw(25, &cov, &mut ctx, &mut quiet_sink()).unwrap();
    ctx.reset();
    second.draw(25, &cov, &mut ctx, &mut quiet_sink()).unwrap();
    assert_eq!(first.ensemble(), second.ensemble());
}

#[test]
fn binary_files_carry_fixed_parameters() {
    let sc = scenario(EnsembleOptions::default());
    let cov = CovarianceMatrix::from_scenario(&sc, true).unwrap();
    let mut pe = ParameterEnsemble::new(Arc::clone(&sc));
    pe.draw(8, &cov, &mut SamplingContext::new(9), &mut quiet_sink()).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("par.jcb");
    pe.to_binary(&path).unwrap();
    let back = ParameterEnsemble::from_binary(Arc::clone(&sc), &path).unwrap();
    assert_eq!(back.transform_status(), TransformStatus::Ctl);
    assert_eq!(back.var_names(), &sc.parameter_names()[..]);
    let top = back.var_index("TOP").unwrap();
    assert!(back.reals().column(top).iter().all(|&v| v == 30.0));

    let hk_num = pe.reals().column(0).to_owned();
    let hk_ctl = back.reals().column(0).to_owned();
    for (num, ctl) in hk_num.iter().zip(hk_ctl.iter()) {
        assert!((10f64.powf(*num) - ctl).abs() < 1e-9 * ctl.abs().max(1.0));
    }
}

#[test]
fn empirical_diagonal_covariance_is_in_num_space() {
    let sc = scenario(EnsembleOptions::default());
    let mut pe = ParameterEnsemble::from_array(
        Arc::clone(&sc),
        vec!["a".into(), "b".into()],
        vec!["hk".into(), "rch".into()],
        array![[1.0, 0.5], [100.0, 1.5]],
        TransformStatus::Ctl,
    )
    .unwrap();
    let cov = pe.get_diagonal_cov_matrix().unwrap();
    assert_eq!(pe.transform_status(), TransformStatus::Num);
    let variances = cov.variances();
    assert!((variances[0] - 1.0).abs() < 1e-12);
    assert!((variances[1] - 0.25).abs() < 1e-12);
}
