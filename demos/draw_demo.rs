use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use uq_ensemble::{
    ControlScenario, CovarianceMatrix, DiagnosticsSink, EnsembleOptions, ObservationEnsemble, ObservationRecord,
    ParameterEnsemble, ParameterRecord, RunManager, SamplingContext, ThreadSafeStdError, TransformKind,
};

/// Evaluates a linear "model" immediately instead of dispatching runs.
#[derive(Default)]
struct LinearModelRuns {
    results: Vec<HashMap<String, f64>>,
    inputs: Vec<HashMap<String, f64>>,
}

impl RunManager for LinearModelRuns {
    fn add_run(&mut self, parameters: &HashMap<String, f64>) -> Result<usize, ThreadSafeStdError> {
        let hk = parameters.get("HK").copied().unwrap_or(0.0);
        let rch = parameters.get("RCH").copied().unwrap_or(0.0);
        let mut obs = HashMap::new();
        obs.insert("H1".to_string(), 10.0 + rch / hk.max(1e-6));
        obs.insert("H2".to_string(), 12.0 + 2.0 * rch / hk.max(1e-6));
        obs.insert("Q1".to_string(), 5.0 * rch);
        self.results.push(obs);
        self.inputs.push(parameters.clone());
        Ok(self.results.len() - 1)
    }

    fn failed_run_ids(&self) -> BTreeSet<usize> {
        self.inputs
            .iter()
            .enumerate()
            .filter(|(_, p)| p.get("HK").copied().unwrap_or(0.0) > 500.0)
            .map(|(i, _)| i)
            .collect()
    }

    fn get_run(&self, run_id: usize) -> Result<(HashMap<String, f64>, HashMap<String, f64>), ThreadSafeStdError> {
        let obs = self.results.get(run_id).ok_or("unknown run id")?;
        Ok((self.inputs[run_id].clone(), obs.clone()))
    }
}

fn main() -> Result<(), ThreadSafeStdError> {
    let options = EnsembleOptions {
        group_draws: true,
        ..Default::default()
    };
    let scenario = Arc::new(ControlScenario::new(
        vec![
            ParameterRecord::new("hk", 10.0, 0.1, 1000.0).with_transform(TransformKind::Log).with_group("k"),
            ParameterRecord::new("rch", 1.0, 0.5, 1.5).with_group("r"),
            ParameterRecord::new("sy", 0.2, 0.01, 0.3).with_group("k"),
            ParameterRecord::new("top", 30.0, 30.0, 30.0).with_transform(TransformKind::Fixed),
        ],
        vec![
            ObservationRecord::new("h1", 10.1, 1.0, "heads"),
            ObservationRecord::new("q1", 5.0, 0.5, "flux"),
            ObservationRecord::new("h2", 12.2, 1.0, "heads"),
        ],
        vec![],
        options,
    )?);

    let out_dir = std::env::temp_dir().join("uq_ensemble_demo");
    std::fs::create_dir_all(&out_dir).map_err(|e| format!("cannot create {:?}: {}", out_dir, e))?;
    let mut ctx = SamplingContext::new(scenario.options.random_seed);
    let mut sink = DiagnosticsSink::new(scenario.options.diagnostics_level, &out_dir);

    let par_cov = CovarianceMatrix::from_scenario(&scenario, true)?;
    let mut pe = ParameterEnsemble::new(Arc::clone(&scenario));
    pe.draw(50, &par_cov, &mut ctx, &mut sink)?;
    pe.to_csv(out_dir.join("par.csv"))?;
    sink.write_report_json(out_dir.join("par_draw.json"))?;

    let obs_cov = CovarianceMatrix::from_scenario(&scenario, false)?;
    let mut noise = ObservationEnsemble::new(Arc::clone(&scenario));
    noise.draw(50, &obs_cov, &mut ctx, &mut sink)?;
    noise.to_csv(out_dir.join("obs_noise.csv"))?;

    let mut runs = LinearModelRuns::default();
    let run_ids: BTreeMap<usize, usize> = pe.add_runs(&mut runs, &[])?;
    let mut simulated = noise.zeros_like();
    let failed = simulated.update_from_runs(&run_ids, &runs)?;
    simulated.drop_rows_by_index(&failed)?;
    simulated.to_csv(out_dir.join("obs_sim.csv"))?;

    let (means, stds) = simulated.get_moment_maps(&[])?;
    println!("{} parameter realizations written to {:?}", pe.shape().0, out_dir);
    println!("{} runs failed", failed.len());
    for (name, mean) in &means {
        println!("{:>6}: mean {:>10.4} std {:>10.4}", name, mean, stds[name]);
    }
    Ok(())
}
