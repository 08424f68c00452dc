// src/draw.rs

//! Covariance-structured Monte-Carlo draws.
//!
//! Independent standard-normal values are correlated either by scaling each
//! column with its standard deviation (diagonal covariance) or by projecting
//! through a randomized eigendecomposition of the covariance. A grouped draw
//! decomposes each index-contiguous block separately and treats the blocks
//! as independent of each other.

use log::{debug, info, warn};
use ndarray::{s, Array1, Array2, ArrayView2, Axis};
use rayon::prelude::*;
use std::collections::{HashMap, HashSet};
use std::time::Instant;

use crate::covariance::CovarianceMatrix;
use crate::diagnostics::{DiagnosticsSink, DrawMethod, DrawReport, GroupDrawDetail};
use crate::error::{normalize_label, NameLookupError, ThreadSafeStdError};
use crate::rsvd::{randomized_eigh, RsvdConfig};
use crate::sampling::SamplingContext;
use crate::scenario::ValueProvider;

/// Inputs of one draw.
pub struct DrawRequest<'a> {
    pub num_reals: usize,
    pub covariance: &'a CovarianceMatrix,
    /// Center added to each drawn variable.
    pub center: &'a dyn ValueProvider,
    /// Columns of the resulting matrix.
    pub var_names: &'a [String],
    /// Subset of `var_names` that is randomized; must all be in the covariance.
    pub draw_names: &'a [String],
    /// Named partition of `draw_names`; empty for an ungrouped draw.
    pub groups: &'a [(String, Vec<String>)],
}

/// Drawn realizations over the requested variable names.
#[derive(Debug, Clone)]
pub struct DrawnRealizations {
    pub real_names: Vec<String>,
    pub var_names: Vec<String>,
    pub reals: Array2<f64>,
}

/// Correlated-draw generator.
#[derive(Debug, Clone, Default)]
pub struct RandomDrawEngine {
    rsvd: RsvdConfig,
}

// Result of factorizing one block, computed off the main thread.
struct BlockProjection {
    start: usize,
    len: usize,
    projected: Array2<f64>,
    detail: GroupDrawDetail,
    eigenvectors: Array2<f64>,
    sqrt_eigenvalues: Array1<f64>,
    projection: Array2<f64>,
}

impl RandomDrawEngine {
    /// Oversampling and power iterations come from `rsvd`; the seed of each
    /// factorization is taken from the sampling context.
    pub fn new(rsvd: RsvdConfig) -> Self {
        Self { rsvd }
    }

    pub fn draw(
        &self,
        request: &DrawRequest<'_>,
        ctx: &mut SamplingContext,
        sink: &mut DiagnosticsSink,
    ) -> Result<DrawnRealizations, ThreadSafeStdError> {
        let started = Instant::now();
        let num_reals = request.num_reals;
        let var_names: Vec<String> = request.var_names.iter().map(|n| normalize_label(n)).collect();
        let draw_names: Vec<String> = request.draw_names.iter().map(|n| normalize_label(n)).collect();
        if draw_names.is_empty() {
            return Err("RandomDrawEngine::draw: no draw names given".into());
        }
        let var_set: HashSet<&str> = var_names.iter().map(String::as_str).collect();
        let mut missing = NameLookupError::new("RandomDrawEngine::draw (draw names not in variable names)");
        missing.missing_cols = draw_names.iter().filter(|n| !var_set.contains(n.as_str())).cloned().collect();
        missing.into_result()?;
        let centers = request.center.values_for(&draw_names)?;

        let aligned;
        let cov = if request.covariance.names() == draw_names.as_slice() {
            request.covariance
        } else {
            sink.log_event("aligning covariance to draw names");
            aligned = request.covariance.get(&draw_names)?;
            &aligned
        };

        sink.log_event(format!("making {}x{} standard normal draws", num_reals, draw_names.len()));
        let mut draws = ctx.standard_normal_matrix(num_reals, draw_names.len());
        sink.dump_array("standard_normal_draws", &draws.view())?;

        let std_devs = cov.variances().mapv(f64::sqrt);
        let mut report = DrawReport {
            num_reals,
            num_draw_vars: draw_names.len(),
            grouped: !request.groups.is_empty(),
            seed: ctx.seed(),
            ..Default::default()
        };

        if cov.is_diagonal() {
            sink.log_event("scaling by std");
            scale_columns(&mut draws, &std_devs);
            report.groups.push(GroupDrawDetail {
                group_name: "ALL".to_string(),
                num_vars: draw_names.len(),
                method: Some(DrawMethod::DiagonalScaling),
                ..Default::default()
            });
        } else {
            let blocks = if request.groups.is_empty() {
                vec![("ALL".to_string(), 0, draw_names.len())]
            } else {
                info!("...drawing by group");
                self.contiguous_blocks(&draw_names, request.groups)?
            };
            self.project_blocks(&mut draws, cov, &draw_names, &std_devs, &blocks, ctx, sink, &mut report)?;
        }

        sink.log_event("checking realization for invalid values");
        let real_names: Vec<String> = (0..num_reals).map(|i| i.to_string()).collect();
        let mut invalid_total = 0usize;
        for (j, col) in draws.axis_iter(Axis(1)).enumerate() {
            let invalid = col.iter().filter(|v| !v.is_finite()).count();
            if invalid > 0 {
                warn!("{} invalid values found for {}", invalid, draw_names[j]);
                invalid_total += invalid;
            }
        }
        if invalid_total > 0 {
            let path = sink.dump_trouble(&real_names, &draw_names, &draws.view())?;
            return Err(format!(
                "invalid values in realization draws - {} written",
                path.display()
            )
            .into());
        }

        sink.log_event("filling reals matrix and adding mean values");
        let draw_index: HashMap<&str, usize> = draw_names.iter().enumerate().map(|(i, n)| (n.as_str(), i)).collect();
        let mut reals = Array2::<f64>::zeros((num_reals, var_names.len()));
        for (j, name) in var_names.iter().enumerate() {
            // Variables outside the draw set stay zero; no center is added.
            if let Some(&d) = draw_index.get(name.as_str()) {
                let center = centers[d];
                reals
                    .column_mut(j)
                    .zip_mut_with(&draws.column(d), |out, &v| *out = v + center);
            }
        }

        report.elapsed_seconds = started.elapsed().as_secs_f64();
        debug!("Draw of {} realizations took {:.3}s", num_reals, report.elapsed_seconds);
        sink.record_report(report);
        Ok(DrawnRealizations {
            real_names,
            var_names,
            reals,
        })
    }

    /// Column ranges of each group within `draw_names`, ordered by position.
    /// Draw names covered by no group become single-name blocks.
    fn contiguous_blocks(
        &self,
        draw_names: &[String],
        groups: &[(String, Vec<String>)],
    ) -> Result<Vec<(String, usize, usize)>, ThreadSafeStdError> {
        let index: HashMap<&str, usize> = draw_names.iter().enumerate().map(|(i, n)| (n.as_str(), i)).collect();
        let mut covered = vec![false; draw_names.len()];
        let mut blocks = Vec::with_capacity(groups.len());
        for (group, members) in groups {
            if members.is_empty() {
                return Err(format!("RandomDrawEngine::draw: no elements found for group {}", group).into());
            }
            let mut missing = NameLookupError::new(format!("RandomDrawEngine::draw group {}", group));
            let mut idx = Vec::with_capacity(members.len());
            for name in members {
                match index.get(normalize_label(name).as_str()) {
                    Some(&i) => idx.push(i),
                    None => missing.missing_cols.push(normalize_label(name)),
                }
            }
            missing.into_result()?;
            let first = idx[0];
            let contiguous = idx.iter().enumerate().all(|(k, &i)| i == first + k);
            if !contiguous {
                return Err(format!(
                    "RandomDrawEngine::draw: group {} is out of order, its names must occupy a contiguous range of the draw names",
                    group
                )
                .into());
            }
            for &i in &idx {
                if covered[i] {
                    return Err(format!("RandomDrawEngine::draw: {} appears in more than one group", draw_names[i]).into());
                }
                covered[i] = true;
            }
            blocks.push((group.clone(), first, idx.len()));
        }
        for (i, done) in covered.iter().enumerate() {
            if !done {
                warn!("{} is not in any draw group, drawing it independently", draw_names[i]);
                blocks.push((draw_names[i].clone(), i, 1));
            }
        }
        blocks.sort_by_key(|&(_, start, _)| start);
        Ok(blocks)
    }

    #[allow(clippy::too_many_arguments)]
    fn project_blocks(
        &self,
        draws: &mut Array2<f64>,
        cov: &CovarianceMatrix,
        draw_names: &[String],
        std_devs: &Array1<f64>,
        blocks: &[(String, usize, usize)],
        ctx: &mut SamplingContext,
        sink: &mut DiagnosticsSink,
        report: &mut DrawReport,
    ) -> Result<(), ThreadSafeStdError> {
        let mut factorized = Vec::new();
        let mut details: Vec<(usize, GroupDrawDetail)> = Vec::with_capacity(blocks.len());
        for (name, start, len) in blocks {
            sink.log_event(format!("...processing {} with {} elements", name, len));
            if *len == 1 {
                sink.log_event(format!("only one element in group {}, scaling by std", name));
                let mut col = draws.column_mut(*start);
                col *= std_devs[*start];
                details.push((
                    *start,
                    GroupDrawDetail {
                        group_name: name.clone(),
                        num_vars: 1,
                        method: Some(DrawMethod::DiagonalScaling),
                        ..Default::default()
                    },
                ));
            } else {
                let config = RsvdConfig {
                    seed: ctx.derive_seed(),
                    ..self.rsvd.clone()
                };
                factorized.push((name.clone(), *start, *len, config));
            }
        }

        let source = draws.view();
        let projections: Vec<BlockProjection> = factorized
            .par_iter()
            .map(|(name, start, len, config)| {
                let names = &draw_names[*start..*start + *len];
                let block_cov = if names.len() == cov.nrows() {
                    cov.to_dense()
                } else {
                    cov.get(names)?.to_dense()
                };
                project_block(name, *start, &block_cov, &source.slice(s![.., *start..*start + *len]), config)
            })
            .collect::<Result<Vec<_>, ThreadSafeStdError>>()?;

        for block in projections {
            if sink.level() > 2 {
                let names = &draw_names[block.start..block.start + block.len];
                sink.dump_matrix(&format!("{}_cov", block.detail.group_name), cov.get(names)?.as_named_matrix())?;
                sink.dump_array(&format!("{}_evec", block.detail.group_name), &block.eigenvectors.view())?;
                let sqrt_evals = block.sqrt_eigenvalues.view().insert_axis(Axis(1));
                sink.dump_array(&format!("{}_sqrt_evals", block.detail.group_name), &sqrt_evals)?;
                sink.dump_array(&format!("{}_proj", block.detail.group_name), &block.projection.view())?;
            }
            if block.detail.clamped_eigenvalues > 0 {
                warn!(
                    "{} negative eigenvalues clamped to zero in group {}",
                    block.detail.clamped_eigenvalues, block.detail.group_name
                );
            }
            sink.log_event(format!("projecting group block {}", block.detail.group_name));
            draws
                .slice_mut(s![.., block.start..block.start + block.len])
                .assign(&block.projected);
            details.push((block.start, block.detail));
        }
        // report groups in draw-name order
        details.sort_by_key(|(start, _)| *start);
        report.groups.extend(details.into_iter().map(|(_, detail)| detail));
        Ok(())
    }
}

fn scale_columns(draws: &mut Array2<f64>, std_devs: &Array1<f64>) {
    for (mut col, &sd) in draws.axis_iter_mut(Axis(1)).zip(std_devs.iter()) {
        col *= sd;
    }
}

// Factorizes `cov / fac` at full rank and maps the block through
// eigvecs * diag(sqrt(fac * eigvals)).
fn project_block(
    name: &str,
    start: usize,
    cov: &Array2<f64>,
    block: &ArrayView2<f64>,
    config: &RsvdConfig,
) -> Result<BlockProjection, ThreadSafeStdError> {
    let len = cov.nrows();
    let fac = cov.diag().iter().copied().fold(f64::INFINITY, f64::min);
    if !fac.is_finite() || fac <= 0.0 {
        return Err(format!("RandomDrawEngine::draw: minimum variance {} of group {} is not positive", fac, name).into());
    }
    debug!("min variance for group {}: {}", name, fac);
    let scaled = cov.mapv(|v| v / fac);
    let eig = randomized_eigh(&scaled.view(), len, config)
        .map_err(|e| format!("randomized eigendecomposition of group {} failed: {}", name, e))?;

    let clamped = eig.eigenvalues.iter().filter(|&&v| v < 0.0).count();
    let sqrt_eigenvalues = eig.eigenvalues.mapv(|v| (fac * v.max(0.0)).sqrt());
    let projection = &eig.eigenvectors * &sqrt_eigenvalues;
    // (proj * blockᵀ)ᵀ
    let projected = block.dot(&projection.t());

    let detail = GroupDrawDetail {
        group_name: name.to_string(),
        num_vars: len,
        method: Some(DrawMethod::EigenProjection),
        scale_factor: Some(fac),
        largest_eigenvalue: eig.eigenvalues.iter().next().map(|v| v * fac),
        smallest_eigenvalue: eig.eigenvalues.iter().last().map(|v| v * fac),
        clamped_eigenvalues: clamped,
    };
    Ok(BlockProjection {
        start,
        len,
        projected,
        detail,
        eigenvectors: eig.eigenvectors,
        sqrt_eigenvalues,
        projection,
    })
}
