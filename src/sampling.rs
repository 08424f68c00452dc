// src/sampling.rs

use log::trace;
use ndarray::Array2;
use rand_distr::StandardNormal;
use ndarray_rand::RandomExt;
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Seeded random stream handed to every draw.
///
/// Two contexts built from the same seed produce identical draws. `reset`
/// rewinds to the state right after construction. For parallel callers,
/// [`SamplingContext::fork`] derives an independent stream whose seed depends
/// only on the parent seed and the stream index.
#[derive(Debug, Clone)]
pub struct SamplingContext {
    seed: u64,
    rng: ChaCha8Rng,
}

impl SamplingContext {
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn reset(&mut self) {
        self.rng = ChaCha8Rng::seed_from_u64(self.seed);
    }

    /// Independent stream `stream` of this context's seed.
    pub fn fork(&self, stream: u64) -> SamplingContext {
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        rng.set_stream(stream.wrapping_add(1));
        let seed = rng.next_u64();
        SamplingContext::new(seed)
    }

    /// Fresh seed for a sub-algorithm (e.g. a randomized factorization), advancing the stream.
    pub fn derive_seed(&mut self) -> u64 {
        self.rng.next_u64()
    }

    /// `nrows x ncols` independent standard-normal values.
    pub fn standard_normal_matrix(&mut self, nrows: usize, ncols: usize) -> Array2<f64> {
        trace!("Drawing {}x{} standard normal values (seed {})", nrows, ncols, self.seed);
        Array2::random_using((nrows, ncols), StandardNormal, &mut self.rng)
    }
}

impl Default for SamplingContext {
    fn default() -> Self {
        SamplingContext::new(crate::scenario::EnsembleOptions::default().random_seed)
    }
}
