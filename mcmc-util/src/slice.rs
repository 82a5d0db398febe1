use indicatif::ProgressBar;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;

use crate::chain::McmcChain;
use crate::traits::LogDensity;

const MAX_SHRINK: usize = 200;

fn eval_at(target: &impl LogDensity, x: &mut [f64], j: usize, v: f64) -> f64 {
    x[j] = v;
    let lp = target.log_density_along(x, j);
    if lp.is_nan() {
        f64::NEG_INFINITY
    } else {
        lp
    }
}

/// One univariate slice update of coordinate `j` (Neal 2003, stepping
/// out then shrinkage). Returns `(new_x_j, new_lnpdf, stalled)`.
///
/// - `x`: current point; only `x[j]` is touched, and restored on return
///   unless the proposal is accepted
/// - `cur_lnpdf`: cached `log_density_along(x, j)`
/// - `width`: initial bracket width
/// - `max_steps`: cap on stepping-out expansions
pub fn slice_step(
    target: &impl LogDensity,
    x: &mut [f64],
    j: usize,
    cur_lnpdf: f64,
    width: f64,
    max_steps: usize,
    rng: &mut impl Rng,
) -> (f64, f64, bool) {
    let x0 = x[j];

    // 1. slice height, uniform below the current density
    let u: f64 = rng.random();
    let hh = cur_lnpdf + (1.0 - u).ln();

    // 2. randomly positioned bracket, stepped out
    let mut left = x0 - width * rng.random::<f64>();
    let mut right = left + width;
    let mut steps_left = rng.random_range(0..max_steps.max(1));
    let mut steps_right = max_steps.max(1) - 1 - steps_left;

    while steps_left > 0 && eval_at(target, x, j, left) > hh {
        left -= width;
        steps_left -= 1;
    }
    while steps_right > 0 && eval_at(target, x, j, right) > hh {
        right += width;
        steps_right -= 1;
    }

    // 3. shrink towards x0 until a point on the slice is found
    for _ in 0..MAX_SHRINK {
        let proposal = left + (right - left) * rng.random::<f64>();
        let lp = eval_at(target, x, j, proposal);
        if lp > hh {
            return (proposal, lp, false);
        }
        if proposal < x0 {
            left = proposal;
        } else {
            right = proposal;
        }
    }

    x[j] = x0;
    (x0, cur_lnpdf, true)
}

/// Coordinate-wise slice sampler configuration.
pub struct SliceSampler {
    pub n_samples: usize,
    pub warmup: usize,
    pub thin: usize,
    pub seed: u64,
    pub max_steps: usize,
}

impl SliceSampler {
    pub fn new(n_samples: usize, warmup: usize) -> Self {
        Self {
            n_samples,
            warmup,
            thin: 1,
            seed: 42,
            max_steps: 32,
        }
    }

    /// Run a single chain.
    ///
    /// During warmup each coordinate's bracket width tracks twice the
    /// running mean of its absolute moves; widths are frozen afterwards.
    ///
    /// - `target`: log posterior density
    /// - `init`: initial parameter value
    /// - `progress`: optional bar ticked once per iteration
    pub fn run(
        &self,
        target: &impl LogDensity,
        init: &[f64],
        progress: Option<&ProgressBar>,
    ) -> McmcChain {
        let d = target.dim();
        assert_eq!(init.len(), d, "init has the wrong dimension");

        let total = self.warmup + self.n_samples * self.thin;
        let mut rng = SmallRng::seed_from_u64(self.seed);

        let mut current = init.to_vec();
        let mut widths = vec![1.0f64; d];
        let mut mean_moves = vec![0.0f64; d];

        let mut samples = Vec::with_capacity(self.n_samples);
        let mut log_densities = Vec::with_capacity(self.n_samples);
        let mut n_stalled = 0;

        for i in 0..total {
            let warming = i < self.warmup;
            for j in 0..d {
                let x0 = current[j];
                let cur = target.log_density_along(&current, j);
                let (xj, _, stalled) = slice_step(
                    target,
                    &mut current,
                    j,
                    cur,
                    widths[j],
                    self.max_steps,
                    &mut rng,
                );
                current[j] = xj;

                if stalled && !warming {
                    n_stalled += 1;
                }

                if warming {
                    let t = (i + 1) as f64;
                    mean_moves[j] += ((xj - x0).abs() - mean_moves[j]) / t;
                    if i >= 10 {
                        widths[j] = (2.0 * mean_moves[j]).clamp(1e-3, 10.0);
                    }
                }
            }

            if i >= self.warmup && (i - self.warmup) % self.thin == 0 {
                log_densities.push(target.log_density(&current));
                samples.push(current.clone());
            }

            if let Some(pb) = progress {
                pb.inc(1);
            }
        }

        McmcChain {
            samples,
            log_densities,
            n_stalled,
        }
    }

    /// Run multiple independent chains in parallel via rayon.
    /// Each chain gets `seed + chain_idx` for reproducibility.
    ///
    /// - `init`: draws a starting point for a chain from its own rng
    pub fn run_parallel(
        &self,
        n_chains: usize,
        target: &impl LogDensity,
        init: &(impl Fn(&mut SmallRng) -> Vec<f64> + Sync),
        progress: Option<&ProgressBar>,
    ) -> Vec<McmcChain> {
        (0..n_chains)
            .into_par_iter()
            .map(|c| {
                let sampler = SliceSampler {
                    n_samples: self.n_samples,
                    warmup: self.warmup,
                    thin: self.thin,
                    seed: self.seed.wrapping_add(c as u64),
                    max_steps: self.max_steps,
                };
                let mut init_rng = SmallRng::seed_from_u64(sampler.seed ^ 0x9e37_79b9_7f4a_7c15);
                let x0 = init(&mut init_rng);
                sampler.run(target, &x0, progress)
            })
            .collect()
    }
}
