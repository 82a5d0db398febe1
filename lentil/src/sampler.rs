//! The sampler boundary and the in-house coordinate-wise slice sampler.

use crate::density::{supports, JointDensity};
use crate::error::LentilError;
use crate::joint_model::{JointModel, ModelData};
use crate::posterior::DrawCollection;
use crate::prior::Prior;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use log::info;
use mcmc_util::SliceSampler;
use rand::rngs::SmallRng;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Sampling budget; part of a fit's identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SamplerConfig {
    pub warmup: usize,
    /// per chain, including warmup
    pub iterations: usize,
    pub chains: usize,
    pub seed: u64,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            warmup: 1000,
            iterations: 2000,
            chains: 4,
            seed: 42,
        }
    }
}

impl SamplerConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.chains == 0 {
            anyhow::bail!("need at least one chain");
        }
        if self.iterations <= self.warmup {
            anyhow::bail!(
                "iterations ({}) must exceed warmup ({})",
                self.iterations,
                self.warmup
            );
        }
        Ok(())
    }

    /// Retained draws per chain
    pub fn draws_per_chain(&self) -> usize {
        self.iterations.saturating_sub(self.warmup)
    }
}

/// Anything that turns an assembled model and its data into posterior
/// draws.
pub trait PosteriorSampler: Sync {
    fn sample(
        &self,
        model: &JointModel,
        data: &ModelData,
        config: &SamplerConfig,
    ) -> anyhow::Result<DrawCollection>;
}

/// Coordinate-wise slice sampling of the unconstrained posterior,
/// chains in parallel
pub struct SliceGibbsSampler {
    pub show_progress: bool,
    pub max_steps: usize,
}

impl Default for SliceGibbsSampler {
    fn default() -> Self {
        Self {
            show_progress: false,
            max_steps: 32,
        }
    }
}

/// Jittered starting point: population terms near their prior means,
/// scales near 0.5, correlations near 0, standardized line effects near 0
pub fn initial_point(model: &JointModel, rng: &mut SmallRng) -> Vec<f64> {
    let layout = model.layout();
    let priors = model.resolved_priors();
    let mut x = vec![0.0; layout.dim];
    let mut jitter = |scale: f64| scale * (2.0 * rng.random::<f64>() - 1.0);

    for t in 0..layout.n_terms() {
        let center = match priors.population[t] {
            Prior::Normal { mean, .. } => mean,
            _ => 0.0,
        };
        for w in 0..layout.population_width(t) {
            x[layout.beta_offset[t] + w] = center + jitter(0.2);
        }
    }
    for v in x[layout.aux_offset..layout.cor_offset].iter_mut() {
        *v = (0.5f64).ln() + jitter(0.2);
    }
    for v in x[layout.cor_offset..].iter_mut() {
        *v = jitter(0.2);
    }
    x
}

impl PosteriorSampler for SliceGibbsSampler {
    fn sample(
        &self,
        model: &JointModel,
        data: &ModelData,
        config: &SamplerConfig,
    ) -> anyhow::Result<DrawCollection> {
        config.validate()?;
        if !supports(model) {
            return Err(LentilError::Specification(
                "a response family lacks its auxiliary parameter".into(),
            )
            .into());
        }

        let density = JointDensity::new(model, data);
        let sampler = SliceSampler {
            n_samples: config.draws_per_chain(),
            warmup: config.warmup,
            thin: 1,
            seed: config.seed,
            max_steps: self.max_steps,
        };

        let pb = ProgressBar::new((config.chains * config.iterations) as u64);
        if self.show_progress {
            pb.set_style(
                ProgressStyle::with_template("{elapsed_precise} [{bar:40}] {pos}/{len} {msg}")?,
            );
            pb.set_message(model.variant().to_string());
        } else {
            pb.set_draw_target(ProgressDrawTarget::hidden());
        }

        info!(
            "[{}] sampling {} chains x {} iterations ({} warmup), {} parameters",
            model.variant(),
            config.chains,
            config.iterations,
            config.warmup,
            model.layout().dim
        );

        let timer = Instant::now();
        let init = |rng: &mut SmallRng| initial_point(model, rng);
        let chains = sampler.run_parallel(config.chains, &density, &init, Some(&pb));
        pb.finish_and_clear();
        let elapsed = timer.elapsed().as_secs_f64();

        info!("[{}] sampling took {:.1}s", model.variant(), elapsed);
        for (c, chain) in chains.iter().enumerate() {
            info!(
                "[{}] chain {}: mean log density {:.2}, {} stalled updates",
                model.variant(),
                c,
                chain.mean_log_density(),
                chain.n_stalled
            );
        }

        let draws = DrawCollection::from_chains(model, chains, elapsed);
        draws.diagnostics.log_warnings(model.variant().label());
        Ok(draws)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::joint_model::{ParamKind, Variant};
    use crate::response::Response;
    use crate::simulate::{simulate_table, SimulationConfig};
    use rand::SeedableRng;

    #[test]
    fn test_config_validation() {
        assert!(SamplerConfig::default().validate().is_ok());
        let bad = SamplerConfig {
            warmup: 100,
            iterations: 100,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
        assert_eq!(SamplerConfig::default().draws_per_chain(), 1000);
    }

    #[test]
    fn test_initial_point_near_prior_means() -> anyhow::Result<()> {
        let table = simulate_table(&SimulationConfig::new(2, 2, 3))?;
        let model = JointModel::build(Variant::SpeciesPartitioned, &table)?;
        let mut rng = SmallRng::seed_from_u64(1);
        let x = initial_point(&model, &mut rng);
        let median = table.median_lowbound().unwrap();
        let dev = model.params_where(|k| {
            matches!(k, ParamKind::Population { term, .. } if term.response == Response::Development)
        });
        assert_eq!(dev.len(), 2);
        for j in dev {
            assert!((x[j] - median.ln()).abs() <= 0.2);
        }
        Ok(())
    }

    #[test]
    fn test_short_run_shapes() -> anyhow::Result<()> {
        let table = simulate_table(&SimulationConfig::new(2, 2, 3))?;
        let model = JointModel::build(Variant::Pooled, &table)?;
        let data = model.subset(&table)?;
        let config = SamplerConfig {
            warmup: 20,
            iterations: 50,
            chains: 2,
            seed: 11,
        };
        let draws = SliceGibbsSampler::default().sample(&model, &data, &config)?;
        assert_eq!(draws.n_chains(), 2);
        assert_eq!(draws.n_draws(), 60);
        assert_eq!(draws.dim(), model.layout().dim);
        for d in draws.draws() {
            assert!(d.iter().all(|v| v.is_finite()));
        }

        let again = SliceGibbsSampler::default().sample(&model, &data, &config)?;
        assert_eq!(again.chains, draws.chains);
        Ok(())
    }
}
