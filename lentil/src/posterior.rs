//! Posterior draw collections with their convergence diagnostics.

use crate::density::constrain;
use crate::joint_model::{JointModel, ModelData, ParamKind, ParamMeta};
use log::warn;
use mcmc_util::diagnostics::{bulk_ess, split_rhat};
use mcmc_util::McmcChain;
use serde::{Deserialize, Serialize};
use std::fmt;

pub const RHAT_THRESHOLD: f64 = 1.05;
pub const MIN_ESS_PER_CHAIN: f64 = 100.0;

/// Non-fatal signs of non-convergence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ConvergenceWarning {
    HighRhat { param: String, rhat: f64 },
    LowEss { param: String, ess: f64, required: f64 },
    /// slice updates that collapsed without an acceptable point
    Divergent { chain: usize, count: usize },
}

impl fmt::Display for ConvergenceWarning {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ConvergenceWarning::HighRhat { param, rhat } => {
                write!(f, "{}: R-hat {:.3} > {}", param, rhat, RHAT_THRESHOLD)
            }
            ConvergenceWarning::LowEss {
                param,
                ess,
                required,
            } => write!(f, "{}: bulk ESS {:.0} < {:.0}", param, ess, required),
            ConvergenceWarning::Divergent { chain, count } => {
                write!(f, "chain {}: {} divergent transitions", chain, count)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParamDiagnostics {
    /// `None` where undefined (too few draws)
    pub rhat: Option<f64>,
    pub ess_bulk: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostics {
    pub per_param: Vec<ParamDiagnostics>,
    pub divergent: Vec<usize>,
    pub warnings: Vec<ConvergenceWarning>,
    pub elapsed_secs: f64,
}

impl Diagnostics {
    ///
    /// Split R-hat and bulk ESS of every parameter across chains.
    ///
    /// * `params` - parameter names for the warnings
    /// * `chains` - `chain x draw x param`
    /// * `divergent` - divergent transitions per chain
    ///
    pub fn compute(
        params: &[ParamMeta],
        chains: &[Vec<Vec<f64>>],
        divergent: Vec<usize>,
        elapsed_secs: f64,
    ) -> Self {
        let finite = |x: f64| x.is_finite().then_some(x);
        let required = MIN_ESS_PER_CHAIN * chains.len() as f64;

        let mut per_param = Vec::with_capacity(params.len());
        let mut warnings = vec![];

        for (j, p) in params.iter().enumerate() {
            let traces: Vec<Vec<f64>> = chains
                .iter()
                .map(|c| c.iter().map(|d| d[j]).collect())
                .collect();
            let rhat = finite(split_rhat(&traces));
            let ess_bulk = finite(bulk_ess(&traces));

            if let Some(r) = rhat.filter(|&r| r > RHAT_THRESHOLD) {
                warnings.push(ConvergenceWarning::HighRhat {
                    param: p.name.clone(),
                    rhat: r,
                });
            }
            if let Some(e) = ess_bulk.filter(|&e| e < required) {
                warnings.push(ConvergenceWarning::LowEss {
                    param: p.name.clone(),
                    ess: e,
                    required,
                });
            }
            per_param.push(ParamDiagnostics { rhat, ess_bulk });
        }

        for (chain, &count) in divergent.iter().enumerate() {
            if count > 0 {
                warnings.push(ConvergenceWarning::Divergent { chain, count });
            }
        }

        Self {
            per_param,
            divergent,
            warnings,
            elapsed_secs,
        }
    }

    pub fn is_converged(&self) -> bool {
        self.warnings.is_empty()
    }

    /// Log one line per warning kind, with the worst offender
    pub fn log_warnings(&self, label: &str) {
        let rhat: Vec<_> = self
            .warnings
            .iter()
            .filter_map(|w| match w {
                ConvergenceWarning::HighRhat { param, rhat } => Some((param, *rhat)),
                _ => None,
            })
            .collect();
        if let Some((param, r)) = rhat.iter().max_by(|a, b| a.1.total_cmp(&b.1)) {
            warn!(
                "[{}] {} parameters with R-hat > {} (worst: {} at {:.3})",
                label,
                rhat.len(),
                RHAT_THRESHOLD,
                param,
                r
            );
        }

        let ess: Vec<_> = self
            .warnings
            .iter()
            .filter_map(|w| match w {
                ConvergenceWarning::LowEss { param, ess, .. } => Some((param, *ess)),
                _ => None,
            })
            .collect();
        if let Some((param, e)) = ess.iter().min_by(|a, b| a.1.total_cmp(&b.1)) {
            warn!(
                "[{}] {} parameters with low bulk ESS (worst: {} at {:.0})",
                label,
                ess.len(),
                param,
                e
            );
        }

        for w in self.warnings.iter() {
            if let ConvergenceWarning::Divergent { .. } = w {
                warn!("[{}] {}", label, w);
            }
        }
    }
}

/// A model together with the data subsets it was fitted on and its draws
#[derive(Debug, Clone, Copy)]
pub struct Fit<'a> {
    pub model: &'a JointModel,
    pub data: &'a ModelData,
    pub draws: &'a DrawCollection,
}

/// Reported-parameter draws of one fit, `chain x draw x param`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DrawCollection {
    pub params: Vec<ParamMeta>,
    pub chains: Vec<Vec<Vec<f64>>>,
    pub diagnostics: Diagnostics,
}

impl DrawCollection {
    /// Constrain sampled unconstrained chains and attach diagnostics
    pub fn from_chains(model: &JointModel, chains: Vec<McmcChain>, elapsed_secs: f64) -> Self {
        let divergent = chains.iter().map(|c| c.n_stalled).collect();
        let chains: Vec<Vec<Vec<f64>>> = chains
            .into_iter()
            .map(|c| {
                c.samples
                    .iter()
                    .map(|theta| constrain(model.layout(), theta))
                    .collect()
            })
            .collect();
        let params = model.params().to_vec();
        let diagnostics = Diagnostics::compute(&params, &chains, divergent, elapsed_secs);
        Self {
            params,
            chains,
            diagnostics,
        }
    }

    pub fn n_chains(&self) -> usize {
        self.chains.len()
    }

    /// Total draws over all chains
    pub fn n_draws(&self) -> usize {
        self.chains.iter().map(|c| c.len()).sum()
    }

    pub fn dim(&self) -> usize {
        self.params.len()
    }

    /// Every draw, chains concatenated in order
    pub fn draws(&self) -> impl Iterator<Item = &[f64]> {
        self.chains.iter().flatten().map(|d| d.as_slice())
    }

    /// Draws of parameter `j`, chains concatenated
    pub fn column(&self, j: usize) -> Vec<f64> {
        self.draws().map(|d| d[j]).collect()
    }

    pub fn index_of(&self, kind: &ParamKind) -> Option<usize> {
        self.params.iter().position(|p| &p.kind == kind)
    }

    pub fn indices_where(&self, pred: impl Fn(&ParamKind) -> bool) -> Vec<usize> {
        self.params
            .iter()
            .enumerate()
            .filter(|(_, p)| pred(&p.kind))
            .map(|(j, _)| j)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::joint_model::Term;
    use crate::response::{Dpar, Response};
    use rand::rngs::SmallRng;
    use rand::{Rng, SeedableRng};

    fn meta(name: &str, line: usize) -> ParamMeta {
        ParamMeta {
            name: name.to_string(),
            kind: ParamKind::GroupEffect {
                term: Term {
                    response: Response::Fecundity,
                    dpar: Dpar::Mu,
                },
                line,
            },
        }
    }

    #[test]
    fn test_diagnostics_flag_stuck_chain() {
        let mut rng = SmallRng::seed_from_u64(3);
        let params = vec![meta("good", 0), meta("stuck", 1)];
        let chains: Vec<Vec<Vec<f64>>> = (0..4)
            .map(|c| {
                (0..500)
                    .map(|_| {
                        let good = rng.random::<f64>();
                        let stuck = if c == 0 { 5.0 } else { 0.0 } + rng.random::<f64>();
                        vec![good, stuck]
                    })
                    .collect()
            })
            .collect();
        let diag = Diagnostics::compute(&params, &chains, vec![0, 2, 0, 0], 1.0);

        assert!(diag.per_param[0].rhat.unwrap() < 1.01);
        assert!(diag.per_param[1].rhat.unwrap() > RHAT_THRESHOLD);
        assert!(diag
            .warnings
            .iter()
            .any(|w| matches!(w, ConvergenceWarning::HighRhat { param, .. } if param == "stuck")));
        assert!(diag
            .warnings
            .contains(&ConvergenceWarning::Divergent { chain: 1, count: 2 }));
        assert!(!diag.is_converged());
        diag.log_warnings("test");
    }

    #[test]
    fn test_too_short_is_undefined_and_serializable() -> anyhow::Result<()> {
        let params = vec![meta("x", 0)];
        let chains = vec![vec![vec![1.0], vec![2.0]]];
        let diag = Diagnostics::compute(&params, &chains, vec![0], 0.0);
        assert_eq!(diag.per_param[0].rhat, None);

        let draws = DrawCollection {
            params,
            chains,
            diagnostics: diag,
        };
        let json = serde_json::to_string(&draws)?;
        let back: DrawCollection = serde_json::from_str(&json)?;
        assert_eq!(back, draws);
        assert_eq!(back.column(0), vec![1.0, 2.0]);
        Ok(())
    }
}
