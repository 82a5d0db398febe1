//! Posterior predictive check of the fecundity zero frequency: the
//! fitted zero-inflated model against a separately fitted plain
//! negative binomial.
//!
//! A plain negative binomial that matches the range of egg counts but
//! under-predicts how often zero eggs are laid is what motivates the
//! zero-inflated family.

use crate::error::{LentilError, Result};
use crate::joint_model::{JointModel, Outcome, ParamKind, Term, Variant};
use crate::observation::ObservationTable;
use crate::posterior::Fit;
use crate::prior::{EmpiricalScale, PriorClass, PriorSet};
use crate::response::{inv_logit, Auxiliary, Dpar, Response, ResponseSpec};
use crate::simulate::negative_binomial;
use mcmc_util::interval::mean_hdi;
use mcmc_util::PointInterval;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZeroFractionCheck {
    pub observed: f64,
    /// replicated zero fraction under the fitted model
    pub zero_inflated: PointInterval,
    /// replicated zero fraction under the plain negative binomial
    pub count_only: PointInterval,
    /// `P(replicated >= observed)` under each
    pub p_zero_inflated: f64,
    pub p_count_only: f64,
    pub n_replicates: usize,
}

///
/// Fecundity alone, without the zero-inflation predictor: the same
/// population structure and line intercept as `variant`, with the
/// default priors restricted to what this model has.
///
pub fn count_only_model(variant: Variant, table: &ObservationTable) -> Result<JointModel> {
    let scale = EmpiricalScale::from_table(table)?;
    let full = PriorSet::weakly_informative(&scale, variant.population())?;
    let entries = full
        .entries()
        .iter()
        .filter(|e| {
            e.class != PriorClass::Cor
                && e.dpar != Some(Dpar::Zi)
                && e.response.map_or(true, |r| r == Response::Fecundity)
        })
        .cloned()
        .collect();

    let mut spec = ResponseSpec::fecundity();
    spec.predictors.retain(|p| p.dpar == Dpar::Mu);

    JointModel::assemble(
        vec![spec],
        PriorSet::new(entries),
        variant.partitions_by_species(),
        table,
    )
}

fn fecundity_counts(fit: &Fit) -> Result<Vec<u64>> {
    let slot = fit
        .model
        .response_slot(Response::Fecundity)
        .ok_or_else(|| LentilError::Specification("model has no fecundity response".into()))?;
    Ok(fit.data.rows[slot]
        .outcomes
        .iter()
        .filter_map(|o| match o {
            Outcome::Count(y) => Some(*y),
            _ => None,
        })
        .collect())
}

/// Zero fraction of replicated fecundity data, one per used draw. The
/// retention probability enters only if the model predicts it.
fn replicate_zero_fractions(fit: &Fit, n_replicates: usize, seed: u64) -> Result<Vec<f64>> {
    let model = fit.model;
    let layout = model.layout();
    let spec_error = |m: &str| LentilError::Specification(m.into());

    let slot = model
        .response_slot(Response::Fecundity)
        .ok_or_else(|| spec_error("model has no fecundity response"))?;
    let rows = &fit.data.rows[slot];
    let term_of = |dpar| {
        model.term_index(Term {
            response: Response::Fecundity,
            dpar,
        })
    };
    let t_mu = term_of(Dpar::Mu).ok_or_else(|| spec_error("missing fecundity predictor"))?;
    let t_zi = term_of(Dpar::Zi);
    let invshape = model
        .param_index(&ParamKind::Auxiliary {
            response: Response::Fecundity,
            aux: Auxiliary::InvShape,
        })
        .ok_or_else(|| spec_error("model has no fecundity invshape"))?;

    let total = fit.draws.n_draws();
    let n_used = n_replicates.clamp(1, total.max(1));
    let step = (total / n_used).max(1);
    let n = rows.len() as f64;
    let mut rng = SmallRng::seed_from_u64(seed);

    let mut fractions = Vec::with_capacity(n_used);
    for d in fit.draws.draws().step_by(step).take(n_used) {
        let mut zeros = 0usize;
        for i in 0..rows.len() {
            let (s, l) = (rows.species[i], rows.line[i]);
            let mu = (d[layout.beta_index(t_mu, s)] + d[layout.effect_index(l, t_mu)]).exp();
            let zi = t_zi.map_or(0.0, |t| {
                inv_logit(d[layout.beta_index(t, s)] + d[layout.effect_index(l, t)])
            });

            let count = negative_binomial(mu, d[invshape], &mut rng);
            if rng.random::<f64>() < zi || count == 0 {
                zeros += 1;
            }
        }
        fractions.push(zeros as f64 / n);
    }
    Ok(fractions)
}

///
/// Replicate the fecundity observations from up to `n_replicates`
/// evenly spaced draws of each fit.
///
/// * `zero_inflated` - the joint model
/// * `count_only` - fitted on the same fecundity rows, see
///   [`count_only_model`]
/// * `mass` - credible mass of the replicated zero-fraction intervals
/// * `seed` - replication randomness
///
pub fn zero_fraction_check(
    zero_inflated: Fit,
    count_only: Fit,
    n_replicates: usize,
    mass: f64,
    seed: u64,
) -> anyhow::Result<ZeroFractionCheck> {
    let counts = fecundity_counts(&zero_inflated)?;
    if counts.is_empty() {
        anyhow::bail!("no fecundity observations to check");
    }
    if fecundity_counts(&count_only)? != counts {
        anyhow::bail!("the two fits were not given the same fecundity rows");
    }
    let observed = counts.iter().filter(|&&y| y == 0).count() as f64 / counts.len() as f64;

    let zi_fractions = replicate_zero_fractions(&zero_inflated, n_replicates, seed)?;
    let nb_fractions = replicate_zero_fractions(&count_only, n_replicates, seed.wrapping_add(1))?;

    let tail = |xs: &[f64]| xs.iter().filter(|&&x| x >= observed).count() as f64 / xs.len() as f64;

    Ok(ZeroFractionCheck {
        observed,
        zero_inflated: mean_hdi(&zi_fractions, mass)?,
        count_only: mean_hdi(&nb_fractions, mass)?,
        p_zero_inflated: tail(&zi_fractions),
        p_count_only: tail(&nb_fractions),
        n_replicates: zi_fractions.len(),
    })
}

pub fn check_lines(check: &ZeroFractionCheck) -> Vec<String> {
    let row = |model: &str, e: &PointInterval, p: f64| {
        format!(
            "{}\t{:.4}\t{:.4}\t{:.4}\t{:.4}\t{:.3}",
            model, check.observed, e.mean, e.lower, e.upper, p
        )
    };
    vec![
        "model\tobserved_zero_fraction\tmean\tlower\tupper\tp_value".to_string(),
        row("zero_inflated", &check.zero_inflated, check.p_zero_inflated),
        row("count_only", &check.count_only, check.p_count_only),
    ]
}
