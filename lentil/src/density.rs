//! Unnormalized log posterior of a joint model over its unconstrained
//! parameter vector, and the map to reported (constrained) parameters.

use crate::joint_model::*;
use crate::response::{Auxiliary, Family};
use mcmc_util::LogDensity;
use special::Gamma as SpecialGamma;
use statrs::distribution::{ContinuousCDF, Normal};
use std::f64::consts::{LN_2, PI};

/// Log-scale parameters beyond this bound have no posterior support
const LOG_SCALE_BOUND: f64 = 15.0;
const MIN_WIDTH: f64 = 1e-12;

/// `ln(1 + exp(x))`
pub fn log1p_exp(x: f64) -> f64 {
    if x > 0.0 {
        x + (-x).exp().ln_1p()
    } else {
        x.exp().ln_1p()
    }
}

fn log_sum_exp(a: f64, b: f64) -> f64 {
    let m = a.max(b);
    if m == f64::NEG_INFINITY {
        return m;
    }
    m + ((a - m).exp() + (b - m).exp()).ln()
}

/// `ln(1 - tanh(y)^2)` without cancellation
fn ln_sech_sq(y: f64) -> f64 {
    let a = y.abs();
    -2.0 * (a + (-2.0 * a).exp().ln_1p() - LN_2)
}

///
/// Cholesky factor (row-major `k x k`) of a correlation matrix from
/// `k (k - 1) / 2` unconstrained canonical partial correlations, ordered
/// row-major over the strict lower triangle.
///
/// Returns the log Jacobian of the transformation.
///
pub fn cpc_cholesky(y: &[f64], k: usize, l: &mut [f64]) -> f64 {
    l.iter_mut().for_each(|v| *v = 0.0);
    if k == 0 {
        return 0.0;
    }
    l[0] = 1.0;
    let mut ln_jac = 0.0;
    let mut c = 0;
    for i in 1..k {
        let mut sum_sq: f64 = 0.0;
        for j in 0..i {
            let z = y[c].tanh();
            ln_jac += ln_sech_sq(y[c]);
            c += 1;
            let rest = (1.0 - sum_sq).max(0.0);
            if j > 0 {
                ln_jac += 0.5 * rest.ln();
            }
            let v = z * rest.sqrt();
            l[i * k + j] = v;
            sum_sq += v * v;
        }
        l[i * k + i] = (1.0 - sum_sq).max(0.0).sqrt();
    }
    ln_jac
}

/// LKJ(`eta`) log density of the correlation matrix `L L'`, expressed on
/// its Cholesky factor
pub fn ln_lkj_cholesky(l: &[f64], k: usize, eta: f64) -> f64 {
    (1..k)
        .map(|i| ((k - i - 1) as f64 + 2.0 * (eta - 1.0)) * l[i * k + i].ln())
        .sum()
}

/// `r_t = sd_t (L z)_t`
fn line_effect(l: &[f64], k: usize, sd: &[f64], z: &[f64], t: usize) -> f64 {
    sd[t] * (0..=t).map(|m| l[t * k + m] * z[m]).sum::<f64>()
}

///
/// Map an unconstrained vector to the reported parameters: population
/// coefficients unchanged, scales exponentiated, correlations as the
/// lower triangle of `L L'`, line effects as `diag(sd) L z`.
///
pub fn constrain(layout: &ParamLayout, theta: &[f64]) -> Vec<f64> {
    let k = layout.n_terms();
    let mut out = theta.to_vec();

    for j in layout.aux_offset..layout.cor_offset {
        out[j] = theta[j].exp();
    }

    let mut l = vec![0.0; k * k];
    cpc_cholesky(&theta[layout.cor_offset..layout.effect_offset], k, &mut l);

    let mut c = layout.cor_offset;
    for i in 1..k {
        for j in 0..i {
            out[c] = (0..=j).map(|m| l[i * k + m] * l[j * k + m]).sum();
            c += 1;
        }
    }

    let sd: Vec<f64> = (0..k).map(|t| theta[layout.sd_index(t)].exp()).collect();
    for line in 0..layout.n_lines {
        let z0 = layout.effect_index(line, 0);
        let z = &theta[z0..z0 + k];
        for t in 0..k {
            out[z0 + t] = line_effect(&l, k, &sd, z, t);
        }
    }
    out
}

/// Scales and correlation factor unpacked from one parameter vector
struct Unpacked {
    l: Vec<f64>,
    sd: Vec<f64>,
    aux: Vec<f64>,
    ln_jac_cor: f64,
}

/// Log posterior of a joint model given its per-response data.
pub struct JointDensity<'a> {
    model: &'a JointModel,
    data: &'a ModelData,
    /// row indices of each response slot, grouped by line
    line_rows: Vec<Vec<Vec<usize>>>,
    /// `(ln lo, ln hi)` of interval outcomes; `ln hi = inf` if right-censored
    ln_bounds: Vec<Vec<(f64, f64)>>,
    /// `ln y!` of count outcomes
    ln_factorial: Vec<Vec<f64>>,
    sigma_slot: Vec<Option<usize>>,
    invshape_slot: Vec<Option<usize>>,
    std_normal: Normal,
}

impl<'a> JointDensity<'a> {
    pub fn new(model: &'a JointModel, data: &'a ModelData) -> Self {
        let layout = model.layout();
        let mut line_rows = vec![];
        let mut ln_bounds = vec![];
        let mut ln_factorial = vec![];

        for rows in data.rows.iter() {
            let mut by_line = vec![vec![]; layout.n_lines];
            for (i, &l) in rows.line.iter().enumerate() {
                by_line[l].push(i);
            }
            line_rows.push(by_line);

            let mut bounds = vec![];
            let mut facts = vec![];
            for o in rows.outcomes.iter() {
                match *o {
                    Outcome::Interval { lo, hi } => {
                        let ln_lo = if lo > 0.0 { lo.ln() } else { f64::NEG_INFINITY };
                        let ln_hi = hi.map_or(f64::INFINITY, |h| h.ln());
                        bounds.push((ln_lo, ln_hi));
                        facts.push(0.0);
                    }
                    Outcome::Count(y) => {
                        bounds.push((0.0, 0.0));
                        facts.push(SpecialGamma::ln_gamma(y as f64 + 1.0).0);
                    }
                    Outcome::Binary(_) => {
                        bounds.push((0.0, 0.0));
                        facts.push(0.0);
                    }
                }
            }
            ln_bounds.push(bounds);
            ln_factorial.push(facts);
        }

        let n_slots = model.responses().len();
        let sigma_slot = (0..n_slots)
            .map(|r| layout.aux_slot(r, Auxiliary::Sigma))
            .collect();
        let invshape_slot = (0..n_slots)
            .map(|r| layout.aux_slot(r, Auxiliary::InvShape))
            .collect();

        Self {
            model,
            data,
            line_rows,
            ln_bounds,
            ln_factorial,
            sigma_slot,
            invshape_slot,
            std_normal: Normal::standard(),
        }
    }

    pub fn model(&self) -> &JointModel {
        self.model
    }

    fn unpack(&self, x: &[f64]) -> Option<Unpacked> {
        let layout = self.model.layout();
        let k = layout.n_terms();
        if x[layout.aux_offset..layout.cor_offset]
            .iter()
            .any(|u| u.abs() > LOG_SCALE_BOUND)
        {
            return None;
        }
        let aux = x[layout.aux_offset..layout.sd_offset]
            .iter()
            .map(|u| u.exp())
            .collect();
        let sd = x[layout.sd_offset..layout.cor_offset]
            .iter()
            .map(|u| u.exp())
            .collect();
        let mut l = vec![0.0; k * k];
        let ln_jac_cor = cpc_cholesky(&x[layout.cor_offset..layout.effect_offset], k, &mut l);
        Some(Unpacked {
            l,
            sd,
            aux,
            ln_jac_cor,
        })
    }

    fn log_prior(&self, x: &[f64], u: &Unpacked) -> f64 {
        let layout = self.model.layout();
        let priors = self.model.resolved_priors();
        let k = layout.n_terms();
        let mut lp = 0.0;

        for t in 0..k {
            let o = layout.beta_offset[t];
            for w in 0..layout.population_width(t) {
                lp += priors.population[t].ln_density(x[o + w]);
            }
        }

        // scales on the log scale carry a `+ u` Jacobian
        for (s, prior) in priors.aux.iter().enumerate() {
            lp += prior.ln_density(u.aux[s]) + x[layout.aux_index(s)];
        }
        for (t, prior) in priors.sd.iter().enumerate() {
            lp += prior.ln_density(u.sd[t]) + x[layout.sd_index(t)];
        }

        lp += ln_lkj_cholesky(&u.l, k, priors.lkj_eta) + u.ln_jac_cor;

        lp -= 0.5
            * x[layout.effect_offset..]
                .iter()
                .map(|z| z * z)
                .sum::<f64>();
        lp
    }

    /// Linear predictor of term `t` for a row of `species` in `line`
    fn eta(&self, x: &[f64], u: &Unpacked, t: usize, species: usize, line: usize) -> f64 {
        let layout = self.model.layout();
        let k = layout.n_terms();
        let z0 = layout.effect_index(line, 0);
        x[layout.beta_index(t, species)] + line_effect(&u.l, k, &u.sd, &x[z0..z0 + k], t)
    }

    fn std_cdf(&self, z: f64) -> f64 {
        if z == f64::NEG_INFINITY {
            0.0
        } else if z == f64::INFINITY {
            1.0
        } else {
            self.std_normal.cdf(z)
        }
    }

    fn std_sf(&self, z: f64) -> f64 {
        self.std_cdf(-z)
    }

    /// `ln P(a < Z < b)` for a standard normal `Z`
    fn ln_interval_mass(&self, a: f64, b: f64) -> f64 {
        let mass = if a > 0.0 {
            self.std_sf(a) - self.std_sf(b)
        } else {
            self.std_cdf(b) - self.std_cdf(a)
        };
        if mass > 0.0 {
            return mass.ln();
        }
        // both ends in one far tail: density at the nearer end times the
        // width, capped by the Mills ratio
        let c = if a > 0.0 { a } else { b };
        let width = (b - a).min(1.0 / c.abs()).max(MIN_WIDTH);
        -0.5 * c * c - 0.5 * (2.0 * PI).ln() + width.ln()
    }

    fn ln_zinb(y: u64, ln_fact: f64, eta_mu: f64, eta_zi: Option<f64>, invshape: f64) -> f64 {
        let phi = 1.0 / invshape;
        let mu = eta_mu.exp();
        let ln_nb0 = -phi * (mu * invshape).ln_1p();
        let (ln_zi, ln_not_zi) = match eta_zi {
            Some(e) => (-log1p_exp(-e), -log1p_exp(e)),
            None => (f64::NEG_INFINITY, 0.0),
        };
        if y == 0 {
            log_sum_exp(ln_zi, ln_not_zi + ln_nb0)
        } else {
            let yf = y as f64;
            let ln_nb = SpecialGamma::ln_gamma(yf + phi).0 - SpecialGamma::ln_gamma(phi).0 - ln_fact
                + ln_nb0
                + yf * (eta_mu - (phi + mu).ln());
            ln_not_zi + ln_nb
        }
    }

    fn row_loglik(&self, x: &[f64], u: &Unpacked, r: usize, i: usize) -> f64 {
        let rows = &self.data.rows[r];
        let terms = &self.model.layout().response_terms[r];
        let (s, line) = (rows.species[i], rows.line[i]);
        let eta_mu = self.eta(x, u, terms[0], s, line);

        match rows.outcomes[i] {
            Outcome::Interval { .. } => {
                let Some(slot) = self.sigma_slot[r] else {
                    return f64::NEG_INFINITY;
                };
                let sigma = u.aux[slot];
                let (ln_lo, ln_hi) = self.ln_bounds[r][i];
                self.ln_interval_mass((ln_lo - eta_mu) / sigma, (ln_hi - eta_mu) / sigma)
            }
            Outcome::Count(y) => {
                let Some(slot) = self.invshape_slot[r] else {
                    return f64::NEG_INFINITY;
                };
                let eta_zi = terms.get(1).map(|&t| self.eta(x, u, t, s, line));
                Self::ln_zinb(y, self.ln_factorial[r][i], eta_mu, eta_zi, u.aux[slot])
            }
            Outcome::Binary(y) => {
                if y == 1 {
                    -log1p_exp(-eta_mu)
                } else {
                    -log1p_exp(eta_mu)
                }
            }
        }
    }

    fn response_loglik(&self, x: &[f64], u: &Unpacked, r: usize) -> f64 {
        (0..self.data.rows[r].len())
            .map(|i| self.row_loglik(x, u, r, i))
            .sum()
    }

    fn line_loglik(&self, x: &[f64], u: &Unpacked, line: usize) -> f64 {
        self.line_rows
            .iter()
            .enumerate()
            .map(|(r, by_line)| {
                by_line[line]
                    .iter()
                    .map(|&i| self.row_loglik(x, u, r, i))
                    .sum::<f64>()
            })
            .sum()
    }

    fn nan_to_neg_inf(v: f64) -> f64 {
        if v.is_nan() {
            f64::NEG_INFINITY
        } else {
            v
        }
    }
}

impl LogDensity for JointDensity<'_> {
    fn dim(&self) -> usize {
        self.model.layout().dim
    }

    fn log_density(&self, x: &[f64]) -> f64 {
        let Some(u) = self.unpack(x) else {
            return f64::NEG_INFINITY;
        };
        let lik: f64 = (0..self.data.rows.len())
            .map(|r| self.response_loglik(x, &u, r))
            .sum();
        Self::nan_to_neg_inf(self.log_prior(x, &u) + lik)
    }

    fn log_density_along(&self, x: &[f64], j: usize) -> f64 {
        let Some(u) = self.unpack(x) else {
            return f64::NEG_INFINITY;
        };
        let layout = self.model.layout();
        let lik = match layout.locate(j) {
            Coordinate::Population { term } | Coordinate::Sd { term } => {
                self.response_loglik(x, &u, layout.term_response[term])
            }
            Coordinate::Auxiliary { slot } => self.response_loglik(x, &u, layout.aux[slot].0),
            Coordinate::Correlation => (0..self.data.rows.len())
                .map(|r| self.response_loglik(x, &u, r))
                .sum(),
            Coordinate::Effect { line, .. } => self.line_loglik(x, &u, line),
        };
        Self::nan_to_neg_inf(self.log_prior(x, &u) + lik)
    }
}

/// Family check used by the sampler before building a density
pub fn supports(model: &JointModel) -> bool {
    let layout = model.layout();
    model.responses().iter().enumerate().all(|(r, spec)| match spec.family {
        Family::Lognormal => layout.aux_slot(r, Auxiliary::Sigma).is_some(),
        Family::ZeroInflatedNegBinomial => layout.aux_slot(r, Auxiliary::InvShape).is_some(),
        Family::Bernoulli => true,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulate::{simulate_table, SimulationConfig};
    use approx::assert_abs_diff_eq;
    use rand::rngs::SmallRng;
    use rand::{Rng, SeedableRng};

    #[test]
    fn test_cpc_cholesky_is_a_correlation_factor() {
        let k = 4;
        let mut l = vec![0.0; k * k];
        let y = [0.3, -1.2, 0.8, 2.0, -0.4, 0.1];
        cpc_cholesky(&y, k, &mut l);
        for i in 0..k {
            let norm: f64 = (0..k).map(|m| l[i * k + m] * l[i * k + m]).sum();
            assert_abs_diff_eq!(norm, 1.0, epsilon = 1e-12);
            for m in (i + 1)..k {
                assert_eq!(l[i * k + m], 0.0);
            }
        }

        cpc_cholesky(&[0.0; 6], k, &mut l);
        for i in 0..k {
            for m in 0..k {
                assert_eq!(l[i * k + m], if i == m { 1.0 } else { 0.0 });
            }
        }
    }

    #[test]
    fn test_lkj_two_by_two() {
        // for k = 2 the density of y is (1 - r^2)^eta with r = tanh(y)
        let eta = 2.0;
        let mut l = vec![0.0; 4];
        for y in [-1.5, -0.2, 0.0, 0.7, 2.5] {
            let jac = cpc_cholesky(&[y], 2, &mut l);
            let r: f64 = y.tanh();
            let expected = eta * (1.0 - r * r).ln();
            assert_abs_diff_eq!(ln_lkj_cholesky(&l, 2, eta) + jac, expected, epsilon = 1e-10);
        }
    }

    #[test]
    fn test_zinb_normalized() {
        let (mu, invshape) = (20.0f64, 0.5);
        let eta_zi: f64 = -0.8;
        let total: f64 = (0..3000u64)
            .map(|y| {
                let ln_fact = SpecialGamma::ln_gamma(y as f64 + 1.0).0;
                JointDensity::ln_zinb(y, ln_fact, mu.ln(), Some(eta_zi), invshape).exp()
            })
            .sum();
        assert_abs_diff_eq!(total, 1.0, epsilon = 1e-8);

        let zi = 1.0 / (1.0 + (-eta_zi).exp());
        let nb0 = (1.0 / (1.0 + mu * invshape)).powf(1.0 / invshape);
        let p0 = JointDensity::ln_zinb(0, 0.0, mu.ln(), Some(eta_zi), invshape).exp();
        assert_abs_diff_eq!(p0, zi + (1.0 - zi) * nb0, epsilon = 1e-12);
    }

    fn fixture() -> (JointModel, ModelData) {
        let config = SimulationConfig::new(2, 2, 3);
        let table = simulate_table(&config).unwrap();
        let model = JointModel::build(Variant::SpeciesPartitioned, &table).unwrap();
        let data = model.subset(&table).unwrap();
        (model, data)
    }

    #[test]
    fn test_interval_mass_tails() {
        let (model, data) = fixture();
        let density = JointDensity::new(&model, &data);
        let normal = Normal::standard();

        let v = density.ln_interval_mass(0.5, f64::INFINITY);
        assert_abs_diff_eq!(v, normal.sf(0.5).ln(), epsilon = 1e-12);
        let v = density.ln_interval_mass(-1.0, 0.25);
        assert_abs_diff_eq!(v, (normal.cdf(0.25) - normal.cdf(-1.0)).ln(), epsilon = 1e-12);
        assert_eq!(density.ln_interval_mass(f64::NEG_INFINITY, f64::INFINITY), 0.0);

        // far tails stay finite and ordered
        let far = density.ln_interval_mass(60.0, 61.0);
        let farther = density.ln_interval_mass(80.0, 81.0);
        assert!(far.is_finite() && farther.is_finite() && far > farther);
        assert!(density.ln_interval_mass(-61.0, -60.0).is_finite());
        assert!(density.ln_interval_mass(1.0, 1.0).is_finite());
    }

    #[test]
    fn test_scoped_density_differences_match_full() {
        let (model, data) = fixture();
        let density = JointDensity::new(&model, &data);
        let mut rng = SmallRng::seed_from_u64(7);
        let mut x: Vec<f64> = (0..density.dim())
            .map(|_| rng.random_range(-0.5..0.5))
            .collect();

        for j in 0..density.dim() {
            let full0 = density.log_density(&x);
            let along0 = density.log_density_along(&x, j);
            let old = x[j];
            x[j] += 0.3;
            let full1 = density.log_density(&x);
            let along1 = density.log_density_along(&x, j);
            x[j] = old;
            assert!(full0.is_finite() && full1.is_finite());
            assert_abs_diff_eq!(full1 - full0, along1 - along0, epsilon = 1e-8);
        }
    }

    #[test]
    fn test_constrain_line_effects() {
        let (model, _) = fixture();
        let layout = model.layout();
        let mut theta = vec![0.0; layout.dim];
        for t in 0..layout.n_terms() {
            theta[layout.sd_index(t)] = (2.0f64).ln();
        }
        for line in 0..layout.n_lines {
            theta[layout.effect_index(line, 0)] = 1.0;
        }
        let out = constrain(layout, &theta);
        assert_abs_diff_eq!(out[layout.sd_index(0)], 2.0, epsilon = 1e-12);
        for c in layout.cor_offset..layout.effect_offset {
            assert_eq!(out[c], 0.0);
        }
        for line in 0..layout.n_lines {
            assert_abs_diff_eq!(out[layout.effect_index(line, 0)], 2.0, epsilon = 1e-12);
            assert_eq!(out[layout.effect_index(line, 1)], 0.0);
        }
    }

    #[test]
    fn test_out_of_support_is_neg_inf() {
        let (model, data) = fixture();
        let density = JointDensity::new(&model, &data);
        let mut x = vec![0.0; density.dim()];
        x[model.layout().sd_index(0)] = 40.0;
        assert_eq!(density.log_density(&x), f64::NEG_INFINITY);
        assert!(supports(&model));
    }

    #[test]
    fn test_single_term_model() {
        let table = simulate_table(&SimulationConfig::new(2, 2, 3)).unwrap();
        let model = crate::checks::count_only_model(Variant::Pooled, &table).unwrap();
        let data = model.subset(&table).unwrap();
        let layout = model.layout();
        assert_eq!(layout.n_cor(), 0);

        let mut l = vec![0.0; 1];
        assert_eq!(cpc_cholesky(&[], 1, &mut l), 0.0);
        assert_eq!(l, vec![1.0]);

        let density = JointDensity::new(&model, &data);
        assert!(supports(&model));
        let mut x = vec![0.0; density.dim()];
        x[layout.beta_index(0, 0)] = 25f64.ln();
        let base = density.log_density(&x);
        assert!(base.is_finite());
        for j in 0..density.dim() {
            let along0 = density.log_density_along(&x, j);
            x[j] += 0.2;
            let diff = density.log_density(&x) - base;
            let along = density.log_density_along(&x, j) - along0;
            x[j] -= 0.2;
            assert_abs_diff_eq!(diff, along, epsilon = 1e-8);
        }
    }
}
