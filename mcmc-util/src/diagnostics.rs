//! Multi-chain convergence diagnostics on a single scalar quantity.
//!
//! Both statistics split every chain in half first, so that a drifting
//! chain looks like two disagreeing chains (Gelman et al. 2013, BDA3
//! ch. 11; Vehtari et al. 2021 for the ESS estimator).

fn split_chains(chains: &[Vec<f64>]) -> Vec<&[f64]> {
    let n = chains.iter().map(|c| c.len()).min().unwrap_or(0);
    let half = n / 2;
    if half < 2 {
        return vec![];
    }
    chains
        .iter()
        .flat_map(|c| [&c[..half], &c[half..2 * half]])
        .collect()
}

fn mean(xs: &[f64]) -> f64 {
    xs.iter().sum::<f64>() / xs.len() as f64
}

fn variance(xs: &[f64], mu: f64) -> f64 {
    xs.iter().map(|&x| (x - mu) * (x - mu)).sum::<f64>() / (xs.len() - 1) as f64
}

/// Within-chain variance `W` and the pooled estimate `var+`
fn pooled_variances(parts: &[&[f64]]) -> (f64, f64) {
    let m = parts.len() as f64;
    let n = parts[0].len() as f64;
    let means: Vec<f64> = parts.iter().map(|c| mean(c)).collect();
    let w = parts
        .iter()
        .zip(means.iter())
        .map(|(c, &mu)| variance(c, mu))
        .sum::<f64>()
        / m;
    let grand = mean(&means);
    let b = n * means.iter().map(|&mu| (mu - grand).powi(2)).sum::<f64>() / (m - 1.0);
    let var_plus = ((n - 1.0) * w + b) / n;
    (w, var_plus)
}

/// Split potential scale reduction factor.
///
/// Returns NaN if there are fewer than 4 draws per chain, 1.0 for a
/// constant quantity.
pub fn split_rhat(chains: &[Vec<f64>]) -> f64 {
    let parts = split_chains(chains);
    if parts.len() < 2 {
        return f64::NAN;
    }
    let (w, var_plus) = pooled_variances(&parts);
    if w <= 0.0 {
        return if var_plus <= 0.0 { 1.0 } else { f64::INFINITY };
    }
    (var_plus / w).sqrt()
}

fn autocovariance(xs: &[f64], max_lag: usize) -> Vec<f64> {
    let n = xs.len();
    let mu = mean(xs);
    (0..=max_lag)
        .map(|lag| {
            let mut acc = 0.0;
            for t in 0..(n - lag) {
                acc += (xs[t] - mu) * (xs[t + lag] - mu);
            }
            acc / n as f64
        })
        .collect()
}

/// Bulk effective sample size over all chains.
///
/// Autocorrelations are combined across split chains and truncated by
/// Geyer's initial positive sequence.
pub fn bulk_ess(chains: &[Vec<f64>]) -> f64 {
    let parts = split_chains(chains);
    if parts.len() < 2 {
        return f64::NAN;
    }
    let m = parts.len();
    let n = parts[0].len();
    let total = (m * n) as f64;

    let (w, var_plus) = pooled_variances(&parts);
    if w <= 0.0 || var_plus <= 0.0 {
        return total;
    }

    let max_lag = n - 1;
    let acovs: Vec<Vec<f64>> = parts.iter().map(|c| autocovariance(c, max_lag)).collect();
    let rho = |t: usize| -> f64 {
        let mean_acov = acovs.iter().map(|a| a[t]).sum::<f64>() / m as f64;
        1.0 - (w - mean_acov) / var_plus
    };

    // Geyer: sum consecutive pairs while they stay positive
    let mut tau = -1.0;
    let mut t = 0;
    let mut prev_pair = f64::INFINITY;
    while t < max_lag {
        let mut pair = rho(t) + rho(t + 1);
        if pair < 0.0 {
            break;
        }
        // initial monotone sequence
        if pair > prev_pair {
            pair = prev_pair;
        }
        tau += 2.0 * pair;
        prev_pair = pair;
        t += 2;
    }

    let tau = tau.max(1.0 / total.log10().max(1.0));
    total / tau
}
