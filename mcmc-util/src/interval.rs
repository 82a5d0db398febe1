//! Point and interval summaries of a one-dimensional posterior sample.

use serde::{Deserialize, Serialize};

/// Posterior mean with a credible interval
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PointInterval {
    pub mean: f64,
    pub lower: f64,
    pub upper: f64,
    /// Probability mass the interval was asked to cover
    pub mass: f64,
}

impl PointInterval {
    pub fn width(&self) -> f64 {
        self.upper - self.lower
    }

    pub fn contains(&self, x: f64) -> bool {
        self.lower <= x && x <= self.upper
    }

    /// The interval lies entirely on one side of zero
    pub fn excludes_zero(&self) -> bool {
        self.lower > 0.0 || self.upper < 0.0
    }
}

fn sorted(values: &[f64]) -> Vec<f64> {
    let mut xs: Vec<f64> = values.iter().copied().filter(|x| !x.is_nan()).collect();
    xs.sort_unstable_by(|a, b| a.total_cmp(b));
    xs
}

/// Linearly interpolated quantile (0 <= q <= 1); NaN on empty input.
pub fn quantile(values: &[f64], q: f64) -> f64 {
    let xs = sorted(values);
    quantile_sorted(&xs, q)
}

fn quantile_sorted(xs: &[f64], q: f64) -> f64 {
    let n = xs.len();
    if n == 0 {
        return f64::NAN;
    }
    let idx = (q * (n - 1) as f64).clamp(0.0, (n - 1) as f64);
    let lo = idx.floor() as usize;
    let hi = idx.ceil() as usize;
    if lo == hi {
        xs[lo]
    } else {
        let frac = idx - lo as f64;
        xs[lo] * (1.0 - frac) + xs[hi] * frac
    }
}

/// Highest-density interval: the narrowest window of sorted draws that
/// holds at least `mass` of them.
///
/// * `values` - posterior draws (NaN ignored)
/// * `mass` - target coverage in (0, 1)
pub fn hdi(values: &[f64], mass: f64) -> anyhow::Result<(f64, f64)> {
    if !(mass > 0.0 && mass < 1.0) {
        anyhow::bail!("interval mass must be in (0, 1), got {}", mass);
    }
    let xs = sorted(values);
    let n = xs.len();
    if n == 0 {
        anyhow::bail!("no draws to summarize");
    }

    let k = ((mass * n as f64).ceil() as usize).clamp(1, n);

    let mut best = (xs[0], xs[k - 1]);
    for i in 1..=(n - k) {
        let (lo, hi) = (xs[i], xs[i + k - 1]);
        if hi - lo < best.1 - best.0 {
            best = (lo, hi);
        }
    }
    Ok(best)
}

/// Equal-tailed quantile interval with `mass` in the middle
pub fn equal_tailed(values: &[f64], mass: f64) -> anyhow::Result<(f64, f64)> {
    if !(mass > 0.0 && mass < 1.0) {
        anyhow::bail!("interval mass must be in (0, 1), got {}", mass);
    }
    let xs = sorted(values);
    if xs.is_empty() {
        anyhow::bail!("no draws to summarize");
    }
    let tail = (1.0 - mass) / 2.0;
    Ok((quantile_sorted(&xs, tail), quantile_sorted(&xs, 1.0 - tail)))
}

/// Mean and highest-density interval
pub fn mean_hdi(values: &[f64], mass: f64) -> anyhow::Result<PointInterval> {
    let (lower, upper) = hdi(values, mass)?;
    let finite: Vec<f64> = values.iter().copied().filter(|x| !x.is_nan()).collect();
    let mean = finite.iter().sum::<f64>() / finite.len() as f64;
    Ok(PointInterval {
        mean,
        lower,
        upper,
        mass,
    })
}
