/// Retained draws of one chain, in iteration order
pub struct McmcChain {
    pub samples: Vec<Vec<f64>>,
    pub log_densities: Vec<f64>,
    /// Number of coordinate updates that could not leave the current point
    pub n_stalled: usize,
}

impl McmcChain {
    pub fn n_samples(&self) -> usize {
        self.samples.len()
    }

    pub fn dim(&self) -> usize {
        self.samples.first().map_or(0, |s| s.len())
    }

    /// Average log density over the retained draws; NaN if empty
    pub fn mean_log_density(&self) -> f64 {
        self.log_densities.iter().sum::<f64>() / self.log_densities.len() as f64
    }

    /// Coordinate-wise mean
    pub fn posterior_mean(&self) -> Vec<f64> {
        let n = self.n_samples();
        if n == 0 {
            return vec![];
        }
        (0..self.dim())
            .map(|j| self.samples.iter().map(|s| s[j]).sum::<f64>() / n as f64)
            .collect()
    }

    /// Coordinate-wise unbiased variance
    pub fn posterior_variance(&self) -> Vec<f64> {
        let n = self.n_samples();
        if n < 2 {
            return vec![];
        }
        self.posterior_mean()
            .into_iter()
            .enumerate()
            .map(|(j, mu)| {
                self.samples.iter().map(|s| (s[j] - mu).powi(2)).sum::<f64>() / (n - 1) as f64
            })
            .collect()
    }
}
