/// Unnormalized log posterior density over an unconstrained parameter
/// vector.
pub trait LogDensity: Sync {
    /// Number of unconstrained coordinates
    fn dim(&self) -> usize;

    /// `log p(x)` up to an additive constant.
    ///
    /// Must return `f64::NEG_INFINITY` (never NaN) outside the support.
    fn log_density(&self, x: &[f64]) -> f64;

    /// `log p(x)` up to terms that do not depend on coordinate `j`.
    ///
    /// Coordinate-wise samplers only compare densities that differ in
    /// `x[j]`, so an implementation may skip every term constant in it.
    fn log_density_along(&self, x: &[f64], _j: usize) -> f64 {
        self.log_density(x)
    }
}
