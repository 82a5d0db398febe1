//! Model-agnostic MCMC machinery: a coordinate-wise slice sampler,
//! draw containers, convergence diagnostics and credible intervals.

/// Collected samples and element-wise moments
pub mod chain;

/// Split R-hat and bulk effective sample size
pub mod diagnostics;

/// Highest-density and equal-tailed intervals
pub mod interval;

/// Univariate slice updates and the chain runner
pub mod slice;

/// Log density trait implemented by models
pub mod traits;

pub use chain::McmcChain;
pub use interval::PointInterval;
pub use slice::SliceSampler;
pub use traits::LogDensity;
