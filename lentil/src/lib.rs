//! Joint Bayesian mixed-effects models of parasitoid line traits:
//! development time, fecundity and dispersal with correlated line-level
//! intercepts.

/// Zero-fraction posterior predictive check
pub mod checks;

/// Content-addressed fit cache
pub mod cache;

/// Unconstrained log posterior of an assembled model
pub mod density;

pub mod error;

/// Delimited text input and gzip-aware output
pub mod io;

/// Model assembly, parameter layout and data subsets
pub mod joint_model;

/// Observation records, validity masks and the prepared table
pub mod observation;

/// Draw collections and convergence diagnostics
pub mod posterior;

/// Derived quantities over a covariate grid
pub mod predict;

pub mod prior;

/// Output tables and diagnostics of one fitted variant
pub mod report;

/// Response families, links and predictors
pub mod response;

/// Sampler boundary and the slice sampler behind it
pub mod sampler;

/// Synthetic datasets with injected species effects
pub mod simulate;

/// Intervals, contrasts and correlation tables
pub mod summary;

pub use error::{LentilError, Result};
