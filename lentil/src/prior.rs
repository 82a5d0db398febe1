//! Prior distributions by parameter class, scaled by the empirical
//! medians of the observed data.

use crate::error::{LentilError, Result};
use crate::observation::ObservationTable;
use crate::response::{Dpar, Population, Response};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Parameter classes a prior can be attached to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PriorClass {
    /// shared population intercept
    Intercept,
    /// population coefficients ("slopes"), here one per species
    B,
    /// line-level standard deviations
    Sd,
    Sigma,
    InvShape,
    /// line-level correlation matrix
    Cor,
}

impl fmt::Display for PriorClass {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            PriorClass::Intercept => "Intercept",
            PriorClass::B => "b",
            PriorClass::Sd => "sd",
            PriorClass::Sigma => "sigma",
            PriorClass::InvShape => "invshape",
            PriorClass::Cor => "cor",
        };
        write!(f, "{}", s)
    }
}

impl PriorClass {
    /// Class of the population-level terms under a population structure
    pub fn population(population: Population) -> Self {
        match population {
            Population::Intercept => PriorClass::Intercept,
            Population::Species => PriorClass::B,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Prior {
    Normal { mean: f64, sd: f64 },
    /// normal(0, sd) truncated to the positive half line
    HalfNormal { sd: f64 },
    /// LKJ on a correlation matrix
    Lkj { eta: f64 },
}

impl fmt::Display for Prior {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Prior::Normal { mean, sd } => write!(f, "normal({:.4}, {})", mean, sd),
            Prior::HalfNormal { sd } => write!(f, "normal(0, {}) [lb = 0]", sd),
            Prior::Lkj { eta } => write!(f, "lkj({})", eta),
        }
    }
}

impl Prior {
    /// Log density of a scalar up to an additive constant
    ///
    /// `Lkj` is a matrix prior and has no scalar density.
    pub fn ln_density(&self, x: f64) -> f64 {
        match *self {
            Prior::Normal { mean, sd } => {
                let z = (x - mean) / sd;
                -0.5 * z * z
            }
            Prior::HalfNormal { sd } => {
                if x < 0.0 {
                    f64::NEG_INFINITY
                } else {
                    let z = x / sd;
                    -0.5 * z * z
                }
            }
            Prior::Lkj { .. } => 0.0,
        }
    }
}

/// One `prior ~ class [response] [dpar]` statement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriorEntry {
    pub class: PriorClass,
    /// `None` applies to every response
    pub response: Option<Response>,
    /// `None` applies to every distributional parameter
    pub dpar: Option<Dpar>,
    pub prior: Prior,
}

impl PriorEntry {
    fn matches(&self, class: PriorClass, response: Response, dpar: Option<Dpar>) -> bool {
        self.class == class
            && (self.response.is_none() || self.response == Some(response))
            && (self.dpar.is_none() || self.dpar == dpar)
    }

    fn specificity(&self) -> usize {
        self.response.is_some() as usize + self.dpar.is_some() as usize
    }
}

impl fmt::Display for PriorEntry {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} ~ class {}", self.prior, self.class)?;
        if let Some(r) = self.response {
            write!(f, ", resp {}", r)?;
        }
        match self.dpar {
            Some(Dpar::Zi) => write!(f, ", dpar zi"),
            _ => Ok(()),
        }
    }
}

/// Central tendencies the log-link intercepts are centered on
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EmpiricalScale {
    pub median_lowbound: f64,
    pub median_egg_count: f64,
}

impl EmpiricalScale {
    pub fn from_table(table: &ObservationTable) -> Result<Self> {
        let median_lowbound = table.median_lowbound().ok_or_else(|| {
            LentilError::Specification("no development-valid rows to scale priors".into())
        })?;
        let median_egg_count = table.median_egg_count().ok_or_else(|| {
            LentilError::Specification("no fecundity-valid rows to scale priors".into())
        })?;
        Ok(Self {
            median_lowbound,
            median_egg_count,
        })
    }

    fn log_median(value: f64, what: &str) -> Result<f64> {
        if value > 0.0 && value.is_finite() {
            Ok(value.ln())
        } else {
            Err(LentilError::Specification(format!(
                "median {} must be positive to center a log-scale prior, got {}",
                what, value
            )))
        }
    }
}

pub const LOGIT_SD: f64 = 1.5;
pub const LOG_INTERCEPT_SD: f64 = 1.0;
pub const SCALE_SD: f64 = 1.0;
pub const LKJ_ETA: f64 = 2.0;

/// Ordered list of prior statements; later, more specific statements
/// win over general ones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriorSet {
    entries: Vec<PriorEntry>,
}

impl PriorSet {
    pub fn new(entries: Vec<PriorEntry>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &[PriorEntry] {
        &self.entries
    }

    /// Weakly informative priors for the three-response model.
    ///
    /// * `scale` - empirical medians; log-link intercepts are centered on
    ///   their logarithms
    /// * `population` - decides whether population terms are `Intercept`
    ///   or `b`
    pub fn weakly_informative(scale: &EmpiricalScale, population: Population) -> Result<Self> {
        let log_lowbound = EmpiricalScale::log_median(scale.median_lowbound, "lowbound")?;
        let log_eggs = EmpiricalScale::log_median(scale.median_egg_count, "egg count")?;
        let class = PriorClass::population(population);

        let entry = |class, response, dpar, prior| PriorEntry {
            class,
            response,
            dpar,
            prior,
        };

        Ok(Self::new(vec![
            entry(
                class,
                Some(Response::Development),
                Some(Dpar::Mu),
                Prior::Normal {
                    mean: log_lowbound,
                    sd: LOG_INTERCEPT_SD,
                },
            ),
            entry(
                class,
                Some(Response::Fecundity),
                Some(Dpar::Mu),
                Prior::Normal {
                    mean: log_eggs,
                    sd: LOG_INTERCEPT_SD,
                },
            ),
            entry(
                class,
                Some(Response::Fecundity),
                Some(Dpar::Zi),
                Prior::Normal {
                    mean: 0.0,
                    sd: LOGIT_SD,
                },
            ),
            entry(
                class,
                Some(Response::Dispersal),
                Some(Dpar::Mu),
                Prior::Normal {
                    mean: 0.0,
                    sd: LOGIT_SD,
                },
            ),
            entry(PriorClass::Sd, None, None, Prior::HalfNormal { sd: SCALE_SD }),
            entry(
                PriorClass::Sigma,
                Some(Response::Development),
                None,
                Prior::HalfNormal { sd: SCALE_SD },
            ),
            entry(
                PriorClass::InvShape,
                Some(Response::Fecundity),
                None,
                Prior::HalfNormal { sd: SCALE_SD },
            ),
            entry(PriorClass::Cor, None, None, Prior::Lkj { eta: LKJ_ETA }),
        ]))
    }

    /// Most specific prior for a parameter, ties going to the later
    /// statement
    pub fn lookup(&self, class: PriorClass, response: Response, dpar: Option<Dpar>) -> Option<&Prior> {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.matches(class, response, dpar))
            .max_by_key(|(i, e)| (e.specificity(), *i))
            .map(|(_, e)| &e.prior)
    }

    /// Correlation-matrix prior; applies to the whole line-level block
    pub fn correlation(&self) -> Option<&Prior> {
        self.entries
            .iter()
            .rev()
            .find(|e| e.class == PriorClass::Cor)
            .map(|e| &e.prior)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scale() -> EmpiricalScale {
        EmpiricalScale {
            median_lowbound: 15.0,
            median_egg_count: 30.0,
        }
    }

    #[test]
    fn test_log_link_intercepts_centered() -> Result<()> {
        let priors = PriorSet::weakly_informative(&scale(), Population::Intercept)?;
        let dev = priors.lookup(PriorClass::Intercept, Response::Development, Some(Dpar::Mu));
        assert_eq!(
            dev,
            Some(&Prior::Normal {
                mean: 15f64.ln(),
                sd: 1.0
            })
        );
        let zi = priors.lookup(PriorClass::Intercept, Response::Fecundity, Some(Dpar::Zi));
        assert_eq!(zi, Some(&Prior::Normal { mean: 0.0, sd: 1.5 }));
        assert!(priors
            .lookup(PriorClass::B, Response::Fecundity, Some(Dpar::Mu))
            .is_none());
        Ok(())
    }

    #[test]
    fn test_variants_differ_only_in_population_class() -> Result<()> {
        let pooled = PriorSet::weakly_informative(&scale(), Population::Intercept)?;
        let species = PriorSet::weakly_informative(&scale(), Population::Species)?;
        for (a, b) in pooled.entries().iter().zip(species.entries()) {
            assert_eq!(a.prior, b.prior);
            if a.class != b.class {
                assert_eq!((a.class, b.class), (PriorClass::Intercept, PriorClass::B));
            }
        }
        Ok(())
    }

    #[test]
    fn test_specific_entry_wins() {
        let priors = PriorSet::new(vec![
            PriorEntry {
                class: PriorClass::Sd,
                response: Some(Response::Dispersal),
                dpar: None,
                prior: Prior::HalfNormal { sd: 0.5 },
            },
            PriorEntry {
                class: PriorClass::Sd,
                response: None,
                dpar: None,
                prior: Prior::HalfNormal { sd: 1.0 },
            },
        ]);
        assert_eq!(
            priors.lookup(PriorClass::Sd, Response::Dispersal, Some(Dpar::Mu)),
            Some(&Prior::HalfNormal { sd: 0.5 })
        );
        assert_eq!(
            priors.lookup(PriorClass::Sd, Response::Fecundity, Some(Dpar::Zi)),
            Some(&Prior::HalfNormal { sd: 1.0 })
        );
    }

    #[test]
    fn test_non_positive_median() {
        let bad = EmpiricalScale {
            median_lowbound: 12.0,
            median_egg_count: 0.0,
        };
        let err = PriorSet::weakly_informative(&bad, Population::Species).unwrap_err();
        assert!(err.is_specification());
    }

    #[test]
    fn test_half_normal_support() {
        let p = Prior::HalfNormal { sd: 1.0 };
        assert_eq!(p.ln_density(-0.1), f64::NEG_INFINITY);
        assert!(p.ln_density(0.5) > p.ln_density(2.0));
    }
}
