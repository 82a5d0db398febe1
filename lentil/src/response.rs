//! Per-response model specifications: response variable, row subset,
//! linear predictors, family and links.

use crate::observation::Observation;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Response {
    Development,
    Fecundity,
    Dispersal,
}

impl Response {
    pub const ALL: [Response; 3] = [Response::Development, Response::Fecundity, Response::Dispersal];

    /// Column name of the response variable
    pub fn variable(&self) -> &'static str {
        match self {
            Response::Development => "lowbound",
            Response::Fecundity => "eggs",
            Response::Dispersal => "dispersal",
        }
    }

    pub fn index(&self) -> usize {
        match self {
            Response::Development => 0,
            Response::Fecundity => 1,
            Response::Dispersal => 2,
        }
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.variable())
    }
}

/// Distributional parameter that carries a linear predictor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Dpar {
    /// location: log-scale mean, count mean, or success probability
    Mu,
    /// zero-inflation (retention) probability
    Zi,
}

/// Positive scalar parameter without a linear predictor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Auxiliary {
    /// lognormal log-scale standard deviation
    Sigma,
    /// reciprocal of the negative-binomial shape
    InvShape,
}

impl fmt::Display for Auxiliary {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Auxiliary::Sigma => write!(f, "sigma"),
            Auxiliary::InvShape => write!(f, "invshape"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Family {
    Lognormal,
    ZeroInflatedNegBinomial,
    Bernoulli,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Link {
    Identity,
    Log,
    Logit,
}

impl Link {
    /// Map a linear predictor to the parameter scale
    pub fn inverse(&self, eta: f64) -> f64 {
        match self {
            Link::Identity => eta,
            Link::Log => eta.exp(),
            Link::Logit => inv_logit(eta),
        }
    }
}

pub fn inv_logit(eta: f64) -> f64 {
    if eta >= 0.0 {
        1.0 / (1.0 + (-eta).exp())
    } else {
        let e = eta.exp();
        e / (1.0 + e)
    }
}

/// Which rows of the shared table a response is fitted on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValidityMask {
    Development,
    Fecundity,
    Dispersal,
}

impl ValidityMask {
    pub fn accepts(&self, obs: &Observation) -> bool {
        match self {
            ValidityMask::Development => obs.valid_development,
            ValidityMask::Fecundity => obs.valid_fecundity,
            ValidityMask::Dispersal => obs.valid_dispersal,
        }
    }
}

/// Population-level part of a linear predictor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Population {
    /// one shared intercept
    Intercept,
    /// one coefficient per species, no reference level
    Species,
}

/// `population + (1 | line)` on the link scale of one parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Predictor {
    pub response: Response,
    pub dpar: Dpar,
    pub link: Link,
    pub population: Population,
    pub line_intercept: bool,
}

impl Predictor {
    pub fn name(&self) -> String {
        match self.dpar {
            Dpar::Mu => self.response.variable().to_string(),
            Dpar::Zi => format!("zi_{}", self.response.variable()),
        }
    }

    fn rhs(&self, cor_tag: Option<&str>) -> String {
        let population = match self.population {
            Population::Intercept => "1",
            Population::Species => "0 + species",
        };
        if !self.line_intercept {
            return population.to_string();
        }
        match cor_tag {
            Some(tag) => format!("{} + (1 | {} | line)", population, tag),
            None => format!("{} + (1 | line)", population),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseSpec {
    pub response: Response,
    pub mask: ValidityMask,
    pub family: Family,
    /// `mu` first, then any further predicted parameters
    pub predictors: Vec<Predictor>,
    pub auxiliaries: Vec<Auxiliary>,
}

impl ResponseSpec {
    fn predictor(response: Response, dpar: Dpar, link: Link) -> Predictor {
        Predictor {
            response,
            dpar,
            link,
            population: Population::Intercept,
            line_intercept: true,
        }
    }

    /// Interval-censored lognormal development time
    pub fn development() -> Self {
        let r = Response::Development;
        Self {
            response: r,
            mask: ValidityMask::Development,
            family: Family::Lognormal,
            predictors: vec![Self::predictor(r, Dpar::Mu, Link::Identity)],
            auxiliaries: vec![Auxiliary::Sigma],
        }
    }

    /// Zero-inflated negative binomial fecundity with
    /// `shape = 1 / invshape`
    pub fn fecundity() -> Self {
        let r = Response::Fecundity;
        Self {
            response: r,
            mask: ValidityMask::Fecundity,
            family: Family::ZeroInflatedNegBinomial,
            predictors: vec![
                Self::predictor(r, Dpar::Mu, Link::Log),
                Self::predictor(r, Dpar::Zi, Link::Logit),
            ],
            auxiliaries: vec![Auxiliary::InvShape],
        }
    }

    /// Bernoulli dispersal
    pub fn dispersal() -> Self {
        let r = Response::Dispersal;
        Self {
            response: r,
            mask: ValidityMask::Dispersal,
            family: Family::Bernoulli,
            predictors: vec![Self::predictor(r, Dpar::Mu, Link::Logit)],
            auxiliaries: vec![],
        }
    }

    /// Same spec with every population part replaced
    pub fn with_population(mut self, population: Population) -> Self {
        for p in self.predictors.iter_mut() {
            p.population = population;
        }
        self
    }

    pub fn accepts(&self, obs: &Observation) -> bool {
        self.mask.accepts(obs)
    }

    /// Formula lines in the usual mixed-model notation
    pub fn formulas(&self, cor_tag: Option<&str>) -> Vec<String> {
        let mut out = vec![];
        for p in &self.predictors {
            let lhs = match (p.dpar, self.family) {
                (Dpar::Mu, Family::Lognormal) => {
                    format!("{} | cens(censoring, upbound)", self.response.variable())
                }
                (Dpar::Mu, _) => self.response.variable().to_string(),
                (Dpar::Zi, _) => "zi".to_string(),
            };
            out.push(format!("{} ~ {}", lhs, p.rhs(cor_tag)));
        }
        for a in &self.auxiliaries {
            match a {
                Auxiliary::Sigma => out.push("sigma ~ 1".to_string()),
                Auxiliary::InvShape => {
                    out.push("shape ~ 1 / invshape".to_string());
                    out.push("invshape ~ 1 (lb = 0)".to_string());
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_families_and_links() {
        let dev = ResponseSpec::development();
        assert_eq!(dev.family, Family::Lognormal);
        assert_eq!(dev.predictors.len(), 1);
        assert_eq!(dev.auxiliaries, vec![Auxiliary::Sigma]);

        let fec = ResponseSpec::fecundity();
        assert_eq!(fec.predictors[0].link, Link::Log);
        assert_eq!(fec.predictors[1].dpar, Dpar::Zi);
        assert_eq!(fec.predictors[1].link, Link::Logit);
        assert!(fec.predictors.iter().all(|p| p.line_intercept));

        let disp = ResponseSpec::dispersal();
        assert_eq!(disp.family, Family::Bernoulli);
        assert!(disp.auxiliaries.is_empty());
    }

    #[test]
    fn test_formulas() {
        let fec = ResponseSpec::fecundity().with_population(Population::Species);
        let f = fec.formulas(Some("p"));
        assert_eq!(f[0], "eggs ~ 0 + species + (1 | p | line)");
        assert_eq!(f[1], "zi ~ 0 + species + (1 | p | line)");
        assert_eq!(f[2], "shape ~ 1 / invshape");

        let dev = ResponseSpec::development();
        assert_eq!(
            dev.formulas(None)[0],
            "lowbound | cens(censoring, upbound) ~ 1 + (1 | line)"
        );
    }

    #[test]
    fn test_inverse_links() {
        assert!((Link::Logit.inverse(0.0) - 0.5).abs() < 1e-12);
        assert!((Link::Log.inverse(1.0) - std::f64::consts::E).abs() < 1e-12);
        assert!(inv_logit(-800.0) >= 0.0 && inv_logit(800.0) <= 1.0);
    }
}
