//! Joint multivariate model: three response specs sharing one line
//! grouping factor with correlated line-level intercepts.

use crate::error::{LentilError, Result};
use crate::observation::ObservationTable;
use crate::prior::{EmpiricalScale, Prior, PriorClass, PriorEntry, PriorSet};
use crate::response::*;
use log::info;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Grouping factor shared by every line-level term
pub const LINE_GROUP: &str = "line";
/// Tag declaring the line-level terms jointly correlated
pub const CORRELATION_TAG: &str = "p";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Variant {
    /// `0 + species + (1 | p | line)`: line effects are within-species
    SpeciesPartitioned,
    /// `1 + (1 | p | line)`: line effects carry all line variation
    Pooled,
}

impl Variant {
    pub fn from_partition(partition_by_species: bool) -> Self {
        if partition_by_species {
            Variant::SpeciesPartitioned
        } else {
            Variant::Pooled
        }
    }

    pub fn partitions_by_species(&self) -> bool {
        matches!(self, Variant::SpeciesPartitioned)
    }

    pub fn population(&self) -> Population {
        match self {
            Variant::SpeciesPartitioned => Population::Species,
            Variant::Pooled => Population::Intercept,
        }
    }

    /// What the line-level correlations measure under this variant
    pub fn correlation_scope(&self) -> CorrelationScope {
        match self {
            Variant::SpeciesPartitioned => CorrelationScope::WithinSpecies,
            Variant::Pooled => CorrelationScope::Total,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Variant::SpeciesPartitioned => "partitioned",
            Variant::Pooled => "pooled",
        }
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CorrelationScope {
    WithinSpecies,
    Total,
}

impl fmt::Display for CorrelationScope {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            CorrelationScope::WithinSpecies => write!(f, "within_species"),
            CorrelationScope::Total => write!(f, "total"),
        }
    }
}

/// One linear predictor, identified by response and distributional
/// parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Term {
    pub response: Response,
    pub dpar: Dpar,
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.dpar {
            Dpar::Mu => write!(f, "{}", self.response.variable()),
            Dpar::Zi => write!(f, "zi_{}", self.response.variable()),
        }
    }
}

/// "These line-level intercepts are jointly multivariate normal with a
/// full correlation matrix"
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelationBlock {
    pub tag: String,
    pub group: String,
    pub terms: Vec<Term>,
}

impl CorrelationBlock {
    /// Unordered term pairs `(i, j)` with `i > j`, row-major over the
    /// strict lower triangle
    pub fn pairs(&self) -> Vec<(usize, usize)> {
        let k = self.terms.len();
        (1..k).flat_map(|i| (0..i).map(move |j| (i, j))).collect()
    }
}

/// Structured identity of a reported parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ParamKind {
    /// population coefficient; `species` is `None` for a shared intercept
    Population { term: Term, species: Option<usize> },
    Auxiliary { response: Response, aux: Auxiliary },
    GroupSd { term: Term },
    GroupCor { first: Term, second: Term },
    GroupEffect { term: Term, line: usize },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamMeta {
    /// display name only; never parsed
    pub name: String,
    pub kind: ParamKind,
}

/// Position of every parameter block in the (unconstrained or reported)
/// parameter vector. Both vectors share one layout:
///
/// ```text
/// [ population | auxiliaries | sd | correlations | line effects ]
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamLayout {
    pub n_species: usize,
    pub n_lines: usize,
    pub terms: Vec<Term>,
    pub links: Vec<Link>,
    pub populations: Vec<Population>,
    /// response slot of each term
    pub term_response: Vec<usize>,
    /// term indices of each response slot, `mu` first
    pub response_terms: Vec<Vec<usize>>,
    pub beta_offset: Vec<usize>,
    /// `(response slot, auxiliary)` in vector order
    pub aux: Vec<(usize, Auxiliary)>,
    pub aux_offset: usize,
    pub sd_offset: usize,
    pub cor_offset: usize,
    pub effect_offset: usize,
    pub dim: usize,
}

/// What a coordinate of the parameter vector is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Coordinate {
    Population { term: usize },
    Auxiliary { slot: usize },
    Sd { term: usize },
    Correlation,
    Effect { line: usize, term: usize },
}

impl ParamLayout {
    pub fn n_terms(&self) -> usize {
        self.terms.len()
    }

    pub fn n_cor(&self) -> usize {
        let k = self.n_terms();
        k * (k - 1) / 2
    }

    pub fn population_width(&self, term: usize) -> usize {
        match self.populations[term] {
            Population::Intercept => 1,
            Population::Species => self.n_species,
        }
    }

    /// Coefficient applying to a row of `species` for `term`
    pub fn beta_index(&self, term: usize, species: usize) -> usize {
        match self.populations[term] {
            Population::Intercept => self.beta_offset[term],
            Population::Species => self.beta_offset[term] + species,
        }
    }

    pub fn aux_index(&self, slot: usize) -> usize {
        self.aux_offset + slot
    }

    /// Auxiliary slot of a response, if it has that parameter
    pub fn aux_slot(&self, response_slot: usize, aux: Auxiliary) -> Option<usize> {
        self.aux
            .iter()
            .position(|&(r, a)| r == response_slot && a == aux)
    }

    pub fn sd_index(&self, term: usize) -> usize {
        self.sd_offset + term
    }

    pub fn effect_index(&self, line: usize, term: usize) -> usize {
        self.effect_offset + line * self.n_terms() + term
    }

    pub fn locate(&self, j: usize) -> Coordinate {
        if j >= self.effect_offset {
            let rel = j - self.effect_offset;
            Coordinate::Effect {
                line: rel / self.n_terms(),
                term: rel % self.n_terms(),
            }
        } else if j >= self.cor_offset {
            Coordinate::Correlation
        } else if j >= self.sd_offset {
            Coordinate::Sd {
                term: j - self.sd_offset,
            }
        } else if j >= self.aux_offset {
            Coordinate::Auxiliary {
                slot: j - self.aux_offset,
            }
        } else {
            let term = self
                .beta_offset
                .iter()
                .rposition(|&o| o <= j)
                .unwrap_or(0);
            Coordinate::Population { term }
        }
    }
}

/// Priors resolved for every parameter of the layout
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedPriors {
    pub population: Vec<Prior>,
    pub aux: Vec<Prior>,
    pub sd: Vec<Prior>,
    pub lkj_eta: f64,
}

/// Response-specific observation
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Outcome {
    /// event time in `[lo, hi]` days, `hi = None` for right-censored
    Interval { lo: f64, hi: Option<f64> },
    Count(u64),
    Binary(u8),
}

/// Rows of the shared table one response is fitted on
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseRows {
    pub response: Response,
    pub species: Vec<usize>,
    pub line: Vec<usize>,
    pub outcomes: Vec<Outcome>,
}

impl ResponseRows {
    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }
}

/// Per-response subsets, aligned with `JointModel::responses`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelData {
    pub rows: Vec<ResponseRows>,
}

/// An assembled joint model; immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JointModel {
    variant: Variant,
    responses: Vec<ResponseSpec>,
    priors: PriorSet,
    correlation: CorrelationBlock,
    species_levels: Vec<Box<str>>,
    line_levels: Vec<Box<str>>,
    line_species: Vec<usize>,
    layout: ParamLayout,
    resolved: ResolvedPriors,
    params: Vec<ParamMeta>,
}

fn spec_error(msg: impl Into<String>) -> LentilError {
    LentilError::Specification(msg.into())
}

impl JointModel {
    /// Assemble the three default response specs with weakly
    /// informative priors scaled on `table`.
    pub fn build(variant: Variant, table: &ObservationTable) -> Result<Self> {
        let scale = EmpiricalScale::from_table(table)?;
        let priors = PriorSet::weakly_informative(&scale, variant.population())?;
        let specs = vec![
            ResponseSpec::development(),
            ResponseSpec::fecundity(),
            ResponseSpec::dispersal(),
        ];
        Self::assemble(specs, priors, variant.partitions_by_species(), table)
    }

    /// Combine response specs into one joint model.
    ///
    /// * `specs` - response specs; population parts are overwritten
    /// * `priors` - every statement must name a parameter class present
    ///   in the model, and every parameter must get a prior
    /// * `partition_by_species` - `0 + species` instead of a shared
    ///   intercept in every linear predictor
    /// * `table` - fixes the species and line level sets
    pub fn assemble(
        specs: Vec<ResponseSpec>,
        priors: PriorSet,
        partition_by_species: bool,
        table: &ObservationTable,
    ) -> Result<Self> {
        let variant = Variant::from_partition(partition_by_species);
        let responses: Vec<ResponseSpec> = specs
            .into_iter()
            .map(|s| s.with_population(variant.population()))
            .collect();

        if responses.is_empty() {
            return Err(spec_error("no response specs"));
        }
        for (i, r) in responses.iter().enumerate() {
            if responses[..i].iter().any(|q| q.response == r.response) {
                return Err(spec_error(format!("response {} given twice", r.response)));
            }
            if r.predictors.is_empty() || r.predictors[0].dpar != Dpar::Mu {
                return Err(spec_error(format!("response {} lacks a mu predictor", r.response)));
            }
            if let Some(p) = r.predictors.iter().find(|p| !p.line_intercept) {
                return Err(spec_error(format!(
                    "{} has no line intercept; every linear predictor joins the line-level block",
                    p.name()
                )));
            }
        }

        let n_species = table.species_levels().len();
        let n_lines = table.line_levels().len();
        if n_species == 0 || n_lines == 0 {
            return Err(spec_error("no species or line levels"));
        }

        let layout = Self::build_layout(&responses, n_species, n_lines);
        Self::validate_priors(&priors, &responses, &layout)?;
        let resolved = Self::resolve_priors(&priors, &responses, &layout)?;

        let correlation = CorrelationBlock {
            tag: CORRELATION_TAG.to_string(),
            group: LINE_GROUP.to_string(),
            terms: layout.terms.clone(),
        };

        let mut model = Self {
            variant,
            responses,
            priors,
            correlation,
            species_levels: table.species_levels().to_vec(),
            line_levels: table.line_levels().to_vec(),
            line_species: table.line_species().to_vec(),
            layout,
            resolved,
            params: vec![],
        };
        model.params = model.describe_params();

        for spec in model.responses.iter() {
            for f in spec.formulas(Some(CORRELATION_TAG)) {
                info!("[{}] {}", variant, f);
            }
        }
        info!(
            "[{}] {} parameters, {} correlated line-level terms",
            variant,
            model.layout.dim,
            model.correlation.terms.len()
        );

        Ok(model)
    }

    fn build_layout(responses: &[ResponseSpec], n_species: usize, n_lines: usize) -> ParamLayout {
        let mut terms = vec![];
        let mut links = vec![];
        let mut populations = vec![];
        let mut term_response = vec![];
        let mut response_terms = vec![];
        let mut beta_offset = vec![];
        let mut aux = vec![];

        let mut offset = 0;
        for (r, spec) in responses.iter().enumerate() {
            let mut mine = vec![];
            for p in spec.predictors.iter() {
                mine.push(terms.len());
                terms.push(Term {
                    response: spec.response,
                    dpar: p.dpar,
                });
                links.push(p.link);
                populations.push(p.population);
                term_response.push(r);
                beta_offset.push(offset);
                offset += match p.population {
                    Population::Intercept => 1,
                    Population::Species => n_species,
                };
            }
            response_terms.push(mine);
            for &a in spec.auxiliaries.iter() {
                aux.push((r, a));
            }
        }

        let k = terms.len();
        let aux_offset = offset;
        let sd_offset = aux_offset + aux.len();
        let cor_offset = sd_offset + k;
        let effect_offset = cor_offset + k * (k - 1) / 2;
        let dim = effect_offset + n_lines * k;

        ParamLayout {
            n_species,
            n_lines,
            terms,
            links,
            populations,
            term_response,
            response_terms,
            beta_offset,
            aux,
            aux_offset,
            sd_offset,
            cor_offset,
            effect_offset,
            dim,
        }
    }

    fn entry_in_model(entry: &PriorEntry, responses: &[ResponseSpec], layout: &ParamLayout) -> bool {
        let response_ok = |r: Response| entry.response.map_or(true, |x| x == r);
        let dpar_ok = |d: Dpar| entry.dpar.map_or(true, |x| x == d);
        let term_ok = |t: &Term| response_ok(t.response) && dpar_ok(t.dpar);

        match entry.class {
            PriorClass::Intercept | PriorClass::B => layout
                .terms
                .iter()
                .zip(layout.populations.iter())
                .any(|(t, &p)| PriorClass::population(p) == entry.class && term_ok(t)),
            PriorClass::Sd => layout.terms.iter().any(term_ok),
            PriorClass::Sigma | PriorClass::InvShape => {
                let wanted = if entry.class == PriorClass::Sigma {
                    Auxiliary::Sigma
                } else {
                    Auxiliary::InvShape
                };
                entry.dpar.is_none()
                    && layout
                        .aux
                        .iter()
                        .any(|&(r, a)| a == wanted && response_ok(responses[r].response))
            }
            PriorClass::Cor => layout.n_terms() > 1,
        }
    }

    fn validate_priors(priors: &PriorSet, responses: &[ResponseSpec], layout: &ParamLayout) -> Result<()> {
        for entry in priors.entries() {
            if !Self::entry_in_model(entry, responses, layout) {
                return Err(spec_error(format!(
                    "prior `{}` names a parameter class the model does not have",
                    entry
                )));
            }
        }
        Ok(())
    }

    fn resolve_priors(priors: &PriorSet, responses: &[ResponseSpec], layout: &ParamLayout) -> Result<ResolvedPriors> {
        let scalar = |class: PriorClass, response: Response, dpar: Option<Dpar>| -> Result<Prior> {
            match priors.lookup(class, response, dpar) {
                Some(p @ (Prior::Normal { .. } | Prior::HalfNormal { .. })) => Ok(*p),
                Some(p) => Err(spec_error(format!(
                    "{} is not a scalar prior (class {}, {})",
                    p, class, response
                ))),
                None => Err(spec_error(format!(
                    "no prior for class {} of {}",
                    class, response
                ))),
            }
        };

        let mut population = vec![];
        let mut sd = vec![];
        for (t, term) in layout.terms.iter().enumerate() {
            let class = PriorClass::population(layout.populations[t]);
            population.push(scalar(class, term.response, Some(term.dpar))?);
            let s = scalar(PriorClass::Sd, term.response, Some(term.dpar))?;
            if !matches!(s, Prior::HalfNormal { .. }) {
                return Err(spec_error(format!("sd of {} needs a half-normal prior", term)));
            }
            sd.push(s);
        }

        let mut aux = vec![];
        for &(r, a) in layout.aux.iter() {
            let class = match a {
                Auxiliary::Sigma => PriorClass::Sigma,
                Auxiliary::InvShape => PriorClass::InvShape,
            };
            let p = scalar(class, responses[r].response, None)?;
            if !matches!(p, Prior::HalfNormal { .. }) {
                return Err(spec_error(format!(
                    "{} of {} needs a half-normal prior",
                    a, responses[r].response
                )));
            }
            aux.push(p);
        }

        let lkj_eta = if layout.n_terms() > 1 {
            match priors.correlation() {
                Some(Prior::Lkj { eta }) if *eta > 0.0 => *eta,
                Some(p) => return Err(spec_error(format!("correlation prior {} is not lkj", p))),
                None => return Err(spec_error("no correlation prior")),
            }
        } else {
            1.0
        };

        Ok(ResolvedPriors {
            population,
            aux,
            sd,
            lkj_eta,
        })
    }

    fn describe_params(&self) -> Vec<ParamMeta> {
        let layout = &self.layout;
        let mut params = Vec::with_capacity(layout.dim);

        for (t, &term) in layout.terms.iter().enumerate() {
            match layout.populations[t] {
                Population::Intercept => params.push(ParamMeta {
                    name: format!("b_{}_Intercept", term),
                    kind: ParamKind::Population {
                        term,
                        species: None,
                    },
                }),
                Population::Species => {
                    for (s, name) in self.species_levels.iter().enumerate() {
                        params.push(ParamMeta {
                            name: format!("b_{}_species{}", term, name),
                            kind: ParamKind::Population {
                                term,
                                species: Some(s),
                            },
                        });
                    }
                }
            }
        }

        for &(r, aux) in layout.aux.iter() {
            let response = self.responses[r].response;
            params.push(ParamMeta {
                name: format!("{}_{}", aux, response),
                kind: ParamKind::Auxiliary { response, aux },
            });
        }

        for &term in layout.terms.iter() {
            params.push(ParamMeta {
                name: format!("sd_{}__{}_Intercept", LINE_GROUP, term),
                kind: ParamKind::GroupSd { term },
            });
        }

        for (i, j) in self.correlation.pairs() {
            let (first, second) = (layout.terms[j], layout.terms[i]);
            params.push(ParamMeta {
                name: format!(
                    "cor_{}__{}_Intercept__{}_Intercept",
                    LINE_GROUP, first, second
                ),
                kind: ParamKind::GroupCor { first, second },
            });
        }

        for (l, line) in self.line_levels.iter().enumerate() {
            for &term in layout.terms.iter() {
                params.push(ParamMeta {
                    name: format!("r_{}__{}[{},Intercept]", LINE_GROUP, term, line),
                    kind: ParamKind::GroupEffect { term, line: l },
                });
            }
        }

        debug_assert_eq!(params.len(), layout.dim);
        params
    }

    /// Per-response row subsets of a table with the model's level sets.
    pub fn subset(&self, table: &ObservationTable) -> Result<ModelData> {
        if table.species_levels() != self.species_levels.as_slice()
            || table.line_levels() != self.line_levels.as_slice()
        {
            return Err(spec_error(
                "table level sets differ from those the model was assembled with",
            ));
        }

        let mut rows = Vec::with_capacity(self.responses.len());
        for spec in self.responses.iter() {
            let mut sub = ResponseRows {
                response: spec.response,
                species: vec![],
                line: vec![],
                outcomes: vec![],
            };
            for obs in table.rows().iter().filter(|o| spec.accepts(o)) {
                let outcome = match spec.family {
                    Family::Lognormal => Outcome::Interval {
                        lo: obs
                            .raw
                            .lowbound
                            .ok_or_else(|| spec_error("development row without lowbound"))?,
                        hi: obs.raw.upbound,
                    },
                    Family::ZeroInflatedNegBinomial => Outcome::Count(
                        obs.raw
                            .egg_count
                            .ok_or_else(|| spec_error("fecundity row without egg count"))?,
                    ),
                    Family::Bernoulli => Outcome::Binary(
                        obs.dispersal_numeric
                            .ok_or_else(|| spec_error("dispersal row without outcome"))?,
                    ),
                };
                sub.species.push(obs.species_idx);
                sub.line.push(obs.line_idx);
                sub.outcomes.push(outcome);
            }
            info!("[{}] {}: {} rows", self.variant, spec.response, sub.len());
            rows.push(sub);
        }
        Ok(ModelData { rows })
    }

    pub fn variant(&self) -> Variant {
        self.variant
    }

    pub fn responses(&self) -> &[ResponseSpec] {
        &self.responses
    }

    pub fn priors(&self) -> &PriorSet {
        &self.priors
    }

    pub fn resolved_priors(&self) -> &ResolvedPriors {
        &self.resolved
    }

    pub fn correlation(&self) -> &CorrelationBlock {
        &self.correlation
    }

    pub fn layout(&self) -> &ParamLayout {
        &self.layout
    }

    pub fn params(&self) -> &[ParamMeta] {
        &self.params
    }

    pub fn species_levels(&self) -> &[Box<str>] {
        &self.species_levels
    }

    pub fn line_levels(&self) -> &[Box<str>] {
        &self.line_levels
    }

    pub fn line_species(&self) -> &[usize] {
        &self.line_species
    }

    /// Response slot of a response in this model
    pub fn response_slot(&self, response: Response) -> Option<usize> {
        self.responses.iter().position(|s| s.response == response)
    }

    /// Term index of a linear predictor in this model
    pub fn term_index(&self, term: Term) -> Option<usize> {
        self.layout.terms.iter().position(|&t| t == term)
    }

    /// Position of a parameter in the reported vector
    pub fn param_index(&self, kind: &ParamKind) -> Option<usize> {
        self.params.iter().position(|p| &p.kind == kind)
    }

    /// Positions of every parameter satisfying `pred`
    pub fn params_where(&self, pred: impl Fn(&ParamKind) -> bool) -> Vec<usize> {
        self.params
            .iter()
            .enumerate()
            .filter(|(_, p)| pred(&p.kind))
            .map(|(i, _)| i)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observation::*;

    fn toy_table() -> ObservationTable {
        let mut raw = vec![];
        let mut line_no = 2;
        for (species, lines) in [("A", ["A1", "A2"]), ("B", ["B1", "B2"])] {
            for line in lines {
                for rep in 0..2u32 {
                    let single = RawObservation {
                        species: species.into(),
                        line: line.into(),
                        replicate: rep,
                        experiment_type: ExperimentType::SingleVial,
                        temporal_block: None,
                        start_timestamp: None,
                        emergence_date: Some("2021-03-01".into()),
                        emergence_hour: None,
                        elapsed_hours: None,
                        lowbound: Some(14.0 + rep as f64),
                        upbound: Some(14.5 + rep as f64),
                        dispersal_status: DispersalStatus::NotApplicable,
                        egg_count: Some(10 + 5 * rep as u64),
                    };
                    let mut two = single.clone();
                    two.experiment_type = ExperimentType::TwoVial;
                    two.emergence_date = None;
                    two.lowbound = None;
                    two.upbound = None;
                    two.egg_count = None;
                    two.dispersal_status = if rep == 0 {
                        DispersalStatus::Dispersed
                    } else {
                        DispersalStatus::NotDispersed
                    };
                    raw.push((line_no, single));
                    raw.push((line_no + 1, two));
                    line_no += 2;
                }
            }
        }
        ObservationTable::prepare(raw).unwrap()
    }

    #[test]
    fn test_layout_partitioned() -> Result<()> {
        let table = toy_table();
        let model = JointModel::build(Variant::SpeciesPartitioned, &table)?;
        let layout = model.layout();
        assert_eq!(layout.n_terms(), 4);
        // 4 terms x 2 species + sigma + invshape + 4 sd + 6 cor + 4 lines x 4
        assert_eq!(layout.dim, 8 + 2 + 4 + 6 + 16);
        assert_eq!(model.params().len(), layout.dim);
        assert_eq!(model.correlation().tag, "p");
        assert_eq!(model.correlation().terms.len(), 4);

        for (j, p) in model.params().iter().enumerate() {
            match (layout.locate(j), p.kind) {
                (Coordinate::Population { term }, ParamKind::Population { term: t, .. }) => {
                    assert_eq!(layout.terms[term], t)
                }
                (Coordinate::Auxiliary { .. }, ParamKind::Auxiliary { .. }) => {}
                (Coordinate::Sd { term }, ParamKind::GroupSd { term: t }) => {
                    assert_eq!(layout.terms[term], t)
                }
                (Coordinate::Correlation, ParamKind::GroupCor { .. }) => {}
                (Coordinate::Effect { line, term }, ParamKind::GroupEffect { term: t, line: l }) => {
                    assert_eq!((line, layout.terms[term]), (l, t))
                }
                (c, k) => panic!("coordinate {:?} described as {:?}", c, k),
            }
        }
        Ok(())
    }

    #[test]
    fn test_pooled_has_single_intercepts() -> Result<()> {
        let table = toy_table();
        let model = JointModel::build(Variant::Pooled, &table)?;
        let pop = model.params_where(|k| matches!(k, ParamKind::Population { .. }));
        assert_eq!(pop.len(), 4);
        assert!(model
            .params_where(|k| matches!(k, ParamKind::Population { species: Some(_), .. }))
            .is_empty());
        let cors = model.params_where(|k| matches!(k, ParamKind::GroupCor { .. }));
        assert_eq!(cors.len(), 6);
        Ok(())
    }

    #[test]
    fn test_prior_for_missing_class() {
        let table = toy_table();
        let scale = EmpiricalScale::from_table(&table).unwrap();
        // slope priors on a model without species coefficients
        let priors = PriorSet::weakly_informative(&scale, Population::Species).unwrap();
        let specs = vec![
            ResponseSpec::development(),
            ResponseSpec::fecundity(),
            ResponseSpec::dispersal(),
        ];
        let err = JointModel::assemble(specs, priors, false, &table).unwrap_err();
        assert!(err.is_specification());
    }

    #[test]
    fn test_missing_prior() {
        let table = toy_table();
        let scale = EmpiricalScale::from_table(&table).unwrap();
        let full = PriorSet::weakly_informative(&scale, Population::Intercept).unwrap();
        let entries = full
            .entries()
            .iter()
            .filter(|e| e.class != PriorClass::Sigma)
            .cloned()
            .collect();
        let specs = vec![ResponseSpec::development(), ResponseSpec::fecundity(), ResponseSpec::dispersal()];
        let err = JointModel::assemble(specs, PriorSet::new(entries), false, &table).unwrap_err();
        assert!(matches!(err, LentilError::Specification(ref m) if m.contains("sigma")));
    }

    #[test]
    fn test_subset_by_mask() -> Result<()> {
        let table = toy_table();
        let model = JointModel::build(Variant::SpeciesPartitioned, &table)?;
        let data = model.subset(&table)?;
        assert_eq!(data.rows.len(), 3);
        for rows in data.rows.iter() {
            assert_eq!(rows.len(), 8);
        }
        assert!(matches!(data.rows[0].outcomes[0], Outcome::Interval { lo, .. } if lo == 14.0));
        assert!(matches!(data.rows[1].outcomes[1], Outcome::Count(15)));
        assert!(matches!(data.rows[2].outcomes[0], Outcome::Binary(1)));
        Ok(())
    }

    #[test]
    fn test_correlation_names_are_structured() -> Result<()> {
        let table = toy_table();
        let model = JointModel::build(Variant::Pooled, &table)?;
        let dev = Term {
            response: Response::Development,
            dpar: Dpar::Mu,
        };
        let zi = Term {
            response: Response::Fecundity,
            dpar: Dpar::Zi,
        };
        let idx = model
            .param_index(&ParamKind::GroupCor {
                first: dev,
                second: zi,
            })
            .unwrap();
        assert_eq!(model.params()[idx].name, "cor_line__lowbound_Intercept__zi_eggs_Intercept");
        Ok(())
    }
}
