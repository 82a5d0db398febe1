//! Posterior predictions over a covariate grid, per draw.

use crate::error::{LentilError, Result};
use crate::joint_model::{JointModel, ParamKind, Term, Variant};
use crate::posterior::DrawCollection;
use crate::response::{inv_logit, Auxiliary, Dpar, Response};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which contributions enter the linear predictor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Level {
    /// population coefficients plus the row's line effect
    Group,
    /// population coefficients only; line effects at their mean of zero
    Population,
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Level::Group => write!(f, "group"),
            Level::Population => write!(f, "population"),
        }
    }
}

/// Derived quantities on the response scale
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Quantity {
    /// `exp(mu + sigma^2 / 2)` days
    DevelopmentMean,
    /// `exp(mu)` days
    DevelopmentMedian,
    /// mean count absent retention
    FecundityMu,
    /// zero-inflation probability
    Retention,
    /// `(1 - zi) mu`
    FecundityMean,
    DispersalProbability,
}

impl Quantity {
    pub const ALL: [Quantity; 6] = [
        Quantity::DevelopmentMean,
        Quantity::DevelopmentMedian,
        Quantity::FecundityMu,
        Quantity::Retention,
        Quantity::FecundityMean,
        Quantity::DispersalProbability,
    ];

    pub fn response(&self) -> Response {
        match self {
            Quantity::DevelopmentMean | Quantity::DevelopmentMedian => Response::Development,
            Quantity::FecundityMu | Quantity::Retention | Quantity::FecundityMean => {
                Response::Fecundity
            }
            Quantity::DispersalProbability => Response::Dispersal,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Quantity::DevelopmentMean => "development_mean",
            Quantity::DevelopmentMedian => "development_median",
            Quantity::FecundityMu => "fecundity_mu",
            Quantity::Retention => "retention",
            Quantity::FecundityMean => "fecundity_mean",
            Quantity::DispersalProbability => "dispersal_probability",
        }
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridRow {
    pub species: usize,
    pub line: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionGrid {
    pub rows: Vec<GridRow>,
}

impl PredictionGrid {
    /// Every distinct `(species, line)` of the model
    pub fn lines(model: &JointModel) -> Self {
        let rows = model
            .line_species()
            .iter()
            .enumerate()
            .map(|(l, &s)| GridRow {
                species: s,
                line: Some(l),
            })
            .collect();
        Self { rows }
    }

    /// Every species, without lines
    pub fn species(model: &JointModel) -> Self {
        let rows = (0..model.species_levels().len())
            .map(|s| GridRow {
                species: s,
                line: None,
            })
            .collect();
        Self { rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Line name, or species name for species rows
    pub fn label(&self, model: &JointModel, i: usize) -> String {
        let row = self.rows[i];
        match row.line {
            Some(l) => model.line_levels()[l].to_string(),
            None => model.species_levels()[row.species].to_string(),
        }
    }
}

/// Draw-indexed predictions: `values[draw][grid row]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Predictions {
    pub quantity: Quantity,
    pub level: Level,
    pub grid: PredictionGrid,
    pub values: Vec<Vec<f64>>,
}

impl Predictions {
    pub fn n_draws(&self) -> usize {
        self.values.len()
    }

    /// Draws of grid row `i`
    pub fn row_draws(&self, i: usize) -> Vec<f64> {
        self.values.iter().map(|d| d[i]).collect()
    }
}

/// Reported-vector positions needed to evaluate one term
struct TermIndex {
    population: Vec<usize>,
    effects: Vec<usize>,
}

impl TermIndex {
    fn new(model: &JointModel, response: Response, dpar: Dpar) -> Result<Self> {
        let term = Term { response, dpar };
        let t = model.term_index(term).ok_or_else(|| {
            LentilError::Specification(format!("model has no linear predictor for {}", term))
        })?;
        let layout = model.layout();
        Ok(Self {
            population: (0..layout.n_species)
                .map(|s| layout.beta_index(t, s))
                .collect(),
            effects: (0..layout.n_lines)
                .map(|l| layout.effect_index(l, t))
                .collect(),
        })
    }

    fn eta(&self, draw: &[f64], row: &GridRow, level: Level) -> f64 {
        let fixed = draw[self.population[row.species]];
        match (level, row.line) {
            (Level::Group, Some(l)) => fixed + draw[self.effects[l]],
            _ => fixed,
        }
    }
}

fn check_grid(model: &JointModel, grid: &PredictionGrid, level: Level) -> Result<()> {
    let n_species = model.species_levels().len();
    let n_lines = model.line_levels().len();
    for (i, row) in grid.rows.iter().enumerate() {
        if row.species >= n_species {
            return Err(LentilError::Specification(format!(
                "grid row {}: species index {} out of range",
                i, row.species
            )));
        }
        match row.line {
            Some(l) if l >= n_lines => {
                return Err(LentilError::Specification(format!(
                    "grid row {}: line index {} out of range",
                    i, l
                )))
            }
            Some(l) if model.line_species()[l] != row.species => {
                return Err(LentilError::Specification(format!(
                    "grid row {}: line {} does not belong to species {}",
                    i,
                    model.line_levels()[l],
                    model.species_levels()[row.species]
                )))
            }
            None if level == Level::Group => {
                return Err(LentilError::Specification(format!(
                    "grid row {}: group-level prediction needs a line",
                    i
                )))
            }
            _ => {}
        }
    }
    Ok(())
}

///
/// Expected values of one derived quantity for every draw and grid row.
///
/// * `level` - `Population` zeroes line effects and is only defined for
///   the species-partitioned variant
///
pub fn predict(
    model: &JointModel,
    draws: &DrawCollection,
    grid: &PredictionGrid,
    level: Level,
    quantity: Quantity,
) -> Result<Predictions> {
    if level == Level::Population && model.variant() == Variant::Pooled {
        return Err(LentilError::UnsupportedPrediction(
            "the pooled model has no species coefficients to isolate from line effects".into(),
        ));
    }
    if draws.params.as_slice() != model.params() {
        return Err(LentilError::Specification(
            "draw collection was not sampled from this model".into(),
        ));
    }
    check_grid(model, grid, level)?;

    let response = quantity.response();
    let mu = TermIndex::new(model, response, Dpar::Mu)?;
    let zi = match quantity {
        Quantity::Retention | Quantity::FecundityMean => {
            Some(TermIndex::new(model, response, Dpar::Zi)?)
        }
        _ => None,
    };
    let sigma = match quantity {
        Quantity::DevelopmentMean => Some(
            model
                .param_index(&ParamKind::Auxiliary {
                    response,
                    aux: Auxiliary::Sigma,
                })
                .ok_or_else(|| LentilError::Specification("model has no sigma".into()))?,
        ),
        _ => None,
    };

    let values = draws
        .draws()
        .map(|d| {
            grid.rows
                .iter()
                .map(|row| {
                    let eta_mu = mu.eta(d, row, level);
                    let zi = zi.as_ref().map_or(0.0, |z| inv_logit(z.eta(d, row, level)));
                    match quantity {
                        Quantity::DevelopmentMean => {
                            let s = sigma.map_or(0.0, |j| d[j]);
                            (eta_mu + 0.5 * s * s).exp()
                        }
                        Quantity::DevelopmentMedian | Quantity::FecundityMu => eta_mu.exp(),
                        Quantity::Retention => zi,
                        Quantity::FecundityMean => (1.0 - zi) * eta_mu.exp(),
                        Quantity::DispersalProbability => inv_logit(eta_mu),
                    }
                })
                .collect()
        })
        .collect();

    Ok(Predictions {
        quantity,
        level,
        grid: grid.clone(),
        values,
    })
}

/// Average line rows within each species, draw by draw
pub fn aggregate_by_species(model: &JointModel, preds: &Predictions) -> Predictions {
    let grid = PredictionGrid::species(model);
    let n_species = grid.len();

    let mut counts = vec![0usize; n_species];
    for row in preds.grid.rows.iter() {
        counts[row.species] += 1;
    }

    let values = preds
        .values
        .iter()
        .map(|d| {
            let mut sums = vec![0.0; n_species];
            for (v, row) in d.iter().zip(preds.grid.rows.iter()) {
                sums[row.species] += v;
            }
            sums.iter()
                .zip(counts.iter())
                .map(|(s, &n)| if n > 0 { s / n as f64 } else { f64::NAN })
                .collect()
        })
        .collect();

    Predictions {
        quantity: preds.quantity,
        level: preds.level,
        grid,
        values,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::posterior::Diagnostics;
    use crate::simulate::{simulate_table, SimulationConfig};
    use approx::assert_abs_diff_eq;

    /// One hand-built draw with known coefficients and line effects
    fn fixture(variant: Variant) -> (JointModel, DrawCollection) {
        let table = simulate_table(&SimulationConfig::new(2, 2, 2)).unwrap();
        let model = JointModel::build(variant, &table).unwrap();
        let layout = model.layout();
        let mut draw = vec![0.0; layout.dim];
        for t in 0..layout.n_terms() {
            for s in 0..layout.population_width(t) {
                draw[layout.beta_offset[t] + s] = 0.5 * (t + 1) as f64 + s as f64;
            }
            for l in 0..layout.n_lines {
                draw[layout.effect_index(l, t)] = 0.1 * (l + 1) as f64;
            }
        }
        for j in layout.aux_offset..layout.cor_offset {
            draw[j] = 0.4;
        }
        let chains = vec![vec![draw]];
        let diagnostics = Diagnostics::compute(model.params(), &chains, vec![0], 0.0);
        let draws = DrawCollection {
            params: model.params().to_vec(),
            chains,
            diagnostics,
        };
        (model, draws)
    }

    #[test]
    fn test_group_level_quantities() -> Result<()> {
        let (model, draws) = fixture(Variant::SpeciesPartitioned);
        let grid = PredictionGrid::lines(&model);
        // line 3 belongs to species 1
        let row = 3;
        assert_eq!(grid.rows[row].species, 1);

        let mu = predict(&model, &draws, &grid, Level::Group, Quantity::FecundityMu)?;
        // fecundity mu is term 1: 0.5 * 2 + 1 (species) + 0.4 (line 4)
        assert_abs_diff_eq!(mu.values[0][row], (2.0f64 + 0.4).exp(), epsilon = 1e-12);

        let zi = predict(&model, &draws, &grid, Level::Group, Quantity::Retention)?;
        let expected_zi = inv_logit(1.5 + 1.0 + 0.4);
        assert_abs_diff_eq!(zi.values[0][row], expected_zi, epsilon = 1e-12);

        let mean = predict(&model, &draws, &grid, Level::Group, Quantity::FecundityMean)?;
        assert_abs_diff_eq!(
            mean.values[0][row],
            (1.0 - expected_zi) * (2.4f64).exp(),
            epsilon = 1e-12
        );

        let dev = predict(&model, &draws, &grid, Level::Group, Quantity::DevelopmentMean)?;
        let med = predict(&model, &draws, &grid, Level::Group, Quantity::DevelopmentMedian)?;
        assert_abs_diff_eq!(
            dev.values[0][row],
            med.values[0][row] * (0.5f64 * 0.4 * 0.4).exp(),
            epsilon = 1e-12
        );
        Ok(())
    }

    #[test]
    fn test_population_level_equals_group_level_without_line_effects() -> Result<()> {
        let (model, mut draws) = fixture(Variant::SpeciesPartitioned);
        let grid = PredictionGrid::lines(&model);
        let fixed: Vec<_> = Quantity::ALL
            .iter()
            .map(|&q| predict(&model, &draws, &grid, Level::Population, q))
            .collect::<Result<_>>()?;

        for j in draws.indices_where(|k| matches!(k, ParamKind::GroupEffect { .. })) {
            draws.chains[0][0][j] = 0.0;
        }
        for (q, f) in Quantity::ALL.iter().zip(fixed.iter()) {
            let g = predict(&model, &draws, &grid, Level::Group, *q)?;
            assert_eq!(g.values, f.values);
        }
        Ok(())
    }

    #[test]
    fn test_pooled_refuses_population_level() {
        let (model, draws) = fixture(Variant::Pooled);
        let grid = PredictionGrid::species(&model);
        let err = predict(&model, &draws, &grid, Level::Population, Quantity::FecundityMu)
            .unwrap_err();
        assert!(matches!(err, LentilError::UnsupportedPrediction(_)));
        assert!(err.is_specification());
    }

    #[test]
    fn test_grid_checks() {
        let (model, draws) = fixture(Variant::SpeciesPartitioned);
        let species = PredictionGrid::species(&model);
        assert!(predict(&model, &draws, &species, Level::Group, Quantity::Retention).is_err());

        let mismatched = PredictionGrid {
            rows: vec![GridRow {
                species: 0,
                line: Some(3),
            }],
        };
        assert!(predict(&model, &draws, &mismatched, Level::Group, Quantity::Retention).is_err());
    }

    #[test]
    fn test_species_aggregation() -> Result<()> {
        let (model, draws) = fixture(Variant::SpeciesPartitioned);
        let grid = PredictionGrid::lines(&model);
        let preds = predict(&model, &draws, &grid, Level::Group, Quantity::DispersalProbability)?;
        let agg = aggregate_by_species(&model, &preds);
        assert_eq!(agg.grid.len(), 2);
        let expected = 0.5 * (preds.values[0][2] + preds.values[0][3]);
        assert_abs_diff_eq!(agg.values[0][1], expected, epsilon = 1e-12);
        assert_eq!(agg.grid.label(&model, 1), "sp2");
        Ok(())
    }
}
