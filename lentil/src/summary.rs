//! Point/interval summaries, pairwise contrasts and correlation
//! summaries, and their tab-separated renderings.

use crate::joint_model::{CorrelationScope, JointModel, ParamKind, Term};
use crate::posterior::DrawCollection;
use crate::predict::{Level, Predictions, Quantity};
use crate::response::Auxiliary;
use mcmc_util::interval::mean_hdi;
use mcmc_util::PointInterval;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupSummary {
    pub quantity: Quantity,
    pub level: Level,
    pub species: String,
    /// line name, or the species name for species rows
    pub group: String,
    pub estimate: PointInterval,
}

/// Draw mean and highest-density interval of every grid row
pub fn summarize_groups(
    model: &JointModel,
    preds: &Predictions,
    mass: f64,
) -> anyhow::Result<Vec<GroupSummary>> {
    (0..preds.grid.len())
        .map(|i| {
            Ok(GroupSummary {
                quantity: preds.quantity,
                level: preds.level,
                species: model.species_levels()[preds.grid.rows[i].species].to_string(),
                group: preds.grid.label(model, i),
                estimate: mean_hdi(&preds.row_draws(i), mass)?,
            })
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contrast {
    pub quantity: Quantity,
    /// level of the predictions being contrasted
    pub level: Level,
    pub first: String,
    pub second: String,
    /// `first - second`
    pub estimate: PointInterval,
}

impl Contrast {
    /// Interval excludes zero
    pub fn distinguishable(&self) -> bool {
        self.estimate.excludes_zero()
    }
}

/// Paired-draw differences `row i - row j`
pub fn contrast_draws(preds: &Predictions, i: usize, j: usize) -> Vec<f64> {
    preds.values.iter().map(|d| d[i] - d[j]).collect()
}

/// Every unordered pair of grid rows, first row listed first
pub fn pairwise_contrasts(
    model: &JointModel,
    preds: &Predictions,
    mass: f64,
) -> anyhow::Result<Vec<Contrast>> {
    let n = preds.grid.len();
    let mut out = vec![];
    for i in 0..n {
        for j in (i + 1)..n {
            out.push(Contrast {
                quantity: preds.quantity,
                level: preds.level,
                first: preds.grid.label(model, i),
                second: preds.grid.label(model, j),
                estimate: mean_hdi(&contrast_draws(preds, i, j), mass)?,
            });
        }
    }
    Ok(out)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelationSummary {
    pub first: Term,
    pub second: Term,
    pub scope: CorrelationScope,
    pub estimate: PointInterval,
}

/// Line-level cross-response correlations, labeled with the variant's
/// scope
pub fn summarize_correlations(
    model: &JointModel,
    draws: &DrawCollection,
    mass: f64,
) -> anyhow::Result<Vec<CorrelationSummary>> {
    let scope = model.variant().correlation_scope();
    draws
        .indices_where(|k| matches!(k, ParamKind::GroupCor { .. }))
        .into_iter()
        .filter_map(|j| match draws.params[j].kind {
            ParamKind::GroupCor { first, second } => Some((j, first, second)),
            _ => None,
        })
        .map(|(j, first, second)| {
            Ok(CorrelationSummary {
                first,
                second,
                scope,
                estimate: mean_hdi(&draws.column(j), mass)?,
            })
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSummary {
    pub name: String,
    pub estimate: PointInterval,
    pub rhat: Option<f64>,
    pub ess_bulk: Option<f64>,
}

/// Every parameter except line effects, plus `shape = 1 / invshape`
pub fn summarize_parameters(
    draws: &DrawCollection,
    mass: f64,
) -> anyhow::Result<Vec<ParameterSummary>> {
    let mut out = vec![];
    for j in draws.indices_where(|k| !matches!(k, ParamKind::GroupEffect { .. })) {
        let diag = draws.diagnostics.per_param.get(j).copied();
        let column = draws.column(j);
        out.push(ParameterSummary {
            name: draws.params[j].name.clone(),
            estimate: mean_hdi(&column, mass)?,
            rhat: diag.and_then(|d| d.rhat),
            ess_bulk: diag.and_then(|d| d.ess_bulk),
        });

        if let ParamKind::Auxiliary {
            response,
            aux: Auxiliary::InvShape,
        } = draws.params[j].kind
        {
            let shape: Vec<f64> = column.iter().map(|v| 1.0 / v).collect();
            out.push(ParameterSummary {
                name: format!("shape_{}", response),
                estimate: mean_hdi(&shape, mass)?,
                rhat: None,
                ess_bulk: None,
            });
        }
    }
    Ok(out)
}

fn opt(x: Option<f64>) -> String {
    x.map_or_else(|| "NA".to_string(), |v| format!("{:.4}", v))
}

fn interval_cells(e: &PointInterval) -> String {
    format!("{:.6}\t{:.6}\t{:.6}", e.mean, e.lower, e.upper)
}

pub fn group_lines(rows: &[GroupSummary]) -> Vec<String> {
    let mut lines = vec!["quantity\tlevel\tspecies\tgroup\tmean\tlower\tupper".to_string()];
    lines.extend(rows.iter().map(|r| {
        format!(
            "{}\t{}\t{}\t{}\t{}",
            r.quantity,
            r.level,
            r.species,
            r.group,
            interval_cells(&r.estimate)
        )
    }));
    lines
}

pub fn contrast_lines(rows: &[Contrast]) -> Vec<String> {
    let mut lines =
        vec!["quantity\tlevel\tfirst\tsecond\tmean\tlower\tupper\tdistinguishable".to_string()];
    lines.extend(rows.iter().map(|r| {
        format!(
            "{}\t{}\t{}\t{}\t{}\t{}",
            r.quantity,
            r.level,
            r.first,
            r.second,
            interval_cells(&r.estimate),
            r.distinguishable()
        )
    }));
    lines
}

pub fn correlation_lines(rows: &[CorrelationSummary]) -> Vec<String> {
    let mut lines = vec!["first\tsecond\tscope\tmean\tlower\tupper".to_string()];
    lines.extend(rows.iter().map(|r| {
        format!(
            "{}\t{}\t{}\t{}",
            r.first,
            r.second,
            r.scope,
            interval_cells(&r.estimate)
        )
    }));
    lines
}

pub fn parameter_lines(rows: &[ParameterSummary]) -> Vec<String> {
    let mut lines = vec!["parameter\tmean\tlower\tupper\trhat\tess_bulk".to_string()];
    lines.extend(rows.iter().map(|r| {
        format!(
            "{}\t{}\t{}\t{}",
            r.name,
            interval_cells(&r.estimate),
            opt(r.rhat),
            opt(r.ess_bulk)
        )
    }));
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::joint_model::Variant;
    use crate::posterior::Diagnostics;
    use crate::predict::{predict, PredictionGrid};
    use crate::simulate::{simulate_table, SimulationConfig};
    use rand::rngs::SmallRng;
    use rand::{Rng, SeedableRng};

    fn random_draws(variant: Variant) -> (JointModel, DrawCollection) {
        let table = simulate_table(&SimulationConfig::new(3, 2, 2)).unwrap();
        let model = JointModel::build(variant, &table).unwrap();
        let layout = model.layout();
        let mut rng = SmallRng::seed_from_u64(5);
        let chains: Vec<Vec<Vec<f64>>> = (0..2)
            .map(|_| {
                (0..200)
                    .map(|_| {
                        let mut d: Vec<f64> =
                            (0..layout.dim).map(|_| rng.random_range(-1.0..1.0)).collect();
                        for v in d[layout.aux_offset..layout.cor_offset].iter_mut() {
                            *v = v.abs() + 0.1;
                        }
                        d
                    })
                    .collect()
            })
            .collect();
        let diagnostics = Diagnostics::compute(model.params(), &chains, vec![0, 0], 0.0);
        let draws = DrawCollection {
            params: model.params().to_vec(),
            chains,
            diagnostics,
        };
        (model, draws)
    }

    #[test]
    fn test_contrast_antisymmetry() -> anyhow::Result<()> {
        let (model, draws) = random_draws(Variant::SpeciesPartitioned);
        let grid = PredictionGrid::lines(&model);
        for q in Quantity::ALL {
            let preds = predict(&model, &draws, &grid, Level::Group, q)?;
            for i in 0..grid.len() {
                for j in 0..grid.len() {
                    let ab = contrast_draws(&preds, i, j);
                    let ba = contrast_draws(&preds, j, i);
                    assert!(ab.iter().zip(ba.iter()).all(|(x, y)| *x == -*y));
                }
            }
        }
        Ok(())
    }

    #[test]
    fn test_pairwise_contrast_count_and_labels() -> anyhow::Result<()> {
        let (model, draws) = random_draws(Variant::SpeciesPartitioned);
        let grid = PredictionGrid::species(&model);
        let preds = predict(&model, &draws, &grid, Level::Population, Quantity::FecundityMu)?;
        let contrasts = pairwise_contrasts(&model, &preds, 0.95)?;
        assert_eq!(contrasts.len(), 3);
        assert_eq!((contrasts[0].first.as_str(), contrasts[0].second.as_str()), ("sp1", "sp2"));
        for c in contrasts.iter() {
            assert!(c.estimate.lower <= c.estimate.upper);
        }
        assert!(contrasts.iter().all(|c| c.level == Level::Population));
        let lines = contrast_lines(&contrasts);
        assert_eq!(lines.len(), 4);
        assert!(lines[1].starts_with("fecundity_mu\tpopulation\tsp1\tsp2\t"));
        Ok(())
    }

    #[test]
    fn test_correlation_scope_follows_variant() -> anyhow::Result<()> {
        let (model, draws) = random_draws(Variant::SpeciesPartitioned);
        let cors = summarize_correlations(&model, &draws, 0.9)?;
        assert_eq!(cors.len(), 6);
        assert!(cors.iter().all(|c| c.scope == CorrelationScope::WithinSpecies));
        assert!(correlation_lines(&cors)[1].contains("within_species"));

        let (model, draws) = random_draws(Variant::Pooled);
        let cors = summarize_correlations(&model, &draws, 0.9)?;
        assert!(cors.iter().all(|c| c.scope == CorrelationScope::Total));
        Ok(())
    }

    #[test]
    fn test_parameter_summaries_report_shape() -> anyhow::Result<()> {
        let (_, draws) = random_draws(Variant::Pooled);
        let params = summarize_parameters(&draws, 0.95)?;
        let invshape = params.iter().find(|p| p.name == "invshape_eggs").unwrap();
        let shape = params.iter().find(|p| p.name == "shape_eggs").unwrap();
        assert!(shape.estimate.mean >= 1.0 / invshape.estimate.mean);
        assert!(params.iter().all(|p| !p.name.starts_with("r_line")));
        Ok(())
    }

    #[test]
    fn test_group_summary_rows() -> anyhow::Result<()> {
        let (model, draws) = random_draws(Variant::SpeciesPartitioned);
        let grid = PredictionGrid::lines(&model);
        let preds = predict(&model, &draws, &grid, Level::Group, Quantity::Retention)?;
        let rows = summarize_groups(&model, &preds, 0.95)?;
        assert_eq!(rows.len(), 6);
        for r in rows.iter() {
            assert!(r.estimate.lower >= 0.0 && r.estimate.upper <= 1.0);
            assert!(r.group.starts_with(r.species.as_str()));
        }
        assert_eq!(group_lines(&rows).len(), 7);
        Ok(())
    }
}
