//! Everything written for one fitted variant.

use crate::cache::CacheStatus;
use crate::checks::{check_lines, zero_fraction_check, ZeroFractionCheck};
use crate::io::{mkdir, open_buf_writer, write_types};
use crate::joint_model::{Variant, CORRELATION_TAG};
use crate::posterior::{Diagnostics, DrawCollection, Fit};
use crate::predict::{aggregate_by_species, predict, Level, PredictionGrid, Quantity};
use crate::summary::*;
use log::info;
use serde::Serialize;
use std::io::Write;

/// Replicated datasets in the zero-fraction check
pub const PPC_REPLICATES: usize = 200;

pub struct VariantReport {
    pub variant: Variant,
    pub formulas: Vec<String>,
    /// line rows, species rows averaged over lines, and for the
    /// partitioned variant population-level species rows
    pub groups: Vec<GroupSummary>,
    /// species pairs on line-averaged predictions, and for the
    /// partitioned variant on population-level predictions
    pub contrasts: Vec<Contrast>,
    pub correlations: Vec<CorrelationSummary>,
    pub parameters: Vec<ParameterSummary>,
    pub ppc: ZeroFractionCheck,
    pub diagnostics: Diagnostics,
}

#[derive(Serialize)]
struct DiagnosticsDocument<'a> {
    variant: &'a str,
    cache: &'a str,
    converged: bool,
    formulas: &'a [String],
    n_chains: usize,
    n_draws: usize,
    diagnostics: &'a Diagnostics,
}

impl VariantReport {
    ///
    /// Summarize a fit.
    ///
    /// * `fit` - the joint model, its data and draws
    /// * `count_only` - plain negative-binomial fecundity fit for the
    ///   zero-fraction check
    /// * `mass` - credible mass of every interval
    /// * `seed` - randomness of the predictive check
    ///
    pub fn build(
        fit: Fit,
        count_only: Fit,
        mass: f64,
        seed: u64,
    ) -> anyhow::Result<Self> {
        if !(mass > 0.0 && mass < 1.0) {
            anyhow::bail!("credible mass must lie in (0, 1), got {}", mass);
        }
        let (model, draws) = (fit.model, fit.draws);

        let lines = PredictionGrid::lines(model);
        let species = PredictionGrid::species(model);

        let mut groups = vec![];
        let mut contrasts = vec![];
        for quantity in Quantity::ALL {
            let by_line = predict(model, draws, &lines, Level::Group, quantity)?;
            groups.extend(summarize_groups(model, &by_line, mass)?);

            let by_species = aggregate_by_species(model, &by_line);
            groups.extend(summarize_groups(model, &by_species, mass)?);
            contrasts.extend(pairwise_contrasts(model, &by_species, mass)?);

            if model.variant().partitions_by_species() {
                let fixed = predict(model, draws, &species, Level::Population, quantity)?;
                groups.extend(summarize_groups(model, &fixed, mass)?);
                contrasts.extend(pairwise_contrasts(model, &fixed, mass)?);
            }
        }

        let formulas = model
            .responses()
            .iter()
            .flat_map(|spec| spec.formulas(Some(CORRELATION_TAG)))
            .collect();

        Ok(Self {
            variant: model.variant(),
            formulas,
            groups,
            contrasts,
            correlations: summarize_correlations(model, draws, mass)?,
            parameters: summarize_parameters(draws, mass)?,
            ppc: zero_fraction_check(fit, count_only, PPC_REPLICATES, mass, seed)?,
            diagnostics: draws.diagnostics.clone(),
        })
    }

    ///
    /// Write `{prefix}.summary.tsv.gz`, `.contrasts.tsv.gz`,
    /// `.correlations.tsv.gz`, `.parameters.tsv.gz`, `.ppc.tsv.gz` and
    /// `.diagnostics.json`. Returns the files written.
    ///
    pub fn write(
        &self,
        prefix: &str,
        draws: &DrawCollection,
        cache: CacheStatus,
    ) -> anyhow::Result<Vec<String>> {
        mkdir(prefix)?;
        let file = |suffix: &str| format!("{}.{}", prefix, suffix);

        let tables = [
            ("summary.tsv.gz", group_lines(&self.groups)),
            ("contrasts.tsv.gz", contrast_lines(&self.contrasts)),
            ("correlations.tsv.gz", correlation_lines(&self.correlations)),
            ("parameters.tsv.gz", parameter_lines(&self.parameters)),
            ("ppc.tsv.gz", check_lines(&self.ppc)),
        ];

        let mut written = vec![];
        for (suffix, lines) in tables.iter() {
            let out = file(suffix);
            write_types(lines, &out)?;
            written.push(out);
        }

        let cache = match cache {
            CacheStatus::Hit => "hit",
            CacheStatus::Miss => "miss",
        };
        let doc = DiagnosticsDocument {
            variant: self.variant.label(),
            cache,
            converged: self.diagnostics.is_converged(),
            formulas: &self.formulas,
            n_chains: draws.n_chains(),
            n_draws: draws.n_draws(),
            diagnostics: &self.diagnostics,
        };
        let out = file("diagnostics.json");
        let mut buf = open_buf_writer(&out)?;
        serde_json::to_writer_pretty(&mut buf, &doc)?;
        writeln!(buf)?;
        buf.flush()?;
        written.push(out);

        for f in written.iter() {
            info!("[{}] wrote {}", self.variant, f);
        }
        Ok(written)
    }
}
