use anyhow::Result;
use clap::{Args, ValueEnum};
use log::info;

use lentil::cache::{fit_or_load, FitCache};
use lentil::checks::count_only_model;
use lentil::io::read_delimited_table;
use lentil::joint_model::{JointModel, Variant};
use lentil::observation::ObservationTable;
use lentil::posterior::Fit;
use lentil::report::VariantReport;
use lentil::sampler::{SamplerConfig, SliceGibbsSampler};

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum VariantChoice {
    /// species fixed effects, within-species line correlations
    Partitioned,
    /// shared intercept, total line correlations
    Pooled,
    Both,
}

impl VariantChoice {
    fn variants(&self) -> Vec<Variant> {
        match self {
            VariantChoice::Partitioned => vec![Variant::SpeciesPartitioned],
            VariantChoice::Pooled => vec![Variant::Pooled],
            VariantChoice::Both => vec![Variant::SpeciesPartitioned, Variant::Pooled],
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct FitArgs {
    #[arg(
        short,
        long,
        help = "Observation table (comma- or tab-separated, optionally gzipped)"
    )]
    pub data: String,

    #[arg(long, value_enum, default_value = "both", help = "Model variant(s) to fit")]
    pub variant: VariantChoice,

    #[arg(long, default_value = "1000", help = "Warmup iterations per chain")]
    pub warmup: usize,

    #[arg(
        long,
        default_value = "2000",
        help = "Total iterations per chain, including warmup"
    )]
    pub iter: usize,

    #[arg(long, default_value = "4", help = "Number of independent chains")]
    pub chains: usize,

    #[arg(long, default_value = "42", help = "Random seed")]
    pub seed: u64,

    #[arg(long, default_value = "0.95", help = "Credible mass of the HDIs")]
    pub hdi_mass: f64,

    #[arg(
        long,
        default_value = "lentil_cache",
        help = "Directory of cached posterior draws"
    )]
    pub cache_dir: String,

    #[arg(long, default_value_t = false, help = "Always sample; never read or write the cache")]
    pub no_cache: bool,

    #[arg(short, long, help = "Output prefix")]
    pub out: String,
}

pub fn run_fit(args: &FitArgs, show_progress: bool) -> Result<()> {
    if !(args.hdi_mass > 0.0 && args.hdi_mass < 1.0) {
        anyhow::bail!("--hdi-mass must lie in (0, 1)");
    }

    let config = SamplerConfig {
        warmup: args.warmup,
        iterations: args.iter,
        chains: args.chains,
        seed: args.seed,
    };
    config.validate()?;

    let raw = read_delimited_table(&args.data)?;
    let table = ObservationTable::from_delimited(&raw)?;
    info!("Read {} rows from {}", table.rows().len(), args.data);

    let cache = (!args.no_cache).then(|| FitCache::new(&args.cache_dir));
    let sampler = SliceGibbsSampler {
        show_progress,
        ..Default::default()
    };

    for variant in args.variant.variants() {
        let model = JointModel::build(variant, &table)?;
        let data = model.subset(&table)?;
        let (draws, status) = fit_or_load(&sampler, &model, &data, &config, cache.as_ref())?;

        info!("[{}] fitting plain negative binomial fecundity for the zero check", variant);
        let nb_model = count_only_model(variant, &table)?;
        let nb_data = nb_model.subset(&table)?;
        let (nb_draws, _) = fit_or_load(&sampler, &nb_model, &nb_data, &config, cache.as_ref())?;

        let fit = Fit {
            model: &model,
            data: &data,
            draws: &draws,
        };
        let count_only = Fit {
            model: &nb_model,
            data: &nb_data,
            draws: &nb_draws,
        };
        let report = VariantReport::build(fit, count_only, args.hdi_mass, args.seed)?;
        let prefix = format!("{}.{}", args.out, variant.label());
        report.write(&prefix, &draws, status)?;

        if !report.diagnostics.is_converged() {
            info!(
                "[{}] {} convergence warnings; treat estimates as provisional",
                variant,
                report.diagnostics.warnings.len()
            );
        }
    }

    info!("Done");
    Ok(())
}
