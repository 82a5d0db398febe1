use anyhow::Result;
use clap::Args;
use log::info;

use lentil::io::{mkdir, write_types};
use lentil::simulate::{simulate, to_csv_lines, SimulationConfig};

#[derive(Args, Debug, Clone)]
pub struct SimulateArgs {
    #[arg(short, long, help = "Output CSV file (.gz for gzipped)")]
    pub out: String,

    #[arg(long, default_value = "2", help = "Number of species")]
    pub species: usize,

    #[arg(long, default_value = "3", help = "Lines per species")]
    pub lines: usize,

    #[arg(long, default_value = "5", help = "Replicates per line")]
    pub replicates: usize,

    #[arg(
        long,
        default_value = "0",
        help = "Standard deviation of line effects on every link scale"
    )]
    pub line_sd: f64,

    #[arg(long, default_value = "42", help = "Random seed")]
    pub seed: u64,
}

pub fn run_simulate(args: &SimulateArgs) -> Result<()> {
    if args.species == 0 || args.lines == 0 || args.replicates == 0 {
        anyhow::bail!("species, lines and replicates must be positive");
    }
    if !(args.line_sd >= 0.0) {
        anyhow::bail!("--line-sd must be non-negative");
    }

    let config = SimulationConfig {
        line_sd: args.line_sd,
        seed: args.seed,
        ..SimulationConfig::new(args.species, args.lines, args.replicates)
    };

    for (s, eff) in config.effects.iter().enumerate() {
        info!(
            "{}: median development {:.2} days, eggs {:.1}, retention {:.3}, dispersal {:.3}",
            SimulationConfig::species_name(s),
            eff.log_development.exp(),
            eff.log_eggs.exp(),
            lentil::response::inv_logit(eff.logit_retention),
            lentil::response::inv_logit(eff.logit_dispersal)
        );
    }

    let rows = simulate(&config);
    mkdir(&args.out)?;
    write_types(&to_csv_lines(&rows), &args.out)?;
    info!("Wrote {} rows to {}", rows.len(), args.out);
    Ok(())
}
