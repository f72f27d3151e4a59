#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]

use clap::Parser;
use std::path::PathBuf;
use std::process;

use mlg_survey::config::AnalysisConfig;
use mlg_survey::pipeline::{PipelineError, run};

#[derive(Parser)]
#[command(
    name = "mlg-survey",
    about = "Multilevel-governance attitudes of sub-national politicians",
    long_about = "Imputes the survey, builds the composite indices, fits the weighted \
                 regression models with country-clustered standard errors and writes \
                 the residual box plot."
)]
struct Cli {
    /// Survey CSV file
    #[arg(long, value_name = "PATH")]
    data: Option<PathBuf>,

    /// Output PNG for the residual box plot
    #[arg(long, value_name = "PATH")]
    plot: Option<PathBuf>,

    /// TOML file with analysis settings; defaults apply to missing fields
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Seed for the imputer's tie-breaking
    #[arg(long, value_name = "N")]
    seed: Option<u64>,
}

fn load_config(cli: Cli) -> Result<AnalysisConfig, PipelineError> {
    let mut config = match &cli.config {
        Some(path) => {
            println!("Loading configuration from: {}", path.display());
            AnalysisConfig::load(path)?
        }
        None => AnalysisConfig::default(),
    };
    if let Some(data) = cli.data {
        config.data_path = data;
    }
    if let Some(plot) = cli.plot {
        config.plot_path = plot;
    }
    if let Some(seed) = cli.seed {
        config.seed = seed;
    }
    Ok(config)
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let result = load_config(Cli::parse()).and_then(|config| run(&config));
    match result {
        Ok(outcome) => {
            println!("Plot saved to: {}", outcome.plot_path.display());
        }
        Err(e) => {
            eprintln!("Error: {e}");
            process::exit(1);
        }
    }
}
