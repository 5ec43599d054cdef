//! CLI entry point for semitest
//!
//! Runs a test plan against the simulated bench described in the same file.
//!
//! ```bash
//! semitest check config/bench.toml
//! semitest run config/bench.toml
//! ```
//!
//! On failure the translated step-failure code is printed and the process
//! exits non-zero.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use semitest::config::SemitestConfig;
use semitest::plan::{self, StepOutcome};
use semitest::tracing_init;
use semitest_driver_mock::{MockBench, PublishedResult};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "semitest")]
#[command(about = "Cross-family DUT test plans on a simulated bench", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute every step of a plan
    Run {
        /// Path to the plan (TOML)
        config: PathBuf,
    },

    /// Load and validate a plan without running it
    Check {
        /// Path to the plan (TOML)
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config } => run(&config).await,
        Commands::Check { config } => check(&config),
    }
}

fn load(path: &Path) -> Result<SemitestConfig> {
    let config = SemitestConfig::load_from(path)
        .with_context(|| format!("loading {}", path.display()))?;
    config.validate()?;
    Ok(config)
}

fn check(path: &Path) -> Result<()> {
    let config = load(path)?;
    println!(
        "{}: {} pins, {} groups, {} sites, {} steps",
        config.application.name,
        config.bench.pins.len(),
        config.bench.groups.len(),
        config.bench.sites.len(),
        config.steps.len()
    );
    Ok(())
}

async fn run(path: &Path) -> Result<()> {
    let config = load(path)?;
    tracing_init::init_from_config(&config).map_err(anyhow::Error::msg)?;
    tracing::info!(name = %config.application.name, steps = config.steps.len(), "running plan");

    let bench = MockBench::from_config(&config.bench);
    let ctx = plan::bench_context(&bench, &config.defaults);

    let outcome = plan::execute(&ctx, &config.defaults, &config.steps).await;
    for result in bench.publisher.results() {
        print_result(&result);
    }

    match outcome {
        Ok(records) => {
            for record in &records {
                let detail = match &record.outcome {
                    StepOutcome::Completed => String::new(),
                    StepOutcome::Measured(summary) => {
                        format!(" ({} channels)", summary.measurements.len())
                    }
                    StepOutcome::Swept(report) => {
                        format!(" ({} pins measured)", report.measurements.len())
                    }
                };
                println!("step {} {}: ok{}", record.index, record.kind, detail);
            }
            Ok(())
        }
        Err(error) => {
            let (index, kind) = (error.index, error.kind);
            let failure = error.into_failure();
            eprintln!("step {index} {kind}: failed with code {}", failure.code);
            Err(failure.into())
        }
    }
}

fn print_result(result: &PublishedResult) {
    match result {
        PublishedResult::PerSite { tag, values } => {
            println!("{tag}: {values:?}");
        }
        PublishedResult::PerChannel { tag, values } => {
            for value in values {
                println!("{tag}: site {} {} = {:e}", value.site, value.pin, value.value);
            }
        }
    }
}
