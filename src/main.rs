pub mod basemap;
pub mod config;
pub mod data;
pub mod error;
pub mod font;
pub mod pipeline;
pub mod processing;
pub mod render;
pub mod sampling;
pub mod summary;
pub mod types;

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::{AppConfig, LoggingConfig};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate the dot density map and the per-tract summary
    Generate {
        #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
        config: PathBuf,
        /// Seed for reproducible point placement (overrides the config file)
        #[arg(long)]
        seed: Option<u64>,
        /// Directory the map image is written to (must exist)
        #[arg(long, value_name = "DIR")]
        output_dir: Option<PathBuf>,
        /// Skip the map image; only print the summary
        #[arg(long)]
        no_render: bool,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Generate {
            config,
            seed,
            output_dir,
            no_render,
        } => {
            let mut app_config = AppConfig::load_from_file(&config)?;
            if seed.is_some() {
                app_config.sampling.seed = seed;
            }
            if let Some(dir) = output_dir {
                app_config.output.dir = dir;
            }
            init_tracing(&app_config.logging);
            info!("Generating map with config: {:?}", config);

            generate(&app_config, !no_render)?;
            info!("Generation complete!");
        }
    }

    Ok(())
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn generate(config: &AppConfig, render_map: bool) -> anyhow::Result<()> {
    let report = pipeline::run(config, render_map)?;

    println!("{}", report.summary);
    if let Some(path) = &config.output.summary_csv {
        report.summary.write_csv(path)?;
        info!("Summary written to {:?}", path);
    }

    report.map.context("Dot density map was not saved")?;
    Ok(())
}
