use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use log::error;

use budynki::areas::AreaCatalog;
use budynki::collect::global_variables::{DataPaths, DATA_PATH};
use budynki::error::Result;
use budynki::pipeline::{Pipeline, RunStatus};

/// Download OSM and BDOT10k building footprints for the registered
/// study areas.
#[derive(Parser)]
#[command(name = "budynki", version)]
struct Cli {
    /// Study area key (default area when omitted)
    #[arg(long)]
    area: Option<String>,

    /// Process every registered study area
    #[arg(long, conflicts_with = "area")]
    all: bool,

    /// List the registered study areas and exit
    #[arg(long)]
    list: bool,

    /// Local reference file used instead of the BDOT10k download
    #[arg(long)]
    local: Option<PathBuf>,

    /// Root directory for artifacts and caches
    #[arg(long, default_value = DATA_PATH)]
    data_dir: PathBuf,
}

fn main() -> ExitCode {
    pretty_env_logger::init();
    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    let catalog = AreaCatalog::builtin();

    if cli.list {
        println!("Available study areas:");
        for area in catalog.iter() {
            println!("  {:<24} - {}", area.key, area.name);
            println!("  {:<24}   {}", "", area.description);
        }
        return Ok(ExitCode::SUCCESS);
    }

    let paths = DataPaths::new(&cli.data_dir).with_context(|| {
        format!("Failed to prepare data directory {}", cli.data_dir.display())
    })?;
    let pipeline = Pipeline::new(catalog, &paths)?;
    let local = cli.local.as_deref();

    if cli.all {
        let reports = pipeline.run_all(local);
        let all_failed = !reports.is_empty()
            && reports.iter().all(|r| r.status == RunStatus::Failed);
        if all_failed {
            error!("Every study area failed");
            return Ok(ExitCode::FAILURE);
        }
        return Ok(ExitCode::SUCCESS);
    }

    let report = pipeline.run(cli.area.as_deref(), local)?;
    if report.status == RunStatus::Failed {
        error!(
            "Acquisition aborted for {}: no comparison baseline without OSM data",
            report.area_key
        );
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}
