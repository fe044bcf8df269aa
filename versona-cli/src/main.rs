mod reports;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use std::fs;
use std::path::PathBuf;

use reports::{CatalogReport, Report};
use versona_core::{
    CharacterCatalog, MemoryBackend, MemoryEventLog, VersionAssignmentService,
    VersionConfigRegistry,
};

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ReportFormat {
    /// Human-readable console summary
    Console,
    /// Machine-readable JSON
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "versona", version)]
#[command(
    about = "Operational tooling for Versona version assignment - distribution tests, simulations, and health checks"
)]
struct Args {
    /// Path to the character catalog JSON file
    #[arg(long, default_value = "catalog.json")]
    catalog: PathBuf,

    /// Seed for reproducible draws
    #[arg(long, default_value_t = 1337)]
    seed: u64,

    /// Output report format
    #[arg(long, value_enum, default_value_t = ReportFormat::Console)]
    report: ReportFormat,

    /// Optional path to write the report instead of stdout
    #[arg(long)]
    output: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Verify a character's strategy with draw-only sampling (no sticky
    /// state is touched)
    Distribution {
        /// Base character id to test
        #[arg(long)]
        character: String,

        /// Number of independent draws
        #[arg(short = 'n', long, default_value_t = 10_000)]
        draws: usize,
    },
    /// Exercise the full sticky assignment path with synthetic users
    Simulate {
        /// Base character id to simulate
        #[arg(long)]
        character: String,

        /// Number of synthetic users
        #[arg(short = 'n', long, default_value_t = 1_000)]
        users: usize,
    },
    /// Score expected-vs-actual distribution across every character after
    /// seeding synthetic traffic
    Health {
        /// Synthetic users assigned per character before scoring
        #[arg(short = 'n', long, default_value_t = 1_000)]
        users: usize,
    },
    /// List cataloged characters and their strategies
    Catalog,
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let catalog_text = fs::read_to_string(&args.catalog)
        .with_context(|| format!("reading catalog file {}", args.catalog.display()))?;
    let catalog = CharacterCatalog::from_json(&catalog_text)
        .with_context(|| format!("parsing catalog file {}", args.catalog.display()))?;
    let registry = VersionConfigRegistry::from_catalog(&catalog)
        .context("validating character catalog")?;
    log::info!(
        "loaded {} character config(s) from {}",
        registry.len(),
        args.catalog.display()
    );

    let service = VersionAssignmentService::new(
        registry,
        MemoryBackend::new(),
        MemoryEventLog::new(),
        args.seed,
    );

    let report = run_command(&args, &service)?;
    emit_report(&args, &report)
}

fn run_command(
    args: &Args,
    service: &VersionAssignmentService<MemoryBackend, MemoryEventLog>,
) -> Result<Report> {
    match &args.command {
        Command::Distribution { character, draws } => {
            let report = service
                .test_assignment_distribution(character, *draws)
                .with_context(|| format!("testing distribution for '{character}'"))?;
            Ok(Report::Distribution(report))
        }
        Command::Simulate { character, users } => {
            let report = service
                .simulate_user_assignments(character, *users)
                .with_context(|| format!("simulating assignments for '{character}'"))?;
            Ok(Report::Simulation(report))
        }
        Command::Health { users } => {
            seed_synthetic_traffic(service, *users)?;
            let report = service.analytics().health_check()?;
            Ok(Report::Health(report))
        }
        Command::Catalog => Ok(Report::Catalog(CatalogReport::from_registry(
            service.registry(),
        ))),
    }
}

/// Assign `users` synthetic users to every cataloged character so the
/// health check has a distribution to score. With a durable backend wired
/// in this would instead score live traffic.
fn seed_synthetic_traffic(
    service: &VersionAssignmentService<MemoryBackend, MemoryEventLog>,
    users: usize,
) -> Result<()> {
    let characters: Vec<String> = service
        .registry()
        .character_ids()
        .iter()
        .map(ToString::to_string)
        .collect();
    for character in characters {
        for i in 0..users {
            let user = format!("sim-user-{i:05}");
            service
                .get_version_for_user(&user, &character)
                .with_context(|| format!("assigning synthetic traffic for '{character}'"))?;
        }
    }
    Ok(())
}

fn emit_report(args: &Args, report: &Report) -> Result<()> {
    match args.report {
        ReportFormat::Console => {
            if args.output.is_some() {
                log::warn!("--output is ignored for console reports; use --report json");
            }
            report.render_console();
            Ok(())
        }
        ReportFormat::Json => {
            let json = report.to_json()?;
            if let Some(path) = &args.output {
                fs::write(path, &json)
                    .with_context(|| format!("writing report to {}", path.display()))?;
                println!("{} {}", "Report written to".green(), path.display());
            } else {
                println!("{json}");
            }
            Ok(())
        }
    }
}
