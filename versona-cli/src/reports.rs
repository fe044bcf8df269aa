use anyhow::Result;
use colored::{ColoredString, Colorize};
use serde::Serialize;
use versona_core::{
    DistributionReport, HealthReport, SimulationReport, VersionConfigRegistry, VersionShare,
};

/// One row of the catalog listing.
#[derive(Debug, Clone, Serialize)]
pub struct CatalogRow {
    pub base_character_id: String,
    pub strategy: String,
    pub default_version_id: String,
    pub available_version_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CatalogReport {
    pub characters: Vec<CatalogRow>,
}

impl CatalogReport {
    #[must_use]
    pub fn from_registry(registry: &VersionConfigRegistry) -> Self {
        let characters = registry
            .iter()
            .map(|config| CatalogRow {
                base_character_id: config.base_character_id.clone(),
                strategy: config.strategy.kind().to_string(),
                default_version_id: config.default_version_id.clone(),
                available_version_ids: config.available_version_ids.to_vec(),
            })
            .collect();
        Self { characters }
    }
}

/// Every report the CLI can emit, in both console and JSON form.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "report", rename_all = "snake_case")]
pub enum Report {
    Distribution(DistributionReport),
    Simulation(SimulationReport),
    Health(HealthReport),
    Catalog(CatalogReport),
}

impl Report {
    /// Serialize the report as pretty-printed JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn render_console(&self) {
        match self {
            Self::Distribution(report) => render_distribution(report),
            Self::Simulation(report) => render_simulation(report),
            Self::Health(report) => render_health(report),
            Self::Catalog(report) => render_catalog(report),
        }
    }
}

fn render_distribution(report: &DistributionReport) {
    println!();
    println!(
        "{} {} ({})",
        "📊 Distribution Test:".bright_cyan().bold(),
        report.base_character_id.bold(),
        report.strategy
    );
    println!("{}", "==============================".cyan());
    println!("Draws: {}", report.draws);
    render_shares(&report.shares);
    println!(
        "Mean absolute deviation: {:.4}",
        report.mean_absolute_deviation
    );
}

fn render_simulation(report: &SimulationReport) {
    println!();
    println!(
        "{} {} ({})",
        "🔁 Assignment Simulation:".bright_cyan().bold(),
        report.base_character_id.bold(),
        report.strategy
    );
    println!("{}", "==============================".cyan());
    println!("Synthetic users: {}", report.users);
    let sticky = if report.sticky_consistent == report.users {
        format!("{}/{}", report.sticky_consistent, report.users).green()
    } else {
        format!("{}/{}", report.sticky_consistent, report.users).red()
    };
    println!("Sticky on repeat lookup: {sticky}");
    render_shares(&report.shares);
    println!(
        "Mean absolute deviation: {:.4}",
        report.mean_absolute_deviation
    );
}

fn render_health(report: &HealthReport) {
    println!();
    println!("{}", "💚 Assignment Health".bright_cyan().bold());
    println!("{}", "==============================".cyan());
    for character in &report.characters {
        println!(
            "  {:20} {:>8} assignments   score {}",
            character.base_character_id.bold(),
            character.assignments,
            score_label(character.score)
        );
    }
    println!();
    println!("Overall health: {}", score_label(report.health_score));
}

fn render_catalog(report: &CatalogReport) {
    println!();
    println!("{}", "📚 Character Catalog".bright_cyan().bold());
    println!("{}", "==============================".cyan());
    for row in &report.characters {
        println!(
            "  {:20} {:10} default={} versions=[{}]",
            row.base_character_id.bold(),
            row.strategy,
            row.default_version_id,
            row.available_version_ids.join(", ")
        );
    }
}

fn render_shares(shares: &[VersionShare]) {
    for share in shares {
        println!(
            "  {:15} {:>8}   actual {:>6.1}%   expected {:>6.1}%   Δ {:.4}",
            share.version_id,
            share.count,
            share.actual_proportion * 100.0,
            share.expected_proportion * 100.0,
            share.deviation
        );
    }
}

fn score_label(score: f64) -> ColoredString {
    let label = format!("{score:.1}");
    if score >= 90.0 {
        label.green()
    } else if score >= 70.0 {
        label.yellow()
    } else {
        label.red()
    }
}
