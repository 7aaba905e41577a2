//! `repowatch status`: fetch positions and stored counts.

use std::error::Error;
use std::sync::Arc;

use clap::ValueEnum;
use repowatch::catalog::{DbCatalog, RepositoryCatalog};
use repowatch::position::{DbPositionStore, FetchPosition};
use repowatch::source::FetchScope;
use serde::Serialize;

use crate::commands::shared::connect_database;

/// Output format for status display.
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub(crate) enum OutputFormat {
    /// Display as a formatted table (default)
    #[default]
    Table,
    /// Display as JSON
    Json,
}

/// One scope's position, for display.
#[derive(Debug, Clone, Serialize, tabled::Tabled)]
pub(crate) struct PositionDisplay {
    #[tabled(rename = "Scope")]
    pub scope: String,
    #[tabled(rename = "Last Page")]
    pub last_page: u32,
    #[tabled(rename = "Last Fetched")]
    pub last_fetched_at: String,
    #[tabled(rename = "Stored")]
    pub stored: u64,
}

impl PositionDisplay {
    fn new(scope: &FetchScope, position: &FetchPosition, stored: u64) -> Self {
        Self {
            scope: scope.to_string(),
            last_page: position.last_page,
            last_fetched_at: position
                .last_fetched_at
                .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
                .unwrap_or_else(|| "never".to_string()),
            stored,
        }
    }
}

#[derive(Debug, Serialize)]
struct StatusReport {
    repositories: u64,
    positions: Vec<PositionDisplay>,
}

fn render(report: &StatusReport, format: OutputFormat) -> Result<String, Box<dyn Error>> {
    match format {
        OutputFormat::Table => {
            let mut table = tabled::Table::new(&report.positions);
            table.with(tabled::settings::Style::rounded());
            Ok(format!("{}\n{} repositories stored", table, report.repositories))
        }
        OutputFormat::Json => Ok(serde_json::to_string_pretty(report)?),
    }
}

pub(crate) async fn handle_status(
    output: OutputFormat,
    database_url: &str,
) -> Result<(), Box<dyn Error>> {
    let db = connect_database(database_url).await?;
    let store = DbPositionStore::new(Arc::clone(&db));
    let catalog = DbCatalog::new(db);

    let repositories = catalog.repository_count().await?;
    let mut positions = Vec::new();
    for (scope, position) in store.positions().await? {
        let stored = match &scope {
            FetchScope::Repositories => repositories,
            FetchScope::Commits { repository } => catalog.commit_count(repository).await?,
        };
        positions.push(PositionDisplay::new(&scope, &position, stored));
    }

    println!(
        "{}",
        render(
            &StatusReport {
                repositories,
                positions,
            },
            output,
        )?
    );
    Ok(())
}
