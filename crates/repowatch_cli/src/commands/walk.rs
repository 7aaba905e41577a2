//! One-shot walks and repository refreshes.

use std::error::Error;
use std::sync::Arc;

use repowatch::position::DbPositionStore;
use repowatch::source::{CursorDiscipline, FetchScope, PageCursor};
use repowatch::sync::{PaginationWalker, WalkConfig};

use crate::WalkTarget;
use crate::commands::shared::{PublisherSetup, connect_database, github_source, report_ingest};
use crate::config::Config;
use crate::progress::LoggingReporter;

/// Starting cursor for an explicit `--from-page`.
fn start_cursor(discipline: CursorDiscipline, page: u32) -> PageCursor {
    match discipline {
        CursorDiscipline::PageNumber => PageCursor::PageNumber(page),
        CursorDiscipline::Watermark => PageCursor::Watermark { since: None, page },
    }
}

fn target_scope(target: &WalkTarget, config: &Config) -> (FetchScope, WalkConfig) {
    match target {
        WalkTarget::Repos => (FetchScope::Repositories, config.repos_walk_config()),
        WalkTarget::Commits { repository } => (
            FetchScope::commits(repository.as_str()),
            config.commits_walk_config(),
        ),
    }
}

pub(crate) async fn handle_walk(
    target: WalkTarget,
    from_page: Option<u32>,
    config: &Config,
    database_url: &str,
) -> Result<(), Box<dyn Error>> {
    let source = github_source(config)?;
    let db = connect_database(database_url).await?;
    let on_progress = Arc::new(LoggingReporter::new()).as_callback();
    let setup = PublisherSetup::start(config, &db, Some(Arc::clone(&on_progress))).await?;

    let (scope, walk_config) = target_scope(&target, config);
    let walker = PaginationWalker::new(
        source,
        Arc::new(DbPositionStore::new(Arc::clone(&db))),
        Arc::clone(&setup.publisher),
        walk_config,
    )
    .with_progress(on_progress);

    let outcome = match from_page {
        Some(page) => {
            walker
                .walk_from(&scope, start_cursor(walk_config.discipline, page.max(1)))
                .await
        }
        None => walker.walk(&scope).await,
    };
    drop(walker);

    let ingest = setup.finish().await;
    if let Some(result) = &ingest {
        report_ingest(result);
    }

    let summary = outcome?;
    match summary.last_page {
        Some(last_page) => println!(
            "{}: published {} records in {} pages ({}..={})",
            scope, summary.items_total, summary.pages_published, summary.first_page, last_page
        ),
        None => println!("{}: nothing new from page {}", scope, summary.first_page),
    }

    match ingest {
        Some(result) if result.has_errors() => {
            Err(format!("{} envelopes could not be applied", result.failed_count()).into())
        }
        _ => Ok(()),
    }
}

pub(crate) async fn handle_refresh(
    repository: &str,
    config: &Config,
    database_url: &str,
) -> Result<(), Box<dyn Error>> {
    let source = github_source(config)?;
    let db = connect_database(database_url).await?;
    let on_progress = Arc::new(LoggingReporter::new()).as_callback();
    let setup = PublisherSetup::start(config, &db, Some(Arc::clone(&on_progress))).await?;

    let walker = PaginationWalker::new(
        source,
        Arc::new(DbPositionStore::new(Arc::clone(&db))),
        Arc::clone(&setup.publisher),
        config.repos_walk_config(),
    )
    .with_progress(on_progress);

    let outcome = walker.refresh_repository(repository).await;
    drop(walker);
    if let Some(result) = setup.finish().await {
        report_ingest(&result);
    }

    outcome?;
    println!("Published metadata for {}", repository);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_page_follows_the_configured_discipline() {
        assert_eq!(
            start_cursor(CursorDiscipline::PageNumber, 4),
            PageCursor::PageNumber(4)
        );
        assert_eq!(
            start_cursor(CursorDiscipline::Watermark, 2),
            PageCursor::Watermark {
                since: None,
                page: 2
            }
        );
    }

    #[test]
    fn commit_target_uses_the_commits_walk_config() {
        let mut config = Config::default();
        config.sync.commits_cursor = CursorDiscipline::Watermark;

        let (scope, walk_config) = target_scope(
            &WalkTarget::Commits {
                repository: "tracker".to_string(),
            },
            &config,
        );
        assert_eq!(scope, FetchScope::commits("tracker"));
        assert_eq!(walk_config.discipline, CursorDiscipline::Watermark);

        let (scope, walk_config) = target_scope(&WalkTarget::Repos, &config);
        assert_eq!(scope, FetchScope::Repositories);
        assert_eq!(walk_config.discipline, CursorDiscipline::PageNumber);
    }
}
