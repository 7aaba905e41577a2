//! `repowatch run`: both schedulers until Ctrl+C.

use std::error::Error;
use std::sync::Arc;

use repowatch::catalog::DbCatalog;
use repowatch::position::DbPositionStore;
use repowatch::sync::{CatalogScopes, PaginationWalker, Scheduler, StaticScopes};
use tokio::sync::watch;

use crate::commands::shared::{PublisherSetup, connect_database, github_source, report_ingest};
use crate::config::Config;
use crate::progress::LoggingReporter;

pub(crate) async fn handle_run(
    config: &Config,
    database_url: &str,
    shutdown: watch::Receiver<bool>,
) -> Result<(), Box<dyn Error>> {
    let source = github_source(config)?;
    let db = connect_database(database_url).await?;
    let on_progress = Arc::new(LoggingReporter::new()).as_callback();
    let setup = PublisherSetup::start(config, &db, Some(Arc::clone(&on_progress))).await?;

    let store = Arc::new(DbPositionStore::new(Arc::clone(&db)));
    let catalog = Arc::new(DbCatalog::new(Arc::clone(&db)));

    let repos = Scheduler::new(
        "repos",
        PaginationWalker::new(
            Arc::clone(&source),
            Arc::clone(&store),
            Arc::clone(&setup.publisher),
            config.repos_walk_config(),
        )
        .with_progress(Arc::clone(&on_progress)),
        Arc::new(StaticScopes::repositories()),
        config.repos_schedule(),
    )
    .with_progress(Arc::clone(&on_progress));

    let commits = Scheduler::new(
        "commits",
        PaginationWalker::new(
            source,
            store,
            Arc::clone(&setup.publisher),
            config.commits_walk_config(),
        )
        .with_progress(Arc::clone(&on_progress)),
        Arc::new(CatalogScopes::new(catalog)),
        config.commits_schedule(),
    )
    .with_progress(on_progress);

    tracing::info!(
        owner = config.github.owner.as_deref().unwrap_or_default(),
        repos_every = ?config.repos_schedule().interval,
        commits_every = ?config.commits_schedule().interval,
        "Watching"
    );

    tokio::join!(repos.run(shutdown.clone()), commits.run(shutdown));

    drop(repos);
    drop(commits);
    if let Some(result) = setup.finish().await {
        report_ingest(&result);
    }
    tracing::info!("Stopped");
    Ok(())
}
