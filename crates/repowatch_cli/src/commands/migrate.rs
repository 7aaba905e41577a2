//! `repowatch migrate`: schema management outside the daemon's own startup.

use std::error::Error;

use repowatch::db;
use repowatch::migration::{Migrator, MigratorTrait};

use crate::MigrateAction;

pub(crate) async fn handle_migrate(
    action: MigrateAction,
    database_url: &str,
) -> Result<(), Box<dyn Error>> {
    if let MigrateAction::Fresh { yes: false } = action {
        return Err("`migrate fresh` drops every table including fetch history; pass --yes".into());
    }

    let db = db::connect(database_url).await?;

    match action {
        MigrateAction::Up => {
            let pending = Migrator::get_pending_migrations(&db).await?.len();
            Migrator::up(&db, None).await?;
            println!("Applied {} migration(s).", pending);
        }
        MigrateAction::Down { steps } => {
            Migrator::down(&db, Some(steps)).await?;
            println!("Rolled back {} migration(s).", steps);
        }
        MigrateAction::Status => {
            Migrator::status(&db).await?;
        }
        MigrateAction::Fresh { .. } => {
            Migrator::fresh(&db).await?;
            println!("Schema recreated; every scope will be walked from page 1.");
        }
    }

    Ok(())
}
