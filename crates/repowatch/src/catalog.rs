//! Read model over ingested repositories and commits.
//!
//! The catalog answers questions about what has been stored. It is separate
//! from [`crate::position::FetchPositionStore`], which only knows how far each
//! scope has been fetched.

use std::sync::Arc;

use async_trait::async_trait;
use sea_orm::{
    ColumnTrait, DatabaseConnection, DbErr, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder,
    QuerySelect,
};
use thiserror::Error;

use crate::entity::commit::{Column as CommitColumn, Entity as Commit};
use crate::entity::repository::{Column as RepositoryColumn, Entity as Repository};

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Database error: {0}")]
    Database(#[from] DbErr),
}

/// Query side of the stored repositories and commits.
#[async_trait]
pub trait RepositoryCatalog: Send + Sync {
    /// Names of all known repositories, sorted.
    async fn repository_names(&self) -> Result<Vec<String>, CatalogError>;

    async fn repository_count(&self) -> Result<u64, CatalogError>;

    /// Stored commits for one repository.
    async fn commit_count(&self, repository: &str) -> Result<u64, CatalogError>;
}

/// sea-orm backed catalog.
#[derive(Debug, Clone)]
pub struct DbCatalog {
    db: Arc<DatabaseConnection>,
}

impl DbCatalog {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl RepositoryCatalog for DbCatalog {
    async fn repository_names(&self) -> Result<Vec<String>, CatalogError> {
        let names = Repository::find()
            .select_only()
            .column(RepositoryColumn::Name)
            .order_by_asc(RepositoryColumn::Name)
            .into_tuple::<String>()
            .all(self.db.as_ref())
            .await?;
        Ok(names)
    }

    async fn repository_count(&self) -> Result<u64, CatalogError> {
        Ok(Repository::find().count(self.db.as_ref()).await?)
    }

    async fn commit_count(&self, repository: &str) -> Result<u64, CatalogError> {
        Ok(Commit::find()
            .filter(CommitColumn::RepositoryName.eq(repository))
            .count(self.db.as_ref())
            .await?)
    }
}

#[cfg(all(test, feature = "sqlite", feature = "migrate"))]
mod tests {
    use chrono::Utc;
    use sea_orm::Set;
    use uuid::Uuid;

    use crate::connect_and_migrate;
    use crate::entity::commit::ActiveModel as CommitActiveModel;
    use crate::entity::repository::ActiveModel as RepositoryActiveModel;

    use super::*;

    async fn setup_db() -> Arc<DatabaseConnection> {
        Arc::new(
            connect_and_migrate("sqlite::memory:")
                .await
                .expect("test db should migrate"),
        )
    }

    fn repository(name: &str) -> RepositoryActiveModel {
        RepositoryActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(name.to_string()),
            description: Set(None),
            html_url: Set(format!("https://github.test/acme/{name}")),
            language: Set(Some("Rust".to_string())),
            forks_count: Set(0),
            stargazers_count: Set(0),
            open_issues_count: Set(0),
            watchers_count: Set(0),
            created_at: Set(None),
            updated_at: Set(None),
            synced_at: Set(Utc::now().fixed_offset()),
        }
    }

    fn commit(repository: &str, sha: &str) -> CommitActiveModel {
        CommitActiveModel {
            id: Set(Uuid::new_v4()),
            sha: Set(sha.to_string()),
            repository_name: Set(repository.to_string()),
            url: Set(format!("https://api.github.test/commits/{sha}")),
            message: Set("init".to_string()),
            author_name: Set(None),
            authored_at: Set(None),
            committed_at: Set(None),
            synced_at: Set(Utc::now().fixed_offset()),
        }
    }

    #[tokio::test]
    async fn empty_catalog() {
        let catalog = DbCatalog::new(setup_db().await);
        assert!(catalog.repository_names().await.expect("names").is_empty());
        assert_eq!(catalog.repository_count().await.expect("count"), 0);
        assert_eq!(catalog.commit_count("none").await.expect("count"), 0);
    }

    #[tokio::test]
    async fn names_are_sorted_and_commits_counted_per_repository() {
        let db = setup_db().await;
        Repository::insert_many([repository("zeta"), repository("alpha")])
            .exec(db.as_ref())
            .await
            .expect("insert repositories");
        Commit::insert_many([
            commit("alpha", "a1"),
            commit("alpha", "a2"),
            commit("zeta", "z1"),
        ])
        .exec(db.as_ref())
        .await
        .expect("insert commits");

        let catalog = DbCatalog::new(db);
        assert_eq!(
            catalog.repository_names().await.expect("names"),
            ["alpha", "zeta"]
        );
        assert_eq!(catalog.repository_count().await.expect("count"), 2);
        assert_eq!(catalog.commit_count("alpha").await.expect("count"), 2);
        assert_eq!(catalog.commit_count("zeta").await.expect("count"), 1);
    }
}
