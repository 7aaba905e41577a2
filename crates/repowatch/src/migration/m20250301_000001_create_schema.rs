//! Initial migration to create the repowatch database schema.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        self.create_repositories(manager).await?;
        self.create_commits(manager).await?;
        self.create_fetch_history(manager).await?;
        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(FetchHistory::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Commits::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Repositories::Table).to_owned())
            .await?;
        Ok(())
    }
}

impl Migration {
    async fn create_repositories(&self, manager: &SchemaManager<'_>) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Repositories::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Repositories::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Repositories::Name).string().not_null())
                    // Content
                    .col(ColumnDef::new(Repositories::Description).text().null())
                    .col(ColumnDef::new(Repositories::HtmlUrl).string().not_null())
                    .col(ColumnDef::new(Repositories::Language).string().null())
                    // Statistics
                    .col(
                        ColumnDef::new(Repositories::ForksCount)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Repositories::StargazersCount)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Repositories::OpenIssuesCount)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Repositories::WatchersCount)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    // Timestamps
                    .col(
                        ColumnDef::new(Repositories::CreatedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Repositories::UpdatedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Repositories::SyncedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_repositories_name")
                    .table(Repositories::Table)
                    .col(Repositories::Name)
                    .unique()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn create_commits(&self, manager: &SchemaManager<'_>) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Commits::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Commits::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(Commits::Sha).string().not_null())
                    .col(ColumnDef::new(Commits::RepositoryName).string().not_null())
                    .col(ColumnDef::new(Commits::Url).string().not_null())
                    .col(ColumnDef::new(Commits::Message).text().not_null())
                    .col(ColumnDef::new(Commits::AuthorName).string().null())
                    .col(
                        ColumnDef::new(Commits::AuthoredAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Commits::CommittedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Commits::SyncedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_commits_sha")
                    .table(Commits::Table)
                    .col(Commits::Sha)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_commits_repository_name")
                    .table(Commits::Table)
                    .col(Commits::RepositoryName)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn create_fetch_history(&self, manager: &SchemaManager<'_>) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(FetchHistory::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(FetchHistory::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(FetchHistory::ScopeKind).string().not_null())
                    .col(
                        ColumnDef::new(FetchHistory::ScopeName)
                            .string()
                            .not_null()
                            .default(""),
                    )
                    .col(ColumnDef::new(FetchHistory::LastPage).integer().not_null())
                    .col(
                        ColumnDef::new(FetchHistory::TotalItemsSeen)
                            .integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(FetchHistory::FetchedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(FetchHistory::RecordedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        // Redelivered envelopes collide here and are dropped
        manager
            .create_index(
                Index::create()
                    .name("idx_fetch_history_page")
                    .table(FetchHistory::Table)
                    .col(FetchHistory::ScopeKind)
                    .col(FetchHistory::ScopeName)
                    .col(FetchHistory::LastPage)
                    .col(FetchHistory::FetchedAt)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_fetch_history_scope_page")
                    .table(FetchHistory::Table)
                    .col(FetchHistory::ScopeKind)
                    .col(FetchHistory::ScopeName)
                    .col((FetchHistory::LastPage, IndexOrder::Desc))
                    .to_owned(),
            )
            .await?;

        Ok(())
    }
}

#[derive(DeriveIden)]
enum Repositories {
    Table,
    Id,
    Name,
    Description,
    HtmlUrl,
    Language,
    ForksCount,
    StargazersCount,
    OpenIssuesCount,
    WatchersCount,
    CreatedAt,
    UpdatedAt,
    SyncedAt,
}

#[derive(DeriveIden)]
enum Commits {
    Table,
    Id,
    Sha,
    RepositoryName,
    Url,
    Message,
    AuthorName,
    AuthoredAt,
    CommittedAt,
    SyncedAt,
}

#[derive(DeriveIden)]
#[sea_orm(iden = "fetch_history")]
enum FetchHistory {
    Table,
    Id,
    ScopeKind,
    ScopeName,
    LastPage,
    TotalItemsSeen,
    FetchedAt,
    RecordedAt,
}
