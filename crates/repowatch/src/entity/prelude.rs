//! Common re-exports for convenient entity usage.

pub use super::commit::{
    ActiveModel as CommitActiveModel, Column as CommitColumn, Entity as Commit,
    Model as CommitModel,
};
pub use super::fetch_history::{
    ActiveModel as FetchHistoryActiveModel, Column as FetchHistoryColumn, Entity as FetchHistory,
    Model as FetchHistoryModel,
};
pub use super::repository::{
    ActiveModel as RepositoryActiveModel, Column as RepositoryColumn, Entity as Repository,
    Model as RepositoryModel,
};
pub use super::scope_kind::ScopeKind;
