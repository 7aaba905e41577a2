//! SeaORM entity definitions for the repowatch database schema.

pub mod commit;
pub mod fetch_history;
pub mod prelude;
pub mod repository;
pub mod scope_kind;
