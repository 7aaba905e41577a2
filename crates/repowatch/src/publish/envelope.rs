//! Wire envelope for fetched pages.
//!
//! Consumers deserialize by shape, so the JSON layout here is the contract:
//!
//! ```text
//! {"name":"repos",   "data":{"LastPage":1,"FetchTime":"..","Repos":[..]}}
//! {"name":"commits", "data":{"LastPage":1,"Repository":"x","FetchTime":"..","Commits":[..]}}
//! {"name":"repo",    "data":{<repository fields>,"FetchTime":"..","LastPage":0}}
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::source::{FetchScope, RawRecord};

use super::PublishError;

/// Exchange (topic namespace) all envelopes are published under.
pub const EXCHANGE: &str = "github_api_topics";
/// Routing key for `repos` and `repo` envelopes.
pub const REPOS_TOPIC: &str = "github.REPOS";
/// Routing key for `commits` envelopes.
pub const COMMITS_TOPIC: &str = "github.COMMITS";

/// One page of repositories from the global listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ReposPage {
    pub last_page: u32,
    pub fetch_time: DateTime<Utc>,
    pub repos: Vec<RawRecord>,
}

/// One page of one repository's commits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CommitsPage {
    pub last_page: u32,
    pub repository: String,
    pub fetch_time: DateTime<Utc>,
    pub commits: Vec<RawRecord>,
}

/// A single repository metadata snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepoSnapshot {
    #[serde(flatten)]
    pub record: Map<String, Value>,
    #[serde(rename = "FetchTime")]
    pub fetch_time: DateTime<Utc>,
    #[serde(rename = "LastPage")]
    pub last_page: u32,
}

/// A published message: one fetched page plus its metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "name", content = "data", rename_all = "lowercase")]
pub enum FetchEnvelope {
    Repos(ReposPage),
    Repo(RepoSnapshot),
    Commits(CommitsPage),
}

impl FetchEnvelope {
    /// Envelope for one page of `scope`.
    #[must_use]
    pub fn page(
        scope: &FetchScope,
        last_page: u32,
        fetch_time: DateTime<Utc>,
        items: Vec<RawRecord>,
    ) -> Self {
        match scope {
            FetchScope::Repositories => Self::Repos(ReposPage {
                last_page,
                fetch_time,
                repos: items,
            }),
            FetchScope::Commits { repository } => Self::Commits(CommitsPage {
                last_page,
                repository: repository.clone(),
                fetch_time,
                commits: items,
            }),
        }
    }

    /// Envelope for one repository metadata record.
    ///
    /// The record must be a JSON object; its fields are flattened into `data`.
    pub fn repo(record: RawRecord, fetch_time: DateTime<Utc>) -> Result<Self, PublishError> {
        match record {
            Value::Object(record) => Ok(Self::Repo(RepoSnapshot {
                record,
                fetch_time,
                last_page: 0,
            })),
            other => Err(PublishError::InvalidRecord(format!(
                "repository record must be an object, got {}",
                json_type(&other)
            ))),
        }
    }

    /// The `name` tag.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Repos(_) => "repos",
            Self::Repo(_) => "repo",
            Self::Commits(_) => "commits",
        }
    }

    /// Routing key this envelope is published on.
    #[must_use]
    pub fn topic(&self) -> &'static str {
        match self {
            Self::Repos(_) | Self::Repo(_) => REPOS_TOPIC,
            Self::Commits(_) => COMMITS_TOPIC,
        }
    }

    /// Partition key: the scope name, or the repository name for snapshots.
    #[must_use]
    pub fn key(&self) -> String {
        match self {
            Self::Repos(_) => String::new(),
            Self::Repo(snapshot) => snapshot
                .record
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            Self::Commits(page) => page.repository.clone(),
        }
    }

    /// The scope a paged envelope belongs to. `None` for snapshots.
    #[must_use]
    pub fn scope(&self) -> Option<FetchScope> {
        match self {
            Self::Repos(_) => Some(FetchScope::Repositories),
            Self::Repo(_) => None,
            Self::Commits(page) => Some(FetchScope::commits(page.repository.clone())),
        }
    }

    #[must_use]
    pub fn last_page(&self) -> u32 {
        match self {
            Self::Repos(page) => page.last_page,
            Self::Repo(snapshot) => snapshot.last_page,
            Self::Commits(page) => page.last_page,
        }
    }

    #[must_use]
    pub fn fetch_time(&self) -> DateTime<Utc> {
        match self {
            Self::Repos(page) => page.fetch_time,
            Self::Repo(snapshot) => snapshot.fetch_time,
            Self::Commits(page) => page.fetch_time,
        }
    }

    /// Number of records carried.
    #[must_use]
    pub fn item_count(&self) -> usize {
        match self {
            Self::Repos(page) => page.repos.len(),
            Self::Repo(_) => 1,
            Self::Commits(page) => page.commits.len(),
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, PublishError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(payload: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(payload)
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
