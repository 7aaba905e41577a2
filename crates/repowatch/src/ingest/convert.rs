//! Normalisation of raw upstream records into entity models.
//!
//! Upstream fields are loosely typed: `description` may be a string, `null`
//! or something else entirely, counts may be missing. Anything that is not
//! the expected shape is dropped rather than rejected; only the natural key
//! is required.

use chrono::{DateTime, FixedOffset, Utc};
use sea_orm::Set;
use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

use crate::entity::commit::ActiveModel as CommitActiveModel;
use crate::entity::repository::ActiveModel as RepositoryActiveModel;
use crate::source::RawRecord;

use super::IngestError;

#[derive(Debug, Deserialize)]
struct RepositoryRecord {
    name: String,
    #[serde(default)]
    description: Value,
    #[serde(default)]
    html_url: Option<String>,
    #[serde(default)]
    language: Value,
    #[serde(default)]
    forks_count: Option<i64>,
    #[serde(default)]
    stargazers_count: Option<i64>,
    #[serde(default)]
    open_issues_count: Option<i64>,
    #[serde(default)]
    watchers_count: Option<i64>,
    #[serde(default)]
    created_at: Value,
    #[serde(default)]
    updated_at: Value,
}

#[derive(Debug, Deserialize)]
struct CommitRecord {
    sha: String,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    commit: CommitDetail,
}

#[derive(Debug, Default, Deserialize)]
struct CommitDetail {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    author: Option<Signature>,
    #[serde(default)]
    committer: Option<Signature>,
}

#[derive(Debug, Default, Deserialize)]
struct Signature {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    date: Value,
}

fn string_or_none(value: &Value) -> Option<String> {
    value.as_str().map(str::to_string)
}

/// Parse an RFC 3339 timestamp; anything else is `None`.
fn timestamp(value: &Value) -> Option<DateTime<FixedOffset>> {
    value
        .as_str()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|t| t.with_timezone(&Utc).fixed_offset())
}

fn count(value: Option<i64>) -> i32 {
    value
        .map(|v| v.clamp(0, i64::from(i32::MAX)) as i32)
        .unwrap_or(0)
}

/// Convert one raw repository record.
pub fn repository_model(
    record: &RawRecord,
    synced_at: DateTime<Utc>,
) -> Result<RepositoryActiveModel, IngestError> {
    let repo: RepositoryRecord = serde_json::from_value(record.clone())
        .map_err(|e| IngestError::InvalidRecord(format!("repository: {e}")))?;

    Ok(RepositoryActiveModel {
        id: Set(Uuid::new_v4()),
        name: Set(repo.name),
        description: Set(string_or_none(&repo.description)),
        html_url: Set(repo.html_url.unwrap_or_default()),
        language: Set(string_or_none(&repo.language)),
        forks_count: Set(count(repo.forks_count)),
        stargazers_count: Set(count(repo.stargazers_count)),
        open_issues_count: Set(count(repo.open_issues_count)),
        watchers_count: Set(count(repo.watchers_count)),
        created_at: Set(timestamp(&repo.created_at)),
        updated_at: Set(timestamp(&repo.updated_at)),
        synced_at: Set(synced_at.fixed_offset()),
    })
}

/// Convert one raw commit record fetched for `repository`.
///
/// The author date is when the change was written; the committer date is
/// when it landed.
pub fn commit_model(
    record: &RawRecord,
    repository: &str,
    synced_at: DateTime<Utc>,
) -> Result<CommitActiveModel, IngestError> {
    let commit: CommitRecord = serde_json::from_value(record.clone())
        .map_err(|e| IngestError::InvalidRecord(format!("commit: {e}")))?;

    let author = commit.commit.author.unwrap_or_default();
    let committer = commit.commit.committer.unwrap_or_default();

    Ok(CommitActiveModel {
        id: Set(Uuid::new_v4()),
        sha: Set(commit.sha),
        repository_name: Set(repository.to_string()),
        url: Set(commit.url.unwrap_or_default()),
        message: Set(commit.commit.message.unwrap_or_default()),
        author_name: Set(author.name),
        authored_at: Set(timestamp(&author.date)),
        committed_at: Set(timestamp(&committer.date)),
        synced_at: Set(synced_at.fixed_offset()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use sea_orm::ActiveValue;
    use serde_json::json;

    fn value<T: Clone + Into<sea_orm::Value>>(v: &ActiveValue<T>) -> T {
        match v {
            ActiveValue::Set(t) | ActiveValue::Unchanged(t) => t.clone(),
            ActiveValue::NotSet => panic!("value not set"),
        }
    }

    #[test]
    fn repository_fields_are_normalised() {
        let now = Utc::now();
        let model = repository_model(
            &json!({
                "name": "tracker",
                "description": {"unexpected": true},
                "html_url": "https://github.test/acme/tracker",
                "language": null,
                "forks_count": 4,
                "stargazers_count": 10,
                "created_at": "2020-01-02T03:04:05Z",
                "updated_at": "not a date"
            }),
            now,
        )
        .expect("convert");

        assert_eq!(value(&model.name), "tracker");
        assert_eq!(value(&model.description), None);
        assert_eq!(value(&model.language), None);
        assert_eq!(value(&model.forks_count), 4);
        assert_eq!(value(&model.stargazers_count), 10);
        assert_eq!(value(&model.open_issues_count), 0);
        assert_eq!(
            value(&model.created_at),
            Some(Utc.with_ymd_and_hms(2020, 1, 2, 3, 4, 5).unwrap().fixed_offset())
        );
        assert_eq!(value(&model.updated_at), None);
    }

    #[test]
    fn string_description_is_kept() {
        let model = repository_model(
            &json!({"name": "tracker", "description": "Issue tracker"}),
            Utc::now(),
        )
        .expect("convert");
        assert_eq!(value(&model.description), Some("Issue tracker".to_string()));
    }

    #[test]
    fn repository_without_name_is_rejected() {
        let err = repository_model(&json!({"description": "x"}), Utc::now()).unwrap_err();
        assert!(matches!(err, IngestError::InvalidRecord(_)));
    }

    #[test]
    fn commit_dates_map_to_author_and_committer() {
        let model = commit_model(
            &json!({
                "sha": "abc123",
                "url": "https://api.github.test/repos/acme/tracker/commits/abc123",
                "commit": {
                    "message": "Fix the thing",
                    "author": {"name": "Ada", "date": "2024-01-01T10:00:00Z"},
                    "committer": {"name": "Bot", "date": "2024-01-02T10:00:00+02:00"}
                }
            }),
            "tracker",
            Utc::now(),
        )
        .expect("convert");

        assert_eq!(value(&model.sha), "abc123");
        assert_eq!(value(&model.repository_name), "tracker");
        assert_eq!(value(&model.message), "Fix the thing");
        assert_eq!(value(&model.author_name), Some("Ada".to_string()));
        assert_eq!(
            value(&model.authored_at),
            Some(Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap().fixed_offset())
        );
        assert_eq!(
            value(&model.committed_at),
            Some(Utc.with_ymd_and_hms(2024, 1, 2, 8, 0, 0).unwrap().fixed_offset())
        );
    }

    #[test]
    fn commit_with_missing_detail_still_converts() {
        let model = commit_model(&json!({"sha": "def456"}), "tracker", Utc::now())
            .expect("convert");
        assert_eq!(value(&model.message), "");
        assert_eq!(value(&model.author_name), None);
        assert_eq!(value(&model.committed_at), None);
    }
}
