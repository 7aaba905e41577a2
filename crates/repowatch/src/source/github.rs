//! GitHub REST implementation of [`PagedSource`].

use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use url::Url;

use super::{FetchScope, Page, PageCursor, PagedSource, RateLimitInfo, RawRecord, SourceError};
use crate::http::reqwest_transport::ReqwestTransport;
use crate::http::{HttpHeaders, HttpRequest, HttpResponse, HttpTransport, header_get};

/// Public GitHub API root.
pub const GITHUB_API_URL: &str = "https://api.github.com";

/// API version pinned through `X-GitHub-Api-Version`.
pub const GITHUB_API_VERSION: &str = "2022-11-28";

/// Per-request transport timeout.
const REQUEST_TIMEOUT: StdDuration = StdDuration::from_secs(30);

/// Fixed date filters applied to commit listings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DateBounds {
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

impl DateBounds {
    /// The `since` to send: the later of the fixed bound and the watermark.
    #[must_use]
    pub fn effective_since(&self, watermark: Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
        match (self.since, watermark) {
            (Some(bound), Some(mark)) => Some(bound.max(mark)),
            (bound, mark) => bound.or(mark),
        }
    }
}

/// GitHub source for one account's repositories and their commits.
#[derive(Clone)]
pub struct GitHubSource {
    transport: Arc<dyn HttpTransport>,
    api_url: String,
    owner: String,
    token: Option<String>,
    bounds: DateBounds,
}

impl GitHubSource {
    /// Create a source backed by reqwest.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let source = GitHubSource::new("octocat", Some(token), DateBounds::default())?;
    /// ```
    pub fn new(
        owner: &str,
        token: Option<String>,
        bounds: DateBounds,
    ) -> Result<Self, SourceError> {
        let transport = ReqwestTransport::with_timeout(REQUEST_TIMEOUT)?;
        Ok(Self::new_with_transport(
            GITHUB_API_URL,
            owner,
            token,
            bounds,
            Arc::new(transport),
        ))
    }

    pub fn new_with_transport(
        api_url: &str,
        owner: &str,
        token: Option<String>,
        bounds: DateBounds,
        transport: Arc<dyn HttpTransport>,
    ) -> Self {
        Self {
            transport,
            api_url: api_url.trim_end_matches('/').to_string(),
            owner: owner.to_string(),
            token: token.filter(|t| !t.is_empty()),
            bounds,
        }
    }

    /// Point the source at a different API root (GitHub Enterprise).
    #[must_use]
    pub fn with_api_url(mut self, api_url: &str) -> Self {
        self.api_url = api_url.trim_end_matches('/').to_string();
        self
    }

    /// The account whose repositories are listed.
    pub fn owner(&self) -> &str {
        &self.owner
    }

    fn headers(&self) -> HttpHeaders {
        let mut headers = vec![
            (
                "Accept".to_string(),
                "application/vnd.github+json".to_string(),
            ),
            (
                "X-GitHub-Api-Version".to_string(),
                GITHUB_API_VERSION.to_string(),
            ),
            ("User-Agent".to_string(), "repowatch".to_string()),
        ];
        if let Some(ref token) = self.token {
            headers.push(("Authorization".to_string(), format!("Bearer {}", token)));
        }
        headers
    }

    fn build_url(&self, path: &str, params: &[(&str, String)]) -> Result<Url, SourceError> {
        let base = format!("{}{}", self.api_url, path);
        Url::parse_with_params(&base, params)
            .map_err(|e| SourceError::InvalidRequest(format!("{}: {}", base, e)))
    }

    /// URL of one page of the owner's repository listing.
    ///
    /// Sorted by creation time ascending so existing page numbers stay put
    /// as new repositories are created.
    pub fn repos_url(&self, page_size: u32, page: u32) -> Result<Url, SourceError> {
        self.build_url(
            &format!("/users/{}/repos", self.owner),
            &[
                ("sort", "created".to_string()),
                ("direction", "asc".to_string()),
                ("per_page", page_size.to_string()),
                ("page", page.to_string()),
            ],
        )
    }

    /// URL of one page of a repository's commit listing.
    pub fn commits_url(
        &self,
        repository: &str,
        page_size: u32,
        cursor: &PageCursor,
    ) -> Result<Url, SourceError> {
        let mut params = vec![
            ("per_page", page_size.to_string()),
            ("page", cursor.page().to_string()),
        ];
        if let Some(since) = self.bounds.effective_since(cursor.since()) {
            params.push(("since", format_timestamp(since)));
        }
        if let Some(until) = self.bounds.until {
            params.push(("until", format_timestamp(until)));
        }
        self.build_url(&format!("/repos/{}/{}/commits", self.owner, repository), &params)
    }

    /// URL of a single repository's metadata.
    pub fn repository_url(&self, repository: &str) -> Result<Url, SourceError> {
        self.build_url(&format!("/repos/{}/{}", self.owner, repository), &[])
    }

    async fn get(&self, url: Url) -> Result<HttpResponse, SourceError> {
        let request = HttpRequest::get(url.as_str(), self.headers());
        let response = self.transport.send(request).await?;

        if let Some(info) = parse_rate_limit_headers(&response.headers) {
            tracing::debug!(
                limit = info.limit,
                remaining = info.remaining,
                reset_at = %info.reset_at,
                "GitHub rate limit"
            );
        }

        Ok(response)
    }

    async fn get_page(&self, url: Url, empty_on_conflict: bool) -> Result<Page, SourceError> {
        let resource = url.path().to_string();
        let response = self.get(url).await?;

        match response.status {
            s if (200..300).contains(&s) => {
                let items: Vec<RawRecord> = serde_json::from_slice(&response.body)?;
                Ok(Page::from(items))
            }
            // GitHub answers 409 for commit listings of an empty repository.
            409 if empty_on_conflict => Ok(Page::default()),
            _ => Err(status_error(&response, &resource)),
        }
    }
}

#[async_trait]
impl PagedSource for GitHubSource {
    async fn fetch_page(
        &self,
        scope: &FetchScope,
        cursor: &PageCursor,
        page_size: u32,
    ) -> Result<Page, SourceError> {
        match scope {
            FetchScope::Repositories => {
                let url = self.repos_url(page_size, cursor.page())?;
                self.get_page(url, false).await
            }
            FetchScope::Commits { repository } => {
                let url = self.commits_url(repository, page_size, cursor)?;
                self.get_page(url, true).await
            }
        }
    }

    async fn fetch_repository(&self, name: &str) -> Result<RawRecord, SourceError> {
        let url = self.repository_url(name)?;
        let resource = url.path().to_string();
        let response = self.get(url).await?;

        if (200..300).contains(&response.status) {
            Ok(serde_json::from_slice(&response.body)?)
        } else {
            Err(status_error(&response, &resource))
        }
    }
}

/// Map a non-success response to a [`SourceError`].
fn status_error(response: &HttpResponse, resource: &str) -> SourceError {
    match response.status {
        401 => SourceError::Auth(response.body_text()),
        403 | 429 => match parse_rate_limit_headers(&response.headers) {
            Some(info) if info.remaining == 0 => SourceError::RateLimited {
                reset_at: info.reset_at,
            },
            _ if response.status == 429 => SourceError::RateLimited {
                reset_at: Utc::now() + chrono::Duration::minutes(1),
            },
            _ => SourceError::Auth(response.body_text()),
        },
        404 => SourceError::NotFound(resource.to_string()),
        status => SourceError::Api {
            status,
            message: response.body_text(),
        },
    }
}

/// Extract rate limit info from GitHub response headers.
pub fn parse_rate_limit_headers(headers: &HttpHeaders) -> Option<RateLimitInfo> {
    let limit = header_get(headers, "x-ratelimit-limit")?
        .parse::<usize>()
        .ok()?;
    let remaining = header_get(headers, "x-ratelimit-remaining")?
        .parse::<usize>()
        .ok()?;
    let reset_epoch = header_get(headers, "x-ratelimit-reset")?
        .parse::<i64>()
        .ok()?;
    let reset_at = DateTime::from_timestamp(reset_epoch, 0).unwrap_or_else(Utc::now);
    Some(RateLimitInfo {
        limit,
        remaining,
        reset_at,
    })
}

fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::MockTransport;
    use chrono::TimeZone;
    use serde_json::json;

    const API: &str = "https://api.github.test";

    fn source(transport: &MockTransport, bounds: DateBounds) -> GitHubSource {
        GitHubSource::new_with_transport(
            API,
            "octocat",
            Some("ghp_test".to_string()),
            bounds,
            Arc::new(transport.clone()),
        )
    }

    fn ts(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
    }

    #[test]
    fn repos_url_sorts_by_creation_ascending() {
        let source = source(&MockTransport::new(), DateBounds::default());
        let url = source.repos_url(100, 3).unwrap();
        assert_eq!(
            url.as_str(),
            "https://api.github.test/users/octocat/repos?sort=created&direction=asc&per_page=100&page=3"
        );
    }

    #[test]
    fn commits_url_applies_bounds_and_watermark() {
        let bounds = DateBounds {
            since: Some(ts(2024, 1, 1)),
            until: Some(ts(2098, 10, 3)),
        };
        let source = source(&MockTransport::new(), bounds);

        let page = source
            .commits_url("tracker", 50, &PageCursor::PageNumber(2))
            .unwrap();
        let query = page.query().unwrap();
        assert!(query.contains("per_page=50&page=2"));
        assert!(query.contains("since=2024-01-01T00%3A00%3A00Z"));
        assert!(query.contains("until=2098-10-03T00%3A00%3A00Z"));

        let watermark = PageCursor::Watermark {
            since: Some(ts(2024, 6, 1)),
            page: 1,
        };
        let url = source.commits_url("tracker", 50, &watermark).unwrap();
        assert!(url.query().unwrap().contains("since=2024-06-01T00%3A00%3A00Z"));
    }

    #[test]
    fn commits_url_without_bounds_omits_date_filters() {
        let source = source(&MockTransport::new(), DateBounds::default());
        let url = source
            .commits_url(
                "tracker",
                10,
                &PageCursor::Watermark {
                    since: None,
                    page: 1,
                },
            )
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://api.github.test/repos/octocat/tracker/commits?per_page=10&page=1"
        );
    }

    #[test]
    fn effective_since_prefers_the_later_timestamp() {
        let bounds = DateBounds {
            since: Some(ts(2024, 1, 1)),
            until: None,
        };
        assert_eq!(
            bounds.effective_since(Some(ts(2023, 1, 1))),
            Some(ts(2024, 1, 1))
        );
        assert_eq!(
            bounds.effective_since(Some(ts(2025, 1, 1))),
            Some(ts(2025, 1, 1))
        );
        assert_eq!(DateBounds::default().effective_since(None), None);
    }

    #[tokio::test]
    async fn fetch_page_returns_records_and_sends_github_headers() {
        let transport = MockTransport::new();
        let source = source(&transport, DateBounds::default());
        let url = source.repos_url(2, 1).unwrap();
        transport.push_json(url.as_str(), json!([{"name": "r1"}, {"name": "r2"}]));

        let page = source
            .fetch_page(&FetchScope::Repositories, &PageCursor::PageNumber(1), 2)
            .await
            .expect("page");
        assert_eq!(page.len(), 2);
        assert_eq!(page.items[0]["name"], "r1");

        let requests = transport.requests();
        assert_eq!(requests.len(), 1);
        let headers = &requests[0].headers;
        assert_eq!(
            header_get(headers, "accept"),
            Some("application/vnd.github+json")
        );
        assert_eq!(header_get(headers, "x-github-api-version"), Some("2022-11-28"));
        assert_eq!(header_get(headers, "authorization"), Some("Bearer ghp_test"));
    }

    #[tokio::test]
    async fn anonymous_source_sends_no_authorization_header() {
        let transport = MockTransport::new();
        let source = GitHubSource::new_with_transport(
            API,
            "octocat",
            Some(String::new()),
            DateBounds::default(),
            Arc::new(transport.clone()),
        );
        let url = source.repos_url(10, 1).unwrap();
        transport.push_json(url.as_str(), json!([]));

        let page = source
            .fetch_page(&FetchScope::Repositories, &PageCursor::PageNumber(1), 10)
            .await
            .expect("page");
        assert!(page.is_empty());
        assert_eq!(header_get(&transport.requests()[0].headers, "authorization"), None);
    }

    #[tokio::test]
    async fn empty_repository_conflict_is_an_empty_commit_page() {
        let transport = MockTransport::new();
        let source = source(&transport, DateBounds::default());
        let cursor = PageCursor::PageNumber(1);
        let url = source.commits_url("empty", 10, &cursor).unwrap();
        transport.push_response(
            url.as_str(),
            HttpResponse {
                status: 409,
                headers: Vec::new(),
                body: br#"{"message":"Git Repository is empty."}"#.to_vec(),
            },
        );

        let page = source
            .fetch_page(&FetchScope::commits("empty"), &cursor, 10)
            .await
            .expect("409 should map to empty page");
        assert!(page.is_empty());
    }

    #[tokio::test]
    async fn exhausted_rate_limit_maps_to_rate_limited() {
        let transport = MockTransport::new();
        let source = source(&transport, DateBounds::default());
        let url = source.repos_url(10, 1).unwrap();
        transport.push_response(
            url.as_str(),
            HttpResponse {
                status: 403,
                headers: vec![
                    ("X-RateLimit-Limit".to_string(), "60".to_string()),
                    ("X-RateLimit-Remaining".to_string(), "0".to_string()),
                    ("X-RateLimit-Reset".to_string(), "1700000000".to_string()),
                ],
                body: br#"{"message":"API rate limit exceeded"}"#.to_vec(),
            },
        );

        let err = source
            .fetch_page(&FetchScope::Repositories, &PageCursor::PageNumber(1), 10)
            .await
            .expect_err("rate limited");
        match err {
            SourceError::RateLimited { reset_at } => {
                assert_eq!(reset_at.timestamp(), 1_700_000_000);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn server_error_and_bad_json_are_errors() {
        let transport = MockTransport::new();
        let source = source(&transport, DateBounds::default());
        let url = source.repos_url(10, 1).unwrap();
        transport.push_response(
            url.as_str(),
            HttpResponse {
                status: 502,
                headers: Vec::new(),
                body: b"bad gateway".to_vec(),
            },
        );
        transport.push_response(
            url.as_str(),
            HttpResponse {
                status: 200,
                headers: Vec::new(),
                body: b"{not json".to_vec(),
            },
        );

        let cursor = PageCursor::PageNumber(1);
        let first = source
            .fetch_page(&FetchScope::Repositories, &cursor, 10)
            .await
            .expect_err("502");
        assert!(matches!(first, SourceError::Api { status: 502, .. }));

        let second = source
            .fetch_page(&FetchScope::Repositories, &cursor, 10)
            .await
            .expect_err("bad json");
        assert!(matches!(second, SourceError::Json(_)));
    }

    #[tokio::test]
    async fn fetch_repository_returns_the_record_or_not_found() {
        let transport = MockTransport::new();
        let source = source(&transport, DateBounds::default());
        let url = source.repository_url("tracker").unwrap();
        transport.push_json(url.as_str(), json!({"name": "tracker", "stargazers_count": 3}));
        transport.push_response(
            url.as_str(),
            HttpResponse {
                status: 404,
                headers: Vec::new(),
                body: Vec::new(),
            },
        );

        let record = source.fetch_repository("tracker").await.expect("record");
        assert_eq!(record["stargazers_count"], 3);

        let err = source
            .fetch_repository("tracker")
            .await
            .expect_err("missing");
        assert!(matches!(err, SourceError::NotFound(path) if path == "/repos/octocat/tracker"));
    }

    #[test]
    fn parse_rate_limit_headers_requires_all_three() {
        let headers: HttpHeaders = vec![
            ("x-ratelimit-limit".to_string(), "5000".to_string()),
            ("x-ratelimit-remaining".to_string(), "4999".to_string()),
        ];
        assert!(parse_rate_limit_headers(&headers).is_none());
    }
}
