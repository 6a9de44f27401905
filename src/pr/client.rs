//! GitHub REST transport.
//!
//! [`GitHubApi`] is the seam between the pipeline and the network: the
//! reqwest-backed [`GitHubClient`] talks to api.github.com, tests substitute
//! an in-memory implementation. Callers hold a gate permit around every call.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, ACCEPT, RETRY_AFTER};
use tracing::{debug, instrument};

use super::types::{BlobPayload, FileRecord, PrUrl, RemoteFileEntry};
use super::PrError;

/// Page size requested from the files endpoint (the API maximum).
pub const FILES_PER_PAGE: usize = 100;

const GITHUB_JSON: &str = "application/vnd.github.v3+json";

#[async_trait]
pub trait GitHubApi: Send + Sync {
    /// One page (1-based) of the files changed by a pull request.
    async fn list_files_page(&self, pr: &PrUrl, page: u32) -> Result<Vec<RemoteFileEntry>, PrError>;

    /// The contents payload behind a `contents_url`.
    async fn fetch_blob(&self, locator: &str) -> Result<BlobPayload, PrError>;
}

/// Connection-pooling client shared by every task of a run.
pub struct GitHubClient {
    http: reqwest::Client,
    token: String,
    api_base: String,
}

impl GitHubClient {
    pub fn new(token: String, api_base: &str, timeout: std::time::Duration) -> Result<Self, PrError> {
        let http = reqwest::Client::builder()
            .user_agent("pr-corpus")
            .timeout(timeout)
            .build()?;
        Ok(Self {
            http,
            token,
            api_base: api_base.trim_end_matches('/').to_string(),
        })
    }

    async fn get(&self, url: &str) -> Result<reqwest::Response, PrError> {
        let response = self
            .http
            .get(url)
            .bearer_auth(&self.token)
            .header(ACCEPT, GITHUB_JSON)
            .send()
            .await?;
        check_response(response).await
    }
}

#[async_trait]
impl GitHubApi for GitHubClient {
    #[instrument(skip(self), fields(owner = %pr.owner, repo = %pr.repo, pr = pr.pr_number))]
    async fn list_files_page(&self, pr: &PrUrl, page: u32) -> Result<Vec<RemoteFileEntry>, PrError> {
        let url = format!(
            "{}?per_page={FILES_PER_PAGE}&page={page}",
            pr.files_endpoint(&self.api_base)
        );
        debug!(%url, "listing pull request files");
        let records = self.get(&url).await?.json::<Vec<FileRecord>>().await?;
        debug!(files = records.len(), "received file list page");
        Ok(records.into_iter().map(RemoteFileEntry::from).collect())
    }

    #[instrument(skip(self))]
    async fn fetch_blob(&self, locator: &str) -> Result<BlobPayload, PrError> {
        let payload = self.get(locator).await?.json::<BlobPayload>().await?;
        debug!(encoded_bytes = payload.content.len(), encoding = %payload.encoding, "received blob");
        Ok(payload)
    }
}

/// Map non-success responses onto [`PrError`].
///
/// - **429**, or **403** with `x-ratelimit-remaining: 0` → [`PrError::RateLimited`]
///   (`Retry-After` in seconds, 60 s when absent or unparseable)
/// - any other non-success status → [`PrError::Api`] with the response body
pub async fn check_response(resp: reqwest::Response) -> Result<reqwest::Response, PrError> {
    let status = resp.status();
    if status == 429 || (status == 403 && rate_limit_exhausted(resp.headers())) {
        return Err(PrError::RateLimited {
            retry_after_secs: parse_retry_after(resp.headers()),
        });
    }
    if !status.is_success() {
        return Err(PrError::Api {
            status: status.as_u16(),
            message: resp.text().await.unwrap_or_default(),
        });
    }
    Ok(resp)
}

fn rate_limit_exhausted(headers: &HeaderMap) -> bool {
    headers
        .get("x-ratelimit-remaining")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.trim() == "0")
}

fn parse_retry_after(headers: &HeaderMap) -> u64 {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(60)
}
