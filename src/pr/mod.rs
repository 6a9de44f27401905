pub mod client;
pub mod gate;
pub mod types;

pub use client::{GitHubApi, GitHubClient};
pub use gate::ConcurrencyGate;
pub use types::{BlobPayload, PrUrl, RemoteFileEntry, RetrievedArtifact};

use base64::Engine as _;
use thiserror::Error;
use tracing::{debug, instrument, warn};

use client::FILES_PER_PAGE;

/// The files endpoint stops paginating at 3000 entries.
const MAX_FILE_PAGES: u32 = 30;

#[derive(Debug, Error)]
pub enum PrError {
    #[error("GitHub API request failed: {0}")]
    ApiRequest(#[from] reqwest::Error),

    #[error("GitHub API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("GitHub API rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Invalid PR URL: {0}")]
    InvalidUrl(String),

    #[error("Failed to decode file content: {0}")]
    Decode(String),

    #[error("GitHub token not found in config or environment")]
    MissingToken,

    #[error("Request gate closed")]
    GateClosed,
}

/// Parse a GitHub PR URL into its component parts.
///
/// Expected format: https://github.com/{owner}/{repo}/pull/{number}
pub fn parse_pr_url(url: &str) -> Result<PrUrl, PrError> {
    let invalid = || PrError::InvalidUrl(url.to_string());
    let parsed = reqwest::Url::parse(url.trim()).map_err(|_| invalid())?;

    if parsed.scheme() != "https" || parsed.host_str() != Some("github.com") {
        return Err(invalid());
    }
    if parsed.query().is_some() || parsed.fragment().is_some() {
        return Err(invalid());
    }

    let segments: Vec<_> = parsed
        .path_segments()
        .ok_or_else(invalid)?
        .filter(|segment| !segment.is_empty())
        .collect();

    if segments.len() != 4 || segments[2] != "pull" {
        return Err(invalid());
    }

    let pr_number = segments[3].parse::<u64>().map_err(|_| invalid())?;

    Ok(PrUrl {
        owner: segments[0].to_string(),
        repo: segments[1].to_string(),
        pr_number,
    })
}

/// List every file changed by a pull request.
///
/// Each page is its own gated request; listing stops at the first short page.
#[instrument(skip(api, gate))]
pub async fn list_files(
    api: &dyn GitHubApi,
    gate: &ConcurrencyGate,
    pr_url: &str,
) -> Result<Vec<RemoteFileEntry>, PrError> {
    let parsed = parse_pr_url(pr_url)?;
    let mut files = Vec::new();

    for page in 1..=MAX_FILE_PAGES {
        let batch = {
            let _permit = gate.acquire().await?;
            api.list_files_page(&parsed, page).await?
        };
        let last = batch.len() < FILES_PER_PAGE;
        files.extend(batch);
        if last {
            break;
        }
        if page == MAX_FILE_PAGES {
            warn!(files = files.len(), "file list truncated by the API");
        }
    }

    debug!(files = files.len(), "listed pull request files");
    Ok(files)
}

/// Fetch and decode the post-change content behind a contents URL.
#[instrument(skip(api, gate))]
pub async fn fetch_content(
    api: &dyn GitHubApi,
    gate: &ConcurrencyGate,
    locator: &str,
) -> Result<String, PrError> {
    let payload = {
        let _permit = gate.acquire().await?;
        api.fetch_blob(locator).await?
    };
    decode_blob(&payload)
}

/// Decode a contents payload: base64 (GitHub wraps it at 60 columns) holding
/// UTF-8 text.
pub fn decode_blob(payload: &BlobPayload) -> Result<String, PrError> {
    if payload.encoding != "base64" {
        return Err(PrError::Decode(format!(
            "unsupported encoding {:?}",
            payload.encoding
        )));
    }
    let compact: String = payload
        .content
        .chars()
        .filter(|c| !c.is_ascii_whitespace())
        .collect();
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(compact)
        .map_err(|e| PrError::Decode(format!("base64 decode failed: {e}")))?;
    String::from_utf8(bytes).map_err(|e| PrError::Decode(format!("content is not UTF-8 text: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[test]
    fn test_parse_valid_pr_url() {
        let url = parse_pr_url("https://github.com/org/repo/pull/42").unwrap();
        assert_eq!(url.owner, "org");
        assert_eq!(url.repo, "repo");
        assert_eq!(url.pr_number, 42);
    }

    #[test]
    fn test_parse_pr_url_trailing_slash() {
        let url = parse_pr_url("https://github.com/org/repo/pull/7/").unwrap();
        assert_eq!(url.pr_number, 7);
    }

    #[test]
    fn test_parse_invalid_pr_url() {
        assert!(parse_pr_url("https://example.com").is_err());
        assert!(parse_pr_url("not-a-url").is_err());
        assert!(parse_pr_url("https://github.com/org/repo/pulls/42").is_err());
        assert!(parse_pr_url("https://github.com/org/repo/pull/42/files").is_err());
        assert!(parse_pr_url("https://github.com/org/repo/pull/abc").is_err());
        assert!(parse_pr_url("https://gitlab.com/org/repo/pull/42").is_err());
        assert!(parse_pr_url("http://github.com/org/repo/pull/42").is_err());
    }

    fn encode(text: &str) -> String {
        base64::engine::general_purpose::STANDARD.encode(text)
    }

    #[test]
    fn test_decode_blob_wrapped() {
        let encoded = encode("line1\nline2\nline3\n");
        let (head, tail) = encoded.split_at(8);
        let payload = BlobPayload {
            content: format!("{head}\n{tail}\n"),
            encoding: "base64".to_string(),
        };
        assert_eq!(decode_blob(&payload).unwrap(), "line1\nline2\nline3\n");
    }

    #[test]
    fn test_decode_blob_rejects_binary() {
        let payload = BlobPayload {
            content: base64::engine::general_purpose::STANDARD.encode([0xff, 0xfe, 0x00, 0x80]),
            encoding: "base64".to_string(),
        };
        assert!(matches!(decode_blob(&payload), Err(PrError::Decode(_))));
    }

    #[test]
    fn test_decode_blob_rejects_bad_base64() {
        let payload = BlobPayload {
            content: "!!!not base64!!!".to_string(),
            encoding: "base64".to_string(),
        };
        assert!(matches!(decode_blob(&payload), Err(PrError::Decode(_))));
    }

    #[test]
    fn test_decode_blob_rejects_unencoded_large_file() {
        let payload = BlobPayload {
            content: String::new(),
            encoding: "none".to_string(),
        };
        assert!(matches!(decode_blob(&payload), Err(PrError::Decode(_))));
    }

    /// Serves `total` synthetic files, paged like the real endpoint.
    struct PagedApi {
        total: usize,
        pages_requested: Mutex<Vec<u32>>,
    }

    #[async_trait]
    impl GitHubApi for PagedApi {
        async fn list_files_page(&self, _pr: &PrUrl, page: u32) -> Result<Vec<RemoteFileEntry>, PrError> {
            self.pages_requested.lock().unwrap().push(page);
            let start = (page as usize - 1) * FILES_PER_PAGE;
            let end = (start + FILES_PER_PAGE).min(self.total);
            Ok((start..end)
                .map(|i| RemoteFileEntry::new(format!("src/F{i}.java"), format!("u{i}"), None))
                .collect())
        }

        async fn fetch_blob(&self, _locator: &str) -> Result<BlobPayload, PrError> {
            Ok(BlobPayload {
                content: encode("x"),
                encoding: "base64".to_string(),
            })
        }
    }

    #[tokio::test]
    async fn test_list_files_follows_pages() {
        let api = PagedApi {
            total: 230,
            pages_requested: Mutex::new(Vec::new()),
        };
        let gate = ConcurrencyGate::new(1);
        let files = list_files(&api, &gate, "https://github.com/o/r/pull/1").await.unwrap();
        assert_eq!(files.len(), 230);
        assert_eq!(*api.pages_requested.lock().unwrap(), vec![1, 2, 3]);
        assert_eq!(gate.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_list_files_exact_page_boundary() {
        let api = PagedApi {
            total: 100,
            pages_requested: Mutex::new(Vec::new()),
        };
        let gate = ConcurrencyGate::new(1);
        let files = list_files(&api, &gate, "https://github.com/o/r/pull/1").await.unwrap();
        assert_eq!(files.len(), 100);
        assert_eq!(*api.pages_requested.lock().unwrap(), vec![1, 2]);
    }

    #[tokio::test]
    async fn test_list_files_malformed_url_makes_no_request() {
        let api = PagedApi {
            total: 1,
            pages_requested: Mutex::new(Vec::new()),
        };
        let gate = ConcurrencyGate::new(1);
        let err = list_files(&api, &gate, "https://github.com/o/r/issues/1").await.unwrap_err();
        assert!(matches!(err, PrError::InvalidUrl(_)));
        assert!(api.pages_requested.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_fetch_content_decodes() {
        let api = PagedApi {
            total: 0,
            pages_requested: Mutex::new(Vec::new()),
        };
        let gate = ConcurrencyGate::new(1);
        assert_eq!(fetch_content(&api, &gate, "u0").await.unwrap(), "x");
    }
}
