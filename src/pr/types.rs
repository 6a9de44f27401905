use serde::Deserialize;

/// Represents the parsed components of a GitHub PR URL.
/// Extracted by parse_pr_url() in pr/mod.rs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrUrl {
    pub owner: String,
    pub repo: String,
    pub pr_number: u64,
}

impl PrUrl {
    /// The "list pull request files" endpoint under `api_base`.
    pub fn files_endpoint(&self, api_base: &str) -> String {
        format!(
            "{}/repos/{}/{}/pulls/{}/files",
            api_base.trim_end_matches('/'),
            self.owner,
            self.repo,
            self.pr_number
        )
    }
}

/// A changed file as reported by the pull request files endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFileEntry {
    /// Repository-relative path (e.g., "src/test/java/com/x/YTest.java")
    pub path: String,
    /// Final path component, the key rows are matched on
    pub short_filename: String,
    /// URL of the contents endpoint for the post-change blob
    pub content_locator: String,
    /// Unified diff hunks; GitHub omits this for binary and pure-rename changes
    pub patch: Option<String>,
}

impl RemoteFileEntry {
    pub fn new(path: impl Into<String>, content_locator: impl Into<String>, patch: Option<String>) -> Self {
        let path = path.into();
        let short_filename = path.rsplit('/').next().unwrap_or(&path).to_string();
        Self {
            path,
            short_filename,
            content_locator: content_locator.into(),
            patch,
        }
    }
}

/// Raw file record from `GET /repos/{owner}/{repo}/pulls/{number}/files`.
#[derive(Debug, Clone, Deserialize)]
pub struct FileRecord {
    pub filename: String,
    pub contents_url: String,
    #[serde(default)]
    pub patch: Option<String>,
}

impl From<FileRecord> for RemoteFileEntry {
    fn from(record: FileRecord) -> Self {
        RemoteFileEntry::new(record.filename, record.contents_url, record.patch)
    }
}

/// Body of `GET {contents_url}`.
#[derive(Debug, Clone, Deserialize)]
pub struct BlobPayload {
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub encoding: String,
}

/// One matched (row, changed file) pair with its fetched content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrievedArtifact {
    /// Index of the originating dataset row
    pub idx: usize,
    pub short_filename: String,
    /// Post-change file content
    pub current_content: String,
    pub patch: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_files_endpoint() {
        let url = PrUrl {
            owner: "org".to_string(),
            repo: "repo".to_string(),
            pr_number: 42,
        };
        assert_eq!(
            url.files_endpoint("https://api.github.com/"),
            "https://api.github.com/repos/org/repo/pulls/42/files"
        );
    }

    #[test]
    fn test_remote_entry_short_filename() {
        let entry = RemoteFileEntry::new("src/test/java/com/x/YTest.java", "u", None);
        assert_eq!(entry.short_filename, "YTest.java");
        let entry = RemoteFileEntry::new("README.md", "u", None);
        assert_eq!(entry.short_filename, "README.md");
    }

    #[test]
    fn test_file_record_without_patch() {
        let json = r#"[
            {"sha": "abc", "filename": "img/logo.png", "status": "modified",
             "contents_url": "https://api.github.com/repos/o/r/contents/img/logo.png?ref=abc"},
            {"filename": "src/A.java", "status": "modified",
             "contents_url": "https://api.github.com/repos/o/r/contents/src/A.java?ref=abc",
             "patch": "@@ -1 +1 @@\n-a\n+b"}
        ]"#;
        let records: Vec<FileRecord> = serde_json::from_str(json).unwrap();
        let entries: Vec<RemoteFileEntry> = records.into_iter().map(Into::into).collect();
        assert!(entries[0].patch.is_none());
        assert_eq!(entries[1].short_filename, "A.java");
        assert_eq!(entries[1].patch.as_deref(), Some("@@ -1 +1 @@\n-a\n+b"));
    }
}
