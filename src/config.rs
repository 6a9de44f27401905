use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid config value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Top-level configuration loaded from .pr-corpus.toml.
///
/// All fields are optional; the tool works with zero config as long as a
/// GitHub token is reachable through the environment or the command line.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub github: GitHubConfig,

    #[serde(default)]
    pub fetch: FetchConfig,

    #[serde(default)]
    pub dataset: DatasetConfig,

    #[serde(default)]
    pub output: OutputConfig,

    #[serde(default)]
    pub patch: PatchConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GitHubConfig {
    /// GitHub API token. If None, falls back to GITHUB_TOKEN env var.
    pub token: Option<String>,
    /// REST API root, without trailing slash.
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    /// Per-request timeout in seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            token: None,
            api_base_url: default_api_base_url(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FetchConfig {
    /// Upper bound on simultaneous GitHub API calls across all pull requests.
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
    /// Deadline for one pull request group (listing plus all content fetches).
    #[serde(default = "default_group_timeout_secs")]
    pub group_timeout_secs: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            max_in_flight: default_max_in_flight(),
            group_timeout_secs: default_group_timeout_secs(),
        }
    }
}

/// Candidate column headers of the input table. The first header present in
/// the file wins.
#[derive(Debug, Clone, Deserialize)]
pub struct DatasetConfig {
    #[serde(default = "default_url_columns")]
    pub url_columns: Vec<String>,
    #[serde(default = "default_identifier_columns")]
    pub identifier_columns: Vec<String>,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            url_columns: default_url_columns(),
            identifier_columns: default_identifier_columns(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    /// Directory holding the current/, original/ and patch/ areas.
    #[serde(default = "default_output_root")]
    pub root: PathBuf,
    /// Where the verified subset of the input table is written.
    #[serde(default = "default_verified_path")]
    pub verified: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            root: default_output_root(),
            verified: default_verified_path(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatchToolKind {
    #[default]
    Builtin,
    System,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PatchConfig {
    #[serde(default)]
    pub tool: PatchToolKind,
    /// Executable used when `tool = "system"`.
    #[serde(default = "default_patch_program")]
    pub program: PathBuf,
}

impl Default for PatchConfig {
    fn default() -> Self {
        Self {
            tool: PatchToolKind::default(),
            program: default_patch_program(),
        }
    }
}

fn default_api_base_url() -> String {
    "https://api.github.com".to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_max_in_flight() -> usize {
    8
}

fn default_group_timeout_secs() -> u64 {
    300
}

fn default_url_columns() -> Vec<String> {
    vec!["PR Link".to_string(), "PR_Link".to_string(), "PRLink".to_string()]
}

fn default_identifier_columns() -> Vec<String> {
    vec![
        "Fully-Qualified Test Name (packageName.ClassName.methodName)".to_string(),
        "Pytest Test Name".to_string(),
        "Pytest_Test_Name".to_string(),
    ]
}

fn default_output_root() -> PathBuf {
    PathBuf::from("corpus")
}

fn default_verified_path() -> PathBuf {
    PathBuf::from("verified.csv")
}

fn default_patch_program() -> PathBuf {
    PathBuf::from("patch")
}

impl Config {
    /// Load configuration from .pr-corpus.toml in the current directory.
    /// Returns default config if the file doesn't exist.
    pub fn load() -> Result<Config, ConfigError> {
        let path = Path::new(".pr-corpus.toml");
        let mut config = if path.exists() {
            Self::load_from(path)?
        } else {
            Config::default()
        };

        if config.github.token.is_none() {
            if let Ok(token) = std::env::var("GITHUB_TOKEN") {
                config.github.token = Some(token);
            }
        }

        Ok(config)
    }

    /// Load from a specific path.
    pub fn load_from(path: &Path) -> Result<Config, ConfigError> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.fetch.max_in_flight == 0 {
            return Err(ConfigError::Invalid {
                field: "fetch.max_in_flight",
                reason: "must be a positive integer".to_string(),
            });
        }
        if self.fetch.group_timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "fetch.group_timeout_secs",
                reason: "must be a positive integer".to_string(),
            });
        }
        if self.dataset.url_columns.is_empty() || self.dataset.identifier_columns.is_empty() {
            return Err(ConfigError::Invalid {
                field: "dataset",
                reason: "at least one url and one identifier column are required".to_string(),
            });
        }
        Ok(())
    }

    /// Resolve the GitHub token: config file value takes precedence,
    /// falls back to GITHUB_TOKEN env var.
    pub fn github_token(&self) -> Option<String> {
        self.github
            .token
            .clone()
            .filter(|t| !t.trim().is_empty())
            .or_else(|| std::env::var("GITHUB_TOKEN").ok())
    }

    pub fn group_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch.group_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.github.request_timeout_secs)
    }
}
