//! Retrieval and reconstruction driver.
//!
//! Rows are grouped by pull request; each group runs as its own task that
//! lists the pull request's files, matches them against the group's rows and
//! fetches the matched contents concurrently. Finished groups are consumed in
//! completion order: every artifact is written out, reverse-patched, and its
//! row index recorded as verified when all of that succeeded. Failures stay
//! inside the row or group that produced them.

pub mod store;
pub mod types;

pub use store::ArtifactStore;
pub use types::{GroupFailure, RowFailure, RunOutcome};

use futures::future::join_all;
use indicatif::ProgressBar;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::{self, JoinSet};
use tracing::{debug, error, info, info_span, instrument, warn, Instrument};

use crate::config::Config;
use crate::dataset::{group_rows, DatasetRow, PullRequestGroup};
use crate::patch::{PatchError, PatchTool, Reconstructor};
use crate::pr::{self, ConcurrencyGate, GitHubApi, PrError, RemoteFileEntry, RetrievedArtifact};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Pr(#[from] PrError),

    #[error("Pull request group timed out after {secs}s")]
    Timeout { secs: u64 },

    #[error("Group task aborted: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("Failed to write artifact: {0}")]
    Io(#[from] std::io::Error),

    #[error("Reconstruction failed: {0}")]
    Patch(#[from] PatchError),
}

/// What one group task hands back to the driver.
#[derive(Debug, Default)]
pub struct GroupRetrieval {
    pub artifacts: Vec<RetrievedArtifact>,
    pub fetch_failures: Vec<RowFailure>,
    pub unmatched_rows: usize,
}

pub struct Pipeline {
    api: Arc<dyn GitHubApi>,
    gate: ConcurrencyGate,
    store: ArtifactStore,
    reconstructor: Reconstructor,
    group_timeout: Duration,
    progress: Option<ProgressBar>,
}

impl Pipeline {
    pub fn new(api: Arc<dyn GitHubApi>, config: &Config) -> Self {
        Self {
            api,
            gate: ConcurrencyGate::new(config.fetch.max_in_flight),
            store: ArtifactStore::new(&config.output.root),
            reconstructor: Reconstructor::new(PatchTool::from(&config.patch)),
            group_timeout: config.group_timeout(),
            progress: None,
        }
    }

    pub fn with_progress(mut self, bar: ProgressBar) -> Self {
        self.progress = Some(bar);
        self
    }

    /// Run every row through the pipeline.
    ///
    /// Only failing to create the output areas aborts the run; everything
    /// else is recorded in the returned [`RunOutcome`].
    #[instrument(skip_all, fields(rows = rows.len(), max_in_flight = self.gate.limit()))]
    pub async fn run(&self, rows: Vec<DatasetRow>) -> Result<RunOutcome, PipelineError> {
        self.store.prepare()?;

        let index: HashMap<usize, DatasetRow> = rows.iter().map(|r| (r.idx, r.clone())).collect();
        let groups = group_rows(rows);
        let mut outcome = RunOutcome {
            groups_scheduled: groups.len(),
            ..RunOutcome::default()
        };
        info!(groups = groups.len(), "scheduling pull request groups");
        if let Some(bar) = &self.progress {
            bar.set_length(groups.len() as u64);
        }

        // Groups are admitted no faster than the gate can serve them, so a
        // group's deadline only runs while it competes with a bounded number
        // of other groups.
        let admission = ConcurrencyGate::new(self.gate.limit());
        let mut tasks = JoinSet::new();
        let mut spawned: HashMap<task::Id, (String, usize)> = HashMap::new();
        for group in groups {
            let api = self.api.clone();
            let gate = self.gate.clone();
            let admission = admission.clone();
            let deadline = self.group_timeout;
            let span = info_span!("group", pr_url = %group.pull_request_url);
            let context = (group.pull_request_url.clone(), group.rows.len());
            let handle = tasks.spawn(
                async move {
                    let result = match admission.acquire().await {
                        Ok(_slot) => match tokio::time::timeout(deadline, retrieve_group(api.as_ref(), &gate, &group)).await {
                            Ok(result) => result,
                            Err(_) => Err(PipelineError::Timeout {
                                secs: deadline.as_secs(),
                            }),
                        },
                        Err(err) => Err(err.into()),
                    };
                    (group.pull_request_url, group.rows.len(), result)
                }
                .instrument(span),
            );
            spawned.insert(handle.id(), context);
        }

        let mut claims = HashMap::new();
        while let Some(joined) = tasks.join_next_with_id().await {
            if let Some(bar) = &self.progress {
                bar.inc(1);
            }
            match joined {
                Ok((_, (_, _, Ok(retrieval)))) => {
                    outcome.unmatched_rows += retrieval.unmatched_rows;
                    outcome.row_failures.extend(retrieval.fetch_failures);
                    for artifact in retrieval.artifacts {
                        self.correlate(&index, &mut claims, artifact, &mut outcome).await;
                    }
                }
                Ok((_, (pull_request_url, rows, Err(err)))) => {
                    error!(pr_url = %pull_request_url, rows, error = %err, "pull request group failed");
                    outcome.group_failures.push(GroupFailure {
                        pull_request_url,
                        rows,
                        reason: err.to_string(),
                    });
                }
                Err(join_err) => {
                    let (pull_request_url, rows) = spawned
                        .remove(&join_err.id())
                        .unwrap_or_else(|| ("<unknown>".to_string(), 0));
                    let err = PipelineError::from(join_err);
                    error!(pr_url = %pull_request_url, rows, error = %err, "pull request group task aborted");
                    outcome.group_failures.push(GroupFailure {
                        pull_request_url,
                        rows,
                        reason: err.to_string(),
                    });
                }
            }
        }

        if let Some(bar) = &self.progress {
            bar.finish_and_clear();
        }
        debug_assert_eq!(self.gate.in_flight(), 0, "gate permits leaked");
        outcome.normalize();
        info!(
            verified = outcome.verified.len(),
            artifacts = outcome.artifacts_written,
            failed_groups = outcome.group_failures.len(),
            failed_rows = outcome.row_failures.len(),
            peak_in_flight = self.gate.peak(),
            "run complete"
        );
        Ok(outcome)
    }

    /// Reunite an artifact with its row by `idx` and persist it.
    ///
    /// `claims` maps each qualified filename to the pull request whose
    /// artifacts occupy it in this run. A row from another pull request that
    /// resolves to the same file is reported instead of overwriting them.
    async fn correlate(
        &self,
        index: &HashMap<usize, DatasetRow>,
        claims: &mut HashMap<String, String>,
        artifact: RetrievedArtifact,
        outcome: &mut RunOutcome,
    ) {
        let Some(row) = index.get(&artifact.idx) else {
            warn!(idx = artifact.idx, "artifact for unknown row dropped");
            return;
        };

        let owner = claims
            .entry(row.qualified_filename.clone())
            .or_insert_with(|| row.pull_request_url.clone());
        if *owner != row.pull_request_url {
            warn!(idx = row.idx, file = %row.qualified_filename, owner = %owner, "file already collected from another pull request");
            outcome.row_failures.push(RowFailure {
                idx: row.idx,
                qualified_filename: row.qualified_filename.clone(),
                reason: format!("already collected from {owner}"),
            });
            return;
        }

        match self.persist(row, &artifact, outcome).await {
            Ok(true) => {
                outcome.verified.insert(row.idx);
            }
            Ok(false) => {
                warn!(idx = row.idx, file = %row.qualified_filename, "no patch for file, original not reconstructed");
                outcome.row_failures.push(RowFailure {
                    idx: row.idx,
                    qualified_filename: row.qualified_filename.clone(),
                    reason: "no patch available".to_string(),
                });
            }
            Err(err) => {
                error!(idx = row.idx, file = %row.qualified_filename, pr_url = %row.pull_request_url, error = %err, "failed to persist artifact");
                outcome.row_failures.push(RowFailure {
                    idx: row.idx,
                    qualified_filename: row.qualified_filename.clone(),
                    reason: err.to_string(),
                });
            }
        }
    }

    /// Write current content and patch, then reconstruct the original by
    /// copying current into the original area and reversing the patch there.
    /// Returns `Ok(false)` when there is no patch to reverse.
    async fn persist(&self, row: &DatasetRow, artifact: &RetrievedArtifact, outcome: &mut RunOutcome) -> Result<bool, PipelineError> {
        let qualified = row.qualified_filename.as_str();
        self.store.write_current(qualified, &artifact.current_content)?;
        outcome.artifacts_written += 1;

        let Some(patch) = artifact.patch.as_deref().filter(|p| !p.trim().is_empty()) else {
            self.store.discard_patch(qualified)?;
            self.store.discard_original(qualified)?;
            return Ok(false);
        };

        let patch_file = self.store.write_patch(qualified, patch)?;
        let working_file = self.store.seed_original(qualified)?;
        if let Err(err) = self.reconstructor.reverse(working_file, patch_file, qualified).await {
            self.store.discard_original(qualified)?;
            return Err(err.into());
        }
        debug!(idx = row.idx, file = qualified, short = %artifact.short_filename, "reconstructed original");
        Ok(true)
    }
}

/// List one pull request's files, match them to the group's rows, and fetch
/// every matched file's content concurrently.
///
/// A listing failure fails the whole group; a fetch failure only costs the
/// row it belongs to.
#[instrument(skip_all, fields(pr_url = %group.pull_request_url, rows = group.rows.len()))]
pub async fn retrieve_group(
    api: &dyn GitHubApi,
    gate: &ConcurrencyGate,
    group: &PullRequestGroup,
) -> Result<GroupRetrieval, PipelineError> {
    let files = pr::list_files(api, gate, &group.pull_request_url).await?;

    let mut retrieval = GroupRetrieval::default();
    let mut matched = Vec::new();
    for row in &group.rows {
        match match_entry(row, &files) {
            Some(entry) => matched.push((row, entry)),
            None => {
                debug!(idx = row.idx, file = %row.short_filename, "file not changed by pull request");
                retrieval.unmatched_rows += 1;
            }
        }
    }

    let fetches = matched.into_iter().map(|(row, entry)| async move {
        let content = pr::fetch_content(api, gate, &entry.content_locator).await;
        (row, entry, content)
    });

    for (row, entry, content) in join_all(fetches).await {
        match content {
            Ok(current_content) => retrieval.artifacts.push(RetrievedArtifact {
                idx: row.idx,
                short_filename: entry.short_filename.clone(),
                current_content,
                patch: entry.patch.clone(),
            }),
            Err(err) => {
                warn!(idx = row.idx, path = %entry.path, error = %err, "skipping file");
                retrieval.fetch_failures.push(RowFailure {
                    idx: row.idx,
                    qualified_filename: row.qualified_filename.clone(),
                    reason: err.to_string(),
                });
            }
        }
    }

    debug!(artifacts = retrieval.artifacts.len(), "group retrieved");
    Ok(retrieval)
}

/// Pick the changed file a row refers to. Matching is by exact short
/// filename; when several changed files share it, the one under the row's
/// package path wins, otherwise the first listed.
fn match_entry<'a>(row: &DatasetRow, files: &'a [RemoteFileEntry]) -> Option<&'a RemoteFileEntry> {
    let candidates: Vec<&RemoteFileEntry> = files
        .iter()
        .filter(|f| f.short_filename == row.short_filename)
        .collect();

    match candidates.as_slice() {
        [] => None,
        [only] => Some(*only),
        [first, ..] => {
            let suffix = if row.package_path.is_empty() {
                row.short_filename.clone()
            } else {
                format!("{}/{}", row.package_path, row.short_filename)
            };
            let chosen = candidates
                .iter()
                .copied()
                .find(|f| f.path == suffix || f.path.ends_with(&format!("/{suffix}")))
                .unwrap_or(*first);
            warn!(
                idx = row.idx,
                file = %row.short_filename,
                candidates = candidates.len(),
                chosen = %chosen.path,
                "several changed files share this name"
            );
            Some(chosen)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pr::{BlobPayload, PrUrl};
    use async_trait::async_trait;
    use base64::Engine as _;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    const PR1: &str = "https://github.com/o/r/pull/1";
    const SCENARIO_PATCH: &str = "@@ -1,2 +1,3 @@\n line1\n+line2\n line3\n";

    /// In-memory GitHub: files per pull request number, blobs per locator.
    #[derive(Default)]
    struct FakeApi {
        files: HashMap<u64, Vec<RemoteFileEntry>>,
        blobs: HashMap<String, BlobPayload>,
        delay: Duration,
        /// Extra listing latency for particular pull requests.
        slow: HashMap<u64, Duration>,
        slow_finished: AtomicBool,
        panic_on: Option<u64>,
        active: AtomicUsize,
        max_active: AtomicUsize,
        calls: AtomicUsize,
    }

    impl FakeApi {
        fn with_file(mut self, pr: u64, path: &str, patch: Option<&str>, content: &str) -> Self {
            let locator = format!("https://api.github.com/repos/o/r/contents/{path}?pr={pr}");
            self.files
                .entry(pr)
                .or_default()
                .push(RemoteFileEntry::new(path, locator.clone(), patch.map(str::to_string)));
            self.blobs.insert(
                locator,
                BlobPayload {
                    content: base64::engine::general_purpose::STANDARD.encode(content),
                    encoding: "base64".to_string(),
                },
            );
            self
        }

        fn with_binary_file(mut self, pr: u64, path: &str) -> Self {
            let locator = format!("https://api.github.com/repos/o/r/contents/{path}?pr={pr}");
            self.files
                .entry(pr)
                .or_default()
                .push(RemoteFileEntry::new(path, locator.clone(), None));
            self.blobs.insert(
                locator,
                BlobPayload {
                    content: base64::engine::general_purpose::STANDARD.encode([0u8, 0xff, 0xfe]),
                    encoding: "base64".to_string(),
                },
            );
            self
        }

        fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }

        fn with_slow_listing(mut self, pr: u64, delay: Duration) -> Self {
            self.slow.insert(pr, delay);
            self
        }

        async fn enter(&self) {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(now, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.active.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl GitHubApi for FakeApi {
        async fn list_files_page(&self, pr: &PrUrl, page: u32) -> Result<Vec<RemoteFileEntry>, PrError> {
            self.enter().await;
            if self.panic_on == Some(pr.pr_number) {
                panic!("listing blew up");
            }
            if let Some(delay) = self.slow.get(&pr.pr_number) {
                tokio::time::sleep(*delay).await;
                self.slow_finished.store(true, Ordering::SeqCst);
            }
            match self.files.get(&pr.pr_number) {
                Some(files) if page == 1 => Ok(files.clone()),
                Some(_) => Ok(Vec::new()),
                None => Err(PrError::Api {
                    status: 404,
                    message: "Not Found".to_string(),
                }),
            }
        }

        async fn fetch_blob(&self, locator: &str) -> Result<BlobPayload, PrError> {
            self.enter().await;
            self.blobs.get(locator).cloned().ok_or(PrError::Api {
                status: 404,
                message: "Not Found".to_string(),
            })
        }
    }

    fn row(idx: usize, url: &str, identifier: &str) -> DatasetRow {
        let names = crate::dataset::resolve::resolve(identifier).unwrap();
        DatasetRow {
            idx,
            pull_request_url: url.to_string(),
            test_identifier: identifier.to_string(),
            short_filename: names.short_filename,
            qualified_filename: names.qualified_filename,
            package_path: names.package_path,
        }
    }

    fn config(root: &std::path::Path, max_in_flight: usize) -> Config {
        let mut config = Config::default();
        config.output.root = root.to_path_buf();
        config.fetch.max_in_flight = max_in_flight;
        config
    }

    fn read(path: std::path::PathBuf) -> String {
        std::fs::read_to_string(path).unwrap()
    }

    #[tokio::test]
    async fn test_scenario_single_row() {
        let dir = tempfile::tempdir().unwrap();
        let api = FakeApi::default().with_file(
            1,
            "src/test/java/com/x/YTest.java",
            Some(SCENARIO_PATCH),
            "line1\nline2\nline3\n",
        );
        let pipeline = Pipeline::new(Arc::new(api), &config(dir.path(), 2));

        let outcome = pipeline.run(vec![row(0, PR1, "com.x.YTest.testZ")]).await.unwrap();

        assert_eq!(outcome.verified.iter().copied().collect::<Vec<_>>(), vec![0]);
        let store = &pipeline.store;
        assert_eq!(read(store.current_path("com.x.YTest.java")), "line1\nline2\nline3\n");
        assert_eq!(read(store.original_path("com.x.YTest.java")), "line1\nline3\n");
        assert_eq!(read(store.patch_path("com.x.YTest.java")), SCENARIO_PATCH);
        assert_eq!(outcome.artifacts_written, 1);
        assert!(outcome.group_failures.is_empty());
        assert_eq!(pipeline.gate.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_rows_sharing_a_pull_request() {
        let dir = tempfile::tempdir().unwrap();
        let api = FakeApi::default()
            .with_file(1, "src/test/java/com/x/ATest.java", Some("@@ -1 +1 @@\n-a\n+A\n"), "A\n")
            .with_file(1, "src/test/java/com/x/BTest.java", Some("@@ -1 +1 @@\n-b\n+B\n"), "B\n")
            .with_file(1, "README.md", Some("@@ -1 +1 @@\n-r\n+R\n"), "R\n");
        let pipeline = Pipeline::new(Arc::new(api), &config(dir.path(), 2));

        let rows = vec![row(3, PR1, "com.x.ATest.t1"), row(7, PR1, "com.x.BTest.t2")];
        let outcome = pipeline.run(rows).await.unwrap();

        assert_eq!(outcome.verified.iter().copied().collect::<Vec<_>>(), vec![3, 7]);
        assert_eq!(read(pipeline.store.original_path("com.x.ATest.java")), "a\n");
        assert_eq!(read(pipeline.store.original_path("com.x.BTest.java")), "b\n");
        assert_eq!(outcome.groups_scheduled, 1);
    }

    #[tokio::test]
    async fn test_duplicate_rows_each_get_an_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let api = Arc::new(FakeApi::default().with_file(
            1,
            "src/test/java/com/x/YTest.java",
            Some(SCENARIO_PATCH),
            "line1\nline2\nline3\n",
        ));
        let group = PullRequestGroup {
            pull_request_url: PR1.to_string(),
            rows: vec![row(0, PR1, "com.x.YTest.testA"), row(5, PR1, "com.x.YTest.testB")],
        };
        let gate = ConcurrencyGate::new(2);

        let retrieval = retrieve_group(api.as_ref(), &gate, &group).await.unwrap();

        let idxs: Vec<usize> = retrieval.artifacts.iter().map(|a| a.idx).collect();
        assert_eq!(idxs, vec![0, 5]);
        assert!(retrieval.artifacts.iter().all(|a| a.short_filename == "YTest.java"));
    }

    #[tokio::test]
    async fn test_failing_group_does_not_affect_others() {
        let dir = tempfile::tempdir().unwrap();
        let api = FakeApi::default().with_file(
            1,
            "src/test/java/com/x/YTest.java",
            Some(SCENARIO_PATCH),
            "line1\nline2\nline3\n",
        );
        let pipeline = Pipeline::new(Arc::new(api), &config(dir.path(), 2));

        let rows = vec![
            row(0, PR1, "com.x.YTest.testZ"),
            row(1, "https://github.com/o/r/pull/2", "com.x.WTest.testQ"),
            row(2, "https://github.com/o/r/issues/3", "com.x.VTest.testQ"),
        ];
        let outcome = pipeline.run(rows).await.unwrap();

        assert_eq!(outcome.verified.iter().copied().collect::<Vec<_>>(), vec![0]);
        assert_eq!(outcome.group_failures.len(), 2);
        // Sorted by URL: ".../issues/3" before ".../pull/2".
        assert!(outcome.group_failures[0].reason.contains("Invalid PR URL"));
        assert!(outcome.group_failures[1].reason.contains("404"));
    }

    #[tokio::test]
    async fn test_fetch_failure_is_isolated_to_its_row() {
        let dir = tempfile::tempdir().unwrap();
        let api = FakeApi::default()
            .with_binary_file(1, "src/test/java/com/x/BinTest.java")
            .with_file(1, "src/test/java/com/x/YTest.java", Some(SCENARIO_PATCH), "line1\nline2\nline3\n");
        let pipeline = Pipeline::new(Arc::new(api), &config(dir.path(), 2));

        let rows = vec![row(0, PR1, "com.x.BinTest.t"), row(1, PR1, "com.x.YTest.t")];
        let outcome = pipeline.run(rows).await.unwrap();

        assert_eq!(outcome.verified.iter().copied().collect::<Vec<_>>(), vec![1]);
        assert_eq!(outcome.row_failures.len(), 1);
        assert_eq!(outcome.row_failures[0].idx, 0);
        assert!(outcome.row_failures[0].reason.contains("decode"));
        assert!(!pipeline.store.current_path("com.x.BinTest.java").exists());
    }

    #[tokio::test]
    async fn test_missing_patch_is_not_verified() {
        let dir = tempfile::tempdir().unwrap();
        let api = FakeApi::default().with_file(1, "src/test/java/com/x/YTest.java", None, "body\n");
        let pipeline = Pipeline::new(Arc::new(api), &config(dir.path(), 2));

        let outcome = pipeline.run(vec![row(0, PR1, "com.x.YTest.t")]).await.unwrap();

        assert!(outcome.verified.is_empty());
        assert_eq!(read(pipeline.store.current_path("com.x.YTest.java")), "body\n");
        assert!(!pipeline.store.original_path("com.x.YTest.java").exists());
        assert_eq!(outcome.row_failures[0].reason, "no patch available");
    }

    #[tokio::test]
    async fn test_missing_patch_clears_earlier_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        store.prepare().unwrap();
        store.write_current("com.x.YTest.java", "old\n").unwrap();
        store.write_patch("com.x.YTest.java", SCENARIO_PATCH).unwrap();
        store.seed_original("com.x.YTest.java").unwrap();

        let api = FakeApi::default().with_file(1, "src/test/java/com/x/YTest.java", None, "body\n");
        let pipeline = Pipeline::new(Arc::new(api), &config(dir.path(), 2));
        let outcome = pipeline.run(vec![row(0, PR1, "com.x.YTest.t")]).await.unwrap();

        assert!(outcome.verified.is_empty());
        assert_eq!(read(store.current_path("com.x.YTest.java")), "body\n");
        assert!(!store.patch_path("com.x.YTest.java").exists());
        assert!(!store.original_path("com.x.YTest.java").exists());
    }

    #[tokio::test]
    async fn test_same_file_from_two_pull_requests_keeps_the_first() {
        let dir = tempfile::tempdir().unwrap();
        let api = FakeApi::default()
            .with_file(1, "src/test/java/com/x/YTest.java", Some(SCENARIO_PATCH), "line1\nline2\nline3\n")
            .with_file(2, "src/test/java/com/x/YTest.java", Some(SCENARIO_PATCH), "unrelated\n")
            .with_slow_listing(2, Duration::from_millis(80));
        let pipeline = Pipeline::new(Arc::new(api), &config(dir.path(), 2));

        let rows = vec![
            row(0, PR1, "com.x.YTest.testZ"),
            row(1, "https://github.com/o/r/pull/2", "com.x.YTest.testW"),
        ];
        let outcome = pipeline.run(rows).await.unwrap();

        assert_eq!(outcome.verified.iter().copied().collect::<Vec<_>>(), vec![0]);
        assert_eq!(read(pipeline.store.current_path("com.x.YTest.java")), "line1\nline2\nline3\n");
        assert_eq!(read(pipeline.store.original_path("com.x.YTest.java")), "line1\nline3\n");
        assert_eq!(outcome.row_failures.len(), 1);
        assert_eq!(outcome.row_failures[0].idx, 1);
        assert!(outcome.row_failures[0].reason.contains("already collected from"));
        assert_eq!(outcome.artifacts_written, 1);
    }

    #[tokio::test]
    async fn test_fast_group_is_written_before_slow_group_finishes() {
        let dir = tempfile::tempdir().unwrap();
        let api = Arc::new(
            FakeApi::default()
                .with_file(1, "src/test/java/com/x/SlowTest.java", Some("@@ -1 +1 @@\n-a\n+b\n"), "b\n")
                .with_file(2, "src/test/java/com/x/FastTest.java", Some("@@ -1 +1 @@\n-c\n+d\n"), "d\n")
                .with_slow_listing(1, Duration::from_millis(500)),
        );
        let pipeline = Pipeline::new(api.clone(), &config(dir.path(), 2));
        let fast_current = pipeline.store.current_path("com.x.FastTest.java");

        let rows = vec![
            row(0, PR1, "com.x.SlowTest.t"),
            row(1, "https://github.com/o/r/pull/2", "com.x.FastTest.t"),
        ];
        let watch = async {
            let started = std::time::Instant::now();
            while !fast_current.exists() && started.elapsed() < Duration::from_secs(5) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            (fast_current.exists(), api.slow_finished.load(Ordering::SeqCst))
        };
        let (outcome, (fast_written, slow_done_then)) = tokio::join!(pipeline.run(rows), watch);

        assert!(fast_written);
        assert!(!slow_done_then);
        assert_eq!(outcome.unwrap().verified.len(), 2);
    }

    #[tokio::test]
    async fn test_panicking_group_keeps_its_context() {
        let dir = tempfile::tempdir().unwrap();
        let api = FakeApi {
            panic_on: Some(2),
            ..FakeApi::default()
        }
        .with_file(1, "src/test/java/com/x/YTest.java", Some(SCENARIO_PATCH), "line1\nline2\nline3\n");
        let pipeline = Pipeline::new(Arc::new(api), &config(dir.path(), 2));

        let rows = vec![
            row(0, PR1, "com.x.YTest.t"),
            row(1, "https://github.com/o/r/pull/2", "com.x.ATest.t"),
            row(2, "https://github.com/o/r/pull/2", "com.x.BTest.t"),
        ];
        let outcome = pipeline.run(rows).await.unwrap();

        assert_eq!(outcome.verified.iter().copied().collect::<Vec<_>>(), vec![0]);
        assert_eq!(outcome.group_failures.len(), 1);
        assert_eq!(outcome.group_failures[0].pull_request_url, "https://github.com/o/r/pull/2");
        assert_eq!(outcome.group_failures[0].rows, 2);
        assert!(outcome.group_failures[0].reason.contains("aborted"));
        assert_eq!(pipeline.gate.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_patch_mismatch_is_reported_per_row() {
        let dir = tempfile::tempdir().unwrap();
        let api = FakeApi::default().with_file(
            1,
            "src/test/java/com/x/YTest.java",
            Some(SCENARIO_PATCH),
            "something else entirely\n",
        );
        let pipeline = Pipeline::new(Arc::new(api), &config(dir.path(), 2));

        let outcome = pipeline.run(vec![row(0, PR1, "com.x.YTest.t")]).await.unwrap();

        assert!(outcome.verified.is_empty());
        assert_eq!(outcome.row_failures.len(), 1);
        assert!(outcome.row_failures[0].reason.contains("Reconstruction failed"));
        assert!(!pipeline.store.original_path("com.x.YTest.java").exists());
        assert!(pipeline.store.current_path("com.x.YTest.java").exists());
    }

    #[tokio::test]
    async fn test_unmatched_rows_are_counted() {
        let dir = tempfile::tempdir().unwrap();
        let api = FakeApi::default().with_file(1, "docs/guide.md", Some("@@ -1 +1 @@\n-a\n+b\n"), "b\n");
        let pipeline = Pipeline::new(Arc::new(api), &config(dir.path(), 2));

        let outcome = pipeline.run(vec![row(0, PR1, "com.x.YTest.t")]).await.unwrap();

        assert!(outcome.verified.is_empty());
        assert_eq!(outcome.unmatched_rows, 1);
        assert!(outcome.group_failures.is_empty());
    }

    #[tokio::test]
    async fn test_in_flight_calls_never_exceed_the_limit() {
        let dir = tempfile::tempdir().unwrap();
        let mut api = FakeApi::default().with_delay(Duration::from_millis(15));
        let mut rows = Vec::new();
        for pr in 1..=6u64 {
            api = api
                .with_file(pr, &format!("src/test/java/p/A{pr}Test.java"), Some("@@ -1 +1 @@\n-a\n+b\n"), "b\n")
                .with_file(pr, &format!("src/test/java/p/B{pr}Test.java"), Some("@@ -1 +1 @@\n-c\n+d\n"), "d\n");
            let url = format!("https://github.com/o/r/pull/{pr}");
            rows.push(row(rows.len(), &url, &format!("p.A{pr}Test.t")));
            rows.push(row(rows.len(), &url, &format!("p.B{pr}Test.t")));
        }
        let api = Arc::new(api);
        let pipeline = Pipeline::new(api.clone(), &config(dir.path(), 2));

        let outcome = pipeline.run(rows).await.unwrap();

        assert_eq!(outcome.verified.len(), 12);
        assert_eq!(api.calls.load(Ordering::SeqCst), 18);
        assert!(api.max_active.load(Ordering::SeqCst) <= 2);
        assert!(pipeline.gate.peak() <= 2);
        assert_eq!(pipeline.gate.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_group_deadline_is_a_group_failure() {
        let dir = tempfile::tempdir().unwrap();
        let api = FakeApi::default()
            .with_file(1, "src/test/java/com/x/YTest.java", Some(SCENARIO_PATCH), "line1\nline2\nline3\n")
            .with_delay(Duration::from_secs(5));
        let mut pipeline = Pipeline::new(Arc::new(api), &config(dir.path(), 2));
        pipeline.group_timeout = Duration::from_millis(30);

        let outcome = pipeline.run(vec![row(0, PR1, "com.x.YTest.t")]).await.unwrap();

        assert!(outcome.verified.is_empty());
        assert_eq!(outcome.group_failures.len(), 1);
        assert!(outcome.group_failures[0].reason.contains("timed out"));
        assert_eq!(pipeline.gate.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_many_groups_through_one_slot_meet_their_deadline() {
        let dir = tempfile::tempdir().unwrap();
        let mut api = FakeApi::default().with_delay(Duration::from_millis(20));
        let mut rows = Vec::new();
        for pr in 1..=10u64 {
            api = api.with_file(pr, &format!("src/test/java/p/A{pr}Test.java"), Some("@@ -1 +1 @@\n-a\n+b\n"), "b\n");
            rows.push(row(rows.len(), &format!("https://github.com/o/r/pull/{pr}"), &format!("p.A{pr}Test.t")));
        }
        let mut pipeline = Pipeline::new(Arc::new(api), &config(dir.path(), 1));
        pipeline.group_timeout = Duration::from_millis(150);

        let outcome = pipeline.run(rows).await.unwrap();

        assert!(outcome.group_failures.is_empty(), "{:?}", outcome.group_failures);
        assert_eq!(outcome.verified.len(), 10);
        assert_eq!(pipeline.gate.peak(), 1);
    }

    #[tokio::test]
    async fn test_rerun_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let api = Arc::new(
            FakeApi::default()
                .with_file(1, "src/test/java/com/x/YTest.java", Some(SCENARIO_PATCH), "line1\nline2\nline3\n")
                .with_file(2, "tests/test_a.py", Some("@@ -1,2 +1,2 @@\n x\n-y\n+z\n"), "x\nz\n"),
        );
        let rows = vec![
            row(0, PR1, "com.x.YTest.testZ"),
            row(1, "https://github.com/o/r/pull/2", "tests/test_a.py::test_b"),
        ];

        let first = Pipeline::new(api.clone(), &config(dir.path(), 2))
            .run(rows.clone())
            .await
            .unwrap();
        let store = ArtifactStore::new(dir.path());
        let snapshot = (
            read(store.original_path("com.x.YTest.java")),
            read(store.original_path("tests.test_a.py")),
        );
        let second = Pipeline::new(api, &config(dir.path(), 2)).run(rows).await.unwrap();

        assert_eq!(first.verified, second.verified);
        assert_eq!(second.verified.len(), 2);
        assert_eq!(snapshot.0, read(store.original_path("com.x.YTest.java")));
        assert_eq!(snapshot.1, "x\ny\n");
        assert_eq!(snapshot.1, read(store.original_path("tests.test_a.py")));
    }

    #[test]
    fn test_match_prefers_package_path() {
        let files = vec![
            RemoteFileEntry::new("module-a/src/test/java/org/a/FooTest.java", "u1", None),
            RemoteFileEntry::new("module-b/src/test/java/org/b/FooTest.java", "u2", None),
        ];
        let chosen = match_entry(&row(0, PR1, "org.b.FooTest.t"), &files).unwrap();
        assert_eq!(chosen.content_locator, "u2");
        let chosen = match_entry(&row(0, PR1, "org.c.FooTest.t"), &files).unwrap();
        assert_eq!(chosen.content_locator, "u1");
    }

    #[test]
    fn test_match_is_exact() {
        let files = vec![RemoteFileEntry::new("src/YTests.java", "u", None)];
        assert!(match_entry(&row(0, PR1, "com.x.YTest.t"), &files).is_none());
    }
}
