use std::collections::BTreeSet;

/// A pull request whose group task produced nothing.
#[derive(Debug, Clone)]
pub struct GroupFailure {
    pub pull_request_url: String,
    pub rows: usize,
    pub reason: String,
}

/// A matched row that did not make it through every stage.
#[derive(Debug, Clone)]
pub struct RowFailure {
    pub idx: usize,
    pub qualified_filename: String,
    pub reason: String,
}

/// Everything a run produced, in deterministic order.
#[derive(Debug, Default)]
pub struct RunOutcome {
    /// Rows for which listing, matching, fetching and reconstruction all succeeded
    pub verified: BTreeSet<usize>,
    pub groups_scheduled: usize,
    pub group_failures: Vec<GroupFailure>,
    /// Artifacts whose current content and patch were written
    pub artifacts_written: usize,
    /// Rows whose file was not among the pull request's changed files
    pub unmatched_rows: usize,
    pub row_failures: Vec<RowFailure>,
}

impl RunOutcome {
    /// Sort failure lists so reruns over the same input compare equal.
    pub fn normalize(&mut self) {
        self.group_failures
            .sort_by(|a, b| a.pull_request_url.cmp(&b.pull_request_url));
        self.row_failures.sort_by_key(|f| f.idx);
    }
}
