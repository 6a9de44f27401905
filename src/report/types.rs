/// How much of the input made it into the corpus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Coverage {
    /// Every scheduled row was verified
    Complete,
    /// Some rows were verified
    Partial,
    /// Nothing was verified
    Empty,
}

impl std::fmt::Display for Coverage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Coverage::Complete => write!(f, "COMPLETE"),
            Coverage::Partial => write!(f, "PARTIAL"),
            Coverage::Empty => write!(f, "EMPTY"),
        }
    }
}

/// A single skipped unit, either a pull request or a row.
#[derive(Debug, Clone)]
pub struct Failure {
    /// Pull request URL or qualified filename
    pub subject: String,
    /// Dataset row, when the failure belongs to one
    pub idx: Option<usize>,
    pub reason: String,
}

/// Summary of one corpus run.
#[derive(Debug)]
pub struct RunReport {
    /// Rows in the input table
    pub input_rows: usize,
    /// Rows without a pull request link
    pub missing_url: usize,
    /// Rows whose test identifier could not be resolved
    pub unresolved: usize,
    /// Rows handed to the pipeline
    pub scheduled_rows: usize,
    pub groups_scheduled: usize,
    /// Rows whose file the pull request did not change
    pub unmatched_rows: usize,
    pub artifacts_written: usize,
    pub verified: usize,
    pub group_failures: Vec<Failure>,
    pub row_failures: Vec<Failure>,
    pub coverage: Coverage,
}
