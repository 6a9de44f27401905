/// One resolvable row of the input table.
/// `idx` is the row's position in the input and the only key used to match
/// fetched artifacts back to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetRow {
    pub idx: usize,
    pub pull_request_url: String,
    pub test_identifier: String,
    pub short_filename: String,
    pub qualified_filename: String,
    /// Directory the test file is expected under, `/`-separated.
    pub package_path: String,
}

/// All rows that point at the same pull request.
#[derive(Debug, Clone)]
pub struct PullRequestGroup {
    pub pull_request_url: String,
    pub rows: Vec<DatasetRow>,
}

/// Group rows by pull request URL, keeping every row and the order in which
/// URLs first appear.
pub fn group_rows(rows: Vec<DatasetRow>) -> Vec<PullRequestGroup> {
    let mut groups: Vec<PullRequestGroup> = Vec::new();
    let mut positions: std::collections::HashMap<String, usize> = std::collections::HashMap::new();

    for row in rows {
        match positions.get(&row.pull_request_url) {
            Some(&pos) => groups[pos].rows.push(row),
            None => {
                positions.insert(row.pull_request_url.clone(), groups.len());
                groups.push(PullRequestGroup {
                    pull_request_url: row.pull_request_url.clone(),
                    rows: vec![row],
                });
            }
        }
    }

    groups
}
