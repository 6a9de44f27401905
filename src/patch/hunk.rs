use super::PatchError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind {
    Context,
    Added,
    Removed,
}

/// One body line of a hunk. `text` keeps its line terminator unless the
/// patch marked it with `\ No newline at end of file`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HunkLine {
    pub kind: LineKind,
    pub text: String,
}

/// A contiguous region of changes within a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hunk {
    /// Starting line number in the old file
    pub old_start: usize,
    /// Number of lines in the old file
    pub old_count: usize,
    /// Starting line number in the new file
    pub new_start: usize,
    /// Number of lines in the new file
    pub new_count: usize,
    pub lines: Vec<HunkLine>,
}

impl Hunk {
    /// Lines as they read before the change.
    pub fn old_side(&self) -> impl Iterator<Item = &str> {
        self.lines
            .iter()
            .filter(|l| l.kind != LineKind::Added)
            .map(|l| l.text.as_str())
    }

    /// Lines as they read after the change.
    pub fn new_side(&self) -> impl Iterator<Item = &str> {
        self.lines
            .iter()
            .filter(|l| l.kind != LineKind::Removed)
            .map(|l| l.text.as_str())
    }
}

/// Parse the hunks of a single-file unified diff.
///
/// GitHub's per-file `patch` field carries hunks only; `diff --git`,
/// `---`/`+++` and other header lines before the first hunk are skipped.
/// Each hunk consumes exactly as many body lines as its header announces,
/// so blank context lines and trailing newlines cannot be misread.
///
/// Hunks start with: @@ -{old_start},{old_count} +{new_start},{new_count} @@
///
/// Lines are prefixed with:
///   '+' for additions
///   '-' for deletions
///   ' ' for context (unchanged)
pub fn parse_hunks(raw_patch: &str) -> Result<Vec<Hunk>, PatchError> {
    let mut hunks: Vec<Hunk> = Vec::new();
    let mut current: Option<(Hunk, usize, usize)> = None;

    for line in raw_patch.split_inclusive('\n') {
        if line.starts_with('\\') {
            // Applies to the line right before it.
            if let Some(last) = current.as_mut().and_then(|(h, _, _)| h.lines.last_mut()) {
                if last.text.ends_with('\n') {
                    last.text.pop();
                    if last.text.ends_with('\r') {
                        last.text.pop();
                    }
                }
            }
            continue;
        }

        if let Some((hunk, old_seen, new_seen)) = current.as_mut() {
            if *old_seen < hunk.old_count || *new_seen < hunk.new_count {
                let (kind, text) = classify(line, hunk)?;
                match kind {
                    LineKind::Context => {
                        *old_seen += 1;
                        *new_seen += 1;
                    }
                    LineKind::Removed => *old_seen += 1,
                    LineKind::Added => *new_seen += 1,
                }
                if *old_seen > hunk.old_count || *new_seen > hunk.new_count {
                    return Err(PatchError::Malformed(format!(
                        "hunk at -{},{} has more lines than its header",
                        hunk.old_start, hunk.old_count
                    )));
                }
                hunk.lines.push(HunkLine {
                    kind,
                    text: text.to_string(),
                });
                continue;
            }
        }

        if line.starts_with("@@") {
            if let Some(done) = current.take() {
                hunks.push(done.0);
            }
            let (old_start, old_count, new_start, new_count) = parse_hunk_header(line)?;
            current = Some((
                Hunk {
                    old_start,
                    old_count,
                    new_start,
                    new_count,
                    lines: Vec::new(),
                },
                0,
                0,
            ));
            continue;
        }

        if current.is_some() && !line.trim().is_empty() {
            return Err(PatchError::Malformed(format!(
                "unexpected line after hunk: {:?}",
                line.trim_end()
            )));
        }
    }

    if let Some((hunk, old_seen, new_seen)) = current.take() {
        if old_seen < hunk.old_count || new_seen < hunk.new_count {
            return Err(PatchError::Malformed(format!(
                "hunk at -{},{} is truncated",
                hunk.old_start, hunk.old_count
            )));
        }
        hunks.push(hunk);
    }

    Ok(hunks)
}

/// Split a body line into its kind and text. A bare newline is read as an
/// empty context line, which some tools emit after stripping trailing spaces.
fn classify<'a>(line: &'a str, hunk: &Hunk) -> Result<(LineKind, &'a str), PatchError> {
    if line == "\n" || line == "\r\n" {
        return Ok((LineKind::Context, line));
    }
    let mut chars = line.chars();
    let kind = match chars.next() {
        Some(' ') => LineKind::Context,
        Some('+') => LineKind::Added,
        Some('-') => LineKind::Removed,
        _ => {
            return Err(PatchError::Malformed(format!(
                "hunk at -{},{} ends early at {:?}",
                hunk.old_start,
                hunk.old_count,
                line.trim_end()
            )))
        }
    };
    Ok((kind, &line[1..]))
}

fn parse_hunk_header(line: &str) -> Result<(usize, usize, usize, usize), PatchError> {
    let header = line
        .trim()
        .strip_prefix("@@")
        .ok_or_else(|| PatchError::Malformed("Invalid hunk header".to_string()))?;
    let (ranges, _section) = header
        .split_once("@@")
        .ok_or_else(|| PatchError::Malformed(format!("Unterminated hunk header {}", line.trim_end())))?;
    let mut parts = ranges.split_whitespace();
    let old_part = parts
        .next()
        .ok_or_else(|| PatchError::Malformed("Missing old range".to_string()))?;
    let new_part = parts
        .next()
        .ok_or_else(|| PatchError::Malformed("Missing new range".to_string()))?;

    let (old_start, old_count) = parse_range(old_part, '-')?;
    let (new_start, new_count) = parse_range(new_part, '+')?;

    Ok((old_start, old_count, new_start, new_count))
}

fn parse_range(part: &str, prefix: char) -> Result<(usize, usize), PatchError> {
    let range = part
        .strip_prefix(prefix)
        .ok_or_else(|| PatchError::Malformed("Invalid range prefix".to_string()))?;
    let (start_str, count_str) = match range.split_once(',') {
        Some((start, count)) => (start, count),
        None => (range, "1"),
    };
    let start = start_str
        .parse::<usize>()
        .map_err(|_| PatchError::Malformed(format!("Invalid range start in {}", part)))?;
    let count = count_str
        .parse::<usize>()
        .map_err(|_| PatchError::Malformed(format!("Invalid range count in {}", part)))?;
    Ok((start, count))
}
