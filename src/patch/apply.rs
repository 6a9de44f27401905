use super::hunk::Hunk;
use super::PatchError;

/// Undo `hunks` against post-change `current`, returning the pre-change text.
///
/// Every hunk's new side must appear verbatim in `current`. It is looked for
/// at the position its header names (shifted by the drift of earlier hunks),
/// then at the nearest offset after the previous hunk. No fuzz.
pub fn reverse_apply(current: &str, hunks: &[Hunk]) -> Result<String, PatchError> {
    let lines: Vec<&str> = current.split_inclusive('\n').collect();
    let mut out = String::with_capacity(current.len());
    let mut cursor = 0usize;
    let mut drift: isize = 0;

    for hunk in hunks {
        let new_side: Vec<&str> = hunk.new_side().collect();
        // A zero-length new side sits after line `new_start`, not at it.
        let anchor = if hunk.new_count == 0 {
            hunk.new_start
        } else {
            hunk.new_start.saturating_sub(1)
        };
        let expected = anchor.saturating_add_signed(drift).max(cursor);

        let pos = locate(&lines, &new_side, expected, cursor).ok_or_else(|| {
            PatchError::ContextMismatch {
                new_start: hunk.new_start,
                new_count: hunk.new_count,
            }
        })?;

        for line in &lines[cursor..pos] {
            out.push_str(line);
        }
        for line in hunk.old_side() {
            out.push_str(line);
        }
        cursor = pos + new_side.len();
        drift = pos as isize - anchor as isize;
    }

    for line in &lines[cursor..] {
        out.push_str(line);
    }
    Ok(out)
}

/// Find `needle` in `lines[floor..]`, preferring the offset closest to
/// `expected`.
fn locate(lines: &[&str], needle: &[&str], expected: usize, floor: usize) -> Option<usize> {
    if needle.len() > lines.len() {
        return None;
    }
    let last = lines.len() - needle.len();
    if floor > last {
        return None;
    }
    let matches_at = |pos: usize| lines[pos..pos + needle.len()] == *needle;

    let expected = expected.clamp(floor, last);
    for distance in 0..=(last - floor) {
        if let Some(pos) = expected.checked_add(distance).filter(|p| *p <= last) {
            if matches_at(pos) {
                return Some(pos);
            }
        }
        if let Some(pos) = expected.checked_sub(distance).filter(|p| *p >= floor) {
            if distance > 0 && matches_at(pos) {
                return Some(pos);
            }
        }
    }
    None
}
