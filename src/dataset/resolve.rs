/// Extension of test sources named by dotted (JUnit-style) identifiers.
pub const JAVA_EXTENSION: &str = "java";

/// Filenames derived from one test identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedNames {
    /// Bare file name, compared against the pull request's changed files.
    pub short_filename: String,
    /// Package/path-qualified name used for the on-disk artifacts.
    pub qualified_filename: String,
    /// Directory path the file is expected under (`com/x` or `tests/unit`),
    /// used to break ties between changed files sharing a short name.
    pub package_path: String,
}

/// Resolve a fully-qualified test identifier into its filenames.
///
/// Two shapes are recognised:
/// - dotted names, `com.foo.BarTest.testX` -> `BarTest.java` / `com.foo.BarTest.java`
/// - node ids, `tests/test_foo.py::test_bar` -> `test_foo.py` / `tests.test_foo.py`
///
/// Returns `None` when neither shape fits.
pub fn resolve(identifier: &str) -> Option<ResolvedNames> {
    let identifier = identifier.trim();
    if identifier.is_empty() {
        return None;
    }
    match identifier.split_once("::") {
        Some((path, _locator)) => resolve_node_id(path),
        None => resolve_dotted(identifier),
    }
}

fn resolve_node_id(path: &str) -> Option<ResolvedNames> {
    let path = path.trim_start_matches("./");
    if path.is_empty() || path.ends_with('/') || path.chars().any(char::is_whitespace) {
        return None;
    }
    let segments: Vec<&str> = path.split('/').collect();
    if segments.iter().any(|s| s.is_empty() || *s == "." || *s == "..") {
        return None;
    }
    let file = *segments.last()?;
    let (stem, ext) = file.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }

    Some(ResolvedNames {
        short_filename: file.to_string(),
        qualified_filename: segments.join("."),
        package_path: segments[..segments.len() - 1].join("/"),
    })
}

fn resolve_dotted(identifier: &str) -> Option<ResolvedNames> {
    if identifier.contains('/') {
        return None;
    }
    let segments: Vec<&str> = identifier.split('.').collect();
    if segments.len() < 2 || segments.iter().any(|s| s.is_empty()) {
        return None;
    }

    let mut qualifying = segments[..segments.len() - 1].to_vec();
    // Only the method segment may carry free-form parameters.
    if qualifying.iter().any(|s| s.chars().any(char::is_whitespace)) {
        return None;
    }
    let class_segment = qualifying.pop()?;
    // Nested classes live in their outer class's file.
    let class = class_segment
        .split_once('$')
        .map_or(class_segment, |(outer, _)| outer);
    if class.is_empty() || !class.chars().all(|c| c.is_alphanumeric() || c == '_') {
        return None;
    }

    let mut qualified = qualifying.clone();
    qualified.push(class);
    Some(ResolvedNames {
        short_filename: format!("{class}.{JAVA_EXTENSION}"),
        qualified_filename: format!("{}.{JAVA_EXTENSION}", qualified.join(".")),
        package_path: qualifying.join("/"),
    })
}
