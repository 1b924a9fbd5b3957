//! Unified diffs for dry-run output.

use std::path::Path;

use similar::TextDiff;

/// A unified diff from `existing` to `rendered`, with `a/` and `b/` headers
/// naming `path`. Empty when the two are equal.
pub fn unified_diff(path: &Path, existing: &str, rendered: &str) -> String {
    if existing == rendered {
        return String::new();
    }
    let old_header = format!("a/{}", path.display());
    let new_header = format!("b/{}", path.display());
    TextDiff::from_lines(existing, rendered)
        .unified_diff()
        .header(&old_header, &new_header)
        .context_radius(3)
        .to_string()
}
