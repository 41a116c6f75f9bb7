//! Path normalization and free-name generation for backend paths.
//!
//! Backend paths are always `/`-separated strings regardless of the host
//! platform, so these helpers work on `str` rather than `std::path`.

use std::collections::HashSet;

/// Highest numeric suffix tried before falling back to `(copy)`.
const MAX_SUFFIX: u32 = 10_000;

/// Normalize a directory path for comparison.
///
/// Empty input and `~` map to `.`, runs of `/` collapse to one and trailing
/// separators are dropped except for the root itself.
#[must_use]
pub fn normalize_dir(path: &str) -> String {
    let trimmed = path.trim();
    if trimmed.is_empty() || trimmed == "~" || trimmed == "." {
        return ".".to_string();
    }
    let mut collapsed = String::with_capacity(trimmed.len());
    let mut previous_slash = false;
    for ch in trimmed.chars() {
        if ch == '/' {
            if previous_slash {
                continue;
            }
            previous_slash = true;
        } else {
            previous_slash = false;
        }
        collapsed.push(ch);
    }
    while collapsed.len() > 1 && collapsed.ends_with('/') {
        collapsed.pop();
    }
    collapsed
}

/// Join an entry name onto a directory.
///
/// Absolute names replace the directory, and a `.` directory yields the name unchanged.
#[must_use]
pub fn join(dir: &str, name: &str) -> String {
    let base = normalize_dir(dir);
    let name = name.trim().trim_end_matches('/');
    if name.is_empty() {
        return base;
    }
    if name.starts_with('/') || base == "." {
        return normalize_dir(name);
    }
    let separator = if base.ends_with('/') { "" } else { "/" };
    normalize_dir(&format!("{base}{separator}{name}"))
}

/// Split a file name into stem and extension (extension keeps its dot).
///
/// Directories and dot-files have no extension.
fn split_extension(name: &str, is_dir: bool) -> (&str, &str) {
    if is_dir {
        return (name, "");
    }
    match name.rfind('.') {
        Some(index) if index > 0 => name.split_at(index),
        _ => (name, ""),
    }
}

/// Candidate names `"stem (N).ext"` for N from 2 upwards.
pub fn numbered_candidates(name: &str, is_dir: bool) -> impl Iterator<Item = String> + '_ {
    let (stem, extension) = split_extension(name, is_dir);
    (2..MAX_SUFFIX).map(move |index| format!("{stem} ({index}){extension}"))
}

/// Name used once every numbered candidate is taken.
#[must_use]
pub fn fallback_name(name: &str, is_dir: bool) -> String {
    let (stem, extension) = split_extension(name, is_dir);
    format!("{stem} (copy){extension}")
}

/// Propose the first `"stem (N).ext"` name, N starting at 2, that is absent from `existing`.
#[must_use]
pub fn next_free_name(name: &str, is_dir: bool, existing: &HashSet<String>) -> String {
    numbered_candidates(name, is_dir)
        .find(|candidate| !existing.contains(candidate))
        .unwrap_or_else(|| fallback_name(name, is_dir))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(items: &[&str]) -> HashSet<String> {
        items.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn normalize_collapses_and_trims() {
        assert_eq!(normalize_dir("/opt//etc///"), "/opt/etc");
        assert_eq!(normalize_dir("/"), "/");
        assert_eq!(normalize_dir("///"), "/");
        assert_eq!(normalize_dir(" ~ "), ".");
        assert_eq!(normalize_dir(""), ".");
        assert_eq!(normalize_dir("logs/"), "logs");
    }

    #[test]
    fn join_handles_root_relative_and_absolute() {
        assert_eq!(join("/", "a.txt"), "/a.txt");
        assert_eq!(join("/opt/", "a.txt"), "/opt/a.txt");
        assert_eq!(join(".", "a.txt"), "a.txt");
        assert_eq!(join("/opt", "/tmp/x/"), "/tmp/x");
        assert_eq!(join("/opt", ""), "/opt");
    }

    #[test]
    fn next_free_name_skips_taken_candidates() {
        let existing = names(&["doc.txt", "doc (2).txt"]);
        assert_eq!(next_free_name("doc.txt", false, &existing), "doc (3).txt");
    }

    #[test]
    fn next_free_name_keeps_directory_dots() {
        let existing = names(&["backup.d"]);
        assert_eq!(next_free_name("backup.d", true, &existing), "backup.d (2)");
        assert_eq!(next_free_name(".profile", false, &existing), ".profile (2)");
        assert_eq!(
            next_free_name("archive.tar.gz", false, &existing),
            "archive.tar (2).gz"
        );
    }
}
