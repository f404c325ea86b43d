//! File enumeration for registration time.
//!
//! `glob` expands a shell-style pattern against the filesystem when a
//! project is being declared. This is unrelated to the `%` wildcard,
//! which binds rules to targets during resolution.

use std::path::Path;

use globset::GlobBuilder;
use walkdir::WalkDir;

/// Enumerate files matching `pattern` (e.g. `src/**/*.c`), sorted.
/// An invalid pattern yields nothing.
pub fn glob(pattern: &str) -> Vec<String> {
    let Ok(glob) = GlobBuilder::new(pattern).literal_separator(false).build() else {
        return Vec::new();
    };
    let matcher = glob.compile_matcher();

    // Walk from the longest literal directory prefix of the pattern.
    let root = pattern
        .split(['*', '?', '[', '{'])
        .next()
        .and_then(|prefix| {
            let p = Path::new(prefix);
            if prefix.ends_with('/') {
                Some(p.to_path_buf())
            } else {
                p.parent().map(Path::to_path_buf)
            }
        })
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new(".").to_path_buf());

    let mut out: Vec<String> = WalkDir::new(&root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| {
            let path = e.path().strip_prefix("./").unwrap_or(e.path());
            let name = path.to_str()?;
            matcher.is_match(name).then(|| name.to_string())
        })
        .collect();
    out.sort();
    out
}
