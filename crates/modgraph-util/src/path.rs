//! String helpers for module ids.
//!
//! Module ids are forward-slash paths that may carry a `?query` or `#hash`
//! postfix. These helpers split, clean and rebuild such ids without touching
//! the filesystem.

use std::path::Path;

/// Render a path with forward slashes.
#[must_use]
pub fn normalize_slashes(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

/// Strip a `?query` or `#hash` postfix from an id.
#[must_use]
pub fn clean_url(id: &str) -> &str {
    match id.find(['?', '#']) {
        Some(pos) => &id[..pos],
        None => id,
    }
}

/// Split an id into its file part and its postfix (`?query` / `#hash`, possibly empty).
#[must_use]
pub fn split_file_and_postfix(id: &str) -> (&str, &str) {
    let file = clean_url(id);
    (file, &id[file.len()..])
}

/// Whether an id points inside a `node_modules` directory.
#[must_use]
pub fn is_in_node_modules(id: &str) -> bool {
    id.contains("node_modules")
}

/// Insert `query` as the first query parameter of `url`, keeping any
/// existing query and hash.
#[must_use]
pub fn inject_query(url: &str, query: &str) -> String {
    let (file, postfix) = split_file_and_postfix(url);
    match postfix.strip_prefix('?') {
        Some(rest) => format!("{file}?{query}&{rest}"),
        None => format!("{file}?{query}{postfix}"),
    }
}

/// Lexically normalize a POSIX-style relative path: drop `.` segments, fold
/// `..` into preceding segments, collapse repeated slashes.
///
/// Leading `..` segments that cannot be folded are kept. A trailing slash is
/// preserved.
#[must_use]
pub fn posix_normalize(path: &str) -> String {
    let absolute = path.starts_with('/');
    let trailing = path.len() > 1 && path.ends_with('/');
    let mut parts: Vec<&str> = Vec::new();

    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if matches!(parts.last(), Some(last) if *last != "..") {
                    parts.pop();
                } else if !absolute {
                    parts.push("..");
                }
            }
            other => parts.push(other),
        }
    }

    let mut out = parts.join("/");
    if absolute {
        out.insert(0, '/');
    }
    if out.is_empty() {
        out.push('.');
    }
    if trailing && !out.ends_with('/') {
        out.push('/');
    }
    out
}

/// Extension of the file part of an id, including the dot (`".js"`), or `""`.
#[must_use]
pub fn extname(id: &str) -> &str {
    let file = clean_url(id);
    let base = file.rsplit('/').next().unwrap_or(file);
    match base.rfind('.') {
        Some(0) | None => "",
        Some(pos) => &base[pos..],
    }
}
