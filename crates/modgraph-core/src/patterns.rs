//! Id classification shared by the resolver, scanner and HMR engine.
//!
//! All checks are string-level; none touch the filesystem.

use modgraph_util::path::{clean_url, extname};

/// Prefix for explicit filesystem paths served from outside the root.
pub const FS_PREFIX: &str = "/@fs/";

const CSS_LANGS: &[&str] = &[
    ".css", ".less", ".sass", ".scss", ".styl", ".stylus", ".pcss", ".postcss", ".sss",
];

const KNOWN_ASSET_TYPES: &[&str] = &[
    // images
    "apng", "bmp", "png", "jpe?g", "jfif", "pjpeg", "pjp", "gif", "svg", "ico", "webp", "avif",
    "cur", "jxl",
    // media
    "mp4", "webm", "ogg", "mp3", "wav", "flac", "aac", "opus", "mov", "m4a", "vtt",
    // fonts
    "woff2?", "eot", "ttf", "otf",
    // other
    "webmanifest", "pdf", "txt",
];

const HTML_TYPES: &[&str] = &[".html", ".vue", ".svelte", ".astro", ".imba"];

/// `^[\w@][^:]`: a bare import as seen by the scanner (rules out `C:`).
#[must_use]
pub fn is_scanner_bare_import(id: &str) -> bool {
    let mut chars = id.chars();
    match (chars.next(), chars.next()) {
        (Some(first), Some(second)) => (first.is_alphanumeric() || first == '_' || first == '@') && second != ':',
        _ => false,
    }
}

/// A bare package specifier: starts with a word character or `@`, is not a
/// Windows drive path, and carries no `://` scheme.
#[must_use]
pub fn is_bare_import(id: &str) -> bool {
    let bytes = id.as_bytes();
    if bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':' {
        return false;
    }
    let first_ok = id
        .chars()
        .next()
        .is_some_and(|c| c.is_alphanumeric() || c == '_' || c == '@');
    first_ok && !id.contains("://")
}

/// Absolute `http(s)://` or protocol-relative `//` URL.
#[must_use]
pub fn is_external_url(id: &str) -> bool {
    let lower = id.get(..8).unwrap_or(id).to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://") || id.starts_with("//")
}

#[must_use]
pub fn is_data_url(id: &str) -> bool {
    id.get(..5).is_some_and(|p| p.eq_ignore_ascii_case("data:"))
}

/// Ids that are already resolved virtual modules.
#[must_use]
pub fn is_virtual_id(id: &str) -> bool {
    id.starts_with('\0') || id.starts_with("virtual:") || id.starts_with("/virtual:")
}

/// `.js`, `.jsx`, `.ts`, `.tsx`, `.mjs` (query ignored).
#[must_use]
pub fn is_js_type(id: &str) -> bool {
    matches!(extname(id), ".js" | ".jsx" | ".ts" | ".tsx" | ".mjs")
}

/// HTML-like containers whose script blocks are extracted.
#[must_use]
pub fn is_html_type(id: &str) -> bool {
    HTML_TYPES.contains(&extname(id))
}

/// Requests whose source is TypeScript.
#[must_use]
pub fn is_ts_request(id: &str) -> bool {
    matches!(extname(id), ".ts" | ".mts" | ".cts" | ".tsx")
}

/// `.js`, `.mjs`, `.cjs`, `.jsx`: extensions a TS file may be imported as.
#[must_use]
pub fn is_possible_ts_output(file: &str) -> bool {
    matches!(extname(file), ".js" | ".mjs" | ".cjs" | ".jsx")
}

#[must_use]
pub fn is_css_request(id: &str) -> bool {
    CSS_LANGS.contains(&extname(id))
}

#[must_use]
pub fn is_json_or_wasm(id: &str) -> bool {
    matches!(extname(id), ".json" | ".json5" | ".wasm")
}

#[must_use]
pub fn is_known_asset(id: &str) -> bool {
    let ext = extname(id);
    let Some(ext) = ext.strip_prefix('.') else {
        return false;
    };
    let ext = ext.to_ascii_lowercase();
    KNOWN_ASSET_TYPES.iter().any(|known| match *known {
        "jpe?g" => ext == "jpg" || ext == "jpeg",
        "woff2?" => ext == "woff" || ext == "woff2",
        other => ext == other,
    })
}

/// `?worker`, `?sharedworker`, `?raw`, `?url` query suffixes.
#[must_use]
pub fn is_special_query(id: &str) -> bool {
    let Some(pos) = id.find('?') else {
        return false;
    };
    id[pos + 1..]
        .split('&')
        .any(|p| matches!(p, "worker" | "sharedworker" | "raw" | "url"))
}

/// Whether the file may be pre-bundled: `.js/.ts` family plus configured extensions.
#[must_use]
pub fn is_optimizable(id: &str, extensions: &[String]) -> bool {
    matches!(extname(id), ".js" | ".mjs" | ".cjs" | ".ts" | ".mts" | ".cts")
        || extensions.iter().any(|ext| id.ends_with(ext.as_str()))
}

/// Whether the scanner should crawl into the file.
#[must_use]
pub fn is_scannable(id: &str, extensions: &[String]) -> bool {
    is_js_type(id) || is_html_type(id) || extensions.iter().any(|ext| ext == extname(id))
}

/// Only JS-like files (or extensionless ids) can stay external at runtime.
#[must_use]
pub fn can_externalize_file(id: &str) -> bool {
    matches!(extname(id), "" | ".js" | ".mjs" | ".cjs")
}

/// `?v=<hash>` query present.
#[must_use]
pub fn has_version_query(id: &str) -> bool {
    id.find('?')
        .is_some_and(|pos| id[pos + 1..].split('&').any(|p| p.starts_with("v=")))
}

/// Whether an id refers to an HTML page.
#[must_use]
pub fn is_html_file(id: &str) -> bool {
    clean_url(id).ends_with(".html")
}
