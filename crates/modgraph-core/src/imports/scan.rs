//! Import specifier scanner.
//!
//! Scans JavaScript/TypeScript source code for import/require specifiers
//! without full parsing. Comments and string literals are skipped;
//! type-only imports and re-exports are ignored.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// How a module is requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ImportKind {
    /// `import ... from` / `export ... from` / `import "x"`.
    #[default]
    Import,
    /// `import("x")`.
    DynamicImport,
    /// `require("x")`.
    Require,
}

/// Import specifier found in source code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportSpecCore {
    /// Specifier exactly as found.
    pub raw: String,
    pub kind: ImportKind,
    /// Line number (1-indexed, best-effort).
    pub line: Option<u32>,
}

impl ImportSpecCore {
    /// Create a new import spec.
    #[must_use]
    pub fn new(raw: impl Into<String>, kind: ImportKind, line: Option<u32>) -> Self {
        Self {
            raw: raw.into(),
            kind,
            line,
        }
    }
}

/// Scan source code for import/require specifiers.
///
/// Returns discovered imports in first-appearance order, deduplicated by `raw`.
#[must_use]
pub fn scan_imports(source: &str) -> Vec<ImportSpecCore> {
    let mut results = Vec::new();
    let mut seen = HashSet::new();
    let mut line_num: u32 = 1;
    let chars: Vec<char> = source.chars().collect();
    let len = chars.len();
    let mut i = 0;

    let mut push = |spec: String, kind: ImportKind, line: u32| {
        if !spec.is_empty() && seen.insert(spec.clone()) {
            results.push(ImportSpecCore::new(spec, kind, Some(line)));
        }
    };

    while i < len {
        if chars[i] == '\n' {
            line_num += 1;
            i += 1;
            continue;
        }

        // Skip single-line comments
        if i + 1 < len && chars[i] == '/' && chars[i + 1] == '/' {
            while i < len && chars[i] != '\n' {
                i += 1;
            }
            continue;
        }

        // Skip block comments
        if i + 1 < len && chars[i] == '/' && chars[i + 1] == '*' {
            i += 2;
            while i + 1 < len && !(chars[i] == '*' && chars[i + 1] == '/') {
                if chars[i] == '\n' {
                    line_num += 1;
                }
                i += 1;
            }
            i += 2;
            continue;
        }

        // Skip string literals so their contents are never mistaken for code
        if chars[i] == '"' || chars[i] == '\'' || chars[i] == '`' {
            i = skip_string(&chars, i, &mut line_num);
            continue;
        }

        if matches_keyword(&chars, i, "import") {
            let start_i = i;
            let line = line_num;
            if let Some((spec, kind, end)) = scan_import_statement(&chars, i + 6, &mut line_num) {
                if let Some(spec) = spec {
                    push(spec, kind, line);
                }
                i = end;
                continue;
            }
            i = start_i + 1;
            continue;
        }

        if matches_keyword(&chars, i, "export") {
            let start_i = i;
            let line = line_num;
            if let Some((spec, end)) = scan_export_from(&chars, i + 6, &mut line_num) {
                if let Some(spec) = spec {
                    push(spec, ImportKind::Import, line);
                }
                i = end;
                continue;
            }
            i = start_i + 1;
            continue;
        }

        if matches_keyword(&chars, i, "require") {
            let start_i = i;
            if let Some((spec, end)) = scan_require_call(&chars, i + 7) {
                push(spec, ImportKind::Require, line_num);
                i = end;
                continue;
            }
            i = start_i + 1;
            continue;
        }

        i += 1;
    }

    results
}

/// Check if chars at position match a keyword (with word boundary).
/// Member accesses such as `obj.import` do not count.
fn matches_keyword(chars: &[char], pos: usize, keyword: &str) -> bool {
    let len = keyword.chars().count();
    if pos + len > chars.len() {
        return false;
    }

    if pos > 0 {
        let prev = chars[pos - 1];
        if prev.is_alphanumeric() || prev == '_' || prev == '$' || prev == '.' {
            return false;
        }
    }

    if !keyword.chars().enumerate().all(|(j, c)| chars[pos + j] == c) {
        return false;
    }

    !(pos + len < chars.len() && (chars[pos + len].is_alphanumeric() || chars[pos + len] == '_' || chars[pos + len] == '$'))
}

fn skip_whitespace(chars: &[char], mut i: usize, line_num: &mut u32) -> usize {
    while i < chars.len() && chars[i].is_whitespace() {
        if chars[i] == '\n' {
            *line_num += 1;
        }
        i += 1;
    }
    i
}

/// Skip a quoted string starting at `start`; returns the index past it.
fn skip_string(chars: &[char], start: usize, line_num: &mut u32) -> usize {
    let quote = chars[start];
    let mut i = start + 1;
    while i < chars.len() && chars[i] != quote {
        if chars[i] == '\\' {
            i += 2;
            continue;
        }
        if chars[i] == '\n' {
            if quote != '`' {
                // Unterminated literal; resume scanning on the next line.
                return i;
            }
            *line_num += 1;
        }
        i += 1;
    }
    (i + 1).min(chars.len())
}

/// Read a quoted specifier at `i`. Template literals with substitutions
/// are not static and yield `None` for the specifier.
fn read_specifier(chars: &[char], i: usize) -> Option<(Option<String>, usize)> {
    let quote = *chars.get(i)?;
    if quote != '"' && quote != '\'' && quote != '`' {
        return None;
    }
    let mut j = i + 1;
    let mut spec = String::new();
    while j < chars.len() && chars[j] != quote {
        if chars[j] == '\\' && j + 1 < chars.len() {
            spec.push(chars[j + 1]);
            j += 2;
            continue;
        }
        if chars[j] == '\n' && quote != '`' {
            return None;
        }
        spec.push(chars[j]);
        j += 1;
    }
    let is_dynamic = quote == '`' && spec.contains("${");
    Some(((!is_dynamic).then_some(spec), j + 1))
}

/// Scan an import statement after the `import` keyword.
/// Returns (specifier, kind, end position); type-only imports yield no specifier.
fn scan_import_statement(
    chars: &[char],
    start: usize,
    line_num: &mut u32,
) -> Option<(Option<String>, ImportKind, usize)> {
    let len = chars.len();
    let mut i = skip_whitespace(chars, start, line_num);

    // Dynamic import: import("...")
    if i < len && chars[i] == '(' {
        i = skip_whitespace(chars, i + 1, line_num);
        let (spec, end) = read_specifier(chars, i)?;
        return Some((spec, ImportKind::DynamicImport, end));
    }

    // `import.meta`
    if i < len && chars[i] == '.' {
        return None;
    }

    // Side-effect import: import "x"
    if let Some((spec, end)) = read_specifier(chars, i) {
        return Some((spec, ImportKind::Import, end));
    }

    let type_only = matches_keyword(chars, i, "type") && {
        let after = skip_whitespace(chars, i + 4, &mut 0);
        // `import type from "x"` imports a binding named `type`.
        after < len && !matches_keyword(chars, after, "from")
    };

    // Regular import: scan until "from"
    let limit = (start + 1000).min(len);
    while i < limit {
        if chars[i] == '\n' {
            *line_num += 1;
        }
        if chars[i] == ';' {
            break;
        }
        if matches_keyword(chars, i, "from") {
            let at = skip_whitespace(chars, i + 4, line_num);
            let (spec, end) = read_specifier(chars, at)?;
            return Some((spec.filter(|_| !type_only), ImportKind::Import, end));
        }
        i += 1;
    }

    None
}

/// Scan an `export ... from` statement after the `export` keyword.
fn scan_export_from(chars: &[char], start: usize, line_num: &mut u32) -> Option<(Option<String>, usize)> {
    let len = chars.len();
    let mut i = skip_whitespace(chars, start, line_num);

    // Only `export {..} from`, `export * from` and `export type .. from` re-export.
    let type_only = matches_keyword(chars, i, "type");
    if type_only {
        i = skip_whitespace(chars, i + 4, line_num);
    }
    if i >= len || (chars[i] != '{' && chars[i] != '*') {
        return None;
    }

    let limit = (start + 500).min(len);
    while i < limit {
        if chars[i] == '\n' {
            *line_num += 1;
        }
        if chars[i] == ';' {
            break;
        }
        if matches_keyword(chars, i, "from") {
            let at = skip_whitespace(chars, i + 4, line_num);
            let (spec, end) = read_specifier(chars, at)?;
            return Some((spec.filter(|_| !type_only), end));
        }
        i += 1;
    }

    None
}

/// Scan a require("...") call.
fn scan_require_call(chars: &[char], start: usize) -> Option<(String, usize)> {
    let len = chars.len();
    let mut i = start;

    while i < len && chars[i].is_whitespace() && chars[i] != '\n' {
        i += 1;
    }
    if i >= len || chars[i] != '(' {
        return None;
    }
    i += 1;
    while i < len && chars[i].is_whitespace() && chars[i] != '\n' {
        i += 1;
    }

    let (spec, mut i) = read_specifier(chars, i)?;
    let spec = spec?;

    while i < len && chars[i].is_whitespace() && chars[i] != '\n' {
        i += 1;
    }
    if i < len && chars[i] == ')' {
        i += 1;
    }
    Some((spec, i))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raws(source: &str) -> Vec<String> {
        scan_imports(source).into_iter().map(|s| s.raw).collect()
    }

    #[test]
    fn test_esm_import_from() {
        let imports = scan_imports(r#"import { foo } from "./dep";"#);
        assert_eq!(imports.len(), 1);
        assert_eq!(imports[0].raw, "./dep");
        assert_eq!(imports[0].kind, ImportKind::Import);
    }

    #[test]
    fn test_side_effect_and_namespace() {
        assert_eq!(
            raws("import './polyfill.js'\nimport * as ns from 'ns-lib'"),
            vec!["./polyfill.js", "ns-lib"]
        );
    }

    #[test]
    fn test_dynamic_import_and_require() {
        let imports = scan_imports("const a = await import('./lazy.js');\nconst b = require(\"cjs-dep\");");
        assert_eq!(imports[0].kind, ImportKind::DynamicImport);
        assert_eq!(imports[0].raw, "./lazy.js");
        assert_eq!(imports[1].kind, ImportKind::Require);
        assert_eq!(imports[1].raw, "cjs-dep");
        assert_eq!(imports[1].line, Some(2));
    }

    #[test]
    fn test_template_dynamic_import_skipped() {
        assert!(raws("import(`./locales/${lang}.js`)").is_empty());
        assert_eq!(raws("import(`./static.js`)"), vec!["./static.js"]);
    }

    #[test]
    fn test_reexports() {
        assert_eq!(
            raws("export * from './all'\nexport { a as b } from \"./named\"\nexport const x = 1"),
            vec!["./all", "./named"]
        );
    }

    #[test]
    fn test_type_only_ignored() {
        let source = r#"
import type { Props } from './types'
export type { Other } from './other-types'
import { type A, b } from './mixed'
import type from './binding-named-type'
"#;
        assert_eq!(raws(source), vec!["./mixed", "./binding-named-type"]);
    }

    #[test]
    fn test_comments_and_strings_ignored() {
        let source = r#"
// import a from 'commented'
/* import b from 'block' */
const s = "import c from 'in-string'";
obj.import('member');
import real from 'real'
"#;
        assert_eq!(raws(source), vec!["real"]);
    }

    #[test]
    fn test_import_meta_not_an_import() {
        assert_eq!(raws("const u = import.meta.url; import x from 'x'"), vec!["x"]);
    }

    #[test]
    fn test_dedup_keeps_first() {
        let imports = scan_imports("import a from 'a'\nimport('a')");
        assert_eq!(imports.len(), 1);
        assert_eq!(imports[0].kind, ImportKind::Import);
    }
}
