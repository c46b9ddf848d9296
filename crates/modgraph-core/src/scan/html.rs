//! Script extraction from HTML-like containers (`.html`, `.vue`, `.svelte`,
//! `.astro`, `.imba`).
//!
//! This is a best-effort, regex-based extraction, not an HTML parser. It can
//! miss scripts built in unusual ways, and it can pick up tags inside string
//! literals. Missed imports are still caught at request time; false
//! positives fail to resolve and are reported as missing.

use crate::transform::Loader;
use regex_lite::Regex;
use std::sync::OnceLock;

/// One `<script>` block found in a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptBlock {
    /// `<script src="...">`: an import of `src` from the container.
    Src(String),
    /// Inline script content, scanned as its own virtual module.
    Inline {
        /// `<container>?id=<n>&loader=<loader>`.
        id: String,
        content: String,
        loader: Loader,
    },
}

fn script_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r#"(?is)(<script(?:\s+[a-z_:][-\w:]*(?:\s*=\s*(?:"[^"]*"|'[^']*'|[^"'<>=\s]+))?)*\s*>)(.*?)</script>"#,
        )
        .ok()
    })
    .as_ref()
}

fn comment_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)<!--.*?-->").ok()).as_ref()
}

fn attr_re(name: &'static str) -> Option<&'static Regex> {
    static SRC: OnceLock<Option<Regex>> = OnceLock::new();
    static TYPE: OnceLock<Option<Regex>> = OnceLock::new();
    static LANG: OnceLock<Option<Regex>> = OnceLock::new();
    let cell = match name {
        "src" => &SRC,
        "type" => &TYPE,
        _ => &LANG,
    };
    cell.get_or_init(|| {
        Regex::new(&format!(
            r#"(?i)\b{name}\s*=\s*(?:"([^"]+)"|'([^']+)'|([^\s'">]+))"#
        ))
        .ok()
    })
    .as_ref()
}

/// Value of attribute `name` in an opening tag.
fn attr<'a>(open_tag: &'a str, name: &'static str) -> Option<&'a str> {
    let caps = attr_re(name)?.captures(open_tag)?;
    caps.get(1)
        .or_else(|| caps.get(2))
        .or_else(|| caps.get(3))
        .map(|m| m.as_str())
}

/// Extract the script blocks of an HTML-like file at `path` (forward-slash id).
///
/// In `.html` files only `type="module"` scripts count. Blocks with a
/// non-JavaScript `type` are skipped everywhere.
#[must_use]
pub fn extract_scripts(path: &str, raw: &str) -> Vec<ScriptBlock> {
    let (Some(script_re), Some(comment_re)) = (script_re(), comment_re()) else {
        return Vec::new();
    };
    let raw = comment_re.replace_all(raw, "<!---->");
    let is_html = path.ends_with(".html");
    let mut blocks = Vec::new();
    let mut script_id = 0usize;

    for caps in script_re.captures_iter(&raw) {
        let (Some(open_tag), Some(content)) = (caps.get(1), caps.get(2)) else {
            continue;
        };
        let open_tag = open_tag.as_str();
        let script_type = attr(open_tag, "type");

        if is_html && script_type != Some("module") {
            continue;
        }
        if let Some(t) = script_type {
            if !(t.contains("javascript") || t.contains("ecmascript") || t == "module") {
                continue;
            }
        }

        let loader = match attr(open_tag, "lang") {
            Some(lang @ ("ts" | "tsx" | "jsx")) => Loader::from_lang(lang).unwrap_or(Loader::Js),
            _ if path.ends_with(".astro") => Loader::Ts,
            _ => Loader::Js,
        };

        if let Some(src) = attr(open_tag, "src") {
            blocks.push(ScriptBlock::Src(src.to_string()));
            continue;
        }

        let content = content.as_str();
        if content.trim().is_empty() {
            continue;
        }
        let id = format!("{path}?id={script_id}&loader={}", loader.as_str());
        script_id += 1;
        blocks.push(ScriptBlock::Inline {
            id,
            content: content.to_string(),
            loader,
        });
    }

    blocks
}

fn multiline_comment_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)/\*.*?\*/").ok()).as_ref()
}

fn singleline_comment_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)//.*$").ok()).as_ref()
}

fn import_statement_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?m)(?:^|;|\*/)\s*import([\w*{}\n\r\t, ]+from)?\s*("[^"]+"|'[^']+')"#).ok()
    })
    .as_ref()
}

/// Forced side-effect imports (`\nimport "x"`) for every import statement
/// found in TypeScript script content.
///
/// Transpiling TypeScript drops imports that look unused, though the template
/// may use them. Appending bare imports keeps the crawl going. Conservative
/// heuristic: only statements that start a line (or follow `;` or a block
/// comment) and end the line are matched; `import type` is skipped.
#[must_use]
pub fn extract_import_paths(code: &str) -> String {
    let (Some(multi), Some(single), Some(statement)) =
        (multiline_comment_re(), singleline_comment_re(), import_statement_re())
    else {
        return String::new();
    };
    let code = multi.replace_all(code, "/* */");
    let code = single.replace_all(&code, "");

    let mut js = String::new();
    for caps in statement.captures_iter(&code) {
        let (Some(whole), Some(source)) = (caps.get(0), caps.get(2)) else {
            continue;
        };
        let clause = caps.get(1).map_or("", |m| m.as_str());
        if is_type_clause(clause) {
            continue;
        }
        let rest = code[whole.end()..].trim_start_matches([' ', '\t', '\r']);
        let ends_statement = rest.is_empty()
            || rest.starts_with('\n')
            || rest.starts_with(';')
            || rest.starts_with("//")
            || rest.starts_with("/*");
        if ends_statement {
            js.push_str("\nimport ");
            js.push_str(source.as_str());
        }
    }
    js
}

/// `import type X from` / `import type { X } from`.
fn is_type_clause(clause: &str) -> bool {
    let Some(rest) = clause.trim_start().strip_prefix("type") else {
        return false;
    };
    rest.starts_with(|c: char| c.is_whitespace() || c == '{' || c == '*')
        && !rest.trim_start().starts_with("from")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_html_only_module_scripts() {
        let html = r#"<!doctype html>
<script src="/legacy.js"></script>
<script type="module" src="/src/main.ts"></script>
<script type="module">import 'inline-dep'</script>
<!-- <script type="module" src="/commented.js"></script> -->
<script type="application/ld+json">{"a":1}</script>
"#;
        let blocks = extract_scripts("/p/index.html", html);
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0], ScriptBlock::Src("/src/main.ts".to_string()));
        match &blocks[1] {
            ScriptBlock::Inline { id, content, loader } => {
                assert_eq!(id, "/p/index.html?id=0&loader=js");
                assert_eq!(content, "import 'inline-dep'");
                assert_eq!(*loader, Loader::Js);
            }
            other => panic!("unexpected block {other:?}"),
        }
    }

    #[test]
    fn test_vue_lang_and_ids() {
        let vue = r#"<template><div/></template>
<script lang="ts">export default {}</script>
<script setup lang='tsx'>import Comp from './Comp.vue'</script>
"#;
        let blocks = extract_scripts("/p/App.vue", vue);
        let ids: Vec<_> = blocks
            .iter()
            .map(|b| match b {
                ScriptBlock::Inline { id, loader, .. } => (id.clone(), *loader),
                ScriptBlock::Src(s) => (s.clone(), Loader::Js),
            })
            .collect();
        assert_eq!(
            ids,
            vec![
                ("/p/App.vue?id=0&loader=ts".to_string(), Loader::Ts),
                ("/p/App.vue?id=1&loader=tsx".to_string(), Loader::Tsx),
            ]
        );
    }

    #[test]
    fn test_svelte_module_and_instance_scripts() {
        let svelte = r#"<script context="module">import 'b'</script>
<script>import 'a'</script>"#;
        let contents: Vec<String> = extract_scripts("/p/C.svelte", svelte)
            .into_iter()
            .filter_map(|b| match b {
                ScriptBlock::Inline { content, .. } => Some(content),
                ScriptBlock::Src(_) => None,
            })
            .collect();
        assert_eq!(contents, vec!["import 'b'", "import 'a'"]);
    }

    #[test]
    fn test_astro_defaults_to_ts() {
        let blocks = extract_scripts("/p/Page.astro", "<script>import 'x'</script>");
        assert!(matches!(&blocks[0], ScriptBlock::Inline { loader: Loader::Ts, .. }));
    }

    #[test]
    fn test_extract_import_paths() {
        let code = r#"
import Foo from './Foo.vue'
import type { Props } from './types'
import { a,
  b } from "multi"
// import commented from 'nope'
const x = 1; import 'side'
/* import block from 'nope2' */
const s = "x"; import bar from 'bar' + 1
"#;
        assert_eq!(
            extract_import_paths(code),
            "\nimport './Foo.vue'\nimport \"multi\"\nimport 'side'"
        );
    }
}
