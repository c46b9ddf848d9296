//! `browser` field handling.
//!
//! Object-form `browser` fields remap individual files (or bare ids) to
//! replacements, or to `false` for "stub this out". String-form fields name
//! an alternate package entry.

use super::{join_id, parent_id, relative_id, Ctx, Resolution, ResolveError, Resolver, SpecialModule};
use crate::patterns::is_bare_import;
use modgraph_util::path::{clean_url, posix_normalize};
use regex_lite::Regex;
use serde_json::{Map, Value};
use std::path::Path;
use std::sync::OnceLock;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) enum BrowserMapping {
    Path(String),
    /// Mapped to `false`.
    External,
}

/// Look up a package-relative path (or bare id) in an object `browser`
/// field. Keys match exactly, or with a `.js` / `/index.js` suffix dropped
/// from the key.
pub(super) fn map_with_browser_field(relative: &str, map: &Map<String, Value>) -> Option<BrowserMapping> {
    let normalized = posix_normalize(relative);
    for (key, value) in map {
        let key = posix_normalize(key);
        let hit = key == normalized
            || key.strip_suffix(".js") == Some(normalized.as_str())
            || key.strip_suffix("/index.js") == Some(normalized.as_str());
        if hit {
            return match value {
                Value::String(s) => Some(BrowserMapping::Path(s.clone())),
                Value::Bool(false) => Some(BrowserMapping::External),
                _ => None,
            };
        }
    }
    None
}

fn esm_syntax_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r#"(?m)(?:^|[\s;])(?:import[\s\w*,{}]*from|import\s*["'*{]|export\b\s*(?:[*{]|default|class|type|function|const|var|let|async function)|import\.meta\b)"#,
        )
        .ok()
    })
    .as_ref()
}

/// Whether source text looks like an ES module. Best-effort: UMD bundles
/// that mention `import`/`export` in strings can be misclassified.
#[must_use]
pub fn has_esm_syntax(code: &str) -> bool {
    esm_syntax_re().is_some_and(|re| re.is_match(code))
}

impl Resolver {
    /// Apply the importer's package `browser` mapping to `id`.
    ///
    /// `is_file_path` means `id` is an absolute path (relative imports);
    /// otherwise it is a bare id mapped by name.
    pub(super) fn try_resolve_browser_mapping(
        &self,
        id: &str,
        ctx: &Ctx<'_>,
        is_file_path: bool,
        externalize: bool,
    ) -> Result<Option<Resolution>, ResolveError> {
        let Some(importer) = ctx.importer else {
            return Ok(None);
        };
        let Some(pkg) = self
            .packages
            .find_nearest_package_data(Path::new(parent_id(importer)))?
        else {
            return Ok(None);
        };
        let Some(Value::Object(map)) = pkg.browser() else {
            return Ok(None);
        };

        let map_id = if is_file_path {
            relative_id(pkg.dir_id(), id)
        } else {
            id.to_string()
        };

        let mapped = match map_with_browser_field(&map_id, map) {
            None => return Ok(None),
            Some(BrowserMapping::External) => {
                return Ok(Some(Resolution::Special(SpecialModule::BrowserExternal {
                    specifier: None,
                })))
            }
            Some(BrowserMapping::Path(mapped)) => mapped,
        };

        let resolved = if is_bare_import(&mapped) {
            self.try_node_resolve(&mapped, ctx, false)?.and_then(|r| r.id())
        } else {
            self.try_fs_resolve(&join_id(pkg.dir_id(), &mapped), ctx, true, false)?
        };
        let Some(resolved) = resolved else {
            return Ok(None);
        };
        tracing::debug!(id, mapped = %resolved, "browser field mapping");

        let side_effects = if !ctx.scan && self.options.is_build {
            self.side_effects_of(&resolved)?
        } else {
            None
        };
        Ok(Some(if externalize {
            Resolution::External {
                id: resolved,
                side_effects,
            }
        } else {
            Resolution::Resolved {
                id: resolved,
                side_effects,
            }
        }))
    }

    /// Entry named by the `browser` field, if any.
    ///
    /// When the package also has a distinct `module` entry, the browser
    /// entry is read and kept only if it looks like ESM; otherwise `module`
    /// is preferred.
    pub(super) fn try_resolve_browser_entry(
        &self,
        pkg: &crate::packages::PackageData,
        ctx: &Ctx<'_>,
    ) -> Result<Option<String>, ResolveError> {
        let browser_entry = match pkg.browser() {
            Some(Value::String(s)) => s.as_str(),
            Some(Value::Object(map)) => match map.get(".").and_then(Value::as_str) {
                Some(s) => s,
                None => return Ok(None),
            },
            _ => return Ok(None),
        };

        let module = pkg.field_str("module");
        let wants_module = self.options.main_fields.iter().any(|f| f == "module");
        match module {
            Some(module) if !ctx.is_require && wants_module && module != browser_entry => {
                let path = join_id(pkg.dir_id(), browser_entry);
                let Some(resolved) = self.try_fs_resolve(&path, ctx, true, false)? else {
                    return Ok(None);
                };
                let file = clean_url(&resolved);
                let content = modgraph_util::fs::read_to_string_lossy(Path::new(file)).map_err(
                    |source| ResolveError::Read {
                        path: file.into(),
                        source,
                    },
                )?;
                if has_esm_syntax(&content) {
                    Ok(Some(browser_entry.to_string()))
                } else {
                    Ok(Some(module.to_string()))
                }
            }
            _ => Ok(Some(browser_entry.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_map_with_browser_field() {
        let field = json!({
            "./server.js": "./client.js",
            "./lib/node": "./lib/browser.js",
            "./lib/fs/index.js": false,
            "module-a": "module-b"
        });
        let map = field.as_object().unwrap();
        assert_eq!(
            map_with_browser_field("./server.js", map),
            Some(BrowserMapping::Path("./client.js".to_string()))
        );
        assert_eq!(
            map_with_browser_field("server", map),
            Some(BrowserMapping::Path("./client.js".to_string()))
        );
        assert_eq!(
            map_with_browser_field("./lib/node", map),
            Some(BrowserMapping::Path("./lib/browser.js".to_string()))
        );
        assert_eq!(map_with_browser_field("./lib/fs", map), Some(BrowserMapping::External));
        assert_eq!(
            map_with_browser_field("module-a", map),
            Some(BrowserMapping::Path("module-b".to_string()))
        );
        assert_eq!(map_with_browser_field("./other.js", map), None);
    }

    #[test]
    fn test_has_esm_syntax() {
        assert!(has_esm_syntax("import { a } from './a.js'"));
        assert!(has_esm_syntax("const x = 1;export default x"));
        assert!(has_esm_syntax("const url = 1;\nimport.meta.hot.accept()"));
        // Only statement-leading `import.meta` counts.
        assert!(!has_esm_syntax("console.log(import.meta.url)"));
        assert!(!has_esm_syntax("module.exports = require('./a')"));
        assert!(!has_esm_syntax("(function (root, factory) { root.x = factory() })(this)"));
    }
}
