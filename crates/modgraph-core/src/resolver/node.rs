//! Bare package resolution through `node_modules`.

use super::exports::{self, LookupError};
use super::{is_absolute_id, join_id, parent_id, Ctx, Resolution, ResolveError, Resolver, SpecialModule};
use crate::optimizer::DepsOptimizer;
use crate::packages::PackageData;
use crate::patterns::{can_externalize_file, is_bare_import, is_optimizable, is_special_query};
use super::builtins::is_builtin;
use super::browser::{map_with_browser_field, BrowserMapping};
use modgraph_util::path::{clean_url, extname, inject_query, is_in_node_modules, split_file_and_postfix};
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;

/// A package-level lookup result before it becomes a [`Resolution`].
enum PackageHit {
    File(String),
    /// `browser` field maps the file to `false`.
    BrowserStub,
}

/// Parse a bare specifier into package name and optional subpath.
pub(super) fn parse_bare_specifier(spec: &str) -> (&str, Option<&str>) {
    // Scoped package: @scope/pkg or @scope/pkg/subpath
    if spec.starts_with('@') {
        let mut slash_count = 0;
        for (i, c) in spec.char_indices() {
            if c == '/' {
                slash_count += 1;
                if slash_count == 2 {
                    return (&spec[..i], Some(&spec[i + 1..]));
                }
            }
        }
        return (spec, None);
    }

    if let Some(pos) = spec.find('/') {
        (&spec[..pos], Some(&spec[pos + 1..]))
    } else {
        (spec, None)
    }
}

/// Package name of a bare id, or `None` for a malformed scoped name.
pub(super) fn npm_package_name(id: &str) -> Option<&str> {
    let (name, _) = parse_bare_specifier(id);
    if name.starts_with('@') && !name.contains('/') {
        return None;
    }
    Some(clean_url(name))
}

impl Resolver {
    /// Resolve a bare specifier to a file inside its package.
    ///
    /// `externalize` marks the result external (server builds), rewriting
    /// deep imports back to their shallow request form where possible.
    pub(super) fn try_node_resolve(
        &self,
        id: &str,
        ctx: &Ctx<'_>,
        externalize: bool,
    ) -> Result<Option<Resolution>, ResolveError> {
        let opts = &*self.options;
        let (name, subpath) = parse_bare_specifier(id);
        let deep = subpath.is_some_and(|s| !s.is_empty());
        let pkg_id = if deep { name } else { clean_url(id) };

        let basedir = if opts.dedupe.iter().any(|d| d == pkg_id) {
            self.root_id.as_str()
        } else {
            match ctx.importer {
                Some(importer)
                    if is_absolute_id(importer)
                        && (importer.ends_with('*') || Path::new(clean_url(importer)).exists()) =>
                {
                    parent_id(importer)
                }
                _ => self.root_id.as_str(),
            }
        };

        let plain_bare = !is_builtin(id) && !id.contains('\0') && is_bare_import(id);
        let self_pkg = if plain_bare {
            self.packages
                .find_nearest_package_data(Path::new(basedir))?
                .filter(|pkg| pkg.exports().is_some() && pkg.name() == Some(pkg_id))
        } else {
            None
        };

        let pkg = match self_pkg {
            Some(pkg) => pkg,
            None => match self
                .packages
                .resolve_package_data(pkg_id, Path::new(basedir), opts.preserve_symlinks)?
            {
                Some(pkg) => pkg,
                None => {
                    if basedir != self.root_id && plain_bare {
                        return self.optional_peer_dep(id, basedir);
                    }
                    return Ok(None);
                }
            },
        };

        let hit = if deep {
            let rest = &id[pkg_id.len()..];
            self.resolve_deep_import(&format!(".{rest}"), &pkg, ctx)?
        } else {
            Some(PackageHit::File(self.resolve_package_entry(id, &pkg, ctx)?))
        };
        let mut resolved = match hit {
            None => return Ok(None),
            Some(PackageHit::BrowserStub) => {
                return Ok(Some(Resolution::Special(SpecialModule::BrowserExternal {
                    specifier: None,
                })))
            }
            Some(PackageHit::File(file)) => file,
        };

        if (!ctx.scan && opts.is_build && self.optimizer.is_none()) || externalize {
            let side_effects = pkg.has_side_effects(&resolved);
            return Ok(Some(process_result(id, deep, &pkg, resolved, side_effects, externalize)));
        }

        let optimizer = match &self.optimizer {
            Some(optimizer) if ctx.optimize && !ctx.scan && is_in_node_modules(&resolved) => optimizer,
            _ => return Ok(Some(Resolution::resolved(resolved))),
        };

        // A dependency import that has not been optimized yet.
        let deps = &opts.optimize_deps;
        let is_js_type = is_optimizable(&resolved, &deps.extensions);
        let skip_optimization = deps.no_discovery
            || !is_js_type
            || ctx.importer.is_some_and(is_in_node_modules)
            || deps.exclude.iter().any(|e| e == pkg_id || e == id)
            || is_special_query(&resolved);

        if skip_optimization {
            if !opts.is_build {
                let hash = optimizer.browser_hash();
                if !hash.is_empty() && is_js_type {
                    resolved = inject_query(&resolved, &format!("v={hash}"));
                }
            }
        } else {
            let info = optimizer.register_missing_import(id, &resolved);
            resolved = optimizer.get_optimized_dep_id(&info);
        }
        Ok(Some(Resolution::resolved(resolved)))
    }

    /// A missing dependency declared as an optional peer of the nearest main
    /// package resolves to a placeholder that fails only when loaded.
    fn optional_peer_dep(&self, id: &str, basedir: &str) -> Result<Option<Resolution>, ResolveError> {
        let Some(main) = self.packages.find_nearest_main_package_data(Path::new(basedir))? else {
            return Ok(None);
        };
        let Some(name) = npm_package_name(id) else {
            return Ok(None);
        };
        let declared = main
            .data()
            .get("peerDependencies")
            .and_then(|p| p.get(name))
            .is_some();
        if declared && main.is_optional_peer_dep(name) {
            return Ok(Some(Resolution::Special(SpecialModule::OptionalPeerDep {
                specifier: id.to_string(),
                parent: main.name().unwrap_or_default().to_string(),
            })));
        }
        Ok(None)
    }

    /// Resolve the root entry of a package: `exports["."]`, then main fields,
    /// then `main`, then `index.js`/`index.json`/`index.node`.
    pub(super) fn resolve_package_entry(
        &self,
        id: &str,
        pkg: &PackageData,
        ctx: &Ctx<'_>,
    ) -> Result<String, ResolveError> {
        let opts = &*self.options;
        let (file, postfix) = split_file_and_postfix(id);
        let cache_key = format!(".&{}", ctx.is_require);
        if let Some(cached) = pkg.get_resolved(&cache_key) {
            return Ok(format!("{cached}{postfix}"));
        }

        let failure = |details: Option<String>| ResolveError::PackageEntry {
            package: file.to_string(),
            details,
        };

        let mut entry: Option<String> = None;
        if let Some(exports) = pkg.exports() {
            match exports::resolve_exports(exports, ".", self.conditions(ctx.is_require)) {
                Ok(target) => entry = Some(target),
                Err(e) => return Err(failure(Some(describe_lookup_error(&e, ".", pkg)))),
            }
        }

        if entry.is_none() {
            for field in &opts.main_fields {
                if field == "browser" {
                    if opts.target_web() {
                        if let Some(browser_entry) = self.try_resolve_browser_entry(pkg, ctx)? {
                            entry = Some(browser_entry);
                            break;
                        }
                    }
                } else if let Some(value) = pkg.field_str(field) {
                    entry = Some(value.to_string());
                    break;
                }
            }
        }

        let candidates = match entry.or_else(|| pkg.field_str("main").map(str::to_string)) {
            Some(entry) => vec![entry],
            None => ["index.js", "index.json", "index.node"].map(String::from).to_vec(),
        };

        for mut candidate in candidates {
            let mut skip_package_json = false;
            let is_sass = opts.main_fields.first().is_some_and(|f| f == "sass");
            if is_sass && !opts.extensions.iter().any(|ext| ext == extname(&candidate)) {
                // Looking for styles; don't pick up the script entry.
                candidate.clear();
                skip_package_json = true;
            } else if opts.browser_field_active() {
                if let Some(Value::Object(map)) = pkg.browser() {
                    if let Some(BrowserMapping::Path(mapped)) = map_with_browser_field(&candidate, map) {
                        candidate = mapped;
                    }
                }
            }

            let entry_path = join_id(pkg.dir_id(), &candidate);
            if let Some(resolved) = self.try_fs_resolve(&entry_path, ctx, true, skip_package_json)? {
                tracing::debug!(package = file, entry = %resolved, "resolved package entry");
                pkg.set_resolved(&cache_key, &resolved);
                return Ok(format!("{resolved}{postfix}"));
            }
        }

        Err(failure(None))
    }

    /// Resolve `./sub/path` inside a package.
    fn resolve_deep_import(
        &self,
        id: &str,
        pkg: &PackageData,
        ctx: &Ctx<'_>,
    ) -> Result<Option<PackageHit>, ResolveError> {
        let cache_key = format!("{id}&{}", ctx.is_require);
        if let Some(cached) = pkg.get_resolved(&cache_key) {
            return Ok(Some(PackageHit::File(cached)));
        }

        let mut relative = id.to_string();
        if let Some(exports) = pkg.exports() {
            let (file, postfix) = split_file_and_postfix(id);
            let target = if exports.is_object() {
                exports::resolve_exports(exports, file, self.conditions(ctx.is_require)).ok()
            } else {
                None
            };
            match target {
                Some(target) => relative = format!("{target}{postfix}"),
                None => {
                    return Err(ResolveError::SubpathNotExported {
                        subpath: file.to_string(),
                        package: pkg.name().unwrap_or_default().to_string(),
                        package_dir: pkg.dir().to_path_buf(),
                        importer: ctx.importer.map(str::to_string),
                    })
                }
            }
        } else if self.options.browser_field_active() {
            if let Some(Value::Object(map)) = pkg.browser() {
                let (file, postfix) = split_file_and_postfix(id);
                match map_with_browser_field(file, map) {
                    Some(BrowserMapping::Path(mapped)) => relative = format!("{mapped}{postfix}"),
                    Some(BrowserMapping::External) => return Ok(Some(PackageHit::BrowserStub)),
                    None => {}
                }
            }
        }

        let try_index = pkg.exports().is_none();
        let resolved = self.try_fs_resolve(&join_id(pkg.dir_id(), &relative), ctx, try_index, false)?;
        Ok(resolved.map(|file| {
            pkg.set_resolved(&cache_key, &file);
            PackageHit::File(file)
        }))
    }

    /// Redirect a bare id to its pre-bundled output. Also matches nested
    /// optimized entries (`parent > id`) when `id` resolves to the same
    /// package directory from this importer.
    pub(super) fn try_optimized_resolve(
        &self,
        optimizer: &Arc<DepsOptimizer>,
        id: &str,
        ctx: &Ctx<'_>,
    ) -> Result<Option<String>, ResolveError> {
        if let Some(info) = optimizer.optimized_dep_info_from_id(id) {
            return Ok(Some(optimizer.get_optimized_dep_id(&info)));
        }
        let Some(importer) = ctx.importer else {
            return Ok(None);
        };

        let nested = format!("> {id}");
        let mut id_pkg_dir: Option<String> = None;
        for info in optimizer.dep_info_list() {
            if info.src.is_empty() || !info.id.ends_with(&nested) {
                continue;
            }
            if id_pkg_dir.is_none() {
                let Some(name) = npm_package_name(id) else {
                    break;
                };
                let Some(pkg) = self.packages.resolve_package_data(
                    name,
                    Path::new(parent_id(importer)),
                    self.options.preserve_symlinks,
                )?
                else {
                    break;
                };
                id_pkg_dir = Some(pkg.dir_id().to_string());
            }
            let Some(dir) = &id_pkg_dir else {
                break;
            };
            if info.src.starts_with(&format!("{dir}/")) {
                return Ok(Some(optimizer.get_optimized_dep_id(&info)));
            }
        }
        Ok(None)
    }
}

fn process_result(
    id: &str,
    deep: bool,
    pkg: &PackageData,
    resolved: String,
    side_effects: Option<bool>,
    externalize: bool,
) -> Resolution {
    // Linked packages and non-JS files stay bundled.
    if !externalize || !is_in_node_modules(&resolved) || !can_externalize_file(&resolved) {
        return Resolution::Resolved {
            id: resolved,
            side_effects,
        };
    }

    let mut external_id = id.to_string();
    if deep && pkg.exports().is_none() && extname(id) != extname(&resolved) {
        // `date-fns/locale` -> `date-fns/esm/locale/index.js`
        if let Some(index) = resolved.find(id) {
            external_id = resolved[index..].to_string();
            tracing::debug!(id, external = %external_id, "rewrote externalized deep import");
        }
    }
    Resolution::External {
        id: external_id,
        side_effects,
    }
}

fn describe_lookup_error(error: &LookupError, subpath: &str, pkg: &PackageData) -> String {
    let name = pkg.name().unwrap_or("<unnamed>");
    match error {
        LookupError::Missing => format!("Missing \"{subpath}\" specifier in \"{name}\" package"),
        LookupError::NoConditionMatch => {
            format!("No known conditions for \"{subpath}\" specifier in \"{name}\" package")
        }
        LookupError::InvalidTarget(target) => {
            format!("Invalid \"exports\" target \"{target}\" for \"{subpath}\" in \"{name}\" package")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bare_specifier() {
        assert_eq!(parse_bare_specifier("lodash"), ("lodash", None));
        assert_eq!(parse_bare_specifier("lodash/map"), ("lodash", Some("map")));
        assert_eq!(parse_bare_specifier("@scope/pkg"), ("@scope/pkg", None));
        assert_eq!(
            parse_bare_specifier("@scope/pkg/deep/file.js"),
            ("@scope/pkg", Some("deep/file.js"))
        );
    }

    #[test]
    fn test_npm_package_name() {
        assert_eq!(npm_package_name("react-dom/client"), Some("react-dom"));
        assert_eq!(npm_package_name("@vue/shared"), Some("@vue/shared"));
        assert_eq!(npm_package_name("vue?x=1"), Some("vue"));
        assert_eq!(npm_package_name("@broken"), None);
    }
}
