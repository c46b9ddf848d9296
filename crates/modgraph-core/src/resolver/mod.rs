//! Module specifier resolver.
//!
//! Resolution is layered and strictly ordered: virtual ids, data URLs,
//! subpath imports, optimized dependency URLs, `/@fs/` paths, `file://`
//! URLs, external URLs, root-relative paths, relative paths, absolute paths
//! and finally bare package specifiers (with `exports`, `browser` and main
//! field handling, built-ins and externalization). The first step that
//! produces a definitive answer, success or hard failure, wins.
//!
//! Ids are forward-slash strings internally. Filesystem probing lives in
//! [`fs`], package lookups in [`node`], `browser` field mapping in
//! [`browser`].

mod browser;
mod builtins;
mod error;
pub mod exports;
mod external;
mod fs;
mod memo;
mod node;
mod special;

pub use builtins::is_builtin;
pub use error::ResolveError;
pub use memo::ResolveMemo;
pub use special::SpecialModule;

use crate::config::{Consumer, ExternalConfig, NoExternalConfig, OptimizeDepsConfig, ProjectConfig};
use crate::imports::ImportKind;
use crate::optimizer::DepsOptimizer;
use crate::packages::PackageCache;
use crate::patterns::{
    has_version_query, is_bare_import, is_data_url, is_external_url, is_optimizable,
    is_ts_request, is_virtual_id, FS_PREFIX,
};
use external::ExternalMatcher;
use modgraph_util::path::{inject_query, is_in_node_modules, normalize_slashes, posix_normalize};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Outcome of resolving one specifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Resolution {
    /// A concrete file id, possibly with a `?query` postfix.
    Resolved {
        id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        side_effects: Option<bool>,
    },
    /// Left for the runtime to load: URLs, built-ins, externalized deps.
    External {
        id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        side_effects: Option<bool>,
    },
    /// No step matched. Callers treat this as a soft miss.
    NotFound,
    /// A placeholder module (browser stub, optional peer dep, virtual id).
    Special(SpecialModule),
}

impl Resolution {
    pub(crate) fn resolved(id: impl Into<String>) -> Self {
        Self::Resolved {
            id: id.into(),
            side_effects: None,
        }
    }

    pub(crate) fn external(id: impl Into<String>) -> Self {
        Self::External {
            id: id.into(),
            side_effects: None,
        }
    }

    /// The id carried by this result, encoding special modules.
    #[must_use]
    pub fn id(&self) -> Option<String> {
        match self {
            Self::Resolved { id, .. } | Self::External { id, .. } => Some(id.clone()),
            Self::Special(special) => Some(special.encode()),
            Self::NotFound => None,
        }
    }

    #[must_use]
    pub fn is_found(&self) -> bool {
        !matches!(self, Self::NotFound)
    }

    #[must_use]
    pub fn is_external(&self) -> bool {
        matches!(self, Self::External { .. })
    }
}

/// One resolution call.
#[derive(Debug, Clone, Copy)]
pub struct ResolveRequest<'a> {
    pub specifier: &'a str,
    /// Absolute id of the importing module.
    pub importer: Option<&'a str>,
    pub kind: ImportKind,
    /// Dependency-scan mode: no optimizer redirects, no version queries.
    pub scan: bool,
    /// The importer is TypeScript even if its id does not say so (e.g. a
    /// `<script lang="ts">` block).
    pub ts_importer: bool,
}

impl<'a> ResolveRequest<'a> {
    #[must_use]
    pub fn new(specifier: &'a str) -> Self {
        Self {
            specifier,
            importer: None,
            kind: ImportKind::Import,
            scan: false,
            ts_importer: false,
        }
    }

    #[must_use]
    pub fn importer(mut self, importer: &'a str) -> Self {
        self.importer = Some(importer);
        self
    }

    #[must_use]
    pub fn kind(mut self, kind: ImportKind) -> Self {
        self.kind = kind;
        self
    }

    #[must_use]
    pub fn scan(mut self, scan: bool) -> Self {
        self.scan = scan;
        self
    }

    #[must_use]
    pub fn ts_importer(mut self, ts: bool) -> Self {
        self.ts_importer = ts;
        self
    }
}

/// Resolver settings derived from [`ProjectConfig`]. Immutable for the
/// lifetime of a [`Resolver`].
#[derive(Debug, Clone)]
pub struct ResolveOptions {
    pub root: PathBuf,
    pub conditions: Vec<String>,
    pub main_fields: Vec<String>,
    pub extensions: Vec<String>,
    pub dedupe: Vec<String>,
    pub preserve_symlinks: bool,
    pub try_prefix: Option<String>,
    pub prefer_relative: bool,
    pub is_production: bool,
    pub is_build: bool,
    /// Resolving ids for source serving (dev server requests).
    pub as_src: bool,
    pub consumer: Consumer,
    /// Externalize bare dependencies for server builds.
    pub externalize: bool,
    pub external: ExternalConfig,
    pub no_external: NoExternalConfig,
    pub optimize_deps: OptimizeDepsConfig,
}

impl ResolveOptions {
    #[must_use]
    pub fn from_config(config: &ProjectConfig) -> Self {
        let resolve = &config.resolve;
        Self {
            root: config.root.clone(),
            conditions: resolve.conditions.clone(),
            main_fields: resolve.main_fields.clone(),
            extensions: resolve.extensions.clone(),
            dedupe: resolve.dedupe.clone(),
            preserve_symlinks: resolve.preserve_symlinks,
            try_prefix: resolve.try_prefix.clone(),
            prefer_relative: resolve.prefer_relative,
            is_production: config.is_production(),
            is_build: config.is_build(),
            as_src: true,
            consumer: config.consumer,
            externalize: config.consumer == Consumer::Server,
            external: resolve.external.clone(),
            no_external: resolve.no_external.clone(),
            optimize_deps: config.optimize_deps.clone(),
        }
    }

    fn target_web(&self) -> bool {
        self.consumer == Consumer::Client
    }

    fn browser_field_active(&self) -> bool {
        self.target_web() && self.main_fields.iter().any(|f| f == "browser")
    }
}

/// Per-call state threaded through the resolution steps.
#[derive(Debug, Clone, Copy)]
struct Ctx<'a> {
    importer: Option<&'a str>,
    is_require: bool,
    scan: bool,
    ts_importer: bool,
    /// Allow optimizer redirects (off while probing externalization).
    optimize: bool,
}

/// The layered specifier resolver.
///
/// Cheap to share behind an `Arc`; all interior caches are synchronized.
#[derive(Debug)]
pub struct Resolver {
    options: Arc<ResolveOptions>,
    packages: Arc<PackageCache>,
    optimizer: Option<Arc<DepsOptimizer>>,
    externals: ExternalMatcher,
    root_id: String,
    root_in_root: bool,
    import_conditions: Vec<String>,
    require_conditions: Vec<String>,
}

impl Resolver {
    pub fn new(options: ResolveOptions, packages: Arc<PackageCache>) -> Result<Self, ResolveError> {
        let root = dunce::canonicalize(&options.root).unwrap_or_else(|_| options.root.clone());
        let root_id = normalize_slashes(&root);
        let root_in_root = Path::new(&root_id)
            .join(root_id.trim_start_matches('/'))
            .is_dir();
        let externals = ExternalMatcher::new(&options.no_external)?;
        let import_conditions =
            exports::get_conditions(&options.conditions, options.is_production, false);
        let require_conditions =
            exports::get_conditions(&options.conditions, options.is_production, true);
        Ok(Self {
            options: Arc::new(options),
            packages,
            optimizer: None,
            externals,
            root_id,
            root_in_root,
            import_conditions,
            require_conditions,
        })
    }

    /// Attach a dependency optimizer for dev-time redirects.
    #[must_use]
    pub fn with_optimizer(mut self, optimizer: Arc<DepsOptimizer>) -> Self {
        self.optimizer = Some(optimizer);
        self
    }

    #[must_use]
    pub fn options(&self) -> &ResolveOptions {
        &self.options
    }

    #[must_use]
    pub fn packages(&self) -> &Arc<PackageCache> {
        &self.packages
    }

    #[must_use]
    pub fn optimizer(&self) -> Option<&Arc<DepsOptimizer>> {
        self.optimizer.as_ref()
    }

    /// Resolve through a memo shared by one scan or build pass.
    pub fn resolve_cached(
        &self,
        memo: &ResolveMemo,
        request: &ResolveRequest<'_>,
    ) -> Result<Resolution, ResolveError> {
        let importer_dir = request
            .importer
            .map(|i| parent_id(i).to_string())
            .unwrap_or_default();
        let key = format!(
            "{}\0{}\0{:?}\0{}\0{}",
            request.specifier, importer_dir, request.kind, request.scan, request.ts_importer
        );
        memo.get_or_resolve(self.packages.epoch(), key, || self.resolve(request))
    }

    /// Resolve one specifier.
    pub fn resolve(&self, request: &ResolveRequest<'_>) -> Result<Resolution, ResolveError> {
        let ctx = Ctx {
            importer: request.importer,
            is_require: request.kind == ImportKind::Require,
            scan: request.scan,
            ts_importer: request.ts_importer || request.importer.is_some_and(is_ts_request),
            optimize: true,
        };
        let result = self.resolve_inner(request.specifier, &ctx)?;
        tracing::trace!(specifier = request.specifier, importer = ?request.importer, ?result, "resolved");
        Ok(result)
    }

    fn resolve_inner(&self, specifier: &str, ctx: &Ctx<'_>) -> Result<Resolution, ResolveError> {
        let opts = &*self.options;

        if is_virtual_id(specifier) {
            return Ok(Resolution::Special(SpecialModule::Virtual {
                id: specifier.to_string(),
            }));
        }
        if let Some(special) = SpecialModule::decode(specifier) {
            return Ok(Resolution::Special(special));
        }

        if is_data_url(specifier) {
            return Ok(Resolution::external(specifier));
        }

        // `#` subpath imports rewrite the specifier and keep going.
        let rewritten;
        let mut id = specifier;
        if id.starts_with('#') {
            rewritten = self.resolve_subpath_import(id, ctx)?;
            id = &rewritten;
        }

        if opts.as_src {
            if let Some(optimizer) = &self.optimizer {
                if optimizer.is_optimized_dep_url(id) {
                    return Ok(Resolution::resolved(optimizer.resolve_dep_url(id)));
                }
            }

            // Explicit filesystem requests are trusted as-is.
            if let Some(rest) = id.strip_prefix(FS_PREFIX) {
                let fs_path = format!("/{rest}");
                return Ok(Resolution::resolved(self.ensure_version_query(fs_path, id, ctx)));
            }
        }

        let file_url_path;
        if id.starts_with("file://") {
            file_url_path = file_url_to_id(id)?;
            id = &file_url_path;
        }

        if is_external_url(id) {
            return Ok(Resolution::external(id));
        }

        if opts.as_src
            && id.starts_with('/')
            && (self.root_in_root || !id.starts_with(&format!("{}/", self.root_id)))
        {
            let fs_path = join_id(&self.root_id, &id[1..]);
            if let Some(res) = self.try_fs_resolve(&fs_path, ctx, true, false)? {
                return Ok(Resolution::resolved(self.ensure_version_query(res, id, ctx)));
            }
        }

        let importer_is_html = ctx.importer.is_some_and(|i| i.ends_with(".html"));
        let starts_with_word = id.chars().next().is_some_and(|c| c.is_alphanumeric() || c == '_');
        if id.starts_with('.') || ((opts.prefer_relative || importer_is_html) && starts_with_word) {
            if let Some(res) = self.resolve_relative(id, ctx)? {
                return Ok(res);
            }
        }

        if is_absolute_id(id) {
            if let Some(res) = self.try_fs_resolve(id, ctx, true, false)? {
                return Ok(Resolution::resolved(self.ensure_version_query(res, id, ctx)));
            }
        }

        if is_bare_import(id) {
            return self.resolve_bare(id, ctx);
        }

        Ok(Resolution::NotFound)
    }

    fn resolve_relative(&self, id: &str, ctx: &Ctx<'_>) -> Result<Option<Resolution>, ResolveError> {
        let basedir = ctx.importer.map_or(self.root_id.as_str(), parent_id);
        let fs_path = join_id(basedir, id);

        if let Some(optimizer) = &self.optimizer {
            if optimizer.is_optimized_dep_file(&fs_path) {
                if !self.options.is_build && !has_version_query(&fs_path) {
                    if let Some(info) = optimizer.optimized_dep_info_from_file(&fs_path) {
                        return Ok(Some(Resolution::resolved(inject_query(
                            &fs_path,
                            &format!("v={}", info.browser_hash),
                        ))));
                    }
                }
                return Ok(Some(Resolution::resolved(fs_path)));
            }
        }

        if self.options.browser_field_active() {
            if let Some(res) = self.try_resolve_browser_mapping(&fs_path, ctx, true, false)? {
                return Ok(Some(res));
            }
        }

        let Some(res) = self.try_fs_resolve(&fs_path, ctx, true, false)? else {
            return Ok(None);
        };
        let res = self.ensure_version_query(res, id, ctx);
        let side_effects = if !ctx.scan && self.options.is_build {
            self.side_effects_of(&res)?
        } else {
            None
        };
        Ok(Some(Resolution::Resolved {
            id: res,
            side_effects,
        }))
    }

    fn resolve_bare(&self, id: &str, ctx: &Ctx<'_>) -> Result<Resolution, ResolveError> {
        let opts = &*self.options;
        let external = opts.externalize
            && opts.is_build
            && opts.consumer == Consumer::Server
            && self.should_externalize(id, ctx.importer);

        if !external && opts.as_src && ctx.optimize {
            if let Some(optimizer) = &self.optimizer {
                if ctx.scan {
                    if optimizer.optimized_dep_info_from_id(id).is_some() {
                        return Ok(Resolution::external(id));
                    }
                } else if let Some(res) = self.try_optimized_resolve(optimizer, id, ctx)? {
                    return Ok(Resolution::resolved(res));
                }
            }
        }

        if opts.browser_field_active() {
            if let Some(res) = self.try_resolve_browser_mapping(id, ctx, false, external)? {
                return Ok(res);
            }
        }

        if let Some(res) = self.try_node_resolve(id, ctx, external)? {
            return Ok(res);
        }

        if is_builtin(id) {
            return self.resolve_builtin(id, ctx);
        }

        Ok(Resolution::NotFound)
    }

    fn resolve_builtin(&self, id: &str, ctx: &Ctx<'_>) -> Result<Resolution, ResolveError> {
        let opts = &*self.options;
        if opts.consumer == Consumer::Server {
            let strict = matches!(opts.no_external, NoExternalConfig::All(true));
            if strict && (opts.external.is_all() || !opts.external.lists(id)) {
                return Err(ResolveError::BuiltinCannotBundle {
                    specifier: id.to_string(),
                    importer: ctx.importer.map(str::to_string),
                });
            }
            return Ok(Resolution::External {
                id: id.to_string(),
                side_effects: Some(false),
            });
        }

        if !opts.as_src {
            tracing::debug!(specifier = id, importer = ?ctx.importer, "externalized node built-in to empty module");
        } else if opts.is_production {
            tracing::warn!(
                "Module \"{id}\" has been externalized for browser compatibility, imported by \"{}\".",
                ctx.importer.unwrap_or("<unknown>")
            );
        }
        Ok(Resolution::Special(SpecialModule::BrowserExternal {
            specifier: (!opts.is_production).then(|| id.to_string()),
        }))
    }

    /// Rewrite a `#` specifier using the nearest package's `imports` field.
    fn resolve_subpath_import(&self, id: &str, ctx: &Ctx<'_>) -> Result<String, ResolveError> {
        let basedir = ctx.importer.map_or(self.root_id.as_str(), parent_id);
        let Some(pkg) = self.packages.find_nearest_package_data(Path::new(basedir))? else {
            return Ok(id.to_string());
        };
        let Some(imports) = pkg.imports() else {
            return Err(ResolveError::ImportNotDefined {
                specifier: id.to_string(),
                package_dir: pkg.dir().to_path_buf(),
            });
        };

        // The leading `#` is part of the key, not a hash postfix.
        let rest = id.strip_prefix('#').unwrap_or(id);
        let (file, postfix) = modgraph_util::path::split_file_and_postfix(rest);
        let key = format!("#{file}");
        let target = exports::resolve_imports(imports, &key, self.conditions(ctx.is_require))
            .map_err(|_| ResolveError::ImportNotDefined {
                specifier: id.to_string(),
                package_dir: pkg.dir().to_path_buf(),
            })?;

        if !target.starts_with('.') {
            // Bare target: resolved as a package from here on.
            return Ok(format!("{target}{postfix}"));
        }
        let absolute = join_id(pkg.dir_id(), &target);
        let relative = relative_id(basedir, &absolute);
        Ok(format!("{relative}{postfix}"))
    }

    /// Append `?v=<browserHash>` to optimizable files served from
    /// `node_modules` in dev so the browser can cache them.
    fn ensure_version_query(&self, resolved: String, id: &str, ctx: &Ctx<'_>) -> String {
        let Some(optimizer) = &self.optimizer else {
            return resolved;
        };
        if self.options.is_build || ctx.scan {
            return resolved;
        }
        let in_node_modules = is_in_node_modules(id) || is_in_node_modules(&resolved);
        if !in_node_modules || has_version_query(&resolved) {
            return resolved;
        }
        let hash = optimizer.browser_hash();
        if !hash.is_empty() && is_optimizable(&resolved, &self.options.optimize_deps.extensions) {
            return inject_query(&resolved, &format!("v={hash}"));
        }
        resolved
    }

    fn side_effects_of(&self, file: &str) -> Result<Option<bool>, ResolveError> {
        let dir = parent_id(file);
        Ok(self
            .packages
            .find_nearest_package_data(Path::new(dir))?
            .and_then(|pkg| pkg.has_side_effects(file)))
    }

    fn conditions(&self, is_require: bool) -> &[String] {
        if is_require {
            &self.require_conditions
        } else {
            &self.import_conditions
        }
    }
}

/// Directory part of an id (`/a/b.js` -> `/a`).
fn parent_id(id: &str) -> &str {
    let file = modgraph_util::path::clean_url(id);
    match file.rfind('/') {
        Some(0) => "/",
        Some(pos) => &file[..pos],
        None => ".",
    }
}

/// Join and normalize, keeping a `?query` postfix on `rel`.
fn join_id(base: &str, rel: &str) -> String {
    if rel.starts_with('/') || is_drive_path(rel) {
        return posix_normalize(rel);
    }
    posix_normalize(&format!("{base}/{rel}"))
}

/// `./x` or `../x` path from `from_dir` to `to`.
fn relative_id(from_dir: &str, to: &str) -> String {
    let from: Vec<&str> = from_dir.split('/').filter(|s| !s.is_empty()).collect();
    let target: Vec<&str> = to.split('/').filter(|s| !s.is_empty()).collect();
    let common = from.iter().zip(&target).take_while(|(a, b)| a == b).count();

    let mut parts: Vec<&str> = Vec::new();
    parts.extend(std::iter::repeat("..").take(from.len() - common));
    parts.extend(&target[common..]);
    let joined = parts.join("/");
    if joined.starts_with("..") {
        joined
    } else {
        format!("./{joined}")
    }
}

fn is_drive_path(id: &str) -> bool {
    let bytes = id.as_bytes();
    bytes.len() >= 3 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':' && bytes[2] == b'/'
}

fn is_absolute_id(id: &str) -> bool {
    id.starts_with('/') || is_drive_path(id)
}

fn file_url_to_id(url: &str) -> Result<String, ResolveError> {
    let (file, postfix) = modgraph_util::path::split_file_and_postfix(url);
    let invalid = || ResolveError::InvalidFileUrl {
        url: url.to_string(),
    };
    let parsed = url::Url::parse(file).map_err(|_| invalid())?;
    let path = parsed.to_file_path().map_err(|()| invalid())?;
    Ok(format!("{}{postfix}", normalize_slashes(&path)))
}
