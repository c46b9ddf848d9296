//! Package metadata cache.
//!
//! Parsed `package.json` files are cached per package directory and shared
//! as `Arc<PackageData>` snapshots. Clearing swaps the maps out and bumps an
//! epoch counter; readers holding an `Arc` keep a consistent view, and
//! resolvers that captured an older epoch know to drop their memoized
//! answers.

use modgraph_util::path::normalize_slashes;
use serde_json::Value;
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use thiserror::Error;

/// Errors loading package metadata. A missing `package.json` is not an error.
#[derive(Error, Debug)]
pub enum PackageError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// `sideEffects` field as declared by the package.
#[derive(Debug, Clone)]
enum SideEffects {
    Unknown,
    All(bool),
    Patterns(Vec<glob::Pattern>),
}

impl SideEffects {
    fn from_value(dir: &str, value: Option<&Value>) -> Self {
        match value {
            Some(Value::Bool(b)) => Self::All(*b),
            Some(Value::String(s)) => Self::Patterns(compile_side_effect_patterns(dir, [s.as_str()])),
            Some(Value::Array(items)) => Self::Patterns(compile_side_effect_patterns(
                dir,
                items.iter().filter_map(Value::as_str),
            )),
            _ => Self::Unknown,
        }
    }
}

fn compile_side_effect_patterns<'a>(
    dir: &str,
    patterns: impl IntoIterator<Item = &'a str>,
) -> Vec<glob::Pattern> {
    let base = glob::Pattern::escape(dir);
    patterns
        .into_iter()
        .filter_map(|raw| {
            let raw = raw.strip_prefix("./").unwrap_or(raw);
            // A bare file name matches at any depth.
            let full = if raw.contains('/') {
                format!("{base}/{raw}")
            } else {
                format!("{base}/**/{raw}")
            };
            match glob::Pattern::new(&full) {
                Ok(p) => Some(p),
                Err(e) => {
                    tracing::debug!(pattern = raw, error = %e, "ignoring invalid sideEffects pattern");
                    None
                }
            }
        })
        .collect()
}

/// One parsed `package.json`. Immutable apart from the memo of resolved entries.
#[derive(Debug)]
pub struct PackageData {
    dir: PathBuf,
    dir_id: String,
    data: Value,
    side_effects: SideEffects,
    resolved: Mutex<HashMap<String, String>>,
}

impl PackageData {
    /// Build from an already-parsed value.
    #[must_use]
    pub fn new(dir: PathBuf, data: Value) -> Self {
        let dir_id = normalize_slashes(&dir);
        let side_effects = SideEffects::from_value(&dir_id, data.get("sideEffects"));
        Self {
            dir,
            dir_id,
            data,
            side_effects,
            resolved: Mutex::new(HashMap::new()),
        }
    }

    /// Read and parse `<dir>/package.json`. Returns `Ok(None)` if the file
    /// does not exist.
    pub fn load(dir: &Path) -> Result<Option<Self>, PackageError> {
        let path = dir.join("package.json");
        if !path.is_file() {
            return Ok(None);
        }
        let content = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(PackageError::Read { path, source }),
        };
        let data: Value =
            serde_json::from_str(&content).map_err(|source| PackageError::Parse { path, source })?;
        Ok(Some(Self::new(dir.to_path_buf(), data)))
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Package directory with forward slashes.
    #[must_use]
    pub fn dir_id(&self) -> &str {
        &self.dir_id
    }

    #[must_use]
    pub fn data(&self) -> &Value {
        &self.data
    }

    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.field_str("name")
    }

    #[must_use]
    pub fn version(&self) -> Option<&str> {
        self.field_str("version")
    }

    #[must_use]
    pub fn exports(&self) -> Option<&Value> {
        self.data.get("exports").filter(|v| !v.is_null())
    }

    #[must_use]
    pub fn imports(&self) -> Option<&Value> {
        self.data.get("imports").filter(|v| !v.is_null())
    }

    #[must_use]
    pub fn browser(&self) -> Option<&Value> {
        self.data.get("browser").filter(|v| !v.is_null())
    }

    /// A top-level string field, e.g. `module` or `jsnext:main`.
    #[must_use]
    pub fn field_str(&self, field: &str) -> Option<&str> {
        self.data.get(field).and_then(Value::as_str)
    }

    /// `peerDependenciesMeta[id].optional === true`.
    #[must_use]
    pub fn is_optional_peer_dep(&self, id: &str) -> bool {
        self.data
            .get("peerDependenciesMeta")
            .and_then(|m| m.get(id))
            .and_then(|m| m.get("optional"))
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// Whether `file` (absolute, forward slashes) has side effects according
    /// to the package's `sideEffects` field. `None` when undeclared.
    #[must_use]
    pub fn has_side_effects(&self, file: &str) -> Option<bool> {
        match &self.side_effects {
            SideEffects::Unknown => None,
            SideEffects::All(b) => Some(*b),
            SideEffects::Patterns(patterns) => {
                let opts = glob::MatchOptions {
                    require_literal_separator: true,
                    ..Default::default()
                };
                Some(patterns.iter().any(|p| p.matches_with(file, opts)))
            }
        }
    }

    /// Memoized entry resolution for `key` (`.` or a deep subpath plus mode).
    #[must_use]
    pub fn get_resolved(&self, key: &str) -> Option<String> {
        self.resolved
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    pub fn set_resolved(&self, key: &str, resolved: &str) {
        self.resolved
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), resolved.to_string());
    }
}

/// Directory-keyed cache of parsed packages. `None` entries record
/// directories known to have no `package.json`.
#[derive(Debug, Default)]
pub struct PackageCache {
    by_dir: RwLock<HashMap<PathBuf, Option<Arc<PackageData>>>>,
    epoch: AtomicU64,
}

impl PackageCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current cache epoch. Changes on every clear or invalidation.
    #[must_use]
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    /// Load the package rooted at `dir`, using the cache.
    ///
    /// No lock is held while reading from disk; when two callers race on
    /// the same directory, the first inserted entry wins.
    pub fn load_package(&self, dir: &Path) -> Result<Option<Arc<PackageData>>, PackageError> {
        if let Some(entry) = self.read_map().get(dir) {
            return Ok(entry.clone());
        }

        let loaded = PackageData::load(dir)?.map(Arc::new);
        let mut map = self.by_dir.write().unwrap_or_else(PoisonError::into_inner);
        Ok(map.entry(dir.to_path_buf()).or_insert(loaded).clone())
    }

    /// Locate `node_modules/<name>` walking up from `basedir`.
    pub fn resolve_package_data(
        &self,
        name: &str,
        basedir: &Path,
        preserve_symlinks: bool,
    ) -> Result<Option<Arc<PackageData>>, PackageError> {
        for dir in basedir.ancestors() {
            if dir.file_name().is_some_and(|n| n == "node_modules") {
                continue;
            }
            let candidate = dir.join("node_modules").join(name);
            if !candidate.join("package.json").is_file() {
                continue;
            }
            let pkg_dir = if preserve_symlinks {
                candidate
            } else {
                dunce::canonicalize(&candidate).unwrap_or(candidate)
            };
            if let Some(pkg) = self.load_package(&pkg_dir)? {
                return Ok(Some(pkg));
            }
        }
        Ok(None)
    }

    /// The closest `package.json` at or above `basedir`.
    pub fn find_nearest_package_data(
        &self,
        basedir: &Path,
    ) -> Result<Option<Arc<PackageData>>, PackageError> {
        for dir in basedir.ancestors() {
            if let Some(pkg) = self.load_package(dir)? {
                return Ok(Some(pkg));
            }
        }
        Ok(None)
    }

    /// The closest `package.json` that declares a `name`. Nested manifests
    /// without one (e.g. `{"type": "module"}` markers) are skipped.
    pub fn find_nearest_main_package_data(
        &self,
        basedir: &Path,
    ) -> Result<Option<Arc<PackageData>>, PackageError> {
        let mut current = Some(basedir.to_path_buf());
        while let Some(dir) = current.as_deref() {
            let Some(pkg) = self.find_nearest_package_data(dir)? else {
                return Ok(None);
            };
            if pkg.name().is_some() {
                return Ok(Some(pkg));
            }
            current = pkg.dir().parent().map(Path::to_path_buf);
        }
        Ok(None)
    }

    /// Drop every cached package.
    pub fn clear(&self) {
        let old = std::mem::take(&mut *self.by_dir.write().unwrap_or_else(PoisonError::into_inner));
        self.epoch.fetch_add(1, Ordering::AcqRel);
        tracing::debug!(dropped = old.len(), epoch = self.epoch(), "package cache cleared");
    }

    /// Drop the entry for the package owning `package_json` (a changed
    /// `package.json` path), plus any negative entry for its directory.
    pub fn invalidate(&self, package_json: &Path) {
        let Some(dir) = package_json.parent() else {
            return;
        };
        let removed = self
            .by_dir
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(dir)
            .is_some();
        self.epoch.fetch_add(1, Ordering::AcqRel);
        tracing::debug!(dir = %dir.display(), removed, "package cache entry invalidated");
    }

    /// Number of cached directories, positive and negative.
    #[must_use]
    pub fn len(&self) -> usize {
        self.read_map().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read_map(&self) -> std::sync::RwLockReadGuard<'_, HashMap<PathBuf, Option<Arc<PackageData>>>> {
        self.by_dir.read().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::fs;
    use tempfile::tempdir;

    fn write_pkg(dir: &Path, value: &Value) {
        fs::create_dir_all(dir).unwrap();
        fs::write(dir.join("package.json"), value.to_string()).unwrap();
    }

    #[test]
    fn test_load_missing_is_none() {
        let dir = tempdir().unwrap();
        assert!(PackageData::load(dir.path()).unwrap().is_none());
    }

    #[test]
    fn test_load_malformed_is_error() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("package.json"), "{ nope").unwrap();
        let err = PackageData::load(dir.path()).unwrap_err();
        assert!(matches!(err, PackageError::Parse { .. }));
    }

    #[test]
    fn test_exports_key_order_preserved() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("package.json"),
            r#"{"exports": {"zeta": "./z.js", "alpha": "./a.js"}}"#,
        )
        .unwrap();
        let pkg = PackageData::load(dir.path()).unwrap().unwrap();
        let keys: Vec<_> = pkg.exports().unwrap().as_object().unwrap().keys().cloned().collect();
        assert_eq!(keys, vec!["zeta", "alpha"]);
    }

    #[test]
    fn test_side_effects() {
        let none = PackageData::new(PathBuf::from("/p"), json!({}));
        assert_eq!(none.has_side_effects("/p/index.js"), None);

        let pure = PackageData::new(PathBuf::from("/p"), json!({"sideEffects": false}));
        assert_eq!(pure.has_side_effects("/p/index.js"), Some(false));

        let listed = PackageData::new(
            PathBuf::from("/p"),
            json!({"sideEffects": ["*.css", "./src/polyfill.js"]}),
        );
        assert_eq!(listed.has_side_effects("/p/dist/deep/style.css"), Some(true));
        assert_eq!(listed.has_side_effects("/p/src/polyfill.js"), Some(true));
        assert_eq!(listed.has_side_effects("/p/src/index.js"), Some(false));
    }

    #[test]
    fn test_optional_peer_dep() {
        let pkg = PackageData::new(
            PathBuf::from("/p"),
            json!({"peerDependenciesMeta": {"sass": {"optional": true}, "less": {}}}),
        );
        assert!(pkg.is_optional_peer_dep("sass"));
        assert!(!pkg.is_optional_peer_dep("less"));
        assert!(!pkg.is_optional_peer_dep("stylus"));
    }

    #[test]
    fn test_resolve_package_data_walks_up() {
        let dir = tempdir().unwrap();
        let root = dunce::canonicalize(dir.path()).unwrap();
        write_pkg(&root.join("node_modules/react"), &json!({"name": "react"}));
        write_pkg(&root.join("node_modules/@scope/ui"), &json!({"name": "@scope/ui"}));
        let nested = root.join("src/components");
        fs::create_dir_all(&nested).unwrap();

        let cache = PackageCache::new();
        let react = cache.resolve_package_data("react", &nested, false).unwrap().unwrap();
        assert_eq!(react.name(), Some("react"));
        assert_eq!(react.dir(), root.join("node_modules/react"));

        let scoped = cache.resolve_package_data("@scope/ui", &nested, false).unwrap().unwrap();
        assert_eq!(scoped.name(), Some("@scope/ui"));

        assert!(cache.resolve_package_data("vue", &nested, false).unwrap().is_none());
    }

    #[test]
    fn test_nearest_main_package_skips_nameless() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        write_pkg(root, &json!({"name": "app"}));
        write_pkg(&root.join("src/esm"), &json!({"type": "module"}));

        let cache = PackageCache::new();
        let nearest = cache.find_nearest_package_data(&root.join("src/esm")).unwrap().unwrap();
        assert_eq!(nearest.name(), None);

        let main = cache
            .find_nearest_main_package_data(&root.join("src/esm"))
            .unwrap()
            .unwrap();
        assert_eq!(main.name(), Some("app"));
    }

    #[test]
    fn test_nearest_package_walks_through_node_modules() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        write_pkg(root, &json!({"name": "app"}));
        let loose = root.join("node_modules/loose/lib");
        std::fs::create_dir_all(&loose).unwrap();

        let cache = PackageCache::new();
        let nearest = cache.find_nearest_package_data(&loose).unwrap().unwrap();
        assert_eq!(nearest.name(), Some("app"));
        let main = cache.find_nearest_main_package_data(&loose).unwrap().unwrap();
        assert_eq!(main.dir(), root);
    }

    #[test]
    fn test_clear_bumps_epoch_and_keeps_snapshots() {
        let dir = tempdir().unwrap();
        write_pkg(dir.path(), &json!({"name": "before"}));

        let cache = PackageCache::new();
        let before = cache.load_package(dir.path()).unwrap().unwrap();
        let epoch = cache.epoch();

        write_pkg(dir.path(), &json!({"name": "after"}));
        // Still cached.
        assert_eq!(cache.load_package(dir.path()).unwrap().unwrap().name(), Some("before"));

        cache.clear();
        assert!(cache.epoch() > epoch);
        assert!(cache.is_empty());
        assert_eq!(before.name(), Some("before"));
        assert_eq!(cache.load_package(dir.path()).unwrap().unwrap().name(), Some("after"));
    }

    #[test]
    fn test_invalidate_single_entry() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("a");
        let b = dir.path().join("b");
        write_pkg(&a, &json!({"name": "a"}));
        write_pkg(&b, &json!({"name": "b"}));

        let cache = PackageCache::new();
        cache.load_package(&a).unwrap();
        cache.load_package(&b).unwrap();
        assert_eq!(cache.len(), 2);

        let epoch = cache.epoch();
        cache.invalidate(&a.join("package.json"));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.epoch(), epoch + 1);
    }

    #[test]
    fn test_resolved_memo() {
        let pkg = PackageData::new(PathBuf::from("/p"), json!({}));
        assert!(pkg.get_resolved(".").is_none());
        pkg.set_resolved(".", "/p/index.js");
        assert_eq!(pkg.get_resolved(".").as_deref(), Some("/p/index.js"));
    }
}
