//! Dependency optimizer metadata.
//!
//! Tracks which bare dependencies are (or will be) served from the
//! pre-bundle cache directory, the hashes that identify the current
//! optimization, and dependencies discovered at request time. Producing the
//! bundles themselves is left to an external bundler; this module owns the
//! ids, URLs and `_metadata.json` they are keyed by.

use crate::config::{OptimizeDepsConfig, ProjectConfig};
use crate::patterns::FS_PREFIX;
use crate::scan::ScanResult;
use modgraph_util::hash::{blake3_file, short_hash};
use modgraph_util::path::{clean_url, normalize_slashes};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

const METADATA_FILE: &str = "_metadata.json";
const MAX_FLAT_ID_LEN: usize = 170;
const LOCKFILES: &[&str] = &["package-lock.json", "yarn.lock", "pnpm-lock.yaml", "bun.lockb"];

/// One optimized (or pending) dependency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimizedDepInfo {
    /// Bare specifier, or `parent > child` for nested entries.
    pub id: String,
    /// Resolved source entry.
    pub src: String,
    /// Output file in the deps directory.
    pub file: String,
    pub browser_hash: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimizerMetadata {
    /// Identity of config plus lockfile.
    pub hash: String,
    /// Changes whenever the optimized set changes; appended as `?v=`.
    pub browser_hash: String,
    pub optimized: BTreeMap<String, OptimizedDepInfo>,
    /// Discovered after the initial scan; waiting for the next optimize run.
    #[serde(skip)]
    pub discovered: BTreeMap<String, OptimizedDepInfo>,
}

#[derive(Debug)]
pub struct DepsOptimizer {
    metadata: RwLock<OptimizerMetadata>,
    deps_dir: PathBuf,
    deps_dir_id: String,
    url_prefix: String,
    root_id: String,
    options: OptimizeDepsConfig,
}

impl DepsOptimizer {
    /// An optimizer with no optimized dependencies yet.
    #[must_use]
    pub fn new(config: &ProjectConfig) -> Self {
        let hash = config_hash(config);
        let metadata = OptimizerMetadata {
            browser_hash: short_hash([hash.as_str()], 8),
            hash,
            ..Default::default()
        };
        Self::with_metadata(config, metadata)
    }

    /// Seed from a dependency scan: every scanned dependency becomes an
    /// optimized entry.
    #[must_use]
    pub fn from_scan(config: &ProjectConfig, scan: &ScanResult) -> Self {
        let hash = config_hash(config);
        let browser_hash = short_hash([hash.as_str(), scan.hash().as_str()], 8);
        let optimizer = Self::with_metadata(
            config,
            OptimizerMetadata {
                hash,
                browser_hash: browser_hash.clone(),
                ..Default::default()
            },
        );
        {
            let mut metadata = optimizer.write();
            for (id, src) in &scan.deps {
                let info = optimizer.dep_info(id, src, &browser_hash);
                metadata.optimized.insert(id.clone(), info);
            }
        }
        tracing::debug!(deps = scan.deps.len(), browser_hash = %browser_hash, "optimizer seeded from scan");
        optimizer
    }

    /// Reuse `_metadata.json` from a previous run if its hash still matches
    /// the current config and lockfile.
    #[must_use]
    pub fn load_cached(config: &ProjectConfig) -> Option<Self> {
        let path = config.deps_cache_dir().join(METADATA_FILE);
        let content = std::fs::read_to_string(&path).ok()?;
        let metadata: OptimizerMetadata = match serde_json::from_str(&content) {
            Ok(m) => m,
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "discarding unreadable optimizer metadata");
                return None;
            }
        };
        if metadata.hash != config_hash(config) {
            tracing::debug!("optimizer metadata is stale");
            return None;
        }
        Some(Self::with_metadata(config, metadata))
    }

    fn with_metadata(config: &ProjectConfig, metadata: OptimizerMetadata) -> Self {
        let root = dunce::canonicalize(&config.root).unwrap_or_else(|_| config.root.clone());
        let deps_dir = config.deps_cache_dir();
        let deps_dir = match deps_dir.strip_prefix(&config.root) {
            Ok(relative) => root.join(relative),
            Err(_) => deps_dir,
        };
        let deps_dir_id = normalize_slashes(dunce::simplified(&deps_dir));
        let root_id = normalize_slashes(&root);
        let url_prefix = match deps_dir_id.strip_prefix(&format!("{root_id}/")) {
            Some(relative) => format!("/{relative}"),
            None => format!("{FS_PREFIX}{}", deps_dir_id.trim_start_matches('/')),
        };
        Self {
            metadata: RwLock::new(metadata),
            deps_dir,
            deps_dir_id,
            url_prefix,
            root_id,
            options: config.optimize_deps.clone(),
        }
    }

    #[must_use]
    pub fn options(&self) -> &OptimizeDepsConfig {
        &self.options
    }

    #[must_use]
    pub fn deps_dir(&self) -> &Path {
        &self.deps_dir
    }

    #[must_use]
    pub fn browser_hash(&self) -> String {
        self.read().browser_hash.clone()
    }

    #[must_use]
    pub fn metadata(&self) -> OptimizerMetadata {
        self.read().clone()
    }

    /// Whether a file id lives in the deps directory.
    #[must_use]
    pub fn is_optimized_dep_file(&self, id: &str) -> bool {
        id.starts_with(&format!("{}/", self.deps_dir_id))
    }

    /// Whether a request URL points into the deps directory.
    #[must_use]
    pub fn is_optimized_dep_url(&self, url: &str) -> bool {
        url.starts_with(&self.url_prefix)
    }

    /// Filesystem id for an optimized dependency URL.
    #[must_use]
    pub fn resolve_dep_url(&self, url: &str) -> String {
        match url.strip_prefix(FS_PREFIX) {
            Some(rest) => format!("/{rest}"),
            None => format!("{}{url}", self.root_id),
        }
    }

    #[must_use]
    pub fn optimized_dep_info_from_id(&self, id: &str) -> Option<OptimizedDepInfo> {
        let metadata = self.read();
        metadata
            .optimized
            .get(id)
            .or_else(|| metadata.discovered.get(id))
            .cloned()
    }

    #[must_use]
    pub fn optimized_dep_info_from_file(&self, file: &str) -> Option<OptimizedDepInfo> {
        let file = clean_url(file);
        self.dep_info_list().into_iter().find(|info| info.file == file)
    }

    /// Optimized entries followed by discovered ones.
    #[must_use]
    pub fn dep_info_list(&self) -> Vec<OptimizedDepInfo> {
        let metadata = self.read();
        metadata
            .optimized
            .values()
            .chain(metadata.discovered.values())
            .cloned()
            .collect()
    }

    /// Request id for an optimized dependency (`file?v=hash`).
    #[must_use]
    pub fn get_optimized_dep_id(&self, info: &OptimizedDepInfo) -> String {
        format!("{}?v={}", info.file, info.browser_hash)
    }

    /// Record a dependency first seen at request time.
    pub fn register_missing_import(&self, id: &str, resolved: &str) -> OptimizedDepInfo {
        if let Some(info) = self.optimized_dep_info_from_id(id) {
            return info;
        }
        let mut metadata = self.write();
        if let Some(info) = metadata.discovered.get(id) {
            return info.clone();
        }
        let browser_hash = short_hash([metadata.hash.as_str(), id, resolved], 8);
        let info = self.dep_info(id, resolved, &browser_hash);
        metadata.discovered.insert(id.to_string(), info.clone());
        tracing::info!(dependency = id, "new dependency discovered, pending optimization");
        info
    }

    /// Write `_metadata.json` into the deps directory.
    pub fn write_metadata(&self) -> std::io::Result<()> {
        let json = serde_json::to_vec_pretty(&*self.read())
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        modgraph_util::fs::atomic_write(&self.deps_dir.join(METADATA_FILE), &json)
    }

    fn dep_info(&self, id: &str, src: &str, browser_hash: &str) -> OptimizedDepInfo {
        OptimizedDepInfo {
            id: id.to_string(),
            src: src.to_string(),
            file: format!("{}/{}.js", self.deps_dir_id, flatten_id(id)),
            browser_hash: browser_hash.to_string(),
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, OptimizerMetadata> {
        self.metadata.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, OptimizerMetadata> {
        self.metadata.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Hash of the optimizer-relevant config plus the project lockfile.
#[must_use]
pub fn config_hash(config: &ProjectConfig) -> String {
    let identity = config.optimizer_identity();
    let lockfile = LOCKFILES
        .iter()
        .map(|name| config.root.join(name))
        .find(|path| path.is_file())
        .and_then(|path| blake3_file(&path).ok())
        .unwrap_or_default();
    short_hash([identity.as_str(), lockfile.as_str()], 8)
}

/// Turn a dependency id into a flat file name:
/// `@scope/pkg` -> `@scope_pkg`, `a > b` -> `a___b`.
#[must_use]
pub fn flatten_id(id: &str) -> String {
    let flat = id
        .split('>')
        .map(|part| part.trim().replace(['/', ':'], "_").replace('.', "__").replace('#', "____"))
        .collect::<Vec<_>>()
        .join("___");
    if flat.len() <= MAX_FLAT_ID_LEN {
        return flat;
    }
    let mut cut = MAX_FLAT_ID_LEN - 9;
    while !flat.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}_{}", &flat[..cut], short_hash([id], 8))
}
