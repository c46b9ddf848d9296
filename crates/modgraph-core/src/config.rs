use crate::error::Error;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Condition placeholder replaced by `production` or `development`.
pub const DEV_PROD_CONDITION: &str = "development|production";

/// Runtime configuration for the modgraph CLI.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Current working directory.
    pub cwd: PathBuf,

    /// Whether to emit JSON logs.
    pub json_logs: bool,

    /// Verbosity level (0 = INFO, 1 = DEBUG, 2+ = TRACE).
    pub verbosity: u8,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cwd: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            json_logs: false,
            verbosity: 0,
        }
    }
}

impl Config {
    /// Create a new config with the given working directory.
    #[must_use]
    pub fn new(cwd: PathBuf) -> Self {
        Self {
            cwd,
            ..Default::default()
        }
    }

    /// Set verbosity level.
    #[must_use]
    pub fn with_verbosity(mut self, verbosity: u8) -> Self {
        self.verbosity = verbosity;
        self
    }

    /// Set JSON log output.
    #[must_use]
    pub fn with_json_logs(mut self, json: bool) -> Self {
        self.json_logs = json;
        self
    }
}

/// Build mode, selects the `development`/`production` condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Development,
    Production,
}

/// Who consumes the resolved modules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Consumer {
    /// Browser code.
    #[default]
    Client,
    /// Server-side (SSR) code; built-ins and deps may stay external.
    Server,
}

/// Whether the pipeline runs for a dev server or a production build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Command {
    #[default]
    Serve,
    Build,
}

/// `resolve.external`: `true` externalizes every dependency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ExternalConfig {
    All(bool),
    List(Vec<String>),
}

impl Default for ExternalConfig {
    fn default() -> Self {
        Self::List(Vec::new())
    }
}

impl ExternalConfig {
    #[must_use]
    pub fn is_all(&self) -> bool {
        matches!(self, Self::All(true))
    }

    /// Whether `id` is explicitly listed. Always false for the boolean form.
    #[must_use]
    pub fn lists(&self, id: &str) -> bool {
        match self {
            Self::All(_) => false,
            Self::List(ids) => ids.iter().any(|e| e == id),
        }
    }
}

/// `resolve.noExternal`: `true` bundles everything; patterns are exact
/// package names or `/regex/` strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NoExternalConfig {
    All(bool),
    Patterns(Vec<String>),
}

impl Default for NoExternalConfig {
    fn default() -> Self {
        Self::Patterns(Vec::new())
    }
}

/// Resolver configuration surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ResolveConfig {
    /// Export conditions, in priority order.
    pub conditions: Vec<String>,
    /// Package entry fields probed when a package has no `exports`.
    pub main_fields: Vec<String>,
    /// Extensions appended when probing files.
    pub extensions: Vec<String>,
    pub preserve_symlinks: bool,
    /// Packages always resolved from the project root.
    pub dedupe: Vec<String>,
    pub external: ExternalConfig,
    pub no_external: NoExternalConfig,
    /// Basename prefix retried when probing (e.g. `_` for partials).
    pub try_prefix: Option<String>,
    /// Treat `foo` like `./foo` when it exists.
    pub prefer_relative: bool,
}

impl Default for ResolveConfig {
    fn default() -> Self {
        Self {
            conditions: vec![
                "module".to_string(),
                "browser".to_string(),
                DEV_PROD_CONDITION.to_string(),
            ],
            main_fields: ["browser", "module", "jsnext:main", "jsnext"]
                .map(String::from)
                .to_vec(),
            extensions: [".mjs", ".js", ".mts", ".ts", ".jsx", ".tsx", ".json"]
                .map(String::from)
                .to_vec(),
            preserve_symlinks: false,
            dedupe: Vec::new(),
            external: ExternalConfig::default(),
            no_external: NoExternalConfig::default(),
            try_prefix: None,
            prefer_relative: false,
        }
    }
}

/// Dependency optimization (pre-bundling) configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct OptimizeDepsConfig {
    /// Entry globs; overrides build input and HTML discovery.
    pub entries: Option<Vec<String>>,
    /// Specifiers always pre-bundled, even outside `node_modules`.
    pub include: Vec<String>,
    /// Specifiers never pre-bundled.
    pub exclude: Vec<String>,
    /// Extra extensions treated as scannable and optimizable.
    pub extensions: Vec<String>,
    /// Disable discovery of new dependencies at request time.
    pub no_discovery: bool,
}

impl OptimizeDepsConfig {
    /// `exclude` match: exact id or a deep import of an excluded package.
    #[must_use]
    pub fn excludes(&self, id: &str) -> bool {
        module_list_contains(&self.exclude, id)
    }
}

/// Whether `id` equals a listed module or is a subpath of one.
#[must_use]
pub fn module_list_contains(list: &[String], id: &str) -> bool {
    list.iter()
        .any(|m| m == id || id.strip_prefix(m.as_str()).is_some_and(|rest| rest.starts_with('/')))
}

/// Build input: a single file, a list, or named entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BuildInput {
    Single(String),
    List(Vec<String>),
    Named(BTreeMap<String, String>),
}

impl BuildInput {
    #[must_use]
    pub fn paths(&self) -> Vec<&str> {
        match self {
            Self::Single(p) => vec![p.as_str()],
            Self::List(ps) => ps.iter().map(String::as_str).collect(),
            Self::Named(map) => map.values().map(String::as_str).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BuildConfig {
    pub input: Option<BuildInput>,
    pub out_dir: String,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            input: None,
            out_dir: "dist".to_string(),
        }
    }
}

/// Project configuration consumed by the resolver, scanner and session.
///
/// Immutable for the lifetime of one resolver or scanner instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ProjectConfig {
    pub root: PathBuf,
    pub mode: Mode,
    pub consumer: Consumer,
    pub command: Command,
    pub resolve: ResolveConfig,
    pub optimize_deps: OptimizeDepsConfig,
    pub build: BuildConfig,
    /// Cache directory, relative to `root` unless absolute.
    pub cache_dir: Option<PathBuf>,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            root: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            mode: Mode::default(),
            consumer: Consumer::default(),
            command: Command::default(),
            resolve: ResolveConfig::default(),
            optimize_deps: OptimizeDepsConfig::default(),
            build: BuildConfig::default(),
            cache_dir: None,
        }
    }
}

impl ProjectConfig {
    /// Defaults rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Default::default()
        }
    }

    /// Load a JSON config file. A relative `root` is taken relative to the
    /// file's directory; a missing `root` means the file's directory.
    pub fn load(path: &Path) -> Result<Self, Error> {
        let content = std::fs::read_to_string(path).map_err(|source| Error::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        let raw: serde_json::Value =
            serde_json::from_str(&content).map_err(|source| Error::ConfigParse {
                path: path.to_path_buf(),
                source,
            })?;
        let has_root = raw.get("root").is_some();
        let mut config: Self =
            serde_json::from_value(raw).map_err(|source| Error::ConfigParse {
                path: path.to_path_buf(),
                source,
            })?;

        let base = path.parent().unwrap_or(Path::new("."));
        if !has_root {
            config.root = base.to_path_buf();
        } else if config.root.is_relative() {
            config.root = base.join(&config.root);
        }
        Ok(config)
    }

    #[must_use]
    pub fn with_mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    #[must_use]
    pub fn with_consumer(mut self, consumer: Consumer) -> Self {
        self.consumer = consumer;
        self
    }

    #[must_use]
    pub fn with_command(mut self, command: Command) -> Self {
        self.command = command;
        self
    }

    #[must_use]
    pub fn with_resolve(mut self, resolve: ResolveConfig) -> Self {
        self.resolve = resolve;
        self
    }

    #[must_use]
    pub fn with_optimize_deps(mut self, optimize_deps: OptimizeDepsConfig) -> Self {
        self.optimize_deps = optimize_deps;
        self
    }

    #[must_use]
    pub fn is_production(&self) -> bool {
        self.mode == Mode::Production
    }

    #[must_use]
    pub fn is_build(&self) -> bool {
        self.command == Command::Build
    }

    /// Directory holding optimizer output and metadata.
    #[must_use]
    pub fn deps_cache_dir(&self) -> PathBuf {
        let cache = self
            .cache_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from("node_modules/.modgraph"));
        self.root.join(cache).join("deps")
    }

    /// Identity of the settings that change pre-bundle output.
    #[must_use]
    pub fn optimizer_identity(&self) -> String {
        let relevant = serde_json::json!({
            "mode": self.mode,
            "consumer": self.consumer,
            "resolve": self.resolve,
            "include": self.optimize_deps.include,
            "exclude": self.optimize_deps.exclude,
            "extensions": self.optimize_deps.extensions,
        });
        modgraph_util::hash::blake3_bytes(relevant.to_string().as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let config = ProjectConfig::new("/project");
        assert_eq!(config.resolve.main_fields[0], "browser");
        assert!(config.resolve.conditions.iter().any(|c| c == DEV_PROD_CONDITION));
        assert!(!config.is_build());
        assert!(!config.is_production());
        assert_eq!(
            config.deps_cache_dir(),
            PathBuf::from("/project/node_modules/.modgraph/deps")
        );
    }

    #[test]
    fn test_load_camel_case_and_relative_root() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("modgraph.json");
        fs::write(
            &path,
            r#"{
                "root": "app",
                "mode": "production",
                "consumer": "server",
                "resolve": { "mainFields": ["module", "main"], "noExternal": true, "external": ["fsevents"] },
                "optimizeDeps": { "include": ["linked-lib"], "noDiscovery": true },
                "build": { "input": { "main": "index.html" } }
            }"#,
        )
        .unwrap();

        let config = ProjectConfig::load(&path).unwrap();
        assert_eq!(config.root, dir.path().join("app"));
        assert!(config.is_production());
        assert_eq!(config.consumer, Consumer::Server);
        assert_eq!(config.resolve.main_fields, vec!["module", "main"]);
        assert_eq!(config.resolve.no_external, NoExternalConfig::All(true));
        assert!(config.resolve.external.lists("fsevents"));
        assert!(config.optimize_deps.no_discovery);
        assert_eq!(
            config.build.input.as_ref().map(BuildInput::paths),
            Some(vec!["index.html"])
        );
        // Unspecified sections keep their defaults.
        assert_eq!(config.resolve.extensions, ResolveConfig::default().extensions);
    }

    #[test]
    fn test_load_errors_carry_path() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("broken.json");
        fs::write(&path, "{ not json").unwrap();
        let err = ProjectConfig::load(&path).unwrap_err();
        assert!(matches!(err, Error::ConfigParse { .. }));
        assert!(err.to_string().contains("broken.json"));

        let missing = ProjectConfig::load(&dir.path().join("nope.json")).unwrap_err();
        assert!(matches!(missing, Error::ConfigRead { .. }));
    }

    #[test]
    fn test_module_list_contains() {
        let list = vec!["lodash".to_string(), "@scope/pkg".to_string()];
        assert!(module_list_contains(&list, "lodash"));
        assert!(module_list_contains(&list, "lodash/map"));
        assert!(module_list_contains(&list, "@scope/pkg/deep"));
        assert!(!module_list_contains(&list, "lodash-es"));
    }

    #[test]
    fn test_optimizer_identity_tracks_relevant_fields() {
        let a = ProjectConfig::new("/p");
        let b = ProjectConfig::new("/p").with_mode(Mode::Production);
        assert_ne!(a.optimizer_identity(), b.optimizer_identity());
        assert_eq!(a.optimizer_identity(), ProjectConfig::new("/other").optimizer_identity());
    }
}
