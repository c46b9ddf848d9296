//! Externalization decisions for server builds.

use super::node::npm_package_name;
use super::{is_absolute_id, is_builtin, Ctx, Resolution, ResolveError, Resolver};
use crate::config::NoExternalConfig;
use crate::patterns::{can_externalize_file, is_bare_import};
use modgraph_util::path::is_in_node_modules;
use regex_lite::Regex;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

/// A `noExternal` entry: exact package name or `/regex/`.
#[derive(Debug)]
enum NoExternalPattern {
    Name(String),
    Regex(Regex),
}

impl NoExternalPattern {
    fn matches(&self, name: &str) -> bool {
        match self {
            Self::Name(n) => n == name,
            Self::Regex(re) => re.is_match(name),
        }
    }
}

/// Compiled `noExternal` patterns plus a per-id decision cache.
#[derive(Debug)]
pub(super) struct ExternalMatcher {
    patterns: Vec<NoExternalPattern>,
    decisions: Mutex<HashMap<String, bool>>,
}

impl ExternalMatcher {
    pub(super) fn new(no_external: &NoExternalConfig) -> Result<Self, ResolveError> {
        let mut patterns = Vec::new();
        if let NoExternalConfig::Patterns(raw) = no_external {
            for pattern in raw {
                let compiled = match pattern
                    .strip_prefix('/')
                    .and_then(|p| p.strip_suffix('/'))
                    .filter(|p| !p.is_empty())
                {
                    Some(source) => NoExternalPattern::Regex(Regex::new(source).map_err(|e| {
                        ResolveError::InvalidPattern {
                            pattern: pattern.clone(),
                            message: e.to_string(),
                        }
                    })?),
                    None => NoExternalPattern::Name(pattern.clone()),
                };
                patterns.push(compiled);
            }
        }
        Ok(Self {
            patterns,
            decisions: Mutex::new(HashMap::new()),
        })
    }

    fn excluded(&self, name: &str) -> bool {
        self.patterns.iter().any(|p| p.matches(name))
    }
}

impl Resolver {
    /// Whether a bare import should stay external in a server build.
    /// Decisions are cached per id for the resolver's lifetime.
    pub(super) fn should_externalize(&self, id: &str, importer: Option<&str>) -> bool {
        if let Some(&cached) = self
            .externals
            .decisions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
        {
            return cached;
        }

        let external = !id.starts_with('.')
            && !is_absolute_id(id)
            && (is_builtin(id) || self.is_configured_as_external(id, importer));

        self.externals
            .decisions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.to_string(), external);
        external
    }

    fn is_configured_as_external(&self, id: &str, importer: Option<&str>) -> bool {
        let opts = &*self.options;
        let external_all = opts.external.is_all();
        if !external_all && opts.external.lists(id) {
            return true;
        }
        let Some(name) = npm_package_name(id) else {
            return self.is_externalizable(id, importer, false);
        };
        if !external_all && opts.external.lists(name) {
            return self.is_externalizable(id, importer, true);
        }
        if let NoExternalConfig::All(no_external) = opts.no_external {
            return !no_external;
        }
        if self.externals.excluded(name) {
            return false;
        }
        // `external: true` externalizes linked packages too.
        self.is_externalizable(id, importer, external_all)
    }

    fn is_externalizable(&self, id: &str, importer: Option<&str>, configured: bool) -> bool {
        if !is_bare_import(id) || id.contains('\0') {
            return false;
        }
        let ctx = Ctx {
            importer,
            is_require: false,
            scan: false,
            ts_importer: false,
            optimize: false,
        };
        let resolved = match self.try_node_resolve(id, &ctx, false) {
            Ok(Some(Resolution::Resolved { id, .. } | Resolution::External { id, .. })) => id,
            Ok(_) => return false,
            Err(e) => {
                tracing::debug!(id, error = %e, "not externalizable");
                return false;
            }
        };
        if !configured && !is_in_node_modules(&resolved) {
            return false;
        }
        can_externalize_file(&resolved)
    }
}
