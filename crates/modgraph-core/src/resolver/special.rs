//! Placeholder modules produced by resolution.
//!
//! These are real results, not failures: the resolver hands back a
//! [`SpecialModule`] and the loader turns it into stub source. The string
//! form (`__browser-external:fs`) is an encoding detail used when the id has
//! to travel through string-keyed layers such as the module graph.

use super::ResolveError;
use serde::{Deserialize, Serialize};

const BROWSER_EXTERNAL_ID: &str = "__browser-external";
const OPTIONAL_PEER_DEP_ID: &str = "__optional-peer-dep";

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "special", rename_all = "kebab-case")]
pub enum SpecialModule {
    /// A Node built-in or `browser: false` mapping, stubbed for the browser.
    /// `specifier` is kept in development for a useful runtime message.
    BrowserExternal { specifier: Option<String> },
    /// A declared optional peer dependency that is not installed. Loading it
    /// fails; resolving it does not.
    OptionalPeerDep { specifier: String, parent: String },
    /// A virtual id left untouched.
    Virtual { id: String },
}

impl SpecialModule {
    /// String form of the placeholder id.
    #[must_use]
    pub fn encode(&self) -> String {
        match self {
            Self::BrowserExternal { specifier: Some(s) } => format!("{BROWSER_EXTERNAL_ID}:{s}"),
            Self::BrowserExternal { specifier: None } => BROWSER_EXTERNAL_ID.to_string(),
            Self::OptionalPeerDep { specifier, parent } => {
                format!("{OPTIONAL_PEER_DEP_ID}:{specifier}:{parent}")
            }
            Self::Virtual { id } => id.clone(),
        }
    }

    /// Parse an encoded placeholder id. Virtual ids are not recognized here.
    #[must_use]
    pub fn decode(id: &str) -> Option<Self> {
        if let Some(rest) = id.strip_prefix(BROWSER_EXTERNAL_ID) {
            return match rest.strip_prefix(':') {
                Some(spec) => Some(Self::BrowserExternal {
                    specifier: Some(spec.to_string()),
                }),
                None if rest.is_empty() => Some(Self::BrowserExternal { specifier: None }),
                None => None,
            };
        }
        let rest = id.strip_prefix(OPTIONAL_PEER_DEP_ID)?.strip_prefix(':')?;
        // Scoped names contain no `:`, so the first separator splits them.
        let (specifier, parent) = rest.split_once(':')?;
        Some(Self::OptionalPeerDep {
            specifier: specifier.to_string(),
            parent: parent.to_string(),
        })
    }

    /// Stub source for this placeholder, or `None` for virtual ids whose
    /// content comes from elsewhere.
    #[must_use]
    pub fn load(&self, is_production: bool, is_build: bool) -> Option<String> {
        match self {
            Self::BrowserExternal { specifier } => Some(match specifier {
                Some(spec) if !is_production => format!(
                    "export default new Proxy({{}}, {{\n  get(_, key) {{\n    throw new Error(`Module \"{spec}\" has been externalized for browser compatibility. Cannot access \"{spec}.${{key}}\" in client code.`)\n  }}\n}})\n"
                ),
                _ if is_build => "export default {}\n".to_string(),
                _ => "export default new Proxy({}, {\n  get(_, key) {\n    throw new Error(`Module has been externalized for browser compatibility. Cannot access \"${key}\" in client code.`)\n  }\n})\n".to_string(),
            }),
            Self::OptionalPeerDep { specifier, parent } => Some(if is_production {
                "export default {}\n".to_string()
            } else {
                format!(
                    "throw new Error(`Could not resolve \"{specifier}\" imported by \"{parent}\". Is it installed?`)\n"
                )
            }),
            Self::Virtual { .. } => None,
        }
    }

    /// The error raised when a deferred placeholder is actually executed.
    #[must_use]
    pub fn deferred_error(&self) -> Option<ResolveError> {
        match self {
            Self::OptionalPeerDep { specifier, parent } => Some(ResolveError::OptionalPeerDep {
                specifier: specifier.clone(),
                parent: parent.clone(),
            }),
            _ => None,
        }
    }
}
