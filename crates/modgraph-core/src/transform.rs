//! Transform engine seam.
//!
//! The scanner and dev session never transpile code themselves. They hand
//! source text to a [`TransformEngine`] and store the opaque result. Any
//! native transform backend can sit behind this trait.

use modgraph_util::path::{clean_url, extname};
use serde::{Deserialize, Serialize};

/// Language hint passed to the transform engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Loader {
    Js,
    Jsx,
    Ts,
    Tsx,
    Json,
    Css,
}

impl Loader {
    /// Pick a loader from a file id's extension (query stripped).
    /// `.mjs`/`.cjs` use `js`, `.mts`/`.cts` use `ts`.
    #[must_use]
    pub fn from_id(id: &str) -> Option<Self> {
        match extname(clean_url(id)) {
            ".js" | ".mjs" | ".cjs" => Some(Self::Js),
            ".jsx" => Some(Self::Jsx),
            ".ts" | ".mts" | ".cts" => Some(Self::Ts),
            ".tsx" => Some(Self::Tsx),
            ".json" => Some(Self::Json),
            ".css" => Some(Self::Css),
            _ => None,
        }
    }

    /// Parse a `lang="..."` attribute value from a script block.
    #[must_use]
    pub fn from_lang(lang: &str) -> Option<Self> {
        match lang {
            "js" | "mjs" | "cjs" | "javascript" => Some(Self::Js),
            "jsx" => Some(Self::Jsx),
            "ts" | "mts" | "cts" | "typescript" => Some(Self::Ts),
            "tsx" => Some(Self::Tsx),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Js => "js",
            Self::Jsx => "jsx",
            Self::Ts => "ts",
            Self::Tsx => "tsx",
            Self::Json => "json",
            Self::Css => "css",
        }
    }
}

/// Result of one transform call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransformOutput {
    pub code: String,
    /// Source map JSON, if the engine produced one.
    pub map: Option<String>,
    /// Diagnostics. A non-empty list means the transform failed.
    pub errors: Vec<String>,
}

impl TransformOutput {
    #[must_use]
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            map: None,
            errors: Vec::new(),
        }
    }

    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// External transform engine.
///
/// The trait is `Send + Sync` so a scan can call it from worker threads.
pub trait TransformEngine: Send + Sync {
    /// Backend name, for logs.
    fn name(&self) -> &'static str;

    /// Transform `source` belonging to module `id`.
    fn transform(&self, id: &str, source: &str, loader: Loader) -> TransformOutput;
}

/// Engine that returns the input unchanged.
///
/// Sufficient for import discovery: the import lexer already ignores
/// type-only imports, so TypeScript needs no type stripping to be scanned.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughTransform;

impl TransformEngine for PassthroughTransform {
    fn name(&self) -> &'static str {
        "passthrough"
    }

    fn transform(&self, _id: &str, source: &str, _loader: Loader) -> TransformOutput {
        TransformOutput::new(source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loader_from_id() {
        assert_eq!(Loader::from_id("/src/a.mjs"), Some(Loader::Js));
        assert_eq!(Loader::from_id("/src/a.tsx?v=1"), Some(Loader::Tsx));
        assert_eq!(Loader::from_id("/src/a.cts"), Some(Loader::Ts));
        assert_eq!(Loader::from_id("/src/a.vue"), None);
    }

    #[test]
    fn test_loader_from_lang() {
        assert_eq!(Loader::from_lang("ts"), Some(Loader::Ts));
        assert_eq!(Loader::from_lang("typescript"), Some(Loader::Ts));
        assert_eq!(Loader::from_lang("coffee"), None);
    }

    #[test]
    fn test_passthrough() {
        let out = PassthroughTransform.transform("/a.ts", "import x from 'x'", Loader::Ts);
        assert!(out.is_ok());
        assert_eq!(out.code, "import x from 'x'");
        assert!(out.map.is_none());
    }
}
