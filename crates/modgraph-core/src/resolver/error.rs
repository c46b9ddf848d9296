use crate::packages::PackageError;
use std::path::PathBuf;
use thiserror::Error;

/// Hard resolution failures. A plain miss is [`super::Resolution::NotFound`],
/// not an error.
#[derive(Error, Debug)]
pub enum ResolveError {
    #[error(
        "Missing \"{subpath}\" specifier in \"{package}\" package{}",
        .importer.as_deref().map(|i| format!(" (imported by {i})")).unwrap_or_default()
    )]
    SubpathNotExported {
        subpath: String,
        package: String,
        package_dir: PathBuf,
        importer: Option<String>,
    },

    #[error("Package import specifier \"{specifier}\" is not defined in {}", .package_dir.join("package.json").display())]
    ImportNotDefined {
        specifier: String,
        package_dir: PathBuf,
    },

    #[error(
        "Cannot bundle built-in module \"{specifier}\"{}. Add it to resolve.external or disable resolve.noExternal.",
        .importer.as_deref().map(|i| format!(" imported from \"{i}\"")).unwrap_or_default()
    )]
    BuiltinCannotBundle {
        specifier: String,
        importer: Option<String>,
    },

    #[error("Failed to resolve entry for package \"{package}\". The package may have incorrect main/module/exports specified in its package.json{}", .details.as_deref().map(|d| format!(": {d}")).unwrap_or_else(|| ".".to_string()))]
    PackageEntry {
        package: String,
        details: Option<String>,
    },

    #[error(transparent)]
    Package(#[from] PackageError),

    #[error("Invalid file URL: {url}")]
    InvalidFileUrl { url: String },

    #[error("Could not resolve \"{specifier}\" imported by \"{parent}\". Is it installed?")]
    OptionalPeerDep { specifier: String, parent: String },

    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid pattern \"{pattern}\": {message}")]
    InvalidPattern { pattern: String, message: String },

    /// A memoized failure shared between callers of the same key.
    #[error(transparent)]
    Shared(std::sync::Arc<ResolveError>),
}

impl ResolveError {
    /// Whether this failure should abort the caller's current operation.
    /// Package entry failures are softened into misses by some callers.
    #[must_use]
    pub fn is_package_entry(&self) -> bool {
        match self {
            Self::PackageEntry { .. } => true,
            Self::Shared(inner) => inner.is_package_entry(),
            _ => false,
        }
    }
}
