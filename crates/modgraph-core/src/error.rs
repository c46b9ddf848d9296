use crate::graph::GraphError;
use crate::packages::PackageError;
use crate::resolver::ResolveError;
use crate::scan::ScanError;
use std::path::PathBuf;
use thiserror::Error;

/// Core error type for modgraph operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to read config at {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config at {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Package(#[from] PackageError),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Scan(#[from] ScanError),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error("Failed to load {id}: {source}")]
    Load {
        id: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Transform failed for {id}:\n{}", .errors.join("\n"))]
    Transform { id: String, errors: Vec<String> },

    #[error("{0}")]
    Other(String),
}

impl Error {
    #[must_use]
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }
}
