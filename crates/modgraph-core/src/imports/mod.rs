//! Import extraction from module source.

mod scan;

pub use scan::{scan_imports, ImportKind, ImportSpecCore};

impl ImportKind {
    #[must_use]
    pub fn is_require(self) -> bool {
        self == Self::Require
    }
}
