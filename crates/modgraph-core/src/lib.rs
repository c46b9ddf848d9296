#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::return_self_not_must_use)]

//! Module pipeline core: specifier resolution, dependency scanning, the live
//! module graph, and HMR invalidation.
//!
//! Components, leaf first:
//! - [`packages`]: cached `package.json` metadata with an epoch counter
//! - [`resolver`]: the layered specifier resolution algorithm
//! - [`scan`]: entry crawl producing the sorted pre-bundle dependency map
//! - [`graph`]: arena module graph (live and build-summary variants)
//! - [`hmr`]: change propagation to accept boundaries
//!
//! [`session::DevSession`] ties them together for one dev server instance.

pub mod config;
pub mod error;
pub mod graph;
pub mod hmr;
pub mod imports;
pub mod optimizer;
pub mod packages;
pub mod patterns;
pub mod resolver;
pub mod scan;
pub mod session;
pub mod transform;

pub use config::{Config, ProjectConfig};
pub use error::Error;
pub use graph::{BuildModuleGraph, GraphError, ModuleGraph, ModuleId, ModuleLookup, ModuleNode};
pub use hmr::{FileEvent, FileEventKind, HmrEngine, HmrOutcome, HmrPayload, HmrTransport};
pub use imports::{scan_imports, ImportKind, ImportSpecCore};
pub use optimizer::{DepsOptimizer, OptimizedDepInfo};
pub use packages::{PackageCache, PackageData, PackageError};
pub use resolver::{
    Resolution, ResolveError, ResolveOptions, ResolveRequest, Resolver, SpecialModule,
};
pub use scan::{DependencyScanner, ScanError, ScanHandle, ScanResult};
pub use session::DevSession;
pub use transform::{Loader, PassthroughTransform, TransformEngine, TransformOutput};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
