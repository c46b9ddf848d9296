#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

//! Shared utilities for modgraph.
//!
//! Pure helper functions with no logging dependencies: file reads and
//! atomic writes, content hashing, and the URL/path string helpers the
//! resolver and scanner share.

pub mod fs;
pub mod hash;
pub mod path;
