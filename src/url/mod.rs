//! URL handling module for Sumi-Sieve
//!
//! This module provides URL normalization, link resolution, and the path resolver
//! that maps rule matches to output files and canonical resource ids.

mod normalize;
mod path;

pub use normalize::{normalize_url, resolve_link};
pub use path::{default_relative_path, PathResolver};
