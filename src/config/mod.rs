//! Configuration module for Sumi-Sieve
//!
//! This module handles loading, parsing, and validating TOML configuration files.
//!
//! # Example
//!
//! ```no_run
//! use sumi_sieve::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("site.toml")).unwrap();
//! println!("Crawl starts at: {}", config.start_url);
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{Config, HttpConfig, LoginConfig, RuleConfig};

// Re-export parser functions
pub use parser::{compute_config_hash, load_config, load_config_with_hash};

use crate::rules::RuleSet;
use crate::ConfigError;

impl Config {
    /// Compiles the configured rules and ignore patterns
    pub fn rule_set(&self) -> Result<RuleSet, ConfigError> {
        RuleSet::compile(&self.rules, &self.ignore_url)
    }
}
