//! Configuration System
//!
//! Hierarchical configuration loading from:
//! - retrace.toml (base configuration)
//! - retrace.local.toml (git-ignored local overrides)
//! - Environment variables (RETRACE_* prefix, `__` section separator)
//!
//! ## Example
//!
//! ```toml
//! # retrace.toml
//! [trace]
//! compress = true
//! policy = "no-args"
//!
//! [modules]
//! dir_name = "rt_modules"
//! extensions = ["rt", "rts"]
//! ```
//!
//! Environment variable overrides:
//! ```bash
//! RETRACE_TRACE__COMPRESS=false
//! RETRACE_LOGGING__LEVEL=debug
//! ```

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::tree::CompressionPolicy;

/// Main configuration struct
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub trace: TraceConfig,
    #[serde(default)]
    pub modules: ModulesConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Model-extraction settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceConfig {
    /// Collapse structurally redundant call subtrees after tracing
    #[serde(default = "default_true")]
    pub compress: bool,

    /// Which hash sibling calls are compared under ("no-args" or "full")
    #[serde(default)]
    pub policy: CompressionPolicy,
}

/// Module resolution settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModulesConfig {
    /// Package directory walked for bare specifiers
    #[serde(default = "default_dir_name")]
    pub dir_name: String,

    /// Extension fall-through order for script files
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level when RUST_LOG is unset (error, warn, info, debug, trace)
    #[serde(default = "default_level")]
    pub level: String,

    /// Output format: "text" or "json"
    #[serde(default = "default_format")]
    pub format: String,
}

fn default_true() -> bool {
    true
}

fn default_dir_name() -> String {
    "rt_modules".to_string()
}

fn default_extensions() -> Vec<String> {
    vec!["rt".to_string(), "rts".to_string()]
}

fn default_level() -> String {
    "info".to_string()
}

fn default_format() -> String {
    "text".to_string()
}

impl Default for TraceConfig {
    fn default() -> Self {
        TraceConfig { compress: true, policy: CompressionPolicy::default() }
    }
}

impl Default for ModulesConfig {
    fn default() -> Self {
        ModulesConfig { dir_name: default_dir_name(), extensions: default_extensions() }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig { level: default_level(), format: default_format() }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            trace: TraceConfig::default(),
            modules: ModulesConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from default locations
    ///
    /// Merges in order:
    /// 1. built-in defaults
    /// 2. retrace.toml (base configuration)
    /// 3. retrace.local.toml (local overrides, git-ignored)
    /// 4. Environment variables (RETRACE_* prefix)
    pub fn load() -> Result<Self, figment::Error> {
        Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file("retrace.toml"))
            .merge(Toml::file("retrace.local.toml"))
            .merge(Env::prefixed("RETRACE_").split("__"))
            .extract()
    }

    /// Load configuration from a specific file path
    pub fn from_file(path: &str) -> Result<Self, figment::Error> {
        Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("RETRACE_").split("__"))
            .extract()
    }
}
