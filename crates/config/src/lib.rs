//! Configuration loading, validation and env substitution.
//!
//! Config files: `tessera.toml`, `tessera.yaml`, `tessera.yml` or `tessera.json`,
//! searched in `./` then the user config directory (`~/.config/tessera/` on
//! Linux).
//!
//! Supports `${ENV_VAR}` substitution in all string values.

pub mod env_subst;
pub mod error;
pub mod loader;
pub mod schema;
pub mod validate;

pub use {
    error::{Error, Result},
    loader::{config_dir, discover_and_load, find_config_file, find_or_default_config_path, load_config},
    schema::{HostConfig, MetricsConfig, PluginsConfig, SchedulerConfig, TesseraConfig, UpdateMode},
    validate::{Diagnostic, Severity, ValidationResult, validate, validate_config},
};
