//! Configuration loading, validation, env substitution, and the option store.
//!
//! Config files: `chathook.toml`, `chathook.yaml`, or `chathook.json`
//! Searched in `./` then `~/.config/chathook/`.
//!
//! Supports `${ENV_VAR}` and `${ENV_VAR:-fallback}` substitution.

pub mod env_subst;
pub mod error;
pub mod loader;
pub mod schema;
pub mod store;
pub mod validate;

pub use {
    error::{Error, Result},
    loader::{
        clear_config_dir, config_dir, discover_and_load, find_config_file,
        find_or_default_config_path, load_config, save_config, save_config_to, set_config_dir,
    },
    schema::{DispatchConfig, HostConfig, PluginsConfig, ProcessConfig},
    store::OptionStore,
    validate::{Diagnostic, Severity, ValidationResult},
};
