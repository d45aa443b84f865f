//! Configuration loading, validation and env substitution.
//!
//! Config files: `pusher.toml`, `pusher.yaml`, `pusher.yml` or `pusher.json`,
//! searched in `./` then `~/.config/pusher/`.
//!
//! Supports `${ENV_VAR}` substitution in all string values.

pub mod env_subst;
pub mod loader;
pub mod schema;
pub mod validate;

pub use {
    loader::{config_dir, discover_and_load, find_config_file, load_config},
    schema::{ComponentConfig, NotificationsConfig, PubsubConfig, PusherConfig, StoreConfig},
    validate::{Diagnostic, Severity, ValidationResult, validate_config},
};
