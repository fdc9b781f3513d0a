//! Configuration for the wamux account orchestrator.
//!
//! Settings live in a single `wamux.toml`. Every section is optional and
//! falls back to defaults, so an empty file (or no file at all) yields a
//! working single-host setup.

pub mod loader;
pub mod schema;

pub use {
    loader::{ConfigError, CONFIG_ENV_VAR, CONFIG_FILE_NAME, discover_config_path, load_config},
    schema::{
        ChatHistoryConfig, DeviceConfig, LoginConfig, SidecarConfig, StorageConfig, WamuxConfig,
        WebhookConfig,
    },
};
