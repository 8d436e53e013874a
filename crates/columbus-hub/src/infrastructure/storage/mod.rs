//! Storage infrastructure: the TOML configuration file.
//!
//! The domain only knows [`HubConfig`](crate::domain::HubConfig); this module
//! owns the on-disk schema and its mapping onto it.

pub mod config;

pub use config::{default_config_path, load_config, parse_config, ConfigError, FileConfig};
