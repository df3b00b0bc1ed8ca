//! Configuration loading.
//!
//! Layers a TOML file (path from `CONFIG_FILE`, default
//! `config/default.toml`) under environment variables, with
//! `Config::default()` serialized underneath both so a bare
//! environment still boots.

use std::env;

use ::config::{Config as ConfigBuilder, ConfigError, Environment, File};

use crate::models::Config;

/// Load configuration from the config file and environment
pub fn load_config() -> Result<Config, ConfigError> {
    let config_file = env::var("CONFIG_FILE").unwrap_or_else(|_| "config/default.toml".to_string());

    let config = ConfigBuilder::builder()
        .add_source(ConfigBuilder::try_from(&Config::default())?)
        .add_source(File::with_name(&config_file).required(false))
        .add_source(Environment::default().separator("__"))
        .build()?;

    config.try_deserialize()
}
