// SPDX-FileCopyrightText: 2026 Haven Contributors
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Layered configuration loading.
//!
//! Three sources, later ones overriding earlier ones:
//! `configuration/base.yaml`, then the environment-specific file named by
//! `APP_ENVIRONMENT` (`local` by default), then `HAVEN_`-prefixed
//! environment variables (`HAVEN_APPLICATION_PORT=5001` sets
//! `Settings.application.port`).

use std::path::PathBuf;

use config::{Config, ConfigError, File};
use havenbackend::settings::Settings;

const KNOWN_ENVIRONMENTS: [&str; 2] = ["local", "production"];

/// Loads the settings from `<prefix>configuration/` under the working
/// directory.
pub fn get_configuration(prefix: &str) -> Result<Settings, ConfigError> {
    let environment = std::env::var("APP_ENVIRONMENT").unwrap_or_else(|_| "local".to_owned());
    if !KNOWN_ENVIRONMENTS.contains(&environment.as_str()) {
        return Err(ConfigError::Message(format!(
            "APP_ENVIRONMENT must be one of {KNOWN_ENVIRONMENTS:?}, got {environment:?}"
        )));
    }

    let directory = configuration_directory(prefix)?;
    Config::builder()
        .add_source(File::from(directory.join("base")).required(true))
        .add_source(File::from(directory.join(&environment)).required(true))
        .add_source(config::Environment::with_prefix("HAVEN").separator("_"))
        .build()?
        .try_deserialize()
}

fn configuration_directory(prefix: &str) -> Result<PathBuf, ConfigError> {
    let cwd = std::env::current_dir()
        .map_err(|e| ConfigError::Message(format!("cannot determine working directory: {e}")))?;
    Ok(cwd.join(prefix).join("configuration"))
}
