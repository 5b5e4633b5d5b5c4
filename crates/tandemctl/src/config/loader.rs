/*
 *  Copyright 2025-2026 Colliery Software
 *
 *  Licensed under the Apache License, Version 2.0 (the "License");
 *  you may not use this file except in compliance with the License.
 *  You may obtain a copy of the License at
 *
 *      http://www.apache.org/licenses/LICENSE-2.0
 *
 *  Unless required by applicable law or agreed to in writing, software
 *  distributed under the License is distributed on an "AS IS" BASIS,
 *  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *  See the License for the specific language governing permissions and
 *  limitations under the License.
 */

use crate::config::{ConfigError, TandemConfig};
use regex::Regex;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

pub struct ConfigLoader {
    search_paths: Vec<PathBuf>,
}

impl ConfigLoader {
    /// Loader over `./tandem.toml`, the user config directory and `/etc/tandem`.
    pub fn new() -> Self {
        let mut search_paths = vec![PathBuf::from("./tandem.toml")];

        if let Some(config_dir) = dirs::config_dir() {
            search_paths.push(config_dir.join("tandem").join("config.toml"));
        }

        search_paths.push(PathBuf::from("/etc/tandem/config.toml"));

        Self { search_paths }
    }

    pub fn with_search_paths(search_paths: Vec<PathBuf>) -> Self {
        Self { search_paths }
    }

    /// Loads the explicit file, else `TANDEM_CONFIG`, else the first search
    /// path that exists. With nothing found the defaults are used.
    pub fn load_config(&self, config_file: Option<&Path>) -> Result<TandemConfig, ConfigError> {
        let config_path = if let Some(path) = config_file {
            path.to_path_buf()
        } else if let Ok(env_config) = env::var("TANDEM_CONFIG") {
            PathBuf::from(env_config)
        } else {
            match self.find_config_file() {
                Some(path) => path,
                None => {
                    tracing::info!("No configuration file found, using defaults");
                    return Ok(TandemConfig::default());
                }
            }
        };

        tracing::info!("Loading configuration from {}", config_path.display());
        self.load_config_from_file(&config_path)
    }

    pub fn load_config_from_file(&self, path: &Path) -> Result<TandemConfig, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::ConfigNotFound);
        }
        let content = fs::read_to_string(path).map_err(|source| ConfigError::ReadError {
            path: path.to_path_buf(),
            source,
        })?;

        let substituted = substitute_env_vars(&content)?;

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") | None => Ok(toml::from_str::<TandemConfig>(&substituted)?),
            Some(ext) => Err(ConfigError::UnsupportedFormat {
                extension: ext.to_string(),
            }),
        }
    }

    pub fn find_config_file(&self) -> Option<PathBuf> {
        self.search_paths
            .iter()
            .find(|path| path.is_file())
            .cloned()
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// Replaces `${VAR}`, `${VAR:-default}` and `${VAR:?message}` references.
pub(crate) fn substitute_env_vars(content: &str) -> Result<String, ConfigError> {
    let re = Regex::new(r"\$\{([^}]+)\}")
        .map_err(|e| ConfigError::EnvSubstitutionError(e.to_string()))?;
    let mut result = String::with_capacity(content.len());
    let mut last = 0;

    for cap in re.captures_iter(content) {
        let (Some(whole), Some(expr)) = (cap.get(0), cap.get(1)) else {
            continue;
        };
        result.push_str(&content[last..whole.start()]);
        result.push_str(&resolve(expr.as_str())?);
        last = whole.end();
    }
    result.push_str(&content[last..]);

    Ok(result)
}

fn resolve(expr: &str) -> Result<String, ConfigError> {
    if let Some((name, default)) = expr.split_once(":-") {
        Ok(env::var(name).unwrap_or_else(|_| default.to_string()))
    } else if let Some((name, message)) = expr.split_once(":?") {
        env::var(name).map_err(|_| {
            ConfigError::EnvSubstitutionError(format!(
                "Required environment variable '{}' is not set: {}",
                name, message
            ))
        })
    } else {
        env::var(expr).map_err(|_| {
            ConfigError::EnvSubstitutionError(format!(
                "Required environment variable '{}' is not set",
                expr
            ))
        })
    }
}
