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

//! `tandem.toml` loading, validation and conversion into library settings.

pub mod defaults;
pub mod error;
pub mod loader;
pub mod types;
pub mod validation;

use std::time::Duration;

pub use defaults::generate_default_config_toml;
pub use error::{ConfigError, ValidationError};
pub use loader::ConfigLoader;
pub use types::*;
pub use validation::Validate;

impl TandemConfig {
    /// Replaces the database URL, as done for `--database-url`.
    pub fn with_database_url(mut self, url: Option<String>) -> Self {
        if let Some(url) = url {
            self.database.url = url;
        }
        self
    }

    pub fn outbox_settings(&self) -> Result<tandem::OutboxConfig, ConfigError> {
        let c = &self.outbox;
        Ok(tandem::OutboxConfig::builder()
            .enabled(c.enabled)
            .batch_size(c.batch_size)
            .empty_delay(Duration::from_millis(c.empty_delay_ms))
            .error_delay(Duration::from_millis(c.error_delay_ms))
            .lookback(Duration::from_millis(c.lookback_ms))
            .build()?)
    }

    pub fn inbox_settings(&self) -> Result<tandem::InboxConfig, ConfigError> {
        let c = &self.inbox;
        Ok(tandem::InboxConfig::builder()
            .enabled(c.enabled)
            .batch_size(c.batch_size)
            .batch_timeout(Duration::from_millis(c.batch_timeout_ms))
            .empty_delay(Duration::from_millis(c.empty_delay_ms))
            .error_delay(Duration::from_millis(c.error_delay_ms))
            .lookback(Duration::from_millis(c.lookback_ms))
            .build()?)
    }

    pub fn cluster_settings(&self) -> Result<tandem::ClusterConfig, ConfigError> {
        let c = &self.cluster;
        Ok(tandem::ClusterConfig::builder()
            .service_name(c.service_name.clone())
            .keep_alive_enabled(c.keep_alive_enabled)
            .keep_alive_interval(Duration::from_millis(c.keep_alive_interval_ms))
            .keep_alive_timeout(Duration::from_millis(c.keep_alive_timeout_ms))
            .build()?)
    }

    pub fn kafka_settings(&self) -> Result<tandem::KafkaConfig, ConfigError> {
        let c = &self.kafka;
        Ok(tandem::KafkaConfig::builder()
            .bootstrap_servers(c.bootstrap_servers.clone())
            .group_id(c.group_id.clone())
            .transactional_id(c.transactional_id.clone())
            .build()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_file_round_trips_into_library_settings() {
        let text = generate_default_config_toml().unwrap();
        let config: TandemConfig = toml::from_str(&text).unwrap();

        let outbox = config.outbox_settings().unwrap();
        assert_eq!(outbox.batch_size(), 100);
        assert_eq!(outbox.lookback(), Duration::from_secs(24 * 60 * 60));

        let cluster = config.cluster_settings().unwrap();
        assert_eq!(cluster.keep_alive_interval(), Duration::from_secs(10));
        assert!(!config.kafka_settings().unwrap().is_transactional());
        let inbox = config.inbox_settings().unwrap();
        assert_eq!(
            tandem::QueryWindows::from((&outbox, &inbox)),
            tandem::QueryWindows::default()
        );
    }

    #[test]
    fn test_database_url_override() {
        let config = TandemConfig::default().with_database_url(Some("postgres://other/db".into()));
        assert_eq!(config.database.url, "postgres://other/db");

        let config = config.with_database_url(None);
        assert_eq!(config.database.url, "postgres://other/db");
    }
}
