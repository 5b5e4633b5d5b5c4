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

//! Configuration types for the outbox, inbox, cluster liveness and Kafka clients.
//!
//! Every config is built through a builder that validates on [`build`], so an
//! instance in hand is always consistent:
//!
//! ```rust,ignore
//! let cluster = ClusterConfig::builder()
//!     .service_name("billing")
//!     .keep_alive_interval(Duration::from_secs(5))
//!     .keep_alive_timeout(Duration::from_secs(15))
//!     .build()?;
//! ```
//!
//! [`build`]: ClusterConfigBuilder::build

use std::time::Duration;

use crate::error::ConfigError;

/// Configuration for the outbox dispatcher and its stuck-recovery pass.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct OutboxConfig {
    enabled: bool,
    batch_size: usize,
    empty_delay: Duration,
    error_delay: Duration,
    lookback: Duration,
}

impl OutboxConfig {
    pub fn builder() -> OutboxConfigBuilder {
        OutboxConfigBuilder::default()
    }

    /// Whether produced messages go through the outbox table.
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Maximum number of rows claimed per dispatch.
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Idle delay when a dispatch found less than a full batch.
    pub fn empty_delay(&self) -> Duration {
        self.empty_delay
    }

    /// Backoff after a failed dispatch or recovery pass.
    pub fn error_delay(&self) -> Duration {
        self.error_delay
    }

    /// How far back in `created_at` outbox queries look.
    pub fn lookback(&self) -> Duration {
        self.lookback
    }
}

impl Default for OutboxConfig {
    fn default() -> Self {
        OutboxConfigBuilder::default().config
    }
}

/// Builder for [`OutboxConfig`].
#[derive(Debug, Clone)]
pub struct OutboxConfigBuilder {
    config: OutboxConfig,
}

impl Default for OutboxConfigBuilder {
    fn default() -> Self {
        Self {
            config: OutboxConfig {
                enabled: true,
                batch_size: 100,
                empty_delay: Duration::from_secs(1),
                error_delay: Duration::from_secs(5),
                lookback: Duration::from_secs(24 * 60 * 60),
            },
        }
    }
}

impl OutboxConfigBuilder {
    pub fn enabled(mut self, value: bool) -> Self {
        self.config.enabled = value;
        self
    }

    pub fn batch_size(mut self, value: usize) -> Self {
        self.config.batch_size = value;
        self
    }

    pub fn empty_delay(mut self, value: Duration) -> Self {
        self.config.empty_delay = value;
        self
    }

    pub fn error_delay(mut self, value: Duration) -> Self {
        self.config.error_delay = value;
        self
    }

    /// Trailing `created_at` window of the DAL queries, see
    /// [`QueryWindows`](crate::QueryWindows).
    pub fn lookback(mut self, value: Duration) -> Self {
        self.config.lookback = value;
        self
    }

    /// Validates and returns the configuration.
    pub fn build(self) -> Result<OutboxConfig, ConfigError> {
        if self.config.batch_size == 0 {
            return Err(ConfigError::InvalidBatchSize { section: "outbox" });
        }
        if self.config.lookback.is_zero() {
            return Err(ConfigError::ZeroDuration {
                field: "outbox.lookback",
            });
        }
        Ok(self.config)
    }
}

/// Configuration for inbox intake and the per-partition workers.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct InboxConfig {
    enabled: bool,
    batch_size: usize,
    batch_timeout: Duration,
    empty_delay: Duration,
    error_delay: Duration,
    lookback: Duration,
}

impl InboxConfig {
    pub fn builder() -> InboxConfigBuilder {
        InboxConfigBuilder::default()
    }

    /// Whether consumed records are persisted to the inbox before handling.
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Records per consumed batch, and rows per worker read.
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Upper bound on how long a batch accumulates before it is returned.
    pub fn batch_timeout(&self) -> Duration {
        self.batch_timeout
    }

    pub fn empty_delay(&self) -> Duration {
        self.empty_delay
    }

    pub fn error_delay(&self) -> Duration {
        self.error_delay
    }

    /// How far back in `created_at` inbox queries look.
    pub fn lookback(&self) -> Duration {
        self.lookback
    }
}

impl Default for InboxConfig {
    fn default() -> Self {
        InboxConfigBuilder::default().config
    }
}

/// Builder for [`InboxConfig`].
#[derive(Debug, Clone)]
pub struct InboxConfigBuilder {
    config: InboxConfig,
}

impl Default for InboxConfigBuilder {
    fn default() -> Self {
        Self {
            config: InboxConfig {
                enabled: true,
                batch_size: 100,
                batch_timeout: Duration::from_secs(1),
                empty_delay: Duration::from_secs(1),
                error_delay: Duration::from_secs(5),
                lookback: Duration::from_secs(3 * 24 * 60 * 60),
            },
        }
    }
}

impl InboxConfigBuilder {
    pub fn enabled(mut self, value: bool) -> Self {
        self.config.enabled = value;
        self
    }

    pub fn batch_size(mut self, value: usize) -> Self {
        self.config.batch_size = value;
        self
    }

    pub fn batch_timeout(mut self, value: Duration) -> Self {
        self.config.batch_timeout = value;
        self
    }

    pub fn empty_delay(mut self, value: Duration) -> Self {
        self.config.empty_delay = value;
        self
    }

    pub fn error_delay(mut self, value: Duration) -> Self {
        self.config.error_delay = value;
        self
    }

    /// Trailing `created_at` window of the DAL queries, see
    /// [`QueryWindows`](crate::QueryWindows).
    pub fn lookback(mut self, value: Duration) -> Self {
        self.config.lookback = value;
        self
    }

    /// Validates and returns the configuration.
    pub fn build(self) -> Result<InboxConfig, ConfigError> {
        if self.config.batch_size == 0 {
            return Err(ConfigError::InvalidBatchSize { section: "inbox" });
        }
        if self.config.batch_timeout.is_zero() {
            return Err(ConfigError::ZeroDuration {
                field: "inbox.batch_timeout",
            });
        }
        if self.config.lookback.is_zero() {
            return Err(ConfigError::ZeroDuration {
                field: "inbox.lookback",
            });
        }
        Ok(self.config)
    }
}

/// Configuration for the liveness directory.
///
/// The keep-alive interval must be strictly shorter than the timeout, otherwise a
/// healthy instance would expire between two refreshes.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct ClusterConfig {
    service_name: String,
    keep_alive_enabled: bool,
    keep_alive_interval: Duration,
    keep_alive_timeout: Duration,
}

impl ClusterConfig {
    pub fn builder() -> ClusterConfigBuilder {
        ClusterConfigBuilder::default()
    }

    /// Name used to scope liveness keys.
    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn keep_alive_enabled(&self) -> bool {
        self.keep_alive_enabled
    }

    pub fn keep_alive_interval(&self) -> Duration {
        self.keep_alive_interval
    }

    pub fn keep_alive_timeout(&self) -> Duration {
        self.keep_alive_timeout
    }
}

impl Default for ClusterConfig {
    fn default() -> Self {
        ClusterConfigBuilder::default().config
    }
}

/// Builder for [`ClusterConfig`].
#[derive(Debug, Clone)]
pub struct ClusterConfigBuilder {
    config: ClusterConfig,
}

impl Default for ClusterConfigBuilder {
    fn default() -> Self {
        Self {
            config: ClusterConfig {
                service_name: "tandem".to_string(),
                keep_alive_enabled: true,
                keep_alive_interval: Duration::from_secs(10),
                keep_alive_timeout: Duration::from_secs(30),
            },
        }
    }
}

impl ClusterConfigBuilder {
    pub fn service_name(mut self, value: impl Into<String>) -> Self {
        self.config.service_name = value.into();
        self
    }

    pub fn keep_alive_enabled(mut self, value: bool) -> Self {
        self.config.keep_alive_enabled = value;
        self
    }

    pub fn keep_alive_interval(mut self, value: Duration) -> Self {
        self.config.keep_alive_interval = value;
        self
    }

    pub fn keep_alive_timeout(mut self, value: Duration) -> Self {
        self.config.keep_alive_timeout = value;
        self
    }

    /// Validates and returns the configuration.
    pub fn build(self) -> Result<ClusterConfig, ConfigError> {
        let config = self.config;
        if config.service_name.trim().is_empty() {
            return Err(ConfigError::Empty {
                field: "cluster.service_name",
            });
        }
        if config.keep_alive_interval.is_zero() {
            return Err(ConfigError::ZeroDuration {
                field: "cluster.keep_alive_interval",
            });
        }
        if config.keep_alive_interval >= config.keep_alive_timeout {
            return Err(ConfigError::KeepAliveInterval {
                interval: config.keep_alive_interval,
                timeout: config.keep_alive_timeout,
            });
        }
        Ok(config)
    }
}

/// Connection settings shared by the Kafka producer and consumers.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct KafkaConfig {
    bootstrap_servers: String,
    group_id: String,
    transactional_id: Option<String>,
}

impl KafkaConfig {
    pub fn builder() -> KafkaConfigBuilder {
        KafkaConfigBuilder::default()
    }

    pub fn bootstrap_servers(&self) -> &str {
        &self.bootstrap_servers
    }

    /// Consumer group shared by every instance of the service.
    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    pub fn transactional_id(&self) -> Option<&str> {
        self.transactional_id.as_deref()
    }

    /// The producer runs broker-side transactions only when a transactional id is set.
    pub fn is_transactional(&self) -> bool {
        self.transactional_id.is_some()
    }
}

impl Default for KafkaConfig {
    fn default() -> Self {
        KafkaConfigBuilder::default().config
    }
}

/// Builder for [`KafkaConfig`].
#[derive(Debug, Clone)]
pub struct KafkaConfigBuilder {
    config: KafkaConfig,
}

impl Default for KafkaConfigBuilder {
    fn default() -> Self {
        Self {
            config: KafkaConfig {
                bootstrap_servers: "localhost:9092".to_string(),
                group_id: "tandem".to_string(),
                transactional_id: None,
            },
        }
    }
}

impl KafkaConfigBuilder {
    pub fn bootstrap_servers(mut self, value: impl Into<String>) -> Self {
        self.config.bootstrap_servers = value.into();
        self
    }

    pub fn group_id(mut self, value: impl Into<String>) -> Self {
        self.config.group_id = value.into();
        self
    }

    pub fn transactional_id(mut self, value: Option<String>) -> Self {
        self.config.transactional_id = value.filter(|id| !id.is_empty());
        self
    }

    /// Validates and returns the configuration.
    pub fn build(self) -> Result<KafkaConfig, ConfigError> {
        if self.config.bootstrap_servers.trim().is_empty() {
            return Err(ConfigError::Empty {
                field: "kafka.bootstrap_servers",
            });
        }
        if self.config.group_id.trim().is_empty() {
            return Err(ConfigError::Empty {
                field: "kafka.group_id",
            });
        }
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(OutboxConfigBuilder::default().build().is_ok());
        assert!(InboxConfigBuilder::default().build().is_ok());
        assert!(ClusterConfigBuilder::default().build().is_ok());
        assert!(KafkaConfigBuilder::default().build().is_ok());
    }

    #[test]
    fn test_lookback_defaults() {
        assert_eq!(OutboxConfig::default().lookback(), Duration::from_secs(86_400));
        assert_eq!(InboxConfig::default().lookback(), Duration::from_secs(259_200));
    }

    #[test]
    fn test_keep_alive_interval_must_be_shorter_than_timeout() {
        let err = ClusterConfig::builder()
            .keep_alive_interval(Duration::from_secs(30))
            .keep_alive_timeout(Duration::from_secs(30))
            .build()
            .unwrap_err();
        assert_eq!(
            err,
            ConfigError::KeepAliveInterval {
                interval: Duration::from_secs(30),
                timeout: Duration::from_secs(30),
            }
        );

        let ok = ClusterConfig::builder()
            .keep_alive_interval(Duration::from_secs(29))
            .keep_alive_timeout(Duration::from_secs(30))
            .build();
        assert!(ok.is_ok());
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        assert_eq!(
            OutboxConfig::builder().batch_size(0).build().unwrap_err(),
            ConfigError::InvalidBatchSize { section: "outbox" }
        );
        assert_eq!(
            InboxConfig::builder().batch_size(0).build().unwrap_err(),
            ConfigError::InvalidBatchSize { section: "inbox" }
        );
    }

    #[test]
    fn test_transactional_only_with_non_empty_id() {
        let plain = KafkaConfig::builder()
            .transactional_id(Some(String::new()))
            .build()
            .unwrap();
        assert!(!plain.is_transactional());

        let tx = KafkaConfig::builder()
            .transactional_id(Some("tandem-producer".to_string()))
            .build()
            .unwrap();
        assert!(tx.is_transactional());
        assert_eq!(tx.transactional_id(), Some("tandem-producer"));
    }
}
