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

use crate::config::{types::*, ValidationError};
use std::net::SocketAddr;

pub trait Validate {
    fn validate(&self) -> Result<(), ValidationError>;
}

impl Validate for TandemConfig {
    fn validate(&self) -> Result<(), ValidationError> {
        let results = [
            self.database.validate(),
            self.kafka.validate(),
            self.redis.validate(),
            self.cluster.validate(),
            self.outbox.validate(),
            self.inbox.validate(),
            self.server.validate(),
        ];

        let mut errors: Vec<ValidationError> = results.into_iter().filter_map(Result::err).collect();
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(ValidationError::Multiple { errors }),
        }
    }
}

impl Validate for DatabaseConfig {
    fn validate(&self) -> Result<(), ValidationError> {
        if !(self.url.starts_with("postgres://") || self.url.starts_with("postgresql://")) {
            return Err(ValidationError::InvalidDatabaseUrl {
                url: self.url.clone(),
            });
        }

        if self.pool_size == 0 || self.pool_size > 100 {
            return Err(ValidationError::InvalidPoolSize {
                size: self.pool_size,
            });
        }

        Ok(())
    }
}

impl Validate for KafkaConfig {
    fn validate(&self) -> Result<(), ValidationError> {
        if self.bootstrap_servers.trim().is_empty() {
            return Err(ValidationError::Empty {
                field: "kafka.bootstrap_servers",
            });
        }
        if self.group_id.trim().is_empty() {
            return Err(ValidationError::Empty {
                field: "kafka.group_id",
            });
        }
        if matches!(&self.transactional_id, Some(id) if id.trim().is_empty()) {
            return Err(ValidationError::Empty {
                field: "kafka.transactional_id",
            });
        }
        Ok(())
    }
}

impl Validate for RedisConfig {
    fn validate(&self) -> Result<(), ValidationError> {
        if !(self.url.starts_with("redis://") || self.url.starts_with("rediss://")) {
            return Err(ValidationError::InvalidRedisUrl {
                url: self.url.clone(),
            });
        }
        Ok(())
    }
}

impl Validate for ClusterConfig {
    fn validate(&self) -> Result<(), ValidationError> {
        if self.service_name.trim().is_empty() {
            return Err(ValidationError::Empty {
                field: "cluster.service_name",
            });
        }
        if self.keep_alive_interval_ms == 0 {
            return Err(ValidationError::Zero {
                field: "cluster.keep_alive_interval_ms",
            });
        }
        if self.keep_alive_interval_ms >= self.keep_alive_timeout_ms {
            return Err(ValidationError::KeepAliveInterval {
                interval: self.keep_alive_interval_ms,
                timeout: self.keep_alive_timeout_ms,
            });
        }
        Ok(())
    }
}

impl Validate for OutboxConfig {
    fn validate(&self) -> Result<(), ValidationError> {
        if self.batch_size == 0 {
            return Err(ValidationError::Zero {
                field: "outbox.batch_size",
            });
        }
        if self.lookback_ms == 0 {
            return Err(ValidationError::Zero {
                field: "outbox.lookback_ms",
            });
        }
        Ok(())
    }
}

impl Validate for InboxConfig {
    fn validate(&self) -> Result<(), ValidationError> {
        if self.batch_size == 0 {
            return Err(ValidationError::Zero {
                field: "inbox.batch_size",
            });
        }
        if self.batch_timeout_ms == 0 {
            return Err(ValidationError::Zero {
                field: "inbox.batch_timeout_ms",
            });
        }
        if self.lookback_ms == 0 {
            return Err(ValidationError::Zero {
                field: "inbox.lookback_ms",
            });
        }
        Ok(())
    }
}

impl Validate for ServerConfig {
    fn validate(&self) -> Result<(), ValidationError> {
        self.bind_address
            .parse::<SocketAddr>()
            .map(|_| ())
            .map_err(|_| ValidationError::InvalidBindAddress {
                address: self.bind_address.clone(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(TandemConfig::default().validate().is_ok());
    }

    #[test]
    fn test_database_config_validation() {
        let mut config = DatabaseConfig::default();

        config.pool_size = 0;
        assert!(config.validate().is_err());

        config.pool_size = 101;
        assert!(config.validate().is_err());

        config.pool_size = 10;
        config.url = "sqlite:///tmp/tandem.db".to_string();
        assert!(matches!(
            config.validate(),
            Err(ValidationError::InvalidDatabaseUrl { .. })
        ));
    }

    #[test]
    fn test_keep_alive_interval_must_be_below_timeout() {
        let config = ClusterConfig {
            keep_alive_interval_ms: 30_000,
            ..ClusterConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ValidationError::KeepAliveInterval {
                interval: 30_000,
                timeout: 30_000
            })
        ));
    }

    #[test]
    fn test_errors_are_collected_across_sections() {
        let mut config = TandemConfig::default();
        config.outbox.batch_size = 0;
        config.kafka.group_id = " ".to_string();
        config.server.bind_address = "not an address".to_string();

        match config.validate() {
            Err(ValidationError::Multiple { errors }) => assert_eq!(errors.len(), 3),
            other => panic!("expected multiple errors, got {:?}", other),
        }
    }

    #[test]
    fn test_single_error_is_not_wrapped() {
        let mut config = TandemConfig::default();
        config.inbox.batch_timeout_ms = 0;
        assert!(matches!(
            config.validate(),
            Err(ValidationError::Zero {
                field: "inbox.batch_timeout_ms"
            })
        ));
    }
}
