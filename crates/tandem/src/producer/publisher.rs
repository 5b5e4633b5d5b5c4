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

//! Raw message publishing.

use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::message::{Header, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::config::KafkaConfig;
use crate::error::BrokerError;
use crate::models::Headers;

/// Timeout for the one-time `init_transactions` call.
const INIT_TRANSACTIONS_TIMEOUT: Duration = Duration::from_secs(10);
const TRANSACTION_TIMEOUT: Duration = Duration::from_secs(30);
const DELIVERY_TIMEOUT: Duration = Duration::from_secs(30);

/// Publishes opaque key/value bytes with optional headers.
///
/// Transaction calls are no-ops on a non-transactional publisher.
#[async_trait]
pub trait MessagePublisher: Send + Sync {
    async fn publish(
        &self,
        topic: &str,
        key: Option<&[u8]>,
        value: Option<&[u8]>,
        headers: Option<&Headers>,
    ) -> Result<(), BrokerError>;

    async fn begin_transaction(&self) -> Result<(), BrokerError>;

    async fn commit_transaction(&self) -> Result<(), BrokerError>;

    async fn abort_transaction(&self) -> Result<(), BrokerError>;

    fn is_transactional(&self) -> bool;
}

/// rdkafka-backed publisher: idempotent, optionally transactional.
pub struct KafkaPublisher {
    producer: FutureProducer,
    transactional: bool,
    initialized: OnceCell<()>,
}

impl KafkaPublisher {
    pub fn new(config: &KafkaConfig) -> Result<Self, BrokerError> {
        let mut client_config = ClientConfig::new();
        client_config
            .set("bootstrap.servers", config.bootstrap_servers())
            .set("enable.idempotence", "true")
            .set("message.send.max.retries", "5");
        if let Some(id) = config.transactional_id() {
            client_config.set("transactional.id", id);
        }
        let producer: FutureProducer = client_config.create()?;

        info!(
            bootstrap = config.bootstrap_servers(),
            transactional = config.is_transactional(),
            "Kafka producer created"
        );

        Ok(Self {
            producer,
            transactional: config.is_transactional(),
            initialized: OnceCell::new(),
        })
    }

    /// Runs a blocking producer call off the async runtime.
    async fn blocking<F>(&self, op: F) -> Result<(), BrokerError>
    where
        F: FnOnce(&FutureProducer) -> rdkafka::error::KafkaResult<()> + Send + 'static,
    {
        let producer = self.producer.clone();
        tokio::task::spawn_blocking(move || op(&producer))
            .await
            .map_err(|e| BrokerError::Task(e.to_string()))??;
        Ok(())
    }

    async fn ensure_transactions(&self) -> Result<(), BrokerError> {
        self.initialized
            .get_or_try_init(|| async {
                self.blocking(|p| p.init_transactions(INIT_TRANSACTIONS_TIMEOUT))
                    .await?;
                debug!("Kafka transactions initialized");
                Ok::<_, BrokerError>(())
            })
            .await?;
        Ok(())
    }
}

fn to_owned_headers(headers: &Headers) -> OwnedHeaders {
    headers
        .iter()
        .fold(OwnedHeaders::new_with_capacity(headers.len()), |acc, (key, value)| {
            acc.insert(Header {
                key: key.as_str(),
                value: value.as_deref(),
            })
        })
}

#[async_trait]
impl MessagePublisher for KafkaPublisher {
    async fn publish(
        &self,
        topic: &str,
        key: Option<&[u8]>,
        value: Option<&[u8]>,
        headers: Option<&Headers>,
    ) -> Result<(), BrokerError> {
        let mut record: FutureRecord<'_, [u8], [u8]> = FutureRecord::to(topic);
        if let Some(key) = key {
            record = record.key(key);
        }
        if let Some(value) = value {
            record = record.payload(value);
        }
        if let Some(headers) = headers {
            record = record.headers(to_owned_headers(headers));
        }

        self.producer
            .send(record, Timeout::After(DELIVERY_TIMEOUT))
            .await
            .map_err(|(e, _)| BrokerError::Kafka(e))?;
        Ok(())
    }

    async fn begin_transaction(&self) -> Result<(), BrokerError> {
        if !self.transactional {
            return Ok(());
        }
        self.ensure_transactions().await?;
        self.blocking(|p| p.begin_transaction()).await
    }

    async fn commit_transaction(&self) -> Result<(), BrokerError> {
        if !self.transactional {
            return Ok(());
        }
        self.ensure_transactions().await?;
        self.blocking(|p| p.commit_transaction(TRANSACTION_TIMEOUT))
            .await
    }

    async fn abort_transaction(&self) -> Result<(), BrokerError> {
        if !self.transactional {
            return Ok(());
        }
        self.ensure_transactions().await?;
        self.blocking(|p| p.abort_transaction(TRANSACTION_TIMEOUT))
            .await
    }

    fn is_transactional(&self) -> bool {
        self.transactional
    }
}
