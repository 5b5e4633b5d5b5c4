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

//! The broker consumer protocol handle.
//!
//! [`ConsumerHandle`] is synchronous and is only ever driven from
//! the session driver's dedicated thread. [`KafkaConsumerHandle`] implements it
//! over an rdkafka `BaseConsumer` whose rebalance callbacks feed the shared
//! [`AssignmentTracker`] and drop revoked partitions from the session.

use rdkafka::config::{ClientConfig, RDKafkaLogLevel};
use rdkafka::consumer::{BaseConsumer, CommitMode, Consumer, ConsumerContext, Rebalance};
use rdkafka::message::{Headers as _, Message};
use rdkafka::{ClientContext, Offset, TopicPartitionList};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::assignment::AssignmentTracker;
use super::record::{RawRecord, TopicPartition};
use super::session::SharedSession;
use crate::config::KafkaConfig;
use crate::error::BrokerError;
use crate::models::Headers;

const SEEK_TIMEOUT: Duration = Duration::from_secs(5);

/// Stateful consumer protocol operations.
pub trait ConsumerHandle: Send + 'static {
    /// Waits up to `timeout` for the next record.
    fn poll(&mut self, timeout: Duration) -> Result<Option<RawRecord>, BrokerError>;

    /// Commits the given next-to-read offsets synchronously.
    fn commit(&mut self, offsets: &[(TopicPartition, i64)]) -> Result<(), BrokerError>;

    /// Moves the fetch position of one partition.
    fn seek(&mut self, tp: &TopicPartition, offset: i64) -> Result<(), BrokerError>;

    /// Leaves the consumer group. Called once when the driver stops.
    fn close(&mut self) {}
}

// =============================================================================
// rdkafka implementation
// =============================================================================

/// Consumer context bridging rdkafka callbacks into tandem.
pub struct RebalanceContext {
    tracker: Arc<AssignmentTracker>,
    session: SharedSession,
}

fn partitions_of(tpl: &TopicPartitionList) -> Vec<TopicPartition> {
    tpl.elements()
        .iter()
        .map(|e| TopicPartition::new(e.topic(), e.partition()))
        .collect()
}

impl ClientContext for RebalanceContext {
    fn log(&self, level: RDKafkaLogLevel, fac: &str, log_message: &str) {
        match level {
            RDKafkaLogLevel::Emerg
            | RDKafkaLogLevel::Alert
            | RDKafkaLogLevel::Critical
            | RDKafkaLogLevel::Error => error!(facility = fac, "librdkafka: {}", log_message),
            RDKafkaLogLevel::Warning => warn!(facility = fac, "librdkafka: {}", log_message),
            RDKafkaLogLevel::Notice | RDKafkaLogLevel::Info => {
                info!(facility = fac, "librdkafka: {}", log_message)
            }
            RDKafkaLogLevel::Debug => debug!(facility = fac, "librdkafka: {}", log_message),
        }
    }
}

impl ConsumerContext for RebalanceContext {
    fn pre_rebalance(&self, _consumer: &BaseConsumer<Self>, rebalance: &Rebalance<'_>) {
        if let Rebalance::Revoke(tpl) = rebalance {
            let revoked = partitions_of(tpl);
            self.session.lock().forget(&revoked);
            self.tracker.revoked(revoked);
        }
    }

    fn post_rebalance(&self, _consumer: &BaseConsumer<Self>, rebalance: &Rebalance<'_>) {
        match rebalance {
            Rebalance::Assign(tpl) => self.tracker.assigned(partitions_of(tpl)),
            Rebalance::Revoke(_) => {}
            Rebalance::Error(e) => warn!("Rebalance error: {}", e),
        }
    }
}

/// rdkafka-backed [`ConsumerHandle`].
pub struct KafkaConsumerHandle {
    consumer: BaseConsumer<RebalanceContext>,
}

impl KafkaConsumerHandle {
    /// Creates a consumer in the configured group and subscribes to `topics`.
    pub fn connect(
        config: &KafkaConfig,
        topics: &[String],
        tracker: Arc<AssignmentTracker>,
        session: SharedSession,
    ) -> Result<Self, BrokerError> {
        let consumer: BaseConsumer<RebalanceContext> = ClientConfig::new()
            .set("bootstrap.servers", config.bootstrap_servers())
            .set("group.id", config.group_id())
            .set("auto.offset.reset", "earliest")
            .set("enable.auto.commit", "false")
            .set("partition.assignment.strategy", "cooperative-sticky")
            .create_with_context(RebalanceContext { tracker, session })?;

        let topic_refs: Vec<&str> = topics.iter().map(String::as_str).collect();
        consumer.subscribe(&topic_refs)?;
        info!(topics = ?topics, group = config.group_id(), "Kafka consumer subscribed");

        Ok(Self { consumer })
    }
}

impl ConsumerHandle for KafkaConsumerHandle {
    fn poll(&mut self, timeout: Duration) -> Result<Option<RawRecord>, BrokerError> {
        let message = match self.consumer.poll(timeout) {
            None => return Ok(None),
            Some(result) => result?,
        };

        let headers = message.headers().map(|headers| {
            headers
                .iter()
                .map(|h| {
                    (
                        h.key.to_string(),
                        h.value.map(|v| String::from_utf8_lossy(v).into_owned()),
                    )
                })
                .collect::<Headers>()
        });

        Ok(Some(RawRecord {
            topic: message.topic().to_string(),
            partition: message.partition(),
            offset: message.offset(),
            key: message.key().map(<[u8]>::to_vec),
            value: message.payload().map(<[u8]>::to_vec),
            headers,
            timestamp: message.timestamp().to_millis(),
        }))
    }

    fn commit(&mut self, offsets: &[(TopicPartition, i64)]) -> Result<(), BrokerError> {
        if offsets.is_empty() {
            return Ok(());
        }
        let mut tpl = TopicPartitionList::new();
        for (tp, offset) in offsets {
            tpl.add_partition_offset(&tp.topic, tp.partition, Offset::Offset(*offset))?;
        }
        self.consumer.commit(&tpl, CommitMode::Sync)?;
        Ok(())
    }

    fn seek(&mut self, tp: &TopicPartition, offset: i64) -> Result<(), BrokerError> {
        self.consumer
            .seek(&tp.topic, tp.partition, Offset::Offset(offset), SEEK_TIMEOUT)?;
        Ok(())
    }

    fn close(&mut self) {
        self.consumer.unsubscribe();
    }
}
