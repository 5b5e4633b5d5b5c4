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

//! Inbound intake: consume a batch, store it, then commit or replay.

use metrics::counter;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::store::InboxStore;
use crate::broker::{RawRecord, RecordSource};
use crate::config::InboxConfig;
use crate::runtime::pause;

/// What one intake iteration did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOutcome {
    /// Nothing was consumed; no store and no confirmation happened
    Empty,
    /// The batch was stored and its offsets committed
    Committed { stored: usize },
    /// Storing failed and the consumer was rewound to replay the batch
    Replayed,
    /// Shutdown was requested before the iteration completed
    Stopped,
}

/// Moves records from a [`RecordSource`] into the inbox table.
///
/// Offsets are committed only after the batch is durably stored; a failed
/// store rewinds the consumer so the same records are delivered again.
pub struct BatchConsumeLoop {
    source: Arc<dyn RecordSource>,
    store: Arc<dyn InboxStore>,
    config: InboxConfig,
}

impl BatchConsumeLoop {
    pub fn new(
        source: Arc<dyn RecordSource>,
        store: Arc<dyn InboxStore>,
        config: InboxConfig,
    ) -> Self {
        Self {
            source,
            store,
            config,
        }
    }

    pub async fn run(&self, shutdown: CancellationToken) {
        info!("Inbox intake loop started");
        while !shutdown.is_cancelled() {
            if self.run_once(&shutdown).await == BatchOutcome::Stopped {
                break;
            }
        }
        info!("Inbox intake loop stopped");
    }

    pub async fn run_once(&self, shutdown: &CancellationToken) -> BatchOutcome {
        let batch = match self
            .source
            .consume_batch(
                self.config.batch_size(),
                self.config.batch_timeout(),
                shutdown,
            )
            .await
        {
            Ok(batch) => batch,
            Err(e) if e.is_cancellation() => return BatchOutcome::Stopped,
            Err(e) => {
                error!("Failed to consume inbox batch: {}", e);
                if !pause(shutdown, self.config.error_delay()).await {
                    return BatchOutcome::Stopped;
                }
                Vec::new()
            }
        };
        if batch.is_empty() {
            return BatchOutcome::Empty;
        }

        let messages = batch.into_iter().map(RawRecord::into_inbox_message).collect();
        match self.store.store_batch(messages).await {
            Ok(stored) => {
                counter!("tandem_inbox_stored_total").increment(stored as u64);
                debug!(stored, "Stored inbox batch");
                if self.confirm(shutdown, true).await {
                    BatchOutcome::Committed { stored }
                } else {
                    BatchOutcome::Stopped
                }
            }
            Err(e) => {
                error!("Failed to store inbox batch, replaying: {}", e);
                if self.confirm(shutdown, false).await {
                    BatchOutcome::Replayed
                } else {
                    BatchOutcome::Stopped
                }
            }
        }
    }

    /// Commits (or resets) until it succeeds. Returns false if shutdown
    /// intervened first.
    async fn confirm(&self, shutdown: &CancellationToken, commit: bool) -> bool {
        loop {
            let result = if commit {
                self.source.commit().await
            } else {
                self.source.reset().await
            };
            match result {
                Ok(()) => return true,
                Err(e) if e.is_cancellation() => return false,
                Err(e) => {
                    let action = if commit { "commit" } else { "reset" };
                    error!("Failed to {} consumer session: {}", action, e);
                    if !pause(shutdown, self.config.error_delay()).await {
                        return false;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{SessionDriver, TopicPartition};
    use crate::testing::{MemoryInboxStore, ScriptedConsumer};
    use std::time::Duration;

    fn config() -> InboxConfig {
        InboxConfig::builder()
            .batch_size(10)
            .batch_timeout(Duration::from_millis(200))
            .error_delay(Duration::from_millis(10))
            .build()
            .unwrap()
    }

    fn setup(
        consumer: &ScriptedConsumer,
    ) -> (Arc<SessionDriver>, Arc<MemoryInboxStore>, BatchConsumeLoop) {
        let driver = Arc::new(SessionDriver::spawn(consumer.clone()).unwrap());
        let store = Arc::new(MemoryInboxStore::new());
        let intake = BatchConsumeLoop::new(driver.clone(), store.clone(), config());
        (driver, store, intake)
    }

    #[tokio::test]
    async fn test_stored_batch_is_committed() {
        let consumer = ScriptedConsumer::new();
        consumer.push("events", 0, "a");
        consumer.push("events", 0, "b");
        let (driver, store, intake) = setup(&consumer);

        let outcome = intake.run_once(&CancellationToken::new()).await;

        assert_eq!(outcome, BatchOutcome::Committed { stored: 2 });
        assert_eq!(store.all().len(), 2);
        assert_eq!(
            consumer.commits(),
            vec![vec![(TopicPartition::new("events", 0), 2)]]
        );
        driver.shutdown().await;
    }

    #[tokio::test]
    async fn test_store_failure_resets_and_never_commits() {
        let consumer = ScriptedConsumer::new();
        consumer.push("events", 0, "a");
        consumer.push("events", 0, "b");
        let (driver, store, intake) = setup(&consumer);
        let shutdown = CancellationToken::new();

        store.fail_writes(true);
        assert_eq!(intake.run_once(&shutdown).await, BatchOutcome::Replayed);
        assert!(consumer.commits().is_empty());
        assert_eq!(
            consumer.seeks(),
            vec![(TopicPartition::new("events", 0), 0)]
        );

        store.fail_writes(false);
        assert_eq!(
            intake.run_once(&shutdown).await,
            BatchOutcome::Committed { stored: 2 }
        );
        let offsets: Vec<i64> = store.all().iter().map(|m| m.offset).collect();
        assert_eq!(offsets, vec![0, 1]);
        driver.shutdown().await;
    }

    #[tokio::test]
    async fn test_empty_batch_skips_confirmation() {
        let consumer = ScriptedConsumer::new();
        let (driver, store, intake) = setup(&consumer);

        assert_eq!(
            intake.run_once(&CancellationToken::new()).await,
            BatchOutcome::Empty
        );
        assert!(store.all().is_empty());
        assert!(consumer.commits().is_empty());
        driver.shutdown().await;
    }

    #[tokio::test]
    async fn test_commit_is_retried_until_it_succeeds() {
        let consumer = ScriptedConsumer::new();
        consumer.push("events", 1, "a");
        consumer.fail_next_commits(2);
        let (driver, _store, intake) = setup(&consumer);

        assert_eq!(
            intake.run_once(&CancellationToken::new()).await,
            BatchOutcome::Committed { stored: 1 }
        );
        assert_eq!(consumer.commits().len(), 1);
        driver.shutdown().await;
    }
}
