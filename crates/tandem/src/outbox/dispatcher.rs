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

//! Claim, publish and recover outbox rows.

use futures::future::try_join_all;
use metrics::counter;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info};
use uuid::Uuid;

use super::store::OutboxStore;
use crate::config::OutboxConfig;
use crate::error::OutboxError;
use crate::liveness::ClusterDirectory;
use crate::models::OutboxMessage;
use crate::producer::MessagePublisher;

/// Moves outbox rows to the broker.
///
/// [`dispatch_once`](Self::dispatch_once) claims one batch for this instance and
/// publishes it inside a broker transaction. [`recover_stuck_once`](Self::recover_stuck_once)
/// returns rows left in `Sending` by dead instances to `Pending`.
pub struct OutboxDispatcher {
    store: Arc<dyn OutboxStore>,
    publisher: Arc<dyn MessagePublisher>,
    directory: Arc<ClusterDirectory>,
    batch_size: usize,
}

impl OutboxDispatcher {
    pub fn new(
        store: Arc<dyn OutboxStore>,
        publisher: Arc<dyn MessagePublisher>,
        directory: Arc<ClusterDirectory>,
        config: &OutboxConfig,
    ) -> Self {
        Self {
            store,
            publisher,
            directory,
            batch_size: config.batch_size(),
        }
    }

    pub fn instance_id(&self) -> Uuid {
        self.directory.instance_id()
    }

    /// Claims and publishes one batch. Returns true when the batch was full,
    /// meaning more pending rows are likely waiting.
    ///
    /// On a publish failure the broker transaction is aborted and the claimed
    /// rows stay `Sending` under this instance.
    pub async fn dispatch_once(&self) -> Result<bool, OutboxError> {
        let instance_id = self.instance_id();
        let batch = self
            .store
            .claim_pending(self.batch_size, instance_id)
            .await?;
        if batch.is_empty() {
            return Ok(false);
        }
        counter!("tandem_outbox_claimed_total").increment(batch.len() as u64);
        debug!(count = batch.len(), "Claimed outbox batch");

        self.publish_batch(&batch).await?;

        let ids: Vec<i64> = batch.iter().map(|m| m.id).collect();
        let marked = self.store.mark_sent(&ids, instance_id).await?;
        counter!("tandem_outbox_sent_total").increment(marked as u64);
        if marked < ids.len() {
            info!(
                claimed = ids.len(),
                marked, "Some published rows were no longer owned by this instance"
            );
        }

        Ok(batch.len() == self.batch_size)
    }

    async fn publish_batch(&self, batch: &[OutboxMessage]) -> Result<(), OutboxError> {
        self.publisher.begin_transaction().await?;

        let published = try_join_all(batch.iter().map(|m| {
            self.publisher.publish(
                &m.topic,
                m.key.as_deref(),
                m.value.as_deref(),
                m.headers.as_ref(),
            )
        }))
        .await;

        let outcome = match published {
            Ok(_) => self.publisher.commit_transaction().await,
            Err(e) => Err(e),
        };

        if let Err(e) = outcome {
            if let Err(abort) = self.publisher.abort_transaction().await {
                error!("Failed to abort broker transaction: {}", abort);
            }
            return Err(e.into());
        }
        Ok(())
    }

    /// Releases `Sending` rows whose owner is no longer alive. Returns the
    /// number of rows returned to `Pending`.
    pub async fn recover_stuck_once(&self) -> Result<usize, OutboxError> {
        let mut after_id = 0;
        let mut owners: HashMap<Uuid, bool> = HashMap::new();
        let mut released = 0;

        loop {
            let page = self.store.list_sending(after_id, self.batch_size).await?;
            let Some(last) = page.last() else {
                break;
            };
            after_id = last.id;

            let mut orphans = Vec::new();
            for message in &page {
                let alive = match owners.get(&message.instance_id) {
                    Some(alive) => *alive,
                    None => {
                        let alive = self.directory.is_alive(message.instance_id).await?;
                        owners.insert(message.instance_id, alive);
                        alive
                    }
                };
                if !alive {
                    orphans.push((message.id, message.instance_id));
                }
            }

            if !orphans.is_empty() {
                released += self.store.release(&orphans).await?;
            }
            if page.len() < self.batch_size {
                break;
            }
        }

        if released > 0 {
            counter!("tandem_outbox_recovered_total").increment(released as u64);
            info!(released, "Released outbox rows held by dead instances");
        }
        Ok(released)
    }
}
