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

//! One worker task per assigned partition, draining its `Pending` inbox rows.

use metrics::counter;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::handler::HandlerRegistry;
use super::store::InboxStore;
use crate::broker::{AssignmentEvent, AssignmentTracker, RawRecord, TopicPartition};
use crate::config::InboxConfig;
use crate::error::{HandlerError, InboxError};
use crate::models::InboxMessage;
use crate::runtime::pause;

/// Runs the handler for one inbox row and records the outcome.
///
/// Success marks the row `Received`. Any handler failure other than
/// cancellation marks it `Failed`; if that marking fails too, both causes are
/// returned as [`InboxError::Compound`]. A cancelled handler leaves the row
/// `Pending`.
pub async fn process_message(
    store: &dyn InboxStore,
    handlers: &HandlerRegistry,
    message: &InboxMessage,
    cancel: &CancellationToken,
) -> Result<(), InboxError> {
    let record = RawRecord::from(message);
    match handlers.dispatch(&record, cancel).await {
        Ok(()) => {
            store.mark_received(message.id).await?;
            counter!("tandem_inbox_received_total").increment(1);
            Ok(())
        }
        Err(HandlerError::Cancelled) => Err(InboxError::Cancelled),
        Err(handler) => match store.mark_failed(message.id).await {
            Ok(_) => {
                counter!("tandem_inbox_failed_total").increment(1);
                Err(InboxError::Handler {
                    message_id: message.id,
                    source: handler,
                })
            }
            Err(marking) => Err(InboxError::Compound {
                message_id: message.id,
                handler,
                marking,
            }),
        },
    }
}

struct WorkItem {
    partition: TopicPartition,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Keeps exactly one worker running for every partition assigned to this instance.
///
/// Revoked partitions' workers are cancelled immediately and then awaited by a
/// single teardown task, so an in-flight handler call finishes before the
/// worker counts as stopped.
pub struct PartitionWorkerPool {
    store: Arc<dyn InboxStore>,
    handlers: Arc<HandlerRegistry>,
    config: InboxConfig,
    workers: Mutex<HashMap<TopicPartition, WorkItem>>,
}

impl PartitionWorkerPool {
    pub fn new(
        store: Arc<dyn InboxStore>,
        handlers: Arc<HandlerRegistry>,
        config: InboxConfig,
    ) -> Self {
        Self {
            store,
            handlers,
            config,
            workers: Mutex::new(HashMap::new()),
        }
    }

    /// Partitions with a running worker.
    pub fn active_partitions(&self) -> Vec<TopicPartition> {
        let mut partitions: Vec<_> = self.workers.lock().keys().cloned().collect();
        partitions.sort();
        partitions
    }

    /// Follows `tracker` until `shutdown`, then revokes every remaining
    /// partition and waits for all workers to stop.
    pub async fn run(self: Arc<Self>, tracker: Arc<AssignmentTracker>, shutdown: CancellationToken) {
        let (done_tx, done_rx) = mpsc::unbounded_channel();
        let teardown = tokio::spawn(Self::teardown(done_rx));

        let (snapshot, mut events) = tracker.subscribe_with_snapshot();
        self.add(snapshot, &shutdown);
        info!("Inbox partition worker pool started");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                event = events.recv() => match event {
                    Some(AssignmentEvent::Added(partitions)) => self.add(partitions, &shutdown),
                    Some(AssignmentEvent::Removed(partitions)) => self.remove(partitions, &done_tx),
                    None => break,
                },
            }
        }

        let remaining: Vec<TopicPartition> = self.workers.lock().keys().cloned().collect();
        self.remove(remaining, &done_tx);
        drop(done_tx);
        if let Err(e) = teardown.await {
            error!("Inbox teardown task failed: {}", e);
        }
        info!("Inbox partition worker pool stopped");
    }

    fn add(self: &Arc<Self>, partitions: Vec<TopicPartition>, shutdown: &CancellationToken) {
        let mut workers = self.workers.lock();
        for partition in partitions {
            if workers.contains_key(&partition) {
                continue;
            }
            let cancel = shutdown.child_token();
            let handle = tokio::spawn(Arc::clone(self).work(partition.clone(), cancel.clone()));
            debug!(partition = %partition, "Started inbox worker");
            workers.insert(
                partition.clone(),
                WorkItem {
                    partition,
                    cancel,
                    handle,
                },
            );
        }
    }

    fn remove(&self, partitions: Vec<TopicPartition>, done: &mpsc::UnboundedSender<WorkItem>) {
        let mut workers = self.workers.lock();
        for partition in partitions {
            if let Some(item) = workers.remove(&partition) {
                item.cancel.cancel();
                if let Err(mpsc::error::SendError(item)) = done.send(item) {
                    item.handle.abort();
                }
            }
        }
    }

    async fn teardown(mut done: mpsc::UnboundedReceiver<WorkItem>) {
        while let Some(item) = done.recv().await {
            match item.handle.await {
                Ok(()) => debug!(partition = %item.partition, "Inbox worker stopped"),
                Err(e) => error!(partition = %item.partition, "Inbox worker failed: {}", e),
            }
        }
    }

    async fn work(self: Arc<Self>, partition: TopicPartition, cancel: CancellationToken) {
        while !cancel.is_cancelled() {
            let delay = match self.drain_once(&partition, &cancel).await {
                Ok(0) => self.config.empty_delay(),
                Ok(_) => continue,
                Err(e) if e.is_cancellation() => break,
                Err(e) => {
                    error!(partition = %partition, "Inbox processing failed: {}", e);
                    self.config.error_delay()
                }
            };
            if !pause(&cancel, delay).await {
                break;
            }
        }
    }

    /// Processes one batch of pending rows in id order. Stops at the first
    /// failure so the partition is re-read after the error delay.
    async fn drain_once(
        &self,
        partition: &TopicPartition,
        cancel: &CancellationToken,
    ) -> Result<usize, InboxError> {
        let messages = self
            .store
            .pending_for_partition(&partition.topic, partition.partition, self.config.batch_size())
            .await?;

        let mut processed = 0;
        for message in &messages {
            if cancel.is_cancelled() {
                break;
            }
            process_message(self.store.as_ref(), &self.handlers, message, cancel).await?;
            processed += 1;
        }
        Ok(processed)
    }
}
