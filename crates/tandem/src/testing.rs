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

//! In-memory stand-ins for the store, broker and publisher seams.
//!
//! Available to unit tests and, behind the `testing` feature, to downstream
//! crates that want to exercise their handlers without PostgreSQL or Kafka.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::broker::{ConsumerHandle, RawRecord, SharedSession, TopicPartition};
use crate::error::{BrokerError, StoreError};
use crate::inbox::InboxStore;
use crate::models::{
    Headers, InboxMessage, InboxStatus, NewInboxMessage, NewOutboxMessage, OutboxMessage,
    OutboxStatus,
};
use crate::outbox::OutboxStore;
use crate::producer::MessagePublisher;

pub use crate::liveness::MemoryLivenessStore;

fn injected(what: &str) -> StoreError {
    StoreError::ConnectionPool(format!("injected {} failure", what))
}

// =============================================================================
// Outbox
// =============================================================================

/// Outbox rows held in memory with the same conditional transitions as the
/// PostgreSQL store.
#[derive(Debug, Default)]
pub struct MemoryOutboxStore {
    rows: Mutex<Vec<OutboxMessage>>,
    fail_writes: AtomicBool,
}

impl MemoryOutboxStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent `enqueue` fail while set.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// All rows in id order.
    pub fn all(&self) -> Vec<OutboxMessage> {
        self.rows.lock().clone()
    }
}

#[async_trait]
impl OutboxStore for MemoryOutboxStore {
    async fn enqueue(&self, messages: Vec<NewOutboxMessage>) -> Result<usize, StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(injected("outbox write"));
        }
        let mut rows = self.rows.lock();
        let count = messages.len();
        for message in messages {
            let id = rows.len() as i64 + 1;
            rows.push(OutboxMessage {
                id,
                topic: message.topic,
                key: message.key,
                value: message.value,
                headers: message.headers,
                status: OutboxStatus::Pending,
                instance_id: message.instance_id,
                created_at: message.created_at,
                updated_at: None,
            });
        }
        Ok(count)
    }

    async fn claim_pending(
        &self,
        limit: usize,
        instance_id: Uuid,
    ) -> Result<Vec<OutboxMessage>, StoreError> {
        let mut rows = self.rows.lock();
        let now = Utc::now();
        Ok(rows
            .iter_mut()
            .filter(|m| m.status == OutboxStatus::Pending)
            .take(limit)
            .map(|m| {
                m.status = OutboxStatus::Sending;
                m.instance_id = instance_id;
                m.updated_at = Some(now);
                m.clone()
            })
            .collect())
    }

    async fn mark_sent(&self, ids: &[i64], instance_id: Uuid) -> Result<usize, StoreError> {
        let mut rows = self.rows.lock();
        let now = Utc::now();
        let mut updated = 0;
        for m in rows.iter_mut().filter(|m| {
            ids.contains(&m.id) && m.status == OutboxStatus::Sending && m.instance_id == instance_id
        }) {
            m.status = OutboxStatus::Sent;
            m.updated_at = Some(now);
            updated += 1;
        }
        Ok(updated)
    }

    async fn list_sending(
        &self,
        after_id: i64,
        limit: usize,
    ) -> Result<Vec<OutboxMessage>, StoreError> {
        Ok(self
            .rows
            .lock()
            .iter()
            .filter(|m| m.status == OutboxStatus::Sending && m.id > after_id)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn release(&self, orphans: &[(i64, Uuid)]) -> Result<usize, StoreError> {
        let mut rows = self.rows.lock();
        let now = Utc::now();
        let mut updated = 0;
        for m in rows.iter_mut().filter(|m| {
            m.status == OutboxStatus::Sending && orphans.contains(&(m.id, m.instance_id))
        }) {
            m.status = OutboxStatus::Pending;
            m.updated_at = Some(now);
            updated += 1;
        }
        Ok(updated)
    }
}

// =============================================================================
// Inbox
// =============================================================================

/// Inbox rows held in memory, deduplicated by topic, partition and offset.
#[derive(Debug, Default)]
pub struct MemoryInboxStore {
    rows: Mutex<Vec<InboxMessage>>,
    fail_writes: AtomicBool,
    fail_marking: AtomicBool,
}

impl MemoryInboxStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent `store_batch` fail while set.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Makes every subsequent status transition fail while set.
    pub fn fail_marking(&self, fail: bool) {
        self.fail_marking.store(fail, Ordering::SeqCst);
    }

    /// All rows in id order.
    pub fn all(&self) -> Vec<InboxMessage> {
        self.rows.lock().clone()
    }

    fn transition(&self, id: i64, to: InboxStatus) -> Result<bool, StoreError> {
        if self.fail_marking.load(Ordering::SeqCst) {
            return Err(injected("inbox status"));
        }
        let mut rows = self.rows.lock();
        match rows
            .iter_mut()
            .find(|m| m.id == id && m.status == InboxStatus::Pending)
        {
            Some(m) => {
                m.status = to;
                m.updated_at = Some(Utc::now());
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[async_trait]
impl InboxStore for MemoryInboxStore {
    async fn store_batch(&self, messages: Vec<NewInboxMessage>) -> Result<usize, StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(injected("inbox write"));
        }
        let mut rows = self.rows.lock();
        let mut seen: HashSet<(String, i32, i64)> = rows
            .iter()
            .map(|m| (m.topic.clone(), m.partition, m.offset))
            .collect();
        let mut inserted = 0;
        for message in messages {
            if !seen.insert((message.topic.clone(), message.partition, message.offset)) {
                continue;
            }
            let id = rows.len() as i64 + 1;
            rows.push(InboxMessage {
                id,
                topic: message.topic,
                partition: message.partition,
                offset: message.offset,
                key: message.key,
                value: message.value,
                headers: message.headers,
                status: InboxStatus::Pending,
                created_at: message.created_at,
                updated_at: None,
            });
            inserted += 1;
        }
        Ok(inserted)
    }

    async fn pending_for_partition(
        &self,
        topic: &str,
        partition: i32,
        limit: usize,
    ) -> Result<Vec<InboxMessage>, StoreError> {
        Ok(self
            .rows
            .lock()
            .iter()
            .filter(|m| {
                m.topic == topic && m.partition == partition && m.status == InboxStatus::Pending
            })
            .take(limit)
            .cloned()
            .collect())
    }

    async fn mark_received(&self, id: i64) -> Result<bool, StoreError> {
        self.transition(id, InboxStatus::Received)
    }

    async fn mark_failed(&self, id: i64) -> Result<bool, StoreError> {
        self.transition(id, InboxStatus::Failed)
    }
}

// =============================================================================
// Publisher
// =============================================================================

/// A message accepted by [`RecordingPublisher`].
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedMessage {
    pub topic: String,
    pub key: Option<Vec<u8>>,
    pub value: Option<Vec<u8>>,
    pub headers: Option<Headers>,
}

/// Publisher that records what it was asked to send.
#[derive(Debug, Default)]
pub struct RecordingPublisher {
    transactional: bool,
    fail_publishes: AtomicBool,
    published: Mutex<Vec<PublishedMessage>>,
    transactions: Mutex<Vec<String>>,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// A publisher that records `begin`, `commit` and `abort` calls.
    pub fn transactional() -> Self {
        Self {
            transactional: true,
            ..Self::default()
        }
    }

    pub fn fail_publishes(&self, fail: bool) {
        self.fail_publishes.store(fail, Ordering::SeqCst);
    }

    pub fn published(&self) -> Vec<PublishedMessage> {
        self.published.lock().clone()
    }

    pub fn transactions(&self) -> Vec<String> {
        self.transactions.lock().clone()
    }

    fn transaction_event(&self, event: &str) {
        if self.transactional {
            self.transactions.lock().push(event.to_string());
        }
    }
}

#[async_trait]
impl MessagePublisher for RecordingPublisher {
    async fn publish(
        &self,
        topic: &str,
        key: Option<&[u8]>,
        value: Option<&[u8]>,
        headers: Option<&Headers>,
    ) -> Result<(), BrokerError> {
        if self.fail_publishes.load(Ordering::SeqCst) {
            return Err(BrokerError::Task("injected publish failure".to_string()));
        }
        self.published.lock().push(PublishedMessage {
            topic: topic.to_string(),
            key: key.map(<[u8]>::to_vec),
            value: value.map(<[u8]>::to_vec),
            headers: headers.cloned(),
        });
        Ok(())
    }

    async fn begin_transaction(&self) -> Result<(), BrokerError> {
        self.transaction_event("begin");
        Ok(())
    }

    async fn commit_transaction(&self) -> Result<(), BrokerError> {
        self.transaction_event("commit");
        Ok(())
    }

    async fn abort_transaction(&self) -> Result<(), BrokerError> {
        self.transaction_event("abort");
        Ok(())
    }

    fn is_transactional(&self) -> bool {
        self.transactional
    }
}

// =============================================================================
// Consumer handle
// =============================================================================

/// A revocation fired from inside a later poll, the way rebalance callbacks are.
struct ScheduledRevoke {
    polls_left: usize,
    partitions: Vec<TopicPartition>,
    session: SharedSession,
}

impl std::fmt::Debug for ScheduledRevoke {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScheduledRevoke")
            .field("polls_left", &self.polls_left)
            .field("partitions", &self.partitions)
            .finish()
    }
}

#[derive(Debug, Default)]
struct Script {
    logs: BTreeMap<TopicPartition, Vec<RawRecord>>,
    revoke: Option<ScheduledRevoke>,
    positions: BTreeMap<TopicPartition, i64>,
    commits: Vec<Vec<(TopicPartition, i64)>>,
    seeks: Vec<(TopicPartition, i64)>,
    fail_polls: usize,
    fail_commits: usize,
    closed: bool,
}

/// A [`ConsumerHandle`] over in-memory partition logs.
///
/// Clones share state, so a test can keep one clone to push records and
/// inspect commits while the driver owns another.
#[derive(Debug, Clone, Default)]
pub struct ScriptedConsumer {
    script: Arc<Mutex<Script>>,
}

impl ScriptedConsumer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a record to a partition log at the next offset.
    pub fn push(&self, topic: &str, partition: i32, value: impl Into<String>) {
        let mut script = self.script.lock();
        let log = script
            .logs
            .entry(TopicPartition::new(topic, partition))
            .or_default();
        log.push(RawRecord {
            topic: topic.to_string(),
            partition,
            offset: log.len() as i64,
            key: None,
            value: Some(value.into().into_bytes()),
            headers: None,
            timestamp: None,
        });
    }

    pub fn fail_next_polls(&self, count: usize) {
        self.script.lock().fail_polls = count;
    }

    pub fn fail_next_commits(&self, count: usize) {
        self.script.lock().fail_commits = count;
    }

    /// Revokes `partitions` at the start of the `poll`-th poll from now
    /// (1-based): their entries are dropped from `session` and their logs stop
    /// delivering.
    pub fn revoke_on_poll(
        &self,
        poll: usize,
        partitions: Vec<TopicPartition>,
        session: SharedSession,
    ) {
        self.script.lock().revoke = Some(ScheduledRevoke {
            polls_left: poll,
            partitions,
            session,
        });
    }

    /// Successful commits, in order.
    pub fn commits(&self) -> Vec<Vec<(TopicPartition, i64)>> {
        self.script.lock().commits.clone()
    }

    pub fn seeks(&self) -> Vec<(TopicPartition, i64)> {
        self.script.lock().seeks.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.script.lock().closed
    }
}

impl ConsumerHandle for ScriptedConsumer {
    fn poll(&mut self, timeout: Duration) -> Result<Option<RawRecord>, BrokerError> {
        {
            let mut script = self.script.lock();
            if script.fail_polls > 0 {
                script.fail_polls -= 1;
                return Err(BrokerError::Task("injected poll failure".to_string()));
            }
            let due = match script.revoke.as_mut() {
                Some(revoke) => {
                    revoke.polls_left = revoke.polls_left.saturating_sub(1);
                    revoke.polls_left == 0
                }
                None => false,
            };
            if due {
                if let Some(revoke) = script.revoke.take() {
                    revoke.session.lock().forget(&revoke.partitions);
                    for tp in &revoke.partitions {
                        script.logs.remove(tp);
                    }
                }
            }
            let Script {
                logs, positions, ..
            } = &mut *script;
            for (tp, log) in logs.iter() {
                let position = positions.entry(tp.clone()).or_insert(0);
                if let Some(record) = log.get(*position as usize) {
                    *position += 1;
                    return Ok(Some(record.clone()));
                }
            }
        }
        std::thread::sleep(timeout);
        Ok(None)
    }

    fn commit(&mut self, offsets: &[(TopicPartition, i64)]) -> Result<(), BrokerError> {
        let mut script = self.script.lock();
        if script.fail_commits > 0 {
            script.fail_commits -= 1;
            return Err(BrokerError::Task("injected commit failure".to_string()));
        }
        script.commits.push(offsets.to_vec());
        Ok(())
    }

    fn seek(&mut self, tp: &TopicPartition, offset: i64) -> Result<(), BrokerError> {
        let mut script = self.script.lock();
        script.positions.insert(tp.clone(), offset);
        script.seeks.push((tp.clone(), offset));
        Ok(())
    }

    fn close(&mut self) {
        self.script.lock().closed = true;
    }
}
