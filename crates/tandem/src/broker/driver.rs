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

//! Single-threaded command loop in front of a [`ConsumerHandle`].
//!
//! Callers enqueue [`Command`]s on an unbounded channel and await a oneshot
//! reply; a dedicated OS thread owns the handle and executes one command at a
//! time. A protocol error is returned to the issuing caller only.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::assignment::AssignmentTracker;
use super::handle::{ConsumerHandle, KafkaConsumerHandle};
use super::record::{RawRecord, TopicPartition};
use super::session::{ConsumeSession, SharedSession};
use crate::config::KafkaConfig;
use crate::error::BrokerError;

/// Upper bound on a single blocking poll, so cancellation is observed promptly.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// The four consumer operations used by the intake loops.
#[async_trait]
pub trait RecordSource: Send + Sync {
    /// Waits for the next record until one arrives or `cancel` fires.
    async fn consume_one(&self, cancel: &CancellationToken) -> Result<RawRecord, BrokerError>;

    /// Collects up to `size` records, waiting at most `timeout` in total.
    async fn consume_batch(
        &self,
        size: usize,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Vec<RawRecord>, BrokerError>;

    /// Commits the offsets delivered since the last commit or reset.
    async fn commit(&self) -> Result<(), BrokerError>;

    /// Rewinds every partition delivered since the last commit or reset.
    async fn reset(&self) -> Result<(), BrokerError>;
}

type Reply<T> = oneshot::Sender<Result<T, BrokerError>>;

enum Command {
    ConsumeOne {
        cancel: CancellationToken,
        reply: Reply<RawRecord>,
    },
    ConsumeBatch {
        size: usize,
        timeout: Duration,
        cancel: CancellationToken,
        reply: Reply<Vec<RawRecord>>,
    },
    Commit {
        reply: Reply<()>,
    },
    Reset {
        reply: Reply<()>,
    },
    Stop,
}

impl Command {
    fn fail(self, err: BrokerError) {
        match self {
            Command::ConsumeOne { reply, .. } => {
                let _ = reply.send(Err(err));
            }
            Command::ConsumeBatch { reply, .. } => {
                let _ = reply.send(Err(err));
            }
            Command::Commit { reply } | Command::Reset { reply } => {
                let _ = reply.send(Err(err));
            }
            Command::Stop => {}
        }
    }
}

// =============================================================================
// Driver thread
// =============================================================================

struct Worker<H: ConsumerHandle> {
    handle: H,
    session: SharedSession,
    shutdown: CancellationToken,
}

impl<H: ConsumerHandle> Worker<H> {
    fn run(mut self, mut rx: mpsc::UnboundedReceiver<Command>) {
        debug!("Session driver thread started");
        while let Some(command) = rx.blocking_recv() {
            match command {
                Command::Stop => break,
                Command::ConsumeOne { cancel, reply } => self.consume_one(cancel, reply),
                Command::ConsumeBatch {
                    size,
                    timeout,
                    cancel,
                    reply,
                } => self.consume_batch(size, timeout, cancel, reply),
                Command::Commit { reply } => {
                    let _ = reply.send(self.commit());
                }
                Command::Reset { reply } => {
                    let _ = reply.send(self.reset());
                }
            }
        }

        rx.close();
        while let Ok(command) = rx.try_recv() {
            command.fail(BrokerError::Closed);
        }
        self.handle.close();
        info!("Session driver thread stopped");
    }

    fn abandoned<T>(&self, cancel: &CancellationToken, reply: &Reply<T>) -> bool {
        cancel.is_cancelled() || self.shutdown.is_cancelled() || reply.is_closed()
    }

    fn consume_one(&mut self, cancel: CancellationToken, reply: Reply<RawRecord>) {
        loop {
            if self.abandoned(&cancel, &reply) {
                let _ = reply.send(Err(BrokerError::Cancelled));
                return;
            }
            match self.handle.poll(POLL_INTERVAL) {
                Ok(Some(record)) => {
                    let polled = self.stamp(record);
                    self.deliver(vec![polled], reply, |mut v| v.remove(0));
                    return;
                }
                Ok(None) => continue,
                Err(e) => {
                    let _ = reply.send(Err(e));
                    return;
                }
            }
        }
    }

    fn consume_batch(
        &mut self,
        size: usize,
        timeout: Duration,
        cancel: CancellationToken,
        reply: Reply<Vec<RawRecord>>,
    ) {
        let deadline = Instant::now() + timeout;
        let mut records = Vec::with_capacity(size);

        while records.len() < size {
            if self.abandoned(&cancel, &reply) {
                if records.is_empty() {
                    let _ = reply.send(Err(BrokerError::Cancelled));
                    return;
                }
                break;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            match self.handle.poll(remaining.min(POLL_INTERVAL)) {
                Ok(Some(record)) => {
                    let polled = self.stamp(record);
                    records.push(polled);
                }
                Ok(None) => {}
                Err(e) if records.is_empty() => {
                    let _ = reply.send(Err(e));
                    return;
                }
                Err(e) => {
                    warn!(
                        "Poll failed after {} records, returning partial batch: {}",
                        records.len(),
                        e
                    );
                    break;
                }
            }
        }

        self.deliver(records, reply, |v| v);
    }

    /// Pairs a freshly polled record with the session generation. Rebalance
    /// callbacks run inside `poll`, so revocations up to this record are
    /// already counted.
    fn stamp(&self, record: RawRecord) -> (RawRecord, u64) {
        let generation = self.session.lock().generation();
        (record, generation)
    }

    /// Hands records to the caller and records them in the session. If the
    /// caller has gone away the records are rewound instead, so they are not
    /// skipped by the next commit. Partitions revoked after a record was
    /// polled are neither recorded nor rewound.
    fn deliver<T>(
        &mut self,
        polled: Vec<(RawRecord, u64)>,
        reply: Reply<T>,
        wrap: impl FnOnce(Vec<RawRecord>) -> T,
    ) {
        let delivered: Vec<(TopicPartition, i64, u64)> = polled
            .iter()
            .map(|(r, generation)| (r.topic_partition(), r.offset, *generation))
            .collect();
        let records: Vec<RawRecord> = polled.into_iter().map(|(r, _)| r).collect();

        if reply.send(Ok(wrap(records))).is_ok() {
            let mut session = self.session.lock();
            for (tp, offset, generation) in delivered {
                if session.revoked_since(&tp, generation) {
                    debug!("Not recording {}@{}, partition was revoked", tp, offset);
                    continue;
                }
                session.record(tp, offset);
            }
            return;
        }

        let mut first: BTreeMap<TopicPartition, i64> = BTreeMap::new();
        {
            let session = self.session.lock();
            for (tp, offset, generation) in delivered {
                if !session.revoked_since(&tp, generation) {
                    first.entry(tp).or_insert(offset);
                }
            }
        }
        for (tp, offset) in first {
            if let Err(e) = self.handle.seek(&tp, offset) {
                error!("Failed to rewind {} to {} after abandoned delivery: {}", tp, offset, e);
            }
        }
    }

    fn commit(&mut self) -> Result<(), BrokerError> {
        let offsets = self.session.lock().commit_offsets();
        if offsets.is_empty() {
            return Ok(());
        }
        self.handle.commit(&offsets)?;
        debug!(offsets = ?offsets, "Committed offsets");
        self.session.lock().clear();
        Ok(())
    }

    fn reset(&mut self) -> Result<(), BrokerError> {
        let positions = self.session.lock().reset_positions();
        for (tp, offset) in &positions {
            self.handle.seek(tp, *offset)?;
        }
        if !positions.is_empty() {
            debug!(positions = ?positions, "Rewound partitions");
        }
        self.session.lock().clear();
        Ok(())
    }
}

// =============================================================================
// Async facade
// =============================================================================

/// Async front end of a consumer handle running on its own thread.
pub struct SessionDriver {
    tx: mpsc::UnboundedSender<Command>,
    tracker: Arc<AssignmentTracker>,
    shutdown: CancellationToken,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for SessionDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionDriver")
            .field("closed", &self.tx.is_closed())
            .field("assignments", &self.tracker.snapshot())
            .finish()
    }
}

impl SessionDriver {
    /// Starts a driver over `handle` with a private tracker and session.
    pub fn spawn<H: ConsumerHandle>(handle: H) -> Result<Self, BrokerError> {
        Self::spawn_with(handle, Arc::new(AssignmentTracker::new()), ConsumeSession::shared())
    }

    /// Starts a driver over `handle`, sharing `tracker` and `session` with its
    /// rebalance callbacks.
    pub fn spawn_with<H: ConsumerHandle>(
        handle: H,
        tracker: Arc<AssignmentTracker>,
        session: SharedSession,
    ) -> Result<Self, BrokerError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();
        let worker = Worker {
            handle,
            session,
            shutdown: shutdown.clone(),
        };
        let thread = std::thread::Builder::new()
            .name("tandem-session-driver".to_string())
            .spawn(move || worker.run(rx))
            .map_err(|e| BrokerError::Task(e.to_string()))?;

        Ok(Self {
            tx,
            tracker,
            shutdown,
            thread: Mutex::new(Some(thread)),
        })
    }

    /// Connects an rdkafka consumer subscribed to `topics` and starts a driver over it.
    pub fn connect(config: &KafkaConfig, topics: &[String]) -> Result<Self, BrokerError> {
        let tracker = Arc::new(AssignmentTracker::new());
        let session = ConsumeSession::shared();
        let handle =
            KafkaConsumerHandle::connect(config, topics, Arc::clone(&tracker), Arc::clone(&session))?;
        Self::spawn_with(handle, tracker, session)
    }

    pub fn tracker(&self) -> Arc<AssignmentTracker> {
        Arc::clone(&self.tracker)
    }

    /// Partitions currently assigned to this consumer.
    pub fn assignments(&self) -> Vec<TopicPartition> {
        self.tracker.snapshot()
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(Reply<T>) -> Command,
    ) -> Result<T, BrokerError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(build(reply))
            .map_err(|_| BrokerError::Closed)?;
        rx.await.map_err(|_| BrokerError::Closed)?
    }

    pub async fn consume_one(&self, cancel: &CancellationToken) -> Result<RawRecord, BrokerError> {
        let cancel = cancel.clone();
        self.request(|reply| Command::ConsumeOne { cancel, reply })
            .await
    }

    pub async fn consume_batch(
        &self,
        size: usize,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Vec<RawRecord>, BrokerError> {
        let cancel = cancel.clone();
        self.request(|reply| Command::ConsumeBatch {
            size,
            timeout,
            cancel,
            reply,
        })
        .await
    }

    pub async fn commit(&self) -> Result<(), BrokerError> {
        self.request(|reply| Command::Commit { reply }).await
    }

    pub async fn reset(&self) -> Result<(), BrokerError> {
        self.request(|reply| Command::Reset { reply }).await
    }

    /// Stops the driver thread and waits for it to exit. Commands still queued
    /// fail with [`BrokerError::Closed`].
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let _ = self.tx.send(Command::Stop);
        let thread = self.thread.lock().take();
        if let Some(thread) = thread {
            match tokio::task::spawn_blocking(move || thread.join()).await {
                Ok(Ok(())) => {}
                Ok(Err(_)) => error!("Session driver thread panicked"),
                Err(e) => error!("Failed to join session driver thread: {}", e),
            }
        }
    }
}

impl Drop for SessionDriver {
    fn drop(&mut self) {
        self.shutdown.cancel();
        let _ = self.tx.send(Command::Stop);
    }
}

#[async_trait]
impl RecordSource for SessionDriver {
    async fn consume_one(&self, cancel: &CancellationToken) -> Result<RawRecord, BrokerError> {
        SessionDriver::consume_one(self, cancel).await
    }

    async fn consume_batch(
        &self,
        size: usize,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Vec<RawRecord>, BrokerError> {
        SessionDriver::consume_batch(self, size, timeout, cancel).await
    }

    async fn commit(&self) -> Result<(), BrokerError> {
        SessionDriver::commit(self).await
    }

    async fn reset(&self) -> Result<(), BrokerError> {
        SessionDriver::reset(self).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedConsumer;

    fn tp(partition: i32) -> TopicPartition {
        TopicPartition::new("events", partition)
    }

    #[tokio::test]
    async fn test_batch_returns_available_records_at_timeout() {
        let consumer = ScriptedConsumer::new();
        for i in 0..4 {
            consumer.push("events", 0, format!("v{}", i));
        }
        let driver = SessionDriver::spawn(consumer.clone()).unwrap();

        let started = Instant::now();
        let batch = driver
            .consume_batch(10, Duration::from_secs(1), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(batch.len(), 4);
        assert!(started.elapsed() >= Duration::from_millis(900));
        driver.shutdown().await;
    }

    #[tokio::test]
    async fn test_batch_stops_at_target_size() {
        let consumer = ScriptedConsumer::new();
        for i in 0..5 {
            consumer.push("events", 0, format!("v{}", i));
        }
        let driver = SessionDriver::spawn(consumer.clone()).unwrap();

        let batch = driver
            .consume_batch(3, Duration::from_secs(5), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(batch.iter().map(|r| r.offset).collect::<Vec<_>>(), vec![0, 1, 2]);
        driver.shutdown().await;
    }

    #[tokio::test]
    async fn test_commit_uses_high_watermark_per_partition() {
        let consumer = ScriptedConsumer::new();
        consumer.push("events", 0, "a");
        consumer.push("events", 0, "b");
        consumer.push("events", 1, "c");
        let driver = SessionDriver::spawn(consumer.clone()).unwrap();

        let batch = driver
            .consume_batch(3, Duration::from_secs(1), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(batch.len(), 3);

        driver.commit().await.unwrap();
        assert_eq!(consumer.commits(), vec![vec![(tp(0), 2), (tp(1), 1)]]);

        // Session is cleared, a second commit is a no-op
        driver.commit().await.unwrap();
        assert_eq!(consumer.commits().len(), 1);
        driver.shutdown().await;
    }

    #[tokio::test]
    async fn test_reset_redelivers_from_low_watermark() {
        let consumer = ScriptedConsumer::new();
        for i in 0..6 {
            consumer.push("events", 0, format!("v{}", i));
        }
        let driver = SessionDriver::spawn(consumer.clone()).unwrap();
        let cancel = CancellationToken::new();

        driver
            .consume_batch(3, Duration::from_millis(300), &cancel)
            .await
            .unwrap();
        driver.commit().await.unwrap();
        assert_eq!(consumer.commits(), vec![vec![(tp(0), 3)]]);

        let second = driver
            .consume_batch(3, Duration::from_millis(300), &cancel)
            .await
            .unwrap();
        assert_eq!(second.iter().map(|r| r.offset).collect::<Vec<_>>(), vec![3, 4, 5]);

        driver.reset().await.unwrap();
        assert_eq!(consumer.seeks(), vec![(tp(0), 3)]);

        let replay = driver
            .consume_batch(3, Duration::from_millis(300), &cancel)
            .await
            .unwrap();
        assert_eq!(replay, second);
        driver.shutdown().await;
    }

    #[tokio::test]
    async fn test_partition_revoked_mid_batch_is_not_committed() {
        let consumer = ScriptedConsumer::new();
        consumer.push("events", 0, "a");
        consumer.push("events", 1, "b");
        let session = ConsumeSession::shared();
        // The second poll runs the revocation before handing out events/1
        consumer.revoke_on_poll(2, vec![tp(0)], Arc::clone(&session));
        let driver = SessionDriver::spawn_with(
            consumer.clone(),
            Arc::new(AssignmentTracker::new()),
            Arc::clone(&session),
        )
        .unwrap();

        let batch = driver
            .consume_batch(10, Duration::from_millis(300), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(batch.len(), 2);
        assert!(session.lock().watermarks(&tp(0)).is_none());

        driver.commit().await.unwrap();
        assert_eq!(consumer.commits(), vec![vec![(tp(1), 1)]]);
        driver.shutdown().await;
    }

    #[tokio::test]
    async fn test_record_polled_after_revocation_is_committed() {
        let consumer = ScriptedConsumer::new();
        let session = ConsumeSession::shared();
        consumer.revoke_on_poll(1, vec![tp(0)], Arc::clone(&session));
        consumer.push("events", 1, "b");
        let driver = SessionDriver::spawn_with(
            consumer.clone(),
            Arc::new(AssignmentTracker::new()),
            Arc::clone(&session),
        )
        .unwrap();

        let record = driver.consume_one(&CancellationToken::new()).await.unwrap();
        assert_eq!(record.partition, 1);

        driver.commit().await.unwrap();
        assert_eq!(consumer.commits(), vec![vec![(tp(1), 1)]]);
        driver.shutdown().await;
    }

    #[tokio::test]
    async fn test_failed_commit_keeps_session() {
        let consumer = ScriptedConsumer::new();
        consumer.push("events", 0, "a");
        consumer.fail_next_commits(1);
        let driver = SessionDriver::spawn(consumer.clone()).unwrap();

        driver
            .consume_batch(1, Duration::from_millis(300), &CancellationToken::new())
            .await
            .unwrap();

        assert!(driver.commit().await.is_err());
        driver.commit().await.unwrap();
        assert_eq!(consumer.commits(), vec![vec![(tp(0), 1)]]);
        driver.shutdown().await;
    }

    #[tokio::test]
    async fn test_consume_one_observes_cancellation() {
        let consumer = ScriptedConsumer::new();
        let driver = SessionDriver::spawn(consumer.clone()).unwrap();
        let cancel = CancellationToken::new();

        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(150)).await;
            canceller.cancel();
        });

        let err = driver.consume_one(&cancel).await.unwrap_err();
        assert!(matches!(err, BrokerError::Cancelled));
        driver.shutdown().await;
    }

    #[tokio::test]
    async fn test_commands_after_shutdown_are_closed() {
        let consumer = ScriptedConsumer::new();
        let driver = SessionDriver::spawn(consumer.clone()).unwrap();
        driver.shutdown().await;

        assert!(matches!(driver.commit().await, Err(BrokerError::Closed)));
        assert!(consumer.is_closed());
    }

    #[tokio::test]
    async fn test_poll_error_reaches_only_its_caller() {
        let consumer = ScriptedConsumer::new();
        consumer.fail_next_polls(1);
        consumer.push("events", 0, "a");
        let driver = SessionDriver::spawn(consumer.clone()).unwrap();
        let cancel = CancellationToken::new();

        assert!(driver.consume_one(&cancel).await.is_err());
        let record = driver.consume_one(&cancel).await.unwrap();
        assert_eq!(record.value.as_deref(), Some(&b"a"[..]));
        driver.shutdown().await;
    }
}
