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

//! At-least-once consumption without the inbox table.

use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use super::handler::InboxHandler;
use crate::broker::RecordSource;
use crate::error::HandlerError;
use crate::runtime::pause;

/// Consumes one record at a time, hands it to the topic's handler and commits.
///
/// Handler failures are logged and the record is committed anyway; a
/// cancelled handler stops the worker without committing. The commit is
/// retried until it succeeds or shutdown is requested.
pub struct DirectConsumerWorker {
    topic: String,
    source: Arc<dyn RecordSource>,
    handler: Arc<dyn InboxHandler>,
    error_delay: Duration,
}

impl DirectConsumerWorker {
    pub fn new(
        topic: impl Into<String>,
        source: Arc<dyn RecordSource>,
        handler: Arc<dyn InboxHandler>,
        error_delay: Duration,
    ) -> Self {
        Self {
            topic: topic.into(),
            source,
            handler,
            error_delay,
        }
    }

    pub async fn run(&self, shutdown: CancellationToken) {
        info!(topic = %self.topic, "Direct consumer started");
        while !shutdown.is_cancelled() {
            let record = match self.source.consume_one(&shutdown).await {
                Ok(record) => record,
                Err(e) if e.is_cancellation() => break,
                Err(e) => {
                    error!(topic = %self.topic, "Consume failed: {}", e);
                    if !pause(&shutdown, self.error_delay).await {
                        break;
                    }
                    continue;
                }
            };

            match self.handler.handle(&record, &shutdown).await {
                Ok(()) => {}
                // Left uncommitted so the record is redelivered
                Err(HandlerError::Cancelled) => break,
                Err(e) => error!(
                    topic = %record.topic,
                    partition = record.partition,
                    offset = record.offset,
                    "Handler failed: {}",
                    e
                ),
            }

            self.commit(&shutdown).await;
        }
        info!(topic = %self.topic, "Direct consumer stopped");
    }

    async fn commit(&self, shutdown: &CancellationToken) {
        while !shutdown.is_cancelled() {
            match self.source.commit().await {
                Ok(()) => return,
                Err(e) if e.is_cancellation() => return,
                Err(e) => {
                    error!(topic = %self.topic, "Commit failed: {}", e);
                    if !pause(shutdown, self.error_delay).await {
                        return;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{RawRecord, SessionDriver, TopicPartition};
    use crate::testing::ScriptedConsumer;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Record {
        offsets: Mutex<Vec<i64>>,
    }

    #[async_trait]
    impl InboxHandler for Record {
        async fn handle(
            &self,
            record: &RawRecord,
            _cancel: &CancellationToken,
        ) -> Result<(), HandlerError> {
            self.offsets.lock().push(record.offset);
            if record.value.as_deref() == Some(&b"bad"[..]) {
                return Err(HandlerError::failed("bad payload"));
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_handles_and_commits_each_record() {
        let consumer = ScriptedConsumer::new();
        consumer.push("events", 0, "good");
        consumer.push("events", 0, "bad");
        consumer.push("events", 0, "good");
        let driver = Arc::new(SessionDriver::spawn(consumer.clone()).unwrap());
        let handler = Arc::new(Record::default());
        let worker = DirectConsumerWorker::new(
            "events",
            driver.clone(),
            handler.clone(),
            Duration::from_millis(10),
        );

        let shutdown = CancellationToken::new();
        let stopper = shutdown.clone();
        let probe = consumer.clone();
        tokio::spawn(async move {
            for _ in 0..200 {
                if probe.commits().len() == 3 {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            stopper.cancel();
        });

        tokio::time::timeout(Duration::from_secs(5), worker.run(shutdown))
            .await
            .unwrap();

        assert_eq!(*handler.offsets.lock(), vec![0, 1, 2]);
        let tp = TopicPartition::new("events", 0);
        assert_eq!(
            consumer.commits(),
            vec![
                vec![(tp.clone(), 1)],
                vec![(tp.clone(), 2)],
                vec![(tp, 3)]
            ]
        );
        driver.shutdown().await;
    }
}
