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

//! Background loops driving the [`OutboxDispatcher`].

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use super::dispatcher::OutboxDispatcher;
use crate::config::OutboxConfig;
use crate::runtime::pause;

/// Dispatches batches until `shutdown`. A full batch is followed immediately
/// by the next one; an empty batch waits the empty delay, an error the error
/// delay. An in-flight batch is always allowed to finish.
pub async fn run_dispatch_loop(
    dispatcher: Arc<OutboxDispatcher>,
    config: OutboxConfig,
    shutdown: CancellationToken,
) {
    info!(instance_id = %dispatcher.instance_id(), "Outbox dispatch loop started");
    while !shutdown.is_cancelled() {
        let delay = match dispatcher.dispatch_once().await {
            Ok(true) => continue,
            Ok(false) => config.empty_delay(),
            Err(e) => {
                error!("Failed to dispatch outbox batch: {}", e);
                config.error_delay()
            }
        };
        if !pause(&shutdown, delay).await {
            break;
        }
    }
    info!("Outbox dispatch loop stopped");
}

/// Runs the stuck-row recovery pass every empty delay until `shutdown`.
pub async fn run_recovery_loop(
    dispatcher: Arc<OutboxDispatcher>,
    config: OutboxConfig,
    shutdown: CancellationToken,
) {
    info!("Outbox recovery loop started");
    while !shutdown.is_cancelled() {
        let delay = match dispatcher.recover_stuck_once().await {
            Ok(_) => config.empty_delay(),
            Err(e) => {
                error!("Failed to recover stuck outbox rows: {}", e);
                config.error_delay()
            }
        };
        if !pause(&shutdown, delay).await {
            break;
        }
    }
    info!("Outbox recovery loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClusterConfig;
    use crate::liveness::{ClusterDirectory, MemoryLivenessStore};
    use crate::models::{NewOutboxMessage, OutboxStatus};
    use crate::outbox::OutboxStore;
    use crate::testing::{MemoryOutboxStore, RecordingPublisher};
    use chrono::Utc;
    use std::time::Duration;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_dispatch_loop_drains_and_stops() {
        let store = Arc::new(MemoryOutboxStore::new());
        let publisher = Arc::new(RecordingPublisher::new());
        let directory = Arc::new(ClusterDirectory::new(
            Arc::new(MemoryLivenessStore::new()),
            ClusterConfig::default(),
        ));
        let config = OutboxConfig::builder()
            .batch_size(2)
            .empty_delay(Duration::from_millis(10))
            .build()
            .unwrap();
        let dispatcher = Arc::new(OutboxDispatcher::new(
            store.clone(),
            publisher.clone(),
            directory,
            &config,
        ));

        let rows = (0..5)
            .map(|i| NewOutboxMessage {
                topic: "t".into(),
                key: None,
                value: Some(vec![i]),
                headers: None,
                instance_id: Uuid::new_v4(),
                created_at: Utc::now(),
            })
            .collect();
        store.enqueue(rows).await.unwrap();

        let shutdown = CancellationToken::new();
        let task = tokio::spawn(run_dispatch_loop(dispatcher, config, shutdown.clone()));

        tokio::time::sleep(Duration::from_millis(200)).await;
        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(publisher.published().len(), 5);
        assert!(store.all().iter().all(|m| m.status == OutboxStatus::Sent));
    }
}
