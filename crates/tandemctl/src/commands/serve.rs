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

//! Implementation of the `serve` command: every loop plus the demo HTTP API.

use anyhow::{Context, Result};
use std::sync::Arc;
use tandem::broker::SessionDriver;
use tandem::inbox::{
    BatchConsumeLoop, DirectConsumerWorker, HandlerRegistry, InboxStore, PartitionWorkerPool,
};
use tandem::liveness::{ClusterDirectory, RedisLivenessStore};
use tandem::outbox::{run_dispatch_loop, run_recovery_loop, OutboxDispatcher, OutboxStore};
use tandem::producer::{DirectProducer, KafkaPublisher, MessagePublisher, OutboxProducer};
use tandem::{Database, DAL};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::migrate;
use crate::config::TandemConfig;
use crate::demo::handler::MeasurementAddedHandler;
use crate::demo::routes::{self, AppState, EventSink};
use crate::demo::{MeasurementAdded, MEASUREMENT_ADDED_TOPIC};

/// Topic handlers served by this process.
pub fn handler_registry() -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();
    registry.register_json::<MeasurementAdded>(
        MEASUREMENT_ADDED_TOPIC,
        Arc::new(MeasurementAddedHandler),
    );
    registry
}

pub async fn run(config: TandemConfig) -> Result<()> {
    let outbox_config = config.outbox_settings()?;
    let inbox_config = config.inbox_settings()?;
    let cluster_config = config.cluster_settings()?;
    let kafka_config = config.kafka_settings()?;

    let database = Database::new(&config.database.url, config.database.pool_size)
        .context("Failed to connect to database")?;
    migrate::apply(&database).await?;
    let dal = DAL::from_configs(database, &outbox_config, &inbox_config);

    let liveness = RedisLivenessStore::connect(&config.redis.url, config.redis.key_prefix.clone())
        .await
        .context("Failed to connect to Redis")?;
    let directory = Arc::new(ClusterDirectory::new(Arc::new(liveness), cluster_config));
    directory
        .initialize()
        .await
        .context("Failed to register instance liveness")?;
    info!(instance_id = %directory.instance_id(), "Instance registered");

    let publisher: Arc<dyn MessagePublisher> =
        Arc::new(KafkaPublisher::new(&kafka_config).context("Failed to create Kafka producer")?);

    let listener = tokio::net::TcpListener::bind(&config.server.bind_address)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.bind_address))?;

    let shutdown = CancellationToken::new();
    let mut tasks: Vec<JoinHandle<()>> = Vec::new();
    let mut drivers: Vec<Arc<SessionDriver>> = Vec::new();

    tasks.push(tokio::spawn(
        directory.clone().run_keepalive(shutdown.child_token()),
    ));

    // Outbound
    let outbox_store: Arc<dyn OutboxStore> = Arc::new(dal.clone());
    if outbox_config.enabled() {
        let dispatcher = Arc::new(OutboxDispatcher::new(
            outbox_store.clone(),
            publisher.clone(),
            directory.clone(),
            &outbox_config,
        ));
        tasks.push(tokio::spawn(run_dispatch_loop(
            dispatcher.clone(),
            outbox_config.clone(),
            shutdown.child_token(),
        )));
        tasks.push(tokio::spawn(run_recovery_loop(
            dispatcher,
            outbox_config.clone(),
            shutdown.child_token(),
        )));
    }

    // Inbound
    let registry = Arc::new(handler_registry());
    let topics = registry.topics();
    if inbox_config.enabled() {
        let driver = Arc::new(
            SessionDriver::connect(&kafka_config, &topics).context("Failed to create consumer")?,
        );
        let inbox_store: Arc<dyn InboxStore> = Arc::new(dal.clone());

        let consume = BatchConsumeLoop::new(driver.clone(), inbox_store.clone(), inbox_config.clone());
        let token = shutdown.child_token();
        tasks.push(tokio::spawn(async move { consume.run(token).await }));

        let pool = Arc::new(PartitionWorkerPool::new(
            inbox_store,
            registry.clone(),
            inbox_config.clone(),
        ));
        tasks.push(tokio::spawn(pool.run(driver.tracker(), shutdown.child_token())));
        drivers.push(driver);
    } else {
        for topic in topics {
            let Some(handler) = registry.get(&topic) else {
                continue;
            };
            let driver = Arc::new(
                SessionDriver::connect(&kafka_config, std::slice::from_ref(&topic))
                    .with_context(|| format!("Failed to create consumer for {}", topic))?,
            );
            let worker = DirectConsumerWorker::new(
                topic,
                driver.clone(),
                handler,
                inbox_config.error_delay(),
            );
            let token = shutdown.child_token();
            tasks.push(tokio::spawn(async move { worker.run(token).await }));
            drivers.push(driver);
        }
    }

    // Demo API
    let sink = if outbox_config.enabled() {
        EventSink::Outbox(Arc::new(OutboxProducer::new(
            MEASUREMENT_ADDED_TOPIC,
            outbox_store,
            directory.instance_id(),
        )))
    } else {
        EventSink::Direct {
            producer: Arc::new(DirectProducer::new(
                MEASUREMENT_ADDED_TOPIC,
                publisher.clone(),
            )),
            publisher,
        }
    };
    let app = routes::router(AppState { dal, sink });
    info!("HTTP server listening on {}", config.server.bind_address);

    let server_token = shutdown.clone();
    tasks.push(tokio::spawn(async move {
        let stop = server_token.clone();
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(async move { stop.cancelled().await })
            .await
        {
            error!("HTTP server failed: {}", e);
            server_token.cancel();
        }
    }));

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                error!("Failed to listen for Ctrl-C: {}", e);
            }
            info!("Shutdown requested");
        }
        _ = shutdown.cancelled() => {}
    }
    shutdown.cancel();

    for result in futures::future::join_all(tasks).await {
        if let Err(e) = result {
            warn!("Background task ended abnormally: {}", e);
        }
    }
    for driver in drivers {
        driver.shutdown().await;
    }
    if let Err(e) = directory.finalize().await {
        warn!("Failed to remove liveness key: {}", e);
    }

    info!("Shutdown complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_serves_demo_topic() {
        let registry = handler_registry();
        assert_eq!(registry.topics(), vec![MEASUREMENT_ADDED_TOPIC.to_string()]);
        assert!(registry.get(MEASUREMENT_ADDED_TOPIC).is_some());
    }
}
