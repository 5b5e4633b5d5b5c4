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

//! Outbox claiming, ownership and recovery against PostgreSQL.

use chrono::{Duration as ChronoDuration, Utc};
use diesel::prelude::*;
use serial_test::serial;
use std::collections::HashSet;
use std::sync::Arc;
use tandem::config::{ClusterConfig, OutboxConfig};
use tandem::dal::DAL;
use tandem::liveness::{ClusterDirectory, MemoryLivenessStore};
use tandem::models::{NewOutboxMessage, OutboxStatus};
use tandem::outbox::{OutboxDispatcher, OutboxStore};
use tandem::producer::{OutboxProducer, ProducerRecord};
use tandem::testing::RecordingPublisher;
use tokio::sync::Barrier;
use uuid::Uuid;

use crate::fixtures::get_or_init_postgres_fixture;

fn message(topic: &str, instance_id: Uuid) -> NewOutboxMessage {
    NewOutboxMessage {
        topic: topic.to_string(),
        key: Some(Uuid::new_v4().to_string().into_bytes()),
        value: Some(br#"{"id":1}"#.to_vec()),
        headers: None,
        instance_id,
        created_at: Utc::now(),
    }
}

async fn fresh_dal() -> DAL {
    let fixture = get_or_init_postgres_fixture().await;
    let mut guard = fixture.lock().unwrap_or_else(|e| e.into_inner());
    guard.reset_database().await;
    DAL::new(guard.get_database())
}

fn dispatcher_for(dal: DAL, instance_id: Uuid) -> (OutboxDispatcher, Arc<RecordingPublisher>) {
    let publisher = Arc::new(RecordingPublisher::transactional());
    let directory = Arc::new(ClusterDirectory::with_instance_id(
        Arc::new(MemoryLivenessStore::new()),
        ClusterConfig::default(),
        instance_id,
    ));
    let config = OutboxConfig::builder().batch_size(10).build().unwrap();
    (
        OutboxDispatcher::new(Arc::new(dal), publisher.clone(), directory, &config),
        publisher,
    )
}

#[tokio::test]
#[serial]
#[ignore = "Requires database connection"]
async fn test_claim_takes_oldest_pending_rows() {
    let dal = fresh_dal().await;
    let producer = Uuid::new_v4();
    let claimant = Uuid::new_v4();

    dal.outbox()
        .create_many((0..5).map(|_| message("orders", producer)).collect())
        .await
        .expect("Failed to enqueue");

    let claimed = dal
        .outbox()
        .claim_pending(3, claimant)
        .await
        .expect("Failed to claim");

    assert_eq!(claimed.iter().map(|m| m.id).collect::<Vec<_>>(), vec![1, 2, 3]);
    assert!(claimed
        .iter()
        .all(|m| m.status == OutboxStatus::Sending && m.instance_id == claimant));
    assert!(claimed.iter().all(|m| m.updated_at.is_some()));

    let rest = dal
        .outbox()
        .get_by_ids(vec![4, 5])
        .await
        .expect("Failed to load rows");
    assert!(rest
        .iter()
        .all(|m| m.status == OutboxStatus::Pending && m.instance_id == producer));
}

#[tokio::test]
#[serial]
#[ignore = "Requires database connection"]
async fn test_concurrent_claims_are_disjoint() {
    const NUM_ROWS: usize = 60;
    const NUM_CLAIMANTS: usize = 6;

    let dal = fresh_dal().await;
    dal.outbox()
        .create_many(
            (0..NUM_ROWS)
                .map(|_| message("orders", Uuid::new_v4()))
                .collect(),
        )
        .await
        .expect("Failed to enqueue");

    let dal = Arc::new(dal);
    let barrier = Arc::new(Barrier::new(NUM_CLAIMANTS));
    let mut handles = Vec::new();

    for _ in 0..NUM_CLAIMANTS {
        let dal = dal.clone();
        let barrier = barrier.clone();
        handles.push(tokio::spawn(async move {
            let instance = Uuid::new_v4();
            barrier.wait().await;
            let mut ids = Vec::new();
            loop {
                let batch = dal
                    .outbox()
                    .claim_pending(4, instance)
                    .await
                    .expect("Failed to claim");
                if batch.is_empty() {
                    break;
                }
                ids.extend(batch.into_iter().map(|m| m.id));
            }
            ids
        }));
    }

    let mut claimed = Vec::new();
    for handle in handles {
        claimed.extend(handle.await.expect("Claimant panicked"));
    }

    let unique: HashSet<_> = claimed.iter().collect();
    assert_eq!(unique.len(), claimed.len(), "A row was claimed twice");
    assert_eq!(claimed.len(), NUM_ROWS);
}

#[tokio::test]
#[serial]
#[ignore = "Requires database connection"]
async fn test_mark_sent_and_release_require_current_owner() {
    let dal = fresh_dal().await;
    let owner = Uuid::new_v4();
    let stranger = Uuid::new_v4();

    dal.outbox()
        .create_many(vec![message("orders", owner), message("orders", owner)])
        .await
        .expect("Failed to enqueue");
    dal.outbox()
        .claim_pending(2, owner)
        .await
        .expect("Failed to claim");

    assert_eq!(dal.mark_sent(&[1], stranger).await.unwrap(), 0);
    assert_eq!(dal.release(&[(2, stranger)]).await.unwrap(), 0);

    assert_eq!(dal.mark_sent(&[1], owner).await.unwrap(), 1);
    // Sent rows are never released
    assert_eq!(dal.release(&[(1, owner), (2, owner)]).await.unwrap(), 1);

    let rows = dal.outbox().get_by_ids(vec![1, 2]).await.unwrap();
    assert_eq!(rows[0].status, OutboxStatus::Sent);
    assert_eq!(rows[1].status, OutboxStatus::Pending);
}

#[tokio::test]
#[serial]
#[ignore = "Requires database connection"]
async fn test_dead_instance_rows_are_recovered_and_sent() {
    let dal = fresh_dal().await;
    let crashed = Uuid::new_v4();

    dal.outbox()
        .create_many((0..3).map(|_| message("orders", crashed)).collect())
        .await
        .expect("Failed to enqueue");
    let claimed = dal.outbox().claim_pending(3, crashed).await.unwrap();
    assert_eq!(claimed.len(), 3);

    let survivor = Uuid::new_v4();
    let (dispatcher, publisher) = dispatcher_for(dal.clone(), survivor);

    assert_eq!(dispatcher.recover_stuck_once().await.unwrap(), 3);
    let rows = dal.outbox().get_by_ids(vec![1, 2, 3]).await.unwrap();
    assert!(rows.iter().all(|m| m.status == OutboxStatus::Pending));

    dispatcher.dispatch_once().await.unwrap();
    assert_eq!(publisher.published().len(), 3);
    let rows = dal.outbox().get_by_ids(vec![1, 2, 3]).await.unwrap();
    assert!(rows
        .iter()
        .all(|m| m.status == OutboxStatus::Sent && m.instance_id == survivor));
}

#[tokio::test]
#[serial]
#[ignore = "Requires database connection"]
async fn test_rows_outside_window_are_ignored() {
    let dal = fresh_dal().await;
    let mut old = message("orders", Uuid::new_v4());
    old.created_at = Utc::now() - ChronoDuration::days(2);

    dal.outbox()
        .create_many(vec![old, message("orders", Uuid::new_v4())])
        .await
        .unwrap();

    let claimed = dal.outbox().claim_pending(10, Uuid::new_v4()).await.unwrap();
    assert_eq!(claimed.len(), 1);
    assert_eq!(claimed[0].id, 2);
}

#[tokio::test]
#[serial]
#[ignore = "Requires database connection"]
async fn test_staged_rows_roll_back_with_business_transaction() {
    let dal = fresh_dal().await;
    let producer: OutboxProducer<String, serde_json::Value> =
        OutboxProducer::new("orders", Arc::new(dal.clone()), Uuid::new_v4());
    let producer = Arc::new(producer);

    let conn = dal.database().get_connection().await.unwrap();
    let staging = producer.clone();
    let rolled_back = conn
        .interact(move |conn| {
            conn.transaction::<(), diesel::result::Error, _>(|conn| {
                staging
                    .stage(
                        conn,
                        vec![ProducerRecord::new(
                            Some("k".to_string()),
                            Some(serde_json::json!({"id": 1})),
                        )],
                    )
                    .expect("Failed to stage");
                Err(diesel::result::Error::RollbackTransaction)
            })
        })
        .await
        .unwrap();
    assert!(rolled_back.is_err());

    let committing = producer.clone();
    conn.interact(move |conn| {
        conn.transaction::<usize, diesel::result::Error, _>(|conn| {
            Ok(committing
                .stage(
                    conn,
                    vec![ProducerRecord::new(None, Some(serde_json::json!({"id": 2})))],
                )
                .expect("Failed to stage"))
        })
    })
    .await
    .unwrap()
    .unwrap();

    let claimed = dal.outbox().claim_pending(10, Uuid::new_v4()).await.unwrap();
    assert_eq!(claimed.len(), 1);
    assert_eq!(claimed[0].value.as_deref(), Some(&br#"{"id":2}"#[..]));
}
