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

use chrono::Utc;
use serial_test::serial;
use tandem::dal::DAL;
use tandem::models::{Headers, InboxStatus, NewInboxMessage};

use crate::fixtures::get_or_init_postgres_fixture;

fn consumed(topic: &str, partition: i32, offset: i64) -> NewInboxMessage {
    let mut headers = Headers::new();
    headers.insert("CreatedAt".to_string(), Some(Utc::now().to_rfc3339()));
    NewInboxMessage {
        topic: topic.to_string(),
        partition,
        offset,
        key: Some(format!("key-{}", offset).into_bytes()),
        value: Some(format!(r#"{{"offset":{}}}"#, offset).into_bytes()),
        headers: Some(headers),
        created_at: Utc::now(),
    }
}

async fn fresh_dal() -> DAL {
    let fixture = get_or_init_postgres_fixture().await;
    let mut guard = fixture.lock().unwrap_or_else(|e| e.into_inner());
    guard.reset_database().await;
    DAL::new(guard.get_database())
}

#[tokio::test]
#[serial]
#[ignore = "Requires database connection"]
async fn test_store_batch_skips_redelivered_offsets() {
    let dal = fresh_dal().await;

    let first = dal
        .inbox()
        .store_batch(vec![
            consumed("measurements", 0, 10),
            consumed("measurements", 0, 11),
            consumed("measurements", 1, 10),
        ])
        .await
        .expect("Failed to store first batch");
    assert_eq!(first, 3);

    // Redelivery after a failed commit overlaps the previous batch
    let second = dal
        .inbox()
        .store_batch(vec![
            consumed("measurements", 0, 11),
            consumed("measurements", 0, 12),
            consumed("measurements", 0, 12),
            consumed("measurements", 1, 10),
            consumed("audit", 0, 10),
        ])
        .await
        .expect("Failed to store second batch");
    assert_eq!(second, 2);

    let zero = dal
        .inbox()
        .pending_for_partition("measurements", 0, 100)
        .await
        .unwrap();
    assert_eq!(zero.iter().map(|m| m.offset).collect::<Vec<_>>(), vec![10, 11, 12]);
}

#[tokio::test]
#[serial]
#[ignore = "Requires database connection"]
async fn test_pending_for_partition_is_ordered_and_isolated() {
    let dal = fresh_dal().await;
    dal.inbox()
        .store_batch(vec![
            consumed("measurements", 2, 5),
            consumed("measurements", 3, 1),
            consumed("measurements", 2, 3),
            consumed("audit", 2, 4),
            consumed("measurements", 2, 4),
        ])
        .await
        .unwrap();

    let pending = dal
        .inbox()
        .pending_for_partition("measurements", 2, 2)
        .await
        .unwrap();
    // Insertion order, not offset order
    assert_eq!(pending.iter().map(|m| m.offset).collect::<Vec<_>>(), vec![5, 3]);
    assert!(pending.iter().all(|m| m.topic == "measurements" && m.partition == 2));
    assert!(pending.iter().all(|m| m.status == InboxStatus::Pending));

    let headers = pending[0].headers.as_ref().expect("headers persisted");
    assert!(headers.contains_key("CreatedAt"));
}

#[tokio::test]
#[serial]
#[ignore = "Requires database connection"]
async fn test_status_transitions_only_leave_pending() {
    let dal = fresh_dal().await;
    dal.inbox()
        .store_batch(vec![consumed("measurements", 0, 1), consumed("measurements", 0, 2)])
        .await
        .unwrap();

    assert!(dal.inbox().mark_received(1).await.unwrap());
    assert!(!dal.inbox().mark_received(1).await.unwrap());
    assert!(!dal.inbox().mark_failed(1).await.unwrap());

    assert!(dal.inbox().mark_failed(2).await.unwrap());
    assert!(!dal.inbox().mark_received(2).await.unwrap());
    assert!(!dal.inbox().mark_failed(999).await.unwrap());

    let rows = dal.inbox().get_by_ids(vec![1, 2]).await.unwrap();
    assert_eq!(rows[0].status, InboxStatus::Received);
    assert_eq!(rows[1].status, InboxStatus::Failed);
    assert!(rows.iter().all(|m| m.updated_at.is_some()));

    let pending = dal
        .inbox()
        .pending_for_partition("measurements", 0, 10)
        .await
        .unwrap();
    assert!(pending.is_empty());
}
