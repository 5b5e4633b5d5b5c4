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

//! Typed producers.
//!
//! [`DirectProducer`] publishes straight to the broker. [`OutboxProducer`]
//! writes outbox rows instead, either in its own transaction
//! ([`Producer::produce_batch`]) or inside a caller-owned one
//! ([`OutboxProducer::stage`]).

use async_trait::async_trait;
use chrono::Utc;
use diesel::pg::PgConnection;
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use super::publisher::MessagePublisher;
use super::serializer::{Json, Serializer, Utf8};
use crate::dal::insert_outbox_messages;
use crate::error::ProduceError;
use crate::models::{Headers, NewOutboxMessage};
use crate::outbox::OutboxStore;

/// A record to produce.
#[derive(Debug, Clone, PartialEq)]
pub struct ProducerRecord<K, V> {
    pub key: Option<K>,
    pub value: Option<V>,
    pub headers: Option<Headers>,
}

impl<K, V> ProducerRecord<K, V> {
    pub fn new(key: Option<K>, value: Option<V>) -> Self {
        Self {
            key,
            value,
            headers: None,
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: Option<String>) -> Self {
        self.headers
            .get_or_insert_with(Headers::new)
            .insert(name.into(), value);
        self
    }
}

#[async_trait]
pub trait Producer<K, V>: Send + Sync
where
    K: Send + 'static,
    V: Send + 'static,
{
    async fn produce(
        &self,
        key: Option<K>,
        value: Option<V>,
        headers: Option<Headers>,
    ) -> Result<(), ProduceError> {
        self.produce_batch(vec![ProducerRecord {
            key,
            value,
            headers,
        }])
        .await
    }

    async fn produce_batch(&self, records: Vec<ProducerRecord<K, V>>) -> Result<(), ProduceError>;
}

/// Encoded form of a record.
struct Encoded {
    key: Option<Vec<u8>>,
    value: Option<Vec<u8>>,
    headers: Option<Headers>,
}

/// Topic plus the serializers for one typed producer.
struct Encoder<K, V> {
    topic: String,
    keys: Arc<dyn Serializer<K>>,
    values: Arc<dyn Serializer<V>>,
}

impl<K, V> Encoder<K, V> {
    fn encode(&self, record: ProducerRecord<K, V>) -> Result<Encoded, ProduceError> {
        Ok(Encoded {
            key: self.keys.serialize(record.key.as_ref())?,
            value: self.values.serialize(record.value.as_ref())?,
            headers: record.headers,
        })
    }
}

// =============================================================================
// DirectProducer
// =============================================================================

/// Publishes typed records straight to the broker.
pub struct DirectProducer<K, V> {
    publisher: Arc<dyn MessagePublisher>,
    encoder: Encoder<K, V>,
}

impl<V: Serialize + Sync> DirectProducer<String, V> {
    /// UTF-8 keys and JSON values.
    pub fn new(topic: impl Into<String>, publisher: Arc<dyn MessagePublisher>) -> Self {
        Self::with_serializers(topic, publisher, Arc::new(Utf8), Arc::new(Json))
    }
}

impl<K, V> DirectProducer<K, V> {
    pub fn with_serializers(
        topic: impl Into<String>,
        publisher: Arc<dyn MessagePublisher>,
        keys: Arc<dyn Serializer<K>>,
        values: Arc<dyn Serializer<V>>,
    ) -> Self {
        Self {
            publisher,
            encoder: Encoder {
                topic: topic.into(),
                keys,
                values,
            },
        }
    }

    pub fn topic(&self) -> &str {
        &self.encoder.topic
    }
}

#[async_trait]
impl<K, V> Producer<K, V> for DirectProducer<K, V>
where
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    async fn produce_batch(&self, records: Vec<ProducerRecord<K, V>>) -> Result<(), ProduceError> {
        let encoded = records
            .into_iter()
            .map(|r| self.encoder.encode(r))
            .collect::<Result<Vec<_>, _>>()?;

        for record in &encoded {
            self.publisher
                .publish(
                    &self.encoder.topic,
                    record.key.as_deref(),
                    record.value.as_deref(),
                    record.headers.as_ref(),
                )
                .await?;
        }
        Ok(())
    }
}

// =============================================================================
// OutboxProducer
// =============================================================================

/// Writes typed records as `Pending` outbox rows owned by this instance.
pub struct OutboxProducer<K, V> {
    store: Arc<dyn OutboxStore>,
    instance_id: Uuid,
    encoder: Encoder<K, V>,
}

impl<V: Serialize + Sync> OutboxProducer<String, V> {
    /// UTF-8 keys and JSON values.
    pub fn new(topic: impl Into<String>, store: Arc<dyn OutboxStore>, instance_id: Uuid) -> Self {
        Self::with_serializers(topic, store, instance_id, Arc::new(Utf8), Arc::new(Json))
    }
}

impl<K, V> OutboxProducer<K, V> {
    pub fn with_serializers(
        topic: impl Into<String>,
        store: Arc<dyn OutboxStore>,
        instance_id: Uuid,
        keys: Arc<dyn Serializer<K>>,
        values: Arc<dyn Serializer<V>>,
    ) -> Self {
        Self {
            store,
            instance_id,
            encoder: Encoder {
                topic: topic.into(),
                keys,
                values,
            },
        }
    }

    pub fn topic(&self) -> &str {
        &self.encoder.topic
    }

    /// Encodes records into outbox rows without writing them.
    pub fn to_outbox_messages(
        &self,
        records: Vec<ProducerRecord<K, V>>,
    ) -> Result<Vec<NewOutboxMessage>, ProduceError> {
        let now = Utc::now();
        records
            .into_iter()
            .map(|record| {
                let encoded = self.encoder.encode(record)?;
                Ok(NewOutboxMessage {
                    topic: self.encoder.topic.clone(),
                    key: encoded.key,
                    value: encoded.value,
                    headers: encoded.headers,
                    instance_id: self.instance_id,
                    created_at: now,
                })
            })
            .collect()
    }

    /// Writes outbox rows on a connection inside the caller's transaction, so
    /// they commit or roll back with the caller's business write.
    pub fn stage(
        &self,
        conn: &mut PgConnection,
        records: Vec<ProducerRecord<K, V>>,
    ) -> Result<usize, ProduceError> {
        let messages = self.to_outbox_messages(records)?;
        Ok(insert_outbox_messages(conn, &messages)?)
    }
}

#[async_trait]
impl<K, V> Producer<K, V> for OutboxProducer<K, V>
where
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    async fn produce_batch(&self, records: Vec<ProducerRecord<K, V>>) -> Result<(), ProduceError> {
        let messages = self.to_outbox_messages(records)?;
        self.store.enqueue(messages).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::OutboxStatus;
    use crate::testing::{MemoryOutboxStore, RecordingPublisher};
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Added {
        id: i64,
        value: i32,
    }

    #[tokio::test]
    async fn test_direct_producer_publishes_encoded_records() {
        let publisher = Arc::new(RecordingPublisher::new());
        let producer: DirectProducer<String, Added> = DirectProducer::new("added", publisher.clone());

        producer
            .produce(
                Some("k1".to_string()),
                Some(Added { id: 1, value: 7 }),
                None,
            )
            .await
            .unwrap();

        let published = publisher.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].topic, "added");
        assert_eq!(published[0].key.as_deref(), Some(&b"k1"[..]));
        assert_eq!(
            published[0].value.as_deref(),
            Some(&br#"{"id":1,"value":7}"#[..])
        );
    }

    #[tokio::test]
    async fn test_outbox_producer_enqueues_pending_rows() {
        let store = Arc::new(MemoryOutboxStore::new());
        let instance = Uuid::new_v4();
        let producer: OutboxProducer<String, Added> =
            OutboxProducer::new("added", store.clone(), instance);

        let records = vec![
            ProducerRecord::new(Some("a".to_string()), Some(Added { id: 1, value: 1 }))
                .with_header("CreatedAt", Some("2026-01-01T00:00:00Z".to_string())),
            ProducerRecord::new(None, None),
        ];
        producer.produce_batch(records).await.unwrap();

        let rows = store.all();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r.status == OutboxStatus::Pending));
        assert!(rows.iter().all(|r| r.instance_id == instance));
        assert_eq!(
            rows[0].headers.as_ref().and_then(|h| h.get("CreatedAt")).cloned(),
            Some(Some("2026-01-01T00:00:00Z".to_string()))
        );
        assert!(rows[1].key.is_none());
        assert!(rows[1].value.is_none());
    }

    #[tokio::test]
    async fn test_outbox_producer_propagates_store_failure() {
        let store = Arc::new(MemoryOutboxStore::new());
        store.fail_writes(true);
        let producer: OutboxProducer<String, Added> =
            OutboxProducer::new("added", store.clone(), Uuid::new_v4());

        let err = producer
            .produce(None, Some(Added { id: 1, value: 1 }), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ProduceError::Store(_)));
    }
}
