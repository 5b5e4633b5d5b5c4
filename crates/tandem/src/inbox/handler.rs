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

//! Business handlers and their per-topic registry.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::broker::RawRecord;
use crate::error::{HandlerError, SerializationError};
use crate::models::Headers;
use crate::producer::{Deserializer, Json, Utf8};

/// A consumed record with its key and value decoded.
#[derive(Debug, Clone, PartialEq)]
pub struct ConsumeResult<K, V> {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<K>,
    pub value: Option<V>,
    pub headers: Option<Headers>,
}

impl<K, V> ConsumeResult<K, V> {
    /// Decodes a raw record, which may come from the broker or from an inbox row.
    pub fn decode(
        record: &RawRecord,
        keys: &dyn Deserializer<K>,
        values: &dyn Deserializer<V>,
    ) -> Result<Self, SerializationError> {
        Ok(Self {
            topic: record.topic.clone(),
            partition: record.partition,
            offset: record.offset,
            key: keys.deserialize(record.key.as_deref())?,
            value: values.deserialize(record.value.as_deref())?,
            headers: record.headers.clone(),
        })
    }
}

/// Typed business handler for one topic.
#[async_trait]
pub trait Handler<K, V>: Send + Sync
where
    K: Send + 'static,
    V: Send + 'static,
{
    /// Handles one message. Return [`HandlerError::Cancelled`] when stopping
    /// because `cancel` fired, so the message is left for a later attempt.
    async fn handle(
        &self,
        message: ConsumeResult<K, V>,
        cancel: &CancellationToken,
    ) -> Result<(), HandlerError>;
}

/// Untyped handler invoked with raw bytes; what the registry stores.
#[async_trait]
pub trait InboxHandler: Send + Sync {
    async fn handle(&self, record: &RawRecord, cancel: &CancellationToken)
        -> Result<(), HandlerError>;
}

/// Adapts a [`Handler`] into an [`InboxHandler`] with its deserializers.
pub struct TypedHandler<K, V> {
    handler: Arc<dyn Handler<K, V>>,
    keys: Arc<dyn Deserializer<K>>,
    values: Arc<dyn Deserializer<V>>,
}

impl<K, V> TypedHandler<K, V> {
    pub fn new(
        handler: Arc<dyn Handler<K, V>>,
        keys: Arc<dyn Deserializer<K>>,
        values: Arc<dyn Deserializer<V>>,
    ) -> Self {
        Self {
            handler,
            keys,
            values,
        }
    }
}

#[async_trait]
impl<K, V> InboxHandler for TypedHandler<K, V>
where
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    async fn handle(
        &self,
        record: &RawRecord,
        cancel: &CancellationToken,
    ) -> Result<(), HandlerError> {
        let message = ConsumeResult::decode(record, self.keys.as_ref(), self.values.as_ref())?;
        self.handler.handle(message, cancel).await
    }
}

/// Handlers keyed by topic.
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: BTreeMap<String, Arc<dyn InboxHandler>>,
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("topics", &self.topics())
            .finish()
    }
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an untyped handler, replacing any previous one for `topic`.
    pub fn register(&mut self, topic: impl Into<String>, handler: Arc<dyn InboxHandler>) {
        self.handlers.insert(topic.into(), handler);
    }

    pub fn register_typed<K, V>(
        &mut self,
        topic: impl Into<String>,
        handler: Arc<dyn Handler<K, V>>,
        keys: Arc<dyn Deserializer<K>>,
        values: Arc<dyn Deserializer<V>>,
    ) where
        K: Send + Sync + 'static,
        V: Send + Sync + 'static,
    {
        self.register(topic, Arc::new(TypedHandler::new(handler, keys, values)));
    }

    /// Registers a handler with UTF-8 keys and JSON values.
    pub fn register_json<V>(&mut self, topic: impl Into<String>, handler: Arc<dyn Handler<String, V>>)
    where
        V: DeserializeOwned + Send + Sync + 'static,
    {
        self.register_typed(topic, handler, Arc::new(Utf8), Arc::new(Json));
    }

    pub fn get(&self, topic: &str) -> Option<Arc<dyn InboxHandler>> {
        self.handlers.get(topic).cloned()
    }

    /// Registered topics in sorted order.
    pub fn topics(&self) -> Vec<String> {
        self.handlers.keys().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Invokes the handler registered for the record's topic.
    pub async fn dispatch(
        &self,
        record: &RawRecord,
        cancel: &CancellationToken,
    ) -> Result<(), HandlerError> {
        match self.handlers.get(&record.topic) {
            Some(handler) => handler.handle(record, cancel).await,
            None => Err(HandlerError::NotRegistered(record.topic.clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Deserialize)]
    struct Added {
        id: i64,
    }

    #[derive(Default)]
    struct Collect {
        seen: Mutex<Vec<ConsumeResult<String, Added>>>,
    }

    #[async_trait]
    impl Handler<String, Added> for Collect {
        async fn handle(
            &self,
            message: ConsumeResult<String, Added>,
            _cancel: &CancellationToken,
        ) -> Result<(), HandlerError> {
            self.seen.lock().push(message);
            Ok(())
        }
    }

    fn record(topic: &str, value: &[u8]) -> RawRecord {
        RawRecord {
            topic: topic.to_string(),
            partition: 1,
            offset: 9,
            key: Some(b"k".to_vec()),
            value: Some(value.to_vec()),
            headers: None,
            timestamp: None,
        }
    }

    #[tokio::test]
    async fn test_typed_dispatch_decodes_key_and_value() {
        let collect = Arc::new(Collect::default());
        let mut registry = HandlerRegistry::new();
        registry.register_json::<Added>("added", collect.clone());

        registry
            .dispatch(&record("added", br#"{"id":3}"#), &CancellationToken::new())
            .await
            .unwrap();

        let seen = collect.seen.lock();
        assert_eq!(seen[0].key.as_deref(), Some("k"));
        assert_eq!(seen[0].value, Some(Added { id: 3 }));
        assert_eq!(seen[0].offset, 9);
    }

    #[tokio::test]
    async fn test_undecodable_value_is_a_handler_error() {
        let mut registry = HandlerRegistry::new();
        registry.register_json::<Added>("added", Arc::new(Collect::default()));

        let err = registry
            .dispatch(&record("added", b"garbage"), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, HandlerError::Decode(_)));
    }

    #[tokio::test]
    async fn test_unregistered_topic() {
        let registry = HandlerRegistry::new();
        let err = registry
            .dispatch(&record("other", b"{}"), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, HandlerError::NotRegistered(t) if t == "other"));
        assert!(registry.topics().is_empty());
    }
}
