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

//! Error types for Tandem.
//!
//! Each concern gets its own enum so that callers can tell transient protocol
//! failures apart from handler failures and from cancellation:
//!
//! - [`StoreError`]: relational store access (pool, query, row decoding)
//! - [`BrokerError`]: Kafka protocol operations and the session driver queue
//! - [`LivenessError`]: the shared liveness cache
//! - [`SerializationError`]: key/value encoding on the produce and consume paths
//! - [`HandlerError`]: business handler outcomes
//! - [`OutboxError`], [`InboxError`], [`ProduceError`]: component level errors
//!   aggregating the above
//! - [`ConfigError`]: invalid configuration detected at build time

use std::time::Duration;
use thiserror::Error;

/// Errors raised by the relational store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Failure to obtain or use a pooled connection
    #[error("Connection pool error: {0}")]
    ConnectionPool(String),

    /// Failure reported by diesel while executing a statement
    #[error("Database error: {0}")]
    Database(#[from] diesel::result::Error),

    /// A persisted JSON column could not be decoded
    #[error("Invalid JSON in persisted column: {0}")]
    Json(#[from] serde_json::Error),

    /// A status column held a value outside the known set
    #[error("Invalid {entity} status value: {value}")]
    InvalidStatus { entity: &'static str, value: i16 },

    /// Failure while running embedded migrations
    #[error("Migration error: {0}")]
    Migration(String),
}

/// Errors raised by broker operations.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// Error reported by librdkafka
    #[error("Kafka error: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),

    /// The session driver has shut down and no longer accepts commands
    #[error("Session driver is closed")]
    Closed,

    /// The caller cancelled the operation before it completed
    #[error("Broker operation cancelled")]
    Cancelled,

    /// A blocking broker call could not be joined
    #[error("Broker task failed: {0}")]
    Task(String),
}

impl BrokerError {
    /// Returns true for errors that signal shutdown or cancellation rather than failure.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, BrokerError::Closed | BrokerError::Cancelled)
    }
}

/// Errors raised by the liveness backing store.
#[derive(Debug, Error)]
pub enum LivenessError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Liveness store error: {0}")]
    Store(String),
}

/// Errors raised while encoding or decoding message keys and values.
#[derive(Debug, Error)]
pub enum SerializationError {
    #[error("JSON serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid UTF-8 payload: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

/// Outcome of a business handler that did not succeed.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// No handler is registered for the message topic
    #[error("No handler registered for topic '{0}'")]
    NotRegistered(String),

    /// The raw key or value could not be decoded into the handler's types
    #[error("Failed to decode message: {0}")]
    Decode(#[from] SerializationError),

    /// The handler observed cancellation and stopped
    #[error("Handler cancelled")]
    Cancelled,

    /// The handler's business logic failed
    #[error("Handler failed: {0}")]
    Failed(#[from] anyhow::Error),
}

impl HandlerError {
    /// Wraps any displayable failure as [`HandlerError::Failed`].
    pub fn failed(message: impl std::fmt::Display) -> Self {
        HandlerError::Failed(anyhow::anyhow!("{}", message))
    }
}

/// Errors raised by the outbox dispatcher and recovery pass.
#[derive(Debug, Error)]
pub enum OutboxError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Broker(#[from] BrokerError),

    #[error(transparent)]
    Liveness(#[from] LivenessError),
}

/// Errors raised while processing inbox rows.
#[derive(Debug, Error)]
pub enum InboxError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Broker(#[from] BrokerError),

    /// The handler failed and the row was marked Failed
    #[error("Handler failed for inbox message {message_id}: {source}")]
    Handler {
        message_id: i64,
        #[source]
        source: HandlerError,
    },

    /// The handler failed and marking the row Failed failed as well
    #[error(
        "Handler failed for inbox message {message_id} ({handler}) and marking it failed also failed ({marking})"
    )]
    Compound {
        message_id: i64,
        handler: HandlerError,
        marking: StoreError,
    },

    /// Processing stopped because the worker was cancelled
    #[error("Inbox processing cancelled")]
    Cancelled,
}

impl InboxError {
    pub fn is_cancellation(&self) -> bool {
        match self {
            InboxError::Cancelled => true,
            InboxError::Broker(e) => e.is_cancellation(),
            _ => false,
        }
    }
}

/// Errors raised by the typed producers.
#[derive(Debug, Error)]
pub enum ProduceError {
    #[error(transparent)]
    Serialization(#[from] SerializationError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Broker(#[from] BrokerError),
}

/// Invalid library configuration.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{section}.batch_size must be greater than zero")]
    InvalidBatchSize { section: &'static str },

    #[error("{field} must be greater than zero")]
    ZeroDuration { field: &'static str },

    #[error("Keep-alive interval ({interval:?}) must be less than keep-alive timeout ({timeout:?})")]
    KeepAliveInterval {
        interval: Duration,
        timeout: Duration,
    },

    #[error("{field} must not be empty")]
    Empty { field: &'static str },
}
