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

//! Backing stores for liveness keys.

use async_trait::async_trait;
use parking_lot::Mutex;
use redis::aio::MultiplexedConnection;
use redis::Client;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::info;

use crate::error::LivenessError;

/// Keys with a sliding expiration.
#[async_trait]
pub trait LivenessStore: Send + Sync {
    /// Creates or overwrites `key` with the given time to live.
    async fn put(&self, key: &str, ttl: Duration) -> Result<(), LivenessError>;

    /// Extends the expiration of an existing key. Returns false if the key is gone.
    async fn touch(&self, key: &str, ttl: Duration) -> Result<bool, LivenessError>;

    async fn exists(&self, key: &str) -> Result<bool, LivenessError>;

    async fn remove(&self, key: &str) -> Result<(), LivenessError>;
}

// =============================================================================
// Redis
// =============================================================================

/// Redis-backed liveness keys (`SET PX`, `PEXPIRE`, `EXISTS`, `DEL`).
#[derive(Clone)]
pub struct RedisLivenessStore {
    conn: MultiplexedConnection,
    prefix: String,
}

impl RedisLivenessStore {
    /// Connects to `url`. Every key is prefixed with `prefix`.
    pub async fn connect(url: &str, prefix: impl Into<String>) -> Result<Self, LivenessError> {
        let client = Client::open(url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        let prefix = prefix.into();
        info!(prefix = %prefix, "Connected to Redis liveness store");
        Ok(Self { conn, prefix })
    }

    fn key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }
}

fn millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

#[async_trait]
impl LivenessStore for RedisLivenessStore {
    async fn put(&self, key: &str, ttl: Duration) -> Result<(), LivenessError> {
        let _: () = redis::cmd("SET")
            .arg(self.key(key))
            .arg("")
            .arg("PX")
            .arg(millis(ttl))
            .query_async(&mut self.conn.clone())
            .await?;
        Ok(())
    }

    async fn touch(&self, key: &str, ttl: Duration) -> Result<bool, LivenessError> {
        let renewed: bool = redis::cmd("PEXPIRE")
            .arg(self.key(key))
            .arg(millis(ttl))
            .query_async(&mut self.conn.clone())
            .await?;
        Ok(renewed)
    }

    async fn exists(&self, key: &str) -> Result<bool, LivenessError> {
        let exists: bool = redis::cmd("EXISTS")
            .arg(self.key(key))
            .query_async(&mut self.conn.clone())
            .await?;
        Ok(exists)
    }

    async fn remove(&self, key: &str) -> Result<(), LivenessError> {
        let _: i64 = redis::cmd("DEL")
            .arg(self.key(key))
            .query_async(&mut self.conn.clone())
            .await?;
        Ok(())
    }
}

// =============================================================================
// In-memory
// =============================================================================

/// Process-local liveness keys, for tests and single-instance deployments.
#[derive(Debug, Default)]
pub struct MemoryLivenessStore {
    keys: Mutex<HashMap<String, Instant>>,
}

impl MemoryLivenessStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn live(&self, key: &str) -> bool {
        let mut keys = self.keys.lock();
        match keys.get(key) {
            Some(expires) if *expires > Instant::now() => true,
            Some(_) => {
                keys.remove(key);
                false
            }
            None => false,
        }
    }
}

#[async_trait]
impl LivenessStore for MemoryLivenessStore {
    async fn put(&self, key: &str, ttl: Duration) -> Result<(), LivenessError> {
        self.keys
            .lock()
            .insert(key.to_string(), Instant::now() + ttl);
        Ok(())
    }

    async fn touch(&self, key: &str, ttl: Duration) -> Result<bool, LivenessError> {
        if !self.live(key) {
            return Ok(false);
        }
        self.keys
            .lock()
            .insert(key.to_string(), Instant::now() + ttl);
        Ok(true)
    }

    async fn exists(&self, key: &str) -> Result<bool, LivenessError> {
        Ok(self.live(key))
    }

    async fn remove(&self, key: &str) -> Result<(), LivenessError> {
        self.keys.lock().remove(key);
        Ok(())
    }
}
