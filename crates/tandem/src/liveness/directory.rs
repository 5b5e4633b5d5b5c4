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

//! Instance identity and liveness.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::store::LivenessStore;
use crate::config::ClusterConfig;
use crate::error::LivenessError;

/// Answers whether a service instance is alive, and keeps this instance's
/// own liveness key fresh.
pub struct ClusterDirectory {
    store: Arc<dyn LivenessStore>,
    config: ClusterConfig,
    instance_id: Uuid,
}

impl std::fmt::Debug for ClusterDirectory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterDirectory")
            .field("service", &self.config.service_name())
            .field("instance_id", &self.instance_id)
            .finish()
    }
}

impl ClusterDirectory {
    /// Creates a directory with a freshly generated instance id.
    pub fn new(store: Arc<dyn LivenessStore>, config: ClusterConfig) -> Self {
        Self::with_instance_id(store, config, Uuid::new_v4())
    }

    pub fn with_instance_id(
        store: Arc<dyn LivenessStore>,
        config: ClusterConfig,
        instance_id: Uuid,
    ) -> Self {
        Self {
            store,
            config,
            instance_id,
        }
    }

    /// This process's identity.
    pub fn instance_id(&self) -> Uuid {
        self.instance_id
    }

    pub fn keep_alive_enabled(&self) -> bool {
        self.config.keep_alive_enabled()
    }

    /// `Svc:{service}:Id:{instance}:Alive`
    pub fn alive_key(&self, instance_id: Uuid) -> String {
        format!(
            "Svc:{}:Id:{}:Alive",
            self.config.service_name(),
            instance_id
        )
    }

    /// True for the local instance; otherwise whether its key still exists.
    pub async fn is_alive(&self, instance_id: Uuid) -> Result<bool, LivenessError> {
        if instance_id == self.instance_id {
            return Ok(true);
        }
        self.store.exists(&self.alive_key(instance_id)).await
    }

    /// Writes this instance's liveness key.
    pub async fn initialize(&self) -> Result<(), LivenessError> {
        if !self.keep_alive_enabled() {
            return Ok(());
        }
        self.store
            .put(
                &self.alive_key(self.instance_id),
                self.config.keep_alive_timeout(),
            )
            .await?;
        info!(instance_id = %self.instance_id, "Instance registered as alive");
        Ok(())
    }

    /// Renews this instance's liveness key, recreating it if it already lapsed.
    pub async fn refresh(&self) -> Result<(), LivenessError> {
        if !self.keep_alive_enabled() {
            return Ok(());
        }
        let key = self.alive_key(self.instance_id);
        let ttl = self.config.keep_alive_timeout();
        if !self.store.touch(&key, ttl).await? {
            warn!(instance_id = %self.instance_id, "Liveness key had expired, re-registering");
            self.store.put(&key, ttl).await?;
        }
        Ok(())
    }

    /// Deletes this instance's liveness key.
    pub async fn finalize(&self) -> Result<(), LivenessError> {
        if !self.keep_alive_enabled() {
            return Ok(());
        }
        self.store.remove(&self.alive_key(self.instance_id)).await?;
        info!(instance_id = %self.instance_id, "Instance deregistered");
        Ok(())
    }

    /// Refreshes the key every keep-alive interval until `shutdown`, then
    /// deletes it. Refresh failures are logged and retried on the next tick.
    pub async fn run_keepalive(self: Arc<Self>, shutdown: CancellationToken) {
        if !self.keep_alive_enabled() {
            return;
        }
        let mut ticker = tokio::time::interval(self.config.keep_alive_interval());
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    match self.refresh().await {
                        Ok(()) => debug!(instance_id = %self.instance_id, "Liveness refreshed"),
                        Err(e) => warn!("Failed to refresh liveness: {}", e),
                    }
                }
            }
        }

        if let Err(e) = self.finalize().await {
            warn!("Failed to deregister instance: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::liveness::MemoryLivenessStore;
    use std::time::Duration;

    fn config(timeout_ms: u64) -> ClusterConfig {
        ClusterConfig::builder()
            .service_name("orders")
            .keep_alive_interval(Duration::from_millis(timeout_ms / 3))
            .keep_alive_timeout(Duration::from_millis(timeout_ms))
            .build()
            .unwrap()
    }

    #[test]
    fn test_alive_key_format() {
        let id = Uuid::nil();
        let directory = ClusterDirectory::with_instance_id(
            Arc::new(MemoryLivenessStore::new()),
            config(3000),
            id,
        );
        assert_eq!(
            directory.alive_key(id),
            "Svc:orders:Id:00000000-0000-0000-0000-000000000000:Alive"
        );
    }

    #[tokio::test]
    async fn test_self_is_always_alive() {
        let directory = ClusterDirectory::new(Arc::new(MemoryLivenessStore::new()), config(3000));
        assert!(directory.is_alive(directory.instance_id()).await.unwrap());
    }

    #[tokio::test]
    async fn test_peer_liveness_follows_its_key() {
        let store: Arc<dyn LivenessStore> = Arc::new(MemoryLivenessStore::new());
        let local = ClusterDirectory::new(store.clone(), config(3000));
        let peer = ClusterDirectory::new(store.clone(), config(90));

        assert!(!local.is_alive(peer.instance_id()).await.unwrap());

        peer.initialize().await.unwrap();
        assert!(local.is_alive(peer.instance_id()).await.unwrap());

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(!local.is_alive(peer.instance_id()).await.unwrap());

        peer.initialize().await.unwrap();
        assert!(local.is_alive(peer.instance_id()).await.unwrap());

        peer.finalize().await.unwrap();
        assert!(!local.is_alive(peer.instance_id()).await.unwrap());
    }

    #[tokio::test]
    async fn test_refresh_recreates_lapsed_key() {
        let store: Arc<dyn LivenessStore> = Arc::new(MemoryLivenessStore::new());
        let directory = ClusterDirectory::new(store.clone(), config(3000));
        directory.refresh().await.unwrap();
        assert!(store
            .exists(&directory.alive_key(directory.instance_id()))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_keepalive_disabled_writes_nothing() {
        let store: Arc<dyn LivenessStore> = Arc::new(MemoryLivenessStore::new());
        let config = ClusterConfig::builder()
            .keep_alive_enabled(false)
            .build()
            .unwrap();
        let directory = ClusterDirectory::new(store.clone(), config);
        directory.initialize().await.unwrap();
        assert!(!store
            .exists(&directory.alive_key(directory.instance_id()))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_keepalive_loop_keeps_key_and_removes_on_shutdown() {
        let store: Arc<dyn LivenessStore> = Arc::new(MemoryLivenessStore::new());
        let directory = Arc::new(ClusterDirectory::new(store.clone(), config(120)));
        directory.initialize().await.unwrap();
        let key = directory.alive_key(directory.instance_id());

        let shutdown = CancellationToken::new();
        let task = tokio::spawn(directory.clone().run_keepalive(shutdown.clone()));

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(store.exists(&key).await.unwrap());

        shutdown.cancel();
        task.await.unwrap();
        assert!(!store.exists(&key).await.unwrap());
    }
}
