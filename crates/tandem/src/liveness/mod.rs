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

//! Instance liveness over a shared expiring-key store.
//!
//! Each process registers `Svc:{service}:Id:{instance}:Alive` on startup,
//! renews it at the keep-alive interval and deletes it on shutdown. The outbox
//! recovery pass uses [`ClusterDirectory::is_alive`] to decide whether a
//! `Sending` row's owner has died.

pub mod directory;
pub mod store;

pub use directory::ClusterDirectory;
pub use store::{LivenessStore, MemoryLivenessStore, RedisLivenessStore};
