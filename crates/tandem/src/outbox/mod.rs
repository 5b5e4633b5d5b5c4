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

//! Transactional outbox.
//!
//! Application code writes outbox rows in the same database transaction as its
//! business change (see [`crate::producer::OutboxProducer::stage`]). The
//! [`OutboxDispatcher`] then claims `Pending` rows, publishes them in a broker
//! transaction and marks them `Sent`. Rows left `Sending` by an instance that
//! died mid-batch are returned to `Pending` by the recovery pass once the
//! instance's liveness key has expired.
//!
//! Delivery is at-least-once: a crash between the broker commit and
//! `mark_sent` republishes the batch after recovery.

pub mod dispatcher;
pub mod service;
pub mod store;

pub use dispatcher::OutboxDispatcher;
pub use service::{run_dispatch_loop, run_recovery_loop};
pub use store::OutboxStore;
