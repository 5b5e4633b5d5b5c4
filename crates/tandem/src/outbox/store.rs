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

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::{NewOutboxMessage, OutboxMessage};

/// Persistence operations the dispatcher and the outbox producer rely on.
///
/// Every status transition is conditional on the row's current status, so a
/// stale caller can never move a row backwards or steal it from another owner.
#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Inserts rows with status `Pending` in a single transaction.
    async fn enqueue(&self, messages: Vec<NewOutboxMessage>) -> Result<usize, StoreError>;

    /// Atomically claims up to `limit` `Pending` rows, oldest id first, skipping
    /// rows locked by concurrent claimants. Claimed rows are returned already
    /// flipped to `Sending` with `instance_id` set to the claimant.
    async fn claim_pending(
        &self,
        limit: usize,
        instance_id: Uuid,
    ) -> Result<Vec<OutboxMessage>, StoreError>;

    /// Marks rows `Sent`, only where they are still `Sending` and owned by `instance_id`.
    async fn mark_sent(&self, ids: &[i64], instance_id: Uuid) -> Result<usize, StoreError>;

    /// Lists `Sending` rows with `id > after_id`, ordered by id.
    async fn list_sending(
        &self,
        after_id: i64,
        limit: usize,
    ) -> Result<Vec<OutboxMessage>, StoreError>;

    /// Returns `(id, owner)` rows to `Pending`, only where they are still
    /// `Sending` under that same owner.
    async fn release(&self, orphans: &[(i64, Uuid)]) -> Result<usize, StoreError>;
}
