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

use crate::error::StoreError;
use crate::models::{InboxMessage, NewInboxMessage};

/// Persistence operations used by the intake loop and the partition workers.
#[async_trait]
pub trait InboxStore: Send + Sync {
    /// Persists a batch of consumed records as `Pending` rows in one transaction.
    ///
    /// Records whose `(topic, partition, offset)` is already stored inside the
    /// lookback window are skipped, so redelivery after a failed commit does not
    /// create duplicates. Returns the number of rows inserted.
    async fn store_batch(&self, messages: Vec<NewInboxMessage>) -> Result<usize, StoreError>;

    /// Returns up to `limit` `Pending` rows of one partition in ascending id order.
    async fn pending_for_partition(
        &self,
        topic: &str,
        partition: i32,
        limit: usize,
    ) -> Result<Vec<InboxMessage>, StoreError>;

    /// Moves a row from `Pending` to `Received`. Returns false if it was not `Pending`.
    async fn mark_received(&self, id: i64) -> Result<bool, StoreError>;

    /// Moves a row from `Pending` to `Failed`. Returns false if it was not `Pending`.
    async fn mark_failed(&self, id: i64) -> Result<bool, StoreError>;
}
