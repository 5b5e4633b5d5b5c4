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

//! Inbox table access.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use std::collections::{BTreeMap, HashSet};

use super::models::{InboxRow, NewInboxRow};
use super::{window_start, DAL};
use crate::database::schema::inbox;
use crate::error::StoreError;
use crate::inbox::InboxStore;
use crate::models::{InboxMessage, InboxStatus, NewInboxMessage};

/// Data access layer for inbox operations.
#[derive(Clone)]
pub struct InboxDAL<'a> {
    dal: &'a DAL,
}

impl<'a> InboxDAL<'a> {
    pub fn new(dal: &'a DAL) -> Self {
        Self { dal }
    }

    fn since(&self) -> DateTime<Utc> {
        window_start(self.dal.windows().inbox)
    }

    /// Inserts a batch of consumed records, skipping offsets already stored.
    pub async fn store_batch(&self, messages: Vec<NewInboxMessage>) -> Result<usize, StoreError> {
        if messages.is_empty() {
            return Ok(0);
        }
        let since = self.since();
        let conn = self.dal.database.get_connection().await?;

        conn.interact(move |conn| {
            conn.transaction::<_, StoreError, _>(|conn| {
                let mut ranges: BTreeMap<(String, i32), (i64, i64)> = BTreeMap::new();
                for message in &messages {
                    let range = ranges
                        .entry((message.topic.clone(), message.partition))
                        .or_insert((message.offset, message.offset));
                    range.0 = range.0.min(message.offset);
                    range.1 = range.1.max(message.offset);
                }

                let mut seen: HashSet<(String, i32, i64)> = HashSet::new();
                for ((topic, partition), (low, high)) in ranges {
                    let stored: Vec<i64> = inbox::table
                        .filter(inbox::created_at.ge(since))
                        .filter(inbox::topic.eq(&topic))
                        .filter(inbox::partition.eq(partition))
                        .filter(inbox::offset.between(low, high))
                        .select(inbox::offset)
                        .load(conn)?;
                    seen.extend(stored.into_iter().map(|o| (topic.clone(), partition, o)));
                }

                let mut rows = Vec::with_capacity(messages.len());
                for message in &messages {
                    if seen.insert((message.topic.clone(), message.partition, message.offset)) {
                        rows.push(NewInboxRow::try_from(message)?);
                    }
                }
                if rows.is_empty() {
                    return Ok(0);
                }

                let inserted = diesel::insert_into(inbox::table)
                    .values(&rows)
                    .execute(conn)?;
                Ok(inserted)
            })
        })
        .await
        .map_err(|e| StoreError::ConnectionPool(e.to_string()))?
    }

    pub async fn pending_for_partition(
        &self,
        topic: &str,
        partition: i32,
        limit: usize,
    ) -> Result<Vec<InboxMessage>, StoreError> {
        let since = self.since();
        let topic = topic.to_string();
        let conn = self.dal.database.get_connection().await?;

        let rows: Vec<InboxRow> = conn
            .interact(move |conn| {
                inbox::table
                    .filter(inbox::created_at.ge(since))
                    .filter(inbox::status.eq(InboxStatus::Pending.as_i16()))
                    .filter(inbox::topic.eq(topic))
                    .filter(inbox::partition.eq(partition))
                    .order(inbox::id.asc())
                    .limit(limit as i64)
                    .select(InboxRow::as_select())
                    .load(conn)
            })
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))??;

        rows.into_iter().map(InboxMessage::try_from).collect()
    }

    pub async fn mark_received(&self, id: i64) -> Result<bool, StoreError> {
        self.transition(id, InboxStatus::Received).await
    }

    pub async fn mark_failed(&self, id: i64) -> Result<bool, StoreError> {
        self.transition(id, InboxStatus::Failed).await
    }

    async fn transition(&self, id: i64, to: InboxStatus) -> Result<bool, StoreError> {
        let since = self.since();
        let conn = self.dal.database.get_connection().await?;

        let updated = conn
            .interact(move |conn| {
                diesel::update(
                    inbox::table
                        .filter(inbox::created_at.ge(since))
                        .filter(inbox::status.eq(InboxStatus::Pending.as_i16()))
                        .filter(inbox::id.eq(id)),
                )
                .set((
                    inbox::status.eq(to.as_i16()),
                    inbox::updated_at.eq(Some(Utc::now())),
                ))
                .execute(conn)
            })
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))??;

        Ok(updated > 0)
    }

    /// Loads rows by id regardless of status.
    pub async fn get_by_ids(&self, ids: Vec<i64>) -> Result<Vec<InboxMessage>, StoreError> {
        let since = self.since();
        let conn = self.dal.database.get_connection().await?;

        let rows: Vec<InboxRow> = conn
            .interact(move |conn| {
                inbox::table
                    .filter(inbox::created_at.ge(since))
                    .filter(inbox::id.eq_any(ids))
                    .order(inbox::id.asc())
                    .select(InboxRow::as_select())
                    .load(conn)
            })
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))??;

        rows.into_iter().map(InboxMessage::try_from).collect()
    }
}

#[async_trait]
impl InboxStore for DAL {
    async fn store_batch(&self, messages: Vec<NewInboxMessage>) -> Result<usize, StoreError> {
        self.inbox().store_batch(messages).await
    }

    async fn pending_for_partition(
        &self,
        topic: &str,
        partition: i32,
        limit: usize,
    ) -> Result<Vec<InboxMessage>, StoreError> {
        self.inbox()
            .pending_for_partition(topic, partition, limit)
            .await
    }

    async fn mark_received(&self, id: i64) -> Result<bool, StoreError> {
        self.inbox().mark_received(id).await
    }

    async fn mark_failed(&self, id: i64) -> Result<bool, StoreError> {
        self.inbox().mark_failed(id).await
    }
}
