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

//! Outbox table access.
//!
//! The claim is a single `UPDATE ... WHERE id IN (SELECT ... FOR UPDATE SKIP
//! LOCKED) RETURNING ...` statement: rows are locked, flipped to `Sending` and
//! read back in one round trip, so concurrent dispatchers always receive
//! disjoint batches.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::pg::PgConnection;
use diesel::prelude::*;
use diesel::sql_types::{BigInt, SmallInt, Timestamptz};
use std::collections::HashMap;
use uuid::Uuid;

use super::models::{NewOutboxRow, OutboxRow};
use super::{window_start, DAL};
use crate::database::schema::outbox;
use crate::error::StoreError;
use crate::models::{NewOutboxMessage, OutboxMessage, OutboxStatus};
use crate::outbox::OutboxStore;

const CLAIM_PENDING_SQL: &str = r#"
UPDATE outbox
SET status = $1, instance_id = $2, updated_at = $3
WHERE created_at >= $4
  AND status = $5
  AND id IN (
      SELECT id FROM outbox
      WHERE created_at >= $4 AND status = $5
      ORDER BY id
      LIMIT $6
      FOR UPDATE SKIP LOCKED
  )
RETURNING id, topic, key, value, headers, status, instance_id, created_at, updated_at
"#;

/// Inserts outbox rows on a caller-owned connection.
///
/// Use this inside an application transaction so the outbox rows commit or roll
/// back together with the business write.
pub fn insert_outbox_messages(
    conn: &mut PgConnection,
    messages: &[NewOutboxMessage],
) -> Result<usize, StoreError> {
    if messages.is_empty() {
        return Ok(0);
    }
    let rows = messages
        .iter()
        .map(NewOutboxRow::try_from)
        .collect::<Result<Vec<_>, _>>()?;
    let inserted = diesel::insert_into(outbox::table)
        .values(&rows)
        .execute(conn)?;
    Ok(inserted)
}

/// Data access layer for outbox operations.
#[derive(Clone)]
pub struct OutboxDAL<'a> {
    dal: &'a DAL,
}

impl<'a> OutboxDAL<'a> {
    pub fn new(dal: &'a DAL) -> Self {
        Self { dal }
    }

    fn since(&self) -> DateTime<Utc> {
        window_start(self.dal.windows().outbox)
    }

    /// Inserts new `Pending` rows in their own transaction.
    pub async fn create_many(&self, messages: Vec<NewOutboxMessage>) -> Result<usize, StoreError> {
        if messages.is_empty() {
            return Ok(0);
        }
        let conn = self.dal.database.get_connection().await?;
        conn.interact(move |conn| {
            conn.transaction::<_, StoreError, _>(|conn| insert_outbox_messages(conn, &messages))
        })
        .await
        .map_err(|e| StoreError::ConnectionPool(e.to_string()))?
    }

    /// Claims up to `limit` pending rows for `instance_id`.
    pub async fn claim_pending(
        &self,
        limit: usize,
        instance_id: Uuid,
    ) -> Result<Vec<OutboxMessage>, StoreError> {
        let since = self.since();
        let conn = self.dal.database.get_connection().await?;

        let rows: Vec<OutboxRow> = conn
            .interact(move |conn| {
                conn.transaction::<_, diesel::result::Error, _>(|conn| {
                    diesel::sql_query(CLAIM_PENDING_SQL)
                        .bind::<SmallInt, _>(OutboxStatus::Sending.as_i16())
                        .bind::<diesel::sql_types::Uuid, _>(instance_id)
                        .bind::<Timestamptz, _>(Utc::now())
                        .bind::<Timestamptz, _>(since)
                        .bind::<SmallInt, _>(OutboxStatus::Pending.as_i16())
                        .bind::<BigInt, _>(limit as i64)
                        .load::<OutboxRow>(conn)
                })
            })
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))??;

        // RETURNING does not preserve the subquery order
        let mut messages = rows
            .into_iter()
            .map(OutboxMessage::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        messages.sort_by_key(|m| m.id);
        Ok(messages)
    }

    pub async fn mark_sent(&self, ids: Vec<i64>, instance_id: Uuid) -> Result<usize, StoreError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let since = self.since();
        let conn = self.dal.database.get_connection().await?;

        let updated = conn
            .interact(move |conn| {
                diesel::update(
                    outbox::table
                        .filter(outbox::created_at.ge(since))
                        .filter(outbox::status.eq(OutboxStatus::Sending.as_i16()))
                        .filter(outbox::instance_id.eq(instance_id))
                        .filter(outbox::id.eq_any(ids)),
                )
                .set((
                    outbox::status.eq(OutboxStatus::Sent.as_i16()),
                    outbox::updated_at.eq(Some(Utc::now())),
                ))
                .execute(conn)
            })
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))??;

        Ok(updated)
    }

    pub async fn list_sending(
        &self,
        after_id: i64,
        limit: usize,
    ) -> Result<Vec<OutboxMessage>, StoreError> {
        let since = self.since();
        let conn = self.dal.database.get_connection().await?;

        let rows: Vec<OutboxRow> = conn
            .interact(move |conn| {
                outbox::table
                    .filter(outbox::created_at.ge(since))
                    .filter(outbox::status.eq(OutboxStatus::Sending.as_i16()))
                    .filter(outbox::id.gt(after_id))
                    .order(outbox::id.asc())
                    .limit(limit as i64)
                    .select(OutboxRow::as_select())
                    .load(conn)
            })
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))??;

        rows.into_iter().map(OutboxMessage::try_from).collect()
    }

    /// Returns orphaned rows to `Pending`, grouped per previous owner.
    pub async fn release(&self, orphans: Vec<(i64, Uuid)>) -> Result<usize, StoreError> {
        if orphans.is_empty() {
            return Ok(0);
        }
        let mut by_owner: HashMap<Uuid, Vec<i64>> = HashMap::new();
        for (id, owner) in orphans {
            by_owner.entry(owner).or_default().push(id);
        }
        let since = self.since();
        let conn = self.dal.database.get_connection().await?;

        let released = conn
            .interact(move |conn| {
                conn.transaction::<_, diesel::result::Error, _>(|conn| {
                    let mut total = 0;
                    for (owner, ids) in by_owner {
                        total += diesel::update(
                            outbox::table
                                .filter(outbox::created_at.ge(since))
                                .filter(outbox::status.eq(OutboxStatus::Sending.as_i16()))
                                .filter(outbox::instance_id.eq(owner))
                                .filter(outbox::id.eq_any(ids)),
                        )
                        .set((
                            outbox::status.eq(OutboxStatus::Pending.as_i16()),
                            outbox::updated_at.eq(Some(Utc::now())),
                        ))
                        .execute(conn)?;
                    }
                    Ok(total)
                })
            })
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))??;

        Ok(released)
    }

    /// Loads rows by id regardless of status.
    pub async fn get_by_ids(&self, ids: Vec<i64>) -> Result<Vec<OutboxMessage>, StoreError> {
        let since = self.since();
        let conn = self.dal.database.get_connection().await?;

        let rows: Vec<OutboxRow> = conn
            .interact(move |conn| {
                outbox::table
                    .filter(outbox::created_at.ge(since))
                    .filter(outbox::id.eq_any(ids))
                    .order(outbox::id.asc())
                    .select(OutboxRow::as_select())
                    .load(conn)
            })
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))??;

        rows.into_iter().map(OutboxMessage::try_from).collect()
    }
}

#[async_trait]
impl OutboxStore for DAL {
    async fn enqueue(&self, messages: Vec<NewOutboxMessage>) -> Result<usize, StoreError> {
        self.outbox().create_many(messages).await
    }

    async fn claim_pending(
        &self,
        limit: usize,
        instance_id: Uuid,
    ) -> Result<Vec<OutboxMessage>, StoreError> {
        self.outbox().claim_pending(limit, instance_id).await
    }

    async fn mark_sent(&self, ids: &[i64], instance_id: Uuid) -> Result<usize, StoreError> {
        self.outbox().mark_sent(ids.to_vec(), instance_id).await
    }

    async fn list_sending(
        &self,
        after_id: i64,
        limit: usize,
    ) -> Result<Vec<OutboxMessage>, StoreError> {
        self.outbox().list_sending(after_id, limit).await
    }

    async fn release(&self, orphans: &[(i64, Uuid)]) -> Result<usize, StoreError> {
        self.outbox().release(orphans.to_vec()).await
    }
}
