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

//! Diesel row types for the `outbox` and `inbox` tables and their conversions
//! to the domain models.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use uuid::Uuid;

use crate::database::schema::{inbox, outbox};
use crate::error::StoreError;
use crate::models::{
    Headers, InboxMessage, InboxStatus, NewInboxMessage, NewOutboxMessage, OutboxMessage,
    OutboxStatus,
};

#[derive(Debug, Clone, Queryable, QueryableByName, Selectable)]
#[diesel(table_name = outbox)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct OutboxRow {
    pub id: i64,
    pub topic: String,
    pub key: Option<Vec<u8>>,
    pub value: Option<Vec<u8>>,
    pub headers: Option<serde_json::Value>,
    pub status: i16,
    pub instance_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = outbox)]
pub struct NewOutboxRow {
    pub topic: String,
    pub key: Option<Vec<u8>>,
    pub value: Option<Vec<u8>>,
    pub headers: Option<serde_json::Value>,
    pub status: i16,
    pub instance_id: Uuid,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable, QueryableByName, Selectable)]
#[diesel(table_name = inbox)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct InboxRow {
    pub id: i64,
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<Vec<u8>>,
    pub value: Option<Vec<u8>>,
    pub headers: Option<serde_json::Value>,
    pub status: i16,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = inbox)]
pub struct NewInboxRow {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<Vec<u8>>,
    pub value: Option<Vec<u8>>,
    pub headers: Option<serde_json::Value>,
    pub status: i16,
    pub created_at: DateTime<Utc>,
}

fn decode_headers(value: Option<serde_json::Value>) -> Result<Option<Headers>, StoreError> {
    value
        .map(serde_json::from_value::<Headers>)
        .transpose()
        .map_err(StoreError::from)
}

fn encode_headers(headers: Option<&Headers>) -> Result<Option<serde_json::Value>, StoreError> {
    headers
        .map(serde_json::to_value)
        .transpose()
        .map_err(StoreError::from)
}

impl TryFrom<OutboxRow> for OutboxMessage {
    type Error = StoreError;

    fn try_from(row: OutboxRow) -> Result<Self, Self::Error> {
        let status = OutboxStatus::from_i16(row.status).ok_or(StoreError::InvalidStatus {
            entity: "outbox",
            value: row.status,
        })?;
        Ok(OutboxMessage {
            id: row.id,
            topic: row.topic,
            key: row.key,
            value: row.value,
            headers: decode_headers(row.headers)?,
            status,
            instance_id: row.instance_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

impl TryFrom<&NewOutboxMessage> for NewOutboxRow {
    type Error = StoreError;

    fn try_from(message: &NewOutboxMessage) -> Result<Self, Self::Error> {
        Ok(NewOutboxRow {
            topic: message.topic.clone(),
            key: message.key.clone(),
            value: message.value.clone(),
            headers: encode_headers(message.headers.as_ref())?,
            status: OutboxStatus::Pending.as_i16(),
            instance_id: message.instance_id,
            created_at: message.created_at,
        })
    }
}

impl TryFrom<InboxRow> for InboxMessage {
    type Error = StoreError;

    fn try_from(row: InboxRow) -> Result<Self, Self::Error> {
        let status = InboxStatus::from_i16(row.status).ok_or(StoreError::InvalidStatus {
            entity: "inbox",
            value: row.status,
        })?;
        Ok(InboxMessage {
            id: row.id,
            topic: row.topic,
            partition: row.partition,
            offset: row.offset,
            key: row.key,
            value: row.value,
            headers: decode_headers(row.headers)?,
            status,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

impl TryFrom<&NewInboxMessage> for NewInboxRow {
    type Error = StoreError;

    fn try_from(message: &NewInboxMessage) -> Result<Self, Self::Error> {
        Ok(NewInboxRow {
            topic: message.topic.clone(),
            partition: message.partition,
            offset: message.offset,
            key: message.key.clone(),
            value: message.value.clone(),
            headers: encode_headers(message.headers.as_ref())?,
            status: InboxStatus::Pending.as_i16(),
            created_at: message.created_at,
        })
    }
}
