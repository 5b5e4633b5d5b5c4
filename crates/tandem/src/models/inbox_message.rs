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

//! Inbox message model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Headers;

/// Processing status of an inbox row, persisted as `smallint`.
///
/// `Received` and `Failed` are both terminal; failed rows are not retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InboxStatus {
    Pending,
    Received,
    Failed,
}

impl InboxStatus {
    pub fn as_i16(self) -> i16 {
        match self {
            InboxStatus::Pending => 0,
            InboxStatus::Received => 1,
            InboxStatus::Failed => 2,
        }
    }

    pub fn from_i16(value: i16) -> Option<Self> {
        match value {
            0 => Some(InboxStatus::Pending),
            1 => Some(InboxStatus::Received),
            2 => Some(InboxStatus::Failed),
            _ => None,
        }
    }
}

/// A persisted inbox row. `(topic, partition, offset)` identifies the broker record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboxMessage {
    pub id: i64,
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<Vec<u8>>,
    pub value: Option<Vec<u8>>,
    pub headers: Option<Headers>,
    pub status: InboxStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// An inbox row to be inserted with status `Pending`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewInboxMessage {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<Vec<u8>>,
    pub value: Option<Vec<u8>>,
    pub headers: Option<Headers>,
    pub created_at: DateTime<Utc>,
}
