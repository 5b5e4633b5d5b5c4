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

//! Outbox message model.
//!
//! An outbox row is written in the same transaction as the business change it
//! describes and moves through `Pending -> Sending -> Sent`. A crashed sender's
//! rows are returned from `Sending` to `Pending` by the recovery pass.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::Headers;

/// Delivery status of an outbox row, persisted as `smallint`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OutboxStatus {
    /// Waiting to be claimed
    Pending,
    /// Claimed by the instance recorded in `instance_id`
    Sending,
    /// Published; terminal
    Sent,
}

impl OutboxStatus {
    pub fn as_i16(self) -> i16 {
        match self {
            OutboxStatus::Pending => 0,
            OutboxStatus::Sending => 1,
            OutboxStatus::Sent => 2,
        }
    }

    pub fn from_i16(value: i16) -> Option<Self> {
        match value {
            0 => Some(OutboxStatus::Pending),
            1 => Some(OutboxStatus::Sending),
            2 => Some(OutboxStatus::Sent),
            _ => None,
        }
    }
}

/// A persisted outbox row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxMessage {
    /// Store-assigned, monotonically increasing id
    pub id: i64,
    pub topic: String,
    pub key: Option<Vec<u8>>,
    pub value: Option<Vec<u8>>,
    pub headers: Option<Headers>,
    pub status: OutboxStatus,
    /// Instance that produced the row, or that currently holds it in `Sending`
    pub instance_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// An outbox row to be inserted with status `Pending`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewOutboxMessage {
    pub topic: String,
    pub key: Option<Vec<u8>>,
    pub value: Option<Vec<u8>>,
    pub headers: Option<Headers>,
    pub instance_id: Uuid,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trips_through_smallint() {
        for status in [
            OutboxStatus::Pending,
            OutboxStatus::Sending,
            OutboxStatus::Sent,
        ] {
            assert_eq!(OutboxStatus::from_i16(status.as_i16()), Some(status));
        }
        assert_eq!(OutboxStatus::from_i16(3), None);
        assert_eq!(OutboxStatus::Sending.as_i16(), 1);
    }
}
