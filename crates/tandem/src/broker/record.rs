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

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::models::{Headers, InboxMessage, NewInboxMessage};

/// A topic and partition pair; the unit of assignment and of offset tracking.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TopicPartition {
    pub topic: String,
    pub partition: i32,
}

impl TopicPartition {
    pub fn new(topic: impl Into<String>, partition: i32) -> Self {
        Self {
            topic: topic.into(),
            partition,
        }
    }
}

impl fmt::Display for TopicPartition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.topic, self.partition)
    }
}

/// A record as delivered by the broker, before any deserialization.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRecord {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<Vec<u8>>,
    pub value: Option<Vec<u8>>,
    pub headers: Option<Headers>,
    /// Broker timestamp in milliseconds since the epoch, if any
    pub timestamp: Option<i64>,
}

impl RawRecord {
    pub fn topic_partition(&self) -> TopicPartition {
        TopicPartition::new(self.topic.clone(), self.partition)
    }

    /// Converts the record into an inbox row stamped with the current time.
    pub fn into_inbox_message(self) -> NewInboxMessage {
        NewInboxMessage {
            topic: self.topic,
            partition: self.partition,
            offset: self.offset,
            key: self.key,
            value: self.value,
            headers: self.headers,
            created_at: chrono::Utc::now(),
        }
    }
}

impl From<&InboxMessage> for RawRecord {
    fn from(message: &InboxMessage) -> Self {
        RawRecord {
            topic: message.topic.clone(),
            partition: message.partition,
            offset: message.offset,
            key: message.key.clone(),
            value: message.value.clone(),
            headers: message.headers.clone(),
            timestamp: Some(message.created_at.timestamp_millis()),
        }
    }
}
