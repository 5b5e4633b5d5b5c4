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

//! Domain models for outbox and inbox rows.
//!
//! These are backend-agnostic types; the diesel row structs that map them to
//! PostgreSQL live in [`crate::dal::models`].

pub mod inbox_message;
pub mod outbox_message;

use indexmap::IndexMap;

pub use inbox_message::{InboxMessage, InboxStatus, NewInboxMessage};
pub use outbox_message::{NewOutboxMessage, OutboxMessage, OutboxStatus};

/// Message headers: an insertion-ordered map of header name to optional UTF-8 value.
pub type Headers = IndexMap<String, Option<String>>;
