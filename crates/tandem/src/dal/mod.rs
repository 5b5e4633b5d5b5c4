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

//! Data access layer over the PostgreSQL pool.
//!
//! The [`DAL`] hands out per-table accessors ([`OutboxDAL`], [`InboxDAL`]) and
//! implements the [`OutboxStore`](crate::outbox::OutboxStore) and
//! [`InboxStore`](crate::inbox::InboxStore) traits used by the dispatcher, the
//! intake loop and the partition workers.
//!
//! Every query is bounded to a trailing `created_at` window so that PostgreSQL
//! only scans the most recent monthly partitions.

pub mod inbox;
pub mod models;
pub mod outbox;

use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::config::{InboxConfig, OutboxConfig};
use crate::database::Database;

pub use inbox::InboxDAL;
pub use outbox::{insert_outbox_messages, OutboxDAL};

/// Trailing `created_at` windows applied to outbox and inbox queries, taken
/// from the `lookback` of each component's config.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryWindows {
    pub outbox: Duration,
    pub inbox: Duration,
}

impl From<(&OutboxConfig, &InboxConfig)> for QueryWindows {
    fn from((outbox, inbox): (&OutboxConfig, &InboxConfig)) -> Self {
        Self {
            outbox: outbox.lookback(),
            inbox: inbox.lookback(),
        }
    }
}

impl Default for QueryWindows {
    fn default() -> Self {
        Self::from((&OutboxConfig::default(), &InboxConfig::default()))
    }
}

/// The main Data Access Layer struct.
#[derive(Clone, Debug)]
pub struct DAL {
    /// Connection pool shared by every accessor
    pub database: Database,
    windows: QueryWindows,
}

impl DAL {
    /// Creates a DAL with the default query windows (1 day outbox, 3 days inbox).
    pub fn new(database: Database) -> Self {
        Self::with_windows(database, QueryWindows::default())
    }

    pub fn with_windows(database: Database, windows: QueryWindows) -> Self {
        DAL { database, windows }
    }

    /// Creates a DAL whose query windows follow the outbox and inbox lookbacks.
    pub fn from_configs(database: Database, outbox: &OutboxConfig, inbox: &InboxConfig) -> Self {
        Self::with_windows(database, QueryWindows::from((outbox, inbox)))
    }

    pub fn database(&self) -> &Database {
        &self.database
    }

    pub fn windows(&self) -> QueryWindows {
        self.windows
    }

    pub fn outbox(&self) -> OutboxDAL<'_> {
        OutboxDAL::new(self)
    }

    pub fn inbox(&self) -> InboxDAL<'_> {
        InboxDAL::new(self)
    }
}

/// Oldest `created_at` still inside a window ending now.
pub(crate) fn window_start(window: Duration) -> DateTime<Utc> {
    let span = chrono::Duration::from_std(window).unwrap_or_else(|_| chrono::Duration::days(3650));
    Utc::now()
        .checked_sub_signed(span)
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}
