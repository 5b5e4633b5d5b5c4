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

//! Database layer: connection pooling, the diesel schema and embedded migrations.
//!
//! Only PostgreSQL is supported. The claim query relies on
//! `FOR UPDATE SKIP LOCKED` and both tables are range partitioned by
//! `created_at`.

pub mod connection;
pub mod schema;

use diesel::pg::PgConnection;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};

pub use connection::Database;

/// Migrations creating the `outbox` and `inbox` tables and their partitions.
pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

/// Runs pending migrations on a synchronous connection.
pub fn run_migrations(conn: &mut PgConnection) -> Result<(), crate::error::StoreError> {
    conn.run_pending_migrations(MIGRATIONS)
        .map(|applied| {
            for version in applied {
                tracing::info!("Applied migration {}", version);
            }
        })
        .map_err(|e| crate::error::StoreError::Migration(e.to_string()))
}
