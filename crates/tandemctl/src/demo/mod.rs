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

//! Demo domain: random measurements announced on `measurement-added`.

pub mod handler;
pub mod routes;

use chrono::{DateTime, Utc};
use diesel::pg::PgConnection;
use diesel::prelude::*;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use serde::{Deserialize, Serialize};

/// Migrations creating the `measurement` table.
pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

/// Topic carrying [`MeasurementAdded`] events.
pub const MEASUREMENT_ADDED_TOPIC: &str = "measurement-added";

/// Rows inserted per statement when producing in bulk.
pub const CHUNK_SIZE: usize = 1000;

diesel::table! {
    measurement (id) {
        id -> Int8,
        value -> Int4,
        created_at -> Timestamptz,
    }
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = measurement)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Measurement {
    pub id: i64,
    pub value: i32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = measurement)]
pub struct NewMeasurement {
    pub value: i32,
}

/// Event value published for every new measurement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeasurementAdded {
    pub id: i64,
    pub value: i32,
}

impl From<&Measurement> for MeasurementAdded {
    fn from(m: &Measurement) -> Self {
        Self {
            id: m.id,
            value: m.value,
        }
    }
}

/// Applies the demo migrations, logging each applied version.
pub fn run_migrations(conn: &mut PgConnection) -> anyhow::Result<()> {
    let applied = conn
        .run_pending_migrations(MIGRATIONS)
        .map_err(|e| anyhow::anyhow!("Failed to run demo migrations: {}", e))?;
    for version in applied {
        tracing::info!("Applied demo migration {}", version);
    }
    Ok(())
}
