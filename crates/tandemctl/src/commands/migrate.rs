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

//! Implementation of the `migrate` command.

use anyhow::{anyhow, Context, Result};
use tandem::Database;
use tracing::info;

use crate::config::TandemConfig;
use crate::demo;

pub async fn run(config: &TandemConfig) -> Result<()> {
    // A migration run needs a single connection
    let database = Database::new(&config.database.url, 1).context("Failed to connect to database")?;
    apply(&database).await?;
    info!("Database is up to date");
    Ok(())
}

/// Runs the library migrations followed by the demo migrations.
pub async fn apply(database: &Database) -> Result<()> {
    database
        .run_migrations()
        .await
        .context("Failed to run outbox/inbox migrations")?;

    let conn = database
        .get_connection()
        .await
        .context("Failed to get a connection for demo migrations")?;
    conn.interact(demo::run_migrations)
        .await
        .map_err(|e| anyhow!("Demo migration task failed: {}", e))??;

    Ok(())
}
