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

//! HTTP surface of the demo: `POST /produce?count=N`.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use diesel::prelude::*;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tandem::producer::{DirectProducer, MessagePublisher, OutboxProducer, Producer, ProducerRecord};
use tandem::DAL;
use tracing::{error, info};
use uuid::Uuid;

use super::{measurement, Measurement, MeasurementAdded, NewMeasurement, CHUNK_SIZE};

/// Largest `count` accepted by one request.
pub const MAX_COUNT: usize = 100_000;

/// Where produced events go.
#[derive(Clone)]
pub enum EventSink {
    /// Staged as outbox rows in the measurement transaction
    Outbox(Arc<OutboxProducer<String, MeasurementAdded>>),
    /// Published after the measurement transaction commits
    Direct {
        producer: Arc<DirectProducer<String, MeasurementAdded>>,
        publisher: Arc<dyn MessagePublisher>,
    },
}

#[derive(Clone)]
pub struct AppState {
    pub dal: DAL,
    pub sink: EventSink,
}

#[derive(Debug, Deserialize)]
pub struct ProduceParams {
    #[serde(default = "default_count")]
    pub count: usize,
}

fn default_count() -> usize {
    1
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct ProduceResponse {
    pub produced: usize,
    pub via: String,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/produce", post(produce))
        .with_state(Arc::new(state))
}

/// Error returned to HTTP callers.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Internal(anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, message).into_response(),
            ApiError::Internal(e) => {
                error!("Produce request failed: {:#}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
            }
        }
    }
}

impl<E: Into<anyhow::Error>> From<E> for ApiError {
    fn from(e: E) -> Self {
        ApiError::Internal(e.into())
    }
}

fn check_count(count: usize) -> Result<(), ApiError> {
    if count > MAX_COUNT {
        return Err(ApiError::BadRequest(format!(
            "count must be at most {}",
            MAX_COUNT
        )));
    }
    Ok(())
}

/// One event per measurement, keyed by a time-ordered UUID and stamped `CreatedAt`.
pub fn to_records(measurements: &[Measurement]) -> Vec<ProducerRecord<String, MeasurementAdded>> {
    measurements
        .iter()
        .map(|m| {
            ProducerRecord::new(Some(Uuid::now_v7().to_string()), Some(MeasurementAdded::from(m)))
                .with_header("CreatedAt", Some(m.created_at.to_rfc3339()))
        })
        .collect()
}

async fn produce(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ProduceParams>,
) -> Result<Json<ProduceResponse>, ApiError> {
    check_count(params.count)?;

    let values: Vec<i32> = {
        let mut rng = rand::thread_rng();
        (0..params.count).map(|_| rng.gen_range(0..1000)).collect()
    };

    let outbox = match &state.sink {
        EventSink::Outbox(producer) => Some(producer.clone()),
        EventSink::Direct { .. } => None,
    };

    let conn = state.dal.database().get_connection().await?;
    let inserted: Vec<Measurement> = conn
        .interact(move |conn| {
            conn.transaction::<_, anyhow::Error, _>(|conn| {
                let mut inserted = Vec::with_capacity(values.len());
                for chunk in values.chunks(CHUNK_SIZE) {
                    let rows: Vec<NewMeasurement> =
                        chunk.iter().map(|&value| NewMeasurement { value }).collect();
                    let created: Vec<Measurement> = diesel::insert_into(measurement::table)
                        .values(&rows)
                        .returning(Measurement::as_returning())
                        .get_results(conn)?;
                    if let Some(producer) = &outbox {
                        producer.stage(conn, to_records(&created))?;
                    }
                    inserted.extend(created);
                }
                Ok(inserted)
            })
        })
        .await
        .map_err(|e| anyhow::anyhow!("connection interaction failed: {}", e))??;

    let via = match &state.sink {
        EventSink::Outbox(_) => "outbox",
        EventSink::Direct {
            producer,
            publisher,
        } => {
            publish_direct(producer, publisher.as_ref(), &inserted).await?;
            "direct"
        }
    };

    info!("Produced {} measurement(s) via {}", inserted.len(), via);
    Ok(Json(ProduceResponse {
        produced: inserted.len(),
        via: via.to_string(),
    }))
}

async fn publish_direct(
    producer: &DirectProducer<String, MeasurementAdded>,
    publisher: &dyn MessagePublisher,
    measurements: &[Measurement],
) -> anyhow::Result<()> {
    for chunk in measurements.chunks(CHUNK_SIZE) {
        publisher.begin_transaction().await?;
        if let Err(e) = producer.produce_batch(to_records(chunk)).await {
            if let Err(abort) = publisher.abort_transaction().await {
                error!("Failed to abort producer transaction: {}", abort);
            }
            return Err(e.into());
        }
        publisher.commit_transaction().await?;
    }
    Ok(())
}
