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

use async_trait::async_trait;
use tandem::inbox::{ConsumeResult, Handler};
use tandem::HandlerError;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::MeasurementAdded;

/// Logs every [`MeasurementAdded`] it receives.
#[derive(Debug, Default)]
pub struct MeasurementAddedHandler;

#[async_trait]
impl Handler<String, MeasurementAdded> for MeasurementAddedHandler {
    async fn handle(
        &self,
        message: ConsumeResult<String, MeasurementAdded>,
        cancel: &CancellationToken,
    ) -> Result<(), HandlerError> {
        if cancel.is_cancelled() {
            return Err(HandlerError::Cancelled);
        }
        let Some(event) = message.value else {
            return Err(HandlerError::failed(format!(
                "{}[{}]@{} has no value",
                message.topic, message.partition, message.offset
            )));
        };

        let created_at = message
            .headers
            .as_ref()
            .and_then(|h| h.get("CreatedAt").cloned().flatten());

        info!(
            key = message.key.as_deref().unwrap_or(""),
            partition = message.partition,
            offset = message.offset,
            created_at = created_at.as_deref().unwrap_or(""),
            "Measurement {} added with value {}",
            event.id,
            event.value
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tandem::inbox::HandlerRegistry;
    use tandem::RawRecord;
    use std::sync::Arc;

    fn record(value: Option<&str>) -> RawRecord {
        RawRecord {
            topic: crate::demo::MEASUREMENT_ADDED_TOPIC.to_string(),
            partition: 0,
            offset: 3,
            key: Some(b"k".to_vec()),
            value: value.map(|v| v.as_bytes().to_vec()),
            headers: None,
            timestamp: None,
        }
    }

    fn registry() -> HandlerRegistry {
        let mut registry = HandlerRegistry::new();
        registry.register_json::<MeasurementAdded>(
            crate::demo::MEASUREMENT_ADDED_TOPIC,
            Arc::new(MeasurementAddedHandler),
        );
        registry
    }

    #[tokio::test]
    async fn test_handles_json_event() {
        let result = registry()
            .dispatch(&record(Some(r#"{"id":1,"value":42}"#)), &CancellationToken::new())
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_rejects_missing_value_and_bad_json() {
        let registry = registry();
        let cancel = CancellationToken::new();

        assert!(matches!(
            registry.dispatch(&record(None), &cancel).await,
            Err(HandlerError::Failed(_))
        ));
        assert!(matches!(
            registry.dispatch(&record(Some("{")), &cancel).await,
            Err(HandlerError::Decode(_))
        ));
    }

    #[tokio::test]
    async fn test_stops_when_cancelled() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(matches!(
            registry()
                .dispatch(&record(Some(r#"{"id":1,"value":1}"#)), &cancel)
                .await,
            Err(HandlerError::Cancelled)
        ));
    }
}
