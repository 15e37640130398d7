use crate::{
    error::{PipelineError, Result},
    events::{EventBus, PipelineEvent},
    media::ProcessedResult,
    storage::{LocalMediaStore, PurgeReport, PurgeScope},
};
use chrono::Utc;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info};

/// Turns a processing response into a displayable result
pub struct ResultPresenter {
    store: Arc<LocalMediaStore>,
    event_bus: Arc<EventBus>,
    current: Mutex<Option<ProcessedResult>>,
}

impl ResultPresenter {
    pub fn new(store: Arc<LocalMediaStore>, event_bus: Arc<EventBus>) -> Self {
        Self {
            store,
            event_bus,
            current: Mutex::new(None),
        }
    }

    /// Decode-check a response payload, store it and signal it is ready.
    ///
    /// A payload that does not decode as an image is `MalformedResponse` and
    /// nothing is written.
    pub async fn present(&self, payload: &[u8]) -> Result<ProcessedResult> {
        let result = self.stage(payload).await?;
        self.commit(&result);
        Ok(result)
    }

    /// Decode-check and store a payload without displaying it.
    ///
    /// The staged result becomes visible only through `commit`; a result that
    /// is never committed should be dropped with `discard`.
    pub async fn stage(&self, payload: &[u8]) -> Result<ProcessedResult> {
        Self::check_decodes(payload).await?;

        let storage_uri = self.store.write_result(payload).await?;
        Ok(ProcessedResult {
            storage_uri,
            received_at: Utc::now(),
        })
    }

    /// Make a staged result current and signal it is ready to display
    pub fn commit(&self, result: &ProcessedResult) {
        *self.current.lock() = Some(result.clone());
        self.event_bus.publish(PipelineEvent::ResultReady {
            path: result.storage_uri.clone(),
        });
    }

    /// The result currently on display
    pub fn current(&self) -> Option<ProcessedResult> {
        self.current.lock().clone()
    }

    /// Delete a staged result that will never be committed
    pub async fn discard(&self, result: &ProcessedResult) -> Result<()> {
        self.store.discard(&result.storage_uri).await?;
        debug!("Discarded result {}", result.storage_uri.display());
        Ok(())
    }

    /// Purge session files and forget the displayed result
    pub async fn reset(&self) -> Result<PurgeReport> {
        self.current.lock().take();
        let report = self.store.purge(PurgeScope::Session).await?;
        info!("Session cleared ({} files removed)", report.files_removed);
        Ok(report)
    }

    async fn check_decodes(payload: &[u8]) -> Result<()> {
        if payload.is_empty() {
            return Err(PipelineError::MalformedResponse {
                details: "response body is empty".to_string(),
            });
        }

        let owned = payload.to_vec();
        let decoded = tokio::task::spawn_blocking(move || {
            image::load_from_memory(&owned).map(|img| (img.width(), img.height()))
        })
        .await
        .map_err(|e| PipelineError::MalformedResponse {
            details: format!("decoder task failed: {}", e),
        })?;

        match decoded {
            Ok((width, height)) => {
                debug!("Result image decoded ({}x{})", width, height);
                Ok(())
            }
            Err(e) => Err(PipelineError::MalformedResponse {
                details: format!("response body is not an image: {}", e),
            }),
        }
    }
}

/// Encode a small solid JPEG for tests
#[cfg(test)]
pub(crate) fn sample_jpeg(width: u32, height: u32) -> Vec<u8> {
    let pixels = vec![128u8; (width * height * 3) as usize];
    let mut encoded = Vec::new();
    image::codecs::jpeg::JpegEncoder::new(&mut encoded)
        .encode(&pixels, width, height, image::ColorType::Rgb8)
        .unwrap();
    encoded
}
