use crate::{
    capture::{CaptureController, CaptureDevice},
    config::StumpcamConfig,
    error::{PipelineError, Result},
    events::{EventBus, PipelineEvent},
    media::{MediaAsset, MediaKind, ProcessedResult},
    presenter::ResultPresenter,
    storage::{LocalMediaStore, PurgeReport, PurgeScope},
    upload::{AttemptRecord, PipelineState, ProcessingEndpoint, UploadCoordinator, UploadSession},
};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};

/// Snapshot of the pipeline for export
#[derive(Debug, Clone, Serialize)]
pub struct PipelineSummary {
    pub state: PipelineState,
    pub session: Option<UploadSession>,
    pub result: Option<ProcessedResult>,
    pub error: Option<String>,
}

/// Capture, cache, upload and present, wired together for one session at
/// a time
pub struct MediaPipeline {
    config: StumpcamConfig,
    event_bus: Arc<EventBus>,
    store: Arc<LocalMediaStore>,
    controller: CaptureController,
    coordinator: UploadCoordinator,
    presenter: Arc<ResultPresenter>,
    /// Promoted reference re-staged after every reset
    durable_reference: Mutex<Option<MediaAsset>>,
}

impl MediaPipeline {
    pub fn new(
        config: StumpcamConfig,
        device: Arc<dyn CaptureDevice>,
        endpoint: Arc<dyn ProcessingEndpoint>,
    ) -> Self {
        let event_bus = Arc::new(if config.system.verbose_status {
            EventBus::with_debug_logging(config.system.event_bus_capacity)
        } else {
            EventBus::new(config.system.event_bus_capacity)
        });

        let store = Arc::new(LocalMediaStore::with_local_fs(
            config.storage.clone(),
            Arc::clone(&event_bus),
        ));
        let presenter = Arc::new(ResultPresenter::new(
            Arc::clone(&store),
            Arc::clone(&event_bus),
        ));
        let controller = CaptureController::new(
            config.capture.clone(),
            device,
            Arc::clone(&store),
            Arc::clone(&event_bus),
        );
        let coordinator = UploadCoordinator::new(
            config.upload.clone(),
            Arc::clone(&store),
            endpoint,
            Arc::clone(&presenter),
            Arc::clone(&event_bus),
        )
        .with_input_discard(config.storage.discard_inputs_on_success);

        Self {
            config,
            event_bus,
            store,
            controller,
            coordinator,
            presenter,
            durable_reference: Mutex::new(None),
        }
    }

    /// Prepare the storage areas and pick up a reference persisted by an
    /// earlier run
    pub async fn initialize(&self) -> Result<()> {
        self.store.start().await?;

        if self.config.storage.persist_reference {
            if let Some(reference) = self.store.recover_durable(MediaKind::Image).await? {
                info!("Reusing persisted reference {}", reference.display_name);
                *self.durable_reference.lock() = Some(reference.clone());
                self.coordinator.attach(reference)?;
            }
        }

        info!(
            "Pipeline ready (endpoint: {}, fallback: {})",
            self.config.upload.endpoint, self.config.upload.fallback_enabled
        );
        Ok(())
    }

    /// Capture and stage the reference image
    pub async fn capture_reference(&self) -> Result<MediaAsset> {
        self.ensure_accepting_captures()?;

        let asset = self.controller.capture_photo().await?;
        self.controller.release_photo();

        let staged = if self.config.storage.persist_reference {
            let durable = self.store.promote(&asset).await?;
            let replaced = self.durable_reference.lock().replace(durable.clone());
            if let Some(old) = replaced.filter(|old| old.storage_uri != durable.storage_uri) {
                self.store.discard(&old.storage_uri).await?;
            }
            durable
        } else {
            asset
        };

        self.coordinator.attach(staged.clone())?;
        Ok(staged)
    }

    pub async fn start_clip(&self) -> Result<()> {
        self.ensure_accepting_captures()?;
        self.controller.start_video().await
    }

    /// Stop recording and stage the clip.
    ///
    /// Also collects a clip that was already stopped at the maximum
    /// duration. `None` when there is nothing to collect.
    pub async fn stop_clip(&self) -> Result<Option<MediaAsset>> {
        self.controller.stop_video().await?;
        let Some(clip) = self.controller.take_clip() else {
            return Ok(None);
        };
        self.coordinator.attach(clip.clone())?;
        Ok(Some(clip))
    }

    pub async fn upload(&self) -> Result<ProcessedResult> {
        self.coordinator.upload().await
    }

    /// Return to `Idle`, dropping session files.
    ///
    /// A persisted reference survives and is staged again.
    pub async fn reset(&self) -> Result<PurgeReport> {
        self.controller.reset().await;
        let report = self.coordinator.reset().await?;

        let reference = self.durable_reference.lock().clone();
        if let Some(reference) = reference {
            match self.store.verify(&reference).await {
                Ok(_) => {
                    self.coordinator.attach(reference)?;
                    info!("Reusing persisted reference image");
                }
                Err(e) => {
                    warn!("Persisted reference is no longer usable: {}", e);
                    self.durable_reference.lock().take();
                }
            }
        }

        Ok(report)
    }

    /// Reset and delete every managed file, including the persisted reference
    pub async fn clear_all(&self) -> Result<PurgeReport> {
        self.durable_reference.lock().take();
        self.controller.reset().await;
        self.coordinator.reset().await?;
        self.store.purge(PurgeScope::All).await
    }

    pub fn state(&self) -> PipelineState {
        self.coordinator.state()
    }

    pub fn attempts(&self) -> Vec<AttemptRecord> {
        self.coordinator.attempts()
    }

    pub fn last_result(&self) -> Option<ProcessedResult> {
        self.coordinator.last_result()
    }

    pub fn summary(&self) -> PipelineSummary {
        PipelineSummary {
            state: self.coordinator.state(),
            session: self.coordinator.session(),
            result: self.presenter.current(),
            error: self.coordinator.last_error(),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.event_bus.subscribe()
    }

    pub fn event_bus(&self) -> Arc<EventBus> {
        Arc::clone(&self.event_bus)
    }

    pub fn controller(&self) -> &CaptureController {
        &self.controller
    }

    pub fn coordinator(&self) -> &UploadCoordinator {
        &self.coordinator
    }

    pub fn store(&self) -> &LocalMediaStore {
        &self.store
    }

    pub fn config(&self) -> &StumpcamConfig {
        &self.config
    }

    fn ensure_accepting_captures(&self) -> Result<()> {
        if self.coordinator.accepts_captures() {
            Ok(())
        } else {
            Err(PipelineError::SessionActive)
        }
    }
}
