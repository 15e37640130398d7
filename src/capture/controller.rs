use super::device::{Capability, CaptureDevice, PermissionStatus, RecordingOptions};
use crate::{
    config::{CameraFacing, CaptureConfig},
    error::{PipelineError, Result},
    events::{EventBus, PipelineEvent},
    media::{MediaAsset, MediaKind},
    storage::LocalMediaStore,
};
use parking_lot::Mutex;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Still-image capture states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PhotoState {
    Idle,
    Capturing,
    Captured,
}

/// Video capture states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum VideoState {
    Idle,
    Recording,
    Recorded,
}

/// A running recording
struct ActiveRecording {
    generation: u64,
    started_at: Instant,
    stop_token: CancellationToken,
}

struct ControllerInner {
    photo: PhotoState,
    video: VideoState,
    recording: Option<ActiveRecording>,
    next_generation: u64,
    facing: CameraFacing,
}

/// Drives the capture device and hands raw captures to the media store.
///
/// The two capture modes have independent state machines:
/// `Idle -> Capturing -> Captured -> Idle` for photos and
/// `Idle -> Recording -> Recorded -> Idle` for video. Captured files are
/// owned by the store; the controller only tracks state.
pub struct CaptureController {
    config: CaptureConfig,
    device: Arc<dyn CaptureDevice>,
    store: Arc<LocalMediaStore>,
    event_bus: Arc<EventBus>,
    inner: Arc<Mutex<ControllerInner>>,
}

impl CaptureController {
    pub fn new(
        config: CaptureConfig,
        device: Arc<dyn CaptureDevice>,
        store: Arc<LocalMediaStore>,
        event_bus: Arc<EventBus>,
    ) -> Self {
        let facing = config.facing;
        Self {
            config,
            device,
            store,
            event_bus,
            inner: Arc::new(Mutex::new(ControllerInner {
                photo: PhotoState::Idle,
                video: VideoState::Idle,
                recording: None,
                next_generation: 0,
                facing,
            })),
        }
    }

    /// Take a still picture and cache it
    pub async fn capture_photo(&self) -> Result<MediaAsset> {
        self.ensure_permission(Capability::Camera).await?;

        let facing = {
            let mut inner = self.inner.lock();
            if inner.photo == PhotoState::Capturing {
                return Err(PipelineError::capture("a photo capture is already running"));
            }
            inner.photo = PhotoState::Capturing;
            inner.facing
        };

        let raw = match self.device.take_picture(facing).await {
            Ok(Some(uri)) => uri,
            Ok(None) => {
                self.set_photo_state(PhotoState::Idle);
                return Err(PipelineError::capture("camera returned no image"));
            }
            Err(e) => {
                self.set_photo_state(PhotoState::Idle);
                return Err(into_capture_error(e));
            }
        };

        match self.store.cache(&raw, MediaKind::Image).await {
            Ok(asset) => {
                self.set_photo_state(PhotoState::Captured);
                self.event_bus.publish(PipelineEvent::PhotoCaptured {
                    asset_id: asset.id.to_string(),
                });
                Ok(asset)
            }
            Err(e) => {
                self.set_photo_state(PhotoState::Idle);
                Err(e)
            }
        }
    }

    /// Acknowledge a captured photo, returning the photo side to `Idle`
    pub fn release_photo(&self) {
        let mut inner = self.inner.lock();
        if inner.photo == PhotoState::Captured {
            inner.photo = PhotoState::Idle;
        }
    }

    /// Start recording. A no-op while a recording is already running.
    ///
    /// The recording is force-stopped once the configured maximum duration
    /// elapses; the clip is then available through [`take_clip`].
    ///
    /// [`take_clip`]: CaptureController::take_clip
    pub async fn start_video(&self) -> Result<()> {
        if self.is_recording() {
            debug!("Recording already running; ignoring start");
            return Ok(());
        }

        self.ensure_permission(Capability::Camera).await?;
        if self.config.require_microphone {
            self.ensure_permission(Capability::Microphone).await?;
        }

        let max_duration = Duration::from_secs(self.config.max_duration_seconds);
        let (generation, stop_token, facing) = {
            let mut inner = self.inner.lock();
            if inner.video == VideoState::Recording {
                return Ok(());
            }
            let generation = inner.next_generation;
            inner.next_generation += 1;
            let stop_token = CancellationToken::new();
            inner.video = VideoState::Recording;
            inner.recording = Some(ActiveRecording {
                generation,
                started_at: Instant::now(),
                stop_token: stop_token.clone(),
            });
            (generation, stop_token, inner.facing)
        };

        let options = RecordingOptions {
            max_duration,
            quality_hint: self.config.quality_hint.clone(),
            facing,
        };

        if let Err(e) = self.device.start_recording(options).await {
            let mut inner = self.inner.lock();
            if inner
                .recording
                .as_ref()
                .is_some_and(|r| r.generation == generation)
            {
                inner.recording = None;
                inner.video = VideoState::Idle;
            }
            return Err(into_capture_error(e));
        }

        info!("Recording started (max {:?})", max_duration);
        self.event_bus.publish(PipelineEvent::RecordingStarted {
            max_duration_seconds: self.config.max_duration_seconds,
        });

        let controller = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = stop_token.cancelled() => {}
                _ = tokio::time::sleep(max_duration) => {
                    info!("Maximum recording duration reached; stopping");
                    if let Err(e) = controller.finish_recording(generation, true).await {
                        warn!("Forced recording stop failed: {}", e);
                    }
                }
            }
        });

        Ok(())
    }

    /// Stop recording and cache the clip. A no-op (`Ok(None)`) when not recording.
    pub async fn stop_video(&self) -> Result<Option<MediaAsset>> {
        let generation = {
            let inner = self.inner.lock();
            match &inner.recording {
                Some(recording) if inner.video == VideoState::Recording => recording.generation,
                _ => {
                    debug!("Not recording; ignoring stop");
                    return Ok(None);
                }
            }
        };

        self.finish_recording(generation, false).await
    }

    /// Collect a recorded clip (including one stopped at the maximum
    /// duration), returning the video side to `Idle`
    pub fn take_clip(&self) -> Option<MediaAsset> {
        let mut inner = self.inner.lock();
        if inner.video != VideoState::Recorded {
            return None;
        }
        inner.video = VideoState::Idle;
        self.store.live_asset(MediaKind::Video)
    }

    /// Abandon any running recording and return both sides to `Idle`
    pub async fn reset(&self) {
        let abandoned = {
            let mut inner = self.inner.lock();
            inner.photo = PhotoState::Idle;
            inner.video = VideoState::Idle;
            inner.recording.take()
        };

        if let Some(recording) = abandoned {
            recording.stop_token.cancel();
            if let Err(e) = self.device.stop_recording().await {
                debug!("Ignoring recorder stop failure during reset: {}", e);
            }
        }
    }

    /// Flip between the front and back camera
    pub fn toggle_facing(&self) -> CameraFacing {
        let mut inner = self.inner.lock();
        inner.facing = inner.facing.toggled();
        inner.facing
    }

    pub fn facing(&self) -> CameraFacing {
        self.inner.lock().facing
    }

    pub fn photo_state(&self) -> PhotoState {
        self.inner.lock().photo
    }

    pub fn video_state(&self) -> VideoState {
        self.inner.lock().video
    }

    pub fn is_recording(&self) -> bool {
        self.inner.lock().video == VideoState::Recording
    }

    /// How long the current recording has been running
    pub fn recording_elapsed(&self) -> Option<Duration> {
        self.inner
            .lock()
            .recording
            .as_ref()
            .map(|r| r.started_at.elapsed())
    }

    async fn finish_recording(&self, generation: u64, forced: bool) -> Result<Option<MediaAsset>> {
        let recording = {
            let mut inner = self.inner.lock();
            match inner.recording.take() {
                Some(recording) if recording.generation == generation => recording,
                other => {
                    inner.recording = other;
                    return Ok(None);
                }
            }
        };
        recording.stop_token.cancel();

        let result = match self.device.stop_recording().await {
            Ok(Some(raw)) => self.cache_clip(raw).await,
            Ok(None) => Err(PipelineError::capture("recorder returned no video")),
            Err(e) => Err(into_capture_error(e)),
        };

        {
            let mut inner = self.inner.lock();
            // A reset during the stop already moved the video side to Idle
            if inner.video == VideoState::Recording && inner.recording.is_none() {
                inner.video = if result.is_ok() {
                    VideoState::Recorded
                } else {
                    VideoState::Idle
                };
            }
        }

        let asset = result?;
        info!(
            "Recording stopped{} after {:?}",
            if forced { " at maximum duration" } else { "" },
            recording.started_at.elapsed()
        );
        self.event_bus
            .publish(PipelineEvent::RecordingStopped { forced });
        Ok(Some(asset))
    }

    async fn cache_clip(&self, raw: PathBuf) -> Result<MediaAsset> {
        self.store.cache(&raw, MediaKind::Video).await
    }

    async fn ensure_permission(&self, capability: Capability) -> Result<()> {
        match self.device.request_permission(capability).await {
            PermissionStatus::Granted => Ok(()),
            PermissionStatus::Denied => {
                self.event_bus.publish(PipelineEvent::PermissionRequired {
                    capability: capability.to_string(),
                });
                Err(PipelineError::PermissionDenied { capability })
            }
        }
    }

    fn set_photo_state(&self, state: PhotoState) {
        self.inner.lock().photo = state;
    }
}

impl Clone for CaptureController {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            device: Arc::clone(&self.device),
            store: Arc::clone(&self.store),
            event_bus: Arc::clone(&self.event_bus),
            inner: Arc::clone(&self.inner),
        }
    }
}

/// Device failures surface as capture errors; permission errors pass through
fn into_capture_error(error: PipelineError) -> PipelineError {
    match error {
        PipelineError::Capture { .. } | PipelineError::PermissionDenied { .. } => error,
        other => PipelineError::capture(other.to_string()),
    }
}
