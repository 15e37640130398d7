use super::device::{Capability, CaptureDevice, PermissionStatus, RecordingOptions};
use crate::config::CameraFacing;
use crate::error::{PipelineError, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::path::PathBuf;
use tracing::debug;

/// Capture device that "captures" pre-existing files.
///
/// Used by the command-line tool to feed recorded media through the pipeline,
/// and scriptable (denied capabilities, injected failures) for testing
/// without camera hardware.
pub struct FileCaptureDevice {
    photo_source: Option<PathBuf>,
    video_source: Option<PathBuf>,
    state: Mutex<DeviceState>,
}

#[derive(Default)]
struct DeviceState {
    denied: HashSet<Capability>,
    failure: Option<String>,
    recording: bool,
    starts: usize,
    stops: usize,
    last_options: Option<RecordingOptions>,
    last_facing: Option<CameraFacing>,
}

impl FileCaptureDevice {
    pub fn new(photo_source: Option<PathBuf>, video_source: Option<PathBuf>) -> Self {
        Self {
            photo_source,
            video_source,
            state: Mutex::new(DeviceState::default()),
        }
    }

    /// Deny a capability for every later permission request
    pub fn deny(self, capability: Capability) -> Self {
        self.state.lock().denied.insert(capability);
        self
    }

    /// Make picture and recording calls fail with a device error
    pub fn fail_with<S: Into<String>>(&self, details: S) {
        self.state.lock().failure = Some(details.into());
    }

    pub fn grant(&self, capability: Capability) {
        self.state.lock().denied.remove(&capability);
    }

    pub fn start_count(&self) -> usize {
        self.state.lock().starts
    }

    pub fn stop_count(&self) -> usize {
        self.state.lock().stops
    }

    pub fn is_recording(&self) -> bool {
        self.state.lock().recording
    }

    pub fn last_options(&self) -> Option<RecordingOptions> {
        self.state.lock().last_options.clone()
    }

    pub fn last_facing(&self) -> Option<CameraFacing> {
        self.state.lock().last_facing
    }

    fn check_failure(&self) -> Result<()> {
        match &self.state.lock().failure {
            Some(details) => Err(PipelineError::capture(details.clone())),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl CaptureDevice for FileCaptureDevice {
    async fn request_permission(&self, capability: Capability) -> PermissionStatus {
        if self.state.lock().denied.contains(&capability) {
            PermissionStatus::Denied
        } else {
            PermissionStatus::Granted
        }
    }

    async fn take_picture(&self, facing: CameraFacing) -> Result<Option<PathBuf>> {
        self.check_failure()?;
        self.state.lock().last_facing = Some(facing);
        debug!("File device picture: {:?}", self.photo_source);
        Ok(self.photo_source.clone())
    }

    async fn start_recording(&self, options: RecordingOptions) -> Result<()> {
        self.check_failure()?;
        let mut state = self.state.lock();
        state.recording = true;
        state.starts += 1;
        state.last_options = Some(options);
        Ok(())
    }

    async fn stop_recording(&self) -> Result<Option<PathBuf>> {
        {
            let mut state = self.state.lock();
            if !state.recording {
                return Err(PipelineError::capture("recorder is not running"));
            }
            state.recording = false;
            state.stops += 1;
        }
        self.check_failure()?;
        debug!("File device clip: {:?}", self.video_source);
        Ok(self.video_source.clone())
    }
}
