use crate::config::CameraFacing;
use crate::error::Result;
use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Device capabilities that need a user grant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Capability {
    Camera,
    Microphone,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Capability::Camera => write!(f, "Camera"),
            Capability::Microphone => write!(f, "Microphone"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionStatus {
    Granted,
    Denied,
}

/// Options handed to the recorder when a clip starts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordingOptions {
    pub max_duration: Duration,
    pub quality_hint: String,
    pub facing: CameraFacing,
}

/// Camera/microphone capability producing raw media at a path
#[async_trait]
pub trait CaptureDevice: Send + Sync {
    /// Ask for (or report an existing) grant of a capability
    async fn request_permission(&self, capability: Capability) -> PermissionStatus;

    /// Take a still picture. `None` means the device produced no file.
    async fn take_picture(&self, facing: CameraFacing) -> Result<Option<PathBuf>>;

    async fn start_recording(&self, options: RecordingOptions) -> Result<()>;

    /// Stop the running recording. `None` means the device produced no file.
    async fn stop_recording(&self) -> Result<Option<PathBuf>>;
}
