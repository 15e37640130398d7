pub mod app;
pub mod capture;
pub mod config;
pub mod error;
pub mod events;
pub mod media;
pub mod presenter;
pub mod storage;
pub mod upload;

pub use app::{MediaPipeline, PipelineSummary};
pub use capture::{
    Capability, CaptureController, CaptureDevice, FileCaptureDevice, PermissionStatus,
    PhotoState, RecordingOptions, VideoState,
};
pub use config::{CameraFacing, StumpcamConfig};
pub use error::{PipelineError, Result};
pub use events::{EventBus, PipelineEvent};
pub use media::{MediaAsset, MediaKind, ProcessedResult};
pub use presenter::ResultPresenter;
pub use storage::{FileStat, FileStore, LocalFileStore, LocalMediaStore, PurgeReport, PurgeScope};
pub use upload::{
    AttemptOutcome, AttemptRecord, FailureClassifier, HttpProcessingEndpoint, PipelineState,
    ProcessingEndpoint, RequestKind, UploadCoordinator, UploadSession,
};
