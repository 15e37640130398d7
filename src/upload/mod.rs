mod classify;
mod coordinator;
mod endpoint;
mod session;

pub use classify::{FailureClass, FailureClassifier};
pub use coordinator::UploadCoordinator;
pub use endpoint::{
    EndpointResponse, HttpProcessingEndpoint, ProcessingEndpoint, UploadPart, UploadRequest,
    REFERENCE_FIELD, VIDEO_FIELD,
};
pub use session::{
    AttemptLog, AttemptOutcome, AttemptRecord, PipelineState, RequestKind, UploadSession,
};
