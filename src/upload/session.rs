use crate::media::MediaAsset;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use uuid::Uuid;

/// Upload pipeline states.
///
/// `Idle -> Validating -> Transmitting -> (RetryPending -> Transmitting)? ->
/// Success | Failed`, and any state returns to `Idle` on reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum PipelineState {
    #[default]
    Idle,
    Validating,
    Transmitting,
    RetryPending,
    Success,
    Failed,
}

impl PipelineState {
    /// States in which a transmission is underway
    pub fn is_in_flight(self) -> bool {
        matches!(
            self,
            PipelineState::Validating | PipelineState::Transmitting | PipelineState::RetryPending
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, PipelineState::Success | PipelineState::Failed)
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineState::Idle => "idle",
            PipelineState::Validating => "validating",
            PipelineState::Transmitting => "transmitting",
            PipelineState::RetryPending => "retry pending",
            PipelineState::Success => "success",
            PipelineState::Failed => "failed",
        };
        write!(f, "{}", name)
    }
}

/// Which multipart layout a transmission used
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RequestKind {
    /// Recorded clip plus reference image
    Primary,
    /// Reference image submitted in the video slot as well
    Fallback,
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestKind::Primary => write!(f, "primary"),
            RequestKind::Fallback => write!(f, "fallback"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AttemptOutcome {
    Success,
    Retryable,
    Fatal,
}

impl fmt::Display for AttemptOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttemptOutcome::Success => write!(f, "success"),
            AttemptOutcome::Retryable => write!(f, "retryable"),
            AttemptOutcome::Fatal => write!(f, "fatal"),
        }
    }
}

/// One completed transmission
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttemptRecord {
    /// 1-based position within the session
    pub ordinal: u32,
    pub request_kind: RequestKind,
    /// `None` when no response was received
    pub http_status: Option<u16>,
    pub error_body: Option<String>,
    pub outcome: AttemptOutcome,
    pub completed_at: DateTime<Utc>,
}

/// Append-only attempt history for one session
#[derive(Debug, Clone, Default, Serialize)]
pub struct AttemptLog {
    records: Vec<AttemptRecord>,
}

impl AttemptLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a record; the ordinal is assigned here
    pub fn push(
        &mut self,
        request_kind: RequestKind,
        http_status: Option<u16>,
        error_body: Option<String>,
        outcome: AttemptOutcome,
    ) -> &AttemptRecord {
        let record = AttemptRecord {
            ordinal: self.records.len() as u32 + 1,
            request_kind,
            http_status,
            error_body,
            outcome,
            completed_at: Utc::now(),
        };
        self.records.push(record);
        &self.records[self.records.len() - 1]
    }

    pub fn as_slice(&self) -> &[AttemptRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn last(&self) -> Option<&AttemptRecord> {
        self.records.last()
    }
}

/// A clip/reference pair being uploaded
#[derive(Debug, Clone, Serialize)]
pub struct UploadSession {
    pub id: Uuid,
    pub reference: MediaAsset,
    pub clip: MediaAsset,
    pub attempts: AttemptLog,
    pub created_at: DateTime<Utc>,
}

impl UploadSession {
    pub fn new(reference: MediaAsset, clip: MediaAsset) -> Self {
        Self {
            id: Uuid::new_v4(),
            reference,
            clip,
            attempts: AttemptLog::new(),
            created_at: Utc::now(),
        }
    }
}
