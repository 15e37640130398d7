use crate::media::MediaKind;
use crate::storage::PurgeScope;
use crate::upload::{AttemptOutcome, PipelineState, RequestKind};
use serde::Serialize;
use std::path::PathBuf;
use tokio::sync::broadcast;
use tracing::{debug, error, info, trace, warn};

/// Events published by the capture-cache-upload pipeline
#[derive(Debug, Clone, Serialize)]
pub enum PipelineEvent {
    /// A device capability was denied; the UI should show a permission prompt
    PermissionRequired { capability: String },
    /// A raw capture was copied into the cache and validated
    AssetCached {
        kind: MediaKind,
        path: PathBuf,
        size_bytes: u64,
    },
    /// A still reference image was captured
    PhotoCaptured { asset_id: String },
    /// Video recording started
    RecordingStarted { max_duration_seconds: u64 },
    /// Video recording stopped; `forced` when the maximum duration elapsed
    RecordingStopped { forced: bool },
    /// The upload state machine moved between states
    StateChanged {
        from: PipelineState,
        to: PipelineState,
    },
    /// A transmission attempt finished and was logged
    AttemptCompleted {
        ordinal: u32,
        request_kind: RequestKind,
        http_status: Option<u16>,
        outcome: AttemptOutcome,
    },
    /// A processed result was stored and is ready to display
    ResultReady { path: PathBuf },
    /// The upload ended in a terminal failure
    UploadFailed { detail: String },
    /// The session was reset to idle
    SessionReset,
    /// Managed files were deleted
    CachePurged { scope: PurgeScope, files_removed: usize },
}

impl PipelineEvent {
    /// Get a human-readable description of the event
    pub fn description(&self) -> String {
        match self {
            PipelineEvent::PermissionRequired { capability } => {
                format!("{} access required", capability)
            }
            PipelineEvent::AssetCached {
                kind,
                path,
                size_bytes,
            } => format!("{} cached: {} ({} bytes)", kind, path.display(), size_bytes),
            PipelineEvent::PhotoCaptured { asset_id } => {
                format!("Reference image captured: {}", asset_id)
            }
            PipelineEvent::RecordingStarted {
                max_duration_seconds,
            } => format!("Recording video (max {}s)", max_duration_seconds),
            PipelineEvent::RecordingStopped { forced } => {
                if *forced {
                    "Recording stopped at maximum duration".to_string()
                } else {
                    "Recording stopped".to_string()
                }
            }
            PipelineEvent::StateChanged { from, to } => format!("Upload {} -> {}", from, to),
            PipelineEvent::AttemptCompleted {
                ordinal,
                request_kind,
                http_status,
                outcome,
            } => format!(
                "Attempt {} ({}) finished with {} [{}]",
                ordinal,
                request_kind,
                http_status
                    .map(|s| format!("HTTP {}", s))
                    .unwrap_or_else(|| "no response".to_string()),
                outcome
            ),
            PipelineEvent::ResultReady { path } => {
                format!("Processed image saved: {}", path.display())
            }
            PipelineEvent::UploadFailed { detail } => format!("Upload failed: {}", detail),
            PipelineEvent::SessionReset => "Ready to record".to_string(),
            PipelineEvent::CachePurged {
                scope,
                files_removed,
            } => format!("Cleared {:?} storage ({} files)", scope, files_removed),
        }
    }
}

/// Async event bus for component coordination using broadcast channels
pub struct EventBus {
    sender: broadcast::Sender<PipelineEvent>,
    debug_logging: bool,
}

impl EventBus {
    /// Create a new event bus with the specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            debug_logging: false,
        }
    }

    /// Create a new event bus that logs every status message
    pub fn with_debug_logging(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            debug_logging: true,
        }
    }

    /// Subscribe to events and get a receiver
    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.sender.subscribe()
    }

    /// Publish an event to all subscribers, returning how many received it.
    ///
    /// A bus without subscribers drops the event.
    pub fn publish(&self, event: PipelineEvent) -> usize {
        match &event {
            PipelineEvent::PermissionRequired { capability } => {
                warn!("{} permission required", capability);
            }
            PipelineEvent::UploadFailed { detail } => {
                error!("Upload failed: {}", detail);
            }
            PipelineEvent::ResultReady { path } => {
                info!("Result ready: {}", path.display());
            }
            _ => {
                if self.debug_logging {
                    debug!("Event: {}", event.description());
                }
            }
        }

        match self.sender.send(event) {
            Ok(count) => count,
            Err(_) => {
                trace!("No subscribers for event");
                0
            }
        }
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Check if there are any active subscribers
    pub fn has_subscribers(&self) -> bool {
        self.sender.receiver_count() > 0
    }
}

impl Clone for EventBus {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
            debug_logging: self.debug_logging,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_event_bus_basic_operations() {
        let event_bus = EventBus::new(10);
        let mut receiver = event_bus.subscribe();

        let delivered = event_bus.publish(PipelineEvent::RecordingStarted {
            max_duration_seconds: 60,
        });
        assert_eq!(delivered, 1);

        match receiver.recv().await.unwrap() {
            PipelineEvent::RecordingStarted {
                max_duration_seconds,
            } => assert_eq!(max_duration_seconds, 60),
            other => panic!("Unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_not_an_error() {
        let event_bus = EventBus::new(10);
        assert!(!event_bus.has_subscribers());
        assert_eq!(event_bus.publish(PipelineEvent::SessionReset), 0);
    }

    #[test]
    fn test_descriptions() {
        let event = PipelineEvent::AttemptCompleted {
            ordinal: 2,
            request_kind: RequestKind::Fallback,
            http_status: Some(500),
            outcome: AttemptOutcome::Fatal,
        };
        assert_eq!(
            event.description(),
            "Attempt 2 (fallback) finished with HTTP 500 [fatal]"
        );
        assert_eq!(
            PipelineEvent::RecordingStopped { forced: true }.description(),
            "Recording stopped at maximum duration"
        );
    }
}
