use super::*;
use crate::capture::FileCaptureDevice;
use crate::config::StumpcamConfig;
use crate::error::{PipelineError, Result};
use crate::media::{MediaAsset, MediaKind};
use crate::presenter::sample_jpeg;
use crate::upload::{EndpointResponse, PipelineState, ProcessingEndpoint, UploadRequest};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Answers every request with the same JPEG
struct EchoEndpoint {
    body: Bytes,
    calls: Mutex<usize>,
}

impl EchoEndpoint {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            body: Bytes::from(sample_jpeg(8, 8)),
            calls: Mutex::new(0),
        })
    }
}

#[async_trait]
impl ProcessingEndpoint for EchoEndpoint {
    async fn submit(&self, _request: UploadRequest) -> Result<EndpointResponse> {
        *self.calls.lock() += 1;
        Ok(EndpointResponse {
            status: 200,
            body: self.body.clone(),
        })
    }
}

fn create_test_config(temp_dir: &TempDir) -> StumpcamConfig {
    let mut config = StumpcamConfig::default();
    config.storage.root = temp_dir.path().join("data").to_string_lossy().to_string();
    config.system.event_bus_capacity = 64;
    config
}

fn raw_media(temp_dir: &TempDir) -> (PathBuf, PathBuf) {
    let photo = temp_dir.path().join("photo.jpg");
    let video = temp_dir.path().join("clip.mp4");
    std::fs::write(&photo, b"stump reference").unwrap();
    std::fs::write(&video, vec![3u8; 4096]).unwrap();
    (photo, video)
}

async fn create_pipeline(config: StumpcamConfig, temp_dir: &TempDir) -> (MediaPipeline, Arc<EchoEndpoint>) {
    let (photo, video) = raw_media(temp_dir);
    let endpoint = EchoEndpoint::new();
    let pipeline = MediaPipeline::new(
        config,
        Arc::new(FileCaptureDevice::new(Some(photo), Some(video))),
        endpoint.clone(),
    );
    pipeline.initialize().await.unwrap();
    (pipeline, endpoint)
}

async fn record_clip(pipeline: &MediaPipeline) -> MediaAsset {
    pipeline.start_clip().await.unwrap();
    pipeline.stop_clip().await.unwrap().unwrap()
}

#[tokio::test]
async fn test_full_session_succeeds() {
    let temp_dir = TempDir::new().unwrap();
    let (pipeline, endpoint) = create_pipeline(create_test_config(&temp_dir), &temp_dir).await;

    let reference = pipeline.capture_reference().await.unwrap();
    assert!(reference.storage_uri.starts_with(pipeline.store().cache_path()));
    record_clip(&pipeline).await;

    let result = pipeline.upload().await.unwrap();
    assert!(result.storage_uri.exists());
    assert_eq!(pipeline.state(), PipelineState::Success);
    assert_eq!(pipeline.attempts().len(), 1);
    assert_eq!(*endpoint.calls.lock(), 1);

    let summary = serde_json::to_value(pipeline.summary()).unwrap();
    assert_eq!(summary["state"], "Success");
    assert_eq!(summary["session"]["attempts"]["records"][0]["outcome"], "Success");
    assert!(summary["result"]["storage_uri"].is_string());
}

#[tokio::test]
async fn test_captures_rejected_while_session_is_open() {
    let temp_dir = TempDir::new().unwrap();
    let (pipeline, _endpoint) = create_pipeline(create_test_config(&temp_dir), &temp_dir).await;

    pipeline.capture_reference().await.unwrap();
    record_clip(&pipeline).await;

    assert!(matches!(
        pipeline.capture_reference().await,
        Err(PipelineError::SessionActive)
    ));
    assert!(matches!(
        pipeline.start_clip().await,
        Err(PipelineError::SessionActive)
    ));

    pipeline.reset().await.unwrap();
    assert_eq!(pipeline.state(), PipelineState::Idle);
    assert!(pipeline.capture_reference().await.is_ok());
}

#[tokio::test]
async fn test_reset_clears_session_files() {
    let temp_dir = TempDir::new().unwrap();
    let (pipeline, _endpoint) = create_pipeline(create_test_config(&temp_dir), &temp_dir).await;

    let reference = pipeline.capture_reference().await.unwrap();
    let clip = record_clip(&pipeline).await;
    let result = pipeline.upload().await.unwrap();

    let report = pipeline.reset().await.unwrap();
    assert_eq!(report.files_removed, 3);
    for path in [&reference.storage_uri, &clip.storage_uri, &result.storage_uri] {
        assert!(!path.exists());
    }
    assert!(pipeline.summary().result.is_none());
    assert!(pipeline.coordinator().staged(MediaKind::Image).is_none());
}

#[tokio::test]
async fn test_persisted_reference_is_reused_after_reset() {
    let temp_dir = TempDir::new().unwrap();
    let mut config = create_test_config(&temp_dir);
    config.storage.persist_reference = true;
    let (pipeline, endpoint) = create_pipeline(config, &temp_dir).await;

    let reference = pipeline.capture_reference().await.unwrap();
    assert!(reference.storage_uri.starts_with(pipeline.store().durable_path()));
    record_clip(&pipeline).await;
    pipeline.upload().await.unwrap();

    pipeline.reset().await.unwrap();
    assert!(reference.storage_uri.exists());
    assert_eq!(
        pipeline.coordinator().staged(MediaKind::Image),
        Some(reference.clone())
    );

    // Only a new clip is needed for the next session
    record_clip(&pipeline).await;
    pipeline.upload().await.unwrap();
    assert_eq!(*endpoint.calls.lock(), 2);

    pipeline.clear_all().await.unwrap();
    assert!(!reference.storage_uri.exists());
    pipeline.reset().await.unwrap();
    assert!(pipeline.coordinator().staged(MediaKind::Image).is_none());
}

#[tokio::test]
async fn test_recapturing_persisted_reference_replaces_durable_copy() {
    let temp_dir = TempDir::new().unwrap();
    let mut config = create_test_config(&temp_dir);
    config.storage.persist_reference = true;
    let (pipeline, _endpoint) = create_pipeline(config, &temp_dir).await;

    let first = pipeline.capture_reference().await.unwrap();
    let second = pipeline.capture_reference().await.unwrap();

    assert!(!first.storage_uri.exists());
    assert!(second.storage_uri.exists());
    assert_eq!(
        std::fs::read_dir(pipeline.store().durable_path()).unwrap().count(),
        1
    );
}

#[tokio::test]
async fn test_auto_stopped_clip_is_collected() {
    let temp_dir = TempDir::new().unwrap();
    let mut config = create_test_config(&temp_dir);
    config.capture.max_duration_seconds = 1;
    let (pipeline, _endpoint) = create_pipeline(config, &temp_dir).await;

    pipeline.start_clip().await.unwrap();
    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert!(!pipeline.controller().is_recording());

    let clip = pipeline.stop_clip().await.unwrap().unwrap();
    assert_eq!(clip.kind, MediaKind::Video);
    assert_eq!(pipeline.coordinator().staged(MediaKind::Video), Some(clip));

    // Nothing left to collect
    assert!(pipeline.stop_clip().await.unwrap().is_none());
}

#[tokio::test]
async fn test_upload_without_clip_fails_and_needs_reset() {
    let temp_dir = TempDir::new().unwrap();
    let (pipeline, endpoint) = create_pipeline(create_test_config(&temp_dir), &temp_dir).await;

    pipeline.capture_reference().await.unwrap();
    assert!(matches!(
        pipeline.upload().await,
        Err(PipelineError::MissingInput { .. })
    ));
    assert_eq!(pipeline.state(), PipelineState::Failed);
    assert_eq!(*endpoint.calls.lock(), 0);
    assert!(pipeline.summary().error.is_some());

    assert!(matches!(
        pipeline.start_clip().await,
        Err(PipelineError::SessionActive)
    ));
    pipeline.reset().await.unwrap();
    assert!(pipeline.start_clip().await.is_ok());
}

#[tokio::test]
async fn test_persisted_reference_survives_restart() {
    let temp_dir = TempDir::new().unwrap();
    let mut config = create_test_config(&temp_dir);
    config.storage.persist_reference = true;

    let (first_run, _endpoint) = create_pipeline(config.clone(), &temp_dir).await;
    let reference = first_run.capture_reference().await.unwrap();
    drop(first_run);

    let (second_run, endpoint) = create_pipeline(config, &temp_dir).await;
    let staged = second_run
        .coordinator()
        .staged(MediaKind::Image)
        .unwrap();
    assert_eq!(staged.id, reference.id);
    assert_eq!(staged.storage_uri, reference.storage_uri);

    record_clip(&second_run).await;
    second_run.upload().await.unwrap();
    assert_eq!(*endpoint.calls.lock(), 1);
    assert_eq!(
        std::fs::read_dir(second_run.store().durable_path()).unwrap().count(),
        1
    );
}
