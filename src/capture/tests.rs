use super::*;
use crate::config::{CameraFacing, CaptureConfig, StorageConfig};
use crate::error::PipelineError;
use crate::events::{EventBus, PipelineEvent};
use crate::media::MediaKind;
use crate::storage::LocalMediaStore;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

struct Fixture {
    _temp_dir: TempDir,
    event_bus: Arc<EventBus>,
    device: Arc<FileCaptureDevice>,
    controller: CaptureController,
}

fn create_test_capture_config() -> CaptureConfig {
    CaptureConfig {
        max_duration_seconds: 60,
        quality_hint: "720p".to_string(),
        facing: CameraFacing::Back,
        require_microphone: false,
    }
}

fn create_fixture_with(
    config: CaptureConfig,
    build_device: impl FnOnce(FileCaptureDevice) -> FileCaptureDevice,
) -> Fixture {
    let temp_dir = TempDir::new().unwrap();
    let photo = temp_dir.path().join("raw_photo.jpg");
    let video = temp_dir.path().join("raw_video.mp4");
    std::fs::write(&photo, b"jpeg bytes").unwrap();
    std::fs::write(&video, vec![7u8; 2048]).unwrap();

    let event_bus = Arc::new(EventBus::new(32));
    let store = Arc::new(LocalMediaStore::with_local_fs(
        StorageConfig {
            root: temp_dir.path().join("data").to_string_lossy().to_string(),
            cache_dir: "cache".to_string(),
            durable_dir: "media".to_string(),
            persist_reference: false,
            discard_inputs_on_success: false,
        },
        Arc::clone(&event_bus),
    ));
    let device = Arc::new(build_device(FileCaptureDevice::new(Some(photo), Some(video))));
    let controller = CaptureController::new(
        config,
        Arc::clone(&device) as Arc<dyn CaptureDevice>,
        store,
        Arc::clone(&event_bus),
    );

    Fixture {
        _temp_dir: temp_dir,
        event_bus,
        device,
        controller,
    }
}

fn create_fixture() -> Fixture {
    create_fixture_with(create_test_capture_config(), |device| device)
}

#[tokio::test]
async fn test_capture_photo_caches_asset() {
    let fixture = create_fixture();

    let asset = fixture.controller.capture_photo().await.unwrap();
    assert_eq!(asset.kind, MediaKind::Image);
    assert_eq!(asset.size_bytes, 10);
    assert!(asset.storage_uri.exists());
    assert_eq!(fixture.controller.photo_state(), PhotoState::Captured);

    fixture.controller.release_photo();
    assert_eq!(fixture.controller.photo_state(), PhotoState::Idle);
}

#[tokio::test]
async fn test_capture_photo_without_permission() {
    let fixture = create_fixture_with(create_test_capture_config(), |device| {
        device.deny(Capability::Camera)
    });
    let mut receiver = fixture.event_bus.subscribe();

    let result = fixture.controller.capture_photo().await;
    assert!(matches!(
        result,
        Err(PipelineError::PermissionDenied {
            capability: Capability::Camera
        })
    ));
    assert_eq!(fixture.controller.photo_state(), PhotoState::Idle);

    match receiver.try_recv().unwrap() {
        PipelineEvent::PermissionRequired { capability } => assert_eq!(capability, "Camera"),
        other => panic!("Unexpected event: {:?}", other),
    }
}

#[tokio::test]
async fn test_capture_photo_without_uri_is_capture_error() {
    let temp_dir = TempDir::new().unwrap();
    let event_bus = Arc::new(EventBus::new(8));
    let store = Arc::new(LocalMediaStore::with_local_fs(
        StorageConfig {
            root: temp_dir.path().to_string_lossy().to_string(),
            cache_dir: "cache".to_string(),
            durable_dir: "media".to_string(),
            persist_reference: false,
            discard_inputs_on_success: false,
        },
        Arc::clone(&event_bus),
    ));
    let controller = CaptureController::new(
        create_test_capture_config(),
        Arc::new(FileCaptureDevice::new(None, None)),
        store,
        event_bus,
    );

    let result = controller.capture_photo().await;
    assert!(matches!(result, Err(PipelineError::Capture { .. })));
    assert_eq!(controller.photo_state(), PhotoState::Idle);
}

#[tokio::test]
async fn test_device_failure_is_capture_error() {
    let fixture = create_fixture();
    fixture.device.fail_with("sensor offline");

    match fixture.controller.capture_photo().await {
        Err(PipelineError::Capture { details }) => assert_eq!(details, "sensor offline"),
        other => panic!("Unexpected result: {:?}", other),
    }
    assert_eq!(fixture.controller.photo_state(), PhotoState::Idle);

    assert!(fixture.controller.start_video().await.is_err());
    assert_eq!(fixture.controller.video_state(), VideoState::Idle);
}

#[tokio::test]
async fn test_start_and_stop_are_idempotent() {
    let fixture = create_fixture();

    assert!(fixture.controller.stop_video().await.unwrap().is_none());
    assert_eq!(fixture.device.stop_count(), 0);

    fixture.controller.start_video().await.unwrap();
    fixture.controller.start_video().await.unwrap();
    assert_eq!(fixture.device.start_count(), 1);
    assert!(fixture.controller.is_recording());
    assert!(fixture.controller.recording_elapsed().is_some());

    let clip = fixture.controller.stop_video().await.unwrap().unwrap();
    assert_eq!(clip.kind, MediaKind::Video);
    assert_eq!(clip.size_bytes, 2048);
    assert_eq!(fixture.controller.video_state(), VideoState::Recorded);
    assert!(fixture.controller.recording_elapsed().is_none());

    assert!(fixture.controller.stop_video().await.unwrap().is_none());
    assert_eq!(fixture.device.stop_count(), 1);

    assert_eq!(fixture.controller.take_clip(), Some(clip));
    assert_eq!(fixture.controller.video_state(), VideoState::Idle);
}

#[tokio::test]
async fn test_recording_options_follow_config_and_facing() {
    let fixture = create_fixture();

    assert_eq!(fixture.controller.toggle_facing(), CameraFacing::Front);
    fixture.controller.start_video().await.unwrap();

    let options = fixture.device.last_options().unwrap();
    assert_eq!(options.max_duration, Duration::from_secs(60));
    assert_eq!(options.quality_hint, "720p");
    assert_eq!(options.facing, CameraFacing::Front);

    fixture.controller.capture_photo().await.unwrap();
    assert_eq!(fixture.device.last_facing(), Some(CameraFacing::Front));
}

#[tokio::test]
async fn test_recording_auto_stops_at_max_duration() {
    let mut config = create_test_capture_config();
    config.max_duration_seconds = 1;
    let fixture = create_fixture_with(config, |device| device);
    let mut receiver = fixture.event_bus.subscribe();

    fixture.controller.start_video().await.unwrap();
    tokio::time::sleep(Duration::from_millis(1500)).await;

    assert_eq!(fixture.controller.video_state(), VideoState::Recorded);
    assert!(!fixture.device.is_recording());
    assert_eq!(fixture.device.stop_count(), 1);

    // A late manual stop does nothing
    assert!(fixture.controller.stop_video().await.unwrap().is_none());
    assert_eq!(fixture.device.stop_count(), 1);

    let mut forced_stop_seen = false;
    while let Ok(event) = receiver.try_recv() {
        if let PipelineEvent::RecordingStopped { forced } = event {
            forced_stop_seen = forced;
        }
    }
    assert!(forced_stop_seen);
    assert!(fixture.controller.take_clip().is_some());
}

#[tokio::test]
async fn test_manual_stop_cancels_auto_stop() {
    let mut config = create_test_capture_config();
    config.max_duration_seconds = 1;
    let fixture = create_fixture_with(config, |device| device);

    fixture.controller.start_video().await.unwrap();
    fixture.controller.stop_video().await.unwrap().unwrap();
    tokio::time::sleep(Duration::from_millis(1300)).await;

    assert_eq!(fixture.device.stop_count(), 1);
}

#[tokio::test]
async fn test_microphone_permission_when_required() {
    let mut config = create_test_capture_config();
    config.require_microphone = true;
    let fixture = create_fixture_with(config, |device| device.deny(Capability::Microphone));

    let result = fixture.controller.start_video().await;
    assert!(matches!(
        result,
        Err(PipelineError::PermissionDenied {
            capability: Capability::Microphone
        })
    ));
    assert_eq!(fixture.device.start_count(), 0);

    // Photos only need the camera
    assert!(fixture.controller.capture_photo().await.is_ok());

    fixture.device.grant(Capability::Microphone);
    assert!(fixture.controller.start_video().await.is_ok());
}

#[tokio::test]
async fn test_reset_abandons_recording() {
    let fixture = create_fixture();

    fixture.controller.start_video().await.unwrap();
    fixture.controller.reset().await;

    assert_eq!(fixture.controller.video_state(), VideoState::Idle);
    assert!(!fixture.device.is_recording());
    assert!(fixture.controller.take_clip().is_none());
}
