//! Recording tests writing real y4m files to a temporary directory

use camstream_media::*;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_test::assert_ok;
use uuid::Uuid;

fn scratch_dir() -> PathBuf {
    std::env::temp_dir().join(format!("camstream-test-{}", Uuid::new_v4()))
}

fn camera() -> Arc<CameraDevice> {
    Arc::new(CameraDevice::new(
        CameraConfig::new("camera1", 0).with_format(16, 8, 30.0),
        Arc::new(SyntheticBackend::new()),
        Arc::new(Y4mSinkFactory::new()),
    ))
}

#[tokio::test]
async fn test_record_to_y4m() {
    let dir = scratch_dir();
    let path = dir.join("videos").join("clip.y4m");
    let camera = camera();
    assert_ok!(camera.initialize_async().await);

    assert_ok!(camera.start_recording(&path).await);
    assert!(camera.is_recording());
    assert_eq!(camera.stats().recording_path, Some(path.clone()));

    tokio::time::sleep(Duration::from_millis(200)).await;
    let stopped = assert_ok!(camera.stop_recording().await);
    assert_eq!(stopped, Some(path.clone()));
    assert!(!camera.is_recording());

    let frames = camera.recorder().total_frames_written();
    assert!(frames > 0);

    let bytes = std::fs::read(&path).unwrap();
    let header = b"YUV4MPEG2 W16 H8 F30:1 Ip A1:1 C444\n";
    assert!(bytes.starts_with(header));
    let frame_len = b"FRAME\n".len() + 16 * 8 * 3;
    assert_eq!(bytes.len(), header.len() + frame_len * frames as usize);

    camera.release();
    let _ = std::fs::remove_dir_all(dir);
}

#[tokio::test]
async fn test_second_start_keeps_first_recording() {
    let dir = scratch_dir();
    let camera = camera();
    assert_ok!(camera.initialize_async().await);

    assert_ok!(camera.start_recording(dir.join("first.y4m")).await);
    assert_ok!(camera.start_recording(dir.join("second.y4m")).await);
    assert!(!dir.join("second.y4m").exists());

    let stopped = assert_ok!(camera.stop_recording().await);
    assert_eq!(stopped, Some(dir.join("first.y4m")));
    assert!(assert_ok!(camera.stop_recording().await).is_none());

    camera.release();
    let _ = std::fs::remove_dir_all(dir);
}

#[tokio::test]
async fn test_release_finalizes_recording() {
    let dir = scratch_dir();
    let path = dir.join("clip.y4m");
    let camera = camera();
    assert_ok!(camera.initialize_async().await);
    assert_ok!(camera.start_recording(&path).await);

    assert_ok!(camera.release_async().await);
    assert!(!camera.is_recording());
    assert!(path.exists());
    let _ = std::fs::remove_dir_all(dir);
}

#[test]
fn test_stop_on_idle_controller() {
    let controller = RecordingController::new("camera1", Arc::new(Y4mSinkFactory::new()));
    assert!(controller.stop().unwrap().is_none());
    assert!(!controller.is_recording());
}
