//! Registry construction and batched startup tests

use camstream_media::*;
use std::sync::{Arc, Barrier};
use std::time::Duration;

fn configs(count: u32) -> Vec<CameraConfig> {
    (0..count)
        .map(|i| CameraConfig::new(format!("camera{}", i + 1), i).with_format(16, 8, 30.0))
        .collect()
}

#[test]
fn test_concurrent_get_constructs_once() {
    let registry = Arc::new(CameraRegistry::new(
        configs(1),
        Arc::new(SyntheticBackend::new()),
        Arc::new(Y4mSinkFactory::new()),
    ));
    let barrier = Arc::new(Barrier::new(50));

    let handles: Vec<_> = (0..50)
        .map(|_| {
            let registry = registry.clone();
            let barrier = barrier.clone();
            std::thread::spawn(move || {
                barrier.wait();
                registry.get("camera1").unwrap()
            })
        })
        .collect();

    let cameras: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert!(cameras.iter().all(|c| Arc::ptr_eq(c, &cameras[0])));
    assert_eq!(registry.instances_created(), 1);
    assert_eq!(cameras[0].state(), DeviceState::Uninitialized);
}

#[tokio::test]
async fn test_batched_startup_tolerates_failed_camera() {
    let backend = Arc::new(SyntheticBackend::new());
    backend.fail_open(1);

    let registry = CameraRegistry::new(configs(3), backend.clone(), Arc::new(Y4mSinkFactory::new()))
        .with_policy(InitPolicy {
            batch_size: 2,
            batch_pause: Duration::from_millis(10),
            max_attempts: 3,
            backoff_base: Duration::from_millis(10),
        });

    let report = registry.initialize_all().await;

    assert_eq!(report.active, vec!["camera1".to_string(), "camera3".to_string()]);
    assert_eq!(report.failed, vec!["camera2".to_string()]);
    assert_eq!(report.attempts["camera1"], 1);
    assert_eq!(report.attempts["camera2"], 3);
    // 20 + 40 + 80 ms of backoff for camera2, plus the batch pause.
    assert!(report.elapsed >= Duration::from_millis(150), "{:?}", report.elapsed);

    assert_eq!(registry.get("camera1").unwrap().state(), DeviceState::Active);
    assert_eq!(registry.get("camera2").unwrap().state(), DeviceState::Failed);
    assert_eq!(registry.get("camera3").unwrap().state(), DeviceState::Active);
    assert_eq!(registry.active_ids(), vec!["camera1".to_string(), "camera3".to_string()]);
    assert_eq!(backend.open_count_for(1), 0);

    registry.release_all().await;
    assert!(registry.active_ids().is_empty());
}

#[tokio::test]
async fn test_camera_recovering_on_retry() {
    let backend = Arc::new(SyntheticBackend::new());
    backend.fail_open(0);

    let registry = Arc::new(
        CameraRegistry::new(configs(1), backend.clone(), Arc::new(Y4mSinkFactory::new()))
            .with_policy(InitPolicy {
                batch_size: 1,
                batch_pause: Duration::ZERO,
                max_attempts: 3,
                backoff_base: Duration::from_millis(50),
            }),
    );

    let restorer = {
        let backend = backend.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            backend.restore_open(0);
        })
    };

    let report = registry.initialize_all().await;
    restorer.await.unwrap();

    assert!(report.all_active());
    assert_eq!(report.attempts["camera1"], 2);
    registry.release_all().await;
}

#[tokio::test]
async fn test_initialize_and_release_by_id() {
    let registry = CameraRegistry::new(
        configs(2),
        Arc::new(SyntheticBackend::new()),
        Arc::new(Y4mSinkFactory::new()),
    );

    registry.initialize("camera2").await.unwrap();
    assert_eq!(registry.active_ids(), vec!["camera2".to_string()]);
    assert_eq!(registry.instances_created(), 1);

    registry.release("camera2").await.unwrap();
    assert!(registry.active_ids().is_empty());
    assert!(registry.initialize("camera9").await.is_err());
}
