//! End-to-end tests of the facade with a synthetic camera and a loopback transport

use async_trait::async_trait;
use camstream::*;
use camstream_signaling::{
    ConnectionState, PeerConnection, StateChangeHandler, TransportSnapshot, VideoSource,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};

// ============================================================================
// LOOPBACK TRANSPORT
// ============================================================================

#[derive(Default)]
struct LoopbackPeer {
    snapshot: Mutex<TransportSnapshot>,
    track: Mutex<Option<Arc<dyn VideoSource>>>,
}

#[async_trait]
impl PeerConnection for LoopbackPeer {
    fn add_track(&self, source: Arc<dyn VideoSource>) -> Result<()> {
        *self.track.lock() = Some(source);
        Ok(())
    }

    async fn set_remote_description(&self, _offer: SessionDescription) -> Result<()> {
        self.snapshot.lock().connection = ConnectionState::Connecting;
        Ok(())
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        Ok(SessionDescription::answer("v=0 loopback"))
    }

    async fn add_ice_candidate(&self, _candidate: IceCandidateInit) -> Result<()> {
        Ok(())
    }

    fn on_state_change(&self, _handler: StateChangeHandler) {}

    fn snapshot(&self) -> TransportSnapshot {
        *self.snapshot.lock()
    }

    async fn close(&self) -> Result<()> {
        self.snapshot.lock().connection = ConnectionState::Closed;
        Ok(())
    }
}

#[derive(Default)]
struct LoopbackTransport {
    peers: Mutex<Vec<Arc<LoopbackPeer>>>,
}

#[async_trait]
impl RtcTransport for LoopbackTransport {
    async fn create_session(
        &self,
        _ice_servers: &[IceServer],
    ) -> Result<Arc<dyn PeerConnection>> {
        let peer = Arc::new(LoopbackPeer::default());
        self.peers.lock().push(peer.clone());
        Ok(peer)
    }
}

fn dev_config() -> CamStreamConfig {
    CamStreamConfig {
        dev_mode: true,
        media_dir: std::env::temp_dir().join(format!("camstream-{}", uuid::Uuid::new_v4())),
        ..Default::default()
    }
}

fn build(config: CamStreamConfig) -> (CamStream, Arc<LoopbackTransport>) {
    let transport = Arc::new(LoopbackTransport::default());
    let streamer = CamStream::builder()
        .config(config)
        .transport(transport.clone())
        .build()
        .unwrap();
    (streamer, transport)
}

// ============================================================================
// CONSTRUCTION
// ============================================================================

#[test]
fn test_build_requires_transport() {
    let err = assert_err!(CamStream::builder().config(dev_config()).build());
    assert!(matches!(err, CamStreamError::Initialization { .. }));
}

#[test]
fn test_build_without_cameras_outside_dev_mode() {
    let err = assert_err!(CamStream::builder()
        .transport(Arc::new(LoopbackTransport::default()))
        .backend(Arc::new(SyntheticBackend::new()))
        .build());
    assert!(matches!(err, CamStreamError::InvalidConfiguration { .. }));
}

#[test]
fn test_dev_mode_uses_synthetic_camera() {
    let (streamer, _) = build(dev_config());
    assert_eq!(streamer.registry().camera_ids(), vec!["camera1".to_string()]);
    assert_eq!(streamer.registry().instances_created(), 0);
}

#[test]
fn test_device_provider_supplies_cameras() {
    let streamer = CamStream::builder()
        .transport(Arc::new(LoopbackTransport::default()))
        .backend(Arc::new(SyntheticBackend::new()))
        .device_provider(Arc::new(SyntheticDeviceProvider))
        .build()
        .unwrap();
    assert_eq!(streamer.registry().default_camera_id(), Some("camera1"));
}

// ============================================================================
// LIFECYCLE
// ============================================================================

#[tokio::test]
async fn test_start_stream_record_shutdown() {
    let config = dev_config();
    let media_dir = config.media_dir.clone();
    let (streamer, transport) = build(config);

    let report = streamer.start().await;
    assert!(report.all_active());
    assert_eq!(report.active, vec!["camera1".to_string()]);

    let photo = assert_ok!(streamer.capture_photo("camera1").await);
    assert_eq!(photo.resolution(), Resolution::VGA);

    let answer = assert_ok!(
        streamer
            .sessions()
            .process_offer("viewer-1", SessionDescription::offer("v=0"))
            .await
    );
    assert_eq!(answer.session_id, "viewer-1");

    let track = transport.peers.lock()[0].track.lock().clone().unwrap();
    let frame = track.next_frame().await;
    assert!(!frame.synthetic);
    assert_eq!(frame.frame.format, PixelFormat::Rgb24);

    let path = assert_ok!(streamer.start_recording("camera1").await);
    assert!(path.starts_with(media_dir.join("videos")));
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(assert_ok!(streamer.stop_recording("camera1").await), Some(path.clone()));
    assert!(path.exists());

    let snapshot = streamer.snapshot();
    assert_eq!(snapshot.sessions, 1);
    assert_eq!(snapshot.active_cameras, 1);
    assert_eq!(snapshot.cameras[0].clients, 1);

    streamer.shutdown().await;
    assert_eq!(streamer.sessions().session_count(), 0);
    assert!(streamer.registry().active_ids().is_empty());
    let _ = std::fs::remove_dir_all(media_dir);
}

#[tokio::test]
async fn test_broadcast_fan_out() {
    let config = CamStreamConfig {
        max_broadcast_clients: 2,
        ..dev_config()
    };
    let (streamer, _) = build(config);
    streamer.start().await;

    let broadcaster = assert_ok!(streamer.broadcaster("camera1"));
    let mut first = assert_ok!(broadcaster.subscribe());
    let _second = assert_ok!(broadcaster.subscribe());
    let err = assert_err!(broadcaster.subscribe());
    assert!(matches!(err, CamStreamError::ResourceLimit { limit: 2, .. }));

    let frame = tokio::time::timeout(Duration::from_secs(2), first.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(frame.is_well_formed());

    streamer.shutdown().await;
    assert!(!broadcaster.is_running());
}

#[tokio::test]
async fn test_unknown_camera_errors() {
    let (streamer, _) = build(dev_config());
    let err = assert_err!(streamer.capture_photo("camera7").await);
    assert_eq!(err.error_code(), 1004);
    assert!(streamer.broadcaster("camera7").is_err());
}

#[test]
fn test_enabled_cameras_filter_and_default_order() {
    let config = CamStreamConfig {
        cameras: vec![
            CameraConfig::new("camera1", 0),
            CameraConfig::new("camera2", 1),
            CameraConfig::new("camera3", 2),
        ],
        enabled_cameras: Some(vec!["camera1".to_string(), "camera3".to_string()]),
        default_camera: Some("camera3".to_string()),
        ..dev_config()
    };
    let (streamer, _) = build(config);
    assert_eq!(
        streamer.registry().camera_ids(),
        vec!["camera3".to_string(), "camera1".to_string()]
    );
    assert_eq!(streamer.registry().default_camera_id(), Some("camera3"));
    assert!(!streamer.registry().contains("camera2"));
}
