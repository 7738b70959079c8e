//! Lifecycle controller tests against the simulated camera
//!
//! Timing scenarios run with a paused clock so tolerance windows of several
//! seconds complete instantly.

use super::*;
use crate::DeviceError;
use crate::devices::SimulatedCamera;
use crate::messages::Topic;
use crate::test_utils::{CrashingCamera, simulated_node};
use crate::transport::ChannelTransport;
use crate::types::{BufferList, SchemaMask};
use std::time::Duration;
use tokio::time::Instant;

async fn wait_for_state(node: &CameraNode, state: State) {
    let mut rx = node.watch_state();
    rx.wait_for(|s| *s == state).await.unwrap();
}

async fn active_node(camera: &SimulatedCamera, overrides: &[Parameter]) -> CameraNode {
    let (node, _) = simulated_node(camera, overrides);
    node.configure().await.unwrap();
    node.activate().await.unwrap();
    node
}

#[tokio::test(start_paused = true)]
async fn full_cycle_releases_everything() {
    let _ = tracing_subscriber::fmt::try_init();

    let camera = SimulatedCamera::default();
    let (node, transport) = simulated_node(&camera, &[]);
    assert_eq!(node.state(), State::Unconfigured);
    assert!(!node.has_session());

    assert_eq!(node.configure().await.unwrap(), State::Inactive);
    assert!(node.has_session());
    assert_eq!(camera.open_sessions(), 1);
    assert!(!transport.is_active());

    let mut rx = transport.subscribe();
    assert_eq!(node.activate().await.unwrap(), State::Active);
    assert!(transport.is_active());
    let message = rx.recv().await.unwrap();
    assert_eq!(message.topic(), Topic::Distance);
    assert_eq!(message.header().frame_id, "camera_optical_link");

    assert_eq!(node.deactivate().await.unwrap(), State::Inactive);
    assert!(!transport.is_active());
    assert!(node.stats().frames() > 0);
    assert_eq!(camera.open_sessions(), 1);

    assert_eq!(node.cleanup().await.unwrap(), State::Unconfigured);
    assert!(!node.has_session());
    assert_eq!(camera.open_sessions(), 0);
    assert_eq!(camera.active_grabbers(), 0);
}

#[tokio::test]
async fn configure_failure_leaves_node_unconfigured() {
    let camera = SimulatedCamera::default();
    camera.set_reachable(false);
    let (node, _) = simulated_node(&camera, &[]);

    let err = node.configure().await.unwrap_err();
    assert!(matches!(err, NodeError::Connect { source: DeviceError::ConnectFailed { .. } }));
    assert!(err.is_retryable());
    assert_eq!(node.state(), State::Unconfigured);
    assert!(!node.has_session());

    camera.set_reachable(true);
    assert_eq!(node.configure().await.unwrap(), State::Inactive);
    assert_eq!(camera.open_sessions(), 1);
}

#[tokio::test]
async fn rejected_buffers_release_connection() {
    let camera = SimulatedCamera::default();
    camera.set_reject_buffers(true);
    let (node, _) = simulated_node(&camera, &[]);

    let err = node.configure().await.unwrap_err();
    assert!(matches!(err, NodeError::Connect { source: DeviceError::ConfigRejected { .. } }));
    assert_eq!(node.state(), State::Unconfigured);
    assert_eq!(camera.connect_count(), 1);
    assert_eq!(camera.open_sessions(), 0);
}

#[tokio::test]
async fn invalid_transitions_change_nothing() {
    let camera = SimulatedCamera::default();
    let (node, _) = simulated_node(&camera, &[]);

    for transition in [Transition::Activate, Transition::Deactivate] {
        let err = node.trigger(transition).await.unwrap_err();
        assert!(matches!(
            err,
            NodeError::InvalidTransition { state: State::Unconfigured, .. }
        ));
    }
    assert_eq!(node.state(), State::Unconfigured);

    node.configure().await.unwrap();
    assert!(node.configure().await.is_err());
    assert_eq!(node.state(), State::Inactive);
    assert_eq!(camera.connect_count(), 1);
}

#[tokio::test]
async fn invalid_overrides_fail_construction() {
    let camera = SimulatedCamera::default();
    let transport = Arc::new(crate::transport::ChannelTransport::default());
    let err = CameraNode::new(
        "camera",
        &[Parameter::new("pcic_port", 0i64)],
        Arc::new(camera),
        transport,
    )
    .unwrap_err();
    assert!(matches!(err, NodeError::Config { ref name, .. } if name == "pcic_port"));
}

#[tokio::test(start_paused = true)]
async fn restart_parameter_recreates_session_while_active() {
    let camera = SimulatedCamera::default();
    let node = active_node(&camera, &[]).await;
    assert_eq!(node.generation().await, 1);

    let result = node.set_parameters(&[Parameter::new("schema_mask", 0b1000i64)]).await;
    assert!(result.successful, "{}", result.reason);
    assert!(result.restarted);
    assert_eq!(result.changed, vec![Field::SchemaMask]);

    assert_eq!(node.state(), State::Active);
    assert_eq!(node.generation().await, 2);
    assert_eq!(camera.connect_count(), 2);
    assert_eq!(camera.open_sessions(), 1);
    assert_eq!(
        camera.requested_buffers(),
        Some(BufferList::for_acquisition(SchemaMask::new(0b1000)))
    );
}

#[tokio::test(start_paused = true)]
async fn restart_parameter_while_inactive_stays_inactive() {
    let camera = SimulatedCamera::default();
    let (node, _) = simulated_node(&camera, &[]);
    node.configure().await.unwrap();

    let result = node.set_parameters(&[Parameter::new("pcic_port", 50011i64)]).await;
    assert!(result.successful);
    assert!(result.restarted);
    assert_eq!(node.state(), State::Inactive);
    assert_eq!(camera.connect_count(), 2);
    assert_eq!(camera.open_sessions(), 1);
    assert_eq!(node.generation().await, 0);
}

#[tokio::test]
async fn restart_parameter_while_unconfigured_waits_for_configure() {
    let camera = SimulatedCamera::default();
    let (node, _) = simulated_node(&camera, &[]);

    let result = node.set_parameters(&[Parameter::new("schema_mask", 1i64)]).await;
    assert!(result.successful);
    assert!(!result.restarted);
    assert_eq!(camera.connect_count(), 0);

    node.configure().await.unwrap();
    let expected = BufferList::for_acquisition(SchemaMask::new(1));
    assert_eq!(camera.requested_buffers(), Some(expected));
}

#[tokio::test(start_paused = true)]
async fn live_parameter_applies_without_restart() {
    let camera = SimulatedCamera::default();
    camera.set_latency(Duration::from_secs(2));
    let node = active_node(&camera, &[Parameter::new("frame_latency_thresh", 5.0)]).await;

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(node.stats().frames() > 0);
    assert_eq!(node.stats().stale_frames(), 0);

    let result = node.set_parameters(&[Parameter::new("frame_latency_thresh", 0.5)]).await;
    assert!(result.successful);
    assert!(!result.restarted);

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(node.stats().stale_frames() > 0);
    assert_eq!(node.state(), State::Active);
    assert_eq!(node.generation().await, 1);
    assert_eq!(camera.connect_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn live_frame_ids_apply_to_next_frame() {
    let camera = SimulatedCamera::default();
    let (node, transport) = simulated_node(&camera, &[Parameter::new("schema_mask", 8i64)]);
    node.configure().await.unwrap();
    node.activate().await.unwrap();

    let result = node.set_parameters(&[Parameter::new("tf.camera_frame", "base_camera")]).await;
    assert!(result.successful);
    assert!(!result.restarted);

    let mut rx = transport.subscribe();
    loop {
        let message = rx.recv().await.unwrap();
        if message.topic() == Topic::Cloud {
            assert_eq!(message.header().frame_id, "base_camera");
            break;
        }
    }
}

#[tokio::test]
async fn accepted_and_rejected_parameters_coexist() {
    let camera = SimulatedCamera::default();
    let (node, _) = simulated_node(&camera, &[]);
    node.configure().await.unwrap();

    let result = node
        .set_parameters(&[
            Parameter::new("pcic_port", 0i64),
            Parameter::new("optical_frame", "lens_link"),
        ])
        .await;
    assert!(!result.successful);
    assert!(!result.restarted);
    assert_eq!(result.rejected.len(), 1);
    assert!(result.reason.contains("pcic_port"));

    let params = node.parameters().await;
    assert_eq!(params.optical_frame, "lens_link");
    assert_eq!(params.pcic_port, 50010);
    assert_eq!(camera.connect_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn failed_restart_is_reported() {
    let camera = SimulatedCamera::default();
    let node = active_node(&camera, &[]).await;
    camera.set_reachable(false);

    let result = node.set_parameters(&[Parameter::new("schema_mask", 1i64)]).await;
    assert!(!result.successful);
    assert!(!result.restarted);
    assert!(result.reason.contains("configure"));
    assert_eq!(node.state(), State::Unconfigured);
    assert_eq!(camera.open_sessions(), 0);
}

#[tokio::test(start_paused = true)]
async fn sustained_timeouts_drive_error_transition() {
    let _ = tracing_subscriber::fmt::try_init();

    let camera = SimulatedCamera::default();
    let node = active_node(
        &camera,
        &[
            Parameter::new("timeout_millis", 100i64),
            Parameter::new("timeout_tolerance_secs", 5.0),
        ],
    )
    .await;

    tokio::time::sleep(Duration::from_millis(550)).await;
    assert_eq!(node.state(), State::Active);

    camera.set_stalled(true);
    let stalled_at = Instant::now();
    wait_for_state(&node, State::ErrorProcessing).await;

    let elapsed = stalled_at.elapsed();
    assert!(elapsed > Duration::from_secs(5), "failed after {:?}", elapsed);
    assert!(elapsed < Duration::from_millis(5300), "failed after {:?}", elapsed);
    assert!(node.stats().timeouts() >= 50);
    assert!(!node.has_session());
    assert_eq!(camera.open_sessions(), 0);
    assert_eq!(camera.active_grabbers(), 0);

    camera.set_stalled(false);
    assert_eq!(node.configure().await.unwrap(), State::Inactive);
    assert_eq!(node.activate().await.unwrap(), State::Active);
}

#[tokio::test(start_paused = true)]
async fn decode_failure_recovers_through_configure() {
    let camera = SimulatedCamera::default();
    let node = active_node(&camera, &[]).await;

    camera.inject_fault(DeviceError::decode("chunk header truncated"));
    wait_for_state(&node, State::ErrorProcessing).await;
    assert!(!node.has_session());
    assert_eq!(node.dump().await.status, STATUS_NO_SESSION);

    assert_eq!(node.configure().await.unwrap(), State::Inactive);
    assert_eq!(node.activate().await.unwrap(), State::Active);
    assert_eq!(node.generation().await, 2);
}

#[tokio::test(start_paused = true)]
async fn cleanup_from_error_returns_to_unconfigured() {
    let camera = SimulatedCamera::default();
    let node = active_node(&camera, &[]).await;
    camera.inject_fault(DeviceError::decode("bad"));
    wait_for_state(&node, State::ErrorProcessing).await;

    assert_eq!(node.cleanup().await.unwrap(), State::Unconfigured);
    assert_eq!(camera.open_sessions(), 0);
}

#[tokio::test]
async fn endpoints_without_session_fail_fast() {
    let camera = SimulatedCamera::default();
    let (node, _) = simulated_node(&camera, &[]);

    let dump = node.dump().await;
    assert_eq!(dump.status, STATUS_NO_SESSION);
    assert!(dump.config.is_empty());
    assert_eq!(node.config(ConfigRequest::new("{}")).await.status, STATUS_NO_SESSION);
    assert_eq!(node.softon().await.status, STATUS_NO_SESSION);
    let softoff = node.softoff().await;
    assert_eq!(softoff.status, STATUS_NO_SESSION);
    assert!(!softoff.msg.is_empty());
    assert_eq!(node.state(), State::Unconfigured);
}

#[tokio::test]
async fn endpoints_use_open_session() {
    let camera = SimulatedCamera::default();
    let (node, _) = simulated_node(&camera, &[]);
    node.configure().await.unwrap();

    let dump = node.dump().await;
    assert_eq!(dump.status, STATUS_OK);
    let config: serde_json::Value = serde_json::from_str(&dump.config).unwrap();
    assert!(config.get("Device").is_some());

    let applied = node.config(ConfigRequest::new(r#"{"Device": {"Name": "front"}}"#)).await;
    assert!(applied.is_ok(), "{}", applied.msg);
    assert!(node.dump().await.config.contains("front"));

    let rejected = node.config(ConfigRequest::new("{not json")).await;
    assert_eq!(rejected.status, DeviceError::config_rejected("").code());

    assert!(node.softoff().await.is_ok());
    assert!(!camera.is_streaming());
    assert!(node.softon().await.is_ok());
    assert!(camera.is_streaming());

    camera.inject_command_fault(DeviceError::Command {
        command: "softon".to_string(),
        code: -42,
        reason: "device busy".to_string(),
    });
    let failed = node.softon().await;
    assert_eq!(failed.status, -42);
    assert!(failed.msg.contains("device busy"));
    assert_eq!(node.state(), State::Inactive);
}

#[tokio::test(start_paused = true)]
async fn endpoints_work_while_streaming() {
    let camera = SimulatedCamera::default();
    let node = active_node(&camera, &[]).await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(node.dump().await.status, STATUS_OK);
    assert!(node.softoff().await.is_ok());
    assert!(node.softon().await.is_ok());
    assert_eq!(node.state(), State::Active);
}

#[tokio::test(start_paused = true)]
async fn shutdown_from_every_live_state() {
    let camera = SimulatedCamera::default();

    let (unconfigured, _) = simulated_node(&camera, &[]);
    assert_eq!(unconfigured.shutdown().await.unwrap(), State::Finalized);

    let (inactive, _) = simulated_node(&camera, &[]);
    inactive.configure().await.unwrap();
    assert_eq!(inactive.shutdown().await.unwrap(), State::Finalized);
    assert_eq!(camera.open_sessions(), 0);

    let active = active_node(&camera, &[]).await;
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(active.shutdown().await.unwrap(), State::Finalized);
    assert_eq!(camera.open_sessions(), 0);
    assert_eq!(camera.active_grabbers(), 0);

    let failed = active_node(&camera, &[]).await;
    camera.inject_fault(DeviceError::decode("bad"));
    wait_for_state(&failed, State::ErrorProcessing).await;
    assert_eq!(failed.shutdown().await.unwrap(), State::Finalized);

    let err = failed.configure().await.unwrap_err();
    assert!(matches!(err, NodeError::InvalidTransition { state: State::Finalized, .. }));
    assert!(failed.shutdown().await.is_err());
}

#[tokio::test(start_paused = true)]
async fn dropping_node_stops_acquisition() {
    let camera = SimulatedCamera::default();
    let node = active_node(&camera, &[]).await;
    tokio::time::sleep(Duration::from_millis(200)).await;
    let delivered = camera.frames_delivered();

    drop(node);
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(camera.open_sessions(), 0);
    assert_eq!(camera.disconnects(), 1);
    assert_eq!(camera.active_grabbers(), 0);
    assert!(camera.frames_delivered() <= delivered + 1);
}

#[tokio::test(start_paused = true)]
async fn dropping_configured_node_disconnects() {
    let camera = SimulatedCamera::default();
    let (node, _) = simulated_node(&camera, &[]);
    node.configure().await.unwrap();

    drop(node);
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(camera.open_sessions(), 0);
    assert_eq!(camera.disconnects(), 1);
}

#[tokio::test(start_paused = true)]
async fn panicking_grabber_drives_error_transition() {
    let camera = SimulatedCamera::default();
    let connector = CrashingCamera { camera: camera.clone(), frames: 3 };
    let transport = Arc::new(ChannelTransport::default());
    let node = CameraNode::new("camera", &[], Arc::new(connector), transport.clone()).unwrap();
    node.configure().await.unwrap();
    node.activate().await.unwrap();

    wait_for_state(&node, State::ErrorProcessing).await;
    assert!(!node.has_session());
    assert!(!transport.is_active());
    assert_eq!(camera.open_sessions(), 0);
    assert_eq!(camera.active_grabbers(), 0);
    assert_eq!(node.stats().frames(), 3);

    // A fresh session gets a fresh grabber, which crashes after three frames again
    assert_eq!(node.configure().await.unwrap(), State::Inactive);
    assert_eq!(camera.open_sessions(), 1);
    node.shutdown().await.unwrap();
}

#[tokio::test]
async fn finalized_node_refuses_parameters() {
    let camera = SimulatedCamera::default();
    let (node, _) = simulated_node(&camera, &[]);
    node.shutdown().await.unwrap();

    let result = node.set_parameters(&[Parameter::new("camera_frame", "late_link")]).await;
    assert!(!result.successful);
    assert!(result.reason.contains("finalized"));
    assert!(result.changed.is_empty());
    assert_eq!(node.parameters().await.camera_frame, "camera_link");
}
