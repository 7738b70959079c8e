//! Acquisition loop: pulls frames from the session and publishes them
//!
//! The loop runs as its own task while the node is `Active`. Each iteration
//! takes the session lock for exactly one frame fetch, so endpoints and
//! transitions interleave between frames. Failures are never returned to the
//! task that spawned the loop; they are sent as [`LoopFailure`] reports tagged
//! with the loop generation, and the loop exits.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::messages::{FrameIds, frame_to_messages};
use crate::params::RuntimeParameters;
use crate::session::Session;
use crate::stream::LogThrottle;
use crate::transport::Transport;
use crate::types::Frame;
use crate::{DeviceError, NodeError};

/// Minimum time between two stale-frame warnings.
pub const STALE_WARNING_PERIOD: Duration = Duration::from_secs(5);

/// State guarded by the session lock.
#[derive(Debug)]
pub struct SessionSlot {
    /// The open session, if any
    pub session: Option<Session>,
    /// Parameters the node runs with
    pub params: RuntimeParameters,
}

impl SessionSlot {
    pub fn new(params: RuntimeParameters) -> Self {
        Self { session: None, params }
    }
}

/// The session lock.
pub type SharedSlot = Arc<Mutex<SessionSlot>>;

/// A failure reported by an acquisition loop.
#[derive(Debug)]
pub struct LoopFailure {
    /// Generation of the loop that failed
    pub generation: u64,
    pub error: NodeError,
}

/// How a loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    /// Cancellation was requested
    Cancelled,
    /// A failure was reported
    Failed,
    /// The session disappeared underneath the loop
    SessionClosed,
}

/// Counters shared by every loop of one node.
#[derive(Debug, Default)]
pub struct LoopStats {
    frames: AtomicU64,
    messages: AtomicU64,
    timeouts: AtomicU64,
    stale_frames: AtomicU64,
}

impl LoopStats {
    /// Frames received.
    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }

    /// Messages handed to the transport.
    pub fn messages(&self) -> u64 {
        self.messages.load(Ordering::Relaxed)
    }

    /// Frame waits that timed out.
    pub fn timeouts(&self) -> u64 {
        self.timeouts.load(Ordering::Relaxed)
    }

    /// Frames older than the latency threshold when received.
    pub fn stale_frames(&self) -> u64 {
        self.stale_frames.load(Ordering::Relaxed)
    }
}

/// Handle to a running loop.
#[derive(Debug)]
pub struct AcquisitionHandle {
    cancel: CancellationToken,
    join: JoinHandle<LoopExit>,
    generation: u64,
}

impl AcquisitionHandle {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Request the loop to stop at its next iteration.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Wait for the loop task to end.
    pub async fn join(self) -> LoopExit {
        match self.join.await {
            Ok(exit) => exit,
            Err(e) => {
                error!(generation = self.generation, "Acquisition task aborted: {}", e);
                LoopExit::Failed
            }
        }
    }
}

/// Acquisition loop
pub struct AcquisitionLoop {
    slot: SharedSlot,
    transport: Arc<dyn Transport>,
    failures: mpsc::UnboundedSender<LoopFailure>,
    stats: Arc<LoopStats>,
    generation: u64,
    cancel: CancellationToken,
}

impl AcquisitionLoop {
    /// Spawn a loop over the session in `slot`.
    pub fn spawn(
        slot: SharedSlot,
        transport: Arc<dyn Transport>,
        failures: mpsc::UnboundedSender<LoopFailure>,
        stats: Arc<LoopStats>,
        generation: u64,
    ) -> AcquisitionHandle {
        let cancel = CancellationToken::new();
        let abort_reports = failures.clone();
        let worker = AcquisitionLoop {
            slot,
            transport,
            failures,
            stats,
            generation,
            cancel: cancel.clone(),
        };
        let task = tokio::spawn(worker.run());
        let join = tokio::spawn(watch_task(task, abort_reports, generation));
        AcquisitionHandle { cancel, join, generation }
    }

    async fn run(self) -> LoopExit {
        let generation = self.generation;
        info!(generation, "Acquisition loop started");

        let mut last_ok = Instant::now();
        let mut stale_warning = LogThrottle::new(STALE_WARNING_PERIOD);
        let mut frames = 0u64;

        let exit = loop {
            if self.cancel.is_cancelled() {
                break LoopExit::Cancelled;
            }

            let (result, params) = {
                let mut slot = self.slot.lock().await;
                let params = slot.params.clone();
                let Some(session) = slot.session.as_mut() else {
                    warn!(generation, "Session closed under running loop");
                    break LoopExit::SessionClosed;
                };
                (session.next_frame().await, params)
            };

            match result {
                Ok(frame) => {
                    last_ok = Instant::now();
                    frames += 1;
                    if let Err(e) = self.publish(&frame, &params, &mut stale_warning) {
                        error!(generation, frame_count = frame.frame_count, "Bad frame: {}", e);
                        self.report(NodeError::stream("frame could not be decoded", Some(e)));
                        break LoopExit::Failed;
                    }
                }
                Err(e) if e.is_retryable() => {
                    let is_timeout = matches!(e, DeviceError::Timeout { .. });
                    if is_timeout {
                        self.stats.timeouts.fetch_add(1, Ordering::Relaxed);
                    }
                    let elapsed = last_ok.elapsed();
                    if elapsed > params.timeout_tolerance() {
                        error!(
                            generation,
                            elapsed_ms = elapsed.as_millis() as u64,
                            "No frame within tolerance: {}",
                            e
                        );
                        self.report(NodeError::stream(
                            format!("no frame for {:?}", elapsed),
                            Some(e),
                        ));
                        break LoopExit::Failed;
                    }
                    warn!(generation, elapsed_ms = elapsed.as_millis() as u64, "{}", e);
                    if !is_timeout {
                        // Errors that return immediately would otherwise spin
                        tokio::time::sleep(params.timeout()).await;
                    }
                }
                Err(e) => {
                    error!(generation, "Device error: {}", e);
                    self.report(NodeError::stream("device failed while streaming", Some(e)));
                    break LoopExit::Failed;
                }
            }
        };

        info!(generation, frames, ?exit, "Acquisition loop stopped");
        exit
    }

    fn publish(
        &self,
        frame: &Frame,
        params: &RuntimeParameters,
        stale_warning: &mut LogThrottle,
    ) -> Result<(), DeviceError> {
        self.stats.frames.fetch_add(1, Ordering::Relaxed);

        // Device clock ahead of ours counts as fresh
        let latency = SystemTime::now().duration_since(frame.timestamp).unwrap_or(Duration::ZERO);
        if latency > params.frame_latency_threshold() {
            self.stats.stale_frames.fetch_add(1, Ordering::Relaxed);
            if stale_warning.ready() {
                warn!(
                    generation = self.generation,
                    latency_ms = latency.as_millis() as u64,
                    threshold_ms = params.frame_latency_threshold().as_millis() as u64,
                    "Frame is stale"
                );
            }
        }

        let messages = frame_to_messages(frame, &FrameIds::from_parameters(params))?;
        let count = messages.len() as u64;
        for message in messages {
            self.transport.publish(message);
        }
        self.stats.messages.fetch_add(count, Ordering::Relaxed);
        trace!(frame_count = frame.frame_count, count, "Frame published");
        Ok(())
    }

    fn report(&self, error: NodeError) {
        if self.failures.send(LoopFailure { generation: self.generation, error }).is_err() {
            debug!(generation = self.generation, "No supervisor for loop failure");
        }
    }
}

/// Await the loop task and turn a panic into a failure report, so the node
/// leaves `Active` even when the loop could not report for itself.
async fn watch_task(
    task: JoinHandle<LoopExit>,
    failures: mpsc::UnboundedSender<LoopFailure>,
    generation: u64,
) -> LoopExit {
    match task.await {
        Ok(exit) => exit,
        Err(e) => {
            error!(generation, "Acquisition task aborted: {}", e);
            let error = NodeError::stream(format!("acquisition task aborted: {}", e), None);
            if failures.send(LoopFailure { generation, error }).is_err() {
                debug!(generation, "No supervisor for loop failure");
            }
            LoopExit::Failed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::SimulatedCamera;
    use crate::session::SessionOptions;
    use crate::test_utils::CrashingCamera;
    use crate::transport::ChannelTransport;

    struct Fixture {
        camera: SimulatedCamera,
        slot: SharedSlot,
        transport: Arc<ChannelTransport>,
        stats: Arc<LoopStats>,
        failures_tx: mpsc::UnboundedSender<LoopFailure>,
        failures_rx: mpsc::UnboundedReceiver<LoopFailure>,
    }

    async fn fixture(params: RuntimeParameters) -> Fixture {
        let camera = SimulatedCamera::default();
        let session =
            Session::open(&camera, params.identity(), SessionOptions::from_parameters(&params))
                .await
                .unwrap();
        let slot = Arc::new(Mutex::new(SessionSlot { session: Some(session), params }));
        let transport = Arc::new(ChannelTransport::default());
        transport.activate();
        let (failures_tx, failures_rx) = mpsc::unbounded_channel();
        Fixture {
            camera,
            slot,
            transport,
            stats: Arc::new(LoopStats::default()),
            failures_tx,
            failures_rx,
        }
    }

    fn spawn(f: &Fixture, generation: u64) -> AcquisitionHandle {
        AcquisitionLoop::spawn(
            Arc::clone(&f.slot),
            Arc::clone(&f.transport) as Arc<dyn Transport>,
            f.failures_tx.clone(),
            Arc::clone(&f.stats),
            generation,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn publishes_until_cancelled() {
        let mut f = fixture(RuntimeParameters::for_node("camera")).await;
        let mut rx = f.transport.subscribe();
        let handle = spawn(&f, 1);

        let first = rx.recv().await.unwrap();
        assert_eq!(first.header().frame_id, "camera_optical_link");

        tokio::time::sleep(Duration::from_millis(500)).await;
        handle.cancel();
        assert_eq!(handle.join().await, LoopExit::Cancelled);
        assert!(f.stats.frames() > 1);
        // distance, amplitude, raw amplitude, cloud, confidence, extrinsics
        assert_eq!(f.stats.messages(), f.stats.frames() * 6);
        assert!(f.failures_rx.try_recv().is_err());
        assert!(f.slot.lock().await.session.is_some());
        assert_eq!(f.camera.open_sessions(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn sustained_timeouts_report_stream_failure() {
        let mut params = RuntimeParameters::for_node("camera");
        params.timeout_millis = 100;
        params.timeout_tolerance_secs = 1.0;
        let mut f = fixture(params).await;
        f.camera.set_stalled(true);

        let start = Instant::now();
        let handle = spawn(&f, 7);
        let failure = f.failures_rx.recv().await.unwrap();
        assert_eq!(failure.generation, 7);
        assert!(matches!(failure.error, NodeError::Stream { .. }));
        assert!(start.elapsed() > Duration::from_secs(1));
        assert!(start.elapsed() < Duration::from_millis(1300));
        assert_eq!(handle.join().await, LoopExit::Failed);
        assert!(f.stats.timeouts() >= 10);
    }

    #[tokio::test(start_paused = true)]
    async fn short_stall_recovers() {
        let mut params = RuntimeParameters::for_node("camera");
        params.timeout_millis = 100;
        params.timeout_tolerance_secs = 2.0;
        let mut f = fixture(params).await;
        f.camera.set_stalled(true);
        let handle = spawn(&f, 1);

        tokio::time::sleep(Duration::from_millis(1500)).await;
        f.camera.set_stalled(false);
        tokio::time::sleep(Duration::from_millis(1500)).await;

        assert!(f.failures_rx.try_recv().is_err());
        assert!(f.stats.frames() > 0);
        handle.cancel();
        assert_eq!(handle.join().await, LoopExit::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn decode_failure_reports_immediately() {
        let mut f = fixture(RuntimeParameters::for_node("camera")).await;
        f.camera.inject_fault(DeviceError::decode("truncated chunk"));
        let handle = spawn(&f, 3);

        let failure = f.failures_rx.recv().await.unwrap();
        assert_eq!(failure.generation, 3);
        let source = std::error::Error::source(&failure.error).unwrap();
        assert!(source.to_string().contains("truncated chunk"));
        assert_eq!(handle.join().await, LoopExit::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_loop_is_reported() {
        let params = RuntimeParameters::for_node("camera");
        let camera = CrashingCamera { camera: SimulatedCamera::default(), frames: 2 };
        let session =
            Session::open(&camera, params.identity(), SessionOptions::from_parameters(&params))
                .await
                .unwrap();
        let slot = Arc::new(Mutex::new(SessionSlot { session: Some(session), params }));
        let stats = Arc::new(LoopStats::default());
        let (failures_tx, mut failures_rx) = mpsc::unbounded_channel();
        let handle = AcquisitionLoop::spawn(
            Arc::clone(&slot),
            Arc::new(ChannelTransport::default()),
            failures_tx,
            Arc::clone(&stats),
            4,
        );

        let failure = failures_rx.recv().await.unwrap();
        assert_eq!(failure.generation, 4);
        assert!(matches!(failure.error, NodeError::Stream { .. }));
        assert_eq!(handle.join().await, LoopExit::Failed);
        assert_eq!(stats.frames(), 2);
        // The unwinding task released the session lock
        assert!(slot.lock().await.session.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn stale_frames_are_counted_and_published() {
        let mut params = RuntimeParameters::for_node("camera");
        params.frame_latency_thresh = 0.5;
        let f = fixture(params).await;
        f.camera.set_latency(Duration::from_secs(2));
        let handle = spawn(&f, 1);

        tokio::time::sleep(Duration::from_millis(300)).await;
        handle.cancel();
        handle.join().await;
        assert!(f.stats.stale_frames() > 0);
        assert_eq!(f.stats.stale_frames(), f.stats.frames());
        assert!(f.transport.published() > 0);
    }

    #[tokio::test]
    async fn missing_session_ends_loop() {
        let f = fixture(RuntimeParameters::for_node("camera")).await;
        if let Some(mut session) = f.slot.lock().await.session.take() {
            session.close().await;
        }
        let handle = spawn(&f, 1);
        assert_eq!(handle.join().await, LoopExit::SessionClosed);
    }
}
