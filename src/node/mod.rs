//! Lifecycle controller for one camera.
//!
//! [`CameraNode`] owns the device session and the acquisition loop and moves
//! between [`State`]s on command:
//!
//! ```text
//!                configure             activate
//! Unconfigured ───────────▶ Inactive ───────────▶ Active
//!      ▲        cleanup        │  ▲   deactivate    │
//!      └───────────────────────┘  └─────────────────┘
//!
//! any live state ──error──▶ ErrorProcessing ──configure──▶ Inactive
//! any live state ──shutdown──▶ Finalized
//! ```
//!
//! Two locks coordinate the work:
//!
//! - the **session lock** guards the session and the parameters. The loop takes
//!   it once per frame, endpoints take it per request.
//! - the **transition lock** serializes transitions, parameter restarts and
//!   loop failure handling. Endpoints never take it.
//!
//! Lock order is always transition lock, then session lock.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use tofcam::devices::SimulatedCamera;
//! use tofcam::node::{CameraNode, State};
//! use tofcam::transport::ChannelTransport;
//!
//! # #[tokio::main]
//! # async fn main() -> tofcam::Result<()> {
//! let camera = SimulatedCamera::default();
//! let transport = Arc::new(ChannelTransport::default());
//! let node = CameraNode::new("camera", &[], Arc::new(camera), transport)?;
//!
//! node.configure().await?;
//! node.activate().await?;
//! assert_eq!(node.state(), State::Active);
//!
//! node.shutdown().await?;
//! # Ok(())
//! # }
//! ```

mod services;
mod state;
#[cfg(test)]
mod tests;

pub use services::{
    CommandResponse, ConfigRequest, ConfigResponse, DumpResponse, STATUS_NO_SESSION, STATUS_OK,
    SoftoffResponse, SoftonResponse,
};
pub use state::{State, Transition};

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::{Mutex, mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::acquisition::{
    AcquisitionHandle, AcquisitionLoop, LoopExit, LoopFailure, LoopStats, SessionSlot, SharedSlot,
};
use crate::device::Connector;
use crate::params::{
    Field, Parameter, Rejection, RuntimeParameters, load_parameter_file, reconcile,
};
use crate::session::{Session, SessionOptions};
use crate::transport::Transport;
use crate::{NodeError, Result};

/// Outcome of [`CameraNode::set_parameters`].
#[derive(Debug, Clone, PartialEq)]
pub struct SetParametersResult {
    /// Every entry accepted and any required restart succeeded
    pub successful: bool,
    /// Why the request was not fully successful, empty otherwise
    pub reason: String,
    /// Entries that failed validation
    pub rejected: Vec<Rejection>,
    /// Fields whose value changed
    pub changed: Vec<Field>,
    /// Whether the session was recreated
    pub restarted: bool,
}

/// A lifecycle-managed camera node.
///
/// Cheap to clone; clones share one node. Dropping the last clone stops the
/// acquisition loop and closes the session on a background task; call
/// [`CameraNode::shutdown`] to wait for the release instead.
#[derive(Clone)]
pub struct CameraNode {
    inner: Arc<NodeInner>,
}

impl std::fmt::Debug for CameraNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CameraNode")
            .field("name", &self.inner.name)
            .field("state", &self.state())
            .field("has_session", &self.has_session())
            .finish()
    }
}

struct Control {
    worker: Option<AcquisitionHandle>,
    generation: u64,
}

struct NodeInner {
    name: String,
    connector: Arc<dyn Connector>,
    transport: Arc<dyn Transport>,
    slot: SharedSlot,
    control: Mutex<Control>,
    state: watch::Sender<State>,
    session_open: AtomicBool,
    failures: mpsc::UnboundedSender<LoopFailure>,
    stats: Arc<LoopStats>,
}

impl CameraNode {
    /// Create an unconfigured node.
    ///
    /// `overrides` are validated against the defaults; the first invalid entry
    /// fails construction with [`NodeError::Config`].
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime, as the failure supervisor is
    /// spawned here.
    pub fn new(
        name: impl Into<String>,
        overrides: &[Parameter],
        connector: Arc<dyn Connector>,
        transport: Arc<dyn Transport>,
    ) -> Result<Self> {
        let name = name.into();
        let params = reconcile(&RuntimeParameters::for_node(&name), overrides).into_result()?;

        let (failures, failures_rx) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(State::Unconfigured);
        let inner = Arc::new(NodeInner {
            name,
            connector,
            transport,
            slot: Arc::new(Mutex::new(SessionSlot::new(params))),
            control: Mutex::new(Control { worker: None, generation: 0 }),
            state,
            session_open: AtomicBool::new(false),
            failures,
            stats: Arc::new(LoopStats::default()),
        });

        tokio::spawn(supervise(Arc::downgrade(&inner), failures_rx));
        info!(node = %inner.name, "Camera node created");
        Ok(Self { inner })
    }

    /// Create a node with overrides read from a parameter file.
    pub fn from_parameter_file<P: AsRef<Path>>(
        name: impl Into<String>,
        path: P,
        connector: Arc<dyn Connector>,
        transport: Arc<dyn Transport>,
    ) -> Result<Self> {
        let name = name.into();
        let overrides = load_parameter_file(path, &name)?;
        Self::new(name, &overrides, connector, transport)
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Current lifecycle state.
    pub fn state(&self) -> State {
        *self.inner.state.borrow()
    }

    /// Receiver notified on every state change.
    pub fn watch_state(&self) -> watch::Receiver<State> {
        self.inner.state.subscribe()
    }

    /// Whether a device session is open.
    pub fn has_session(&self) -> bool {
        self.inner.session_open.load(Ordering::SeqCst)
    }

    /// Acquisition counters, accumulated over every loop of this node.
    pub fn stats(&self) -> Arc<LoopStats> {
        Arc::clone(&self.inner.stats)
    }

    /// Current parameter values.
    pub async fn parameters(&self) -> RuntimeParameters {
        self.inner.slot.lock().await.params.clone()
    }

    /// Generation of the most recently started acquisition loop, 0 if none.
    pub async fn generation(&self) -> u64 {
        self.inner.control.lock().await.generation
    }

    /// Open a session. `Unconfigured | ErrorProcessing → Inactive`.
    pub async fn configure(&self) -> Result<State> {
        self.trigger(Transition::Configure).await
    }

    /// Start streaming. `Inactive → Active`.
    pub async fn activate(&self) -> Result<State> {
        self.trigger(Transition::Activate).await
    }

    /// Stop streaming. `Active → Inactive`.
    pub async fn deactivate(&self) -> Result<State> {
        self.trigger(Transition::Deactivate).await
    }

    /// Close the session. `Inactive | ErrorProcessing → Unconfigured`.
    pub async fn cleanup(&self) -> Result<State> {
        self.trigger(Transition::Cleanup).await
    }

    /// Release everything. Any live state `→ Finalized`.
    pub async fn shutdown(&self) -> Result<State> {
        self.trigger(Transition::Shutdown).await
    }

    /// Run `transition` and return the resulting state.
    ///
    /// Invalid transitions fail with [`NodeError::InvalidTransition`] and change
    /// nothing. A valid transition that fails moves the node to
    /// [`Transition::failure_target`] and returns the cause.
    pub async fn trigger(&self, transition: Transition) -> Result<State> {
        let mut control = self.inner.control.lock().await;
        self.inner.run_transition(&mut control, transition).await
    }

    /// Validate and apply parameter changes.
    ///
    /// Valid entries are applied even when others are rejected. When an
    /// accepted change needs a new session, the transitions leading back to the
    /// current state are run (Active: deactivate, cleanup, configure, activate;
    /// Inactive: cleanup, configure). In other states the change takes effect
    /// on the next configure. A finalized node refuses every change.
    pub async fn set_parameters(&self, request: &[Parameter]) -> SetParametersResult {
        let inner = &self.inner;
        let mut control = inner.control.lock().await;

        if inner.state() == State::Finalized {
            warn!(node = %inner.name, "Parameters changed after shutdown");
            return SetParametersResult {
                successful: false,
                reason: format!("node is {}", State::Finalized),
                rejected: Vec::new(),
                changed: Vec::new(),
                restarted: false,
            };
        }

        let reconciliation = {
            let mut slot = inner.slot.lock().await;
            let reconciliation = reconcile(&slot.params, request);
            slot.params = reconciliation.accepted.clone();
            reconciliation
        };

        let mut result = SetParametersResult {
            successful: reconciliation.is_clean(),
            reason: reconciliation.rejection_summary(),
            rejected: reconciliation.rejected,
            changed: reconciliation.changed,
            restarted: false,
        };
        for rejection in &result.rejected {
            warn!(node = %inner.name, %rejection, "Parameter rejected");
        }
        if result.changed.is_empty() {
            return result;
        }

        let changed: Vec<&str> = result.changed.iter().map(Field::name).collect();
        info!(
            node = %inner.name,
            ?changed,
            restart = reconciliation.requires_restart,
            "Parameters updated"
        );
        if !reconciliation.requires_restart {
            return result;
        }

        let from = *inner.state.borrow();
        let sequence: &[Transition] = match from {
            State::Active => &[
                Transition::Deactivate,
                Transition::Cleanup,
                Transition::Configure,
                Transition::Activate,
            ],
            State::Inactive => &[Transition::Cleanup, Transition::Configure],
            _ => &[],
        };
        if sequence.is_empty() {
            debug!(node = %inner.name, state = %from, "Restart deferred to next configure");
            return result;
        }

        info!(node = %inner.name, state = %from, "Restarting session for new parameters");
        for transition in sequence {
            if let Err(e) = inner.run_transition(&mut control, *transition).await {
                error!(node = %inner.name, %transition, "Restart failed: {}", e);
                result.successful = false;
                if !result.reason.is_empty() {
                    result.reason.push_str("; ");
                }
                result.reason.push_str(&format!("restart failed during {}: {}", transition, e));
                return result;
            }
        }
        result.restarted = true;
        result
    }
}

impl NodeInner {
    fn state(&self) -> State {
        *self.state.borrow()
    }

    fn set_state(&self, state: State) {
        self.state.send_replace(state);
    }

    async fn run_transition(&self, control: &mut Control, transition: Transition) -> Result<State> {
        let from = self.state();
        let Some(target) = transition.target(from) else {
            warn!(node = %self.name, %transition, state = %from, "Invalid transition");
            return Err(NodeError::InvalidTransition { transition, state: from });
        };
        debug!(node = %self.name, %transition, state = %from, "Running transition");

        let outcome = match transition {
            Transition::Configure => self.on_configure().await,
            Transition::Activate => self.on_activate(control).await,
            Transition::Deactivate => self.on_deactivate(control).await,
            Transition::Cleanup => {
                self.close_session().await;
                Ok(())
            }
            Transition::Shutdown | Transition::Error => {
                self.release(control).await;
                Ok(())
            }
        };

        match outcome {
            Ok(()) => {
                self.set_state(target);
                info!(
                    node = %self.name,
                    %transition,
                    from = %from,
                    to = %target,
                    "Transition done"
                );
                Ok(target)
            }
            Err(e) => {
                let failed = transition.failure_target(from);
                if failed == State::ErrorProcessing {
                    self.release(control).await;
                }
                self.set_state(failed);
                error!(
                    node = %self.name,
                    %transition,
                    from = %from,
                    to = %failed,
                    "Transition failed: {}",
                    e
                );
                Err(e)
            }
        }
    }

    async fn on_configure(&self) -> Result<()> {
        let mut slot = self.slot.lock().await;
        if let Some(mut leftover) = slot.session.take() {
            warn!(node = %self.name, "Closing leftover session before configure");
            leftover.close().await;
        }

        let params = slot.params.clone();
        let unknown = params.schema_mask.unknown_bits();
        if unknown != 0 {
            warn!(
                node = %self.name,
                mask = %params.schema_mask,
                unknown = %format!("{:#06x}", unknown),
                "schema_mask has unknown bits, ignoring them"
            );
        }

        let options = SessionOptions::from_parameters(&params);
        if options.buffers.is_empty() {
            warn!(node = %self.name, "schema_mask selects no buffers, nothing will be published");
        }

        let session = Session::open(self.connector.as_ref(), params.identity(), options)
            .await
            .map_err(|source| NodeError::Connect { source })?;
        slot.session = Some(session);
        self.session_open.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn on_activate(&self, control: &mut Control) -> Result<()> {
        if self.slot.lock().await.session.is_none() {
            return Err(NodeError::NoSession);
        }

        control.generation += 1;
        self.transport.activate();
        let worker = AcquisitionLoop::spawn(
            Arc::clone(&self.slot),
            Arc::clone(&self.transport),
            self.failures.clone(),
            Arc::clone(&self.stats),
            control.generation,
        );
        control.worker = Some(worker);
        Ok(())
    }

    async fn on_deactivate(&self, control: &mut Control) -> Result<()> {
        let exit = match control.worker.take() {
            Some(worker) => {
                worker.cancel();
                worker.join().await
            }
            None => LoopExit::Cancelled,
        };
        self.transport.deactivate();

        match exit {
            LoopExit::Cancelled => Ok(()),
            LoopExit::Failed | LoopExit::SessionClosed => {
                Err(NodeError::stream(format!("acquisition loop ended: {:?}", exit), None))
            }
        }
    }

    async fn close_session(&self) {
        let mut slot = self.slot.lock().await;
        if let Some(mut session) = slot.session.take() {
            session.close().await;
        }
        self.session_open.store(false, Ordering::SeqCst);
    }

    /// Stop the loop and close the session. Best effort, never fails.
    async fn release(&self, control: &mut Control) {
        if let Some(worker) = control.worker.take() {
            let generation = worker.generation();
            worker.cancel();
            let exit = worker.join().await;
            debug!(node = %self.name, generation, ?exit, "Acquisition loop released");
        }
        self.transport.deactivate();
        self.close_session().await;
    }

    async fn handle_failure(&self, failure: LoopFailure) {
        let mut control = self.control.lock().await;
        let running = control.worker.as_ref().map(AcquisitionHandle::generation);
        if self.state() != State::Active || running != Some(failure.generation) {
            debug!(
                node = %self.name,
                generation = failure.generation,
                "Ignoring failure of a stopped acquisition loop"
            );
            return;
        }

        error!(node = %self.name, generation = failure.generation, "{}", failure.error);
        for suggestion in failure.error.recovery_suggestions() {
            info!(node = %self.name, "  - {}", suggestion);
        }
        if let Err(e) = self.run_transition(&mut control, Transition::Error).await {
            error!(node = %self.name, "Error transition failed: {}", e);
        }
    }
}

impl Drop for NodeInner {
    fn drop(&mut self) {
        let worker = self.control.get_mut().worker.take();
        if let Some(worker) = &worker {
            worker.cancel();
        }
        self.transport.deactivate();

        // Close the session once the loop has let go of the session lock
        let slot = Arc::clone(&self.slot);
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    if let Some(worker) = worker {
                        worker.join().await;
                    }
                    let session = slot.lock().await.session.take();
                    if let Some(mut session) = session {
                        session.close().await;
                    }
                });
            }
            Err(_) => {
                warn!(node = %self.name, "Dropped outside a runtime, session not closed");
            }
        }
        debug!(node = %self.name, "Camera node dropped");
    }
}

async fn supervise(node: Weak<NodeInner>, mut failures: mpsc::UnboundedReceiver<LoopFailure>) {
    while let Some(failure) = failures.recv().await {
        let Some(inner) = node.upgrade() else { break };
        inner.handle_failure(failure).await;
    }
    debug!("Failure supervisor stopped");
}
