//! In-process simulated camera
//!
//! [`SimulatedCamera`] implements [`Connector`] and produces synthetic frames
//! for every requested buffer. All handles share one state, so a test keeps a
//! clone to inject faults and inspect what the node did with the device.
//!
//! ```rust
//! use tofcam::devices::SimulatedCamera;
//! use tofcam::DeviceError;
//!
//! let camera = SimulatedCamera::default();
//! camera.set_reachable(false);
//! camera.inject_fault(DeviceError::decode("truncated chunk"));
//! assert_eq!(camera.open_sessions(), 0);
//! ```

use serde_json::{Map, Value, json};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, SystemTime};
use tracing::{debug, trace};

use crate::DeviceError;
use crate::device::{CameraIdentity, Connector, Device, FrameGrabber};
use crate::types::{Buffer, BufferId, BufferList, Frame, PixelFormat};

/// Static properties of the simulated camera.
#[derive(Debug, Clone)]
pub struct SimulatedConfig {
    /// Image width in pixels
    pub width: u32,
    /// Image height in pixels
    pub height: u32,
    /// Time between frames
    pub frame_interval: Duration,
    /// Whether the camera has a color imager (JPEG buffer)
    pub has_color: bool,
    /// Required password, empty if none
    pub password: String,
}

impl Default for SimulatedConfig {
    fn default() -> Self {
        Self {
            width: 176,
            height: 132,
            frame_interval: Duration::from_millis(50),
            has_color: false,
            password: String::new(),
        }
    }
}

struct SimState {
    config: SimulatedConfig,

    // Fault injection
    reachable: AtomicBool,
    stalled: AtomicBool,
    reject_buffers: AtomicBool,
    latency_millis: AtomicU64,
    frame_fault: Mutex<Option<DeviceError>>,
    command_fault: Mutex<Option<DeviceError>>,

    // Device state
    streaming: AtomicBool,
    device_config: Mutex<Value>,
    frame_count: AtomicU64,

    // Inspection
    open_sessions: AtomicUsize,
    active_grabbers: AtomicUsize,
    connect_count: AtomicUsize,
    clock_syncs: AtomicUsize,
    disconnects: AtomicUsize,
    requested: Mutex<Option<BufferList>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl SimState {
    fn take_command_fault(&self) -> Result<(), DeviceError> {
        match lock(&self.command_fault).take() {
            Some(fault) => Err(fault),
            None => Ok(()),
        }
    }
}

/// A simulated camera reachable through [`Connector`].
#[derive(Clone)]
pub struct SimulatedCamera {
    state: Arc<SimState>,
}

impl Default for SimulatedCamera {
    fn default() -> Self {
        Self::new(SimulatedConfig::default())
    }
}

impl SimulatedCamera {
    pub fn new(config: SimulatedConfig) -> Self {
        let device_config = json!({
            "Device": {
                "Name": "simulated",
                "ActiveApplication": 1
            },
            "Apps": {
                "1": {
                    "Name": "default",
                    "TriggerMode": 1,
                    "Imager": {
                        "ExposureTime": 1000,
                        "FrameRate": (1.0 / config.frame_interval.as_secs_f64().max(1e-3)),
                        "Type": "under5m_moderate"
                    }
                }
            }
        });

        Self {
            state: Arc::new(SimState {
                config,
                reachable: AtomicBool::new(true),
                stalled: AtomicBool::new(false),
                reject_buffers: AtomicBool::new(false),
                latency_millis: AtomicU64::new(0),
                frame_fault: Mutex::new(None),
                command_fault: Mutex::new(None),
                streaming: AtomicBool::new(true),
                device_config: Mutex::new(device_config),
                frame_count: AtomicU64::new(0),
                open_sessions: AtomicUsize::new(0),
                active_grabbers: AtomicUsize::new(0),
                connect_count: AtomicUsize::new(0),
                clock_syncs: AtomicUsize::new(0),
                disconnects: AtomicUsize::new(0),
                requested: Mutex::new(None),
            }),
        }
    }

    pub fn config(&self) -> &SimulatedConfig {
        &self.state.config
    }

    /// Make the camera (un)reachable for new connections.
    pub fn set_reachable(&self, reachable: bool) {
        self.state.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Stop delivering frames while keeping connections alive.
    pub fn set_stalled(&self, stalled: bool) {
        self.state.stalled.store(stalled, Ordering::SeqCst);
    }

    /// Make frame grabber creation fail with `ConfigRejected`.
    pub fn set_reject_buffers(&self, reject: bool) {
        self.state.reject_buffers.store(reject, Ordering::SeqCst);
    }

    /// Age of every frame's timestamp when it is delivered.
    pub fn set_latency(&self, latency: Duration) {
        self.state.latency_millis.store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    /// Fail the next frame fetch with `error`.
    pub fn inject_fault(&self, error: DeviceError) {
        *lock(&self.state.frame_fault) = Some(error);
    }

    /// Fail the next device command (dump, configure, softon, softoff) with `error`.
    pub fn inject_command_fault(&self, error: DeviceError) {
        *lock(&self.state.command_fault) = Some(error);
    }

    /// Connections that have not been released.
    pub fn open_sessions(&self) -> usize {
        self.state.open_sessions.load(Ordering::SeqCst)
    }

    /// Frame grabbers that have not been stopped.
    pub fn active_grabbers(&self) -> usize {
        self.state.active_grabbers.load(Ordering::SeqCst)
    }

    /// Successful connections since creation.
    pub fn connect_count(&self) -> usize {
        self.state.connect_count.load(Ordering::SeqCst)
    }

    /// Clock synchronizations since creation.
    pub fn clock_syncs(&self) -> usize {
        self.state.clock_syncs.load(Ordering::SeqCst)
    }

    /// Sessions closed through [`Device::disconnect`] rather than dropped.
    pub fn disconnects(&self) -> usize {
        self.state.disconnects.load(Ordering::SeqCst)
    }

    /// Buffer list of the most recent frame grabber.
    pub fn requested_buffers(&self) -> Option<BufferList> {
        lock(&self.state.requested).clone()
    }

    /// Whether the device is in streaming mode (softon).
    pub fn is_streaming(&self) -> bool {
        self.state.streaming.load(Ordering::SeqCst)
    }

    /// Frames delivered since creation.
    pub fn frames_delivered(&self) -> u64 {
        self.state.frame_count.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Connector for SimulatedCamera {
    async fn connect(&self, identity: &CameraIdentity) -> Result<Box<dyn Device>, DeviceError> {
        if !self.state.reachable.load(Ordering::SeqCst) {
            return Err(DeviceError::connect_failed(identity.to_string(), "no route to host"));
        }
        if identity.password != self.state.config.password {
            return Err(DeviceError::config_rejected("invalid password"));
        }

        self.state.connect_count.fetch_add(1, Ordering::SeqCst);
        self.state.open_sessions.fetch_add(1, Ordering::SeqCst);
        debug!(camera = %identity, "Simulated camera connected");

        Ok(Box::new(SimulatedDevice { state: Arc::clone(&self.state), open: true }))
    }
}

struct SimulatedDevice {
    state: Arc<SimState>,
    open: bool,
}

impl SimulatedDevice {
    fn ensure_open(&self) -> Result<(), DeviceError> {
        if self.open { Ok(()) } else { Err(DeviceError::Closed) }
    }

    fn release(&mut self) {
        if self.open {
            self.open = false;
            self.state.open_sessions.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

#[async_trait::async_trait]
impl Device for SimulatedDevice {
    async fn sync_clock(&mut self, now: SystemTime) -> Result<(), DeviceError> {
        self.ensure_open()?;
        self.state.clock_syncs.fetch_add(1, Ordering::SeqCst);
        trace!(?now, "Simulated clock set");
        Ok(())
    }

    async fn frame_grabber(
        &mut self,
        pcic_port: u16,
        buffers: &BufferList,
    ) -> Result<Box<dyn FrameGrabber>, DeviceError> {
        self.ensure_open()?;
        if self.state.reject_buffers.load(Ordering::SeqCst) {
            return Err(DeviceError::config_rejected(format!(
                "buffer list {} not supported",
                buffers
            )));
        }

        *lock(&self.state.requested) = Some(buffers.clone());
        self.state.active_grabbers.fetch_add(1, Ordering::SeqCst);
        debug!(pcic_port, %buffers, "Simulated frame grabber started");

        Ok(Box::new(SimulatedGrabber {
            state: Arc::clone(&self.state),
            buffers: buffers.clone(),
            running: true,
        }))
    }

    async fn dump(&mut self) -> Result<String, DeviceError> {
        self.ensure_open()?;
        self.state.take_command_fault()?;
        let config = lock(&self.state.device_config);
        serde_json::to_string(&*config).map_err(|e| DeviceError::Command {
            command: "dump".to_string(),
            code: -200,
            reason: e.to_string(),
        })
    }

    async fn configure(&mut self, config: &str) -> Result<(), DeviceError> {
        self.ensure_open()?;
        self.state.take_command_fault()?;

        let patch: Value = serde_json::from_str(config)
            .map_err(|e| DeviceError::config_rejected(format!("invalid JSON: {}", e)))?;
        let Value::Object(patch) = patch else {
            return Err(DeviceError::config_rejected("configuration must be a JSON object"));
        };

        let mut current = lock(&self.state.device_config);
        let mut updated = current.clone();
        merge(&mut updated, patch, "")?;
        *current = updated;
        Ok(())
    }

    async fn soft_on(&mut self) -> Result<(), DeviceError> {
        self.ensure_open()?;
        self.state.take_command_fault()?;
        self.state.streaming.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn soft_off(&mut self) -> Result<(), DeviceError> {
        self.ensure_open()?;
        self.state.take_command_fault()?;
        self.state.streaming.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&mut self) {
        if self.open {
            self.state.disconnects.fetch_add(1, Ordering::SeqCst);
        }
        self.release();
    }
}

impl Drop for SimulatedDevice {
    fn drop(&mut self) {
        self.release();
    }
}

/// Merge `patch` into `target`. Only keys that already exist may be set.
fn merge(target: &mut Value, patch: Map<String, Value>, path: &str) -> Result<(), DeviceError> {
    let Value::Object(target) = target else {
        return Err(DeviceError::config_rejected(format!("'{}' is not an object", path)));
    };
    for (key, value) in patch {
        let key_path = if path.is_empty() { key.clone() } else { format!("{}.{}", path, key) };
        let Some(slot) = target.get_mut(&key) else {
            return Err(DeviceError::config_rejected(format!("unknown parameter '{}'", key_path)));
        };
        match value {
            Value::Object(nested) => merge(slot, nested, &key_path)?,
            leaf => {
                if slot.is_object() {
                    return Err(DeviceError::config_rejected(format!(
                        "'{}' expects an object",
                        key_path
                    )));
                }
                *slot = leaf;
            }
        }
    }
    Ok(())
}

struct SimulatedGrabber {
    state: Arc<SimState>,
    buffers: BufferList,
    running: bool,
}

impl SimulatedGrabber {
    fn release(&mut self) {
        if self.running {
            self.running = false;
            self.state.active_grabbers.fetch_sub(1, Ordering::SeqCst);
        }
    }

    fn build_frame(&self) -> Result<Frame, DeviceError> {
        let count = self.state.frame_count.fetch_add(1, Ordering::SeqCst) + 1;
        let latency = Duration::from_millis(self.state.latency_millis.load(Ordering::SeqCst));
        let now = SystemTime::now();
        let timestamp = now.checked_sub(latency).unwrap_or(now);

        let mut frame = Frame::new(timestamp, count);
        for id in self.buffers.iter() {
            if let Some(buffer) = synthesize(&self.state.config, id, count)? {
                frame.insert(id, buffer);
            }
        }
        Ok(frame)
    }
}

#[async_trait::async_trait]
impl FrameGrabber for SimulatedGrabber {
    async fn next_frame(&mut self) -> Result<Frame, DeviceError> {
        if !self.running {
            return Err(DeviceError::Closed);
        }
        loop {
            tokio::time::sleep(self.state.config.frame_interval).await;
            let fault = lock(&self.state.frame_fault).take();
            if let Some(fault) = fault {
                return Err(fault);
            }
            let stalled = self.state.stalled.load(Ordering::SeqCst);
            if !stalled && self.state.streaming.load(Ordering::SeqCst) {
                break;
            }
        }
        let frame = self.build_frame()?;
        trace!(frame_count = frame.frame_count, buffers = frame.buffer_count(), "Frame ready");
        Ok(frame)
    }

    async fn stop(&mut self) {
        self.release();
    }
}

impl Drop for SimulatedGrabber {
    fn drop(&mut self) {
        self.release();
    }
}

const JPEG_STUB: [u8; 6] = [0xff, 0xd8, 0xff, 0xe0, 0xff, 0xd9];

fn synthesize(
    config: &SimulatedConfig,
    id: BufferId,
    count: u64,
) -> Result<Option<Buffer>, DeviceError> {
    let (width, height) = (config.width, config.height);
    let pixels = width as usize * height as usize;
    let wave = |i: usize| ((i as u64 + count) % 100) as f32 / 100.0;

    let buffer = match id {
        BufferId::RadialDistanceImage => {
            let values: Vec<f32> = (0..pixels).map(|i| 1.0 + wave(i)).collect();
            Buffer::from_f32(width, height, 1, &values)?
        }
        BufferId::NormAmplitudeImage => {
            let values: Vec<f32> = (0..pixels).map(wave).collect();
            Buffer::from_f32(width, height, 1, &values)?
        }
        BufferId::AmplitudeImage => {
            let bytes: Vec<u8> =
                (0..pixels).flat_map(|i| ((wave(i) * 4000.0) as u16).to_le_bytes()).collect();
            Buffer::new(width, height, 1, PixelFormat::U16, bytes)?
        }
        BufferId::Xyz => {
            let mut bytes = Vec::with_capacity(pixels * 3 * 2);
            for row in 0..height as i32 {
                for col in 0..width as i32 {
                    let x = ((col - width as i32 / 2) * 5) as i16;
                    let y = ((row - height as i32 / 2) * 5) as i16;
                    let z: i16 = 1000;
                    for v in [x, y, z] {
                        bytes.extend_from_slice(&v.to_le_bytes());
                    }
                }
            }
            Buffer::new(width, height, 3, PixelFormat::I16, bytes)?
        }
        BufferId::ConfidenceImage => {
            Buffer::new(width, height, 1, PixelFormat::U8, vec![0u8; pixels])?
        }
        BufferId::ExtrinsicCalib => Buffer::from_f32(6, 1, 1, &[0.0, 0.0, 0.05, 0.0, 0.0, 0.0])?,
        BufferId::JpegImage if config.has_color => Buffer::blob(JPEG_STUB.to_vec()),
        BufferId::JpegImage => return Ok(None),
    };
    Ok(Some(buffer))
}
