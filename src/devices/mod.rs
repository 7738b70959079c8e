//! Camera backends implementing the [`device`](crate::device) traits

pub mod simulated;

pub use simulated::{SimulatedCamera, SimulatedConfig};
