//! Core types for frame data representation.
//!
//! This module provides the data structures shared by the device layer, the
//! acquisition loop and the message conversion:
//! - [`SchemaMask`] is the legacy bitmask selecting data products, and
//!   [`translate`] maps it to a [`BufferList`]
//! - [`BufferId`] names one logical data product independent of the camera SDK
//! - [`Frame`] is a decoded frame holding one [`Buffer`] per delivered product
//! - [`PixelFormat`] describes buffer element types
//!
//! ## Usage Example
//!
//! ```rust
//! use tofcam::types::{BufferId, SchemaMask, translate};
//!
//! let list = translate(SchemaMask::new(0b1001));
//! assert_eq!(list.as_slice(), &[BufferId::RadialDistanceImage, BufferId::Xyz]);
//! ```

mod buffer_id;
mod frame;
mod pixel_format;
mod schema_mask;

// Re-export all public types
pub use buffer_id::BufferId;
pub use frame::{Buffer, Frame};
pub use pixel_format::PixelFormat;
pub use schema_mask::{BufferList, SchemaMask, bits, translate};
