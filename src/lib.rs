//! UVC-Capture: V4L2 capture sessions with explicit buffer handoff.
//!
//! This library discovers V4L2 capture devices, runs memory-mapped streaming
//! sessions in which every buffer is owned either by the driver or by the
//! application, and converts raw YUYV and Y8I frames into packed RGB.
//! The device surface sits behind the [`CameraDevice`] trait, enabling both
//! production use with real hardware and testing with mock devices.

pub mod config;
pub mod convert;
pub mod device;
pub mod discovery;
pub mod error;
pub mod logging;
pub mod session;
pub mod traits;
pub mod validation;

#[cfg(test)]
pub mod mock;

pub use config::Config;
pub use device::V4L2Device;
pub use discovery::{enumerate, select_mode, Discovery};
pub use error::{CaptureError, ConvertError, Result};
pub use session::{CaptureSession, Frame, SessionState, DEFAULT_ACQUIRE_TIMEOUT, STREAM_BUFFERS};
pub use traits::{
    CameraDevice, DeviceCapabilities, Format, FourCC, FrameMetadata, ModeDescriptor, ModeRequest,
    PixelFormat,
};
