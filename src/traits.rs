//! Core traits and types for V4L2 capture.

use std::fmt;
use std::io;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConvertError;

/// Pixel format tag as reported by V4L2 (e.g., YUYV, Y8I).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FourCC(pub [u8; 4]);

impl FourCC {
    /// Create a new `FourCC` from a 4-byte array.
    #[must_use]
    pub const fn new(code: &[u8; 4]) -> Self {
        Self(*code)
    }

    /// YUYV pixel format (4:2:2 packed), numeric tag 1448695129.
    pub const YUYV: Self = Self::new(b"YUYV");
    /// Y8I pixel format (interleaved 8-bit stereo pair), numeric tag 541669465.
    pub const Y8I: Self = Self::new(b"Y8I ");
    /// MJPEG pixel format (Motion JPEG).
    pub const MJPG: Self = Self::new(b"MJPG");

    /// The numeric tag V4L2 uses for this format.
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        u32::from_le_bytes(self.0)
    }

    /// Build a `FourCC` from its numeric V4L2 tag.
    #[must_use]
    pub const fn from_u32(code: u32) -> Self {
        Self(code.to_le_bytes())
    }

    /// Bytes per pixel on the wire.
    ///
    /// Both recognised encodings carry 2 bytes per pixel. Unknown formats are
    /// assumed to do the same so that they can still be listed.
    #[must_use]
    pub const fn bytes_per_pixel(self) -> u32 {
        2
    }

    /// Whether the pixel converter understands this format.
    #[must_use]
    pub fn is_convertible(self) -> bool {
        PixelFormat::try_from(self).is_ok()
    }
}

impl fmt::Display for FourCC {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = String::from_utf8_lossy(&self.0);
        f.write_str(text.trim_end())
    }
}

impl std::str::FromStr for FourCC {
    type Err = ConvertError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = s.as_bytes();
        if bytes.is_empty() || bytes.len() > 4 {
            return Err(ConvertError::InvalidTag(s.to_owned()));
        }
        let mut code = [b' '; 4];
        code.iter_mut().zip(bytes).for_each(|(dst, src)| *dst = *src);
        Ok(Self(code))
    }
}

impl From<v4l::FourCC> for FourCC {
    fn from(fourcc: v4l::FourCC) -> Self {
        Self(fourcc.repr)
    }
}

impl From<FourCC> for v4l::FourCC {
    fn from(fourcc: FourCC) -> Self {
        Self::new(&fourcc.0)
    }
}

/// Pixel encodings the converter can turn into RGB.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// Packed 4:2:2, `Y0 Cb Y1 Cr` per pixel pair.
    Yuv422,
    /// Two 8-bit grayscale planes interleaved into one 16-bit sample per pixel.
    Y8i,
}

impl PixelFormat {
    /// Output pixels per source row.
    #[must_use]
    pub const fn output_width(self, width: u32) -> u32 {
        match self {
            Self::Yuv422 => width,
            Self::Y8i => width * 2,
        }
    }
}

impl TryFrom<FourCC> for PixelFormat {
    type Error = ConvertError;

    fn try_from(fourcc: FourCC) -> Result<Self, Self::Error> {
        match fourcc {
            FourCC::YUYV => Ok(Self::Yuv422),
            FourCC::Y8I => Ok(Self::Y8i),
            other => Err(ConvertError::UnsupportedFormat(other)),
        }
    }
}

/// Video format specification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Format {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Pixel format.
    pub fourcc: FourCC,
    /// Bytes per line (stride).
    pub stride: u32,
    /// Total frame size in bytes.
    pub size: u32,
}

impl Format {
    /// Create a new format specification.
    #[must_use]
    pub const fn new(width: u32, height: u32, fourcc: FourCC) -> Self {
        // Stepwise maxima from drivers can be huge; clamp instead of wrapping.
        let stride = width.saturating_mul(fourcc.bytes_per_pixel());
        let size = stride.saturating_mul(height);
        Self {
            width,
            height,
            fourcc,
            stride,
            size,
        }
    }
}

/// Device capability flags.
#[derive(Debug, Clone, Default)]
pub struct DeviceCapabilities {
    /// Driver name.
    pub driver: String,
    /// Card/device name.
    pub card: String,
    /// Bus information.
    pub bus_info: String,
    /// Whether the device can capture video.
    pub can_capture: bool,
    /// Whether the device supports streaming.
    pub can_stream: bool,
}

/// One frame size entry advertised for a pixel format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameSize {
    /// A single fixed resolution.
    Discrete {
        /// Width in pixels.
        width: u32,
        /// Height in pixels.
        height: u32,
    },
    /// A range of resolutions.
    Stepwise {
        /// Smallest width.
        min_width: u32,
        /// Largest width.
        max_width: u32,
        /// Smallest height.
        min_height: u32,
        /// Largest height.
        max_height: u32,
    },
}

impl FrameSize {
    /// The resolution used when listing this entry as a mode.
    ///
    /// Stepwise ranges are represented by their maximum.
    #[must_use]
    pub const fn largest(self) -> (u32, u32) {
        match self {
            Self::Discrete { width, height } => (width, height),
            Self::Stepwise {
                max_width,
                max_height,
                ..
            } => (max_width, max_height),
        }
    }
}

/// A pixel format supported by a device together with its frame sizes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatDescription {
    /// Pixel format tag.
    pub fourcc: FourCC,
    /// Human readable description from the driver.
    pub description: String,
    /// Advertised frame sizes; may be empty.
    pub sizes: Vec<FrameSize>,
}

/// A capturable (device, resolution, pixel format) combination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModeDescriptor {
    /// Device node, e.g. `/dev/video0`.
    pub path: PathBuf,
    /// Human readable device name. Not unique.
    pub name: String,
    /// Pixel format tag.
    pub fourcc: FourCC,
    /// Short format description.
    pub description: String,
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Bytes per pixel on the wire.
    pub bytes_per_pixel: u32,
}

impl ModeDescriptor {
    /// Build a descriptor, deriving bytes per pixel from the format.
    #[must_use]
    pub fn new<P, N>(path: P, name: N, fourcc: FourCC, width: u32, height: u32) -> Self
    where
        P: Into<PathBuf>,
        N: Into<String>,
    {
        Self {
            path: path.into(),
            name: name.into(),
            fourcc,
            description: String::new(),
            width,
            height,
            bytes_per_pixel: fourcc.bytes_per_pixel(),
        }
    }

    /// Attach the driver's format description.
    #[must_use]
    pub fn with_description<S: Into<String>>(mut self, description: S) -> Self {
        self.description = description.into();
        self
    }

    /// Whether this mode fulfils `request`.
    ///
    /// The device name only has to contain the requested name (case-sensitive);
    /// resolution and pixel format must match exactly.
    #[must_use]
    pub fn satisfies(&self, request: &ModeRequest) -> bool {
        self.name.contains(&request.name)
            && self.width == request.width
            && self.height == request.height
            && self.fourcc == request.fourcc
    }

    /// Size in bytes of one raw frame in this mode.
    #[must_use]
    pub fn frame_len(&self) -> usize {
        self.width as usize * self.height as usize * self.bytes_per_pixel as usize
    }

    /// Size in bytes of the RGB buffer a converted frame needs.
    pub fn rgb_len(&self) -> Result<usize, ConvertError> {
        let format = PixelFormat::try_from(self.fourcc)?;
        Ok(format.output_width(self.width) as usize * self.height as usize * 3)
    }

    /// The format to request from the driver for this mode.
    #[must_use]
    pub const fn format(&self) -> Format {
        Format::new(self.width, self.height, self.fourcc)
    }
}

impl fmt::Display for ModeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {} {} x {}",
            self.path.display(),
            self.name,
            self.fourcc.as_u32(),
            self.description,
            self.width,
            self.height
        )
    }
}

/// What the caller is looking for when picking a mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModeRequest {
    /// Substring the device name must contain.
    pub name: String,
    /// Requested width.
    pub width: u32,
    /// Requested height.
    pub height: u32,
    /// Requested pixel format.
    pub fourcc: FourCC,
}

/// Metadata for a captured frame.
#[derive(Debug, Clone, Default)]
pub struct FrameMetadata {
    /// Buffer slot the frame was delivered in.
    pub index: u32,
    /// Frame sequence number.
    pub sequence: u32,
    /// Capture timestamp.
    pub timestamp: Duration,
    /// Actual bytes used in the frame buffer.
    pub bytes_used: u32,
}

/// Abstraction over the kernel capture surface of one open device.
///
/// Buffer indices always refer to the pool created by the last
/// [`request_buffers`](Self::request_buffers) call. Raw calls report plain
/// I/O errors so callers can tell transient conditions
/// ([`io::ErrorKind::Interrupted`], [`io::ErrorKind::WouldBlock`]) apart.
pub trait CameraDevice {
    /// A buffer mapped into process memory.
    type Mapping: AsRef<[u8]>;

    /// Get device capabilities.
    fn capabilities(&self) -> &DeviceCapabilities;

    /// List supported capture formats and their frame sizes.
    fn formats(&self) -> io::Result<Vec<FormatDescription>>;

    /// Reset cropping to the default rectangle.
    fn reset_crop(&mut self) -> io::Result<()>;

    /// Set capture format. Returns the actual format set by the driver.
    fn set_format(&mut self, format: &Format) -> io::Result<Format>;

    /// Ask for `count` mmap buffers. Returns how many the driver granted.
    fn request_buffers(&mut self, count: u32) -> io::Result<u32>;

    /// Map buffer `index` into process memory.
    fn map_buffer(&mut self, index: u32) -> io::Result<Self::Mapping>;

    /// Release a mapping obtained from [`map_buffer`](Self::map_buffer).
    fn unmap_buffer(&mut self, mapping: Self::Mapping) -> io::Result<()>;

    /// Hand buffer `index` to the driver.
    fn enqueue(&mut self, index: u32) -> io::Result<()>;

    /// Block until a filled buffer can be dequeued. `Ok(false)` on timeout.
    fn wait_ready(&mut self, timeout: Duration) -> io::Result<bool>;

    /// Take the next filled buffer back from the driver.
    fn dequeue(&mut self) -> io::Result<FrameMetadata>;

    /// Start streaming into the queued buffers.
    fn stream_on(&mut self) -> io::Result<()>;

    /// Stop streaming. The driver drops every queued buffer.
    fn stream_off(&mut self) -> io::Result<()>;
}
