//! Mock device implementation for testing without hardware.
//!
//! The mock keeps a simulated driver queue: enqueued buffers are "filled"
//! immediately and become ready in FIFO order unless the device is stalled.

use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::traits::{
    CameraDevice, DeviceCapabilities, Format, FormatDescription, FourCC, FrameMetadata, FrameSize,
};

/// Mock device for testing without hardware.
pub struct MockDevice {
    capabilities: DeviceCapabilities,
    format: Format,
    formats: Vec<FormatDescription>,
    formats_fail: bool,
    pattern: TestPattern,
    max_size: Option<(u32, u32)>,
    crop_supported: bool,
    granted: Option<u32>,
    map_failure_at: Option<u32>,
    stream_on_fails: bool,
    stalled: bool,
    interrupted_waits: u32,
    would_block_dequeues: u32,
    bogus_index: Option<u32>,
    pool: u32,
    live_mappings: Arc<AtomicUsize>,
    queue: VecDeque<u32>,
    streaming: bool,
    frame_count: u32,
}

impl Default for MockDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl MockDevice {
    /// Create a new mock device with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self {
            capabilities: DeviceCapabilities {
                driver: "mock".to_owned(),
                card: "Mock Camera".to_owned(),
                bus_info: "mock:0".to_owned(),
                can_capture: true,
                can_stream: true,
            },
            format: Format::new(640, 480, FourCC::YUYV),
            formats: vec![
                FormatDescription {
                    fourcc: FourCC::YUYV,
                    description: "YUYV 4:2:2".to_owned(),
                    sizes: vec![
                        FrameSize::Discrete {
                            width: 640,
                            height: 480,
                        },
                        FrameSize::Stepwise {
                            min_width: 16,
                            max_width: 1280,
                            min_height: 16,
                            max_height: 720,
                        },
                    ],
                },
                FormatDescription {
                    fourcc: FourCC::Y8I,
                    description: "Greyscale 8-bit stereo".to_owned(),
                    sizes: vec![FrameSize::Discrete {
                        width: 640,
                        height: 480,
                    }],
                },
            ],
            formats_fail: false,
            pattern: TestPattern::ColorBars,
            max_size: None,
            crop_supported: true,
            granted: None,
            map_failure_at: None,
            stream_on_fails: false,
            stalled: false,
            interrupted_waits: 0,
            would_block_dequeues: 0,
            bogus_index: None,
            pool: 0,
            live_mappings: Arc::new(AtomicUsize::new(0)),
            queue: VecDeque::new(),
            streaming: false,
            frame_count: 0,
        }
    }

    /// Set the capabilities for this mock device.
    #[must_use]
    pub fn with_capabilities(mut self, capabilities: DeviceCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Replace the advertised formats.
    #[must_use]
    pub fn with_formats(mut self, formats: Vec<FormatDescription>) -> Self {
        self.formats = formats;
        self
    }

    /// Advertise only `fourccs`, each at 640x480.
    #[must_use]
    pub fn with_supported_formats(self, fourccs: Vec<FourCC>) -> Self {
        let formats = fourccs
            .into_iter()
            .map(|fourcc| FormatDescription {
                fourcc,
                description: fourcc.to_string(),
                sizes: vec![FrameSize::Discrete {
                    width: 640,
                    height: 480,
                }],
            })
            .collect();
        self.with_formats(formats)
    }

    /// Make format enumeration fail.
    #[must_use]
    pub const fn with_failing_formats(mut self) -> Self {
        self.formats_fail = true;
        self
    }

    /// Set the test pattern buffers are filled with.
    #[must_use]
    pub const fn with_pattern(mut self, pattern: TestPattern) -> Self {
        self.pattern = pattern;
        self
    }

    /// Clamp negotiated resolutions to `width` x `height`.
    #[must_use]
    pub const fn with_max_size(mut self, width: u32, height: u32) -> Self {
        self.max_size = Some((width, height));
        self
    }

    /// Reject crop requests.
    #[must_use]
    pub const fn without_crop(mut self) -> Self {
        self.crop_supported = false;
        self
    }

    /// Grant `count` buffers regardless of the request.
    #[must_use]
    pub const fn with_granted_buffers(mut self, count: u32) -> Self {
        self.granted = Some(count);
        self
    }

    /// Fail to map buffer `index`.
    #[must_use]
    pub const fn with_map_failure_at(mut self, index: u32) -> Self {
        self.map_failure_at = Some(index);
        self
    }

    /// Make stream on fail.
    #[must_use]
    pub const fn with_stream_on_failure(mut self) -> Self {
        self.stream_on_fails = true;
        self
    }

    /// Never fill any buffer.
    #[must_use]
    pub const fn stalled(mut self) -> Self {
        self.stalled = true;
        self
    }

    /// Interrupt the next `count` waits with `EINTR`.
    #[must_use]
    pub const fn with_interrupted_waits(mut self, count: u32) -> Self {
        self.interrupted_waits = count;
        self
    }

    /// Fail the next `count` dequeues with `EAGAIN`.
    #[must_use]
    pub const fn with_would_block_dequeues(mut self, count: u32) -> Self {
        self.would_block_dequeues = count;
        self
    }

    /// Report `index` on the next dequeue.
    #[must_use]
    pub const fn with_bogus_index(mut self, index: u32) -> Self {
        self.bogus_index = Some(index);
        self
    }

    /// Counter of buffers currently mapped; stays valid after the device is dropped.
    pub fn live_mappings(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.live_mappings)
    }

    /// Number of buffers in the driver queue.
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Whether buffer `index` is in the driver queue.
    pub fn is_queued(&self, index: u32) -> bool {
        self.queue.contains(&index)
    }

    /// Whether the device is streaming.
    pub const fn is_streaming(&self) -> bool {
        self.streaming
    }

    /// Number of frames delivered so far.
    pub const fn frame_count(&self) -> u32 {
        self.frame_count
    }

    fn supports(&self, fourcc: FourCC) -> bool {
        self.formats.iter().any(|format| format.fourcc == fourcc)
    }
}

impl CameraDevice for MockDevice {
    type Mapping = Vec<u8>;

    fn capabilities(&self) -> &DeviceCapabilities {
        &self.capabilities
    }

    fn formats(&self) -> io::Result<Vec<FormatDescription>> {
        if self.formats_fail {
            return Err(io::Error::other("VIDIOC_ENUM_FMT failed"));
        }
        Ok(self.formats.clone())
    }

    fn reset_crop(&mut self) -> io::Result<()> {
        if self.crop_supported {
            Ok(())
        } else {
            Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "cropping not supported",
            ))
        }
    }

    fn set_format(&mut self, format: &Format) -> io::Result<Format> {
        let fourcc = if self.supports(format.fourcc) {
            format.fourcc
        } else {
            self.formats
                .first()
                .map_or(format.fourcc, |supported| supported.fourcc)
        };
        let (width, height) = self.max_size.map_or((format.width, format.height), |(w, h)| {
            (format.width.min(w), format.height.min(h))
        });
        self.format = Format::new(width, height, fourcc);
        Ok(self.format.clone())
    }

    fn request_buffers(&mut self, count: u32) -> io::Result<u32> {
        self.pool = self.granted.unwrap_or(count);
        Ok(self.pool)
    }

    fn map_buffer(&mut self, index: u32) -> io::Result<Self::Mapping> {
        if index >= self.pool {
            return Err(io::Error::from(io::ErrorKind::InvalidInput));
        }
        if self.map_failure_at == Some(index) {
            return Err(io::Error::from(io::ErrorKind::OutOfMemory));
        }
        self.live_mappings.fetch_add(1, Ordering::SeqCst);
        Ok(generate_test_frame(&self.format, self.pattern))
    }

    fn unmap_buffer(&mut self, _mapping: Self::Mapping) -> io::Result<()> {
        self.live_mappings.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }

    fn enqueue(&mut self, index: u32) -> io::Result<()> {
        if index >= self.pool || self.queue.contains(&index) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("buffer {index} cannot be queued"),
            ));
        }
        self.queue.push_back(index);
        Ok(())
    }

    fn wait_ready(&mut self, timeout: Duration) -> io::Result<bool> {
        if !self.streaming {
            return Err(io::Error::other("not streaming"));
        }
        if self.interrupted_waits > 0 {
            self.interrupted_waits -= 1;
            return Err(io::Error::from(io::ErrorKind::Interrupted));
        }
        if self.stalled || (self.queue.is_empty() && self.bogus_index.is_none()) {
            std::thread::sleep(timeout);
            return Ok(false);
        }
        Ok(true)
    }

    fn dequeue(&mut self) -> io::Result<FrameMetadata> {
        if self.would_block_dequeues > 0 {
            self.would_block_dequeues -= 1;
            return Err(io::Error::from(io::ErrorKind::WouldBlock));
        }
        let index = match self.bogus_index.take() {
            Some(index) => index,
            None => self
                .queue
                .pop_front()
                .ok_or_else(|| io::Error::from(io::ErrorKind::WouldBlock))?,
        };

        let sequence = self.frame_count;
        self.frame_count += 1;

        Ok(FrameMetadata {
            index,
            sequence,
            timestamp: Duration::from_millis(u64::from(sequence) * 33), // ~30fps
            bytes_used: self.format.size,
        })
    }

    fn stream_on(&mut self) -> io::Result<()> {
        if self.stream_on_fails {
            return Err(io::Error::other("VIDIOC_STREAMON failed"));
        }
        self.streaming = true;
        Ok(())
    }

    fn stream_off(&mut self) -> io::Result<()> {
        self.streaming = false;
        self.queue.clear();
        Ok(())
    }
}

/// Test pattern types for mock frame generation.
#[derive(Debug, Clone, Copy)]
pub enum TestPattern {
    /// SMPTE color bars pattern.
    ColorBars,
    /// Horizontal gradient from dark to light.
    Gradient,
    /// Solid color with specified Y, U, V values.
    Solid(u8, u8, u8),
}

/// Generate test frame data based on pattern.
fn generate_test_frame(format: &Format, pattern: TestPattern) -> Vec<u8> {
    let size = (format.width * format.height * 2) as usize; // YUYV = 2 bytes/pixel
    let mut data = vec![0u8; size];

    match pattern {
        TestPattern::ColorBars => {
            generate_color_bars(&mut data, format.width, format.height);
        }
        TestPattern::Gradient => {
            generate_gradient(&mut data, format.width, format.height);
        }
        TestPattern::Solid(y, u, v) => {
            generate_solid(&mut data, y, u, v);
        }
    }

    data
}

/// Generate YUYV color bars pattern.
fn generate_color_bars(data: &mut [u8], width: u32, height: u32) {
    // White, Yellow, Cyan, Green, Magenta, Red, Blue, Black
    let bars: [(u8, u8, u8); 8] = [
        (235, 128, 128),
        (210, 16, 146),
        (170, 166, 16),
        (145, 54, 34),
        (106, 202, 222),
        (81, 90, 240),
        (41, 240, 110),
        (16, 128, 128),
    ];

    let bar_width = (width / 8).max(1);

    for y in 0..height {
        for x in (0..width).step_by(2) {
            let bar_idx = (x / bar_width).min(7) as usize;
            let (y_val, u_val, v_val) = bars[bar_idx];

            let offset = ((y * width + x) * 2) as usize;
            if offset + 3 < data.len() {
                data[offset..offset + 4].copy_from_slice(&[y_val, u_val, y_val, v_val]);
            }
        }
    }
}

/// Generate YUYV horizontal gradient pattern.
fn generate_gradient(data: &mut [u8], width: u32, height: u32) {
    for y in 0..height {
        for x in (0..width).step_by(2) {
            #[allow(clippy::cast_possible_truncation)]
            let y_val = ((x * 255) / width) as u8;
            let offset = ((y * width + x) * 2) as usize;

            if offset + 3 < data.len() {
                data[offset..offset + 4].copy_from_slice(&[y_val, 128, y_val, 128]);
            }
        }
    }
}

/// Generate solid color YUYV frame.
fn generate_solid(data: &mut [u8], y: u8, u: u8, v: u8) {
    for quad in data.chunks_exact_mut(4) {
        quad.copy_from_slice(&[y, u, y, v]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_device_creation() {
        let device = MockDevice::new();
        assert_eq!(device.capabilities().driver, "mock");
        assert!(device.capabilities().can_capture);
        assert!(device.capabilities().can_stream);
    }

    #[test]
    fn test_mock_device_format() {
        let mut device = MockDevice::new();
        assert_eq!(device.format, Format::new(640, 480, FourCC::YUYV));

        let new_format = Format::new(1280, 720, FourCC::YUYV);
        let actual = device.set_format(&new_format).expect("set_format should succeed");
        assert_eq!(actual.width, 1280);
        assert_eq!(actual.height, 720);
    }

    #[test]
    fn test_mock_queue_is_fifo_and_rejects_double_queue() {
        let mut device = MockDevice::new();
        assert_eq!(device.request_buffers(3).expect("request"), 3);
        device.enqueue(2).expect("enqueue 2");
        device.enqueue(0).expect("enqueue 0");
        assert!(device.enqueue(2).is_err());
        assert!(device.enqueue(3).is_err());

        device.stream_on().expect("stream on");
        assert!(device.wait_ready(Duration::ZERO).expect("wait"));
        assert_eq!(device.dequeue().expect("dequeue").index, 2);
        assert_eq!(device.dequeue().expect("dequeue").index, 0);
        assert_eq!(device.frame_count(), 2);
    }

    #[test]
    fn test_color_bars_pattern() {
        let format = Format::new(640, 480, FourCC::YUYV);
        let data = generate_test_frame(&format, TestPattern::ColorBars);

        // Check frame size
        assert_eq!(data.len(), (640 * 480 * 2) as usize);

        // First bar should be white (Y=235)
        assert_eq!(data[0], 235);
    }

    #[test]
    fn test_gradient_pattern() {
        let format = Format::new(640, 480, FourCC::YUYV);
        let data = generate_test_frame(&format, TestPattern::Gradient);

        // Left edge should be dark
        assert!(data[0] < 10);

        // Right edge should be bright (check last row, last pixel)
        let last_row_start = (479 * 640 * 2) as usize;
        let last_pixel_y = data[last_row_start + 638 * 2];
        assert!(last_pixel_y > 200);
    }

    #[test]
    fn test_solid_pattern() {
        let format = Format::new(64, 64, FourCC::YUYV);
        let data = generate_test_frame(&format, TestPattern::Solid(128, 64, 192));

        assert_eq!(&data[0..4], &[128, 64, 128, 192]);
    }
}
