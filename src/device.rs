//! V4L2 device implementation using the v4l crate.
//!
//! Format negotiation goes through the v4l crate's safe wrappers. The buffer
//! pool is driven with raw ioctls because the session tracks every slot index
//! itself, which the crate's stream types keep private.

#![allow(unsafe_code)]

use std::io;
use std::mem::{self, ManuallyDrop};
use std::os::raw::c_void;
use std::path::Path;
use std::ptr::{self, NonNull};
use std::sync::Arc;
use std::time::Duration;

use v4l::buffer::Type;
use v4l::device::Handle;
use v4l::format::FieldOrder;
use v4l::framesize::FrameSizeEnum;
use v4l::memory::Memory;
use v4l::v4l2;
use v4l::v4l_sys::{v4l2_buffer, v4l2_crop, v4l2_cropcap, v4l2_fmtdesc, v4l2_requestbuffers};
use v4l::video::Capture;
use v4l::Device;

use crate::discovery::MAX_FORMATS;
use crate::error::{CaptureError, Result};
use crate::traits::{
    CameraDevice, DeviceCapabilities, Format, FormatDescription, FourCC, FrameMetadata, FrameSize,
};

/// V4L2 device implementation wrapping the v4l crate.
pub struct V4L2Device {
    device: Device,
    handle: Arc<Handle>,
    capabilities: DeviceCapabilities,
}

impl V4L2Device {
    /// Open the V4L2 device node at `path` in non-blocking mode.
    pub fn open_path(path: &Path) -> Result<Self> {
        let device =
            Device::with_path(path).map_err(|err| CaptureError::device("open device", err))?;

        let caps = device
            .query_caps()
            .map_err(|err| CaptureError::device("query capabilities", err))?;

        let capabilities = DeviceCapabilities {
            driver: caps.driver,
            card: caps.card,
            bus_info: caps.bus,
            can_capture: caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE),
            can_stream: caps.capabilities.contains(v4l::capability::Flags::STREAMING),
        };

        Ok(Self {
            handle: device.handle(),
            device,
            capabilities,
        })
    }

    fn fd(&self) -> i32 {
        self.handle.fd()
    }

    fn query_buffer(&self, index: u32) -> io::Result<v4l2_buffer> {
        let mut buf = capture_buffer();
        buf.index = index;
        let fd = self.fd();
        let argp = ptr::addr_of_mut!(buf).cast::<c_void>();
        retry_interrupted(|| unsafe { v4l2::ioctl(fd, v4l2::vidioc::VIDIOC_QUERYBUF, argp) })?;
        Ok(buf)
    }

    /// Walk `VIDIOC_ENUM_FMT`, stopping after [`MAX_FORMATS`] entries.
    fn format_tags(&self) -> io::Result<Vec<(FourCC, String)>> {
        let fd = self.fd();
        enumerate_indexed(MAX_FORMATS, |index| {
            // SAFETY: v4l2_fmtdesc is a plain C struct; all-zero is a valid value.
            let mut desc: v4l2_fmtdesc = unsafe { mem::zeroed() };
            desc.index = index;
            desc.type_ = Type::VideoCapture as u32;
            let argp = ptr::addr_of_mut!(desc).cast::<c_void>();
            retry_interrupted(|| unsafe { v4l2::ioctl(fd, v4l2::vidioc::VIDIOC_ENUM_FMT, argp) })?;

            let text = desc.description.split(|&byte| byte == 0).next().unwrap_or(&[]);
            Ok((
                FourCC::from_u32(desc.pixelformat),
                String::from_utf8_lossy(text).into_owned(),
            ))
        })
    }

    fn stream_switch(&mut self, on: bool) -> io::Result<()> {
        let fd = self.fd();
        let mut typ = Type::VideoCapture as u32;
        let argp = ptr::addr_of_mut!(typ).cast::<c_void>();
        if on {
            retry_interrupted(|| unsafe { v4l2::ioctl(fd, v4l2::vidioc::VIDIOC_STREAMON, argp) })
        } else {
            retry_interrupted(|| unsafe { v4l2::ioctl(fd, v4l2::vidioc::VIDIOC_STREAMOFF, argp) })
        }
    }
}

impl CameraDevice for V4L2Device {
    type Mapping = MmapRegion;

    fn capabilities(&self) -> &DeviceCapabilities {
        &self.capabilities
    }

    fn formats(&self) -> io::Result<Vec<FormatDescription>> {
        let mut formats = Vec::new();
        for (fourcc, description) in self.format_tags()? {
            // A format without enumerable sizes is still listed, just with no modes.
            let sizes = self
                .device
                .enum_framesizes(fourcc.into())
                .unwrap_or_default()
                .into_iter()
                .map(|framesize| match framesize.size {
                    FrameSizeEnum::Discrete(size) => FrameSize::Discrete {
                        width: size.width,
                        height: size.height,
                    },
                    FrameSizeEnum::Stepwise(range) => FrameSize::Stepwise {
                        min_width: range.min_width,
                        max_width: range.max_width,
                        min_height: range.min_height,
                        max_height: range.max_height,
                    },
                })
                .collect();

            formats.push(FormatDescription {
                fourcc,
                description,
                sizes,
            });
        }
        Ok(formats)
    }

    fn reset_crop(&mut self) -> io::Result<()> {
        let fd = self.fd();

        let mut cropcap: v4l2_cropcap = unsafe { mem::zeroed() };
        cropcap.type_ = Type::VideoCapture as u32;
        let argp = ptr::addr_of_mut!(cropcap).cast::<c_void>();
        retry_interrupted(|| unsafe { v4l2::ioctl(fd, v4l2::vidioc::VIDIOC_CROPCAP, argp) })?;

        let mut crop: v4l2_crop = unsafe { mem::zeroed() };
        crop.type_ = Type::VideoCapture as u32;
        crop.c = cropcap.defrect;
        let argp = ptr::addr_of_mut!(crop).cast::<c_void>();
        retry_interrupted(|| unsafe { v4l2::ioctl(fd, v4l2::vidioc::VIDIOC_S_CROP, argp) })
    }

    fn set_format(&mut self, format: &Format) -> io::Result<Format> {
        let mut fmt = self.device.format()?;

        fmt.width = format.width;
        fmt.height = format.height;
        fmt.fourcc = format.fourcc.into();
        fmt.field_order = FieldOrder::Progressive;

        let fmt = self.device.set_format(&fmt)?;

        Ok(Format {
            width: fmt.width,
            height: fmt.height,
            fourcc: FourCC::from(fmt.fourcc),
            stride: fmt.stride,
            size: fmt.size,
        })
    }

    fn request_buffers(&mut self, count: u32) -> io::Result<u32> {
        let mut req: v4l2_requestbuffers = unsafe { mem::zeroed() };
        req.count = count;
        req.type_ = Type::VideoCapture as u32;
        req.memory = Memory::Mmap as u32;

        let fd = self.fd();
        let argp = ptr::addr_of_mut!(req).cast::<c_void>();
        retry_interrupted(|| unsafe { v4l2::ioctl(fd, v4l2::vidioc::VIDIOC_REQBUFS, argp) })?;
        Ok(req.count)
    }

    fn map_buffer(&mut self, index: u32) -> io::Result<Self::Mapping> {
        let buf = self.query_buffer(index)?;
        let len = buf.length as usize;
        // SAFETY: QUERYBUF on an mmap buffer fills the `offset` member of the union.
        let offset = unsafe { buf.m.offset };
        let offset = libc::off_t::try_from(offset)
            .map_err(|_| io::Error::other("buffer offset out of range"))?;

        // SAFETY: offset and length come straight from the driver for this fd.
        let addr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                self.fd(),
                offset,
            )
        };
        if addr == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }
        let ptr = NonNull::new(addr.cast::<u8>())
            .ok_or_else(|| io::Error::other("mmap returned a null mapping"))?;

        Ok(MmapRegion { ptr, len })
    }

    fn unmap_buffer(&mut self, mapping: Self::Mapping) -> io::Result<()> {
        mapping.unmap()
    }

    fn enqueue(&mut self, index: u32) -> io::Result<()> {
        let mut buf = capture_buffer();
        buf.index = index;
        let fd = self.fd();
        let argp = ptr::addr_of_mut!(buf).cast::<c_void>();
        retry_interrupted(|| unsafe { v4l2::ioctl(fd, v4l2::vidioc::VIDIOC_QBUF, argp) })
    }

    fn wait_ready(&mut self, timeout: Duration) -> io::Result<bool> {
        let ready = self.handle.poll(libc::POLLIN, poll_timeout_ms(timeout))?;
        Ok(ready > 0)
    }

    fn dequeue(&mut self) -> io::Result<FrameMetadata> {
        let mut buf = capture_buffer();
        let fd = self.fd();
        let argp = ptr::addr_of_mut!(buf).cast::<c_void>();
        retry_interrupted(|| unsafe { v4l2::ioctl(fd, v4l2::vidioc::VIDIOC_DQBUF, argp) })?;

        // Safe conversions: V4L2 timestamps are always non-negative in practice
        #[allow(clippy::cast_sign_loss)]
        let secs = buf.timestamp.tv_sec.max(0) as u64;
        #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
        let nanos = (buf.timestamp.tv_usec.max(0) as u32).saturating_mul(1000);

        Ok(FrameMetadata {
            index: buf.index,
            sequence: buf.sequence,
            timestamp: Duration::new(secs, nanos),
            bytes_used: buf.bytesused,
        })
    }

    fn stream_on(&mut self) -> io::Result<()> {
        self.stream_switch(true)
    }

    fn stream_off(&mut self) -> io::Result<()> {
        self.stream_switch(false)
    }
}

/// A driver buffer mapped into process memory.
///
/// Dropping the region unmaps it; [`V4L2Device::unmap_buffer`] does the same
/// and reports failures.
pub struct MmapRegion {
    ptr: NonNull<u8>,
    len: usize,
}

// SAFETY: the region is plain shared memory owned exclusively by this value.
unsafe impl Send for MmapRegion {}

impl MmapRegion {
    fn unmap(self) -> io::Result<()> {
        let region = ManuallyDrop::new(self);
        // SAFETY: ptr/len describe a live mapping created by `map_buffer`.
        let ret = unsafe { libc::munmap(region.ptr.as_ptr().cast::<c_void>(), region.len) };
        if ret == -1 {
            Err(io::Error::last_os_error())
        } else {
            Ok(())
        }
    }
}

impl AsRef<[u8]> for MmapRegion {
    fn as_ref(&self) -> &[u8] {
        // SAFETY: the mapping stays valid for the lifetime of `self`.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }
}

impl Drop for MmapRegion {
    fn drop(&mut self) {
        // SAFETY: ptr/len describe a live mapping created by `map_buffer`.
        unsafe {
            libc::munmap(self.ptr.as_ptr().cast::<c_void>(), self.len);
        }
    }
}

fn capture_buffer() -> v4l2_buffer {
    // SAFETY: v4l2_buffer is a plain C struct; all-zero is a valid value.
    let mut buf: v4l2_buffer = unsafe { mem::zeroed() };
    buf.type_ = Type::VideoCapture as u32;
    buf.memory = Memory::Mmap as u32;
    buf
}

/// Milliseconds for `poll`, rounded up so a sub-millisecond remainder still waits.
fn poll_timeout_ms(timeout: Duration) -> i32 {
    i32::try_from(timeout.as_micros().div_ceil(1000)).unwrap_or(i32::MAX)
}

/// Query indices 0, 1, ... until the driver answers `EINVAL` or `limit` items
/// have been collected.
fn enumerate_indexed<T, F>(limit: usize, mut query: F) -> io::Result<Vec<T>>
where
    F: FnMut(u32) -> io::Result<T>,
{
    let mut items = Vec::new();
    for index in (0..u32::MAX).take(limit) {
        match query(index) {
            Ok(item) => items.push(item),
            Err(err) if err.raw_os_error() == Some(libc::EINVAL) => break,
            Err(err) => return Err(err),
        }
    }
    Ok(items)
}

/// Run a raw device call, repeating it while it fails with `EINTR`.
fn retry_interrupted<F>(mut call: F) -> io::Result<()>
where
    F: FnMut() -> io::Result<()>,
{
    loop {
        match call() {
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
            result => return result,
        }
    }
}
