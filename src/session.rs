//! Capture sessions over a memory-mapped buffer pool.
//!
//! A session negotiates a mode with the device, maps a fixed pool of
//! [`STREAM_BUFFERS`] driver buffers and hands them back and forth between
//! the driver and the application. A slot is owned either by the driver
//! (queued, may be written at any time) or by the application (dequeued,
//! readable). The application side of that handoff is the [`Frame`] guard.
//!
//! ```text
//! open -> start_streaming -> { acquire_frame -> convert -> release }* -> stop_streaming -> close
//! ```

use std::io;
use std::path::Path;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use crate::convert;
use crate::device::V4L2Device;
use crate::error::{CaptureError, ConvertError, Result};
use crate::traits::{CameraDevice, Format, FrameMetadata, ModeDescriptor};

/// Number of buffers requested from the driver.
///
/// More buffers absorb bursts when conversion falls behind at the cost of
/// latency; fewer keep the delivered frame fresh but drop frames sooner.
pub const STREAM_BUFFERS: u32 = 20;

/// Wait window used by the reference acquisition loop.
pub const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(2);

/// Lifecycle state of a [`CaptureSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Format negotiated and buffers mapped; nothing queued.
    Opened,
    /// Buffers queued and the device is streaming.
    Streaming,
    /// Streaming stopped; only `close` remains.
    Stopped,
    /// The driver broke the ownership contract; only `close` remains.
    Failed,
    /// Every resource released.
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Owner {
    Driver,
    Application,
}

struct Slot<M> {
    mapping: M,
    owner: Owner,
}

/// The driver adjusted the requested format.
///
/// This is advisory: the session runs with [`actual`](Self::actual) and
/// [`CaptureSession::mode`] already reflects it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NegotiationMismatch {
    /// What was asked for.
    pub requested: Format,
    /// What the driver configured.
    pub actual: Format,
}

/// An open capture device with its mapped buffer pool.
pub struct CaptureSession<D: CameraDevice> {
    device: D,
    mode: ModeDescriptor,
    mismatch: Option<NegotiationMismatch>,
    slots: Vec<Slot<D::Mapping>>,
    state: SessionState,
}

impl CaptureSession<V4L2Device> {
    /// Open the V4L2 device named by `requested.path` and negotiate `requested`.
    pub fn open_path(requested: &ModeDescriptor) -> Result<Self> {
        let device = V4L2Device::open_path(&requested.path)?;
        Self::open(device, requested)
    }
}

impl<D: CameraDevice> CaptureSession<D> {
    /// Negotiate `requested` on `device` and map its buffer pool.
    ///
    /// The driver has the final say on resolution and pixel format; use
    /// [`mode`](Self::mode) for every later size computation.
    pub fn open(mut device: D, requested: &ModeDescriptor) -> Result<Self> {
        let path = requested.path.as_path();
        check_capabilities(&device, path)?;

        if let Err(err) = device.reset_crop() {
            debug!(path = %path.display(), %err, "Cropping not supported, continuing");
        }

        let wanted = requested.format();
        let actual = device
            .set_format(&wanted)
            .map_err(|err| CaptureError::device("set format", err))?;

        let mismatch = negotiation_mismatch(&wanted, &actual);
        if let Some(mismatch) = &mismatch {
            warn!(
                path = %path.display(),
                requested_width = mismatch.requested.width,
                requested_height = mismatch.requested.height,
                requested_format = %mismatch.requested.fourcc,
                width = mismatch.actual.width,
                height = mismatch.actual.height,
                format = %mismatch.actual.fourcc,
                "Device uses a different mode than requested"
            );
        }

        let mut mode = requested.clone();
        if mode.fourcc != actual.fourcc {
            mode.description.clear();
        }
        mode.width = actual.width;
        mode.height = actual.height;
        mode.fourcc = actual.fourcc;
        mode.bytes_per_pixel = actual.fourcc.bytes_per_pixel();
        info!(width = mode.width, height = mode.height, format = %mode.fourcc, "Resolution negotiated");

        let granted = device
            .request_buffers(STREAM_BUFFERS)
            .map_err(|err| CaptureError::device("request buffers", err))?;
        if granted < STREAM_BUFFERS {
            return Err(CaptureError::InsufficientBuffers {
                requested: STREAM_BUFFERS,
                granted,
            });
        }

        let slots = map_pool(&mut device, granted)?;
        info!(path = %path.display(), buffers = slots.len(), "Mapped device memory");

        Ok(Self {
            device,
            mode,
            mismatch,
            slots,
            state: SessionState::Opened,
        })
    }

    /// The negotiated mode.
    pub const fn mode(&self) -> &ModeDescriptor {
        &self.mode
    }

    /// How the driver deviated from the requested mode, if it did.
    pub const fn mismatch(&self) -> Option<&NegotiationMismatch> {
        self.mismatch.as_ref()
    }

    /// Current lifecycle state.
    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// The underlying device.
    pub const fn device(&self) -> &D {
        &self.device
    }

    /// Number of slots in the pool.
    pub fn buffer_count(&self) -> usize {
        self.slots.len()
    }

    /// Number of slots currently owned by the driver.
    pub fn driver_owned(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| slot.owner == Owner::Driver)
            .count()
    }

    /// Queue every slot and start streaming.
    pub fn start_streaming(&mut self) -> Result<()> {
        self.expect_state("start streaming", SessionState::Opened)?;

        if let Err(err) = self.queue_all().and_then(|()| self.device.stream_on()) {
            // Stream off drops whatever made it into the driver queue.
            if let Err(off_err) = self.device.stream_off() {
                debug!(%off_err, "Stream off after failed start");
            }
            self.reclaim_all();
            error!(%err, "Failed to start streaming");
            return Err(CaptureError::StreamStart(err));
        }

        self.state = SessionState::Streaming;
        debug!(buffers = self.slots.len(), "Streaming started");
        Ok(())
    }

    /// Wait up to `timeout` for the driver to fill a buffer and take it.
    ///
    /// Signal interruptions and spurious wake-ups are retried within the same
    /// deadline. The frame must be released (explicitly or by dropping it)
    /// before the next acquisition.
    pub fn acquire_frame(&mut self, timeout: Duration) -> Result<Frame<'_, D>> {
        self.expect_state("acquire a frame", SessionState::Streaming)?;

        let deadline = Instant::now() + timeout;
        let metadata = loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.device.wait_ready(remaining) {
                Ok(true) => {}
                Ok(false) => {
                    warn!(?timeout, "No frame ready before timeout");
                    return Err(CaptureError::Timeout(timeout));
                }
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(CaptureError::device("wait for frame", err)),
            }

            match self.device.dequeue() {
                Ok(metadata) => break metadata,
                Err(err) if is_transient(&err) => continue,
                Err(err) => return Err(CaptureError::device("dequeue buffer", err)),
            }
        };

        let index = metadata.index;
        match self.slots.get(index as usize).map(|slot| slot.owner) {
            Some(Owner::Driver) => self.set_owner(index, Owner::Application),
            Some(Owner::Application) => {
                return Err(self.fail(format!(
                    "driver returned buffer {index} which the application already owns"
                )));
            }
            None => {
                let pool = self.slots.len();
                return Err(self.fail(format!(
                    "driver returned buffer {index} outside the pool of {pool}"
                )));
            }
        }

        Ok(Frame {
            session: self,
            metadata,
            released: false,
        })
    }

    /// Acquire a frame, convert it into `rgb` and hand the buffer back.
    ///
    /// The buffer is re-queued even when conversion fails. `workers > 1`
    /// converts row bands in parallel.
    pub fn capture_rgb(
        &mut self,
        timeout: Duration,
        rgb: &mut [u8],
        workers: usize,
    ) -> Result<FrameMetadata> {
        let frame = self.acquire_frame(timeout)?;
        let converted = frame.convert_parallel_into(rgb, workers);
        let metadata = frame.metadata().clone();
        frame.release()?;
        converted?;
        Ok(metadata)
    }

    /// Stop streaming. Every slot returns to the application.
    pub fn stop_streaming(&mut self) -> Result<()> {
        self.expect_state("stop streaming", SessionState::Streaming)?;
        self.device
            .stream_off()
            .map_err(|err| CaptureError::device("stream off", err))?;
        self.reclaim_all();
        self.state = SessionState::Stopped;
        debug!("Streaming stopped");
        Ok(())
    }

    /// Stop streaming if needed, unmap every buffer and release the device.
    ///
    /// All resources are released even if a step fails; the first failure
    /// is returned.
    pub fn close(mut self) -> Result<()> {
        self.teardown()
    }

    fn teardown(&mut self) -> Result<()> {
        let mut first_error = None;

        if matches!(self.state, SessionState::Streaming | SessionState::Failed) {
            if let Err(err) = self.device.stream_off() {
                warn!(%err, "Stream off failed during close");
                first_error.get_or_insert(CaptureError::device("stream off", err));
            }
        }

        for slot in std::mem::take(&mut self.slots) {
            if let Err(err) = self.device.unmap_buffer(slot.mapping) {
                warn!(%err, "Failed unmapping buffer");
                first_error.get_or_insert(CaptureError::device("unmap buffer", err));
            }
        }

        self.state = SessionState::Closed;
        first_error.map_or(Ok(()), Err)
    }

    fn queue_all(&mut self) -> io::Result<()> {
        for (index, slot) in (0u32..).zip(self.slots.iter_mut()) {
            self.device.enqueue(index)?;
            slot.owner = Owner::Driver;
        }
        Ok(())
    }

    fn reclaim_all(&mut self) {
        for slot in &mut self.slots {
            slot.owner = Owner::Application;
        }
    }

    fn release_slot(&mut self, index: u32) -> Result<()> {
        self.device
            .enqueue(index)
            .map_err(|err| CaptureError::device("re-enqueue buffer", err))?;
        self.set_owner(index, Owner::Driver);
        Ok(())
    }

    fn set_owner(&mut self, index: u32, owner: Owner) {
        if let Some(slot) = self.slots.get_mut(index as usize) {
            slot.owner = owner;
        }
    }

    fn slot_data(&self, index: u32) -> &[u8] {
        self.slots
            .get(index as usize)
            .map_or(&[], |slot| slot.mapping.as_ref())
    }

    fn fail(&mut self, message: String) -> CaptureError {
        error!(%message, "Aborting capture session");
        self.state = SessionState::Failed;
        CaptureError::InvariantViolation(message)
    }

    fn expect_state(&self, op: &'static str, expected: SessionState) -> Result<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(CaptureError::InvalidState {
                op,
                state: self.state,
            })
        }
    }
}

impl<D: CameraDevice> Drop for CaptureSession<D> {
    fn drop(&mut self) {
        if self.state != SessionState::Closed {
            if let Err(err) = self.teardown() {
                warn!(%err, "Capture session teardown failed");
            }
        }
    }
}

/// A dequeued buffer owned by the application.
///
/// Dropping the frame re-queues the buffer; [`release`](Self::release) does
/// the same and reports failures.
pub struct Frame<'s, D: CameraDevice> {
    session: &'s mut CaptureSession<D>,
    metadata: FrameMetadata,
    released: bool,
}

impl<D: CameraDevice> Frame<'_, D> {
    /// Raw frame bytes, limited to what the driver reported as used.
    pub fn data(&self) -> &[u8] {
        let bytes = self.session.slot_data(self.metadata.index);
        let used = self.metadata.bytes_used as usize;
        if used == 0 {
            return bytes;
        }
        bytes.get(..used).unwrap_or(bytes)
    }

    /// Sequence number, timestamp and slot of this frame.
    pub const fn metadata(&self) -> &FrameMetadata {
        &self.metadata
    }

    /// The negotiated mode the data is encoded in.
    pub fn mode(&self) -> &ModeDescriptor {
        &self.session.mode
    }

    /// Convert the frame into `rgb`.
    pub fn convert_into(&self, rgb: &mut [u8]) -> std::result::Result<(), ConvertError> {
        let mode = self.mode();
        convert::convert(mode.fourcc, self.data(), mode.width, mode.height, rgb)
    }

    /// Convert the frame into `rgb` using up to `workers` threads.
    pub fn convert_parallel_into(
        &self,
        rgb: &mut [u8],
        workers: usize,
    ) -> std::result::Result<(), ConvertError> {
        let mode = self.mode();
        convert::convert_parallel(mode.fourcc, self.data(), mode.width, mode.height, rgb, workers)
    }

    /// Hand the buffer back to the driver.
    pub fn release(mut self) -> Result<()> {
        self.released = true;
        self.session.release_slot(self.metadata.index)
    }
}

impl<D: CameraDevice> Drop for Frame<'_, D> {
    fn drop(&mut self) {
        if !self.released {
            if let Err(err) = self.session.release_slot(self.metadata.index) {
                warn!(index = self.metadata.index, %err, "Failed to re-queue buffer");
            }
        }
    }
}

fn check_capabilities<D: CameraDevice>(device: &D, path: &Path) -> Result<()> {
    let caps = device.capabilities();
    if !caps.can_capture {
        return Err(CaptureError::Capability {
            path: path.to_path_buf(),
            missing: "video capture",
        });
    }
    if !caps.can_stream {
        return Err(CaptureError::Capability {
            path: path.to_path_buf(),
            missing: "streaming I/O",
        });
    }
    Ok(())
}

fn negotiation_mismatch(requested: &Format, actual: &Format) -> Option<NegotiationMismatch> {
    let same = requested.width == actual.width
        && requested.height == actual.height
        && requested.fourcc == actual.fourcc;
    (!same).then(|| NegotiationMismatch {
        requested: requested.clone(),
        actual: actual.clone(),
    })
}

/// Map `count` buffers. On failure every buffer mapped so far is unmapped.
fn map_pool<D: CameraDevice>(device: &mut D, count: u32) -> Result<Vec<Slot<D::Mapping>>> {
    let mut slots = Vec::with_capacity(count as usize);
    for index in 0..count {
        match device.map_buffer(index) {
            Ok(mapping) => slots.push(Slot {
                mapping,
                owner: Owner::Application,
            }),
            Err(source) => {
                for slot in slots.drain(..) {
                    if let Err(err) = device.unmap_buffer(slot.mapping) {
                        warn!(%err, "Failed unmapping buffer");
                    }
                }
                return Err(CaptureError::MapFailed { index, source });
            }
        }
    }
    Ok(slots)
}

fn is_transient(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock
    )
}
