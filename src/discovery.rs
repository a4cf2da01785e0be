//! Capture device discovery through the sysfs video4linux registry.
//!
//! Every failure is local to one registry entry: it is logged and the scan
//! moves on to the next device.

use std::fs;
use std::path::Path;

use tracing::{debug, info, warn};

use crate::device::V4L2Device;
use crate::error::{CaptureError, Result};
use crate::traits::{CameraDevice, ModeDescriptor, ModeRequest};

/// Registry of video devices exported by the kernel.
pub const SYSFS_VIDEO4LINUX: &str = "/sys/class/video4linux";

/// Directory holding the device nodes.
pub const DEV_DIR: &str = "/dev";

/// Formats enumerated per device at most.
pub const MAX_FORMATS: usize = 1000;

/// Registry entries with longer names are ignored.
const MAX_ENTRY_NAME: usize = 64;

/// Device names are cut to this many characters.
const MAX_DEVICE_NAME: usize = 255;

/// Result of a discovery scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Discovery {
    /// Capturable modes in registry order.
    pub modes: Vec<ModeDescriptor>,
    /// Set when modes were dropped because the capacity was reached.
    pub truncated: bool,
}

impl Discovery {
    /// Append `mode` unless `max_count` modes are already listed.
    ///
    /// Returns `false` once the list is full.
    fn push(&mut self, mode: ModeDescriptor, max_count: usize) -> bool {
        if self.modes.len() >= max_count {
            self.truncated = true;
            return false;
        }
        self.modes.push(mode);
        true
    }
}

/// List every capturable mode of the devices in the system registry.
///
/// At most `max_count` modes are returned. Zero modes means no usable device.
pub fn enumerate(max_count: usize) -> Discovery {
    enumerate_in(
        Path::new(SYSFS_VIDEO4LINUX),
        Path::new(DEV_DIR),
        max_count,
        |node| V4L2Device::open_path(node),
    )
}

/// Scan `registry` for devices whose nodes live in `dev_dir`.
///
/// `open` turns a device node into a [`CameraDevice`]; it is called once per
/// registry entry that passes the sysfs checks.
pub fn enumerate_in<D, F>(registry: &Path, dev_dir: &Path, max_count: usize, mut open: F) -> Discovery
where
    D: CameraDevice,
    F: FnMut(&Path) -> Result<D>,
{
    let mut discovery = Discovery::default();

    let entries = match fs::read_dir(registry) {
        Ok(entries) => entries,
        Err(err) => {
            warn!(registry = %registry.display(), %err, "Cannot read device registry");
            return discovery;
        }
    };
    let mut names: Vec<_> = entries
        .filter_map(std::result::Result::ok)
        .map(|entry| entry.file_name())
        .collect();
    names.sort();

    for entry in names {
        let Some(entry) = entry.to_str() else {
            debug!(?entry, "Skipping non UTF-8 registry entry");
            continue;
        };
        if entry.len() > MAX_ENTRY_NAME {
            debug!(entry, "Skipping registry entry with overlong name");
            continue;
        }

        let name_path = registry.join(entry).join("name");
        if !name_path.is_file() {
            debug!(path = %name_path.display(), "No name file, skipping");
            continue;
        }
        let name = match fs::read_to_string(&name_path) {
            Ok(raw) => clean_name(&raw),
            Err(err) => {
                debug!(path = %name_path.display(), %err, "Cannot read name file, skipping");
                continue;
            }
        };

        let node = dev_dir.join(entry);
        if !node.exists() {
            debug!(path = %node.display(), "Name file without device node, skipping");
            continue;
        }

        let device = match open(&node) {
            Ok(device) => device,
            Err(err) => {
                debug!(path = %node.display(), %err, "Cannot open device, skipping");
                continue;
            }
        };

        let caps = device.capabilities();
        if !caps.can_capture || !caps.can_stream {
            debug!(
                path = %node.display(),
                capture = caps.can_capture,
                streaming = caps.can_stream,
                "Device cannot stream video capture, skipping"
            );
            continue;
        }

        let formats = match device.formats() {
            Ok(formats) => formats,
            Err(err) => {
                debug!(path = %node.display(), %err, "Cannot enumerate formats");
                continue;
            }
        };

        for format in formats.into_iter().take(MAX_FORMATS) {
            if !format.fourcc.is_convertible() {
                debug!(path = %node.display(), format = %format.fourcc, "Listing format without converter");
            }
            for size in format.sizes {
                let (width, height) = size.largest();
                if width == 0 || height == 0 {
                    continue;
                }
                let mode = ModeDescriptor::new(&node, name.clone(), format.fourcc, width, height)
                    .with_description(format.description.clone());
                if !discovery.push(mode, max_count) {
                    warn!(max_count, "Mode list full, dropping remaining modes");
                    return discovery;
                }
            }
        }
    }

    info!(modes = discovery.modes.len(), "Device discovery finished");
    discovery
}

/// Pick the first mode satisfying `request`, else the first mode listed.
pub fn select_mode<'a>(modes: &'a [ModeDescriptor], request: &ModeRequest) -> Result<&'a ModeDescriptor> {
    if let Some(mode) = modes.iter().find(|mode| mode.satisfies(request)) {
        return Ok(mode);
    }
    let fallback = modes
        .first()
        .ok_or_else(|| CaptureError::NotFound("No video devices available".to_owned()))?;
    warn!(
        name = %request.name,
        width = request.width,
        height = request.height,
        format = %request.fourcc,
        fallback = %fallback,
        "Requested mode not available, using first mode"
    );
    Ok(fallback)
}

fn clean_name(raw: &str) -> String {
    raw.chars()
        .filter(|&c| c != '\n' && c != '\r')
        .take(MAX_DEVICE_NAME)
        .collect()
}
