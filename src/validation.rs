//! Frame validation utilities for test pattern verification.
//!
//! These functions check converted RGB frames against the patterns produced
//! by virtual cameras (vivid) and the mock device. Useful for integration
//! testing where no real scene is available.

use crate::traits::FrameMetadata;

/// Expected RGB values for SMPTE color bars (8 bars).
///
/// These are the RGB values the converter produces for the YUV values
/// used by the mock device's color bar pattern.
///
/// Colors in order: White, Yellow, Cyan, Green, Magenta, Red, Blue, Black
const SMPTE_COLOR_BARS: [(u8, u8, u8); 8] = [
    (235, 235, 235), // White
    (235, 235, 11),  // Yellow
    (12, 236, 237),  // Cyan
    (13, 237, 13),   // Green
    (237, 13, 237),  // Magenta
    (238, 14, 13),   // Red
    (15, 15, 239),   // Blue
    (16, 16, 16),    // Black
];

/// Tolerance for RGB color matching (accounts for YUV->RGB conversion errors).
const COLOR_TOLERANCE: u32 = 15;

/// Minimum luminance rise across a gradient frame.
const MIN_GRADIENT_RISE: f32 = 50.0;

/// Error type for pattern validation.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    /// The RGB buffer is smaller than the frame size.
    #[error("RGB buffer holds {actual} bytes, expected at least {expected}")]
    BufferTooSmall {
        /// Bytes required.
        expected: usize,
        /// Bytes available.
        actual: usize,
    },

    /// A color bar has the wrong color.
    #[error("Color bar {bar} mismatch at ({x}, {y}): expected RGB{expected:?}, got RGB{actual:?}")]
    ColorBar {
        /// Bar index, left to right.
        bar: usize,
        /// Sampled column.
        x: u32,
        /// Sampled row.
        y: u32,
        /// Expected color.
        expected: (u8, u8, u8),
        /// Color found.
        actual: (u8, u8, u8),
    },

    /// Luminance drops somewhere along the gradient.
    #[error("Gradient not monotonically increasing at x={x}: luminance {luminance} < previous {previous}")]
    NotMonotonic {
        /// Sampled column.
        x: u32,
        /// Luminance at `x`.
        luminance: f32,
        /// Luminance at the previous sample.
        previous: f32,
    },

    /// The gradient is too flat to be a gradient.
    #[error("Insufficient luminance change for gradient: {0} (expected at least 50)")]
    FlatGradient(f32),

    /// No frames to check.
    #[error("Cannot validate empty frame sequence")]
    EmptySequence,

    /// Sequence numbers skip or repeat.
    #[error("Frame sequence gap at index {index}: expected {expected}, got {actual}")]
    SequenceGap {
        /// Position in the checked slice.
        index: usize,
        /// Expected sequence number.
        expected: u32,
        /// Sequence number found.
        actual: u32,
    },
}

/// Validates that an RGB frame contains the SMPTE color bar pattern.
///
/// This function checks 8 vertical stripes at their center positions,
/// verifying that each stripe contains the expected color with a tolerance
/// for YUV-to-RGB conversion inaccuracies.
///
/// # Arguments
///
/// * `rgb` - Packed RGB frame, 3 bytes per pixel
/// * `width` - Frame width in pixels
/// * `height` - Frame height in pixels
///
/// # Errors
///
/// Returns an error if:
/// - The buffer is smaller than `width * height * 3`
/// - Any color bar doesn't match the expected color within tolerance
pub fn validate_color_bars(rgb: &[u8], width: u32, height: u32) -> Result<(), ValidationError> {
    check_len(rgb, width, height)?;
    let bar_width = width / 8;
    let center_y = height / 2;

    for (bar, expected) in SMPTE_COLOR_BARS.iter().enumerate() {
        // Sample the center of each bar
        #[allow(clippy::cast_possible_truncation)]
        let x = (bar as u32 * bar_width) + (bar_width / 2);
        let actual = pixel_at(rgb, width, x, center_y);

        if !colors_match(actual, *expected, COLOR_TOLERANCE) {
            return Err(ValidationError::ColorBar {
                bar,
                x,
                y: center_y,
                expected: *expected,
                actual,
            });
        }
    }

    Ok(())
}

/// Validates that an RGB frame contains a horizontal gradient pattern.
///
/// This function samples a horizontal line at the center of the frame and
/// verifies that the luminance increases monotonically from left to right.
/// It also checks that there is a significant overall luminance change
/// across the frame (not a solid color).
///
/// # Errors
///
/// Returns an error if:
/// - The buffer is smaller than `width * height * 3`
/// - The luminance doesn't increase monotonically
/// - The total luminance change is too small (solid color)
pub fn validate_gradient(rgb: &[u8], width: u32, height: u32) -> Result<(), ValidationError> {
    check_len(rgb, width, height)?;
    let center_y = height / 2;

    // Sample every 10 pixels to check for monotonic increase
    let mut first: Option<f32> = None;
    let mut previous: Option<f32> = None;

    for x in (0..width).step_by(10) {
        let (r, g, b) = pixel_at(rgb, width, x, center_y);

        // Calculate luminance (Y' in Rec. 601)
        let luminance = 0.114f32.mul_add(
            f32::from(b),
            0.587f32.mul_add(f32::from(g), 0.299 * f32::from(r)),
        );

        first.get_or_insert(luminance);

        if let Some(previous) = previous {
            // Allow small decreases due to rounding
            if luminance < previous - 1.0 {
                return Err(ValidationError::NotMonotonic {
                    x,
                    luminance,
                    previous,
                });
            }
        }
        previous = Some(luminance);
    }

    if let (Some(first), Some(last)) = (first, previous) {
        let rise = last - first;
        if rise < MIN_GRADIENT_RISE {
            return Err(ValidationError::FlatGradient(rise));
        }
    }

    Ok(())
}

/// Validates that frame sequence numbers increment by 1 with no gaps.
///
/// # Errors
///
/// Returns an error if the slice is empty or any sequence number doesn't
/// increment by exactly 1 from the previous one.
pub fn validate_frame_sequence(frames: &[FrameMetadata]) -> Result<(), ValidationError> {
    if frames.is_empty() {
        return Err(ValidationError::EmptySequence);
    }

    for (index, pair) in frames.windows(2).enumerate() {
        if let [previous, current] = pair {
            let expected = previous.sequence.wrapping_add(1);
            if current.sequence != expected {
                return Err(ValidationError::SequenceGap {
                    index: index + 1,
                    expected,
                    actual: current.sequence,
                });
            }
        }
    }

    Ok(())
}

fn check_len(rgb: &[u8], width: u32, height: u32) -> Result<(), ValidationError> {
    let expected = width as usize * height as usize * 3;
    if rgb.len() < expected {
        return Err(ValidationError::BufferTooSmall {
            expected,
            actual: rgb.len(),
        });
    }
    Ok(())
}

/// RGB value at (x, y). Callers check the buffer length first.
fn pixel_at(rgb: &[u8], width: u32, x: u32, y: u32) -> (u8, u8, u8) {
    let offset = (y as usize * width as usize + x as usize) * 3;
    match rgb.get(offset..offset + 3) {
        Some(&[r, g, b]) => (r, g, b),
        _ => (0, 0, 0),
    }
}

/// Check if two RGB colors match within a per-channel tolerance.
fn colors_match(actual: (u8, u8, u8), expected: (u8, u8, u8), tolerance: u32) -> bool {
    let (ar, ag, ab) = actual;
    let (er, eg, eb) = expected;

    u32::from(ar.abs_diff(er)) <= tolerance
        && u32::from(ag.abs_diff(eg)) <= tolerance
        && u32::from(ab.abs_diff(eb)) <= tolerance
}
