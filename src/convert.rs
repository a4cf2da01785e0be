//! Raw frame to packed RGB conversion.
//!
//! Every converter works on a band of rows and keeps no state between rows,
//! so a frame can be split into disjoint output bands and converted in
//! parallel ([`convert_parallel`]).

use std::ops::Range;

use crate::error::ConvertError;
use crate::traits::{FourCC, PixelFormat};

/// Default number of workers for [`convert_parallel`].
pub const CONVERSION_WORKERS: usize = 4;

/// Bytes per output pixel.
const RGB_BYTES: usize = 3;

/// Bytes per source pixel for both recognised encodings.
const SOURCE_BYTES: usize = 2;

/// Convert a whole frame into `dst`.
///
/// `dst` must hold exactly the output size of the frame: `width * height * 3`
/// bytes for YUYV and twice that for Y8I. On error `dst` must not be used.
pub fn convert(
    fourcc: FourCC,
    src: &[u8],
    width: u32,
    height: u32,
    dst: &mut [u8],
) -> Result<(), ConvertError> {
    convert_rows(fourcc, src, width, 0..height, dst)
}

/// Convert rows `rows` of the frame in `src` into `dst`.
///
/// `src` is the complete raw frame; `dst` holds only the output bytes of the
/// requested rows.
pub fn convert_rows(
    fourcc: FourCC,
    src: &[u8],
    width: u32,
    rows: Range<u32>,
    dst: &mut [u8],
) -> Result<(), ConvertError> {
    let format = PixelFormat::try_from(fourcc)?;
    let dst_row = format.output_width(width) as usize * RGB_BYTES;
    let width = width as usize;
    let src_row = width * SOURCE_BYTES;
    let start = rows.start as usize;
    let end = rows.end.max(rows.start) as usize;

    let needed = end * src_row;
    let band = src
        .get(start * src_row..needed)
        .ok_or(ConvertError::SourceTooShort {
            expected: needed,
            actual: src.len(),
        })?;

    let expected = (end - start) * dst_row;
    if dst.len() != expected {
        return Err(ConvertError::DestinationSize {
            expected,
            actual: dst.len(),
        });
    }

    if src_row == 0 {
        return Ok(());
    }

    let lines = band.chunks_exact(src_row).zip(dst.chunks_exact_mut(dst_row));
    match format {
        PixelFormat::Yuv422 => lines.for_each(|(src, dst)| yuyv_row(src, dst)),
        PixelFormat::Y8i => lines.for_each(|(src, dst)| y8i_row(src, dst, width)),
    }

    Ok(())
}

/// Convert a frame by fanning out row bands over `workers` scoped threads.
///
/// Returns only after every band has been converted.
pub fn convert_parallel(
    fourcc: FourCC,
    src: &[u8],
    width: u32,
    height: u32,
    dst: &mut [u8],
    workers: usize,
) -> Result<(), ConvertError> {
    let format = PixelFormat::try_from(fourcc)?;
    let dst_row = format.output_width(width) as usize * RGB_BYTES;
    let workers = workers.clamp(1, (height as usize).max(1));
    if workers == 1 || dst_row == 0 {
        return convert(fourcc, src, width, height, dst);
    }

    let expected = dst_row * height as usize;
    if dst.len() != expected {
        return Err(ConvertError::DestinationSize {
            expected,
            actual: dst.len(),
        });
    }

    let rows_per_band = (height as usize).div_ceil(workers);
    std::thread::scope(|scope| {
        let handles: Vec<_> = dst
            .chunks_mut(rows_per_band * dst_row)
            .enumerate()
            .map(|(band, chunk)| {
                #[allow(clippy::cast_possible_truncation)]
                let start = (band * rows_per_band) as u32;
                #[allow(clippy::cast_possible_truncation)]
                let end = start + (chunk.len() / dst_row) as u32;
                scope.spawn(move || convert_rows(fourcc, src, width, start..end, chunk))
            })
            .collect();

        handles.into_iter().try_for_each(|handle| {
            handle
                .join()
                .unwrap_or_else(|payload| std::panic::resume_unwind(payload))
        })
    })
}

/// Convert one packed `Y0 Cb Y1 Cr` row.
///
/// Each pixel uses its own luma sample; chroma advances every second pixel.
/// A trailing unpaired pixel on odd widths has no Cr sample and uses neutral
/// chroma for it.
fn yuyv_row(src: &[u8], dst: &mut [u8]) {
    let mut pixels = dst.chunks_exact_mut(RGB_BYTES);
    for quad in src.chunks(4) {
        let cb = quad.get(1).copied().unwrap_or(128);
        let cr = quad.get(3).copied().unwrap_or(128);
        for &luma in quad.iter().step_by(2) {
            if let Some(pixel) = pixels.next() {
                pixel.copy_from_slice(&yuv_to_rgb(luma, cb, cr));
            }
        }
    }
}

/// Split one Y8I row into the left and right halves of a double-width row.
///
/// Only the R byte of each output pixel is written; G and B keep whatever the
/// buffer held before.
fn y8i_row(src: &[u8], dst: &mut [u8], width: usize) {
    let (left, right) = dst.split_at_mut(width * RGB_BYTES);
    let pixels = left
        .chunks_exact_mut(RGB_BYTES)
        .zip(right.chunks_exact_mut(RGB_BYTES));

    for (sample, (first, second)) in src.chunks_exact(SOURCE_BYTES).zip(pixels) {
        let [lo, hi] = sample else {
            continue;
        };
        let value = u16::from_le_bytes([*lo, *hi]);
        let [high, low] = value.to_be_bytes();
        if let (Some(a), Some(b)) = (first.first_mut(), second.first_mut()) {
            *a = high;
            *b = low;
        }
    }
}

/// Convert one YCbCr sample to RGB.
///
/// Each channel is clamped to `0..=255` and then truncated.
#[must_use]
#[allow(clippy::many_single_char_names)]
pub fn yuv_to_rgb(y: u8, cb: u8, cr: u8) -> [u8; 3] {
    let y_f = f32::from(y);
    let u_f = f32::from(cb) - 128.0;
    let v_f = f32::from(cr) - 128.0;

    let r = 1.402f32.mul_add(v_f, y_f);
    let g = 0.714f32.mul_add(-v_f, 0.344f32.mul_add(-u_f, y_f));
    let b = 1.772f32.mul_add(u_f, y_f);

    [clip(r), clip(g), clip(b)]
}

fn clip(val: f32) -> u8 {
    if val <= 0.0 {
        0
    } else if val >= 255.0 {
        255
    } else {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        {
            val as u8
        }
    }
}
