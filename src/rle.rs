//! RLE Lossless.
//!
//! A frame is a 64 byte header followed by up to 15 PackBits encoded
//! segments, one per byte plane. For a sample of `n` bytes the first segment
//! holds the most significant bytes. Decoded frames are laid out sample
//! plane after sample plane, each sample stored little-endian.

use byteorder::{ByteOrder, LittleEndian};

use crate::diagnostics::{Diagnostics, NonConformanceKind};
use crate::error::{EncapsError, Result};
use crate::model::RleParams;

pub const RLE_HEADER_LEN: usize = 64;
pub const MAX_SEGMENTS: usize = 15;

/// Segment start offsets from the 64 byte header.
pub fn parse_header(data: &[u8]) -> Result<Vec<u32>> {
    if data.len() < RLE_HEADER_LEN {
        return Err(EncapsError::TruncatedRleHeader { length: data.len() });
    }

    let count = LittleEndian::read_u32(&data[0..4]);
    if count == 0 || count as usize > MAX_SEGMENTS {
        return Err(EncapsError::InvalidSegmentCount { count });
    }

    let mut offsets = vec![0u32; count as usize];
    LittleEndian::read_u32_into(&data[4..4 + 4 * count as usize], &mut offsets);

    Ok(offsets)
}

/// Build the 64 byte header for segments of the given lengths.
pub fn build_header(segment_lengths: &[usize]) -> Result<[u8; RLE_HEADER_LEN]> {
    if segment_lengths.is_empty() || segment_lengths.len() > MAX_SEGMENTS {
        return Err(EncapsError::InvalidSegmentCount {
            count: segment_lengths.len() as u32,
        });
    }

    let mut header = [0u8; RLE_HEADER_LEN];
    LittleEndian::write_u32(&mut header[0..4], segment_lengths.len() as u32);

    let mut offset = RLE_HEADER_LEN;
    for (index, length) in segment_lengths.iter().enumerate() {
        let value = u32::try_from(offset).map_err(|_| EncapsError::InvalidSegmentOffset {
            segment: index,
            offset: u32::MAX,
        })?;

        let at = 4 + 4 * index;
        LittleEndian::write_u32(&mut header[at..at + 4], value);
        offset += length;
    }

    Ok(header)
}

/// Decode one PackBits segment.
///
/// A run cut short by the end of the data copies what is there; the caller
/// checks the decoded length.
pub fn decode_segment(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() * 2);
    let mut pos = 0;

    loop {
        if pos >= data.len() {
            break;
        }

        let control = data[pos] as usize;
        pos += 1;

        if control < 128 {
            // literal run of control + 1 bytes
            let end = (pos + control + 1).min(data.len());
            out.extend_from_slice(&data[pos..end]);
            pos = end;
        } else if control > 128 {
            // the next byte, 257 - control times
            if pos >= data.len() {
                break;
            }
            out.extend(std::iter::repeat(data[pos]).take(257 - control));
            pos += 1;
        }
        // 128 is a no-op
    }

    out
}

fn push_literal(out: &mut Vec<u8>, literal: &[u8]) {
    for run in literal.chunks(128) {
        out.push((run.len() - 1) as u8);
        out.extend_from_slice(run);
    }
}

/// Encode one row of a byte plane.
///
/// Repeats of two or more bytes become replicate runs, everything else is
/// gathered into literal runs. Runs never exceed 128 bytes.
pub fn encode_row(row: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(row.len() + row.len() / 128 + 2);
    let mut literal_start = 0;
    let mut pos = 0;

    loop {
        if pos >= row.len() {
            break;
        }

        let value = row[pos];
        let mut run = 1;
        while pos + run < row.len() && row[pos + run] == value {
            run += 1;
        }

        if run == 1 {
            pos += 1;
            continue;
        }

        push_literal(&mut out, &row[literal_start..pos]);

        let mut remaining = run;
        while remaining > 0 {
            let length = remaining.min(128);
            if length > 1 {
                out.push((257 - length) as u8);
            } else {
                // a lone leftover byte is cheaper as a literal
                out.push(0);
            }
            out.push(value);
            remaining -= length;
        }

        pos += run;
        literal_start = pos;
    }

    push_literal(&mut out, &row[literal_start..]);

    out
}

/// Encode a byte plane row by row; odd results are padded with a null byte.
pub fn encode_segment(plane: &[u8], columns: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(plane.len());

    if columns == 0 {
        return out;
    }

    for row in plane.chunks(columns) {
        out.extend(encode_row(row));
    }

    if out.len() % 2 == 1 {
        out.push(0x00);
    }

    out
}

fn check_segment_length(
    segment: &mut Vec<u8>,
    index: usize,
    params: &RleParams,
    diag: &mut Diagnostics,
) -> Result<()> {
    let expected = params.pixels();
    let actual = segment.len();

    if actual < expected || (actual > expected && params.strict) {
        return Err(EncapsError::SegmentLengthMismatch { actual, expected });
    }

    if actual > expected {
        diag.warn(
            NonConformanceKind::SegmentExcess,
            None,
            format!(
                "RLE segment {} decoded to {} bytes, {} expected; the excess was dropped",
                index, actual, expected
            ),
        );
        segment.truncate(expected);
    }

    Ok(())
}

/// Decode an RLE Lossless frame.
pub fn decode_frame(data: &[u8], params: &RleParams, diag: &mut Diagnostics) -> Result<Vec<u8>> {
    let bytes_per_sample = params.bytes_per_sample()?;
    let expected = params.expected_segments()?;

    let offsets = parse_header(data)?;
    if offsets.len() != expected {
        return Err(EncapsError::SegmentCountMismatch {
            found: offsets.len(),
            expected,
        });
    }

    let mut bounds = offsets.iter().map(|&o| o as usize).collect::<Vec<usize>>();
    bounds.push(data.len());

    // the first segment follows the header, the rest strictly increase
    for (index, window) in bounds.windows(2).enumerate() {
        let starts_ok = index != 0 || window[0] == RLE_HEADER_LEN;
        let ordered = if index + 1 == offsets.len() {
            window[0] <= window[1]
        } else {
            window[0] < window[1]
        };

        if !starts_ok || !ordered {
            return Err(EncapsError::InvalidSegmentOffset {
                segment: index,
                offset: offsets[index],
            });
        }
    }

    let pixels = params.pixels();
    let plane_length = pixels * bytes_per_sample;
    let mut frame = vec![0u8; plane_length * params.samples_per_pixel as usize];

    for sample in 0..params.samples_per_pixel as usize {
        let plane = &mut frame[sample * plane_length..(sample + 1) * plane_length];

        for byte in 0..bytes_per_sample {
            let index = sample * bytes_per_sample + byte;
            let mut segment = decode_segment(&data[bounds[index]..bounds[index + 1]]);
            check_segment_length(&mut segment, index, params, diag)?;

            // most significant byte first in the data, last in the output
            let position = bytes_per_sample - 1 - byte;
            for (pixel, value) in segment.iter().enumerate() {
                plane[pixel * bytes_per_sample + position] = *value;
            }
        }
    }

    Ok(frame)
}

/// Encode a frame laid out the way [`decode_frame`] returns it.
pub fn encode_frame(frame: &[u8], params: &RleParams) -> Result<Vec<u8>> {
    let bytes_per_sample = params.bytes_per_sample()?;
    let nr_segments = params.expected_segments()?;
    let expected_length = params.frame_length()?;

    if nr_segments > MAX_SEGMENTS {
        return Err(EncapsError::InvalidSegmentCount {
            count: nr_segments as u32,
        });
    }

    if frame.len() != expected_length {
        return Err(EncapsError::InvalidParameter(format!(
            "frame is {} bytes but {} rows x {} columns x {} samples x {} bytes needs {}",
            frame.len(),
            params.rows,
            params.columns,
            params.samples_per_pixel,
            bytes_per_sample,
            expected_length
        )));
    }

    let pixels = params.pixels();
    let plane_length = pixels * bytes_per_sample;
    let mut segments = Vec::with_capacity(nr_segments);

    for sample in 0..params.samples_per_pixel as usize {
        let plane = &frame[sample * plane_length..(sample + 1) * plane_length];

        for byte in 0..bytes_per_sample {
            let position = bytes_per_sample - 1 - byte;
            let byte_plane = plane
                .iter()
                .skip(position)
                .step_by(bytes_per_sample)
                .copied()
                .collect::<Vec<u8>>();

            segments.push(encode_segment(&byte_plane, params.columns as usize));
        }
    }

    let lengths = segments.iter().map(|s| s.len()).collect::<Vec<usize>>();
    let header = build_header(&lengths)?;

    let mut out = Vec::with_capacity(RLE_HEADER_LEN + lengths.iter().sum::<usize>());
    out.extend_from_slice(&header);
    for segment in segments {
        out.extend(segment);
    }

    Ok(out)
}
