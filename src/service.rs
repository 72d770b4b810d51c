use std::io::{Cursor, Seek, SeekFrom};
use std::path::Path;

use dicom_encaps::item;
use dicom_encaps::model::{
    ExtendedOffsetTable, ItemHeader, Tag, ITEM_DELIMITER_TAG, ITEM_TAG, SEQUENCE_DELIMITER_TAG, UNDEFINED_LENGTH,
};
use dicom_encaps::{util, Diagnostics, NonConformanceKind};
use image::{ImageBuffer, Luma, Rgb};

use crate::CommonResult;

const PREAMBLE_LENGTH: usize = 128;
const PREFIX: &[u8; 4] = b"DICM";

pub const TRANSFER_SYNTAX_UID: Tag = Tag::new(0x0002, 0x0010);
pub const SAMPLES_PER_PIXEL: Tag = Tag::new(0x0028, 0x0002);
pub const PHOTOMETRIC_INTERPRETATION: Tag = Tag::new(0x0028, 0x0004);
pub const NUMBER_OF_FRAMES: Tag = Tag::new(0x0028, 0x0008);
pub const ROWS: Tag = Tag::new(0x0028, 0x0010);
pub const COLUMNS: Tag = Tag::new(0x0028, 0x0011);
pub const BITS_ALLOCATED: Tag = Tag::new(0x0028, 0x0100);
pub const EXTENDED_OFFSET_TABLE: Tag = Tag::new(0x7FE0, 0x0001);
pub const EXTENDED_OFFSET_TABLE_LENGTHS: Tag = Tag::new(0x7FE0, 0x0002);
pub const PIXEL_DATA: Tag = Tag::new(0x7FE0, 0x0010);

// explicit VRs with a 2 byte reserved field and a 4 byte length
const LONG_VRS: [&str; 13] = [
    "OB", "OD", "OF", "OL", "OV", "OW", "SQ", "SV", "UC", "UN", "UR", "UT", "UV",
];

const TEXT_VRS: [&str; 16] = [
    "AE", "AS", "CS", "DA", "DS", "DT", "IS", "LO", "LT", "PN", "SH", "ST", "TM", "UC", "UI", "UT",
];

const DELIMITER_READ_SIZE: usize = 8192;

#[derive(Debug, Clone, PartialEq)]
pub enum DicomValue {
    Text(String),
    U16(Vec<u16>),
    Bytes(Vec<u8>),
    /// A value of undefined length, kept as its position in the file.
    Undefined { start: usize, length: usize },
}

#[derive(Debug, Clone, PartialEq)]
pub struct DataElement {
    pub tag: Tag,
    pub vr: String,
    pub data: DicomValue,
}

/// What the command line needs to know about the pixel data of a file.
#[derive(Debug, Clone, Default)]
pub struct PixelInfo {
    pub transfer_syntax: String,
    pub rows: u16,
    pub columns: u16,
    pub samples_per_pixel: u16,
    pub bits_allocated: u16,
    pub photometric_interpretation: String,
    pub number_of_frames: Option<usize>,
    pub extended: Option<ExtendedOffsetTable>,
    /// Start and length of the encapsulated value, without the delimiter.
    pub pixel_data: Option<(usize, usize)>,
}

pub fn get_preamble(buffer: &[u8]) -> CommonResult<usize> {
    let length = PREAMBLE_LENGTH + PREFIX.len();

    if buffer.len() < length || &buffer[PREAMBLE_LENGTH..length] != PREFIX {
        return Err("not a DICOM file: the DICM prefix is missing".into());
    }

    Ok(length)
}

pub fn decode_text(bytes: &[u8]) -> String {
    let (text, _, _) = encoding_rs::WINDOWS_1252.decode(bytes);

    text.trim_end_matches(['\0', ' ']).trim_start().to_string()
}

fn read_u16_values(bytes: &[u8]) -> Vec<u16> {
    bytes
        .chunks_exact(2)
        .map(|v| u16::from_le_bytes([v[0], v[1]]))
        .collect()
}

/// Length of an encapsulated value, found by walking its items up to the
/// sequence delimiter. Returns the value length and the bytes consumed
/// including the delimiter.
fn encapsulated_length(buffer: &[u8], start: usize, diag: &mut Diagnostics) -> CommonResult<(usize, usize)> {
    let mut fp = Cursor::new(&buffer[start..]);

    loop {
        if item::skip_item(&mut fp, diag)?.is_none() {
            break;
        }
    }

    let length = fp.stream_position()? as usize;
    let remaining = buffer.len() - start - length;

    // the delimiter itself, when there is one
    Ok((length, length + remaining.min(8)))
}

fn read_header(buffer: &[u8], at: usize) -> CommonResult<ItemHeader> {
    let mut fp = Cursor::new(buffer);
    fp.set_position(at as u64);

    item::read_item_header(&mut fp)?.ok_or_else(|| format!("truncated item header at offset {}", at).into())
}

fn check_delimiter_length(header: &ItemHeader, diag: &mut Diagnostics) {
    if header.length != 0 {
        diag.warn(
            NonConformanceKind::DelimiterLength,
            Some(header.offset),
            format!("{} has length {}, expected 0", header.tag, header.length),
        );
    }
}

/// Length of a sequence of undefined length, walking its items and their
/// data elements so nested sequences are skipped whole. Returns the value
/// length and the bytes consumed including the delimiter.
fn sequence_length(buffer: &[u8], start: usize, diag: &mut Diagnostics) -> CommonResult<(usize, usize)> {
    let mut at = start;

    loop {
        let header = read_header(buffer, at)?;

        if header.tag == SEQUENCE_DELIMITER_TAG {
            check_delimiter_length(&header, diag);
            return Ok((at - start, at + 8 - start));
        }

        if header.tag != ITEM_TAG {
            return Err(format!(
                "expected an item or a sequence delimiter at offset {}, found {}",
                at, header.tag
            )
            .into());
        }

        at += 8;

        if header.length != UNDEFINED_LENGTH {
            at += header.length as usize;
            continue;
        }

        // item dataset up to its delimiter
        loop {
            let next = read_header(buffer, at)?;
            if next.tag == ITEM_DELIMITER_TAG {
                check_delimiter_length(&next, diag);
                at += 8;
                break;
            }

            let (_, consumed_bytes) = get_data_element(buffer, at, diag)?;
            at += consumed_bytes;
        }
    }
}

/// Parse the explicit VR little endian data element at `offset`.
pub fn get_data_element(buffer: &[u8], offset: usize, diag: &mut Diagnostics) -> CommonResult<(DataElement, usize)> {
    if buffer.len() - offset < 8 {
        return Err(format!("truncated data element at offset {}", offset).into());
    }

    let mut length = 0;
    let header = &buffer[offset..];

    let group = u16::from_le_bytes([header[0], header[1]]);
    let element = u16::from_le_bytes([header[2], header[3]]);
    let tag = Tag::new(group, element);
    length += 4;

    let vr = String::from_utf8_lossy(&header[4..6]).to_string();
    length += 2;

    let value_length;
    if LONG_VRS.contains(&vr.as_str()) {
        if header.len() < 12 {
            return Err(format!("truncated data element {} at offset {}", tag, offset).into());
        }

        // reserved
        length += 2;
        value_length = u32::from_le_bytes(header[length..length + 4].try_into()?);
        length += 4;
    } else {
        value_length = u16::from_le_bytes([header[6], header[7]]) as u32;
        length += 2;
    }

    let value_start = offset + length;

    if value_length == UNDEFINED_LENGTH {
        let (value_length, consumed) = if tag == PIXEL_DATA {
            encapsulated_length(buffer, value_start, diag)?
        } else if vr == "SQ" {
            sequence_length(buffer, value_start, diag)?
        } else {
            // UN holds implicit VR data, so only the delimiter can be searched for
            let mut fp = Cursor::new(buffer);
            fp.seek(SeekFrom::Start(value_start as u64))?;
            let length = util::length_of_undefined_length(&mut fp, SEQUENCE_DELIMITER_TAG, DELIMITER_READ_SIZE, diag)?
                as usize;
            (length, (length + 8).min(buffer.len() - value_start))
        };

        tracing::debug!(%tag, vr = %vr, length = value_length, "undefined length value");

        let data_element = DataElement {
            tag,
            vr,
            data: DicomValue::Undefined {
                start: value_start,
                length: value_length,
            },
        };

        return Ok((data_element, length + consumed));
    }

    let value_length = value_length as usize;
    if buffer.len() - value_start < value_length {
        return Err(format!(
            "the value of {} at offset {} needs {} bytes, {} left",
            tag,
            offset,
            value_length,
            buffer.len() - value_start
        )
        .into());
    }

    let value = &buffer[value_start..value_start + value_length];
    let data = if TEXT_VRS.contains(&vr.as_str()) {
        DicomValue::Text(decode_text(value))
    } else if vr == "US" {
        DicomValue::U16(read_u16_values(value))
    } else {
        DicomValue::Bytes(value.to_vec())
    };

    Ok((DataElement { tag, vr, data }, length + value_length))
}

fn check_transfer_syntax(data_elements: &[DataElement]) -> CommonResult<()> {
    match get_text(data_elements, TRANSFER_SYNTAX_UID) {
        Some(uid) if uid == "1.2.840.10008.1.2" || uid == "1.2.840.10008.1.2.2" => {
            Err(format!("only explicit VR little endian datasets are supported, found {}", uid).into())
        }
        Some(_) => Ok(()),
        None => Err("the file meta information has no transfer syntax".into()),
    }
}

/// Walk every top level data element of a Part 10 file.
pub fn parse_file(buffer: &[u8], diag: &mut Diagnostics) -> CommonResult<Vec<DataElement>> {
    let mut offset = get_preamble(buffer)?;
    let mut data_elements = Vec::new();
    let mut checked = false;

    loop {
        if buffer.len() - offset < 8 {
            break;
        }

        let group = u16::from_le_bytes([buffer[offset], buffer[offset + 1]]);
        if group != 0x0002 && !checked {
            check_transfer_syntax(&data_elements)?;
            checked = true;
        }

        let (data_element, consumed_bytes) = get_data_element(buffer, offset, diag)?;
        offset += consumed_bytes;

        data_elements.push(data_element);
    }

    Ok(data_elements)
}

pub fn get_data_element_via_tag(data_elements: &[DataElement], tag: Tag) -> Option<&DataElement> {
    data_elements.iter().find(|v| v.tag == tag)
}

fn get_text(data_elements: &[DataElement], tag: Tag) -> Option<String> {
    match get_data_element_via_tag(data_elements, tag).map(|v| &v.data) {
        Some(DicomValue::Text(v)) => Some(v.clone()),
        _ => None,
    }
}

fn get_u16(data_elements: &[DataElement], tag: Tag) -> Option<u16> {
    match get_data_element_via_tag(data_elements, tag).map(|v| &v.data) {
        Some(DicomValue::U16(v)) => v.first().copied(),
        _ => None,
    }
}

fn get_bytes(data_elements: &[DataElement], tag: Tag) -> Option<&[u8]> {
    match get_data_element_via_tag(data_elements, tag).map(|v| &v.data) {
        Some(DicomValue::Bytes(v)) => Some(v.as_slice()),
        _ => None,
    }
}

pub fn get_pixel_info(data_elements: &[DataElement]) -> CommonResult<PixelInfo> {
    let transfer_syntax = get_text(data_elements, TRANSFER_SYNTAX_UID).ok_or("no transfer syntax")?;

    let number_of_frames = match get_text(data_elements, NUMBER_OF_FRAMES) {
        Some(v) if !v.is_empty() => Some(v.parse::<usize>()?),
        _ => None,
    };

    let extended = match (
        get_bytes(data_elements, EXTENDED_OFFSET_TABLE),
        get_bytes(data_elements, EXTENDED_OFFSET_TABLE_LENGTHS),
    ) {
        (Some(offsets), Some(lengths)) if !offsets.is_empty() => {
            Some(ExtendedOffsetTable::from_bytes(offsets, lengths)?)
        }
        _ => None,
    };

    let pixel_data = match get_data_element_via_tag(data_elements, PIXEL_DATA).map(|v| &v.data) {
        Some(DicomValue::Undefined { start, length }) => Some((*start, *length)),
        Some(_) => return Err("the pixel data is not encapsulated".into()),
        None => None,
    };

    Ok(PixelInfo {
        transfer_syntax,
        rows: get_u16(data_elements, ROWS).unwrap_or(0),
        columns: get_u16(data_elements, COLUMNS).unwrap_or(0),
        samples_per_pixel: get_u16(data_elements, SAMPLES_PER_PIXEL).unwrap_or(1),
        bits_allocated: get_u16(data_elements, BITS_ALLOCATED).unwrap_or(0),
        photometric_interpretation: get_text(data_elements, PHOTOMETRIC_INTERPRETATION).unwrap_or_default(),
        number_of_frames,
        extended,
        pixel_data,
    })
}

fn invert<T: Copy + Ord + std::ops::Sub<Output = T>>(pixels: &mut [T]) {
    if let Some(max) = pixels.iter().max().copied() {
        for v in pixels.iter_mut() {
            *v = max - *v;
        }
    }
}

/// Write a decoded RLE frame as a PNG. Returns `false` when the layout has no
/// PNG counterpart.
pub fn write_frame_image(path: &Path, info: &PixelInfo, frame: &[u8]) -> CommonResult<bool> {
    let width = info.columns as u32;
    let height = info.rows as u32;
    let monochrome1 = info.photometric_interpretation == "MONOCHROME1";

    match (info.samples_per_pixel, info.bits_allocated) {
        (1, 8) => {
            let mut pixels = frame.to_vec();
            if monochrome1 {
                invert(&mut pixels);
            }

            let img = ImageBuffer::<Luma<u8>, _>::from_raw(width, height, pixels).ok_or("frame is too short")?;
            img.save(path)?;
        }
        (1, 16) => {
            let mut pixels = read_u16_values(frame);
            if monochrome1 {
                invert(&mut pixels);
            }

            let img = ImageBuffer::<Luma<u16>, _>::from_raw(width, height, pixels).ok_or("frame is too short")?;
            img.save(path)?;
        }
        (3, 8) if info.photometric_interpretation == "RGB" => {
            let plane = width as usize * height as usize;
            if frame.len() < plane * 3 {
                return Err("frame is too short".into());
            }

            let mut img = ImageBuffer::<Rgb<u8>, _>::new(width, height);

            // planar samples to interleaved pixels
            for (x, y, pixel) in img.enumerate_pixels_mut() {
                let index = (y * width + x) as usize;
                *pixel = Rgb([frame[index], frame[plane + index], frame[2 * plane + index]]);
            }

            img.save(path)?;
        }
        _ => return Ok(false),
    }

    Ok(true)
}
