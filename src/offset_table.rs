// Offsets are relative to the first byte of the first fragment item.

use std::io::{Read, Seek, SeekFrom};

use byteorder::{LittleEndian, ReadBytesExt};

use crate::diagnostics::Diagnostics;
use crate::error::{EncapsError, Result};
use crate::item;
use crate::model::{ExtendedOffsetTable, MarkerSet, ITEM_HEADER_LEN, ITEM_TAG};

/// Read the basic offset table item at the current position.
///
/// An empty table gives an empty `Vec`. The stream is left at the first
/// fragment item.
pub fn parse_basic_offsets<R: Read + Seek + ?Sized>(fp: &mut R) -> Result<Vec<u32>> {
    let start = fp.stream_position()?;

    let header = match item::read_item_header(fp)? {
        Some(header) => header,
        None => return Err(EncapsError::InsufficientFrames { required: 1 }),
    };

    if header.tag != ITEM_TAG {
        return Err(EncapsError::UnexpectedTag {
            tag: header.tag,
            offset: start,
            context: "the basic offset table item",
        });
    }

    if header.length % 4 != 0 {
        return Err(EncapsError::InvalidBasicOffsetTableLength {
            length: header.length,
            offset: start + 4,
        });
    }

    let mut value = Vec::new();
    let read = Read::take(&mut *fp, header.length as u64).read_to_end(&mut value)?;
    if read != header.length as usize {
        return Err(EncapsError::TruncatedItem {
            offset: start,
            length: header.length as u64,
            available: read as u64,
        });
    }

    let nr_offsets = value.len() / 4;
    let mut offsets = vec![0u32; nr_offsets];
    (&value[..]).read_u32_into::<LittleEndian>(&mut offsets)?;

    tracing::debug!(offsets = nr_offsets, "parsed basic offset table");

    Ok(offsets)
}

/// Read the basic offset table, returning whether it had any entries.
///
/// An empty table comes back as `(false, [0])`: no table, a single frame
/// starting at the first fragment.
pub fn get_frame_offsets<R: Read + Seek + ?Sized>(fp: &mut R) -> Result<(bool, Vec<u32>)> {
    let offsets = parse_basic_offsets(fp)?;

    if offsets.is_empty() {
        return Ok((false, vec![0]));
    }

    Ok((true, offsets))
}

/// Count the fragments from the current position up to the delimiter or end
/// of data, with the offset of each relative to the current position.
///
/// The stream position is restored afterwards.
pub fn parse_fragments<R: Read + Seek + ?Sized>(
    fp: &mut R,
    diag: &mut Diagnostics,
) -> Result<(usize, Vec<u64>)> {
    let start = fp.stream_position()?;
    let mut offsets = Vec::new();

    loop {
        match item::skip_item(fp, diag)? {
            Some(header) => offsets.push(header.offset - start),
            None => break,
        }
    }

    fp.seek(SeekFrom::Start(start))?;

    Ok((offsets.len(), offsets))
}

pub fn get_nr_fragments<R: Read + Seek + ?Sized>(fp: &mut R, diag: &mut Diagnostics) -> Result<usize> {
    Ok(parse_fragments(fp, diag)?.0)
}

fn to_table_offset(offset: u64) -> Result<u32> {
    u32::try_from(offset).map_err(|_| EncapsError::BasicOffsetTableOverflow {
        total: offset,
        max: u32::MAX as u64,
    })
}

/// Build the frame offsets for a stream without a usable basic offset table.
///
/// The stream must be at the first fragment item. Fragments starting with
/// one of the start markers open a new frame. When no fragment starts with a
/// marker but there are as many fragments as frames, every fragment is a
/// frame. On success the stream is back at the first fragment.
pub fn build_basic_offsets<R: Read + Seek + ?Sized>(
    fp: &mut R,
    number_of_frames: usize,
    markers: &MarkerSet,
    diag: &mut Diagnostics,
) -> Result<Vec<u32>> {
    let start = fp.stream_position()?;

    let mut fragment_offsets = Vec::new();
    let mut frame_offsets = Vec::new();

    loop {
        let header = match item::read_fragment_header(fp, diag)? {
            Some(header) => header,
            None => break,
        };

        let relative = header.offset - start;
        fragment_offsets.push(relative);

        let mut head = [0u8; 2];
        let wanted = header.length.min(2) as usize;
        let got = crate::util::read_up_to(fp, &mut head[..wanted])?;
        if markers.is_start(&head[..got]) {
            frame_offsets.push(relative);
        }

        fp.seek(SeekFrom::Start(header.offset + ITEM_HEADER_LEN + header.length as u64))?;
    }

    fp.seek(SeekFrom::Start(start))?;

    if frame_offsets.is_empty() && fragment_offsets.len() == number_of_frames {
        frame_offsets = fragment_offsets;
    }

    if frame_offsets.len() != number_of_frames {
        return Err(EncapsError::BasicOffsetTableMismatch {
            found: frame_offsets.len(),
            expected: number_of_frames,
        });
    }

    tracing::debug!(frames = number_of_frames, "built basic offset table");

    frame_offsets.into_iter().map(to_table_offset).collect()
}

/// Read the basic offset table, building one from the fragments when it is
/// empty or doesn't describe `number_of_frames` frames.
pub fn resolve_frame_offsets<R: Read + Seek + ?Sized>(
    fp: &mut R,
    number_of_frames: usize,
    markers: &MarkerSet,
    diag: &mut Diagnostics,
) -> Result<Vec<u32>> {
    let offsets = parse_basic_offsets(fp)?;

    if offsets.len() == number_of_frames {
        return Ok(offsets);
    }

    if !offsets.is_empty() {
        tracing::debug!(
            table = offsets.len(),
            frames = number_of_frames,
            "basic offset table is incomplete, rebuilding it"
        );
    }

    build_basic_offsets(fp, number_of_frames, markers, diag)
}

/// Build the extended offset table for frames about to be encapsulated one
/// fragment per frame.
pub fn build_extended_offsets<F: AsRef<[u8]>>(frames: &[F]) -> ExtendedOffsetTable {
    let mut offsets = Vec::with_capacity(frames.len());
    let mut lengths = Vec::with_capacity(frames.len());
    let mut next = 0u64;

    for frame in frames {
        let length = frame.as_ref().len() as u64;
        offsets.push(next);
        lengths.push(length);
        next += ITEM_HEADER_LEN + length + length % 2;
    }

    ExtendedOffsetTable { offsets, lengths }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::error::ErrorKind;
    use crate::item::{write_item, write_sequence_delimiter};
    use crate::model::Tag;

    fn stream(bot: &[u32], fragments: &[&[u8]]) -> Cursor<Vec<u8>> {
        let mut data = Vec::new();
        let bot: Vec<u8> = bot.iter().flat_map(|v| v.to_le_bytes()).collect();
        write_item(&mut data, ITEM_TAG, &bot).unwrap();
        for fragment in fragments {
            write_item(&mut data, ITEM_TAG, fragment).unwrap();
        }
        write_sequence_delimiter(&mut data).unwrap();
        Cursor::new(data)
    }

    #[test]
    fn empty_table_is_single_frame_sentinel() {
        let mut fp = stream(&[], &[&[1, 2]]);
        assert_eq!(get_frame_offsets(&mut fp).unwrap(), (false, vec![0]));
        assert_eq!(fp.position(), 8);
    }

    #[test]
    fn reads_offsets_in_order() {
        let mut fp = stream(&[0, 10, 20], &[]);
        assert_eq!(get_frame_offsets(&mut fp).unwrap(), (true, vec![0, 10, 20]));
        assert_eq!(fp.position(), 20);
    }

    #[test]
    fn length_not_multiple_of_four() {
        let mut data = Vec::new();
        write_item(&mut data, ITEM_TAG, &[0, 0, 0]).unwrap();
        data.push(0);
        let mut fp = Cursor::new(data);

        let err = parse_basic_offsets(&mut fp).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Format);
        assert!(matches!(
            err,
            EncapsError::InvalidBasicOffsetTableLength { length: 3, offset: 4 }
        ));
    }

    #[test]
    fn huge_table_length_is_truncation() {
        let mut data = vec![0xFE, 0xFF, 0x00, 0xE0, 0xF0, 0xFF, 0xFF, 0xFF];
        data.extend_from_slice(&[0, 0, 0, 0]);
        let mut fp = Cursor::new(data);

        let err = parse_basic_offsets(&mut fp).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Format);
        assert!(matches!(
            err,
            EncapsError::TruncatedItem { offset: 0, length: 0xFFFF_FFF0, available: 4 }
        ));
    }

    #[test]
    fn wrong_tag_for_table() {
        let mut data = vec![0u8; 4];
        write_item(&mut data, Tag::new(0xFFFE, 0xE0DD), &[]).unwrap();
        let mut fp = Cursor::new(data);
        fp.set_position(4);

        let err = parse_basic_offsets(&mut fp).unwrap_err();
        assert!(matches!(err, EncapsError::UnexpectedTag { offset: 4, .. }));
    }

    #[test]
    fn counts_fragments_and_restores() {
        let mut fp = stream(&[], &[&[1, 2], &[3, 4, 5, 6], &[]]);
        parse_basic_offsets(&mut fp).unwrap();
        let mut diag = Diagnostics::new();

        let (count, offsets) = parse_fragments(&mut fp, &mut diag).unwrap();
        assert_eq!(count, 3);
        assert_eq!(offsets, vec![0, 10, 22]);
        assert_eq!(fp.position(), 8);
        assert_eq!(get_nr_fragments(&mut fp, &mut diag).unwrap(), 3);
    }

    #[test]
    fn builds_offsets_from_start_markers() {
        let mut fp = stream(
            &[],
            &[
                &[0xFF, 0xD8, 1, 2],
                &[3, 4, 0xFF, 0xD9],
                &[0xFF, 0x4F, 5, 6],
                &[0xFF, 0xD8, 0xFF, 0xD9],
            ],
        );
        parse_basic_offsets(&mut fp).unwrap();
        let mut diag = Diagnostics::new();

        let offsets = build_basic_offsets(&mut fp, 3, &MarkerSet::jpeg_family(), &mut diag).unwrap();
        assert_eq!(offsets, vec![0, 24, 36]);
        assert_eq!(fp.position(), 8);
    }

    #[test]
    fn builds_one_offset_per_fragment_without_markers() {
        let mut fp = stream(&[], &[&[1, 2], &[3, 4]]);
        parse_basic_offsets(&mut fp).unwrap();
        let mut diag = Diagnostics::new();

        let offsets = build_basic_offsets(&mut fp, 2, &MarkerSet::jpeg_family(), &mut diag).unwrap();
        assert_eq!(offsets, vec![0, 10]);
    }

    #[test]
    fn built_offsets_must_match_frame_count() {
        let mut fp = stream(&[], &[&[1, 2], &[3, 4], &[5, 6]]);
        parse_basic_offsets(&mut fp).unwrap();
        let mut diag = Diagnostics::new();

        let err = build_basic_offsets(&mut fp, 2, &MarkerSet::jpeg_family(), &mut diag).unwrap_err();
        assert!(matches!(
            err,
            EncapsError::BasicOffsetTableMismatch { found: 0, expected: 2 }
        ));
    }

    #[test]
    fn resolve_prefers_a_complete_table() {
        let mut fp = stream(&[0, 10], &[&[1, 2], &[3, 4]]);
        let mut diag = Diagnostics::new();
        let offsets = resolve_frame_offsets(&mut fp, 2, &MarkerSet::default(), &mut diag).unwrap();
        assert_eq!(offsets, vec![0, 10]);

        let mut fp = stream(&[], &[&[1, 2], &[3, 4]]);
        let offsets = resolve_frame_offsets(&mut fp, 2, &MarkerSet::default(), &mut diag).unwrap();
        assert_eq!(offsets, vec![0, 10]);
    }

    #[test]
    fn extended_offsets_include_padding_and_headers() {
        let table = build_extended_offsets(&[vec![1u8, 2, 3], vec![4, 5], vec![6]]);
        assert_eq!(table.offsets, vec![0, 12, 22]);
        assert_eq!(table.lengths, vec![3, 2, 1]);
    }
}
