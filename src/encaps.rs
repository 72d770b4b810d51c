//! Splitting frames into fragments and writing the encapsulated stream.

use crate::error::{EncapsError, Result};
use crate::item;
use crate::model::{ExtendedOffsetTable, ITEM_HEADER_LEN, ITEM_TAG};
use crate::offset_table;

/// Split `frame` into `nr_fragments` even-length pieces.
///
/// Every piece but the last is `ceil(len / nr_fragments)` bytes rounded up
/// to even; the last takes what remains, padded with a null byte when odd.
pub fn fragment_frame(frame: &[u8], nr_fragments: usize) -> Result<Vec<Vec<u8>>> {
    let frame_length = frame.len();
    let max = frame_length.div_ceil(2);

    if nr_fragments == 0 || nr_fragments > max {
        return Err(EncapsError::TooManyFragments {
            requested: nr_fragments,
            max,
        });
    }

    let mut length = frame_length.div_ceil(nr_fragments);
    if length % 2 == 1 {
        length += 1;
    }

    let mut fragments = Vec::with_capacity(nr_fragments);

    for index in 0..nr_fragments - 1 {
        let start = (index * length).min(frame_length);
        let end = (start + length).min(frame_length);
        fragments.push(frame[start..end].to_vec());
    }

    let start = (length * (nr_fragments - 1)).min(frame_length);
    let mut last = frame[start..].to_vec();
    if last.len() % 2 == 1 {
        last.push(0x00);
    }
    fragments.push(last);

    Ok(fragments)
}

/// Wrap a fragment in an item header.
pub fn itemize_fragment(fragment: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(fragment.len() + ITEM_HEADER_LEN as usize);
    item::write_item(&mut out, ITEM_TAG, fragment)?;

    Ok(out)
}

/// Fragment `frame` and wrap every piece in an item header.
pub fn itemize_frame(frame: &[u8], nr_fragments: usize) -> Result<Vec<Vec<u8>>> {
    fragment_frame(frame, nr_fragments)?
        .iter()
        .map(|fragment| itemize_fragment(fragment))
        .collect()
}

/// Encapsulate `frames` into a basic offset table item followed by the
/// fragment items of every frame, in order.
///
/// With `has_bot` the table holds the offset of each frame. No sequence
/// delimiter is appended.
pub fn encapsulate<F: AsRef<[u8]>>(frames: &[F], fragments_per_frame: usize, has_bot: bool) -> Result<Vec<u8>> {
    let nr_frames = frames.len();
    let mut output = Vec::new();

    if has_bot {
        // every frame but the last has to start within reach of a u32
        let total: u64 = frames
            .iter()
            .take(nr_frames.saturating_sub(1))
            .map(|frame| frame.as_ref().len() as u64 + ITEM_HEADER_LEN)
            .sum();

        if total > u32::MAX as u64 {
            return Err(EncapsError::BasicOffsetTableOverflow {
                total,
                max: u32::MAX as u64,
            });
        }

        item::write_item(&mut output, ITEM_TAG, &vec![0xFF; 4 * nr_frames])?;
    } else {
        item::write_item(&mut output, ITEM_TAG, &[])?;
    }

    let mut bot_offsets = Vec::with_capacity(nr_frames);
    let mut itemised_length = 0u64;

    for frame in frames {
        bot_offsets.push(itemised_length);

        for item in itemize_frame(frame.as_ref(), fragments_per_frame)? {
            itemised_length += item.len() as u64;
            output.extend_from_slice(&item);
        }
    }

    if has_bot {
        for (index, offset) in bot_offsets.iter().enumerate() {
            let offset = u32::try_from(*offset).map_err(|_| EncapsError::BasicOffsetTableOverflow {
                total: *offset,
                max: u32::MAX as u64,
            })?;

            let at = ITEM_HEADER_LEN as usize + 4 * index;
            output[at..at + 4].copy_from_slice(&offset.to_le_bytes());
        }
    }

    Ok(output)
}

/// Encapsulate one fragment per frame with an empty basic offset table,
/// returning the matching extended offset table.
pub fn encapsulate_extended<F: AsRef<[u8]>>(frames: &[F]) -> Result<(Vec<u8>, ExtendedOffsetTable)> {
    let table = offset_table::build_extended_offsets(frames);
    let encapsulated = encapsulate(frames, 1, false)?;

    Ok((encapsulated, table))
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::error::ErrorKind;
    use crate::offset_table::get_frame_offsets;

    #[test]
    fn fragments_are_even_and_cover_the_frame() {
        let frame: Vec<u8> = (1..=9).collect();
        let fragments = fragment_frame(&frame, 3).unwrap();

        assert_eq!(fragments, vec![vec![1, 2, 3, 4], vec![5, 6, 7, 8], vec![9, 0]]);
    }

    #[test]
    fn last_fragment_can_be_empty() {
        let frame = vec![7u8; 10];
        let fragments = fragment_frame(&frame, 4).unwrap();

        assert_eq!(fragments.len(), 4);
        assert_eq!(fragments[3], Vec::<u8>::new());
        assert_eq!(fragments.concat(), frame);
    }

    #[test]
    fn too_many_fragments() {
        let err = fragment_frame(&[1, 2, 3], 3).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert!(matches!(err, EncapsError::TooManyFragments { requested: 3, max: 2 }));

        assert!(fragment_frame(&[1, 2, 3], 0).is_err());
    }

    #[test]
    fn itemized_fragments_have_headers() {
        let items = itemize_frame(&[1, 2, 3], 1).unwrap();
        assert_eq!(items, vec![vec![0xFE, 0xFF, 0x00, 0xE0, 4, 0, 0, 0, 1, 2, 3, 0]]);
    }

    #[test]
    fn basic_offsets_are_back_patched() {
        let data = encapsulate(&[&[1u8, 2, 3][..], &[4, 5][..]], 1, true).unwrap();

        let mut fp = Cursor::new(&data);
        assert_eq!(get_frame_offsets(&mut fp).unwrap(), (true, vec![0, 12]));
        assert_eq!(data.len(), 16 + 12 + 10);
    }

    #[test]
    fn empty_table_without_bot() {
        let data = encapsulate(&[vec![1u8, 2]], 1, false).unwrap();
        assert_eq!(&data[..8], &[0xFE, 0xFF, 0x00, 0xE0, 0, 0, 0, 0]);
    }

    #[test]
    fn extended_encapsulation() {
        let frames = vec![vec![1u8, 2, 3], vec![4, 5]];
        let (data, table) = encapsulate_extended(&frames).unwrap();

        let mut fp = Cursor::new(&data);
        assert_eq!(get_frame_offsets(&mut fp).unwrap(), (false, vec![0]));
        assert_eq!(table.offsets, vec![0, 12]);
        assert_eq!(table.lengths, vec![3, 2]);
    }
}
