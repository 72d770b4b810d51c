//! Item framing. Always little-endian.

use std::io::{Read, Seek, SeekFrom, Write};

use byteorder::{LittleEndian, WriteBytesExt};

use crate::diagnostics::{Diagnostics, NonConformanceKind};
use crate::error::{EncapsError, Result};
use crate::model::{ItemHeader, Tag, ITEM_HEADER_LEN, ITEM_TAG, SEQUENCE_DELIMITER_TAG, UNDEFINED_LENGTH};
use crate::util;

/// Read the tag and length at the current position.
///
/// Returns `None` when fewer than 8 bytes are left.
pub fn read_item_header<R: Read + Seek + ?Sized>(fp: &mut R) -> Result<Option<ItemHeader>> {
    let offset = fp.stream_position()?;

    let tag = match util::read_tag(fp)? {
        Some(tag) => tag,
        None => return Ok(None),
    };

    let length = match util::read_ul(fp)? {
        Some(length) => length,
        None => return Ok(None),
    };

    Ok(Some(ItemHeader { tag, length, offset }))
}

/// Read the header of the next fragment item.
///
/// The stream is left at the start of the fragment value. At the sequence
/// delimiter or the end of the data `None` is returned and the stream is
/// rewound to the delimiter, so repeated calls keep returning `None`.
pub fn read_fragment_header<R: Read + Seek + ?Sized>(
    fp: &mut R,
    diag: &mut Diagnostics,
) -> Result<Option<ItemHeader>> {
    let header = match read_item_header(fp)? {
        Some(header) => header,
        None => return Ok(None),
    };

    if header.tag == SEQUENCE_DELIMITER_TAG {
        if header.length != 0 {
            diag.warn(
                NonConformanceKind::DelimiterLength,
                Some(header.offset + 4),
                format!(
                    "expected 0x00000000 after the sequence delimiter, found 0x{:08X}",
                    header.length
                ),
            );
        }

        fp.seek(SeekFrom::Start(header.offset))?;
        return Ok(None);
    }

    if header.tag != ITEM_TAG {
        return Err(EncapsError::UnexpectedTag {
            tag: header.tag,
            offset: header.offset,
            context: "the encapsulated pixel data fragment items",
        });
    }

    if header.length == UNDEFINED_LENGTH {
        return Err(EncapsError::UndefinedItemLength {
            offset: header.offset,
        });
    }

    Ok(Some(header))
}

fn read_value<R: Read + Seek + ?Sized>(fp: &mut R, header: &ItemHeader) -> Result<Vec<u8>> {
    let length = header.length as u64;
    let mut value = Vec::new();
    let read = Read::take(&mut *fp, length).read_to_end(&mut value)? as u64;

    if read != length {
        return Err(EncapsError::TruncatedItem {
            offset: header.offset,
            length,
            available: read,
        });
    }

    Ok(value)
}

/// Read the next fragment value, `None` at the delimiter or end of data.
pub fn read_item<R: Read + Seek + ?Sized>(fp: &mut R, diag: &mut Diagnostics) -> Result<Option<Vec<u8>>> {
    match read_fragment_header(fp, diag)? {
        Some(header) => Ok(Some(read_value(fp, &header)?)),
        None => Ok(None),
    }
}

/// Skip the next fragment, returning its header.
pub fn skip_item<R: Read + Seek + ?Sized>(fp: &mut R, diag: &mut Diagnostics) -> Result<Option<ItemHeader>> {
    let header = match read_fragment_header(fp, diag)? {
        Some(header) => header,
        None => return Ok(None),
    };

    fp.seek(SeekFrom::Start(header.offset + ITEM_HEADER_LEN + header.length as u64))?;

    Ok(Some(header))
}

pub fn write_item<W: Write + ?Sized>(out: &mut W, tag: Tag, value: &[u8]) -> Result<()> {
    let length = u32::try_from(value.len()).map_err(|_| {
        EncapsError::InvalidParameter(format!(
            "an item value of {} bytes does not fit a 32-bit length",
            value.len()
        ))
    })?;

    out.write_u16::<LittleEndian>(tag.group())?;
    out.write_u16::<LittleEndian>(tag.element())?;
    out.write_u32::<LittleEndian>(length)?;
    out.write_all(value)?;

    Ok(())
}

pub fn write_sequence_delimiter<W: Write + ?Sized>(out: &mut W) -> Result<()> {
    write_item(out, SEQUENCE_DELIMITER_TAG, &[])
}

/// Iterator over the fragment items of a stream, starting at the current
/// position. Yields `(offset, value)` with absolute stream offsets.
pub struct ItemIter<'a, R: Read + Seek + ?Sized> {
    fp: &'a mut R,
    diag: &'a mut Diagnostics,
    done: bool,
}

impl<'a, R: Read + Seek + ?Sized> ItemIter<'a, R> {
    pub fn new(fp: &'a mut R, diag: &'a mut Diagnostics) -> Self {
        ItemIter {
            fp,
            diag,
            done: false,
        }
    }
}

impl<'a, R: Read + Seek + ?Sized> Iterator for ItemIter<'a, R> {
    type Item = Result<(u64, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let next = match read_fragment_header(&mut *self.fp, &mut *self.diag) {
            Ok(Some(header)) => {
                read_value(&mut *self.fp, &header).map(|value| Some((header.offset, value)))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(e),
        };

        match next {
            Ok(Some(item)) => Some(Ok(item)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// Borrow every fragment of an in-memory stream that starts with the basic
/// offset table item.
pub fn fragment_slices(buffer: &[u8]) -> Result<Vec<&[u8]>> {
    let mut fragments = Vec::new();
    let mut offset = 0usize;
    let mut first = true;

    loop {
        if buffer.len() - offset < ITEM_HEADER_LEN as usize {
            break;
        }

        let group = u16::from_le_bytes([buffer[offset], buffer[offset + 1]]);
        let element = u16::from_le_bytes([buffer[offset + 2], buffer[offset + 3]]);
        let tag = Tag::new(group, element);
        let length = u32::from_le_bytes([
            buffer[offset + 4],
            buffer[offset + 5],
            buffer[offset + 6],
            buffer[offset + 7],
        ]);

        if tag == SEQUENCE_DELIMITER_TAG && !first {
            break;
        }

        if tag != ITEM_TAG {
            return Err(EncapsError::UnexpectedTag {
                tag,
                offset: offset as u64,
                context: "the encapsulated pixel data fragment items",
            });
        }

        if length == UNDEFINED_LENGTH {
            return Err(EncapsError::UndefinedItemLength {
                offset: offset as u64,
            });
        }

        let start = offset + ITEM_HEADER_LEN as usize;
        let end = match start.checked_add(length as usize) {
            Some(end) if end <= buffer.len() => end,
            _ => {
                return Err(EncapsError::TruncatedItem {
                    offset: offset as u64,
                    length: length as u64,
                    available: buffer.len().saturating_sub(start) as u64,
                })
            }
        };

        // the first item is the basic offset table
        if !first {
            fragments.push(&buffer[start..end]);
        }

        first = false;
        offset = end;
    }

    Ok(fragments)
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    fn item(value: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        write_item(&mut out, ITEM_TAG, value).unwrap();
        out
    }

    #[test]
    fn writes_little_endian_header() {
        assert_eq!(item(&[1, 2]), vec![0xFE, 0xFF, 0x00, 0xE0, 2, 0, 0, 0, 1, 2]);

        let mut out = Vec::new();
        write_sequence_delimiter(&mut out).unwrap();
        assert_eq!(out, vec![0xFE, 0xFF, 0xDD, 0xE0, 0, 0, 0, 0]);
    }

    #[test]
    fn reads_items_until_delimiter() {
        let mut data = item(&[1, 2]);
        data.extend(item(&[3, 4, 5, 6]));
        write_sequence_delimiter(&mut data).unwrap();

        let mut fp = Cursor::new(data);
        let mut diag = Diagnostics::new();
        assert_eq!(read_item(&mut fp, &mut diag).unwrap(), Some(vec![1, 2]));
        assert_eq!(read_item(&mut fp, &mut diag).unwrap(), Some(vec![3, 4, 5, 6]));
        assert_eq!(read_item(&mut fp, &mut diag).unwrap(), None);
        // left at the delimiter
        assert_eq!(fp.position(), 22);
        assert!(diag.is_empty());
    }

    #[test]
    fn end_of_data_ends_iteration() {
        let mut data = item(&[1, 2]);
        data.extend_from_slice(&[0xFE, 0xFF]);

        let mut fp = Cursor::new(data);
        let mut diag = Diagnostics::new();
        assert!(read_item(&mut fp, &mut diag).unwrap().is_some());
        assert_eq!(read_item(&mut fp, &mut diag).unwrap(), None);
    }

    #[test]
    fn non_zero_delimiter_length_is_recoverable() {
        let mut data = Vec::new();
        write_item(&mut data, SEQUENCE_DELIMITER_TAG, &[0, 0]).unwrap();

        let mut fp = Cursor::new(data);
        let mut diag = Diagnostics::new();
        assert_eq!(read_item(&mut fp, &mut diag).unwrap(), None);
        assert!(diag.has(NonConformanceKind::DelimiterLength));
    }

    #[test]
    fn rejects_unexpected_tag_with_offset() {
        let mut data = item(&[1, 2]);
        write_item(&mut data, Tag::new(0x0010, 0x0010), &[0, 0]).unwrap();

        let mut fp = Cursor::new(data);
        let mut diag = Diagnostics::new();
        read_item(&mut fp, &mut diag).unwrap();
        let err = read_item(&mut fp, &mut diag).unwrap_err();
        assert!(matches!(err, EncapsError::UnexpectedTag { offset: 10, .. }));
    }

    #[test]
    fn rejects_undefined_length() {
        let data = vec![0xFE, 0xFF, 0x00, 0xE0, 0xFF, 0xFF, 0xFF, 0xFF];
        let mut fp = Cursor::new(data);
        let err = read_item(&mut fp, &mut Diagnostics::new()).unwrap_err();
        assert!(matches!(err, EncapsError::UndefinedItemLength { offset: 0 }));
    }

    #[test]
    fn rejects_truncated_value() {
        let mut data = item(&[1, 2, 3, 4]);
        data.truncate(10);
        let mut fp = Cursor::new(data);
        let err = read_item(&mut fp, &mut Diagnostics::new()).unwrap_err();
        assert!(matches!(err, EncapsError::TruncatedItem { length: 4, available: 2, .. }));
    }

    #[test]
    fn huge_declared_length_is_truncation() {
        let mut data = vec![0xFE, 0xFF, 0x00, 0xE0, 0xF0, 0xFF, 0xFF, 0xFF];
        data.extend_from_slice(&[1, 2, 3, 4]);

        let mut fp = Cursor::new(data.clone());
        let err = read_item(&mut fp, &mut Diagnostics::new()).unwrap_err();
        assert!(matches!(
            err,
            EncapsError::TruncatedItem { offset: 0, length: 0xFFFF_FFF0, available: 4 }
        ));

        let mut buffer = item(&[]);
        buffer.extend_from_slice(&data);
        let err = fragment_slices(&buffer).unwrap_err();
        assert!(matches!(err, EncapsError::TruncatedItem { offset: 8, available: 4, .. }));
    }

    #[test]
    fn skip_and_iterate() {
        let mut data = item(&[1, 2]);
        data.extend(item(&[3, 4]));

        let mut fp = Cursor::new(data);
        let mut diag = Diagnostics::new();
        let header = skip_item(&mut fp, &mut diag).unwrap().unwrap();
        assert_eq!(header.length, 2);
        assert_eq!(fp.position(), 10);

        let items: Vec<_> = ItemIter::new(&mut fp, &mut diag)
            .collect::<Result<Vec<_>>>()
            .unwrap();
        assert_eq!(items, vec![(10, vec![3, 4])]);
    }

    #[test]
    fn borrows_fragments_after_the_offset_table() {
        let mut data = item(&[0, 0, 0, 0]);
        data.extend(item(&[1, 2]));
        data.extend(item(&[3, 4]));
        write_sequence_delimiter(&mut data).unwrap();

        let fragments = fragment_slices(&data).unwrap();
        assert_eq!(fragments, vec![&[1u8, 2][..], &[3u8, 4][..]]);
    }
}
