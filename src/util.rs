use std::io::{self, Read, Seek, SeekFrom};

use byteorder::{LittleEndian, ReadBytesExt};

use crate::diagnostics::{Diagnostics, NonConformanceKind};
use crate::error::{EncapsError, Result};
use crate::model::Tag;

/// A seekable byte source. Lets the framing code take `&mut dyn ReadSeek`.
pub trait ReadSeek: Read + Seek {}

impl<T: Read + Seek + ?Sized> ReadSeek for T {}

/// Read as many bytes as are available up to `buf.len()`.
pub fn read_up_to<R: Read + ?Sized>(fp: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;

    loop {
        if filled == buf.len() {
            break;
        }

        match fp.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }

    Ok(filled)
}

/// Read a little-endian tag, group first. `None` at end of data.
pub fn read_tag<R: Read + ?Sized>(fp: &mut R) -> io::Result<Option<Tag>> {
    let mut buf = [0u8; 4];
    if read_up_to(fp, &mut buf)? < 4 {
        return Ok(None);
    }

    let mut cursor = &buf[..];
    let group = cursor.read_u16::<LittleEndian>()?;
    let element = cursor.read_u16::<LittleEndian>()?;

    Ok(Some(Tag::new(group, element)))
}

/// Read a little-endian `u32`. `None` at end of data.
pub fn read_ul<R: Read + ?Sized>(fp: &mut R) -> io::Result<Option<u32>> {
    let mut buf = [0u8; 4];
    if read_up_to(fp, &mut buf)? < 4 {
        return Ok(None);
    }

    Ok(Some(u32::from_le_bytes(buf)))
}

/// The byte pattern of `tag` as it appears in a little-endian stream.
pub fn tag_bytes(tag: Tag) -> [u8; 4] {
    let group = tag.group().to_le_bytes();
    let element = tag.element().to_le_bytes();

    [group[0], group[1], element[0], element[1]]
}

/// Total length of the stream; the position is left untouched.
pub fn stream_len<R: Seek + ?Sized>(fp: &mut R) -> io::Result<u64> {
    let current = fp.stream_position()?;
    let end = fp.seek(SeekFrom::End(0))?;
    if current != end {
        fp.seek(SeekFrom::Start(current))?;
    }

    Ok(end)
}

pub fn find_bytes(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }

    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Read an undefined length value up to `delimiter`.
///
/// The stream is left after the delimiter's 4-byte length. Reading happens in
/// chunks of `read_size`; the last 3 bytes of every chunk are read again so a
/// delimiter straddling two chunks is still found. If the delimiter never
/// shows up the stream goes back to where the value started.
pub fn read_undefined_length_value<R: Read + Seek + ?Sized>(
    fp: &mut R,
    delimiter: Tag,
    read_size: usize,
    diag: &mut Diagnostics,
) -> Result<Vec<u8>> {
    let data_start = fp.stream_position()?;
    let pattern = tag_bytes(delimiter);
    let search_rewind = pattern.len() - 1;
    let read_size = read_size.max(pattern.len() * 2);

    let mut value = Vec::new();
    let mut chunk = vec![0u8; read_size];

    loop {
        let chunk_start = fp.stream_position()?;
        let bytes_read = read_up_to(fp, &mut chunk)?;
        let eof = bytes_read < read_size;

        if let Some(index) = find_bytes(&chunk[..bytes_read], &pattern) {
            value.extend_from_slice(&chunk[..index]);

            let length_at = chunk_start + index as u64 + 4;
            fp.seek(SeekFrom::Start(length_at))?;

            match read_ul(fp)? {
                Some(0) => {}
                Some(length) => diag.warn(
                    NonConformanceKind::DelimiterLength,
                    Some(length_at),
                    format!(
                        "expected 4 zero bytes after the delimiter {}, found 0x{:08X}",
                        delimiter, length
                    ),
                ),
                None => diag.warn(
                    NonConformanceKind::DelimiterLength,
                    Some(length_at),
                    format!("end of data reached right after the delimiter {}", delimiter),
                ),
            }

            return Ok(value);
        }

        if eof {
            fp.seek(SeekFrom::Start(data_start))?;
            return Err(EncapsError::DelimiterNotFound {
                delimiter,
                offset: data_start,
            });
        }

        // the pattern may start in the last few bytes of this chunk
        let keep = bytes_read - search_rewind;
        value.extend_from_slice(&chunk[..keep]);
        fp.seek(SeekFrom::Start(chunk_start + keep as u64))?;
    }
}

/// Length of an undefined length value, without the delimiter.
///
/// The stream position is restored afterwards.
pub fn length_of_undefined_length<R: Read + Seek + ?Sized>(
    fp: &mut R,
    delimiter: Tag,
    read_size: usize,
    diag: &mut Diagnostics,
) -> Result<u64> {
    let data_start = fp.stream_position()?;
    let value = read_undefined_length_value(fp, delimiter, read_size, diag)?;
    fp.seek(SeekFrom::Start(data_start))?;

    Ok(value.len() as u64)
}

pub fn format_hex(buffer: &[u8]) -> String {
    buffer
        .iter()
        .map(|v| format!("{:02X}", v))
        .collect::<Vec<String>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::model::{ITEM_TAG, SEQUENCE_DELIMITER_TAG};

    #[test]
    fn reads_tags_group_first() {
        let mut fp = Cursor::new(vec![0xFE, 0xFF, 0x00, 0xE0, 0xFE, 0xFF, 0xDD, 0xE0, 0x01]);
        assert_eq!(read_tag(&mut fp).unwrap(), Some(ITEM_TAG));
        assert_eq!(read_tag(&mut fp).unwrap(), Some(SEQUENCE_DELIMITER_TAG));
        assert_eq!(read_tag(&mut fp).unwrap(), None);
    }

    #[test]
    fn short_reads_end_cleanly() {
        let mut fp = Cursor::new(vec![0x01, 0x02]);
        assert_eq!(read_ul(&mut fp).unwrap(), None);

        let mut fp = Cursor::new(vec![0x01, 0x00, 0x00, 0x00]);
        assert_eq!(read_ul(&mut fp).unwrap(), Some(1));
    }

    #[test]
    fn tag_bytes_are_little_endian_pairs() {
        assert_eq!(tag_bytes(SEQUENCE_DELIMITER_TAG), [0xFE, 0xFF, 0xDD, 0xE0]);
    }

    #[test]
    fn stream_len_keeps_position() {
        let mut fp = Cursor::new(vec![0u8; 10]);
        fp.set_position(3);
        assert_eq!(stream_len(&mut fp).unwrap(), 10);
        assert_eq!(fp.position(), 3);
    }

    fn undefined_value(value: &[u8], trailer: &[u8]) -> Vec<u8> {
        let mut data = value.to_vec();
        data.extend_from_slice(&tag_bytes(SEQUENCE_DELIMITER_TAG));
        data.extend_from_slice(trailer);
        data
    }

    #[test]
    fn finds_delimiter_across_chunk_boundaries() {
        let value: Vec<u8> = (0..40u8).collect();
        let data = undefined_value(&value, &[0, 0, 0, 0, 0xAA]);

        // every chunk size puts the delimiter somewhere different
        for read_size in 8..20 {
            let mut fp = Cursor::new(data.clone());
            let mut diag = Diagnostics::new();
            let found =
                read_undefined_length_value(&mut fp, SEQUENCE_DELIMITER_TAG, read_size, &mut diag)
                    .unwrap();
            assert_eq!(found, value, "read size {}", read_size);
            assert_eq!(fp.position(), 48);
            assert!(diag.is_empty());
        }
    }

    #[test]
    fn non_zero_delimiter_length_warns() {
        let data = undefined_value(&[1, 2, 3, 4], &[1, 0, 0, 0]);
        let mut fp = Cursor::new(data);
        let mut diag = Diagnostics::new();

        let found =
            read_undefined_length_value(&mut fp, SEQUENCE_DELIMITER_TAG, 64, &mut diag).unwrap();
        assert_eq!(found, vec![1, 2, 3, 4]);
        assert!(diag.has(NonConformanceKind::DelimiterLength));
    }

    #[test]
    fn missing_delimiter_rewinds() {
        let mut fp = Cursor::new(vec![0u8; 30]);
        fp.set_position(2);
        let mut diag = Diagnostics::new();

        let err = read_undefined_length_value(&mut fp, SEQUENCE_DELIMITER_TAG, 8, &mut diag)
            .unwrap_err();
        assert!(matches!(err, EncapsError::DelimiterNotFound { offset: 2, .. }));
        assert_eq!(fp.position(), 2);
    }

    #[test]
    fn length_of_value_restores_position() {
        let data = undefined_value(&[9; 10], &[0, 0, 0, 0]);
        let mut fp = Cursor::new(data);
        let mut diag = Diagnostics::new();

        let length =
            length_of_undefined_length(&mut fp, SEQUENCE_DELIMITER_TAG, 16, &mut diag).unwrap();
        assert_eq!(length, 10);
        assert_eq!(fp.position(), 0);
    }

    #[test]
    fn hex_formatting() {
        assert_eq!(format_hex(&[0xFF, 0xD8, 0x01]), "FF D8 01");
    }
}
