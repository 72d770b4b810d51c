use std::fmt;

use byteorder::{ByteOrder, LittleEndian};

use crate::error::{EncapsError, Result};

/// A DICOM attribute tag, `group << 16 | element`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Tag(pub u32);

impl Tag {
    pub const fn new(group: u16, element: u16) -> Self {
        Tag(((group as u32) << 16) | element as u32)
    }

    pub const fn group(self) -> u16 {
        (self.0 >> 16) as u16
    }

    pub const fn element(self) -> u16 {
        (self.0 & 0xFFFF) as u16
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:04X},{:04X})", self.group(), self.element())
    }
}

pub const ITEM_TAG: Tag = Tag(0xFFFE_E000);
pub const ITEM_DELIMITER_TAG: Tag = Tag(0xFFFE_E00D);
pub const SEQUENCE_DELIMITER_TAG: Tag = Tag(0xFFFE_E0DD);

pub const UNDEFINED_LENGTH: u32 = 0xFFFF_FFFF;

/// Size of an item header: 4 bytes tag, 4 bytes length.
pub const ITEM_HEADER_LEN: u64 = 8;

/// An item header read from the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ItemHeader {
    pub tag: Tag,
    pub length: u32,
    /// Absolute position of the tag in the stream.
    pub offset: u64,
}

/// Codec markers used to find frame boundaries when no offset table helps.
///
/// The framing engine only compares bytes; which codecs these belong to is
/// the caller's business.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkerSet {
    /// Two-byte markers found at the start of a frame's first fragment.
    pub start: Vec<[u8; 2]>,
    /// Marker found near the end of a frame's last fragment.
    pub end: [u8; 2],
    /// How many trailing bytes of a fragment are searched for `end`.
    pub end_window: usize,
}

impl MarkerSet {
    /// JPEG, JPEG-LS (SOI `FFD8`) and JPEG 2000 (SOC `FF4F`), both ending with `FFD9`.
    pub fn jpeg_family() -> Self {
        MarkerSet {
            start: vec![[0xFF, 0xD8], [0xFF, 0x4F]],
            end: [0xFF, 0xD9],
            end_window: 10,
        }
    }

    pub fn is_start(&self, value: &[u8]) -> bool {
        value.len() >= 2 && self.start.iter().any(|m| m[..] == value[..2])
    }

    pub fn has_end(&self, fragment: &[u8]) -> bool {
        let from = fragment.len().saturating_sub(self.end_window);
        fragment[from..].windows(2).any(|w| w == self.end)
    }
}

impl Default for MarkerSet {
    fn default() -> Self {
        MarkerSet::jpeg_family()
    }
}

/// The (7FE0,0001) / (7FE0,0002) pair, one entry per frame.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtendedOffsetTable {
    pub offsets: Vec<u64>,
    pub lengths: Vec<u64>,
}

impl ExtendedOffsetTable {
    pub fn new(offsets: Vec<u64>, lengths: Vec<u64>) -> Result<Self> {
        if offsets.len() != lengths.len() {
            return Err(EncapsError::InvalidExtendedOffsetTable(format!(
                "{} offsets but {} lengths",
                offsets.len(),
                lengths.len()
            )));
        }

        Ok(ExtendedOffsetTable { offsets, lengths })
    }

    /// Parse the two little-endian `uint64[N]` attribute values.
    pub fn from_bytes(offsets: &[u8], lengths: &[u8]) -> Result<Self> {
        if offsets.len() % 8 != 0 || lengths.len() % 8 != 0 {
            return Err(EncapsError::InvalidExtendedOffsetTable(format!(
                "value lengths {} and {} must be multiples of 8",
                offsets.len(),
                lengths.len()
            )));
        }

        let offsets = offsets.chunks_exact(8).map(LittleEndian::read_u64).collect();
        let lengths = lengths.chunks_exact(8).map(LittleEndian::read_u64).collect();

        ExtendedOffsetTable::new(offsets, lengths)
    }

    pub fn offsets_bytes(&self) -> Vec<u8> {
        let mut out = vec![0u8; self.offsets.len() * 8];
        LittleEndian::write_u64_into(&self.offsets, &mut out);
        out
    }

    pub fn lengths_bytes(&self) -> Vec<u8> {
        let mut out = vec![0u8; self.lengths.len() * 8];
        LittleEndian::write_u64_into(&self.lengths, &mut out);
        out
    }

    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }
}

/// What the caller knows about the pixel data besides the item stream.
#[derive(Debug, Clone, Default)]
pub struct FrameContext {
    /// Value of (0028,0008) Number of Frames, if known.
    pub number_of_frames: Option<usize>,
    pub extended: Option<ExtendedOffsetTable>,
    pub markers: MarkerSet,
    /// Refuse to yield more frames than `number_of_frames`.
    pub strict: bool,
}

impl FrameContext {
    pub fn new() -> Self {
        FrameContext::default()
    }

    pub fn with_number_of_frames(mut self, number_of_frames: usize) -> Self {
        self.number_of_frames = Some(number_of_frames);
        self
    }

    pub fn with_extended(mut self, table: ExtendedOffsetTable) -> Self {
        self.extended = Some(table);
        self
    }

    pub fn with_markers(mut self, markers: MarkerSet) -> Self {
        self.markers = markers;
        self
    }

    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }
}

/// Image attributes the RLE codec needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RleParams {
    pub rows: u16,
    pub columns: u16,
    pub samples_per_pixel: u16,
    pub bits_allocated: u16,
    /// Treat excess decoded segment data as an error instead of a warning.
    pub strict: bool,
}

impl RleParams {
    pub fn new(rows: u16, columns: u16, samples_per_pixel: u16, bits_allocated: u16) -> Self {
        RleParams {
            rows,
            columns,
            samples_per_pixel,
            bits_allocated,
            strict: false,
        }
    }

    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn pixels(&self) -> usize {
        self.rows as usize * self.columns as usize
    }

    pub fn bytes_per_sample(&self) -> Result<usize> {
        let bits = self.bits_allocated;
        if bits == 0 || bits % 8 != 0 || bits > 64 {
            return Err(EncapsError::UnsupportedBitsAllocated(bits));
        }

        Ok((bits / 8) as usize)
    }

    pub fn expected_segments(&self) -> Result<usize> {
        Ok(self.samples_per_pixel as usize * self.bytes_per_sample()?)
    }

    /// Length of a decoded frame in bytes.
    pub fn frame_length(&self) -> Result<usize> {
        Ok(self.pixels() * self.expected_segments()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_parts_and_display() {
        assert_eq!(ITEM_TAG, Tag::new(0xFFFE, 0xE000));
        assert_eq!(SEQUENCE_DELIMITER_TAG.element(), 0xE0DD);
        assert_eq!(Tag::new(0x7FE0, 0x0010).to_string(), "(7FE0,0010)");
    }

    #[test]
    fn markers() {
        let markers = MarkerSet::jpeg_family();
        assert!(markers.is_start(&[0xFF, 0xD8, 0xFF, 0xE0]));
        assert!(markers.is_start(&[0xFF, 0x4F]));
        assert!(!markers.is_start(&[0xFF]));
        assert!(!markers.is_start(&[0x00, 0xD8]));

        let mut fragment = vec![0u8; 32];
        fragment[28] = 0xFF;
        fragment[29] = 0xD9;
        assert!(markers.has_end(&fragment));

        // outside the trailing window
        let mut fragment = vec![0u8; 32];
        fragment[2] = 0xFF;
        fragment[3] = 0xD9;
        assert!(!markers.has_end(&fragment));
        assert!(!markers.has_end(&[]));
    }

    #[test]
    fn extended_offset_table_wire_form() {
        let table = ExtendedOffsetTable::new(vec![0, 20], vec![12, 6]).unwrap();
        let offsets = table.offsets_bytes();
        assert_eq!(offsets.len(), 16);
        assert_eq!(offsets[8], 20);

        let parsed = ExtendedOffsetTable::from_bytes(&offsets, &table.lengths_bytes()).unwrap();
        assert_eq!(parsed, table);

        assert!(ExtendedOffsetTable::from_bytes(&[0u8; 7], &[0u8; 8]).is_err());
        assert!(ExtendedOffsetTable::from_bytes(&[0u8; 16], &[0u8; 8]).is_err());
    }

    #[test]
    fn rle_params() {
        let params = RleParams::new(2, 3, 3, 16);
        assert_eq!(params.pixels(), 6);
        assert_eq!(params.expected_segments().unwrap(), 6);
        assert_eq!(params.frame_length().unwrap(), 36);

        assert!(RleParams::new(2, 3, 1, 12).bytes_per_sample().is_err());
        assert!(RleParams::new(2, 3, 1, 0).bytes_per_sample().is_err());
    }
}
