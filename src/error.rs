use thiserror::Error;

use crate::model::Tag;

pub type Result<T> = std::result::Result<T, EncapsError>;

/// Broad category of an [`EncapsError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The bytes do not follow the encapsulation or RLE format.
    Format,
    /// Fewer fragments or frames than requested, with no table to reconcile.
    InsufficientData,
    /// The caller asked for something that can't be represented.
    Configuration,
    Io,
}

#[derive(Debug, Error)]
pub enum EncapsError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unexpected tag {tag} at offset {offset} when parsing {context}")]
    UnexpectedTag {
        tag: Tag,
        offset: u64,
        context: &'static str,
    },

    #[error("undefined item length at offset {offset} when parsing the encapsulated pixel data fragments")]
    UndefinedItemLength { offset: u64 },

    #[error("item at offset {offset} declares {length} bytes but only {available} are available")]
    TruncatedItem {
        offset: u64,
        length: u64,
        available: u64,
    },

    #[error("the length of the basic offset table item at offset {offset} is not a multiple of 4 ({length} bytes)")]
    InvalidBasicOffsetTableLength { length: u32, offset: u64 },

    #[error("unable to build a basic offset table: found {found} frame boundaries but expected {expected} frames")]
    BasicOffsetTableMismatch { found: usize, expected: usize },

    #[error("invalid extended offset table: {0}")]
    InvalidExtendedOffsetTable(String),

    #[error("end of data reached before the delimiter {delimiter} was found (search started at offset {offset})")]
    DelimiterNotFound { delimiter: Tag, offset: u64 },

    #[error("invalid number of RLE segments ({count}), must be between 1 and 15")]
    InvalidSegmentCount { count: u32 },

    #[error("the number of RLE segments in the pixel data doesn't match the expected amount ({found} vs. {expected} segments)")]
    SegmentCountMismatch { found: usize, expected: usize },

    #[error("invalid RLE segment offset {offset} for segment {segment}")]
    InvalidSegmentOffset { segment: usize, offset: u32 },

    #[error("the RLE header needs 64 bytes but only {length} are available")]
    TruncatedRleHeader { length: usize },

    #[error("the amount of decoded RLE segment data doesn't match the expected amount ({actual} vs. {expected} bytes)")]
    SegmentLengthMismatch { actual: usize, expected: usize },

    #[error("found {found} frames in the encapsulated pixel data but only {expected} were declared")]
    UnexpectedFrameCount { found: usize, expected: usize },

    #[error("there is insufficient pixel data to contain {required} frames")]
    InsufficientFrames { required: usize },

    #[error("found {fragments} frame fragments in the encapsulated pixel data, an index of {index} is invalid")]
    InvalidFragmentIndex { fragments: usize, index: usize },

    #[error("unable to generate frames as there are fewer fragments ({fragments}) than frames ({frames}); the data may be corrupt or the number of frames incorrect")]
    FewerFragmentsThanFrames { fragments: usize, frames: usize },

    #[error("too many fragments requested ({requested}), the minimum fragment size is 2 bytes so at most {max} are possible")]
    TooManyFragments { requested: usize, max: usize },

    #[error("the total length of the encapsulated frame data ({total} bytes) will be greater than the maximum allowed by the basic offset table ({max} bytes), use the extended offset table instead")]
    BasicOffsetTableOverflow { total: u64, max: u64 },

    #[error("unable to decode RLE pixel data with a bits allocated value of {0}")]
    UnsupportedBitsAllocated(u16),

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
}

impl EncapsError {
    pub fn kind(&self) -> ErrorKind {
        use EncapsError::*;

        match self {
            Io(_) => ErrorKind::Io,
            UnexpectedTag { .. }
            | UndefinedItemLength { .. }
            | TruncatedItem { .. }
            | InvalidBasicOffsetTableLength { .. }
            | BasicOffsetTableMismatch { .. }
            | InvalidExtendedOffsetTable(_)
            | DelimiterNotFound { .. }
            | InvalidSegmentCount { .. }
            | SegmentCountMismatch { .. }
            | InvalidSegmentOffset { .. }
            | TruncatedRleHeader { .. }
            | SegmentLengthMismatch { .. }
            | UnexpectedFrameCount { .. } => ErrorKind::Format,
            InsufficientFrames { .. }
            | InvalidFragmentIndex { .. }
            | FewerFragmentsThanFrames { .. } => ErrorKind::InsufficientData,
            TooManyFragments { .. }
            | BasicOffsetTableOverflow { .. }
            | UnsupportedBitsAllocated(_)
            | InvalidParameter(_) => ErrorKind::Configuration,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_follow_categories() {
        let err = EncapsError::InvalidBasicOffsetTableLength {
            length: 3,
            offset: 4,
        };
        assert_eq!(err.kind(), ErrorKind::Format);
        assert!(err.to_string().contains("offset 4"));

        let err = EncapsError::InsufficientFrames { required: 3 };
        assert_eq!(err.kind(), ErrorKind::InsufficientData);

        let err = EncapsError::TooManyFragments {
            requested: 4,
            max: 2,
        };
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn unexpected_tag_names_tag_and_offset() {
        let err = EncapsError::UnexpectedTag {
            tag: Tag(0x0010_0010),
            offset: 24,
            context: "the basic offset table",
        };
        let msg = err.to_string();
        assert!(msg.contains("(0010,0010)"));
        assert!(msg.contains("24"));
    }
}
