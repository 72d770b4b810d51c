//! Encapsulated Pixel Data for DICOM.
//!
//! Splits an encapsulated (7FE0,0010) value into frames, using the Basic or
//! Extended Offset Table when there is one and the fragment layout or codec
//! markers otherwise, and builds encapsulated values from frames. RLE
//! Lossless frames can be decoded and encoded with [`rle`].
//!
//! Recoverable problems with the data are collected in a [`Diagnostics`]
//! sink and logged through `tracing`; everything else is an [`EncapsError`].

#![forbid(unsafe_code)]

pub mod diagnostics;
pub mod encaps;
pub mod error;
pub mod frame;
pub mod item;
pub mod model;
pub mod offset_table;
pub mod rle;
pub mod util;

pub use diagnostics::{Diagnostics, NonConformance, NonConformanceKind};
pub use encaps::{encapsulate, encapsulate_extended, fragment_frame, itemize_fragment, itemize_frame};
pub use error::{EncapsError, ErrorKind, Result};
pub use frame::{
    decode_data_sequence, defragment_data, generate_fragmented_frames, generate_frames, get_frame,
    get_fragmented_frame, FrameBoundary, FrameIter, Frames,
};
pub use model::{ExtendedOffsetTable, FrameContext, MarkerSet, RleParams, Tag};
pub use offset_table::{
    build_basic_offsets, build_extended_offsets, get_frame_offsets, get_nr_fragments, parse_basic_offsets,
};
