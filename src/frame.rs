//! Grouping fragments into frames.

use std::io::{Read, Seek, SeekFrom};

use crate::diagnostics::{Diagnostics, NonConformanceKind};
use crate::error::{EncapsError, Result};
use crate::item;
use crate::model::{ExtendedOffsetTable, FrameContext, MarkerSet, ITEM_TAG};
use crate::offset_table;
use crate::util::{self, ReadSeek};

/// The fragments making up one frame.
pub type FragmentedFrame = Vec<Vec<u8>>;

/// Finds the fragments of each frame in turn.
pub trait FrameBoundary {
    fn name(&self) -> &'static str;

    /// Fragments of the next frame, `None` once every frame was produced.
    fn next_frame(&mut self, fp: &mut dyn ReadSeek, diag: &mut Diagnostics) -> Result<Option<FragmentedFrame>>;

    /// Fragments of frame `index`, counted from the first frame.
    ///
    /// Must be called on a fresh boundary. The default walks forward.
    fn frame_at(&mut self, fp: &mut dyn ReadSeek, index: usize, diag: &mut Diagnostics) -> Result<FragmentedFrame> {
        let mut current = 0;

        loop {
            match self.next_frame(fp, diag)? {
                Some(frame) if current == index => return Ok(frame),
                Some(_) => current += 1,
                None => return Err(EncapsError::InsufficientFrames { required: index + 1 }),
            }
        }
    }
}

/// Frames located through the extended offset table.
pub struct ExtendedTable {
    origin: u64,
    table: ExtendedOffsetTable,
    next: usize,
}

impl ExtendedTable {
    pub fn new(origin: u64, table: ExtendedOffsetTable) -> Self {
        ExtendedTable {
            origin,
            table,
            next: 0,
        }
    }

    fn read(&self, fp: &mut dyn ReadSeek, index: usize) -> Result<FragmentedFrame> {
        let item_at = self
            .origin
            .checked_add(self.table.offsets[index])
            .ok_or(EncapsError::InsufficientFrames { required: index + 1 })?;
        fp.seek(SeekFrom::Start(item_at))?;

        let length = self.table.lengths[index];
        match item::read_item_header(fp)? {
            Some(header) if header.tag == ITEM_TAG => {
                if length > header.length as u64 {
                    return Err(EncapsError::InvalidExtendedOffsetTable(format!(
                        "frame {} is {} bytes but its item holds {}",
                        index, length, header.length
                    )));
                }
            }
            Some(header) => {
                return Err(EncapsError::UnexpectedTag {
                    tag: header.tag,
                    offset: item_at,
                    context: "a frame located by the extended offset table",
                })
            }
            None => return Err(EncapsError::InsufficientFrames { required: index + 1 }),
        }

        let mut frame = Vec::new();
        let read = Read::take(&mut *fp, length).read_to_end(&mut frame)? as u64;
        if read != length {
            return Err(EncapsError::TruncatedItem {
                offset: item_at,
                length,
                available: read,
            });
        }

        Ok(vec![frame])
    }
}

impl FrameBoundary for ExtendedTable {
    fn name(&self) -> &'static str {
        "extended offset table"
    }

    fn next_frame(&mut self, fp: &mut dyn ReadSeek, _diag: &mut Diagnostics) -> Result<Option<FragmentedFrame>> {
        if self.next >= self.table.len() {
            return Ok(None);
        }

        let frame = self.read(fp, self.next)?;
        self.next += 1;

        Ok(Some(frame))
    }

    fn frame_at(&mut self, fp: &mut dyn ReadSeek, index: usize, _diag: &mut Diagnostics) -> Result<FragmentedFrame> {
        if index >= self.table.len() {
            return Err(EncapsError::InsufficientFrames { required: index + 1 });
        }

        self.read(fp, index)
    }
}

/// Frames located through a basic offset table with two or more entries.
pub struct BasicTable {
    origin: u64,
    offsets: Vec<u32>,
    next: usize,
}

impl BasicTable {
    pub fn new(origin: u64, offsets: Vec<u32>) -> Self {
        BasicTable {
            origin,
            offsets,
            next: 0,
        }
    }

    fn read(&self, fp: &mut dyn ReadSeek, index: usize, diag: &mut Diagnostics) -> Result<FragmentedFrame> {
        let start = self.origin + self.offsets[index] as u64;
        let end = match self.offsets.get(index + 1) {
            Some(&next) => self.origin + next as u64,
            None => util::stream_len(fp)?,
        };

        fp.seek(SeekFrom::Start(start))?;

        let mut fragments = Vec::new();

        loop {
            if fp.stream_position()? >= end {
                break;
            }

            match item::read_item(fp, diag)? {
                Some(fragment) => fragments.push(fragment),
                None => break,
            }
        }

        if fragments.is_empty() {
            return Err(EncapsError::InsufficientFrames { required: index + 1 });
        }

        Ok(fragments)
    }
}

impl FrameBoundary for BasicTable {
    fn name(&self) -> &'static str {
        "basic offset table"
    }

    fn next_frame(&mut self, fp: &mut dyn ReadSeek, diag: &mut Diagnostics) -> Result<Option<FragmentedFrame>> {
        if self.next >= self.offsets.len() {
            return Ok(None);
        }

        let frame = self.read(fp, self.next, diag)?;
        self.next += 1;

        Ok(Some(frame))
    }

    fn frame_at(&mut self, fp: &mut dyn ReadSeek, index: usize, diag: &mut Diagnostics) -> Result<FragmentedFrame> {
        if index >= self.offsets.len() {
            return Err(EncapsError::InsufficientFrames { required: index + 1 });
        }

        self.read(fp, index, diag)
    }
}

/// A single fragment holding a single frame.
pub struct SingleFragment {
    origin: u64,
    done: bool,
}

impl SingleFragment {
    pub fn new(origin: u64) -> Self {
        SingleFragment { origin, done: false }
    }
}

impl FrameBoundary for SingleFragment {
    fn name(&self) -> &'static str {
        "single fragment"
    }

    fn next_frame(&mut self, fp: &mut dyn ReadSeek, diag: &mut Diagnostics) -> Result<Option<FragmentedFrame>> {
        if self.done {
            return Ok(None);
        }

        self.done = true;
        fp.seek(SeekFrom::Start(self.origin))?;

        match item::read_item(fp, diag)? {
            Some(fragment) => Ok(Some(vec![fragment])),
            None => Err(EncapsError::InsufficientFrames { required: 1 }),
        }
    }

    fn frame_at(&mut self, fp: &mut dyn ReadSeek, index: usize, diag: &mut Diagnostics) -> Result<FragmentedFrame> {
        if index != 0 {
            return Err(EncapsError::InvalidFragmentIndex { fragments: 1, index });
        }

        match self.next_frame(fp, diag)? {
            Some(frame) => Ok(frame),
            None => Err(EncapsError::InsufficientFrames { required: 1 }),
        }
    }
}

/// As many fragments as frames.
pub struct FragmentPerFrame {
    cursor: u64,
    fragments: usize,
    next: usize,
}

impl FragmentPerFrame {
    pub fn new(origin: u64, fragments: usize) -> Self {
        FragmentPerFrame {
            cursor: origin,
            fragments,
            next: 0,
        }
    }
}

impl FrameBoundary for FragmentPerFrame {
    fn name(&self) -> &'static str {
        "one fragment per frame"
    }

    fn next_frame(&mut self, fp: &mut dyn ReadSeek, diag: &mut Diagnostics) -> Result<Option<FragmentedFrame>> {
        if self.next >= self.fragments {
            return Ok(None);
        }

        fp.seek(SeekFrom::Start(self.cursor))?;

        let fragment = match item::read_item(fp, diag)? {
            Some(fragment) => fragment,
            None => return Err(EncapsError::InsufficientFrames { required: self.next + 1 }),
        };

        self.cursor = fp.stream_position()?;
        self.next += 1;

        Ok(Some(vec![fragment]))
    }

    fn frame_at(&mut self, fp: &mut dyn ReadSeek, index: usize, diag: &mut Diagnostics) -> Result<FragmentedFrame> {
        if index >= self.fragments {
            return Err(EncapsError::InvalidFragmentIndex {
                fragments: self.fragments,
                index,
            });
        }

        fp.seek(SeekFrom::Start(self.cursor))?;
        for _ in 0..index {
            if item::skip_item(fp, diag)?.is_none() {
                return Err(EncapsError::InsufficientFrames { required: index + 1 });
            }
        }
        self.cursor = fp.stream_position()?;
        self.next = index;

        match self.next_frame(fp, diag)? {
            Some(frame) => Ok(frame),
            None => Err(EncapsError::InsufficientFrames { required: index + 1 }),
        }
    }
}

/// Every fragment belongs to the one and only frame.
pub struct AllFragments {
    origin: u64,
    done: bool,
}

impl AllFragments {
    pub fn new(origin: u64) -> Self {
        AllFragments { origin, done: false }
    }
}

impl FrameBoundary for AllFragments {
    fn name(&self) -> &'static str {
        "all fragments in one frame"
    }

    fn next_frame(&mut self, fp: &mut dyn ReadSeek, diag: &mut Diagnostics) -> Result<Option<FragmentedFrame>> {
        if self.done {
            return Ok(None);
        }

        self.done = true;
        fp.seek(SeekFrom::Start(self.origin))?;

        let mut fragments = Vec::new();
        loop {
            match item::read_item(fp, diag)? {
                Some(fragment) => fragments.push(fragment),
                None => break,
            }
        }

        if fragments.is_empty() {
            return Err(EncapsError::InsufficientFrames { required: 1 });
        }

        Ok(Some(fragments))
    }
}

/// Frames end with the fragment carrying the codec's end marker.
pub struct EndMarker {
    cursor: u64,
    expected: Option<usize>,
    markers: MarkerSet,
    strict: bool,
    produced: usize,
    warned_excess: bool,
    finished: bool,
}

impl EndMarker {
    pub fn new(origin: u64, expected: Option<usize>, markers: MarkerSet, strict: bool) -> Self {
        EndMarker {
            cursor: origin,
            expected,
            markers,
            strict,
            produced: 0,
            warned_excess: false,
            finished: false,
        }
    }

    fn count_frame(&mut self, diag: &mut Diagnostics) -> Result<()> {
        self.produced += 1;

        let expected = match self.expected {
            Some(expected) if self.produced > expected => expected,
            _ => return Ok(()),
        };

        if self.strict {
            return Err(EncapsError::UnexpectedFrameCount {
                found: self.produced,
                expected,
            });
        }

        if !self.warned_excess {
            self.warned_excess = true;
            diag.warn(
                NonConformanceKind::FrameCount,
                Some(self.cursor),
                format!(
                    "more frames than the declared {} were found in the encapsulated pixel data",
                    expected
                ),
            );
        }

        Ok(())
    }

    fn finish(&mut self, diag: &mut Diagnostics) {
        self.finished = true;

        if let Some(expected) = self.expected {
            if self.produced < expected {
                diag.warn(
                    NonConformanceKind::FrameCount,
                    None,
                    format!(
                        "the end of the encapsulated pixel data was reached after {} of the {} declared frames",
                        self.produced, expected
                    ),
                );
            }
        }
    }
}

impl FrameBoundary for EndMarker {
    fn name(&self) -> &'static str {
        "end marker search"
    }

    fn next_frame(&mut self, fp: &mut dyn ReadSeek, diag: &mut Diagnostics) -> Result<Option<FragmentedFrame>> {
        if self.finished {
            return Ok(None);
        }

        fp.seek(SeekFrom::Start(self.cursor))?;

        let mut fragments = Vec::new();

        loop {
            let fragment = match item::read_item(fp, diag)? {
                Some(fragment) => fragment,
                None => break,
            };

            let closes = self.markers.has_end(&fragment);
            fragments.push(fragment);

            if closes {
                self.cursor = fp.stream_position()?;
                self.count_frame(diag)?;
                return Ok(Some(fragments));
            }
        }

        self.cursor = fp.stream_position()?;

        if fragments.is_empty() {
            self.finish(diag);
            return Ok(None);
        }

        diag.warn(
            NonConformanceKind::MissingEndMarker,
            Some(self.cursor),
            "the end of the encapsulated pixel data was reached without finding an end marker, the last frame may be incomplete",
        );
        self.count_frame(diag)?;
        self.finish(diag);

        Ok(Some(fragments))
    }
}

/// Read the basic offset table and pick how frames will be located.
///
/// The stream must be positioned at the basic offset table item.
pub fn select_boundary(
    fp: &mut dyn ReadSeek,
    ctx: &FrameContext,
    diag: &mut Diagnostics,
) -> Result<Box<dyn FrameBoundary>> {
    let basic_offsets = offset_table::parse_basic_offsets(fp)?;
    let origin = fp.stream_position()?;

    if let Some(table) = ctx.extended.as_ref().filter(|t| !t.is_empty()) {
        tracing::debug!(frames = table.len(), "using the extended offset table");
        return Ok(Box::new(ExtendedTable::new(origin, table.clone())));
    }

    // a single entry table says no more than "one frame starting at 0"
    if basic_offsets.len() > 1 {
        let offsets = match ctx.number_of_frames {
            Some(frames) if frames != basic_offsets.len() => {
                diag.warn(
                    NonConformanceKind::FrameCount,
                    Some(origin),
                    format!(
                        "basic offset table lists {} frames but {} are declared, rebuilding it",
                        basic_offsets.len(),
                        frames
                    ),
                );
                offset_table::build_basic_offsets(fp, frames, &ctx.markers, diag)?
            }
            _ => basic_offsets,
        };

        tracing::debug!(frames = offsets.len(), "using the basic offset table");
        return Ok(Box::new(BasicTable::new(origin, offsets)));
    }

    let nr_fragments = offset_table::get_nr_fragments(fp, diag)?;
    let number_of_frames = ctx.number_of_frames;

    let boundary: Box<dyn FrameBoundary> = match number_of_frames {
        _ if nr_fragments == 0 => {
            return Err(EncapsError::InsufficientFrames {
                required: number_of_frames.unwrap_or(1).max(1),
            })
        }
        _ if nr_fragments == 1 => Box::new(SingleFragment::new(origin)),
        Some(frames) if frames == nr_fragments => Box::new(FragmentPerFrame::new(origin, nr_fragments)),
        Some(1) => Box::new(AllFragments::new(origin)),
        Some(frames) if nr_fragments < frames => {
            return Err(EncapsError::FewerFragmentsThanFrames {
                fragments: nr_fragments,
                frames,
            })
        }
        _ => Box::new(EndMarker::new(
            origin,
            number_of_frames,
            ctx.markers.clone(),
            ctx.strict,
        )),
    };

    tracing::debug!(
        fragments = nr_fragments,
        frames = ?number_of_frames,
        boundary = boundary.name(),
        "no usable offset table"
    );

    Ok(boundary)
}

/// Lazy, forward-only producer of frames.
///
/// Stops after the first error. A new iterator is needed to start over.
pub struct FrameIter<R: Read + Seek> {
    fp: R,
    boundary: Box<dyn FrameBoundary>,
    diag: Diagnostics,
    done: bool,
}

impl<R: Read + Seek> FrameIter<R> {
    /// `fp` must be positioned at the basic offset table item.
    pub fn new(mut fp: R, ctx: &FrameContext) -> Result<Self> {
        let mut diag = Diagnostics::new();
        let boundary = select_boundary(&mut fp, ctx, &mut diag)?;

        Ok(FrameIter {
            fp,
            boundary,
            diag,
            done: false,
        })
    }

    pub fn boundary_name(&self) -> &'static str {
        self.boundary.name()
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diag
    }

    pub fn into_diagnostics(self) -> Diagnostics {
        self.diag
    }

    /// Joined frames instead of fragment lists.
    pub fn joined(self) -> Frames<R> {
        Frames { inner: self }
    }
}

impl<R: Read + Seek> Iterator for FrameIter<R> {
    type Item = Result<FragmentedFrame>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        match self.boundary.next_frame(&mut self.fp, &mut self.diag) {
            Ok(Some(frame)) => Some(Ok(frame)),
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

/// [`FrameIter`] yielding each frame's fragments concatenated.
pub struct Frames<R: Read + Seek> {
    inner: FrameIter<R>,
}

impl<R: Read + Seek> Frames<R> {
    pub fn diagnostics(&self) -> &Diagnostics {
        self.inner.diagnostics()
    }

    pub fn into_diagnostics(self) -> Diagnostics {
        self.inner.into_diagnostics()
    }
}

impl<R: Read + Seek> Iterator for Frames<R> {
    type Item = Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|frame| frame.map(|fragments| fragments.concat()))
    }
}

pub fn generate_fragmented_frames<R: Read + Seek>(fp: R, ctx: &FrameContext) -> Result<FrameIter<R>> {
    FrameIter::new(fp, ctx)
}

pub fn generate_frames<R: Read + Seek>(fp: R, ctx: &FrameContext) -> Result<Frames<R>> {
    Ok(FrameIter::new(fp, ctx)?.joined())
}

/// The fragments of frame `index`. `fp` must be at the basic offset table.
pub fn get_fragmented_frame<R: Read + Seek>(
    fp: &mut R,
    index: usize,
    ctx: &FrameContext,
    diag: &mut Diagnostics,
) -> Result<FragmentedFrame> {
    let mut boundary = select_boundary(fp, ctx, diag)?;
    boundary.frame_at(fp, index, diag)
}

/// Frame `index` with its fragments joined. `fp` must be at the basic
/// offset table.
pub fn get_frame<R: Read + Seek>(
    fp: &mut R,
    index: usize,
    ctx: &FrameContext,
    diag: &mut Diagnostics,
) -> Result<Vec<u8>> {
    Ok(get_fragmented_frame(fp, index, ctx, diag)?.concat())
}

/// Copy out every fragment of an in-memory stream.
pub fn decode_data_sequence(data: &[u8]) -> Result<Vec<Vec<u8>>> {
    Ok(item::fragment_slices(data)?
        .into_iter()
        .map(|fragment| fragment.to_vec())
        .collect())
}

/// Join every fragment of an in-memory stream.
pub fn defragment_data(data: &[u8]) -> Result<Vec<u8>> {
    Ok(item::fragment_slices(data)?.concat())
}
