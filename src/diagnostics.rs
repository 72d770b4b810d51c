//! Recoverable problems found while reading non-conformant data.

use std::fmt;

/// What kind of non-conformance was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NonConformanceKind {
    /// A delimiter wasn't followed by a zero length.
    DelimiterLength,
    /// The end marker search reached the end of the data.
    MissingEndMarker,
    /// The number of frames found disagrees with the declared count.
    FrameCount,
    /// A decoded RLE segment is longer than expected.
    SegmentExcess,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NonConformance {
    pub kind: NonConformanceKind,
    pub message: String,
    pub offset: Option<u64>,
}

impl fmt::Display for NonConformance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.offset {
            Some(offset) => write!(f, "{} (offset {})", self.message, offset),
            None => write!(f, "{}", self.message),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Diagnostics {
    entries: Vec<NonConformance>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Diagnostics::default()
    }

    pub fn warn(&mut self, kind: NonConformanceKind, offset: Option<u64>, message: impl Into<String>) {
        let entry = NonConformance {
            kind,
            message: message.into(),
            offset,
        };

        tracing::warn!(kind = ?entry.kind, "{}", entry);

        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[NonConformance] {
        &self.entries
    }

    pub fn has(&self, kind: NonConformanceKind) -> bool {
        self.entries.iter().any(|e| e.kind == kind)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Move the entries of `other` into this sink.
    pub fn extend(&mut self, other: Diagnostics) {
        self.entries.extend(other.entries);
    }
}
