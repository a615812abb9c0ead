//! Paragraph-boundary chunking for arbitrary source text.
//!
//! This module provides the generic chunking path used by codie for every file
//! whose extension has no registered grammar, and as the fallback whenever a
//! syntax-aware split produces nothing usable.
//!
//! The module defines two main items:
//! - [`Chunk`]: A contiguous span of source text plus its location metadata.
//! - [`ParagraphChunker`]: Splits text on blank lines and greedily coalesces the
//!   resulting segments into chunks bounded by a maximum size.
//!
//! # Algorithm
//!
//! 1.  The text is split on blank-line boundaries (a newline, optional horizontal
//!     whitespace, and another newline).
//! 2.  Leading and trailing blank lines and trailing whitespace are dropped from
//!     each segment; the indentation of its first line is kept. Whitespace-only
//!     segments are dropped entirely.
//! 3.  Segments are appended to a running buffer, joined by [`SEGMENT_SEPARATOR`].
//!     When appending the next segment would push the buffer past the maximum
//!     size, the buffer is flushed as one chunk first.
//! 4.  A buffer that already meets or exceeds the maximum size after an append is
//!     flushed immediately.
//! 5.  Whatever remains in the buffer becomes the final chunk.
//!
//! Sizes are measured in bytes and include the separators inserted between
//! segments. A single segment larger than the maximum is emitted whole: it is
//! never split further and never truncated.
//!
//! # Usage
//!
//! ```
//! use codie_context::text::ParagraphChunker;
//!
//! let source = "fn a() {}\n\nfn b() {}\n\n\n\nfn c() {}";
//! let chunks = ParagraphChunker.split(source, 20);
//!
//! assert_eq!(chunks.len(), 2);
//! assert_eq!(chunks[0].text, "fn a() {}\n\nfn b() {}");
//! assert_eq!(chunks[0].start_line, 1);
//! assert_eq!(chunks[0].end_line, 3);
//! assert_eq!(chunks[1].text, "fn c() {}");
//! assert_eq!(chunks[1].start_line, 7);
//! ```
use regex::Regex;
use serde::Serialize;
use std::ops::Range;
use std::sync::LazyLock;

/// Default maximum chunk size in bytes used by the indexing pipeline.
pub const DEFAULT_MAX_CHUNK_SIZE: usize = 8000;

/// Separator inserted between coalesced segments.
pub const SEGMENT_SEPARATOR: &str = "\n\n";

static BLANK_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n[ \t\r]*\n").expect("blank-line pattern is valid"));

/// A contiguous span of source text treated as one embedding-request unit.
///
/// Line numbers are 1-indexed and inclusive. `function` and `class` are only set
/// by the syntax-aware splitter; paragraph chunks never carry them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Chunk {
    /// Position of this chunk within its file (0-indexed).
    pub sequence: usize,
    /// The chunk content.
    pub text: String,
    /// Name of the originating file, without directories.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    /// First line covered by the chunk.
    pub start_line: usize,
    /// Last line covered by the chunk.
    pub end_line: usize,
    /// Name of the function or method this chunk defines.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub function: Option<String>,
    /// Name of the class, struct or type this chunk defines or sits inside.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub class: Option<String>,
}

impl Chunk {
    pub fn new(text: String, start_line: usize, end_line: usize) -> Self {
        Self {
            sequence: 0,
            text,
            file_name: None,
            start_line,
            end_line,
            function: None,
            class: None,
        }
    }

    /// Size of the chunk text in bytes.
    pub fn len(&self) -> usize {
        self.text.len()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    pub fn with_file_name(mut self, file_name: impl Into<String>) -> Self {
        self.file_name = Some(file_name.into());
        self
    }
}

/// A non-empty segment of the source, with its line range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Segment<'a> {
    text: &'a str,
    start_line: usize,
    end_line: usize,
}

/// Maps byte offsets to 1-indexed line numbers.
pub(crate) struct LineIndex {
    line_starts: Vec<usize>,
}

impl LineIndex {
    pub(crate) fn new(text: &str) -> Self {
        let mut line_starts = vec![0];
        line_starts.extend(text.match_indices('\n').map(|(i, _)| i + 1));
        Self { line_starts }
    }

    /// Line containing the byte at `offset`.
    pub(crate) fn line_of(&self, offset: usize) -> usize {
        self.line_starts.partition_point(|&start| start <= offset)
    }
}

/// Generic chunker that splits on blank lines and coalesces up to a size bound.
///
/// The chunker holds no state, so splitting identical input twice always yields
/// identical output.
#[derive(Debug, Clone, Copy, Default)]
pub struct ParagraphChunker;

impl ParagraphChunker {
    /// Split `text` into ordered chunks of at most `max_size` bytes.
    ///
    /// A `max_size` of zero is treated as one, which emits every segment as its
    /// own chunk.
    pub fn split(&self, text: &str, max_size: usize) -> Vec<Chunk> {
        let max_size = max_size.max(1);
        let mut chunks = Vec::new();
        let mut buffer = ChunkBuffer::default();

        for segment in segments(text) {
            if !buffer.is_empty()
                && buffer.len() + SEGMENT_SEPARATOR.len() + segment.text.len() > max_size
            {
                buffer.flush_into(&mut chunks);
            }

            buffer.push(segment);

            if buffer.len() >= max_size {
                buffer.flush_into(&mut chunks);
            }
        }
        buffer.flush_into(&mut chunks);

        chunks
    }
}

#[derive(Default)]
struct ChunkBuffer {
    text: String,
    start_line: usize,
    end_line: usize,
}

impl ChunkBuffer {
    fn len(&self) -> usize {
        self.text.len()
    }

    fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    fn push(&mut self, segment: Segment<'_>) {
        if self.text.is_empty() {
            self.start_line = segment.start_line;
        } else {
            self.text.push_str(SEGMENT_SEPARATOR);
        }
        self.text.push_str(segment.text);
        self.end_line = segment.end_line;
    }

    fn flush_into(&mut self, chunks: &mut Vec<Chunk>) {
        if self.text.is_empty() {
            return;
        }
        let text = std::mem::take(&mut self.text);
        let mut chunk = Chunk::new(text, self.start_line, self.end_line);
        chunk.sequence = chunks.len();
        chunks.push(chunk);
    }
}

/// Blank-line separated, non-empty segments of `text` in order.
///
/// A segment starts at the beginning of its first non-blank line, so that line
/// keeps its indentation.
fn segments(text: &str) -> Vec<Segment<'_>> {
    let lines = LineIndex::new(text);
    let mut ranges: Vec<Range<usize>> = Vec::new();
    let mut last = 0;
    for separator in BLANK_LINE.find_iter(text) {
        ranges.push(last..separator.start());
        last = separator.end();
    }
    ranges.push(last..text.len());

    ranges
        .into_iter()
        .filter_map(|range| {
            let raw = &text[range.clone()];
            let first_visible = raw.len() - raw.trim_start().len();
            if first_visible == raw.len() {
                return None;
            }
            let lead = raw[..first_visible].rfind('\n').map_or(0, |i| i + 1);
            let kept = raw[lead..].trim_end();
            let start = range.start + lead;
            let end = start + kept.len();
            Some(Segment {
                text: kept,
                start_line: lines.line_of(start),
                end_line: lines.line_of(end - 1),
            })
        })
        .collect()
}
