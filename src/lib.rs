//! # seqstore
//!
//! Compact storage for two kinds of sequencing analysis data:
//!
//! * **Count tracks** ([`counts`]): piecewise-constant coverage counts over the positions of a
//!   sequence, stored as run-length, delta/gamma coded bitstreams. Tracks are read one
//!   transition at a time, optionally shifted into a global coordinate space
//!   ([`OffsetTrackReader`]) and synchronized across many tracks
//!   ([`MergedTransitionReader`]).
//! * **Alignment collections** ([`alignment`]): alignment entries stored in a chunked,
//!   gzip-compressed container ([`chunks`]) next to a header and a statistics file. The
//!   container can be split at arbitrary byte offsets, so that many threads can read disjoint
//!   parts of one file ([`MmapEntriesReader`]).
//!
//! ## Example
//!
//! ```
//! use std::io::Cursor;
//! use seqstore::{CountTrackReader, CountTrackWriter, Result, TransitionSource};
//!
//! # fn main() -> Result<()> {
//! let mut writer = CountTrackWriter::new(Vec::new())?;
//! writer.append_count(3, 10)?;
//! writer.append_count(0, 5)?;
//! let bytes = writer.into_inner()?;
//!
//! let mut reader = CountTrackReader::new(Cursor::new(bytes))?;
//! while reader.has_next_transition()? {
//!     reader.next_transition()?;
//!     println!("{} x{} at {}", reader.count(), reader.length(), reader.position());
//! }
//! # Ok(())
//! # }
//! ```

pub mod alignment;
pub mod chunks;
pub mod counts;
pub mod error;
pub mod parallel;

pub use alignment::{
    AlignmentEntry, AlignmentHeader, AlignmentReader, AlignmentWriter, AlignmentWriterBuilder,
    IdentifierMapping, IdentifierTable, QueryLengths, Statistics,
};
pub use chunks::{
    ChunkEntry, ChunkReader, ChunkWriter, ChunkWriterBuilder, DEFAULT_ENTRIES_PER_CHUNK,
    DELIMITER_CONTENT, DELIMITER_LENGTH,
};
pub use counts::{
    CountTrackReader, CountTrackWriter, MergedTransitionReader, OffsetTrackReader,
    TransitionSource,
};
pub use error::{ChunkError, CountsError, Error, HeaderError, IntoSeqstoreError, Result};
pub use parallel::{MmapEntriesReader, ParallelProcessor, ParallelReader};

/// Magic number at the start of every alignment header
pub const HEADER_MAGIC: &[u8; 8] = b"SQSHEADR";

/// Current alignment header format version
pub const HEADER_VERSION: u8 = 1;
