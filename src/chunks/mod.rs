//! Chunked, compressed entry container
//!
//! A container is a sequence of chunks, each holding one gzip-compressed batch of entries:
//!
//! ```text
//! [ 0xFF x DELIMITER_LENGTH | compressed length (u32, big endian) | gzip(batch) ]*
//! [ 0xFF x DELIMITER_LENGTH | 0u32 ]
//! ```
//!
//! The final zero-length chunk terminates the stream. Because every chunk starts with a run of
//! delimiter bytes, a reader can seek to an arbitrary byte offset and scan forward to the next
//! chunk boundary. This allows many workers to process disjoint byte ranges ("splits") of the
//! same file without an index (see [`ChunkReader::new_split`]).

mod reader;
mod writer;

pub use reader::ChunkReader;
pub use writer::{ChunkWriter, ChunkWriterBuilder};

use crate::error::Result;

/// Value of every byte of a chunk delimiter
pub const DELIMITER_CONTENT: u8 = 0xFF;

/// Number of bytes of a chunk delimiter
pub const DELIMITER_LENGTH: usize = 8;

/// Size of the compressed length field following a delimiter
pub const LENGTH_FIELD_SIZE: usize = 4;

/// Size of the framing preceding every compressed payload
pub const CHUNK_HEADER_SIZE: usize = DELIMITER_LENGTH + LENGTH_FIELD_SIZE;

/// Leading bytes of every gzip member
pub const GZIP_MAGIC: [u8; 2] = [0x1F, 0x8B];

/// Default maximum number of entries per chunk
pub const DEFAULT_ENTRIES_PER_CHUNK: usize = 10_000;

/// Default gzip compression level
pub const DEFAULT_COMPRESSION_LEVEL: u32 = 6;

/// An entry type that can be stored in a chunked container
///
/// Implementors define how a batch of entries is serialized before compression.
pub trait ChunkEntry: Sized + Clone {
    /// Number of physical reads represented by this entry
    fn multiplicity(&self) -> u32 {
        1
    }

    /// Serializes a batch of entries, appending to `dst`
    fn encode_batch(entries: &[Self], dst: &mut Vec<u8>);

    /// Deserializes a batch of entries, appending to `dst`
    fn decode_batch(src: &[u8], dst: &mut Vec<Self>) -> Result<()>;
}
