use std::io::Write;

use byteorder::{BigEndian, WriteBytesExt};
use flate2::{write::GzEncoder, Compression};
use tracing::{debug, info};

use super::{
    ChunkEntry, CHUNK_HEADER_SIZE, DEFAULT_COMPRESSION_LEVEL, DEFAULT_ENTRIES_PER_CHUNK,
    DELIMITER_CONTENT, DELIMITER_LENGTH,
};
use crate::error::{ChunkError, Result};

/// Builder for creating configured [`ChunkWriter`] instances
///
/// # Examples
///
/// ```
/// # use seqstore::{AlignmentEntry, ChunkWriterBuilder, Result};
/// # fn main() -> Result<()> {
/// let mut writer = ChunkWriterBuilder::default()
///     .entries_per_chunk(1000)
///     .multiplicity_threshold(10)
///     .build::<_, AlignmentEntry>(Vec::new());
/// writer.append(AlignmentEntry::default())?;
/// let bytes = writer.into_inner()?;
/// assert!(!bytes.is_empty());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct ChunkWriterBuilder {
    /// Maximum number of entries buffered before a chunk is written
    entries_per_chunk: Option<usize>,
    /// Entries above this multiplicity never share a chunk with ordinary entries
    multiplicity_threshold: Option<u32>,
    /// gzip compression level (0-9)
    compression_level: Option<u32>,
}
impl ChunkWriterBuilder {
    #[must_use]
    pub fn entries_per_chunk(mut self, entries_per_chunk: usize) -> Self {
        self.entries_per_chunk = Some(entries_per_chunk.max(1));
        self
    }

    #[must_use]
    pub fn multiplicity_threshold(mut self, threshold: u32) -> Self {
        self.multiplicity_threshold = Some(threshold);
        self
    }

    #[must_use]
    pub fn compression_level(mut self, level: u32) -> Self {
        self.compression_level = Some(level.min(9));
        self
    }

    pub fn build<W: Write, E: ChunkEntry>(self, inner: W) -> ChunkWriter<W, E> {
        ChunkWriter {
            inner,
            batch: Vec::new(),
            batch_is_high: false,
            entries_per_chunk: self.entries_per_chunk.unwrap_or(DEFAULT_ENTRIES_PER_CHUNK),
            multiplicity_threshold: self.multiplicity_threshold,
            compression: Compression::new(
                self.compression_level.unwrap_or(DEFAULT_COMPRESSION_LEVEL),
            ),
            ubuf: Vec::new(),
            zbuf: Vec::new(),
            total_entries_written: 0,
            total_bytes_written: 0,
            chunks_written: 0,
            finished: false,
        }
    }
}

/// Writes entries as delimiter-framed, gzip-compressed chunks
pub struct ChunkWriter<W: Write, E: ChunkEntry> {
    inner: W,

    /// Entries waiting to be written
    batch: Vec<E>,
    /// Whether the pending batch holds entries above the multiplicity threshold
    batch_is_high: bool,

    entries_per_chunk: usize,
    multiplicity_threshold: Option<u32>,
    compression: Compression,

    /// Reusable serialization buffer
    ubuf: Vec<u8>,
    /// Reusable compression buffer
    zbuf: Vec<u8>,

    /// Logical entries written (each entry counts for its multiplicity)
    total_entries_written: u64,
    total_bytes_written: u64,
    chunks_written: u64,
    finished: bool,
}
impl<W: Write, E: ChunkEntry> ChunkWriter<W, E> {
    /// Creates a writer with the default configuration
    pub fn new(inner: W) -> Self {
        ChunkWriterBuilder::default().build(inner)
    }

    fn is_high_multiplicity(&self, entry: &E) -> bool {
        self.multiplicity_threshold
            .is_some_and(|threshold| entry.multiplicity() > threshold)
    }

    /// Buffers an entry, writing a chunk when needed
    ///
    /// Fails with [`ChunkError::WriterFinished`] once the container was terminated.
    pub fn append(&mut self, entry: E) -> Result<()> {
        if self.finished {
            return Err(ChunkError::WriterFinished.into());
        }
        let high = self.is_high_multiplicity(&entry);
        if !self.batch.is_empty() && high != self.batch_is_high {
            self.flush()?;
        }
        self.batch_is_high = high;
        self.total_entries_written += u64::from(entry.multiplicity());
        self.batch.push(entry);
        if self.batch.len() >= self.entries_per_chunk {
            self.flush()?;
        }
        Ok(())
    }

    /// Writes the pending entries as a chunk, if any
    pub fn flush(&mut self) -> Result<()> {
        if self.finished {
            return Err(ChunkError::WriterFinished.into());
        }
        if self.batch.is_empty() {
            return Ok(());
        }
        self.ubuf.clear();
        E::encode_batch(&self.batch, &mut self.ubuf);

        self.zbuf.clear();
        let mut encoder = GzEncoder::new(&mut self.zbuf, self.compression);
        encoder.write_all(&self.ubuf)?;
        encoder.finish()?;

        let z_bytes = u32::try_from(self.zbuf.len())
            .map_err(|_| ChunkError::ChunkTooLarge(self.zbuf.len()))?;
        self.inner.write_all(&[DELIMITER_CONTENT; DELIMITER_LENGTH])?;
        self.inner.write_u32::<BigEndian>(z_bytes)?;
        self.inner.write_all(&self.zbuf)?;

        self.total_bytes_written += (CHUNK_HEADER_SIZE + self.zbuf.len()) as u64;
        self.chunks_written += 1;
        debug!(
            entries = self.batch.len(),
            uncompressed = self.ubuf.len(),
            compressed = self.zbuf.len(),
            high_multiplicity = self.batch_is_high,
            "chunk written"
        );
        self.batch.clear();
        Ok(())
    }

    /// Writes pending entries and the terminating chunk, then flushes the underlying writer.
    ///
    /// Calling this more than once is a no-op.
    pub fn finish(&mut self) -> Result<()> {
        if self.finished {
            return Ok(());
        }
        self.flush()?;
        self.inner.write_all(&[DELIMITER_CONTENT; DELIMITER_LENGTH])?;
        self.inner.write_u32::<BigEndian>(0)?;
        self.inner.flush()?;
        self.total_bytes_written += CHUNK_HEADER_SIZE as u64;
        self.finished = true;

        info!(
            logical_entries = self.total_entries_written,
            bytes = self.total_bytes_written,
            chunks = self.chunks_written,
            "chunked container finished"
        );
        Ok(())
    }

    /// Number of logical entries written, each entry counting for its multiplicity
    #[must_use]
    pub fn total_entries_written(&self) -> u64 {
        self.total_entries_written
    }

    /// Number of bytes written to the underlying writer, framing included
    #[must_use]
    pub fn total_bytes_written(&self) -> u64 {
        self.total_bytes_written
    }

    #[must_use]
    pub fn chunks_written(&self) -> u64 {
        self.chunks_written
    }

    /// Average number of bytes per logical entry
    #[must_use]
    pub fn bytes_per_entry(&self) -> f64 {
        if self.total_entries_written == 0 {
            0.0
        } else {
            self.total_bytes_written as f64 / self.total_entries_written as f64
        }
    }

    /// Number of entries waiting to be written
    #[must_use]
    pub fn pending(&self) -> usize {
        self.batch.len()
    }

    /// Finishes the container and returns the underlying writer
    pub fn into_inner(mut self) -> Result<W> {
        self.finish()?;
        Ok(self.inner)
    }
}
