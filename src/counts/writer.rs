use std::io::Write;

use tracing::info;

use super::codec::{encode_end_of_data, encode_initial_count, encode_transition, BitWriter};
use crate::error::{CountsError, Result};

/// Writes a count track as a run-length, delta-coded bitstream
///
/// Each call to [`append_count`](Self::append_count) describes the count holding for the next
/// `length` positions, starting at position zero. Consecutive runs with the same count are
/// still written as separate transitions (with a zero delta); use
/// [`append_counts`](Self::append_counts) to collapse equal neighbours.
pub struct CountTrackWriter<W: Write> {
    inner: BitWriter<W>,
    previous_count: u64,
    /// Position where the next appended run starts
    position: u64,
    transitions_written: u64,
    bits_written: u64,
    /// Whether the end-of-data marker was written
    finished: bool,
}
impl<W: Write> CountTrackWriter<W> {
    /// Creates a writer whose count before the first transition is zero
    pub fn new(inner: W) -> Result<Self> {
        Self::with_initial_count(inner, 0)
    }

    /// Creates a writer with an explicit count before the first transition
    pub fn with_initial_count(inner: W, initial_count: u64) -> Result<Self> {
        let mut inner = BitWriter::new(inner);
        let bits_written = encode_initial_count(&mut inner, initial_count)?;
        Ok(Self {
            inner,
            previous_count: initial_count,
            position: 0,
            transitions_written: 0,
            bits_written,
            finished: false,
        })
    }

    /// Appends a run of `length` positions holding `count`
    pub fn append_count(&mut self, count: u64, length: u64) -> Result<()> {
        if self.finished {
            return Err(CountsError::WriterFinished.into());
        }
        let next_position = self
            .position
            .checked_add(length)
            .ok_or(CountsError::MalformedStream("position overflow"))?;
        self.bits_written +=
            encode_transition(&mut self.inner, self.previous_count, count, length)?;
        self.previous_count = count;
        self.position = next_position;
        self.transitions_written += 1;
        Ok(())
    }

    /// Appends a per-position count array, one run per group of equal neighbours
    pub fn append_counts(&mut self, counts: &[u64]) -> Result<()> {
        let mut iter = counts.iter().copied().peekable();
        while let Some(count) = iter.next() {
            let mut length = 1;
            while iter.next_if_eq(&count).is_some() {
                length += 1;
            }
            self.append_count(count, length)?;
        }
        Ok(())
    }

    /// Position where the next appended run starts
    #[must_use]
    pub fn position(&self) -> u64 {
        self.position
    }

    #[must_use]
    pub fn transitions_written(&self) -> u64 {
        self.transitions_written
    }

    #[must_use]
    pub fn bits_written(&self) -> u64 {
        self.bits_written
    }

    /// Writes the end-of-data marker and flushes the underlying writer.
    ///
    /// Calling this more than once is a no-op.
    pub fn finish(&mut self) -> Result<()> {
        if self.finished {
            return Ok(());
        }
        self.bits_written += encode_end_of_data(&mut self.inner)?;
        self.inner.flush()?;
        self.finished = true;

        let bits_per_transition = if self.transitions_written == 0 {
            0.0
        } else {
            self.bits_written as f64 / self.transitions_written as f64
        };
        info!(
            bits = self.bits_written,
            bytes = self.bits_written.div_ceil(8),
            transitions = self.transitions_written,
            bits_per_transition,
            "count track written"
        );
        Ok(())
    }

    /// Finishes the track and returns the underlying writer
    pub fn into_inner(mut self) -> Result<W> {
        self.finish()?;
        self.inner.into_inner()
    }
}
