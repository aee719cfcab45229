//! Bit-level codec for count tracks
//!
//! A count track is stored as a raw bitstream:
//! - the initial count, written as the Elias delta code of `count + 1`
//! - a sequence of transitions, each written as two Elias gamma codes over the
//!   natural numbers: the zig-zag image of the count delta followed by the run length
//! - the [`END_OF_DATA_MARKER`] written in place of the next delta
//!
//! Bits are packed most significant bit first and the last byte is zero padded.

use std::io::{Read, Write};

use crate::error::{CountsError, Result};

/// Reserved value written in place of a delta to signal that no transition follows
pub const END_OF_DATA_MARKER: u64 = 277_492_431;

/// Size of the internal byte buffer used by [`BitReader`]
const READ_BUFFER_SIZE: usize = 8 * 1024;

/// Maps a signed delta to a natural number.
///
/// Negative values map to odd numbers (`-2d - 1`), non-negative values to even
/// numbers (`2d`). Every `i64` has an image, `i64::MIN` maps to `u64::MAX`.
#[must_use]
pub fn zigzag_encode(delta: i64) -> u64 {
    if delta < 0 {
        ((delta.unsigned_abs() - 1) << 1) | 1
    } else {
        delta.unsigned_abs() << 1
    }
}

/// Inverse of [`zigzag_encode`].
#[must_use]
pub fn zigzag_decode(encoded: u64) -> i64 {
    if encoded % 2 == 1 {
        -((encoded / 2) as i64) - 1
    } else {
        (encoded / 2) as i64
    }
}

/// Writes individual bits and universal codes to an underlying writer
pub struct BitWriter<W: Write> {
    inner: W,
    /// Bits accumulated for the current byte
    current: u8,
    /// Number of bits used in `current`
    filled: u32,
    /// Total number of bits written so far
    bits_written: u64,
}
impl<W: Write> BitWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            current: 0,
            filled: 0,
            bits_written: 0,
        }
    }

    /// Returns the total number of bits written, excluding padding
    #[must_use]
    pub fn bits_written(&self) -> u64 {
        self.bits_written
    }

    pub fn write_bit(&mut self, bit: bool) -> Result<()> {
        self.current = (self.current << 1) | u8::from(bit);
        self.filled += 1;
        self.bits_written += 1;
        if self.filled == 8 {
            self.inner.write_all(&[self.current])?;
            self.current = 0;
            self.filled = 0;
        }
        Ok(())
    }

    /// Writes the lowest `width` bits of `value`, most significant first
    pub fn write_bits(&mut self, value: u64, width: u32) -> Result<()> {
        for shift in (0..width).rev() {
            self.write_bit((value >> shift) & 1 == 1)?;
        }
        Ok(())
    }

    /// Writes a natural number `n` as the Elias gamma code of `n + 1`.
    ///
    /// Returns the number of bits written.
    pub fn write_gamma(&mut self, n: u64) -> Result<u64> {
        let x = n
            .checked_add(1)
            .ok_or(CountsError::MalformedStream("value too large for gamma code"))?;
        let width = u64::BITS - x.leading_zeros();
        for _ in 1..width {
            self.write_bit(false)?;
        }
        self.write_bits(x, width)?;
        Ok(u64::from(2 * width - 1))
    }

    /// Writes a positive number `x` as its Elias delta code.
    ///
    /// Returns the number of bits written.
    pub fn write_delta(&mut self, x: u64) -> Result<u64> {
        if x == 0 {
            return Err(CountsError::MalformedStream("delta code requires a positive value").into());
        }
        let width = u64::BITS - x.leading_zeros();
        let mut bits = self.write_gamma(u64::from(width) - 1)?;
        self.write_bits(x, width - 1)?;
        bits += u64::from(width - 1);
        Ok(bits)
    }

    /// Pads the current byte with zeros and flushes the underlying writer
    pub fn flush(&mut self) -> Result<()> {
        if self.filled > 0 {
            let byte = self.current << (8 - self.filled);
            self.inner.write_all(&[byte])?;
            self.current = 0;
            self.filled = 0;
        }
        self.inner.flush()?;
        Ok(())
    }

    /// Flushes pending bits and returns the underlying writer
    pub fn into_inner(mut self) -> Result<W> {
        self.flush()?;
        Ok(self.inner)
    }
}

/// Reads individual bits and universal codes from an underlying reader
pub struct BitReader<R: Read> {
    inner: R,
    buffer: Vec<u8>,
    /// Index of the next unread byte in `buffer`
    offset: usize,
    /// Number of valid bytes in `buffer`
    available: usize,
    /// Byte currently being consumed
    current: u8,
    /// Bits left in `current`
    remaining: u32,
    bits_read: u64,
}
impl<R: Read> BitReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            buffer: vec![0; READ_BUFFER_SIZE],
            offset: 0,
            available: 0,
            current: 0,
            remaining: 0,
            bits_read: 0,
        }
    }

    #[must_use]
    pub fn bits_read(&self) -> u64 {
        self.bits_read
    }

    fn refill(&mut self) -> Result<()> {
        if self.offset == self.available {
            self.available = loop {
                match self.inner.read(&mut self.buffer) {
                    Ok(n) => break n,
                    Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
                    Err(e) => return Err(e.into()),
                }
            };
            self.offset = 0;
            if self.available == 0 {
                return Err(CountsError::TruncatedStream(self.bits_read).into());
            }
        }
        self.current = self.buffer[self.offset];
        self.offset += 1;
        self.remaining = 8;
        Ok(())
    }

    pub fn read_bit(&mut self) -> Result<bool> {
        if self.remaining == 0 {
            self.refill()?;
        }
        self.remaining -= 1;
        self.bits_read += 1;
        Ok((self.current >> self.remaining) & 1 == 1)
    }

    pub fn read_bits(&mut self, width: u32) -> Result<u64> {
        let mut value = 0u64;
        for _ in 0..width {
            value = (value << 1) | u64::from(self.read_bit()?);
        }
        Ok(value)
    }

    /// Reads a natural number written by [`BitWriter::write_gamma`]
    pub fn read_gamma(&mut self) -> Result<u64> {
        let mut zeros = 0u32;
        while !self.read_bit()? {
            zeros += 1;
            if zeros >= u64::BITS {
                return Err(CountsError::MalformedStream("gamma prefix exceeds 63 bits").into());
            }
        }
        let x = (1u64 << zeros) | self.read_bits(zeros)?;
        Ok(x - 1)
    }

    /// Reads a positive number written by [`BitWriter::write_delta`]
    pub fn read_delta(&mut self) -> Result<u64> {
        let width = self.read_gamma()? + 1;
        if width > u64::from(u64::BITS) {
            return Err(CountsError::MalformedStream("delta code exceeds 64 bits").into());
        }
        let width = width as u32;
        Ok((1u64 << (width - 1)) | self.read_bits(width - 1)?)
    }
}

/// A decoded count transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    /// Signed change of the count at this transition
    pub delta: i64,
    /// Number of positions the new count holds for
    pub length: u64,
    /// Count after the delta was applied
    pub count: u64,
    /// First position covered by the new count
    pub position: u64,
}
impl Transition {
    /// Position of the transition that follows this one
    pub fn next_position(&self) -> Result<u64> {
        self.position
            .checked_add(self.length.max(1))
            .ok_or_else(|| CountsError::MalformedStream("position overflow").into())
    }
}

/// Writes the initial count that opens every track
pub fn encode_initial_count<W: Write>(writer: &mut BitWriter<W>, count: u64) -> Result<u64> {
    let shifted = count
        .checked_add(1)
        .ok_or(CountsError::MalformedStream("initial count too large"))?;
    writer.write_delta(shifted)
}

/// Reads the initial count that opens every track
pub fn decode_initial_count<R: Read>(reader: &mut BitReader<R>) -> Result<u64> {
    Ok(reader.read_delta()? - 1)
}

/// Emits one transition from `previous_count` to `new_count` holding for `run_length` positions.
///
/// Returns the number of bits written.
pub fn encode_transition<W: Write>(
    writer: &mut BitWriter<W>,
    previous_count: u64,
    new_count: u64,
    run_length: u64,
) -> Result<u64> {
    if run_length == 0 {
        return Err(CountsError::ZeroRunLength.into());
    }
    let delta = i64::try_from(new_count)
        .ok()
        .zip(i64::try_from(previous_count).ok())
        .and_then(|(new, previous)| new.checked_sub(previous))
        .ok_or(CountsError::CountOutOfRange {
            previous: previous_count,
            count: new_count,
        })?;
    let encoded = zigzag_encode(delta);
    if encoded == END_OF_DATA_MARKER {
        return Err(CountsError::MarkerCollision(delta).into());
    }
    let mut bits = writer.write_gamma(encoded)?;
    bits += writer.write_gamma(run_length)?;
    Ok(bits)
}

/// Emits the end-of-data marker
pub fn encode_end_of_data<W: Write>(writer: &mut BitWriter<W>) -> Result<u64> {
    writer.write_gamma(END_OF_DATA_MARKER)
}

/// Consumes one transition starting at `position` on top of `count`.
///
/// Returns `None` once the end-of-data marker is read.
pub fn decode_transition<R: Read>(
    reader: &mut BitReader<R>,
    count: u64,
    position: u64,
) -> Result<Option<Transition>> {
    let encoded = reader.read_gamma()?;
    if encoded == END_OF_DATA_MARKER {
        return Ok(None);
    }
    let length = reader.read_gamma()?;
    if length == 0 {
        return Err(CountsError::MalformedStream("zero run length").into());
    }
    let delta = zigzag_decode(encoded);
    let count = count
        .checked_add_signed(delta)
        .ok_or(CountsError::NegativeCount { count, delta })?;
    Ok(Some(Transition {
        delta,
        length,
        count,
        position,
    }))
}
