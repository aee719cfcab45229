use std::io::Read;

use super::codec::{decode_initial_count, decode_transition, BitReader, Transition};
use super::TransitionSource;
use crate::error::{CountsError, Result};

/// Where the reader stands in the transition protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CursorState {
    /// The next call to `has_next_transition` must decode
    Unloaded,
    /// A transition was decoded but not consumed yet
    TransitionLoaded,
    /// The end-of-data marker was read
    EndOfStream,
}

/// Sequential decoder over one count track
///
/// Supports two iteration styles which should not be mixed on one reader:
/// - transition based ([`TransitionSource`]): one step per change of count
/// - position based ([`has_next_position`](Self::has_next_position) /
///   [`next_count_at_position`](Self::next_count_at_position)): one step per position
pub struct CountTrackReader<R: Read> {
    input: BitReader<R>,
    state: CursorState,
    /// Count before the first transition
    initial_count: u64,
    /// Last decoded transition, `None` before the first one
    current: Option<Transition>,
    /// Positions left in the current run for per-position iteration
    remaining: u64,
    /// Position of the count most recently returned by `next_count_at_position`
    base_position: Option<u64>,
}
impl<R: Read> CountTrackReader<R> {
    /// Reads the initial count and prepares to decode transitions
    pub fn new(inner: R) -> Result<Self> {
        let mut input = BitReader::new(inner);
        let initial_count = decode_initial_count(&mut input)?;
        Ok(Self {
            input,
            state: CursorState::Unloaded,
            initial_count,
            current: None,
            remaining: 0,
            base_position: None,
        })
    }

    /// Count before the first transition
    #[must_use]
    pub fn initial_count(&self) -> u64 {
        self.initial_count
    }

    /// Signed change of the count at the current transition
    #[must_use]
    pub fn delta_count(&self) -> i64 {
        self.current.map_or(0, |t| t.delta)
    }

    /// Whether the end-of-data marker was reached
    #[must_use]
    pub fn is_end_of_stream(&self) -> bool {
        self.state == CursorState::EndOfStream
    }

    /// Number of bits consumed from the underlying stream
    #[must_use]
    pub fn bits_read(&self) -> u64 {
        self.input.bits_read()
    }

    fn decode_next(&mut self) -> Result<Option<Transition>> {
        let (count, position) = match self.current {
            Some(t) => (t.count, t.next_position()?),
            None => (self.initial_count, 0),
        };
        decode_transition(&mut self.input, count, position)
    }

    /// Checks if a count is available for another position
    pub fn has_next_position(&mut self) -> Result<bool> {
        if self.remaining > 0 {
            return Ok(true);
        }
        if !self.has_next_transition()? {
            return Ok(false);
        }
        self.next_transition()?;
        self.remaining = self.length();
        Ok(true)
    }

    /// Returns the count at the next position
    pub fn next_count_at_position(&mut self) -> Result<u64> {
        if !self.has_next_position()? {
            return Err(CountsError::InvalidState.into());
        }
        let Some(current) = self.current else {
            return Err(CountsError::InvalidState.into());
        };
        let position = current
            .position
            .checked_add(current.length - self.remaining)
            .ok_or(CountsError::MalformedStream("position overflow"))?;
        self.base_position = Some(position);
        self.remaining -= 1;
        Ok(current.count)
    }

    /// Position of the count most recently returned by
    /// [`next_count_at_position`](Self::next_count_at_position)
    #[must_use]
    pub fn base_position(&self) -> Option<u64> {
        self.base_position
    }
}

impl<R: Read> TransitionSource for CountTrackReader<R> {
    fn has_next_transition(&mut self) -> Result<bool> {
        match self.state {
            CursorState::TransitionLoaded => Ok(true),
            CursorState::EndOfStream => Ok(false),
            CursorState::Unloaded => {
                if let Some(transition) = self.decode_next()? {
                    self.current = Some(transition);
                    self.state = CursorState::TransitionLoaded;
                    Ok(true)
                } else {
                    self.state = CursorState::EndOfStream;
                    Ok(false)
                }
            }
        }
    }

    fn next_transition(&mut self) -> Result<()> {
        if self.has_next_transition()? {
            self.state = CursorState::Unloaded;
            Ok(())
        } else {
            Err(CountsError::InvalidState.into())
        }
    }

    fn position(&self) -> u64 {
        self.current.map_or(0, |t| t.position)
    }

    fn count(&self) -> u64 {
        self.current.map_or(self.initial_count, |t| t.count)
    }

    fn length(&self) -> u64 {
        self.current.map_or(0, |t| t.length)
    }

    fn skip_to(&mut self, position: u64) -> Result<()> {
        while self.has_next_transition()? {
            self.next_transition()?;
            if self.position() >= position {
                break;
            }
        }
        Ok(())
    }
}
