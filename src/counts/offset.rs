use super::TransitionSource;
use crate::error::{CountsError, Result};

/// Shifts every position reported by a delegate reader by a fixed offset
///
/// Used to place the counts of a locally indexed contig into a shared, global coordinate
/// space without re-encoding the track.
pub struct OffsetTrackReader<S: TransitionSource> {
    delegate: S,
    offset: u64,
}
impl<S: TransitionSource> OffsetTrackReader<S> {
    pub fn new(delegate: S, offset: u64) -> Self {
        Self { delegate, offset }
    }

    #[must_use]
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn set_offset(&mut self, offset: u64) {
        self.offset = offset;
    }

    pub fn delegate(&self) -> &S {
        &self.delegate
    }

    pub fn into_inner(self) -> S {
        self.delegate
    }
}

impl<S: TransitionSource> TransitionSource for OffsetTrackReader<S> {
    fn has_next_transition(&mut self) -> Result<bool> {
        self.delegate.has_next_transition()
    }

    fn next_transition(&mut self) -> Result<()> {
        self.delegate.next_transition()?;
        if self.delegate.position().checked_add(self.offset).is_none() {
            return Err(CountsError::MalformedStream("position overflow").into());
        }
        Ok(())
    }

    fn position(&self) -> u64 {
        self.delegate.position().saturating_add(self.offset)
    }

    fn count(&self) -> u64 {
        self.delegate.count()
    }

    fn length(&self) -> u64 {
        self.delegate.length()
    }

    fn skip_to(&mut self, position: u64) -> Result<()> {
        self.delegate.skip_to(position.saturating_sub(self.offset))
    }
}
