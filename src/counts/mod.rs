//! Count tracks
//!
//! A count track describes a piecewise-constant, non-negative count over the positions of a
//! sequence (e.g. read coverage). Tracks are stored as run-length, delta-coded bitstreams
//! (see [`codec`]) and consumed through the [`TransitionSource`] capability, which is shared by
//! the base [`CountTrackReader`], the [`OffsetTrackReader`] decorator and the
//! [`MergedTransitionReader`].

pub mod codec;
mod merge;
mod offset;
mod reader;
mod writer;

use auto_impl::auto_impl;

pub use codec::END_OF_DATA_MARKER;
pub use merge::MergedTransitionReader;
pub use offset::OffsetTrackReader;
pub use reader::CountTrackReader;
pub use writer::CountTrackWriter;

use crate::error::Result;

/// Shared reader capability over a stream of count transitions.
///
/// A transition marks a position where the count changes. The accessors
/// ([`position`](Self::position), [`count`](Self::count), [`length`](Self::length)) describe the
/// transition loaded by the last successful call to [`next_transition`](Self::next_transition).
#[auto_impl(&mut, Box)]
pub trait TransitionSource {
    /// Returns true when a call to [`next_transition`](Self::next_transition) will succeed.
    ///
    /// Calling this repeatedly without consuming the transition is idempotent.
    fn has_next_transition(&mut self) -> Result<bool>;

    /// Advances to the next transition.
    ///
    /// Fails with [`CountsError::InvalidState`](crate::CountsError::InvalidState) when no
    /// transition is available.
    fn next_transition(&mut self) -> Result<()>;

    /// Position where the current transition occurs
    fn position(&self) -> u64;

    /// Count holding from the current position
    fn count(&self) -> u64;

    /// Number of positions the current count holds for
    fn length(&self) -> u64;

    /// Advances until [`position`](Self::position) is at least `position`, or the stream ends.
    fn skip_to(&mut self, position: u64) -> Result<()>;
}
