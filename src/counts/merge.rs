use super::TransitionSource;
use crate::error::{CountsError, Result};

/// Iterates over several count sources at once, reporting a transition at every position
/// where at least one source has a transition.
///
/// Positions where all sources keep a constant count are never visited, which makes it cheap
/// to compare counts across many tracks. The merged run length is bounded so that a merged
/// run never straddles a transition of any source.
pub struct MergedTransitionReader<S: TransitionSource> {
    sources: Vec<S>,
    /// Position of the last transition loaded from each source
    positions: Vec<Option<u64>>,
    /// Sources that have no more transitions
    exhausted: Vec<bool>,
    /// Count of each source as of its last transition at or before the current position
    counts: Vec<u64>,
    current_position: Option<u64>,
    current_length: u64,
    loaded: bool,
    finished: bool,
}
impl<S: TransitionSource> MergedTransitionReader<S> {
    pub fn new(sources: Vec<S>) -> Self {
        let n = sources.len();
        Self {
            sources,
            positions: vec![None; n],
            exhausted: vec![false; n],
            counts: vec![0; n],
            current_position: None,
            current_length: 0,
            loaded: false,
            finished: n == 0,
        }
    }

    #[must_use]
    pub fn num_sources(&self) -> usize {
        self.sources.len()
    }

    pub fn sources(&self) -> &[S] {
        &self.sources
    }

    pub fn into_inner(self) -> Vec<S> {
        self.sources
    }

    /// Whether source `index` has a transition at the current position
    #[must_use]
    pub fn is_at_position(&self, index: usize) -> bool {
        !self.exhausted[index]
            && self.current_position.is_some()
            && self.positions[index] == self.current_position
    }

    /// Count of source `index` as of its last transition at or before the current position.
    ///
    /// Use [`is_at_position`](Self::is_at_position) to know if the source transitions here.
    #[must_use]
    pub fn count_of(&self, index: usize) -> u64 {
        self.counts[index]
    }

    /// Sum of the counts of every source covering the current position, whether or not they
    /// transition here.
    ///
    /// A source with no more transitions only contributes until its last run ends.
    #[must_use]
    pub fn total_count(&self) -> u64 {
        let Some(position) = self.current_position else {
            return 0;
        };
        (0..self.sources.len())
            .filter(|&i| self.covers(i, position))
            .map(|i| self.counts[i])
            .sum()
    }

    /// Whether the count cached for source `index` holds at `position`
    fn covers(&self, index: usize, position: u64) -> bool {
        if !self.exhausted[index] {
            return true;
        }
        self.positions[index].is_some_and(|p| {
            p <= position && position - p < self.sources[index].length()
        })
    }

    /// Pulls the next transition of every live source sitting before `target`
    fn advance_sources(&mut self, target: u64) -> Result<()> {
        for (i, source) in self.sources.iter_mut().enumerate() {
            if self.exhausted[i] || self.positions[i].is_some_and(|p| p >= target) {
                continue;
            }
            if source.has_next_transition()? {
                source.next_transition()?;
                self.positions[i] = Some(source.position());
            } else {
                self.exhausted[i] = true;
            }
        }
        Ok(())
    }

    /// Minimum position over the live sources
    fn synchronized_position(&self) -> Option<u64> {
        self.positions
            .iter()
            .zip(&self.exhausted)
            .filter(|&(_, &done)| !done)
            .filter_map(|(p, _)| *p)
            .min()
    }

    /// Distance from `position` to the nearest run boundary of any source.
    ///
    /// Live sources ahead of `position` bound the run by their upcoming transition; sources
    /// whose last run covers `position` bound it by the end of that run.
    fn bounded_length(&self, position: u64) -> u64 {
        let mut length = u64::MAX;
        for (i, source) in self.sources.iter().enumerate() {
            let Some(p) = self.positions[i] else {
                continue;
            };
            if p > position {
                if !self.exhausted[i] {
                    length = length.min(p - position);
                }
            } else {
                let end = p.saturating_add(source.length());
                if end > position {
                    length = length.min(end - position);
                }
            }
        }
        length
    }
}

impl<S: TransitionSource> TransitionSource for MergedTransitionReader<S> {
    fn has_next_transition(&mut self) -> Result<bool> {
        if self.loaded {
            return Ok(true);
        }
        if self.finished {
            return Ok(false);
        }
        let target = match self.current_position {
            None => 0,
            Some(p) => match p.checked_add(1) {
                Some(target) => target,
                None => {
                    self.finished = true;
                    return Ok(false);
                }
            },
        };
        self.advance_sources(target)?;

        let Some(position) = self.synchronized_position() else {
            self.finished = true;
            return Ok(false);
        };
        self.current_position = Some(position);
        self.current_length = self.bounded_length(position);
        for (i, source) in self.sources.iter().enumerate() {
            if !self.exhausted[i] && self.positions[i] == Some(position) {
                self.counts[i] = source.count();
            }
        }
        self.loaded = true;
        Ok(true)
    }

    fn next_transition(&mut self) -> Result<()> {
        if self.has_next_transition()? {
            self.loaded = false;
            Ok(())
        } else {
            Err(CountsError::InvalidState.into())
        }
    }

    fn position(&self) -> u64 {
        self.current_position.unwrap_or(0)
    }

    /// Sum of the counts of the sources that transition at the current position
    fn count(&self) -> u64 {
        (0..self.sources.len())
            .filter(|&i| self.is_at_position(i))
            .map(|i| self.counts[i])
            .sum()
    }

    fn length(&self) -> u64 {
        self.current_length
    }

    fn skip_to(&mut self, _position: u64) -> Result<()> {
        Err(CountsError::Unsupported("skip_to").into())
    }
}
