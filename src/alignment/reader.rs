use std::fs::File;
use std::io::{BufReader, ErrorKind, Read};

use tracing::warn;

use super::header::AlignmentHeader;
use super::identifiers::IdentifierMapping;
use super::stats::Statistics;
use super::{entries_path, header_path, stats_path, AlignmentEntry};
use crate::chunks::ChunkReader;
use crate::error::Result;

/// A reader over the entries file of an alignment collection
pub type FileAlignmentReader = AlignmentReader<BufReader<File>>;

fn read_sidecars(basename: &str) -> Result<(AlignmentHeader, Statistics)> {
    let header = AlignmentHeader::read_compressed(BufReader::new(File::open(header_path(
        basename,
    ))?))?;
    let statistics = match File::open(stats_path(basename)) {
        Ok(file) => Statistics::read_from(BufReader::new(file))?,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            warn!(basename, "no statistics found for alignment");
            Statistics::default()
        }
        Err(e) => return Err(e.into()),
    };
    Ok((header, statistics))
}

/// Reads an alignment collection: its header, statistics and entries
///
/// Identifier lookups return `None` for indices or names that are not part of the header.
pub struct AlignmentReader<R: Read> {
    header: AlignmentHeader,
    statistics: Statistics,
    queries: IdentifierMapping,
    targets: IdentifierMapping,
    entries: ChunkReader<R, AlignmentEntry>,
}

impl FileAlignmentReader {
    /// Opens `<basename>.header`, `<basename>.stats` (if present) and `<basename>.entries`
    pub fn open(basename: &str) -> Result<Self> {
        let (header, statistics) = read_sidecars(basename)?;
        let entries = ChunkReader::new(BufReader::new(File::open(entries_path(basename))?));
        Ok(Self::from_parts(header, statistics, entries))
    }

    /// Opens a collection, reading only the entries whose chunk starts in `[start, end)` of
    /// the entries file
    pub fn open_split(basename: &str, start: u64, end: u64) -> Result<Self> {
        let (header, statistics) = read_sidecars(basename)?;
        let file = BufReader::new(File::open(entries_path(basename))?);
        let entries = ChunkReader::new_split(file, start, end)?;
        Ok(Self::from_parts(header, statistics, entries))
    }
}

impl<R: Read> AlignmentReader<R> {
    pub fn from_parts(
        header: AlignmentHeader,
        statistics: Statistics,
        entries: ChunkReader<R, AlignmentEntry>,
    ) -> Self {
        let queries = header.query_identifiers.to_mapping();
        let targets = header.target_identifiers.to_mapping();
        Self {
            header,
            statistics,
            queries,
            targets,
            entries,
        }
    }

    #[must_use]
    pub fn header(&self) -> &AlignmentHeader {
        &self.header
    }

    #[must_use]
    pub fn statistics(&self) -> &Statistics {
        &self.statistics
    }

    #[must_use]
    pub fn number_of_queries(&self) -> u32 {
        self.header.number_of_queries
    }

    #[must_use]
    pub fn number_of_targets(&self) -> u32 {
        self.header.number_of_targets
    }

    #[must_use]
    pub fn number_of_aligned_reads(&self) -> u64 {
        self.header.number_of_aligned_reads
    }

    #[must_use]
    pub fn query_identifiers(&self) -> &IdentifierMapping {
        &self.queries
    }

    #[must_use]
    pub fn target_identifiers(&self) -> &IdentifierMapping {
        &self.targets
    }

    #[must_use]
    pub fn query_identifier(&self, index: u32) -> Option<&str> {
        self.queries.identifier(index)
    }

    #[must_use]
    pub fn query_index(&self, name: &str) -> Option<u32> {
        self.queries.index_of(name)
    }

    #[must_use]
    pub fn target_identifier(&self, index: u32) -> Option<&str> {
        self.targets.identifier(index)
    }

    #[must_use]
    pub fn target_index(&self, name: &str) -> Option<u32> {
        self.targets.index_of(name)
    }

    #[must_use]
    pub fn query_length(&self, index: u32) -> Option<u32> {
        self.header.query_lengths.length_of(index)
    }

    #[must_use]
    pub fn target_length(&self, index: u32) -> Option<u32> {
        self.header
            .target_lengths
            .as_ref()?
            .get(index as usize)
            .copied()
    }

    #[must_use]
    pub fn has_constant_query_length(&self) -> bool {
        self.header.query_lengths.is_constant()
    }

    /// Returns the next entry, or `None` when the collection (or split) is exhausted
    pub fn next_entry(&mut self) -> Result<Option<AlignmentEntry>> {
        self.entries.next_entry()
    }
}

impl<R: Read> Iterator for AlignmentReader<R> {
    type Item = Result<AlignmentEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        self.entries.next()
    }
}
