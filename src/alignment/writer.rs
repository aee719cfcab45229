use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use tracing::{error, info};

use super::header::{AlignmentHeader, QueryLengths};
use super::identifiers::IdentifierTable;
use super::stats::{StatisticValue, Statistics};
use super::{entries_path, header_path, stats_path, AlignmentEntry};
use crate::chunks::{ChunkWriter, ChunkWriterBuilder, DEFAULT_COMPRESSION_LEVEL};
use crate::error::Result;

/// Comment line at the top of every stats sidecar
const STATS_COMMENT: &str = " Statistics for alignment.";

/// Whether a sidecar still has to be written
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SidecarState {
    NotWritten,
    Written,
}

/// Number of indices needed to cover `max_index`
fn index_bound(max_index: Option<u32>) -> u32 {
    max_index.map_or(0, |max| max.saturating_add(1))
}

/// A writer over the three files of an alignment collection, each buffered
pub type FileAlignmentWriter =
    AlignmentWriter<BufWriter<File>, BufWriter<File>, BufWriter<File>>;

/// Builder for creating configured [`AlignmentWriter`] instances
///
/// # Examples
///
/// ```rust,no_run
/// use seqstore::AlignmentWriterBuilder;
///
/// let mut writer = AlignmentWriterBuilder::default()
///     .entries_per_chunk(5000)
///     .multiplicity_threshold(100)
///     .create("sample")
///     .unwrap();
/// writer.close().unwrap();
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct AlignmentWriterBuilder {
    chunks: ChunkWriterBuilder,
    compression_level: Option<u32>,
}
impl AlignmentWriterBuilder {
    /// Sets the maximum number of entries per chunk of the entries file
    #[must_use]
    pub fn entries_per_chunk(mut self, entries_per_chunk: usize) -> Self {
        self.chunks = self.chunks.entries_per_chunk(entries_per_chunk);
        self
    }

    /// Keeps entries above this multiplicity in chunks of their own
    #[must_use]
    pub fn multiplicity_threshold(mut self, threshold: u32) -> Self {
        self.chunks = self.chunks.multiplicity_threshold(threshold);
        self
    }

    /// Sets the gzip compression level of the entries and header files
    #[must_use]
    pub fn compression_level(mut self, level: u32) -> Self {
        self.chunks = self.chunks.compression_level(level);
        self.compression_level = Some(level.min(9));
        self
    }

    /// Builds a writer over arbitrary sinks
    ///
    /// # Parameters
    ///
    /// * `basename` - Name recorded in the statistics
    /// * `entries` - Sink of the chunked entries container
    /// * `header` - Sink of the gzip-compressed header
    /// * `stats` - Sink of the statistics text
    pub fn build<W: Write, H: Write, S: Write>(
        self,
        basename: &str,
        entries: W,
        header: H,
        stats: S,
    ) -> AlignmentWriter<W, H, S> {
        AlignmentWriter {
            entries: self.chunks.build(entries),
            header_sink: header,
            header_state: SidecarState::NotWritten,
            stats_sink: stats,
            stats_state: SidecarState::NotWritten,
            stats_dirty: false,
            statistics: Statistics::default(),
            basename: basename.to_string(),
            compression_level: self.compression_level.unwrap_or(DEFAULT_COMPRESSION_LEVEL),
            query_identifiers: IdentifierTable::default(),
            target_identifiers: IdentifierTable::default(),
            min_query_index: None,
            max_query_index: None,
            max_target_index: None,
            num_queries: None,
            query_lengths: None,
            target_lengths: None,
            number_of_aligned_reads: 0,
        }
    }

    /// Creates `<basename>.entries`, `<basename>.header` and `<basename>.stats`
    pub fn create(self, basename: &str) -> Result<FileAlignmentWriter> {
        let entries = BufWriter::new(File::create(entries_path(basename))?);
        let header = BufWriter::new(File::create(header_path(basename))?);
        let stats = BufWriter::new(File::create(stats_path(basename))?);
        Ok(self.build(basename, entries, header, stats))
    }
}

/// Writes an alignment collection: chunked entries plus header and statistics sidecars
///
/// The writer keeps track of the query and target index bounds of the appended entries and
/// of the identifier names registered for them. Everything but the entries is written once,
/// when the writer is closed.
///
/// ## Identifiers
///
/// Names can be registered one by one ([`register_query`](Self::register_query)), or
/// provided all at once as an array where the position of a name is its index
/// ([`set_query_identifiers_array`](Self::set_query_identifiers_array)). The array form is
/// preferred when all names are known up front.
///
/// ## Closing
///
/// [`close`](Self::close) writes the header, the statistics (only if any statistic was
/// recorded), and terminates the entries container. Calling it more than once has no further
/// effect. Dropping an unclosed writer closes it and logs any error.
///
/// ```rust,no_run
/// use seqstore::{AlignmentEntry, AlignmentWriter};
///
/// let mut writer = AlignmentWriter::create("sample").unwrap();
/// let target = writer.register_target("chr1");
/// let query = writer.register_query("read-1");
/// writer
///     .append_entry(AlignmentEntry {
///         query_index: query,
///         target_index: target,
///         position: 1042,
///         multiplicity: 1,
///         ..Default::default()
///     })
///     .unwrap();
/// writer.put_statistic("aligner", "exact");
/// writer.close().unwrap();
/// ```
pub struct AlignmentWriter<W: Write, H: Write, S: Write> {
    /// Chunked container of the entries
    entries: ChunkWriter<W, AlignmentEntry>,

    header_sink: H,
    header_state: SidecarState,

    stats_sink: S,
    stats_state: SidecarState,
    /// Whether any statistic was recorded
    stats_dirty: bool,
    statistics: Statistics,

    basename: String,
    compression_level: u32,

    query_identifiers: IdentifierTable,
    target_identifiers: IdentifierTable,

    min_query_index: Option<u32>,
    max_query_index: Option<u32>,
    max_target_index: Option<u32>,
    /// Explicit number of queries, overriding the observed index bounds
    num_queries: Option<u32>,

    query_lengths: Option<Vec<u32>>,
    target_lengths: Option<Vec<u32>>,

    number_of_aligned_reads: u64,
}

impl FileAlignmentWriter {
    /// Creates a writer over `<basename>.entries`, `<basename>.header` and
    /// `<basename>.stats` with the default configuration
    pub fn create(basename: &str) -> Result<Self> {
        AlignmentWriterBuilder::default().create(basename)
    }
}

impl<W: Write, H: Write, S: Write> AlignmentWriter<W, H, S> {
    fn track_query_index(&mut self, index: u32) {
        self.min_query_index = Some(self.min_query_index.map_or(index, |m| m.min(index)));
        self.max_query_index = Some(self.max_query_index.map_or(index, |m| m.max(index)));
    }

    fn track_max_query_index(&mut self, index: u32) {
        self.max_query_index = Some(self.max_query_index.map_or(index, |m| m.max(index)));
    }

    fn track_target_index(&mut self, index: u32) {
        self.max_target_index = Some(self.max_target_index.map_or(index, |m| m.max(index)));
    }

    /// Appends an entry to the collection
    pub fn append_entry(&mut self, entry: AlignmentEntry) -> Result<()> {
        self.entries.append(entry)?;
        self.track_query_index(entry.query_index);
        self.track_target_index(entry.target_index);
        self.number_of_aligned_reads += 1;
        Ok(())
    }

    /// Appends a copy of `entry` aligned against `target_index`
    pub fn append_entry_with_target(
        &mut self,
        entry: &AlignmentEntry,
        target_index: u32,
    ) -> Result<()> {
        self.append_entry(entry.with_target_index(target_index))
    }

    /// Returns the index of a query name, registering it on first use
    pub fn register_query(&mut self, name: &str) -> u32 {
        let index = self.query_identifiers.register(name);
        self.track_max_query_index(index);
        index
    }

    /// Returns the index of a target name, registering it on first use
    pub fn register_target(&mut self, name: &str) -> u32 {
        let index = self.target_identifiers.register(name);
        self.track_target_index(index);
        index
    }

    /// Provides all query names, where the position of a name is its index
    pub fn set_query_identifiers_array(&mut self, names: Vec<String>) {
        self.max_query_index = names.len().checked_sub(1).map(|i| i as u32);
        self.query_identifiers = IdentifierTable::Array(names);
    }

    /// Provides all target names, where the position of a name is its index
    pub fn set_target_identifiers_array(&mut self, names: Vec<String>) {
        self.max_target_index = names.len().checked_sub(1).map(|i| i as u32);
        self.target_identifiers = IdentifierTable::Array(names);
    }

    /// Sets the total number of queries
    pub fn set_num_queries(&mut self, num_queries: u32) {
        self.num_queries = Some(num_queries);
        self.max_query_index = num_queries.checked_sub(1);
    }

    /// Sets the total number of targets
    pub fn set_num_targets(&mut self, num_targets: u32) {
        self.max_target_index = num_targets.checked_sub(1);
    }

    /// Overrides the smallest query index of this split of the alignment
    pub fn set_smallest_split_query_index(&mut self, index: u32) {
        self.min_query_index = Some(index);
    }

    /// Overrides the largest query index of this split of the alignment
    pub fn set_largest_split_query_index(&mut self, index: u32) {
        self.max_query_index = Some(index);
    }

    /// Provides the length of every query, indexed by query index.
    ///
    /// Identical lengths are stored as a single constant.
    pub fn set_query_lengths(&mut self, lengths: Vec<u32>) {
        self.query_lengths = Some(lengths);
    }

    /// Provides the length of every target, indexed by target index
    pub fn set_target_lengths(&mut self, lengths: Vec<u32>) {
        self.target_lengths = Some(lengths);
    }

    /// Records a statistic, written to the stats sidecar at close
    pub fn put_statistic<V: StatisticValue>(&mut self, key: &str, value: V) {
        self.statistics.put(key, value);
        self.stats_dirty = true;
    }

    /// Number of queries stored in the header.
    ///
    /// This is the explicit value given to [`set_num_queries`](Self::set_num_queries), or the
    /// largest query index plus one. A split that starts past query 0 still reports the full
    /// index range, so readers can size per-query tables from it.
    ///
    /// Never less than the number of registered query names.
    #[must_use]
    pub fn num_queries(&self) -> u32 {
        let declared = self
            .num_queries
            .unwrap_or_else(|| index_bound(self.max_query_index));
        declared.max(index_bound(self.query_identifiers.max_index()))
    }

    /// Number of targets stored in the header, never less than the number of registered
    /// target names
    #[must_use]
    pub fn num_targets(&self) -> u32 {
        index_bound(self.max_target_index).max(index_bound(self.target_identifiers.max_index()))
    }

    /// Number of entries appended so far
    #[must_use]
    pub fn number_of_aligned_reads(&self) -> u64 {
        self.number_of_aligned_reads
    }

    /// Number of reads appended so far, each entry counting for its multiplicity
    #[must_use]
    pub fn total_entries_written(&self) -> u64 {
        self.entries.total_entries_written()
    }

    fn compacted_query_lengths(&self) -> QueryLengths {
        let Some(lengths) = &self.query_lengths else {
            return QueryLengths::Absent;
        };
        let min = self.min_query_index.unwrap_or(0);
        let max = self.max_query_index.unwrap_or(0);
        match self.num_queries {
            Some(n) if max >= min && max - min + 1 != n => QueryLengths::compact(lengths, min, max),
            _ => QueryLengths::compact(lengths, 0, lengths.len().saturating_sub(1) as u32),
        }
    }

    fn build_header(&self) -> AlignmentHeader {
        AlignmentHeader {
            number_of_queries: self.num_queries(),
            number_of_targets: self.num_targets(),
            smallest_split_query_index: self.min_query_index.unwrap_or(0),
            largest_split_query_index: self.max_query_index.unwrap_or(0),
            number_of_aligned_reads: self.number_of_aligned_reads,
            query_identifiers: self.query_identifiers.clone(),
            target_identifiers: self.target_identifiers.clone(),
            query_lengths: self.compacted_query_lengths(),
            target_lengths: self.target_lengths.clone(),
        }
    }

    fn write_header(&mut self) -> Result<()> {
        if self.header_state == SidecarState::Written {
            return Ok(());
        }
        let header = self.build_header();
        header.write_compressed(&mut self.header_sink, self.compression_level)?;
        self.header_sink.flush()?;
        self.header_state = SidecarState::Written;
        Ok(())
    }

    fn write_stats(&mut self) -> Result<()> {
        if self.stats_state == SidecarState::Written || !self.stats_dirty {
            return Ok(());
        }
        let short_name = Path::new(&self.basename)
            .file_name()
            .map_or_else(|| self.basename.clone(), |n| n.to_string_lossy().into_owned());
        let num_queries = u64::from(self.num_queries());
        self.statistics.put("basename", short_name);
        self.statistics.put("basename.full", self.basename.clone());
        self.statistics
            .put("min.query.index", self.min_query_index.unwrap_or(0));
        self.statistics
            .put("max.query.index", self.max_query_index.unwrap_or(0));
        self.statistics.put("number.of.queries", num_queries);
        self.statistics
            .put("number.aligned.reads", self.number_of_aligned_reads);

        self.statistics
            .write_to(&mut self.stats_sink, STATS_COMMENT)?;
        self.stats_state = SidecarState::Written;
        Ok(())
    }

    /// Writes the header and statistics sidecars and terminates the entries container.
    ///
    /// Each sidecar is written at most once, so calling this again is a no-op. A failed close
    /// leaves the collection in an indeterminate state.
    pub fn close(&mut self) -> Result<()> {
        let first_close = self.header_state == SidecarState::NotWritten;
        self.write_header()?;
        self.write_stats()?;
        self.entries.finish()?;
        if first_close {
            info!(
                basename = %self.basename,
                entries = self.number_of_aligned_reads,
                reads = self.entries.total_entries_written(),
                bytes = self.entries.total_bytes_written(),
                chunks = self.entries.chunks_written(),
                "alignment closed"
            );
        }
        Ok(())
    }
}

impl<W: Write, H: Write, S: Write> Drop for AlignmentWriter<W, H, S> {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            error!(basename = %self.basename, "failed to close alignment: {e}");
        }
    }
}

#[cfg(test)]
mod testing {
    use std::io::Cursor;

    use super::*;
    use crate::chunks::ChunkReader;

    struct Sinks {
        entries: Vec<u8>,
        header: Vec<u8>,
        stats: Vec<u8>,
    }
    impl Sinks {
        fn new() -> Self {
            Self {
                entries: Vec::new(),
                header: Vec::new(),
                stats: Vec::new(),
            }
        }

        fn writer(&mut self) -> AlignmentWriter<&mut Vec<u8>, &mut Vec<u8>, &mut Vec<u8>> {
            AlignmentWriterBuilder::default().build(
                "/data/run/sample",
                &mut self.entries,
                &mut self.header,
                &mut self.stats,
            )
        }

        fn header(&self) -> Result<AlignmentHeader> {
            AlignmentHeader::read_compressed(Cursor::new(&self.header))
        }

        fn stats(&self) -> Result<Statistics> {
            Statistics::read_from(Cursor::new(&self.stats))
        }
    }

    fn entry(query_index: u32, target_index: u32, multiplicity: u32) -> AlignmentEntry {
        AlignmentEntry {
            query_index,
            target_index,
            multiplicity,
            ..Default::default()
        }
    }

    #[test]
    fn test_header_bounds() -> Result<()> {
        let mut sinks = Sinks::new();
        {
            let mut writer = sinks.writer();
            writer.append_entry(entry(5, 0, 1))?;
            writer.append_entry(entry(2, 7, 3))?;
            writer.append_entry(entry(9, 1, 1))?;
            assert_eq!(writer.num_queries(), 10);
            assert_eq!(writer.num_targets(), 8);
            assert_eq!(writer.total_entries_written(), 5);
            writer.close()?;
        }
        let header = sinks.header()?;
        assert_eq!(header.smallest_split_query_index, 2);
        assert_eq!(header.largest_split_query_index, 9);
        assert_eq!(header.number_of_queries, 10);
        assert_eq!(header.number_of_targets, 8);
        assert_eq!(header.number_of_aligned_reads, 3);
        Ok(())
    }

    #[test]
    fn test_entries_roundtrip() -> Result<()> {
        let mut sinks = Sinks::new();
        let entries: Vec<_> = (0..25).map(|i| entry(i, i % 4, 1)).collect();
        {
            let mut writer = sinks.writer();
            for e in &entries {
                writer.append_entry(*e)?;
            }
            writer.append_entry_with_target(&entry(30, 0, 1), 11)?;
            writer.close()?;
        }
        let reader = ChunkReader::<_, AlignmentEntry>::new(Cursor::new(&sinks.entries));
        let decoded = reader.collect::<Result<Vec<_>>>()?;
        assert_eq!(&decoded[..25], &entries[..]);
        assert_eq!(decoded[25].target_index, 11);
        assert_eq!(sinks.header()?.number_of_targets, 12);
        Ok(())
    }

    #[test]
    fn test_identifier_table_mode() -> Result<()> {
        let mut sinks = Sinks::new();
        {
            let mut writer = sinks.writer();
            assert_eq!(writer.register_query("q0"), 0);
            assert_eq!(writer.register_query("q1"), 1);
            assert_eq!(writer.register_query("q0"), 0);
            assert_eq!(writer.register_target("chr1"), 0);
            writer.close()?;
        }
        let header = sinks.header()?;
        let queries = header.query_identifiers.to_mapping();
        assert_eq!(queries.identifier(1), Some("q1"));
        assert_eq!(queries.index_of("q0"), Some(0));
        assert_eq!(queries.identifier(2), None);
        assert_eq!(header.number_of_queries, 2);
        assert_eq!(header.number_of_targets, 1);
        Ok(())
    }

    #[test]
    fn test_identifier_array_mode() -> Result<()> {
        let names: Vec<String> = (0..100).map(|i| format!("read-{i}")).collect();
        let mut sinks = Sinks::new();
        {
            let mut writer = sinks.writer();
            writer.set_query_identifiers_array(names.clone());
            writer.set_target_identifiers_array(vec!["chrA".into(), "chrB".into()]);
            writer.close()?;
        }
        let header = sinks.header()?;
        assert!(matches!(header.query_identifiers, IdentifierTable::Array(_)));
        let queries = header.query_identifiers.to_mapping();
        for (i, name) in names.iter().enumerate() {
            assert_eq!(queries.identifier(i as u32), Some(name.as_str()));
        }
        assert_eq!(queries.identifier(100), None);
        assert_eq!(header.number_of_queries, 100);
        assert_eq!(header.number_of_targets, 2);
        Ok(())
    }

    #[test]
    fn test_split_keeps_full_query_range() -> Result<()> {
        let names: Vec<String> = (0..100).map(|i| format!("read-{i}")).collect();
        let mut sinks = Sinks::new();
        {
            let mut writer = sinks.writer();
            writer.set_query_identifiers_array(names);
            for i in 50..60 {
                writer.append_entry(entry(i, 0, 1))?;
            }
            assert_eq!(writer.num_queries(), 100);
            writer.close()?;
        }
        let header = sinks.header()?;
        assert_eq!(header.number_of_queries, 100);
        assert_eq!(header.smallest_split_query_index, 50);
        assert_eq!(header.largest_split_query_index, 99);
        assert_eq!(header.number_of_aligned_reads, 10);
        Ok(())
    }

    #[test]
    fn test_counts_cover_registered_names() -> Result<()> {
        let mut sinks = Sinks::new();
        {
            let mut writer = sinks.writer();
            for name in ["q0", "q1", "q2", "q3"] {
                writer.register_query(name);
            }
            writer.register_target("chr1");
            writer.register_target("chr2");
            writer.set_num_queries(2);
            writer.set_num_targets(1);
            writer.close()?;
        }
        let header = sinks.header()?;
        assert_eq!(header.number_of_queries, 4);
        assert_eq!(header.number_of_targets, 2);
        assert_eq!(header.query_identifiers.to_mapping().identifier(3), Some("q3"));
        Ok(())
    }

    #[test]
    fn test_append_after_close() -> Result<()> {
        let mut sinks = Sinks::new();
        {
            let mut writer = sinks.writer();
            writer.append_entry(entry(0, 0, 1))?;
            writer.close()?;
            assert!(writer.append_entry(entry(1, 0, 1)).is_err());
            assert_eq!(writer.number_of_aligned_reads(), 1);
            assert_eq!(writer.num_queries(), 1);
        }
        let reader = ChunkReader::<_, AlignmentEntry>::new(Cursor::new(&sinks.entries));
        assert_eq!(reader.collect::<Result<Vec<_>>>()?.len(), 1);
        Ok(())
    }

    #[test]
    fn test_close_is_idempotent() -> Result<()> {
        fn fill<W: Write, H: Write, S: Write>(writer: &mut AlignmentWriter<W, H, S>) -> Result<()> {
            writer.append_entry(entry(0, 0, 1))?;
            writer.append_entry(entry(1, 2, 4))?;
            writer.put_statistic("aligner", "exact");
            Ok(())
        }

        let mut once = Sinks::new();
        {
            let mut writer = once.writer();
            fill(&mut writer)?;
            writer.close()?;
        }
        let mut repeated = Sinks::new();
        {
            let mut writer = repeated.writer();
            fill(&mut writer)?;
            writer.close()?;
            writer.close()?;
            writer.close()?;
        }
        assert_eq!(once.header, repeated.header);
        assert_eq!(once.stats, repeated.stats);
        assert_eq!(once.entries, repeated.entries);
        Ok(())
    }

    #[test]
    fn test_stats_only_when_dirty() -> Result<()> {
        let mut sinks = Sinks::new();
        sinks.writer().close()?;
        assert!(sinks.stats.is_empty());
        assert!(!sinks.header.is_empty());
        Ok(())
    }

    #[test]
    fn test_stats_content() -> Result<()> {
        let mut sinks = Sinks::new();
        {
            let mut writer = sinks.writer();
            writer.append_entry(entry(3, 0, 1))?;
            writer.append_entry(entry(4, 0, 2))?;
            writer.put_statistic("aligner", "exact");
            writer.put_statistic("score.mean", 12.345_f64);
            writer.put_statistic("mismatches", -1i64);
            writer.close()?;
        }
        let text = String::from_utf8(sinks.stats.clone())?;
        assert!(text.starts_with('#'));

        let stats = sinks.stats()?;
        assert_eq!(stats.get("basename"), Some("sample"));
        assert_eq!(stats.get("basename.full"), Some("/data/run/sample"));
        assert_eq!(stats.get("min.query.index"), Some("3"));
        assert_eq!(stats.get("max.query.index"), Some("4"));
        assert_eq!(stats.get("number.of.queries"), Some("5"));
        assert_eq!(stats.get("number.aligned.reads"), Some("2"));
        assert_eq!(stats.get("score.mean"), Some("12.3"));
        assert_eq!(stats.get("mismatches"), Some("-1"));
        Ok(())
    }

    #[test]
    fn test_constant_query_length() -> Result<()> {
        let mut sinks = Sinks::new();
        {
            let mut writer = sinks.writer();
            writer.set_query_lengths(vec![36; 50]);
            writer.close()?;
        }
        assert_eq!(sinks.header()?.query_lengths, QueryLengths::Constant(36));
        Ok(())
    }

    #[test]
    fn test_query_lengths_sliced_to_split() -> Result<()> {
        let mut sinks = Sinks::new();
        {
            let mut writer = sinks.writer();
            writer.set_num_queries(10);
            writer.set_smallest_split_query_index(4);
            writer.set_largest_split_query_index(6);
            writer.set_query_lengths((0..10).map(|i| 30 + i).collect());
            writer.set_target_lengths(vec![500, 600]);
            writer.close()?;
        }
        let header = sinks.header()?;
        assert_eq!(
            header.query_lengths,
            QueryLengths::PerQuery {
                first_index: 4,
                lengths: vec![34, 35, 36]
            }
        );
        assert_eq!(header.query_lengths.length_of(5), Some(35));
        assert_eq!(header.target_lengths, Some(vec![500, 600]));
        assert_eq!(header.number_of_queries, 10);
        Ok(())
    }

    #[test]
    fn test_create_files() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let basename = dir.path().join("sample");
        let basename = basename.to_string_lossy();
        {
            let mut writer = AlignmentWriter::create(&basename)?;
            writer.append_entry(entry(0, 0, 1))?;
            writer.close()?;
        }
        assert!(Path::new(&entries_path(&basename)).exists());
        assert!(Path::new(&header_path(&basename)).exists());
        assert!(Path::new(&stats_path(&basename)).exists());
        Ok(())
    }
}
