//! Alignment collections
//!
//! An alignment collection named `<basename>` is stored in three files:
//!
//! * `<basename>.entries` - the [`AlignmentEntry`] records in a chunked container
//!   (see [`crate::chunks`]), which can be read in parallel splits
//! * `<basename>.header` - gzip-compressed [`AlignmentHeader`]: index bounds, identifier
//!   names and sequence lengths
//! * `<basename>.stats` - free-form `key=value` statistics

mod entry;
mod header;
mod identifiers;
mod reader;
mod stats;
mod writer;

pub use entry::{AlignmentEntry, ENTRY_SIZE, FLAG_REVERSE_STRAND};
pub use header::{AlignmentHeader, HeaderPreamble, QueryLengths, PREAMBLE_SIZE};
pub use identifiers::{IdentifierMapping, IdentifierTable};
pub use reader::{AlignmentReader, FileAlignmentReader};
pub use stats::{StatisticValue, Statistics};
pub use writer::{AlignmentWriter, AlignmentWriterBuilder, FileAlignmentWriter};

/// Extension of the entries file
pub const ENTRIES_EXTENSION: &str = "entries";

/// Extension of the header file
pub const HEADER_EXTENSION: &str = "header";

/// Extension of the statistics file
pub const STATS_EXTENSION: &str = "stats";

#[must_use]
pub fn entries_path(basename: &str) -> String {
    format!("{basename}.{ENTRIES_EXTENSION}")
}

#[must_use]
pub fn header_path(basename: &str) -> String {
    format!("{basename}.{HEADER_EXTENSION}")
}

#[must_use]
pub fn stats_path(basename: &str) -> String {
    format!("{basename}.{STATS_EXTENSION}")
}
