use std::io::{Read, Write};

use bytemuck::{Pod, Zeroable};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use flate2::{read::GzDecoder, write::GzEncoder, Compression};

use super::identifiers::IdentifierTable;
use crate::error::{HeaderError, Result};
use crate::{HEADER_MAGIC, HEADER_VERSION};

/// Query lengths are stored in the header
pub const PRESENCE_QUERY_LENGTHS: u8 = 1 << 0;

/// Target lengths are stored in the header
pub const PRESENCE_TARGET_LENGTHS: u8 = 1 << 1;

/// Serialized tag of a constant query length
const LENGTH_CONSTANT: u8 = 0;

/// Serialized tag of per-query lengths
const LENGTH_PER_QUERY: u8 = 1;

/// Size of the serialized [`HeaderPreamble`]
pub const PREAMBLE_SIZE: usize = 48;

/// Fixed size part of the serialized header
#[derive(Clone, Copy, Debug, PartialEq, Eq, Zeroable, Pod)]
#[repr(C)]
pub struct HeaderPreamble {
    // Type metadata (16 bytes)
    /// Header magic number
    magic: [u8; 8],
    /// Format version number
    pub version: u8,
    /// Bitfield of optional sections present after the identifier mappings
    pub presence_flags: u8,
    reserved: [u8; 6],

    // Index bounds (16 bytes)
    pub number_of_queries: u32,
    pub number_of_targets: u32,
    pub smallest_split_query_index: u32,
    pub largest_split_query_index: u32,

    // Totals (16 bytes)
    pub number_of_aligned_reads: u64,
    reserved_tail: [u8; 8],
}
impl Default for HeaderPreamble {
    fn default() -> Self {
        Self {
            magic: *HEADER_MAGIC,
            version: HEADER_VERSION,
            presence_flags: 0,
            reserved: [0; 6],
            number_of_queries: 0,
            number_of_targets: 0,
            smallest_split_query_index: 0,
            largest_split_query_index: 0,
            number_of_aligned_reads: 0,
            reserved_tail: [0; 8],
        }
    }
}
impl HeaderPreamble {
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(self)
    }

    pub fn from_bytes(bytes: &[u8; PREAMBLE_SIZE]) -> Result<Self> {
        let preamble: Self = bytemuck::pod_read_unaligned(bytes);
        if preamble.magic != *HEADER_MAGIC {
            return Err(HeaderError::InvalidMagic(preamble.magic).into());
        }
        if preamble.version != HEADER_VERSION {
            return Err(HeaderError::InvalidFormatVersion(preamble.version).into());
        }
        Ok(preamble)
    }
}

/// Lengths of the query sequences
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum QueryLengths {
    #[default]
    Absent,
    /// Every query has the same length
    Constant(u32),
    /// One length per query starting at `first_index`
    PerQuery { first_index: u32, lengths: Vec<u32> },
}
impl QueryLengths {
    /// Compacts per-query lengths, keeping the slice `[first_index, last_index]`.
    ///
    /// Lengths of zero mark unknown queries and are ignored when looking for a constant.
    #[must_use]
    pub fn compact(lengths: &[u32], first_index: u32, last_index: u32) -> Self {
        let mut known = lengths.iter().copied().filter(|&l| l != 0);
        if let Some(first) = known.next() {
            if known.all(|l| l == first) {
                return Self::Constant(first);
            }
        } else {
            return Self::Absent;
        }
        let start = (first_index as usize).min(lengths.len());
        let stop = (last_index as usize + 1).clamp(start, lengths.len());
        Self::PerQuery {
            first_index: start as u32,
            lengths: lengths[start..stop].to_vec(),
        }
    }

    /// Length of the query at `index`, if known
    #[must_use]
    pub fn length_of(&self, index: u32) -> Option<u32> {
        match self {
            Self::Absent => None,
            Self::Constant(length) => Some(*length),
            Self::PerQuery {
                first_index,
                lengths,
            } => lengths
                .get(index.checked_sub(*first_index)? as usize)
                .copied(),
        }
    }

    #[must_use]
    pub fn is_constant(&self) -> bool {
        matches!(self, Self::Constant(_))
    }
}

/// Description of an alignment collection, stored next to its entries
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AlignmentHeader {
    pub number_of_queries: u32,
    pub number_of_targets: u32,
    pub smallest_split_query_index: u32,
    pub largest_split_query_index: u32,
    pub number_of_aligned_reads: u64,
    pub query_identifiers: IdentifierTable,
    pub target_identifiers: IdentifierTable,
    pub query_lengths: QueryLengths,
    pub target_lengths: Option<Vec<u32>>,
}
impl AlignmentHeader {
    fn preamble(&self) -> HeaderPreamble {
        let mut presence_flags = 0;
        if self.query_lengths != QueryLengths::Absent {
            presence_flags |= PRESENCE_QUERY_LENGTHS;
        }
        if self.target_lengths.is_some() {
            presence_flags |= PRESENCE_TARGET_LENGTHS;
        }
        HeaderPreamble {
            presence_flags,
            number_of_queries: self.number_of_queries,
            number_of_targets: self.number_of_targets,
            smallest_split_query_index: self.smallest_split_query_index,
            largest_split_query_index: self.largest_split_query_index,
            number_of_aligned_reads: self.number_of_aligned_reads,
            ..Default::default()
        }
    }

    /// Serializes the uncompressed header
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_all(self.preamble().as_bytes())?;
        self.query_identifiers.write_to(writer)?;
        self.target_identifiers.write_to(writer)?;
        match &self.query_lengths {
            QueryLengths::Absent => {}
            QueryLengths::Constant(length) => {
                writer.write_u8(LENGTH_CONSTANT)?;
                writer.write_u32::<LittleEndian>(*length)?;
            }
            QueryLengths::PerQuery {
                first_index,
                lengths,
            } => {
                writer.write_u8(LENGTH_PER_QUERY)?;
                writer.write_u32::<LittleEndian>(*first_index)?;
                write_lengths(writer, lengths)?;
            }
        }
        if let Some(lengths) = &self.target_lengths {
            write_lengths(writer, lengths)?;
        }
        Ok(())
    }

    /// Deserializes an uncompressed header
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        let mut buf = [0u8; PREAMBLE_SIZE];
        reader.read_exact(&mut buf)?;
        let preamble = HeaderPreamble::from_bytes(&buf)?;

        let query_identifiers = IdentifierTable::read_from(reader, preamble.number_of_queries)?;
        let target_identifiers = IdentifierTable::read_from(reader, preamble.number_of_targets)?;

        let query_lengths = if preamble.presence_flags & PRESENCE_QUERY_LENGTHS == 0 {
            QueryLengths::Absent
        } else {
            match reader.read_u8()? {
                LENGTH_CONSTANT => QueryLengths::Constant(reader.read_u32::<LittleEndian>()?),
                LENGTH_PER_QUERY => QueryLengths::PerQuery {
                    first_index: reader.read_u32::<LittleEndian>()?,
                    lengths: read_lengths(reader)?,
                },
                tag => return Err(HeaderError::InvalidLengthTag(tag).into()),
            }
        };
        let target_lengths = if preamble.presence_flags & PRESENCE_TARGET_LENGTHS == 0 {
            None
        } else {
            Some(read_lengths(reader)?)
        };

        Ok(Self {
            number_of_queries: preamble.number_of_queries,
            number_of_targets: preamble.number_of_targets,
            smallest_split_query_index: preamble.smallest_split_query_index,
            largest_split_query_index: preamble.largest_split_query_index,
            number_of_aligned_reads: preamble.number_of_aligned_reads,
            query_identifiers,
            target_identifiers,
            query_lengths,
            target_lengths,
        })
    }

    /// Writes the gzip-compressed header and returns the underlying writer
    pub fn write_compressed<W: Write>(&self, inner: W, level: u32) -> Result<W> {
        let mut encoder = GzEncoder::new(inner, Compression::new(level));
        self.write_to(&mut encoder)?;
        Ok(encoder.finish()?)
    }

    /// Reads a gzip-compressed header
    pub fn read_compressed<R: Read>(inner: R) -> Result<Self> {
        let mut decoder = GzDecoder::new(inner);
        Self::read_from(&mut decoder)
    }
}

fn write_lengths<W: Write>(writer: &mut W, lengths: &[u32]) -> Result<()> {
    writer.write_u32::<LittleEndian>(lengths.len() as u32)?;
    for &length in lengths {
        writer.write_u32::<LittleEndian>(length)?;
    }
    Ok(())
}

fn read_lengths<R: Read>(reader: &mut R) -> Result<Vec<u32>> {
    let n = reader.read_u32::<LittleEndian>()?;
    (0..n)
        .map(|_| Ok(reader.read_u32::<LittleEndian>()?))
        .collect()
}

#[cfg(test)]
mod testing {
    use std::io::Cursor;

    use super::*;
    use crate::error::Error;

    fn sample() -> AlignmentHeader {
        let mut query_identifiers = IdentifierTable::default();
        query_identifiers.register("read-1");
        query_identifiers.register("read-2");
        AlignmentHeader {
            number_of_queries: 2,
            number_of_targets: 3,
            smallest_split_query_index: 0,
            largest_split_query_index: 1,
            number_of_aligned_reads: 17,
            query_identifiers,
            target_identifiers: IdentifierTable::Array(vec![
                "chr1".into(),
                "chr2".into(),
                "chr3".into(),
            ]),
            query_lengths: QueryLengths::PerQuery {
                first_index: 0,
                lengths: vec![35, 36],
            },
            target_lengths: Some(vec![1000, 2000, 3000]),
        }
    }

    #[test]
    fn test_preamble_size() {
        assert_eq!(std::mem::size_of::<HeaderPreamble>(), PREAMBLE_SIZE);
    }

    #[test]
    fn test_header_roundtrip() -> Result<()> {
        let header = sample();
        let bytes = header.write_compressed(Vec::new(), 6)?;
        assert_eq!(&bytes[..2], &crate::chunks::GZIP_MAGIC);
        let decoded = AlignmentHeader::read_compressed(Cursor::new(bytes))?;
        assert_eq!(decoded, header);
        Ok(())
    }

    #[test]
    fn test_optional_sections() -> Result<()> {
        let header = AlignmentHeader {
            query_lengths: QueryLengths::Constant(100),
            target_lengths: None,
            ..sample()
        };
        let mut buf = Vec::new();
        header.write_to(&mut buf)?;
        assert_eq!(buf[9], PRESENCE_QUERY_LENGTHS);
        let decoded = AlignmentHeader::read_from(&mut Cursor::new(buf))?;
        assert_eq!(decoded.query_lengths.length_of(12345), Some(100));
        assert_eq!(decoded.target_lengths, None);
        Ok(())
    }

    #[test]
    fn test_invalid_magic() -> Result<()> {
        let mut buf = Vec::new();
        sample().write_to(&mut buf)?;
        buf[0] = b'X';
        let err = AlignmentHeader::read_from(&mut Cursor::new(buf)).unwrap_err();
        assert!(matches!(err, Error::HeaderError(HeaderError::InvalidMagic(_))));
        Ok(())
    }

    #[test]
    fn test_invalid_version() -> Result<()> {
        let mut buf = Vec::new();
        sample().write_to(&mut buf)?;
        buf[8] = HEADER_VERSION + 1;
        let err = AlignmentHeader::read_from(&mut Cursor::new(buf)).unwrap_err();
        assert!(matches!(
            err,
            Error::HeaderError(HeaderError::InvalidFormatVersion(_))
        ));
        Ok(())
    }

    #[test]
    fn test_identifier_index_beyond_header_counts() -> Result<()> {
        let mut query_identifiers = IdentifierTable::default();
        query_identifiers.register("read-1");
        let header = AlignmentHeader {
            number_of_queries: 1,
            query_identifiers,
            ..Default::default()
        };
        let mut buf = Vec::new();
        header.write_to(&mut buf)?;

        // corrupt the index of the only query name
        let index_at = buf.len() - 5 - 4;
        buf[index_at..index_at + 4].copy_from_slice(&u32::MAX.to_le_bytes());
        let err = AlignmentHeader::read_from(&mut Cursor::new(buf)).unwrap_err();
        assert!(matches!(
            err,
            Error::HeaderError(HeaderError::IdentifierIndexOutOfBounds {
                index: u32::MAX,
                bound: 1
            })
        ));
        Ok(())
    }

    #[test]
    fn test_truncated_lengths() -> Result<()> {
        let header = AlignmentHeader {
            target_lengths: Some(vec![10, 20]),
            ..Default::default()
        };
        let mut buf = Vec::new();
        header.write_to(&mut buf)?;
        let n_at = buf.len() - 12;
        buf[n_at..n_at + 4].copy_from_slice(&u32::MAX.to_le_bytes());
        let err = AlignmentHeader::read_from(&mut Cursor::new(buf)).unwrap_err();
        assert!(matches!(err, Error::IoError(_)));
        Ok(())
    }

    #[test]
    fn test_compact_constant() {
        let lengths = QueryLengths::compact(&[0, 50, 50, 0, 50], 0, 4);
        assert_eq!(lengths, QueryLengths::Constant(50));
        assert!(lengths.is_constant());
        assert_eq!(QueryLengths::compact(&[0, 0], 0, 1), QueryLengths::Absent);
        assert_eq!(QueryLengths::compact(&[], 0, 0), QueryLengths::Absent);
    }

    #[test]
    fn test_compact_slice() {
        let lengths = QueryLengths::compact(&[10, 20, 30, 40, 50], 1, 3);
        assert_eq!(
            lengths,
            QueryLengths::PerQuery {
                first_index: 1,
                lengths: vec![20, 30, 40]
            }
        );
        assert_eq!(lengths.length_of(0), None);
        assert_eq!(lengths.length_of(2), Some(30));
        assert_eq!(lengths.length_of(4), None);
    }
}
