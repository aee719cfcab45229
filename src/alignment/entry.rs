use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};

use crate::chunks::ChunkEntry;
use crate::error::{ChunkError, Result};

/// Flag bit set when the query aligns to the reverse strand
pub const FLAG_REVERSE_STRAND: u8 = 1;

/// Serialized size of one entry inside a batch
pub const ENTRY_SIZE: usize = 41;

/// Size of the entry count preceding every batch
const BATCH_HEADER_SIZE: usize = 4;

/// One alignment of a query read against a target sequence
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct AlignmentEntry {
    pub query_index: u32,
    pub target_index: u32,
    /// Zero-based start of the alignment on the target
    pub position: u32,
    pub score: f32,
    pub flags: u8,
    /// Number of identical reads collapsed into this entry
    pub multiplicity: u32,
    pub query_position: u32,
    pub query_aligned_length: u32,
    pub target_aligned_length: u32,
    pub number_of_indels: u32,
    pub number_of_mismatches: u32,
}
impl AlignmentEntry {
    #[must_use]
    pub fn matching_reverse_strand(&self) -> bool {
        self.flags & FLAG_REVERSE_STRAND != 0
    }

    pub fn set_matching_reverse_strand(&mut self, reverse: bool) {
        if reverse {
            self.flags |= FLAG_REVERSE_STRAND;
        } else {
            self.flags &= !FLAG_REVERSE_STRAND;
        }
    }

    /// Returns a copy of this entry aligned against another target
    #[must_use]
    pub fn with_target_index(&self, target_index: u32) -> Self {
        Self {
            target_index,
            ..*self
        }
    }

    fn write_to(&self, dst: &mut Vec<u8>) {
        // Writing into a Vec cannot fail
        let _ = dst.write_u32::<LittleEndian>(self.query_index);
        let _ = dst.write_u32::<LittleEndian>(self.target_index);
        let _ = dst.write_u32::<LittleEndian>(self.position);
        let _ = dst.write_f32::<LittleEndian>(self.score);
        dst.push(self.flags);
        let _ = dst.write_u32::<LittleEndian>(self.multiplicity);
        let _ = dst.write_u32::<LittleEndian>(self.query_position);
        let _ = dst.write_u32::<LittleEndian>(self.query_aligned_length);
        let _ = dst.write_u32::<LittleEndian>(self.target_aligned_length);
        let _ = dst.write_u32::<LittleEndian>(self.number_of_indels);
        let _ = dst.write_u32::<LittleEndian>(self.number_of_mismatches);
    }

    fn read_from(buf: &[u8]) -> Self {
        let u32_at = |offset: usize| LittleEndian::read_u32(&buf[offset..offset + 4]);
        Self {
            query_index: u32_at(0),
            target_index: u32_at(4),
            position: u32_at(8),
            score: LittleEndian::read_f32(&buf[12..16]),
            flags: buf[16],
            multiplicity: u32_at(17),
            query_position: u32_at(21),
            query_aligned_length: u32_at(25),
            target_aligned_length: u32_at(29),
            number_of_indels: u32_at(33),
            number_of_mismatches: u32_at(37),
        }
    }
}

impl ChunkEntry for AlignmentEntry {
    fn multiplicity(&self) -> u32 {
        self.multiplicity
    }

    fn encode_batch(entries: &[Self], dst: &mut Vec<u8>) {
        dst.reserve(BATCH_HEADER_SIZE + entries.len() * ENTRY_SIZE);
        let _ = dst.write_u32::<LittleEndian>(entries.len() as u32);
        for entry in entries {
            entry.write_to(dst);
        }
    }

    fn decode_batch(src: &[u8], dst: &mut Vec<Self>) -> Result<()> {
        if src.len() < BATCH_HEADER_SIZE {
            return Err(ChunkError::MalformedBatch {
                expected: BATCH_HEADER_SIZE,
                found: src.len(),
            }
            .into());
        }
        let n_entries = LittleEndian::read_u32(&src[..BATCH_HEADER_SIZE]) as usize;
        let expected = BATCH_HEADER_SIZE + n_entries * ENTRY_SIZE;
        if src.len() != expected {
            return Err(ChunkError::MalformedBatch {
                expected,
                found: src.len(),
            }
            .into());
        }
        dst.reserve(n_entries);
        dst.extend(
            src[BATCH_HEADER_SIZE..]
                .chunks_exact(ENTRY_SIZE)
                .map(Self::read_from),
        );
        Ok(())
    }
}
