use std::io::{self, Read, Seek, SeekFrom};

use byteorder::{BigEndian, ReadBytesExt};
use flate2::read::GzDecoder;
use memchr::memchr;
use tracing::{debug, warn};

use super::{ChunkEntry, CHUNK_HEADER_SIZE, DELIMITER_CONTENT, DELIMITER_LENGTH, GZIP_MAGIC};
use crate::error::{ChunkError, Result};

/// Size of the buffer used when scanning for a chunk boundary
const SCAN_BUFFER_SIZE: usize = 64 * 1024;

/// Reads bytes until `buf` is full or the stream ends, returning the number of bytes read
fn read_fully<R: Read>(inner: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match inner.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Checks that a candidate delimiter at `offset` is followed by either the terminating zero
/// length or a gzip payload
fn confirm_boundary<R: Read + Seek>(inner: &mut R, offset: u64) -> Result<bool> {
    inner.seek(SeekFrom::Start(offset + DELIMITER_LENGTH as u64))?;
    let mut length = [0u8; 4];
    if read_fully(inner, &mut length)? < length.len() {
        return Ok(false);
    }
    if u32::from_be_bytes(length) == 0 {
        return Ok(true);
    }
    let mut magic = [0u8; 2];
    Ok(read_fully(inner, &mut magic)? == magic.len() && magic == GZIP_MAGIC)
}

/// Finds the first confirmed chunk boundary starting in `[start, end)`
fn find_boundary<R: Read + Seek>(inner: &mut R, start: u64, end: u64) -> Result<Option<u64>> {
    let mut buffer = vec![0u8; SCAN_BUFFER_SIZE];
    let mut scan_from = start;
    'scan: loop {
        inner.seek(SeekFrom::Start(scan_from))?;
        let mut buffer_offset = scan_from;
        let mut run = 0;
        loop {
            let n = read_fully(inner, &mut buffer)?;
            if n == 0 {
                return Ok(None);
            }
            let mut i = 0;
            while i < n {
                if run == 0 {
                    let Some(skip) = memchr(DELIMITER_CONTENT, &buffer[i..n]) else {
                        break;
                    };
                    i += skip;
                    if buffer_offset + i as u64 >= end {
                        return Ok(None);
                    }
                }
                if buffer[i] == DELIMITER_CONTENT {
                    run += 1;
                    if run == DELIMITER_LENGTH {
                        let candidate = buffer_offset + i as u64 + 1 - DELIMITER_LENGTH as u64;
                        if confirm_boundary(inner, candidate)? {
                            return Ok(Some(candidate));
                        }
                        scan_from = candidate + 1;
                        continue 'scan;
                    }
                } else {
                    run = 0;
                }
                i += 1;
            }
            buffer_offset += n as u64;
        }
    }
}

/// Reads entries from a chunked container
///
/// In whole-file mode ([`new`](Self::new)) the reader expects a chunk delimiter at the first
/// byte. In split mode ([`new_split`](Self::new_split)) it only yields the chunks whose
/// delimiter starts inside a byte range, so that contiguous splits of one file yield every
/// entry exactly once.
pub struct ChunkReader<R: Read, E: ChunkEntry> {
    inner: R,

    /// Absolute offset of the next unread byte
    offset: u64,
    /// Chunks whose header ends at or past this offset belong to the next split
    extended_end: u64,

    /// Reusable compressed payload buffer
    zbuf: Vec<u8>,
    /// Reusable decompressed payload buffer
    ubuf: Vec<u8>,

    /// Entries of the current chunk
    batch: Vec<E>,
    /// Index of the next entry to hand out from `batch`
    cursor: usize,

    chunks_read: u64,
    done: bool,
}
impl<R: Read, E: ChunkEntry> ChunkReader<R, E> {
    /// Creates a reader over a whole container starting at the current position of `inner`
    pub fn new(inner: R) -> Self {
        Self::with_range(inner, 0, u64::MAX)
    }

    fn with_range(inner: R, offset: u64, extended_end: u64) -> Self {
        Self {
            inner,
            offset,
            extended_end,
            zbuf: Vec::new(),
            ubuf: Vec::new(),
            batch: Vec::new(),
            cursor: 0,
            chunks_read: 0,
            done: false,
        }
    }

    /// Number of chunks decoded so far
    #[must_use]
    pub fn chunks_read(&self) -> u64 {
        self.chunks_read
    }

    /// Absolute byte offset of the next unread byte
    #[must_use]
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Loads the next chunk into `batch`, returning `false` at the end of the stream or split
    fn load_chunk(&mut self) -> Result<bool> {
        loop {
            if self.done {
                return Ok(false);
            }
            let chunk_start = self.offset;

            let mut delimiter = [0u8; DELIMITER_LENGTH];
            match read_fully(&mut self.inner, &mut delimiter)? {
                0 => {
                    self.done = true;
                    return Ok(false);
                }
                DELIMITER_LENGTH => {}
                _ => return Err(ChunkError::Truncated(chunk_start).into()),
            }
            if delimiter.iter().any(|&b| b != DELIMITER_CONTENT) {
                return Err(ChunkError::InvalidDelimiter(chunk_start).into());
            }
            let length = match self.inner.read_u32::<BigEndian>() {
                Ok(length) => length as usize,
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    return Err(ChunkError::Truncated(chunk_start).into())
                }
                Err(e) => return Err(e.into()),
            };
            self.offset += CHUNK_HEADER_SIZE as u64;

            if self.offset >= self.extended_end || length == 0 {
                self.done = true;
                return Ok(false);
            }

            self.zbuf.resize(length, 0);
            if read_fully(&mut self.inner, &mut self.zbuf)? < length {
                return Err(ChunkError::Truncated(chunk_start).into());
            }
            self.offset += length as u64;

            self.ubuf.clear();
            GzDecoder::new(self.zbuf.as_slice())
                .read_to_end(&mut self.ubuf)
                .map_err(|e| ChunkError::InvalidCompression(chunk_start, e.to_string()))?;

            self.batch.clear();
            self.cursor = 0;
            E::decode_batch(&self.ubuf, &mut self.batch)?;
            self.chunks_read += 1;
            debug!(
                offset = chunk_start,
                compressed = length,
                entries = self.batch.len(),
                "chunk read"
            );
            if !self.batch.is_empty() {
                return Ok(true);
            }
        }
    }

    /// Returns the next entry, or `None` at the end of the stream or split
    pub fn next_entry(&mut self) -> Result<Option<E>> {
        if self.cursor >= self.batch.len() && !self.load_chunk()? {
            return Ok(None);
        }
        let entry = self.batch[self.cursor].clone();
        self.cursor += 1;
        Ok(Some(entry))
    }

    /// Skips the remaining entries of the current chunk and returns the whole next chunk
    pub fn next_batch(&mut self) -> Result<Option<&[E]>> {
        if !self.load_chunk()? {
            return Ok(None);
        }
        self.cursor = self.batch.len();
        Ok(Some(self.batch.as_slice()))
    }
}

impl<R: Read + Seek, E: ChunkEntry> ChunkReader<R, E> {
    /// Creates a reader over the chunks whose delimiter starts in `[start, end)`
    ///
    /// The reader scans forward from `start` for the first chunk boundary. A range containing
    /// no boundary yields no entries.
    pub fn new_split(mut inner: R, start: u64, end: u64) -> Result<Self> {
        if start > end {
            return Err(ChunkError::InvalidRange { start, end }.into());
        }
        let extended_end = end.saturating_add(CHUNK_HEADER_SIZE as u64);
        if start == end {
            let mut reader = Self::with_range(inner, start, extended_end);
            reader.done = true;
            return Ok(reader);
        }
        match find_boundary(&mut inner, start, end)? {
            Some(boundary) => {
                inner.seek(SeekFrom::Start(boundary))?;
                Ok(Self::with_range(inner, boundary, extended_end))
            }
            None => {
                warn!(start, end, "no chunk boundary in split");
                let mut reader = Self::with_range(inner, start, extended_end);
                reader.done = true;
                Ok(reader)
            }
        }
    }
}

impl<R: Read, E: ChunkEntry> Iterator for ChunkReader<R, E> {
    type Item = Result<E>;

    fn next(&mut self) -> Option<Self::Item> {
        let next = self.next_entry();
        if next.is_err() {
            self.done = true;
            self.cursor = self.batch.len();
        }
        next.transpose()
    }
}

#[cfg(test)]
mod testing {
    use std::io::{Cursor, Write};

    use super::*;
    use crate::alignment::AlignmentEntry;
    use crate::chunks::{ChunkWriter, ChunkWriterBuilder};
    use crate::error::Error;

    fn entry(i: u32) -> AlignmentEntry {
        AlignmentEntry {
            query_index: i,
            target_index: i % 3,
            position: i * 17,
            score: i as f32 * 0.5,
            multiplicity: 1,
            ..Default::default()
        }
    }

    fn container(n: u32, entries_per_chunk: usize) -> Result<Vec<u8>> {
        let mut writer = ChunkWriterBuilder::default()
            .entries_per_chunk(entries_per_chunk)
            .build(Vec::new());
        for i in 0..n {
            writer.append(entry(i))?;
        }
        writer.into_inner()
    }

    fn split_indices(bytes: &[u8], start: u64, end: u64) -> Result<Vec<u32>> {
        ChunkReader::<_, AlignmentEntry>::new_split(Cursor::new(bytes), start, end)?
            .map(|e| e.map(|e| e.query_index))
            .collect()
    }

    #[test]
    fn test_whole_file() -> Result<()> {
        let bytes = container(25, 10)?;
        let mut reader = ChunkReader::<_, AlignmentEntry>::new(Cursor::new(bytes));
        let mut observed = Vec::new();
        while let Some(e) = reader.next_entry()? {
            observed.push(e);
        }
        assert_eq!(observed, (0..25).map(entry).collect::<Vec<_>>());
        assert_eq!(reader.chunks_read(), 3);
        assert!(reader.next_entry()?.is_none());
        Ok(())
    }

    #[test]
    fn test_empty_input() -> Result<()> {
        let mut reader = ChunkReader::<_, AlignmentEntry>::new(Cursor::new(Vec::new()));
        assert!(reader.next_entry()?.is_none());
        Ok(())
    }

    #[test]
    fn test_corrupt_payload() -> Result<()> {
        let mut bytes = container(5, 10)?;
        // compression method byte of the gzip header
        bytes[CHUNK_HEADER_SIZE + 2] = 0x00;
        let mut reader = ChunkReader::<_, AlignmentEntry>::new(Cursor::new(bytes));
        let err = reader.next_entry().unwrap_err();
        assert!(err.is_malformed());
        assert!(matches!(
            err,
            Error::ChunkError(ChunkError::InvalidCompression(0, _))
        ));
        Ok(())
    }

    #[test]
    fn test_invalid_delimiter() {
        let mut bytes = container(5, 10).unwrap();
        bytes[3] = 0x00;
        let mut reader = ChunkReader::<_, AlignmentEntry>::new(Cursor::new(bytes));
        let err = reader.next_entry().unwrap_err();
        assert!(matches!(
            err,
            Error::ChunkError(ChunkError::InvalidDelimiter(0))
        ));
    }

    #[test]
    fn test_truncated_chunk() {
        let mut bytes = container(5, 10).unwrap();
        bytes.truncate(30);
        let mut reader = ChunkReader::<_, AlignmentEntry>::new(Cursor::new(bytes));
        let err = reader.next_entry().unwrap_err();
        assert!(matches!(err, Error::ChunkError(ChunkError::Truncated(0))));
        assert!(err.is_malformed());
    }

    #[test]
    fn test_iterator_stops_after_error() {
        let mut bytes = container(5, 10).unwrap();
        bytes.truncate(30);
        let mut reader = ChunkReader::<_, AlignmentEntry>::new(Cursor::new(bytes));
        assert!(reader.next().is_some_and(|r| r.is_err()));
        assert!(reader.next().is_none());
    }

    #[test]
    fn test_invalid_range() {
        let bytes = container(5, 10).unwrap();
        let result = ChunkReader::<_, AlignmentEntry>::new_split(Cursor::new(bytes), 10, 2);
        assert!(matches!(
            result,
            Err(Error::ChunkError(ChunkError::InvalidRange { start: 10, end: 2 }))
        ));
    }

    #[test]
    fn test_empty_splits() -> Result<()> {
        let bytes = container(30, 10)?;
        assert!(split_indices(&bytes, 5, 5)?.is_empty());
        assert!(split_indices(&bytes, 1, 12)?.is_empty());
        let len = bytes.len() as u64;
        assert!(split_indices(&bytes, len - 4, len)?.is_empty());
        Ok(())
    }

    #[test]
    fn test_split_starting_on_boundary() -> Result<()> {
        let bytes = container(30, 10)?;
        assert_eq!(split_indices(&bytes, 0, 1)?, (0..10).collect::<Vec<_>>());
        Ok(())
    }

    #[test]
    fn test_split_coverage_all_partitions() -> Result<()> {
        let bytes = container(40, 10)?;
        let len = bytes.len() as u64;
        let expected: Vec<u32> = (0..40).collect();

        // every partition of the file into three contiguous splits
        for a in (0..=len).step_by(3) {
            for b in (a..=len).step_by(5).chain([len]) {
                let mut observed = split_indices(&bytes, 0, a)?;
                observed.extend(split_indices(&bytes, a, b)?);
                observed.extend(split_indices(&bytes, b, len)?);
                assert_eq!(observed, expected, "partition at {a}, {b}");
            }
        }
        Ok(())
    }

    #[test]
    fn test_split_coverage_many_splits() -> Result<()> {
        let bytes = container(200, 7)?;
        let len = bytes.len() as u64;
        for n_splits in [1, 2, 3, 5, 16, 64] {
            let step = len.div_ceil(n_splits);
            let mut observed = Vec::new();
            let mut start = 0;
            while start < len {
                let end = (start + step).min(len);
                observed.extend(split_indices(&bytes, start, end)?);
                start = end;
            }
            assert_eq!(observed, (0..200).collect::<Vec<_>>(), "{n_splits} splits");
        }
        Ok(())
    }

    #[test]
    fn test_split_ignores_false_delimiters() -> Result<()> {
        // fill bytes before the container that do not precede a gzip payload
        let mut bytes = vec![0xFF; 20];
        bytes.extend([0, 0, 0, 9, 0xAB]);
        let offset = bytes.len() as u64;
        bytes.extend(container(20, 10)?);

        assert_eq!(
            split_indices(&bytes, 0, offset + 1)?,
            (0..10).collect::<Vec<_>>()
        );
        Ok(())
    }

    #[test]
    fn test_split_over_file() -> Result<()> {
        let mut file = tempfile::tempfile()?;
        let mut writer = ChunkWriter::new(&mut file);
        for i in 0..50 {
            writer.append(entry(i))?;
        }
        writer.finish()?;
        drop(writer);
        file.flush()?;

        let len = file.metadata()?.len();
        let mut observed = Vec::new();
        for (start, end) in [(0, len / 2), (len / 2, len)] {
            let reader = ChunkReader::<_, AlignmentEntry>::new_split(file.try_clone()?, start, end)?;
            for e in reader {
                observed.push(e?.query_index);
            }
        }
        assert_eq!(observed, (0..50).collect::<Vec<_>>());
        Ok(())
    }
}
