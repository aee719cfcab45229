use std::fs::File;
use std::io::Cursor;
use std::ops::Range;
use std::path::Path;
use std::sync::Arc;

use memmap2::Mmap;
use tracing::debug;

use crate::alignment::AlignmentEntry;
use crate::chunks::ChunkReader;
use crate::error::{ChunkError, Error, Result};

/// Memory-mapped entries file that can be processed by many threads at once
///
/// The file is divided into contiguous byte ranges, one per thread. Each thread reads its
/// range with a split [`ChunkReader`], so every entry is processed exactly once without an
/// index of the chunk boundaries.
pub struct MmapEntriesReader {
    /// Memory mapped file contents, wrapped in Arc for thread-safe sharing
    mmap: Arc<Mmap>,
}
impl MmapEntriesReader {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;

        // Safety: the file is open and won't be modified while mapped
        let mmap = unsafe { Mmap::map(&file)? };
        Ok(Self {
            mmap: Arc::new(mmap),
        })
    }

    /// Size of the entries file in bytes
    #[must_use]
    pub fn len(&self) -> u64 {
        self.mmap.len() as u64
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.mmap.is_empty()
    }

    /// Sequential reader over the chunks starting in `[start, end)`
    pub fn split_reader(
        &self,
        start: u64,
        end: u64,
    ) -> Result<ChunkReader<Cursor<&[u8]>, AlignmentEntry>> {
        ChunkReader::new_split(Cursor::new(&self.mmap[..]), start, end)
    }
}

impl ParallelReader for MmapEntriesReader {
    fn process_parallel<P: ParallelProcessor + 'static>(
        self,
        processor: P,
        num_threads: usize,
    ) -> Result<()> {
        let len = self.len();
        self.process_parallel_range(processor, num_threads, 0..len)
    }

    fn process_parallel_range<P: ParallelProcessor + 'static>(
        self,
        processor: P,
        num_threads: usize,
        range: Range<u64>,
    ) -> Result<()> {
        if range.start > range.end {
            return Err(ChunkError::InvalidRange {
                start: range.start,
                end: range.end,
            }
            .into());
        }
        let num_threads = if num_threads == 0 {
            num_cpus::get()
        } else {
            num_threads.min(num_cpus::get())
        };
        let end = range.end.min(self.len());
        let start = range.start.min(end);
        let bytes_per_thread = (end - start).div_ceil(num_threads as u64).max(1);

        let mut handles = Vec::with_capacity(num_threads);
        for tid in 0..num_threads {
            let mut processor = processor.clone();
            let mmap = Arc::clone(&self.mmap);
            processor.set_tid(tid);

            let handle = std::thread::spawn(move || -> Result<()> {
                let split_start = (start + tid as u64 * bytes_per_thread).min(end);
                let split_end = (split_start + bytes_per_thread).min(end);

                let mut reader = ChunkReader::<_, AlignmentEntry>::new_split(
                    Cursor::new(&mmap[..]),
                    split_start,
                    split_end,
                )?;
                while let Some(batch) = reader.next_batch()? {
                    for entry in batch {
                        processor.process_entry(entry)?;
                    }
                }
                debug!(
                    tid,
                    start = split_start,
                    end = split_end,
                    chunks = reader.chunks_read(),
                    "split processed"
                );
                processor.on_batch_complete()
            });
            handles.push(handle);
        }

        let mut result = Ok(());
        for handle in handles {
            let outcome = handle
                .join()
                .map_err(|_| Error::GenericError("split worker panicked".into()))
                .and_then(|r| r);
            if result.is_ok() {
                result = outcome;
            }
        }
        result
    }
}

/// Trait for entry sources that can be processed in parallel
///
/// This is implemented by the **reader** not by the **processor**.
/// For the **processor**, see the [`ParallelProcessor`] trait.
pub trait ParallelReader {
    /// Processes every entry with `num_threads` threads (0 uses all CPUs)
    fn process_parallel<P: ParallelProcessor + 'static>(
        self,
        processor: P,
        num_threads: usize,
    ) -> Result<()>;

    /// Processes the entries of the chunks starting within a byte range of the file
    ///
    /// # Arguments
    ///
    /// * `processor` - The processor to use for each entry, cloned once per thread
    /// * `num_threads` - The number of threads to spawn
    /// * `range` - The byte range to divide between threads
    ///
    /// # Returns
    ///
    /// * `Ok(())` - If all entries were processed successfully
    /// * `Err(Error)` - The first error raised by a thread
    fn process_parallel_range<P: ParallelProcessor + 'static>(
        self,
        processor: P,
        num_threads: usize,
        range: Range<u64>,
    ) -> Result<()>;
}

/// Trait for types that can process entries in parallel.
///
/// This is implemented by the **processor** not by the **reader**.
/// For the **reader**, see the [`ParallelReader`] trait.
pub trait ParallelProcessor: Send + Clone {
    /// Process a single entry
    fn process_entry(&mut self, entry: &AlignmentEntry) -> Result<()>;

    /// Called when a thread finishes processing its split
    /// Default implementation does nothing
    fn on_batch_complete(&mut self) -> Result<()> {
        Ok(())
    }

    /// Set the thread ID for this processor
    ///
    /// Each thread should call this method with its own unique ID.
    fn set_tid(&mut self, _tid: usize) {
        // Default implementation does nothing
    }

    /// Get the thread ID for this processor
    fn get_tid(&self) -> Option<usize> {
        None
    }
}
