use std::error::Error as StdError;

/// Custom Result type for seqstore operations, wrapping the custom [`Error`] type
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for the seqstore library, encompassing all possible error cases
/// that can occur while reading or writing count tracks and alignment collections.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Errors related to count track bitstreams and transition readers
    #[error("Error processing count track: {0}")]
    CountsError(#[from] CountsError),

    /// Errors related to the chunked entries container
    #[error("Error processing chunked container: {0}")]
    ChunkError(#[from] ChunkError),

    /// Errors related to the alignment header sidecar
    #[error("Error processing header: {0}")]
    HeaderError(#[from] HeaderError),

    /// Standard I/O errors
    #[error("Error with IO: {0}")]
    IoError(#[from] std::io::Error),

    /// UTF-8 conversion errors
    #[error("Error with UTF8: {0}")]
    Utf8Error(#[from] std::string::FromUtf8Error),

    /// Conversion errors from anyhow errors
    #[cfg(feature = "anyhow")]
    #[error("Generic error: {0}")]
    AnyhowError(#[from] anyhow::Error),

    /// Generic errors for other unexpected situations
    #[error("Generic error: {0}")]
    GenericError(#[from] Box<dyn StdError + Send + Sync>),
}
impl Error {
    /// Checks if the error signals a misuse of a reader's protocol rather than bad data
    ///
    /// # Returns
    ///
    /// * `true` for `CountsError::InvalidState` and `CountsError::Unsupported`
    /// * `false` for all other error types
    #[must_use]
    pub fn is_protocol_misuse(&self) -> bool {
        matches!(
            self,
            Self::CountsError(CountsError::InvalidState | CountsError::Unsupported(_))
        )
    }

    /// Checks if the error was caused by a malformed stream (bitstream, chunk or header)
    #[must_use]
    pub fn is_malformed(&self) -> bool {
        match self {
            Self::CountsError(err) => err.is_malformed(),
            Self::ChunkError(err) => err.is_malformed(),
            Self::HeaderError(_) => true,
            _ => false,
        }
    }
}

/// Errors that can occur while encoding or decoding count tracks
#[derive(thiserror::Error, Debug)]
pub enum CountsError {
    /// The bitstream ended in the middle of a code word
    #[error("Count bitstream truncated after {0} bits")]
    TruncatedStream(u64),

    /// A code word in the bitstream cannot be decoded
    #[error("Malformed count bitstream: {0}")]
    MalformedStream(&'static str),

    /// A decoded delta would make the count negative
    ///
    /// # Arguments
    /// * `count` - The count before the delta was applied
    /// * `delta` - The decoded delta
    #[error("Delta {delta} applied to count {count} produces a negative count")]
    NegativeCount { count: u64, delta: i64 },

    /// A transition was requested while none is available
    #[error("next cannot be called when has_next would return false")]
    InvalidState,

    /// The operation is not available on this reader
    #[error("{0} is not supported by this reader")]
    Unsupported(&'static str),

    /// The zig-zag image of a delta is reserved as the end-of-data marker
    #[error("Delta {0} collides with the end-of-data marker")]
    MarkerCollision(i64),

    /// Runs must cover at least one position
    #[error("Run length must be greater than zero")]
    ZeroRunLength,

    /// The track was already closed
    #[error("Count track writer is already finished")]
    WriterFinished,

    /// A count cannot be delta encoded against its predecessor
    ///
    /// # Arguments
    /// * `previous` - The count before the transition
    /// * `count` - The count after the transition
    #[error("Count {count} cannot be encoded as a delta from {previous}")]
    CountOutOfRange { previous: u64, count: u64 },
}
impl CountsError {
    #[must_use]
    pub fn is_malformed(&self) -> bool {
        matches!(
            self,
            Self::TruncatedStream(_) | Self::MalformedStream(_) | Self::NegativeCount { .. }
        )
    }
}

/// Errors that can occur while reading or writing the chunked entries container
#[derive(thiserror::Error, Debug)]
pub enum ChunkError {
    /// The bytes where a chunk delimiter is expected are not a delimiter
    ///
    /// # Arguments
    /// * `u64` - The byte offset where the delimiter was expected
    #[error("Invalid chunk delimiter at byte pos {0}")]
    InvalidDelimiter(u64),

    /// The stream ended inside a chunk
    ///
    /// # Arguments
    /// * `u64` - The byte offset of the truncated chunk
    #[error("Chunk at byte pos {0} is truncated")]
    Truncated(u64),

    /// Split bounds are inconsistent
    #[error("Invalid split range specified: start ({start}) is greater than end ({end})")]
    InvalidRange { start: u64, end: u64 },

    /// The decompressed payload does not describe a valid batch of entries
    #[error("Malformed entry batch: expected {expected} bytes, found {found}")]
    MalformedBatch { expected: usize, found: usize },

    /// A batch is too large to be framed with a 32-bit length
    #[error("Compressed chunk of {0} bytes exceeds the maximum chunk size")]
    ChunkTooLarge(usize),

    /// The payload of a chunk is not a valid gzip stream
    ///
    /// # Arguments
    /// * `u64` - The byte offset of the chunk
    /// * `String` - The decoder's description of the failure
    #[error("Chunk at byte pos {0} cannot be decompressed: {1}")]
    InvalidCompression(u64, String),

    /// Entries were appended after the container was terminated
    #[error("Chunk writer is already finished")]
    WriterFinished,
}
impl ChunkError {
    /// Checks if the error was caused by malformed container bytes
    #[must_use]
    pub fn is_malformed(&self) -> bool {
        matches!(
            self,
            Self::InvalidDelimiter(_)
                | Self::Truncated(_)
                | Self::MalformedBatch { .. }
                | Self::InvalidCompression(..)
        )
    }
}

/// Errors specific to processing and validating the alignment header sidecar
#[derive(thiserror::Error, Debug)]
pub enum HeaderError {
    /// The magic number in the header does not match the expected value
    #[error("Invalid header magic: {0:?}")]
    InvalidMagic([u8; 8]),

    /// The format version in the header is not supported
    #[error("Invalid format version: {0}")]
    InvalidFormatVersion(u8),

    /// An identifier mapping uses an unknown layout tag
    #[error("Invalid identifier mapping tag: {0}")]
    InvalidMappingTag(u8),

    /// An identifier mapping references the same index twice
    #[error("Duplicate identifier index {0} in mapping")]
    DuplicateIdentifierIndex(u32),

    /// The query lengths section uses an unknown layout tag
    #[error("Invalid query length tag: {0}")]
    InvalidLengthTag(u8),

    /// An identifier index lies outside the range declared by the header
    ///
    /// # Arguments
    /// * `index` - The identifier index found in the mapping
    /// * `bound` - The number of identifiers declared by the header
    #[error("Identifier index {index} is out of bounds for {bound} identifiers")]
    IdentifierIndexOutOfBounds { index: u32, bound: u32 },
}

/// Trait for converting arbitrary errors into `Error`
pub trait IntoSeqstoreError {
    fn into_seqstore_error(self) -> Error;
}

// Implement conversion for Box<dyn Error>
impl<E> IntoSeqstoreError for E
where
    E: StdError + Send + Sync + 'static,
{
    fn into_seqstore_error(self) -> Error {
        Error::GenericError(Box::new(self))
    }
}

#[cfg(test)]
mod testing {
    use super::*;

    #[derive(thiserror::Error, Debug)]
    enum MyError {
        #[error("Custom error: {0}")]
        CustomError(String),
    }

    #[test]
    fn test_into_seqstore_error() {
        let my_error = MyError::CustomError(String::from("some error"));
        let error = my_error.into_seqstore_error();
        assert!(matches!(error, Error::GenericError(_)));
    }

    #[test]
    fn test_protocol_misuse() {
        let error: Error = CountsError::InvalidState.into();
        assert!(error.is_protocol_misuse());
        assert!(!error.is_malformed());

        let error: Error = CountsError::Unsupported("skip_to").into();
        assert!(error.is_protocol_misuse());
    }

    #[test]
    fn test_malformed() {
        let error: Error = CountsError::TruncatedStream(12).into();
        assert!(error.is_malformed());

        let error: Error = ChunkError::InvalidDelimiter(40).into();
        assert!(error.is_malformed());

        let error: Error = ChunkError::InvalidRange { start: 4, end: 2 }.into();
        assert!(!error.is_malformed());

        let error: Error = ChunkError::ChunkTooLarge(1 << 33).into();
        assert!(!error.is_malformed());

        let error: Error = ChunkError::WriterFinished.into();
        assert!(!error.is_malformed());

        let error: Error = ChunkError::InvalidCompression(12, "corrupt deflate stream".into()).into();
        assert!(error.is_malformed());

        let error: Error = std::io::Error::other("disk").into();
        assert!(!error.is_malformed());
    }

    #[test]
    fn test_error_messages() {
        let error = CountsError::NegativeCount { count: 2, delta: -5 };
        let error_str = format!("{}", error);
        assert!(error_str.contains("-5"));
        assert!(error_str.contains('2'));

        let error = ChunkError::Truncated(1234);
        assert!(format!("{}", error).contains("1234"));

        let error = HeaderError::InvalidFormatVersion(99);
        assert!(format!("{}", error).contains("99"));

        let error = CountsError::Unsupported("skip_to");
        assert!(format!("{}", error).contains("skip_to"));
    }

    #[test]
    fn test_error_from_nested() {
        let error: Error = HeaderError::InvalidMappingTag(7).into();
        assert!(matches!(error, Error::HeaderError(_)));

        let error: Error = ChunkError::ChunkTooLarge(10).into();
        assert!(matches!(error, Error::ChunkError(_)));
    }
}
