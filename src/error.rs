use std::error::Error as StdError;

/// Custom Result type for kmerkv operations, wrapping the custom [`Error`] type
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for the kmerkv library, encompassing all possible error cases
/// that can occur while writing, reading, or searching a k-mer store.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Errors related to data and index file headers
    #[error("Error processing header: {0}")]
    HeaderError(#[from] HeaderError),

    /// Errors that occur during write operations
    #[error("Error writing store: {0}")]
    WriteError(#[from] WriteError),

    /// Errors that occur while decoding the data stream
    #[error("Error reading store: {0}")]
    ReadError(#[from] ReadError),

    /// Errors related to the anchor index file
    #[error("Error processing index: {0}")]
    IndexError(#[from] IndexError),

    /// Standard I/O errors
    #[error("Error with IO: {0}")]
    IoError(#[from] std::io::Error),

    /// Generic errors for other unexpected situations
    #[error("Generic error: {0}")]
    GenericError(#[from] Box<dyn StdError + Send + Sync>),
}
impl Error {
    /// Checks if the error signals a damaged store rather than a failed operation
    ///
    /// Both a truncated record and a key count that disagrees with the mask
    /// header mean the data file no longer matches what the writer produced.
    ///
    /// # Returns
    ///
    /// * `true` for `ReadError::BrokenFile` and `ReadError::CountMismatch`
    /// * `false` for all other error types
    #[must_use]
    pub fn is_corruption(&self) -> bool {
        match self {
            Self::ReadError(err) => err.is_corruption(),
            _ => false,
        }
    }

    /// Checks if the error indicates the index is out of sync with its data file
    ///
    /// This is useful for determining whether the index should be rebuilt with
    /// [`create_kv_index`](crate::create_kv_index).
    #[must_use]
    pub fn is_index_mismatch(&self) -> bool {
        match self {
            Self::IndexError(err) => err.is_mismatch(),
            _ => false,
        }
    }
}

/// Errors specific to processing and validating data and index headers
#[derive(thiserror::Error, Debug)]
pub enum HeaderError {
    /// The magic bytes do not identify a kmerkv data or index file
    ///
    /// # Arguments
    /// * `[u8; 8]` - The magic bytes that were found
    #[error("Invalid magic bytes: {0:?}")]
    InvalidMagic([u8; 8]),

    /// The main format version is not supported by this library
    #[error("Incompatible format version: {found} (supported: {supported})")]
    VersionMismatch { found: u8, supported: u8 },

    /// The k-mer length lies outside of [1, 32]
    #[error("Invalid k-mer length: {0} - expecting [1,32]")]
    KOverflow(u8),

    /// The anchor geometry cannot be applied to k-mers of length `k`
    #[error(
        "Invalid anchor prefix {anchor_prefix} with mask prefix {mask_prefix} for k = {k} - expecting anchor_prefix >= 1 and mask_prefix + anchor_prefix <= k"
    )]
    InvalidAnchorPrefix {
        k: u8,
        mask_prefix: u8,
        anchor_prefix: u8,
    },

    /// The stored mask range does not fit into `u64`
    #[error("Mask range {first_mask} + {chunk_size} overflows")]
    MaskRangeOverflow { first_mask: u64, chunk_size: u64 },

    /// The header does not contain enough bytes
    ///
    /// # Arguments
    /// * First `usize` - The actual number of bytes provided
    /// * Second `usize` - The expected number of bytes
    #[error("Invalid number of bytes provided: {0}. Expected: {1}")]
    InvalidSize(usize, usize),
}

/// Errors that can occur while decoding the data stream
#[derive(thiserror::Error, Debug)]
pub enum ReadError {
    /// The file being read is not a regular file
    #[error("File is not regular")]
    IncompatibleFile,

    /// A record ended before all of its bytes could be read
    ///
    /// # Fields
    /// * `pos` - The byte position at which decoding stopped
    #[error("Truncated or broken record at byte pos {pos}")]
    BrokenFile { pos: u64 },

    /// The number of decoded keys disagrees with the count declared for the mask
    #[error("Mask {mask} declares {expected} k-mers but {found} were decoded")]
    CountMismatch {
        mask: u64,
        expected: u64,
        found: u64,
    },

    /// A mask index outside of the chunk stored in the file was requested
    #[error("Requested mask ({requested}) is outside of the stored range {first}..{end}")]
    MaskOutOfRange { requested: u64, first: u64, end: u64 },

    /// All masks of the chunk have already been read
    #[error("End of stream reached")]
    EndOfStream,
}
impl ReadError {
    /// Whether this error means the data file is damaged
    #[must_use]
    pub fn is_corruption(&self) -> bool {
        matches!(self, Self::BrokenFile { .. } | Self::CountMismatch { .. })
    }
}

/// Errors that can occur while writing a store
#[derive(thiserror::Error, Debug)]
pub enum WriteError {
    /// A k-mer was observed without any position
    #[error("K-mer {0} has an empty value list")]
    EmptyValues(u64),

    /// A value does not fit into the packed 7-byte value representation
    #[error("Value {0:#x} does not fit into 7 bytes - disable packed values")]
    ValueOverflow(u64),

    /// A k-mer uses more than `2k` bits
    #[error("K-mer {kmer:#x} does not fit into k = {k}")]
    KmerOverflow { kmer: u64, k: u8 },

    /// The same k-mer appears twice in one mask
    #[error("Duplicate k-mer {0} in mask input")]
    DuplicateKmer(u64),

    /// A mask was written out of order or outside of the chunk
    #[error("Cannot write mask {requested}: next expected mask is {expected}")]
    MaskOutOfRange { requested: u64, expected: u64 },

    /// Every mask of the chunk has already been written
    #[error("All {0} masks of the chunk were already written")]
    MasksExhausted(u64),

    /// Attempted to write without a k-mer length configured
    #[error("Missing k-mer length in writer builder")]
    MissingK,
}

/// Errors related to the anchor index file
#[derive(thiserror::Error, Debug)]
pub enum IndexError {
    /// The index describes a different store than the data file
    ///
    /// # Arguments
    /// * `&'static str` - The attribute that disagrees
    #[error("Index header disagrees with data header on {0}")]
    HeaderMismatch(&'static str),

    /// When the size of the data file doesn't match what the index expects
    ///
    /// The first parameter is the actual file size, the second is the expected size
    #[error("Mismatch in size between data file size: {0} and expected index size {1}")]
    ByteSizeMismatch(u64, u64),

    /// The anchor table is truncated, has trailing bytes, or is out of order
    #[error("Malformed anchor table at byte {0}")]
    MalformedTable(usize),

    /// An anchor points outside of the data file
    #[error("Anchor offset {offset} is beyond the data file size {size}")]
    AnchorOutOfBounds { offset: u64, size: u64 },

    /// A dense bucket table was requested for an anchor prefix above the limit
    #[error("Anchor prefix {anchor_prefix} is too wide for a dense bucket table (max {max})")]
    DenseTableTooWide { anchor_prefix: u8, max: u8 },
}
impl IndexError {
    /// Checks if this error indicates a mismatch between the index and data file
    ///
    /// This is useful to determine if the index needs to be rebuilt.
    #[must_use]
    pub fn is_mismatch(&self) -> bool {
        matches!(
            self,
            Self::HeaderMismatch(_) | Self::ByteSizeMismatch(_, _) | Self::AnchorOutOfBounds { .. }
        )
    }
}

/// Trait for converting arbitrary errors into `Error`
pub trait IntoKvError {
    fn into_kv_error(self) -> Error;
}

impl<E> IntoKvError for E
where
    E: StdError + Send + Sync + 'static,
{
    fn into_kv_error(self) -> Error {
        Error::GenericError(Box::new(self))
    }
}
