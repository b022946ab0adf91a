use std::error::Error as StdError;

use crate::helper::ColumnKind;

/// Custom Result type for varcol operations, wrapping the custom [`Error`] type
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for the varcol library, encompassing all possible error cases
/// that can occur while encoding or decoding variant rows and study configurations.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Errors related to row keys and genomic coordinates
    #[error("Error processing row key: {0}")]
    KeyError(#[from] KeyError),

    /// Errors related to study configurations and their persistence
    #[error("Error processing study configuration: {0}")]
    ConfigError(#[from] ConfigError),

    /// Errors decoding or encoding a single column payload
    #[error("Error processing column: {0}")]
    CodecError(#[from] CodecError),

    /// Errors building a row mutation from a variant
    #[error("Error encoding row: {0}")]
    EncodeError(#[from] EncodeError),

    /// Standard I/O errors
    #[error("Error with IO: {0}")]
    IoError(#[from] std::io::Error),

    /// UTF-8 conversion errors
    #[error("Error with UTF8: {0}")]
    Utf8Error(#[from] std::str::Utf8Error),

    /// Errors serializing or deserializing a configuration body
    #[error("Error with JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    /// A scan worker thread panicked
    #[error("Scan worker {0} panicked")]
    WorkerPanic(usize),

    /// A scan was cancelled between rows
    #[error("Scan cancelled after {0} rows")]
    Cancelled(usize),

    /// Generic errors for other unexpected situations (e.g. store backends)
    #[error("Generic error: {0}")]
    GenericError(#[from] Box<dyn StdError + Send + Sync>),
}
impl Error {
    /// Checks if the error is a retryable configuration conflict
    ///
    /// Callers of `add_samples` are expected to re-resolve the configuration and
    /// retry when this returns `true`.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            Self::ConfigError(ConfigError::ConfigurationConflict { .. })
        )
    }

    /// Checks if the error is local to a single cell of a row
    ///
    /// Cell-local errors are recorded against the cell and decoding of the
    /// rest of the row continues.
    #[must_use]
    pub fn is_cell_local(&self) -> bool {
        match self {
            Self::CodecError(err) => err.is_cell_local(),
            _ => false,
        }
    }

    /// Checks if the error reports a study with no stored configuration
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::ConfigError(ConfigError::StudyNotFound(_)))
    }
}

/// Errors specific to row keys, coordinates and chromosome naming
#[derive(thiserror::Error, Debug)]
pub enum KeyError {
    /// The coordinate cannot be represented in a row key
    #[error("Malformed coordinate {chromosome}:{position} ({reason})")]
    MalformedCoordinate {
        chromosome: String,
        position: u64,
        reason: &'static str,
    },

    /// The row key violates the fixed prefix or allele summary layout
    ///
    /// # Arguments
    /// * `usize` - The byte offset at which the violation was detected
    /// * `&'static str` - Description of the violated invariant
    #[error("Corrupt row key at byte {0}: {1}")]
    CorruptRowKey(usize, &'static str),

    /// The chromosome token is not part of the recognized naming set
    #[error("Unknown chromosome: {0}")]
    UnknownChromosome(String),
}

/// Errors that can occur while resolving or mutating study configurations
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    /// No configuration is stored for the study
    #[error("Study {0} not found")]
    StudyNotFound(u32),

    /// A configuration already exists for the study
    #[error("Study {0} already exists")]
    StudyAlreadyExists(u32),

    /// The stored version changed between resolve and write
    ///
    /// This is an expected, retryable condition under concurrent writers.
    #[error("Configuration conflict on study {study_id}: expected version {expected}, found {found:?}")]
    ConfigurationConflict {
        study_id: u32,
        expected: u64,
        found: Option<u64>,
    },

    /// The file was already registered in the study
    #[error("File {file_id} already registered in study {study_id}")]
    DuplicateFile { study_id: u32, file_id: u32 },

    /// The sample is not registered in the study
    #[error("Sample {sample} is not registered in study {study_id}")]
    UnknownSample { study_id: u32, sample: String },

    /// The sample was deprecated and cannot contribute new files
    #[error("Sample {sample} is deprecated in study {study_id}")]
    SampleRetired { study_id: u32, sample: String },

    /// The cohort name is already in use
    #[error("Cohort {cohort} already exists in study {study_id}")]
    DuplicateCohort { study_id: u32, cohort: String },

    /// The stored configuration blob could not be parsed
    #[error("Corrupt configuration blob for study {study_id}: {reason}")]
    CorruptConfiguration { study_id: u32, reason: String },

    /// The sample column index counter has no room left
    #[error("Study {0} has no column indices left")]
    ColumnIndexExhausted(u32),

    /// Conflicts persisted through every attempt of a retry policy
    #[error("Gave up on study {study_id} after {attempts} conflicting attempts")]
    RetriesExhausted { study_id: u32, attempts: u32 },
}

/// Errors decoding a single column payload
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum CodecError {
    /// The genotype payload is truncated or malformed
    #[error("Corrupt genotype payload: {0}")]
    CorruptGenotype(String),

    /// The file metadata payload is truncated or malformed
    #[error("Corrupt file metadata payload: {0}")]
    CorruptFileMeta(String),

    /// The statistics payload is truncated or malformed
    #[error("Corrupt stats payload: {0}")]
    CorruptStats(String),

    /// A textual genotype (e.g. `0/1`) could not be parsed
    #[error("Invalid genotype: '{0}'")]
    InvalidGenotype(String),

    /// A column qualifier does not match the qualifier layout
    #[error("Invalid column qualifier of {len} bytes: {reason}")]
    InvalidQualifier { len: usize, reason: &'static str },
}
impl CodecError {
    /// Returns `true` for payload corruption confined to one cell
    #[must_use]
    pub fn is_cell_local(&self) -> bool {
        matches!(
            self,
            Self::CorruptGenotype(_)
                | Self::CorruptFileMeta(_)
                | Self::CorruptStats(_)
                | Self::InvalidQualifier { .. }
        )
    }
}

/// Errors that can occur while building a row mutation from a variant
#[derive(thiserror::Error, Debug)]
pub enum EncodeError {
    /// The sample has no column index in the target study
    #[error("Sample {sample} is not registered in study {study_id} - register it before encoding")]
    UnregisteredSample { study_id: u32, sample: String },

    /// The sample was deprecated and its column index retired
    #[error("Sample {sample} is deprecated in study {study_id}")]
    DeprecatedSample { study_id: u32, sample: String },

    /// The file is not registered in the target study
    #[error("File {file_id} is not registered in study {study_id}")]
    UnregisteredFile { study_id: u32, file_id: u32 },

    /// The cohort is not defined in the target study
    #[error("Cohort {cohort} is not defined in study {study_id}")]
    UnregisteredCohort { study_id: u32, cohort: String },

    /// The genotype call cannot be represented, e.g. it has no alleles
    #[error("Invalid genotype: {0}")]
    InvalidGenotype(String),

    /// A payload could not be written for the given column kind
    #[error("Unable to encode {kind:?} column: {reason}")]
    PayloadTooLarge { kind: ColumnKind, reason: String },
}

/// Trait for converting arbitrary errors into `Error`
///
/// Store backends use this to surface their own error types through the
/// [`crate::VariantStore`] and [`crate::ConfigStore`] traits.
pub trait IntoVarcolError {
    fn into_varcol_error(self) -> Error;
}

impl<E> IntoVarcolError for E
where
    E: StdError + Send + Sync + 'static,
{
    fn into_varcol_error(self) -> Error {
        Error::GenericError(Box::new(self))
    }
}
