use std::fmt;
use std::error::Error;
use std::path::PathBuf;

/// Broad classification of a failure, used by callers to decide how to report it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Missing files, unsupported variants, malformed parameters or arguments
    Configuration,
    /// A device ran out of its memory budget
    Resource,
    /// Tokenizer, checkpoint or generation failures
    Engine,
}

/// Custom error types for session initialisation and generation
#[derive(Debug)]
pub enum InferenceError {
    /// The variant identifier is not one of the supported sizes
    UnsupportedVariant(String),
    /// A required file or directory does not exist
    MissingPath {
        /// What the path was expected to hold
        what: &'static str,
        /// The resolved path that was checked
        path: PathBuf,
    },
    /// The architecture parameters could not be parsed or are inconsistent
    InvalidParams(String),
    /// Caller supplied an out-of-range argument
    InvalidArgument(String),
    /// A device could not hold the requested allocation
    OutOfMemory {
        device: String,
        requested: u64,
        available: u64,
    },
    /// The weight checkpoint is malformed or does not match the model
    Checkpoint(String),
    /// The tokenizer model is malformed
    Tokenizer(String),
    /// Tensor shapes do not line up
    Shape(String),
    /// Wraps std::io::Error for file operations
    Io(std::io::Error),
}

impl InferenceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            InferenceError::UnsupportedVariant(_)
            | InferenceError::MissingPath { .. }
            | InferenceError::InvalidParams(_)
            | InferenceError::InvalidArgument(_) => ErrorKind::Configuration,
            InferenceError::OutOfMemory { .. } => ErrorKind::Resource,
            InferenceError::Checkpoint(_)
            | InferenceError::Tokenizer(_)
            | InferenceError::Shape(_)
            | InferenceError::Io(_) => ErrorKind::Engine,
        }
    }

    /// Classifies a boxed error, returning `None` when it did not originate here.
    pub fn kind_of(err: &(dyn Error + Send + Sync + 'static)) -> Option<ErrorKind> {
        err.downcast_ref::<InferenceError>().map(|e| e.kind())
    }
}

impl fmt::Display for InferenceError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            InferenceError::UnsupportedVariant(v) => write!(
                f,
                "Unsupported model variant '{}'; expected one of 7B, 13B, 30B, 65B",
                v
            ),
            InferenceError::MissingPath { what, path } => {
                write!(f, "Missing {} at {}", what, path.display())
            }
            InferenceError::InvalidParams(msg) => write!(f, "Invalid model parameters: {}", msg),
            InferenceError::InvalidArgument(msg) => write!(f, "Invalid argument: {}", msg),
            InferenceError::OutOfMemory { device, requested, available } => write!(
                f,
                "Out of memory on device {}: requested {} bytes, {} bytes available",
                device, requested, available
            ),
            InferenceError::Checkpoint(msg) => write!(f, "Checkpoint error: {}", msg),
            InferenceError::Tokenizer(msg) => write!(f, "Tokenizer error: {}", msg),
            InferenceError::Shape(msg) => write!(f, "Shape mismatch: {}", msg),
            InferenceError::Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl Error for InferenceError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            InferenceError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for InferenceError {
    fn from(err: std::io::Error) -> Self {
        InferenceError::Io(err)
    }
}
