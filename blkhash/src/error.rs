use thiserror::Error;

/// Errors surfaced by the core engine and its source drivers.
///
/// None of these are retried inside the core (spec.md §7): a recoverable
/// short read is looped internally by the driver until it either completes
/// a block or hits a definitive EOF, everything else propagates to the
/// caller.
#[derive(Debug, Error)]
pub enum Error {
    /// A requested digest primitive name has no known implementation.
    #[error("unknown digest: {0}")]
    UnknownDigest(String),

    /// `update`/`update_zeros` was called after `finalize`.
    #[error("hash already finalized")]
    AlreadyFinalized,

    /// The driver produced fewer bytes than the image's declared length.
    #[error("unexpected end of file at offset {offset}, expected {expected} bytes")]
    UnexpectedEOF { offset: u64, expected: u64 },

    /// A read, connect, or socket syscall failed.
    #[error("I/O failure: {0}")]
    IOFailure(#[from] std::io::Error),

    /// The image server exited or disconnected mid-run.
    #[error("image server failure: {message}")]
    ServerFailure { message: String },

    /// The run was aborted by a signal.
    #[error("cancelled")]
    Cancelled,
}

impl From<tonic::Status> for Error {
    fn from(status: tonic::Status) -> Self {
        Error::ServerFailure {
            message: status.message().to_string(),
        }
    }
}

impl From<tonic::transport::Error> for Error {
    fn from(err: tonic::transport::Error) -> Self {
        Error::ServerFailure {
            message: err.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
