use atomic_common::abi::DecodeError;
use thiserror::Error;

use crate::{db::DbError, deserializer::PoolError, reader::ReaderError, rpc::RpcError};

/// Errors crossing component boundaries inside the filler.
///
/// The receiver's supervisor loop keys its retry/halt decision on the
/// variant: database errors retry a bounded number of times, decode errors
/// retry once, handler logic errors halt immediately.
#[derive(Debug, Error)]
pub enum FillerError {
    #[error(transparent)]
    Db(#[from] DbError),
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Pool(#[from] PoolError),
    #[error(transparent)]
    Rpc(#[from] RpcError),
    #[error(transparent)]
    Reader(#[from] ReaderError),
    #[error("handler '{handler}' failed at {origin}: {message}")]
    Handler {
        handler: &'static str,
        origin: &'static str,
        message: String,
    },
    #[error("missing schema: table '{0}' does not exist, apply the database migrations first")]
    MissingSchema(String),
    #[error("invalid handler configuration: {0}")]
    Config(String),
}

impl FillerError {
    pub fn handler(handler: &'static str, origin: &'static str, message: impl ToString) -> Self {
        Self::Handler {
            handler,
            origin,
            message: message.to_string(),
        }
    }

    /// Is a retry worth attempting for this error class
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FillerError::Db(_) | FillerError::Decode(_) | FillerError::Pool(_)
        )
    }
}
