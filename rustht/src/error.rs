use crate::data::plane::{Plane, Signal};
use thiserror::Error;

/// Errors surfaced by the head-tail analysis engine.
///
/// All failures are local and synchronous; nothing is retried internally and
/// the in-memory session state is left unchanged by a failing operation.
#[derive(Debug, Error)]
pub enum HtError {
    #[error("{0} is not a valid system")]
    InvalidSystem(String),

    #[error("{0} is not a valid user")]
    InvalidUser(String),

    #[error("could not find file \"{0}\"")]
    FileNotFound(String),

    #[error("cannot operate on a closed file")]
    ClosedFile,

    #[error("no bunches, cannot calculate stability")]
    NoBunches,

    #[error("bunch stability has not been calculated")]
    StabilityNotComputed,

    #[error("invalid index: {0}")]
    Indexing(String),

    #[error("no {plane}/{signal} dataset in file")]
    MissingDataset { plane: Plane, signal: Signal },

    #[error("malformed raw file: {0}")]
    Format(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Sql(#[from] rusqlite::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    BlobEncode(#[from] bincode::error::EncodeError),

    #[error(transparent)]
    BlobDecode(#[from] bincode::error::DecodeError),
}
