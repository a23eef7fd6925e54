//! Error types shared across the analyzer

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Store failure that survived the one-shot schema self-heal.
    #[error("event store error: {0}")]
    Store(#[from] sqlx::Error),

    /// The checkpointed file is no longer present in the scan directory.
    /// The directory must be reconciled by hand before ingestion can resume.
    #[error("checkpoint file {last_file:?} not found in scan directory; reconcile the directory or reset the checkpoint")]
    CheckpointMismatch { last_file: String },

    /// Remote log retrieval failed. Callers downgrade this to a warning and
    /// proceed with whatever files are already local.
    #[error("remote transfer failed: {0}")]
    RemoteTransfer(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// A log line matched one of the patterns but its timestamp field does not
/// parse. The pipeline skips the line and keeps going.
#[derive(Debug, Error)]
#[error("unparseable timestamp {text:?}: {source}")]
pub struct ParseError {
    pub text: String,
    #[source]
    pub source: chrono::ParseError,
}
