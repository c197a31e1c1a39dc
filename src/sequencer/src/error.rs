use crate::key::Key;
use std::path::PathBuf;
use thiserror::Error;

/// Reasons an item's routing key cannot be determined. Items failing here are rejected.
#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("Unable to read item: {0}")]
    Io(#[from] std::io::Error),

    #[error("Item is not a readable ZIP archive: {0}")]
    NotAnArchive(#[source] zip::result::ZipError),

    #[error("No top-level directory found in archive")]
    NoTopLevelDirectory,

    #[error("No metadata file found in archive at {0}")]
    MissingMetadata(String),

    #[error("Unable to parse metadata file: {0}")]
    InvalidMetadata(#[source] serde_json::Error),

    #[error("No NBN found in metadata file")]
    MissingKey,

    #[error("Key is {encoded_len} bytes when encoded, at most {max} fit a bucket name")]
    KeyTooLong { encoded_len: usize, max: usize },
}

/// Failure reported by the processing collaborator for a single item
#[derive(Error, Debug)]
pub enum ProcessingError {
    #[error("Unable to read metadata from item: {0}")]
    Metadata(#[from] ExtractionError),

    #[error("Catalog request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Catalog refused registration with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("{0}")]
    Other(String),
}

/// Errors raised by the sequencing stages themselves
#[derive(Error, Debug)]
pub enum SequencerError {
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Bucket for key {key} disappeared on each of {attempts} admission attempts")]
    BucketUnstable { key: Key, attempts: usize },

    #[error("No bucket exists for key {0}")]
    NoSuchBucket(Key),
}

impl SequencerError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

pub type SequencerResult<T> = Result<T, SequencerError>;
