use std::io;

use thiserror::Error;

use crate::StreamHandle;

/// Failure taxonomy for tracking operations.
///
/// `AllocationFailure` and `StorageFailure` are retained for contract
/// completeness: bounded-copy duplication and store creation are infallible
/// here, so neither kind is produced by this implementation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidArgument,
    NotFound,
    Misuse,
    AllocationFailure,
    PlatformFailure,
    InternalCorruption,
    StorageFailure,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::InvalidArgument => "invalid_argument",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Misuse => "misuse",
            ErrorKind::AllocationFailure => "allocation_failure",
            ErrorKind::PlatformFailure => "platform_failure",
            ErrorKind::InternalCorruption => "internal_corruption",
            ErrorKind::StorageFailure => "storage_failure",
        }
    }
}

/// Errors returned by tracking operations.
///
/// The embedded `io::Error` carries the conventional platform error code
/// where one exists.
#[derive(Error, Debug)]
pub enum TrackError {
    #[error("invalid argument in {op}: {reason}")]
    InvalidArgument {
        op: &'static str,
        reason: &'static str,
    },

    #[error("no tracking entry for handle {handle} in {op}")]
    NotFound {
        op: &'static str,
        handle: StreamHandle,
    },

    #[error("misuse in {op}: {reason}")]
    Misuse { op: &'static str, reason: String },

    #[error("platform call failed in {op}")]
    Platform {
        op: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("file '{filename}' is still open (handle {handle}, opened at {open_site}) and cannot be removed")]
    RemoveDenied {
        filename: String,
        handle: StreamHandle,
        open_site: String,
    },

    #[error("registry invariant violated in {op}: {reason}")]
    InternalCorruption {
        op: &'static str,
        reason: &'static str,
    },
}

impl TrackError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TrackError::InvalidArgument { .. } => ErrorKind::InvalidArgument,
            TrackError::NotFound { .. } => ErrorKind::NotFound,
            TrackError::Misuse { .. } => ErrorKind::Misuse,
            TrackError::Platform { .. } => ErrorKind::PlatformFailure,
            TrackError::RemoveDenied { .. } => ErrorKind::Misuse,
            TrackError::InternalCorruption { .. } => ErrorKind::InternalCorruption,
        }
    }

    /// Name of the operation that produced this error.
    pub fn op(&self) -> &'static str {
        match self {
            TrackError::InvalidArgument { op, .. } => op,
            TrackError::NotFound { op, .. } => op,
            TrackError::Misuse { op, .. } => op,
            TrackError::Platform { op, .. } => op,
            TrackError::RemoveDenied { .. } => "remove",
            TrackError::InternalCorruption { op, .. } => op,
        }
    }
}

pub type Result<T> = std::result::Result<T, TrackError>;
