use std::fmt::Display;

use miette::Diagnostic;
use thiserror::Error as ThisError;

use crate::types::FailureKind;

/// Error of a single unit download, kept as data on the failed unit.
#[derive(Debug, Clone, PartialEq, Eq, ThisError)]
pub enum FetchError {
    #[error("request timed out")]
    Timeout,

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("server answered with status {0}")]
    Status(u16),

    #[error("body was truncated: {0}")]
    Body(String),

    #[error("size mismatch: expected {expected} bytes, got {actual}")]
    SizeMismatch { expected: u64, actual: u64 },

    #[error("vendor returned an empty body")]
    Empty,

    #[error("not present in scratch storage")]
    Missing,

    #[error("media tool failed: {0}")]
    Tool(String),

    #[error("could not write to scratch storage: {0}")]
    Io(String),

    #[error("cancelled")]
    Cancelled,
}

impl FetchError {
    /// Whether another attempt may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Timeout
            | FetchError::Connect(_)
            | FetchError::Body(_)
            | FetchError::SizeMismatch { .. }
            | FetchError::Tool(_) => true,
            FetchError::Status(code) => *code >= 500 || *code == 408 || *code == 429,
            FetchError::Empty
            | FetchError::Missing
            | FetchError::Io(_)
            | FetchError::Cancelled => false,
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FetchError::Timeout
        } else if let Some(status) = err.status() {
            FetchError::Status(status.as_u16())
        } else if err.is_connect() || err.is_request() {
            FetchError::Connect(err.to_string())
        } else {
            FetchError::Body(err.to_string())
        }
    }
}

impl From<std::io::Error> for FetchError {
    fn from(err: std::io::Error) -> Self {
        FetchError::Io(err.to_string())
    }
}

#[derive(Debug, ThisError, Diagnostic)]
pub enum Error {
    #[error("Could not discover meetings of channel '{channel}': {reason}")]
    #[diagnostic(
        code(civicrec::discovery),
        help("The whole date is skipped, try again later")
    )]
    Discovery {
        channel: String,
        reason: String,
        /// The endpoint was unreachable rather than unparsable
        transient: bool,
    },

    #[error("Invalid manifest '{manifest_id}': {reason}")]
    #[diagnostic(code(civicrec::validation))]
    Validation { manifest_id: String, reason: String },

    #[error("Could not fetch '{unit}': {source}")]
    #[diagnostic(code(civicrec::fetch))]
    Fetch {
        unit: String,
        #[source]
        source: FetchError,
    },

    #[error("Could not reconstruct meeting '{manifest_id}': {reason}")]
    #[diagnostic(code(civicrec::reconstruction))]
    Reconstruction { manifest_id: String, reason: String },

    #[error("Implausible timecodes for meeting '{manifest_id}': {reason}")]
    #[diagnostic(
        code(civicrec::timecode),
        help("Correct the vendor timecodes manually before processing this meeting again")
    )]
    Timecode { manifest_id: String, reason: String },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(String),
}

impl From<miette::Report> for Error {
    fn from(err: miette::Report) -> Self {
        Error::Other(err.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Other(err.to_string())
    }
}

impl Error {
    /// An unparsable discovery payload
    pub fn discovery(channel: &str, reason: impl Display) -> Self {
        Error::Discovery {
            channel: channel.to_owned(),
            reason: reason.to_string(),
            transient: false,
        }
    }

    /// A discovery request that did not go through
    pub fn unreachable(channel: &str, err: FetchError) -> Self {
        Error::Discovery {
            channel: channel.to_owned(),
            transient: err.is_retryable(),
            reason: err.to_string(),
        }
    }

    pub fn validation(manifest_id: &str, reason: impl Display) -> Self {
        Error::Validation {
            manifest_id: manifest_id.to_owned(),
            reason: reason.to_string(),
        }
    }

    pub fn reconstruction(manifest_id: &str, reason: impl Display) -> Self {
        Error::Reconstruction {
            manifest_id: manifest_id.to_owned(),
            reason: reason.to_string(),
        }
    }

    pub fn timecode(manifest_id: &str, reason: impl Display) -> Self {
        Error::Timecode {
            manifest_id: manifest_id.to_owned(),
            reason: reason.to_string(),
        }
    }

    /// The meeting-level failure kind of this error, if it is one
    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            Error::Validation { .. } => Some(FailureKind::Validation),
            Error::Fetch { .. } => Some(FailureKind::Fetch),
            Error::Reconstruction { .. } => Some(FailureKind::Reconstruction),
            Error::Timecode { .. } => Some(FailureKind::Timecode),
            _ => None,
        }
    }
}

pub fn bail<T>(msg: impl Display) -> Result<T> {
    Err(Error::Other(msg.to_string()))
}

pub type Result<T> = std::result::Result<T, Error>;
