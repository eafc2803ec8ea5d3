use std::fmt;

use thiserror::Error;

/// Status catalogue of the RPC layer. Every status-carrying error observed
/// by a client, recorded into a log, or replayed out of one uses a code
/// from this table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum StatusCode {
    #[default]
    Ok = 0,
    InvalidRequest = 1,
    InvalidResponse = 2,
    ConnectionFailure = 3,
    HandlerNotFound = 4,
    RequestTimeout = 5,
    RequestHandlerError = 6,
    ResponseHandlerError = 7,
    Cancelled = 8,
    Aborted = 9,
    OutOfMemory = 10,
    OutOfRange = 11,
    Unimplemented = 12,
    Internal = 13,
    Unknown = 14,
    NotFound = 15,
    Unauthenticated = 16,
}

impl From<StatusCode> for i32 {
    fn from(code: StatusCode) -> Self {
        code as i32
    }
}

impl From<i32> for StatusCode {
    fn from(value: i32) -> Self {
        match value {
            0 => StatusCode::Ok,
            1 => StatusCode::InvalidRequest,
            2 => StatusCode::InvalidResponse,
            3 => StatusCode::ConnectionFailure,
            4 => StatusCode::HandlerNotFound,
            5 => StatusCode::RequestTimeout,
            6 => StatusCode::RequestHandlerError,
            7 => StatusCode::ResponseHandlerError,
            8 => StatusCode::Cancelled,
            9 => StatusCode::Aborted,
            10 => StatusCode::OutOfMemory,
            11 => StatusCode::OutOfRange,
            12 => StatusCode::Unimplemented,
            13 => StatusCode::Internal,
            14 => StatusCode::Unknown,
            15 => StatusCode::NotFound,
            16 => StatusCode::Unauthenticated,
            _ => StatusCode::Unknown,
        }
    }
}

impl StatusCode {
    pub fn is_ok(&self) -> bool {
        matches!(self, StatusCode::Ok)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StatusCode::Ok => "OK",
            StatusCode::InvalidRequest => "INVALID_REQUEST",
            StatusCode::InvalidResponse => "INVALID_RESPONSE",
            StatusCode::ConnectionFailure => "CONNECTION_FAILURE",
            StatusCode::HandlerNotFound => "HANDLER_NOT_FOUND",
            StatusCode::RequestTimeout => "REQUEST_TIMEOUT",
            StatusCode::RequestHandlerError => "REQUEST_HANDLER_ERROR",
            StatusCode::ResponseHandlerError => "RESPONSE_HANDLER_ERROR",
            StatusCode::Cancelled => "CANCELLED",
            StatusCode::Aborted => "ABORTED",
            StatusCode::OutOfMemory => "OUT_OF_MEMORY",
            StatusCode::OutOfRange => "OUT_OF_RANGE",
            StatusCode::Unimplemented => "UNIMPLEMENTED",
            StatusCode::Internal => "INTERNAL",
            StatusCode::Unknown => "UNKNOWN",
            StatusCode::NotFound => "NOT_FOUND",
            StatusCode::Unauthenticated => "UNAUTHENTICATED",
        }
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A status-carrying RPC error: a code from the catalogue plus a message.
/// This is what a service returns on failure, what the recorder writes as
/// the terminal entry of a failed call, and what the replayer reproduces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcErr {
    pub code: StatusCode,
    pub message: String,
}

impl RpcErr {
    pub fn new(code: StatusCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn with_status(code: StatusCode) -> Self {
        Self {
            code,
            message: code.as_str().to_string(),
        }
    }
}

impl fmt::Display for RpcErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for RpcErr {}

/// Errors of the log itself: format violations discovered while reading,
/// writer lifecycle violations, and match failures during replay.
#[derive(Error, Debug)]
pub enum ReplayError {
    #[error("unknown log magic {0:?}")]
    UnknownMagic(String),
    #[error("corrupt log: {0}")]
    Corrupt(String),
    #[error("log writer is sealed")]
    Sealed,
    #[error("initial state is already committed to the log")]
    InitialCommitted,
    #[error("recording already failed: {0}")]
    Failed(String),
    #[error("no recorded call matches {method} (request digest {digest})")]
    NoMatch { method: String, digest: String },
    #[error("recorded stream for {method} is exhausted")]
    Exhausted { method: String },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// The error a client observes from a call, recorded or replayed.
#[derive(Error, Debug)]
pub enum RpcError {
    #[error(transparent)]
    Status(#[from] RpcErr),
    #[error("{method}: rejected by callback: {source}")]
    Callback {
        method: String,
        #[source]
        source: anyhow::Error,
    },
    #[error(transparent)]
    Replay(#[from] ReplayError),
    #[error("decode failure: {0}")]
    Decode(#[from] prost::DecodeError),
    #[error("transport failure: {0}")]
    Transport(String),
}

impl RpcError {
    pub fn callback(method: &str, source: anyhow::Error) -> Self {
        RpcError::Callback {
            method: method.to_string(),
            source,
        }
    }

    /// The status recorded for this error when it terminates a logged call.
    /// Non-status failures collapse to `Unknown`, keeping the log encodable.
    pub fn recorded_status(&self) -> RpcErr {
        match self {
            RpcError::Status(status) => status.clone(),
            other => RpcErr::new(StatusCode::Unknown, other.to_string()),
        }
    }

    /// The status carried by this error, if it is a status error.
    pub fn status(&self) -> Option<&RpcErr> {
        match self {
            RpcError::Status(status) => Some(status),
            _ => None,
        }
    }
}
