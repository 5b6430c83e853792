//! Error types for every layer of the stack.
//!
//! | Type              | Raised by                    | Reaches the caller as          |
//! |-------------------|------------------------------|--------------------------------|
//! | `CodecError`      | framing / envelope decoding  | `ControllerError::Codec`       |
//! | `TransportError`  | pipe / HTTP channels         | `ControllerError::Transport`   |
//! | `ActionError`     | engine dispatch + handlers   | response `errorCode`           |
//! | `RegistryError`   | registry construction        | engine start-up                |
//! | `EngineError`     | engine construction          | host start-up                  |
//! | `ControllerError` | client session               | returned from `step` / `reset` |

use std::time::Duration;

use thiserror::Error;

use crate::protocol::ErrorCode;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("bad frame magic {0:?}")]
    BadMagic([u8; 2]),
    #[error("unknown message kind {0}")]
    UnknownKind(u8),
    #[error("payload of {len} bytes exceeds the {max} byte limit")]
    PayloadTooLarge { len: usize, max: usize },
    #[error("truncated message: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },
    #[error("frame buffer holds {actual} bytes but the layout needs {expected}")]
    FrameLayout { expected: usize, actual: usize },
    #[error("response reused an object list but none has been received yet")]
    MissingObjectList,
    #[error("response answers sequence {actual}, expected {expected}")]
    SequenceMismatch { expected: u64, actual: u64 },
    #[error("action payload is not a JSON object")]
    NotAnObject,
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum TransportError {
    /// The engine did not answer within the configured window.
    #[error("no response from engine within {0:?}")]
    Timeout(Duration),
    #[error("transport is closed")]
    Closed,
    #[error("unexpected {0} message from engine")]
    UnexpectedMessage(&'static str),
    #[error("http error: {0}")]
    Http(String),
    #[error("engine answered with http status {0}")]
    Status(u16),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Codec(#[from] CodecError),
}

impl TransportError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, TransportError::Timeout(_))
    }
}

/// A failed action as reported in the response envelope.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("{message}")]
pub struct ActionError {
    pub code: ErrorCode,
    pub message: String,
}

impl ActionError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn invalid_action(action: &str) -> Self {
        Self::new(ErrorCode::InvalidAction, format!("Invalid action: {action}"))
    }

    pub fn invalid_argument(action: &str, name: &str) -> Self {
        Self::new(
            ErrorCode::InvalidArgument,
            format!("action: {action} has an invalid argument: {name}"),
        )
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ActionFailed, message)
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum RegistryError {
    #[error("handler class {0} is not declared")]
    UnknownClass(String),
    #[error("handler class {class} declares parent {parent} which is not declared")]
    UnknownParent { class: String, parent: String },
    #[error("{action} declares parameter {param} twice")]
    DuplicateParameter { action: String, param: String },
    #[error("{action} in {class} registers the same signature twice")]
    DuplicateSignature { action: String, class: String },
    #[error("parameter name {0} is reserved by the protocol")]
    ReservedParameter(String),
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("unknown scene {0}")]
    UnknownScene(String),
    #[error("invalid engine configuration: {0}")]
    InvalidConfig(String),
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

#[derive(Debug, Error)]
pub enum ControllerError {
    /// The engine refused to dispatch the action; no simulation step ran.
    #[error("{message}")]
    Dispatch { code: ErrorCode, message: String },
    /// The action ran and failed; only raised in strict mode.
    #[error("{message}")]
    ActionFailed { code: ErrorCode, message: String },
    #[error("parameter {0} supplied twice")]
    DuplicateParameter(String),
    #[error("parameter name {0} is reserved by the protocol")]
    ReservedParameter(String),
    #[error("parameter {name} could not be encoded: {source}")]
    InvalidValue {
        name: String,
        #[source]
        source: serde_json::Error,
    },
    /// A previous transport failure ended this session.
    #[error("session has failed; reset the transport")]
    SessionFailed,
    #[error("session has been stopped")]
    Stopped,
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Codec(#[from] CodecError),
}

impl ControllerError {
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            ControllerError::Dispatch { code, .. } | ControllerError::ActionFailed { code, .. } => {
                Some(*code)
            }
            _ => None,
        }
    }
}
