//! Error types for rill-core.

use thiserror::Error;

use crate::spec::ObjectId;

/// Result type for rill-core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in rill-core.
///
/// Errors fall into two groups. Protocol errors (see [`Error::is_fatal`])
/// mean the governor and the executor no longer agree on the contract and
/// the executor must exit. Everything else is reported back to the governor
/// as a failed task and the executor keeps serving calls.
#[derive(Debug, Error)]
pub enum Error {
    /// The governor closed the channel before a full frame arrived.
    #[error("connection to governor lost")]
    ConnectionLost,

    /// IPC communication error on the governor channel.
    #[error("IPC error: {0}")]
    Ipc(String),

    /// A frame could not be decoded or violated the message contract.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A `cached` descriptor referenced an object this executor does not hold.
    #[error("object {0} is not in the executor cache")]
    UnknownCachedObject(ObjectId),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Deserialization error.
    #[error("deserialization error: {0}")]
    Deserialization(String),

    /// Two content types cannot describe the same data.
    #[error("content types {left:?} and {right:?} are incompatible")]
    ContentTypeMismatch { left: String, right: String },

    /// Content type this executor cannot encode or decode.
    #[error("unsupported content type: {0}")]
    UnsupportedContentType(String),

    /// The closure returned a different number of outputs than declared.
    #[error("task returned {actual} outputs, expected {expected}")]
    OutputArity { expected: usize, actual: usize },

    /// The closure returned a value that cannot become an output.
    #[error("invalid task output: {0}")]
    OutputType(String),

    /// A path handed to the execution context is not a valid relative path.
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// The closure blob names a function that is not registered.
    #[error("function not registered: {0}")]
    UnknownFunction(String),

    /// A function with this name is already registered.
    #[error("function already registered: {0}")]
    AlreadyRegistered(String),

    /// A placeholder in the argument stream could not be resolved.
    #[error("placeholder error: {0}")]
    Placeholder(String),

    /// The task type is not handled by this executor kind.
    #[error("task type {task_type:?} cannot run on executor type {executor_type:?}")]
    TaskType {
        task_type: String,
        executor_type: String,
    },

    /// The task function returned an error.
    #[error("task failed: {0}")]
    Task(String),

    /// The task function panicked.
    #[error("task panicked: {0}")]
    TaskPanic(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether this error ends the executor process.
    ///
    /// Fatal errors indicate a governor/executor contract violation or a
    /// broken channel; there is no recovery from them.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::ConnectionLost
                | Error::Ipc(_)
                | Error::Protocol(_)
                | Error::UnknownCachedObject(_)
        )
    }
}
