//! Wire messages exchanged between the governor and an executor.
//!
//! Messages are serde types encoded with bincode and carried in
//! length-prefixed frames (see [`Channel`](super::Channel)).
//! Format: 4-byte length (u32 LE) + bincode-encoded message.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::spec::{ObjectId, ObjectSpec, TaskId, TaskSpec};

/// Protocol identifier sent in the `register` message.
pub const PROTOCOL_VERSION: &str = "bincode-1";

/// Where the data of an input or output lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataLocation {
    /// Inline bytes.
    Memory(Vec<u8>),
    /// A file or directory on the shared local filesystem.
    Path(String),
    /// An object the executor already holds in its cache.
    Cached(ObjectId),
    /// An object the governor already knows about.
    OtherObject(ObjectId),
}

/// One task input as sent with a `call`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputSlot {
    /// Object description.
    pub spec: ObjectSpec,
    /// Object data.
    pub data: DataLocation,
    /// Keep the decoded object in the executor cache.
    pub cache: bool,
}

/// One task output as reported in a `result`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputData {
    /// Output data.
    pub data: DataLocation,
    /// Content type of the produced data.
    pub content_type: Option<String>,
}

/// Execution details attached to every `result`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionInfo {
    /// Start of execution, milliseconds since the Unix epoch.
    pub start_ms: u64,
    /// Wall-clock duration of the call.
    pub duration_ms: u64,
    /// Newline-joined debug messages recorded by the task.
    pub debug: String,
    /// Error text when the task failed.
    pub error: Option<String>,
}

/// Payload of a `call` message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallMessage {
    /// The task to run.
    pub spec: TaskSpec,
    /// Inputs; the first one is always the closure blob.
    pub inputs: Vec<InputSlot>,
    /// Declared outputs, in order.
    pub outputs: Vec<ObjectSpec>,
}

/// Payload of a `result` message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultMessage {
    /// Task the result belongs to.
    pub task: TaskId,
    /// Whether the task succeeded.
    pub success: bool,
    /// Execution details.
    pub info: ExecutionInfo,
    /// Output descriptors; empty on failure.
    pub outputs: Vec<OutputData>,
    /// Input objects newly inserted into the cache by this call; empty on failure.
    pub cached_objects: Vec<ObjectId>,
}

/// Message sent from the governor to an executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GovernorMessage {
    /// Run a task.
    Call(CallMessage),

    /// Evict objects from the executor cache.
    DropCached {
        /// Objects to evict.
        objects: Vec<ObjectId>,
    },
}

/// Message sent from an executor to the governor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutorMessage {
    /// First message on a fresh channel.
    Register {
        /// Protocol identifier, [`PROTOCOL_VERSION`].
        protocol: String,
        /// Identifier assigned by the governor at spawn time.
        executor_id: u32,
        /// Executor kind, matched against task types.
        executor_type: String,
    },

    /// Outcome of a `call`.
    Result(ResultMessage),
}

/// Encode a message payload (without the length prefix).
pub fn encode_message<T: Serialize>(message: &T) -> Result<Vec<u8>> {
    bincode::serde::encode_to_vec(message, bincode::config::standard())
        .map_err(|e| Error::Serialization(format!("Failed to encode IPC message: {}", e)))
}

/// Decode a message payload (without the length prefix).
///
/// Undecodable payloads, including unknown message tags, are protocol errors.
pub fn decode_message<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    let (message, read) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
        .map_err(|e| Error::Protocol(format!("Failed to decode IPC message: {}", e)))?;

    if read != bytes.len() {
        return Err(Error::Protocol(format!(
            "IPC message has {} trailing bytes",
            bytes.len() - read
        )));
    }

    Ok(message)
}
