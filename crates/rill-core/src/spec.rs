//! Identities and task/object specifications shared with the governor.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identity of a distributed data object: `(session, id)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectId {
    /// Session the object belongs to.
    pub session_id: i32,
    /// Object number inside the session.
    pub id: i32,
}

impl ObjectId {
    /// Create an object id.
    pub const fn new(session_id: i32, id: i32) -> Self {
        Self { session_id, id }
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.session_id, self.id)
    }
}

/// Identity of a task: `(session, id)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId {
    /// Session the task belongs to.
    pub session_id: i32,
    /// Task number inside the session.
    pub id: i32,
}

impl TaskId {
    /// Create a task id.
    pub const fn new(session_id: i32, id: i32) -> Self {
        Self { session_id, id }
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.session_id, self.id)
    }
}

/// Kind of data carried by an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    /// A flat byte string.
    #[default]
    Blob,
    /// A directory tree. Always backed by a path.
    Directory,
}

/// Governor-side description of a data object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectSpec {
    /// Object identity.
    pub id: ObjectId,
    /// Label of the object within its producing task.
    pub label: String,
    /// Declared content type, if any.
    pub content_type: Option<String>,
    /// Blob or directory.
    pub data_type: DataType,
}

impl ObjectSpec {
    /// Blob spec with no content type.
    pub fn blob(id: ObjectId, label: impl Into<String>) -> Self {
        Self {
            id,
            label: label.into(),
            content_type: None,
            data_type: DataType::Blob,
        }
    }

    /// Set the declared content type.
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }
}

/// Resources requested by a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resources {
    /// Number of CPUs.
    pub cpus: u32,
}

impl Default for Resources {
    fn default() -> Self {
        Self { cpus: 1 }
    }
}

/// Executor-specific task configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskConfig {
    /// Encoded positional argument stream. Empty means no arguments.
    pub args: Vec<u8>,
    /// Encoded keyword argument stream. Empty means no arguments.
    pub kwargs: Vec<u8>,
    /// Load flag used by placeholders that do not carry their own.
    pub auto_load: bool,
    /// Target encoding per declared output, in output order.
    pub encode_outputs: Vec<Option<String>>,
}

/// A task as sent by the governor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSpec {
    /// Task identity.
    pub id: TaskId,
    /// Task type, `<executor type>/<method>`.
    pub task_type: String,
    /// Executor-specific configuration.
    pub config: TaskConfig,
    /// Requested resources.
    pub resources: Resources,
}

impl TaskSpec {
    /// Executor kind this task was built for (the part before `/`).
    pub fn executor_kind(&self) -> &str {
        self.task_type
            .split_once('/')
            .map_or(self.task_type.as_str(), |(kind, _)| kind)
    }
}

/// A declared task output, ready for reconciliation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputSpec {
    /// Output label.
    pub label: String,
    /// Object the output becomes.
    pub id: ObjectId,
    /// Encoding applied to non-data return values, if any.
    pub encode: Option<String>,
    /// Declared content type, if any.
    pub content_type: Option<String>,
    /// Blob or directory.
    pub data_type: DataType,
}

impl OutputSpec {
    /// Zip declared outputs with the task's `encode_outputs` list.
    ///
    /// Outputs beyond the end of the list get no explicit encoding.
    pub fn zip(outputs: &[ObjectSpec], encode_outputs: &[Option<String>]) -> Vec<OutputSpec> {
        outputs
            .iter()
            .enumerate()
            .map(|(index, spec)| OutputSpec {
                label: spec.label.clone(),
                id: spec.id,
                encode: encode_outputs.get(index).cloned().flatten(),
                content_type: spec.content_type.clone(),
                data_type: spec.data_type,
            })
            .collect()
    }
}
