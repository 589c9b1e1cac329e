//! Executor configuration.

use std::path::PathBuf;

use crate::ipc::MAX_FRAME_LEN;

/// Executor kind announced to the governor by default.
pub const DEFAULT_EXECUTOR_TYPE: &str = "rust";

/// Settings for one executor process.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Identifier assigned by the governor.
    pub executor_id: u32,
    /// Executor kind; task types must start with it.
    pub executor_type: String,
    /// Root of the executor's work and staging directories.
    pub work_root: PathBuf,
    /// Change the process working directory into the task directory
    /// before each call.
    pub change_dir: bool,
    /// Largest message exchanged with the governor.
    pub max_frame_len: usize,
}

impl ExecutorConfig {
    /// Configuration with defaults for everything but the id.
    ///
    /// The work root defaults to `<tmp>/rill-executor-<id>`.
    pub fn new(executor_id: u32) -> Self {
        Self {
            executor_id,
            executor_type: DEFAULT_EXECUTOR_TYPE.to_string(),
            work_root: std::env::temp_dir().join(format!("rill-executor-{}", executor_id)),
            change_dir: false,
            max_frame_len: MAX_FRAME_LEN,
        }
    }

    /// Set the executor kind.
    pub fn with_executor_type(mut self, executor_type: impl Into<String>) -> Self {
        self.executor_type = executor_type.into();
        self
    }

    /// Set the root directory.
    pub fn with_work_root(mut self, work_root: impl Into<PathBuf>) -> Self {
        self.work_root = work_root.into();
        self
    }

    /// Enable or disable changing into the task directory.
    pub fn with_change_dir(mut self, change_dir: bool) -> Self {
        self.change_dir = change_dir;
        self
    }

    /// Lower the message size limit.
    pub fn with_max_frame_len(mut self, max_frame_len: usize) -> Self {
        self.max_frame_len = max_frame_len;
        self
    }
}
