//! Executor directory management.
//!
//! Every executor owns one directory tree for the lifetime of its process:
//!
//! ```text
//! <root>/
//! ├── work/      # Working directory of the current task, emptied per task
//! └── staging/   # Files moved out of work/ that may become task outputs
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::Result;

/// Directory structure owned by one executor.
#[derive(Debug, Clone)]
pub struct ExecutorDirs {
    /// The root directory itself.
    pub root: PathBuf,

    /// Working directory of the running task.
    pub work_dir: PathBuf,

    /// Staging area for task-produced artifacts.
    pub staging_dir: PathBuf,
}

impl ExecutorDirs {
    /// Create the directory structure under `root`.
    ///
    /// Creates all necessary directories if they don't exist. The stored
    /// paths are canonical, so they stay valid after the process changes
    /// its working directory and can be handed to the governor.
    ///
    /// # Errors
    /// Returns an error if directory creation fails.
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        fs::create_dir_all(root.join("work"))?;
        fs::create_dir_all(root.join("staging"))?;

        let root = fs::canonicalize(root)?;
        let work_dir = root.join("work");
        let staging_dir = root.join("staging");

        Ok(Self {
            root,
            work_dir,
            staging_dir,
        })
    }

    /// Empty the working directory.
    ///
    /// Staged artifacts live outside it and survive the reset.
    pub fn reset_work_dir(&self) -> Result<()> {
        if self.work_dir.exists() {
            fs::remove_dir_all(&self.work_dir)?;
        }
        fs::create_dir_all(&self.work_dir)?;
        Ok(())
    }
}
