//! Execution context handed to task functions.
//!
//! Provides the per-task scratch area: staging of produced files, debug
//! message accumulation and construction of blob outputs.

use std::collections::HashSet;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use uuid::Uuid;

use crate::data::content_type::{self, TEXT_UTF8};
use crate::data::{DataInstance, Value};
use crate::error::{Error, Result};
use crate::paths::ExecutorDirs;
use crate::spec::{DataType, TaskId};

/// Execution context for a running task.
///
/// Files a task creates in its working directory are lost when the
/// directory is reset for the next task. Staging moves them to a separate
/// area first. Staged artifacts that do not end up as outputs are removed
/// when the task finishes, and all of them are removed if it fails.
pub struct Context {
    /// Task being executed
    task_id: TaskId,
    /// Working directory of the task
    work_dir: PathBuf,
    /// Where staged artifacts are moved to
    staging_dir: PathBuf,
    /// Staged artifacts still owned by this task
    staged: Vec<PathBuf>,
    /// Debug messages, in order
    debug: Vec<String>,
}

impl Context {
    /// Create a context for a task.
    pub fn new(task_id: TaskId, dirs: &ExecutorDirs) -> Self {
        Self {
            task_id,
            work_dir: dirs.work_dir.clone(),
            staging_dir: dirs.staging_dir.clone(),
            staged: Vec::new(),
            debug: Vec::new(),
        }
    }

    /// Get the task ID.
    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    /// Working directory of the task.
    ///
    /// The directory is empty when the task starts.
    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    /// Record a debug message.
    ///
    /// Messages are attached to the task report whether or not it succeeds.
    pub fn debug(&mut self, message: impl Into<String>) {
        self.debug.push(message.into());
    }

    /// All debug messages joined by newlines.
    pub fn debug_text(&self) -> String {
        self.debug.join("\n")
    }

    /// Staged artifacts currently owned by the task.
    pub fn staged(&self) -> &[PathBuf] {
        &self.staged
    }

    /// Move a file out of the working directory and return it as a blob.
    ///
    /// `path` is relative to the task's working directory.
    pub fn stage_file(
        &mut self,
        path: impl AsRef<Path>,
        content_type: Option<&str>,
    ) -> Result<Arc<DataInstance>> {
        self.stage(path.as_ref(), DataType::Blob, content_type.map(str::to_string))
    }

    /// Move a directory out of the working directory.
    ///
    /// `path` is relative to the task's working directory.
    pub fn stage_directory(&mut self, path: impl AsRef<Path>) -> Result<Arc<DataInstance>> {
        self.stage(
            path.as_ref(),
            DataType::Directory,
            Some(content_type::DIRECTORY.to_string()),
        )
    }

    /// Build an in-memory blob from a returned value.
    ///
    /// With no explicit `encode`, bytes pass through unchanged and strings
    /// are stored as UTF-8 text. Any other value needs an encoding.
    /// When both `encode` and `content_type` are given they must be
    /// compatible.
    pub fn blob(
        &self,
        value: Value,
        encode: Option<&str>,
        content_type: Option<&str>,
    ) -> Result<DataInstance> {
        if let Value::Data(_) = value {
            return Err(Error::OutputType(
                "value is already a data instance".to_string(),
            ));
        }

        match (value, encode) {
            (value, Some(encoding)) => {
                if !content_type::is_known(encoding) {
                    return Err(Error::UnsupportedContentType(encoding.to_string()));
                }
                let merged = content_type::merge(Some(encoding), content_type)?;
                let bytes = content_type::encode(&value, encoding)?;
                Ok(DataInstance::from_bytes(bytes, merged))
            }
            (Value::Bytes(bytes), None) => Ok(DataInstance::from_bytes(
                bytes,
                content_type.map(str::to_string),
            )),
            (Value::Str(text), None) => {
                let merged = content_type::merge(Some(TEXT_UTF8), content_type)?;
                Ok(DataInstance::from_bytes(text.into_bytes(), merged))
            }
            (other, None) => Err(Error::OutputType(format!(
                "value of type {} needs an explicit encoding",
                other.type_name()
            ))),
        }
    }

    /// Keep staged artifacts that became outputs; remove the rest.
    pub(crate) fn release(&mut self, outputs: &[Arc<DataInstance>]) {
        let kept: HashSet<&Path> = outputs.iter().filter_map(|o| o.path()).collect();
        let staged = std::mem::take(&mut self.staged);

        for path in staged {
            if kept.contains(path.as_path()) {
                continue;
            }
            remove_artifact(&path);
        }
    }

    /// Remove every staged artifact.
    pub(crate) fn discard(&mut self) {
        for path in self.staged.drain(..) {
            remove_artifact(&path);
        }
    }

    fn stage(
        &mut self,
        path: &Path,
        data_type: DataType,
        content_type: Option<String>,
    ) -> Result<Arc<DataInstance>> {
        let source = self.task_path(path)?;
        let metadata = fs::metadata(&source)?;

        let expected = match data_type {
            DataType::Blob => metadata.is_file(),
            DataType::Directory => metadata.is_dir(),
        };
        if !expected {
            return Err(Error::InvalidPath(format!(
                "{} is not a {}",
                path.display(),
                match data_type {
                    DataType::Blob => "file",
                    DataType::Directory => "directory",
                }
            )));
        }

        let name = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let target = self
            .staging_dir
            .join(format!("{}-{}", Uuid::new_v4().simple(), name));

        fs::rename(&source, &target)?;
        tracing::debug!("Task {} staged {} as {}", self.task_id, path.display(), target.display());

        self.staged.push(target.clone());
        Ok(Arc::new(DataInstance::from_path(target, data_type, content_type)))
    }

    /// Resolve a task-relative path.
    fn task_path(&self, path: &Path) -> Result<PathBuf> {
        if path.is_absolute() {
            return Err(Error::InvalidPath(format!(
                "{} must be relative to the task directory",
                path.display()
            )));
        }
        if path.as_os_str().is_empty()
            || path
                .components()
                .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        {
            return Err(Error::InvalidPath(format!(
                "{} must name an entry inside the task directory",
                path.display()
            )));
        }
        Ok(self.work_dir.join(path))
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        self.discard();
    }
}

fn remove_artifact(path: &Path) {
    let result = if path.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };
    if let Err(e) = result {
        tracing::warn!("Failed to remove staged artifact {}: {}", path.display(), e);
    }
}
