//! Materialized data objects.

use std::borrow::Cow;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use crate::error::{Error, Result};
use crate::spec::{DataType, ObjectId};

use super::content_type;
use super::value::Value;

/// Where the bytes of a data instance live.
///
/// Exactly one backing exists per instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Storage {
    /// Bytes held in memory.
    Memory(Vec<u8>),
    /// A file or directory on disk.
    Path(PathBuf),
}

/// Local materialization of one data value.
///
/// Instances that carry an [`ObjectId`] correspond to objects the governor
/// knows about and may live in the object cache. Instances without one are
/// task-local values (for example freshly produced outputs).
///
/// Decoding is lazy and driven by the content type; the first successful
/// [`load`](DataInstance::load) is memoized.
#[derive(Debug)]
pub struct DataInstance {
    /// Backing bytes or path.
    storage: Storage,
    /// Blob or directory.
    data_type: DataType,
    /// Content type, if known.
    content_type: Option<String>,
    /// Governor-side identity, if any.
    object_id: Option<ObjectId>,
    /// Memoized result of `load()`.
    loaded: OnceLock<Value>,
}

impl DataInstance {
    /// Create an instance.
    ///
    /// # Errors
    /// Returns [`Error::InvalidPath`] for a directory that is not path-backed.
    pub fn new(
        storage: Storage,
        data_type: DataType,
        content_type: Option<String>,
        object_id: Option<ObjectId>,
    ) -> Result<Self> {
        if data_type == DataType::Directory && matches!(storage, Storage::Memory(_)) {
            return Err(Error::InvalidPath(
                "directory data must be backed by a path".to_string(),
            ));
        }

        Ok(Self {
            storage,
            data_type,
            content_type,
            object_id,
            loaded: OnceLock::new(),
        })
    }

    /// In-memory blob.
    pub fn from_bytes(bytes: Vec<u8>, content_type: Option<String>) -> Self {
        Self {
            storage: Storage::Memory(bytes),
            data_type: DataType::Blob,
            content_type,
            object_id: None,
            loaded: OnceLock::new(),
        }
    }

    /// Path-backed blob or directory.
    pub fn from_path(path: impl Into<PathBuf>, data_type: DataType, content_type: Option<String>) -> Self {
        Self {
            storage: Storage::Path(path.into()),
            data_type,
            content_type,
            object_id: None,
            loaded: OnceLock::new(),
        }
    }

    /// Attach a governor-side identity.
    pub fn with_object_id(mut self, object_id: ObjectId) -> Self {
        self.object_id = Some(object_id);
        self
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    pub fn object_id(&self) -> Option<ObjectId> {
        self.object_id
    }

    /// Backing path, if the instance lives on disk.
    pub fn path(&self) -> Option<&Path> {
        match &self.storage {
            Storage::Path(path) => Some(path),
            Storage::Memory(_) => None,
        }
    }

    /// Backing bytes, if the instance lives in memory.
    pub fn memory(&self) -> Option<&[u8]> {
        match &self.storage {
            Storage::Memory(bytes) => Some(bytes),
            Storage::Path(_) => None,
        }
    }

    /// Raw bytes of a blob, reading the file if necessary.
    pub fn read_bytes(&self) -> Result<Cow<'_, [u8]>> {
        if self.data_type == DataType::Directory {
            return Err(Error::UnsupportedContentType(
                "directory objects have no byte content".to_string(),
            ));
        }

        match &self.storage {
            Storage::Memory(bytes) => Ok(Cow::Borrowed(bytes)),
            Storage::Path(path) => Ok(Cow::Owned(fs::read(path)?)),
        }
    }

    /// Decode the instance according to its own content type.
    ///
    /// The decoded value is cached on the instance.
    pub fn load(&self) -> Result<Value> {
        if let Some(value) = self.loaded.get() {
            return Ok(value.clone());
        }

        let value = content_type::decode(&self.read_bytes()?, self.content_type())?;
        // A concurrent load cannot happen; ignoring a lost race is still correct.
        let _ = self.loaded.set(value.clone());
        Ok(value)
    }

    /// Decode the instance as `expected`, merged with its own content type.
    ///
    /// # Errors
    /// Returns [`Error::ContentTypeMismatch`] when the two types are incompatible.
    pub fn load_as(&self, expected: Option<&str>) -> Result<Value> {
        let merged = content_type::merge(expected, self.content_type())?;
        if merged.as_deref() == self.content_type() {
            return self.load();
        }
        content_type::decode(&self.read_bytes()?, merged.as_deref())
    }
}
