//! Object cache and wire materialization of data objects.
//!
//! The cache maps governor object ids to instances received earlier, so the
//! governor can refer to them with a cheap `cached` descriptor instead of
//! shipping the data again. Entries only leave the cache when the governor
//! says so (`drop_cached`); they are immutable while cached.

use std::path::PathBuf;
use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::data::{DataInstance, Storage};
use crate::error::{Error, Result};
use crate::ipc::{DataLocation, InputSlot};
use crate::spec::ObjectId;

/// Position of the closure blob among task inputs.
pub const CLOSURE_INPUT: usize = 0;

/// Whether the input at `index` goes into the cache.
///
/// The closure blob is always cached, whatever the governor asked for, so
/// repeated calls of the same function do not ship it again.
pub fn should_cache(index: usize, slot: &InputSlot) -> bool {
    index == CLOSURE_INPUT || slot.cache
}

/// Cache of objects shared with the governor.
#[derive(Debug, Default)]
pub struct ObjectCache {
    /// Cached instances by object id.
    objects: FxHashMap<ObjectId, Arc<DataInstance>>,
}

impl ObjectCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a cached object.
    ///
    /// # Errors
    /// [`Error::UnknownCachedObject`] if the governor and executor disagree
    /// about the cache contents.
    pub fn get(&self, id: ObjectId) -> Result<Arc<DataInstance>> {
        self.objects
            .get(&id)
            .cloned()
            .ok_or(Error::UnknownCachedObject(id))
    }

    /// Check if an object is cached.
    pub fn contains(&self, id: ObjectId) -> bool {
        self.objects.contains_key(&id)
    }

    /// Insert an object. Existing entries are never replaced.
    ///
    /// Returns `true` if the entry is new.
    pub fn insert(&mut self, id: ObjectId, instance: Arc<DataInstance>) -> bool {
        if self.objects.contains_key(&id) {
            return false;
        }
        self.objects.insert(id, instance);
        true
    }

    /// Evict the named objects. Unknown ids are ignored.
    ///
    /// Returns the number of evicted entries.
    pub fn drop_cached(&mut self, ids: &[ObjectId]) -> usize {
        ids.iter()
            .filter(|id| self.objects.remove(*id).is_some())
            .count()
    }

    /// Number of cached objects.
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Check if the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

/// Materialize one task input.
///
/// `cached` and `other_object` descriptors resolve through the cache;
/// `memory` and `path` build a new instance carrying the slot's identity.
pub fn decode_input(slot: &InputSlot, cache: &ObjectCache) -> Result<Arc<DataInstance>> {
    let storage = match &slot.data {
        DataLocation::Cached(id) | DataLocation::OtherObject(id) => {
            if *id != slot.spec.id {
                tracing::warn!(
                    "Input {} refers to cached object {}",
                    slot.spec.id,
                    id
                );
            }
            return cache.get(*id);
        }
        DataLocation::Memory(bytes) => Storage::Memory(bytes.clone()),
        DataLocation::Path(path) => Storage::Path(PathBuf::from(path)),
    };

    let instance = DataInstance::new(
        storage,
        slot.spec.data_type,
        slot.spec.content_type.clone(),
        Some(slot.spec.id),
    )
    .map_err(|e| Error::Protocol(format!("input {}: {}", slot.spec.id, e)))?;

    Ok(Arc::new(instance))
}

/// Describe an output for the governor.
///
/// Instances that already carry an object id are passed through by
/// reference; everything else is sent by path or by value.
pub fn encode_output(instance: &DataInstance) -> Result<DataLocation> {
    if let Some(id) = instance.object_id() {
        return Ok(DataLocation::OtherObject(id));
    }

    match instance.storage() {
        Storage::Path(path) => path
            .to_str()
            .map(|p| DataLocation::Path(p.to_string()))
            .ok_or_else(|| {
                Error::Serialization(format!("output path is not UTF-8: {}", path.display()))
            }),
        Storage::Memory(bytes) => Ok(DataLocation::Memory(bytes.clone())),
    }
}
