//! Function registry: resolves closure blobs to task functions.
//!
//! The closure blob (input 0 of every task) holds a [`FunctionRef`], the
//! name of a function compiled into the executor. Functions are registered
//! once at startup and looked up per call.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::data::{DataInstance, Value};
use crate::error::{Error, Result};

use super::args::Args;
use super::context::Context;

/// Signature of a task function.
pub type TaskFn = dyn Fn(&mut Context, Args) -> anyhow::Result<Value> + Send + Sync;

/// Serialized content of a closure blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionRef {
    /// Registered function name.
    pub name: String,
}

impl FunctionRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    /// Bytes of a closure blob referring to this function.
    pub fn encode(&self) -> Result<Vec<u8>> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| Error::Serialization(format!("failed to encode function reference: {}", e)))
    }

    /// Read the function reference stored in a closure blob.
    pub fn decode(blob: &DataInstance) -> Result<Self> {
        let bytes = blob.read_bytes()?;
        let (function, _): (FunctionRef, usize) =
            bincode::serde::decode_from_slice(&bytes, bincode::config::standard())
                .map_err(|e| Error::Deserialization(format!("invalid closure blob: {}", e)))?;
        Ok(function)
    }
}

/// Registry of task functions by name.
#[derive(Default)]
pub struct FunctionRegistry {
    functions: HashMap<String, Arc<TaskFn>>,
}

impl FunctionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a function under `name`.
    ///
    /// # Errors
    /// [`Error::AlreadyRegistered`] if the name is taken.
    pub fn register<F>(&mut self, name: impl Into<String>, function: F) -> Result<()>
    where
        F: Fn(&mut Context, Args) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        let name = name.into();
        if self.functions.contains_key(&name) {
            return Err(Error::AlreadyRegistered(name));
        }
        self.functions.insert(name, Arc::new(function));
        Ok(())
    }

    /// Look up a function by name.
    pub fn get(&self, name: &str) -> Result<Arc<TaskFn>> {
        self.functions
            .get(name)
            .cloned()
            .ok_or_else(|| Error::UnknownFunction(name.to_string()))
    }

    /// Resolve the function a closure blob refers to.
    pub fn resolve(&self, blob: &DataInstance) -> Result<(String, Arc<TaskFn>)> {
        let function = FunctionRef::decode(blob)?;
        let resolved = self.get(&function.name)?;
        Ok((function.name, resolved))
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.functions.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl std::fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionRegistry")
            .field("functions", &self.names())
            .finish()
    }
}
