//! Core of the rill task executor.
//!
//! This crate provides:
//! - The governor wire protocol and a length-prefixed message channel
//! - Data instances, content types and the object cache
//! - Argument reconstruction with placeholder substitution
//! - The execution context and the executor engine

pub mod cache;
pub mod config;
pub mod data;
pub mod error;
pub mod execute;
pub mod ipc;
pub mod paths;
pub mod spec;

pub use cache::ObjectCache;
pub use config::ExecutorConfig;
pub use data::{ArgValue, DataInstance, Placeholder, Value};
pub use error::{Error, Result};
pub use execute::{Args, Context, Executor, ExecutorState, FunctionRef, FunctionRegistry};
pub use paths::ExecutorDirs;
pub use spec::{DataType, ObjectId, ObjectSpec, TaskId, TaskSpec};
