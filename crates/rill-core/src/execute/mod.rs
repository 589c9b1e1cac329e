//! Task execution.
//!
//! # Architecture
//!
//! ```text
//! Executor (engine)
//!     │
//!     ├── receive call ──► decode inputs, update ObjectCache
//!     │
//!     ├── FunctionRegistry ──► task function named by the closure blob
//!     │
//!     ├── args::reconstruct ──► Args with placeholders resolved
//!     │
//!     ├── task function(&mut Context, Args)
//!     │
//!     └── outputs::reconcile / normalize ──► result message
//! ```
//!
//! # Module Structure
//!
//! - `args` - Argument stream decoding and placeholder substitution
//! - `context` - Execution context handed to task functions
//! - `engine` - The executor state machine
//! - `outputs` - Return value reconciliation
//! - `registry` - Named task functions

mod args;
mod context;
mod engine;
mod outputs;
mod registry;

pub use args::{Args, encode_keywords, encode_positional, reconstruct};
pub use context::Context;
pub use engine::{Executor, ExecutorState};
pub use outputs::{OutputShape, normalize, reconcile};
pub use registry::{FunctionRef, FunctionRegistry, TaskFn};
