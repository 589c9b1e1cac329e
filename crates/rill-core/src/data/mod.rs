//! Data objects as seen by the executor.
//!
//! - `instance` - [`DataInstance`], one materialized object (memory or disk)
//! - `content_type` - content-type merging and content-type driven codecs
//! - `value` - dynamic [`Value`]s and the serialized [`ArgValue`] form

pub mod content_type;
mod instance;
mod value;

pub use instance::{DataInstance, Storage};
pub use value::{ArgValue, Placeholder, Value, decode_native, encode_args, encode_native};
