//! Inter-process communication with the governor.
//!
//! This module provides the framed channel and the protocol messages
//! exchanged over it.

mod channel;
pub mod protocol;

pub use channel::{Channel, MAX_FRAME_LEN};
pub use protocol::{
    CallMessage, DataLocation, ExecutionInfo, ExecutorMessage, GovernorMessage, InputSlot,
    OutputData, PROTOCOL_VERSION, ResultMessage,
};
