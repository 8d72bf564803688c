//! Message bus sessions
//!
//! An Mbus is an ad-hoc, session-scoped channel between a handful of
//! providers. The proxy holds no state for it and relays every call 1:1.

use bytes::Bytes;

/// Mbus session handle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Mbus {
    /// Bus id assigned by the broker (0 asks the broker to allocate one)
    pub mbus_id: u64,
    /// Caller's client id
    pub client_id: u64,
    /// Opaque session options (JSON)
    pub arg_json: String,
}

impl Mbus {
    /// Handle for an existing bus
    pub fn new(mbus_id: u64, client_id: u64) -> Self {
        Self {
            mbus_id,
            client_id,
            arg_json: String::new(),
        }
    }
}

/// A message on an Mbus
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MbusMsg {
    /// Message id
    pub msg_id: u64,
    /// Sending client id
    pub sender_id: u64,
    /// Receiving client id, 0 for every member
    pub target_id: u64,
    /// Bus id
    pub mbus_id: u64,
    /// Application-defined message type
    pub msg_type: u32,
    /// Application-defined info string
    pub msg_info: String,
    /// JSON payload
    pub arg_json: String,
    /// Opaque payload
    pub content: Bytes,
}

/// Lifecycle state of an Mbus
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MbusState {
    /// Accepting messages
    #[default]
    Open,
    /// Closed; subscribers have been ended
    Closed,
}

/// Response of `GetMbusState`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MbusStatus {
    /// Bus id
    pub mbus_id: u64,
    /// Current state
    pub state: MbusState,
    /// Number of members currently subscribed
    pub subscribers: u32,
}
