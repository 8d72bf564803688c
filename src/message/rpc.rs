//! Request and response envelopes of the broker RPC surface

use super::routed::ChannelType;

/// Subscription request for one channel type
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Channel {
    /// Subscribing client id
    pub client_id: u64,
    /// Channel type to subscribe to
    pub channel_type: ChannelType,
    /// Subscription arguments (JSON)
    pub arg_json: String,
}

impl Channel {
    /// Subscription request for a channel type
    pub fn new(client_id: u64, channel_type: ChannelType) -> Self {
        Self {
            client_id,
            channel_type,
            arg_json: String::new(),
        }
    }
}

/// Selection or confirmation target
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Target {
    /// Message id of this request
    pub id: u64,
    /// Requesting client id
    pub sender_id: u64,
    /// Id of the message being selected or confirmed
    pub target_id: u64,
    /// Channel type
    pub channel_type: ChannelType,
    /// Wait for the peer's reply
    pub wait: bool,
    /// Mbus to attach to the selection
    pub mbus_id: u64,
}

/// Identity of a provider, used by `CloseAllChannels`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProviderId {
    /// Client id
    pub client_id: u64,
}

/// Generic acknowledgement
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Response {
    /// Whether the broker accepted the request
    pub ok: bool,
    /// Human-readable detail
    pub err: String,
}

impl Response {
    /// Successful acknowledgement
    pub fn ok() -> Self {
        Self {
            ok: true,
            err: String::new(),
        }
    }

    /// Rejection with a reason
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self {
            ok: false,
            err: reason.into(),
        }
    }
}

/// Acknowledgement of a selection
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfirmResponse {
    /// Whether the selection was confirmed
    pub ok: bool,
    /// Mbus allocated for the selected pair, if any
    pub mbus_id: u64,
    /// Wait time granted by the peer, in milliseconds
    pub wait_ms: u64,
    /// Human-readable detail
    pub err: String,
}

/// Gateway-to-gateway subscription request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GatewayInfo {
    /// Gateway node id
    pub gateway_id: u64,
    /// Gateway display name
    pub gateway_name: String,
    /// Channel types the gateway relays
    pub channels: Vec<ChannelType>,
}

/// Message forwarded between gateways
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GatewayMsg {
    /// Source gateway id
    pub src_id: u64,
    /// Encoded inner message
    pub payload: Vec<u8>,
}
