//! Broker message model
//!
//! The proxy speaks the same message set as the upstream broker. Routed
//! messages ([`Demand`] and [`Supply`]) are tagged with a [`ChannelType`] and
//! fanned out to every local subscriber of that channel type; Mbus messages
//! are relayed 1:1; everything else is a plain request/response pair.

pub mod mbus;
pub mod routed;
pub mod rpc;

pub use mbus::{Mbus, MbusMsg, MbusState, MbusStatus};
pub use routed::{ChannelType, Demand, MessageKind, RoutedMessage, Supply, Timestamp};
pub use rpc::{
    Channel, ConfirmResponse, GatewayInfo, GatewayMsg, ProviderId, Response, Target,
};
