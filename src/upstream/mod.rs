//! Upstream broker session
//!
//! [`Upstream`] is the one logical client the proxy holds to the broker. It
//! mirrors the broker's RPC surface: unary calls return a response, streaming
//! calls return a [`MessageStream`]. Transport details (gRPC channel, TLS,
//! interceptors) live entirely in the implementation.
//!
//! [`memory::MemoryBroker`] is an in-process implementation used by the demos
//! and tests.

use std::future::Future;

use crate::error::UpstreamError;
use crate::message::{
    Channel, ConfirmResponse, Demand, Mbus, MbusMsg, MbusStatus, ProviderId, Response, Supply,
    Target,
};

pub mod memory;

pub use memory::MemoryBroker;

/// Result of an upstream call
pub type UpstreamResult<T> = std::result::Result<T, UpstreamError>;

/// Server-streaming response from the broker
pub trait MessageStream<M>: Send + 'static {
    /// Wait for the next message
    ///
    /// `Ok(None)` is a normal end of stream.
    fn recv(&mut self) -> impl Future<Output = UpstreamResult<Option<M>>> + Send;
}

/// Client session to the upstream broker
///
/// All futures must be `Send`; the proxy drives streams from spawned tasks.
pub trait Upstream: Send + Sync + 'static {
    /// Stream returned by `subscribe_demand`
    type DemandStream: MessageStream<Demand>;
    /// Stream returned by `subscribe_supply`
    type SupplyStream: MessageStream<Supply>;
    /// Stream returned by `subscribe_mbus`
    type MbusStream: MessageStream<MbusMsg>;

    fn notify_demand(&self, demand: Demand)
        -> impl Future<Output = UpstreamResult<Response>> + Send;

    fn notify_supply(&self, supply: Supply)
        -> impl Future<Output = UpstreamResult<Response>> + Send;

    fn propose_demand(
        &self,
        demand: Demand,
    ) -> impl Future<Output = UpstreamResult<Response>> + Send;

    fn propose_supply(
        &self,
        supply: Supply,
    ) -> impl Future<Output = UpstreamResult<Response>> + Send;

    fn select_supply(
        &self,
        target: Target,
    ) -> impl Future<Output = UpstreamResult<ConfirmResponse>> + Send;

    fn select_demand(
        &self,
        target: Target,
    ) -> impl Future<Output = UpstreamResult<ConfirmResponse>> + Send;

    fn confirm(&self, target: Target) -> impl Future<Output = UpstreamResult<Response>> + Send;

    /// Open a demand subscription for one channel type
    fn subscribe_demand(
        &self,
        channel: Channel,
    ) -> impl Future<Output = UpstreamResult<Self::DemandStream>> + Send;

    /// Open a supply subscription for one channel type
    fn subscribe_supply(
        &self,
        channel: Channel,
    ) -> impl Future<Output = UpstreamResult<Self::SupplyStream>> + Send;

    /// Release this client's demand subscription for one channel type
    fn close_demand_channel(
        &self,
        channel: Channel,
    ) -> impl Future<Output = UpstreamResult<Response>> + Send;

    /// Release this client's supply subscription for one channel type
    fn close_supply_channel(
        &self,
        channel: Channel,
    ) -> impl Future<Output = UpstreamResult<Response>> + Send;

    fn close_all_channels(
        &self,
        provider: ProviderId,
    ) -> impl Future<Output = UpstreamResult<Response>> + Send;

    fn create_mbus(&self, mbus: Mbus) -> impl Future<Output = UpstreamResult<Mbus>> + Send;

    fn send_mbus_msg(&self, msg: MbusMsg)
        -> impl Future<Output = UpstreamResult<Response>> + Send;

    fn get_mbus_state(&self, mbus: Mbus)
        -> impl Future<Output = UpstreamResult<MbusStatus>> + Send;

    fn close_mbus(&self, mbus: Mbus) -> impl Future<Output = UpstreamResult<Response>> + Send;

    fn subscribe_mbus(
        &self,
        mbus: Mbus,
    ) -> impl Future<Output = UpstreamResult<Self::MbusStream>> + Send;
}
