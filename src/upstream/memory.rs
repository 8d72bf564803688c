//! In-process broker
//!
//! [`MemoryBroker`] implements [`Upstream`] without any networking. Routed
//! messages notified or emitted on a channel type are delivered to every open
//! stream for that type, Mbus sessions keep an `Open`/`Closed` state, and
//! every subscribe/close call is counted so callers can check how many
//! upstream subscriptions the proxy actually opened. Close calls only end
//! streams opened by the client id they name.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::mpsc;

use crate::error::{StatusCode, UpstreamError};
use crate::message::{
    Channel, ChannelType, ConfirmResponse, Demand, Mbus, MbusMsg, MbusState, MbusStatus,
    MessageKind, ProviderId, Response, RoutedMessage, Supply, Target,
};
use crate::registry::store::lock;

use super::{MessageStream, Upstream, UpstreamResult};

type Feed<M> = mpsc::UnboundedSender<UpstreamResult<M>>;

/// Stream handed out by [`MemoryBroker`]
#[derive(Debug)]
pub struct MemoryStream<M> {
    rx: mpsc::UnboundedReceiver<UpstreamResult<M>>,
}

impl<M: Send + 'static> MessageStream<M> for MemoryStream<M> {
    async fn recv(&mut self) -> UpstreamResult<Option<M>> {
        match self.rx.recv().await {
            Some(Ok(message)) => Ok(Some(message)),
            Some(Err(e)) => Err(e),
            None => Ok(None),
        }
    }
}

fn open_feed<M>() -> (Feed<M>, MemoryStream<M>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (tx, MemoryStream { rx })
}

/// One upstream subscription and the client that opened it
struct Subscription<M> {
    client_id: u64,
    tx: Feed<M>,
}

/// Per-kind routing state
struct Topic<M> {
    feeds: HashMap<ChannelType, Vec<Subscription<M>>>,
    subscribe_calls: HashMap<ChannelType, usize>,
    close_calls: HashMap<ChannelType, usize>,
    notified: Vec<M>,
    proposed: Vec<M>,
    fail_next_subscribe: Option<UpstreamError>,
}

impl<M: RoutedMessage> Topic<M> {
    fn new() -> Self {
        Self {
            feeds: HashMap::new(),
            subscribe_calls: HashMap::new(),
            close_calls: HashMap::new(),
            notified: Vec::new(),
            proposed: Vec::new(),
            fail_next_subscribe: None,
        }
    }

    fn subscribe(&mut self, channel: &Channel) -> UpstreamResult<MemoryStream<M>> {
        *self.subscribe_calls.entry(channel.channel_type).or_default() += 1;

        if let Some(e) = self.fail_next_subscribe.take() {
            return Err(e);
        }

        let (tx, stream) = open_feed();
        self.feeds
            .entry(channel.channel_type)
            .or_default()
            .push(Subscription {
                client_id: channel.client_id,
                tx,
            });
        Ok(stream)
    }

    /// Deliver to every open stream, returning how many received it
    fn publish(&mut self, message: M) -> usize {
        let Some(feeds) = self.feeds.get_mut(&message.channel_type()) else {
            return 0;
        };
        feeds.retain(|sub| sub.tx.send(Ok(message.clone())).is_ok());
        feeds.len()
    }

    fn fail(&mut self, channel_type: ChannelType, error: UpstreamError) -> usize {
        let feeds = self.feeds.remove(&channel_type).unwrap_or_default();
        feeds
            .into_iter()
            .filter(|sub| sub.tx.send(Err(error.clone())).is_ok())
            .count()
    }

    fn end(&mut self, channel_type: ChannelType) -> usize {
        self.feeds
            .remove(&channel_type)
            .map_or(0, |feeds| feeds.len())
    }

    /// End one client's streams for a channel type
    fn close(&mut self, channel: &Channel) {
        *self.close_calls.entry(channel.channel_type).or_default() += 1;
        if let Some(feeds) = self.feeds.get_mut(&channel.channel_type) {
            feeds.retain(|sub| sub.client_id != channel.client_id);
            if feeds.is_empty() {
                self.feeds.remove(&channel.channel_type);
            }
        }
    }

    /// End every stream a client holds
    fn close_client(&mut self, client_id: u64) {
        self.feeds.retain(|_, feeds| {
            feeds.retain(|sub| sub.client_id != client_id);
            !feeds.is_empty()
        });
    }

    fn open_streams(&self, channel_type: ChannelType) -> usize {
        self.feeds.get(&channel_type).map_or(0, |feeds| {
            feeds.iter().filter(|sub| !sub.tx.is_closed()).count()
        })
    }
}

struct MbusSession {
    state: MbusState,
    feeds: Vec<Feed<MbusMsg>>,
}

struct BrokerState {
    demand: Topic<Demand>,
    supply: Topic<Supply>,
    mbus: HashMap<u64, MbusSession>,
    next_mbus_id: u64,
    selections: Vec<Target>,
    confirms: Vec<Target>,
    closed_providers: Vec<ProviderId>,
}

/// In-process broker
pub struct MemoryBroker {
    state: Mutex<BrokerState>,
}

impl MemoryBroker {
    /// Create an empty broker
    pub fn new() -> Self {
        Self {
            state: Mutex::new(BrokerState {
                demand: Topic::new(),
                supply: Topic::new(),
                mbus: HashMap::new(),
                next_mbus_id: 1,
                selections: Vec::new(),
                confirms: Vec::new(),
                closed_providers: Vec::new(),
            }),
        }
    }

    /// Publish a demand to every open stream of its channel type
    pub fn emit_demand(&self, demand: Demand) -> usize {
        lock(&self.state).demand.publish(demand)
    }

    /// Publish a supply to every open stream of its channel type
    pub fn emit_supply(&self, supply: Supply) -> usize {
        lock(&self.state).supply.publish(supply)
    }

    /// Make the next subscribe call of `kind` fail with `error`
    pub fn fail_next_subscribe(&self, kind: MessageKind, error: UpstreamError) {
        let mut state = lock(&self.state);
        match kind {
            MessageKind::Demand => state.demand.fail_next_subscribe = Some(error),
            MessageKind::Supply => state.supply.fail_next_subscribe = Some(error),
        }
    }

    /// Fail every open stream of a channel type
    pub fn fail_streams(
        &self,
        kind: MessageKind,
        channel_type: ChannelType,
        error: UpstreamError,
    ) -> usize {
        let mut state = lock(&self.state);
        match kind {
            MessageKind::Demand => state.demand.fail(channel_type, error),
            MessageKind::Supply => state.supply.fail(channel_type, error),
        }
    }

    /// End every open stream of a channel type normally
    pub fn end_streams(&self, kind: MessageKind, channel_type: ChannelType) -> usize {
        let mut state = lock(&self.state);
        match kind {
            MessageKind::Demand => state.demand.end(channel_type),
            MessageKind::Supply => state.supply.end(channel_type),
        }
    }

    /// Number of subscribe calls received for a channel type
    pub fn subscribe_calls(&self, kind: MessageKind, channel_type: ChannelType) -> usize {
        let state = lock(&self.state);
        let calls = match kind {
            MessageKind::Demand => &state.demand.subscribe_calls,
            MessageKind::Supply => &state.supply.subscribe_calls,
        };
        calls.get(&channel_type).copied().unwrap_or(0)
    }

    /// Number of close calls received for a channel type
    pub fn close_calls(&self, kind: MessageKind, channel_type: ChannelType) -> usize {
        let state = lock(&self.state);
        let calls = match kind {
            MessageKind::Demand => &state.demand.close_calls,
            MessageKind::Supply => &state.supply.close_calls,
        };
        calls.get(&channel_type).copied().unwrap_or(0)
    }

    /// Number of streams still open for a channel type
    pub fn open_streams(&self, kind: MessageKind, channel_type: ChannelType) -> usize {
        let state = lock(&self.state);
        match kind {
            MessageKind::Demand => state.demand.open_streams(channel_type),
            MessageKind::Supply => state.supply.open_streams(channel_type),
        }
    }

    /// Demands received through `NotifyDemand`
    pub fn notified_demands(&self) -> Vec<Demand> {
        lock(&self.state).demand.notified.clone()
    }

    /// Supplies received through `NotifySupply`
    pub fn notified_supplies(&self) -> Vec<Supply> {
        lock(&self.state).supply.notified.clone()
    }

    /// Demands received through `ProposeDemand`
    pub fn proposed_demands(&self) -> Vec<Demand> {
        lock(&self.state).demand.proposed.clone()
    }

    /// Supplies received through `ProposeSupply`
    pub fn proposed_supplies(&self) -> Vec<Supply> {
        lock(&self.state).supply.proposed.clone()
    }

    /// Targets received through `SelectSupply`/`SelectDemand`
    pub fn selections(&self) -> Vec<Target> {
        lock(&self.state).selections.clone()
    }

    /// Targets received through `Confirm`
    pub fn confirms(&self) -> Vec<Target> {
        lock(&self.state).confirms.clone()
    }

    /// Providers whose channels were closed with `CloseAllChannels`
    pub fn closed_providers(&self) -> Vec<ProviderId> {
        lock(&self.state).closed_providers.clone()
    }

    /// State of an Mbus, `None` if it was never created
    pub fn mbus_state(&self, mbus_id: u64) -> Option<MbusState> {
        lock(&self.state).mbus.get(&mbus_id).map(|s| s.state)
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

fn unknown_mbus(mbus_id: u64) -> UpstreamError {
    UpstreamError::new(StatusCode::NotFound, format!("mbus {} not found", mbus_id))
}

impl Upstream for MemoryBroker {
    type DemandStream = MemoryStream<Demand>;
    type SupplyStream = MemoryStream<Supply>;
    type MbusStream = MemoryStream<MbusMsg>;

    async fn notify_demand(&self, demand: Demand) -> UpstreamResult<Response> {
        let mut state = lock(&self.state);
        state.demand.notified.push(demand.clone());
        state.demand.publish(demand);
        Ok(Response::ok())
    }

    async fn notify_supply(&self, supply: Supply) -> UpstreamResult<Response> {
        let mut state = lock(&self.state);
        state.supply.notified.push(supply.clone());
        state.supply.publish(supply);
        Ok(Response::ok())
    }

    async fn propose_demand(&self, demand: Demand) -> UpstreamResult<Response> {
        let mut state = lock(&self.state);
        state.demand.proposed.push(demand.clone());
        state.demand.publish(demand);
        Ok(Response::ok())
    }

    async fn propose_supply(&self, supply: Supply) -> UpstreamResult<Response> {
        let mut state = lock(&self.state);
        state.supply.proposed.push(supply.clone());
        state.supply.publish(supply);
        Ok(Response::ok())
    }

    async fn select_supply(&self, target: Target) -> UpstreamResult<ConfirmResponse> {
        let mbus_id = target.mbus_id;
        lock(&self.state).selections.push(target);
        Ok(ConfirmResponse {
            ok: true,
            mbus_id,
            ..Default::default()
        })
    }

    async fn select_demand(&self, target: Target) -> UpstreamResult<ConfirmResponse> {
        let mbus_id = target.mbus_id;
        lock(&self.state).selections.push(target);
        Ok(ConfirmResponse {
            ok: true,
            mbus_id,
            ..Default::default()
        })
    }

    async fn confirm(&self, target: Target) -> UpstreamResult<Response> {
        lock(&self.state).confirms.push(target);
        Ok(Response::ok())
    }

    async fn subscribe_demand(&self, channel: Channel) -> UpstreamResult<MemoryStream<Demand>> {
        lock(&self.state).demand.subscribe(&channel)
    }

    async fn subscribe_supply(&self, channel: Channel) -> UpstreamResult<MemoryStream<Supply>> {
        lock(&self.state).supply.subscribe(&channel)
    }

    async fn close_demand_channel(&self, channel: Channel) -> UpstreamResult<Response> {
        lock(&self.state).demand.close(&channel);
        Ok(Response::ok())
    }

    async fn close_supply_channel(&self, channel: Channel) -> UpstreamResult<Response> {
        lock(&self.state).supply.close(&channel);
        Ok(Response::ok())
    }

    async fn close_all_channels(&self, provider: ProviderId) -> UpstreamResult<Response> {
        let mut state = lock(&self.state);
        state.closed_providers.push(provider);
        state.demand.close_client(provider.client_id);
        state.supply.close_client(provider.client_id);
        Ok(Response::ok())
    }

    async fn create_mbus(&self, mbus: Mbus) -> UpstreamResult<Mbus> {
        let mut state = lock(&self.state);
        let mbus_id = if mbus.mbus_id == 0 {
            let id = state.next_mbus_id;
            state.next_mbus_id += 1;
            id
        } else {
            mbus.mbus_id
        };

        state.mbus.entry(mbus_id).or_insert_with(|| MbusSession {
            state: MbusState::Open,
            feeds: Vec::new(),
        });

        Ok(Mbus { mbus_id, ..mbus })
    }

    async fn send_mbus_msg(&self, msg: MbusMsg) -> UpstreamResult<Response> {
        let mut state = lock(&self.state);
        let session = state
            .mbus
            .get_mut(&msg.mbus_id)
            .filter(|s| s.state == MbusState::Open)
            .ok_or_else(|| unknown_mbus(msg.mbus_id))?;

        session.feeds.retain(|tx| tx.send(Ok(msg.clone())).is_ok());
        Ok(Response::ok())
    }

    async fn get_mbus_state(&self, mbus: Mbus) -> UpstreamResult<MbusStatus> {
        let state = lock(&self.state);
        let session = state
            .mbus
            .get(&mbus.mbus_id)
            .ok_or_else(|| unknown_mbus(mbus.mbus_id))?;

        Ok(MbusStatus {
            mbus_id: mbus.mbus_id,
            state: session.state,
            subscribers: session.feeds.iter().filter(|tx| !tx.is_closed()).count() as u32,
        })
    }

    async fn close_mbus(&self, mbus: Mbus) -> UpstreamResult<Response> {
        let mut state = lock(&self.state);
        let session = state
            .mbus
            .get_mut(&mbus.mbus_id)
            .ok_or_else(|| unknown_mbus(mbus.mbus_id))?;

        session.state = MbusState::Closed;
        session.feeds.clear();
        Ok(Response::ok())
    }

    async fn subscribe_mbus(&self, mbus: Mbus) -> UpstreamResult<MemoryStream<MbusMsg>> {
        let mut state = lock(&self.state);
        let session = state
            .mbus
            .get_mut(&mbus.mbus_id)
            .filter(|s| s.state == MbusState::Open)
            .ok_or_else(|| unknown_mbus(mbus.mbus_id))?;

        let (tx, stream) = open_feed();
        session.feeds.push(tx);
        Ok(stream)
    }
}
