//! Fan-out behaviour of the proxy against the in-process broker

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_test::{assert_err, assert_ok};

use sx_proxy::error::{Error, UpstreamError};
use sx_proxy::message::{Channel, ChannelType, Demand, MessageKind, Supply, Timestamp};
use sx_proxy::registry::{ChannelState, RegistryConfig};
use sx_proxy::{MemoryBroker, ProxyService, Result};

const PROXY_ID: u64 = 99;

type Proxy = ProxyService<MemoryBroker>;

fn setup() -> (Arc<MemoryBroker>, Arc<Proxy>) {
    setup_with(RegistryConfig::default())
}

fn setup_with(config: RegistryConfig) -> (Arc<MemoryBroker>, Arc<Proxy>) {
    let broker = Arc::new(MemoryBroker::new());
    let proxy = Arc::new(ProxyService::with_config(
        Arc::clone(&broker),
        PROXY_ID,
        config,
    ));
    (broker, proxy)
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    let waited = tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "condition not reached in time");
}

fn subscribe_demand(
    proxy: &Arc<Proxy>,
    channel_type: ChannelType,
    capacity: usize,
) -> (JoinHandle<Result<()>>, mpsc::Receiver<Demand>) {
    let (tx, rx) = mpsc::channel(capacity);
    let proxy = Arc::clone(proxy);
    let handle = tokio::spawn(async move {
        let mut sink = tx;
        proxy
            .subscribe_demand(Channel::new(1, channel_type), &mut sink)
            .await
    });
    (handle, rx)
}

fn subscribe_supply(
    proxy: &Arc<Proxy>,
    channel_type: ChannelType,
) -> (JoinHandle<Result<()>>, mpsc::Receiver<Supply>) {
    let (tx, rx) = mpsc::channel(128);
    let proxy = Arc::clone(proxy);
    let handle = tokio::spawn(async move {
        let mut sink = tx;
        proxy
            .subscribe_supply(Channel::new(1, channel_type), &mut sink)
            .await
    });
    (handle, rx)
}

async fn next_id(rx: &mut mpsc::Receiver<Demand>) -> u64 {
    let demand = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for demand")
        .expect("subscriber stream ended");
    demand.id
}

#[tokio::test]
async fn shared_subscription_lifecycle() {
    let (broker, proxy) = setup();
    let registry = Arc::clone(proxy.demand().registry());

    // A subscribes: one upstream subscribe
    let (a, mut a_rx) = subscribe_demand(&proxy, 3, 16);
    wait_until(|| broker.open_streams(MessageKind::Demand, 3) == 1).await;
    assert_eq!(broker.subscribe_calls(MessageKind::Demand, 3), 1);
    wait_until(|| registry.channel_state(3) == Some(ChannelState::Driving)).await;

    // B subscribes: still one
    let (b, mut b_rx) = subscribe_demand(&proxy, 3, 16);
    wait_until(|| registry.subscriber_count(3) == 2).await;
    assert_eq!(broker.subscribe_calls(MessageKind::Demand, 3), 1);

    broker.emit_demand(Demand::new(7, 3));
    broker.emit_demand(Demand::new(8, 3));

    assert_eq!(next_id(&mut a_rx).await, 7);
    assert_eq!(next_id(&mut a_rx).await, 8);
    assert_eq!(next_id(&mut b_rx).await, 7);
    assert_eq!(next_id(&mut b_rx).await, 8);

    // A disconnects: B keeps the channel open
    a.abort();
    let _ = a.await;
    wait_until(|| registry.subscriber_count(3) == 1).await;
    assert!(!registry.is_empty(3));
    assert_eq!(broker.close_calls(MessageKind::Demand, 3), 0);

    broker.emit_demand(Demand::new(9, 3));
    assert_eq!(next_id(&mut b_rx).await, 9);

    // B disconnects: exactly one close
    b.abort();
    let _ = b.await;
    wait_until(|| broker.close_calls(MessageKind::Demand, 3) == 1).await;
    assert!(registry.is_empty(3));

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(broker.close_calls(MessageKind::Demand, 3), 1);
    assert_eq!(broker.subscribe_calls(MessageKind::Demand, 3), 1);
}

#[tokio::test]
async fn every_subscriber_sees_every_message_in_order() {
    let (broker, proxy) = setup();

    let mut subscribers = Vec::new();
    for _ in 0..5 {
        subscribers.push(subscribe_demand(&proxy, 4, 64));
    }
    wait_until(|| proxy.demand().registry().subscriber_count(4) == 5).await;
    wait_until(|| broker.open_streams(MessageKind::Demand, 4) == 1).await;

    for id in 1..=20 {
        broker.emit_demand(Demand::new(id, 4));
    }

    for (_, rx) in subscribers.iter_mut() {
        for expected in 1..=20 {
            assert_eq!(next_id(rx).await, expected);
        }
    }

    let stats = proxy.stats();
    assert_eq!(stats.demand.messages_received, 20);
    assert_eq!(stats.demand.deliveries, 100);
    assert_eq!(stats.demand.upstream_opens, 1);
}

#[tokio::test]
async fn concurrent_subscribers_open_one_upstream() {
    let (broker, proxy) = setup();

    let mut handles = Vec::new();
    for _ in 0..50 {
        handles.push(subscribe_demand(&proxy, 5, 4));
    }

    wait_until(|| proxy.demand().registry().subscriber_count(5) == 50).await;
    wait_until(|| broker.open_streams(MessageKind::Demand, 5) == 1).await;
    assert_eq!(broker.subscribe_calls(MessageKind::Demand, 5), 1);
    assert_eq!(proxy.stats().open_upstreams(), 1);

    for (handle, _) in &handles {
        handle.abort();
    }
    wait_until(|| broker.close_calls(MessageKind::Demand, 5) == 1).await;
    assert_eq!(broker.subscribe_calls(MessageKind::Demand, 5), 1);
}

#[tokio::test]
async fn reopen_after_teardown_subscribes_again() {
    let (broker, proxy) = setup();

    let (first, _rx) = subscribe_demand(&proxy, 6, 4);
    wait_until(|| broker.open_streams(MessageKind::Demand, 6) == 1).await;
    first.abort();
    wait_until(|| broker.close_calls(MessageKind::Demand, 6) == 1).await;
    assert_eq!(broker.open_streams(MessageKind::Demand, 6), 0);

    let (_second, mut rx) = subscribe_demand(&proxy, 6, 4);
    wait_until(|| broker.open_streams(MessageKind::Demand, 6) == 1).await;
    assert_eq!(broker.subscribe_calls(MessageKind::Demand, 6), 2);

    broker.emit_demand(Demand::new(1, 6));
    assert_eq!(next_id(&mut rx).await, 1);
}

#[tokio::test]
async fn failed_send_only_removes_that_subscriber() {
    let (broker, proxy) = setup();

    let (_a, mut a_rx) = subscribe_demand(&proxy, 2, 16);
    let (b, b_rx) = subscribe_demand(&proxy, 2, 16);
    let (_c, mut c_rx) = subscribe_demand(&proxy, 2, 16);
    wait_until(|| proxy.demand().registry().subscriber_count(2) == 3).await;
    wait_until(|| broker.open_streams(MessageKind::Demand, 2) == 1).await;

    // B's downstream goes away
    drop(b_rx);

    broker.emit_demand(Demand::new(1, 2));
    let result = b.await.unwrap();
    assert!(matches!(result, Err(Error::Downstream(_))));

    for id in 2..=5 {
        broker.emit_demand(Demand::new(id, 2));
    }
    for rx in [&mut a_rx, &mut c_rx] {
        for expected in 1..=5 {
            assert_eq!(next_id(rx).await, expected);
        }
    }

    assert_eq!(proxy.demand().registry().subscriber_count(2), 2);
    assert_eq!(broker.close_calls(MessageKind::Demand, 2), 0);
    assert_eq!(proxy.stats().demand.send_failures, 1);
}

#[tokio::test]
async fn slow_subscriber_is_disconnected() {
    let config = RegistryConfig::default()
        .queue_capacity(1)
        .send_timeout(Duration::from_millis(50));
    let (broker, proxy) = setup_with(config);

    // Nobody reads `slow_rx` until the end
    let (slow, mut slow_rx) = subscribe_demand(&proxy, 7, 1);
    let (_fast, mut fast_rx) = subscribe_demand(&proxy, 7, 64);
    wait_until(|| proxy.demand().registry().subscriber_count(7) == 2).await;
    wait_until(|| broker.open_streams(MessageKind::Demand, 7) == 1).await;

    for id in 1..=6 {
        broker.emit_demand(Demand::new(id, 7));
    }
    for expected in 1..=6 {
        assert_eq!(next_id(&mut fast_rx).await, expected);
    }
    assert_eq!(proxy.demand().registry().subscriber_count(7), 1);
    assert_eq!(proxy.stats().demand.evictions, 1);

    // The slow subscriber gets what was already buffered, then the error
    let mut seen = Vec::new();
    while let Some(demand) = slow_rx.recv().await {
        seen.push(demand.id);
    }
    assert!(!seen.is_empty());
    assert!(seen.windows(2).all(|w| w[0] < w[1]));
    let result = slow.await.unwrap();
    assert!(matches!(
        result,
        Err(Error::SlowConsumer {
            kind: MessageKind::Demand,
            channel_type: 7
        })
    ));
}

#[tokio::test]
async fn stalled_subscriber_handler_ends_after_eviction() {
    let config = RegistryConfig::default()
        .queue_capacity(1)
        .send_timeout(Duration::from_millis(30));
    let (broker, proxy) = setup_with(config);

    // Keep the receiver alive but never read it
    let (stalled, _stalled_rx) = subscribe_demand(&proxy, 13, 1);
    wait_until(|| broker.open_streams(MessageKind::Demand, 13) == 1).await;

    for id in 1..=5 {
        broker.emit_demand(Demand::new(id, 13));
    }

    let result = tokio::time::timeout(Duration::from_secs(5), stalled)
        .await
        .expect("handler still blocked downstream")
        .unwrap();
    assert!(matches!(
        result,
        Err(Error::SlowConsumer {
            kind: MessageKind::Demand,
            channel_type: 13
        })
    ));

    wait_until(|| broker.close_calls(MessageKind::Demand, 13) == 1).await;
    assert!(proxy.demand().registry().is_empty(13));
    assert_eq!(proxy.stats().demand.evictions, 1);
}

#[tokio::test]
async fn upstream_subscribe_failure_reaches_caller() {
    let (broker, proxy) = setup();
    broker.fail_next_subscribe(MessageKind::Supply, UpstreamError::unavailable("broker down"));

    let (handle, _rx) = subscribe_supply(&proxy, 1);
    let result = handle.await.unwrap();
    assert!(matches!(result, Err(Error::Upstream(_))));
    assert!(proxy.supply().registry().is_empty(1));
    assert_eq!(proxy.stats().supply.upstream_failures, 1);

    // The next subscriber starts over
    let (_handle, mut rx) = subscribe_supply(&proxy, 1);
    wait_until(|| broker.open_streams(MessageKind::Supply, 1) == 1).await;
    broker.emit_supply(Supply::new(5, 1));
    assert_eq!(rx.recv().await.map(|s| s.id), Some(5));
}

#[tokio::test]
async fn upstream_stream_error_reaches_every_subscriber() {
    let (broker, proxy) = setup();

    let (a, _a_rx) = subscribe_demand(&proxy, 8, 4);
    let (b, _b_rx) = subscribe_demand(&proxy, 8, 4);
    wait_until(|| proxy.demand().registry().subscriber_count(8) == 2).await;
    wait_until(|| broker.open_streams(MessageKind::Demand, 8) == 1).await;

    broker.fail_streams(MessageKind::Demand, 8, UpstreamError::unavailable("reset"));

    assert!(matches!(a.await.unwrap(), Err(Error::Upstream(_))));
    assert!(matches!(b.await.unwrap(), Err(Error::Upstream(_))));
    assert!(proxy.demand().registry().is_empty(8));
}

#[tokio::test]
async fn upstream_end_of_stream_ends_subscribers_cleanly() {
    let (broker, proxy) = setup();

    let (a, _a_rx) = subscribe_supply(&proxy, 9);
    let (b, _b_rx) = subscribe_supply(&proxy, 9);
    wait_until(|| proxy.supply().registry().subscriber_count(9) == 2).await;
    wait_until(|| broker.open_streams(MessageKind::Supply, 9) == 1).await;

    broker.end_streams(MessageKind::Supply, 9);

    assert_ok!(a.await.unwrap());
    assert_ok!(b.await.unwrap());
    assert!(proxy.supply().registry().is_empty(9));
    // End of stream is not followed by a close
    assert_eq!(broker.close_calls(MessageKind::Supply, 9), 0);
}

#[tokio::test]
async fn forced_close_ends_all_and_closes_once() {
    let (broker, proxy) = setup();

    let (a, _a_rx) = subscribe_demand(&proxy, 10, 4);
    let (b, _b_rx) = subscribe_demand(&proxy, 10, 4);
    wait_until(|| proxy.demand().registry().subscriber_count(10) == 2).await;
    wait_until(|| broker.open_streams(MessageKind::Demand, 10) == 1).await;

    let response = assert_ok!(proxy.close_demand_channel(Channel::new(1, 10)).await);
    assert!(response.ok);

    assert_ok!(a.await.unwrap());
    assert_ok!(b.await.unwrap());
    assert!(proxy.demand().registry().is_empty(10));

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(broker.close_calls(MessageKind::Demand, 10), 1);
}

#[tokio::test]
async fn close_of_idle_channel_is_still_forwarded() {
    let (broker, proxy) = setup();

    assert_ok!(proxy.close_supply_channel(Channel::new(1, 11)).await);
    assert_eq!(broker.close_calls(MessageKind::Supply, 11), 1);
}

#[tokio::test]
async fn out_of_range_channel_type_is_rejected() {
    let (broker, proxy) = setup_with(RegistryConfig::default().max_channel_type(16));

    let (handle, _rx) = subscribe_demand(&proxy, 16, 4);
    assert!(matches!(handle.await.unwrap(), Err(Error::Registry(_))));
    assert_err!(proxy.close_demand_channel(Channel::new(1, 99)).await);
    assert_eq!(broker.subscribe_calls(MessageKind::Demand, 16), 0);
}

#[tokio::test]
async fn demand_and_supply_are_independent() {
    let (broker, proxy) = setup();

    let (_d, mut d_rx) = subscribe_demand(&proxy, 3, 4);
    let (s, _s_rx) = subscribe_supply(&proxy, 3);
    wait_until(|| broker.open_streams(MessageKind::Demand, 3) == 1).await;
    wait_until(|| broker.open_streams(MessageKind::Supply, 3) == 1).await;

    s.abort();
    wait_until(|| broker.close_calls(MessageKind::Supply, 3) == 1).await;
    assert_eq!(broker.close_calls(MessageKind::Demand, 3), 0);

    broker.emit_demand(Demand::new(1, 3));
    assert_eq!(next_id(&mut d_rx).await, 1);
}

#[tokio::test]
async fn notify_round_trips_to_local_subscribers() {
    let (broker, proxy) = setup();

    let (_a, mut a_rx) = subscribe_demand(&proxy, 12, 4);
    wait_until(|| broker.open_streams(MessageKind::Demand, 12) == 1).await;

    let explicit = Timestamp::new(1_600_000_000, 5);
    let mut stamped = Demand::new(2, 12);
    stamped.ts = Some(explicit);

    assert_ok!(proxy.notify_demand(Demand::new(1, 12)).await);
    assert_ok!(proxy.notify_demand(stamped).await);

    let first = a_rx.recv().await.unwrap();
    assert!(first.ts.is_some_and(|ts| !ts.is_zero()));
    let second = a_rx.recv().await.unwrap();
    assert_eq!(second.ts, Some(explicit));

    let notified = broker.notified_demands();
    assert_eq!(notified.len(), 2);
    assert!(notified[0].ts.is_some());
    assert_eq!(notified[1].ts, Some(explicit));
}

#[tokio::test]
async fn shutdown_releases_every_channel() {
    let (broker, proxy) = setup();

    let (a, _a_rx) = subscribe_demand(&proxy, 1, 4);
    let (b, _b_rx) = subscribe_supply(&proxy, 2);
    wait_until(|| broker.open_streams(MessageKind::Demand, 1) == 1).await;
    wait_until(|| broker.open_streams(MessageKind::Supply, 2) == 1).await;

    assert_eq!(proxy.shutdown().await, 2);

    assert_eq!(broker.close_calls(MessageKind::Demand, 1), 1);
    assert_eq!(broker.close_calls(MessageKind::Supply, 2), 1);
    assert_ok!(a.await.unwrap());
    assert_ok!(b.await.unwrap());
    assert_eq!(proxy.stats().total_subscribers(), 0);
}
