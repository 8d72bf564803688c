//! Unary forwarding, Mbus relay and the unsupported gateway calls

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_test::{assert_err, assert_ok};

use sx_proxy::error::{Error, StatusCode};
use sx_proxy::message::{
    Channel, Demand, GatewayInfo, GatewayMsg, Mbus, MbusMsg, MbusState, MessageKind, ProviderId,
    Supply, Target,
};
use sx_proxy::{MemoryBroker, ProxyService, Result};

fn setup() -> (Arc<MemoryBroker>, Arc<ProxyService<MemoryBroker>>) {
    let broker = Arc::new(MemoryBroker::new());
    let proxy = Arc::new(ProxyService::new(Arc::clone(&broker), 42));
    (broker, proxy)
}

#[tokio::test]
async fn unary_calls_are_forwarded_unchanged() {
    let (broker, proxy) = setup();

    let mut supply = Supply::new(11, 2);
    supply.name = "taxi".into();
    assert_ok!(proxy.propose_supply(supply.clone()).await);
    assert_ok!(proxy.propose_demand(Demand::new(12, 2)).await);

    // Propose does not stamp
    assert_eq!(broker.proposed_supplies(), vec![supply]);
    assert_eq!(broker.proposed_demands()[0].ts, None);

    let target = Target {
        id: 1,
        sender_id: 2,
        target_id: 11,
        channel_type: 2,
        mbus_id: 5,
        ..Default::default()
    };
    let selected = assert_ok!(proxy.select_supply(target.clone()).await);
    assert!(selected.ok);
    assert_eq!(selected.mbus_id, 5);
    assert_ok!(proxy.select_demand(target.clone()).await);
    assert_ok!(proxy.confirm(target.clone()).await);

    assert_eq!(broker.selections().len(), 2);
    assert_eq!(broker.confirms(), vec![target]);
}

#[tokio::test]
async fn notify_supply_stamps_missing_timestamp() {
    let (broker, proxy) = setup();

    assert_ok!(proxy.notify_supply(Supply::new(1, 4)).await);

    let notified = broker.notified_supplies();
    assert_eq!(notified.len(), 1);
    assert!(notified[0].ts.is_some_and(|ts| !ts.is_zero()));
}

fn spawn_demand_subscriber(
    proxy: &Arc<ProxyService<MemoryBroker>>,
    channel_type: u32,
) -> (JoinHandle<Result<()>>, mpsc::Receiver<Demand>) {
    let (tx, rx) = mpsc::channel(4);
    let proxy = Arc::clone(proxy);
    let handle = tokio::spawn(async move {
        let mut sink = tx;
        proxy
            .subscribe_demand(Channel::new(1, channel_type), &mut sink)
            .await
    });
    (handle, rx)
}

async fn wait_for_upstream(broker: &MemoryBroker, channel_type: u32) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while broker.open_streams(MessageKind::Demand, channel_type) == 0 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .expect("upstream never opened");
}

#[tokio::test]
async fn close_all_channels_of_other_provider_keeps_subscribers() {
    let (broker, proxy) = setup();

    let (subscriber, _rx) = spawn_demand_subscriber(&proxy, 3);
    wait_for_upstream(&broker, 3).await;

    let provider = ProviderId { client_id: 1 };
    assert_ok!(proxy.close_all_channels(provider).await);
    assert_eq!(broker.closed_providers(), vec![provider]);

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!subscriber.is_finished());
    assert_eq!(proxy.demand().registry().subscriber_count(3), 1);
    assert_eq!(broker.open_streams(MessageKind::Demand, 3), 1);

    subscriber.abort();
}

#[tokio::test]
async fn close_all_channels_of_proxy_ends_local_subscribers() {
    let (broker, proxy) = setup();

    let (subscriber, _rx) = spawn_demand_subscriber(&proxy, 3);
    wait_for_upstream(&broker, 3).await;

    let provider = ProviderId {
        client_id: proxy.client_id(),
    };
    assert_ok!(proxy.close_all_channels(provider).await);

    assert_ok!(subscriber.await.unwrap());
    assert!(proxy.demand().registry().is_empty(3));
}

#[tokio::test]
async fn mbus_relay_lifecycle() {
    let (broker, proxy) = setup();

    let mbus = assert_ok!(proxy.create_mbus(Mbus::new(0, 42)).await);
    assert_ne!(mbus.mbus_id, 0);

    let (tx, mut rx) = mpsc::channel(8);
    let relay = {
        let proxy = Arc::clone(&proxy);
        let mbus = mbus.clone();
        tokio::spawn(async move {
            let mut sink = tx;
            proxy.subscribe_mbus(mbus, &mut sink).await
        })
    };

    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let status = proxy.get_mbus_state(mbus.clone()).await.unwrap();
            if status.subscribers == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .expect("mbus subscriber never attached");

    let msg = MbusMsg {
        msg_id: 1,
        mbus_id: mbus.mbus_id,
        msg_info: "hello".into(),
        ..Default::default()
    };
    assert_ok!(proxy.send_mbus_msg(msg.clone()).await);
    assert_eq!(rx.recv().await, Some(msg.clone()));

    assert_ok!(proxy.send_msg(MbusMsg { msg_id: 2, ..msg }).await);
    assert_eq!(rx.recv().await.map(|m| m.msg_id), Some(2));

    assert_ok!(proxy.close_mbus(mbus.clone()).await);
    assert_ok!(relay.await.unwrap());
    assert_eq!(broker.mbus_state(mbus.mbus_id), Some(MbusState::Closed));
}

#[tokio::test]
async fn unknown_mbus_is_reported() {
    let (_broker, proxy) = setup();

    let (tx, _rx) = mpsc::channel::<MbusMsg>(1);
    let mut sink = tx;
    let result = proxy.subscribe_mbus(Mbus::new(77, 42), &mut sink).await;
    match result {
        Err(Error::Upstream(e)) => assert_eq!(e.code, StatusCode::NotFound),
        other => panic!("unexpected result: {:?}", other),
    }
}

#[tokio::test]
async fn gateway_calls_are_unimplemented() {
    let (_broker, proxy) = setup();

    let (tx, _rx) = mpsc::channel::<GatewayMsg>(1);
    let mut sink = tx;
    let result = proxy
        .subscribe_gateway(GatewayInfo::default(), &mut sink)
        .await;
    assert!(matches!(result, Err(Error::Unimplemented("SubscribeGateway"))));

    let err = assert_err!(proxy.forward_to_gateway(GatewayMsg::default()).await);
    assert!(matches!(err, Error::Unimplemented(_)));
    assert!(!err.is_fatal());
}
