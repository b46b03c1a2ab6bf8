//! Protocol engine scenarios
//!
//! End-to-end behavior of the engine against scripted broker traffic:
//! - acknowledgment ordering around device effects
//! - arity, malformed and self-echo handling
//! - event-id monotonicity across reconnects
//! - poll result classification and the connectivity gates

use std::sync::Arc;
use synapselink::engine::{
    DispatchOutcome, EngineSettings, EngineState, PollOutcome, ProtocolEngine,
};
use synapselink::protocol::{decode, CommandCode, EchoPolicy, Frame};
use synapselink::testing::mocks::{
    DeviceCall, Journal, MockDevice, MockFactory, MockLink, TraceEvent,
};
use synapselink::transport::{BrokerEvent, ConnectError, Connected, ServiceError, TransportError};

const TOPIC: &str = "synapsepod-crystal";

struct Harness {
    engine: ProtocolEngine<MockFactory, MockDevice>,
    factory: MockFactory,
    device: MockDevice,
    link: MockLink,
    journal: Journal,
}

fn harness() -> Harness {
    let journal = Journal::new();
    let factory = MockFactory::new().with_journal(journal.clone());
    let device = MockDevice::new().with_journal(journal.clone());
    let link = MockLink::up();

    let engine = ProtocolEngine::new(
        EngineSettings::new(TOPIC),
        factory.clone(),
        device.clone(),
        Arc::new(link.clone()),
    )
    .unwrap();

    Harness {
        engine,
        factory,
        device,
        link,
        journal,
    }
}

async fn connected_harness() -> Harness {
    let mut h = harness();
    tokio_test::assert_ok!(h.engine.connect(false).await);
    h.journal.clear();
    h.factory.latest().unwrap().clear_published();
    h
}

fn published_frames(h: &Harness) -> Vec<Frame> {
    h.factory
        .latest()
        .unwrap()
        .published_payloads()
        .iter()
        .map(|payload| decode(payload, EchoPolicy::Accept).unwrap())
        .collect()
}

#[tokio::test]
async fn test_digital_write_is_acknowledged_before_it_runs() {
    let mut h = connected_harness().await;
    let client = h.factory.latest().unwrap();

    client.push_message(TOPIC, "7:,:7:,:1:,:9");
    let outcome = h.engine.tick().await;

    assert_eq!(outcome, PollOutcome::Serviced { frames: 1 });
    assert_eq!(
        h.journal.events(),
        vec![
            TraceEvent::Published("!4:,:7:,:7:,:1:,:9:,:4".to_string()),
            TraceEvent::Device(DeviceCall::WriteDigital(7, true)),
            TraceEvent::Published("!7:,:7:,:1:,:5".to_string()),
        ]
    );

    let frames = published_frames(&h);
    assert_eq!(frames[0].command, CommandCode::ACKNOWLEDGE);
    assert_eq!(frames[0].param(0), Some("7"));
    assert_eq!(frames[0].parameters.last().map(String::as_str), Some("9"));
    assert!(frames[1].event_id > frames[0].event_id);
}

#[tokio::test]
async fn test_every_publish_goes_to_the_device_topic() {
    let mut h = connected_harness().await;
    let client = h.factory.latest().unwrap();

    client.push_message(TOPIC, "8:,:8:,:3");
    h.engine.tick().await;

    let published = client.published();
    assert_eq!(published.len(), 2);
    assert!(published.iter().all(|(topic, _)| topic == TOPIC));
}

#[tokio::test]
async fn test_wrong_arity_is_acknowledged_but_not_executed() {
    let mut h = connected_harness().await;

    let outcome = h
        .engine
        .dispatch(Frame::new(
            CommandCode::DIGITAL_WRITE,
            vec!["7".to_string()],
            11,
        ))
        .await;

    assert!(matches!(outcome, DispatchOutcome::Failed(_)));
    assert!(h.device.calls().is_empty());

    let frames = published_frames(&h);
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].command, CommandCode::ACKNOWLEDGE);
    assert_eq!(frames[0].parameters, vec!["7", "7", "11"]);
}

#[tokio::test]
async fn test_device_failure_is_contained() {
    let journal = Journal::new();
    let factory = MockFactory::new().with_journal(journal.clone());
    let device = MockDevice::new().failing(synapselink::DeviceError::Hardware(
        "bus stuck".to_string(),
    ));
    let mut engine = ProtocolEngine::new(
        EngineSettings::new(TOPIC),
        factory.clone(),
        device.clone(),
        Arc::new(MockLink::up()),
    )
    .unwrap();
    engine.connect(false).await.unwrap();
    let client = factory.latest().unwrap();
    client.clear_published();

    client.push_message(TOPIC, "6:,:2:,:5");
    client.push_message(TOPIC, "3:,:6");
    assert_eq!(engine.tick().await, PollOutcome::Serviced { frames: 2 });

    // the failed read still got its ack, the heartbeat after it ran normally
    let payloads = client.published_payloads();
    assert_eq!(payloads.len(), 3);
    assert!(payloads[0].starts_with("!4:,:6:,:2:,:5:,:"));
    assert!(payloads[1].starts_with("!4:,:3:,:6:,:"));
    assert!(payloads[2].starts_with("!3:,:"));
    assert_eq!(engine.state(), EngineState::Connected);
}

#[tokio::test]
async fn test_malformed_and_self_echo_frames_produce_nothing() {
    let mut h = connected_harness().await;
    let client = h.factory.latest().unwrap();
    let before = h.engine.last_event_id();

    client.push_message(TOPIC, "notanumber:,:3");
    client.push_message(TOPIC, "garbage");
    client.push_message(TOPIC, "7:,:7:,:x");
    client.push_message(TOPIC, "");
    client.push_message(TOPIC, "!7:,:7:,:1:,:9");

    assert_eq!(h.engine.tick().await, PollOutcome::Serviced { frames: 5 });
    assert!(client.published().is_empty());
    assert!(h.device.calls().is_empty());
    assert_eq!(h.engine.last_event_id(), before);
}

#[tokio::test]
async fn test_retained_and_foreign_topic_messages_are_ignored() {
    let mut h = connected_harness().await;
    let client = h.factory.latest().unwrap();

    client.push_event(BrokerEvent::Message {
        topic: TOPIC.to_string(),
        payload: b"3:,:4".to_vec(),
        retain: true,
    });
    client.push_message("synapsepod-other", "3:,:5");

    assert_eq!(h.engine.tick().await, PollOutcome::Serviced { frames: 0 });
    assert!(client.published().is_empty());
}

#[tokio::test]
async fn test_event_ids_strictly_increase_across_reconnects() {
    let mut h = harness();
    h.engine.connect(false).await.unwrap();
    let first = h.factory.latest().unwrap();

    first.push_message(TOPIC, "3:,:100");
    first.push_message(TOPIC, "2:,:101");
    h.engine.tick().await;
    let mut ids: Vec<u64> = first
        .published_payloads()
        .iter()
        .map(|p| decode(p, EchoPolicy::Accept).unwrap().event_id)
        .collect();

    first.fail_next_service(ServiceError::Network("connection reset".to_string()));
    assert_eq!(h.engine.tick().await, PollOutcome::NetworkReset);
    h.engine.connect(false).await.unwrap();

    let second = h.factory.latest().unwrap();
    second.push_message(TOPIC, "3:,:102");
    h.engine.tick().await;
    ids.extend(
        second
            .published_payloads()
            .iter()
            .map(|p| decode(p, EchoPolicy::Accept).unwrap().event_id),
    );

    assert!(ids.len() >= 7);
    assert!(ids.windows(2).all(|pair| pair[0] < pair[1]), "ids: {ids:?}");

    // the rebuilt session registered a fresh will with an unused id
    let wills: Vec<u64> = h
        .factory
        .options()
        .iter()
        .map(|o| decode(o.last_will.as_deref().unwrap(), EchoPolicy::Accept).unwrap().event_id)
        .collect();
    assert_eq!(wills.len(), 2);
    assert!(wills[1] > wills[0]);
    assert!(!ids.contains(&wills[1]));
}

#[tokio::test]
async fn test_protocol_error_keeps_connection() {
    let mut h = connected_harness().await;
    let client = h.factory.latest().unwrap();

    client.fail_next_service(ServiceError::Protocol("unexpected packet".to_string()));
    assert!(!h.engine.poll().await);
    assert_eq!(h.engine.state(), EngineState::Connected);
    assert_eq!(h.factory.created(), 1);

    // the next tick services normally
    assert!(h.engine.poll().await);
}

#[tokio::test]
async fn test_network_error_forces_reinitialization() {
    let mut h = connected_harness().await;
    let client = h.factory.latest().unwrap();

    client.fail_next_service(ServiceError::Network("broken pipe".to_string()));
    assert!(!h.engine.poll().await);

    assert_eq!(h.factory.created(), 2);
    assert_eq!(h.engine.state(), EngineState::Initialized);
    // the lost session cannot say goodbye
    assert_eq!(client.disconnect_count(), 0);

    assert_eq!(
        h.engine.connect(false).await.unwrap(),
        Connected::Established
    );
    let fresh = h.factory.latest().unwrap();
    assert_eq!(fresh.subscriptions(), vec![TOPIC.to_string()]);
    assert!(fresh.published_payloads()[0].starts_with("!0:,:"));
}

#[tokio::test]
async fn test_poll_while_disconnected_does_nothing() {
    let mut h = harness();
    assert_eq!(h.engine.tick().await, PollOutcome::Disconnected);

    h.engine.initialize(false).await.unwrap();
    assert!(!h.engine.poll().await);
    assert_eq!(h.factory.latest().unwrap().handshake_count(), 0);
}

#[tokio::test]
async fn test_link_down_blocks_handshake() {
    let mut h = harness();
    h.link.set_up(false);

    let result = h.engine.connect(false).await;
    assert!(matches!(result, Err(ConnectError::NoNetwork)));
    assert_eq!(h.engine.state(), EngineState::Initialized);
    assert_eq!(h.factory.latest().unwrap().handshake_count(), 0);

    h.link.set_up(true);
    assert_eq!(
        h.engine.connect(false).await.unwrap(),
        Connected::Established
    );
}

#[tokio::test]
async fn test_handshake_failure_then_retry() {
    let mut h = harness();
    h.engine.initialize(false).await.unwrap();
    let client = h.factory.latest().unwrap();
    client.fail_handshakes(1);

    let result = h.engine.connect(false).await;
    assert!(matches!(result, Err(ConnectError::HandshakeFailed(_))));
    assert!(!h.engine.broker_connected());

    h.engine.connect(false).await.unwrap();
    assert_eq!(client.handshake_count(), 2);
    assert_eq!(h.factory.created(), 1);
    assert_eq!(
        h.engine.connect(false).await.unwrap(),
        Connected::AlreadyConnected
    );
}

#[tokio::test]
async fn test_disconnect_when_not_connected_is_a_no_op() {
    let mut h = harness();
    h.engine.disconnect().await;
    assert_eq!(h.factory.created(), 0);

    h.engine.initialize(false).await.unwrap();
    h.engine.disconnect().await;
    let client = h.factory.latest().unwrap();
    assert!(client.published().is_empty());
    assert_eq!(client.disconnect_count(), 0);
}

#[tokio::test]
async fn test_publish_while_disconnected_fails_without_consuming_ids() {
    let mut h = harness();
    h.engine.initialize(false).await.unwrap();
    let before = h.engine.last_event_id();

    let result = h.engine.send_heartbeat().await;
    assert!(matches!(result, Err(TransportError::NotConnected)));
    assert_eq!(h.engine.last_event_id(), before);
}

#[tokio::test]
async fn test_session_callbacks_resubscribe_and_greet() {
    let mut h = connected_harness().await;
    let client = h.factory.latest().unwrap();

    client.push_event(BrokerEvent::SessionLost("keep alive timeout".to_string()));
    client.push_event(BrokerEvent::SessionEstablished);
    h.engine.tick().await;

    assert_eq!(client.subscriptions(), vec![TOPIC.to_string(), TOPIC.to_string()]);
    assert_eq!(
        published_frames(&h)
            .iter()
            .filter(|f| f.command == CommandCode::HELLO)
            .count(),
        1
    );
    assert_eq!(h.engine.state(), EngineState::Connected);
}

#[tokio::test]
async fn test_interrupted_syscall_rebuilds_instead_of_rebooting() {
    let mut h = connected_harness().await;
    let client = h.factory.latest().unwrap();

    client.fail_next_service(ServiceError::Network("EINTR".to_string()));
    assert_eq!(h.engine.tick().await, PollOutcome::NetworkReset);

    assert_eq!(h.device.reboot_count(), 0);
    assert_eq!(h.factory.created(), 2);
    assert_eq!(h.engine.state(), EngineState::Initialized);
}

#[tokio::test]
async fn test_operator_interrupt_reboots_and_halts() {
    let mut h = connected_harness().await;

    h.engine
        .interrupt_handle()
        .store(true, std::sync::atomic::Ordering::SeqCst);
    assert_eq!(h.engine.tick().await, PollOutcome::Interrupted);
    assert_eq!(h.device.reboot_count(), 1);
    assert_eq!(h.engine.state(), EngineState::Halted);
}

#[tokio::test]
async fn test_burst_of_commands_is_fully_acknowledged() {
    let journal = Journal::new();
    let factory = MockFactory::new()
        .with_journal(journal.clone())
        .with_client_capacity(10);
    let mut engine = ProtocolEngine::new(
        EngineSettings::new(TOPIC),
        factory.clone(),
        MockDevice::new(),
        Arc::new(MockLink::up()),
    )
    .unwrap();
    engine.connect(false).await.unwrap();
    let client = factory.latest().unwrap();
    client.clear_published();

    for event_id in 200..208 {
        client.push_message(TOPIC, &format!("3:,:{event_id}"));
    }
    assert_eq!(engine.tick().await, PollOutcome::Serviced { frames: 8 });

    let frames: Vec<Frame> = client
        .published_payloads()
        .iter()
        .map(|payload| decode(payload, EchoPolicy::Accept).unwrap())
        .collect();
    let acked: Vec<&str> = frames
        .iter()
        .filter(|f| f.command == CommandCode::ACKNOWLEDGE)
        .filter_map(|f| f.parameters.last().map(String::as_str))
        .collect();
    assert_eq!(
        acked,
        vec!["200", "201", "202", "203", "204", "205", "206", "207"]
    );
    assert_eq!(
        frames
            .iter()
            .filter(|f| f.command == CommandCode::HEARTBEAT)
            .count(),
        8
    );
    // one flush to make room mid-batch, one before the tick returns
    assert_eq!(client.flush_count(), 2);
}

#[tokio::test]
async fn test_frames_after_reboot_in_same_batch_are_dropped() {
    let mut h = connected_harness().await;
    let client = h.factory.latest().unwrap();

    client.push_message(TOPIC, "5:,:20");
    client.push_message(TOPIC, "7:,:1:,:1:,:21");
    h.engine.tick().await;

    assert_eq!(h.device.calls(), vec![DeviceCall::Reboot]);
    assert_eq!(h.engine.state(), EngineState::Halted);
    let commands: Vec<CommandCode> = published_frames(&h).iter().map(|f| f.command).collect();
    assert_eq!(commands, vec![CommandCode::ACKNOWLEDGE, CommandCode::REBOOT]);
}

#[tokio::test]
async fn test_shutdown_says_goodbye() {
    let h = connected_harness().await;
    let client = h.factory.latest().unwrap();

    h.engine.shutdown().await;

    let payloads = client.published_payloads();
    assert_eq!(payloads.len(), 1);
    assert!(payloads[0].starts_with("!1:,:"));
    assert_eq!(client.disconnect_count(), 1);
}
