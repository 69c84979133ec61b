// SPDX-License-Identifier: MPL-2.0

//! Timeout Tests
//!
//! Connack, ping and acknowledgement timeouts of the lifecycle engine:
//! - Connack timeout turns into a connection failure and schedules a retry
//! - Unanswered PINGREQ drops the connection
//! - Ack timeout fails only the operation that timed out

use mqtt5_lifecycle::mqtt_client::commands::{PublishCommand, QoS, SubscribeCommand};
use mqtt5_lifecycle::mqtt_client::engine::{ClientState, MqttEngine};
use mqtt5_lifecycle::mqtt_client::events::ClientEvent;
use mqtt5_lifecycle::mqtt_client::opts::{JitterMode, MqttClientOptions};
use mqtt5_lifecycle::mqtt_client::results::ConnAckPacket;
use mqtt5_lifecycle::mqtt_client::transport::{TransportEvent, TransportRequest};
use mqtt5_lifecycle::mqtt_client::MqttClientError;
use std::time::{Duration, Instant};

fn options() -> MqttClientOptions {
    let mut options = MqttClientOptions {
        retry_jitter_mode: JitterMode::None,
        connack_timeout_ms: 5_000,
        ping_timeout_ms: 2_000,
        ack_timeout_seconds: 10,
        ..Default::default()
    };
    options.connect.keep_alive_interval_seconds = 60;
    options
}

fn succeeded(engine: &MqttEngine) -> TransportEvent {
    TransportEvent::ConnectionSucceeded {
        connection_id: engine.connection_id(),
        connack: ConnAckPacket::default(),
    }
}

fn connected(options: MqttClientOptions, now: Instant) -> MqttEngine {
    let mut engine = MqttEngine::new(options).unwrap();
    engine.start(now);
    engine.handle_transport_event(succeeded(&engine), now);
    let _ = engine.take_requests();
    let _ = engine.take_events();
    engine
}

#[test]
fn test_connack_timeout() {
    let mut engine = MqttEngine::new(options()).unwrap();
    let now = Instant::now();
    engine.start(now);
    let _ = engine.take_requests();
    let _ = engine.take_events();

    assert_eq!(engine.next_tick_at(), Some(now + Duration::from_secs(5)));
    engine.handle_tick(now + Duration::from_millis(4_999));
    assert_eq!(engine.state(), ClientState::Connecting);

    let expired_at = now + Duration::from_secs(5);
    engine.handle_tick(expired_at);

    assert_eq!(engine.state(), ClientState::PendingReconnect);
    assert_eq!(engine.take_requests(), vec![TransportRequest::Disconnect(None)]);
    match &engine.take_events()[..] {
        [ClientEvent::ConnectionFailure(failure)] => {
            assert_eq!(
                failure.error,
                MqttClientError::ConnackTimeout { timeout_ms: 5_000 }
            );
            assert!(failure.connack.is_none());
        }
        other => panic!("unexpected events {:?}", other),
    }
    assert_eq!(
        engine.next_tick_at(),
        Some(expired_at + Duration::from_secs(1))
    );

    // a late CONNACK for the abandoned attempt does not connect the client
    engine.handle_transport_event(succeeded(&engine), expired_at);
    assert!(!engine.is_connected());
    assert!(engine.take_events().is_empty());

    // nor does it once the next attempt is under way
    let abandoned = engine.connection_id();
    let retry_at = expired_at + Duration::from_secs(1);
    engine.handle_tick(retry_at);
    assert_eq!(engine.state(), ClientState::Connecting);
    assert_eq!(engine.connection_id(), abandoned + 1);
    engine.handle_transport_event(
        TransportEvent::ConnectionSucceeded {
            connection_id: abandoned,
            connack: ConnAckPacket::default(),
        },
        retry_at,
    );
    assert_eq!(engine.state(), ClientState::Connecting);
}

#[test]
fn test_ping_timeout_drops_connection() {
    let now = Instant::now();
    let mut engine = connected(options(), now);

    let ping_at = now + Duration::from_secs(60);
    engine.handle_tick(ping_at);
    assert_eq!(engine.take_requests(), vec![TransportRequest::Ping]);
    assert_eq!(engine.next_tick_at(), Some(ping_at + Duration::from_secs(2)));

    let timeout_at = ping_at + Duration::from_secs(2);
    engine.handle_tick(timeout_at);

    assert_eq!(engine.state(), ClientState::PendingReconnect);
    assert_eq!(engine.take_requests(), vec![TransportRequest::Disconnect(None)]);
    match &engine.take_events()[..] {
        [ClientEvent::Disconnection(event)] => {
            assert_eq!(event.error, MqttClientError::PingTimeout { timeout_ms: 2_000 });
        }
        other => panic!("unexpected events {:?}", other),
    }

    // transport confirms the close; no duplicate disconnection
    engine.handle_transport_event(
        TransportEvent::Disconnected {
            connection_id: engine.connection_id(),
            error: MqttClientError::ConnectionLost {
                reason: "closed".to_string(),
            },
            disconnect: None,
        },
        timeout_at,
    );
    assert!(engine.take_events().is_empty());
}

#[test]
fn test_ack_timeout_fails_only_the_operation() {
    let now = Instant::now();
    let mut engine = connected(options(), now);

    let mut slow = engine.publish(
        PublishCommand::simple("slow", &b"1"[..], QoS::AtLeastOnce, false),
        now,
    );
    let later = now + Duration::from_secs(3);
    let mut fast = engine.subscribe(SubscribeCommand::single("fast", QoS::AtLeastOnce), later);
    let _ = engine.take_requests();

    assert_eq!(engine.next_tick_at(), Some(now + Duration::from_secs(10)));
    engine.handle_tick(now + Duration::from_secs(10));

    assert_eq!(
        slow.try_result().map(|r| r.map(|_| ())),
        Some(Err(MqttClientError::OperationTimeout {
            operation: "publish".to_string(),
            timeout_ms: 10_000,
        }))
    );
    assert!(fast.try_result().is_none());
    assert!(engine.is_connected());
    assert!(engine.take_events().is_empty());

    engine.handle_tick(later + Duration::from_secs(10));
    assert!(matches!(
        fast.try_result(),
        Some(Err(MqttClientError::OperationTimeout { .. }))
    ));
    assert_eq!(engine.operation_statistics().incomplete_operation_count, 0);
}

#[test]
fn test_zero_ack_timeout_waits_forever() {
    let now = Instant::now();
    let mut engine = connected(
        MqttClientOptions {
            ack_timeout_seconds: 0,
            ..options()
        },
        now,
    );

    let mut handle = engine.publish(
        PublishCommand::simple("t", &b"1"[..], QoS::AtLeastOnce, false),
        now,
    );
    let _ = engine.take_requests();

    // only the keep-alive remains scheduled
    assert_eq!(engine.next_tick_at(), Some(now + Duration::from_secs(60)));
    engine.handle_tick(now + Duration::from_secs(3600));
    assert!(handle.try_result().is_none());
}
