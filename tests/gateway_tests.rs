use std::{
    path::PathBuf,
    sync::{Arc, atomic::Ordering},
    time::Duration,
};

use anyhow::Result;
use apns_bridge::{
    clients::{
        apns::{ApnsClient, DeliveryOutcome},
        gateway::{
            ApnsConnection, ApnsGatewayFactory, GatewayConnection, GatewayError, GatewayFactory,
            GatewayHandle, GatewayState,
        },
    },
    models::{
        feedback::{DeliveryError, GatewayEvent, NotificationId},
        payload::NotificationPayload,
        retry::RetryConfig,
        settings::{GatewaySettings, PRODUCTION_ENDPOINT, SANDBOX_ENDPOINT},
    },
};
use serde_json::json;
use tokio::{sync::mpsc, time::Instant};
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{body_json, header, header_exists, method, path, path_regex},
};

use crate::support::{FailingFactory, RecordingFactory, token};

fn settings(endpoint: Option<String>, resend_buffer: usize) -> GatewaySettings {
    GatewaySettings {
        certificate_path: PathBuf::from("/nonexistent/certificate.p12"),
        password: "secret".to_string(),
        production: false,
        topic: Some("com.example.chat".to_string()),
        endpoint_override: endpoint,
        resend_buffer,
        retry: RetryConfig {
            max_attempts: 1,
            initial_delay_ms: 10,
            max_delay_ms: 10,
            backoff_multiplier: 2,
        },
    }
}

fn payload() -> NotificationPayload {
    NotificationPayload::builder()
        .alert_body("Alice: hi")
        .badge(1)
        .sound("default")
        .custom_field("jid", "alice@domain")
        .build()
        .expect("valid payload")
}

fn connection(server: &MockServer, resend_buffer: usize) -> (ApnsConnection, mpsc::UnboundedReceiver<GatewayEvent>) {
    let client = ApnsClient::from_parts(
        reqwest::Client::new(),
        &settings(Some(server.uri()), resend_buffer),
    );
    let (feedback, events) = mpsc::unbounded_channel();

    (ApnsConnection::spawn(client, resend_buffer, feedback), events)
}

fn drain(events: &mut mpsc::UnboundedReceiver<GatewayEvent>) -> Vec<GatewayEvent> {
    let mut drained = Vec::new();
    while let Ok(event) = events.try_recv() {
        drained.push(event);
    }
    drained
}

/// Test: Endpoint selection follows the production flag unless overridden
#[test]
fn test_endpoint_selection() {
    let mut gateway = settings(None, 100);
    assert_eq!(gateway.endpoint(), SANDBOX_ENDPOINT);

    gateway.production = true;
    assert_eq!(gateway.endpoint(), PRODUCTION_ENDPOINT);

    gateway.endpoint_override = Some("http://localhost:2197/".to_string());
    assert_eq!(gateway.endpoint(), "http://localhost:2197");
}

/// Test: Requests carry the APNs headers and the encoded payload
#[tokio::test]
async fn test_client_sends_provider_request() -> Result<()> {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/3/device/abcd"))
        .and(header("apns-topic", "com.example.chat"))
        .and(header("apns-push-type", "alert"))
        .and(header_exists("apns-id"))
        .and(body_json(json!({
            "aps": { "alert": "Alice: hi", "badge": 1, "sound": "default" },
            "jid": "alice@domain"
        })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let client = ApnsClient::from_parts(reqwest::Client::new(), &settings(Some(server.uri()), 100));

    let outcome = client
        .send_notification(NotificationId::new(), "abcd", &payload())
        .await;

    assert_eq!(outcome, Ok(DeliveryOutcome::Delivered));

    Ok(())
}

/// Test: Gateway rejections are reported without retrying
#[tokio::test]
async fn test_client_reports_rejection() -> Result<()> {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path_regex(r"^/3/device/"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({ "reason": "BadDeviceToken" })))
        .expect(1)
        .mount(&server)
        .await;

    let mut gateway = settings(Some(server.uri()), 100);
    gateway.retry.max_attempts = 3;
    let client = ApnsClient::from_parts(reqwest::Client::new(), &gateway);

    let outcome = client
        .send_notification(NotificationId::new(), "abcd", &payload())
        .await;

    assert_eq!(
        outcome,
        Ok(DeliveryOutcome::Rejected(DeliveryError::BadDeviceToken))
    );

    Ok(())
}

/// Test: Transient gateway errors are retried before giving up
#[tokio::test]
async fn test_client_retries_transient_errors() -> Result<()> {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path_regex(r"^/3/device/"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path_regex(r"^/3/device/"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let mut gateway = settings(Some(server.uri()), 100);
    gateway.retry.max_attempts = 2;
    let client = ApnsClient::from_parts(reqwest::Client::new(), &gateway);

    let outcome = client
        .send_notification(NotificationId::new(), "abcd", &payload())
        .await;

    assert_eq!(outcome, Ok(DeliveryOutcome::Delivered));
    assert_eq!(server.received_requests().await.map(|r| r.len()), Some(2));

    Ok(())
}

/// Test: Every token gets its own notification and a success event
#[tokio::test]
async fn test_connection_reports_success_per_token() -> Result<()> {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path_regex(r"^/3/device/"))
        .respond_with(ResponseTemplate::new(200))
        .expect(2)
        .mount(&server)
        .await;

    let (connection, mut events) = connection(&server, 100);

    let ids = connection.push(&[token("aaaa"), token("bbbb")], &payload())?;
    assert_eq!(ids.len(), 2);
    assert_ne!(ids[0], ids[1]);

    connection.stop().await;

    let events = drain(&mut events);
    assert_eq!(
        events,
        vec![
            GatewayEvent::DeliverySucceeded {
                id: ids[0],
                token: token("aaaa"),
                resent: false,
            },
            GatewayEvent::DeliverySucceeded {
                id: ids[1],
                token: token("bbbb"),
                resent: false,
            },
        ]
    );

    Ok(())
}

/// Test: An unregistered device yields a failure event naming the token
#[tokio::test]
async fn test_connection_reports_invalid_token() -> Result<()> {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/3/device/dead"))
        .respond_with(ResponseTemplate::new(410).set_body_json(json!({
            "reason": "Unregistered",
            "timestamp": 1700000000000u64
        })))
        .mount(&server)
        .await;

    let (connection, mut events) = connection(&server, 100);

    let ids = connection.push(&[token("dead")], &payload())?;
    connection.stop().await;

    let events = drain(&mut events);
    assert_eq!(
        events,
        vec![GatewayEvent::DeliveryFailed {
            id: ids[0],
            token: token("dead"),
            cause: DeliveryError::Unregistered,
        }]
    );

    Ok(())
}

/// Test: Notifications that hit an unreachable gateway are resent after the
/// next successful delivery
#[tokio::test]
async fn test_connection_resends_after_recovery() -> Result<()> {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path_regex(r"^/3/device/"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path_regex(r"^/3/device/"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let (connection, mut events) = connection(&server, 100);

    let first = connection.push(&[token("aaaa")], &payload())?;
    let second = connection.push(&[token("bbbb")], &payload())?;
    connection.stop().await;

    let events = drain(&mut events);
    assert_eq!(
        events,
        vec![
            GatewayEvent::ConnectionClosed {
                cause: DeliveryError::ServiceUnavailable,
                last_id: None,
            },
            GatewayEvent::DeliverySucceeded {
                id: second[0],
                token: token("bbbb"),
                resent: false,
            },
            GatewayEvent::DeliverySucceeded {
                id: first[0],
                token: token("aaaa"),
                resent: true,
            },
            GatewayEvent::NotificationsResent { count: 1 },
        ]
    );

    Ok(())
}

/// Test: Outgrowing the resend buffer doubles it and reports the new length
#[tokio::test]
async fn test_connection_grows_resend_buffer() -> Result<()> {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path_regex(r"^/3/device/"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let (connection, mut events) = connection(&server, 1);

    connection.push(&[token("aaaa"), token("bbbb")], &payload())?;
    connection.stop().await;

    let events = drain(&mut events);
    assert!(events.contains(&GatewayEvent::CacheLengthExceeded { new_length: 2 }));
    assert_eq!(
        events
            .iter()
            .filter(|event| matches!(event, GatewayEvent::ConnectionClosed { .. }))
            .count(),
        2
    );

    Ok(())
}

/// Test: Submissions after stop are refused
#[tokio::test]
async fn test_push_after_stop_is_refused() -> Result<()> {
    let server = MockServer::start().await;
    let (connection, _events) = connection(&server, 100);

    connection.stop().await;
    connection.stop().await;

    assert_eq!(
        connection.push(&[token("aaaa")], &payload()),
        Err(GatewayError::Closed)
    );

    Ok(())
}

/// Test: A missing certificate fails construction with a credentials error
#[tokio::test]
async fn test_missing_certificate_fails_construction() -> Result<()> {
    let (feedback, _events) = mpsc::unbounded_channel();

    let result = ApnsGatewayFactory
        .connect(&settings(None, 100), feedback)
        .await;

    assert!(matches!(result, Err(GatewayError::Credentials(_))));

    Ok(())
}

/// Test: The handle builds the connection once and hands out the same one
#[tokio::test]
async fn test_handle_reuses_connection() -> Result<()> {
    let factory = Arc::new(RecordingFactory::default());
    let (feedback, _events) = mpsc::unbounded_channel();
    let handle = GatewayHandle::new(factory.clone(), settings(None, 100), feedback);

    assert_eq!(handle.state().await, GatewayState::Uninitialized);

    let first = handle.connection().await;
    let second = handle.connection().await;

    assert!(first.is_some() && second.is_some());
    assert_eq!(factory.connects.load(Ordering::SeqCst), 1);
    assert_eq!(handle.state().await, GatewayState::Active);

    Ok(())
}

/// Test: A latched failure is cleared by reset
#[tokio::test]
async fn test_handle_reset_clears_failure() -> Result<()> {
    let factory = Arc::new(FailingFactory::default());
    let (feedback, _events) = mpsc::unbounded_channel();
    let handle = GatewayHandle::new(factory.clone(), settings(None, 100), feedback);

    assert!(handle.connection().await.is_none());
    assert!(handle.connection().await.is_none());
    assert_eq!(factory.connects.load(Ordering::SeqCst), 1);
    assert_eq!(handle.state().await, GatewayState::Failed);

    handle.reset().await;
    assert_eq!(handle.state().await, GatewayState::Uninitialized);

    assert!(handle.connection().await.is_none());
    assert_eq!(factory.connects.load(Ordering::SeqCst), 2);

    Ok(())
}

/// Test: Stopping closes the connection once and refuses later connections
#[tokio::test]
async fn test_handle_stop_is_final() -> Result<()> {
    let factory = Arc::new(RecordingFactory::default());
    let (feedback, _events) = mpsc::unbounded_channel();
    let handle = GatewayHandle::new(factory.clone(), settings(None, 100), feedback);

    handle.connection().await;
    handle.stop().await;
    handle.stop().await;
    handle.reset().await;

    assert_eq!(factory.gateway.stops.load(Ordering::SeqCst), 1);
    assert_eq!(handle.state().await, GatewayState::Stopped);
    assert!(handle.connection().await.is_none());
    assert_eq!(factory.connects.load(Ordering::SeqCst), 1);

    Ok(())
}

/// Test: Stopping during a gateway outage gives up on the queue after the
/// stop timeout instead of retrying every queued notification
#[tokio::test]
async fn test_stop_is_bounded_during_outage() -> Result<()> {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path_regex(r"^/3/device/"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let mut gateway = settings(Some(server.uri()), 100);
    gateway.retry = RetryConfig {
        max_attempts: 3,
        initial_delay_ms: 1000,
        max_delay_ms: 1000,
        backoff_multiplier: 1,
    };
    let client = ApnsClient::from_parts(reqwest::Client::new(), &gateway);
    let (feedback, mut events) = mpsc::unbounded_channel();
    let connection = ApnsConnection::spawn(client, 100, feedback)
        .with_stop_timeout(Duration::from_millis(500));

    let tokens: Vec<_> = (0..6).map(|i| token(&format!("aaaa000{}", i))).collect();
    connection.push(&tokens, &payload())?;

    let start = Instant::now();
    connection.stop().await;

    assert!(
        start.elapsed() < Duration::from_secs(2),
        "stop took {:?}",
        start.elapsed()
    );

    // The aborted worker released its feedback sender.
    tokio::time::timeout(Duration::from_secs(1), async {
        while events.recv().await.is_some() {}
    })
    .await?;

    Ok(())
}

/// Test: New settings replace the open connection and are used for the
/// next construction; unchanged settings keep it
#[tokio::test]
async fn test_handle_reconfigure_uses_new_settings() -> Result<()> {
    let factory = Arc::new(RecordingFactory::default());
    let (feedback, _events) = mpsc::unbounded_channel();
    let handle = GatewayHandle::new(factory.clone(), settings(None, 100), feedback);

    handle.connection().await;
    assert!(!handle.reconfigure(settings(None, 100)).await);
    assert_eq!(handle.state().await, GatewayState::Active);

    let mut production = settings(None, 100);
    production.production = true;
    assert!(handle.reconfigure(production.clone()).await);
    assert_eq!(handle.state().await, GatewayState::Uninitialized);
    assert_eq!(factory.gateway.stops.load(Ordering::SeqCst), 1);

    handle.connection().await;
    assert_eq!(
        *factory.built_with.lock(),
        vec![settings(None, 100), production.clone()]
    );
    assert_eq!(handle.settings().await, production);

    Ok(())
}

/// Test: Reconfiguring clears a latched construction failure
#[tokio::test]
async fn test_handle_reconfigure_clears_failure() -> Result<()> {
    let factory = Arc::new(FailingFactory::default());
    let (feedback, _events) = mpsc::unbounded_channel();
    let handle = GatewayHandle::new(factory.clone(), settings(None, 100), feedback);

    assert!(handle.connection().await.is_none());
    assert_eq!(handle.state().await, GatewayState::Failed);

    let mut fixed = settings(None, 100);
    fixed.password = "correct horse".to_string();
    handle.reconfigure(fixed).await;

    assert_eq!(handle.state().await, GatewayState::Uninitialized);
    assert!(handle.connection().await.is_none());
    assert_eq!(factory.connects.load(Ordering::SeqCst), 2);

    Ok(())
}
