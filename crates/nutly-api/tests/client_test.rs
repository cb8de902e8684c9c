#![allow(clippy::unwrap_used)]
// Integration tests for `Client` against the scripted in-process upsd.

use std::time::{Duration, Instant};

use pretty_assertions::assert_eq;
use tokio::sync::broadcast;

use nutly_api::testing::MockUpsd;
use nutly_api::{BusyPolicy, Client, ClientConfig, ClientEvent, Error};

// ── Helpers ─────────────────────────────────────────────────────────

async fn setup() -> (MockUpsd, Client) {
    let server = MockUpsd::standard().start().await.unwrap();
    let client = Client::new(server.client_config());
    (server, client)
}

fn drain(rx: &mut broadcast::Receiver<ClientEvent>) -> Vec<ClientEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn request_ids(events: &[ClientEvent]) -> Vec<u64> {
    events
        .iter()
        .filter_map(|e| match e {
            ClientEvent::Request(r) => Some(r.id),
            _ => None,
        })
        .collect()
}

// ── Session tests ───────────────────────────────────────────────────

#[tokio::test]
async fn test_version_without_credentials() {
    let (server, client) = setup().await;

    let version = client.version().await.unwrap();
    assert!(version.starts_with("Network UPS Tools upsd"));
    assert_eq!(client.api_version().await.unwrap(), "1.3");
    assert!(client.is_connected().await);

    client.disconnect().await;
    client.disconnect().await;
    assert!(!client.is_connected().await);
    assert_eq!(server.received(), vec!["VER", "NETVER"]);
}

#[tokio::test]
async fn test_connect_is_idempotent() {
    let (server, client) = setup().await;

    client.connect().await.unwrap();
    client.connect().await.unwrap();
    client.version().await.unwrap();
    assert_eq!(server.connections(), 1);
}

#[tokio::test]
async fn test_login_sends_username_then_password() {
    let server = MockUpsd::builder()
        .credentials("monuser", "secret")
        .respond("VER", &["Network UPS Tools upsd 2.8.1"])
        .start()
        .await
        .unwrap();
    let config = server
        .client_config()
        .with_credentials("monuser", "secret".to_string().into());
    let client = Client::new(config);
    let mut events = client.subscribe();

    client.version().await.unwrap();
    assert_eq!(
        server.received(),
        vec!["USERNAME monuser", "PASSWORD secret", "VER"]
    );

    let commands: Vec<String> = drain(&mut events)
        .into_iter()
        .filter_map(|e| match e {
            ClientEvent::Request(r) => Some(r.command.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(
        commands,
        vec!["USERNAME monuser", "PASSWORD ********", "VER"]
    );
}

#[tokio::test]
async fn test_login_failure_aborts_connect() {
    let (server, _) = setup().await;
    let config = server
        .client_config()
        .with_credentials("monuser", "wrong".to_string().into());
    let client = Client::new(config);

    let result = client.connect().await;
    match &result {
        Err(err @ Error::Authentication { username, .. }) => {
            assert_eq!(username, "monuser");
            assert!(err.is_auth_failure());
            assert_eq!(err.server_code(), Some("ACCESS-DENIED"));
        }
        other => panic!("expected Authentication error, got: {other:?}"),
    }
    assert!(!client.is_connected().await);
    assert_eq!(server.received(), vec!["USERNAME monuser"]);
}

#[tokio::test]
async fn test_connect_refused_is_connection_level() {
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let client = Client::new(ClientConfig::new("127.0.0.1", port));

    let result = client.version().await;
    match result {
        Err(err @ Error::Connect { .. }) => {
            assert!(err.is_connection_level());
            assert!(err.request().is_none());
        }
        other => panic!("expected Connect error, got: {other:?}"),
    }
}

// ── Query tests ─────────────────────────────────────────────────────

#[tokio::test]
async fn test_get_map_and_devices() {
    let server = MockUpsd::builder()
        .respond(
            "LIST UPS",
            &["BEGIN LIST UPS", "UPS ups1 \"Desc1\"", "UPS ups2 \"Desc2\"", "END LIST UPS"],
        )
        .start()
        .await
        .unwrap();
    let client = Client::new(server.client_config());

    let map = client.get_map("UPS").await.unwrap();
    assert_eq!(map.len(), 2);
    assert_eq!(map["ups1"], "Desc1");
    assert_eq!(map["ups2"], "Desc2");

    let devices = client.devices().await.unwrap();
    let names: Vec<&str> = devices.keys().map(String::as_str).collect();
    assert_eq!(names, vec!["ups1", "ups2"]);
    assert_eq!(devices["ups2"].name(), "ups2");
    assert_eq!(client.known_devices().len(), 2);

    client.disconnect().await;
    assert!(client.known_devices().is_empty());
}

#[tokio::test]
async fn test_device_value() {
    let (_server, client) = setup().await;
    let ups = client.device("ups");

    assert_eq!(ups.value("battery.charge").await.unwrap().as_deref(), Some("87"));
    assert_eq!(ups.n_clients().await.unwrap(), Some(1));
    assert_eq!(ups.description(None).await.unwrap().as_deref(), Some("Eaton 5E"));
    assert_eq!(ups.clients().await.unwrap(), vec!["127.0.0.1"]);
    assert_eq!(
        ups.commands().await.unwrap(),
        vec!["beeper.disable", "beeper.enable", "test.battery.start"]
    );
    assert_eq!(ups.constants().await.unwrap()["ups.status"], "OL CHRG");
    assert_eq!(ups.variables().await.unwrap()["battery.charge.low"], "20");
}

#[tokio::test]
async fn test_set_and_command() {
    let (server, client) = setup().await;
    let ups = client.device("ups");

    ups.set("battery.charge.low", "30").await.unwrap();
    ups.command("beeper.disable").await.unwrap();
    assert_eq!(
        server.received(),
        vec![
            "SET VAR ups battery.charge.low \"30\"",
            "INSTCMD ups beeper.disable"
        ]
    );
}

#[tokio::test]
async fn test_server_error_surfaces_with_request() {
    let (_server, client) = setup().await;

    let result = client.device("ups").value("no.such.var").await;
    match result {
        Err(Error::Server { request, code }) => {
            assert_eq!(code, "UNKNOWN-COMMAND");
            assert_eq!(request.command, "GET VAR ups no.such.var");
        }
        other => panic!("expected Server error, got: {other:?}"),
    }
}

#[tokio::test]
async fn test_non_matching_lines_do_not_resolve_early() {
    let server = MockUpsd::builder()
        .respond(
            "GET VAR ups battery.charge",
            &[
                "VAR ups battery.charge.low \"20\"",
                "unrelated noise",
                "VAR ups battery.charge \"87\"",
            ],
        )
        .start()
        .await
        .unwrap();
    let client = Client::new(server.client_config());

    let response = client
        .send("GET VAR ups battery.charge", "VAR ups battery.charge")
        .await
        .unwrap();
    assert_eq!(response.body.lines().count(), 3);
    assert_eq!(
        client.get("VAR", Some("ups battery.charge")).await.unwrap().as_deref(),
        Some("87")
    );
}

#[tokio::test]
async fn test_embedded_newline_is_rejected() {
    let (server, client) = setup().await;
    client.connect().await.unwrap();

    let result = client.send("VER\nLOGOUT", "").await;
    assert!(matches!(result, Err(Error::InvalidCommand(_))), "got: {result:?}");
    assert!(server.received().is_empty());
}

// ── Timeout tests ───────────────────────────────────────────────────

#[tokio::test]
async fn test_timeout_fires_after_window() {
    let server = MockUpsd::builder()
        .silent("GET VAR ups battery.charge")
        .start()
        .await
        .unwrap();
    let config = server.client_config().with_timeout(Duration::from_secs(1));
    let client = Client::new(config);
    client.connect().await.unwrap();

    let started = Instant::now();
    let result = client.device("ups").value("battery.charge").await;
    let elapsed = started.elapsed();

    match result {
        Err(err @ Error::Timeout { .. }) => {
            assert!(!err.is_connection_level());
            assert_eq!(
                err.request().map(|r| r.command.as_str()),
                Some("GET VAR ups battery.charge")
            );
        }
        other => panic!("expected Timeout error, got: {other:?}"),
    }
    assert!(elapsed >= Duration::from_secs(1), "fired early: {elapsed:?}");
    assert!(elapsed < Duration::from_millis(1500), "fired late: {elapsed:?}");
}

#[tokio::test]
async fn test_timeout_returns_correlator_to_idle() {
    let server = MockUpsd::builder()
        .silent("LIST UPS")
        .respond("VER", &["Network UPS Tools upsd 2.8.1"])
        .start()
        .await
        .unwrap();
    let config = server.client_config().with_timeout(Duration::from_secs(1));
    let client = Client::new(config);

    assert!(client.devices().await.unwrap_err().is_timeout());
    assert!(!client.is_busy());
    assert_eq!(client.version().await.unwrap(), "Network UPS Tools upsd 2.8.1");
}

#[tokio::test]
async fn test_late_reply_never_answers_the_next_command() {
    // The stale GET reply would arrive while VER is still waiting.
    let server = MockUpsd::standard()
        .respond_after(
            "GET VAR ups battery.charge",
            Duration::from_millis(1300),
            &["VAR ups battery.charge \"87\""],
        )
        .respond_after(
            "VER",
            Duration::from_millis(500),
            &["Network UPS Tools upsd 2.8.1"],
        )
        .start()
        .await
        .unwrap();
    let config = server.client_config().with_timeout(Duration::from_secs(1));
    let client = Client::new(config);
    client.connect().await.unwrap();

    let err = client.device("ups").value("battery.charge").await.unwrap_err();
    assert!(err.is_timeout(), "got: {err:?}");
    assert!(!client.is_connected().await);

    assert_eq!(client.version().await.unwrap(), "Network UPS Tools upsd 2.8.1");
    assert_eq!(server.connections(), 2);
    assert_eq!(server.received(), vec!["GET VAR ups battery.charge", "VER"]);
}

// ── Busy tests ──────────────────────────────────────────────────────

#[tokio::test]
async fn test_busy_caller_retries_until_slot_frees() {
    let server = MockUpsd::standard()
        .respond_after(
            "LIST UPS",
            Duration::from_millis(300),
            &["BEGIN LIST UPS", "UPS ups \"Eaton 5E\"", "END LIST UPS"],
        )
        .start()
        .await
        .unwrap();
    let client = Client::new(server.client_config());
    client.connect().await.unwrap();

    let first = {
        let client = client.clone();
        tokio::spawn(async move { client.devices().await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(client.is_busy());

    let version = client.version().await.unwrap();
    assert!(!version.is_empty());
    assert_eq!(first.await.unwrap().unwrap().len(), 1);
    assert_eq!(server.received(), vec!["LIST UPS", "VER"]);
}

#[tokio::test]
async fn test_busy_exhaustion_never_writes_command() {
    let server = MockUpsd::standard().silent("LIST UPS").start().await.unwrap();
    let mut config = server.client_config().with_timeout(Duration::from_secs(10));
    config.busy = BusyPolicy {
        max_retries: 2,
        delay: Duration::from_millis(50),
    };
    let client = Client::new(config);
    client.connect().await.unwrap();

    let first = {
        let client = client.clone();
        tokio::spawn(async move { client.devices().await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    let result = client.version().await;
    match result {
        Err(Error::Busy { command, attempts }) => {
            assert_eq!(command, "VER");
            assert_eq!(attempts, 3);
        }
        other => panic!("expected Busy error, got: {other:?}"),
    }
    assert_eq!(server.received(), vec!["LIST UPS"]);
    first.abort();
}

// ── Disconnect tests ────────────────────────────────────────────────

#[tokio::test]
async fn test_hang_up_releases_pending_caller() {
    let server = MockUpsd::standard().hang_up("LIST UPS").start().await.unwrap();
    let client = Client::new(server.client_config());
    let mut events = client.subscribe();

    let result = client.devices().await;
    match result {
        Err(Error::Closed { request: Some(request) }) => {
            assert_eq!(request.command, "LIST UPS");
        }
        other => panic!("expected Closed error, got: {other:?}"),
    }
    assert!(
        drain(&mut events)
            .iter()
            .any(|e| matches!(e, ClientEvent::Disconnected { .. }))
    );

    // Next verb reconnects lazily.
    client.version().await.unwrap();
    assert_eq!(server.connections(), 2);
}

#[tokio::test]
async fn test_disconnect_releases_pending_caller() {
    let server = MockUpsd::standard().silent("LIST UPS").start().await.unwrap();
    let config = server.client_config().with_timeout(Duration::from_secs(10));
    let client = Client::new(config);
    client.connect().await.unwrap();

    let pending = {
        let client = client.clone();
        tokio::spawn(async move { client.devices().await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(client.is_busy());

    let closer = {
        let client = client.clone();
        tokio::spawn(async move { client.disconnect().await })
    };
    closer.await.unwrap();

    let result = tokio::time::timeout(Duration::from_secs(1), pending)
        .await
        .expect("pending caller still waiting after disconnect")
        .unwrap();
    match result {
        Err(Error::Closed { request: Some(request) }) => {
            assert_eq!(request.command, "LIST UPS");
        }
        other => panic!("expected Closed error, got: {other:?}"),
    }
    assert!(!client.is_busy());
    assert!(!client.is_connected().await);
}

#[tokio::test]
async fn test_disconnect_while_idle_emits_event() {
    let (_server, client) = setup().await;
    client.connect().await.unwrap();
    let mut events = client.subscribe();

    client.disconnect().await;
    let events = drain(&mut events);
    assert!(matches!(events.as_slice(), [ClientEvent::Disconnected { .. }]));
}

// ── Event tests ─────────────────────────────────────────────────────

#[tokio::test]
async fn test_request_ids_strictly_increase() {
    let (_server, client) = setup().await;
    let mut events = client.subscribe();

    client.version().await.unwrap();
    client.api_version().await.unwrap();
    client.devices().await.unwrap();

    assert_eq!(request_ids(&drain(&mut events)), vec![1, 2, 3]);
}

#[tokio::test]
async fn test_events_pair_each_request_with_one_outcome() {
    let (_server, client) = setup().await;
    let mut events = client.subscribe();

    client.version().await.unwrap();
    let _ = client.device("ups").value("no.such.var").await;

    let events = drain(&mut events);
    assert_eq!(events.len(), 5, "events: {events:?}");
    assert!(matches!(events[0], ClientEvent::Connected { .. }));
    match (&events[1], &events[2]) {
        (ClientEvent::Request(req), ClientEvent::Response(resp)) => {
            assert_eq!(req.command, "VER");
            assert_eq!(resp.request.id, req.id);
        }
        other => panic!("unexpected events: {other:?}"),
    }
    match (&events[3], &events[4]) {
        (ClientEvent::Request(req), ClientEvent::Error { request, message }) => {
            assert_eq!(request.as_ref().map(|r| r.id), Some(req.id));
            assert!(message.contains("UNKNOWN-COMMAND"));
        }
        other => panic!("unexpected events: {other:?}"),
    }
}
