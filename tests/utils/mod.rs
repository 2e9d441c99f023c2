use std::sync::Arc;
use std::time::Duration;

use chathub::{ChannelConnection, Connection, Event, FixedClock, Hub, HubConfig, ParticipantId};
use chrono::{DateTime, TimeZone, Utc};
use tokio::time::timeout;

pub const RECV_TIMEOUT: Duration = Duration::from_secs(2);

/// Installs a test tracing subscriber; repeated calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chathub=debug".into()),
        )
        .with_test_writer()
        .try_init();
}

/// The instant every frozen-clock event in these tests carries.
pub fn start_time() -> DateTime<Utc> {
    Utc.timestamp_millis_opt(1_000).unwrap()
}

/// Hub with a frozen clock and a short drain grace to keep tests fast.
pub fn test_hub() -> Hub {
    init_tracing();
    let clock = Arc::new(FixedClock::new(start_time()));
    Hub::with_config(
        HubConfig {
            drain_grace: Duration::from_millis(200),
        },
        clock,
    )
}

/// Connects a participant and returns the client-side endpoint.
pub async fn connect_client(hub: &Hub, name: &str) -> (ParticipantId, ChannelConnection) {
    let (hub_side, client_side) = ChannelConnection::pair();
    let id = hub
        .connect(name, Arc::new(hub_side))
        .await
        .expect("connect failed");
    (id, client_side)
}

/// Next event delivered to this client, with a timeout backstop.
pub async fn recv(client: &ChannelConnection) -> Event {
    timeout(RECV_TIMEOUT, client.read_event())
        .await
        .expect("timed out waiting for event")
        .expect("connection failed while waiting for event")
}

/// Asserts the client receives nothing for a short while.
pub async fn assert_no_event(client: &ChannelConnection) {
    if let Ok(result) = timeout(Duration::from_millis(100), client.read_event()).await {
        panic!("expected no event, got {result:?}");
    }
}

/// Builds the inbound message event a client would send.
pub fn send_message(text: &str) -> Event {
    Event::SendMessage {
        time: start_time(),
        message: text.into(),
    }
}

pub fn names(names: &[&str]) -> Vec<String> {
    names.iter().map(|n| n.to_string()).collect()
}
