//! Persistence Integration Tests
//!
//! A client writes its state under `<data_dir>/<token>/`; a new client for
//! the same token must see exactly the same identity and backlog.

use std::fs;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use telemetry_queue::store::{EVENTS_FILE, IDENTITY_FILE, PEOPLE_FILE};
use telemetry_queue::{
    BatchOutcome, Client, ClientConfig, Endpoint, Properties, PropertyValue, Transport,
    TransportResult,
};

struct AcceptAll;

#[async_trait]
impl Transport for AcceptAll {
    async fn send(&self, _endpoint: Endpoint, _body: String) -> TransportResult<BatchOutcome> {
        Ok(BatchOutcome::Accepted)
    }
}

fn config(dir: &TempDir, token: &str) -> ClientConfig {
    ClientConfig::new(token)
        .with_data_dir(dir.path())
        .with_flush_interval(Duration::ZERO)
}

fn open(dir: &TempDir, token: &str) -> Client {
    Client::with_transport(config(dir, token), Arc::new(AcceptAll)).unwrap()
}

#[test]
fn test_state_round_trips_across_restart() {
    let dir = TempDir::new().unwrap();

    let (identity, events, people) = {
        let client = open(&dir, "tok");
        client.identify("user-1");
        client.create_alias("ada@example.com", "user-1");
        client.register_super_properties(
            &Properties::new()
                .with("plan", "pro")
                .with("docs", PropertyValue::url("https://example.com").unwrap()),
        );
        client.track_with("Opened", Properties::new().with("screen", "home"));
        client.track("Closed");
        client.people().set_one("name", "Ada");
        client.people().track_charge(4.5, Properties::new());

        (
            client.identity().snapshot(),
            client.event_store().records(),
            client.people_store().records(),
        )
    };

    let reopened = open(&dir, "tok");
    assert_eq!(reopened.distinct_id(), "user-1");
    assert_eq!(
        reopened.identity().alias_for("ada@example.com"),
        Some("user-1".to_string())
    );
    assert_eq!(reopened.identity().snapshot(), identity);
    assert_eq!(reopened.event_store().records(), events);
    assert_eq!(reopened.people_store().records(), people);
    assert_eq!(events.len(), 2);
    assert_eq!(people.len(), 3);
}

#[test]
fn test_non_finite_super_property_does_not_wipe_identity() {
    let dir = TempDir::new().unwrap();
    {
        let client = open(&dir, "tok");
        client.identify("user-1");
        client.create_alias("nick", "user-1");
        client.register_super_properties(
            &Properties::new()
                .with("plan", "pro")
                .with("ratio", PropertyValue::Float(f64::NAN)),
        );
        client.people().track_charge(
            2.0,
            Properties::new().with("fx", PropertyValue::Float(f64::INFINITY)),
        );
    }

    let reopened = open(&dir, "tok");
    assert_eq!(reopened.distinct_id(), "user-1");
    assert_eq!(
        reopened.identity().alias_for("nick"),
        Some("user-1".to_string())
    );
    assert_eq!(
        reopened.current_super_properties(),
        Properties::new().with("plan", "pro")
    );
    assert_eq!(reopened.people_store().len(), 2);
}

#[test]
fn test_unidentified_profile_buffer_survives_restart() {
    let dir = TempDir::new().unwrap();
    {
        let client = open(&dir, "tok");
        client.people().set_one("name", "Ada");
        client.people().increment_by("visits", 1);
        assert!(client.people_store().is_empty());
    }

    let reopened = open(&dir, "tok");
    assert_eq!(reopened.identity().unidentified_len(), 2);

    reopened.identify("user-9");
    let released = reopened.people_store().records();
    assert_eq!(released.len(), 2);
    assert!(released.iter().all(|m| m.distinct_id == "user-9"));
}

#[tokio::test]
async fn test_flushed_records_stay_gone() {
    let dir = TempDir::new().unwrap();
    {
        let client = open(&dir, "tok");
        client.track("A");
        client.track("B");
        assert!(client.flush().await.success());
        client.track("C");
    }

    let reopened = open(&dir, "tok");
    let names: Vec<_> = reopened
        .event_store()
        .records()
        .into_iter()
        .map(|r| r.name)
        .collect();
    assert_eq!(names, vec!["C".to_string()]);
}

#[test]
fn test_tokens_are_isolated() {
    let dir = TempDir::new().unwrap();
    {
        let a = open(&dir, "token-a");
        a.identify("alice");
        a.track("Only A");
    }

    let b = open(&dir, "token-b");
    assert_ne!(b.distinct_id(), "alice");
    assert!(b.event_store().is_empty());
}

#[test]
fn test_archive_writes_compact_files() {
    let dir = TempDir::new().unwrap();
    let client = open(&dir, "tok");
    client.identify("user-1");
    for i in 0..5 {
        client.track_with("Tick", Properties::new().with("i", i));
    }
    let ids: Vec<u64> = client
        .event_store()
        .peek_batch(3)
        .iter()
        .map(|q| q.id)
        .collect();
    client.event_store().remove(&ids);

    client.archive().unwrap();

    let state_dir = client.config().state_dir().unwrap();
    let journal = fs::read_to_string(state_dir.join(EVENTS_FILE)).unwrap();
    assert_eq!(journal.lines().count(), 2);
    assert!(state_dir.join(PEOPLE_FILE).exists());
    assert!(state_dir.join(IDENTITY_FILE).exists());
}

#[test]
fn test_reset_is_persisted() {
    let dir = TempDir::new().unwrap();
    {
        let client = open(&dir, "tok");
        client.identify("user-1");
        client.register_super_properties(&Properties::new().with("plan", "pro"));
        client.track("Opened");
        client.reset();
    }

    let reopened = open(&dir, "tok");
    assert_ne!(reopened.distinct_id(), "user-1");
    assert!(reopened.current_super_properties().is_empty());
    assert!(reopened.event_store().is_empty());
    assert!(reopened.people_store().is_empty());
}

#[test]
fn test_unreadable_state_dir_falls_back_to_memory() {
    let dir = TempDir::new().unwrap();
    // a file where the state directory should be
    let blocker = dir.path().join("tok");
    fs::write(&blocker, "not a directory").unwrap();

    let client = open(&dir, "tok");
    client.track("Opened");
    assert!(!client.event_store().is_persistent());
    assert_eq!(client.event_store().len(), 1);
}

#[test]
fn test_dot_token_cannot_escape_data_dir() {
    let root = TempDir::new().unwrap();
    let data_dir = root.path().join("data");
    fs::create_dir(&data_dir).unwrap();
    let foreign = root.path().join("foreign.tmp");
    fs::write(&foreign, "keep me").unwrap();

    let config = ClientConfig::new("..")
        .with_data_dir(&data_dir)
        .with_flush_interval(Duration::ZERO);
    assert!(Client::with_transport(config, Arc::new(AcceptAll)).is_err());
    assert!(foreign.exists());
}
