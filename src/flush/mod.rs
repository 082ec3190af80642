//! Flush cycle: drain both stores through a transport
//!
//! ```text
//! ┌────────────┐   peek_batch   ┌──────────────┐  POST  ┌───────────┐
//! │ EventStore │───────────────►│ encode_batch │───────►│ Transport │
//! │ PeopleStore│◄───────────────│              │◄───────│           │
//! └────────────┘  remove(ids)   └──────────────┘ outcome└───────────┘
//!        accepted / rejected → remove      transport failure → retain, stop
//! ```
//!
//! Both stores are drained concurrently and independently. No store lock is
//! held while a request is in flight.

mod transport;
pub mod wire;

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::config::ClientConfig;
use crate::error::{TelemetryError, TransportError};
use crate::store::{EventStore, PeopleStore, RecordStore};

pub use transport::{classify_response, BatchOutcome, Endpoint, HttpTransport, Transport};
pub use wire::{decode_body, encode_batch, EncodedBatch, WireRecord};

/// Knobs of a flush cycle
#[derive(Debug, Clone)]
pub struct FlushSettings {
    pub token: String,
    pub batch_size: usize,
    pub max_batches_per_cycle: usize,
    pub request_timeout: Duration,
}

impl FlushSettings {
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            token: config.token.clone(),
            batch_size: config.batch_size.max(1),
            max_batches_per_cycle: config.max_batches_per_cycle.max(1),
            request_timeout: config.request_timeout(),
        }
    }
}

/// Result of draining one store
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoreFlushReport {
    pub store: &'static str,
    pub batches_sent: usize,
    pub records_sent: usize,
    pub records_rejected: usize,
    pub records_dropped: usize,
    /// Set when the store's cycle was cut short by a transport failure
    pub error: Option<TransportError>,
}

impl StoreFlushReport {
    fn new(store: &'static str) -> Self {
        Self {
            store,
            ..Default::default()
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Result of one flush invocation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlushReport {
    pub events: StoreFlushReport,
    pub people: StoreFlushReport,
    /// The delegate declined the cycle; nothing was sent
    pub vetoed: bool,
    /// The client was suspended; nothing was sent
    pub suspended: bool,
}

impl FlushReport {
    pub fn vetoed() -> Self {
        Self {
            events: StoreFlushReport::new("events"),
            people: StoreFlushReport::new("people"),
            vetoed: true,
            ..Default::default()
        }
    }

    pub fn suspended() -> Self {
        Self {
            events: StoreFlushReport::new("events"),
            people: StoreFlushReport::new("people"),
            suspended: true,
            ..Default::default()
        }
    }

    /// A cycle that could not run at all
    pub fn failed(error: TransportError) -> Self {
        Self {
            events: StoreFlushReport {
                error: Some(error.clone()),
                ..StoreFlushReport::new("events")
            },
            people: StoreFlushReport {
                error: Some(error),
                ..StoreFlushReport::new("people")
            },
            ..Default::default()
        }
    }

    /// False when suspended or when either store hit a transport failure
    pub fn success(&self) -> bool {
        !self.suspended && self.events.is_success() && self.people.is_success()
    }

    pub fn records_sent(&self) -> usize {
        self.events.records_sent + self.people.records_sent
    }
}

/// Drains the event and people stores
pub struct Flusher {
    events: Arc<EventStore>,
    people: Arc<PeopleStore>,
    transport: Arc<dyn Transport>,
    settings: FlushSettings,
}

impl Flusher {
    pub fn new(
        events: Arc<EventStore>,
        people: Arc<PeopleStore>,
        transport: Arc<dyn Transport>,
        settings: FlushSettings,
    ) -> Self {
        Self {
            events,
            people,
            transport,
            settings,
        }
    }

    pub fn events(&self) -> &Arc<EventStore> {
        &self.events
    }

    pub fn people(&self) -> &Arc<PeopleStore> {
        &self.people
    }

    /// Run one cycle over both stores
    pub async fn flush(&self) -> FlushReport {
        let (events, people) = futures::join!(
            self.drain(&self.events, Endpoint::Track),
            self.drain(&self.people, Endpoint::Engage),
        );

        let report = FlushReport {
            events,
            people,
            ..Default::default()
        };

        info!(
            success = report.success(),
            events_sent = report.events.records_sent,
            people_sent = report.people.records_sent,
            events_pending = self.events.len(),
            people_pending = self.people.len(),
            "Flush cycle finished"
        );
        report
    }

    async fn drain<R>(&self, store: &RecordStore<R>, endpoint: Endpoint) -> StoreFlushReport
    where
        R: WireRecord + Clone + Serialize + DeserializeOwned + Send + Sync,
    {
        let mut report = StoreFlushReport::new(store.name());

        for _ in 0..self.settings.max_batches_per_cycle {
            let batch = store.peek_batch(self.settings.batch_size);
            if batch.is_empty() {
                break;
            }

            let encoded = match encode_batch(&batch, &self.settings.token) {
                Ok(encoded) => encoded,
                Err(e) => {
                    error!(store = store.name(), error = %e, "Failed to encode batch, dropping it");
                    let ids: Vec<u64> = batch.iter().map(|q| q.id).collect();
                    report.records_dropped += store.remove(&ids);
                    continue;
                }
            };

            if !encoded.dropped.is_empty() {
                report.records_dropped += store.remove(&encoded.dropped);
            }
            if encoded.is_empty() {
                continue;
            }

            let count = encoded.ids.len();
            let send = self.transport.send(endpoint, encoded.body);
            let result = match tokio::time::timeout(self.settings.request_timeout, send).await {
                Ok(result) => result,
                Err(_) => Err(TransportError::Timeout(self.settings.request_timeout)),
            };

            match result {
                Ok(BatchOutcome::Accepted) => {
                    store.remove(&encoded.ids);
                    report.batches_sent += 1;
                    report.records_sent += count;
                    debug!(store = store.name(), %endpoint, count, "Batch accepted");
                }
                Ok(BatchOutcome::Rejected(reason)) => {
                    store.remove(&encoded.ids);
                    report.records_rejected += count;
                    warn!(
                        store = store.name(),
                        "{}",
                        TelemetryError::BackendRejection { count, reason }
                    );
                }
                Err(e) => {
                    warn!(
                        store = store.name(),
                        %endpoint,
                        retained = count,
                        error = %e,
                        "Flush aborted, batch kept for the next cycle"
                    );
                    report.error = Some(e);
                    break;
                }
            }
        }

        report
    }

    /// Write both stores' journals in compact form; no network
    pub fn snapshot_stores(&self) {
        if let Err(e) = self.events.snapshot() {
            warn!(store = self.events.name(), error = %e, "Snapshot failed");
        }
        if let Err(e) = self.people.snapshot() {
            warn!(store = self.people.name(), error = %e, "Snapshot failed");
        }
    }
}
