//! Client façade
//!
//! One `Client` per project token. It owns the identity manager, both
//! stores and the scheduler, and is the only type producers talk to.
//!
//! Producer calls (`track`, `identify`, `people().set(...)`) never fail and
//! never block on the network; problems are logged and flush outcomes are
//! reported through [`FlushReport`].

mod people;
mod push;
mod registry;

use std::path::Path;
use std::sync::Arc;

use serde_json::Value;
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::error::{TelemetryResult, TransportError};
use crate::flush::{FlushReport, FlushSettings, Flusher, HttpTransport, Transport};
use crate::identity::{DefaultIdentityPolicy, IdentityManager, ProfileDispatch};
use crate::scheduler::{
    FlushDelegate, LifecycleEvent, Scheduler, SchedulerSettings, SchedulerState,
};
use crate::store::{EventStore, IdentityArchive, PeopleStore, EVENTS_FILE, PEOPLE_FILE};
use crate::types::{ProfileOperation, Properties, PropertyValue};

pub use people::People;
pub use push::{campaign_properties, CAMPAIGN_RECEIVED};
pub use registry::{registry, Registry};

/// Telemetry client for one project token
pub struct Client {
    config: ClientConfig,
    identity: IdentityManager,
    events: Arc<EventStore>,
    people: Arc<PeopleStore>,
    scheduler: Arc<Scheduler>,
}

impl Client {
    /// Build a client that sends over HTTP to `config.server_url`
    pub fn new(config: ClientConfig) -> TelemetryResult<Self> {
        let transport = HttpTransport::from_config(&config)?;
        Self::with_transport(config, Arc::new(transport))
    }

    /// Build a client over any transport
    ///
    /// Persisted state for the token is loaded from `config.data_dir`. If it
    /// cannot be opened the client keeps working in memory.
    pub fn with_transport(
        config: ClientConfig,
        transport: Arc<dyn Transport>,
    ) -> TelemetryResult<Self> {
        config.validate()?;

        let state_dir = config.state_dir();
        let (events, people, archive) = match state_dir.as_deref() {
            Some(dir) => match open_stores(&config, dir) {
                Ok((events, people)) => (events, people, Some(IdentityArchive::new(dir))),
                Err(e) => {
                    warn!(
                        dir = %dir.display(),
                        error = %e,
                        "Failed to open persisted state, continuing in memory"
                    );
                    in_memory_stores(&config)
                }
            },
            None => in_memory_stores(&config),
        };

        let identity = IdentityManager::new(
            config.token.clone(),
            DefaultIdentityPolicy::new(config.device_id.clone()),
            config.max_queue_size,
            archive,
        );

        let events = Arc::new(events);
        let people = Arc::new(people);
        let flusher = Flusher::new(
            events.clone(),
            people.clone(),
            transport,
            FlushSettings::from_config(&config),
        );
        let scheduler = Arc::new(Scheduler::new(
            flusher,
            SchedulerSettings::from_config(&config),
        ));

        info!(
            distinct_id = %identity.distinct_id(),
            pending_events = events.len(),
            pending_people = people.len(),
            persistent = events.is_persistent(),
            "Client initialized"
        );

        Ok(Self {
            config,
            identity,
            events,
            people,
            scheduler,
        })
    }

    /// Start the periodic flush timer on the current tokio runtime
    pub fn start(&self) {
        self.scheduler.start();
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn token(&self) -> &str {
        &self.config.token
    }

    pub fn identity(&self) -> &IdentityManager {
        &self.identity
    }

    pub fn event_store(&self) -> &Arc<EventStore> {
        &self.events
    }

    pub fn people_store(&self) -> &Arc<PeopleStore> {
        &self.people
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    pub fn scheduler_state(&self) -> SchedulerState {
        self.scheduler.state()
    }

    pub fn set_delegate(&self, delegate: Arc<dyn FlushDelegate>) {
        self.scheduler.set_delegate(delegate);
    }

    // ---- events ----

    pub fn track(&self, name: &str) {
        self.track_with(name, Properties::new());
    }

    /// Stamp and enqueue an event
    pub fn track_with(&self, name: &str, properties: Properties) {
        if name.is_empty() {
            warn!("Ignoring track with an empty event name");
            return;
        }
        let record = self.identity.stamp_event(name, properties);
        let id = self.events.append(record);
        debug!(event = name, record_id = id, "Event queued");
    }

    /// Track with properties given as a JSON object
    ///
    /// Returns `InvalidProperty` (and tracks nothing) if the object holds a
    /// value outside the accepted set.
    pub fn track_json(&self, name: &str, properties: Value) -> TelemetryResult<()> {
        let properties = Properties::from_json(properties)?;
        self.track_with(name, properties);
        Ok(())
    }

    /// Track `$campaign_received` for a push payload carrying campaign info
    pub fn track_push_notification(&self, payload: &Value) {
        match campaign_properties(payload) {
            Some(properties) => self.track_with(CAMPAIGN_RECEIVED, properties),
            None => warn!("Push payload has no usable campaign info, nothing tracked"),
        }
    }

    pub fn time_event(&self, name: &str) {
        self.identity.time_event(name);
    }

    pub fn clear_timed_events(&self) {
        self.identity.clear_timed_events();
    }

    // ---- identity ----

    pub fn distinct_id(&self) -> String {
        self.identity.distinct_id()
    }

    /// Use `id` for events and profile updates from now on
    pub fn identify(&self, id: &str) {
        let people = &self.people;
        self.identity.identify(id, |released| {
            people.append_all(released);
        });
    }

    /// Map `alias` onto `canonical`
    pub fn create_alias(&self, alias: &str, canonical: &str) {
        if let Some(mutation) = self.identity.create_alias(alias, canonical) {
            self.people.append(mutation);
        }
    }

    pub fn register_super_properties(&self, properties: &Properties) {
        self.identity.register_super_properties(properties);
    }

    pub fn register_super_properties_once(
        &self,
        properties: &Properties,
        default_value: Option<&PropertyValue>,
    ) {
        self.identity
            .register_super_properties_once(properties, default_value);
    }

    pub fn unregister_super_property(&self, name: &str) {
        self.identity.unregister_super_property(name);
    }

    pub fn clear_super_properties(&self) {
        self.identity.clear_super_properties();
    }

    pub fn current_super_properties(&self) -> Properties {
        self.identity.current_super_properties()
    }

    /// Human-readable tag sent as `mp_name_tag` with every event
    pub fn set_name_tag(&self, name_tag: Option<String>) {
        self.identity.set_name_tag(name_tag);
    }

    /// Drop identity, super properties, timers and every queued record
    pub fn reset(&self) {
        self.identity.reset();
        self.events.clear();
        self.people.clear();
        info!(distinct_id = %self.identity.distinct_id(), "Client reset");
    }

    // ---- people ----

    pub fn people(&self) -> People<'_> {
        People::new(self)
    }

    pub(crate) fn enqueue_profile(
        &self,
        operation: ProfileOperation,
        payload: PropertyValue,
    ) -> ProfileDispatch {
        let people = &self.people;
        self.identity.stamp_profile(operation, payload, |mutation| {
            people.append(mutation);
        })
    }

    pub(crate) fn identify_people(&self, id: &str) {
        let people = &self.people;
        self.identity.identify_people(id, |released| {
            people.append_all(released);
        });
    }

    // ---- flushing & lifecycle ----

    /// Flush both stores and wait for the outcome
    pub async fn flush(&self) -> FlushReport {
        self.scheduler.flush().await
    }

    /// Flush without waiting; `completion` runs exactly once with the report
    pub fn flush_with_completion<F>(&self, completion: F)
    where
        F: FnOnce(FlushReport) + Send + 'static,
    {
        let rx = self.scheduler.request_flush();
        match Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    let report = rx.await.unwrap_or_else(|_| {
                        FlushReport::failed(TransportError::Connection(
                            "flush task ended before reporting".to_string(),
                        ))
                    });
                    completion(report);
                });
            }
            Err(_) => {
                warn!("flush_with_completion called outside a tokio runtime");
                completion(FlushReport::failed(TransportError::Connection(
                    "no tokio runtime".to_string(),
                )));
            }
        }
    }

    pub fn handle_lifecycle(&self, event: LifecycleEvent) {
        self.scheduler.handle_lifecycle(event);
    }

    pub fn application_did_become_active(&self) {
        self.handle_lifecycle(LifecycleEvent::BecameActive);
    }

    pub fn application_did_enter_background(&self) {
        self.handle_lifecycle(LifecycleEvent::EnteredBackground);
    }

    /// Snapshot everything and stop flushing until [`Client::resume`]
    pub fn application_will_terminate(&self) {
        self.handle_lifecycle(LifecycleEvent::WillTerminate);
        if let Err(e) = self.identity.persist() {
            warn!(error = %e, "Failed to persist identity on terminate");
        }
    }

    pub fn resume(&self) {
        self.scheduler.resume();
    }

    /// Write identity and both queues to disk now
    pub fn archive(&self) -> TelemetryResult<()> {
        self.identity.persist()?;
        self.events.snapshot()?;
        self.people.snapshot()?;
        debug!("Client state archived");
        Ok(())
    }
}

fn open_stores(config: &ClientConfig, dir: &Path) -> TelemetryResult<(EventStore, PeopleStore)> {
    let events = EventStore::open(
        "events",
        dir,
        EVENTS_FILE,
        config.max_queue_size,
        config.compact_threshold,
    )?;
    let people = PeopleStore::open(
        "people",
        dir,
        PEOPLE_FILE,
        config.max_queue_size,
        config.compact_threshold,
    )?;
    Ok((events, people))
}

fn in_memory_stores(config: &ClientConfig) -> (EventStore, PeopleStore, Option<IdentityArchive>) {
    (
        EventStore::in_memory("events", config.max_queue_size),
        PeopleStore::in_memory("people", config.max_queue_size),
        None,
    )
}
