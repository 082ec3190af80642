//! Identity state of a client
//!
//! Holds the distinct id, the profile identity, the alias table, super
//! properties, event timers and the buffer of profile mutations issued
//! before any profile identity was known.
//!
//! Everything except the timers is written to `identity.json` after each
//! mutation. Callers that have to append to a store while the identity
//! changes (e.g. `identify` releasing buffered mutations) do so through a
//! sink closure that runs under the identity lock, which keeps the lock
//! order identity → store.

mod default_id;
mod timers;

use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::TelemetryResult;
use crate::store::IdentityArchive;
use crate::types::{
    system_keys, EventRecord, PendingMutation, ProfileMutation, ProfileOperation, Properties,
    PropertyValue,
};
use crate::utils::time;

pub use default_id::DefaultIdentityPolicy;
pub use timers::EventTimers;

/// Value of the `mp_lib` system property
pub const LIB_NAME: &str = "rust";

/// Persisted part of the identity state
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct IdentitySnapshot {
    pub distinct_id: String,
    pub people_distinct_id: Option<String>,
    /// alias → canonical id
    pub aliases: BTreeMap<String, String>,
    pub super_properties: Properties,
    pub unidentified_people: VecDeque<PendingMutation>,
    pub name_tag: Option<String>,
}

/// Where a profile mutation went
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileDispatch {
    /// Bound to the profile identity and handed to the sink
    Queued,
    /// Held until a profile identity is set
    Buffered,
    /// Refused because the payload holds an invalid value
    Rejected,
}

struct IdentityState {
    persisted: IdentitySnapshot,
    timers: EventTimers,
}

/// Identity manager for one project token
pub struct IdentityManager {
    token: String,
    policy: DefaultIdentityPolicy,
    buffer_capacity: usize,
    archive: Option<IdentityArchive>,
    state: Mutex<IdentityState>,
}

impl IdentityManager {
    /// Create the manager, loading archived state when an archive is given
    ///
    /// A missing or unreadable archive yields a fresh identity from `policy`.
    pub fn new(
        token: impl Into<String>,
        policy: DefaultIdentityPolicy,
        buffer_capacity: usize,
        archive: Option<IdentityArchive>,
    ) -> Self {
        let loaded = match archive.as_ref().map(|a| a.load::<IdentitySnapshot>()) {
            Some(Ok(Some(snapshot))) => Some(snapshot),
            Some(Ok(None)) | None => None,
            Some(Err(e)) => {
                warn!(error = %e, "Failed to load identity archive");
                None
            }
        };
        let restored = loaded.is_some();

        let mut persisted = loaded.unwrap_or_default();
        if persisted.distinct_id.is_empty() {
            persisted.distinct_id = policy.resolve();
        }

        let manager = Self {
            token: token.into(),
            policy,
            buffer_capacity: buffer_capacity.max(1),
            archive,
            state: Mutex::new(IdentityState {
                persisted,
                timers: EventTimers::new(),
            }),
        };

        if !restored {
            let state = manager.state.lock();
            manager.persist_locked(&state);
        }
        manager
    }

    /// In-memory manager with the default policy
    pub fn in_memory(token: impl Into<String>) -> Self {
        Self::new(token, DefaultIdentityPolicy::default(), 500, None)
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn distinct_id(&self) -> String {
        self.state.lock().persisted.distinct_id.clone()
    }

    pub fn people_distinct_id(&self) -> Option<String> {
        self.state.lock().persisted.people_distinct_id.clone()
    }

    pub fn alias_for(&self, alias: &str) -> Option<String> {
        self.state.lock().persisted.aliases.get(alias).cloned()
    }

    pub fn aliases(&self) -> BTreeMap<String, String> {
        self.state.lock().persisted.aliases.clone()
    }

    pub fn name_tag(&self) -> Option<String> {
        self.state.lock().persisted.name_tag.clone()
    }

    /// Number of profile mutations waiting for a profile identity
    pub fn unidentified_len(&self) -> usize {
        self.state.lock().persisted.unidentified_people.len()
    }

    pub fn snapshot(&self) -> IdentitySnapshot {
        self.state.lock().persisted.clone()
    }

    /// Switch to `id` for events and profile mutations
    ///
    /// Buffered profile mutations are bound to `id` and passed to `release`
    /// in their original order. Returns false if `id` is empty.
    pub fn identify<F>(&self, id: &str, release: F) -> bool
    where
        F: FnOnce(Vec<ProfileMutation>),
    {
        if id.is_empty() {
            warn!("Ignoring identify with an empty distinct id");
            return false;
        }

        let mut state = self.state.lock();
        state.persisted.distinct_id = id.to_string();
        Self::set_profile_identity(&mut state, id, release);
        self.persist_locked(&state);
        debug!(distinct_id = id, "Identified");
        true
    }

    /// Set only the profile identity, leaving the event distinct id alone
    pub fn identify_people<F>(&self, id: &str, release: F) -> bool
    where
        F: FnOnce(Vec<ProfileMutation>),
    {
        if id.is_empty() {
            warn!("Ignoring people identify with an empty distinct id");
            return false;
        }

        let mut state = self.state.lock();
        Self::set_profile_identity(&mut state, id, release);
        self.persist_locked(&state);
        true
    }

    fn set_profile_identity<F>(state: &mut IdentityState, id: &str, release: F)
    where
        F: FnOnce(Vec<ProfileMutation>),
    {
        state.persisted.people_distinct_id = Some(id.to_string());

        let released: Vec<ProfileMutation> = state
            .persisted
            .unidentified_people
            .drain(..)
            .map(|pending| pending.into_mutation(id))
            .collect();
        if !released.is_empty() {
            debug!(count = released.len(), distinct_id = id, "Releasing buffered profile mutations");
            release(released);
        }
    }

    /// Record `alias` → `canonical` and build the matching `CreateAlias` mutation
    ///
    /// Returns `None` (and changes nothing) for an empty alias, an empty
    /// canonical id, or an alias equal to the canonical id.
    pub fn create_alias(&self, alias: &str, canonical: &str) -> Option<ProfileMutation> {
        if alias.is_empty() || canonical.is_empty() {
            warn!(alias, canonical, "Ignoring create_alias with an empty id");
            return None;
        }
        if alias == canonical {
            warn!(alias, "Ignoring create_alias where alias equals the distinct id");
            return None;
        }

        let mut state = self.state.lock();
        state
            .persisted
            .aliases
            .insert(alias.to_string(), canonical.to_string());
        self.persist_locked(&state);

        let payload = Properties::new()
            .with("alias", alias)
            .with("original", canonical);
        Some(ProfileMutation {
            operation: ProfileOperation::CreateAlias,
            distinct_id: canonical.to_string(),
            payload: payload.into(),
            timestamp: time::now(),
        })
    }

    /// Overwrite-merge into the super properties
    pub fn register_super_properties(&self, properties: &Properties) {
        let properties = valid_only(properties.clone());
        let mut state = self.state.lock();
        state.persisted.super_properties.merge(&properties);
        self.persist_locked(&state);
    }

    /// Merge only keys that are absent, or present with `default_value`
    pub fn register_super_properties_once(
        &self,
        properties: &Properties,
        default_value: Option<&PropertyValue>,
    ) {
        let properties = valid_only(properties.clone());
        let mut state = self.state.lock();
        let supers = &mut state.persisted.super_properties;
        for (key, value) in properties.iter() {
            let replace = match supers.get(key) {
                None => true,
                Some(existing) => default_value == Some(existing),
            };
            if replace {
                supers.insert(key.clone(), value.clone());
            }
        }
        self.persist_locked(&state);
    }

    pub fn unregister_super_property(&self, name: &str) {
        let mut state = self.state.lock();
        if state.persisted.super_properties.remove(name).is_some() {
            self.persist_locked(&state);
        }
    }

    pub fn clear_super_properties(&self) {
        let mut state = self.state.lock();
        state.persisted.super_properties.clear();
        self.persist_locked(&state);
    }

    pub fn current_super_properties(&self) -> Properties {
        self.state.lock().persisted.super_properties.clone()
    }

    pub fn set_name_tag(&self, name_tag: Option<String>) {
        let mut state = self.state.lock();
        state.persisted.name_tag = name_tag.filter(|tag| !tag.is_empty());
        self.persist_locked(&state);
    }

    /// Start timing `name`; the next `track` of `name` carries `$duration`
    pub fn time_event(&self, name: &str) {
        self.state.lock().timers.start(name);
    }

    pub fn clear_timed_events(&self) {
        self.state.lock().timers.clear();
    }

    /// Build the event record for a `track` call
    ///
    /// Precedence, lowest first: super properties, call properties,
    /// `$duration`, system properties.
    pub fn stamp_event(&self, name: &str, properties: Properties) -> EventRecord {
        let properties = valid_only(properties);
        let now = time::now();
        let mut state = self.state.lock();

        let mut merged = state.persisted.super_properties.clone();
        merged.merge(&properties);

        if let Some(elapsed) = state.timers.consume(name) {
            merged.insert(system_keys::DURATION, PropertyValue::Float(duration_secs(elapsed)));
        }

        let distinct_id = state.persisted.distinct_id.clone();
        merged.insert(system_keys::DISTINCT_ID, distinct_id.clone());
        merged.insert(system_keys::TOKEN, self.token.clone());
        merged.insert(system_keys::TIME, time::unix_seconds(&now));
        merged.insert(system_keys::LIB, LIB_NAME);
        merged.insert(system_keys::LIB_VERSION, crate::VERSION);
        if let Some(tag) = &state.persisted.name_tag {
            merged.insert(system_keys::NAME_TAG, tag.clone());
        }

        EventRecord::new(name, merged, now, distinct_id)
    }

    /// Route a profile mutation to `sink` or to the unidentified buffer
    ///
    /// At buffer capacity the oldest buffered mutation is dropped.
    pub fn stamp_profile<F>(
        &self,
        operation: ProfileOperation,
        payload: PropertyValue,
        sink: F,
    ) -> ProfileDispatch
    where
        F: FnOnce(ProfileMutation),
    {
        if let Err(reason) = payload.validate() {
            warn!(%operation, reason = %reason, "Refusing profile mutation with an invalid value");
            return ProfileDispatch::Rejected;
        }
        let pending = PendingMutation::new(operation, payload, time::now());
        let mut state = self.state.lock();

        if let Some(id) = state.persisted.people_distinct_id.clone() {
            sink(pending.into_mutation(id));
            return ProfileDispatch::Queued;
        }

        let buffer = &mut state.persisted.unidentified_people;
        if buffer.len() >= self.buffer_capacity {
            if let Some(dropped) = buffer.pop_front() {
                warn!(
                    operation = %dropped.operation,
                    capacity = self.buffer_capacity,
                    "Unidentified profile buffer full, dropping oldest mutation"
                );
            }
        }
        buffer.push_back(pending);
        self.persist_locked(&state);
        ProfileDispatch::Buffered
    }

    /// Forget everything and start over with the default distinct id
    pub fn reset(&self) {
        let mut state = self.state.lock();
        let name_tag = state.persisted.name_tag.take();
        state.persisted = IdentitySnapshot {
            distinct_id: self.policy.resolve(),
            name_tag,
            ..Default::default()
        };
        state.timers.clear();
        self.persist_locked(&state);
        debug!(distinct_id = %state.persisted.distinct_id, "Identity reset");
    }

    /// Write the current state to the archive, if any
    pub fn persist(&self) -> TelemetryResult<()> {
        let state = self.state.lock();
        match &self.archive {
            Some(archive) => archive.save(&state.persisted),
            None => Ok(()),
        }
    }

    fn persist_locked(&self, state: &IdentityState) {
        if let Some(archive) = &self.archive {
            if let Err(e) = archive.save(&state.persisted) {
                warn!(path = %archive.path().display(), error = %e, "Failed to persist identity");
            }
        }
    }
}

/// `properties` minus the entries that would not survive a reload
fn valid_only(mut properties: Properties) -> Properties {
    for (key, reason) in properties.remove_invalid() {
        warn!(key = %key, reason = %reason, "Dropping invalid property");
    }
    properties
}

/// Seconds with millisecond precision
fn duration_secs(elapsed: Duration) -> f64 {
    elapsed.as_millis() as f64 / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn manager() -> IdentityManager {
        IdentityManager::new(
            "tok",
            DefaultIdentityPolicy::new(Some("device-1".to_string())),
            3,
            None,
        )
    }

    #[test]
    fn test_default_id_from_policy() {
        let identity = manager();
        assert_eq!(identity.distinct_id(), "device-1");
        assert_eq!(identity.people_distinct_id(), None);
    }

    #[test]
    fn test_stamping_precedence() {
        let identity = manager();
        identity.register_super_properties(&Properties::new().with("a", 1).with("b", 2));

        let call = Properties::new()
            .with("b", 3)
            .with("c", 4)
            .with(system_keys::DISTINCT_ID, "spoofed");
        let record = identity.stamp_event("Opened", call);

        assert_eq!(record.properties.get("a"), Some(&PropertyValue::Int(1)));
        assert_eq!(record.properties.get("b"), Some(&PropertyValue::Int(3)));
        assert_eq!(record.properties.get("c"), Some(&PropertyValue::Int(4)));
        assert_eq!(
            record.properties.get(system_keys::DISTINCT_ID),
            Some(&PropertyValue::from("device-1"))
        );
        assert_eq!(
            record.properties.get(system_keys::TOKEN),
            Some(&PropertyValue::from("tok"))
        );
        assert!(record.properties.contains_key(system_keys::TIME));
        assert!(!record.properties.contains_key(system_keys::NAME_TAG));
        assert_eq!(record.distinct_id, "device-1");
    }

    #[test]
    fn test_timed_event_adds_duration_once() {
        let identity = manager();
        identity.time_event("Upload");

        let first = identity.stamp_event("Upload", Properties::new());
        assert!(matches!(
            first.properties.get(system_keys::DURATION),
            Some(PropertyValue::Float(_))
        ));

        let second = identity.stamp_event("Upload", Properties::new());
        assert!(!second.properties.contains_key(system_keys::DURATION));
    }

    #[test]
    fn test_register_once_respects_default() {
        let identity = manager();
        identity.register_super_properties(&Properties::new().with("a", 2).with("b", 7));

        let default = PropertyValue::Int(2);
        identity.register_super_properties_once(
            &Properties::new().with("a", 5).with("b", 5).with("c", 5),
            Some(&default),
        );

        let supers = identity.current_super_properties();
        assert_eq!(supers.get("a"), Some(&PropertyValue::Int(5)));
        assert_eq!(supers.get("b"), Some(&PropertyValue::Int(7)));
        assert_eq!(supers.get("c"), Some(&PropertyValue::Int(5)));
    }

    #[test]
    fn test_unregister_missing_is_noop() {
        let identity = manager();
        identity.unregister_super_property("nope");
        assert!(identity.current_super_properties().is_empty());
    }

    #[test]
    fn test_profile_mutations_buffer_until_identify() {
        let identity = manager();
        for i in 0..2 {
            let dispatch = identity.stamp_profile(
                ProfileOperation::Set,
                Properties::new().with("step", i).into(),
                |_| panic!("no profile identity yet"),
            );
            assert_eq!(dispatch, ProfileDispatch::Buffered);
        }

        let mut released = Vec::new();
        assert!(identity.identify("user-42", |batch| released = batch));

        assert_eq!(released.len(), 2);
        assert!(released.iter().all(|m| m.distinct_id == "user-42"));
        assert_eq!(
            released[0].payload,
            PropertyValue::from(Properties::new().with("step", 0))
        );
        assert_eq!(identity.unidentified_len(), 0);

        let mut queued = None;
        let dispatch =
            identity.stamp_profile(ProfileOperation::Delete, PropertyValue::Null, |m| queued = Some(m));
        assert_eq!(dispatch, ProfileDispatch::Queued);
        assert_eq!(queued.unwrap().distinct_id, "user-42");
    }

    #[test]
    fn test_invalid_values_never_enter_identity_state() {
        let identity = manager();
        identity.register_super_properties(
            &Properties::new()
                .with("plan", "pro")
                .with("ratio", PropertyValue::Float(f64::NAN)),
        );
        identity.register_super_properties_once(
            &Properties::new().with("limit", PropertyValue::Float(f64::INFINITY)),
            None,
        );
        assert_eq!(
            identity.current_super_properties(),
            Properties::new().with("plan", "pro")
        );

        let record = identity.stamp_event(
            "Opened",
            Properties::new()
                .with("screen", "home")
                .with("link", PropertyValue::Url("nowhere".to_string())),
        );
        assert!(record.properties.contains_key("screen"));
        assert!(!record.properties.contains_key("link"));

        let dispatch = identity.stamp_profile(
            ProfileOperation::Set,
            Properties::new().with("score", PropertyValue::Float(f64::NAN)).into(),
            |_| panic!("invalid payload reached the sink"),
        );
        assert_eq!(dispatch, ProfileDispatch::Rejected);
        assert_eq!(identity.unidentified_len(), 0);
    }

    #[test]
    fn test_unidentified_buffer_is_bounded() {
        let identity = manager();
        for i in 0..5 {
            identity.stamp_profile(
                ProfileOperation::Increment,
                Properties::new().with("n", i).into(),
                |_| {},
            );
        }
        assert_eq!(identity.unidentified_len(), 3);

        let mut released = Vec::new();
        identity.identify("u", |batch| released = batch);
        assert_eq!(
            released[0].payload,
            PropertyValue::from(Properties::new().with("n", 2))
        );
    }

    #[test]
    fn test_empty_identify_is_ignored() {
        let identity = manager();
        assert!(!identity.identify("", |_| {}));
        assert_eq!(identity.distinct_id(), "device-1");
    }

    #[test]
    fn test_create_alias() {
        let identity = manager();
        assert!(identity.create_alias("", "user").is_none());
        assert!(identity.create_alias("user", "user").is_none());

        let mutation = identity.create_alias("nick", "user").unwrap();
        assert_eq!(mutation.operation, ProfileOperation::CreateAlias);
        assert_eq!(mutation.distinct_id, "user");
        assert_eq!(
            mutation.payload,
            PropertyValue::from(Properties::new().with("alias", "nick").with("original", "user"))
        );
        assert_eq!(identity.alias_for("nick"), Some("user".to_string()));
    }

    #[test]
    fn test_reset_clears_state() {
        let identity = manager();
        identity.identify("user", |_| {});
        identity.create_alias("nick", "user");
        identity.register_super_properties(&Properties::new().with("plan", "pro"));
        identity.time_event("Upload");

        identity.reset();

        assert_eq!(identity.distinct_id(), "device-1");
        assert_eq!(identity.people_distinct_id(), None);
        assert!(identity.aliases().is_empty());
        assert!(identity.current_super_properties().is_empty());
        let record = identity.stamp_event("Upload", Properties::new());
        assert!(!record.properties.contains_key(system_keys::DURATION));
    }

    #[test]
    fn test_state_survives_reload() {
        let dir = TempDir::new().unwrap();
        let open = || {
            IdentityManager::new(
                "tok",
                DefaultIdentityPolicy::default(),
                10,
                Some(IdentityArchive::new(dir.path())),
            )
        };

        let before = {
            let identity = open();
            identity.identify("user", |_| {});
            identity.create_alias("nick", "user");
            identity.register_super_properties(&Properties::new().with("plan", "pro"));
            identity.set_name_tag(Some("Alice".to_string()));
            identity.snapshot()
        };

        let reloaded = open();
        assert_eq!(reloaded.snapshot(), before);
        let record = reloaded.stamp_event("Opened", Properties::new());
        assert_eq!(
            record.properties.get(system_keys::NAME_TAG),
            Some(&PropertyValue::from("Alice"))
        );
    }
}
