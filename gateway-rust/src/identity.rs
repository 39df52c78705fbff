//! # identity
//!
//! Single owner of the session identity handed to the navigation application
//! and expected on every inbound route plan.
//!
//! ## States
//! - **Unset**: nothing persisted. The first [`IdentityRegistry::current`]
//!   generates a value, persists it and moves to Set.
//! - **Set**: a value is persisted. Reads return it unchanged, whatever the
//!   `autoGenerate` setting says. Only [`IdentityRegistry::set_manually`] and
//!   [`IdentityRegistry::regenerate`] replace it.
//!
//! Every mutation, including the generate branch of `current()`, runs under
//! one mutex together with the disk write, so concurrent first reads cannot
//! both generate.
//!
//! A failed disk write never loses the in-memory value. Reads log a warning
//! and publish [`IdentityEvent::PersistenceFailed`]; operator-triggered calls
//! additionally return [`IdentityError::NotPersisted`].

use std::io;

use chrono::Utc;
use rand::Rng;
use range_types::Identity;
use serde::Serialize;
use tokio::sync::{broadcast, Mutex};
use tracing::{info, warn};

use crate::error::IdentityError;
use crate::persistence::{HistoryEntry, IdentityFile, IdentityStore};
use crate::state::IdentitySnapshot;

pub const AUTO_GENERATED_REASON: &str = "system auto-generated";
pub const USER_REQUESTED_REASON: &str = "user requested";

const EVENT_BUS_CAPACITY: usize = 32;

pub type IdentityGenerator = Box<dyn Fn() -> Identity + Send + Sync>;

pub fn random_identity() -> Identity {
    Identity::from_offset(rand::thread_rng().gen_range(0..=Identity::MAX - Identity::MIN))
}

fn indicates_auto_generation(description: &str) -> bool {
    let d = description.to_ascii_lowercase();
    d.contains("auto-generated") || d.contains("auto generated") || d.contains("autogenerated")
}

// ── Events ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum IdentityEvent {
    #[serde(rename_all = "camelCase")]
    Changed {
        identity: Identity,
        previous: Option<Identity>,
        reason: String,
    },
    #[serde(rename_all = "camelCase")]
    PersistenceFailed { identity: Identity, error: String },
}

impl IdentityEvent {
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::Changed { .. } => "identity-changed",
            Self::PersistenceFailed { .. } => "identity-warning",
        }
    }
}

// ── Registry ──────────────────────────────────────────────────────────────────

struct Inner {
    current: Option<Identity>,
    file: IdentityFile,
}

pub struct IdentityRegistry {
    inner: Mutex<Inner>,
    store: IdentityStore,
    events: broadcast::Sender<IdentityEvent>,
    generate: IdentityGenerator,
    history_limit: usize,
}

impl IdentityRegistry {
    /// Load the persisted store. A missing, corrupt or unparsable `currentId`
    /// starts the registry Unset.
    pub async fn open(store: IdentityStore, history_limit: usize) -> Self {
        let mut file = store.load().await;
        let current = match file.current_id.as_deref().map(str::parse::<Identity>) {
            Some(Ok(identity)) => Some(identity),
            Some(Err(e)) => {
                warn!("Identity store holds an invalid currentId: {e}; treating as unset");
                file.current_id = None;
                None
            }
            None => None,
        };
        let (events, _) = broadcast::channel(EVENT_BUS_CAPACITY);

        Self {
            inner: Mutex::new(Inner { current, file }),
            store,
            events,
            generate: Box::new(random_identity),
            history_limit: history_limit.max(1),
        }
    }

    #[cfg(test)]
    pub fn with_generator(mut self, generate: impl Fn() -> Identity + Send + Sync + 'static) -> Self {
        self.generate = Box::new(generate);
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<IdentityEvent> {
        self.events.subscribe()
    }

    /// The current identity, generating and persisting one only when Unset.
    pub async fn current(&self) -> Identity {
        let mut inner = self.inner.lock().await;
        if let Some(identity) = inner.current {
            return identity;
        }

        let identity = (self.generate)();
        if !inner.file.settings.auto_generate {
            info!("Identity: no stored value and autoGenerate is off; generating {identity} anyway");
        }
        info!("Identity: generated {identity} ({AUTO_GENERATED_REASON})");
        if let Err(e) = self.apply(&mut inner, identity, AUTO_GENERATED_REASON, false).await {
            warn!("Identity: {identity} is active but could not be persisted: {e}");
        }
        identity
    }

    /// Current identity without generating one.
    pub async fn peek(&self) -> Option<Identity> {
        self.inner.lock().await.current
    }

    /// Operator-supplied identity. Clears `autoGenerate` unless the
    /// description itself marks the value as auto-generated.
    pub async fn set_manually(&self, value: u32, description: &str) -> Result<Identity, IdentityError> {
        let identity = Identity::new(value)?;
        let mut inner = self.inner.lock().await;
        let clear_auto = !indicates_auto_generation(description);
        info!("Identity: set manually to {identity} ({description})");
        self.apply(&mut inner, identity, description, clear_auto)
            .await
            .map_err(|source| self.not_persisted(identity, source))?;
        Ok(identity)
    }

    /// Explicit operator request for a fresh identity. Leaves `autoGenerate`
    /// untouched.
    pub async fn regenerate(&self) -> Result<Identity, IdentityError> {
        let mut inner = self.inner.lock().await;
        let identity = (self.generate)();
        info!("Identity: regenerated {identity} ({USER_REQUESTED_REASON})");
        self.apply(&mut inner, identity, USER_REQUESTED_REASON, false)
            .await
            .map_err(|source| self.not_persisted(identity, source))?;
        Ok(identity)
    }

    /// Identity to hand to the navigation application at launch. Generates
    /// once if Unset; never replaces an existing value.
    pub async fn prepare_for_external_launch(&self) -> Identity {
        self.current().await
    }

    /// The new setting applies in memory even when the write fails.
    pub async fn set_auto_generate(&self, enabled: bool) -> Result<(), IdentityError> {
        let mut inner = self.inner.lock().await;
        inner.file.settings.auto_generate = enabled;
        self.store.save(&inner.file).await.map_err(|source| {
            warn!("Identity: autoGenerate={enabled} could not be persisted: {source}");
            IdentityError::SettingsNotPersisted {
                path: self.store.path().to_path_buf(),
                source,
            }
        })
    }

    pub async fn snapshot(&self) -> IdentitySnapshot {
        let inner = self.inner.lock().await;
        IdentitySnapshot {
            current: inner.current,
            auto_generate: inner.file.settings.auto_generate,
            history: inner.file.history.clone(),
        }
    }

    /// Must be called with the lock held. Updates memory first, then disk.
    async fn apply(
        &self,
        inner: &mut Inner,
        identity: Identity,
        reason: &str,
        clear_auto: bool,
    ) -> io::Result<()> {
        let previous = inner.current.replace(identity);
        inner.file.current_id = Some(identity.to_string());
        if clear_auto {
            inner.file.settings.auto_generate = false;
        }
        inner.file.history.push(HistoryEntry {
            id: identity.to_string(),
            generated_at: Utc::now(),
            description: reason.to_string(),
        });
        let excess = inner.file.history.len().saturating_sub(self.history_limit);
        inner.file.history.drain(..excess);

        let _ = self.events.send(IdentityEvent::Changed {
            identity,
            previous,
            reason: reason.to_string(),
        });

        if let Err(e) = self.store.save(&inner.file).await {
            let _ = self.events.send(IdentityEvent::PersistenceFailed {
                identity,
                error: e.to_string(),
            });
            return Err(e);
        }
        Ok(())
    }

    fn not_persisted(&self, identity: Identity, source: io::Error) -> IdentityError {
        IdentityError::NotPersisted {
            identity,
            path: self.store.path().to_path_buf(),
            source,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::path::Path;
    use std::sync::atomic::{AtomicU16, Ordering};
    use std::sync::Arc;

    use super::*;

    /// Generator yielding 1000, 1001, 1002, ... and counting its calls.
    pub(crate) fn counting_generator() -> (Arc<AtomicU16>, impl Fn() -> Identity + Send + Sync + 'static) {
        let calls = Arc::new(AtomicU16::new(0));
        let counter = calls.clone();
        let generate = move || Identity::from_offset(counter.fetch_add(1, Ordering::SeqCst));
        (calls, generate)
    }

    pub(crate) async fn open_at(path: &Path) -> (IdentityRegistry, Arc<AtomicU16>) {
        let (calls, generate) = counting_generator();
        let registry = IdentityRegistry::open(IdentityStore::new(path), 100)
            .await
            .with_generator(generate);
        (registry, calls)
    }

    fn id(value: u32) -> Identity {
        Identity::new(value).unwrap()
    }

    #[tokio::test]
    async fn test_current_generates_once_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("identity.json");
        let (registry, calls) = open_at(&path).await;

        let first = registry.current().await;
        for _ in 0..20 {
            assert_eq!(registry.current().await, first);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let file = IdentityStore::new(&path).load().await;
        assert_eq!(file.current_id, Some(first.to_string()));
        assert_eq!(file.history.len(), 1);
        assert_eq!(file.history[0].description, AUTO_GENERATED_REASON);
        assert!(file.settings.auto_generate);
    }

    #[tokio::test]
    async fn test_current_never_regenerates_while_auto_generate_is_on() {
        let dir = tempfile::tempdir().unwrap();
        let (registry, calls) = open_at(&dir.path().join("identity.json")).await;

        let first = registry.current().await;
        assert!(registry.snapshot().await.auto_generate);
        assert_eq!(registry.current().await, first);
        assert_eq!(registry.prepare_for_external_launch().await, first);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_concurrent_first_reads_generate_once() {
        let dir = tempfile::tempdir().unwrap();
        let (registry, calls) = open_at(&dir.path().join("identity.json")).await;
        let registry = Arc::new(registry);

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let registry = registry.clone();
                tokio::spawn(async move { registry.current().await })
            })
            .collect();

        let mut seen = Vec::new();
        for handle in handles {
            seen.push(handle.await.unwrap());
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(seen.iter().all(|v| *v == seen[0]));
    }

    #[tokio::test]
    async fn test_persisted_value_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("identity.json");
        let (registry, _) = open_at(&path).await;
        let set = registry.set_manually(4242, "range officer").await.unwrap();
        drop(registry);

        let (reopened, calls) = open_at(&path).await;
        assert_eq!(reopened.current().await, set);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_set_manually_sticks_and_clears_auto_generate() {
        let dir = tempfile::tempdir().unwrap();
        let (registry, calls) = open_at(&dir.path().join("identity.json")).await;

        registry.current().await;
        registry.set_manually(1234, "user note").await.unwrap();
        for _ in 0..5 {
            assert_eq!(registry.current().await, id(1234));
        }
        assert!(!registry.snapshot().await.auto_generate);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let history = registry.snapshot().await.history;
        assert_eq!(history.last().unwrap().description, "user note");
        assert_eq!(history.last().unwrap().id, "1234");
    }

    #[tokio::test]
    async fn test_set_manually_with_auto_description_keeps_flag() {
        let dir = tempfile::tempdir().unwrap();
        let (registry, _) = open_at(&dir.path().join("identity.json")).await;

        registry.set_manually(5555, "System Auto-Generated").await.unwrap();
        assert!(registry.snapshot().await.auto_generate);
        assert_eq!(registry.current().await, id(5555));
    }

    #[tokio::test]
    async fn test_set_manually_rejects_out_of_range() {
        let dir = tempfile::tempdir().unwrap();
        let (registry, _) = open_at(&dir.path().join("identity.json")).await;

        assert!(matches!(
            registry.set_manually(99, "typo").await,
            Err(IdentityError::Invalid(_))
        ));
        assert_eq!(registry.peek().await, None);
    }

    #[tokio::test]
    async fn test_regenerate_replaces_value_and_keeps_flag() {
        let dir = tempfile::tempdir().unwrap();
        let (registry, calls) = open_at(&dir.path().join("identity.json")).await;

        let first = registry.current().await;
        let second = registry.regenerate().await.unwrap();
        assert_ne!(first, second);
        assert_eq!(registry.current().await, second);
        assert!(registry.snapshot().await.auto_generate);
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        let history = registry.snapshot().await.history;
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].description, USER_REQUESTED_REASON);
    }

    #[tokio::test]
    async fn test_prepare_for_launch_when_unset_generates_once() {
        let dir = tempfile::tempdir().unwrap();
        let (registry, calls) = open_at(&dir.path().join("identity.json")).await;

        let launched = registry.prepare_for_external_launch().await;
        assert_eq!(registry.current().await, launched);
        assert_eq!(registry.prepare_for_external_launch().await, launched);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_events_published_on_change() {
        let dir = tempfile::tempdir().unwrap();
        let (registry, _) = open_at(&dir.path().join("identity.json")).await;
        let mut events = registry.subscribe();

        let first = registry.current().await;
        let second = registry.regenerate().await.unwrap();

        assert_eq!(
            events.recv().await.unwrap(),
            IdentityEvent::Changed {
                identity: first,
                previous: None,
                reason: AUTO_GENERATED_REASON.into(),
            }
        );
        assert_eq!(
            events.recv().await.unwrap(),
            IdentityEvent::Changed {
                identity: second,
                previous: Some(first),
                reason: USER_REQUESTED_REASON.into(),
            }
        );
    }

    #[tokio::test]
    async fn test_persistence_failure_keeps_in_memory_value() {
        let dir = tempfile::tempdir().unwrap();
        let (registry, calls) = open_at(&dir.path().join("missing").join("identity.json")).await;
        let mut events = registry.subscribe();

        let first = registry.current().await;
        assert_eq!(registry.current().await, first);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        match registry.regenerate().await {
            Err(IdentityError::NotPersisted { identity, .. }) => {
                assert_eq!(registry.current().await, identity);
            }
            other => panic!("expected NotPersisted, got {other:?}"),
        }

        let _changed = events.recv().await.unwrap();
        assert!(matches!(
            events.recv().await.unwrap(),
            IdentityEvent::PersistenceFailed { identity, .. } if identity == first
        ));
    }

    #[tokio::test]
    async fn test_invalid_stored_id_starts_unset() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("identity.json");
        std::fs::write(&path, r#"{ "currentId": "12", "history": [], "settings": { "autoGenerate": false } }"#).unwrap();

        let (registry, calls) = open_at(&path).await;
        assert_eq!(registry.peek().await, None);
        let generated = registry.current().await;
        assert_eq!(generated, id(1000));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!registry.snapshot().await.auto_generate);
    }

    #[tokio::test]
    async fn test_set_auto_generate_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("identity.json");
        let (registry, _) = open_at(&path).await;

        registry.set_auto_generate(false).await.unwrap();
        assert!(!registry.snapshot().await.auto_generate);
        assert!(!IdentityStore::new(&path).load().await.settings.auto_generate);
    }

    #[tokio::test]
    async fn test_set_auto_generate_reports_failed_write_when_unset() {
        let dir = tempfile::tempdir().unwrap();
        let (registry, _) = open_at(&dir.path().join("missing").join("identity.json")).await;

        assert!(matches!(
            registry.set_auto_generate(false).await,
            Err(IdentityError::SettingsNotPersisted { .. })
        ));
        assert_eq!(registry.peek().await, None);
    }

    #[test]
    fn test_random_identity_stays_in_range() {
        for _ in 0..10_000 {
            let value = random_identity().value();
            assert!((1000..=9999).contains(&value), "{value} out of range");
        }
    }

    #[tokio::test]
    async fn test_default_generator_yields_stable_four_digit_identity() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("identity.json");
        let registry = IdentityRegistry::open(IdentityStore::new(&path), 100).await;

        let first = registry.current().await;
        assert_eq!(first.to_string().len(), 4);
        assert!((1000..=9999).contains(&first.value()));
        assert_eq!(registry.current().await, first);
        assert_eq!(IdentityStore::new(&path).load().await.current_id, Some(first.to_string()));
    }

    #[tokio::test]
    async fn test_history_is_capped() {
        let dir = tempfile::tempdir().unwrap();
        let registry = IdentityRegistry::open(IdentityStore::new(dir.path().join("identity.json")), 3).await;

        for value in 2001..=2005 {
            registry.set_manually(value, "bulk").await.unwrap();
        }
        let ids: Vec<_> = registry.snapshot().await.history.into_iter().map(|h| h.id).collect();
        assert_eq!(ids, vec!["2003", "2004", "2005"]);
    }
}
