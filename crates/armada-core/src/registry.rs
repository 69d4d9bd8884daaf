//! Target registry: a refreshable snapshot of everything the platform knows.
//!
//! The registry owns discovery. It keeps an immutable snapshot behind an
//! `RwLock<Arc<..>>`; refreshes build a complete replacement map and swap it
//! in, so readers never observe a half-applied refresh. Resolution works
//! against the current snapshot, falling back to a scoped platform query when
//! an identifier is missing or its record has outlived the freshness window.
//!
//! Records carry a generation stamp assigned when an identifier first
//! appears. The stamp survives state changes and changes only when the
//! identifier departs and later returns, which is how holders of a resolved
//! [`Target`] detect that the thing they are holding is gone.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use armada_core::host::HostBridge;
//! use armada_core::identifier::TargetIdentifier;
//! use armada_core::registry::{RegistrySettings, TargetRegistry};
//!
//! # async fn example() -> Result<(), armada_core::error::TargetError> {
//! let registry = TargetRegistry::new(Arc::new(HostBridge::new()), RegistrySettings::default());
//! let booted = registry.resolve(&TargetIdentifier::classify("booted")?).await?;
//! println!("{}: {}", booted.udid(), booted.state);
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::time::Instant;
use tracing::{debug, info};

use crate::config::DefaultTargetPolicy;
use crate::error::TargetError;
use crate::identifier::{SymbolicTarget, TargetIdentifier};
use crate::platform::{DiscoveredTarget, PlatformBridge};
use crate::target::{LifecycleState, ProductFamily, Target, TargetKind, TargetSummary};

const EVENT_CHANNEL_CAPACITY: usize = 100;

/// Registry construction settings.
#[derive(Debug, Clone)]
pub struct RegistrySettings {
    /// How long a record stays fresh before resolution re-queries the platform.
    pub ttl: Duration,
    /// Identifier consulted when resolving `default`.
    pub default_target: Option<TargetIdentifier>,
    /// Fallback behavior when no default is configured.
    pub default_policy: DefaultTargetPolicy,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(5),
            default_target: None,
            default_policy: DefaultTargetPolicy::default(),
        }
    }
}

/// Options applied during resolution.
#[derive(Debug, Clone, Default)]
pub struct ResolveOptions {
    /// Restrict `booted` resolution to one product family. Lets a caller
    /// pick "the booted iPhone" while an iPad is also up.
    pub product_family: Option<ProductFamily>,
}

/// Change notification emitted on refresh.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RegistryEvent {
    /// An identifier is visible that was not before.
    Appeared { target: TargetSummary },
    /// An identifier disappeared from discovery.
    Departed { identifier: String },
    /// An identifier changed lifecycle state.
    StateChanged {
        identifier: String,
        from: LifecycleState,
        to: LifecycleState,
    },
}

/// Summary of what one refresh changed.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RefreshDiff {
    pub appeared: Vec<String>,
    pub departed: Vec<String>,
    pub state_changed: Vec<(String, LifecycleState, LifecycleState)>,
}

impl RefreshDiff {
    pub fn is_empty(&self) -> bool {
        self.appeared.is_empty() && self.departed.is_empty() && self.state_changed.is_empty()
    }
}

struct TargetRecord {
    target: Target,
    refreshed_at: Instant,
}

struct RegistrySnapshot {
    records: HashMap<String, Arc<TargetRecord>>,
    /// When the last full refresh ran; `None` until the first one.
    refreshed_at: Option<Instant>,
}

impl RegistrySnapshot {
    fn empty() -> Self {
        Self {
            records: HashMap::new(),
            refreshed_at: None,
        }
    }

    fn is_stale(&self, ttl: Duration) -> bool {
        match self.refreshed_at {
            Some(at) => at.elapsed() > ttl,
            None => true,
        }
    }
}

/// Registry of live targets, keyed by normalized identifier.
pub struct TargetRegistry {
    bridge: Arc<dyn PlatformBridge>,
    snapshot: RwLock<Arc<RegistrySnapshot>>,
    /// Serializes refreshes so their diffs never interleave.
    refresh_gate: Mutex<()>,
    events: broadcast::Sender<RegistryEvent>,
    generation: AtomicU64,
    settings: RegistrySettings,
}

impl TargetRegistry {
    pub fn new(bridge: Arc<dyn PlatformBridge>, settings: RegistrySettings) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            bridge,
            snapshot: RwLock::new(Arc::new(RegistrySnapshot::empty())),
            refresh_gate: Mutex::new(()),
            events,
            generation: AtomicU64::new(0),
            settings,
        }
    }

    /// Subscribe to change events. Slow subscribers miss events rather than
    /// blocking refreshes.
    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.events.subscribe()
    }

    /// Re-enumerates the platform and swaps in a fresh snapshot.
    ///
    /// # Errors
    ///
    /// [`TargetError::Failed`] when platform enumeration fails; the previous
    /// snapshot stays in place.
    pub async fn refresh(&self) -> Result<RefreshDiff, TargetError> {
        let _gate = self.refresh_gate.lock().await;
        let discovered = self.bridge.enumerate().await?;
        let old = self.current().await;

        let cycle = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let now = Instant::now();
        let seen = Utc::now();

        let mut records = HashMap::with_capacity(discovered.len());
        let mut diff = RefreshDiff::default();
        let mut events = Vec::new();

        for d in discovered {
            let (key, record) = materialize(d, &old, cycle, now, seen);
            match old.records.get(&key) {
                Some(prev) => {
                    if prev.target.state != record.target.state {
                        diff.state_changed.push((
                            key.clone(),
                            prev.target.state,
                            record.target.state,
                        ));
                        events.push(RegistryEvent::StateChanged {
                            identifier: key.clone(),
                            from: prev.target.state,
                            to: record.target.state,
                        });
                    }
                }
                None => {
                    diff.appeared.push(key.clone());
                    events.push(RegistryEvent::Appeared {
                        target: record.target.summary(),
                    });
                }
            }
            records.insert(key, Arc::new(record));
        }

        for key in old.records.keys() {
            if !records.contains_key(key) {
                diff.departed.push(key.clone());
                events.push(RegistryEvent::Departed {
                    identifier: key.clone(),
                });
            }
        }

        self.swap(RegistrySnapshot {
            records,
            refreshed_at: Some(now),
        })
        .await;

        if !diff.is_empty() {
            info!(
                appeared = diff.appeared.len(),
                departed = diff.departed.len(),
                state_changed = diff.state_changed.len(),
                "registry refreshed"
            );
        }
        for event in events {
            let _ = self.events.send(event);
        }
        Ok(diff)
    }

    /// Re-queries a single identifier and patches the snapshot in place.
    ///
    /// Returns the refreshed target, or `None` when the platform no longer
    /// knows the identifier (in which case the record is dropped and a
    /// departure event fires).
    pub async fn refresh_target(
        &self,
        id: &TargetIdentifier,
    ) -> Result<Option<Target>, TargetError> {
        let _gate = self.refresh_gate.lock().await;
        let requested_key = id.as_str().to_string();
        debug!(target = %requested_key, "scoped registry refresh");

        let old = self.current().await;
        match self.bridge.query(&requested_key).await? {
            Some(d) => {
                let cycle = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
                let now = Instant::now();
                let (key, record) = materialize(d, &old, cycle, now, Utc::now());
                let target = record.target.clone();

                let mut events = Vec::new();
                match old.records.get(&key) {
                    Some(prev) if prev.target.state != target.state => {
                        events.push(RegistryEvent::StateChanged {
                            identifier: key.clone(),
                            from: prev.target.state,
                            to: target.state,
                        });
                    }
                    None => {
                        events.push(RegistryEvent::Appeared {
                            target: target.summary(),
                        });
                    }
                    _ => {}
                }

                let mut records = old.records.clone();
                records.insert(key, Arc::new(record));
                self.swap(RegistrySnapshot {
                    records,
                    refreshed_at: old.refreshed_at,
                })
                .await;

                for event in events {
                    let _ = self.events.send(event);
                }
                Ok(Some(target))
            }
            None => {
                if old.records.contains_key(&requested_key) {
                    let mut records = old.records.clone();
                    records.remove(&requested_key);
                    self.swap(RegistrySnapshot {
                        records,
                        refreshed_at: old.refreshed_at,
                    })
                    .await;
                    let _ = self.events.send(RegistryEvent::Departed {
                        identifier: requested_key,
                    });
                }
                Ok(None)
            }
        }
    }

    /// Resolves an identifier to a target snapshot.
    pub async fn resolve(&self, id: &TargetIdentifier) -> Result<Target, TargetError> {
        self.resolve_with(id, &ResolveOptions::default()).await
    }

    /// Resolves an identifier with options.
    ///
    /// Concrete identifiers hit the snapshot and fall back to a scoped
    /// platform query when missing or stale. Symbolic identifiers resolve
    /// against a fresh snapshot.
    ///
    /// # Errors
    ///
    /// - [`TargetError::TargetNotFound`] for a concrete identifier the
    ///   platform does not know, or `booted` with nothing booted
    /// - [`TargetError::AmbiguousTarget`] when `booted` (after any family
    ///   filter) or an attached-device default matches more than one target
    /// - [`TargetError::NoDefaultTarget`] when `default` cannot be satisfied
    pub async fn resolve_with(
        &self,
        id: &TargetIdentifier,
        options: &ResolveOptions,
    ) -> Result<Target, TargetError> {
        match id {
            TargetIdentifier::Symbolic(SymbolicTarget::Booted) => {
                self.resolve_booted(options).await
            }
            TargetIdentifier::Symbolic(SymbolicTarget::Default) => {
                self.resolve_default(options).await
            }
            concrete => self.resolve_concrete(concrete).await,
        }
    }

    async fn resolve_concrete(&self, id: &TargetIdentifier) -> Result<Target, TargetError> {
        let key = id.as_str();
        let snap = self.current().await;
        if let Some(record) = snap.records.get(key) {
            if record.refreshed_at.elapsed() <= self.settings.ttl {
                return Ok(record.target.clone());
            }
        }
        // Missing or stale: one scoped query decides.
        match self.refresh_target(id).await? {
            Some(target) => Ok(target),
            None => Err(TargetError::TargetNotFound {
                identifier: key.to_string(),
            }),
        }
    }

    async fn resolve_booted(&self, options: &ResolveOptions) -> Result<Target, TargetError> {
        self.ensure_fresh().await?;
        let snap = self.current().await;

        let mut matches: Vec<Target> = snap
            .records
            .values()
            .filter(|r| {
                r.target.kind == TargetKind::Simulator && r.target.state == LifecycleState::Booted
            })
            .map(|r| r.target.clone())
            .collect();
        if let Some(family) = options.product_family {
            matches.retain(|t| t.product_family == family);
        }

        match matches.len() {
            0 => Err(TargetError::TargetNotFound {
                identifier: "booted".into(),
            }),
            1 => Ok(matches.remove(0)),
            _ => {
                let mut candidates: Vec<String> =
                    matches.iter().map(|t| t.udid().to_string()).collect();
                candidates.sort();
                Err(TargetError::AmbiguousTarget { candidates })
            }
        }
    }

    async fn resolve_default(&self, options: &ResolveOptions) -> Result<Target, TargetError> {
        match &self.settings.default_target {
            // A configured default of "default" would recurse forever.
            Some(TargetIdentifier::Symbolic(SymbolicTarget::Default)) => {
                Err(TargetError::NoDefaultTarget)
            }
            Some(configured) => Box::pin(self.resolve_with(configured, options)).await,
            None => match self.settings.default_policy {
                DefaultTargetPolicy::ConfiguredOnly => Err(TargetError::NoDefaultTarget),
                DefaultTargetPolicy::ConfiguredThenAttached => {
                    self.ensure_fresh().await?;
                    let snap = self.current().await;
                    let mut devices: Vec<Target> = snap
                        .records
                        .values()
                        .filter(|r| r.target.kind == TargetKind::Device)
                        .map(|r| r.target.clone())
                        .collect();
                    match devices.len() {
                        0 => Err(TargetError::NoDefaultTarget),
                        1 => Ok(devices.remove(0)),
                        _ => {
                            let mut candidates: Vec<String> =
                                devices.iter().map(|t| t.udid().to_string()).collect();
                            candidates.sort();
                            Err(TargetError::AmbiguousTarget { candidates })
                        }
                    }
                }
            },
        }
    }

    /// Current summaries, refreshed first when the snapshot is stale.
    pub async fn list(&self, kind: Option<TargetKind>) -> Result<Vec<TargetSummary>, TargetError> {
        self.ensure_fresh().await?;
        let snap = self.current().await;
        let mut summaries: Vec<TargetSummary> = snap
            .records
            .values()
            .filter(|r| kind.map_or(true, |k| r.target.kind == k))
            .map(|r| r.target.summary())
            .collect();
        summaries.sort_by(|a, b| {
            (a.kind == TargetKind::Device, &a.name, &a.identifier).cmp(&(
                b.kind == TargetKind::Device,
                &b.name,
                &b.identifier,
            ))
        });
        Ok(summaries)
    }

    /// Full target snapshots, refreshed first when stale.
    pub async fn targets(&self) -> Result<Vec<Target>, TargetError> {
        self.ensure_fresh().await?;
        let snap = self.current().await;
        Ok(snap.records.values().map(|r| r.target.clone()).collect())
    }

    /// Targets whose display name matches exactly.
    pub async fn find_by_name(&self, name: &str) -> Result<Vec<Target>, TargetError> {
        self.ensure_fresh().await?;
        let snap = self.current().await;
        let mut found: Vec<Target> = snap
            .records
            .values()
            .filter(|r| r.target.name == name)
            .map(|r| r.target.clone())
            .collect();
        found.sort_by(|a, b| a.udid().cmp(b.udid()));
        Ok(found)
    }

    /// Whether a previously resolved target still exists with the same
    /// generation stamp.
    pub async fn is_current(&self, target: &Target) -> bool {
        let snap = self.current().await;
        snap.records
            .get(target.udid())
            .is_some_and(|r| r.target.generation == target.generation)
    }

    async fn ensure_fresh(&self) -> Result<(), TargetError> {
        if self.current().await.is_stale(self.settings.ttl) {
            self.refresh().await?;
        }
        Ok(())
    }

    async fn current(&self) -> Arc<RegistrySnapshot> {
        self.snapshot.read().await.clone()
    }

    async fn swap(&self, next: RegistrySnapshot) {
        *self.snapshot.write().await = Arc::new(next);
    }
}

/// Builds a keyed record out of one discovery row, carrying the generation
/// stamp forward when the identifier already existed.
fn materialize(
    d: DiscoveredTarget,
    old: &RegistrySnapshot,
    cycle: u64,
    refreshed_at: Instant,
    seen: DateTime<Utc>,
) -> (String, TargetRecord) {
    let identifier = TargetIdentifier::for_kind(d.kind, &d.udid);
    let key = identifier.as_str().to_string();
    let generation = old
        .records
        .get(&key)
        .map(|prev| prev.target.generation)
        .unwrap_or(cycle);
    let product_family =
        ProductFamily::from_device_type(d.configuration.as_ref().map(|c| c.device_type.as_str()));
    let target = Target {
        identifier,
        kind: d.kind,
        state: d.state,
        name: d.name,
        product_family,
        data_directory: d.data_directory,
        configuration: d.configuration,
        container_process: d.container_process,
        generation,
        last_seen: seen,
    };
    (
        key,
        TargetRecord {
            target,
            refreshed_at,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_settings_use_five_second_ttl() {
        let settings = RegistrySettings::default();
        assert_eq!(settings.ttl, Duration::from_secs(5));
        assert!(settings.default_target.is_none());
        assert_eq!(settings.default_policy, DefaultTargetPolicy::ConfiguredOnly);
    }

    #[test]
    fn empty_snapshot_is_stale() {
        let snap = RegistrySnapshot::empty();
        assert!(snap.is_stale(Duration::from_secs(5)));
    }

    #[test]
    fn refresh_diff_emptiness() {
        let mut diff = RefreshDiff::default();
        assert!(diff.is_empty());
        diff.departed.push("X".into());
        assert!(!diff.is_empty());
    }

    #[test]
    fn registry_event_serializes_with_type_tag() {
        let event = RegistryEvent::Departed {
            identifier: "A1B2".into(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"departed\""));
    }
}
