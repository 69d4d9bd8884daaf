//! Fleet: the front door for target management.
//!
//! A [`Fleet`] wires a platform bridge into the registry, the simulator
//! pool, and the command dispatcher, sharing one slot queue between the
//! pool and the dispatcher so destructive lifecycle work serializes against
//! in-flight commands. Callers hand it raw identifier strings; the fleet
//! classifies them up front so a malformed identifier fails immediately
//! instead of surfacing later from some queue.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use armada_core::command::CommandRequest;
//! use armada_core::config::ArmadaConfig;
//! use armada_core::dispatch::DispatchOptions;
//! use armada_core::fleet::Fleet;
//! use armada_core::host::HostBridge;
//!
//! # async fn example() -> Result<(), armada_core::error::TargetError> {
//! let fleet = Fleet::new(Arc::new(HostBridge::new()), ArmadaConfig::default());
//! let output = fleet
//!     .run(
//!         "booted",
//!         CommandRequest::ListApps,
//!         DispatchOptions::default(),
//!     )
//!     .await?;
//! println!("{}", output.message);
//! # Ok(())
//! # }
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{info, warn};

use crate::command::CommandRequest;
use crate::config::ArmadaConfig;
use crate::dispatch::{CommandDispatcher, CommandOutcome, DispatchHandle, DispatchOptions};
use crate::error::TargetError;
use crate::identifier::TargetIdentifier;
use crate::platform::PlatformBridge;
use crate::pool::{PoolMember, PoolSettings, SimulatorPool};
use crate::registry::{
    RefreshDiff, RegistryEvent, RegistrySettings, ResolveOptions, TargetRegistry,
};
use crate::slots::TargetSlots;
use crate::target::{SimConfiguration, Target, TargetKind, TargetSummary};

/// Everything needed to manage a set of simulators and devices.
pub struct Fleet {
    registry: Arc<TargetRegistry>,
    pool: SimulatorPool,
    dispatcher: CommandDispatcher,
    config: ArmadaConfig,
}

impl Fleet {
    /// Builds a fleet over the given bridge using `config` for timeouts,
    /// the freshness window, and default-target behavior.
    pub fn new(bridge: Arc<dyn PlatformBridge>, config: ArmadaConfig) -> Self {
        let default_target = config.default_target.as_deref().and_then(|raw| {
            match TargetIdentifier::classify(raw) {
                Ok(TargetIdentifier::Symbolic(_)) => {
                    warn!(raw, "ignoring configured default target: not a concrete identifier");
                    None
                }
                Ok(id) => Some(id),
                Err(_) => {
                    warn!(raw, "ignoring configured default target: not a valid identifier");
                    None
                }
            }
        });
        let registry = Arc::new(TargetRegistry::new(
            Arc::clone(&bridge),
            RegistrySettings {
                ttl: config.registry_ttl(),
                default_target,
                default_policy: config.default_policy,
            },
        ));
        // Pool and dispatcher share the queue so an erase waits out
        // commands already running on the same target.
        let slots = TargetSlots::new();
        let pool = SimulatorPool::new(
            Arc::clone(&bridge),
            Arc::clone(&registry),
            slots.clone(),
            PoolSettings {
                shutdown_timeout: config.shutdown_timeout(),
                boot_timeout: config.boot_timeout(),
            },
        );
        let dispatcher = CommandDispatcher::new(
            bridge,
            Arc::clone(&registry),
            slots,
            config.capability_timeouts(),
        );
        Self {
            registry,
            pool,
            dispatcher,
            config,
        }
    }

    pub fn config(&self) -> &ArmadaConfig {
        &self.config
    }

    pub fn registry(&self) -> &TargetRegistry {
        &self.registry
    }

    // ------------------------------------------------------------------
    // Resolution
    // ------------------------------------------------------------------

    /// Resolves a raw identifier string to a live target.
    pub async fn resolve(&self, raw: &str) -> Result<Target, TargetError> {
        self.resolve_with(raw, &ResolveOptions::default()).await
    }

    pub async fn resolve_with(
        &self,
        raw: &str,
        options: &ResolveOptions,
    ) -> Result<Target, TargetError> {
        let id = TargetIdentifier::classify(raw)?;
        self.registry.resolve_with(&id, options).await
    }

    // ------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------

    /// Dispatches a command, returning a handle to the in-flight work.
    pub async fn dispatch(
        &self,
        raw: &str,
        request: CommandRequest,
        options: DispatchOptions,
    ) -> Result<DispatchHandle, TargetError> {
        let id = TargetIdentifier::classify(raw)?;
        self.dispatcher.dispatch(&id, request, options).await
    }

    /// Dispatches a command and waits for its outcome.
    pub async fn run(
        &self,
        raw: &str,
        request: CommandRequest,
        options: DispatchOptions,
    ) -> CommandOutcome {
        self.dispatch(raw, request, options).await?.outcome().await
    }

    /// Fans one command out to many targets, collecting per-target
    /// outcomes. Every entry is keyed by the identifier exactly as the
    /// caller wrote it, whether it classified or not.
    pub async fn dispatch_all(
        &self,
        raw_targets: &[String],
        request: &CommandRequest,
        options: &DispatchOptions,
    ) -> BTreeMap<String, CommandOutcome> {
        let mut results = BTreeMap::new();
        let mut ids = Vec::new();
        for raw in raw_targets {
            match TargetIdentifier::classify(raw) {
                Ok(id) => ids.push((raw.clone(), id)),
                Err(e) => {
                    results.insert(raw.clone(), Err(e));
                }
            }
        }
        results.extend(self.dispatcher.dispatch_all(&ids, request, options).await);
        results
    }

    // ------------------------------------------------------------------
    // Lifecycle and pooling
    // ------------------------------------------------------------------

    /// Claims a simulator matching the configuration, creating one when
    /// necessary.
    pub async fn allocate(&self, config: &SimConfiguration) -> Result<Target, TargetError> {
        self.pool.allocate(config).await
    }

    /// Returns a claimed simulator to the pool.
    pub async fn free(&self, raw: &str) -> Result<(), TargetError> {
        let id = TargetIdentifier::classify(raw)?;
        self.pool.free(&id).await
    }

    /// Erases a simulator back to factory state.
    pub async fn erase(&self, raw: &str) -> Result<(), TargetError> {
        let id = TargetIdentifier::classify(raw)?;
        self.pool.erase(&id).await
    }

    pub async fn boot(&self, raw: &str) -> Result<Target, TargetError> {
        let id = TargetIdentifier::classify(raw)?;
        self.pool.boot(&id).await
    }

    pub async fn shutdown(&self, raw: &str) -> Result<Target, TargetError> {
        let id = TargetIdentifier::classify(raw)?;
        self.pool.shutdown(&id).await
    }

    /// Deletes pool simulators; see [`SimulatorPool::delete_all`].
    pub async fn delete_all(
        &self,
        include_referenced: bool,
    ) -> BTreeMap<String, Result<(), TargetError>> {
        self.pool.delete_all(include_referenced).await
    }

    pub async fn pool_members(&self) -> Vec<PoolMember> {
        self.pool.members().await
    }

    /// Cleans up pool-owned simulators when the configuration asks for it.
    pub async fn teardown(&self) -> BTreeMap<String, Result<(), TargetError>> {
        if !self.config.erase_on_teardown {
            return BTreeMap::new();
        }
        info!("tearing down pool simulators");
        self.pool.delete_all(false).await
    }

    // ------------------------------------------------------------------
    // Discovery
    // ------------------------------------------------------------------

    pub async fn list(&self, kind: Option<TargetKind>) -> Result<Vec<TargetSummary>, TargetError> {
        self.registry.list(kind).await
    }

    pub async fn refresh(&self) -> Result<RefreshDiff, TargetError> {
        self.registry.refresh().await
    }

    /// Refreshes a single identifier; `None` means the platform no longer
    /// knows it.
    pub async fn refresh_target(&self, raw: &str) -> Result<Option<Target>, TargetError> {
        let id = TargetIdentifier::classify(raw)?;
        self.registry.refresh_target(&id).await
    }

    pub async fn find_by_name(&self, name: &str) -> Result<Vec<Target>, TargetError> {
        self.registry.find_by_name(name).await
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<RegistryEvent> {
        self.registry.subscribe()
    }
}
