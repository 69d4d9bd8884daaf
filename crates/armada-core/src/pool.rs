//! Simulator pool: claim-based allocation and destructive lifecycle.
//!
//! The pool hands out simulators matching a requested configuration,
//! preferring an idle member, then an unclaimed simulator already on disk,
//! and only then creating a new one. Members track a claim state so two
//! callers never share a simulator, and whether the pool created the
//! simulator (`owned`) so teardown knows what it may delete.
//!
//! Destructive operations (erase, delete) and boot transitions take the same
//! per-target slot queue used for command dispatch, so an erase never runs
//! under an in-flight command on the same simulator.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::TargetError;
use crate::identifier::TargetIdentifier;
use crate::platform::PlatformBridge;
use crate::registry::TargetRegistry;
use crate::slots::TargetSlots;
use crate::target::{LifecycleState, SimConfiguration, Target, TargetKind};

/// Pool construction settings.
#[derive(Debug, Clone)]
pub struct PoolSettings {
    /// Ceiling on a shutdown transition before the operation is abandoned.
    pub shutdown_timeout: Duration,
    /// Ceiling on a boot transition.
    pub boot_timeout: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            shutdown_timeout: Duration::from_secs(30),
            boot_timeout: Duration::from_secs(120),
        }
    }
}

/// Where a member sits in its claim lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimState {
    Free,
    Claimed,
    Erasing,
    Erased,
}

impl fmt::Display for ClaimState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ClaimState::Free => "free",
            ClaimState::Claimed => "claimed",
            ClaimState::Erasing => "erasing",
            ClaimState::Erased => "erased",
        };
        write!(f, "{s}")
    }
}

/// One simulator under pool management.
#[derive(Debug, Clone, Serialize)]
pub struct PoolMember {
    pub identifier: TargetIdentifier,
    pub configuration: SimConfiguration,
    /// True when the pool created the simulator and may delete it freely.
    pub owned: bool,
    pub claim: ClaimState,
}

/// Claim-based simulator allocator and lifecycle manager.
pub struct SimulatorPool {
    bridge: Arc<dyn PlatformBridge>,
    registry: Arc<TargetRegistry>,
    slots: TargetSlots,
    members: Mutex<HashMap<String, PoolMember>>,
    settings: PoolSettings,
}

impl SimulatorPool {
    pub fn new(
        bridge: Arc<dyn PlatformBridge>,
        registry: Arc<TargetRegistry>,
        slots: TargetSlots,
        settings: PoolSettings,
    ) -> Self {
        Self {
            bridge,
            registry,
            slots,
            members: Mutex::new(HashMap::new()),
            settings,
        }
    }

    /// Claims a simulator matching `config`, creating one when nothing
    /// suitable exists.
    ///
    /// Candidates are tried in identifier order so allocation is
    /// deterministic. A member that turns out to have vanished is dropped
    /// and the next candidate tried.
    ///
    /// # Errors
    ///
    /// [`TargetError::AllocationFailed`] when creation fails twice or the
    /// created simulator never shows up in discovery.
    pub async fn allocate(&self, config: &SimConfiguration) -> Result<Target, TargetError> {
        // Idle members first.
        loop {
            let Some((key, identifier)) = self.claim_free_member(config).await else {
                break;
            };
            match self.registry.resolve(&identifier).await {
                Ok(target) => {
                    info!(udid = %target.udid(), "reusing pool simulator");
                    return Ok(target);
                }
                Err(TargetError::TargetNotFound { .. }) => {
                    debug!(target = %key, "pool member vanished, dropping it");
                    self.members.lock().await.remove(&key);
                }
                Err(e) => {
                    self.set_claim(&key, ClaimState::Free).await;
                    return Err(e);
                }
            }
        }

        // Then a shut-down simulator on disk that nobody references yet.
        if let Some(target) = self.import_unclaimed(config).await? {
            info!(udid = %target.udid(), "adopting existing simulator into pool");
            return Ok(target);
        }

        // Nothing suitable: create.
        let udid = match self.bridge.create(config).await {
            Ok(udid) => udid,
            Err(first) => {
                warn!(error = %first, "simulator create failed, retrying once");
                self.bridge
                    .create(config)
                    .await
                    .map_err(|e| TargetError::AllocationFailed {
                        reason: format!("create failed after retry: {e}"),
                    })?
            }
        };
        let identifier = TargetIdentifier::for_kind(TargetKind::Simulator, &udid);
        let target = self
            .registry
            .refresh_target(&identifier)
            .await?
            .ok_or_else(|| TargetError::AllocationFailed {
                reason: format!("created simulator {udid} did not appear in discovery"),
            })?;
        self.members.lock().await.insert(
            target.udid().to_string(),
            PoolMember {
                identifier: target.identifier.clone(),
                configuration: config.clone(),
                owned: true,
                claim: ClaimState::Claimed,
            },
        );
        info!(udid = %target.udid(), device_type = %config.device_type, "created pool simulator");
        Ok(target)
    }

    /// Returns a claimed member to the idle set.
    ///
    /// Freeing an already free member is a no-op. Members mid-erase or
    /// already erased cannot be freed.
    pub async fn free(&self, id: &TargetIdentifier) -> Result<(), TargetError> {
        let key = self.member_key(id).await?;
        let mut members = self.members.lock().await;
        let member = members
            .get_mut(&key)
            .ok_or_else(|| TargetError::TargetNotFound {
                identifier: key.clone(),
            })?;
        match member.claim {
            ClaimState::Claimed => {
                member.claim = ClaimState::Free;
                info!(udid = %key, "pool simulator freed");
                Ok(())
            }
            ClaimState::Free => Ok(()),
            state => Err(TargetError::Failed {
                reason: format!("cannot free {key}: member is {state}"),
            }),
        }
    }

    /// Erases a simulator back to factory state, shutting it down first when
    /// it is running.
    ///
    /// Takes the target's slot so the wipe cannot interleave with in-flight
    /// commands. A pool member that gets erased is retired permanently; the
    /// pool never hands it out again.
    pub async fn erase(&self, id: &TargetIdentifier) -> Result<(), TargetError> {
        let target = self.registry.resolve(id).await?;
        if target.kind != TargetKind::Simulator {
            return Err(TargetError::EraseFailed {
                reason: format!("{} is a physical device", target.udid()),
            });
        }
        let udid = target.udid().to_string();
        let mut ticket = self.slots.enqueue(&udid);
        ticket.acquired().await;

        // State may have moved while we were queued.
        let current = match self.registry.resolve(&target.identifier).await {
            Ok(t) => t,
            Err(TargetError::TargetNotFound { identifier }) => {
                self.members.lock().await.remove(&udid);
                return Err(TargetError::TargetNotFound { identifier });
            }
            Err(e) => return Err(e),
        };

        // Erase requires Booted (shut down first) or Shutdown; a simulator
        // mid-transition is refused before any claim or platform call.
        match current.state {
            LifecycleState::Booted | LifecycleState::Shutdown => {}
            state => {
                return Err(TargetError::EraseFailed {
                    reason: format!("cannot erase {udid} in state {state}"),
                })
            }
        }

        let previous = self.begin_erase(&current).await;
        if current.state == LifecycleState::Booted {
            if let Err(e) = self.shutdown_within_deadline(&udid).await {
                self.restore_claim(&udid, previous).await;
                return Err(e);
            }
            match self.registry.refresh_target(&target.identifier).await? {
                Some(t) if t.state == LifecycleState::Shutdown => {}
                Some(t) => {
                    self.restore_claim(&udid, previous).await;
                    return Err(TargetError::EraseFailed {
                        reason: format!("simulator is still {} after shutdown", t.state),
                    });
                }
                None => {
                    self.members.lock().await.remove(&udid);
                    return Err(TargetError::TargetNotFound { identifier: udid });
                }
            }
        }

        match self.bridge.erase(&udid).await {
            Ok(()) => {
                self.set_claim(&udid, ClaimState::Erased).await;
                if let Err(e) = self.registry.refresh_target(&target.identifier).await {
                    debug!(error = %e, "post-erase refresh failed");
                }
                info!(udid = %udid, "simulator erased");
                Ok(())
            }
            // Claim stays Erasing: the simulator is in an unknown state and
            // must not be reallocated.
            Err(e) => Err(TargetError::EraseFailed {
                reason: e.to_string(),
            }),
        }
    }

    /// Boots a simulator, waiting up to the configured boot timeout.
    /// Booting an already booted simulator is a no-op.
    pub async fn boot(&self, id: &TargetIdentifier) -> Result<Target, TargetError> {
        let target = self.registry.resolve(id).await?;
        if target.kind != TargetKind::Simulator {
            return Err(TargetError::Failed {
                reason: format!(
                    "{} is a physical device, boot applies to simulators",
                    target.udid()
                ),
            });
        }
        if target.state == LifecycleState::Booted {
            return Ok(target);
        }
        let udid = target.udid().to_string();
        let mut ticket = self.slots.enqueue(&udid);
        ticket.acquired().await;

        match tokio::time::timeout(self.settings.boot_timeout, self.bridge.boot(&udid)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => {
                return Err(TargetError::TimedOut {
                    after: self.settings.boot_timeout,
                })
            }
        }
        match self.registry.refresh_target(&target.identifier).await? {
            Some(t) => Ok(t),
            None => Err(TargetError::TargetNotFound { identifier: udid }),
        }
    }

    /// Shuts a simulator down, waiting up to the configured shutdown timeout.
    pub async fn shutdown(&self, id: &TargetIdentifier) -> Result<Target, TargetError> {
        let target = self.registry.resolve(id).await?;
        if target.kind != TargetKind::Simulator {
            return Err(TargetError::Failed {
                reason: format!(
                    "{} is a physical device, shutdown applies to simulators",
                    target.udid()
                ),
            });
        }
        if target.state == LifecycleState::Shutdown {
            return Ok(target);
        }
        let udid = target.udid().to_string();
        let mut ticket = self.slots.enqueue(&udid);
        ticket.acquired().await;

        match tokio::time::timeout(self.settings.shutdown_timeout, self.bridge.shutdown(&udid))
            .await
        {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => {
                return Err(TargetError::TimedOut {
                    after: self.settings.shutdown_timeout,
                })
            }
        }
        match self.registry.refresh_target(&target.identifier).await? {
            Some(t) => Ok(t),
            None => Err(TargetError::TargetNotFound { identifier: udid }),
        }
    }

    /// Deletes pool simulators sequentially, owned members always and
    /// adopted ones only when `include_referenced` is set.
    ///
    /// Per-member failures land in the result map; one stuck simulator does
    /// not stop the sweep.
    pub async fn delete_all(
        &self,
        include_referenced: bool,
    ) -> BTreeMap<String, Result<(), TargetError>> {
        let selected: Vec<(String, TargetIdentifier)> = {
            let members = self.members.lock().await;
            let mut v: Vec<_> = members
                .iter()
                .filter(|(_, m)| m.owned || include_referenced)
                .map(|(k, m)| (k.clone(), m.identifier.clone()))
                .collect();
            v.sort_by(|a, b| a.0.cmp(&b.0));
            v
        };

        let mut results = BTreeMap::new();
        for (key, identifier) in selected {
            let result = self.delete_one(&key, &identifier).await;
            if let Err(e) = &result {
                warn!(target = %key, error = %e, "pool delete failed");
            }
            results.insert(key, result);
        }
        results
    }

    /// Current member descriptors, sorted by identifier.
    pub async fn members(&self) -> Vec<PoolMember> {
        let members = self.members.lock().await;
        let mut list: Vec<PoolMember> = members.values().cloned().collect();
        list.sort_by(|a, b| a.identifier.as_str().cmp(b.identifier.as_str()));
        list
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    /// Picks the first idle member matching `config` and marks it claimed,
    /// all under the member lock.
    async fn claim_free_member(
        &self,
        config: &SimConfiguration,
    ) -> Option<(String, TargetIdentifier)> {
        let mut members = self.members.lock().await;
        let mut keys: Vec<String> = members
            .iter()
            .filter(|(_, m)| m.claim == ClaimState::Free && m.configuration.matches(config))
            .map(|(k, _)| k.clone())
            .collect();
        keys.sort();
        let key = keys.into_iter().next()?;
        let member = members.get_mut(&key)?;
        member.claim = ClaimState::Claimed;
        Some((key, member.identifier.clone()))
    }

    /// Adopts a shut-down on-disk simulator matching `config` that is not
    /// yet a member.
    async fn import_unclaimed(
        &self,
        config: &SimConfiguration,
    ) -> Result<Option<Target>, TargetError> {
        let discovered = self.registry.targets().await?;
        let mut members = self.members.lock().await;
        let mut candidates: Vec<&Target> = discovered
            .iter()
            .filter(|t| {
                t.kind == TargetKind::Simulator
                    && t.state == LifecycleState::Shutdown
                    && t.configuration
                        .as_ref()
                        .map_or(false, |c| c.matches(config))
                    && !members.contains_key(t.udid())
            })
            .collect();
        candidates.sort_by(|a, b| a.udid().cmp(b.udid()));
        let Some(target) = candidates.first().map(|t| (*t).clone()) else {
            return Ok(None);
        };
        members.insert(
            target.udid().to_string(),
            PoolMember {
                identifier: target.identifier.clone(),
                configuration: target
                    .configuration
                    .clone()
                    .unwrap_or_else(|| config.clone()),
                owned: false,
                claim: ClaimState::Claimed,
            },
        );
        Ok(Some(target))
    }

    async fn delete_one(
        &self,
        key: &str,
        identifier: &TargetIdentifier,
    ) -> Result<(), TargetError> {
        let mut ticket = self.slots.enqueue(key);
        ticket.acquired().await;

        let current = match self.registry.resolve(identifier).await {
            Ok(t) => t,
            // Already gone; deleting it is moot.
            Err(TargetError::TargetNotFound { .. }) => {
                self.members.lock().await.remove(key);
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        if matches!(
            current.state,
            LifecycleState::Booted | LifecycleState::Booting
        ) {
            self.shutdown_within_deadline(key).await?;
        }
        self.bridge
            .erase(key)
            .await
            .map_err(|e| TargetError::EraseFailed {
                reason: e.to_string(),
            })?;
        self.members.lock().await.remove(key);
        if let Err(e) = self.registry.refresh_target(identifier).await {
            debug!(error = %e, "post-delete refresh failed");
        }
        Ok(())
    }

    async fn shutdown_within_deadline(&self, udid: &str) -> Result<(), TargetError> {
        match tokio::time::timeout(self.settings.shutdown_timeout, self.bridge.shutdown(udid))
            .await
        {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(TargetError::EraseFailed {
                reason: format!("shutdown failed: {e}"),
            }),
            Err(_) => Err(TargetError::EraseFailed {
                reason: format!(
                    "shutdown timed out after {}s",
                    self.settings.shutdown_timeout.as_secs()
                ),
            }),
        }
    }

    async fn member_key(&self, id: &TargetIdentifier) -> Result<String, TargetError> {
        match id {
            TargetIdentifier::Symbolic(_) => {
                Ok(self.registry.resolve(id).await?.udid().to_string())
            }
            concrete => Ok(concrete.as_str().to_string()),
        }
    }

    /// Marks the member `Erasing`, inserting a referenced placeholder row
    /// when the simulator is not a member yet so a concurrent allocation
    /// cannot adopt it mid-erase. Returns the prior claim, `None` for a
    /// placeholder.
    async fn begin_erase(&self, target: &Target) -> Option<ClaimState> {
        let mut members = self.members.lock().await;
        if let Some(member) = members.get_mut(target.udid()) {
            let prev = member.claim;
            member.claim = ClaimState::Erasing;
            return Some(prev);
        }
        members.insert(
            target.udid().to_string(),
            PoolMember {
                identifier: target.identifier.clone(),
                configuration: target
                    .configuration
                    .clone()
                    .unwrap_or_else(|| SimConfiguration::new("", "")),
                owned: false,
                claim: ClaimState::Erasing,
            },
        );
        None
    }

    async fn restore_claim(&self, key: &str, previous: Option<ClaimState>) {
        match previous {
            Some(previous) => self.set_claim(key, previous).await,
            // The Erasing row was only a placeholder; drop it.
            None => {
                self.members.lock().await.remove(key);
            }
        }
    }

    async fn set_claim(&self, key: &str, claim: ClaimState) {
        if let Some(member) = self.members.lock().await.get_mut(key) {
            member.claim = claim;
        }
    }
}
