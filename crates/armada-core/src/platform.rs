//! The platform seam: discovery and control of simulators and devices.
//!
//! [`PlatformBridge`] is the single trait behind which all host tooling
//! lives. The registry enumerates through it, the pool creates and erases
//! through it, and the dispatcher invokes commands through it. Production
//! code uses [`HostBridge`](crate::host::HostBridge); tests substitute a
//! scripted implementation.

use std::path::PathBuf;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::command::{CommandOutput, CommandRequest};
use crate::error::PlatformError;
use crate::target::{LifecycleState, ProcessInfo, SimConfiguration, TargetKind};

/// One row of platform discovery output, before registry materialization.
#[derive(Debug, Clone)]
pub struct DiscoveredTarget {
    /// Raw identifier as reported by the platform.
    pub udid: String,
    pub kind: TargetKind,
    pub name: String,
    pub state: LifecycleState,
    /// Simulator data directory, when reported.
    pub data_directory: Option<PathBuf>,
    /// Simulator device type and runtime, when reported.
    pub configuration: Option<SimConfiguration>,
    /// Container process of a booted simulator, when reported.
    pub container_process: Option<ProcessInfo>,
}

/// Discovery and control surface for one platform.
///
/// Implementations must be cheap to call concurrently; serialization of
/// conflicting operations is the caller's job, not the bridge's.
#[async_trait]
pub trait PlatformBridge: Send + Sync {
    /// Enumerates every target the platform currently knows.
    async fn enumerate(&self) -> Result<Vec<DiscoveredTarget>, PlatformError>;

    /// Looks up a single target by its raw identifier.
    ///
    /// The default implementation scans [`enumerate`](Self::enumerate);
    /// implementations with a cheaper scoped query should override it.
    async fn query(&self, udid: &str) -> Result<Option<DiscoveredTarget>, PlatformError> {
        let all = self.enumerate().await?;
        Ok(all.into_iter().find(|d| d.udid.eq_ignore_ascii_case(udid)))
    }

    /// Creates a new simulator and returns its udid.
    async fn create(&self, configuration: &SimConfiguration) -> Result<String, PlatformError>;

    /// Boots a simulator. Already booted is not an error.
    async fn boot(&self, udid: &str) -> Result<(), PlatformError>;

    /// Shuts a simulator down. Already shut down is not an error.
    async fn shutdown(&self, udid: &str) -> Result<(), PlatformError>;

    /// Wipes a simulator and deletes its data. The identifier will drop out
    /// of subsequent enumerations.
    async fn erase(&self, udid: &str) -> Result<(), PlatformError>;

    /// Runs one command against a target.
    ///
    /// Implementations should observe `token` at their abort points and
    /// return [`PlatformError::Interrupted`] when it fires before the
    /// operation passes its point of no return.
    async fn invoke(
        &self,
        udid: &str,
        kind: TargetKind,
        request: &CommandRequest,
        token: CancellationToken,
    ) -> Result<CommandOutput, PlatformError>;
}
