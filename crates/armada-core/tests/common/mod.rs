//! Shared test helpers for armada-core integration tests.
//!
//! Provides [`MockBridge`], a scripted [`PlatformBridge`] whose discovery
//! output and invocation behavior are controlled from the test body, plus
//! identifier constants and fixture builders used across the suites.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use armada_core::command::{CommandOutput, CommandRequest};
use armada_core::config::ArmadaConfig;
use armada_core::error::PlatformError;
use armada_core::fleet::Fleet;
use armada_core::platform::{DiscoveredTarget, PlatformBridge};
use armada_core::target::{LifecycleState, SimConfiguration, TargetKind};

// ---------------------------------------------------------------------------
// Identifier fixtures
// ---------------------------------------------------------------------------

/// Simulator UUIDs in canonical (uppercase) form.
pub const SIM_A: &str = "AAAAAAAA-1111-4111-8111-AAAAAAAAAAAA";
pub const SIM_B: &str = "BBBBBBBB-2222-4222-8222-BBBBBBBBBBBB";

/// A modern physical-device UDID (8 hex, dash, 16 hex).
pub const DEVICE_A: &str = "00008110-000A11223344801E";

pub fn iphone_config() -> SimConfiguration {
    SimConfiguration::new(
        "com.apple.CoreSimulator.SimDeviceType.iPhone-15",
        "com.apple.CoreSimulator.SimRuntime.iOS-17-2",
    )
}

pub fn ipad_config() -> SimConfiguration {
    SimConfiguration::new(
        "com.apple.CoreSimulator.SimDeviceType.iPad-Pro-11-inch-4th-generation",
        "com.apple.CoreSimulator.SimRuntime.iOS-17-2",
    )
}

pub fn simulator_row(udid: &str, name: &str, state: LifecycleState) -> DiscoveredTarget {
    DiscoveredTarget {
        udid: udid.to_string(),
        kind: TargetKind::Simulator,
        name: name.to_string(),
        state,
        data_directory: None,
        configuration: Some(iphone_config()),
        container_process: None,
    }
}

pub fn device_row(udid: &str, name: &str) -> DiscoveredTarget {
    DiscoveredTarget {
        udid: udid.to_string(),
        kind: TargetKind::Device,
        name: name.to_string(),
        state: LifecycleState::Booted,
        data_directory: None,
        configuration: None,
        container_process: None,
    }
}

// ---------------------------------------------------------------------------
// MockBridge
// ---------------------------------------------------------------------------

#[derive(Default)]
struct MockState {
    targets: HashMap<String, DiscoveredTarget>,
    invoke_delay: Option<Duration>,
    invoke_failure: Option<String>,
    /// Invocations park on the token and return `Interrupted` when it fires.
    hang_until_cancelled: bool,
    /// Invocations never look at the token: with a delay set they run to
    /// completion, without one they park forever.
    ignore_cancellation: bool,
    enumerate_failure: bool,
    erase_failure: bool,
    boot_delay: Option<Duration>,
    shutdown_delay: Option<Duration>,
    erase_delay: Option<Duration>,
}

#[derive(Default)]
struct MockInner {
    state: Mutex<MockState>,
    invoke_count: AtomicUsize,
    create_count: AtomicUsize,
    enumerate_count: AtomicUsize,
    erase_count: AtomicUsize,
    create_failures_remaining: AtomicUsize,
    /// (udid, command name) recorded when an invocation starts running.
    invoke_log: Mutex<Vec<(String, String)>>,
    active_invokes: AtomicUsize,
    max_active_invokes: AtomicUsize,
}

/// Scripted bridge: tests populate the discovery map and flip behavior
/// switches; the bridge records what the code under test asked of it.
#[derive(Clone, Default)]
pub struct MockBridge {
    inner: Arc<MockInner>,
}

impl MockBridge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_targets(rows: Vec<DiscoveredTarget>) -> Self {
        let bridge = Self::new();
        for row in rows {
            bridge.insert(row);
        }
        bridge
    }

    pub fn insert(&self, row: DiscoveredTarget) {
        self.lock_state().targets.insert(row.udid.clone(), row);
    }

    pub fn remove(&self, udid: &str) {
        self.lock_state().targets.remove(udid);
    }

    pub fn set_state(&self, udid: &str, state: LifecycleState) {
        if let Some(row) = self.lock_state().targets.get_mut(udid) {
            row.state = state;
        }
    }

    pub fn set_invoke_delay(&self, delay: Duration) {
        self.lock_state().invoke_delay = Some(delay);
    }

    pub fn set_boot_delay(&self, delay: Duration) {
        self.lock_state().boot_delay = Some(delay);
    }

    pub fn set_shutdown_delay(&self, delay: Duration) {
        self.lock_state().shutdown_delay = Some(delay);
    }

    pub fn set_erase_delay(&self, delay: Duration) {
        self.lock_state().erase_delay = Some(delay);
    }

    pub fn fail_invokes_with(&self, message: &str) {
        self.lock_state().invoke_failure = Some(message.to_string());
    }

    pub fn hang_until_cancelled(&self) {
        self.lock_state().hang_until_cancelled = true;
    }

    pub fn ignore_cancellation(&self) {
        self.lock_state().ignore_cancellation = true;
    }

    pub fn fail_enumeration(&self, fail: bool) {
        self.lock_state().enumerate_failure = fail;
    }

    pub fn fail_erase(&self, fail: bool) {
        self.lock_state().erase_failure = fail;
    }

    /// The next `n` create calls fail before creation starts succeeding.
    pub fn fail_next_creates(&self, n: usize) {
        self.inner
            .create_failures_remaining
            .store(n, Ordering::SeqCst);
    }

    pub fn invoke_count(&self) -> usize {
        self.inner.invoke_count.load(Ordering::SeqCst)
    }

    pub fn create_count(&self) -> usize {
        self.inner.create_count.load(Ordering::SeqCst)
    }

    pub fn enumerate_count(&self) -> usize {
        self.inner.enumerate_count.load(Ordering::SeqCst)
    }

    pub fn erase_count(&self) -> usize {
        self.inner.erase_count.load(Ordering::SeqCst)
    }

    /// Start order of invocations as (udid, command name) pairs.
    pub fn invoke_log(&self) -> Vec<(String, String)> {
        self.inner
            .invoke_log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Highest number of invocations observed running at once.
    pub fn max_active_invokes(&self) -> usize {
        self.inner.max_active_invokes.load(Ordering::SeqCst)
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Decrements the active-invocation gauge even when the invocation future
/// is dropped mid-flight.
struct ActiveGuard(Arc<MockInner>);

impl ActiveGuard {
    fn enter(inner: &Arc<MockInner>) -> Self {
        let now = inner.active_invokes.fetch_add(1, Ordering::SeqCst) + 1;
        inner.max_active_invokes.fetch_max(now, Ordering::SeqCst);
        Self(Arc::clone(inner))
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.active_invokes.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl PlatformBridge for MockBridge {
    async fn enumerate(&self) -> Result<Vec<DiscoveredTarget>, PlatformError> {
        self.inner.enumerate_count.fetch_add(1, Ordering::SeqCst);
        let state = self.lock_state();
        if state.enumerate_failure {
            return Err(PlatformError::Unavailable("enumeration scripted to fail".into()));
        }
        let mut rows: Vec<DiscoveredTarget> = state.targets.values().cloned().collect();
        rows.sort_by(|a, b| a.udid.cmp(&b.udid));
        Ok(rows)
    }

    async fn create(&self, configuration: &SimConfiguration) -> Result<String, PlatformError> {
        let n = self.inner.create_count.fetch_add(1, Ordering::SeqCst) + 1;
        let remaining = self.inner.create_failures_remaining.load(Ordering::SeqCst);
        if remaining > 0 {
            self.inner
                .create_failures_remaining
                .store(remaining - 1, Ordering::SeqCst);
            return Err(PlatformError::CommandFailed("create scripted to fail".into()));
        }
        let udid = uuid::Uuid::new_v4().to_string().to_ascii_uppercase();
        self.insert(DiscoveredTarget {
            udid: udid.clone(),
            kind: TargetKind::Simulator,
            name: format!("mock-sim-{n}"),
            state: LifecycleState::Shutdown,
            data_directory: None,
            configuration: Some(configuration.clone()),
            container_process: None,
        });
        Ok(udid)
    }

    async fn boot(&self, udid: &str) -> Result<(), PlatformError> {
        let delay = self.lock_state().boot_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let mut state = self.lock_state();
        match state.targets.get_mut(udid) {
            Some(row) => {
                row.state = LifecycleState::Booted;
                Ok(())
            }
            None => Err(PlatformError::UnknownTarget(udid.to_string())),
        }
    }

    async fn shutdown(&self, udid: &str) -> Result<(), PlatformError> {
        let delay = self.lock_state().shutdown_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let mut state = self.lock_state();
        match state.targets.get_mut(udid) {
            Some(row) => {
                row.state = LifecycleState::Shutdown;
                Ok(())
            }
            None => Err(PlatformError::UnknownTarget(udid.to_string())),
        }
    }

    async fn erase(&self, udid: &str) -> Result<(), PlatformError> {
        self.inner.erase_count.fetch_add(1, Ordering::SeqCst);
        let delay = self.lock_state().erase_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let mut state = self.lock_state();
        if state.erase_failure {
            return Err(PlatformError::CommandFailed("erase scripted to fail".into()));
        }
        match state.targets.get(udid) {
            // Matches simctl, which refuses to wipe a running simulator.
            Some(row) if row.state == LifecycleState::Booted => Err(
                PlatformError::CommandFailed("Unable to erase a booted device".into()),
            ),
            Some(_) => {
                state.targets.remove(udid);
                Ok(())
            }
            None => Err(PlatformError::UnknownTarget(udid.to_string())),
        }
    }

    async fn invoke(
        &self,
        udid: &str,
        _kind: TargetKind,
        request: &CommandRequest,
        token: CancellationToken,
    ) -> Result<CommandOutput, PlatformError> {
        self.inner.invoke_count.fetch_add(1, Ordering::SeqCst);
        let _active = ActiveGuard::enter(&self.inner);
        self.inner
            .invoke_log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((udid.to_string(), request.name().to_string()));

        let (known, delay, failure, hang, ignore) = {
            let state = self.lock_state();
            (
                state.targets.contains_key(udid),
                state.invoke_delay,
                state.invoke_failure.clone(),
                state.hang_until_cancelled,
                state.ignore_cancellation,
            )
        };
        if !known {
            return Err(PlatformError::UnknownTarget(udid.to_string()));
        }
        if ignore {
            match delay {
                Some(delay) => tokio::time::sleep(delay).await,
                None => std::future::pending::<()>().await,
            }
        } else if hang {
            token.cancelled().await;
            return Err(PlatformError::Interrupted);
        } else if let Some(delay) = delay {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = token.cancelled() => return Err(PlatformError::Interrupted),
            }
        }
        if let Some(message) = failure {
            return Err(PlatformError::CommandFailed(message));
        }
        Ok(CommandOutput::new(format!("{} ok", request.name())))
    }
}

// ---------------------------------------------------------------------------
// Fleet fixtures
// ---------------------------------------------------------------------------

/// Config with a short freshness window so tests drive staleness with the
/// paused clock instead of waiting.
pub fn test_config() -> ArmadaConfig {
    ArmadaConfig {
        registry_ttl_ms: 5_000,
        ..ArmadaConfig::default()
    }
}

pub fn fleet_over(bridge: &MockBridge) -> Fleet {
    Fleet::new(Arc::new(bridge.clone()), test_config())
}

/// A fleet over one booted iPhone simulator, the everyday fixture.
pub fn booted_sim_fleet() -> (MockBridge, Fleet) {
    let bridge = MockBridge::with_targets(vec![simulator_row(
        SIM_A,
        "iPhone 15",
        LifecycleState::Booted,
    )]);
    let fleet = fleet_over(&bridge);
    (bridge, fleet)
}
