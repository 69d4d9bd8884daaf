//! Command dispatch with per-target serialization.
//!
//! [`CommandDispatcher::dispatch`] resolves and authorizes synchronously,
//! then hands the invocation to a spawned task that waits its turn in the
//! target's slot queue. Commands against the same target run strictly in
//! dispatch order; commands against different targets run concurrently.
//!
//! Every dispatch gets a deadline (explicit or the per-capability default)
//! and a [`CancellationToken`]. The deadline cancels a child of that token,
//! so a timeout stops the one invocation without disturbing whatever else
//! the caller's token covers.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info_span, Instrument};

use crate::capability;
use crate::command::{CommandOutput, CommandRequest};
use crate::config::CapabilityTimeouts;
use crate::error::{PlatformError, TargetError};
use crate::identifier::TargetIdentifier;
use crate::platform::PlatformBridge;
use crate::registry::{ResolveOptions, TargetRegistry};
use crate::slots::{SlotTicket, TargetSlots};
use crate::target::Target;

/// What a dispatched command ultimately produced.
pub type CommandOutcome = Result<CommandOutput, TargetError>;

/// Per-dispatch knobs.
#[derive(Debug, Clone, Default)]
pub struct DispatchOptions {
    /// Deadline override; the capability's default applies when unset.
    pub timeout: Option<Duration>,
    /// Caller-supplied cancellation token; a fresh one is minted when unset.
    pub token: Option<CancellationToken>,
    /// Options forwarded to target resolution.
    pub resolve: ResolveOptions,
}

/// Handle to one in-flight command.
///
/// Dropping the handle does not cancel the command; call
/// [`cancel`](DispatchHandle::cancel) for that.
pub struct DispatchHandle {
    target: Target,
    token: CancellationToken,
    join: JoinHandle<CommandOutcome>,
}

impl DispatchHandle {
    /// The target the command was dispatched against, as resolved at
    /// dispatch time.
    pub fn target(&self) -> &Target {
        &self.target
    }

    /// Requests cooperative cancellation. Queued commands abort without
    /// running; in-flight invocations are interrupted at the platform layer.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Waits for the command to finish.
    pub async fn outcome(self) -> CommandOutcome {
        match self.join.await {
            Ok(outcome) => outcome,
            Err(e) => Err(TargetError::Failed {
                reason: format!("dispatch task failed: {e}"),
            }),
        }
    }
}

impl fmt::Debug for DispatchHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchHandle")
            .field("target", &self.target.udid())
            .field("finished", &self.is_finished())
            .finish()
    }
}

/// Serializing command dispatcher.
pub struct CommandDispatcher {
    bridge: Arc<dyn PlatformBridge>,
    registry: Arc<TargetRegistry>,
    slots: TargetSlots,
    timeouts: CapabilityTimeouts,
}

impl CommandDispatcher {
    pub fn new(
        bridge: Arc<dyn PlatformBridge>,
        registry: Arc<TargetRegistry>,
        slots: TargetSlots,
        timeouts: CapabilityTimeouts,
    ) -> Self {
        Self {
            bridge,
            registry,
            slots,
            timeouts,
        }
    }

    /// Dispatches one command against one target.
    ///
    /// Resolution and capability authorization happen before anything is
    /// scheduled, so a denied command returns an error here and never
    /// occupies the target's queue.
    ///
    /// # Errors
    ///
    /// - resolution errors, see [`TargetRegistry::resolve_with`]
    /// - [`TargetError::CapabilityDenied`] when the target's kind or
    ///   current state does not support the command
    pub async fn dispatch(
        &self,
        id: &TargetIdentifier,
        request: CommandRequest,
        options: DispatchOptions,
    ) -> Result<DispatchHandle, TargetError> {
        let target = self.registry.resolve_with(id, &options.resolve).await?;
        let capability = request.capability();
        capability::authorize(target.kind, target.state, capability)?;

        let timeout = options
            .timeout
            .unwrap_or_else(|| self.timeouts.for_capability(capability));
        let token = options.token.unwrap_or_default();

        let span = info_span!(
            "dispatch",
            target = %target.udid(),
            command = request.name()
        );
        let ticket = self.slots.enqueue(target.udid());
        let task = DispatchTask {
            bridge: Arc::clone(&self.bridge),
            registry: Arc::clone(&self.registry),
            target: target.clone(),
            request,
            timeout,
            token: token.clone(),
        };
        let join = tokio::spawn(task.run(ticket).instrument(span));
        Ok(DispatchHandle {
            target,
            token,
            join,
        })
    }

    /// Dispatches the same command to many targets and collects every
    /// outcome, keyed by the identifier string the caller supplied.
    ///
    /// Targets run in parallel with each other. Per-target failures
    /// (resolution, authorization, execution) land in the map; one bad
    /// target never stops the rest. Each target gets a child of the shared
    /// token, so cancelling the batch cancels every member.
    pub async fn dispatch_all(
        &self,
        targets: &[(String, TargetIdentifier)],
        request: &CommandRequest,
        options: &DispatchOptions,
    ) -> BTreeMap<String, CommandOutcome> {
        let parent = options.token.clone().unwrap_or_default();
        let mut results = BTreeMap::new();
        let mut handles = Vec::new();

        for (raw, id) in targets {
            let per_target = DispatchOptions {
                timeout: options.timeout,
                token: Some(parent.child_token()),
                resolve: options.resolve.clone(),
            };
            match self.dispatch(id, request.clone(), per_target).await {
                Ok(handle) => handles.push((raw.clone(), handle)),
                Err(e) => {
                    results.insert(raw.clone(), Err(e));
                }
            }
        }
        for (key, handle) in handles {
            results.insert(key, handle.outcome().await);
        }
        results
    }
}

struct DispatchTask {
    bridge: Arc<dyn PlatformBridge>,
    registry: Arc<TargetRegistry>,
    target: Target,
    request: CommandRequest,
    timeout: Duration,
    token: CancellationToken,
}

impl DispatchTask {
    async fn run(self, mut ticket: SlotTicket) -> CommandOutcome {
        // Wait for the target's slot, unless cancelled while queued.
        tokio::select! {
            _ = self.token.cancelled() => {
                debug!("cancelled while queued");
                return Err(TargetError::Cancelled);
            }
            _ = ticket.acquired() => {}
        }
        // The target may have vanished while we were queued.
        if !self.registry.is_current(&self.target).await {
            return Err(TargetError::TargetNotFound {
                identifier: self.target.udid().to_string(),
            });
        }
        if self.token.is_cancelled() {
            return Err(TargetError::Cancelled);
        }

        // The deadline cancels this child, leaving the caller's token alone.
        let invoke_token = self.token.child_token();
        let start = Instant::now();
        let invoke = self.bridge.invoke(
            self.target.udid(),
            self.target.kind,
            &self.request,
            invoke_token.clone(),
        );
        tokio::pin!(invoke);
        let deadline = tokio::time::sleep(self.timeout);
        tokio::pin!(deadline);

        let outcome = tokio::select! {
            result = &mut invoke => self.settle(result).await,
            _ = &mut deadline => {
                invoke_token.cancel();
                Err(TargetError::TimedOut { after: self.timeout })
            }
            _ = self.token.cancelled() => {
                // Interrupt the invocation but keep driving it: a cooperative
                // abort surfaces as Cancelled, while a call already past its
                // reversible point completes and reports its real outcome.
                invoke_token.cancel();
                tokio::select! {
                    result = &mut invoke => self.settle(result).await,
                    _ = &mut deadline => {
                        Err(TargetError::TimedOut { after: self.timeout })
                    }
                }
            }
        };
        debug!(
            elapsed_ms = start.elapsed().as_millis() as u64,
            success = outcome.is_ok(),
            "command complete"
        );
        outcome
    }

    async fn settle(&self, result: Result<CommandOutput, PlatformError>) -> CommandOutcome {
        match result {
            Ok(output) => Ok(output),
            Err(e) => self.classify_failure(e).await,
        }
    }

    /// An invocation error against a vanished target reports the vanishing,
    /// not the platform noise it caused.
    async fn classify_failure(&self, error: PlatformError) -> CommandOutcome {
        match self.registry.refresh_target(&self.target.identifier).await {
            Ok(None) => Err(TargetError::TargetNotFound {
                identifier: self.target.udid().to_string(),
            }),
            _ => Err(error.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_options_have_no_overrides() {
        let options = DispatchOptions::default();
        assert!(options.timeout.is_none());
        assert!(options.token.is_none());
        assert!(options.resolve.product_family.is_none());
    }
}
