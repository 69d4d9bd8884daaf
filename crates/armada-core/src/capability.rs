//! Capability matrix: which operations are valid for which (kind, state) pair.
//!
//! The matrix is static data, checked before any platform call is scheduled.
//! Simulators expose every capability but only while `Booted`. Physical
//! devices expose the subset that has a transport; the rest are denied
//! outright regardless of state.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::TargetError;
use crate::target::{LifecycleState, TargetKind};

/// A functional capability a target can expose.
///
/// Serialized names match the [`Display`](fmt::Display) form so config keys
/// and log fields agree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Capability {
    #[serde(rename = "file-access")]
    FileAccess,
    #[serde(rename = "keychain")]
    Keychain,
    #[serde(rename = "launchctl")]
    LaunchCtl,
    #[serde(rename = "media")]
    Media,
    #[serde(rename = "video-recording")]
    VideoRecording,
    #[serde(rename = "accessibility")]
    Accessibility,
    #[serde(rename = "settings")]
    Settings,
    #[serde(rename = "xctest")]
    XcTest,
    #[serde(rename = "process-spawn")]
    ProcessSpawn,
    #[serde(rename = "location")]
    Location,
}

impl Capability {
    /// Every capability, in declaration order.
    pub const ALL: [Capability; 10] = [
        Capability::FileAccess,
        Capability::Keychain,
        Capability::LaunchCtl,
        Capability::Media,
        Capability::VideoRecording,
        Capability::Accessibility,
        Capability::Settings,
        Capability::XcTest,
        Capability::ProcessSpawn,
        Capability::Location,
    ];
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Capability::FileAccess => "file-access",
            Capability::Keychain => "keychain",
            Capability::LaunchCtl => "launchctl",
            Capability::Media => "media",
            Capability::VideoRecording => "video-recording",
            Capability::Accessibility => "accessibility",
            Capability::Settings => "settings",
            Capability::XcTest => "xctest",
            Capability::ProcessSpawn => "process-spawn",
            Capability::Location => "location",
        };
        f.write_str(s)
    }
}

const BOOTED_ONLY: &[LifecycleState] = &[LifecycleState::Booted];
const NEVER: &[LifecycleState] = &[];

/// The states in which `capability` is valid for `kind`.
///
/// An empty slice means the kind never exposes the capability.
pub fn eligible_states(kind: TargetKind, capability: Capability) -> &'static [LifecycleState] {
    match kind {
        TargetKind::Simulator => BOOTED_ONLY,
        TargetKind::Device => match capability {
            Capability::FileAccess
            | Capability::LaunchCtl
            | Capability::ProcessSpawn
            | Capability::XcTest
            | Capability::Location => BOOTED_ONLY,
            Capability::Keychain
            | Capability::Media
            | Capability::VideoRecording
            | Capability::Accessibility
            | Capability::Settings => NEVER,
        },
    }
}

/// Checks the matrix for a concrete (kind, state, capability) triple.
///
/// # Errors
///
/// [`TargetError::CapabilityDenied`] when the kind never exposes the
/// capability, or when the target is not in an eligible state. The reason
/// distinguishes the two cases.
pub fn authorize(
    kind: TargetKind,
    state: LifecycleState,
    capability: Capability,
) -> Result<(), TargetError> {
    let states = eligible_states(kind, capability);
    if states.is_empty() {
        return Err(TargetError::CapabilityDenied {
            capability,
            reason: format!("not supported on {kind} targets"),
        });
    }
    if !states.contains(&state) {
        return Err(TargetError::CapabilityDenied {
            capability,
            reason: format!("requires state {}, target is {state}", StateList(states)),
        });
    }
    Ok(())
}

/// The capability set a target advertises for its (kind, state) pair.
pub fn capabilities_for(kind: TargetKind, state: LifecycleState) -> Vec<Capability> {
    Capability::ALL
        .into_iter()
        .filter(|c| eligible_states(kind, *c).contains(&state))
        .collect()
}

struct StateList(&'static [LifecycleState]);

impl fmt::Display for StateList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, state) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, " or ")?;
            }
            write!(f, "{state}")?;
        }
        Ok(())
    }
}
