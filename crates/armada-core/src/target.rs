//! Target data model: kinds, lifecycle states, and resolved target snapshots.
//!
//! A [`Target`] is an immutable value snapshot taken from the registry at
//! resolution time. It never mutates in place; registry refreshes publish new
//! snapshots with a carried or bumped generation stamp, and holders of an old
//! snapshot compare generations to detect staleness.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::capability::{self, Capability};
use crate::identifier::TargetIdentifier;

/// The two kinds of iOS target this crate manages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetKind {
    Simulator,
    Device,
}

impl fmt::Display for TargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetKind::Simulator => write!(f, "simulator"),
            TargetKind::Device => write!(f, "device"),
        }
    }
}

/// Lifecycle state of a target as last observed by the platform.
///
/// Simulators move through the full chart; an attached physical device is
/// reported as `Booted` for as long as it stays connected. States the
/// platform reports that we do not recognize collapse to `Unknown` rather
/// than failing discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LifecycleState {
    Unknown,
    Creating,
    Shutdown,
    Booting,
    Booted,
    ShuttingDown,
    Erasing,
    Erased,
}

impl LifecycleState {
    /// Parses a CoreSimulator state string as reported by `simctl list -j`.
    pub fn from_platform(raw: &str) -> Self {
        match raw.trim() {
            "Creating" => LifecycleState::Creating,
            "Shutdown" => LifecycleState::Shutdown,
            "Booting" => LifecycleState::Booting,
            "Booted" => LifecycleState::Booted,
            "Shutting Down" | "ShuttingDown" => LifecycleState::ShuttingDown,
            "Erasing" => LifecycleState::Erasing,
            "Erased" => LifecycleState::Erased,
            _ => LifecycleState::Unknown,
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LifecycleState::Unknown => "Unknown",
            LifecycleState::Creating => "Creating",
            LifecycleState::Shutdown => "Shutdown",
            LifecycleState::Booting => "Booting",
            LifecycleState::Booted => "Booted",
            LifecycleState::ShuttingDown => "Shutting Down",
            LifecycleState::Erasing => "Erasing",
            LifecycleState::Erased => "Erased",
        };
        f.write_str(s)
    }
}

/// Product family derived from the CoreSimulator device type identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProductFamily {
    IPhone,
    IPad,
    AppleWatch,
    AppleTv,
    Unknown,
}

impl ProductFamily {
    /// Derives the family from a device type identifier such as
    /// `com.apple.CoreSimulator.SimDeviceType.iPhone-15-Pro`.
    pub fn from_device_type(device_type: Option<&str>) -> Self {
        let Some(dt) = device_type else {
            return ProductFamily::Unknown;
        };
        if dt.contains("iPhone") {
            ProductFamily::IPhone
        } else if dt.contains("iPad") {
            ProductFamily::IPad
        } else if dt.contains("Watch") {
            ProductFamily::AppleWatch
        } else if dt.contains("TV") {
            ProductFamily::AppleTv
        } else {
            ProductFamily::Unknown
        }
    }
}

impl fmt::Display for ProductFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProductFamily::IPhone => "iPhone",
            ProductFamily::IPad => "iPad",
            ProductFamily::AppleWatch => "Apple Watch",
            ProductFamily::AppleTv => "Apple TV",
            ProductFamily::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// The container process backing a booted simulator, when known.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessInfo {
    pub pid: i32,
    pub name: String,
}

/// Device type and runtime pairing for a simulator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimConfiguration {
    /// Device type identifier, e.g. `com.apple.CoreSimulator.SimDeviceType.iPhone-15-Pro`.
    pub device_type: String,
    /// Runtime identifier, e.g. `com.apple.CoreSimulator.SimRuntime.iOS-17-0`.
    pub runtime: String,
}

impl SimConfiguration {
    pub fn new(device_type: impl Into<String>, runtime: impl Into<String>) -> Self {
        Self {
            device_type: device_type.into(),
            runtime: runtime.into(),
        }
    }

    /// Whether two configurations name the same device type and runtime.
    pub fn matches(&self, other: &SimConfiguration) -> bool {
        self.device_type == other.device_type && self.runtime == other.runtime
    }

    /// Short human form with the reverse-DNS prefixes stripped.
    pub fn short_name(&self) -> String {
        format!(
            "{} ({})",
            strip_prefix(&self.device_type, "com.apple.CoreSimulator.SimDeviceType."),
            strip_prefix(&self.runtime, "com.apple.CoreSimulator.SimRuntime.")
        )
    }
}

impl fmt::Display for SimConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.short_name())
    }
}

fn strip_prefix<'a>(s: &'a str, prefix: &str) -> &'a str {
    s.strip_prefix(prefix).unwrap_or(s)
}

/// A resolved target snapshot.
///
/// Holds everything known about the target at the moment of resolution. The
/// `generation` stamp identifies the discovery cycle in which the target first
/// appeared; it survives state changes and changes only when the identifier
/// departs and returns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Target {
    pub identifier: TargetIdentifier,
    pub kind: TargetKind,
    pub state: LifecycleState,
    pub name: String,
    pub product_family: ProductFamily,
    /// Simulator data directory, when the platform reports one.
    pub data_directory: Option<PathBuf>,
    /// Simulator device type and runtime, when known.
    pub configuration: Option<SimConfiguration>,
    /// Container process of a booted simulator, when known.
    pub container_process: Option<ProcessInfo>,
    /// Discovery generation this target appeared in.
    pub generation: u64,
    /// Wall-clock time of the last discovery pass that saw this target.
    pub last_seen: DateTime<Utc>,
}

impl Target {
    /// The normalized identifier string.
    pub fn udid(&self) -> &str {
        self.identifier.as_str()
    }

    /// The capabilities valid for this target's kind and current state.
    pub fn capabilities(&self) -> Vec<Capability> {
        capability::capabilities_for(self.kind, self.state)
    }

    /// Per-target CoreSimulator log directory under the user's home.
    ///
    /// Only simulators have one; devices keep their logs on-device.
    pub fn core_simulator_logs_directory(&self) -> Option<PathBuf> {
        if self.kind != TargetKind::Simulator {
            return None;
        }
        dirs::home_dir().map(|home| {
            home.join("Library")
                .join("Logs")
                .join("CoreSimulator")
                .join(self.udid())
        })
    }

    /// Condensed one-row view for listings and events.
    pub fn summary(&self) -> TargetSummary {
        TargetSummary {
            identifier: self.udid().to_string(),
            kind: self.kind,
            state: self.state,
            name: self.name.clone(),
            product_family: self.product_family,
        }
    }
}

/// Condensed target row for listings and registry events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetSummary {
    pub identifier: String,
    pub kind: TargetKind,
    pub state: LifecycleState,
    pub name: String,
    pub product_family: ProductFamily,
}
