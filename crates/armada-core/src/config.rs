//! Persistent configuration for armada.
//!
//! Stores user settings in `~/.armada/config.json`: the default target, the
//! default-resolution policy, registry freshness, lifecycle timeouts, and
//! per-capability dispatch deadlines.
//!
//! # Example
//!
//! ```no_run
//! use armada_core::config::ArmadaConfig;
//!
//! // Load (returns defaults if the file doesn't exist)
//! let config = ArmadaConfig::load();
//!
//! if let Some(target) = &config.default_target {
//!     println!("default target: {target}");
//! }
//! ```

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::capability::Capability;

const CONFIG_FILENAME: &str = "config.json";

/// Returns the armada state directory (`~/.armada`), creating it if needed.
///
/// Falls back to a relative `.armada` directory when no home directory can
/// be determined.
pub fn armada_dir() -> PathBuf {
    let dir = dirs::home_dir()
        .map(|home| home.join(".armada"))
        .unwrap_or_else(|| PathBuf::from(".armada"));
    let _ = std::fs::create_dir_all(&dir);
    dir
}

/// How `default` resolves when consulted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DefaultTargetPolicy {
    /// Only the configured default identifier satisfies `default`.
    #[default]
    ConfiguredOnly,
    /// Fall back to the sole attached physical device when nothing is configured.
    ConfiguredThenAttached,
}

/// Persistent armada configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArmadaConfig {
    /// Default target identifier consulted when resolving `default`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_target: Option<String>,

    /// Policy applied when resolving `default`.
    #[serde(default)]
    pub default_policy: DefaultTargetPolicy,

    /// Registry snapshot freshness window in milliseconds.
    #[serde(default = "default_registry_ttl_ms")]
    pub registry_ttl_ms: u64,

    /// Deadline for a simulator to reach `Shutdown` during lifecycle sequences.
    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,

    /// Deadline for a simulator to finish booting.
    #[serde(default = "default_boot_timeout_ms")]
    pub boot_timeout_ms: u64,

    /// Whether tearing a fleet down erases the simulators it created.
    #[serde(default)]
    pub erase_on_teardown: bool,

    /// Per-capability dispatch deadline overrides in milliseconds.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub timeouts_ms: HashMap<Capability, u64>,
}

fn default_registry_ttl_ms() -> u64 {
    5_000
}

fn default_shutdown_timeout_ms() -> u64 {
    30_000
}

fn default_boot_timeout_ms() -> u64 {
    120_000
}

impl Default for ArmadaConfig {
    fn default() -> Self {
        Self {
            default_target: None,
            default_policy: DefaultTargetPolicy::default(),
            registry_ttl_ms: default_registry_ttl_ms(),
            shutdown_timeout_ms: default_shutdown_timeout_ms(),
            boot_timeout_ms: default_boot_timeout_ms(),
            erase_on_teardown: false,
            timeouts_ms: HashMap::new(),
        }
    }
}

impl ArmadaConfig {
    /// Load config from `~/.armada/config.json`.
    ///
    /// Returns [`Default`] if the file does not exist or cannot be parsed.
    pub fn load() -> Self {
        Self::load_from(&armada_dir().join(CONFIG_FILENAME))
    }

    /// Load config from an explicit path, falling back to defaults.
    pub fn load_from(path: &std::path::Path) -> Self {
        std::fs::read_to_string(path)
            .ok()
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default()
    }

    /// Save config to `~/.armada/config.json`.
    pub fn save(&self) -> std::io::Result<()> {
        let path = armada_dir().join(CONFIG_FILENAME);
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        std::fs::write(path, json)
    }

    pub fn registry_ttl(&self) -> Duration {
        Duration::from_millis(self.registry_ttl_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    pub fn boot_timeout(&self) -> Duration {
        Duration::from_millis(self.boot_timeout_ms)
    }

    /// Dispatch deadlines with this config's overrides applied.
    pub fn capability_timeouts(&self) -> CapabilityTimeouts {
        CapabilityTimeouts::with_overrides(&self.timeouts_ms)
    }
}

/// Per-capability dispatch deadlines.
///
/// Each capability carries a built-in default sized to its slowest legitimate
/// use; config overrides replace individual entries.
#[derive(Debug, Clone, Default)]
pub struct CapabilityTimeouts {
    overrides: HashMap<Capability, Duration>,
}

impl CapabilityTimeouts {
    pub fn with_overrides(overrides_ms: &HashMap<Capability, u64>) -> Self {
        Self {
            overrides: overrides_ms
                .iter()
                .map(|(c, ms)| (*c, Duration::from_millis(*ms)))
                .collect(),
        }
    }

    /// The deadline applied to a dispatch of the given capability.
    pub fn for_capability(&self, capability: Capability) -> Duration {
        self.overrides
            .get(&capability)
            .copied()
            .unwrap_or_else(|| Self::built_in(capability))
    }

    fn built_in(capability: Capability) -> Duration {
        let secs = match capability {
            Capability::FileAccess => 120,
            Capability::Keychain => 30,
            Capability::LaunchCtl => 60,
            Capability::Media => 120,
            Capability::VideoRecording => 600,
            Capability::Accessibility => 30,
            Capability::Settings => 30,
            Capability::XcTest => 900,
            Capability::ProcessSpawn => 60,
            Capability::Location => 30,
        };
        Duration::from_secs(secs)
    }
}
