//! Command requests dispatched to targets and their results.
//!
//! Every request maps to exactly one [`Capability`], which is what the
//! dispatcher checks against the matrix before scheduling. The mapping lives
//! here so a request can never be dispatched under the wrong capability.
//!
//! # Command Categories
//!
//! - **Applications**: [`CommandRequest::InstallApp`], [`CommandRequest::UninstallApp`],
//!   [`CommandRequest::AppContainer`], [`CommandRequest::ListApps`]
//! - **Processes**: [`CommandRequest::LaunchApp`], [`CommandRequest::TerminateApp`],
//!   [`CommandRequest::ListServices`], [`CommandRequest::Spawn`]
//! - **State and media**: [`CommandRequest::ResetKeychain`], [`CommandRequest::AddMedia`],
//!   [`CommandRequest::GrantPermissions`], [`CommandRequest::SetLocation`]
//! - **Observation**: [`CommandRequest::RecordVideo`], [`CommandRequest::AccessibilitySnapshot`]
//! - **Testing**: [`CommandRequest::RunXcTest`]
//!
//! # Example
//!
//! ```
//! use armada_core::capability::Capability;
//! use armada_core::command::CommandRequest;
//!
//! let request = CommandRequest::LaunchApp {
//!     bundle_id: "com.example.app".to_string(),
//!     args: vec![],
//! };
//! assert_eq!(request.capability(), Capability::LaunchCtl);
//! ```

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::capability::Capability;

/// A command to run against a resolved target.
///
/// Requests are serialized as JSON with a `type` tag discriminator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum CommandRequest {
    /// Install an app bundle from a host path.
    InstallApp {
        /// Path to the `.app` bundle or `.ipa` archive on the host.
        path: PathBuf,
    },

    /// Remove an installed app.
    UninstallApp {
        /// Bundle identifier of the app to remove.
        bundle_id: String,
    },

    /// Report the on-target container path for an installed app.
    AppContainer {
        /// Bundle identifier to look up.
        bundle_id: String,
    },

    /// List installed applications.
    ListApps,

    /// Launch an app by bundle identifier.
    LaunchApp {
        /// Bundle identifier of the app to launch.
        bundle_id: String,
        /// Arguments passed to the app process.
        args: Vec<String>,
    },

    /// Terminate a running app.
    TerminateApp {
        /// Bundle identifier of the app to terminate.
        bundle_id: String,
    },

    /// List launchd services running on the target.
    ListServices,

    /// Spawn a binary on the target and capture its output.
    Spawn {
        /// Path or name of the binary on the target.
        binary: String,
        /// Arguments passed to the binary.
        args: Vec<String>,
    },

    /// Reset the target keychain.
    ResetKeychain,

    /// Add photos or videos to the target media library.
    AddMedia {
        /// Host paths of media files to add.
        paths: Vec<PathBuf>,
    },

    /// Record the target screen to a video file on the host.
    RecordVideo {
        /// Host path for the recorded video.
        output: PathBuf,
        /// Recording length in seconds. Runs until cancelled when absent.
        duration_secs: Option<u64>,
    },

    /// Capture an accessibility description of the current screen.
    AccessibilitySnapshot {
        /// Restrict the snapshot to the element at this (x, y) point.
        point: Option<(f64, f64)>,
    },

    /// Grant privacy services to an app without UI prompts.
    GrantPermissions {
        /// Bundle identifier receiving the grants.
        bundle_id: String,
        /// Service names, e.g. `photos`, `contacts`, `location`.
        services: Vec<String>,
    },

    /// Run a prebuilt XCTest suite against the target.
    RunXcTest {
        /// Path to the `.xctestrun` file describing the test run.
        xctestrun: PathBuf,
    },

    /// Override the target's reported location.
    SetLocation {
        latitude: f64,
        longitude: f64,
    },
}

impl CommandRequest {
    /// The capability this request is dispatched under.
    pub fn capability(&self) -> Capability {
        match self {
            CommandRequest::InstallApp { .. }
            | CommandRequest::UninstallApp { .. }
            | CommandRequest::AppContainer { .. }
            | CommandRequest::ListApps => Capability::FileAccess,
            CommandRequest::LaunchApp { .. }
            | CommandRequest::TerminateApp { .. }
            | CommandRequest::ListServices => Capability::LaunchCtl,
            CommandRequest::Spawn { .. } => Capability::ProcessSpawn,
            CommandRequest::ResetKeychain => Capability::Keychain,
            CommandRequest::AddMedia { .. } => Capability::Media,
            CommandRequest::RecordVideo { .. } => Capability::VideoRecording,
            CommandRequest::AccessibilitySnapshot { .. } => Capability::Accessibility,
            CommandRequest::GrantPermissions { .. } => Capability::Settings,
            CommandRequest::RunXcTest { .. } => Capability::XcTest,
            CommandRequest::SetLocation { .. } => Capability::Location,
        }
    }

    /// Short name for log fields and spans.
    pub fn name(&self) -> &'static str {
        match self {
            CommandRequest::InstallApp { .. } => "install_app",
            CommandRequest::UninstallApp { .. } => "uninstall_app",
            CommandRequest::AppContainer { .. } => "app_container",
            CommandRequest::ListApps => "list_apps",
            CommandRequest::LaunchApp { .. } => "launch_app",
            CommandRequest::TerminateApp { .. } => "terminate_app",
            CommandRequest::ListServices => "list_services",
            CommandRequest::Spawn { .. } => "spawn",
            CommandRequest::ResetKeychain => "reset_keychain",
            CommandRequest::AddMedia { .. } => "add_media",
            CommandRequest::RecordVideo { .. } => "record_video",
            CommandRequest::AccessibilitySnapshot { .. } => "accessibility_snapshot",
            CommandRequest::GrantPermissions { .. } => "grant_permissions",
            CommandRequest::RunXcTest { .. } => "run_xctest",
            CommandRequest::SetLocation { .. } => "set_location",
        }
    }
}

/// Successful result of a dispatched command.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommandOutput {
    /// Human-readable completion message.
    pub message: String,

    /// Structured or raw payload returned by the command, when any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,

    /// Host path of an artifact produced by the command, when any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact: Option<PathBuf>,
}

impl CommandOutput {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            data: None,
            artifact: None,
        }
    }

    pub fn with_data(mut self, data: impl Into<String>) -> Self {
        self.data = Some(data.into());
        self
    }

    pub fn with_artifact(mut self, artifact: impl Into<PathBuf>) -> Self {
        self.artifact = Some(artifact.into());
        self
    }
}
