//! Production [`PlatformBridge`] backed by host tooling.
//!
//! Simulators are driven through `xcrun simctl` (plus the `axe` tool for
//! accessibility), physical devices are discovered through usbmuxd, and
//! XCTest runs go through `xcodebuild` for both kinds. Device commands other
//! than XCTest have no transport here and are reported as unsupported.

use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::axe::Axe;
use crate::command::{CommandOutput, CommandRequest};
use crate::error::PlatformError;
use crate::platform::{DiscoveredTarget, PlatformBridge};
use crate::simctl::{SimDeviceRow, Simctl};
use crate::target::{LifecycleState, SimConfiguration, TargetKind};
use crate::usbmux;

/// Bridge to the local macOS host.
#[derive(Debug, Default)]
pub struct HostBridge;

impl HostBridge {
    pub fn new() -> Self {
        Self
    }

    fn sim_row_to_target(row: SimDeviceRow) -> DiscoveredTarget {
        let configuration = row
            .device_type
            .clone()
            .map(|device_type| SimConfiguration::new(device_type, row.runtime.clone()));
        DiscoveredTarget {
            udid: row.udid,
            kind: TargetKind::Simulator,
            name: row.name,
            state: LifecycleState::from_platform(&row.state),
            data_directory: row.data_path,
            configuration,
            container_process: None,
        }
    }

    async fn enumerate_simulators(&self) -> Result<Vec<DiscoveredTarget>, PlatformError> {
        let rows = Simctl::list_devices().await?;
        Ok(rows
            .into_iter()
            .filter(|r| r.is_available)
            .map(Self::sim_row_to_target)
            .collect())
    }

    /// Attached devices, with usbmuxd unavailability degraded to an empty
    /// set so simulator-only hosts keep working.
    async fn enumerate_devices(&self) -> Vec<DiscoveredTarget> {
        match usbmux::list_devices().await {
            Ok(devices) => devices
                .into_iter()
                .map(|d| DiscoveredTarget {
                    name: d.display_name(),
                    udid: d.udid,
                    kind: TargetKind::Device,
                    state: LifecycleState::Booted,
                    data_directory: None,
                    configuration: None,
                    container_process: None,
                })
                .collect(),
            Err(e) => {
                debug!(error = %e, "device discovery skipped");
                Vec::new()
            }
        }
    }

    async fn invoke_simulator(
        &self,
        udid: &str,
        request: &CommandRequest,
        token: CancellationToken,
    ) -> Result<CommandOutput, PlatformError> {
        match request {
            CommandRequest::InstallApp { path } => {
                Simctl::install(udid, path, &token).await?;
                Ok(CommandOutput::new(format!(
                    "installed {}",
                    path.display()
                )))
            }
            CommandRequest::UninstallApp { bundle_id } => {
                Simctl::uninstall(udid, bundle_id).await?;
                Ok(CommandOutput::new(format!("uninstalled {bundle_id}")))
            }
            CommandRequest::AppContainer { bundle_id } => {
                let container = Simctl::app_container(udid, bundle_id).await?;
                Ok(CommandOutput::new(format!("container of {bundle_id}"))
                    .with_data(container.to_string_lossy()))
            }
            CommandRequest::ListApps => {
                let listing = Simctl::list_apps(udid).await?;
                Ok(CommandOutput::new("installed applications").with_data(listing))
            }
            CommandRequest::LaunchApp { bundle_id, args } => {
                let pid = Simctl::launch(udid, bundle_id, args).await?;
                Ok(CommandOutput::new(format!("launched {bundle_id} (pid {pid})"))
                    .with_data(pid.to_string()))
            }
            CommandRequest::TerminateApp { bundle_id } => {
                Simctl::terminate(udid, bundle_id).await?;
                Ok(CommandOutput::new(format!("terminated {bundle_id}")))
            }
            CommandRequest::ListServices => {
                let listing = Simctl::list_services(udid, &token).await?;
                Ok(CommandOutput::new("launchd services").with_data(listing))
            }
            CommandRequest::Spawn { binary, args } => {
                let stdout = Simctl::spawn(udid, binary, args, &token).await?;
                Ok(CommandOutput::new(format!("spawned {binary}")).with_data(stdout))
            }
            CommandRequest::ResetKeychain => {
                Simctl::reset_keychain(udid).await?;
                Ok(CommandOutput::new("keychain reset"))
            }
            CommandRequest::AddMedia { paths } => {
                Simctl::add_media(udid, paths).await?;
                Ok(CommandOutput::new(format!("added {} media item(s)", paths.len())))
            }
            CommandRequest::RecordVideo {
                output,
                duration_secs,
            } => {
                Simctl::record_video(udid, output, *duration_secs, &token).await?;
                Ok(CommandOutput::new("recording finished").with_artifact(output.clone()))
            }
            CommandRequest::AccessibilitySnapshot { point } => {
                let json = match point {
                    Some((x, y)) => Axe::describe_point(udid, *x, *y, &token).await?,
                    None => Axe::describe_ui(udid, &token).await?,
                };
                Ok(CommandOutput::new("accessibility snapshot").with_data(json))
            }
            CommandRequest::GrantPermissions {
                bundle_id,
                services,
            } => {
                for service in services {
                    Simctl::grant_privacy(udid, service, bundle_id).await?;
                }
                Ok(CommandOutput::new(format!(
                    "granted {} service(s) to {bundle_id}",
                    services.len()
                )))
            }
            CommandRequest::RunXcTest { xctestrun } => {
                run_xctest(udid, xctestrun, &token).await
            }
            CommandRequest::SetLocation {
                latitude,
                longitude,
            } => {
                Simctl::set_location(udid, *latitude, *longitude).await?;
                Ok(CommandOutput::new(format!(
                    "location set to {latitude},{longitude}"
                )))
            }
        }
    }

    async fn invoke_device(
        &self,
        udid: &str,
        request: &CommandRequest,
        token: CancellationToken,
    ) -> Result<CommandOutput, PlatformError> {
        match request {
            CommandRequest::RunXcTest { xctestrun } => run_xctest(udid, xctestrun, &token).await,
            other => Err(PlatformError::Unsupported(format!(
                "{} has no device transport on this host",
                other.name()
            ))),
        }
    }
}

#[async_trait]
impl PlatformBridge for HostBridge {
    async fn enumerate(&self) -> Result<Vec<DiscoveredTarget>, PlatformError> {
        let mut targets = self.enumerate_simulators().await?;
        targets.extend(self.enumerate_devices().await);
        Ok(targets)
    }

    async fn query(&self, udid: &str) -> Result<Option<DiscoveredTarget>, PlatformError> {
        // simctl filters server-side; devices are few enough to scan.
        let rows = Simctl::list_devices_matching(udid).await?;
        if let Some(row) = rows
            .into_iter()
            .filter(|r| r.is_available)
            .find(|r| r.udid.eq_ignore_ascii_case(udid))
        {
            return Ok(Some(Self::sim_row_to_target(row)));
        }
        Ok(self
            .enumerate_devices()
            .await
            .into_iter()
            .find(|d| d.udid.eq_ignore_ascii_case(udid)))
    }

    async fn create(&self, configuration: &SimConfiguration) -> Result<String, PlatformError> {
        let name = format!("armada-{}", &uuid::Uuid::new_v4().simple().to_string()[..8]);
        Simctl::create(&name, &configuration.device_type, &configuration.runtime).await
    }

    async fn boot(&self, udid: &str) -> Result<(), PlatformError> {
        Simctl::boot(udid).await
    }

    async fn shutdown(&self, udid: &str) -> Result<(), PlatformError> {
        Simctl::shutdown(udid).await
    }

    async fn erase(&self, udid: &str) -> Result<(), PlatformError> {
        // data wipe precedes removal from the device set
        Simctl::erase(udid).await?;
        Simctl::delete(udid).await
    }

    async fn invoke(
        &self,
        udid: &str,
        kind: TargetKind,
        request: &CommandRequest,
        token: CancellationToken,
    ) -> Result<CommandOutput, PlatformError> {
        match kind {
            TargetKind::Simulator => self.invoke_simulator(udid, request, token).await,
            TargetKind::Device => self.invoke_device(udid, request, token).await,
        }
    }
}

/// Runs a prebuilt XCTest bundle via `xcodebuild test-without-building`.
async fn run_xctest(
    udid: &str,
    xctestrun: &Path,
    token: &CancellationToken,
) -> Result<CommandOutput, PlatformError> {
    let xctestrun = xctestrun.to_string_lossy().into_owned();
    let destination = format!("id={udid}");

    let mut cmd = Command::new("xcodebuild");
    cmd.args([
        "test-without-building",
        "-xctestrun",
        xctestrun.as_str(),
        "-destination",
        destination.as_str(),
    ])
    .stdin(Stdio::null())
    .kill_on_drop(true);

    let output = tokio::select! {
        output = cmd.output() => output?,
        _ = token.cancelled() => return Err(PlatformError::Interrupted),
    };

    let stdout = String::from_utf8_lossy(&output.stdout);
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let message = if stderr.is_empty() {
            tail(&stdout, 2000)
        } else {
            stderr
        };
        return Err(PlatformError::CommandFailed(message));
    }
    Ok(CommandOutput::new("xctest run passed").with_data(tail(&stdout, 2000)))
}

/// Last `limit` bytes of `s`, aligned to a character boundary.
fn tail(s: &str, limit: usize) -> String {
    if s.len() <= limit {
        return s.trim().to_string();
    }
    let mut start = s.len() - limit;
    while !s.is_char_boundary(start) {
        start += 1;
    }
    s[start..].trim().to_string()
}
