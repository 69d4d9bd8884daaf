//! Interface to Apple's `xcrun simctl` command-line tool.
//!
//! Async wrapper around the CoreSimulator control tool: device listing and
//! lifecycle, app management, media, privacy, and screen recording. Every
//! entry point that can run long takes a [`CancellationToken`] and gives up
//! promptly when it fires.
//!
//! # Requirements
//!
//! Xcode must be installed for `xcrun simctl` to be available.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use serde::Deserialize;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::PlatformError;

/// One simulator row from `simctl list devices -j`, with the runtime key
/// from the enclosing map attached.
#[derive(Debug, Clone)]
pub struct SimDeviceRow {
    pub udid: String,
    pub name: String,
    pub state: String,
    pub device_type: Option<String>,
    pub runtime: String,
    pub data_path: Option<PathBuf>,
    pub is_available: bool,
}

#[derive(Debug, Deserialize)]
struct RawDevice {
    udid: String,
    name: String,
    state: String,
    #[serde(rename = "deviceTypeIdentifier")]
    device_type: Option<String>,
    #[serde(rename = "dataPath")]
    data_path: Option<PathBuf>,
    #[serde(rename = "isAvailable", default = "default_available")]
    is_available: bool,
}

fn default_available() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct DeviceList {
    devices: std::collections::HashMap<String, Vec<RawDevice>>,
}

/// Wrapper for `xcrun simctl` commands.
pub struct Simctl;

impl Simctl {
    /// Lists all simulator devices known to CoreSimulator.
    ///
    /// Queries `xcrun simctl list devices -j` and flattens the per-runtime
    /// map, attaching each runtime key to its rows.
    ///
    /// # Errors
    ///
    /// - [`PlatformError::Io`] if the command fails to execute
    /// - [`PlatformError::CommandFailed`] if simctl exits non-zero
    /// - [`PlatformError::JsonParse`] if the output cannot be parsed
    pub async fn list_devices() -> Result<Vec<SimDeviceRow>, PlatformError> {
        let stdout = run(&["list", "devices", "-j"]).await?;
        Self::parse_device_list(stdout.as_bytes())
    }

    /// Lists simulator devices whose name or udid matches `term`.
    ///
    /// `simctl list devices <term> -j` filters server-side, which keeps
    /// scoped registry refreshes cheap.
    pub async fn list_devices_matching(term: &str) -> Result<Vec<SimDeviceRow>, PlatformError> {
        let stdout = run(&["list", "-j", "devices", term]).await?;
        Self::parse_device_list(stdout.as_bytes())
    }

    /// Parses `simctl list devices -j` output into a flat row list.
    ///
    /// Exposed for tests; [`list_devices`](Self::list_devices) is the live path.
    pub fn parse_device_list(json: &[u8]) -> Result<Vec<SimDeviceRow>, PlatformError> {
        let list: DeviceList = serde_json::from_slice(json)?;
        let mut rows = Vec::new();
        for (runtime, devices) in list.devices {
            for d in devices {
                rows.push(SimDeviceRow {
                    udid: d.udid,
                    name: d.name,
                    state: d.state,
                    device_type: d.device_type,
                    runtime: runtime.clone(),
                    data_path: d.data_path,
                    is_available: d.is_available,
                });
            }
        }
        Ok(rows)
    }

    /// Creates a new simulator and returns its udid.
    pub async fn create(
        name: &str,
        device_type: &str,
        runtime: &str,
    ) -> Result<String, PlatformError> {
        let stdout = run(&["create", name, device_type, runtime]).await?;
        let udid = stdout.trim().to_string();
        if udid.is_empty() {
            return Err(PlatformError::CommandFailed(
                "simctl create returned no udid".into(),
            ));
        }
        Ok(udid)
    }

    /// Boots a simulator. Already booted is not an error.
    pub async fn boot(udid: &str) -> Result<(), PlatformError> {
        match run(&["boot", udid]).await {
            Ok(_) => Ok(()),
            Err(PlatformError::CommandFailed(msg)) if msg.contains("current state: Booted") => {
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Shuts a simulator down. Already shut down is not an error.
    pub async fn shutdown(udid: &str) -> Result<(), PlatformError> {
        match run(&["shutdown", udid]).await {
            Ok(_) => Ok(()),
            Err(PlatformError::CommandFailed(msg)) if msg.contains("current state: Shutdown") => {
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Factory-wipes a simulator's data.
    pub async fn erase(udid: &str) -> Result<(), PlatformError> {
        run(&["erase", udid]).await.map(|_| ())
    }

    /// Deletes a simulator from the device set.
    pub async fn delete(udid: &str) -> Result<(), PlatformError> {
        run(&["delete", udid]).await.map(|_| ())
    }

    /// Installs an app bundle.
    pub async fn install(
        udid: &str,
        path: &Path,
        token: &CancellationToken,
    ) -> Result<(), PlatformError> {
        let path = path.to_string_lossy().into_owned();
        run_cancellable(&["install", udid, path.as_str()], token)
            .await
            .map(|_| ())
    }

    /// Uninstalls an app by bundle identifier.
    pub async fn uninstall(udid: &str, bundle_id: &str) -> Result<(), PlatformError> {
        run(&["uninstall", udid, bundle_id]).await.map(|_| ())
    }

    /// Returns the app container path for an installed app.
    pub async fn app_container(udid: &str, bundle_id: &str) -> Result<PathBuf, PlatformError> {
        let stdout = run(&["get_app_container", udid, bundle_id]).await?;
        Ok(PathBuf::from(stdout.trim()))
    }

    /// Lists installed apps. Output is simctl's property-list text, passed
    /// through raw.
    pub async fn list_apps(udid: &str) -> Result<String, PlatformError> {
        run(&["listapps", udid]).await
    }

    /// Launches an app and returns its pid.
    pub async fn launch(
        udid: &str,
        bundle_id: &str,
        args: &[String],
    ) -> Result<i32, PlatformError> {
        let mut argv: Vec<&str> = vec!["launch", udid, bundle_id];
        argv.extend(args.iter().map(String::as_str));
        let stdout = run(&argv).await?;
        Self::parse_launch_pid(&stdout).ok_or_else(|| {
            PlatformError::CommandFailed(format!("unexpected launch output: {}", stdout.trim()))
        })
    }

    /// Parses the pid out of `simctl launch` output (`<bundle-id>: <pid>`).
    pub fn parse_launch_pid(stdout: &str) -> Option<i32> {
        stdout.trim().rsplit(':').next()?.trim().parse().ok()
    }

    /// Terminates a running app.
    pub async fn terminate(udid: &str, bundle_id: &str) -> Result<(), PlatformError> {
        run(&["terminate", udid, bundle_id]).await.map(|_| ())
    }

    /// Spawns a binary inside the simulator and returns its stdout.
    pub async fn spawn(
        udid: &str,
        binary: &str,
        args: &[String],
        token: &CancellationToken,
    ) -> Result<String, PlatformError> {
        let mut argv: Vec<&str> = vec!["spawn", udid, binary];
        argv.extend(args.iter().map(String::as_str));
        run_cancellable(&argv, token).await
    }

    /// Lists launchd services by spawning `launchctl list` inside the simulator.
    pub async fn list_services(
        udid: &str,
        token: &CancellationToken,
    ) -> Result<String, PlatformError> {
        run_cancellable(&["spawn", udid, "launchctl", "list"], token).await
    }

    /// Resets the simulator keychain.
    pub async fn reset_keychain(udid: &str) -> Result<(), PlatformError> {
        run(&["keychain", udid, "reset"]).await.map(|_| ())
    }

    /// Adds media files to the simulator library.
    pub async fn add_media(udid: &str, paths: &[PathBuf]) -> Result<(), PlatformError> {
        let mut argv: Vec<String> = vec!["addmedia".into(), udid.into()];
        argv.extend(paths.iter().map(|p| p.to_string_lossy().into_owned()));
        let refs: Vec<&str> = argv.iter().map(String::as_str).collect();
        run(&refs).await.map(|_| ())
    }

    /// Grants a privacy service to an app without a UI prompt.
    pub async fn grant_privacy(
        udid: &str,
        service: &str,
        bundle_id: &str,
    ) -> Result<(), PlatformError> {
        run(&["privacy", udid, "grant", service, bundle_id])
            .await
            .map(|_| ())
    }

    /// Overrides the simulator's reported location.
    pub async fn set_location(
        udid: &str,
        latitude: f64,
        longitude: f64,
    ) -> Result<(), PlatformError> {
        let pair = format!("{latitude},{longitude}");
        run(&["location", udid, "set", pair.as_str()])
            .await
            .map(|_| ())
    }

    /// Records the simulator screen to `output`.
    ///
    /// Recording runs for `duration_secs` when given, otherwise until `token`
    /// fires. The recorder is stopped with SIGINT so that the container is
    /// finalized; a recording cut short by cancellation still leaves a
    /// playable file behind, but the call reports
    /// [`PlatformError::Interrupted`].
    pub async fn record_video(
        udid: &str,
        output: &Path,
        duration_secs: Option<u64>,
        token: &CancellationToken,
    ) -> Result<(), PlatformError> {
        let out = output.to_string_lossy().into_owned();
        let mut child = Command::new("xcrun")
            .args(["simctl", "io", udid, "recordVideo", "--force", out.as_str()])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;

        let run_for = async {
            match duration_secs {
                Some(secs) => tokio::time::sleep(std::time::Duration::from_secs(secs)).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            status = child.wait() => {
                // exited on its own before being stopped: recording failed
                let status = status?;
                Err(PlatformError::CommandFailed(format!(
                    "recordVideo exited early with {status}"
                )))
            }
            _ = run_for => {
                stop_recording(&mut child).await;
                Ok(())
            }
            _ = token.cancelled() => {
                stop_recording(&mut child).await;
                Err(PlatformError::Interrupted)
            }
        }
    }
}

/// Sends SIGINT to the recorder and waits for it to finalize the file.
async fn stop_recording(child: &mut tokio::process::Child) {
    if let Some(pid) = child.id() {
        let _ = Command::new("kill")
            .args(["-INT", &pid.to_string()])
            .status()
            .await;
    }
    if let Err(e) = child.wait().await {
        debug!(error = %e, "recordVideo did not exit cleanly after SIGINT");
    }
}

/// Runs `xcrun simctl <args>` to completion and returns stdout.
///
/// The child is killed if the future is dropped mid-flight, so a dispatch
/// timeout does not leave a detached simctl running.
async fn run(args: &[&str]) -> Result<String, PlatformError> {
    debug!(?args, "simctl");
    let output = Command::new("xcrun")
        .arg("simctl")
        .args(args)
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await?;
    collect(output)
}

/// Runs `xcrun simctl <args>`, killing the child if `token` fires first.
async fn run_cancellable(
    args: &[&str],
    token: &CancellationToken,
) -> Result<String, PlatformError> {
    debug!(?args, "simctl (cancellable)");
    let mut cmd = Command::new("xcrun");
    cmd.arg("simctl")
        .args(args)
        .stdin(Stdio::null())
        .kill_on_drop(true);

    tokio::select! {
        output = cmd.output() => collect(output?),
        _ = token.cancelled() => Err(PlatformError::Interrupted),
    }
}

fn collect(output: std::process::Output) -> Result<String, PlatformError> {
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let message = if stderr.is_empty() {
            String::from_utf8_lossy(&output.stdout).trim().to_string()
        } else {
            stderr
        };
        return Err(PlatformError::CommandFailed(message));
    }
    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}
