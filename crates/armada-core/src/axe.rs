//! Wrapper around the `axe` accessibility inspection tool.

use std::process::Stdio;

use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::error::PlatformError;

pub struct Axe;

impl Axe {
    /// Check if axe is installed.
    pub async fn is_installed() -> bool {
        Command::new("which")
            .arg("axe")
            .stdin(Stdio::null())
            .output()
            .await
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    /// Dump the full accessibility hierarchy as raw JSON.
    pub async fn describe_ui(
        udid: &str,
        token: &CancellationToken,
    ) -> Result<String, PlatformError> {
        Self::run(&["describe-ui", "--udid", udid], token).await
    }

    /// Describe the accessibility element at a screen point as raw JSON.
    pub async fn describe_point(
        udid: &str,
        x: f64,
        y: f64,
        token: &CancellationToken,
    ) -> Result<String, PlatformError> {
        let x = x.to_string();
        let y = y.to_string();
        Self::run(
            &["describe-point", "-x", x.as_str(), "-y", y.as_str(), "--udid", udid],
            token,
        )
        .await
    }

    async fn run(args: &[&str], token: &CancellationToken) -> Result<String, PlatformError> {
        if !Self::is_installed().await {
            return Err(PlatformError::Unavailable(
                "axe tool not found - install with: brew install cameroncooke/axe/axe".into(),
            ));
        }

        let mut cmd = Command::new("axe");
        cmd.args(args).stdin(Stdio::null()).kill_on_drop(true);

        let output = tokio::select! {
            output = cmd.output() => output?,
            _ = token.cancelled() => return Err(PlatformError::Interrupted),
        };

        if !output.status.success() {
            return Err(PlatformError::CommandFailed(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}
