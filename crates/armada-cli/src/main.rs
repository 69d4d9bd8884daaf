//! Command-line front end for armada target-set management.
//!
//! Every command resolves its target through the shared registry and runs
//! through the same capability checks and per-target command queue as
//! library callers.
//!
//! # Usage
//!
//! ```bash
//! # List every known simulator and device
//! armada list
//!
//! # Resolve the booted simulator
//! armada resolve booted
//!
//! # Boot a simulator by UUID, then install an app on it
//! armada -t 1A2B3C4D-0000-4000-8000-000000000000 boot
//! armada -t 1A2B3C4D-0000-4000-8000-000000000000 install ./Example.app
//!
//! # Launch an app on the booted simulator with arguments
//! armada -t booted launch com.example.app -- -resetData
//!
//! # Claim a pooled simulator; prints its UDID on stdout
//! armada allocate \
//!     --device-type com.apple.CoreSimulator.SimDeviceType.iPhone-15 \
//!     --runtime com.apple.CoreSimulator.SimRuntime.iOS-17-0
//!
//! # Record the screen until Ctrl-C
//! armada -t booted record-video /tmp/run.mp4
//!
//! # Follow registry changes as they happen
//! armada watch
//! ```

mod render;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use armada_core::command::CommandRequest;
use armada_core::config::ArmadaConfig;
use armada_core::dispatch::DispatchOptions;
use armada_core::error::TargetError;
use armada_core::fleet::Fleet;
use armada_core::host::HostBridge;
use armada_core::target::{SimConfiguration, TargetKind};
use clap::{CommandFactory, Parser, Subcommand};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Manage iOS simulators and devices as one fleet.
#[derive(Parser)]
#[command(name = "armada")]
#[command(about = "Resolve, boot, and run commands against iOS simulators and devices")]
#[command(version)]
struct Cli {
    /// Target to operate on: a UDID, `booted`, or `default`
    #[arg(short, long, default_value = "default", env = "ARMADA_TARGET")]
    target: String,

    /// Output format: text or json
    #[arg(short, long, default_value = "text")]
    format: OutputFormat,

    /// Command deadline in seconds, overriding per-capability defaults
    #[arg(short = 'o', long, env = "ARMADA_TIMEOUT")]
    timeout_secs: Option<u64>,

    /// Suppress non-essential output
    #[arg(short, long)]
    quiet: bool,

    /// Write logs to a rolling file in this directory instead of stderr
    #[arg(long, env = "ARMADA_LOG_DIR")]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum KindFilter {
    Simulator,
    Device,
}

impl From<KindFilter> for TargetKind {
    fn from(filter: KindFilter) -> Self {
        match filter {
            KindFilter::Simulator => TargetKind::Simulator,
            KindFilter::Device => TargetKind::Device,
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// List known targets
    List {
        /// Restrict the listing to one kind of target
        #[arg(long)]
        kind: Option<KindFilter>,
    },

    /// Resolve an identifier to a live target and describe it
    Resolve {
        /// Identifier to resolve; the global target when omitted
        query: Option<String>,
    },

    /// Re-enumerate targets and report what changed
    Refresh,

    /// Follow registry changes until interrupted
    Watch {
        /// Seconds between enumeration passes
        #[arg(long, default_value = "2")]
        interval_secs: u64,
    },

    /// Boot the target simulator
    Boot,

    /// Shut down the target simulator
    Shutdown,

    /// Erase the target simulator back to factory state
    Erase,

    /// Claim a pooled simulator, creating one when necessary
    Allocate {
        /// Device type identifier, e.g. com.apple.CoreSimulator.SimDeviceType.iPhone-15
        #[arg(long)]
        device_type: String,
        /// Runtime identifier, e.g. com.apple.CoreSimulator.SimRuntime.iOS-17-0
        #[arg(long)]
        runtime: String,
    },

    /// Return the target to the pool for reuse
    Free,

    /// Show pool membership and claim states
    Pool,

    /// Delete pool simulators
    DeleteAll {
        /// Also delete adopted simulators the pool did not create
        #[arg(long)]
        include_referenced: bool,
    },

    /// Install an app bundle on the target
    Install {
        /// Path to the .app bundle or .ipa archive
        path: PathBuf,
    },

    /// Remove an installed app
    Uninstall {
        /// Bundle identifier of the app to remove
        bundle_id: String,
    },

    /// List installed apps
    Apps,

    /// Print the container path of an installed app
    Container {
        /// Bundle identifier to look up
        bundle_id: String,
    },

    /// Launch an app
    Launch {
        /// Bundle identifier of the app to launch
        bundle_id: String,
        /// Arguments passed to the app process
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },

    /// Terminate a running app
    Terminate {
        /// Bundle identifier of the app to terminate
        bundle_id: String,
    },

    /// List launchd services on the target
    Services,

    /// Spawn a binary on the target and print its output
    Spawn {
        /// Path or name of the binary on the target
        binary: String,
        /// Arguments passed to the binary
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },

    /// Reset the target keychain
    ResetKeychain,

    /// Add photos or videos to the target media library
    AddMedia {
        /// Media files to add
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },

    /// Record the target screen to a video file
    RecordVideo {
        /// Host path for the recording
        output: PathBuf,
        /// Stop after this many seconds; records until Ctrl-C when omitted
        #[arg(long)]
        duration_secs: Option<u64>,
    },

    /// Capture an accessibility description of the current screen
    Accessibility {
        /// Restrict the snapshot to the element at `X,Y`
        #[arg(long = "at", value_parser = parse_point)]
        at: Option<(f64, f64)>,
    },

    /// Grant privacy services to an app without UI prompts
    Grant {
        /// Bundle identifier receiving the grants
        bundle_id: String,
        /// Service names, e.g. photos contacts location
        #[arg(required = true)]
        services: Vec<String>,
    },

    /// Run a prebuilt XCTest suite against the target
    Xctest {
        /// Path to the .xctestrun file describing the run
        xctestrun: PathBuf,
    },

    /// Override the target's reported location
    SetLocation {
        #[arg(allow_negative_numbers = true)]
        latitude: f64,
        #[arg(allow_negative_numbers = true)]
        longitude: f64,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: clap_complete::Shell,
    },
}

fn parse_point(raw: &str) -> Result<(f64, f64), String> {
    let (x, y) = raw
        .split_once(',')
        .ok_or_else(|| format!("expected X,Y, got {:?}", raw))?;
    let x = x
        .trim()
        .parse::<f64>()
        .map_err(|e| format!("bad X coordinate: {}", e))?;
    let y = y
        .trim()
        .parse::<f64>()
        .map_err(|e| format!("bad Y coordinate: {}", e))?;
    Ok((x, y))
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    if let Some(dir) = &cli.log_dir {
        let file_appender = tracing_appender::rolling::never(dir, "armada.log");
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(file_appender)
            .with_ansi(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            e.exit_code()
        }
    }
}

#[derive(Debug)]
enum CliError {
    Target(String),
    CommandFailed(String),
    Protocol(String),
}

impl CliError {
    fn exit_code(&self) -> ExitCode {
        match self {
            CliError::Target(_) => ExitCode::from(2),
            CliError::CommandFailed(_) => ExitCode::from(1),
            CliError::Protocol(_) => ExitCode::from(3),
        }
    }
}

impl std::fmt::Display for CliError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CliError::Target(msg) => write!(f, "{}", msg),
            CliError::CommandFailed(msg) => write!(f, "{}", msg),
            CliError::Protocol(msg) => write!(f, "Output error: {}", msg),
        }
    }
}

impl From<TargetError> for CliError {
    fn from(err: TargetError) -> Self {
        match err {
            TargetError::InvalidIdentifier { .. }
            | TargetError::TargetNotFound { .. }
            | TargetError::AmbiguousTarget { .. }
            | TargetError::NoDefaultTarget => CliError::Target(err.to_string()),
            other => CliError::CommandFailed(other.to_string()),
        }
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    // Completions never touch the platform.
    if let Command::Completions { shell } = cli.command {
        let mut command = Cli::command();
        clap_complete::generate(shell, &mut command, "armada", &mut std::io::stdout());
        return Ok(());
    }

    let fleet = Fleet::new(Arc::new(HostBridge::new()), ArmadaConfig::load());

    match cli.command {
        Command::List { kind } => {
            let summaries = fleet.list(kind.map(TargetKind::from)).await?;
            if cli.format == OutputFormat::Json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&summaries)
                        .map_err(|e| CliError::Protocol(e.to_string()))?
                );
            } else if summaries.is_empty() {
                eprintln!("No targets found");
            } else {
                print!("{}", render::target_table(&summaries));
            }
            Ok(())
        }
        Command::Resolve { ref query } => {
            let raw = query.as_deref().unwrap_or(&cli.target);
            let target = fleet.resolve(raw).await?;
            if cli.format == OutputFormat::Json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&target)
                        .map_err(|e| CliError::Protocol(e.to_string()))?
                );
            } else {
                print!("{}", render::target_detail(&target));
            }
            Ok(())
        }
        Command::Refresh => {
            let diff = fleet.refresh().await?;
            if cli.format == OutputFormat::Json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&diff)
                        .map_err(|e| CliError::Protocol(e.to_string()))?
                );
            } else if diff.is_empty() {
                eprintln!("No changes");
            } else {
                print!("{}", render::refresh_diff(&diff));
            }
            Ok(())
        }
        Command::Watch { interval_secs } => watch(&fleet, &cli, interval_secs).await,
        Command::Boot => {
            let target = fleet.boot(&cli.target).await?;
            report_transition(&cli, "Booted", target.udid())
        }
        Command::Shutdown => {
            let target = fleet.shutdown(&cli.target).await?;
            report_transition(&cli, "Shut down", target.udid())
        }
        Command::Erase => {
            let target = fleet.resolve(&cli.target).await?;
            fleet.erase(&cli.target).await?;
            report_transition(&cli, "Erased", target.udid())
        }
        Command::Allocate {
            ref device_type,
            ref runtime,
        } => {
            let config = SimConfiguration::new(device_type.clone(), runtime.clone());
            let target = fleet.allocate(&config).await?;
            if cli.format == OutputFormat::Json {
                println!(
                    "{}",
                    serde_json::json!({
                        "udid": target.udid(),
                        "name": target.name,
                        "state": target.state.to_string(),
                    })
                );
            } else {
                if !cli.quiet {
                    eprintln!("Allocated {} ({})", target.name, target.udid());
                }
                println!("{}", target.udid());
            }
            Ok(())
        }
        Command::Free => {
            fleet.free(&cli.target).await?;
            report_transition(&cli, "Freed", &cli.target)
        }
        Command::Pool => {
            let members = fleet.pool_members().await;
            if cli.format == OutputFormat::Json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&members)
                        .map_err(|e| CliError::Protocol(e.to_string()))?
                );
            } else if members.is_empty() {
                eprintln!("Pool is empty");
            } else {
                print!("{}", render::pool_table(&members));
            }
            Ok(())
        }
        Command::DeleteAll { include_referenced } => {
            let results = fleet.delete_all(include_referenced).await;
            let failures = results.values().filter(|r| r.is_err()).count();
            if cli.format == OutputFormat::Json {
                let entries: Vec<_> = results
                    .iter()
                    .map(|(udid, result)| match result {
                        Ok(()) => serde_json::json!({ "udid": udid, "deleted": true }),
                        Err(e) => serde_json::json!({
                            "udid": udid,
                            "deleted": false,
                            "error": e.to_string(),
                        }),
                    })
                    .collect();
                println!(
                    "{}",
                    serde_json::to_string_pretty(&entries)
                        .map_err(|e| CliError::Protocol(e.to_string()))?
                );
            } else if results.is_empty() {
                eprintln!("Pool is empty, nothing to delete");
            } else {
                for (udid, result) in &results {
                    match result {
                        Ok(()) => println!("deleted {}", udid),
                        Err(e) => println!("failed {}: {}", udid, e),
                    }
                }
            }
            if failures > 0 {
                return Err(CliError::CommandFailed(format!(
                    "{} of {} deletions failed",
                    failures,
                    results.len()
                )));
            }
            Ok(())
        }
        Command::Install { ref path } => {
            run_command(
                &fleet,
                &cli,
                CommandRequest::InstallApp { path: path.clone() },
            )
            .await
        }
        Command::Uninstall { ref bundle_id } => {
            run_command(
                &fleet,
                &cli,
                CommandRequest::UninstallApp {
                    bundle_id: bundle_id.clone(),
                },
            )
            .await
        }
        Command::Apps => run_command(&fleet, &cli, CommandRequest::ListApps).await,
        Command::Container { ref bundle_id } => {
            run_command(
                &fleet,
                &cli,
                CommandRequest::AppContainer {
                    bundle_id: bundle_id.clone(),
                },
            )
            .await
        }
        Command::Launch {
            ref bundle_id,
            ref args,
        } => {
            run_command(
                &fleet,
                &cli,
                CommandRequest::LaunchApp {
                    bundle_id: bundle_id.clone(),
                    args: args.clone(),
                },
            )
            .await
        }
        Command::Terminate { ref bundle_id } => {
            run_command(
                &fleet,
                &cli,
                CommandRequest::TerminateApp {
                    bundle_id: bundle_id.clone(),
                },
            )
            .await
        }
        Command::Services => run_command(&fleet, &cli, CommandRequest::ListServices).await,
        Command::Spawn {
            ref binary,
            ref args,
        } => {
            run_command(
                &fleet,
                &cli,
                CommandRequest::Spawn {
                    binary: binary.clone(),
                    args: args.clone(),
                },
            )
            .await
        }
        Command::ResetKeychain => run_command(&fleet, &cli, CommandRequest::ResetKeychain).await,
        Command::AddMedia { ref paths } => {
            run_command(
                &fleet,
                &cli,
                CommandRequest::AddMedia {
                    paths: paths.clone(),
                },
            )
            .await
        }
        Command::RecordVideo {
            ref output,
            duration_secs,
        } => {
            run_command(
                &fleet,
                &cli,
                CommandRequest::RecordVideo {
                    output: output.clone(),
                    duration_secs,
                },
            )
            .await
        }
        Command::Accessibility { at } => {
            run_command(
                &fleet,
                &cli,
                CommandRequest::AccessibilitySnapshot { point: at },
            )
            .await
        }
        Command::Grant {
            ref bundle_id,
            ref services,
        } => {
            run_command(
                &fleet,
                &cli,
                CommandRequest::GrantPermissions {
                    bundle_id: bundle_id.clone(),
                    services: services.clone(),
                },
            )
            .await
        }
        Command::Xctest { ref xctestrun } => {
            run_command(
                &fleet,
                &cli,
                CommandRequest::RunXcTest {
                    xctestrun: xctestrun.clone(),
                },
            )
            .await
        }
        Command::SetLocation {
            latitude,
            longitude,
        } => {
            run_command(
                &fleet,
                &cli,
                CommandRequest::SetLocation {
                    latitude,
                    longitude,
                },
            )
            .await
        }
        Command::Completions { .. } => Ok(()),
    }
}

/// Dispatches one command against the global target and renders its result.
///
/// Ctrl-C cancels the in-flight command through the same token the
/// dispatcher hands to the platform, so a partial recording or install is
/// cleaned up by the bridge rather than orphaned.
async fn run_command(fleet: &Fleet, cli: &Cli, request: CommandRequest) -> Result<(), CliError> {
    let token = CancellationToken::new();
    let interrupt = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            interrupt.cancel();
        }
    });

    let options = DispatchOptions {
        timeout: cli.timeout_secs.map(Duration::from_secs),
        token: Some(token),
        ..Default::default()
    };
    let output = fleet.run(&cli.target, request, options).await?;

    if cli.format == OutputFormat::Json {
        println!(
            "{}",
            serde_json::to_string_pretty(&output)
                .map_err(|e| CliError::Protocol(e.to_string()))?
        );
    } else {
        render::command_output(&output, cli.quiet);
    }
    Ok(())
}

async fn watch(fleet: &Fleet, cli: &Cli, interval_secs: u64) -> Result<(), CliError> {
    let mut events = fleet.subscribe();
    fleet.refresh().await?;
    if !cli.quiet && cli.format == OutputFormat::Text {
        eprintln!("Watching for target changes (Ctrl-C to stop)");
    }

    let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = fleet.refresh().await {
                    tracing::warn!(error = %e, "enumeration failed");
                }
            }
            _ = tokio::signal::ctrl_c() => return Ok(()),
            event = events.recv() => match event {
                Ok(event) => {
                    if cli.format == OutputFormat::Json {
                        println!(
                            "{}",
                            serde_json::to_string(&event)
                                .map_err(|e| CliError::Protocol(e.to_string()))?
                        );
                    } else {
                        println!("{}", render::event_line(&event));
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "event stream lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return Ok(()),
            },
        }
    }
}

fn report_transition(cli: &Cli, verb: &str, udid: &str) -> Result<(), CliError> {
    if cli.format == OutputFormat::Json {
        println!(
            "{}",
            serde_json::json!({ "success": true, "udid": udid })
        );
    } else if !cli.quiet {
        eprintln!("{} {}", verb, udid);
    }
    Ok(())
}
