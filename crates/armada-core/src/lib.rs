//! # armada-core
//!
//! Core library for managing a fleet of iOS simulators and physical devices.
//!
//! This crate classifies target identifiers, tracks what the host platform
//! knows about each target, gates commands on a capability matrix, pools
//! simulators for reuse, and dispatches commands with strict per-target
//! ordering.
//!
//! ## Modules
//!
//! - [`identifier`] - Classification and normalization of raw identifier strings
//! - [`target`] - Target snapshots, lifecycle states, and simulator configurations
//! - [`capability`] - The kind/state capability matrix and authorization
//! - [`command`] - Command requests and their outputs
//! - [`registry`] - Refreshable discovery snapshot with change events
//! - [`pool`] - Claim-based simulator allocation and destructive lifecycle
//! - [`dispatch`] - Per-target serialized command execution
//! - [`fleet`] - Facade wiring registry, pool, and dispatcher together
//! - [`platform`] - The bridge trait the host side implements
//! - [`host`] - Bridge implementation backed by `simctl`, `usbmuxd`, and `axe`
//! - [`simctl`] - Wrapper around Apple's `xcrun simctl` CLI
//! - [`axe`] - Wrapper around the `axe` accessibility tool
//! - [`usbmux`] - Physical device discovery over usbmuxd
//! - [`slots`] - Per-target FIFO queues behind ordering guarantees
//! - [`config`] - On-disk configuration and capability timeouts
//! - [`error`] - Error types shared across the crate
//!
//! ## External Dependencies
//!
//! The host bridge shells out to tools that must be installed:
//!
//! - **Xcode** (for `xcrun simctl` and `xcodebuild`) - Simulator control and test hosting
//! - **axe** - Third-party accessibility tool (`brew install cameroncooke/axe/axe`)
//!
//! Physical device discovery talks to `usbmuxd` directly and needs no extra
//! tooling.
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use armada_core::command::CommandRequest;
//! use armada_core::config::ArmadaConfig;
//! use armada_core::dispatch::DispatchOptions;
//! use armada_core::fleet::Fleet;
//! use armada_core::host::HostBridge;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), armada_core::error::TargetError> {
//!     let fleet = Fleet::new(Arc::new(HostBridge::new()), ArmadaConfig::load());
//!
//!     // Install and launch against whichever simulator is booted.
//!     fleet
//!         .run(
//!             "booted",
//!             CommandRequest::InstallApp { path: "MyApp.app".into() },
//!             DispatchOptions::default(),
//!         )
//!         .await?;
//!     let output = fleet
//!         .run(
//!             "booted",
//!             CommandRequest::LaunchApp {
//!                 bundle_id: "com.example.my-app".into(),
//!                 args: Vec::new(),
//!             },
//!             DispatchOptions::default(),
//!         )
//!         .await?;
//!     println!("{}", output.message);
//!     Ok(())
//! }
//! ```

pub mod axe;
pub mod capability;
pub mod command;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod fleet;
pub mod host;
pub mod identifier;
pub mod platform;
pub mod pool;
pub mod registry;
pub mod simctl;
pub mod slots;
pub mod target;
pub mod usbmux;
