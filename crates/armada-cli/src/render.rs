//! Text rendering for command-line output.
//!
//! JSON output serializes core types directly; everything here is the
//! human-readable form. Messages and progress go to stderr, payloads a
//! script might capture go to stdout.

use armada_core::command::CommandOutput;
use armada_core::pool::PoolMember;
use armada_core::registry::{RefreshDiff, RegistryEvent};
use armada_core::target::{Target, TargetSummary};
use chrono::Local;

/// One row per target: identifier, name, kind, and state.
pub fn target_table(summaries: &[TargetSummary]) -> String {
    let mut out = String::new();
    for s in summaries {
        out.push_str(&format!(
            "{} -- {} [{}, {}]\n",
            s.identifier, s.name, s.kind, s.state
        ));
    }
    out
}

/// Full detail block for one resolved target.
pub fn target_detail(target: &Target) -> String {
    let mut out = String::new();
    out.push_str(&format!("Target:      {}\n", target.udid()));
    out.push_str(&format!("Kind:        {}\n", target.kind));
    out.push_str(&format!("State:       {}\n", target.state));
    out.push_str(&format!("Name:        {}\n", target.name));
    out.push_str(&format!("Family:      {}\n", target.product_family));
    if let Some(configuration) = &target.configuration {
        out.push_str(&format!("Device type: {}\n", configuration.device_type));
        out.push_str(&format!("Runtime:     {}\n", configuration.runtime));
    }
    if let Some(dir) = &target.data_directory {
        out.push_str(&format!("Data dir:    {}\n", dir.display()));
    }
    if let Some(process) = &target.container_process {
        out.push_str(&format!(
            "Process:     {} (pid {})\n",
            process.name, process.pid
        ));
    }
    out.push_str(&format!(
        "Last seen:   {}\n",
        target
            .last_seen
            .with_timezone(&Local)
            .format("%Y-%m-%d %H:%M:%S")
    ));
    let capabilities: Vec<String> = target
        .capabilities()
        .iter()
        .map(|c| c.to_string())
        .collect();
    let capabilities = if capabilities.is_empty() {
        "none in this state".to_string()
    } else {
        capabilities.join(", ")
    };
    out.push_str(&format!("Capable of:  {}\n", capabilities));
    out
}

/// Refresh changes in `+` / `-` / `~` line form.
pub fn refresh_diff(diff: &RefreshDiff) -> String {
    let mut out = String::new();
    for identifier in &diff.appeared {
        out.push_str(&format!("+ {}\n", identifier));
    }
    for identifier in &diff.departed {
        out.push_str(&format!("- {}\n", identifier));
    }
    for (identifier, from, to) in &diff.state_changed {
        out.push_str(&format!("~ {}: {} -> {}\n", identifier, from, to));
    }
    out
}

/// One timestamped line per registry event.
pub fn event_line(event: &RegistryEvent) -> String {
    let stamp = Local::now().format("%H:%M:%S");
    match event {
        RegistryEvent::Appeared { target } => format!(
            "[{}] appeared {} ({}, {})",
            stamp, target.identifier, target.name, target.state
        ),
        RegistryEvent::Departed { identifier } => {
            format!("[{}] departed {}", stamp, identifier)
        }
        RegistryEvent::StateChanged {
            identifier,
            from,
            to,
        } => format!("[{}] {} {} -> {}", stamp, identifier, from, to),
    }
}

/// One row per pool member with its claim state.
pub fn pool_table(members: &[PoolMember]) -> String {
    let mut out = String::new();
    for member in members {
        let ownership = if member.owned { "owned" } else { "adopted" };
        out.push_str(&format!(
            "{} -- {} [{}, {}]\n",
            member.identifier,
            member.configuration.short_name(),
            member.claim,
            ownership
        ));
    }
    out
}

/// Prints a command result: messages to stderr, payload to stdout.
pub fn command_output(output: &CommandOutput, quiet: bool) {
    if !quiet && !output.message.is_empty() {
        eprintln!("{}", output.message);
    }
    if let Some(data) = &output.data {
        println!("{}", data);
    }
    if let Some(artifact) = &output.artifact {
        if !quiet {
            eprintln!("Artifact: {}", artifact.display());
        }
    }
}
