//! Terminal rendering of fleet results

use std::fmt::Write;

use opsfleet_core::{Credential, ExecError, Machine, Output};
use opsfleet_exec::KnownHostEntry;

/// One block per machine: a status line followed by its indented output
pub fn render_outputs(outputs: &[Output]) -> String {
    let mut out = String::new();
    for output in outputs {
        match &output.error {
            None => {
                let _ = writeln!(out, "✓ {}", output.machine);
            }
            // Output is printed below, not inside the error message
            Some(ExecError::CommandFailed { status, .. }) => {
                let status = status.map_or_else(|| "unknown".to_string(), |s| s.to_string());
                let _ = writeln!(out, "✗ {}: exit status {status}", output.machine);
            }
            Some(error) => {
                let _ = writeln!(out, "✗ {}: {error}", output.machine);
            }
        }
        for line in output.output.lines() {
            let _ = writeln!(out, "    {line}");
        }
    }
    out
}

/// Results as a JSON array
///
/// # Errors
/// Returns error if serialization fails
pub fn render_json(outputs: &[Output]) -> serde_json::Result<String> {
    serde_json::to_string_pretty(outputs)
}

pub fn render_machines(machines: &[Machine]) -> String {
    let mut out = String::new();
    for machine in machines {
        let auth = match machine.credential() {
            Some(Credential::Password(_)) => "password",
            Some(Credential::PrivateKey(_)) => "key",
            None => "none",
        };
        let _ = writeln!(
            out,
            "{}\t{}@{}:{}\t{auth}",
            machine.name(),
            machine.username(),
            machine.host(),
            machine.port()
        );
    }
    out
}

pub fn render_known_hosts(entries: &[KnownHostEntry]) -> String {
    let mut out = String::new();
    for entry in entries {
        let marker = if entry.revoked { "\trevoked" } else { "" };
        let _ = writeln!(
            out,
            "{}\t{}{marker}",
            entry.hosts.join(","),
            entry.key.algorithm()
        );
    }
    out
}
