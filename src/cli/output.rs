//! Output formatting for CLI commands.
//!
//! This module renders changesets, run reports and snapshots either as
//! colored text tables or as pretty-printed JSON.

use colored::Colorize;
use std::collections::BTreeMap;
use std::fmt::Write;
use tabled::{Table, Tabled};

use crate::config::{ConfigHasher, TopologyConfig};
use crate::error::TopoplanError;
use crate::graph::{Graph, ResourceKind};
use crate::planner::{Action, Changeset, ExecutionReport};
use crate::reconciler::RunReport;
use crate::state::{LockInfo, StateSnapshot};

use super::commands::OutputFormat;

/// Output formatter for CLI.
#[derive(Debug, Clone, Copy)]
pub struct OutputFormatter {
    /// Output format.
    format: OutputFormat,
}

/// Changeset operation row for table display.
#[derive(Tabled)]
struct OperationRow {
    #[tabled(rename = "#")]
    index: usize,
    #[tabled(rename = "Action")]
    action: String,
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Resource")]
    resource: String,
}

/// Detailed changeset row.
#[derive(Tabled)]
struct DetailedOperationRow {
    #[tabled(rename = "#")]
    index: usize,
    #[tabled(rename = "Action")]
    action: String,
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "Depends on")]
    depends_on: String,
    #[tabled(rename = "Changes")]
    changes: String,
}

/// Recorded resource row.
#[derive(Tabled)]
struct RecordRow {
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Physical ID")]
    physical_id: String,
    #[tabled(rename = "Fingerprint")]
    fingerprint: String,
    #[tabled(rename = "Updated")]
    updated: String,
}

/// Per-kind count row.
#[derive(Tabled)]
struct KindCountRow {
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Count")]
    count: usize,
}

impl OutputFormatter {
    /// Creates a new output formatter.
    #[must_use]
    pub const fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Formats the result of a successful validation.
    #[must_use]
    pub fn format_validation(&self, config: &TopologyConfig, graph: &Graph) -> String {
        let mut counts: BTreeMap<ResourceKind, usize> = BTreeMap::new();
        for resource in graph.resources() {
            *counts.entry(resource.kind()).or_default() += 1;
        }

        match self.format {
            OutputFormat::Json => {
                let kinds: BTreeMap<String, usize> =
                    counts.iter().map(|(k, v)| (k.to_string(), *v)).collect();
                let json = serde_json::json!({
                    "status": "valid",
                    "project": config.project.name,
                    "environment": config.project.environment,
                    "resources": graph.len(),
                    "edges": graph.edges().count(),
                    "kinds": kinds,
                });
                serde_json::to_string_pretty(&json).unwrap_or_default()
            }
            OutputFormat::Text => {
                let mut output = format!(
                    "{} Declaration is valid: {}\n\n",
                    "✓".green(),
                    config.qualified_name()
                );
                let rows: Vec<KindCountRow> = counts
                    .iter()
                    .map(|(kind, count)| KindCountRow {
                        kind: kind.to_string(),
                        count: *count,
                    })
                    .collect();
                output.push_str(&Table::new(rows).to_string());
                let _ = writeln!(
                    output,
                    "\n\n{} resources, {} edges",
                    graph.len(),
                    graph.edges().count()
                );
                output
            }
        }
    }

    /// Formats a changeset for display.
    #[must_use]
    pub fn format_plan(&self, changeset: &Changeset, detailed: bool) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(changeset).unwrap_or_default(),
            OutputFormat::Text => Self::format_plan_text(changeset, detailed),
        }
    }

    /// Formats a changeset as text.
    fn format_plan_text(changeset: &Changeset, detailed: bool) -> String {
        if changeset.is_empty() {
            return format!(
                "{} No changes required - topology is up to date.\n",
                "✓".green()
            );
        }

        let mut output = String::from("\nChangeset\n\n");

        let table = if detailed {
            let rows: Vec<DetailedOperationRow> = changeset
                .operations
                .iter()
                .enumerate()
                .map(|(i, o)| DetailedOperationRow {
                    index: i,
                    action: Self::format_action(o.action),
                    kind: o.kind.to_string(),
                    resource: o.id.to_string(),
                    depends_on: Self::truncate(
                        &o.depends_on
                            .iter()
                            .map(ToString::to_string)
                            .collect::<Vec<_>>()
                            .join(", "),
                        40,
                    ),
                    changes: o.changed_fields.join(", "),
                })
                .collect();
            Table::new(rows).to_string()
        } else {
            let rows: Vec<OperationRow> = changeset
                .operations
                .iter()
                .enumerate()
                .map(|(i, o)| OperationRow {
                    index: i,
                    action: Self::format_action(o.action),
                    kind: o.kind.to_string(),
                    resource: o.id.to_string(),
                })
                .collect();
            Table::new(rows).to_string()
        };
        output.push_str(&table);
        output.push('\n');

        let _ = write!(
            output,
            "\nPlan: {} to create, {} to update, {} to delete\n",
            changeset.count(Action::Create).to_string().green(),
            changeset.count(Action::Update).to_string().yellow(),
            changeset.count(Action::Delete).to_string().red()
        );

        output
    }

    /// Formats the outcome of an apply or destroy run.
    #[must_use]
    pub fn format_run(&self, report: &RunReport) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(report).unwrap_or_default(),
            OutputFormat::Text => {
                let Some(execution) = &report.execution else {
                    return format!("{} Nothing to {}.\n", "✓".green(), report.operation);
                };

                let status = if execution.is_complete() {
                    format!("{} {} complete", "✓".green(), report.operation)
                } else if execution.is_hard_failure() {
                    format!("{} {} failed", "✗".red(), report.operation)
                } else {
                    format!("{} {} partially applied", "⚠".yellow(), report.operation)
                };

                let mut output = format!("{status}\n\n");
                let _ = writeln!(output, "   Applied: {}", execution.applied.len());
                let _ = writeln!(output, "   Failed: {}", execution.failed.len());
                let _ = writeln!(output, "   Not attempted: {}", execution.not_attempted.len());
                Self::write_pending(&mut output, execution);
                output
            }
        }
    }

    fn write_pending(output: &mut String, execution: &ExecutionReport) {
        if !execution.failed.is_empty() {
            let _ = write!(output, "\n{} Failed operations:\n", "✗".red());
            for pending in &execution.failed {
                let _ = writeln!(
                    output,
                    "   - {} {} {}: {}",
                    pending.action,
                    pending.kind,
                    pending.id,
                    pending.error.as_deref().unwrap_or("unknown error")
                );
            }
        }
        if !execution.not_attempted.is_empty() {
            output.push_str("\nNot attempted:\n");
            for pending in &execution.not_attempted {
                let _ = writeln!(output, "   - {} {} {}", pending.action, pending.kind, pending.id);
            }
        }
    }

    /// Formats a state snapshot.
    #[must_use]
    pub fn format_state(&self, snapshot: &StateSnapshot) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(snapshot).unwrap_or_default(),
            OutputFormat::Text => {
                let hasher = ConfigHasher::new();
                let mut output = format!("\nState: {}/{}\n\n", snapshot.project, snapshot.environment);

                let status = if snapshot.is_partial() {
                    snapshot.status.to_string().yellow().to_string()
                } else {
                    snapshot.status.to_string().green().to_string()
                };
                let _ = writeln!(output, "   Version: {}", snapshot.version);
                let _ = writeln!(output, "   Status: {status}");
                let _ = writeln!(output, "   Config hash: {}", hasher.short_hash(&snapshot.config_hash));
                let _ = writeln!(output, "   Last updated: {}", snapshot.last_updated);
                let _ = writeln!(output, "   Resources: {}", snapshot.resources.len());

                if !snapshot.resources.is_empty() {
                    let rows: Vec<RecordRow> = snapshot
                        .resources
                        .values()
                        .map(|r| RecordRow {
                            resource: r.id.to_string(),
                            kind: r.kind.to_string(),
                            physical_id: r.physical_id.clone(),
                            fingerprint: hasher.short_hash(&r.fingerprint),
                            updated: r.updated_at.format("%Y-%m-%d %H:%M").to_string(),
                        })
                        .collect();
                    output.push('\n');
                    output.push_str(&Table::new(rows).to_string());
                    output.push('\n');
                }

                if snapshot.is_partial() {
                    let _ = write!(
                        output,
                        "\n{} Last run stopped with {} failed and {} not attempted operations.\n",
                        "⚠".yellow(),
                        snapshot.failed.len(),
                        snapshot.not_attempted.len()
                    );
                }

                if !snapshot.history.is_empty() {
                    let _ = writeln!(output, "\n   Recent history ({}):", snapshot.history.len());
                    for entry in snapshot.history.iter().rev().take(5) {
                        let status = if entry.success { "✓" } else { "✗" };
                        let _ = writeln!(
                            output,
                            "     {status} {} - {} ({} applied, {} pending)",
                            entry.timestamp.format("%Y-%m-%d %H:%M"),
                            entry.operation,
                            entry.applied,
                            entry.pending
                        );
                    }
                }

                output
            }
        }
    }

    /// Formats the lock removed by `state unlock`.
    #[must_use]
    pub fn format_unlock(&self, removed: Option<&LockInfo>) -> String {
        match self.format {
            OutputFormat::Json => {
                let json = serde_json::json!({ "status": "success", "removed": removed });
                serde_json::to_string_pretty(&json).unwrap_or_default()
            }
            OutputFormat::Text => match removed {
                Some(lock) => format!(
                    "{} Removed lock {} held by {} ({})",
                    "✓".green(),
                    lock.lock_id,
                    lock.holder,
                    lock.operation
                ),
                None => format!("{} State is not locked.", "✓".green()),
            },
        }
    }

    /// Formats a run-ending error.
    #[must_use]
    pub fn format_error(&self, err: &TopoplanError) -> String {
        match self.format {
            OutputFormat::Json => {
                let json = serde_json::json!({
                    "status": "error",
                    "exit_code": err.exit_code(),
                    "message": err.to_string(),
                });
                serde_json::to_string_pretty(&json).unwrap_or_default()
            }
            OutputFormat::Text => format!("{} {err}", "✗".red()),
        }
    }

    /// Formats a plain status message.
    #[must_use]
    pub fn message(&self, message: &str) -> String {
        match self.format {
            OutputFormat::Json => {
                let json = serde_json::json!({ "status": "info", "message": message });
                serde_json::to_string_pretty(&json).unwrap_or_default()
            }
            OutputFormat::Text => message.to_string(),
        }
    }

    /// Formats an action with color.
    fn format_action(action: Action) -> String {
        match action {
            Action::Create => "+create".green().to_string(),
            Action::Update => "~update".yellow().to_string(),
            Action::Delete => "-delete".red().to_string(),
        }
    }

    /// Truncates a string to a maximum number of characters.
    fn truncate(s: &str, max_len: usize) -> String {
        if s.chars().count() <= max_len {
            s.to_string()
        } else {
            let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
            format!("{kept}...")
        }
    }
}
