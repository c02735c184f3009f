//! Checkpoint inspection commands

use anyhow::{Context, Result};
use rightsizer_lib::audit::read_events;
use rightsizer_lib::pipeline::{Checkpoint, RunReport};
use tabled::Tabled;

use crate::app::App;
use crate::commands::clusters::print_proposal;
use crate::output::{
    color_status, format_currency, format_timestamp, print_heading, print_json, print_rows,
    OutputFormat,
};

#[derive(Tabled)]
struct CheckpointRow {
    #[tabled(rename = "Approval")]
    id: String,
    #[tabled(rename = "Cluster")]
    cluster: String,
    #[tabled(rename = "State")]
    state: String,
    #[tabled(rename = "Run")]
    outcome: String,
    #[tabled(rename = "Monthly savings")]
    savings: String,
    #[tabled(rename = "Updated")]
    updated: String,
}

impl From<&Checkpoint> for CheckpointRow {
    fn from(checkpoint: &Checkpoint) -> Self {
        let outcome = checkpoint
            .run
            .as_ref()
            .map(|run| RunReport::from_run(run).outcome.to_string())
            .unwrap_or_else(|| "-".to_string());
        Self {
            id: checkpoint.id.clone(),
            cluster: checkpoint.cluster_name.clone(),
            state: color_status(checkpoint.state.as_str()),
            outcome: color_status(&outcome),
            savings: format_currency(checkpoint.proposal.cost.monthly_savings),
            updated: format_timestamp(&checkpoint.updated_at),
        }
    }
}

#[derive(Tabled)]
struct EventRow {
    #[tabled(rename = "Time")]
    timestamp: String,
    #[tabled(rename = "Event")]
    event: String,
    #[tabled(rename = "Changes")]
    changes: String,
}

/// List every checkpoint, newest first
pub async fn list(app: &App) -> Result<()> {
    let mut checkpoints = app.gate().list().await.context("Failed to list checkpoints")?;
    checkpoints.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));

    match app.format {
        OutputFormat::Json => print_json(&checkpoints)?,
        OutputFormat::Table => {
            let rows: Vec<CheckpointRow> = checkpoints.iter().map(CheckpointRow::from).collect();
            print_rows(rows, "No proposals recorded");
        }
    }
    Ok(())
}

/// Show one checkpoint with its run and, optionally, its audit trail
pub async fn status(app: &App, approval_id: &str, events: bool) -> Result<()> {
    let checkpoint = app
        .gate()
        .load(approval_id)
        .await
        .with_context(|| format!("Failed to load approval {}", approval_id))?;
    let report = checkpoint.run.as_ref().map(RunReport::from_run);

    let audit_path = app.settings.audit_log_path();
    let audit = match (&checkpoint.run, events) {
        (Some(run), true) if audit_path.exists() => {
            read_events(&audit_path, Some(run.correlation_id))?
        }
        _ => Vec::new(),
    };

    match app.format {
        OutputFormat::Json => print_json(&serde_json::json!({
            "checkpoint": checkpoint,
            "report": report,
            "events": audit,
        }))?,
        OutputFormat::Table => {
            println!("Approval:               {}", checkpoint.id);
            println!("State:                  {}", color_status(checkpoint.state.as_str()));
            println!("Created:                {}", format_timestamp(&checkpoint.created_at));
            println!();
            print_proposal(&checkpoint.proposal);

            if let Some(report) = &report {
                println!();
                print_heading("Trial Run");
                for line in report.summary_lines() {
                    println!("{}", line);
                }
            }

            if events {
                println!();
                let rows: Vec<EventRow> = audit
                    .iter()
                    .map(|e| EventRow {
                        timestamp: format_timestamp(&e.timestamp),
                        event: e.event.as_str().to_string(),
                        changes: e.changes.as_ref().map(|c| c.join(", ")).unwrap_or_default(),
                    })
                    .collect();
                print_rows(rows, "No audit events for this approval");
            }
        }
    }
    Ok(())
}
