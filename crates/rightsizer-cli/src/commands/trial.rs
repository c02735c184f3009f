//! Trial execution commands

use anyhow::{bail, Context, Result};
use colored::Colorize;
use rightsizer_lib::pipeline::{cancellation, RunOutcome, RunReport};
use tracing::warn;

use crate::app::App;
use crate::output::{print_error, print_json, print_success, print_warning, OutputFormat};

/// Claim an approval and run the trial
///
/// Ctrl-C only stops the run while the config record is still untouched;
/// after the modify write the pipeline always completes through revert.
pub async fn approve(app: &App, approval_id: &str) -> Result<()> {
    let pipeline = app.pipeline()?;
    let (handle, signal) = cancellation();

    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling if the config record is untouched");
            handle.cancel();
        }
    });

    let result = pipeline.approve(approval_id, &signal).await;
    interrupt.abort();
    app.flush_metrics();

    let report = result.with_context(|| format!("Failed to run approval {}", approval_id))?;
    print_report(app, &report)?;

    if report.manual_action_required {
        bail!(
            "config record {} was not restored, run `rightsizer restore {}`",
            report.record_name,
            approval_id
        );
    }
    Ok(())
}

/// Cancel a pending approval
pub async fn reject(app: &App, approval_id: &str) -> Result<()> {
    app.gate()
        .cancel(approval_id)
        .await
        .with_context(|| format!("Failed to cancel approval {}", approval_id))?;

    match app.format {
        OutputFormat::Json => print_json(&serde_json::json!({
            "approval_id": approval_id,
            "state": "cancelled",
        }))?,
        OutputFormat::Table => print_success(&format!("Approval {} cancelled", approval_id)),
    }
    Ok(())
}

/// Re-write the backed-up record of a run flagged for manual action
pub async fn restore(app: &App, approval_id: &str) -> Result<()> {
    let report = app
        .pipeline()?
        .restore(approval_id)
        .await
        .with_context(|| format!("Failed to restore approval {}", approval_id))?;
    app.flush_metrics();
    print_report(app, &report)
}

pub fn print_report(app: &App, report: &RunReport) -> Result<()> {
    match app.format {
        OutputFormat::Json => print_json(report)?,
        OutputFormat::Table => {
            for line in report.summary_lines() {
                println!("{}", line);
            }
            println!();
            match report.outcome {
                RunOutcome::Reverted if report.error.is_none() => {
                    print_success("Trial finished and the config record was restored")
                }
                RunOutcome::Reverted => {
                    print_warning("Trial failed; the config record was restored")
                }
                RunOutcome::Cancelled => print_warning("Trial cancelled before any change"),
                RunOutcome::ManualInterventionRequired => print_error(
                    &"Config record still holds the modified value".red().bold().to_string(),
                ),
            }
        }
    }
    Ok(())
}
