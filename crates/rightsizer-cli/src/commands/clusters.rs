//! Cluster discovery and analysis commands

use anyhow::{Context, Result};
use colored::Colorize;
use rightsizer_lib::models::{Proposal, Recommendation};
use tabled::Tabled;

use crate::app::App;
use crate::output::{
    color_classification, format_currency, format_hours, format_percent, format_timestamp,
    print_heading, print_info, print_json, print_rows, print_success, print_warning,
    OutputFormat,
};

#[derive(Tabled)]
struct ClusterRow {
    #[tabled(rename = "Id")]
    id: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "State")]
    state: String,
    #[tabled(rename = "Created")]
    created: String,
    #[tabled(rename = "Runtime")]
    runtime: String,
}

#[derive(Tabled)]
struct RecommendationRow {
    #[tabled(rename = "Fleet")]
    role: String,
    #[tabled(rename = "Nodes")]
    nodes: u32,
    #[tabled(rename = "Current")]
    current: String,
    #[tabled(rename = "Recommended")]
    recommended: String,
    #[tabled(rename = "Sizing")]
    classification: String,
    #[tabled(rename = "Profile")]
    profile: String,
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Savings")]
    savings: String,
}

impl From<&Recommendation> for RecommendationRow {
    fn from(rec: &Recommendation) -> Self {
        let mut recommended = rec
            .recommended_spec
            .as_ref()
            .map(|s| s.instance_type.clone())
            .unwrap_or_else(|| "-".to_string());
        if rec.architecture_changed {
            recommended.push_str(" (arch)");
        }
        Self {
            role: rec.role.to_string(),
            nodes: rec.instance_count,
            current: rec.current_spec.instance_type.clone(),
            recommended,
            classification: color_classification(rec.classification.as_str()),
            profile: rec.profile.to_string(),
            kind: rec.kind.to_string(),
            savings: format_percent(rec.savings_percent),
        }
    }
}

/// List recent transient clusters
pub async fn list_clusters(app: &App) -> Result<()> {
    let clusters = app
        .analyzer()?
        .list_transient_clusters()
        .await
        .context("Failed to list clusters")?;

    match app.format {
        OutputFormat::Json => print_json(&clusters)?,
        OutputFormat::Table => {
            let rows: Vec<ClusterRow> = clusters
                .iter()
                .map(|c| ClusterRow {
                    id: c.id.clone(),
                    name: c.name.clone(),
                    state: c.state.clone(),
                    created: format_timestamp(&c.created_at),
                    runtime: format_hours(c.runtime_hours()),
                })
                .collect();
            print_rows(rows, "No transient clusters in the lookback window");
        }
    }
    Ok(())
}

/// Analyze a cluster and park the proposal awaiting approval
pub async fn analyze(app: &App, cluster_name: &str, cluster_id: Option<&str>) -> Result<()> {
    let proposal = app
        .analyzer()?
        .analyze(cluster_name, cluster_id)
        .await
        .with_context(|| format!("Failed to analyze cluster {}", cluster_name))?;

    let approval_id = if proposal.has_actionable() {
        Some(
            app.gate()
                .submit(proposal.clone())
                .await
                .context("Failed to persist proposal")?,
        )
    } else {
        None
    };

    match app.format {
        OutputFormat::Json => print_json(&serde_json::json!({
            "approval_id": approval_id,
            "proposal": proposal,
        }))?,
        OutputFormat::Table => {
            print_proposal(&proposal);
            println!();
            match approval_id {
                Some(id) => {
                    print_success(&format!("Proposal saved, approval id {}", id.cyan()));
                    print_info(&format!("Run `rightsizer approve {}` to start the trial", id));
                }
                None => print_warning("No cheaper configuration found, nothing to approve"),
            }
        }
    }
    Ok(())
}

/// Recommendations and cost summary of a proposal
pub fn print_proposal(proposal: &Proposal) {
    print_heading(&format!("Cluster {}", proposal.cluster_name));
    println!("Cluster id:             {}", proposal.cluster_id);
    println!("Runtime:                {}", format_hours(Some(proposal.runtime_hours)));
    println!();

    let rows: Vec<RecommendationRow> = proposal
        .recommendations
        .iter()
        .map(RecommendationRow::from)
        .collect();
    print_rows(rows, "No CORE or TASK fleets found");

    for rec in &proposal.recommendations {
        if let Some(explanation) = &rec.explanation {
            println!("{} {}", format!("{}:", rec.role).dimmed(), explanation.dimmed());
        }
    }
    println!();

    let cost = &proposal.cost;
    println!("Per run (current):      {}", format_currency(cost.per_run_current));
    println!(
        "Per run (recommended):  {}",
        format_currency(cost.per_run_recommended).green()
    );
    println!(
        "{} {} ({} per run, {} runs/month)",
        "Monthly savings:".bold(),
        format_currency(cost.monthly_savings).green().bold(),
        format_percent(cost.savings_percent()),
        cost.runs_per_month
    );
    println!("Trial run cost:         {}", format_currency(cost.test_run_cost));
}
