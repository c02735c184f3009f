//! Cost-related CLI commands

use anyhow::{Context, Result};
use colored::Colorize;
use rightsizer_lib::models::InstanceSpec;
use rightsizer_lib::pricing::worker_fleets;
use tabled::Tabled;

use crate::app::App;
use crate::output::{format_currency, format_hours, print_heading, print_json, print_rows, OutputFormat};

/// Row for the fleet comparison table
#[derive(Tabled)]
struct FleetRow {
    #[tabled(rename = "Fleet")]
    role: String,
    #[tabled(rename = "Nodes")]
    count: u32,
    #[tabled(rename = "Current")]
    current: String,
    #[tabled(rename = "Current $/h")]
    current_hourly: String,
    #[tabled(rename = "Recommended")]
    recommended: String,
    #[tabled(rename = "Recommended $/h")]
    recommended_hourly: String,
}

/// Row for the catalog table
#[derive(Tabled)]
struct CatalogRow {
    #[tabled(rename = "Type")]
    instance_type: String,
    #[tabled(rename = "vCPU")]
    vcpu: u32,
    #[tabled(rename = "Memory")]
    memory: String,
    #[tabled(rename = "Arch")]
    architecture: String,
    #[tabled(rename = "$/h")]
    hourly: String,
}

impl From<&InstanceSpec> for CatalogRow {
    fn from(spec: &InstanceSpec) -> Self {
        Self {
            instance_type: spec.instance_type.clone(),
            vcpu: spec.vcpu,
            memory: format!("{} GiB", spec.memory_gib),
            architecture: spec.architecture.to_string(),
            hourly: format!("{:.4}", spec.hourly_price),
        }
    }
}

/// Show the cost comparison of a saved proposal
pub async fn show_costs(app: &App, approval_id: &str) -> Result<()> {
    let checkpoint = app
        .gate()
        .load(approval_id)
        .await
        .with_context(|| format!("Failed to load approval {}", approval_id))?;
    let proposal = &checkpoint.proposal;
    let (current, recommended) = worker_fleets(&proposal.recommendations);

    match app.format {
        OutputFormat::Json => print_json(&serde_json::json!({
            "cluster_name": proposal.cluster_name,
            "cost": proposal.cost,
            "current_fleet": current,
            "recommended_fleet": recommended,
        }))?,
        OutputFormat::Table => {
            print_heading(&format!("Cost Analysis: {}", proposal.cluster_name));
            println!("Runtime per run:        {}", format_hours(Some(proposal.runtime_hours)));
            println!("Runs per month:         {}", proposal.cost.runs_per_month);
            println!();

            let rows: Vec<FleetRow> = current
                .iter()
                .zip(recommended.iter())
                .map(|(cur, rec)| FleetRow {
                    role: cur.role.to_string(),
                    count: cur.count,
                    current: cur.spec.instance_type.clone(),
                    current_hourly: format_currency(cur.spec.hourly_price * cur.count as f64),
                    recommended: rec.spec.instance_type.clone(),
                    recommended_hourly: format_currency(rec.spec.hourly_price * rec.count as f64),
                })
                .collect();
            print_rows(rows, "No worker fleets");
            println!();

            let cost = &proposal.cost;
            println!("{}", "Per Run".bold());
            println!("{}", "-".repeat(50));
            println!("Current:                {}", format_currency(cost.per_run_current));
            println!(
                "Recommended:            {}",
                format_currency(cost.per_run_recommended).green()
            );
            println!(
                "Savings:                {} ({:.1}%)",
                format_currency(cost.per_run_savings()),
                cost.savings_percent()
            );
            println!();
            println!(
                "{} {}",
                "Monthly Savings:".bold(),
                format_currency(cost.monthly_savings).green().bold()
            );
            println!("Trial run cost:         {}", format_currency(cost.test_run_cost));
        }
    }

    Ok(())
}

/// Print the pricing catalog, optionally one family
pub fn show_catalog(app: &App, family: Option<&str>) -> Result<()> {
    let catalog = app.catalog();
    let specs: Vec<&InstanceSpec> = match family {
        Some(family) => catalog.family(family),
        None => catalog.specs().iter().collect(),
    };

    match app.format {
        OutputFormat::Json => print_json(&specs)?,
        OutputFormat::Table => {
            let rows: Vec<CatalogRow> = specs.into_iter().map(CatalogRow::from).collect();
            print_rows(rows, "No instance types match");
        }
    }
    Ok(())
}
