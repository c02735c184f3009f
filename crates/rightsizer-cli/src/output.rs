//! Output formatting utilities

use anyhow::Result;
use clap::ValueEnum;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

/// Output format for CLI commands
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Table format (default)
    #[default]
    Table,
    /// JSON format
    Json,
}

/// Print any serializable value as pretty JSON
pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Print rows as a rounded table, or a notice when there are none
pub fn print_rows<T: Tabled>(rows: Vec<T>, empty_message: &str) {
    if rows.is_empty() {
        println!("{}", empty_message.yellow());
        return;
    }
    let table = Table::new(rows).with(Style::rounded()).to_string();
    println!("{}", table);
}

/// Print a section heading with an underline
pub fn print_heading(title: &str) {
    println!("{}", title.bold());
    println!("{}", "=".repeat(50));
}

/// Print a success message
pub fn print_success(message: &str) {
    println!("{} {}", "✓".green().bold(), message);
}

/// Print an error message
pub fn print_error(message: &str) {
    eprintln!("{} {}", "✗".red().bold(), message);
}

/// Print a warning message
pub fn print_warning(message: &str) {
    println!("{} {}", "⚠".yellow().bold(), message);
}

/// Print an info message
pub fn print_info(message: &str) {
    println!("{} {}", "ℹ".blue().bold(), message);
}

/// Format USD amounts
pub fn format_currency(amount: f64) -> String {
    format!("${:.2}", amount)
}

pub fn format_percent(value: f64) -> String {
    format!("{:.1}%", value)
}

pub fn format_hours(hours: Option<f64>) -> String {
    hours
        .map(|h| format!("{:.1}h", h))
        .unwrap_or_else(|| "-".to_string())
}

pub fn format_timestamp(ts: &chrono::DateTime<chrono::Utc>) -> String {
    ts.format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Color status based on value
pub fn color_status(status: &str) -> String {
    match status.to_lowercase().as_str() {
        "awaiting_approval" | "pending" | "starting" | "bootstrapping" => status.yellow().to_string(),
        "resumed" => status.blue().to_string(),
        "completed" | "reverted" | "ready" | "running" | "waiting" => status.green().to_string(),
        "cancelled" => status.dimmed().to_string(),
        "manual_intervention" | "failed" | "timed_out" | "terminated_with_errors" => {
            status.red().bold().to_string()
        }
        _ => status.to_string(),
    }
}

/// Color a sizing classification by how much room it leaves
pub fn color_classification(classification: &str) -> String {
    match classification {
        "heavily_oversized" => classification.green().bold().to_string(),
        "moderately_oversized" => classification.green().to_string(),
        "right_sized" => classification.to_string(),
        "undersized" => classification.red().to_string(),
        _ => classification.to_string(),
    }
}
