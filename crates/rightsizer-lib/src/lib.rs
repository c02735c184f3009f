//! Right-sizing library for transient compute clusters
//!
//! This crate provides the core functionality for:
//! - Collecting CORE and TASK node utilization for a finished cluster
//! - Recommending smaller instance types with headroom
//! - Pricing current and proposed fleets
//! - Running an approved trial that always restores the cluster's config record
//! - Structured audit events and Prometheus metrics for every run

pub mod analysis;
pub mod audit;
pub mod client;
pub mod collector;
pub mod error;
pub mod models;
pub mod observability;
pub mod pipeline;
pub mod pricing;
pub mod recommend;

#[cfg(test)]
mod testing;

pub use analysis::{Analyzer, TransientConfig};
pub use audit::{AuditEvent, AuditEventKind, AuditLog, AuditSink, FileAuditSink};
pub use error::{ApiError, ErrorKind, OptimizerError, Result, RunError};
pub use models::*;
pub use observability::PipelineMetrics;
pub use pipeline::{ApprovalGate, RunOutcome, RunReport, TrialPipeline};
