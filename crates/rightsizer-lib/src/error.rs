//! Error types for the right-sizing library
//!
//! Two layers:
//! - [`ApiError`]: a classified failure from one external call
//! - [`OptimizerError`]: what a stage or analysis step reports to its caller

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// A classified failure of one call against an external system
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ApiError {
    /// Provider asked us to slow down (429 or a throttling error code)
    #[error("throttled: {0}")]
    Throttled(String),

    /// Network trouble or a 5xx response
    #[error("transient failure: {0}")]
    Transient(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// Response could not be understood
    #[error("unexpected response: {0}")]
    Unexpected(String),
}

impl ApiError {
    /// Whether another attempt may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, ApiError::Throttled(_) | ApiError::Transient(_))
    }
}

/// Errors surfaced by analysis and by pipeline stages
#[derive(Debug, Error)]
pub enum OptimizerError {
    #[error("{operation} failed after {attempts} attempts: {source}")]
    TransientApi {
        operation: String,
        attempts: u32,
        #[source]
        source: ApiError,
    },

    #[error("{operation} failed: {source}")]
    Api {
        operation: String,
        #[source]
        source: ApiError,
    },

    #[error("configuration record is malformed: {0}")]
    ConfigParse(String),

    #[error("cluster creation was rejected: {0}")]
    ResourceCreation(String),

    #[error("cluster {resource_id} did not become ready within {waited_secs}s")]
    PollTimeout { resource_id: String, waited_secs: u64 },

    #[error("restoring configuration record {record} failed: {reason}")]
    RevertFailure { record: String, reason: String },

    #[error("instance type {0} is not in the pricing catalog and has no nearest match")]
    CatalogLookup(String),

    #[error("invalid utilization sample: {0}")]
    InvalidSample(String),

    #[error("no approval pending with id {0}")]
    ApprovalNotFound(String),

    #[error("approval {0} was already resumed")]
    AlreadyResumed(String),

    #[error("approval {0} was cancelled")]
    ApprovalCancelled(String),

    #[error("a trial run for cluster {0} is already in progress")]
    RunInProgress(String),

    #[error("proposal for {0} contains no actionable recommendation")]
    NothingToApply(String),

    #[error("guardrail violated: {0}")]
    Guardrail(String),

    #[error("checkpoint store error: {0}")]
    Checkpoint(String),
}

impl OptimizerError {
    /// Stable kind label used in run records and metrics
    pub fn kind(&self) -> ErrorKind {
        match self {
            OptimizerError::TransientApi { .. } => ErrorKind::TransientApi,
            OptimizerError::Api { .. } => ErrorKind::Api,
            OptimizerError::ConfigParse(_) => ErrorKind::ConfigParse,
            OptimizerError::ResourceCreation(_) => ErrorKind::ResourceCreation,
            OptimizerError::PollTimeout { .. } => ErrorKind::PollTimeout,
            OptimizerError::RevertFailure { .. } => ErrorKind::RevertFailure,
            OptimizerError::CatalogLookup(_) => ErrorKind::CatalogLookup,
            OptimizerError::InvalidSample(_) => ErrorKind::InvalidSample,
            OptimizerError::ApprovalNotFound(_)
            | OptimizerError::AlreadyResumed(_)
            | OptimizerError::ApprovalCancelled(_)
            | OptimizerError::RunInProgress(_) => ErrorKind::Approval,
            OptimizerError::NothingToApply(_) | OptimizerError::Guardrail(_) => {
                ErrorKind::Guardrail
            }
            OptimizerError::Checkpoint(_) => ErrorKind::Checkpoint,
        }
    }

    /// Snapshot suitable for persisting on a run
    pub fn to_run_error(&self) -> RunError {
        RunError {
            kind: self.kind(),
            message: self.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, OptimizerError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    TransientApi,
    Api,
    ConfigParse,
    ResourceCreation,
    PollTimeout,
    RevertFailure,
    CatalogLookup,
    InvalidSample,
    Approval,
    Guardrail,
    Checkpoint,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::TransientApi => "transient_api",
            ErrorKind::Api => "api",
            ErrorKind::ConfigParse => "config_parse",
            ErrorKind::ResourceCreation => "resource_creation",
            ErrorKind::PollTimeout => "poll_timeout",
            ErrorKind::RevertFailure => "revert_failure",
            ErrorKind::CatalogLookup => "catalog_lookup",
            ErrorKind::InvalidSample => "invalid_sample",
            ErrorKind::Approval => "approval",
            ErrorKind::Guardrail => "guardrail",
            ErrorKind::Checkpoint => "checkpoint",
        };
        f.write_str(s)
    }
}

/// Error recorded on a pipeline run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunError {
    pub kind: ErrorKind,
    pub message: String,
}

impl fmt::Display for RunError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(ApiError::Throttled("slow down".into()).is_retryable());
        assert!(ApiError::Transient("reset".into()).is_retryable());
        assert!(!ApiError::Unauthorized("nope".into()).is_retryable());
        assert!(!ApiError::InvalidRequest("bad".into()).is_retryable());
        assert!(!ApiError::NotFound("gone".into()).is_retryable());
        assert!(!ApiError::Unexpected("garbage".into()).is_retryable());
    }

    #[test]
    fn test_run_error_snapshot() {
        let err = OptimizerError::ResourceCreation("quota exceeded".into());
        let run_err = err.to_run_error();
        assert_eq!(run_err.kind, ErrorKind::ResourceCreation);
        assert!(run_err.message.contains("quota exceeded"));

        let json = serde_json::to_string(&run_err).unwrap();
        assert!(json.contains("\"resource_creation\""));
    }
}
