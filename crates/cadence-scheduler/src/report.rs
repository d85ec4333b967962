//! Contract for the external report execution engine.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::types::{ExecutionError, OutputConfig, ResourceUsage};

/// Everything the engine needs to run one report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportRequest {
    pub execution_id: String,
    pub schedule_id: String,
    pub report_id: String,
    pub tenant_id: String,
    pub parameters: serde_json::Value,
    pub output_config: OutputConfig,
    pub retry_attempt: u32,
}

/// Successful engine result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReportOutput {
    pub record_count: u64,
    #[serde(default)]
    pub output_files: Vec<String>,
    #[serde(default)]
    pub resource_usage: ResourceUsage,
}

/// Engine failure. Converted into an [`ExecutionError`] on the execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionFailure {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

impl ExecutionFailure {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            stack: None,
        }
    }
}

impl std::fmt::Display for ExecutionFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl From<ExecutionFailure> for ExecutionError {
    fn from(f: ExecutionFailure) -> Self {
        ExecutionError {
            message: f.message,
            stack: f.stack,
            code: f.code,
        }
    }
}

/// Runs reports on behalf of the scheduler.
///
/// Called from a spawned task per execution, so implementations may take as
/// long as they need without stalling the scheduler's ticks.
#[async_trait]
pub trait ReportEngine: Send + Sync {
    async fn execute(&self, request: ReportRequest) -> Result<ReportOutput, ExecutionFailure>;
}
