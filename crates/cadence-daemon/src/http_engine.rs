use std::time::Duration;

use async_trait::async_trait;
use cadence_core::EngineConfig;
use cadence_scheduler::{ExecutionFailure, ReportEngine, ReportOutput, ReportRequest};
use tracing::{debug, warn};

/// Runs reports by POSTing the request to a remote report service.
///
/// `POST {endpoint}/reports/{report_id}/execute` with the JSON request body;
/// a 2xx reply carries a [`ReportOutput`], anything else is a failure.
pub struct HttpReportEngine {
    client: reqwest::Client,
    endpoint: String,
    token: Option<String>,
}

impl HttpReportEngine {
    pub fn new(config: &EngineConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            token: config.token.clone(),
        })
    }

    fn url(&self, report_id: &str) -> String {
        format!("{}/reports/{}/execute", self.endpoint, report_id)
    }
}

#[async_trait]
impl ReportEngine for HttpReportEngine {
    async fn execute(&self, request: ReportRequest) -> Result<ReportOutput, ExecutionFailure> {
        let url = self.url(&request.report_id);
        debug!(
            execution_id = %request.execution_id,
            report_id = %request.report_id,
            tenant_id = %request.tenant_id,
            "sending report request"
        );

        let mut builder = self.client.post(&url).json(&request);
        if let Some(token) = &self.token {
            builder = builder.bearer_auth(token);
        }
        let resp = builder.send().await.map_err(transport_failure)?;

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(status, execution_id = %request.execution_id, body = %text, "report engine error");
            return Err(failure_from_body(status, &text));
        }

        resp.json::<ReportOutput>()
            .await
            .map_err(|e| ExecutionFailure::new("INVALID_RESPONSE", e.to_string()))
    }
}

fn transport_failure(e: reqwest::Error) -> ExecutionFailure {
    let code = if e.is_timeout() {
        "TIMEOUT"
    } else if e.is_connect() {
        "ENGINE_UNREACHABLE"
    } else {
        "TRANSPORT_ERROR"
    };
    ExecutionFailure::new(code, e.to_string())
}

/// Error bodies shaped like `{"code": .., "message": ..}` are passed through;
/// anything else becomes `HTTP_<status>`.
fn failure_from_body(status: u16, body: &str) -> ExecutionFailure {
    if let Ok(failure) = serde_json::from_str::<ExecutionFailure>(body) {
        return failure;
    }
    let message = if body.trim().is_empty() {
        format!("report engine returned status {status}")
    } else {
        body.to_string()
    };
    ExecutionFailure::new(format!("HTTP_{status}"), message)
}
