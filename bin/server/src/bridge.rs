//! Execution bridge that starts runs over HTTP.

use async_trait::async_trait;
use missionctl_trigger::{ExecutionBridge, ExecutionError, TriggerPayload};
use rootcause::prelude::Report;
use tracing::{debug, instrument};

/// Posts each [`TriggerPayload`] as JSON to the execution endpoint.
#[derive(Clone)]
pub struct HttpExecutionBridge {
    http: reqwest::Client,
    url: String,
}

impl HttpExecutionBridge {
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl ExecutionBridge for HttpExecutionBridge {
    #[instrument(skip(self, payload), fields(workflow_id = %payload.workflow_id, trigger_node_id = %payload.trigger_node_id))]
    async fn start_execution(&self, payload: TriggerPayload) -> Result<(), Report<ExecutionError>> {
        let response = self
            .http
            .post(&self.url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| ExecutionError::Unavailable {
                reason: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ExecutionError::Rejected {
                status: status.as_u16(),
                body,
            }
            .into());
        }
        debug!("execution started");
        Ok(())
    }
}
