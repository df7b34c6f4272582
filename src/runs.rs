use std::sync::Arc;

use serde_json::Value;

use crate::{
    client::{api_path, ClientInner},
    errors::Result,
    ids::{ExecutionId, WorkflowId},
    types::{RunOutputs, WorkflowRunSummary},
    workflows::{list_from_value, require_id},
};

/// Run history of saved workflows.
#[derive(Clone)]
pub struct RunsClient {
    pub(crate) inner: Arc<ClientInner>,
}

impl RunsClient {
    /// Runs of a workflow, newest first.
    pub async fn list(&self, workflow_id: &WorkflowId) -> Result<Vec<WorkflowRunSummary>> {
        let id = require_id(workflow_id.as_str(), "workflow_id")?;
        let value: Value = self
            .inner
            .get_json(&api_path(&format!("/workflows/{id}/runs")))
            .await?;
        let mut runs: Vec<WorkflowRunSummary> = list_from_value(value, "runs")?;
        runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(runs)
    }

    /// Persisted node outputs of one run plus the blueprint snapshot used to
    /// recover node types.
    pub async fn outputs(&self, workflow_id: &WorkflowId, execution_id: &ExecutionId) -> Result<RunOutputs> {
        let id = require_id(workflow_id.as_str(), "workflow_id")?;
        let run = require_id(execution_id.as_str(), "execution_id")?;
        self.inner
            .get_json(&api_path(&format!("/workflows/{id}/runs/{run}/outputs")))
            .await
    }
}
