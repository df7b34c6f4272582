use std::sync::Arc;

use reqwest::Method;
use serde::Deserialize;
use serde_json::Value;

use crate::{
    client::{api_path, ClientInner},
    errors::{Error, Result, ValidationError},
    ids::WorkflowId,
    types::{
        CompileResponse, ExecuteRequest, ExecuteResponse, Workflow, WorkflowCreateRequest,
        WorkflowGraph, WorkflowSummary, WorkflowUpdateRequest,
    },
};

#[cfg(feature = "streaming")]
use crate::sse::ExecutionStream;

/// Workflow CRUD, compilation and execution.
#[derive(Clone)]
pub struct WorkflowsClient {
    pub(crate) inner: Arc<ClientInner>,
}

/// Lists come back either bare or wrapped as `{ "<field>": [...] }`.
pub(crate) fn list_from_value<T: for<'de> Deserialize<'de>>(value: Value, field: &str) -> Result<Vec<T>> {
    let items = match value {
        Value::Object(mut map) => map.remove(field).unwrap_or(Value::Array(Vec::new())),
        other => other,
    };
    serde_json::from_value(items).map_err(Error::Serialization)
}

pub(crate) fn require_id<'a>(value: &'a str, field: &str) -> Result<&'a str> {
    if value.trim().is_empty() {
        return Err(Error::Validation(
            ValidationError::new(format!("{field} is required")).with_field(field),
        ));
    }
    Ok(value)
}

impl WorkflowsClient {
    /// Metadata-only listing (no nodes or edges).
    pub async fn list(&self) -> Result<Vec<WorkflowSummary>> {
        let value: Value = self.inner.get_json(&api_path("/workflows")).await?;
        list_from_value(value, "workflows")
    }

    pub async fn get(&self, workflow_id: &WorkflowId) -> Result<Workflow> {
        let id = require_id(workflow_id.as_str(), "workflow_id")?;
        self.inner
            .get_json(&api_path(&format!("/workflows/{id}")))
            .await
    }

    pub async fn create(&self, req: &WorkflowCreateRequest) -> Result<Workflow> {
        if req.name.trim().is_empty() {
            return Err(Error::Validation(
                ValidationError::new("name is required").with_field("name"),
            ));
        }
        self.inner
            .send_json(Method::POST, &api_path("/workflows"), Some(req), true)
            .await
    }

    pub async fn update(&self, workflow_id: &WorkflowId, req: &WorkflowUpdateRequest) -> Result<Workflow> {
        let id = require_id(workflow_id.as_str(), "workflow_id")?;
        self.inner
            .send_json(Method::PUT, &api_path(&format!("/workflows/{id}")), Some(req), true)
            .await
    }

    pub async fn delete(&self, workflow_id: &WorkflowId) -> Result<()> {
        let id = require_id(workflow_id.as_str(), "workflow_id")?;
        self.inner
            .send_empty(Method::DELETE, &api_path(&format!("/workflows/{id}")))
            .await
    }

    /// Compile an unsaved graph. Validation failures surface as [`Error::Compile`].
    pub async fn compile(&self, graph: &WorkflowGraph) -> Result<CompileResponse> {
        self.inner
            .send_json(Method::POST, &api_path("/workflows/compile"), Some(graph), true)
            .await
    }

    pub async fn compile_saved(&self, workflow_id: &WorkflowId) -> Result<CompileResponse> {
        let id = require_id(workflow_id.as_str(), "workflow_id")?;
        self.inner
            .send_json::<_, Value>(
                Method::POST,
                &api_path(&format!("/workflows/{id}/compile")),
                None,
                true,
            )
            .await
    }

    /// Run an unsaved graph to completion. No client-side timeout applies.
    pub async fn execute(&self, req: &ExecuteRequest) -> Result<ExecuteResponse> {
        if req.graph.as_ref().map(|g| g.nodes.is_empty()).unwrap_or(true) {
            return Err(Error::Validation(
                ValidationError::new("graph with at least one node is required").with_field("nodes"),
            ));
        }
        self.execute_at(&api_path("/workflows/execute"), req).await
    }

    /// Run a saved workflow; `req.graph` is ignored by the backend and may be `None`.
    pub async fn execute_saved(&self, workflow_id: &WorkflowId, req: &ExecuteRequest) -> Result<ExecuteResponse> {
        let id = require_id(workflow_id.as_str(), "workflow_id")?;
        self.execute_at(&api_path(&format!("/workflows/{id}/execute")), req)
            .await
    }

    async fn execute_at(&self, path: &str, req: &ExecuteRequest) -> Result<ExecuteResponse> {
        let resp: ExecuteResponse = self
            .inner
            .send_json(Method::POST, path, Some(req), false)
            .await?;
        #[cfg(feature = "tracing")]
        if let Some(warning) = &resp.persistence_warning {
            tracing::info!(path, warning = %warning, "execution outputs not persisted");
        }
        Ok(resp)
    }

    #[cfg(feature = "streaming")]
    pub async fn execute_stream(&self, req: &ExecuteRequest) -> Result<ExecutionStream> {
        if req.graph.as_ref().map(|g| g.nodes.is_empty()).unwrap_or(true) {
            return Err(Error::Validation(
                ValidationError::new("graph with at least one node is required").with_field("nodes"),
            ));
        }
        self.open_stream(api_path("/workflows/execute/stream"), req).await
    }

    #[cfg(feature = "streaming")]
    pub async fn execute_saved_stream(
        &self,
        workflow_id: &WorkflowId,
        req: &ExecuteRequest,
    ) -> Result<ExecutionStream> {
        let id = require_id(workflow_id.as_str(), "workflow_id")?;
        self.open_stream(api_path(&format!("/workflows/{id}/execute/stream")), req)
            .await
    }

    /// Open an execution stream whose end drops the workflow's cached reads
    /// again, so run lists fetched mid-run are not served afterwards.
    #[cfg(feature = "streaming")]
    async fn open_stream(&self, path: String, req: &ExecuteRequest) -> Result<ExecutionStream> {
        let resp = self.inner.open_event_stream(&path, req).await?;
        let inner = self.inner.clone();
        Ok(ExecutionStream::new(
            resp,
            Box::new(move || inner.invalidate_reads(&path)),
        ))
    }
}
