//! Wire types exchanged with the workflow backend.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{
    errors::Diagnostic,
    ids::{DraftId, ExecutionId, NodeId, PlatformId, SlotId, WorkflowId},
};

/// Output payload of one node, keyed by output port.
pub type NodeOutputs = Map<String, Value>;

/// Canvas position of a node.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

/// Node as placed on the builder canvas.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowNode {
    pub id: NodeId,
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default)]
    pub position: Position,
    #[serde(default)]
    pub data: Value,
}

/// Directed connection between two node ports.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowEdge {
    pub id: String,
    pub source: NodeId,
    pub target: NodeId,
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "sourceHandle")]
    pub source_handle: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "targetHandle")]
    pub target_handle: Option<String>,
}

/// Node/edge payload of a workflow graph.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct WorkflowGraph {
    #[serde(default)]
    pub nodes: Vec<WorkflowNode>,
    #[serde(default)]
    pub edges: Vec<WorkflowEdge>,
}

/// Saved workflow including its graph.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Workflow {
    pub id: WorkflowId,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(flatten)]
    pub graph: WorkflowGraph,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Metadata-only listing record (no node/edge payload).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowSummary {
    pub id: WorkflowId,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub node_count: Option<u32>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct WorkflowCreateRequest {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(flatten)]
    pub graph: WorkflowGraph,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct WorkflowUpdateRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nodes: Option<Vec<WorkflowNode>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub edges: Option<Vec<WorkflowEdge>>,
}

/// Executable blueprint returned by a successful compile.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct CompileResponse {
    pub blueprint: Value,
    #[serde(default)]
    pub diagnostics: Vec<Diagnostic>,
}

/// Execution request; `graph` is omitted when executing a saved workflow.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct ExecuteRequest {
    #[serde(flatten)]
    pub graph: Option<WorkflowGraph>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub inputs: Map<String, Value>,
}

impl ExecuteRequest {
    pub fn for_graph(graph: WorkflowGraph) -> Self {
        Self {
            graph: Some(graph),
            inputs: Map::new(),
        }
    }

    pub fn with_input(mut self, key: impl Into<String>, value: Value) -> Self {
        self.inputs.insert(key.into(), value);
        self
    }
}

/// Runtime status of a node.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    #[default]
    Idle,
    Pending,
    Running,
    #[serde(alias = "success", alias = "succeeded")]
    Completed,
    #[serde(alias = "failed")]
    Error,
}

/// Per-node outcome of a single-shot execution.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeResult {
    pub node_id: NodeId,
    pub node_type: String,
    pub status: NodeStatus,
    #[serde(default)]
    pub outputs: Option<NodeOutputs>,
    #[serde(default)]
    pub execution_time_ms: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Single-shot execution result.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecuteResponse {
    pub success: bool,
    #[serde(default)]
    pub workflow_outputs: Map<String, Value>,
    #[serde(default)]
    pub node_results: Vec<NodeResult>,
    #[serde(default)]
    pub total_execution_time_ms: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_id: Option<ExecutionId>,
    /// Set when the backend ran the workflow but could not store its outputs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persistence_warning: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    #[serde(alias = "success")]
    Completed,
    #[serde(alias = "error")]
    Failed,
}

/// Metadata about one past execution.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowRunSummary {
    pub execution_id: ExecutionId,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub total_execution_time_ms: Option<f64>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Node entry of the compiled graph captured with a run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BlueprintNode {
    pub id: NodeId,
    #[serde(rename = "type")]
    pub node_type: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BlueprintSnapshot {
    #[serde(default)]
    pub nodes: Vec<BlueprintNode>,
}

/// Persisted node outputs of one run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunOutputs {
    pub execution_id: ExecutionId,
    #[serde(default)]
    pub node_outputs: HashMap<NodeId, NodeOutputs>,
    #[serde(default)]
    pub blueprint_snapshot: BlueprintSnapshot,
}

/// Named, server-persisted snapshot of resolved slot content.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PreviewDraft {
    pub id: DraftId,
    pub workflow_id: WorkflowId,
    pub name: String,
    #[serde(default)]
    pub execution_id: Option<ExecutionId>,
    pub platform_id: PlatformId,
    #[serde(default)]
    pub tone: Option<String>,
    #[serde(default)]
    pub slot_content: BTreeMap<SlotId, String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PreviewDraftListItem {
    pub id: DraftId,
    pub name: String,
    #[serde(default)]
    pub execution_id: Option<ExecutionId>,
    pub platform_id: PlatformId,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DraftCreateRequest {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_id: Option<ExecutionId>,
    pub platform_id: PlatformId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tone: Option<String>,
    pub slot_content: BTreeMap<SlotId, String>,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct DraftUpdateRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform_id: Option<PlatformId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slot_content: Option<BTreeMap<SlotId, String>>,
}
