//! Preview data model: output references, node states, slots and configs.

use std::{
    collections::BTreeMap,
    fmt,
    hash::{Hash, Hasher},
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    ids::{DraftId, ExecutionId, NodeId, OutputKey, PlatformId, SlotId, WorkflowId},
    registry::SlotContentType,
    types::{NodeOutputs, NodeStatus},
};

/// Pointer to one addressable output value produced by one node.
///
/// Equality and hashing only consider `node_id`, `output_key` and
/// `array_index`; the type and label are display metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeOutputRef {
    pub node_id: NodeId,
    pub node_type: String,
    pub output_key: OutputKey,
    #[serde(default)]
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub array_index: Option<usize>,
}

impl NodeOutputRef {
    pub fn new(
        node_id: impl Into<NodeId>,
        node_type: impl Into<String>,
        output_key: impl Into<OutputKey>,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            node_type: node_type.into(),
            output_key: output_key.into(),
            label: String::new(),
            array_index: None,
        }
    }

    pub fn with_index(mut self, index: usize) -> Self {
        self.array_index = Some(index);
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Stable cache/dedup key: `node:key` or `node:key:index`.
    pub fn ref_key(&self) -> String {
        match self.array_index {
            Some(index) => format!("{}:{}:{}", self.node_id, self.output_key, index),
            None => format!("{}:{}", self.node_id, self.output_key),
        }
    }
}

impl PartialEq for NodeOutputRef {
    fn eq(&self, other: &Self) -> bool {
        self.node_id == other.node_id
            && self.output_key == other.output_key
            && self.array_index == other.array_index
    }
}

impl Eq for NodeOutputRef {}

impl Hash for NodeOutputRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.node_id.hash(state);
        self.output_key.hash(state);
        self.array_index.hash(state);
    }
}

/// Minimal runtime view of a node for preview purposes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreviewNodeState {
    pub id: NodeId,
    pub node_type: String,
    pub status: NodeStatus,
    pub outputs: Option<NodeOutputs>,
}

impl PreviewNodeState {
    pub fn new(id: impl Into<NodeId>, node_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            node_type: node_type.into(),
            status: NodeStatus::Idle,
            outputs: None,
        }
    }

    pub fn completed(
        id: impl Into<NodeId>,
        node_type: impl Into<String>,
        outputs: NodeOutputs,
    ) -> Self {
        Self {
            status: NodeStatus::Completed,
            outputs: Some(outputs),
            ..Self::new(id, node_type)
        }
    }

    /// Only completed nodes with outputs are visible to the collector.
    pub fn is_collectable(&self) -> bool {
        self.status == NodeStatus::Completed && self.outputs.is_some()
    }
}

/// Node states keyed (and therefore ordered) by node id.
pub type NodeStateMap = BTreeMap<NodeId, PreviewNodeState>;

/// Named placeholder in a platform post template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateSlot {
    pub slot_id: SlotId,
    pub label: String,
    pub accepts_types: Vec<SlotContentType>,
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_chars: Option<usize>,
}

impl TemplateSlot {
    pub fn accepts(&self, content_type: SlotContentType) -> bool {
        self.accepts_types.contains(&content_type)
    }

    /// Text slots concatenate multiple sources; media slots take the first.
    pub fn is_text(&self) -> bool {
        self.accepts_types
            .iter()
            .all(|ty| matches!(ty, SlotContentType::Text | SlotContentType::Json))
    }
}

/// Sources currently assigned to one slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotAssignment {
    pub slot_id: SlotId,
    #[serde(default)]
    pub sources: Vec<NodeOutputRef>,
}

impl SlotAssignment {
    pub fn empty(slot_id: impl Into<SlotId>) -> Self {
        Self {
            slot_id: slot_id.into(),
            sources: Vec::new(),
        }
    }
}

/// Persisted per-(workflow, context) preview configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewConfig {
    pub workflow_id: WorkflowId,
    pub platform_id: PlatformId,
    pub assignments: Vec<SlotAssignment>,
    pub tone: String,
    pub updated_at: DateTime<Utc>,
}

impl PreviewConfig {
    pub fn assignment(&self, slot_id: &SlotId) -> Option<&SlotAssignment> {
        self.assignments.iter().find(|a| &a.slot_id == slot_id)
    }
}

/// Scope a preview configuration applies to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PreviewContext {
    Live,
    Run(ExecutionId),
    Draft(DraftId),
}

impl PreviewContext {
    pub fn context_id(&self) -> String {
        match self {
            PreviewContext::Live => "live".to_string(),
            PreviewContext::Run(id) => format!("run_{id}"),
            PreviewContext::Draft(id) => format!("draft_{id}"),
        }
    }
}

impl fmt::Display for PreviewContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.context_id())
    }
}
