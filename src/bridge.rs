//! Turns execution results into preview node state and keeps run/draft
//! loading consistent.

use std::{future::Future, sync::Mutex};

use tokio_util::sync::CancellationToken;

use crate::{
    errors::Result,
    ids::{DraftId, ExecutionId, WorkflowId},
    preview::model::{NodeStateMap, PreviewContext, PreviewNodeState},
    runs::RunsClient,
    sse::ExecutionEvent,
    types::{ExecuteResponse, NodeStatus, RunOutputs, WorkflowGraph, WorkflowRunSummary},
};

/// Idle state for every node of a graph.
pub fn seed_from_graph(graph: &WorkflowGraph) -> NodeStateMap {
    graph
        .nodes
        .iter()
        .map(|node| (node.id.clone(), PreviewNodeState::new(node.id.clone(), node.node_type.clone())))
        .collect()
}

fn node_entry<'a>(nodes: &'a mut NodeStateMap, node_id: &crate::ids::NodeId, node_type: &str) -> &'a mut PreviewNodeState {
    let entry = nodes
        .entry(node_id.clone())
        .or_insert_with(|| PreviewNodeState::new(node_id.clone(), node_type.to_string()));
    if entry.node_type.is_empty() && !node_type.is_empty() {
        entry.node_type = node_type.to_string();
    }
    entry
}

/// Apply one streaming event to the node-state map.
pub fn apply_event(nodes: &mut NodeStateMap, event: &ExecutionEvent) {
    match event {
        ExecutionEvent::WorkflowStart { .. } => {
            for node in nodes.values_mut() {
                node.status = NodeStatus::Pending;
                node.outputs = None;
            }
        }
        ExecutionEvent::NodeStart { node_id, node_type } => {
            let node = node_entry(nodes, node_id, node_type);
            node.status = NodeStatus::Running;
            node.outputs = None;
        }
        ExecutionEvent::NodeComplete {
            node_id,
            node_type,
            outputs,
            ..
        } => {
            let node = node_entry(nodes, node_id, node_type);
            node.status = NodeStatus::Completed;
            node.outputs = Some(outputs.clone());
        }
        ExecutionEvent::NodeError {
            node_id, node_type, ..
        } => {
            let node = node_entry(nodes, node_id, node_type);
            node.status = NodeStatus::Error;
            node.outputs = None;
        }
        ExecutionEvent::WorkflowComplete { .. } => {}
        ExecutionEvent::WorkflowError { .. } => {
            for node in nodes.values_mut() {
                if matches!(node.status, NodeStatus::Running | NodeStatus::Pending) {
                    node.status = NodeStatus::Error;
                }
            }
        }
    }
}

/// Node states reported by a single-shot execution.
pub fn from_execute_response(resp: &ExecuteResponse) -> NodeStateMap {
    resp.node_results
        .iter()
        .map(|result| {
            let state = PreviewNodeState {
                id: result.node_id.clone(),
                node_type: result.node_type.clone(),
                status: result.status,
                outputs: result.outputs.clone(),
            };
            (result.node_id.clone(), state)
        })
        .collect()
}

/// Completed node states of a persisted run.
///
/// Node types come from the blueprint snapshot; nodes missing from it get an
/// empty type and therefore no registered outputs.
pub fn from_run_outputs(run: &RunOutputs) -> NodeStateMap {
    run.node_outputs
        .iter()
        .map(|(node_id, outputs)| {
            let node_type = run
                .blueprint_snapshot
                .nodes
                .iter()
                .find(|node| &node.id == node_id)
                .map(|node| node.node_type.clone())
                .unwrap_or_default();
            (
                node_id.clone(),
                PreviewNodeState::completed(node_id.clone(), node_type, outputs.clone()),
            )
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Warning,
}

/// Non-fatal banner message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

impl Notice {
    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Warning,
            message: message.into(),
        }
    }
}

pub fn notice_for_response(resp: &ExecuteResponse) -> Option<Notice> {
    resp.persistence_warning.as_deref().map(persistence_notice)
}

pub fn notice_for_event(event: &ExecutionEvent) -> Option<Notice> {
    match event {
        ExecutionEvent::WorkflowComplete {
            persistence_warning: Some(warning),
            ..
        } => Some(persistence_notice(warning)),
        _ => None,
    }
}

fn persistence_notice(warning: &str) -> Notice {
    #[cfg(feature = "tracing")]
    tracing::info!(warning, "run outputs were not persisted");
    Notice::warning(format!("Run finished, but its outputs could not be saved: {warning}"))
}

/// Which run a workflow view displays.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSelection {
    selected: Option<ExecutionId>,
    needs_refresh: bool,
}

impl RunSelection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn selected(&self) -> Option<&ExecutionId> {
        self.selected.as_ref()
    }

    pub fn needs_refresh(&self) -> bool {
        self.needs_refresh
    }

    pub fn select(&mut self, execution_id: ExecutionId) {
        self.selected = Some(execution_id);
    }

    /// A rerun started: the displayed run is outdated and the run list must be refetched.
    pub fn invalidate_for_rerun(&mut self) {
        self.selected = None;
        self.needs_refresh = true;
    }

    /// Reconcile with a freshly fetched run list.
    ///
    /// The newest run becomes the selection after a rerun, when nothing is
    /// selected, or when the selected run no longer exists.
    pub fn apply_run_list(&mut self, runs: &[WorkflowRunSummary]) {
        let still_present = self
            .selected
            .as_ref()
            .is_some_and(|id| runs.iter().any(|run| &run.execution_id == id));
        if self.needs_refresh || !still_present {
            let newest = runs.iter().max_by_key(|run| run.started_at);
            let next = newest.map(|run| run.execution_id.clone());
            #[cfg(feature = "tracing")]
            if next != self.selected {
                tracing::info!(selected = ?next, "run selection changed");
            }
            self.selected = next;
        }
        self.needs_refresh = false;
    }
}

/// Preview context to display: a selected draft wins over a selected run,
/// which wins over the live graph.
pub fn display_source(draft: Option<&DraftId>, runs: &RunSelection) -> PreviewContext {
    match (draft, runs.selected()) {
        (Some(draft), _) => PreviewContext::Draft(draft.clone()),
        (None, Some(run)) => PreviewContext::Run(run.clone()),
        (None, None) => PreviewContext::Live,
    }
}

/// Guards a view's data loads: starting a load cancels the previous one, so
/// the last-started load wins regardless of completion order.
#[derive(Debug, Default)]
pub struct LoadSlot {
    current: Mutex<Option<CancellationToken>>,
}

impl LoadSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel the running load and hand out the token of a new one.
    pub fn begin(&self) -> CancellationToken {
        let token = CancellationToken::new();
        let mut current = self.current.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(previous) = current.replace(token.clone()) {
            previous.cancel();
        }
        token
    }

    pub fn cancel(&self) {
        let current = self.current.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(token) = current.as_ref() {
            token.cancel();
        }
    }

    /// Run `load` as the current load; `None` if it was superseded or cancelled.
    pub async fn run<F, T>(&self, load: F) -> Option<T>
    where
        F: Future<Output = T>,
    {
        let token = self.begin();
        tokio::select! {
            _ = token.cancelled() => None,
            value = load => (!token.is_cancelled()).then_some(value),
        }
    }
}

/// Load a run's node states unless a newer load supersedes it.
pub async fn load_run_nodes(
    runs: &RunsClient,
    slot: &LoadSlot,
    workflow_id: &WorkflowId,
    execution_id: &ExecutionId,
) -> Option<Result<NodeStateMap>> {
    slot.run(async {
        runs.outputs(workflow_id, execution_id)
            .await
            .map(|run| from_run_outputs(&run))
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BlueprintNode, BlueprintSnapshot, NodeResult};
    use chrono::{TimeZone, Utc};
    use serde_json::json;
    use std::{collections::HashMap, time::Duration};

    fn run(id: &str, minute: u32) -> WorkflowRunSummary {
        serde_json::from_value(json!({
            "execution_id": id,
            "status": "completed",
            "started_at": Utc.with_ymd_and_hms(2024, 5, 1, 12, minute, 0).unwrap(),
        }))
        .unwrap()
    }

    #[test]
    fn stream_events_drive_node_states() {
        let mut nodes = NodeStateMap::new();
        nodes.insert("old".into(), PreviewNodeState::completed("old", "TextGeneration", Default::default()));

        apply_event(&mut nodes, &ExecutionEvent::WorkflowStart { execution_id: None, total_nodes: None });
        assert_eq!(nodes["old"].status, NodeStatus::Pending);
        assert!(nodes["old"].outputs.is_none());

        apply_event(&mut nodes, &ExecutionEvent::NodeStart { node_id: "t".into(), node_type: "TextGeneration".into() });
        assert_eq!(nodes["t"].status, NodeStatus::Running);

        let outputs = json!({ "text": "hi" }).as_object().cloned().unwrap();
        apply_event(
            &mut nodes,
            &ExecutionEvent::NodeComplete {
                node_id: "t".into(),
                node_type: String::new(),
                outputs: outputs.clone(),
                execution_time_ms: Some(12.0),
            },
        );
        assert!(nodes["t"].is_collectable());
        assert_eq!(nodes["t"].node_type, "TextGeneration");

        apply_event(&mut nodes, &ExecutionEvent::WorkflowError { error: "boom".into(), execution_id: None });
        assert_eq!(nodes["old"].status, NodeStatus::Error);
        assert_eq!(nodes["t"].status, NodeStatus::Completed);
    }

    #[test]
    fn execute_response_maps_node_results() {
        let resp = ExecuteResponse {
            success: true,
            workflow_outputs: Default::default(),
            node_results: vec![NodeResult {
                node_id: "q".into(),
                node_type: "QuoteExtraction".into(),
                status: NodeStatus::Completed,
                outputs: Some(json!({ "quotes": ["a"] }).as_object().cloned().unwrap()),
                execution_time_ms: 3.0,
                error: None,
            }],
            total_execution_time_ms: 3.0,
            error: None,
            execution_id: Some("e1".into()),
            persistence_warning: Some("payload too large".into()),
        };
        let nodes = from_execute_response(&resp);
        assert!(nodes["q"].is_collectable());
        let notice = notice_for_response(&resp).unwrap();
        assert_eq!(notice.level, NoticeLevel::Warning);
        assert!(notice.message.contains("payload too large"));
    }

    #[test]
    fn run_outputs_recover_types_from_blueprint() {
        let run = RunOutputs {
            execution_id: "e1".into(),
            node_outputs: HashMap::from([
                ("a".into(), json!({ "text": "x" }).as_object().cloned().unwrap()),
                ("b".into(), Default::default()),
            ]),
            blueprint_snapshot: BlueprintSnapshot {
                nodes: vec![BlueprintNode { id: "a".into(), node_type: "TextGeneration".into() }],
            },
        };
        let nodes = from_run_outputs(&run);
        assert_eq!(nodes["a"].node_type, "TextGeneration");
        assert_eq!(nodes["b"].node_type, "");
        assert!(nodes.values().all(|n| n.status == NodeStatus::Completed));
    }

    #[test]
    fn rerun_selects_newest_run() {
        let mut selection = RunSelection::new();
        selection.apply_run_list(&[run("e1", 0), run("e2", 5)]);
        assert_eq!(selection.selected().map(|id| id.as_str()), Some("e2"));

        selection.select("e1".into());
        selection.apply_run_list(&[run("e1", 0), run("e2", 5)]);
        assert_eq!(selection.selected().map(|id| id.as_str()), Some("e1"));

        selection.invalidate_for_rerun();
        assert!(selection.needs_refresh());
        assert_eq!(selection.selected(), None);
        selection.apply_run_list(&[run("e3", 9), run("e1", 0), run("e2", 5)]);
        assert_eq!(selection.selected().map(|id| id.as_str()), Some("e3"));
        assert!(!selection.needs_refresh());
    }

    #[test]
    fn draft_beats_run_beats_live() {
        let mut runs = RunSelection::new();
        assert_eq!(display_source(None, &runs), PreviewContext::Live);
        runs.select("e1".into());
        assert_eq!(display_source(None, &runs), PreviewContext::Run("e1".into()));
        let draft: DraftId = "d1".into();
        assert_eq!(display_source(Some(&draft), &runs), PreviewContext::Draft("d1".into()));
    }

    #[tokio::test(start_paused = true)]
    async fn last_started_load_wins() {
        let slot = LoadSlot::new();
        let slow = slot.run(async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            "slow"
        });
        let fast = async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            slot.run(async {
                tokio::time::sleep(Duration::from_millis(20)).await;
                "fast"
            })
            .await
        };
        let (slow, fast) = tokio::join!(slow, fast);
        assert_eq!(slow, None);
        assert_eq!(fast, Some("fast"));
    }
}
