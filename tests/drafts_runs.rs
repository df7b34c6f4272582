use std::{collections::BTreeMap, sync::Arc, time::Duration};

use contentflow::{
    bridge::{load_run_nodes, LoadSlot, RunSelection},
    preview::{DraftAutosaver, SaveIndicator},
    testing::test_client,
    types::{DraftCreateRequest, NodeStatus},
    DraftId, ExecutionId, WorkflowId,
};
use pretty_assertions::assert_eq;
use serde_json::json;
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn draft_json(name: &str, headline: &str) -> serde_json::Value {
    json!({
        "id": "d1",
        "workflow_id": "w1",
        "name": name,
        "execution_id": "e2",
        "platform_id": "linkedin",
        "tone": "professional",
        "slot_content": { "headline": headline },
        "created_at": "2024-05-01T12:00:00Z",
        "updated_at": "2024-05-01T12:05:00Z"
    })
}

#[tokio::test]
async fn runs_are_listed_newest_first() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/workflows/w1/runs"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "runs": [
                { "execution_id": "e1", "status": "completed", "started_at": "2024-05-01T10:00:00Z" },
                { "execution_id": "e3", "status": "failed", "started_at": "2024-05-01T12:00:00Z", "error": "boom" },
                { "execution_id": "e2", "status": "success", "started_at": "2024-05-01T11:00:00Z" }
            ]
        })))
        .mount(&server)
        .await;

    let client = test_client(&server.uri());
    let runs = client.runs().list(&WorkflowId::from("w1")).await.expect("runs");
    let ids: Vec<_> = runs.iter().map(|r| r.execution_id.as_str()).collect();
    assert_eq!(ids, vec!["e3", "e2", "e1"]);

    let mut selection = RunSelection::new();
    selection.invalidate_for_rerun();
    selection.apply_run_list(&runs);
    assert_eq!(selection.selected().map(|e| e.as_str()), Some("e3"));
}

#[tokio::test]
async fn run_outputs_become_completed_nodes() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/workflows/w1/runs/e2/outputs"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "execution_id": "e2",
            "node_outputs": {
                "t1": { "text": "Saved text" },
                "q1": { "quotes": ["A line worth sharing"] }
            },
            "blueprint_snapshot": {
                "nodes": [
                    { "id": "t1", "type": "TextGeneration" },
                    { "id": "q1", "type": "QuoteExtraction" }
                ]
            }
        })))
        .mount(&server)
        .await;

    let client = test_client(&server.uri());
    let slot = LoadSlot::new();
    let nodes = load_run_nodes(
        &client.runs(),
        &slot,
        &WorkflowId::from("w1"),
        &ExecutionId::from("e2"),
    )
    .await
    .expect("not superseded")
    .expect("outputs");

    assert_eq!(nodes.len(), 2);
    assert_eq!(nodes["t1"].node_type, "TextGeneration");
    assert_eq!(nodes["q1"].status, NodeStatus::Completed);
}

#[tokio::test]
async fn superseded_run_load_is_discarded() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/workflows/w1/runs/slow/outputs"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "execution_id": "slow", "node_outputs": {} }))
                .set_delay(Duration::from_millis(300)),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/workflows/w1/runs/fast/outputs"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "execution_id": "fast",
            "node_outputs": { "t1": { "text": "fast" } }
        })))
        .mount(&server)
        .await;

    let client = test_client(&server.uri());
    let runs = client.runs();
    let slot = LoadSlot::new();
    let wf = WorkflowId::from("w1");
    let slow_id = ExecutionId::from("slow");
    let fast_id = ExecutionId::from("fast");

    let slow = load_run_nodes(&runs, &slot, &wf, &slow_id);
    let fast = async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        load_run_nodes(&runs, &slot, &wf, &fast_id).await
    };
    let (slow, fast) = tokio::join!(slow, fast);
    assert!(slow.is_none());
    let nodes = fast.expect("latest load").expect("outputs");
    assert!(nodes.contains_key("t1"));
}

#[tokio::test]
async fn draft_crud_round_trip() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/workflows/w1/drafts"))
        .and(body_json(json!({
            "name": "Morning post",
            "execution_id": "e2",
            "platform_id": "linkedin",
            "tone": "professional",
            "slot_content": { "headline": "Big news" }
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(draft_json("Morning post", "Big news")))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/workflows/w1/drafts"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "id": "d1", "name": "Morning post", "platform_id": "linkedin" }
        ])))
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/v1/workflows/w1/drafts/d1"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let client = test_client(&server.uri());
    let wf = WorkflowId::from("w1");
    let drafts = client.drafts();
    let created = drafts
        .create(
            &wf,
            &DraftCreateRequest {
                name: "Morning post".into(),
                execution_id: Some("e2".into()),
                platform_id: "linkedin".into(),
                tone: Some("professional".into()),
                slot_content: BTreeMap::from([("headline".into(), "Big news".to_string())]),
            },
        )
        .await
        .expect("create");
    assert_eq!(created.id.as_str(), "d1");
    assert_eq!(created.slot_content["headline"], "Big news");

    let listed = drafts.list(&wf).await.expect("list");
    assert_eq!(listed.len(), 1);

    drafts.delete(&wf, &created.id).await.expect("delete");
}

#[tokio::test]
async fn autosave_persists_debounced_edits() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/v1/workflows/w1/drafts/d1"))
        .and(body_json(json!({ "slot_content": { "headline": "Hey", "body": "Intro" } })))
        .respond_with(ResponseTemplate::new(200).set_body_json(draft_json("Morning post", "Hey")))
        .expect(1)
        .mount(&server)
        .await;

    let client = test_client(&server.uri());
    let sink = Arc::new(client.drafts().sink(WorkflowId::from("w1")));
    let autosaver = DraftAutosaver::with_timing(
        DraftId::from("d1"),
        BTreeMap::from([("body".into(), "Intro".to_string())]),
        sink,
        Duration::from_millis(40),
        Duration::from_millis(500),
    );

    autosaver.edit("headline", "H");
    autosaver.edit("headline", "He");
    autosaver.edit("headline", "Hey");
    assert!(autosaver.is_dirty());

    let mut indicator = autosaver.subscribe();
    tokio::time::timeout(Duration::from_secs(2), indicator.wait_for(|s| *s == SaveIndicator::Autosaved))
        .await
        .expect("autosave within timeout")
        .expect("indicator channel open");
    assert!(!autosaver.is_dirty());
    assert_eq!(autosaver.last_error(), None);
}
