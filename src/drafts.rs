use std::{collections::BTreeMap, sync::Arc};

use reqwest::Method;
use serde_json::Value;

use crate::{
    client::{api_path, ClientInner},
    errors::{Error, Result, ValidationError},
    ids::{DraftId, SlotId, WorkflowId},
    preview::autosave::DraftSink,
    types::{DraftCreateRequest, DraftUpdateRequest, PreviewDraft, PreviewDraftListItem},
    workflows::{list_from_value, require_id},
    BoxFuture,
};

/// Named preview drafts stored per workflow.
#[derive(Clone)]
pub struct DraftsClient {
    pub(crate) inner: Arc<ClientInner>,
}

fn drafts_path(workflow_id: &WorkflowId) -> Result<String> {
    let id = require_id(workflow_id.as_str(), "workflow_id")?;
    Ok(api_path(&format!("/workflows/{id}/drafts")))
}

fn draft_path(workflow_id: &WorkflowId, draft_id: &DraftId) -> Result<String> {
    let draft = require_id(draft_id.as_str(), "draft_id")?;
    Ok(format!("{}/{draft}", drafts_path(workflow_id)?))
}

impl DraftsClient {
    pub async fn list(&self, workflow_id: &WorkflowId) -> Result<Vec<PreviewDraftListItem>> {
        let value: Value = self.inner.get_json(&drafts_path(workflow_id)?).await?;
        list_from_value(value, "drafts")
    }

    pub async fn get(&self, workflow_id: &WorkflowId, draft_id: &DraftId) -> Result<PreviewDraft> {
        self.inner.get_json(&draft_path(workflow_id, draft_id)?).await
    }

    pub async fn create(&self, workflow_id: &WorkflowId, req: &DraftCreateRequest) -> Result<PreviewDraft> {
        if req.name.trim().is_empty() {
            return Err(Error::Validation(
                ValidationError::new("name is required").with_field("name"),
            ));
        }
        self.inner
            .send_json(Method::POST, &drafts_path(workflow_id)?, Some(req), true)
            .await
    }

    pub async fn update(
        &self,
        workflow_id: &WorkflowId,
        draft_id: &DraftId,
        req: &DraftUpdateRequest,
    ) -> Result<PreviewDraft> {
        self.inner
            .send_json(Method::PUT, &draft_path(workflow_id, draft_id)?, Some(req), true)
            .await
    }

    pub async fn delete(&self, workflow_id: &WorkflowId, draft_id: &DraftId) -> Result<()> {
        self.inner
            .send_empty(Method::DELETE, &draft_path(workflow_id, draft_id)?)
            .await
    }

    /// Autosave target writing slot content of this workflow's drafts.
    pub fn sink(&self, workflow_id: WorkflowId) -> WorkflowDraftSink {
        WorkflowDraftSink {
            drafts: self.clone(),
            workflow_id,
        }
    }
}

/// [`DraftSink`] bound to one workflow.
#[derive(Clone)]
pub struct WorkflowDraftSink {
    drafts: DraftsClient,
    workflow_id: WorkflowId,
}

impl DraftSink for WorkflowDraftSink {
    fn save_slot_content<'a>(
        &'a self,
        draft_id: &'a DraftId,
        slot_content: BTreeMap<SlotId, String>,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let req = DraftUpdateRequest {
                slot_content: Some(slot_content),
                ..Default::default()
            };
            self.drafts
                .update(&self.workflow_id, draft_id, &req)
                .await
                .map(|_| ())
        })
    }
}
