//! Versioned on-disk schema of persisted preview configs.
//!
//! | version | assignment shape                              |
//! |---------|-----------------------------------------------|
//! | 0       | `{ slotId, source: NodeOutputRef \| null }`   |
//! | 1       | `{ slotId, sources: NodeOutputRef[] }`        |
//!
//! Documents without `schemaVersion` are version 0. [`upgrade`] runs once at
//! load; the store writes the upgraded document back.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    errors::{Error, Result},
    ids::{PlatformId, SlotId, WorkflowId},
    preview::{
        model::{NodeOutputRef, PreviewConfig, SlotAssignment},
        templates::LINKEDIN,
    },
};

pub const CURRENT_SCHEMA_VERSION: u64 = 1;

pub(crate) const DEFAULT_TONE: &str = "professional";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AssignmentV0 {
    slot_id: SlotId,
    #[serde(default)]
    source: Option<NodeOutputRef>,
    /// Some version-0 writers already stored lists.
    #[serde(default)]
    sources: Option<Vec<NodeOutputRef>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConfigV0 {
    workflow_id: WorkflowId,
    #[serde(default)]
    platform_id: Option<PlatformId>,
    #[serde(default)]
    assignments: Vec<AssignmentV0>,
    #[serde(default)]
    tone: Option<String>,
    #[serde(default)]
    updated_at: Option<DateTime<Utc>>,
}

/// Document as written by the current version.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct StoredConfig {
    pub schema_version: u64,
    #[serde(flatten)]
    pub config: PreviewConfig,
}

impl StoredConfig {
    pub fn current(config: PreviewConfig) -> Self {
        Self {
            schema_version: CURRENT_SCHEMA_VERSION,
            config,
        }
    }
}

fn upgrade_v0(doc: ConfigV0) -> PreviewConfig {
    let assignments = doc
        .assignments
        .into_iter()
        .map(|a| SlotAssignment {
            slot_id: a.slot_id,
            sources: match (a.sources, a.source) {
                (Some(list), _) => list,
                (None, Some(single)) => vec![single],
                (None, None) => Vec::new(),
            },
        })
        .collect();
    PreviewConfig {
        workflow_id: doc.workflow_id,
        platform_id: doc.platform_id.unwrap_or_else(|| LINKEDIN.into()),
        assignments,
        tone: doc.tone.unwrap_or_else(|| DEFAULT_TONE.to_string()),
        updated_at: doc.updated_at.unwrap_or_else(Utc::now),
    }
}

/// Result of reading a stored document.
#[derive(Debug)]
pub struct Upgraded {
    pub config: PreviewConfig,
    pub from_version: u64,
}

impl Upgraded {
    pub fn was_migrated(&self) -> bool {
        self.from_version != CURRENT_SCHEMA_VERSION
    }
}

/// Parse a stored document of any known version into the current model.
pub fn upgrade(raw: &str) -> Result<Upgraded> {
    let value: Value = serde_json::from_str(raw)?;
    let version = value
        .get("schemaVersion")
        .and_then(Value::as_u64)
        .unwrap_or(0);
    let config = match version {
        0 => upgrade_v0(serde_json::from_value(value)?),
        CURRENT_SCHEMA_VERSION => serde_json::from_value::<StoredConfig>(value)?.config,
        other => {
            return Err(Error::Storage(format!(
                "preview config schema version {other} is newer than supported {CURRENT_SCHEMA_VERSION}"
            )))
        }
    };
    Ok(Upgraded {
        config,
        from_version: version,
    })
}

pub(crate) fn encode(config: &PreviewConfig) -> Result<String> {
    Ok(serde_json::to_string(&StoredConfig::current(config.clone()))?)
}
