//! Slot assignment store: CRUD over the preview config of one
//! `(workflow, context)` pair, persisted through a [`KeyValueStore`].
//!
//! The store is an explicit value owned by its caller; nothing here is global.
//! Writes are last-write-wins: two stores sharing a backend (two tabs, two
//! processes) overwrite each other without conflict detection.

use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    sync::Mutex,
};

use chrono::Utc;

use crate::{
    errors::{Error, Result, ValidationError},
    ids::{PlatformId, SlotId, WorkflowId},
    preview::{
        model::{NodeOutputRef, PreviewConfig, PreviewContext, SlotAssignment},
        schema::{self, DEFAULT_TONE},
        templates::{self, PlatformTemplate},
    },
    types::PreviewDraft,
};

/// Persistent string key/value storage (the browser's localStorage equivalent).
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
}

/// In-memory storage, mainly for tests and ephemeral sessions.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.remove(key);
        Ok(())
    }
}

/// One JSON file per key under a directory.
///
/// File names keep `[A-Za-z0-9_-]` and percent-encode every other byte of the
/// key, so distinct keys never share a file.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .map_err(|err| Error::Storage(format!("create {}: {err}", dir.display())))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let mut name = String::with_capacity(key.len());
        for byte in key.bytes() {
            if byte.is_ascii_alphanumeric() || byte == b'_' || byte == b'-' {
                name.push(byte as char);
            } else {
                name.push_str(&format!("%{byte:02X}"));
            }
        }
        self.dir.join(format!("{name}.json"))
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let path = self.path_for(key);
        match fs::read_to_string(&path) {
            Ok(raw) => Ok(Some(raw)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(Error::Storage(format!("read {}: {err}", path.display()))),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, value)
            .and_then(|_| fs::rename(&tmp, &path))
            .map_err(|err| Error::Storage(format!("write {}: {err}", path.display())))
    }

    fn remove(&self, key: &str) -> Result<()> {
        let path = self.path_for(key);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(Error::Storage(format!("remove {}: {err}", path.display()))),
        }
    }
}

impl<T: KeyValueStore + ?Sized> KeyValueStore for std::sync::Arc<T> {
    fn get(&self, key: &str) -> Result<Option<String>> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        (**self).set(key, value)
    }

    fn remove(&self, key: &str) -> Result<()> {
        (**self).remove(key)
    }
}

pub fn storage_key(workflow_id: &WorkflowId, context: &PreviewContext) -> String {
    format!("preview_config_{}_{}", workflow_id, context.context_id())
}

/// Key used before configs were scoped by context.
pub fn legacy_storage_key(workflow_id: &WorkflowId) -> String {
    format!("preview_config_{workflow_id}")
}

/// Fresh config with one empty assignment per template slot.
pub fn default_config(workflow_id: &WorkflowId, template: &PlatformTemplate) -> PreviewConfig {
    PreviewConfig {
        workflow_id: workflow_id.clone(),
        platform_id: template.platform_id.clone(),
        assignments: template
            .slots
            .iter()
            .map(|slot| SlotAssignment::empty(slot.slot_id.clone()))
            .collect(),
        tone: DEFAULT_TONE.to_string(),
        updated_at: Utc::now(),
    }
}

#[derive(Debug)]
struct Loaded {
    key: String,
    config: PreviewConfig,
    /// Draft overrides live in memory only.
    persist: bool,
}

/// Owner of the active preview config.
pub struct PreviewStore<S> {
    storage: S,
    loaded: Option<Loaded>,
}

impl<S: KeyValueStore> PreviewStore<S> {
    pub fn new(storage: S) -> Self {
        Self {
            storage,
            loaded: None,
        }
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn config(&self) -> Option<&PreviewConfig> {
        self.loaded.as_ref().map(|l| &l.config)
    }

    /// Load (or create) the config for a workflow/context pair and make it active.
    ///
    /// A stored document that cannot be decoded is logged and replaced by the
    /// legacy or default config, so a corrupt entry never blocks the preview.
    pub fn load(&mut self, workflow_id: &WorkflowId, context: &PreviewContext) -> Result<&PreviewConfig> {
        if workflow_id.is_empty() {
            return Err(ValidationError::new("workflow id is required")
                .with_field("workflow_id")
                .into());
        }
        let key = storage_key(workflow_id, context);
        let config = self.read_or_create(workflow_id, context, &key)?;
        let loaded = self.loaded.insert(Loaded {
            key,
            config,
            persist: true,
        });
        Ok(&loaded.config)
    }

    fn read_or_create(
        &self,
        workflow_id: &WorkflowId,
        context: &PreviewContext,
        key: &str,
    ) -> Result<PreviewConfig> {
        if let Some(raw) = self.storage.get(key)? {
            match schema::upgrade(&raw) {
                Ok(upgraded) => {
                    if upgraded.was_migrated() {
                        #[cfg(feature = "tracing")]
                        tracing::info!(key, from = upgraded.from_version, "upgraded stored preview config");
                        self.storage.set(key, &schema::encode(&upgraded.config)?)?;
                    }
                    return Ok(upgraded.config);
                }
                Err(_err) => {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(key, error = %_err, "discarding unreadable preview config");
                }
            }
        }

        if *context == PreviewContext::Live {
            let legacy_key = legacy_storage_key(workflow_id);
            if let Some(raw) = self.storage.get(&legacy_key)? {
                match schema::upgrade(&raw) {
                    Ok(upgraded) => {
                        #[cfg(feature = "tracing")]
                        tracing::info!(key, "migrated un-scoped preview config");
                        self.storage.set(key, &schema::encode(&upgraded.config)?)?;
                        return Ok(upgraded.config);
                    }
                    Err(_err) => {
                        #[cfg(feature = "tracing")]
                        tracing::warn!(key = %legacy_key, error = %_err, "ignoring unreadable un-scoped preview config");
                    }
                }
            }
        }

        let config = default_config(workflow_id, &templates::default_template());
        self.storage.set(key, &schema::encode(&config)?)?;
        Ok(config)
    }

    fn active_mut(&mut self) -> Result<&mut Loaded> {
        self.loaded
            .as_mut()
            .ok_or_else(|| ValidationError::new("no preview config loaded").into())
    }

    fn commit(&mut self) -> Result<()> {
        let loaded = self.active_mut()?;
        loaded.config.updated_at = Utc::now();
        if !loaded.persist {
            return Ok(());
        }
        let encoded = schema::encode(&loaded.config)?;
        let key = loaded.key.clone();
        self.storage.set(&key, &encoded)
    }

    /// Replace a slot's sources wholesale. Every assignment path ends here.
    pub fn assign_slot(&mut self, slot_id: &SlotId, sources: Vec<NodeOutputRef>) -> Result<()> {
        let loaded = self.active_mut()?;
        match loaded
            .config
            .assignments
            .iter_mut()
            .find(|a| &a.slot_id == slot_id)
        {
            Some(assignment) => assignment.sources = sources,
            None => loaded.config.assignments.push(SlotAssignment {
                slot_id: slot_id.clone(),
                sources,
            }),
        }
        self.commit()
    }

    pub fn clear_slot(&mut self, slot_id: &SlotId) -> Result<()> {
        self.assign_slot(slot_id, Vec::new())
    }

    /// Switch platform; sources survive for slot ids both templates share.
    pub fn set_platform(&mut self, platform_id: &PlatformId) -> Result<()> {
        let template = templates::by_id(platform_id).ok_or_else(|| {
            ValidationError::new(format!("unknown platform {platform_id}")).with_field("platform_id")
        })?;
        let loaded = self.active_mut()?;
        let mut previous: HashMap<SlotId, Vec<NodeOutputRef>> = loaded
            .config
            .assignments
            .drain(..)
            .map(|a| (a.slot_id, a.sources))
            .collect();
        loaded.config.assignments = template
            .slots
            .iter()
            .map(|slot| SlotAssignment {
                slot_id: slot.slot_id.clone(),
                sources: previous.remove(&slot.slot_id).unwrap_or_default(),
            })
            .collect();
        loaded.config.platform_id = template.platform_id;
        self.commit()
    }

    pub fn set_tone(&mut self, tone: impl Into<String>) -> Result<()> {
        let loaded = self.active_mut()?;
        loaded.config.tone = tone.into();
        self.commit()
    }

    /// Apply a draft's platform and tone without touching storage.
    ///
    /// Stays in effect (and keeps later mutations in memory) until the next `load`.
    pub fn set_config_from_draft(&mut self, draft: &PreviewDraft) -> Result<()> {
        let loaded = self.active_mut()?;
        loaded.persist = false;
        loaded.config.platform_id = draft.platform_id.clone();
        if let Some(tone) = &draft.tone {
            loaded.config.tone = tone.clone();
        }
        loaded.config.updated_at = Utc::now();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    fn wf() -> WorkflowId {
        "wf1".into()
    }

    fn source(node: &str) -> NodeOutputRef {
        NodeOutputRef::new(node, "TextGeneration", "text")
    }

    #[test]
    fn loading_twice_yields_identical_configs() {
        let mut store = PreviewStore::new(MemoryStore::new());
        let first = store.load(&wf(), &PreviewContext::Live).unwrap().clone();
        let second = store.load(&wf(), &PreviewContext::Live).unwrap().clone();
        assert_eq!(first, second);
    }

    #[test]
    fn default_config_has_one_empty_assignment_per_slot() {
        let mut store = PreviewStore::new(MemoryStore::new());
        let cfg = store.load(&wf(), &PreviewContext::Live).unwrap();
        assert_eq!(cfg.assignments.len(), 3);
        assert!(cfg.assignments.iter().all(|a| a.sources.is_empty()));
        assert_eq!(cfg.tone, DEFAULT_TONE);
    }

    #[test]
    fn assignment_persists_across_store_instances() {
        let storage = Arc::new(MemoryStore::new());
        let mut store = PreviewStore::new(storage.clone());
        store.load(&wf(), &PreviewContext::Live).unwrap();
        store.assign_slot(&"body".into(), vec![source("a"), source("b")]).unwrap();

        let mut reopened = PreviewStore::new(storage);
        let cfg = reopened.load(&wf(), &PreviewContext::Live).unwrap();
        assert_eq!(cfg.assignment(&"body".into()).unwrap().sources.len(), 2);
    }

    #[test]
    fn contexts_are_isolated() {
        let storage = Arc::new(MemoryStore::new());
        let mut store = PreviewStore::new(storage.clone());
        store.load(&wf(), &PreviewContext::Run("e1".into())).unwrap();
        store.assign_slot(&"body".into(), vec![source("a")]).unwrap();

        let cfg = store.load(&wf(), &PreviewContext::Live).unwrap();
        assert!(cfg.assignment(&"body".into()).unwrap().sources.is_empty());
        assert!(storage.get("preview_config_wf1_run_e1").unwrap().is_some());
    }

    #[test]
    fn legacy_key_is_migrated_once() {
        let storage = Arc::new(MemoryStore::new());
        storage
            .set(
                "preview_config_wf1",
                &json!({
                    "workflowId": "wf1",
                    "platformId": "linkedin",
                    "assignments": [{ "slotId": "body", "source": { "nodeId": "x", "nodeType": "TextGeneration", "outputKey": "text" } }]
                })
                .to_string(),
            )
            .unwrap();

        let mut store = PreviewStore::new(storage.clone());
        let cfg = store.load(&wf(), &PreviewContext::Live).unwrap();
        assert_eq!(cfg.assignments[0].sources, vec![NodeOutputRef::new("x", "TextGeneration", "text")]);

        let raw = storage.get("preview_config_wf1_live").unwrap().unwrap();
        assert!(raw.contains("\"schemaVersion\":1"));

        let mut store = PreviewStore::new(storage);
        let run_cfg = store.load(&wf(), &PreviewContext::Run("e2".into())).unwrap();
        assert!(run_cfg.assignments.iter().all(|a| a.sources.is_empty()));
    }

    #[test]
    fn mutations_stamp_updated_at() {
        let mut store = PreviewStore::new(MemoryStore::new());
        let before = store.load(&wf(), &PreviewContext::Live).unwrap().updated_at;
        std::thread::sleep(std::time::Duration::from_millis(2));
        store.set_tone("bold").unwrap();
        let cfg = store.config().unwrap();
        assert_eq!(cfg.tone, "bold");
        assert!(cfg.updated_at > before);
    }

    #[test]
    fn clear_slot_empties_sources() {
        let mut store = PreviewStore::new(MemoryStore::new());
        store.load(&wf(), &PreviewContext::Live).unwrap();
        store.assign_slot(&"headline".into(), vec![source("a")]).unwrap();
        store.clear_slot(&"headline".into()).unwrap();
        assert!(store.config().unwrap().assignment(&"headline".into()).unwrap().sources.is_empty());
    }

    #[test]
    fn unknown_platform_is_rejected() {
        let mut store = PreviewStore::new(MemoryStore::new());
        store.load(&wf(), &PreviewContext::Live).unwrap();
        let err = store.set_platform(&"friendster".into()).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn set_platform_keeps_shared_slots() {
        let mut store = PreviewStore::new(MemoryStore::new());
        store.load(&wf(), &PreviewContext::Live).unwrap();
        store.assign_slot(&"body".into(), vec![source("a")]).unwrap();
        store.assign_slot(&"legacy_slot".into(), vec![source("b")]).unwrap();
        store.set_platform(&"linkedin".into()).unwrap();
        let cfg = store.config().unwrap();
        assert_eq!(cfg.assignments.len(), 3);
        assert_eq!(cfg.assignment(&"body".into()).unwrap().sources.len(), 1);
        assert!(cfg.assignment(&"legacy_slot".into()).is_none());
    }

    #[test]
    fn draft_override_does_not_write_back() {
        let storage = Arc::new(MemoryStore::new());
        let mut store = PreviewStore::new(storage.clone());
        store.load(&wf(), &PreviewContext::Live).unwrap();
        let stored_before = storage.get("preview_config_wf1_live").unwrap();

        let draft: PreviewDraft = serde_json::from_value(json!({
            "id": "d1",
            "workflow_id": "wf1",
            "name": "Launch",
            "platform_id": "linkedin",
            "tone": "playful",
            "slot_content": { "body": "Hi" }
        }))
        .unwrap();
        store.set_config_from_draft(&draft).unwrap();
        store.set_tone("witty").unwrap();

        assert_eq!(store.config().unwrap().tone, "witty");
        assert_eq!(storage.get("preview_config_wf1_live").unwrap(), stored_before);
    }

    #[test]
    fn mutation_without_load_fails() {
        let mut store = PreviewStore::new(MemoryStore::new());
        assert!(store.set_tone("x").is_err());
    }

    #[test]
    fn file_store_round_trips_and_encodes_keys() {
        let dir = tempfile::tempdir().unwrap();
        let files = FileStore::new(dir.path()).unwrap();
        files.set("preview_config_a/b_live", "{}").unwrap();
        assert_eq!(files.get("preview_config_a/b_live").unwrap().as_deref(), Some("{}"));
        assert!(dir.path().join("preview_config_a%2Fb_live.json").exists());
        files.remove("preview_config_a/b_live").unwrap();
        assert!(files.get("preview_config_a/b_live").unwrap().is_none());
        files.remove("never-written").unwrap();
    }

    #[test]
    fn file_store_keeps_similar_keys_apart() {
        let dir = tempfile::tempdir().unwrap();
        let files = FileStore::new(dir.path()).unwrap();
        files.set("a/b", "slash").unwrap();
        files.set("a_b", "underscore").unwrap();
        files.set("a%2Fb", "percent").unwrap();
        assert_eq!(files.get("a/b").unwrap().as_deref(), Some("slash"));
        assert_eq!(files.get("a_b").unwrap().as_deref(), Some("underscore"));
        assert_eq!(files.get("a%2Fb").unwrap().as_deref(), Some("percent"));
    }

    #[test]
    fn unreadable_config_falls_back_to_default() {
        let storage = Arc::new(MemoryStore::new());
        storage.set("preview_config_wf1_live", "{not json").unwrap();

        let mut store = PreviewStore::new(storage.clone());
        let cfg = store.load(&wf(), &PreviewContext::Live).unwrap().clone();
        assert_eq!(cfg.assignments.len(), 3);
        assert!(cfg.assignments.iter().all(|a| a.sources.is_empty()));

        let raw = storage.get("preview_config_wf1_live").unwrap().unwrap();
        assert!(raw.contains("\"schemaVersion\":1"));
        let again = store.load(&wf(), &PreviewContext::Live).unwrap();
        assert_eq!(again, &cfg);
    }

    #[test]
    fn unreadable_legacy_config_is_ignored() {
        let storage = Arc::new(MemoryStore::new());
        storage.set("preview_config_wf1", "[1, 2").unwrap();

        let mut store = PreviewStore::new(storage.clone());
        let cfg = store.load(&wf(), &PreviewContext::Live).unwrap();
        assert!(cfg.assignments.iter().all(|a| a.sources.is_empty()));
        assert!(storage.get("preview_config_wf1_live").unwrap().is_some());
    }
}
