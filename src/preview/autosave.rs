//! Debounced autosave of draft slot text.
//!
//! Every edit bumps a generation counter and schedules a save after a quiet
//! period; only the task whose generation is still current when the timer
//! fires performs the save, and it always sends the latest content held in
//! shared state. Requires a running tokio runtime.

use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use tokio::sync::watch;

use crate::{
    errors::Result,
    ids::{DraftId, SlotId},
    BoxFuture,
};

/// Quiet period after the last edit before a save is sent.
pub const AUTOSAVE_DEBOUNCE: Duration = Duration::from_millis(800);
/// How long the "Autosaved" indicator stays visible.
pub const INDICATOR_FADE: Duration = Duration::from_millis(2500);

/// Destination for draft slot content.
pub trait DraftSink: Send + Sync + 'static {
    fn save_slot_content<'a>(
        &'a self,
        draft_id: &'a DraftId,
        slot_content: BTreeMap<SlotId, String>,
    ) -> BoxFuture<'a, Result<()>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SaveIndicator {
    #[default]
    Idle,
    Saving,
    Autosaved,
}

#[derive(Debug, Default)]
struct AutosaveState {
    content: BTreeMap<SlotId, String>,
    generation: u64,
    saved_generation: u64,
    /// Bumped on every indicator change so stale fade timers do nothing.
    indicator_epoch: u64,
    last_error: Option<String>,
}

struct AutosaveInner<K> {
    draft_id: DraftId,
    sink: Arc<K>,
    debounce: Duration,
    fade: Duration,
    state: Mutex<AutosaveState>,
    save_lock: tokio::sync::Mutex<()>,
    indicator: watch::Sender<SaveIndicator>,
}

/// Autosaver bound to one draft.
pub struct DraftAutosaver<K> {
    inner: Arc<AutosaveInner<K>>,
}

impl<K> Clone for DraftAutosaver<K> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<K: DraftSink> DraftAutosaver<K> {
    pub fn new(draft_id: DraftId, initial: BTreeMap<SlotId, String>, sink: Arc<K>) -> Self {
        Self::with_timing(draft_id, initial, sink, AUTOSAVE_DEBOUNCE, INDICATOR_FADE)
    }

    pub fn with_timing(
        draft_id: DraftId,
        initial: BTreeMap<SlotId, String>,
        sink: Arc<K>,
        debounce: Duration,
        fade: Duration,
    ) -> Self {
        let (indicator, _) = watch::channel(SaveIndicator::Idle);
        Self {
            inner: Arc::new(AutosaveInner {
                draft_id,
                sink,
                debounce,
                fade,
                state: Mutex::new(AutosaveState {
                    content: initial,
                    ..AutosaveState::default()
                }),
                save_lock: tokio::sync::Mutex::new(()),
                indicator,
            }),
        }
    }

    pub fn draft_id(&self) -> &DraftId {
        &self.inner.draft_id
    }

    pub fn content(&self) -> BTreeMap<SlotId, String> {
        self.inner.lock().content.clone()
    }

    pub fn indicator(&self) -> SaveIndicator {
        *self.inner.indicator.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<SaveIndicator> {
        self.inner.indicator.subscribe()
    }

    /// Message of the most recent failed save, cleared by the next success.
    pub fn last_error(&self) -> Option<String> {
        self.inner.lock().last_error.clone()
    }

    pub fn is_dirty(&self) -> bool {
        let state = self.inner.lock();
        state.generation > state.saved_generation
    }

    /// Record new text for a slot and (re)start the debounce timer.
    pub fn edit(&self, slot_id: impl Into<SlotId>, text: impl Into<String>) {
        let generation = {
            let mut state = self.inner.lock();
            state.content.insert(slot_id.into(), text.into());
            state.generation += 1;
            state.generation
        };
        let inner = self.inner.clone();
        tokio::spawn(async move {
            tokio::time::sleep(inner.debounce).await;
            if inner.lock().generation != generation {
                return;
            }
            if let Err(_err) = inner.save().await {
                #[cfg(feature = "tracing")]
                tracing::warn!(draft_id = %inner.draft_id, error = %_err, "draft autosave failed");
            }
        });
    }

    /// Save pending edits now, bypassing the debounce.
    pub async fn flush(&self) -> Result<()> {
        self.inner.save().await
    }
}

impl<K: DraftSink> AutosaveInner<K> {
    fn lock(&self) -> MutexGuard<'_, AutosaveState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_indicator(&self, value: SaveIndicator) -> u64 {
        let epoch = {
            let mut state = self.lock();
            state.indicator_epoch += 1;
            state.indicator_epoch
        };
        self.indicator.send_replace(value);
        epoch
    }

    async fn save(self: &Arc<Self>) -> Result<()> {
        let _guard = self.save_lock.lock().await;
        let (content, generation) = {
            let state = self.lock();
            if state.generation <= state.saved_generation {
                return Ok(());
            }
            (state.content.clone(), state.generation)
        };

        self.set_indicator(SaveIndicator::Saving);
        match self.sink.save_slot_content(&self.draft_id, content).await {
            Ok(()) => {
                {
                    let mut state = self.lock();
                    state.saved_generation = state.saved_generation.max(generation);
                    state.last_error = None;
                }
                let epoch = self.set_indicator(SaveIndicator::Autosaved);
                let inner = self.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(inner.fade).await;
                    if inner.lock().indicator_epoch == epoch {
                        inner.set_indicator(SaveIndicator::Idle);
                    }
                });
                Ok(())
            }
            Err(err) => {
                self.lock().last_error = Some(err.to_string());
                self.set_indicator(SaveIndicator::Idle);
                Err(err)
            }
        }
    }
}
