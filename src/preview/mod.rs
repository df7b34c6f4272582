//! Preview pipeline: collect node outputs, persist slot assignments, resolve
//! them and build the post mockup.

pub mod autosave;
pub mod collector;
pub mod mockup;
pub mod model;
pub mod resolver;
pub mod schema;
pub mod store;
pub mod templates;

pub use autosave::{DraftAutosaver, DraftSink, SaveIndicator, AUTOSAVE_DEBOUNCE, INDICATOR_FADE};
pub use collector::{
    collect_outputs, image_bucket_from_nodes, EnrichedMatch, ImageBucketEntry, OutputEntry,
    OutputGroup, OutputIndex, OutputValue, Quote,
};
pub use mockup::{
    accepts_drop, assignment_menu, enforce_max_chars, handle_click_assign, handle_drop,
    place_popover, render_mockup, AssignmentMenu, EditorState, PopoverPlacement, RenderMode,
    RichText, SlotBody, SlotView,
};
pub use model::{
    NodeOutputRef, NodeStateMap, PreviewConfig, PreviewContext, PreviewNodeState, SlotAssignment,
    TemplateSlot,
};
pub use resolver::{resolve_all, resolve_slot, ResolvedSlot, ResolvedValue};
pub use store::{FileStore, KeyValueStore, MemoryStore, PreviewStore};
pub use templates::PlatformTemplate;
