//! Headless post-mockup model.
//!
//! [`render_mockup`] turns resolved slots into [`SlotView`]s a UI can draw
//! directly. Drag-and-drop and click assignment both funnel through
//! [`assign_output`], which is the only place a mockup interaction mutates the
//! [`PreviewStore`].

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;

use crate::{
    errors::Result,
    ids::SlotId,
    preview::{
        collector::{OutputEntry, OutputGroup},
        model::{NodeOutputRef, SlotAssignment, TemplateSlot},
        resolver::{ResolvedSlot, ResolvedValue},
        store::{KeyValueStore, PreviewStore},
        templates::PlatformTemplate,
    },
    registry::SlotContentType,
};

/// JSON fields checked, in order, when a text value is a serialized object.
const JSON_TEXT_FIELDS: [&str; 5] = ["text", "content", "quote", "body", "message"];

/// Distance kept between a popover and the viewport edges.
pub const POPOVER_MARGIN: f64 = 8.0;
/// Gap between the anchor slot and its popover.
pub const POPOVER_GAP: f64 = 4.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RenderMode {
    /// Assigned outputs, click-to-assign enabled.
    #[default]
    Live,
    /// Saved draft text, edited inline.
    Draft,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "text", rename_all = "snake_case")]
pub enum TextBlock {
    Paragraph(String),
    Quote(String),
}

/// Text split into paragraphs and quote blocks.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct RichText {
    pub blocks: Vec<TextBlock>,
}

impl RichText {
    pub fn parse(raw: &str) -> Self {
        let text = extract_json_text(raw).unwrap_or_else(|| raw.to_string());
        let text = normalize_newlines(&text);
        let blocks = text
            .split("\n\n")
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(classify_paragraph)
            .collect();
        Self { blocks }
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Plain text with quote markers dropped.
    pub fn plain_text(&self) -> String {
        self.blocks
            .iter()
            .map(|block| match block {
                TextBlock::Paragraph(text) | TextBlock::Quote(text) => text.as_str(),
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

/// Replace escaped `\n` sequences (as emitted by some LLM nodes) with real newlines.
pub fn normalize_newlines(text: &str) -> String {
    text.replace("\\r\\n", "\n").replace("\\n", "\n").replace("\r\n", "\n")
}

/// Text carried by a serialized JSON object, if `text` is one.
pub fn extract_json_text(text: &str) -> Option<String> {
    let trimmed = text.trim();
    if !trimmed.starts_with('{') {
        return None;
    }
    let value: Value = serde_json::from_str(trimmed).ok()?;
    let object = value.as_object()?;
    JSON_TEXT_FIELDS
        .iter()
        .find_map(|field| object.get(*field).and_then(Value::as_str))
        .map(str::to_string)
}

fn classify_paragraph(paragraph: &str) -> TextBlock {
    if paragraph.lines().all(|line| line.trim_start().starts_with('>')) {
        let inner = paragraph
            .lines()
            .map(|line| line.trim_start().trim_start_matches('>').trim())
            .collect::<Vec<_>>()
            .join("\n");
        return TextBlock::Quote(inner);
    }
    for (open, close) in [('"', '"'), ('\u{201c}', '\u{201d}')] {
        if paragraph.chars().count() >= 2
            && paragraph.starts_with(open)
            && paragraph.ends_with(close)
        {
            let inner: String = paragraph
                .chars()
                .skip(1)
                .take(paragraph.chars().count() - 2)
                .collect();
            return TextBlock::Quote(inner.trim().to_string());
        }
    }
    TextBlock::Paragraph(paragraph.to_string())
}

/// Truncate to at most `max` characters (not bytes).
pub fn enforce_max_chars(text: &str, max: Option<usize>) -> String {
    match max {
        Some(max) if text.chars().count() > max => text.chars().take(max).collect(),
        _ => text.to_string(),
    }
}

/// Inline editor content of one slot in draft mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EditorState {
    pub text: String,
    pub max_chars: Option<usize>,
}

impl EditorState {
    pub fn new(text: &str, max_chars: Option<usize>) -> Self {
        Self {
            text: enforce_max_chars(text, max_chars),
            max_chars,
        }
    }

    pub fn char_count(&self) -> usize {
        self.text.chars().count()
    }

    /// Apply user input; anything past the limit is dropped.
    pub fn edit(&mut self, text: &str) {
        self.text = enforce_max_chars(text, self.max_chars);
    }

    pub fn remaining(&self) -> Option<usize> {
        self.max_chars.map(|max| max.saturating_sub(self.char_count()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SlotBody {
    Empty,
    /// An assigned source vanished; the workflow must be re-run.
    Stale,
    Media { url: String, media: SlotContentType },
    RichText(RichText),
    Json { json: Value },
    Editor(EditorState),
}

/// Everything needed to draw one slot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SlotView {
    pub slot_id: SlotId,
    pub label: String,
    pub required: bool,
    pub body: SlotBody,
    /// Opens the assignment popover on click.
    pub clickable: bool,
    /// Accepts drops (stale slots included).
    pub drop_target: bool,
}

/// Build slot views in template order.
///
/// `draft_content` holds saved draft text per slot and is only read in
/// [`RenderMode::Draft`].
pub fn render_mockup(
    template: &PlatformTemplate,
    resolved: &[(SlotId, ResolvedSlot)],
    mode: RenderMode,
    draft_content: Option<&BTreeMap<SlotId, String>>,
) -> Vec<SlotView> {
    let by_slot: BTreeMap<&SlotId, &ResolvedSlot> =
        resolved.iter().map(|(id, slot)| (id, slot)).collect();

    template
        .slots
        .iter()
        .map(|slot| {
            let resolved = by_slot.get(&slot.slot_id).copied();
            let stale = resolved.is_some_and(|r| r.stale);
            let body = match mode {
                RenderMode::Draft if slot.is_text() => {
                    let saved = draft_content.and_then(|c| c.get(&slot.slot_id));
                    let fallback = resolved
                        .and_then(|r| r.value.as_ref())
                        .and_then(ResolvedValue::as_text)
                        .map(normalize_newlines);
                    let text = saved.cloned().or(fallback).unwrap_or_default();
                    SlotBody::Editor(EditorState::new(&text, slot.max_chars))
                }
                _ => live_body(resolved),
            };
            SlotView {
                slot_id: slot.slot_id.clone(),
                label: slot.label.clone(),
                required: slot.required,
                clickable: mode == RenderMode::Live && !stale,
                drop_target: mode == RenderMode::Live,
                body,
            }
        })
        .collect()
}

fn live_body(resolved: Option<&ResolvedSlot>) -> SlotBody {
    let Some(resolved) = resolved else {
        return SlotBody::Empty;
    };
    if resolved.stale {
        return SlotBody::Stale;
    }
    match &resolved.value {
        None => SlotBody::Empty,
        Some(ResolvedValue::Media { url, kind }) => SlotBody::Media {
            url: url.clone(),
            media: *kind,
        },
        Some(ResolvedValue::Text(text)) => SlotBody::RichText(RichText::parse(text)),
        Some(ResolvedValue::Json(json)) => SlotBody::Json { json: json.clone() },
    }
}

pub fn accepts_drop(slot: &TemplateSlot, entry: &OutputEntry) -> bool {
    slot.accepts(entry.content_type)
}

/// Assign an output to a slot.
///
/// Text slots collect sources (a repeated source is ignored); media slots
/// replace theirs. Returns `false` without touching the store when the slot
/// does not accept the output's content type.
pub fn assign_output<S: KeyValueStore>(
    store: &mut PreviewStore<S>,
    slot: &TemplateSlot,
    entry: &OutputEntry,
) -> Result<bool> {
    if !accepts_drop(slot, entry) {
        return Ok(false);
    }
    let mut sources = if slot.is_text() {
        store
            .config()
            .and_then(|c| c.assignment(&slot.slot_id))
            .map(|a| a.sources.clone())
            .unwrap_or_default()
    } else {
        Vec::new()
    };
    if !sources.contains(&entry.reference) {
        sources.push(entry.reference.clone());
    }
    store.assign_slot(&slot.slot_id, sources)?;
    Ok(true)
}

/// Drop handler for a slot.
pub fn handle_drop<S: KeyValueStore>(
    store: &mut PreviewStore<S>,
    slot: &TemplateSlot,
    entry: &OutputEntry,
) -> Result<bool> {
    assign_output(store, slot, entry)
}

/// Popover selection handler; incompatible items are informational and rejected.
pub fn handle_click_assign<S: KeyValueStore>(
    store: &mut PreviewStore<S>,
    slot: &TemplateSlot,
    entry: &OutputEntry,
) -> Result<bool> {
    assign_output(store, slot, entry)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MenuItem {
    pub reference: NodeOutputRef,
    pub label: String,
    /// Label of the node the output belongs to.
    pub group: String,
    pub content_type: SlotContentType,
    pub assigned: bool,
}

/// Outputs offered for a slot, compatible ones first.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct AssignmentMenu {
    pub compatible: Vec<MenuItem>,
    /// Shown greyed out; never assignable.
    pub incompatible: Vec<MenuItem>,
}

impl AssignmentMenu {
    pub fn is_empty(&self) -> bool {
        self.compatible.is_empty() && self.incompatible.is_empty()
    }
}

pub fn assignment_menu(
    slot: &TemplateSlot,
    groups: &[OutputGroup],
    current: Option<&SlotAssignment>,
) -> AssignmentMenu {
    let mut menu = AssignmentMenu::default();
    for group in groups {
        for entry in &group.outputs {
            let item = MenuItem {
                reference: entry.reference.clone(),
                label: entry.reference.label.clone(),
                group: group.label.clone(),
                content_type: entry.content_type,
                assigned: current.is_some_and(|a| a.sources.contains(&entry.reference)),
            };
            if slot.accepts(entry.content_type) {
                menu.compatible.push(item);
            } else {
                menu.incompatible.push(item);
            }
        }
    }
    menu
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Size {
    pub width: f64,
    pub height: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PopoverSide {
    Below,
    Above,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PopoverPlacement {
    pub x: f64,
    pub y: f64,
    pub side: PopoverSide,
}

/// Position a popover under `anchor`, flipping above when it would overflow
/// the bottom edge, and clamp it into the viewport.
pub fn place_popover(anchor: Rect, popover: Size, viewport: Size) -> PopoverPlacement {
    let max_x = (viewport.width - popover.width - POPOVER_MARGIN).max(POPOVER_MARGIN);
    let x = anchor.x.clamp(POPOVER_MARGIN, max_x);

    let below = anchor.y + anchor.height + POPOVER_GAP;
    let above = anchor.y - POPOVER_GAP - popover.height;
    let fits_below = below + popover.height <= viewport.height - POPOVER_MARGIN;
    let fits_above = above >= POPOVER_MARGIN;

    let (y, side) = if fits_below || !fits_above {
        (below, PopoverSide::Below)
    } else {
        (above, PopoverSide::Above)
    };
    let max_y = (viewport.height - popover.height - POPOVER_MARGIN).max(POPOVER_MARGIN);
    PopoverPlacement {
        x,
        y: y.clamp(POPOVER_MARGIN, max_y),
        side,
    }
}
