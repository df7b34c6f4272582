//! Resolves slot assignments against the current output collection.

use crate::{
    ids::SlotId,
    preview::{
        collector::{OutputGroup, OutputIndex, OutputValue},
        model::{PreviewConfig, SlotAssignment, TemplateSlot},
        templates::PlatformTemplate,
    },
    registry::SlotContentType,
};

/// Separator between concatenated text sources.
pub const TEXT_SOURCE_SEPARATOR: &str = "\n\n";

/// Concrete value ready for rendering.
#[derive(Debug, Clone, PartialEq)]
pub enum ResolvedValue {
    Text(String),
    Media { url: String, kind: SlotContentType },
    Json(serde_json::Value),
}

impl ResolvedValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            ResolvedValue::Text(text) => Some(text),
            _ => None,
        }
    }
}

/// Resolution outcome of one slot.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ResolvedSlot {
    pub value: Option<ResolvedValue>,
    /// At least one assigned source no longer exists in the output collection.
    /// Placeholder elements count as existing.
    pub stale: bool,
}

/// Resolve one assignment.
///
/// Text slots join every resolved source with a blank line; single-value
/// slots (media) take the first source that resolves.
pub fn resolve_slot(
    assignment: &SlotAssignment,
    slot: &TemplateSlot,
    index: &OutputIndex<'_>,
) -> ResolvedSlot {
    if assignment.sources.is_empty() {
        return ResolvedSlot::default();
    }

    let mut stale = false;
    let mut values: Vec<&OutputValue> = Vec::with_capacity(assignment.sources.len());
    for source in &assignment.sources {
        match index.get(source) {
            Some(entry) => values.push(&entry.value),
            None if index.is_placeholder(source) => {}
            None => stale = true,
        }
    }

    let value = if slot.is_text() {
        let parts: Vec<String> = values
            .iter()
            .map(|v| v.as_text())
            .filter(|t| !t.trim().is_empty())
            .collect();
        (!parts.is_empty()).then(|| ResolvedValue::Text(parts.join(TEXT_SOURCE_SEPARATOR)))
    } else {
        values.first().map(|v| single_value(v, slot))
    };

    ResolvedSlot { value, stale }
}

fn single_value(value: &OutputValue, slot: &TemplateSlot) -> ResolvedValue {
    match value {
        OutputValue::MediaRef { url, media } => ResolvedValue::Media {
            url: url.clone(),
            kind: *media,
        },
        OutputValue::MatchResult(m) => ResolvedValue::Media {
            url: m.image_url.clone(),
            kind: SlotContentType::Image,
        },
        OutputValue::Opaque { json } if slot.accepts(SlotContentType::Json) => {
            ResolvedValue::Json(json.clone())
        }
        other => ResolvedValue::Text(other.as_text()),
    }
}

/// Resolve every slot of a template against the given config and outputs.
///
/// Slots without an assignment in the config resolve to empty.
pub fn resolve_all(
    config: &PreviewConfig,
    template: &PlatformTemplate,
    groups: &[OutputGroup],
) -> Vec<(SlotId, ResolvedSlot)> {
    let index = OutputIndex::new(groups);
    template
        .slots
        .iter()
        .map(|slot| {
            let resolved = config
                .assignment(&slot.slot_id)
                .map(|assignment| resolve_slot(assignment, slot, &index))
                .unwrap_or_default();
            (slot.slot_id.clone(), resolved)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preview::{
        collector::collect_outputs,
        model::{NodeOutputRef, NodeStateMap, PreviewNodeState},
        templates,
    };
    use serde_json::json;

    fn nodes(list: Vec<PreviewNodeState>) -> NodeStateMap {
        list.into_iter().map(|n| (n.id.clone(), n)).collect()
    }

    fn text_node(id: &str, text: &str) -> PreviewNodeState {
        PreviewNodeState::completed(
            id,
            "TextGeneration",
            json!({ "text": text }).as_object().cloned().unwrap(),
        )
    }

    fn body_slot() -> TemplateSlot {
        templates::linkedin().slot(&"body".into()).cloned().unwrap()
    }

    fn image_slot() -> TemplateSlot {
        templates::linkedin().slot(&"image".into()).cloned().unwrap()
    }

    #[test]
    fn empty_assignment_is_null_and_fresh() {
        let groups = collect_outputs(&nodes(vec![]), &[]);
        let resolved = resolve_slot(&SlotAssignment::empty("body"), &body_slot(), &OutputIndex::new(&groups));
        assert_eq!(resolved, ResolvedSlot { value: None, stale: false });
    }

    #[test]
    fn removing_source_node_marks_stale_and_re_adding_restores() {
        let assignment = SlotAssignment {
            slot_id: "body".into(),
            sources: vec![NodeOutputRef::new("A", "TextGeneration", "text")],
        };

        let present = collect_outputs(&nodes(vec![text_node("A", "hello")]), &[]);
        let resolved = resolve_slot(&assignment, &body_slot(), &OutputIndex::new(&present));
        assert!(!resolved.stale);
        assert_eq!(resolved.value, Some(ResolvedValue::Text("hello".into())));

        let removed = collect_outputs(&nodes(vec![]), &[]);
        let resolved = resolve_slot(&assignment, &body_slot(), &OutputIndex::new(&removed));
        assert_eq!(resolved, ResolvedSlot { value: None, stale: true });

        let restored = collect_outputs(&nodes(vec![text_node("A", "hello again")]), &[]);
        let resolved = resolve_slot(&assignment, &body_slot(), &OutputIndex::new(&restored));
        assert!(!resolved.stale);
    }

    #[test]
    fn text_sources_join_with_blank_line() {
        let groups = collect_outputs(&nodes(vec![text_node("A", "one"), text_node("B", "two")]), &[]);
        let assignment = SlotAssignment {
            slot_id: "body".into(),
            sources: vec![
                NodeOutputRef::new("A", "TextGeneration", "text"),
                NodeOutputRef::new("B", "TextGeneration", "text"),
            ],
        };
        let resolved = resolve_slot(&assignment, &body_slot(), &OutputIndex::new(&groups));
        assert_eq!(resolved.value, Some(ResolvedValue::Text("one\n\ntwo".into())));
    }

    #[test]
    fn partial_resolution_keeps_value_but_flags_stale() {
        let groups = collect_outputs(&nodes(vec![text_node("A", "one")]), &[]);
        let assignment = SlotAssignment {
            slot_id: "body".into(),
            sources: vec![
                NodeOutputRef::new("A", "TextGeneration", "text"),
                NodeOutputRef::new("gone", "TextGeneration", "text"),
            ],
        };
        let resolved = resolve_slot(&assignment, &body_slot(), &OutputIndex::new(&groups));
        assert!(resolved.stale);
        assert_eq!(resolved.value, Some(ResolvedValue::Text("one".into())));
    }

    #[test]
    fn placeholder_sources_resolve_empty_without_stale() {
        let matcher = PreviewNodeState::completed(
            "m",
            "ImageMatching",
            json!({ "matches": [
                { "image_url": "https://cdn/a.png", "similarity_score": 0.7 },
                { "image_url": "https://cdn/a.png", "similarity_score": 0.3 },
                ""
            ] })
            .as_object()
            .cloned()
            .unwrap(),
        );
        let groups = collect_outputs(&nodes(vec![matcher]), &[]);
        let assignment = SlotAssignment {
            slot_id: "image".into(),
            sources: vec![
                NodeOutputRef::new("m", "ImageMatching", "matches").with_index(1),
                NodeOutputRef::new("m", "ImageMatching", "matches").with_index(2),
            ],
        };
        let resolved = resolve_slot(&assignment, &image_slot(), &OutputIndex::new(&groups));
        assert_eq!(resolved, ResolvedSlot { value: None, stale: false });

        let gone = collect_outputs(&nodes(vec![]), &[]);
        let resolved = resolve_slot(&assignment, &image_slot(), &OutputIndex::new(&gone));
        assert!(resolved.stale);
    }

    #[test]
    fn media_slot_takes_first_source() {
        let gen = |id: &str, url: &str| {
            PreviewNodeState::completed(
                id,
                "ImageGeneration",
                json!({ "image": url }).as_object().cloned().unwrap(),
            )
        };
        let groups = collect_outputs(&nodes(vec![gen("i1", "https://a.png"), gen("i2", "https://b.png")]), &[]);
        let assignment = SlotAssignment {
            slot_id: "image".into(),
            sources: vec![
                NodeOutputRef::new("i2", "ImageGeneration", "image"),
                NodeOutputRef::new("i1", "ImageGeneration", "image"),
            ],
        };
        let resolved = resolve_slot(&assignment, &image_slot(), &OutputIndex::new(&groups));
        assert_eq!(
            resolved.value,
            Some(ResolvedValue::Media {
                url: "https://b.png".into(),
                kind: SlotContentType::Image
            })
        );
    }
}
