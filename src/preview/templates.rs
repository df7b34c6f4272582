//! Platform post templates.

use crate::{
    ids::{PlatformId, SlotId},
    preview::model::TemplateSlot,
    registry::SlotContentType,
};

pub const LINKEDIN: &str = "linkedin";

/// Ordered slots of one platform's post mockup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformTemplate {
    pub platform_id: PlatformId,
    pub name: String,
    pub slots: Vec<TemplateSlot>,
}

impl PlatformTemplate {
    pub fn slot(&self, slot_id: &SlotId) -> Option<&TemplateSlot> {
        self.slots.iter().find(|slot| &slot.slot_id == slot_id)
    }
}

fn slot(
    slot_id: &str,
    label: &str,
    accepts_types: &[SlotContentType],
    required: bool,
    max_chars: Option<usize>,
) -> TemplateSlot {
    TemplateSlot {
        slot_id: slot_id.into(),
        label: label.to_string(),
        accepts_types: accepts_types.to_vec(),
        required,
        max_chars,
    }
}

pub fn linkedin() -> PlatformTemplate {
    PlatformTemplate {
        platform_id: LINKEDIN.into(),
        name: "LinkedIn".to_string(),
        slots: vec![
            slot("headline", "Headline", &[SlotContentType::Text], false, Some(200)),
            slot("body", "Body", &[SlotContentType::Text], true, Some(3000)),
            slot("image", "Image", &[SlotContentType::Image], false, None),
        ],
    }
}

/// Template for a platform, if one is registered.
pub fn by_id(platform_id: &PlatformId) -> Option<PlatformTemplate> {
    match platform_id.as_str() {
        LINKEDIN => Some(linkedin()),
        _ => None,
    }
}

pub fn default_template() -> PlatformTemplate {
    linkedin()
}
