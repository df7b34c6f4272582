//! Flattens completed node outputs into addressable, typed output entries.
//!
//! [`collect_outputs`] is a pure function of the node-state map and the image
//! bucket: identical inputs always produce identical groups, in node-id order.
//! Callers memoize against changes themselves.

use std::collections::{hash_map::Entry, HashMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    ids::NodeId,
    preview::model::{NodeOutputRef, NodeStateMap, PreviewNodeState},
    registry::{self, PortShape, PortSchema, SlotContentType, IMAGE_MATCHING},
};

const LABEL_PREVIEW_CHARS: usize = 40;

/// Image known to the graph's image buckets, addressable by id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageBucketEntry {
    pub id: String,
    pub url: String,
    #[serde(default)]
    pub caption: Option<String>,
}

/// Extracted quote with optional attribution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speaker: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

/// Image-matching result normalized to a resolved URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedMatch {
    pub image_url: String,
    #[serde(rename = "_matchScore")]
    pub match_score: f64,
    #[serde(rename = "_caption", default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
}

/// Classified output value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OutputValue {
    Text { text: String },
    /// Image, audio or video reference; `media` says which.
    MediaRef { url: String, media: SlotContentType },
    /// One element of a quote list.
    Quote(Quote),
    MatchResult(EnrichedMatch),
    Opaque { json: Value },
}

impl OutputValue {
    /// Text representation used when a value lands in a text slot.
    pub fn as_text(&self) -> String {
        match self {
            OutputValue::Text { text } => text.clone(),
            OutputValue::Quote(quote) => match &quote.speaker {
                Some(speaker) => format!("\"{}\" - {}", quote.text, speaker),
                None => format!("\"{}\"", quote.text),
            },
            OutputValue::MediaRef { url, .. } => url.clone(),
            OutputValue::MatchResult(m) => m.caption.clone().unwrap_or_else(|| m.image_url.clone()),
            OutputValue::Opaque { json } => json.to_string(),
        }
    }

    pub fn media_url(&self) -> Option<&str> {
        match self {
            OutputValue::MediaRef { url, .. } => Some(url),
            OutputValue::MatchResult(m) => Some(&m.image_url),
            _ => None,
        }
    }

    fn label_preview(&self) -> String {
        let text = match self {
            OutputValue::MediaRef { url, .. } => url.rsplit('/').next().unwrap_or(url).to_string(),
            OutputValue::MatchResult(m) => m
                .caption
                .clone()
                .unwrap_or_else(|| m.image_url.rsplit('/').next().unwrap_or("").to_string()),
            other => other.as_text(),
        };
        truncate_chars(text.trim(), LABEL_PREVIEW_CHARS)
    }
}

/// One addressable output with its content type and value.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputEntry {
    pub reference: NodeOutputRef,
    pub content_type: SlotContentType,
    pub value: OutputValue,
}

/// Outputs of one node.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputGroup {
    pub node_id: NodeId,
    pub node_type: String,
    pub label: String,
    pub icon: String,
    pub outputs: Vec<OutputEntry>,
    /// Elements present in the node output with nothing to show (null, blank
    /// text, a repeated match URL). Not offered for assignment, but slots
    /// pointing at them still resolve as present.
    pub placeholders: Vec<NodeOutputRef>,
}

/// Classify a raw output element for a port of the given content type.
///
/// Returns `None` for values that carry nothing displayable (null, empty text).
pub fn classify(content_type: SlotContentType, raw: &Value) -> Option<OutputValue> {
    match raw {
        Value::Null => None,
        Value::String(s) if s.trim().is_empty() => None,
        Value::String(s) if content_type.is_media() => Some(OutputValue::MediaRef {
            url: s.clone(),
            media: content_type,
        }),
        Value::String(s) => Some(OutputValue::Text { text: s.clone() }),
        Value::Object(obj) if content_type.is_media() => {
            let url = ["url", "image_url", "src"]
                .iter()
                .find_map(|k| obj.get(*k).and_then(Value::as_str));
            match url {
                Some(url) => Some(OutputValue::MediaRef {
                    url: url.to_string(),
                    media: content_type,
                }),
                None => Some(OutputValue::Opaque { json: raw.clone() }),
            }
        }
        Value::Object(_) if content_type == SlotContentType::Text => match classify_quote(raw) {
            Some(quote) => Some(OutputValue::Quote(quote)),
            None => Some(OutputValue::Opaque { json: raw.clone() }),
        },
        other => Some(OutputValue::Opaque {
            json: other.clone(),
        }),
    }
}

/// Recognize `{quote|text, speaker?, timestamp?}` objects.
pub fn classify_quote(raw: &Value) -> Option<Quote> {
    let obj = raw.as_object()?;
    let text = obj
        .get("quote")
        .or_else(|| obj.get("text"))
        .and_then(Value::as_str)?
        .trim();
    if text.is_empty() {
        return None;
    }
    let field = |key: &str| {
        obj.get(key).and_then(|v| match v {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
    };
    Some(Quote {
        text: text.to_string(),
        speaker: field("speaker"),
        timestamp: field("timestamp"),
    })
}

/// Normalize one image-matching element, resolving `image_id` against the bucket.
pub fn classify_match(raw: &Value, bucket: &[ImageBucketEntry]) -> Option<EnrichedMatch> {
    let obj = raw.as_object()?;
    let score = obj
        .get("similarity_score")
        .or_else(|| obj.get("score"))
        .and_then(Value::as_f64)
        .unwrap_or(0.0);
    let caption = obj
        .get("caption")
        .and_then(Value::as_str)
        .map(str::to_string);

    if let Some(url) = obj.get("image_url").and_then(Value::as_str) {
        return Some(EnrichedMatch {
            image_url: url.to_string(),
            match_score: score,
            caption,
        });
    }

    let id = match obj.get("image_id")? {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    let image = bucket.iter().find(|img| img.id == id)?;
    Some(EnrichedMatch {
        image_url: image.url.clone(),
        match_score: score,
        caption: caption.or_else(|| image.caption.clone()),
    })
}

/// Images supplied by completed `ImageBucket` nodes, for resolving matches by id.
pub fn image_bucket_from_nodes(nodes: &NodeStateMap) -> Vec<ImageBucketEntry> {
    nodes
        .values()
        .filter(|node| node.node_type == "ImageBucket")
        .filter_map(|node| node.outputs.as_ref()?.get("images")?.as_array())
        .flatten()
        .filter_map(|img| serde_json::from_value::<ImageBucketEntry>(img.clone()).ok())
        .collect()
}

/// Highest-scoring match per resolved URL across all image-matching nodes.
///
/// Nodes are visited in id order and elements in array order; a later match
/// only replaces an earlier one with a strictly higher score.
fn best_matches(nodes: &NodeStateMap, bucket: &[ImageBucketEntry]) -> HashMap<String, EnrichedMatch> {
    let mut best: HashMap<String, EnrichedMatch> = HashMap::new();
    let raw_matches = nodes
        .values()
        .filter(|node| node.node_type == IMAGE_MATCHING && node.is_collectable())
        .filter_map(|node| node.outputs.as_ref()?.get("matches")?.as_array())
        .flatten();
    for raw in raw_matches {
        let Some(candidate) = classify_match(raw, bucket) else {
            continue;
        };
        match best.entry(candidate.image_url.clone()) {
            Entry::Occupied(mut slot) => {
                if candidate.match_score > slot.get().match_score {
                    slot.insert(candidate);
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(candidate);
            }
        }
    }
    best
}

/// Collect output groups for every completed, non-bucket node.
pub fn collect_outputs(nodes: &NodeStateMap, image_bucket: &[ImageBucketEntry]) -> Vec<OutputGroup> {
    let best = best_matches(nodes, image_bucket);
    nodes
        .values()
        .filter(|node| node.is_collectable() && !registry::is_bucket(&node.node_type))
        .filter_map(|node| collect_node(node, image_bucket, &best))
        .collect()
}

fn collect_node(
    node: &PreviewNodeState,
    bucket: &[ImageBucketEntry],
    best: &HashMap<String, EnrichedMatch>,
) -> Option<OutputGroup> {
    let kind = registry::lookup(&node.node_type)?;
    let outputs = node.outputs.as_ref()?;
    let mut entries = Vec::new();
    let mut placeholders = Vec::new();

    for port in kind.outputs {
        let Some(raw) = outputs.get(port.key) else {
            #[cfg(feature = "tracing")]
            tracing::debug!(node_id = %node.id, key = port.key, "output key missing; skipped");
            continue;
        };
        match raw {
            Value::Array(items) => {
                let mut seen_urls: Vec<String> = Vec::new();
                for (index, item) in items.iter().enumerate() {
                    let reference =
                        || NodeOutputRef::new(node.id.clone(), node.node_type.clone(), port.key).with_index(index);
                    let Some(value) = element_value(node, port, item, bucket, best) else {
                        placeholders.push(reference());
                        continue;
                    };
                    if let OutputValue::MatchResult(m) = &value {
                        if seen_urls.contains(&m.image_url) {
                            placeholders.push(reference());
                            continue;
                        }
                        seen_urls.push(m.image_url.clone());
                    }
                    let label = format!("{} #{}: {}", port.label, index + 1, value.label_preview());
                    entries.push(OutputEntry {
                        reference: reference().with_label(label),
                        content_type: port.content_type(),
                        value,
                    });
                }
            }
            single => {
                if port.shape == PortShape::List {
                    #[cfg(feature = "tracing")]
                    tracing::debug!(node_id = %node.id, key = port.key, "list port carried a scalar");
                }
                let Some(value) = element_value(node, port, single, bucket, best) else {
                    placeholders.push(NodeOutputRef::new(node.id.clone(), node.node_type.clone(), port.key));
                    continue;
                };
                let label = format!("{} ({}) · {}", kind.label, node.id, port.label);
                entries.push(OutputEntry {
                    reference: NodeOutputRef::new(node.id.clone(), node.node_type.clone(), port.key)
                        .with_label(label),
                    content_type: port.content_type(),
                    value,
                });
            }
        }
    }

    Some(OutputGroup {
        node_id: node.id.clone(),
        node_type: node.node_type.clone(),
        label: kind.label.to_string(),
        icon: kind.icon.to_string(),
        outputs: entries,
        placeholders,
    })
}

fn element_value(
    node: &PreviewNodeState,
    port: &PortSchema,
    raw: &Value,
    bucket: &[ImageBucketEntry],
    best: &HashMap<String, EnrichedMatch>,
) -> Option<OutputValue> {
    if node.node_type == IMAGE_MATCHING && port.key == "matches" {
        let local = classify_match(raw, bucket)?;
        let winner = best.get(&local.image_url).cloned().unwrap_or(local);
        return Some(OutputValue::MatchResult(winner));
    }
    classify(port.content_type(), raw)
}

/// Lookup of output entries by `(node, key, index)` for slot resolution.
#[derive(Debug, Default)]
pub struct OutputIndex<'a> {
    entries: HashMap<String, &'a OutputEntry>,
    placeholders: HashSet<String>,
}

impl<'a> OutputIndex<'a> {
    pub fn new(groups: &'a [OutputGroup]) -> Self {
        let entries = groups
            .iter()
            .flat_map(|group| group.outputs.iter())
            .map(|entry| (entry.reference.ref_key(), entry))
            .collect();
        let placeholders = groups
            .iter()
            .flat_map(|group| group.placeholders.iter())
            .map(NodeOutputRef::ref_key)
            .collect();
        Self { entries, placeholders }
    }

    pub fn get(&self, reference: &NodeOutputRef) -> Option<&'a OutputEntry> {
        self.entries.get(&reference.ref_key()).copied()
    }

    /// The element exists but carries no displayable value.
    pub fn is_placeholder(&self, reference: &NodeOutputRef) -> bool {
        self.placeholders.contains(&reference.ref_key())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

pub(crate) fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max).collect();
    out.push('…');
    out
}
