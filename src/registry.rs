//! Static catalogue of node types and their declared ports.
//!
//! The registry is pure data: it tells the preview pipeline which outputs a node
//! type produces and what kind of content each output carries.

use serde::{Deserialize, Serialize};

/// Runtime type tag carried by a port in the compiled blueprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RuntimeType {
    Text,
    ImageRef,
    AudioRef,
    VideoRef,
    #[serde(rename = "JSON")]
    Json,
}

/// Kind of content a template slot accepts or a node output produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SlotContentType {
    Text,
    Image,
    Audio,
    Video,
    Json,
}

impl SlotContentType {
    pub fn from_runtime(runtime: RuntimeType) -> Self {
        match runtime {
            RuntimeType::Text => SlotContentType::Text,
            RuntimeType::ImageRef => SlotContentType::Image,
            RuntimeType::AudioRef => SlotContentType::Audio,
            RuntimeType::VideoRef => SlotContentType::Video,
            RuntimeType::Json => SlotContentType::Json,
        }
    }

    pub fn is_media(self) -> bool {
        matches!(
            self,
            SlotContentType::Image | SlotContentType::Audio | SlotContentType::Video
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SlotContentType::Text => "text",
            SlotContentType::Image => "image",
            SlotContentType::Audio => "audio",
            SlotContentType::Video => "video",
            SlotContentType::Json => "json",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortShape {
    Single,
    List,
}

/// Input/output contract of one port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortSchema {
    pub key: &'static str,
    pub label: &'static str,
    pub runtime_type: RuntimeType,
    pub shape: PortShape,
    pub required: bool,
}

impl PortSchema {
    const fn new(key: &'static str, label: &'static str, runtime_type: RuntimeType) -> Self {
        Self {
            key,
            label,
            runtime_type,
            shape: PortShape::Single,
            required: true,
        }
    }

    const fn list(mut self) -> Self {
        self.shape = PortShape::List;
        self
    }

    const fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn content_type(&self) -> SlotContentType {
        SlotContentType::from_runtime(self.runtime_type)
    }
}

/// Descriptor of one node type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeKind {
    pub node_type: &'static str,
    pub label: &'static str,
    pub icon: &'static str,
    pub inputs: &'static [PortSchema],
    pub outputs: &'static [PortSchema],
    /// Bucket nodes seed raw media/text into the graph; they never produce generated output.
    pub bucket: bool,
}

use PortSchema as P;
use RuntimeType::{AudioRef, ImageRef, Json, Text, VideoRef};

pub const IMAGE_MATCHING: &str = "ImageMatching";

static NODE_KINDS: &[NodeKind] = &[
    NodeKind {
        node_type: "ImageBucket",
        label: "Image Bucket",
        icon: "images",
        inputs: &[],
        outputs: &[P::new("images", "Images", ImageRef).list()],
        bucket: true,
    },
    NodeKind {
        node_type: "AudioBucket",
        label: "Audio Bucket",
        icon: "audio",
        inputs: &[],
        outputs: &[P::new("audio", "Audio", AudioRef).list()],
        bucket: true,
    },
    NodeKind {
        node_type: "VideoBucket",
        label: "Video Bucket",
        icon: "video",
        inputs: &[],
        outputs: &[P::new("videos", "Videos", VideoRef).list()],
        bucket: true,
    },
    NodeKind {
        node_type: "TextBucket",
        label: "Text Bucket",
        icon: "text",
        inputs: &[],
        outputs: &[P::new("texts", "Texts", Text).list()],
        bucket: true,
    },
    NodeKind {
        node_type: "Transcription",
        label: "Transcription",
        icon: "mic",
        inputs: &[P::new("audio", "Audio", AudioRef).list()],
        outputs: &[
            P::new("transcript", "Transcript", Text),
            P::new("segments", "Segment", Json).list().optional(),
        ],
        bucket: false,
    },
    NodeKind {
        node_type: "QuoteExtraction",
        label: "Quote Extraction",
        icon: "quote",
        inputs: &[P::new("transcript", "Transcript", Text)],
        outputs: &[P::new("quotes", "Quote", Text).list()],
        bucket: false,
    },
    NodeKind {
        node_type: IMAGE_MATCHING,
        label: "Image Matching",
        icon: "match",
        inputs: &[
            P::new("images", "Images", ImageRef).list(),
            P::new("text", "Text", Text),
        ],
        outputs: &[P::new("matches", "Match", ImageRef).list()],
        bucket: false,
    },
    NodeKind {
        node_type: "ImageGeneration",
        label: "Image Generation",
        icon: "sparkles",
        inputs: &[P::new("prompt", "Prompt", Text)],
        outputs: &[P::new("image", "Image", ImageRef)],
        bucket: false,
    },
    NodeKind {
        node_type: "ImageExtraction",
        label: "Image Extraction",
        icon: "frame",
        inputs: &[P::new("video", "Video", VideoRef)],
        outputs: &[P::new("frames", "Frame", ImageRef).list()],
        bucket: false,
    },
    NodeKind {
        node_type: "TextGeneration",
        label: "Text Generation",
        icon: "pen",
        inputs: &[P::new("prompt", "Prompt", Text).optional()],
        outputs: &[P::new("text", "Text", Text)],
        bucket: false,
    },
    NodeKind {
        node_type: "LinkedInPost",
        label: "LinkedIn Post",
        icon: "linkedin",
        inputs: &[
            P::new("transcript", "Transcript", Text).optional(),
            P::new("quotes", "Quotes", Text).list().optional(),
        ],
        outputs: &[
            P::new("headline", "Headline", Text).optional(),
            P::new("post", "Post", Text),
        ],
        bucket: false,
    },
    NodeKind {
        node_type: "TikTokScript",
        label: "TikTok Script",
        icon: "tiktok",
        inputs: &[P::new("transcript", "Transcript", Text)],
        outputs: &[
            P::new("script", "Script", Text),
            P::new("hooks", "Hook", Text).list().optional(),
        ],
        bucket: false,
    },
    NodeKind {
        node_type: "EmailDraft",
        label: "Email Draft",
        icon: "mail",
        inputs: &[P::new("transcript", "Transcript", Text)],
        outputs: &[
            P::new("subject", "Subject", Text),
            P::new("body", "Body", Text),
        ],
        bucket: false,
    },
    NodeKind {
        node_type: "QualityCheck",
        label: "Quality Check",
        icon: "check",
        inputs: &[P::new("text", "Text", Text)],
        outputs: &[P::new("report", "Report", Json)],
        bucket: false,
    },
    NodeKind {
        node_type: "VoiceOver",
        label: "Voice Over",
        icon: "speaker",
        inputs: &[P::new("text", "Text", Text)],
        outputs: &[P::new("audio", "Audio", AudioRef)],
        bucket: false,
    },
];

/// All registered node types in declaration order.
pub fn node_kinds() -> &'static [NodeKind] {
    NODE_KINDS
}

pub fn lookup(node_type: &str) -> Option<&'static NodeKind> {
    NODE_KINDS.iter().find(|kind| kind.node_type == node_type)
}

/// Declared output ports of a node type; empty for unknown types.
pub fn output_ports(node_type: &str) -> &'static [PortSchema] {
    lookup(node_type).map(|kind| kind.outputs).unwrap_or(&[])
}

pub fn is_bucket(node_type: &str) -> bool {
    lookup(node_type).map(|kind| kind.bucket).unwrap_or(false)
}

pub fn output_content_type(node_type: &str, key: &str) -> Option<SlotContentType> {
    output_ports(node_type)
        .iter()
        .find(|port| port.key == key)
        .map(PortSchema::content_type)
}
