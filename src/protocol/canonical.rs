use serde::{Deserialize, Serialize};

use crate::error::ErrorPayload;

pub type JsonMap = serde_json::Map<String, serde_json::Value>;

/// Sentinel for an index that is not known yet. Distinct from the legal
/// index `0`; index fields are never `Option`.
pub const UNSET_INDEX: i64 = -1;

/// Separator used when text-bearing parts are folded into `content_text`.
pub const TEXT_PART_SEPARATOR: &str = "\n";

fn unset_index() -> i64 {
    UNSET_INDEX
}

/// Canonical message role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CanonicalRole {
    System,
    User,
    Assistant,
    Tool,
}

/// Reason the model stopped generating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ToolCalls,
    ContentFilter,
    Error,
    Other,
}

/// A single part of a message's content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text {
        text: String,
    },
    Reasoning {
        text: String,
    },
    Image {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        url: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        mime_type: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<String>,
    },
    ToolResult {
        tool_call_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        content: String,
    },
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        ContentPart::Text { text: text.into() }
    }

    /// Text of a plain text part; reasoning and other parts yield `None`.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            ContentPart::Text { text } => Some(text),
            _ => None,
        }
    }
}

/// A tool invocation. Streaming deltas may carry only a fragment: `name` and
/// `id` usually appear on the first fragment only.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ToolCall {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub arguments: String,
}

/// Token usage information.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalUsage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_tokens: Option<u64>,
}

/// A single message in the canonical conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalMessage {
    pub role: CanonicalRole,
    #[serde(default)]
    pub parts: Vec<ContentPart>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl CanonicalMessage {
    pub fn text(role: CanonicalRole, text: impl Into<String>) -> Self {
        Self {
            role,
            parts: vec![ContentPart::text(text)],
            tool_calls: Vec::new(),
            tool_call_id: None,
            name: None,
        }
    }

    /// All text parts, joined with [`TEXT_PART_SEPARATOR`].
    #[must_use]
    pub fn joined_text(&self) -> String {
        aggregate_text(&self.parts).unwrap_or_default()
    }
}

/// Sampling parameters passed through to the upstream.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SamplingParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stop: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub candidate_count: Option<u32>,
}

/// A function tool declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<serde_json::Value>,
}

/// Tool choice specification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ToolChoice {
    Auto,
    None,
    Required,
    Function { name: String },
}

/// Requested output format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseFormat {
    Text,
    JsonObject,
    JsonSchema {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        schema: serde_json::Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        strict: Option<bool>,
    },
}

/// Reasoning / thinking configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReasoningConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effort: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub budget_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include_thoughts: Option<bool>,
}

/// Wire fields without a canonical equivalent, tagged with the vendor they
/// came from. Values are opaque JSON and are only reapplied to the same
/// vendor's wire shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VendorExtras {
    pub origin: String,
    pub fields: JsonMap,
}

impl VendorExtras {
    /// `None` when there is nothing to carry.
    #[must_use]
    pub fn from_fields(origin: &str, fields: JsonMap) -> Option<Self> {
        if fields.is_empty() {
            None
        } else {
            Some(Self {
                origin: origin.to_owned(),
                fields,
            })
        }
    }

    #[must_use]
    pub fn fields_for<'a>(extras: Option<&'a Self>, vendor: &str) -> Option<&'a JsonMap> {
        extras
            .filter(|extras| extras.origin == vendor)
            .map(|extras| &extras.fields)
    }
}

/// The provider-agnostic request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalRequest {
    pub model: String,
    #[serde(default)]
    pub messages: Vec<CanonicalMessage>,
    #[serde(default)]
    pub sampling: SamplingParams,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<ToolChoice>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_format: Option<ResponseFormat>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<ReasoningConfig>,
    #[serde(default)]
    pub stream: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vendor_extras: Option<VendorExtras>,
}

impl CanonicalRequest {
    pub fn new(model: impl Into<String>, messages: Vec<CanonicalMessage>) -> Self {
        Self {
            model: model.into(),
            messages,
            sampling: SamplingParams::default(),
            tools: Vec::new(),
            tool_choice: None,
            response_format: None,
            reasoning: None,
            stream: false,
            vendor_extras: None,
        }
    }
}

/// One candidate/choice of a non-streaming response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalChoice {
    pub index: u32,
    pub message: CanonicalMessage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<FinishReason>,
}

/// The provider-agnostic non-streaming response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalResponse {
    pub id: String,
    pub model: String,
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<u64>,
    #[serde(default)]
    pub choices: Vec<CanonicalChoice>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<CanonicalUsage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vendor_extras: Option<VendorExtras>,
}

/// Discriminator of a canonical stream event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamEventType {
    MessageStart,
    MessageDelta,
    MessageStop,
    ContentBlockStart,
    ContentBlockDelta,
    ContentBlockStop,
    Error,
}

/// Delta payload of a stream event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<CanonicalRole>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parts: Vec<ContentPart>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// Convenience transcript: the text parts joined by
    /// [`TEXT_PART_SEPARATOR`]. `parts` stays authoritative for exact deltas.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_text: Option<String>,
}

impl StreamMessage {
    #[must_use]
    pub fn new(
        role: Option<CanonicalRole>,
        parts: Vec<ContentPart>,
        tool_calls: Vec<ToolCall>,
    ) -> Self {
        let content_text = aggregate_text(&parts);
        Self {
            role,
            parts,
            tool_calls,
            content_text,
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.role.is_none() && self.parts.is_empty() && self.tool_calls.is_empty()
    }
}

/// Join the text-bearing parts, or `None` when there are none.
#[must_use]
pub fn aggregate_text(parts: &[ContentPart]) -> Option<String> {
    let mut texts = parts.iter().filter_map(ContentPart::as_text);
    let first = texts.next()?;
    let mut out = first.to_owned();
    for text in texts {
        out.push_str(TEXT_PART_SEPARATOR);
        out.push_str(text);
    }
    Some(out)
}

/// A single event in a canonical stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalStreamEvent {
    #[serde(rename = "type")]
    pub event_type: StreamEventType,
    pub source: String,
    #[serde(default)]
    pub response_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default = "unset_index")]
    pub sequence_number: i64,
    #[serde(default = "unset_index")]
    pub output_index: i64,
    /// Empty until assigned.
    #[serde(default)]
    pub item_id: String,
    #[serde(default = "unset_index")]
    pub content_index: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<StreamMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<CanonicalUsage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorPayload>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<FinishReason>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<JsonMap>,
}

impl CanonicalStreamEvent {
    /// A new event with every index field unset.
    pub fn new(
        event_type: StreamEventType,
        source: impl Into<String>,
        response_id: impl Into<String>,
    ) -> Self {
        Self {
            event_type,
            source: source.into(),
            response_id: response_id.into(),
            model: None,
            sequence_number: UNSET_INDEX,
            output_index: UNSET_INDEX,
            item_id: String::new(),
            content_index: UNSET_INDEX,
            message: None,
            usage: None,
            error: None,
            finish_reason: None,
            extensions: None,
        }
    }

    /// An `error` event carrying `payload`.
    pub fn error(
        source: impl Into<String>,
        response_id: impl Into<String>,
        payload: ErrorPayload,
    ) -> Self {
        let mut event = Self::new(StreamEventType::Error, source, response_id);
        event.error = Some(payload);
        event
    }

    #[must_use]
    pub fn is_error(&self) -> bool {
        self.event_type == StreamEventType::Error
    }

    /// Store `value` under the `vendor` namespace of `extensions`.
    pub fn insert_extension(&mut self, vendor: &str, value: serde_json::Value) {
        self.extensions
            .get_or_insert_with(JsonMap::new)
            .insert(vendor.to_owned(), value);
    }

    #[must_use]
    pub fn extension(&self, vendor: &str) -> Option<&serde_json::Value> {
        self.extensions.as_ref()?.get(vendor)
    }
}
