//! Gemini generateContent wire protocol.

pub mod request;
pub mod response;
pub mod stream;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::GatewayError;
use crate::protocol::canonical::{
    CanonicalRequest, CanonicalResponse, CanonicalStreamEvent, CanonicalUsage, ContentPart,
    JsonMap, ToolCall,
};
use crate::protocol::{Converter, GEMINI};
use crate::stream::index::StreamIndexContext;

/// Gemini generateContent request wire type.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeminiRequest {
    /// `models/<name>`; optional on the wire since the URL names the model.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default)]
    pub contents: Vec<GeminiContent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<GeminiContent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<GeminiTool>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_config: Option<GeminiToolConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generation_config: Option<GeminiGenerationConfig>,
    #[serde(flatten)]
    pub extra: JsonMap,
}

/// A content message in Gemini format.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GeminiContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default)]
    pub parts: Vec<GeminiPart>,
}

/// A single part. Exactly one of the payload fields is set on the wire.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeminiPart {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thought: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_call: Option<GeminiFunctionCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_response: Option<GeminiFunctionResponse>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<GeminiBlob>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_data: Option<GeminiFileData>,
    #[serde(flatten)]
    pub extra: JsonMap,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeminiFunctionCall {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub args: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeminiFunctionResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub response: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeminiBlob {
    pub mime_type: String,
    pub data: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeminiFileData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    pub file_uri: String,
}

/// generateContent response; also the shape of every stream chunk.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeminiResponse {
    #[serde(default)]
    pub candidates: Vec<GeminiCandidate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage_metadata: Option<GeminiUsageMetadata>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_id: Option<String>,
    #[serde(flatten)]
    pub extra: JsonMap,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeminiCandidate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<GeminiContent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<u32>,
    #[serde(flatten)]
    pub extra: JsonMap,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeminiUsageMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_token_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub candidates_token_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_token_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thoughts_token_count: Option<u64>,
}

impl GeminiUsageMetadata {
    #[must_use]
    pub fn to_canonical(&self) -> CanonicalUsage {
        CanonicalUsage {
            input_tokens: self.prompt_token_count,
            output_tokens: self.candidates_token_count,
            total_tokens: self.total_token_count,
            reasoning_tokens: self.thoughts_token_count,
        }
    }

    #[must_use]
    pub fn from_canonical(usage: &CanonicalUsage) -> Self {
        Self {
            prompt_token_count: usage.input_tokens,
            candidates_token_count: usage.output_tokens,
            total_token_count: usage.total_tokens,
            thoughts_token_count: usage.reasoning_tokens,
        }
    }
}

/// A tool entry; only function declarations have a canonical equivalent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeminiTool {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_declarations: Option<Vec<GeminiFunctionDeclaration>>,
    #[serde(flatten)]
    pub extra: JsonMap,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeminiFunctionDeclaration {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeminiToolConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_calling_config: Option<GeminiFunctionCallingConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeminiFunctionCallingConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_function_names: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeminiGenerationConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_sequences: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub candidate_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_schema: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking_config: Option<GeminiThinkingConfig>,
    #[serde(flatten)]
    pub extra: JsonMap,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeminiThinkingConfig {
    /// `-1` asks for a dynamic budget.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking_budget: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include_thoughts: Option<bool>,
}

/// Canonical parts and tool calls decoded from a list of Gemini parts.
#[derive(Debug, Default)]
pub(crate) struct DecodedParts {
    pub parts: Vec<ContentPart>,
    pub tool_calls: Vec<ToolCall>,
}

pub(crate) fn decode_parts(parts: &[GeminiPart]) -> DecodedParts {
    let mut decoded = DecodedParts::default();
    for (position, part) in parts.iter().enumerate() {
        if let Some(text) = &part.text {
            decoded.parts.push(if part.thought == Some(true) {
                ContentPart::Reasoning { text: text.clone() }
            } else {
                ContentPart::text(text.clone())
            });
        } else if let Some(call) = &part.function_call {
            decoded.tool_calls.push(ToolCall {
                id: call.id.clone(),
                index: u32::try_from(position).ok(),
                name: Some(call.name.clone()),
                arguments: if call.args.is_null() {
                    "{}".to_owned()
                } else {
                    call.args.to_string()
                },
            });
        } else if let Some(response) = &part.function_response {
            decoded.parts.push(ContentPart::ToolResult {
                tool_call_id: response.id.clone().unwrap_or_else(|| response.name.clone()),
                name: Some(response.name.clone()),
                content: response.response.to_string(),
            });
        } else if let Some(blob) = &part.inline_data {
            decoded.parts.push(ContentPart::Image {
                url: None,
                mime_type: Some(blob.mime_type.clone()),
                data: Some(blob.data.clone()),
            });
        } else if let Some(file) = &part.file_data {
            decoded.parts.push(ContentPart::Image {
                url: Some(file.file_uri.clone()),
                mime_type: file.mime_type.clone(),
                data: None,
            });
        }
    }
    decoded
}

/// Discriminator for the first function call among `parts`.
pub(crate) fn function_call_discriminator(parts: &[GeminiPart]) -> Option<String> {
    parts.iter().enumerate().find_map(|(position, part)| {
        part.function_call.as_ref().map(|call| {
            call.id
                .clone()
                .unwrap_or_else(|| format!("call#{position}"))
        })
    })
}

pub(crate) fn encode_parts(
    parts: &[ContentPart],
    tool_calls: &[ToolCall],
) -> Result<Vec<GeminiPart>, GatewayError> {
    let mut out = Vec::with_capacity(parts.len() + tool_calls.len());
    for part in parts {
        out.push(match part {
            ContentPart::Text { text } => GeminiPart {
                text: Some(text.clone()),
                ..GeminiPart::default()
            },
            ContentPart::Reasoning { text } => GeminiPart {
                text: Some(text.clone()),
                thought: Some(true),
                ..GeminiPart::default()
            },
            ContentPart::Image {
                url,
                mime_type,
                data,
            } => match (data, url) {
                (Some(data), _) => GeminiPart {
                    inline_data: Some(GeminiBlob {
                        mime_type: mime_type
                            .clone()
                            .unwrap_or_else(|| "application/octet-stream".to_owned()),
                        data: data.clone(),
                    }),
                    ..GeminiPart::default()
                },
                (None, Some(url)) => GeminiPart {
                    file_data: Some(GeminiFileData {
                        mime_type: mime_type.clone(),
                        file_uri: url.clone(),
                    }),
                    ..GeminiPart::default()
                },
                (None, None) => continue,
            },
            ContentPart::ToolResult {
                tool_call_id,
                name,
                content,
            } => {
                let name = name.clone().unwrap_or_else(|| tool_call_id.clone());
                let response = match serde_json::from_str::<Value>(content) {
                    Ok(Value::Object(object)) => Value::Object(object),
                    _ => serde_json::json!({ "content": content }),
                };
                GeminiPart {
                    function_response: Some(GeminiFunctionResponse {
                        id: (*tool_call_id != name).then(|| tool_call_id.clone()),
                        name,
                        response,
                    }),
                    ..GeminiPart::default()
                }
            }
        });
    }
    for call in tool_calls {
        let args = if call.arguments.trim().is_empty() {
            Value::Object(JsonMap::new())
        } else {
            serde_json::from_str(&call.arguments).map_err(|err| {
                GatewayError::invalid_argument(format!("tool call arguments are not JSON: {err}"))
                    .with_context("tool", call.name.clone().unwrap_or_default())
            })?
        };
        out.push(GeminiPart {
            function_call: Some(GeminiFunctionCall {
                id: call.id.clone(),
                name: call.name.clone().unwrap_or_default(),
                args,
            }),
            ..GeminiPart::default()
        });
    }
    Ok(out)
}

/// Converter for the Gemini generateContent protocol.
#[derive(Debug, Clone, Copy, Default)]
pub struct GeminiConverter;

impl Converter for GeminiConverter {
    fn source(&self) -> &'static str {
        GEMINI
    }

    fn to_contract(&self, body: &[u8]) -> Result<CanonicalResponse, GatewayError> {
        response::decode_response(body)
    }

    fn from_contract(&self, response: &CanonicalResponse) -> Result<Value, GatewayError> {
        response::encode_response(response)
    }

    fn chunk_to_events(
        &self,
        chunk: &[u8],
        ctx: &mut StreamIndexContext,
    ) -> Result<Vec<CanonicalStreamEvent>, GatewayError> {
        stream::decode_chunk(chunk, ctx)
    }

    fn event_to_chunk(&self, event: &CanonicalStreamEvent) -> Result<Value, GatewayError> {
        stream::encode_event(event)
    }

    fn request_to_contract(&self, body: &[u8]) -> Result<CanonicalRequest, GatewayError> {
        request::decode_request(body)
    }

    fn request_from_contract(&self, request: &CanonicalRequest) -> Result<Value, GatewayError> {
        request::encode_request(request)
    }
}
