use serde_json::{json, Value};

use crate::error::GatewayError;
use crate::protocol::canonical::{
    CanonicalMessage, CanonicalRequest, CanonicalRole, ContentPart, ReasoningConfig,
    ResponseFormat, SamplingParams, ToolCall, ToolChoice, ToolSpec, VendorExtras,
};
use crate::protocol::mapping::{canonical_role_to_openai, openai_role_to_canonical};
use crate::protocol::{decode_wire, encode_wire, OPENAI};

use super::{
    OpenAiChatRequest, OpenAiJsonSchema, OpenAiMessage, OpenAiResponseFormat, OpenAiStop,
    OpenAiStreamOptions, OpenAiTool, OpenAiToolCall, OpenAiToolCallFunction, OpenAiToolChoice,
    OpenAiToolChoiceFunction, OpenAiToolChoiceFunctionCall, OpenAiToolFunction,
};

/// Decode an `OpenAI` Chat Completions request body.
///
/// # Errors
///
/// Returns [`GatewayError::InvalidArgument`] for malformed bodies, a missing
/// model, or message content of an unsupported shape.
pub fn decode_request(body: &[u8]) -> Result<CanonicalRequest, GatewayError> {
    let wire: OpenAiChatRequest = decode_wire(body, "openai chat request", GatewayError::invalid_argument)?;
    if wire.model.is_empty() {
        return Err(GatewayError::invalid_argument("model is required"));
    }

    let messages = wire
        .messages
        .iter()
        .map(decode_message)
        .collect::<Result<Vec<_>, _>>()?;

    Ok(CanonicalRequest {
        model: wire.model,
        messages,
        sampling: SamplingParams {
            temperature: wire.temperature,
            top_p: wire.top_p,
            top_k: None,
            max_tokens: wire.max_tokens.or(wire.max_completion_tokens),
            stop: decode_stop(wire.stop),
            seed: wire.seed,
            presence_penalty: wire.presence_penalty,
            frequency_penalty: wire.frequency_penalty,
            candidate_count: wire.n,
        },
        tools: wire
            .tools
            .unwrap_or_default()
            .into_iter()
            .map(|tool| ToolSpec {
                name: tool.function.name,
                description: tool.function.description,
                parameters: tool.function.parameters,
            })
            .collect(),
        tool_choice: wire.tool_choice.map(decode_tool_choice),
        response_format: wire.response_format.map(decode_response_format),
        reasoning: wire.reasoning_effort.map(|effort| ReasoningConfig {
            effort: Some(effort),
            ..ReasoningConfig::default()
        }),
        stream: wire.stream.unwrap_or(false),
        vendor_extras: VendorExtras::from_fields(OPENAI, wire.extra),
    })
}

/// Encode a canonical request as an `OpenAI` Chat Completions body.
///
/// # Errors
///
/// Returns [`GatewayError::Internal`] if the wire value cannot be serialized.
pub fn encode_request(request: &CanonicalRequest) -> Result<Value, GatewayError> {
    let sampling = &request.sampling;
    if let Some(top_k) = sampling.top_k {
        tracing::debug!(top_k, "dropping top_k, not supported by openai chat");
    }
    let extra = VendorExtras::fields_for(request.vendor_extras.as_ref(), OPENAI)
        .cloned()
        .unwrap_or_default();

    let wire = OpenAiChatRequest {
        model: request.model.clone(),
        messages: request
            .messages
            .iter()
            .map(|message| encode_message(message, false))
            .collect(),
        tools: (!request.tools.is_empty()).then(|| {
            request
                .tools
                .iter()
                .map(|tool| OpenAiTool {
                    type_: "function".to_owned(),
                    function: OpenAiToolFunction {
                        name: tool.name.clone(),
                        description: tool.description.clone(),
                        parameters: tool.parameters.clone(),
                    },
                })
                .collect()
        }),
        tool_choice: request.tool_choice.as_ref().map(encode_tool_choice),
        stream: request.stream.then_some(true),
        stream_options: request.stream.then_some(OpenAiStreamOptions {
            include_usage: Some(true),
        }),
        temperature: sampling.temperature,
        max_tokens: sampling.max_tokens,
        max_completion_tokens: None,
        top_p: sampling.top_p,
        frequency_penalty: sampling.frequency_penalty,
        presence_penalty: sampling.presence_penalty,
        seed: sampling.seed,
        n: sampling.candidate_count,
        stop: encode_stop(&sampling.stop),
        response_format: request.response_format.as_ref().map(encode_response_format),
        reasoning_effort: request
            .reasoning
            .as_ref()
            .and_then(|reasoning| reasoning.effort.clone()),
        extra,
    };
    encode_wire(&wire, "openai chat request")
}

// ---------------------------------------------------------------------------
// Messages (shared with the response codec)
// ---------------------------------------------------------------------------

pub(crate) fn decode_message(message: &OpenAiMessage) -> Result<CanonicalMessage, GatewayError> {
    let mut parts = Vec::new();
    if let Some(reasoning) = message.reasoning_content.as_ref().filter(|r| !r.is_empty()) {
        parts.push(ContentPart::Reasoning {
            text: reasoning.clone(),
        });
    }
    decode_content(message.content.as_ref(), &mut parts)?;
    if let Some(refusal) = &message.refusal {
        if parts.iter().all(|part| part.as_text().is_none()) {
            parts.push(ContentPart::text(refusal.clone()));
        }
    }

    let tool_calls = message
        .tool_calls
        .iter()
        .flatten()
        .enumerate()
        .map(|(position, call)| ToolCall {
            id: Some(call.id.clone()),
            index: u32::try_from(position).ok(),
            name: Some(call.function.name.clone()),
            arguments: call.function.arguments.clone(),
        })
        .collect();

    Ok(CanonicalMessage {
        role: openai_role_to_canonical(&message.role),
        parts,
        tool_calls,
        tool_call_id: message.tool_call_id.clone(),
        name: message.name.clone(),
    })
}

fn decode_content(content: Option<&Value>, parts: &mut Vec<ContentPart>) -> Result<(), GatewayError> {
    match content {
        None | Some(Value::Null) => Ok(()),
        Some(Value::String(text)) => {
            parts.push(ContentPart::text(text.clone()));
            Ok(())
        }
        Some(Value::Array(items)) => {
            for item in items {
                match item.get("type").and_then(Value::as_str) {
                    Some("text") => {
                        let text = item.get("text").and_then(Value::as_str).unwrap_or_default();
                        parts.push(ContentPart::text(text));
                    }
                    Some("image_url") => parts.push(decode_image_url(item.get("image_url"))),
                    other => {
                        tracing::debug!(part_type = ?other, "dropping unsupported openai content part");
                    }
                }
            }
            Ok(())
        }
        Some(other) => Err(GatewayError::invalid_argument(format!(
            "unsupported message content shape: {other}"
        ))),
    }
}

fn decode_image_url(image_url: Option<&Value>) -> ContentPart {
    let url = match image_url {
        Some(Value::String(url)) => url.as_str(),
        Some(object) => object.get("url").and_then(Value::as_str).unwrap_or_default(),
        None => "",
    };
    if let Some((mime_type, data)) = url
        .strip_prefix("data:")
        .and_then(|rest| rest.split_once(";base64,"))
    {
        return ContentPart::Image {
            url: None,
            mime_type: Some(mime_type.to_owned()),
            data: Some(data.to_owned()),
        };
    }
    ContentPart::Image {
        url: Some(url.to_owned()),
        mime_type: None,
        data: None,
    }
}

/// `with_reasoning` emits `reasoning_content`, which only responses carry.
pub(crate) fn encode_message(message: &CanonicalMessage, with_reasoning: bool) -> OpenAiMessage {
    let mut content = encode_content(&message.parts);
    let mut tool_call_id = message.tool_call_id.clone();

    let tool_results: Vec<(&str, &str)> = message
        .parts
        .iter()
        .filter_map(|part| match part {
            ContentPart::ToolResult {
                tool_call_id,
                content,
                ..
            } => Some((tool_call_id.as_str(), content.as_str())),
            _ => None,
        })
        .collect();
    if let Some((id, _)) = tool_results.first() {
        if tool_call_id.is_none() {
            tool_call_id = Some((*id).to_owned());
        }
        if content.is_none() {
            let joined: Vec<&str> = tool_results.iter().map(|(_, text)| *text).collect();
            content = Some(Value::String(joined.join("\n")));
        }
    }

    let reasoning_content = if with_reasoning {
        let reasoning: Vec<&str> = message
            .parts
            .iter()
            .filter_map(|part| match part {
                ContentPart::Reasoning { text } => Some(text.as_str()),
                _ => None,
            })
            .collect();
        (!reasoning.is_empty()).then(|| reasoning.concat())
    } else {
        None
    };

    OpenAiMessage {
        role: canonical_role_to_openai(message.role).to_owned(),
        content,
        name: message.name.clone(),
        tool_calls: (!message.tool_calls.is_empty()).then(|| {
            message
                .tool_calls
                .iter()
                .map(|call| OpenAiToolCall {
                    id: call.id.clone().unwrap_or_default(),
                    type_: "function".to_owned(),
                    function: OpenAiToolCallFunction {
                        name: call.name.clone().unwrap_or_default(),
                        arguments: call.arguments.clone(),
                    },
                })
                .collect()
        }),
        tool_call_id: if message.role == CanonicalRole::Tool {
            tool_call_id
        } else {
            message.tool_call_id.clone()
        },
        refusal: None,
        reasoning_content,
    }
}

fn encode_content(parts: &[ContentPart]) -> Option<Value> {
    let visible: Vec<&ContentPart> = parts
        .iter()
        .filter(|part| matches!(part, ContentPart::Text { .. } | ContentPart::Image { .. }))
        .collect();
    match visible.as_slice() {
        [] => None,
        [ContentPart::Text { text }] => Some(Value::String(text.clone())),
        many => Some(Value::Array(
            many.iter()
                .filter_map(|part| match part {
                    ContentPart::Text { text } => Some(json!({"type": "text", "text": text})),
                    ContentPart::Image {
                        url,
                        mime_type,
                        data,
                    } => {
                        let url = match (url, data) {
                            (Some(url), _) => url.clone(),
                            (None, Some(data)) => format!(
                                "data:{};base64,{data}",
                                mime_type.as_deref().unwrap_or("application/octet-stream")
                            ),
                            (None, None) => String::new(),
                        };
                        Some(json!({"type": "image_url", "image_url": {"url": url}}))
                    }
                    _ => None,
                })
                .collect(),
        )),
    }
}

// ---------------------------------------------------------------------------
// Scalar fields
// ---------------------------------------------------------------------------

fn decode_stop(stop: Option<OpenAiStop>) -> Vec<String> {
    match stop {
        None => Vec::new(),
        Some(OpenAiStop::Single(stop)) => vec![stop],
        Some(OpenAiStop::Multi(stops)) => stops,
    }
}

fn encode_stop(stop: &[String]) -> Option<OpenAiStop> {
    match stop {
        [] => None,
        [single] => Some(OpenAiStop::Single(single.clone())),
        many => Some(OpenAiStop::Multi(many.to_vec())),
    }
}

fn decode_tool_choice(choice: OpenAiToolChoice) -> ToolChoice {
    match choice {
        OpenAiToolChoice::Mode(mode) => match mode.as_str() {
            "none" => ToolChoice::None,
            "required" => ToolChoice::Required,
            _ => ToolChoice::Auto,
        },
        OpenAiToolChoice::Function(call) => ToolChoice::Function {
            name: call.function.name,
        },
    }
}

fn encode_tool_choice(choice: &ToolChoice) -> OpenAiToolChoice {
    match choice {
        ToolChoice::Auto => OpenAiToolChoice::Mode("auto".to_owned()),
        ToolChoice::None => OpenAiToolChoice::Mode("none".to_owned()),
        ToolChoice::Required => OpenAiToolChoice::Mode("required".to_owned()),
        ToolChoice::Function { name } => {
            OpenAiToolChoice::Function(OpenAiToolChoiceFunctionCall {
                type_: "function".to_owned(),
                function: OpenAiToolChoiceFunction { name: name.clone() },
            })
        }
    }
}

fn decode_response_format(format: OpenAiResponseFormat) -> ResponseFormat {
    match (format.type_.as_str(), format.json_schema) {
        ("json_schema", Some(schema)) => ResponseFormat::JsonSchema {
            name: schema.name,
            schema: schema.schema,
            strict: schema.strict,
        },
        ("json_object", _) => ResponseFormat::JsonObject,
        _ => ResponseFormat::Text,
    }
}

fn encode_response_format(format: &ResponseFormat) -> OpenAiResponseFormat {
    match format {
        ResponseFormat::Text => OpenAiResponseFormat {
            type_: "text".to_owned(),
            json_schema: None,
        },
        ResponseFormat::JsonObject => OpenAiResponseFormat {
            type_: "json_object".to_owned(),
            json_schema: None,
        },
        ResponseFormat::JsonSchema {
            name,
            schema,
            strict,
        } => OpenAiResponseFormat {
            type_: "json_schema".to_owned(),
            json_schema: Some(OpenAiJsonSchema {
                name: name.clone(),
                schema: schema.clone(),
                strict: *strict,
            }),
        },
    }
}
