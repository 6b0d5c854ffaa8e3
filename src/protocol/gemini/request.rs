use serde_json::Value;

use crate::error::GatewayError;
use crate::protocol::canonical::{
    CanonicalMessage, CanonicalRequest, CanonicalRole, ContentPart, JsonMap, ReasoningConfig,
    ResponseFormat, SamplingParams, ToolChoice, ToolSpec, VendorExtras,
};
use crate::protocol::mapping::{canonical_role_to_gemini, gemini_role_to_canonical};
use crate::protocol::{decode_wire, encode_wire, GEMINI};

use super::{
    decode_parts, encode_parts, GeminiContent, GeminiFunctionCallingConfig,
    GeminiFunctionDeclaration, GeminiGenerationConfig, GeminiRequest, GeminiThinkingConfig,
    GeminiTool, GeminiToolConfig,
};

const MODEL_PREFIX: &str = "models/";
// Extras key holding unknown generationConfig fields.
const GENERATION_CONFIG_KEY: &str = "generationConfig";
const JSON_MIME: &str = "application/json";

/// Decode a Gemini generateContent request body.
///
/// # Errors
///
/// Returns [`GatewayError::InvalidArgument`] for malformed bodies.
pub fn decode_request(body: &[u8]) -> Result<CanonicalRequest, GatewayError> {
    let wire: GeminiRequest = decode_wire(body, "gemini request", GatewayError::invalid_argument)?;

    let mut messages = Vec::with_capacity(wire.contents.len() + 1);
    if let Some(system) = &wire.system_instruction {
        let decoded = decode_parts(&system.parts);
        messages.push(CanonicalMessage {
            role: CanonicalRole::System,
            parts: decoded.parts,
            tool_calls: Vec::new(),
            tool_call_id: None,
            name: None,
        });
    }
    messages.extend(wire.contents.iter().map(decode_content));

    let mut extras = wire.extra;
    let generation = wire.generation_config.unwrap_or_default();
    if !generation.extra.is_empty() {
        extras.insert(
            GENERATION_CONFIG_KEY.to_owned(),
            Value::Object(generation.extra.clone()),
        );
    }

    let tools = wire
        .tools
        .unwrap_or_default()
        .into_iter()
        .flat_map(|tool| {
            if !tool.extra.is_empty() {
                tracing::debug!(
                    keys = ?tool.extra.keys().collect::<Vec<_>>(),
                    "dropping non-function gemini tool"
                );
            }
            tool.function_declarations.unwrap_or_default()
        })
        .map(|declaration| ToolSpec {
            name: declaration.name,
            description: declaration.description,
            parameters: declaration.parameters,
        })
        .collect();

    Ok(CanonicalRequest {
        model: wire
            .model
            .map(|model| {
                model
                    .strip_prefix(MODEL_PREFIX)
                    .map_or_else(|| model.clone(), str::to_owned)
            })
            .unwrap_or_default(),
        messages,
        sampling: SamplingParams {
            temperature: generation.temperature,
            top_p: generation.top_p,
            top_k: generation.top_k,
            max_tokens: generation.max_output_tokens,
            stop: generation.stop_sequences.clone().unwrap_or_default(),
            seed: generation.seed,
            presence_penalty: generation.presence_penalty,
            frequency_penalty: generation.frequency_penalty,
            candidate_count: generation.candidate_count,
        },
        tools,
        tool_choice: wire.tool_config.and_then(decode_tool_config),
        response_format: decode_response_format(&generation),
        reasoning: generation.thinking_config.as_ref().map(|thinking| ReasoningConfig {
            effort: None,
            budget_tokens: thinking
                .thinking_budget
                .and_then(|budget| u64::try_from(budget).ok()),
            include_thoughts: thinking.include_thoughts,
        }),
        stream: false,
        vendor_extras: VendorExtras::from_fields(GEMINI, extras),
    })
}

fn decode_content(content: &GeminiContent) -> CanonicalMessage {
    let decoded = decode_parts(&content.parts);
    let only_tool_results = !decoded.parts.is_empty()
        && decoded
            .parts
            .iter()
            .all(|part| matches!(part, ContentPart::ToolResult { .. }));
    let role = if only_tool_results {
        CanonicalRole::Tool
    } else {
        gemini_role_to_canonical(content.role.as_deref().unwrap_or("user"))
    };
    let tool_call_id = decoded.parts.iter().find_map(|part| match part {
        ContentPart::ToolResult { tool_call_id, .. } => Some(tool_call_id.clone()),
        _ => None,
    });
    CanonicalMessage {
        role,
        parts: decoded.parts,
        tool_calls: decoded.tool_calls,
        tool_call_id,
        name: None,
    }
}

fn decode_tool_config(config: GeminiToolConfig) -> Option<ToolChoice> {
    let config = config.function_calling_config?;
    Some(match config.mode.as_deref() {
        Some("NONE") => ToolChoice::None,
        Some("ANY") => match config.allowed_function_names.as_deref() {
            Some([name]) => ToolChoice::Function { name: name.clone() },
            _ => ToolChoice::Required,
        },
        _ => ToolChoice::Auto,
    })
}

fn decode_response_format(generation: &GeminiGenerationConfig) -> Option<ResponseFormat> {
    match (
        generation.response_mime_type.as_deref(),
        &generation.response_schema,
    ) {
        (_, Some(schema)) => Some(ResponseFormat::JsonSchema {
            name: None,
            schema: schema.clone(),
            strict: None,
        }),
        (Some(JSON_MIME), None) => Some(ResponseFormat::JsonObject),
        (Some("text/plain"), None) => Some(ResponseFormat::Text),
        _ => None,
    }
}

/// Encode a canonical request as a Gemini generateContent body.
///
/// # Errors
///
/// Returns [`GatewayError::InvalidArgument`] when tool-call arguments are not
/// valid JSON.
pub fn encode_request(request: &CanonicalRequest) -> Result<Value, GatewayError> {
    let mut extras = VendorExtras::fields_for(request.vendor_extras.as_ref(), GEMINI)
        .cloned()
        .unwrap_or_default();
    let generation_extra = match extras.remove(GENERATION_CONFIG_KEY) {
        Some(Value::Object(object)) => object,
        _ => JsonMap::new(),
    };

    let mut system_parts = Vec::new();
    let mut contents = Vec::with_capacity(request.messages.len());
    for message in &request.messages {
        let parts = encode_parts(&message.parts, &message.tool_calls)?;
        if message.role == CanonicalRole::System {
            system_parts.extend(parts);
            continue;
        }
        contents.push(GeminiContent {
            role: Some(canonical_role_to_gemini(message.role).to_owned()),
            parts,
        });
    }

    let generation = encode_generation_config(request, generation_extra);
    let wire = GeminiRequest {
        model: (!request.model.is_empty()).then(|| {
            if request.model.starts_with(MODEL_PREFIX) {
                request.model.clone()
            } else {
                format!("{MODEL_PREFIX}{}", request.model)
            }
        }),
        contents,
        system_instruction: (!system_parts.is_empty()).then(|| GeminiContent {
            role: None,
            parts: system_parts,
        }),
        tools: (!request.tools.is_empty()).then(|| {
            vec![GeminiTool {
                function_declarations: Some(
                    request
                        .tools
                        .iter()
                        .map(|tool| GeminiFunctionDeclaration {
                            name: tool.name.clone(),
                            description: tool.description.clone(),
                            parameters: tool.parameters.clone(),
                        })
                        .collect(),
                ),
                extra: JsonMap::new(),
            }]
        }),
        tool_config: request.tool_choice.as_ref().map(encode_tool_choice),
        generation_config: generation,
        extra: extras,
    };
    encode_wire(&wire, "gemini request")
}

fn encode_generation_config(
    request: &CanonicalRequest,
    extra: JsonMap,
) -> Option<GeminiGenerationConfig> {
    let sampling = &request.sampling;
    let (response_mime_type, response_schema) = match &request.response_format {
        Some(ResponseFormat::JsonSchema { schema, .. }) => {
            (Some(JSON_MIME.to_owned()), Some(schema.clone()))
        }
        Some(ResponseFormat::JsonObject) => (Some(JSON_MIME.to_owned()), None),
        Some(ResponseFormat::Text) => (Some("text/plain".to_owned()), None),
        None => (None, None),
    };
    let config = GeminiGenerationConfig {
        temperature: sampling.temperature,
        top_p: sampling.top_p,
        top_k: sampling.top_k,
        max_output_tokens: sampling.max_tokens,
        stop_sequences: (!sampling.stop.is_empty()).then(|| sampling.stop.clone()),
        seed: sampling.seed,
        presence_penalty: sampling.presence_penalty,
        frequency_penalty: sampling.frequency_penalty,
        candidate_count: sampling.candidate_count,
        response_mime_type,
        response_schema,
        thinking_config: request.reasoning.as_ref().and_then(|reasoning| {
            let thinking = GeminiThinkingConfig {
                thinking_budget: reasoning
                    .budget_tokens
                    .and_then(|budget| i64::try_from(budget).ok()),
                include_thoughts: reasoning.include_thoughts,
            };
            (thinking.thinking_budget.is_some() || thinking.include_thoughts.is_some())
                .then_some(thinking)
        }),
        extra,
    };
    let empty = config.temperature.is_none()
        && config.top_p.is_none()
        && config.top_k.is_none()
        && config.max_output_tokens.is_none()
        && config.stop_sequences.is_none()
        && config.seed.is_none()
        && config.presence_penalty.is_none()
        && config.frequency_penalty.is_none()
        && config.candidate_count.is_none()
        && config.response_mime_type.is_none()
        && config.thinking_config.is_none()
        && config.extra.is_empty();
    (!empty).then_some(config)
}

fn encode_tool_choice(choice: &ToolChoice) -> GeminiToolConfig {
    let (mode, allowed) = match choice {
        ToolChoice::Auto => ("AUTO", None),
        ToolChoice::None => ("NONE", None),
        ToolChoice::Required => ("ANY", None),
        ToolChoice::Function { name } => ("ANY", Some(vec![name.clone()])),
    };
    GeminiToolConfig {
        function_calling_config: Some(GeminiFunctionCallingConfig {
            mode: Some(mode.to_owned()),
            allowed_function_names: allowed,
        }),
    }
}
