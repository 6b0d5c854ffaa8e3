use serde_json::{json, Value};

use crate::error::GatewayError;
use crate::protocol::canonical::{
    CanonicalStreamEvent, ContentPart, JsonMap, StreamEventType, StreamMessage,
    ToolCall,
};
use crate::protocol::mapping::{
    canonical_role_to_openai, finish_reason_to_openai, openai_finish_reason_to_canonical,
    openai_role_to_canonical,
};
use crate::protocol::{decode_wire, encode_wire, ensure_source, OPENAI};
use crate::stream::index::{output_key, StreamIndexContext};

use super::{
    OpenAiDelta, OpenAiStreamChoice, OpenAiStreamChunk, OpenAiStreamToolCall,
    OpenAiStreamToolCallFunction, OpenAiUsage,
};

const CHUNK_OBJECT: &str = "chat.completion.chunk";

/// Decode one `chat.completion.chunk` payload.
///
/// Each choice yields a `message_delta`, followed by a `message_stop` when
/// the choice carries a `finish_reason`. A chunk without choices (the final
/// usage chunk) yields a single `message_delta` on the first output slot.
///
/// # Errors
///
/// Returns [`GatewayError::StreamError`] when the payload is not a chunk.
pub fn decode_chunk(
    chunk: &[u8],
    ctx: &mut StreamIndexContext,
) -> Result<Vec<CanonicalStreamEvent>, GatewayError> {
    let wire: OpenAiStreamChunk = decode_wire(chunk, "openai stream chunk", GatewayError::stream)?;
    let response_id = ctx.ensure_response_id(wire.id.as_deref());
    let mut usage = wire.usage.as_ref().map(OpenAiUsage::to_canonical);
    let chunk_extension = chunk_extension(&wire);

    let new_event = |event_type: StreamEventType| {
        let mut event = CanonicalStreamEvent::new(event_type, OPENAI, response_id.as_str());
        event.model.clone_from(&wire.model);
        event
    };

    if wire.choices.is_empty() {
        let mut event = new_event(StreamEventType::MessageDelta);
        event.output_index = ctx.ensure_output_index(&output_key(&response_id, 0));
        event.usage = usage;
        if let Some(extension) = chunk_extension {
            event.insert_extension(OPENAI, Value::Object(extension));
        }
        ctx.stamp(&mut event, None);
        return Ok(vec![event]);
    }

    let mut events = Vec::with_capacity(wire.choices.len() * 2);
    for choice in &wire.choices {
        let output_index = ctx.ensure_output_index(&output_key(&response_id, choice.index));
        let discriminator = choice
            .delta
            .tool_calls
            .as_ref()
            .and_then(|calls| calls.first())
            .map(|call| format!("call#{}", call.index));

        let mut delta = new_event(StreamEventType::MessageDelta);
        delta.output_index = output_index;
        delta.usage = usage.take();
        let message = delta_to_message(&choice.delta);
        if !message.is_empty() {
            delta.message = Some(message);
        }
        let mut extension = chunk_extension.clone().unwrap_or_default();
        extension.insert("index".to_owned(), json!(choice.index));
        extension.extend(choice.extra.clone());
        delta.insert_extension(OPENAI, Value::Object(extension));
        ctx.stamp(&mut delta, discriminator.as_deref());
        events.push(delta);

        if let Some(reason) = choice.finish_reason.as_deref() {
            let mut stop = new_event(StreamEventType::MessageStop);
            stop.output_index = output_index;
            stop.finish_reason = Some(openai_finish_reason_to_canonical(reason));
            stop.insert_extension(OPENAI, json!({"index": choice.index}));
            ctx.stamp(&mut stop, None);
            events.push(stop);
        }
    }
    Ok(events)
}

fn chunk_extension(wire: &OpenAiStreamChunk) -> Option<JsonMap> {
    let mut extension = wire.extra.clone();
    if let Some(created) = wire.created {
        extension.insert("created".to_owned(), json!(created));
    }
    (!extension.is_empty()).then_some(extension)
}

fn delta_to_message(delta: &OpenAiDelta) -> StreamMessage {
    let mut parts = Vec::new();
    if let Some(reasoning) = delta.reasoning_content.as_ref().filter(|r| !r.is_empty()) {
        parts.push(ContentPart::Reasoning {
            text: reasoning.clone(),
        });
    }
    if let Some(content) = delta.content.as_ref().filter(|c| !c.is_empty()) {
        parts.push(ContentPart::text(content.clone()));
    }
    if let Some(refusal) = delta.refusal.as_ref().filter(|r| !r.is_empty()) {
        parts.push(ContentPart::text(refusal.clone()));
    }
    let tool_calls = delta
        .tool_calls
        .iter()
        .flatten()
        .map(|call| ToolCall {
            id: call.id.clone(),
            index: Some(call.index),
            name: call.function.as_ref().and_then(|f| f.name.clone()),
            arguments: call
                .function
                .as_ref()
                .and_then(|f| f.arguments.clone())
                .unwrap_or_default(),
        })
        .collect();
    StreamMessage::new(
        delta.role.as_deref().map(openai_role_to_canonical),
        parts,
        tool_calls,
    )
}

/// Encode a canonical event as a `chat.completion.chunk`.
///
/// # Errors
///
/// Returns [`GatewayError::InvalidArgument`] for events from another vendor.
pub fn encode_event(event: &CanonicalStreamEvent) -> Result<Value, GatewayError> {
    ensure_source(OPENAI, &event.source)?;

    if let Some(error) = &event.error {
        return Ok(json!({
            "error": {
                "message": error.message,
                "type": error.kind.as_str(),
                "code": error.status,
            }
        }));
    }

    let mut extension = event
        .extension(OPENAI)
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();
    let index = extension
        .remove("index")
        .and_then(|index| index.as_u64())
        .and_then(|index| u32::try_from(index).ok())
        .unwrap_or_else(|| u32::try_from(event.output_index.max(0)).unwrap_or(0));
    let created = extension.remove("created").and_then(|created| created.as_u64());

    let usage_only = event.event_type == StreamEventType::MessageDelta
        && event.message.is_none()
        && event.finish_reason.is_none()
        && event.usage.is_some();

    let (choices, extra) = if usage_only {
        (Vec::new(), extension)
    } else {
        let (choice_extra, chunk_extra) = split_choice_fields(extension);
        let choice = OpenAiStreamChoice {
            index,
            delta: event
                .message
                .as_ref()
                .map(message_to_delta)
                .unwrap_or_default(),
            finish_reason: event
                .finish_reason
                .map(|reason| finish_reason_to_openai(reason).to_owned()),
            extra: choice_extra,
        };
        (vec![choice], chunk_extra)
    };

    let wire = OpenAiStreamChunk {
        id: Some(event.response_id.clone()),
        object: Some(CHUNK_OBJECT.to_owned()),
        created,
        model: event.model.clone(),
        choices,
        usage: event.usage.as_ref().map(OpenAiUsage::from_canonical),
        extra,
    };
    encode_wire(&wire, "openai stream chunk")
}

// Per-choice wire fields that ride along in the event extension.
const CHOICE_FIELDS: &[&str] = &["logprobs"];

fn split_choice_fields(extension: JsonMap) -> (JsonMap, JsonMap) {
    extension
        .into_iter()
        .partition(|(key, _)| CHOICE_FIELDS.contains(&key.as_str()))
}

fn message_to_delta(message: &StreamMessage) -> OpenAiDelta {
    let mut content = String::new();
    let mut reasoning = String::new();
    for part in &message.parts {
        match part {
            ContentPart::Text { text } => content.push_str(text),
            ContentPart::Reasoning { text } => reasoning.push_str(text),
            _ => {}
        }
    }
    OpenAiDelta {
        role: message
            .role
            .map(|role| canonical_role_to_openai(role).to_owned()),
        content: (!content.is_empty()).then_some(content),
        reasoning_content: (!reasoning.is_empty()).then_some(reasoning),
        tool_calls: (!message.tool_calls.is_empty()).then(|| {
            message
                .tool_calls
                .iter()
                .enumerate()
                .map(|(position, call)| OpenAiStreamToolCall {
                    index: call
                        .index
                        .unwrap_or_else(|| u32::try_from(position).unwrap_or(0)),
                    id: call.id.clone(),
                    type_: call.id.as_ref().map(|_| "function".to_owned()),
                    function: Some(OpenAiStreamToolCallFunction {
                        name: call.name.clone(),
                        arguments: Some(call.arguments.clone()),
                    }),
                })
                .collect()
        }),
        refusal: None,
    }
}
