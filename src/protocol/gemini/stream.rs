use serde_json::{json, Value};

use crate::error::GatewayError;
use crate::protocol::canonical::{
    CanonicalRole, CanonicalStreamEvent, JsonMap, StreamEventType, StreamMessage, UNSET_INDEX,
};
use crate::protocol::mapping::{
    canonical_role_to_gemini, finish_reason_to_gemini, gemini_finish_reason_to_canonical,
    gemini_role_to_canonical,
};
use crate::protocol::{decode_wire, encode_wire, ensure_source, GEMINI};
use crate::stream::index::{output_key, StreamIndexContext};

use super::{
    decode_parts, encode_parts, function_call_discriminator, GeminiCandidate, GeminiContent,
    GeminiResponse, GeminiUsageMetadata,
};

// Chunk-level wire fields kept in event extensions; everything else there
// belongs to the candidate.
const CHUNK_FIELDS: &[&str] = &["promptFeedback", "createTime"];
// Raw finish reason, so lossy canonical mappings still re-emit exactly.
const RAW_FINISH_KEY: &str = "finishReason";

/// Decode one streamed generateContent payload.
///
/// Every candidate yields a `message_delta` whose `content_index` is the
/// position of its last part, followed by a `message_stop` when the
/// candidate carries a `finishReason`.
///
/// # Errors
///
/// Returns [`GatewayError::StreamError`] when the payload is malformed.
pub fn decode_chunk(
    chunk: &[u8],
    ctx: &mut StreamIndexContext,
) -> Result<Vec<CanonicalStreamEvent>, GatewayError> {
    let wire: GeminiResponse = decode_wire(chunk, "gemini stream chunk", GatewayError::stream)?;
    let response_id = ctx.ensure_response_id(wire.response_id.as_deref());
    let mut usage = wire
        .usage_metadata
        .as_ref()
        .map(GeminiUsageMetadata::to_canonical);

    let new_event = |event_type: StreamEventType| {
        let mut event = CanonicalStreamEvent::new(event_type, GEMINI, response_id.as_str());
        event.model.clone_from(&wire.model_version);
        event
    };

    if wire.candidates.is_empty() {
        let mut event = new_event(StreamEventType::MessageDelta);
        event.output_index = ctx.ensure_output_index(&output_key(&response_id, 0));
        event.usage = usage;
        if !wire.extra.is_empty() {
            event.insert_extension(GEMINI, Value::Object(wire.extra.clone()));
        }
        ctx.stamp(&mut event, None);
        return Ok(vec![event]);
    }

    let mut events = Vec::with_capacity(wire.candidates.len() * 2);
    for (position, candidate) in wire.candidates.iter().enumerate() {
        let candidate_index = candidate
            .index
            .unwrap_or_else(|| u32::try_from(position).unwrap_or(u32::MAX));
        let output_index = ctx.ensure_output_index(&output_key(&response_id, candidate_index));
        let parts = candidate
            .content
            .as_ref()
            .map_or(&[][..], |content| content.parts.as_slice());
        let discriminator = function_call_discriminator(parts);

        let mut delta = new_event(StreamEventType::MessageDelta);
        delta.output_index = output_index;
        delta.content_index = i64::try_from(parts.len()).map_or(UNSET_INDEX, |len| len - 1);
        delta.usage = usage.take();
        let decoded = decode_parts(parts);
        let role = candidate
            .content
            .as_ref()
            .and_then(|content| content.role.as_deref())
            .map(gemini_role_to_canonical);
        let message = StreamMessage::new(role, decoded.parts, decoded.tool_calls);
        if !message.is_empty() {
            delta.message = Some(message);
        }
        let mut extension = candidate.extra.clone();
        extension.insert("index".to_owned(), json!(candidate_index));
        extension.extend(wire.extra.clone());
        delta.insert_extension(GEMINI, Value::Object(extension));
        ctx.stamp(&mut delta, discriminator.as_deref());
        events.push(delta);

        if let Some(reason) = candidate.finish_reason.as_deref() {
            let mut stop = new_event(StreamEventType::MessageStop);
            stop.output_index = output_index;
            stop.finish_reason = Some(gemini_finish_reason_to_canonical(reason));
            stop.insert_extension(
                GEMINI,
                json!({"index": candidate_index, RAW_FINISH_KEY: reason}),
            );
            ctx.stamp(&mut stop, None);
            events.push(stop);
        }
    }
    Ok(events)
}

/// Encode a canonical event as a streamed generateContent payload.
///
/// # Errors
///
/// Returns [`GatewayError::InvalidArgument`] for events from another vendor
/// or with non-JSON tool-call arguments.
pub fn encode_event(event: &CanonicalStreamEvent) -> Result<Value, GatewayError> {
    ensure_source(GEMINI, &event.source)?;

    if let Some(error) = &event.error {
        return Ok(json!({
            "error": {
                "code": error.status.unwrap_or(500),
                "message": error.message,
                "status": error.kind.as_str().to_ascii_uppercase(),
            }
        }));
    }

    let mut extension = event
        .extension(GEMINI)
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();
    let index = extension
        .remove("index")
        .and_then(|index| index.as_u64())
        .and_then(|index| u32::try_from(index).ok())
        .unwrap_or_else(|| u32::try_from(event.output_index.max(0)).unwrap_or(0));
    let raw_finish = extension
        .remove(RAW_FINISH_KEY)
        .and_then(|reason| reason.as_str().map(str::to_owned));
    let (chunk_extra, candidate_extra): (JsonMap, JsonMap) = extension
        .into_iter()
        .partition(|(key, _)| CHUNK_FIELDS.contains(&key.as_str()));

    let usage_only = event.event_type == StreamEventType::MessageDelta
        && event.message.is_none()
        && event.finish_reason.is_none()
        && event.usage.is_some();

    let candidates = if usage_only {
        Vec::new()
    } else {
        let content = event
            .message
            .as_ref()
            .map(|message| {
                Ok::<_, GatewayError>(GeminiContent {
                    role: Some(
                        canonical_role_to_gemini(message.role.unwrap_or(CanonicalRole::Assistant))
                            .to_owned(),
                    ),
                    parts: encode_parts(&message.parts, &message.tool_calls)?,
                })
            })
            .transpose()?;
        vec![GeminiCandidate {
            content,
            finish_reason: raw_finish.or_else(|| {
                event
                    .finish_reason
                    .map(|reason| finish_reason_to_gemini(reason).to_owned())
            }),
            index: Some(index),
            extra: candidate_extra,
        }]
    };

    let wire = GeminiResponse {
        candidates,
        usage_metadata: event
            .usage
            .as_ref()
            .map(GeminiUsageMetadata::from_canonical),
        model_version: event.model.clone(),
        response_id: Some(event.response_id.clone()),
        extra: chunk_extra,
    };
    encode_wire(&wire, "gemini stream chunk")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::protocol::canonical::{ContentPart, FinishReason};

    fn decode(ctx: &mut StreamIndexContext, value: Value) -> Vec<CanonicalStreamEvent> {
        decode_chunk(&serde_json::to_vec(&value).unwrap(), ctx).unwrap()
    }

    #[test]
    fn test_two_candidates_one_finished_fan_out() {
        let mut ctx = StreamIndexContext::new();
        let events = decode(
            &mut ctx,
            json!({
                "responseId": "g1",
                "candidates": [
                    {"index": 0, "content": {"role": "model", "parts": [{"text": "A"}]}},
                    {"index": 1, "content": {"role": "model", "parts": [{"text": "B"}]}, "finishReason": "STOP"}
                ]
            }),
        );
        assert_eq!(events.len(), 3);
        assert_eq!(
            events.iter().map(|e| e.event_type).collect::<Vec<_>>(),
            vec![
                StreamEventType::MessageDelta,
                StreamEventType::MessageDelta,
                StreamEventType::MessageStop
            ]
        );
        assert_eq!(events[1].output_index, 1);
        assert_eq!(events[2].output_index, 1);
        assert_eq!(events[2].finish_reason, Some(FinishReason::Stop));
        assert_eq!(events[2].sequence_number, 2);
    }

    #[test]
    fn test_content_index_tracks_part_count() {
        let mut ctx = StreamIndexContext::new();
        let first = decode(
            &mut ctx,
            json!({"responseId": "g2", "candidates": [{"content": {"parts": [{"text": "a"}, {"text": "b"}]}}]}),
        );
        assert_eq!(first[0].content_index, 1);
        assert_eq!(first[0].message.as_ref().unwrap().content_text.as_deref(), Some("a\nb"));
        let second = decode(
            &mut ctx,
            json!({"responseId": "g2", "candidates": [{"content": {"parts": [{"text": "c"}]}}]}),
        );
        assert_eq!(second[0].item_id, first[0].item_id);
        assert_eq!(second[0].content_index, 1);
    }

    #[test]
    fn test_function_call_items() {
        let mut ctx = StreamIndexContext::new();
        let events = decode(
            &mut ctx,
            json!({"responseId": "g3", "candidates": [{"content": {"role": "model", "parts": [
                {"functionCall": {"id": "fc_1", "name": "lookup", "args": {"q": 1}}}
            ]}}]}),
        );
        assert_eq!(events[0].item_id, "g3:0:fc_1");
        let events = decode(
            &mut ctx,
            json!({"responseId": "g3", "candidates": [{"content": {"role": "model", "parts": [
                {"text": "x"}, {"functionCall": {"name": "other", "args": {}}}
            ]}}]}),
        );
        assert_eq!(events[0].item_id, "g3:0:call#1");
    }

    #[test]
    fn test_thought_parts_become_reasoning() {
        let mut ctx = StreamIndexContext::new();
        let events = decode(
            &mut ctx,
            json!({"responseId": "g4", "candidates": [{"content": {"parts": [{"text": "hmm", "thought": true}]}}]}),
        );
        let message = events[0].message.as_ref().unwrap();
        assert!(matches!(message.parts[0], ContentPart::Reasoning { .. }));
        assert!(message.content_text.is_none());
    }

    #[test]
    fn test_usage_only_chunk() {
        let mut ctx = StreamIndexContext::new();
        let events = decode(
            &mut ctx,
            json!({"responseId": "g5", "usageMetadata": {"promptTokenCount": 1, "totalTokenCount": 1}}),
        );
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].output_index, 0);
        let encoded = encode_event(&events[0]).unwrap();
        assert_eq!(encoded["candidates"], json!([]));
        assert_eq!(encoded["usageMetadata"]["promptTokenCount"], 1);
    }

    #[test]
    fn test_chunk_round_trip() {
        let original = json!({
            "responseId": "g6",
            "modelVersion": "gemini-2.0-flash",
            "candidates": [{
                "index": 0,
                "content": {"role": "model", "parts": [{"text": "Hel"}]},
                "safetyRatings": [{"category": "HARM_CATEGORY_HARASSMENT", "probability": "NEGLIGIBLE"}]
            }]
        });
        let mut ctx = StreamIndexContext::new();
        let events = decode(&mut ctx, original.clone());
        assert_eq!(encode_event(&events[0]).unwrap(), original);

        let stop = json!({"responseId": "g6", "candidates": [{"index": 0, "finishReason": "RECITATION"}]});
        let events = decode(&mut ctx, stop);
        assert_eq!(events[1].finish_reason, Some(FinishReason::ContentFilter));
        let encoded = encode_event(&events[1]).unwrap();
        assert_eq!(encoded["candidates"][0]["finishReason"], "RECITATION");
    }

    #[test]
    fn test_malformed_chunk() {
        let mut ctx = StreamIndexContext::new();
        let err = decode_chunk(b"{\"candidates\": {}}", &mut ctx).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StreamError);
    }
}
