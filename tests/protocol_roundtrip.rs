use std::convert::Infallible;
use std::sync::Arc;

use bytes::Bytes;
use llmbridge::protocol::canonical::{
    CanonicalRole, CanonicalStreamEvent, FinishReason, StreamEventType,
};
use llmbridge::protocol::{encode_events_as_sse, Converter, GeminiConverter, OpenAiChatConverter};
use llmbridge::stream::{spawn_event_stream, SseLine, SseLineDecoder, StreamIndexContext};
use llmbridge::ErrorKind;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

fn openai_request() -> Value {
    json!({
        "model": "gpt-4o-mini",
        "messages": [
            {"role": "system", "content": "be brief"},
            {"role": "user", "content": "What is the capital of Norway?"},
            {"role": "assistant", "content": "Oslo."},
            {"role": "user", "content": "And Sweden?"}
        ],
        "temperature": 0.2,
        "top_p": 0.9,
        "max_tokens": 64,
        "stop": ["END"],
        "tools": [{
            "type": "function",
            "function": {
                "name": "lookup",
                "description": "Look up a capital",
                "parameters": {"type": "object", "properties": {"country": {"type": "string"}}}
            }
        }]
    })
}

fn transcript(request: &llmbridge::protocol::canonical::CanonicalRequest) -> Vec<(CanonicalRole, String)> {
    request
        .messages
        .iter()
        .map(|message| (message.role, message.joined_text()))
        .collect()
}

#[test]
fn test_request_survives_openai_to_gemini_and_back() {
    let openai = OpenAiChatConverter;
    let gemini = GeminiConverter;
    let body = serde_json::to_vec(&openai_request()).unwrap();

    let canonical = openai.request_to_contract(&body).unwrap();
    let gemini_wire = gemini.request_from_contract(&canonical).unwrap();
    assert_eq!(gemini_wire["systemInstruction"]["parts"][0]["text"], "be brief");
    assert_eq!(gemini_wire["contents"][1]["role"], "model");

    let back = gemini
        .request_to_contract(&serde_json::to_vec(&gemini_wire).unwrap())
        .unwrap();
    assert_eq!(back.model, "gpt-4o-mini");
    assert_eq!(transcript(&back), transcript(&canonical));
    assert_eq!(back.sampling.temperature, Some(0.2));
    assert_eq!(back.sampling.top_p, Some(0.9));
    assert_eq!(back.sampling.max_tokens, Some(64));
    assert_eq!(back.sampling.stop, vec!["END".to_string()]);
    assert_eq!(back.tools.len(), 1);
    assert_eq!(back.tools[0].name, "lookup");
    assert_eq!(back.tools[0].parameters, canonical.tools[0].parameters);
}

#[test]
fn test_request_survives_openai_round_trip() {
    let openai = OpenAiChatConverter;
    let body = serde_json::to_vec(&openai_request()).unwrap();
    let canonical = openai.request_to_contract(&body).unwrap();
    let wire = openai.request_from_contract(&canonical).unwrap();
    let again = openai
        .request_to_contract(&serde_json::to_vec(&wire).unwrap())
        .unwrap();
    assert_eq!(again.model, canonical.model);
    assert_eq!(transcript(&again), transcript(&canonical));
    assert_eq!(again.sampling, canonical.sampling);
    assert_eq!(again.tools, canonical.tools);
}

fn text_of(events: &[CanonicalStreamEvent]) -> String {
    events
        .iter()
        .filter_map(|event| event.message.as_ref())
        .flat_map(|message| message.parts.iter())
        .filter_map(|part| part.as_text())
        .collect()
}

async fn decode_sse(converter: Arc<dyn Converter>, text: String) -> Vec<CanonicalStreamEvent> {
    let body = futures_util::stream::iter(vec![Ok::<_, Infallible>(Bytes::from(text))]);
    let mut stream = spawn_event_stream(body, converter, CancellationToken::new(), 8);
    let mut events = Vec::new();
    while let Some(event) = stream.recv().await {
        events.push(event);
    }
    stream.finish().await.unwrap();
    events
}

#[tokio::test]
async fn test_stream_events_re_emit_as_openai_sse() {
    let upstream = [
        json!({"id": "chatcmpl-9", "model": "gpt-4o-mini",
               "choices": [{"index": 0, "delta": {"role": "assistant", "content": "Stock"}}]}),
        json!({"id": "chatcmpl-9", "model": "gpt-4o-mini",
               "choices": [{"index": 0, "delta": {"content": "holm"}, "finish_reason": "stop"}]}),
    ]
    .iter()
    .map(|chunk| format!("data: {chunk}\n\n"))
    .collect::<String>()
        + "data: [DONE]\n\n";

    let openai: Arc<dyn Converter> = Arc::new(OpenAiChatConverter);
    let events = decode_sse(Arc::clone(&openai), upstream).await;
    assert_eq!(text_of(&events), "Stockholm");

    let re_emitted = encode_events_as_sse(openai.as_ref(), &events).unwrap();
    assert!(re_emitted.ends_with("data: [DONE]\n\n"));

    let mut decoder = SseLineDecoder::new();
    let mut lines = Vec::new();
    decoder.feed(re_emitted.as_bytes(), &mut lines).unwrap();
    decoder.finish(&mut lines).unwrap();
    assert!(matches!(lines.last(), Some(SseLine::Done)));

    let mut ctx = StreamIndexContext::new();
    let mut again = Vec::new();
    for line in &lines {
        if let SseLine::Data(payload) = line {
            again.extend(openai.chunk_to_events(payload.as_bytes(), &mut ctx).unwrap());
        }
    }
    assert_eq!(text_of(&again), "Stockholm");
    assert!(again.iter().all(|event| event.response_id == "chatcmpl-9"));
    let stop = again
        .iter()
        .find(|event| event.event_type == StreamEventType::MessageStop)
        .unwrap();
    assert_eq!(stop.finish_reason, Some(FinishReason::Stop));
}

#[tokio::test]
async fn test_gemini_events_cannot_be_encoded_as_openai() {
    let upstream = format!(
        "data: {}\n\n",
        json!({"responseId": "g-2", "candidates": [
            {"index": 0, "content": {"role": "model", "parts": [{"text": "hi"}]}}
        ]})
    );
    let events = decode_sse(Arc::new(GeminiConverter), upstream).await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].source, "gemini");

    let err = encode_events_as_sse(&OpenAiChatConverter, &events).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);

    let gemini_sse = encode_events_as_sse(&GeminiConverter, &events).unwrap();
    assert!(gemini_sse.starts_with("data: "));
    assert!(!gemini_sse.contains("[DONE]"));
}
