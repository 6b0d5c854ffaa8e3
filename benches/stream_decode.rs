use criterion::{black_box, criterion_group, criterion_main, Criterion};
use serde_json::json;

use llmbridge::protocol::canonical::{CanonicalStreamEvent, StreamEventType};
use llmbridge::protocol::{
    encode_events_as_sse, Converter, GeminiConverter, OpenAiChatConverter,
};
use llmbridge::stream::{SseLine, SseLineDecoder, StreamIndexContext};

fn openai_body(chunks: usize) -> String {
    let mut body = String::new();
    for i in 0..chunks {
        let chunk = json!({
            "id": "chatcmpl-bench",
            "object": "chat.completion.chunk",
            "model": "gpt-4o-mini",
            "choices": [{"index": 0, "delta": {"content": format!("token-{i} ")}}]
        });
        body.push_str(&format!("data: {chunk}\n\n"));
    }
    body.push_str("data: [DONE]\n\n");
    body
}

fn gemini_chunk() -> Vec<u8> {
    serde_json::to_vec(&json!({
        "responseId": "g-bench",
        "modelVersion": "gemini-2.0-flash",
        "candidates": [
            {"index": 0, "content": {"role": "model", "parts": [{"text": "alpha"}]}},
            {"index": 1, "content": {"role": "model", "parts": [{"text": "beta"}]}, "finishReason": "STOP"}
        ]
    }))
    .unwrap_or_default()
}

fn decode_lines(body: &[u8], split: usize) -> Vec<SseLine> {
    let mut decoder = SseLineDecoder::new();
    let mut lines = Vec::new();
    for piece in body.chunks(split) {
        decoder.feed(piece, &mut lines).unwrap();
    }
    decoder.finish(&mut lines).unwrap();
    lines
}

fn decode_events(converter: &dyn Converter, lines: &[SseLine]) -> Vec<CanonicalStreamEvent> {
    let mut ctx = StreamIndexContext::new();
    let mut events = Vec::new();
    for line in lines {
        if let SseLine::Data(payload) = line {
            events.extend(converter.chunk_to_events(payload.as_bytes(), &mut ctx).unwrap());
        }
    }
    events
}

fn bench_sse_decoder(c: &mut Criterion) {
    let body = openai_body(200);
    c.bench_function("sse_decoder_200_chunks_256b_reads", |b| {
        b.iter(|| black_box(decode_lines(black_box(body.as_bytes()), 256)));
    });
    c.bench_function("sse_decoder_200_chunks_single_read", |b| {
        b.iter(|| black_box(decode_lines(black_box(body.as_bytes()), body.len())));
    });
}

fn bench_chunk_to_events(c: &mut Criterion) {
    let openai = OpenAiChatConverter;
    let lines = decode_lines(openai_body(200).as_bytes(), 4096);
    c.bench_function("openai_chunk_to_events_200", |b| {
        b.iter(|| black_box(decode_events(&openai, black_box(&lines))));
    });

    let gemini = GeminiConverter;
    let chunk = gemini_chunk();
    c.bench_function("gemini_chunk_to_events_two_candidates", |b| {
        b.iter(|| {
            let mut ctx = StreamIndexContext::new();
            black_box(gemini.chunk_to_events(black_box(&chunk), &mut ctx).unwrap())
        });
    });
}

fn bench_re_emit(c: &mut Criterion) {
    let openai = OpenAiChatConverter;
    let lines = decode_lines(openai_body(200).as_bytes(), 4096);
    let events = decode_events(&openai, &lines);
    assert!(events
        .iter()
        .all(|event| event.event_type == StreamEventType::MessageDelta));
    c.bench_function("openai_re_emit_200_events", |b| {
        b.iter(|| black_box(encode_events_as_sse(&openai, black_box(&events)).unwrap()));
    });
}

criterion_group!(benches, bench_sse_decoder, bench_chunk_to_events, bench_re_emit);
criterion_main!(benches);
