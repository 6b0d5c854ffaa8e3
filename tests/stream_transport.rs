use std::collections::BTreeMap;
use std::convert::Infallible;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, HeaderMap, StatusCode, Uri};
use axum::response::Response;
use axum::routing::post;
use axum::{Json, Router};
use bytes::Bytes;
use futures_util::StreamExt;
use llmbridge::config::{AppConfig, ChannelConfig, LoggingConfig, TransportConfig};
use llmbridge::gateway::Gateway;
use llmbridge::protocol::canonical::{
    CanonicalMessage, CanonicalRequest, CanonicalRole, CanonicalStreamEvent, FinishReason,
    StreamEventType,
};
use llmbridge::protocol::{Converter, OpenAiChatConverter};
use llmbridge::provider::{Adapter, ProviderRegistry, RequestOptions};
use llmbridge::stream::{spawn_event_stream, StreamEnd, TrackedBody};
use llmbridge::ErrorKind;
use serde_json::{json, Value};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

fn sse_response(frames: Vec<String>) -> Response {
    let stream = futures_util::stream::iter(
        frames
            .into_iter()
            .map(|frame| Ok::<_, Infallible>(Bytes::from(frame))),
    );
    Response::builder()
        .header(header::CONTENT_TYPE, "text/event-stream")
        .body(Body::from_stream(stream))
        .expect("build sse response")
}

fn data(value: &Value) -> String {
    format!("data: {value}\n\n")
}

fn openai_delta(id: &str, content: &str) -> String {
    data(&json!({
        "id": id,
        "object": "chat.completion.chunk",
        "created": 1_727_000_000_u64,
        "model": "gpt-4o-mini",
        "choices": [{"index": 0, "delta": {"content": content}}]
    }))
}

async fn spawn_upstream(app: Router) -> (String, JoinHandle<()>) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind mock upstream");
    let addr = listener.local_addr().expect("local addr");
    let server = tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    (format!("http://{addr}"), server)
}

fn channel(name: &str, provider: &str, base_url: String) -> ChannelConfig {
    ChannelConfig {
        name: name.to_string(),
        provider: provider.to_string(),
        base_url,
        api_key: "upstream-secret".to_string(),
        headers: BTreeMap::from([("x-channel".to_string(), "mock".to_string())]),
        proxy: None,
        api_version: None,
    }
}

fn adapter_for(provider: &str, base_url: String) -> Arc<Adapter> {
    let registry = ProviderRegistry::with_builtins();
    let config = AppConfig {
        transport: TransportConfig {
            stream_channel_capacity: 4,
            ..TransportConfig::default()
        },
        logging: LoggingConfig::default(),
        channels: vec![channel("mock", provider, base_url)],
    };
    let gateway = Gateway::from_config(&config, &registry).expect("build gateway");
    gateway.adapter("mock").expect("mock adapter")
}

fn user_request(model: &str) -> CanonicalRequest {
    CanonicalRequest::new(
        model,
        vec![CanonicalMessage::text(CanonicalRole::User, "ping")],
    )
}

async fn drain(stream: &mut llmbridge::stream::CanonicalEventStream) -> Vec<CanonicalStreamEvent> {
    let mut events = Vec::new();
    while let Some(event) = tokio::time::timeout(Duration::from_secs(5), stream.recv())
        .await
        .expect("event within timeout")
    {
        events.push(event);
    }
    events
}

#[tokio::test]
async fn test_stream_ending_with_done_has_no_error_event() {
    let seen: Arc<Mutex<Option<(HeaderMap, Value)>>> = Arc::default();
    let captured = Arc::clone(&seen);
    let app = Router::new().route(
        "/v1/chat/completions",
        post(move |headers: HeaderMap, Json(body): Json<Value>| {
            let captured = Arc::clone(&captured);
            async move {
                *captured.lock().expect("capture lock") = Some((headers, body));
                sse_response(vec![
                    openai_delta("chatcmpl-1", "Hel"),
                    openai_delta("chatcmpl-1", "lo"),
                    data(&json!({
                        "id": "chatcmpl-1",
                        "choices": [{"index": 0, "delta": {}, "finish_reason": "stop"}]
                    })),
                    data(&json!({
                        "id": "chatcmpl-1",
                        "choices": [],
                        "usage": {"prompt_tokens": 3, "completion_tokens": 2, "total_tokens": 5}
                    })),
                    "data: [DONE]\n\n".to_string(),
                ])
            }
        }),
    );
    let (base_url, server) = spawn_upstream(app).await;
    let adapter = adapter_for("openai", format!("{base_url}/v1"));

    let mut caller_headers = HeaderMap::new();
    caller_headers.insert("x-request-id", "req-1".parse().expect("header value"));
    caller_headers.insert("x-channel", "caller".parse().expect("header value"));
    let options = RequestOptions {
        headers: caller_headers,
        ..RequestOptions::default()
    };
    let mut stream = adapter
        .stream(&user_request("gpt-4o-mini"), &options)
        .await
        .expect("open stream");
    let events = drain(&mut stream).await;

    assert!(events.iter().all(|event| !event.is_error()));
    assert_eq!(events.len(), 5);
    assert!(events
        .windows(2)
        .all(|pair| pair[0].sequence_number < pair[1].sequence_number));
    assert!(events.iter().all(|event| event.response_id == "chatcmpl-1"));
    assert!(events.iter().all(|event| event.output_index == 0));
    assert_eq!(events[0].item_id, events[1].item_id);
    assert_eq!(events[3].event_type, StreamEventType::MessageStop);
    assert_eq!(events[3].finish_reason, Some(FinishReason::Stop));
    assert_eq!(events[4].usage.as_ref().expect("usage").total_tokens, Some(5));

    let summary = stream.finish().await.expect("clean finish");
    assert_eq!(summary.end, StreamEnd::Sentinel);

    let (headers, body) = seen.lock().expect("capture lock").take().expect("request seen");
    assert_eq!(headers["authorization"], "Bearer upstream-secret");
    assert_eq!(headers["x-request-id"], "req-1");
    assert_eq!(headers["x-channel"], "mock");
    assert_eq!(body["stream"], true);
    assert_eq!(body["stream_options"]["include_usage"], true);

    server.abort();
}

#[tokio::test]
async fn test_non_2xx_is_request_failed_with_sanitized_message() {
    let app = Router::new().route(
        "/v1/chat/completions",
        post(|| async {
            Response::builder()
                .status(StatusCode::BAD_GATEWAY)
                .header(header::CONTENT_TYPE, "text/html")
                .body(Body::from(
                    "<html><head><title>502 Bad Gateway</title></head><body><p>upstream down</p></body></html>",
                ))
                .expect("build error response")
        }),
    );
    let (base_url, server) = spawn_upstream(app).await;
    let adapter = adapter_for("openai", format!("{base_url}/v1"));

    let err = adapter
        .stream(&user_request("gpt-4o-mini"), &RequestOptions::default())
        .await
        .expect_err("non-2xx must fail");
    assert_eq!(err.kind(), ErrorKind::RequestFailed);
    assert_eq!(err.upstream_status(), Some(502));
    assert_eq!(err.http_status(), StatusCode::BAD_GATEWAY);
    assert!(err.to_string().contains("502 Bad Gateway: upstream down"));
    assert_eq!(err.context().get("channel"), Some("mock"));

    let err = adapter
        .complete(&user_request("gpt-4o-mini"), &RequestOptions::default())
        .await
        .expect_err("non-2xx must fail");
    assert_eq!(err.kind(), ErrorKind::RequestFailed);

    server.abort();
}

#[tokio::test]
async fn test_parse_error_is_delivered_as_final_event() {
    let app = Router::new().route(
        "/v1/chat/completions",
        post(|| async {
            sse_response(vec![
                openai_delta("chatcmpl-2", "ok"),
                "data: {\"id\": oops}\n\n".to_string(),
                openai_delta("chatcmpl-2", "never"),
            ])
        }),
    );
    let (base_url, server) = spawn_upstream(app).await;
    let adapter = adapter_for("openai", format!("{base_url}/v1"));

    let mut stream = adapter
        .stream(&user_request("gpt-4o-mini"), &RequestOptions::default())
        .await
        .expect("open stream");
    let events = drain(&mut stream).await;
    assert_eq!(events.len(), 2);
    let last = events.last().expect("error event");
    assert!(last.is_error());
    let error = last.error.as_ref().expect("error payload");
    assert_eq!(error.kind, ErrorKind::StreamError);
    assert_eq!(last.response_id, "chatcmpl-2");
    assert!(last.sequence_number > events[0].sequence_number);

    let err = stream.finish().await.expect_err("stream error");
    assert_eq!(err.kind(), ErrorKind::StreamError);
    assert!(err.context().get("payload").expect("payload").contains("oops"));

    server.abort();
}

#[tokio::test]
async fn test_empty_body_is_stream_error() {
    let app = Router::new().route(
        "/v1/chat/completions",
        post(|| async { sse_response(Vec::new()) }),
    );
    let (base_url, server) = spawn_upstream(app).await;
    let adapter = adapter_for("openai", format!("{base_url}/v1"));

    let mut stream = adapter
        .stream(&user_request("gpt-4o-mini"), &RequestOptions::default())
        .await
        .expect("open stream");
    let events = drain(&mut stream).await;
    assert_eq!(events.len(), 1);
    assert!(events[0].is_error());
    let err = stream.finish().await.expect_err("empty body");
    assert_eq!(err.kind(), ErrorKind::StreamError);
    assert!(err.to_string().contains("empty stream body"));

    server.abort();
}

#[tokio::test]
async fn test_eof_without_sentinel_is_clean() {
    let app = Router::new().route(
        "/v1/chat/completions",
        post(|| async {
            sse_response(vec![
                ": keep-alive\n\n".to_string(),
                openai_delta("chatcmpl-3", "a"),
                "event: ignored\n\n".to_string(),
                openai_delta("chatcmpl-3", "b"),
            ])
        }),
    );
    let (base_url, server) = spawn_upstream(app).await;
    let adapter = adapter_for("openai", format!("{base_url}/v1"));

    let mut stream = adapter
        .stream(&user_request("gpt-4o-mini"), &RequestOptions::default())
        .await
        .expect("open stream");
    let events = drain(&mut stream).await;
    assert_eq!(events.len(), 2);
    let summary = stream.finish().await.expect("clean finish");
    assert_eq!(summary.end, StreamEnd::Eof);
    assert_eq!(summary.chunks, 2);

    server.abort();
}

struct DropCounter(Arc<AtomicUsize>);

impl Drop for DropCounter {
    fn drop(&mut self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn test_cancel_after_first_event_releases_upstream_body() {
    let dropped = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&dropped);
    let app = Router::new().route(
        "/v1/chat/completions",
        post(move || {
            let guard = DropCounter(Arc::clone(&counter));
            async move {
                let first = futures_util::stream::iter(vec![Ok::<_, Infallible>(Bytes::from(
                    openai_delta("chatcmpl-4", "first"),
                ))]);
                let pings = futures_util::stream::unfold(guard, |guard| async move {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    Some((Ok::<_, Infallible>(Bytes::from_static(b": ping\n\n")), guard))
                });
                Response::builder()
                    .header(header::CONTENT_TYPE, "text/event-stream")
                    .body(Body::from_stream(first.chain(pings)))
                    .expect("build sse response")
            }
        }),
    );
    let (base_url, server) = spawn_upstream(app).await;
    let adapter = adapter_for("openai", format!("{base_url}/v1"));

    let cancel = CancellationToken::new();
    let options = RequestOptions {
        cancel: Some(cancel.clone()),
        ..RequestOptions::default()
    };
    let mut stream = adapter
        .stream(&user_request("gpt-4o-mini"), &options)
        .await
        .expect("open stream");
    let first = stream.recv().await.expect("first event");
    assert_eq!(first.response_id, "chatcmpl-4");

    cancel.cancel();
    let rest = drain(&mut stream).await;
    assert!(rest.iter().all(|event| !event.is_error()));
    let err = stream.finish().await.expect_err("cancelled");
    assert_eq!(err.kind(), ErrorKind::Aborted);

    let mut released = false;
    for _ in 0..250 {
        if dropped.load(Ordering::SeqCst) == 1 {
            released = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(released, "upstream body was not released");
    assert_eq!(dropped.load(Ordering::SeqCst), 1);

    server.abort();
}

#[tokio::test]
async fn test_response_body_released_once_on_every_exit_path() {
    let app = Router::new()
        .route(
            "/done",
            post(|| async { sse_response(vec![openai_delta("a", "x"), "data: [DONE]\n\n".into()]) }),
        )
        .route(
            "/broken",
            post(|| async { sse_response(vec![openai_delta("b", "x"), "data: nope\n\n".into()]) }),
        )
        .route(
            "/slow",
            post(|| async {
                let first = futures_util::stream::iter(vec![Ok::<_, Infallible>(Bytes::from(
                    openai_delta("c", "x"),
                ))]);
                let rest = futures_util::stream::unfold((), |()| async {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    Some((Ok::<_, Infallible>(Bytes::from_static(b"\n")), ()))
                });
                Response::builder()
                    .body(Body::from_stream(first.chain(rest)))
                    .expect("build response")
            }),
        );
    let (base_url, server) = spawn_upstream(app).await;
    let client = reqwest::Client::new();

    for (path, expect_error) in [("/done", None), ("/broken", Some(ErrorKind::StreamError)), ("/slow", Some(ErrorKind::Aborted))] {
        let releases = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&releases);
        let response = client
            .post(format!("{base_url}{path}"))
            .send()
            .await
            .expect("send");
        let body = TrackedBody::new(response.bytes_stream(), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let converter: Arc<dyn Converter> = Arc::new(OpenAiChatConverter);
        let mut stream = spawn_event_stream(body, converter, CancellationToken::new(), 2);
        stream.recv().await.expect("first event");
        if path == "/slow" {
            stream.cancel();
        } else {
            drain(&mut stream).await;
        }
        let result = stream.finish().await;
        assert_eq!(result.err().map(|err| err.kind()), expect_error, "{path}");
        assert_eq!(releases.load(Ordering::SeqCst), 1, "{path}");
    }

    server.abort();
}

#[tokio::test]
async fn test_gemini_multi_candidate_stream() {
    let seen_key: Arc<Mutex<Option<(String, Option<String>)>>> = Arc::default();
    let captured = Arc::clone(&seen_key);
    let app = Router::new().route(
        "/v1beta/models/gemini-2.0-flash:streamGenerateContent",
        post(move |uri: Uri, headers: HeaderMap| {
            let captured = Arc::clone(&captured);
            async move {
                let key = headers
                    .get("x-goog-api-key")
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or_default()
                    .to_string();
                *captured.lock().expect("capture lock") =
                    Some((key, uri.query().map(str::to_string)));
                sse_response(vec![
                    data(&json!({
                        "responseId": "g-1",
                        "candidates": [
                            {"index": 0, "content": {"role": "model", "parts": [{"text": "A"}]}},
                            {"index": 1, "content": {"role": "model", "parts": [{"text": "B"}]}, "finishReason": "STOP"}
                        ]
                    })),
                    data(&json!({
                        "responseId": "g-1",
                        "candidates": [
                            {"index": 0, "content": {"role": "model", "parts": [{"text": "A2"}]}, "finishReason": "MAX_TOKENS"}
                        ],
                        "usageMetadata": {"promptTokenCount": 2, "candidatesTokenCount": 3, "totalTokenCount": 5}
                    })),
                ])
            }
        }),
    );
    let (base_url, server) = spawn_upstream(app).await;
    let adapter = adapter_for("gemini", base_url);

    let mut stream = adapter
        .stream(&user_request("gemini-2.0-flash"), &RequestOptions::default())
        .await
        .expect("open stream");
    let events = drain(&mut stream).await;
    assert_eq!(events.len(), 5);
    let slots: Vec<i64> = events.iter().map(|event| event.output_index).collect();
    assert_eq!(slots, vec![0, 1, 1, 0, 0]);
    assert_eq!(events[2].event_type, StreamEventType::MessageStop);
    assert_eq!(events[4].finish_reason, Some(FinishReason::Length));
    assert_eq!(events[0].item_id, events[3].item_id);
    assert_ne!(events[0].item_id, events[1].item_id);
    stream.finish().await.expect("clean finish");

    let (key, query) = seen_key.lock().expect("capture lock").take().expect("request seen");
    assert_eq!(key, "upstream-secret");
    assert_eq!(query.as_deref(), Some("alt=sse"));

    server.abort();
}

#[tokio::test]
async fn test_complete_decodes_response() {
    let app = Router::new().route(
        "/v1/chat/completions",
        post(|Json(body): Json<Value>| async move {
            assert!(body.get("stream").is_none());
            Json(json!({
                "id": "chatcmpl-5",
                "object": "chat.completion",
                "created": 1_727_000_000_u64,
                "model": "gpt-4o-mini",
                "choices": [{"index": 0, "message": {"role": "assistant", "content": "pong"}, "finish_reason": "stop"}],
                "usage": {"prompt_tokens": 5, "completion_tokens": 2, "total_tokens": 7}
            }))
        }),
    );
    let (base_url, server) = spawn_upstream(app).await;
    let adapter = adapter_for("openai", format!("{base_url}/v1/"));

    let response = adapter
        .complete(&user_request("gpt-4o-mini"), &RequestOptions::default())
        .await
        .expect("complete");
    assert_eq!(response.id, "chatcmpl-5");
    assert_eq!(response.source, "openai");
    assert_eq!(response.choices[0].message.joined_text(), "pong");
    assert_eq!(response.choices[0].finish_reason, Some(FinishReason::Stop));

    server.abort();
}

#[tokio::test]
async fn test_undecodable_success_body_is_internal() {
    let app = Router::new().route(
        "/v1/chat/completions",
        post(|| async { "definitely not json" }),
    );
    let (base_url, server) = spawn_upstream(app).await;
    let adapter = adapter_for("openai", format!("{base_url}/v1"));

    let err = adapter
        .complete(&user_request("gpt-4o-mini"), &RequestOptions::default())
        .await
        .expect_err("bad body");
    assert_eq!(err.kind(), ErrorKind::Internal);
    assert_eq!(err.context().get("payload"), Some("definitely not json"));

    server.abort();
}

#[tokio::test]
async fn test_unreachable_upstream_is_unavailable() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("local addr");
    drop(listener);
    let adapter = adapter_for("openai", format!("http://{addr}/v1"));

    let err = adapter
        .stream(&user_request("gpt-4o-mini"), &RequestOptions::default())
        .await
        .expect_err("nothing listening");
    assert_eq!(err.kind(), ErrorKind::Unavailable);
    assert_eq!(err.http_status(), StatusCode::SERVICE_UNAVAILABLE);
}
