mod common;

use client_coach::llm::chat::openai::OpenAICompatClient;
use client_coach::llm::chat::{ collect_response, ChatClient, ChatError };
use client_coach::llm::LlmType;
use client_coach::models::chat::Turn;
use common::canned_http;
use futures::StreamExt;
use std::time::Duration;

fn client_for(addr: std::net::SocketAddr) -> OpenAICompatClient {
    OpenAICompatClient::new(
        LlmType::OpenAI,
        Some("test-key".to_string()),
        Some("test-model".to_string()),
        Some(format!("http://{}/v1/", addr)),
        None,
        None
    ).unwrap()
}

#[tokio::test]
async fn streams_deltas_split_across_network_chunks() {
    let chunks = vec![
        "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\",\"content\":\"Thank \"}}]}\n\ndata: {\"cho".to_string(),
        "ices\":[{\"delta\":{\"content\":\"you for \"}}]}\n\n: ping\n\n".to_string(),
        "data: {\"choices\":[{\"delta\":{\"content\":\"your patience.\"},\"finish_reason\":\"stop\"}]}\n\n".to_string(),
        "data: [DONE]\n\n".to_string()
    ];
    let (addr, mut requests) = canned_http("200 OK", "text/event-stream", chunks).await;
    let client = client_for(addr);

    let fragments: Vec<String> = client
        .stream_chat("Be polite.", &[Turn::user("stop bugging me!!")])
        .map(|item| item.unwrap())
        .collect().await;
    assert_eq!(fragments, vec!["Thank ", "you for ", "your patience."]);

    let raw = requests.recv().await.unwrap();
    let lowered = raw.to_lowercase();
    assert!(raw.starts_with("POST /v1/chat/completions "));
    assert!(lowered.contains("authorization: bearer test-key"));
    assert!(raw.contains(r#""stream":true"#));
    assert!(raw.contains(r#"{"role":"system","content":"Be polite."}"#));
    assert!(raw.contains(r#"{"role":"user","content":"stop bugging me!!"}"#));
}

#[tokio::test]
async fn request_is_not_sent_until_polled() {
    let chunks = vec!["data: {\"choices\":[{\"delta\":{\"content\":\"ok\"}}]}\n\ndata: [DONE]\n\n".to_string()];
    let (addr, mut requests) = canned_http("200 OK", "text/event-stream", chunks).await;
    let client = client_for(addr);

    let stream = client.stream_chat("Be polite.", &[Turn::user("hi")]);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(requests.try_recv().is_err());

    assert_eq!(collect_response(stream).await.unwrap(), "ok");
    assert!(requests.recv().await.is_some());
}

#[tokio::test]
async fn error_status_ends_stream_with_single_error() {
    let chunks = vec![r#"{"error":{"message":"API key not valid"}}"#.to_string()];
    let (addr, _requests) = canned_http("401 Unauthorized", "application/json", chunks).await;
    let client = client_for(addr);

    let items: Vec<Result<String, ChatError>> = client
        .stream_chat("Be polite.", &[Turn::user("hi")])
        .collect().await;
    assert_eq!(items.len(), 1);
    match &items[0] {
        Err(ChatError::Status { status, body }) => {
            assert_eq!(*status, 401);
            assert!(body.contains("API key not valid"));
        }
        other => panic!("expected status error, got {:?}", other),
    }
}

#[tokio::test]
async fn malformed_event_is_terminal() {
    let chunks = vec![
        "data: {\"choices\":[{\"delta\":{\"content\":\"Dear\"}}]}\n\n".to_string(),
        "data: {not json}\n\n".to_string(),
        "data: {\"choices\":[{\"delta\":{\"content\":\"lost\"}}]}\n\n".to_string()
    ];
    let (addr, _requests) = canned_http("200 OK", "text/event-stream", chunks).await;
    let client = client_for(addr);

    let items: Vec<Result<String, ChatError>> = client
        .stream_chat("Be polite.", &[Turn::user("hi")])
        .collect().await;
    assert_eq!(items.len(), 2);
    assert_eq!(items[0].as_ref().unwrap(), "Dear");
    assert!(matches!(items[1], Err(ChatError::Decode(_))));
}

#[tokio::test]
async fn complete_returns_whole_message() {
    let chunks = vec![
        r#"{"choices":[{"index":0,"message":{"role":"assistant","content":"Thanks for reaching out."}}]}"#.to_string()
    ];
    let (addr, mut requests) = canned_http("200 OK", "application/json", chunks).await;
    let client = client_for(addr);

    let text = client.complete("Be polite.", &[Turn::user("hi")]).await.unwrap();
    assert_eq!(text, "Thanks for reaching out.");
    assert!(requests.recv().await.unwrap().contains(r#""stream":false"#));
}
