#![allow(dead_code)]

use async_trait::async_trait;
use client_coach::llm::chat::{ ChatClient, ChatError, FragmentStream };
use client_coach::models::chat::Turn;
use futures::stream;
use std::net::SocketAddr;
use std::sync::{ Arc, Mutex };
use std::time::Duration;
use tokio::io::{ AsyncReadExt, AsyncWriteExt };
use tokio::net::TcpListener;
use tokio::sync::mpsc;

/// Replies "Dear client, ... (reply N)" in word-sized fragments, or fails
/// every request when built with `failing`.
pub struct MockCoachClient {
    pub requests: Mutex<Vec<(String, Vec<Turn>)>>,
    fail: bool,
}

impl MockCoachClient {
    pub fn new() -> Arc<Self> {
        Arc::new(Self { requests: Mutex::new(Vec::new()), fail: false })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self { requests: Mutex::new(Vec::new()), fail: true })
    }

    pub fn reply_for(turns: &[Turn]) -> String {
        format!("Dear client, thank you for your message. (reply {})", turns.len() / 2 + 1)
    }
}

#[async_trait]
impl ChatClient for MockCoachClient {
    fn stream_chat(&self, instructions: &str, turns: &[Turn]) -> FragmentStream {
        self.requests.lock().unwrap().push((instructions.to_string(), turns.to_vec()));
        if self.fail {
            let items: Vec<Result<String, ChatError>> = vec![
                Err(ChatError::Status { status: 401, body: "API key not valid".to_string() })
            ];
            return Box::pin(stream::iter(items));
        }
        let fragments: Vec<Result<String, ChatError>> = Self::reply_for(turns)
            .split_inclusive(' ')
            .map(|w| Ok(w.to_string()))
            .collect();
        Box::pin(stream::iter(fragments))
    }

    fn model(&self) -> &str {
        "mock-model"
    }

    fn base_url(&self) -> &str {
        "http://mock.invalid"
    }
}

fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

fn content_length(headers: &str) -> usize {
    headers
        .lines()
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse().ok())
        .unwrap_or(0)
}

/// A one-response-per-connection HTTP server. Each raw request (headers and
/// body) is forwarded on the returned channel; the response body is written
/// chunk by chunk with a short pause so the client sees separate reads.
pub async fn canned_http(
    status_line: &'static str,
    content_type: &'static str,
    chunks: Vec<String>
) -> (SocketAddr, mpsc::UnboundedReceiver<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                return;
            };
            let chunks = chunks.clone();
            let tx = tx.clone();
            tokio::spawn(async move {
                let mut buf = Vec::new();
                let mut tmp = [0u8; 4096];
                let mut expected_total = None;
                loop {
                    let n = socket.read(&mut tmp).await.unwrap_or(0);
                    if n == 0 {
                        break;
                    }
                    buf.extend_from_slice(&tmp[..n]);
                    if expected_total.is_none() {
                        if let Some(end) = find_header_end(&buf) {
                            let headers = String::from_utf8_lossy(&buf[..end]).to_string();
                            expected_total = Some(end + 4 + content_length(&headers));
                        }
                    }
                    if matches!(expected_total, Some(total) if buf.len() >= total) {
                        break;
                    }
                }
                let _ = tx.send(String::from_utf8_lossy(&buf).to_string());

                let head = format!(
                    "HTTP/1.1 {}\r\nContent-Type: {}\r\nConnection: close\r\n\r\n",
                    status_line,
                    content_type
                );
                if socket.write_all(head.as_bytes()).await.is_err() {
                    return;
                }
                for chunk in chunks {
                    if socket.write_all(chunk.as_bytes()).await.is_err() {
                        return;
                    }
                    let _ = socket.flush().await;
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
                let _ = socket.shutdown().await;
            });
        }
    });

    (addr, rx)
}
