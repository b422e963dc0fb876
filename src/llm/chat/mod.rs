pub mod openai;

use async_trait::async_trait;
use futures::stream::{ self, BoxStream };
use futures::{ Stream, StreamExt };
use reqwest::RequestBuilder;
use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;
use super::LlmConfig;
use self::openai::OpenAICompatClient;
use crate::models::chat::Turn;

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("HTTP request to provider failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("provider returned HTTP {status}: {body}")]
    Status {
        status: u16,
        body: String,
    },
    #[error("malformed provider response: {0}")]
    Decode(String),
    #[error("provider reported an error: {0}")]
    Provider(String),
    #[error("provider returned no completion choices")]
    EmptyResponse,
    #[error("API key is required for the '{0}' provider")]
    MissingApiKey(String),
    #[error("invalid header value: {0}")]
    InvalidHeader(String),
}

/// Lazy, finite sequence of generated text fragments. A provider failure is
/// delivered as a single `Err` item after which the stream ends.
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<String, ChatError>> + Send>>;

#[async_trait]
pub trait ChatClient: Send + Sync {
    /// Builds the streaming request for `instructions` followed by `turns`.
    /// Nothing is sent until the returned stream is first polled.
    fn stream_chat(&self, instructions: &str, turns: &[Turn]) -> FragmentStream;

    async fn complete(&self, instructions: &str, turns: &[Turn]) -> Result<String, ChatError> {
        collect_response(self.stream_chat(instructions, turns)).await
    }

    fn model(&self) -> &str;
    fn base_url(&self) -> &str;
}

pub fn new_client(config: &LlmConfig) -> Result<Arc<dyn ChatClient>, ChatError> {
    let client = OpenAICompatClient::from_config(config)?;
    Ok(Arc::new(client))
}

/// Drains a fragment stream, returning the concatenated text or the first error.
pub async fn collect_response(mut stream: FragmentStream) -> Result<String, ChatError> {
    let mut full = String::new();
    while let Some(fragment) = stream.next().await {
        full.push_str(&fragment?);
    }
    Ok(full)
}

/// What a single line of a streamed response body means.
#[derive(Debug, PartialEq)]
pub enum LineEvent {
    Fragment(String),
    Skip,
    Done,
}

pub type LineParser = fn(&str) -> Result<LineEvent, ChatError>;

/// Splits a chunked response body into lines and feeds them to a parser.
/// Network chunks do not respect line boundaries, so partial lines are
/// buffered until their newline arrives.
struct LineDecoder {
    buffer: Vec<u8>,
    parser: LineParser,
    done: bool,
}

impl LineDecoder {
    fn new(parser: LineParser) -> Self {
        Self { buffer: Vec::new(), parser, done: false }
    }

    fn is_done(&self) -> bool {
        self.done
    }

    fn push(&mut self, chunk: &[u8]) -> Result<Vec<String>, ChatError> {
        self.buffer.extend_from_slice(chunk);
        let mut fragments = Vec::new();
        while !self.done {
            let Some(newline) = self.buffer.iter().position(|b| *b == b'\n') else {
                break;
            };
            let line: Vec<u8> = self.buffer.drain(..=newline).collect();
            self.consume_line(&line, &mut fragments)?;
        }
        Ok(fragments)
    }

    fn finish(&mut self) -> Result<Vec<String>, ChatError> {
        let mut fragments = Vec::new();
        if !self.done && !self.buffer.is_empty() {
            let line = std::mem::take(&mut self.buffer);
            self.consume_line(&line, &mut fragments)?;
        }
        self.done = true;
        Ok(fragments)
    }

    fn consume_line(&mut self, raw: &[u8], out: &mut Vec<String>) -> Result<(), ChatError> {
        let line = std::str
            ::from_utf8(raw)
            .map_err(|e| ChatError::Decode(format!("invalid UTF-8 in stream: {}", e)))?;
        let line = line.trim_end_matches(|c| c == '\r' || c == '\n');
        match (self.parser)(line)? {
            LineEvent::Fragment(text) => {
                if !text.is_empty() {
                    out.push(text);
                }
            }
            LineEvent::Skip => {}
            LineEvent::Done => {
                self.done = true;
            }
        }
        Ok(())
    }
}

type ByteStream = BoxStream<'static, Result<Vec<u8>, reqwest::Error>>;

enum StreamState {
    Pending {
        request: RequestBuilder,
        parser: LineParser,
    },
    Reading {
        body: ByteStream,
        decoder: LineDecoder,
        queued: VecDeque<String>,
    },
    Finished,
}

async fn open_body(request: RequestBuilder) -> Result<ByteStream, ChatError> {
    let resp = request.send().await?;
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(ChatError::Status { status: status.as_u16(), body });
    }
    Ok(
        resp
            .bytes_stream()
            .map(|chunk| chunk.map(|bytes| bytes.to_vec()))
            .boxed()
    )
}

/// Turns a prepared request into a lazy fragment stream, parsing the response
/// body line by line with `parser`.
pub fn http_stream_generate(request: RequestBuilder, parser: LineParser) -> FragmentStream {
    let initial = StreamState::Pending { request, parser };
    Box::pin(
        stream::unfold(initial, |mut state| async move {
            loop {
                state = match state {
                    StreamState::Pending { request, parser } =>
                        match open_body(request).await {
                            Ok(body) =>
                                StreamState::Reading {
                                    body,
                                    decoder: LineDecoder::new(parser),
                                    queued: VecDeque::new(),
                                },
                            Err(e) => {
                                return Some((Err(e), StreamState::Finished));
                            }
                        }
                    StreamState::Reading { mut body, mut decoder, mut queued } => {
                        if let Some(fragment) = queued.pop_front() {
                            return Some((
                                Ok(fragment),
                                StreamState::Reading { body, decoder, queued },
                            ));
                        }
                        if decoder.is_done() {
                            return None;
                        }
                        let decoded = match body.next().await {
                            Some(Ok(chunk)) => decoder.push(&chunk),
                            Some(Err(e)) => Err(ChatError::Http(e)),
                            None => decoder.finish(),
                        };
                        match decoded {
                            Ok(fragments) => {
                                queued.extend(fragments);
                                StreamState::Reading { body, decoder, queued }
                            }
                            Err(e) => {
                                return Some((Err(e), StreamState::Finished));
                            }
                        }
                    }
                    StreamState::Finished => {
                        return None;
                    }
                };
            }
        })
    )
}
