use crate::config::{ Persona, Settings };
use crate::llm::chat::{ new_client, ChatClient, ChatError };
use crate::models::chat::Turn;
use crate::relay::CompletionRelay;
use crate::session::ChatSession;

use async_trait::async_trait;
use futures::StreamExt;
use log::{ debug, info, warn };
use std::error::Error;
use std::sync::Arc;
use thiserror::Error;

pub type SinkError = Box<dyn Error + Send + Sync>;

/// Outbound message stream: an empty message is opened, tokens are appended
/// to it as they arrive, then it is closed with the full text.
#[async_trait]
pub trait MessageSink: Send {
    async fn open(&mut self) -> Result<(), SinkError>;
    async fn stream_token(&mut self, token: &str) -> Result<(), SinkError>;
    async fn finish(&mut self, content: &str) -> Result<(), SinkError>;
}

#[derive(Debug, Error)]
pub enum CoachError {
    #[error("completion relay failed: {0}")]
    Relay(#[from] ChatError),
    #[error("output channel failed: {0}")]
    Sink(#[source] SinkError),
}

pub struct Coach {
    persona: Persona,
    relay: CompletionRelay,
}

impl Coach {
    pub fn new(persona: Persona, client: Arc<dyn ChatClient>) -> Self {
        let relay = CompletionRelay::new(client, persona.instructions.as_str());
        Self { persona, relay }
    }

    pub fn from_settings(settings: &Settings) -> Result<Self, ChatError> {
        let client = new_client(&settings.llm)?;
        info!(
            "Chat client configured: Type={}, Model={}, BaseURL={}",
            settings.llm.llm_type,
            client.model(),
            client.base_url()
        );
        Ok(Self::new(settings.persona.clone(), client))
    }

    pub fn persona(&self) -> &Persona {
        &self.persona
    }

    pub fn greeting(&self) -> &str {
        &self.persona.greeting
    }

    pub fn on_chat_start(&self) -> ChatSession {
        let session = ChatSession::start();
        info!("Started chat session {} with persona '{}'", session.id(), self.persona.name);
        session
    }

    /// Handles one user message: records it, streams the relay's response
    /// into `sink`, then records the full response as the assistant turn.
    ///
    /// On failure the error is returned as-is and no assistant turn is
    /// recorded.
    pub async fn on_message<S>(
        &self,
        session: &mut ChatSession,
        content: &str,
        sink: &mut S
    ) -> Result<String, CoachError>
        where S: MessageSink + ?Sized
    {
        session.append(Turn::user(content));
        sink.open().await.map_err(CoachError::Sink)?;

        let mut stream = self.relay.respond(session.transcript().snapshot());
        let mut response = String::new();
        while let Some(fragment) = stream.next().await {
            let fragment = fragment.map_err(|e| {
                warn!("Relay error in session {}: {}", session.id(), e);
                CoachError::Relay(e)
            })?;
            sink.stream_token(&fragment).await.map_err(CoachError::Sink)?;
            response.push_str(&fragment);
        }

        sink.finish(&response).await.map_err(CoachError::Sink)?;
        session.append(Turn::assistant(response.clone()));
        debug!(
            "Session {} now holds {} turns",
            session.id(),
            session.transcript().len()
        );
        Ok(response)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::llm::chat::FragmentStream;
    use futures::stream;
    use std::sync::Mutex;

    /// Answers every request by splitting a rewrite of the last user turn
    /// into word-sized fragments.
    pub struct EchoClient {
        pub requests: Mutex<Vec<Vec<Turn>>>,
        pub fail_with_status: Option<u16>,
    }

    impl EchoClient {
        pub fn new() -> Arc<Self> {
            Arc::new(Self { requests: Mutex::new(Vec::new()), fail_with_status: None })
        }

        pub fn failing(status: u16) -> Arc<Self> {
            Arc::new(Self { requests: Mutex::new(Vec::new()), fail_with_status: Some(status) })
        }

        pub fn reply_for(turns: &[Turn]) -> String {
            let last = turns.last().map(Turn::content).unwrap_or_default();
            format!("Dear client, regarding \"{}\": thank you for your patience.", last)
        }
    }

    #[async_trait]
    impl ChatClient for EchoClient {
        fn stream_chat(&self, _instructions: &str, turns: &[Turn]) -> FragmentStream {
            self.requests.lock().unwrap().push(turns.to_vec());
            if let Some(status) = self.fail_with_status {
                let item: Result<String, ChatError> = Err(ChatError::Status {
                    status,
                    body: "denied".to_string(),
                });
                return Box::pin(stream::iter(vec![Ok("Dear".to_string()), item]));
            }
            let reply = Self::reply_for(turns);
            let fragments: Vec<Result<String, ChatError>> = reply
                .split_inclusive(' ')
                .map(|word| Ok(word.to_string()))
                .collect();
            Box::pin(stream::iter(fragments))
        }

        fn model(&self) -> &str {
            "echo"
        }

        fn base_url(&self) -> &str {
            "http://echo.invalid"
        }
    }

    #[derive(Default)]
    pub struct RecordingSink {
        pub opened: usize,
        pub tokens: Vec<String>,
        pub finished: Vec<String>,
    }

    #[async_trait]
    impl MessageSink for RecordingSink {
        async fn open(&mut self) -> Result<(), SinkError> {
            self.opened += 1;
            Ok(())
        }

        async fn stream_token(&mut self, token: &str) -> Result<(), SinkError> {
            self.tokens.push(token.to_string());
            Ok(())
        }

        async fn finish(&mut self, content: &str) -> Result<(), SinkError> {
            self.finished.push(content.to_string());
            Ok(())
        }
    }
}
