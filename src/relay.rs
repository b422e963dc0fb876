use crate::llm::chat::{ ChatClient, ChatError, FragmentStream };
use crate::models::chat::Turn;
use futures::future;
use futures::StreamExt;
use log::info;
use std::sync::Arc;

/// Forwards a transcript to the completion provider and hands back the
/// provider's output as a lazy fragment stream.
#[derive(Clone)]
pub struct CompletionRelay {
    client: Arc<dyn ChatClient>,
    instructions: Arc<str>,
}

impl CompletionRelay {
    pub fn new(client: Arc<dyn ChatClient>, instructions: impl Into<Arc<str>>) -> Self {
        Self { client, instructions: instructions.into() }
    }

    pub fn instructions(&self) -> &str {
        &self.instructions
    }

    pub fn model(&self) -> &str {
        self.client.model()
    }

    /// Streams the response to the complete `transcript`. Fragments come in
    /// provider order, empty deltas are dropped, and the stream ends right
    /// after the first error. There is no retry.
    pub fn respond(&self, transcript: &[Turn]) -> FragmentStream {
        info!("Relaying {} turns to model {}", transcript.len(), self.client.model());
        let stream = self.client
            .stream_chat(&self.instructions, transcript)
            .filter(|item| future::ready(!matches!(item, Ok(fragment) if fragment.is_empty())))
            .scan(false, |failed, item: Result<String, ChatError>| {
                if *failed {
                    return future::ready(None);
                }
                *failed = item.is_err();
                future::ready(Some(item))
            });
        Box::pin(stream)
    }
}
