use crate::coach::{ Coach, CoachError, MessageSink, SinkError };
use async_trait::async_trait;
use log::warn;
use std::error::Error;
use tokio::io::{ AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt };

const PROMPT: &str = "> ";

struct ConsoleSink<'a, W> {
    out: &'a mut W,
}

#[async_trait]
impl<'a, W> MessageSink for ConsoleSink<'a, W> where W: AsyncWrite + Unpin + Send {
    async fn open(&mut self) -> Result<(), SinkError> {
        self.out.write_all(b"\n").await?;
        Ok(())
    }

    async fn stream_token(&mut self, token: &str) -> Result<(), SinkError> {
        self.out.write_all(token.as_bytes()).await?;
        self.out.flush().await?;
        Ok(())
    }

    async fn finish(&mut self, _content: &str) -> Result<(), SinkError> {
        self.out.write_all(b"\n\n").await?;
        self.out.flush().await?;
        Ok(())
    }
}

/// Runs a single chat session over line-oriented input. `/exit`, `/quit` or
/// end of input ends the session.
pub async fn run_repl<R, W>(coach: &Coach, input: R, mut output: W) -> Result<(), Box<dyn Error + Send + Sync>>
    where R: AsyncBufRead + Unpin, W: AsyncWrite + Unpin + Send
{
    let mut session = coach.on_chat_start();
    let mut lines = input.lines();

    output.write_all(format!("{}\n\n{}", coach.greeting(), PROMPT).as_bytes()).await?;
    output.flush().await?;

    while let Some(line) = lines.next_line().await? {
        let content = line.trim();
        if content == "/exit" || content == "/quit" {
            break;
        }
        if !content.is_empty() {
            let mut sink = ConsoleSink { out: &mut output };
            match coach.on_message(&mut session, content, &mut sink).await {
                Ok(_) => {}
                Err(CoachError::Relay(e)) => {
                    warn!("Relay error in session {}: {}", session.id(), e);
                    output.write_all(format!("\n[error] {}\n\n", e).as_bytes()).await?;
                }
                Err(CoachError::Sink(e)) => {
                    return Err(e);
                }
            }
        }
        output.write_all(PROMPT.as_bytes()).await?;
        output.flush().await?;
    }
    Ok(())
}
