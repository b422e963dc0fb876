use crate::coach::{ Coach, CoachError, MessageSink, SinkError };
use crate::models::websocket::{ ClientMessage, ServerMessage };
use super::auth;

use std::error::Error;
use std::net::SocketAddr;
use std::num::NonZeroU32;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::io::{ AsyncRead, AsyncWrite };

use tokio_tungstenite::{ accept_hdr_async, WebSocketStream };
use tokio_tungstenite::tungstenite::handshake::server::{ Request, Response, ErrorResponse };
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_rustls::TlsAcceptor;

use async_trait::async_trait;
use chrono::Utc;
use futures::stream::SplitSink;
use futures::{ SinkExt, StreamExt };
use governor::{ RateLimiter, Quota, state::{ InMemoryState, NotKeyed }, clock::DefaultClock };
use lazy_static::lazy_static;
use log::{ info, warn, error, debug };

const MAX_MESSAGE_SIZE: usize = 1 * 1024 * 1024;
const CONNECTIONS_PER_SECOND: NonZeroU32 = match NonZeroU32::new(10) {
    Some(n) => n,
    None => NonZeroU32::MIN,
};

lazy_static! {
    static ref CONNECTION_LIMITER: RateLimiter<NotKeyed, InMemoryState, DefaultClock> =
        RateLimiter::direct(Quota::per_second(CONNECTIONS_PER_SECOND));
}

/// Streams one assistant message to the client as `start`, `partial`... `done`.
pub struct WebSocketSink<S> {
    tx: SplitSink<WebSocketStream<S>, Message>,
}

impl<S> WebSocketSink<S> where S: AsyncRead + AsyncWrite + Unpin + Send {
    fn new(tx: SplitSink<WebSocketStream<S>, Message>) -> Self {
        Self { tx }
    }

    async fn send(&mut self, message: &ServerMessage) -> Result<(), SinkError> {
        self.tx.send(Message::Text(message.to_json())).await?;
        Ok(())
    }

    async fn send_error(&mut self, message: impl Into<String>) -> Result<(), SinkError> {
        self.send(&ServerMessage::Error { message: message.into() }).await
    }
}

#[async_trait]
impl<S> MessageSink for WebSocketSink<S> where S: AsyncRead + AsyncWrite + Unpin + Send {
    async fn open(&mut self) -> Result<(), SinkError> {
        self.send(&ServerMessage::Start).await
    }

    async fn stream_token(&mut self, token: &str) -> Result<(), SinkError> {
        self.send(&ServerMessage::Partial { content: token.to_string() }).await
    }

    async fn finish(&mut self, content: &str) -> Result<(), SinkError> {
        self.send(
            &(ServerMessage::Done {
                content: content.to_string(),
                timestamp: Utc::now().timestamp(),
            })
        ).await
    }
}

/// Accepts connections forever; each one becomes its own chat session.
pub async fn serve(
    listener: TcpListener,
    coach: Arc<Coach>,
    api_key: Option<String>,
    tls_acceptor: Option<TlsAcceptor>
) -> Result<(), Box<dyn Error + Send + Sync>> {
    let protocol = if tls_acceptor.is_some() { "wss" } else { "ws" };
    info!("{} server listening on: {}", protocol.to_uppercase(), listener.local_addr()?);

    loop {
        let (stream, peer) = listener.accept().await?;

        if CONNECTION_LIMITER.check().is_err() {
            warn!("Global connection rate limit exceeded for {}. Dropping connection.", peer);
            continue;
        }

        info!("Incoming connection from: {}", peer);
        let coach = Arc::clone(&coach);
        let required_api_key = api_key.clone();
        let tls_acceptor = tls_acceptor.clone();

        tokio::spawn(async move {
            let process_result = if let Some(acceptor) = tls_acceptor {
                match acceptor.accept(stream).await {
                    Ok(tls_stream) => {
                        info!("TLS handshake successful for {}", peer);
                        process_connection(peer, tls_stream, coach, required_api_key).await
                    }
                    Err(e) => {
                        error!("TLS handshake error for {}: {}", peer, e);
                        Err(Box::new(e) as Box<dyn Error + Send + Sync>)
                    }
                }
            } else {
                process_connection(peer, stream, coach, required_api_key).await
            };

            if let Err(e) = process_result {
                error!("Failed to process connection for {}: {}", peer, e);
            }
        });
    }
}

fn unauthorized(reason: &str) -> ErrorResponse {
    let mut res = ErrorResponse::new(Some(reason.to_string()));
    *res.status_mut() = StatusCode::UNAUTHORIZED;
    res
}

async fn process_connection<S>(
    peer: SocketAddr,
    stream: S,
    coach: Arc<Coach>,
    required_api_key: Option<String>
) -> Result<(), Box<dyn Error + Send + Sync>>
    where S: AsyncRead + AsyncWrite + Unpin + Send + 'static
{
    let auth_callback = |req: &Request, response: Response| -> Result<Response, ErrorResponse> {
        let secret = match &required_api_key {
            Some(k) if !k.is_empty() => k,
            _ => {
                return Ok(response);
            }
        };

        let query = req.uri().query().unwrap_or("");
        match auth::verify_query(secret, query, Utc::now().timestamp()) {
            Ok(()) => Ok(response),
            Err(e) => {
                warn!("Rejected handshake from {}: {}", peer, e);
                Err(unauthorized(&e.to_string()))
            }
        }
    };

    match accept_hdr_async(stream, auth_callback).await {
        Ok(ws) => {
            handle_connection(peer, ws, coach).await;
            Ok(())
        }
        Err(e) => {
            error!("Handshake failed for {}: {}", peer, e);
            Err(Box::new(e) as _)
        }
    }
}

pub async fn handle_connection<S>(peer: SocketAddr, websocket: WebSocketStream<S>, coach: Arc<Coach>)
    where S: AsyncRead + AsyncWrite + Unpin + Send
{
    let (tx, mut rx) = websocket.split();
    let mut sink = WebSocketSink::new(tx);
    let mut session = coach.on_chat_start();
    info!("Assigned session {} to {}", session.id(), peer);

    let greeting = ServerMessage::Greeting {
        content: coach.greeting().to_string(),
        session_id: session.id().to_string(),
    };
    if let Err(e) = sink.send(&greeting).await {
        error!("Failed to send greeting to {}: {}", peer, e);
        return;
    }

    while let Some(msg) = rx.next().await {
        let message = match msg {
            Ok(message) => message,
            Err(e) => {
                match e {
                    | tokio_tungstenite::tungstenite::Error::ConnectionClosed
                    | tokio_tungstenite::tungstenite::Error::Protocol(_)
                    | tokio_tungstenite::tungstenite::Error::Utf8 => {
                        info!("WebSocket connection closed or protocol error for {}: {}", peer, e);
                    }
                    tokio_tungstenite::tungstenite::Error::Io(ref io_err) if
                        io_err.kind() == std::io::ErrorKind::ConnectionReset
                    => {
                        info!("WebSocket connection reset by peer {}", peer);
                    }
                    _ => {
                        error!("Error receiving message from {}: {}", peer, e);
                    }
                }
                break;
            }
        };

        if message.len() > MAX_MESSAGE_SIZE {
            warn!("Message from {} exceeds size limit ({} > {})", peer, message.len(), MAX_MESSAGE_SIZE);
            if sink.send_error("Message too large").await.is_err() {
                error!("Failed to send size limit error to {}", peer);
            }
            break;
        }

        match message {
            Message::Text(text) => {
                let content = match serde_json::from_str::<ClientMessage>(&text) {
                    Ok(ClientMessage::Chat { content }) => content,
                    Err(e) => {
                        error!("Failed to parse message from {}: {}", peer, e);
                        if sink.send_error(format!("Failed to parse message: {}", e)).await.is_err() {
                            break;
                        }
                        continue;
                    }
                };

                if content.trim().is_empty() {
                    if sink.send_error("Message content is empty").await.is_err() {
                        break;
                    }
                    continue;
                }

                match coach.on_message(&mut session, &content, &mut sink).await {
                    Ok(reply) => {
                        debug!("Session {} answered with {} chars", session.id(), reply.len());
                    }
                    Err(CoachError::Relay(e)) => {
                        error!("Relay error for {}: {}", peer, e);
                        if sink.send_error(format!("Stream error: {}", e)).await.is_err() {
                            break;
                        }
                    }
                    Err(CoachError::Sink(e)) => {
                        error!("Lost output channel to {}: {}", peer, e);
                        break;
                    }
                }
            }
            Message::Close(_) => {
                info!("Received close frame from {}", peer);
                break;
            }
            // tungstenite queues the pong reply itself
            Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
            Message::Binary(_) => {
                warn!("Ignoring binary message from {}", peer);
            }
        }
    }
    info!(
        "WebSocket connection closed for {} (session {}, {} turns)",
        peer,
        session.id(),
        session.transcript().len()
    );
}
