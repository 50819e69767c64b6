use super::AppContext;
use crate::error::ChatError;
use crate::models::websocket::{ ClientMessage, ServerMessage };
use crate::render::Renderer;
use crate::session::{ ConfirmOutcome, SessionController, SubmitOutcome, SwitchOutcome };

use std::error::Error;
use std::net::SocketAddr;
use std::num::NonZeroU32;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::io::{ AsyncRead, AsyncWrite };
use tokio::sync::mpsc;

use tokio_tungstenite::{ accept_async, WebSocketStream };
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::tungstenite::Error as WsError;

use lazy_static::lazy_static;
use governor::{ RateLimiter, Quota, state::{ InMemoryState, NotKeyed }, clock::DefaultClock };

use futures::stream::SplitSink;
use futures::{ SinkExt, StreamExt };
use log::{ debug, info, warn, error };

type WsSink<S> = SplitSink<WebSocketStream<S>, Message>;

const MAX_MESSAGE_SIZE: usize = 1 * 1024 * 1024;

lazy_static! {
    static ref CONNECTION_LIMITER: RateLimiter<NotKeyed, InMemoryState, DefaultClock> =
        RateLimiter::direct(Quota::per_second(NonZeroU32::new(10).unwrap_or(NonZeroU32::MIN)));
}

pub async fn serve(
    listener: TcpListener,
    context: Arc<AppContext>
) -> Result<(), Box<dyn Error + Send + Sync>> {
    loop {
        let (stream, peer) = listener.accept().await?;

        if CONNECTION_LIMITER.check().is_err() {
            warn!("Global connection rate limit exceeded for {}. Dropping connection.", peer);
            continue;
        }

        info!("Incoming connection from: {}", peer);
        let context = Arc::clone(&context);

        tokio::spawn(async move {
            match accept_async(stream).await {
                Ok(ws) => handle_connection(peer, ws, context).await,
                Err(e) => error!("Handshake failed for {}: {}", peer, e),
            }
        });
    }
}

/// Runs one browser session. Messages are handled strictly in order, so a
/// control message sent while a reply streams in is applied after it.
pub async fn handle_connection<S>(
    peer: SocketAddr,
    websocket: WebSocketStream<S>,
    context: Arc<AppContext>
)
    where S: AsyncRead + AsyncWrite + Unpin
{
    let (mut tx, mut rx) = websocket.split();
    let mut session = context.new_session();
    info!("Assigned session ID {} to {}", session.id(), peer);

    if send_state(&mut tx, &session, &context.renderer, true).await.is_err() {
        error!("Failed to send initial state to {}", peer);
        return;
    }

    while let Some(msg) = rx.next().await {
        match msg {
            Ok(message) => {
                if message.len() > MAX_MESSAGE_SIZE {
                    warn!(
                        "Message from {} exceeds size limit ({} > {})",
                        peer,
                        message.len(),
                        MAX_MESSAGE_SIZE
                    );
                    let error_msg = ServerMessage::Error {
                        kind: "validation".to_string(),
                        message: "Message too large".to_string(),
                    };
                    if send(&mut tx, &error_msg).await.is_err() {
                        error!("Failed to send size limit error to {}", peer);
                    }
                    break;
                }

                match message {
                    Message::Text(text) => {
                        let result = match serde_json::from_str::<ClientMessage>(&text) {
                            Ok(client_msg) => {
                                dispatch(&mut tx, &mut session, &context.renderer, client_msg).await
                            }
                            Err(e) => {
                                warn!("Failed to parse message from {}: {}", peer, e);
                                let error_msg = ServerMessage::Error {
                                    kind: "validation".to_string(),
                                    message: format!("Failed to parse message: {}", e),
                                };
                                send(&mut tx, &error_msg).await
                            }
                        };
                        if let Err(e) = result {
                            error!("Error sending to {}: {}", peer, e);
                            break;
                        }
                    }
                    Message::Close(_) => {
                        info!("Received close frame from {}", peer);
                        break;
                    }
                    Message::Ping(ping_data) => {
                        if tx.send(Message::Pong(ping_data)).await.is_err() {
                            error!("Failed to send pong to {}", peer);
                            break;
                        }
                    }
                    Message::Pong(_) => {}
                    Message::Binary(_) => {
                        warn!("Ignoring binary message from {}", peer);
                    }
                    Message::Frame(_) => {}
                }
            }
            Err(e) => {
                match e {
                    | WsError::ConnectionClosed
                    | WsError::Protocol(_)
                    | WsError::Utf8 => {
                        info!("WebSocket connection closed or protocol error for {}: {}", peer, e);
                    }
                    WsError::Io(ref io_err) if io_err.kind() == std::io::ErrorKind::ConnectionReset => {
                        info!("WebSocket connection reset by peer {}", peer);
                    }
                    _ => {
                        error!("Error receiving message from {}: {}", peer, e);
                    }
                }
                break;
            }
        }
    }
    info!("WebSocket connection closed for {} (Session ID: {})", peer, session.id());
}

async fn dispatch<S>(
    tx: &mut WsSink<S>,
    session: &mut SessionController,
    renderer: &Renderer,
    message: ClientMessage
) -> Result<(), WsError>
    where S: AsyncRead + AsyncWrite + Unpin
{
    match message {
        ClientMessage::Chat { content } => chat(tx, session, renderer, &content).await,
        ClientMessage::SwitchModel { model } => {
            match session.switch_model(&model) {
                Ok(SwitchOutcome::Unchanged) => {}
                Ok(SwitchOutcome::ConfirmationRequired(action)) => {
                    let msg = ServerMessage::ConfirmRequired {
                        action: action.name().to_string(),
                        message: action.prompt(),
                    };
                    send(tx, &msg).await?;
                }
                Err(e) => send_error(tx, &e).await?,
            }
            send_state(tx, session, renderer, false).await
        }
        ClientMessage::Confirm => {
            let outcome = session.confirm_pending();
            match outcome {
                Ok(ConfirmOutcome::HistoryCleared) => send_state(tx, session, renderer, true).await,
                Ok(_) => send_state(tx, session, renderer, false).await,
                Err(e) => {
                    send_error(tx, &e).await?;
                    send_state(tx, session, renderer, false).await
                }
            }
        }
        ClientMessage::Cancel => {
            session.cancel_pending();
            send_state(tx, session, renderer, false).await
        }
        ClientMessage::SetTemperature { value } => {
            if let Err(e) = session.set_temperature(value) {
                send_error(tx, &e).await?;
            }
            send_state(tx, session, renderer, false).await
        }
        ClientMessage::SetContextLength { value } => {
            if let Err(e) = session.set_context_length(value) {
                send_error(tx, &e).await?;
            }
            send_state(tx, session, renderer, false).await
        }
        ClientMessage::ClearHistory => {
            let action = session.request_clear();
            let msg = ServerMessage::ConfirmRequired {
                action: action.name().to_string(),
                message: action.prompt(),
            };
            send(tx, &msg).await?;
            send_state(tx, session, renderer, false).await
        }
        ClientMessage::ListModels => {
            match session.client().list_models().await {
                Ok(models) => send(tx, &ServerMessage::Models { models }).await,
                Err(e) => send_error(tx, &e).await,
            }
        }
        ClientMessage::Sync => send_state(tx, session, renderer, true).await,
    }
}

async fn chat<S>(
    tx: &mut WsSink<S>,
    session: &mut SessionController,
    renderer: &Renderer,
    content: &str
) -> Result<(), WsError>
    where S: AsyncRead + AsyncWrite + Unpin
{
    if content.trim().is_empty() {
        return send_error(tx, &ChatError::validation("Nothing to send: the message is empty")).await;
    }
    send(tx, &ServerMessage::Processing).await?;

    let (fragment_tx, mut fragment_rx) = mpsc::unbounded_channel::<String>();
    let submit = session.submit(content, move |fragment| {
        let _ = fragment_tx.send(fragment.to_string());
    });
    let forward = async {
        let mut partial = String::new();
        while let Some(fragment) = fragment_rx.recv().await {
            partial.push_str(&fragment);
            let msg = ServerMessage::Chunk {
                html: renderer.render_partial(&partial),
                content: fragment,
            };
            send(tx, &msg).await?;
        }
        Ok::<(), WsError>(())
    };
    let (result, forwarded) = tokio::join!(submit, forward);

    match result {
        Ok(SubmitOutcome::Replied(turn)) => {
            forwarded?;
            let msg = ServerMessage::Response {
                content: turn.content().to_string(),
                model: turn.model().unwrap_or_default().to_string(),
                timestamp: turn.created_at().timestamp(),
            };
            send(tx, &msg).await?;
        }
        Ok(SubmitOutcome::Ignored) => {}
        Err(e) => {
            forwarded?;
            send_error(tx, &e).await?;
        }
    }
    send_state(tx, session, renderer, true).await
}

async fn send_state<S>(
    tx: &mut WsSink<S>,
    session: &SessionController,
    renderer: &Renderer,
    with_transcript: bool
) -> Result<(), WsError>
    where S: AsyncRead + AsyncWrite + Unpin
{
    if with_transcript {
        let transcript = ServerMessage::Transcript {
            html: renderer.render_conversation(session.conversation()),
            turns: session.conversation().len(),
        };
        send(tx, &transcript).await?;
    }
    send(tx, &ServerMessage::State(session.snapshot())).await
}

async fn send_error<S>(tx: &mut WsSink<S>, err: &ChatError) -> Result<(), WsError>
    where S: AsyncRead + AsyncWrite + Unpin
{
    let msg = ServerMessage::Error {
        kind: err.kind().to_string(),
        message: err.to_string(),
    };
    send(tx, &msg).await
}

async fn send<S>(tx: &mut WsSink<S>, msg: &ServerMessage) -> Result<(), WsError>
    where S: AsyncRead + AsyncWrite + Unpin
{
    match serde_json::to_string(msg) {
        Ok(json) => tx.send(Message::Text(json)).await,
        Err(e) => {
            debug!("Failed to serialize server message {:?}: {}", msg, e);
            Ok(())
        }
    }
}
