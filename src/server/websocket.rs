use crate::cli::Args;
use crate::models::websocket::{ ClientMessage, ServerMessage };
use crate::server::AppState;
use crate::session::SessionController;

use std::error::Error;
use std::fs::File;
use std::io::BufReader;
use std::net::SocketAddr;
use std::num::NonZeroU32;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::io::{ AsyncRead, AsyncWrite };
use tokio_stream::wrappers::WatchStream;

use tokio_tungstenite::{ accept_async, WebSocketStream };
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_rustls::TlsAcceptor;

use rustls::ServerConfig;
use rustls::pki_types::{ CertificateDer, PrivateKeyDer };
use rustls_pemfile::{ certs, pkcs8_private_keys };

use governor::{ RateLimiter, Quota };

use log::{ info, warn, error };
use futures::{ Sink, SinkExt, StreamExt };

const MAX_MESSAGE_SIZE: usize = 1024 * 1024;
const CONNECTIONS_PER_SECOND: u32 = 10;

pub(crate) fn load_tls_config(
    cert_path: &str,
    key_path: &str
) -> Result<Arc<ServerConfig>, Box<dyn Error + Send + Sync>> {
    // Several rustls providers may be compiled in; pick ring explicitly.
    let _ = rustls::crypto::ring::default_provider().install_default();

    let cert_file = File::open(cert_path).map_err(|e|
        format!("Failed to open TLS certificate file '{}': {}", cert_path, e)
    )?;
    let key_file = File::open(key_path).map_err(|e|
        format!("Failed to open TLS key file '{}': {}", key_path, e)
    )?;

    let mut cert_reader = BufReader::new(cert_file);
    let mut key_reader = BufReader::new(key_file);
    let cert_chain: Vec<CertificateDer<'static>> = certs(&mut cert_reader)
        .collect::<Result<_, _>>()
        .map_err(|e| format!("Failed to read certificate(s): {}", e))?;

    let key = match pkcs8_private_keys(&mut key_reader).next() {
        Some(Ok(k)) => PrivateKeyDer::Pkcs8(k),
        Some(Err(e)) => {
            return Err(format!("Error reading private key: {}", e).into());
        }
        None => {
            return Err("No PKCS8 private key found in key file".into());
        }
    };

    let config = ServerConfig::builder().with_no_client_auth().with_single_cert(cert_chain, key)?;
    Ok(Arc::new(config))
}

fn tls_acceptor(args: &Args) -> Result<Option<TlsAcceptor>, Box<dyn Error + Send + Sync>> {
    if !args.enable_tls {
        info!("TLS not enabled. Running plain WebSocket (WS) server.");
        return Ok(None);
    }
    match (&args.tls_cert_path, &args.tls_key_path) {
        (Some(cert_path), Some(key_path)) => {
            info!(
                "TLS enabled. Loading certificate from '{}' and key from '{}'",
                cert_path,
                key_path
            );
            let config = load_tls_config(cert_path, key_path)?;
            Ok(Some(TlsAcceptor::from(config)))
        }
        (Some(_), None) | (None, Some(_)) => {
            error!("Both --tls-cert-path and --tls-key-path must be provided to enable TLS.");
            Err("Missing TLS certificate or key path".into())
        }
        (None, None) => {
            error!("--enable-tls was set but no certificate/key paths provided.");
            Err("TLS enabled without cert/key".into())
        }
    }
}

pub async fn start_ws_server(
    addr: &str,
    state: AppState,
    args: &Args
) -> Result<(), Box<dyn Error + Send + Sync>> {
    let tls_acceptor = tls_acceptor(args)?;
    let listener = TcpListener::bind(addr).await?;
    let protocol = if tls_acceptor.is_some() { "wss" } else { "ws" };
    info!("{} server listening on: {}", protocol.to_uppercase(), addr);

    let per_second = NonZeroU32::new(CONNECTIONS_PER_SECOND).unwrap_or(NonZeroU32::MIN);
    let limiter = RateLimiter::direct(Quota::per_second(per_second));

    loop {
        let (stream, peer) = listener.accept().await?;

        if limiter.check().is_err() {
            warn!("Global connection rate limit exceeded for {}. Dropping connection.", peer);
            continue;
        }

        info!("Incoming connection from: {}", peer);
        let state = state.clone();
        let tls_acceptor = tls_acceptor.clone();

        tokio::spawn(async move {
            let process_result = if let Some(acceptor) = tls_acceptor {
                match acceptor.accept(stream).await {
                    Ok(tls_stream) => {
                        info!("TLS handshake successful for {}", peer);
                        process_connection(peer, tls_stream, state).await
                    }
                    Err(e) => {
                        error!("TLS handshake error for {}: {}", peer, e);
                        Err(Box::new(e) as Box<dyn Error + Send + Sync>)
                    }
                }
            } else {
                process_connection(peer, stream, state).await
            };

            if let Err(e) = process_result {
                error!("Failed to process connection for {}: {}", peer, e);
            }
        });
    }
}

async fn process_connection<S>(
    peer: SocketAddr,
    stream: S,
    state: AppState
) -> Result<(), Box<dyn Error + Send + Sync>>
    where S: AsyncRead + AsyncWrite + Unpin + Send + 'static
{
    match accept_async(stream).await {
        Ok(ws) => {
            handle_connection(peer, ws, state).await;
            Ok(())
        }
        Err(e) => {
            error!("Handshake failed for {}: {}", peer, e);
            Err(Box::new(e) as _)
        }
    }
}

async fn send_json<T>(tx: &mut T, msg: &ServerMessage) -> Result<(), Box<dyn Error + Send + Sync>>
    where T: Sink<Message> + Unpin, T::Error: Error + Send + Sync + 'static
{
    let json = serde_json::to_string(msg)?;
    tx.send(Message::Text(json)).await?;
    Ok(())
}

/// Applies one client frame to the session. Returns a frame to send back, if any.
async fn handle_client_text(controller: &SessionController, text: &str) -> Option<ServerMessage> {
    match serde_json::from_str::<ClientMessage>(text) {
        Ok(ClientMessage::Send { content }) => {
            match controller.begin_send(&content).await {
                Ok(pending) => {
                    let controller = controller.clone();
                    tokio::spawn(async move {
                        controller.complete(pending).await;
                    });
                    None
                }
                Err(e) => Some(ServerMessage::Error { message: e.to_string() }),
            }
        }
        Ok(ClientMessage::Stop) => {
            controller.stop().await;
            None
        }
        Ok(ClientMessage::NewChat) => {
            controller.reset().await;
            None
        }
        Err(e) => Some(ServerMessage::Error { message: format!("Failed to parse message: {}", e) }),
    }
}

pub async fn handle_connection<S>(peer: SocketAddr, websocket: WebSocketStream<S>, state: AppState)
    where S: AsyncRead + AsyncWrite + Unpin + Send + 'static
{
    info!("New WebSocket connection: {}", peer);

    let (mut tx, mut rx) = websocket.split();
    let controller = SessionController::new(Arc::clone(&state.agent));
    let mut updates = WatchStream::new(controller.subscribe());

    let welcome = ServerMessage::Welcome {
        persona: state.persona.name.clone(),
        greeting: state.persona.greeting.clone(),
        suggestions: state.persona.suggestions.clone(),
        avatar: state.avatar.as_ref().map(|a| a.data_uri()),
    };
    if let Err(e) = send_json(&mut tx, &welcome).await {
        error!("Failed to send welcome to {}: {}", peer, e);
        return;
    }

    loop {
        tokio::select! {
            Some(conversation) = updates.next() => {
                let snapshot = ServerMessage::Snapshot {
                    messages: conversation.messages,
                    busy: conversation.busy,
                };
                if let Err(e) = send_json(&mut tx, &snapshot).await {
                    error!("Error sending snapshot to {}: {}", peer, e);
                    break;
                }
            }
            incoming = rx.next() => {
                let message = match incoming {
                    Some(Ok(message)) => message,
                    Some(Err(e)) => {
                        info!("WebSocket error for {}: {}", peer, e);
                        break;
                    }
                    None => break,
                };

                if message.len() > MAX_MESSAGE_SIZE {
                    warn!(
                        "Message from {} exceeds size limit ({} > {})",
                        peer,
                        message.len(),
                        MAX_MESSAGE_SIZE
                    );
                    let error_msg = ServerMessage::Error {
                        message: "Message too large".to_string(),
                    };
                    let _ = send_json(&mut tx, &error_msg).await;
                    break;
                }

                match message {
                    Message::Text(text) => {
                        if let Some(response) = handle_client_text(&controller, &text).await {
                            if let Err(e) = send_json(&mut tx, &response).await {
                                error!("Error sending response to {}: {}", peer, e);
                                break;
                            }
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
                    Message::Binary(_) => {
                        warn!("Ignoring binary message from {}", peer);
                    }
                    Message::Pong(_) | Message::Frame(_) => {}
                }
            }
        }
    }

    // Abandon any reply still in flight for this connection.
    controller.reset().await;
    info!("WebSocket connection closed for {}", peer);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{ ChatAgent, HISTORY_SIZE };
    use crate::config::persona::builtin_persona;
    use crate::llm::chat::testing::ScriptedClient;

    fn controller() -> SessionController {
        let client = Arc::new(ScriptedClient::new().push(Ok(Some("pong".into()))));
        let agent = ChatAgent::with_client(client, &builtin_persona().unwrap(), HISTORY_SIZE);
        SessionController::new(Arc::new(agent))
    }

    #[tokio::test]
    async fn send_frame_starts_a_reply() {
        let ctl = controller();
        let mut updates = ctl.subscribe();

        assert!(handle_client_text(&ctl, r#"{"type":"send","content":"ping"}"#).await.is_none());

        loop {
            updates.changed().await.unwrap();
            let snap = updates.borrow_and_update().clone();
            if !snap.busy {
                assert_eq!(snap.messages.len(), 2);
                assert_eq!(snap.messages[1].content, "pong");
                break;
            }
        }
    }

    #[tokio::test]
    async fn bad_frames_are_reported() {
        let ctl = controller();
        let reply = handle_client_text(&ctl, "not json").await;
        assert!(matches!(reply, Some(ServerMessage::Error { .. })));

        let reply = handle_client_text(&ctl, r#"{"type":"send","content":"  "}"#).await;
        match reply {
            Some(ServerMessage::Error { message }) => assert_eq!(message, "message is empty"),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[tokio::test]
    async fn new_chat_frame_resets() {
        let ctl = controller();
        ctl.send("hi").await.unwrap();
        assert!(handle_client_text(&ctl, r#"{"type":"new_chat"}"#).await.is_none());
        assert!(ctl.snapshot().await.messages.is_empty());
    }
}
