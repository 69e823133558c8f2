use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tracing::{error, info, warn};

use tandem_types::error::ChatError;
use tandem_types::events::{ClientCommand, ServerEvent};
use tandem_types::models::User;

use crate::dispatcher::Dispatcher;
use crate::session::SessionHandle;

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Drive one authenticated WebSocket connection until either side closes.
///
/// The credential was verified at the HTTP upgrade, so the session is
/// registered immediately. Whatever ends the connection (close frame,
/// heartbeat timeout, socket error, or a panic in either task) the session
/// is torn down through the same disconnect path.
pub async fn handle_connection(socket: WebSocket, dispatcher: Dispatcher, user: User) {
    let (mut sender, mut receiver) = socket.split();
    let (session, mut events) = dispatcher.open_session(user.id).await;

    info!("{} ({}) connected to gateway, session {}", user.email, user.id, session.id());

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Forward queued events -> client, with heartbeat
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                event = events.recv() => {
                    let Some(event) = event else { break };
                    let text = match serde_json::to_string(&event) {
                        Ok(text) => text,
                        Err(e) => {
                            error!("Could not encode gateway event: {}", e);
                            continue;
                        }
                    };
                    if sender.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(Bytes::new())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Read commands from client
    let recv_dispatcher = dispatcher.clone();
    let recv_session = session.clone();
    let email = user.email.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => {
                    let result = match ClientCommand::parse(&text) {
                        Ok(cmd) => handle_command(&recv_dispatcher, &recv_session, cmd).await,
                        Err(e) => {
                            warn!(
                                "{} ({}) bad command: {} -- raw: {}",
                                email,
                                recv_session.user_id(),
                                e,
                                text.chars().take(200).collect::<String>()
                            );
                            Err(e)
                        }
                    };
                    if let Err(e) = result {
                        recv_session.deliver(ServerEvent::failed(&e));
                    }
                }
                Message::Binary(_) => {
                    recv_session.deliver(ServerEvent::failed(&ChatError::invalid(
                        "binary frames are not supported",
                    )));
                }
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    // Wait for either task to finish
    let recv_finished = tokio::select! {
        result = &mut send_task => {
            if let Err(e) = result {
                if e.is_panic() {
                    error!("Send task for session {} panicked", session.id());
                }
            }
            false
        }
        result = &mut recv_task => {
            if let Err(e) = result {
                if e.is_panic() {
                    error!("Command task for session {} panicked", session.id());
                }
            }
            true
        }
    };

    // The other task must be gone before teardown, or an in-flight join
    // could add the session back to a room after it was cleared.
    let unfinished = if recv_finished { send_task } else { recv_task };
    unfinished.abort();
    let _ = unfinished.await;

    dispatcher.disconnect(&session).await;
    info!("{} ({}) disconnected from gateway", user.email, user.id);
}

async fn handle_command(
    dispatcher: &Dispatcher,
    session: &SessionHandle,
    cmd: ClientCommand,
) -> Result<(), ChatError> {
    match cmd {
        ClientCommand::Join { chat_id, since } => {
            dispatcher.join(session, chat_id, since).await?;
        }

        ClientCommand::Leave { chat_id } => {
            dispatcher.leave(session, chat_id).await;
        }

        ClientCommand::SendMessage { chat_id, content } => {
            let dispatcher = dispatcher.clone();
            let sender_id = session.user_id();
            detached(async move {
                dispatcher.send_message(sender_id, chat_id, &content).await
            })
            .await?;
        }

        ClientCommand::SetTyping { chat_id, is_typing } => {
            dispatcher.set_typing(session, chat_id, is_typing).await?;
        }

        ClientCommand::MarkSeen { chat_id } => {
            let dispatcher = dispatcher.clone();
            let reader = session.user_id();
            let origin = session.id();
            detached(async move { dispatcher.mark_seen(chat_id, reader, Some(origin)).await })
                .await?;
        }
    }
    Ok(())
}

/// Run a durable operation on its own task. If the connection is torn down
/// while we wait, the operation still runs to completion (and still fans
/// out to whoever remains). A panic inside it is re-raised here so it ends
/// only this connection.
async fn detached<T, F>(op: F) -> Result<T, ChatError>
where
    F: Future<Output = Result<T, ChatError>> + Send + 'static,
    T: Send + 'static,
{
    match tokio::spawn(op).await {
        Ok(result) => result,
        Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
        Err(_) => Err(ChatError::unavailable("server is shutting down")),
    }
}
