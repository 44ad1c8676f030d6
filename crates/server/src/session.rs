//! One WebSocket command session.
//!
//! A session reads a single command at a time, runs it to completion and
//! writes the response before reading the next one. Malformed input is
//! answered with an error response and never closes the session.

use std::{fmt::Display, sync::Arc, time::Duration};

use axum::extract::ws::Message;
use control_api::{dispatch, ControlContext};
use futures::{Sink, SinkExt, Stream, StreamExt};
use shared::{
    error::{ApiError, ErrorCode},
    protocol::{decode_command, encode_response, Response},
};
use tokio::{sync::watch, time::timeout};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CloseReason {
    ClientClosed,
    Disconnected,
    TransportError,
    Shutdown,
}

/// Counts open sessions so shutdown can wait for them to finish.
#[derive(Clone)]
pub(crate) struct SessionTracker {
    active: Arc<watch::Sender<usize>>,
}

/// Keeps its session counted until dropped.
pub(crate) struct SessionGuard {
    active: Arc<watch::Sender<usize>>,
}

impl SessionTracker {
    pub(crate) fn new() -> Self {
        let (active, _) = watch::channel(0);
        Self {
            active: Arc::new(active),
        }
    }

    pub(crate) fn enter(&self) -> SessionGuard {
        self.active.send_modify(|count| *count += 1);
        SessionGuard {
            active: self.active.clone(),
        }
    }

    pub(crate) fn active(&self) -> usize {
        *self.active.borrow()
    }

    /// Waits until every session has closed. Returns `false` on timeout.
    pub(crate) async fn drained(&self, limit: Duration) -> bool {
        let mut active = self.active.subscribe();
        let drained = timeout(limit, active.wait_for(|count| *count == 0))
            .await
            .is_ok();
        drained
    }
}

impl Default for SessionTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.active
            .send_modify(|count| *count = count.saturating_sub(1));
    }
}

pub(crate) async fn run_session<S, R, E>(
    ctx: ControlContext,
    mut sender: S,
    mut receiver: R,
    mut shutdown: watch::Receiver<bool>,
    session_id: Uuid,
) -> CloseReason
where
    S: Sink<Message> + Unpin,
    R: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    info!(%session_id, "session opened");

    let reason = loop {
        let next = tokio::select! {
            () = shutdown_raised(&mut shutdown) => break CloseReason::Shutdown,
            next = receiver.next() => next,
        };

        let text = match next {
            None => break CloseReason::Disconnected,
            Some(Err(error)) => {
                warn!(%session_id, %error, "failed to read from session");
                break CloseReason::TransportError;
            }
            Some(Ok(Message::Text(text))) => text,
            Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                Ok(text) => text,
                Err(_) => {
                    let response = Response::malformed("binary frame is not valid UTF-8");
                    if !send_response(&mut sender, &response).await {
                        break CloseReason::Disconnected;
                    }
                    continue;
                }
            },
            Some(Ok(Message::Close(_))) => break CloseReason::ClientClosed,
            Some(Ok(_)) => continue,
        };

        if let Some(response) = handle_message(&ctx, session_id, &text).await {
            if !send_response(&mut sender, &response).await {
                break CloseReason::Disconnected;
            }
        }
    };

    if reason == CloseReason::Shutdown {
        let _ = sender.send(Message::Close(None)).await;
    }
    info!(%session_id, ?reason, "session closed");
    reason
}

async fn shutdown_raised(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

/// Decodes and runs one message. The command runs on its own task so a
/// panicking handler becomes an error response instead of a dead session.
async fn handle_message(
    ctx: &ControlContext,
    session_id: Uuid,
    text: &str,
) -> Option<Response> {
    debug!(%session_id, message = %text, "message received");
    let command = match decode_command(text) {
        Ok(command) => command,
        Err(response) => {
            warn!(
                %session_id,
                message = ?response.message,
                detail = ?response.detail,
                "rejected message"
            );
            return Some(response);
        }
    };

    let name = command.name().to_string();
    let fire_and_forget = command.is_fire_and_forget();
    let task_ctx = ctx.clone();
    match tokio::spawn(async move { dispatch(&task_ctx, command).await }).await {
        Ok(response) => response,
        Err(join_error) => {
            error!(%session_id, command = %name, %join_error, "command handler crashed");
            (!fire_and_forget).then(|| {
                Response::error(name, ApiError::new(ErrorCode::Internal, "internal error"))
            })
        }
    }
}

/// Returns `false` once the peer can no longer be written to.
async fn send_response<S>(sender: &mut S, response: &Response) -> bool
where
    S: Sink<Message> + Unpin,
{
    let text = match encode_response(response) {
        Ok(text) => text,
        Err(error) => {
            error!(%error, "failed to encode response");
            return true;
        }
    };
    sender.send(Message::Text(text)).await.is_ok()
}

#[cfg(test)]
#[path = "tests/session_tests.rs"]
mod tests;
