//! Inbound frame routing for bound viewer connections.

use std::sync::Arc;

use crate::web::protocol::{parse_client_frame, ClientId, ClientMessage, SessionId};
use crate::web::session_manager::{SessionError, SessionManager};

/// What a connection's writer task should do next
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// A serialized server frame
    Frame(Arc<str>),
    /// Close the socket
    Close,
}

/// Handle one text frame from a viewer bound to `session_id`.
///
/// Malformed frames and frames for another session are answered with an
/// error frame to that viewer only; the connection stays open.
pub async fn dispatch_text(
    manager: &SessionManager,
    session_id: &SessionId,
    client_id: ClientId,
    text: &str,
) {
    let message = match parse_client_frame(text, &session_id.to_string()) {
        Ok(message) => message,
        Err(e) => {
            tracing::debug!(session = %session_id, client = %client_id, error = %e, "Rejected inbound frame");
            manager.send_error(session_id, client_id, e.to_string()).await;
            return;
        }
    };

    if let Err(e) = handle_client_message(manager, session_id, client_id, message).await {
        tracing::debug!(session = %session_id, client = %client_id, error = %e, "Inbound frame not applied");
    }
}

async fn handle_client_message(
    manager: &SessionManager,
    session_id: &SessionId,
    client_id: ClientId,
    message: ClientMessage,
) -> Result<(), SessionError> {
    use ClientMessage::*;

    match message {
        Stdin { data } => manager.write_input(session_id, &data).await,
        Resize { size, .. } => manager.resize(session_id, size.cols, size.rows).await,
        Resync { reason, last_seq, .. } => {
            tracing::debug!(session = %session_id, client = %client_id, ?reason, ?last_seq, "Resync requested");
            manager.resync(session_id, client_id).await
        }
        HistoryGet {
            req_id,
            before,
            limit,
        } => {
            manager
                .send_history(session_id, client_id, req_id, &before, limit)
                .await
        }
        Ping { .. } => manager.send_pong(session_id, client_id).await,
        // Answers to our heartbeat carry nothing we act on
        Pong { .. } => Ok(()),
    }
}
