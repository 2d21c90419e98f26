//! WebSocket upgrade + message loop. One connection is one tutoring session:
//! it owns its conversation and handles one message at a time, so submissions
//! on a session are serialized. We reply with a single JSON message per request.

use std::sync::Arc;
use axum::{
  extract::{
    ws::{Message, WebSocket},
    State, WebSocketUpgrade,
  },
  response::IntoResponse,
};
use tracing::{info, error, instrument, debug};

use crate::domain::{Conversation, Submission, SubmissionKind};
use crate::error::TutorError;
use crate::gate::Identity;
use crate::protocol::{ClientWsMessage, ServerWsMessage};
use crate::state::AppState;

#[instrument(level = "info", skip(ws, state, identity))]
pub async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>, identity: Identity) -> impl IntoResponse {
  info!(target: "tutor_backend", identity = %identity.key, remaining = state.ledger.remaining(&identity), "WebSocket upgrade requested");
  ws.on_upgrade(move |socket| handle_ws(socket, state, identity))
}

#[instrument(level = "info", skip(socket, state, identity), fields(identity = %identity.key))]
async fn handle_ws(mut socket: WebSocket, state: Arc<AppState>, identity: Identity) {
  info!(target: "tutor_backend", "WebSocket connected");
  let mut conversation = Conversation::new();

  while let Some(Ok(msg)) = socket.recv().await {
    match msg {
      Message::Text(txt) => {
        // Parse, dispatch, serialize response.
        let reply_msg = match serde_json::from_str::<ClientWsMessage>(&txt) {
          Ok(incoming) => {
            debug!(target: "tutor_backend", "WS received: {:?}", &incoming);
            handle_client_ws(incoming, &state, &identity, &mut conversation).await
          }
          Err(e) => ServerWsMessage::Error { message: format!("Invalid JSON: {}", e) },
        };

        let out = serde_json::to_string(&reply_msg).unwrap_or_else(|e| {
          serde_json::json!({ "type": "error", "message": format!("Serialization error: {}", e) }).to_string()
        });

        if let Err(e) = socket.send(Message::Text(out)).await {
          error!(target: "tutor_backend", error = %e, "WS send error");
          break;
        }
      }
      Message::Ping(payload) => { let _ = socket.send(Message::Pong(payload)).await; }
      Message::Close(_) => break,
      _ => {}
    }
  }
  info!(target: "tutor_backend", turns = conversation.turns().len(), "WebSocket disconnected");
}

async fn handle_client_ws(
  msg: ClientWsMessage,
  state: &AppState,
  identity: &Identity,
  conversation: &mut Conversation,
) -> ServerWsMessage {
  let submission = match msg {
    ClientWsMessage::Ping => return ServerWsMessage::Pong,
    ClientWsMessage::Ask { question } => Submission::new(SubmissionKind::Ask, question),
    ClientWsMessage::Reexplain => Submission::new(SubmissionKind::Reexplain, ""),
    ClientWsMessage::Challenge => Submission::new(SubmissionKind::Challenge, ""),
    ClientWsMessage::Hint { challenge_id } => {
      let sub = Submission::new(SubmissionKind::Hint, "");
      match challenge_id {
        Some(id) => sub.referencing_challenge(id),
        None => sub,
      }
    }
  };

  if let Err(e) = state.ledger.consume(identity) {
    return error_message(state, e);
  }

  match state.controller.handle(&identity.key, conversation, submission).await {
    Ok(reply) => {
      info!(target: "tutoring", mode = reply.mode.as_str(), subject = ?reply.classification.map(|c| c.subject_domain), degraded = reply.degraded, "WS reply served");
      ServerWsMessage::Reply {
        mode: reply.mode.as_str().to_string(),
        content: reply.content,
        challenge_id: reply.challenge_id,
      }
    }
    Err(e) => error_message(state, e),
  }
}

fn error_message(state: &AppState, err: TutorError) -> ServerWsMessage {
  let prompts = state.prompts();
  let message = match err {
    TutorError::MissingContext(_) => prompts.missing_context_message.clone(),
    TutorError::UsageLimitExceeded { .. } => prompts.usage_limit_message.clone(),
    _ => prompts.apology.clone(),
  };
  ServerWsMessage::Error { message }
}
