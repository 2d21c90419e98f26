//! Public protocol structs for WebSocket and HTTP endpoints (serde ready).
//! Keep this small and stable to evolve backend and frontend independently.

use serde::{Deserialize, Serialize};

use crate::controller::TutorReply;

/// Messages the client can send over WebSocket. One connection is one session.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientWsMessage {
    Ping,
    Ask {
        question: String,
    },
    Reexplain,
    Challenge,
    Hint {
        #[serde(default, rename = "challengeId")]
        challenge_id: Option<String>,
    },
}

/// Messages the server sends back over WebSocket.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerWsMessage {
    Pong,
    Reply {
        mode: String,
        content: String,
        #[serde(rename = "challengeId", skip_serializing_if = "Option::is_none")]
        challenge_id: Option<String>,
    },
    Error {
        message: String,
    },
}

//
// HTTP request/response DTOs
//

/// One prior chat message as the client renders it.
#[derive(Debug, Deserialize)]
pub struct MessageIn {
    pub content: String,
    pub sender: String,
}

#[derive(Debug, Deserialize)]
pub struct AskIn {
    #[serde(default)]
    pub question: String,
    #[serde(default)]
    pub messages: Vec<MessageIn>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReexplainIn {
    #[serde(default)]
    pub original_question: String,
    #[serde(default)]
    pub original_explanation: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChallengeIn {
    #[serde(default)]
    pub original_question: String,
    #[serde(default)]
    pub explanation: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HintIn {
    #[serde(default)]
    pub exercise_content: String,
    #[serde(default)]
    pub challenge_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ContentOut {
    pub content: String,
    #[serde(rename = "challengeId", skip_serializing_if = "Option::is_none")]
    pub challenge_id: Option<String>,
}

impl From<TutorReply> for ContentOut {
    fn from(r: TutorReply) -> Self {
        Self { content: r.content, challenge_id: r.challenge_id }
    }
}

/// Body of every non-2xx tutoring response: a machine-readable error plus an
/// in-character message the client can show as-is.
#[derive(Debug, Serialize)]
pub struct ErrorOut {
    pub error: String,
    pub content: String,
}

#[derive(Serialize)]
pub struct TranscribeOut {
    pub text: String,
}

#[derive(Serialize)]
pub struct SessionEndOut {
    pub ended: bool,
}

#[derive(Serialize)]
pub struct HealthOut {
    pub ok: bool,
}
