//! HTTP endpoint handlers. These are thin wrappers: gate the caller, load the
//! session's conversation, hydrate it from the body when the client carries the
//! context itself, hand the submission to the controller, commit on success.

use std::sync::Arc;
use axum::{
  async_trait,
  extract::{FromRequest, Multipart, Request, State},
  http::{HeaderMap, StatusCode},
  response::{IntoResponse, Response},
  Json,
};
use base64::Engine;
use serde::de::DeserializeOwned;
use tracing::{debug, info, instrument, warn};

use crate::classifier::subject_domain_of;
use crate::controller::TutorReply;
use crate::domain::{
  AnalysisDepth, Challenge, Conversation, ImageOptions, ImageRef, Role, Submission, SubmissionKind, SubjectDomain, TurnId,
};
use crate::error::TutorError;
use crate::gate::{Identity, SESSION_ID_HEADER};
use crate::protocol::*;
use crate::state::AppState;

/// Error response carrying an in-character message.
pub struct ApiError {
  status: StatusCode,
  body: ErrorOut,
}

impl ApiError {
  fn from_tutor(state: &AppState, err: TutorError) -> Self {
    let prompts = state.prompts();
    let (status, content) = match &err {
      TutorError::MissingContext(_) => (StatusCode::BAD_REQUEST, prompts.missing_context_message.clone()),
      TutorError::InvalidSubmission(_) => (StatusCode::BAD_REQUEST, prompts.apology.clone()),
      TutorError::UsageLimitExceeded { .. } => (StatusCode::TOO_MANY_REQUESTS, prompts.usage_limit_message.clone()),
      _ => (StatusCode::INTERNAL_SERVER_ERROR, prompts.apology.clone()),
    };
    Self { status, body: ErrorOut { error: err.to_string(), content } }
  }
}

impl IntoResponse for ApiError {
  fn into_response(self) -> Response {
    (self.status, Json(self.body)).into_response()
  }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

/// `Json` whose rejections (malformed body, wrong content type) still answer
/// with the in-character `{error, content}` body.
pub struct TutorJson<T>(pub T);

#[async_trait]
impl<T> FromRequest<Arc<AppState>> for TutorJson<T>
where
  T: DeserializeOwned + Send,
{
  type Rejection = ApiError;

  async fn from_request(req: Request, state: &Arc<AppState>) -> Result<Self, Self::Rejection> {
    match Json::<T>::from_request(req, state).await {
      Ok(Json(value)) => Ok(Self(value)),
      Err(rejection) => {
        warn!(target: "tutor_backend", status = %rejection.status(), error = %rejection.body_text(), "Rejected request body");
        Err(ApiError {
          status: rejection.status(),
          body: ErrorOut { error: rejection.body_text(), content: state.prompts().apology.clone() },
        })
      }
    }
  }
}

fn session_id(headers: &HeaderMap) -> Option<String> {
  headers
    .get(SESSION_ID_HEADER)
    .and_then(|v| v.to_str().ok())
    .map(str::trim)
    .filter(|v| !v.is_empty())
    .map(str::to_string)
}

/// Gate check. A rejection never reaches mode selection.
fn admit(state: &AppState, identity: &Identity) -> Result<(), ApiError> {
  state
    .ledger
    .consume(identity)
    .map_err(|e| ApiError::from_tutor(state, e))?;
  Ok(())
}

/// Run the controller on a working copy; commit it only for a real reply.
async fn run(
  state: &AppState,
  identity: &Identity,
  session: Option<String>,
  mut conversation: Conversation,
  submission: Submission,
) -> Result<TutorReply, ApiError> {
  let reply = state
    .controller
    .handle(&identity.key, &mut conversation, submission)
    .await
    .map_err(|e| ApiError::from_tutor(state, e))?;
  debug!(target: "tutoring", mode = reply.mode.as_str(), subject = ?reply.classification.map(|c| c.subject_domain), "Reply built");
  if let Some(sid) = session {
    if !reply.degraded {
      state.sessions.commit(&sid, conversation).await;
    }
  }
  Ok(reply)
}

async fn load_conversation(state: &AppState, session: &Option<String>) -> Conversation {
  match session {
    Some(sid) => state.sessions.snapshot(sid).await,
    None => Conversation::new(),
  }
}

/// Client-rendered history seeds an otherwise empty conversation.
fn hydrate_messages(conversation: &mut Conversation, messages: &[MessageIn]) {
  if !conversation.is_empty() {
    return;
  }
  for m in messages.iter().filter(|m| !m.content.trim().is_empty()) {
    let role = match m.sender.to_lowercase().as_str() {
      "user" | "student" => Role::Student,
      _ => Role::Tutor,
    };
    conversation.push(role, m.content.clone(), None);
  }
}

/// Make sure the explanation the client acts on exists as a tutor turn.
fn hydrate_explanation(conversation: &mut Conversation, question: &str, explanation: &str) -> Option<TurnId> {
  if explanation.trim().is_empty() {
    return None;
  }
  if let Some(id) = conversation.find_tutor_turn(explanation) {
    return Some(id);
  }
  if !question.trim().is_empty() {
    conversation.push(Role::Student, question, None);
  }
  Some(conversation.push(Role::Tutor, explanation, None))
}

/// A client that carries the exercise text stands in for a session that issued it.
fn hydrate_exercise(conversation: &mut Conversation, exercise: &str, challenge_id: Option<&str>) {
  if conversation.active_challenge.is_some() || exercise.trim().is_empty() {
    return;
  }
  let source_turn_id = conversation.push(Role::Tutor, exercise, None);
  conversation.active_challenge = Some(Challenge {
    id: challenge_id.map(str::to_string).unwrap_or_else(Challenge::new_id),
    source_turn_id,
    content: exercise.to_string(),
    subject_domain: subject_domain_of(exercise),
  });
}

#[instrument(level = "info")]
pub async fn http_health() -> impl IntoResponse { Json(HealthOut { ok: true }) }

#[instrument(level = "info", skip(state, headers, identity, body), fields(question_len = body.question.len(), messages = body.messages.len()))]
pub async fn http_post_ask(
  State(state): State<Arc<AppState>>,
  headers: HeaderMap,
  identity: Identity,
  TutorJson(body): TutorJson<AskIn>,
) -> ApiResult<ContentOut> {
  admit(&state, &identity)?;
  let session = session_id(&headers);
  let mut conversation = load_conversation(&state, &session).await;
  hydrate_messages(&mut conversation, &body.messages);

  let reply = run(&state, &identity, session, conversation, Submission::new(SubmissionKind::Ask, body.question)).await?;
  info!(target: "tutoring", degraded = reply.degraded, "HTTP ask served");
  Ok(Json(reply.into()))
}

#[instrument(level = "info", skip(state, headers, identity, body), fields(question_len = body.original_question.len(), explanation_len = body.original_explanation.len()))]
pub async fn http_post_reexplain(
  State(state): State<Arc<AppState>>,
  headers: HeaderMap,
  identity: Identity,
  TutorJson(body): TutorJson<ReexplainIn>,
) -> ApiResult<ContentOut> {
  admit(&state, &identity)?;
  let session = session_id(&headers);
  let mut conversation = load_conversation(&state, &session).await;
  let target = hydrate_explanation(&mut conversation, &body.original_question, &body.original_explanation);

  let mut submission = Submission::new(SubmissionKind::Reexplain, "");
  if let Some(id) = target {
    submission = submission.referencing_turn(id);
  }
  let reply = run(&state, &identity, session, conversation, submission).await?;
  info!(target: "tutoring", degraded = reply.degraded, "HTTP reexplain served");
  Ok(Json(reply.into()))
}

#[instrument(level = "info", skip(state, headers, identity, body), fields(question_len = body.original_question.len(), explanation_len = body.explanation.len()))]
pub async fn http_post_challenge(
  State(state): State<Arc<AppState>>,
  headers: HeaderMap,
  identity: Identity,
  TutorJson(body): TutorJson<ChallengeIn>,
) -> ApiResult<ContentOut> {
  admit(&state, &identity)?;
  let session = session_id(&headers);
  let mut conversation = load_conversation(&state, &session).await;
  let target = hydrate_explanation(&mut conversation, &body.original_question, &body.explanation);

  let mut submission = Submission::new(SubmissionKind::Challenge, "");
  if let Some(id) = target {
    submission = submission.referencing_turn(id);
  }
  let reply = run(&state, &identity, session, conversation, submission).await?;
  info!(target: "challenge", id = ?reply.challenge_id, degraded = reply.degraded, "HTTP challenge served");
  Ok(Json(reply.into()))
}

/// Always answers 2xx: missing challenges and provider faults become canned hints.
#[instrument(level = "info", skip(state, headers, identity, body), fields(exercise_len = body.exercise_content.len(), challenge_id = ?body.challenge_id))]
pub async fn http_post_hint(
  State(state): State<Arc<AppState>>,
  headers: HeaderMap,
  identity: Identity,
  TutorJson(body): TutorJson<HintIn>,
) -> ApiResult<ContentOut> {
  admit(&state, &identity)?;
  let session = session_id(&headers);
  let mut conversation = load_conversation(&state, &session).await;
  hydrate_exercise(&mut conversation, &body.exercise_content, body.challenge_id.as_deref());

  let mut submission = Submission::new(SubmissionKind::Hint, body.exercise_content);
  if let Some(id) = body.challenge_id {
    submission = submission.referencing_challenge(id);
  }
  let reply = run(&state, &identity, session, conversation, submission).await?;
  info!(target: "challenge", id = ?reply.challenge_id, degraded = reply.degraded, "HTTP hint served");
  Ok(Json(reply.into()))
}

#[instrument(level = "info", skip(state, headers, identity, multipart))]
pub async fn http_post_image_analysis(
  State(state): State<Arc<AppState>>,
  headers: HeaderMap,
  identity: Identity,
  mut multipart: Multipart,
) -> ApiResult<ContentOut> {
  let invalid = |msg: String| ApiError::from_tutor(&state, TutorError::InvalidSubmission(msg));

  let mut image: Option<(String, Vec<u8>)> = None;
  let mut query = String::new();
  let mut options = ImageOptions::default();

  while let Some(field) = multipart.next_field().await.map_err(|e| invalid(e.to_string()))? {
    let name = field.name().unwrap_or_default().to_string();
    match name.as_str() {
      "image" => {
        let mime = field.content_type().unwrap_or("image/png").to_string();
        let bytes = field.bytes().await.map_err(|e| invalid(e.to_string()))?;
        image = Some((mime, bytes.to_vec()));
      }
      "query" => query = field.text().await.map_err(|e| invalid(e.to_string()))?,
      "subject" => {
        let raw = field.text().await.map_err(|e| invalid(e.to_string()))?;
        options.subject = SubjectDomain::parse(&raw);
      }
      "mode" => {
        let raw = field.text().await.map_err(|e| invalid(e.to_string()))?;
        options.depth = AnalysisDepth::parse(&raw).unwrap_or_else(|| {
          warn!(target: "tutoring", mode = %raw, "Unknown analysis mode; using standard");
          AnalysisDepth::Standard
        });
      }
      other => warn!(target: "tutoring", field = %other, "Ignoring unknown multipart field"),
    }
  }

  let Some((mime, bytes)) = image else {
    return Err(invalid("missing image field".into()));
  };
  if !mime.starts_with("image/") {
    return Err(invalid(format!("unsupported content type {}", mime)));
  }
  if bytes.is_empty() || bytes.len() > state.limits.max_upload_bytes {
    return Err(invalid(format!("image size {} out of bounds", bytes.len())));
  }

  // The gate is charged only once the upload is known to be usable.
  admit(&state, &identity)?;
  let session = session_id(&headers);
  let conversation = load_conversation(&state, &session).await;

  let data_url = format!("data:{};base64,{}", mime, base64::engine::general_purpose::STANDARD.encode(&bytes));
  let submission = Submission::new(SubmissionKind::Image, query).with_image(ImageRef(data_url), options);
  let reply = run(&state, &identity, session, conversation, submission).await?;
  info!(target: "tutoring", image_bytes = bytes.len(), degraded = reply.degraded, "HTTP image analysis served");
  Ok(Json(reply.into()))
}

#[instrument(level = "info", skip(state, multipart))]
pub async fn http_post_transcribe(
  State(state): State<Arc<AppState>>,
  mut multipart: Multipart,
) -> Result<Json<TranscribeOut>, ApiError> {
  let failed = |error: String| ApiError {
    status: StatusCode::BAD_GATEWAY,
    body: ErrorOut { error, content: state.prompts().transcription_failed_message.clone() },
  };

  let mut audio: Option<(String, Vec<u8>)> = None;
  let mut language: Option<String> = None;
  while let Some(field) = multipart.next_field().await.map_err(|e| failed(e.to_string()))? {
    let name = field.name().unwrap_or_default().to_string();
    match name.as_str() {
      "audio" => {
        let mime = field.content_type().unwrap_or("audio/webm").to_string();
        let bytes = field.bytes().await.map_err(|e| failed(e.to_string()))?;
        audio = Some((mime, bytes.to_vec()));
      }
      "language" => {
        let raw = field.text().await.map_err(|e| failed(e.to_string()))?;
        language = Some(raw.trim().to_string()).filter(|l| !l.is_empty());
      }
      _ => {}
    }
  }

  let Some((mime, bytes)) = audio else {
    return Err(failed("missing audio field".into()));
  };
  let Some(transcriber) = &state.transcriber else {
    return Err(failed("speech-to-text is not configured".into()));
  };
  match transcriber.transcribe(bytes, &mime, language.as_deref()).await {
    Ok(text) => Ok(Json(TranscribeOut { text })),
    Err(e) => {
      warn!(target: "tutor_backend", error = %e, "Transcription failed");
      Err(failed(e.to_string()))
    }
  }
}

#[instrument(level = "info", skip(state, headers))]
pub async fn http_delete_session(
  State(state): State<Arc<AppState>>,
  headers: HeaderMap,
) -> impl IntoResponse {
  let ended = match session_id(&headers) {
    Some(sid) => state.sessions.end(&sid).await,
    None => false,
  };
  Json(SessionEndOut { ended })
}
