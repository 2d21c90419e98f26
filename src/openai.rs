//! Minimal OpenAI client behind `CompletionProvider` and `SpeechToText`.
//!
//! We only call chat.completions (plain text or a strict JSON object) and
//! audio.transcriptions. Calls are instrumented and log model names, latencies,
//! and response sizes (not contents).
//!
//! NOTE: We never log the API key.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument};

use crate::domain::{ConversationTurn, Role};
use crate::error::ProviderError;
use crate::provider::{CompletionProvider, SpeechToText, UserInput};

const CONTENT_POLICY_CODES: &[&str] = &["content_policy_violation", "content_filter"];

#[derive(Clone)]
pub struct OpenAI {
  pub client: reqwest::Client,
  pub api_key: String,
  pub base_url: String,
  pub fast_model: String,
  pub strong_model: String,
  pub vision_model: String,
  pub transcribe_model: String,
}

impl OpenAI {
  /// Construct the client if we find OPENAI_API_KEY; otherwise return None.
  pub fn from_env() -> Option<Self> {
    let api_key = std::env::var("OPENAI_API_KEY").ok()?;
    let base_url =
      std::env::var("OPENAI_BASE_URL").unwrap_or_else(|_| "https://api.openai.com/v1".into());
    let fast_model =
      std::env::var("OPENAI_FAST_MODEL").unwrap_or_else(|_| "gpt-4o-mini".into());
    let strong_model =
      std::env::var("OPENAI_STRONG_MODEL").unwrap_or_else(|_| "gpt-4o".into());
    let vision_model =
      std::env::var("OPENAI_VISION_MODEL").unwrap_or_else(|_| strong_model.clone());
    let transcribe_model =
      std::env::var("OPENAI_TRANSCRIBE_MODEL").unwrap_or_else(|_| "whisper-1".into());

    let client = reqwest::Client::builder()
      .timeout(Duration::from_secs(45))
      .build()
      .ok()?;

    Some(Self { client, api_key, base_url, fast_model, strong_model, vision_model, transcribe_model })
  }

  fn model_for(&self, input: &UserInput, json: bool) -> &str {
    if input.image_ref.is_some() {
      &self.vision_model
    } else if json {
      &self.fast_model
    } else {
      &self.strong_model
    }
  }

  /// One chat.completions round trip; returns the first choice's text.
  #[instrument(level = "info", skip(self, model, messages), fields(model = %model, messages = messages.len()))]
  async fn chat(
    &self,
    model: &str,
    messages: Vec<ChatMessageReq>,
    temperature: f32,
    json: bool,
  ) -> Result<String, ProviderError> {
    let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
    let req = ChatCompletionRequest {
      model: model.to_string(),
      messages,
      temperature,
      response_format: json.then(|| ResponseFormat { r#type: "json_object".into() }),
    };

    let start = Instant::now();
    let res = self.client.post(&url)
      .header(USER_AGENT, "tutor-backend/0.1")
      .header(CONTENT_TYPE, "application/json")
      .header(AUTHORIZATION, format!("Bearer {}", self.api_key))
      .json(&req).send().await
      .map_err(|e| ProviderError::Unavailable(e.to_string()))?;

    if !res.status().is_success() {
      let status = res.status();
      let body = res.text().await.unwrap_or_default();
      let err = classify_http_failure(status, &body);
      error!(?status, elapsed = ?start.elapsed(), error = %err, "OpenAI call failed");
      return Err(err);
    }

    let body: ChatCompletionResponse = res.json().await
      .map_err(|e| ProviderError::Unavailable(format!("response decode: {}", e)))?;
    if let Some(usage) = &body.usage {
      info!(prompt_tokens = ?usage.prompt_tokens, completion_tokens = ?usage.completion_tokens, total_tokens = ?usage.total_tokens, "OpenAI usage");
    }
    let choice = body.choices.into_iter().next()
      .ok_or_else(|| ProviderError::Unavailable("no choices returned".into()))?;
    if choice.finish_reason.as_deref() == Some("content_filter") {
      return Err(ProviderError::Rejected("completion stopped by content filter".into()));
    }
    let text = choice.message.content.unwrap_or_default().trim().to_string();
    if text.is_empty() {
      return Err(ProviderError::Unavailable("empty completion".into()));
    }
    info!(elapsed = ?start.elapsed(), response_len = text.len(), "Model response received");
    Ok(text)
  }
}

/// Build the message list: system, prior turns (text only), then the new input.
fn build_messages(system: &str, history: &[ConversationTurn], input: &UserInput) -> Vec<ChatMessageReq> {
  let mut messages = Vec::with_capacity(history.len() + 2);
  messages.push(ChatMessageReq { role: "system".into(), content: MessageContent::Text(system.to_string()) });

  for turn in history {
    let role = match turn.role {
      Role::Student => "user",
      Role::Tutor => "assistant",
    };
    let text = if turn.image_ref.is_some() {
      format!("[image shared] {}", turn.text).trim().to_string()
    } else {
      turn.text.clone()
    };
    messages.push(ChatMessageReq { role: role.into(), content: MessageContent::Text(text) });
  }

  let content = match &input.image_ref {
    Some(image) => MessageContent::Parts(vec![
      ContentPart::Text { text: input.text.clone() },
      ContentPart::ImageUrl { image_url: ImageUrl { url: image.0.clone() } },
    ]),
    None => MessageContent::Text(input.text.clone()),
  };
  messages.push(ChatMessageReq { role: "user".into(), content });
  messages
}

/// Content-policy refusals are `Rejected`; every other failure is `Unavailable`.
fn classify_http_failure(status: StatusCode, body: &str) -> ProviderError {
  let (code, msg) = extract_openai_error(body).unwrap_or((None, body.to_string()));
  let is_policy = code.as_deref().map(|c| CONTENT_POLICY_CODES.contains(&c)).unwrap_or(false);
  if status == StatusCode::BAD_REQUEST && is_policy {
    ProviderError::Rejected(msg)
  } else {
    ProviderError::Unavailable(format!("OpenAI HTTP {}: {}", status, msg))
  }
}

#[async_trait]
impl CompletionProvider for OpenAI {
  fn name(&self) -> &'static str { "openai" }

  async fn complete(
    &self,
    system: &str,
    history: &[ConversationTurn],
    input: &UserInput,
  ) -> Result<String, ProviderError> {
    let messages = build_messages(system, history, input);
    self.chat(self.model_for(input, false), messages, 0.4, false).await
  }

  async fn complete_json(
    &self,
    system: &str,
    history: &[ConversationTurn],
    input: &UserInput,
  ) -> Result<serde_json::Value, ProviderError> {
    let messages = build_messages(system, history, input);
    let text = self.chat(self.model_for(input, true), messages, 0.0, true).await?;
    serde_json::from_str(&text).map_err(|e| ProviderError::Malformed(format!("JSON parse error: {}", e)))
  }
}

#[async_trait]
impl SpeechToText for OpenAI {
  #[instrument(level = "info", skip(self, audio), fields(audio_len = audio.len(), %mime))]
  async fn transcribe(&self, audio: Vec<u8>, mime: &str, language: Option<&str>) -> Result<String, ProviderError> {
    let url = format!("{}/audio/transcriptions", self.base_url.trim_end_matches('/'));
    let ext = mime.split('/').nth(1).and_then(|s| s.split(';').next()).unwrap_or("webm");
    let part = reqwest::multipart::Part::bytes(audio)
      .file_name(format!("audio.{}", ext))
      .mime_str(mime)
      .map_err(|e| ProviderError::Unavailable(format!("invalid mime: {}", e)))?;
    let mut form = reqwest::multipart::Form::new()
      .text("model", self.transcribe_model.clone())
      .part("file", part);
    if let Some(lang) = language {
      form = form.text("language", lang.to_string());
    }

    // Content-Type is set by reqwest for multipart bodies.
    let res = self.client.post(&url)
      .header(USER_AGENT, "tutor-backend/0.1")
      .header(AUTHORIZATION, format!("Bearer {}", self.api_key))
      .multipart(form)
      .send().await
      .map_err(|e| ProviderError::Unavailable(e.to_string()))?;

    if !res.status().is_success() {
      let status = res.status();
      let body = res.text().await.unwrap_or_default();
      return Err(classify_http_failure(status, &body));
    }

    #[derive(Deserialize)]
    struct Transcription { text: String }
    let t: Transcription = res.json().await
      .map_err(|e| ProviderError::Unavailable(format!("response decode: {}", e)))?;
    let text = t.text.trim().to_string();
    if text.is_empty() {
      return Err(ProviderError::Unavailable("empty transcription".into()));
    }
    Ok(text)
  }
}

// --- Chat DTOs ---

#[derive(Serialize)]
struct ChatCompletionRequest {
  model: String,
  messages: Vec<ChatMessageReq>,
  temperature: f32,
  #[serde(skip_serializing_if = "Option::is_none")]
  response_format: Option<ResponseFormat>,
}
#[derive(Serialize)]
struct ChatMessageReq { role: String, content: MessageContent }
#[derive(Serialize)]
#[serde(untagged)]
enum MessageContent {
  Text(String),
  Parts(Vec<ContentPart>),
}
#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart {
  Text { text: String },
  ImageUrl { image_url: ImageUrl },
}
#[derive(Serialize)]
struct ImageUrl { url: String }
#[derive(Serialize)]
struct ResponseFormat { #[serde(rename = "type")] r#type: String }

#[derive(Deserialize)]
struct ChatCompletionResponse {
  choices: Vec<ChatChoice>,
  #[serde(default)] usage: Option<Usage>,
}
#[derive(Deserialize)]
struct ChatChoice {
  message: ChatMessageResp,
  #[serde(default)] finish_reason: Option<String>,
}
#[derive(Deserialize)]
struct ChatMessageResp { content: Option<String> }
#[derive(Deserialize)]
struct Usage {
  #[serde(default)] prompt_tokens: Option<u32>,
  #[serde(default)] completion_tokens: Option<u32>,
  #[serde(default)] total_tokens: Option<u32>,
}

/// Try to extract the error code and a clean message from an OpenAI error body.
fn extract_openai_error(body: &str) -> Option<(Option<String>, String)> {
  #[derive(Deserialize)]
  struct EWrap { error: EObj }
  #[derive(Deserialize)]
  struct EObj {
    message: String,
    #[serde(default)] code: Option<String>,
  }
  serde_json::from_str::<EWrap>(body).ok().map(|w| (w.error.code, w.error.message))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::domain::{Conversation, ImageRef};

  #[test]
  fn messages_map_roles_and_attach_image_to_new_input_only() {
    let mut conv = Conversation::new();
    conv.push(Role::Student, "what is this?", Some(ImageRef("data:image/png;base64,AAAA".into())));
    conv.push(Role::Tutor, "A right triangle.", None);
    let input = UserInput { text: "and this?".into(), image_ref: Some(ImageRef("data:image/png;base64,BBBB".into())) };

    let msgs = build_messages("sys", conv.turns(), &input);
    let json = serde_json::to_value(&msgs).unwrap();

    assert_eq!(json[0]["role"], "system");
    assert_eq!(json[1]["role"], "user");
    assert_eq!(json[1]["content"], "[image shared] what is this?");
    assert_eq!(json[2]["role"], "assistant");
    assert_eq!(json[3]["content"][0]["type"], "text");
    assert_eq!(json[3]["content"][1]["type"], "image_url");
    assert_eq!(json[3]["content"][1]["image_url"]["url"], "data:image/png;base64,BBBB");
  }

  #[test]
  fn request_body_carries_only_set_options() {
    let req = ChatCompletionRequest {
      model: "gpt-4o-mini".into(),
      messages: build_messages("sys", &[], &UserInput { text: "q".into(), image_ref: None }),
      temperature: 0.0,
      response_format: Some(ResponseFormat { r#type: "json_object".into() }),
    };
    let json = serde_json::to_value(&req).unwrap();
    assert_eq!(json["response_format"]["type"], "json_object");
    assert!(json.get("max_tokens").is_none());

    let plain = ChatCompletionRequest { response_format: None, ..req };
    assert!(serde_json::to_value(&plain).unwrap().get("response_format").is_none());
  }

  #[test]
  fn content_policy_errors_are_rejections() {
    let body = r#"{"error":{"message":"Your request was rejected","code":"content_policy_violation"}}"#;
    assert!(matches!(classify_http_failure(StatusCode::BAD_REQUEST, body), ProviderError::Rejected(_)));

    let body = r#"{"error":{"message":"Rate limit","code":"rate_limit_exceeded"}}"#;
    assert!(matches!(classify_http_failure(StatusCode::TOO_MANY_REQUESTS, body), ProviderError::Unavailable(_)));
    assert!(matches!(classify_http_failure(StatusCode::BAD_GATEWAY, "<html>"), ProviderError::Unavailable(_)));
  }
}
