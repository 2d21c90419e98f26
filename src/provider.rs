//! Completion provider seam.
//!
//! Every model call in the crate goes through `CompletionProvider`. Free text comes
//! back from `complete`; structured output goes through `complete_structured`, so
//! JSON parsing failures stay inside this module.

use async_trait::async_trait;
use serde::de::DeserializeOwned;

use crate::domain::{ConversationTurn, ImageRef};
use crate::error::ProviderError;

/// The newest student input handed to the model.
#[derive(Clone, Debug, Default)]
pub struct UserInput {
  pub text: String,
  pub image_ref: Option<ImageRef>,
}

impl UserInput {
  pub fn text(text: impl Into<String>) -> Self {
    Self { text: text.into(), image_ref: None }
  }
}

/// Text/vision generative model behind a uniform call.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
  /// Provider name for logging.
  fn name(&self) -> &'static str;

  async fn complete(
    &self,
    system: &str,
    history: &[ConversationTurn],
    input: &UserInput,
  ) -> Result<String, ProviderError>;

  /// Same call, but the model is asked for a single JSON object.
  async fn complete_json(
    &self,
    system: &str,
    history: &[ConversationTurn],
    input: &UserInput,
  ) -> Result<serde_json::Value, ProviderError>;
}

/// Typed structured completion.
pub async fn complete_structured<T: DeserializeOwned>(
  provider: &dyn CompletionProvider,
  system: &str,
  history: &[ConversationTurn],
  input: &UserInput,
) -> Result<T, ProviderError> {
  let value = provider.complete_json(system, history, input).await?;
  serde_json::from_value::<T>(value).map_err(|e| ProviderError::Malformed(e.to_string()))
}

/// Speech-to-text collaborator.
#[async_trait]
pub trait SpeechToText: Send + Sync {
  async fn transcribe(&self, audio: Vec<u8>, mime: &str, language: Option<&str>) -> Result<String, ProviderError>;
}

/// Used when no API key is configured: every call is unavailable, so the
/// controller serves its degraded replies.
pub struct OfflineProvider;

#[async_trait]
impl CompletionProvider for OfflineProvider {
  fn name(&self) -> &'static str { "offline" }

  async fn complete(&self, _: &str, _: &[ConversationTurn], _: &UserInput) -> Result<String, ProviderError> {
    Err(ProviderError::Unavailable("no completion provider configured".into()))
  }

  async fn complete_json(&self, _: &str, _: &[ConversationTurn], _: &UserInput) -> Result<serde_json::Value, ProviderError> {
    Err(ProviderError::Unavailable("no completion provider configured".into()))
  }
}

#[cfg(test)]
pub mod testing {
  //! Scripted provider for tests: replays queued results and records every call.

  use std::collections::VecDeque;
  use std::sync::Mutex;

  use super::*;

  #[derive(Clone, Debug)]
  pub struct RecordedCall {
    pub system: String,
    pub history_len: usize,
    pub input: String,
    pub had_image: bool,
    pub structured: bool,
  }

  #[derive(Default)]
  pub struct ScriptedProvider {
    replies: Mutex<VecDeque<Result<String, ProviderError>>>,
    json_replies: Mutex<VecDeque<Result<serde_json::Value, ProviderError>>>,
    calls: Mutex<Vec<RecordedCall>>,
  }

  impl ScriptedProvider {
    pub fn new() -> Self { Self::default() }

    pub fn reply(self, text: &str) -> Self {
      self.replies.lock().unwrap().push_back(Ok(text.to_string()));
      self
    }

    pub fn fail(self, err: ProviderError) -> Self {
      self.replies.lock().unwrap().push_back(Err(err));
      self
    }

    pub fn json(self, value: serde_json::Value) -> Self {
      self.json_replies.lock().unwrap().push_back(Ok(value));
      self
    }

    pub fn json_fail(self, err: ProviderError) -> Self {
      self.json_replies.lock().unwrap().push_back(Err(err));
      self
    }

    pub fn calls(&self) -> Vec<RecordedCall> { self.calls.lock().unwrap().clone() }

    fn record(&self, system: &str, history: &[ConversationTurn], input: &UserInput, structured: bool) {
      self.calls.lock().unwrap().push(RecordedCall {
        system: system.to_string(),
        history_len: history.len(),
        input: input.text.clone(),
        had_image: input.image_ref.is_some(),
        structured,
      });
    }
  }

  #[async_trait]
  impl CompletionProvider for ScriptedProvider {
    fn name(&self) -> &'static str { "scripted" }

    async fn complete(&self, system: &str, history: &[ConversationTurn], input: &UserInput) -> Result<String, ProviderError> {
      self.record(system, history, input, false);
      self.replies
        .lock()
        .unwrap()
        .pop_front()
        .unwrap_or_else(|| Err(ProviderError::Unavailable("script exhausted".into())))
    }

    async fn complete_json(&self, system: &str, history: &[ConversationTurn], input: &UserInput) -> Result<serde_json::Value, ProviderError> {
      self.record(system, history, input, true);
      self.json_replies
        .lock()
        .unwrap()
        .pop_front()
        .unwrap_or_else(|| Err(ProviderError::Unavailable("script exhausted".into())))
    }
  }
}

#[cfg(test)]
mod tests {
  use super::testing::ScriptedProvider;
  use super::*;
  use serde::Deserialize;

  #[derive(Deserialize, Debug)]
  struct Shape { subject: String }

  #[tokio::test]
  async fn structured_completion_maps_shape_mismatch_to_malformed() {
    let p = ScriptedProvider::new()
      .json(serde_json::json!({ "subject": "math" }))
      .json(serde_json::json!({ "other": 1 }));

    let ok: Shape = complete_structured(&p, "sys", &[], &UserInput::text("x")).await.unwrap();
    assert_eq!(ok.subject, "math");

    let err = complete_structured::<Shape>(&p, "sys", &[], &UserInput::text("x")).await.unwrap_err();
    assert!(matches!(err, ProviderError::Malformed(_)));
  }

  #[tokio::test]
  async fn offline_provider_is_always_unavailable() {
    let err = OfflineProvider.complete("s", &[], &UserInput::text("q")).await.unwrap_err();
    assert!(matches!(err, ProviderError::Unavailable(_)));
  }
}
