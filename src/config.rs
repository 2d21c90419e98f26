//! Loading tutor configuration (prompts + limits) from TOML.
//!
//! See `TutorConfig`, `Prompts` and `Limits` for expected schema.

use serde::Deserialize;
use tracing::{info, error};

#[derive(Clone, Debug, Deserialize, Default)]
pub struct TutorConfig {
  #[serde(default)]
  pub prompts: Prompts,
  #[serde(default)]
  pub limits: Limits,
  #[serde(default)]
  pub gate: GateConfig,
}

/// Trust settings for headers set by the upstream auth proxy.
#[derive(Clone, Debug, Deserialize, Default)]
#[serde(default)]
pub struct GateConfig {
  /// Value the proxy sends in `x-proxy-secret`. Unset means `x-user-id` and
  /// `x-forwarded-for` are never trusted.
  pub trusted_proxy_secret: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Limits {
  /// Questions an anonymous identity may ask before the gate rejects it.
  pub anonymous_question_limit: u32,
  /// Number of prior turns sent to the model as context.
  pub history_window: usize,
  /// Upper bound for image/audio uploads.
  pub max_upload_bytes: usize,
}

impl Default for Limits {
  fn default() -> Self {
    Self {
      anonymous_question_limit: 20,
      history_window: 12,
      max_upload_bytes: 10 * 1024 * 1024,
    }
  }
}

/// System directives used by the controller. Templates use `{key}` placeholders
/// filled by `util::fill_template`. Override any of them in TOML to tune tone.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Prompts {
  pub persona_system: String,
  pub non_solving_directive: String,
  pub ask_directive: String,
  pub reexplain_directive: String,
  pub challenge_directive: String,
  pub hint_directive: String,
  pub image_directive: String,
  pub image_detailed_addendum: String,
  pub image_step_by_step_addendum: String,
  pub image_classification_system: String,
  pub clarifying_prompt: String,
  pub apology: String,
  pub usage_limit_message: String,
  pub missing_context_message: String,
  pub transcription_failed_message: String,
  pub canned_hints: Vec<String>,
}

impl Default for Prompts {
  fn default() -> Self {
    Self {
      persona_system: "You are a patient Socratic tutor. You guide students to understand concepts instead of handing out answers. Subject: {subject}.".into(),
      non_solving_directive: "NON-NEGOTIABLE: do not solve the student's own problem. Identify the abstract concept behind it, explain the method using symbolic placeholders, then illustrate it with a freshly invented, different example that uses different concrete values. Never state the final numeric or literal answer to the student's own problem. End with a guiding question.".into(),
      ask_directive: "Explain the concept behind the student's question clearly and concisely, building intuition before procedure.".into(),
      reexplain_directive: "The student did not understand the previous explanation.\nOriginal question: {question}\nPrevious explanation: {explanation}\nExplain the same concept again with materially different wording and a different approach (analogy, visual description or smaller steps).".into(),
      challenge_directive: "Create ONE new practice problem in {subject}, slightly harder than this question: {question}\nIt must test the concept explained here: {explanation}\nOutput exactly: the problem statement, then a section 'Approach:' with one or two sentences on how to start. Do NOT include a solution, an answer or a list of hints.".into(),
      hint_directive: "The student is working on this exercise:\n{challenge}\nGive ONE short clue that helps them take the next step. Do not reveal the answer or any intermediate result.".into(),
      image_directive: "The student shared an image ({content_type}). Ground your explanation in what the image shows and teach the underlying concept.".into(),
      image_detailed_addendum: "Go into detail: cover every element of the image that matters for the concept.".into(),
      image_step_by_step_addendum: "Structure the explanation as numbered steps of the method, using placeholders instead of the image's values.".into(),
      image_classification_system: "Classify the educational content of the image. Reply with JSON only: {\"subject\": \"math|language|science|history|general\", \"content_type\": \"problem|diagram|text|chart|unknown\"}.".into(),
      clarifying_prompt: "Is this explanation clear, or would you like more detail on a specific part?".into(),
      apology: "I'm sorry, I had trouble preparing an explanation just now. Could you rephrase your question or try again in a moment?".into(),
      usage_limit_message: "You've reached the number of free questions for now. Sign in to keep learning with me!".into(),
      missing_context_message: "I couldn't find the question this refers to. Could you ask it again so I can help?".into(),
      transcription_failed_message: "Sorry, I could not transcribe that recording. Could you try again or type your question?".into(),
      canned_hints: vec![
        "Start by writing down what you know and what you are asked to find.".into(),
        "Look for a rule or formula that connects the information you have to what you need.".into(),
        "Try a simpler version of the problem first, then apply the same steps.".into(),
        "Break the problem into smaller steps and check each one before moving on.".into(),
      ],
    }
  }
}

/// Attempt to load `TutorConfig` from TUTOR_CONFIG_PATH. On any parsing/IO error, returns None.
pub fn load_tutor_config_from_env() -> Option<TutorConfig> {
  let path = std::env::var("TUTOR_CONFIG_PATH").ok()?;
  match std::fs::read_to_string(&path) {
    Ok(s) => match parse_tutor_config(&s) {
      Ok(cfg) => {
        info!(target: "tutor_backend", %path, "Loaded tutor config (TOML)");
        Some(cfg)
      }
      Err(e) => {
        error!(target: "tutor_backend", %path, error = %e, "Failed to parse TOML config");
        None
      }
    },
    Err(e) => {
      error!(target: "tutor_backend", %path, error = %e, "Failed to read TOML config file");
      None
    }
  }
}

pub fn parse_tutor_config(s: &str) -> Result<TutorConfig, toml::de::Error> {
  let mut cfg = toml::from_str::<TutorConfig>(s)?;
  // An empty list would leave the hint fallback with nothing to serve.
  if cfg.prompts.canned_hints.is_empty() {
    cfg.prompts.canned_hints = Prompts::default().canned_hints;
  }
  Ok(cfg)
}
