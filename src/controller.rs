//! Tutoring dialogue controller.
//!
//! For every submission:
//!   - pick the single mode it maps to and check its preconditions
//!   - resolve what it acts upon (prior turns, the active challenge) once
//!   - classify, build the instruction contract, call the provider once
//!   - shape the output, then append turns and log the interaction
//!
//! Provider faults never escape: the student gets the apology, or a canned
//! hint in hint mode. Nothing is appended unless a real reply was built.

use std::sync::Arc;

use rand::seq::SliceRandom;
use tracing::{debug, info, instrument, warn};

use crate::classifier::{classify_text, Classifier};
use crate::config::Prompts;
use crate::contract::{self, ModeContext};
use crate::domain::{Challenge, Classification, Conversation, Role, Submission, SubmissionKind};
use crate::error::{Result, TutorError};
use crate::interaction::{InteractionLog, InteractionRecord};
use crate::provider::CompletionProvider;

#[derive(Clone, Debug)]
pub struct TutorReply {
  pub content: String,
  pub mode: SubmissionKind,
  pub classification: Option<Classification>,
  /// Set when a challenge was issued, or when a hint resolved to one.
  pub challenge_id: Option<String>,
  /// True when `content` is the apology or a canned hint.
  pub degraded: bool,
}

pub struct TutorController {
  provider: Arc<dyn CompletionProvider>,
  classifier: Classifier,
  prompts: Prompts,
  history_window: usize,
  log: Arc<dyn InteractionLog>,
}

/// Map a submission to its mode, checking what can be checked without context.
pub fn select_mode(submission: &Submission) -> Result<SubmissionKind> {
  match submission.kind {
    SubmissionKind::Image if submission.payload.image_ref.is_none() => {
      Err(TutorError::InvalidSubmission("image submission without an image".into()))
    }
    SubmissionKind::Ask if submission.payload.text.trim().is_empty() => {
      Err(TutorError::InvalidSubmission("empty question".into()))
    }
    kind => Ok(kind),
  }
}

/// Resolve what the submission acts upon. Reexplain and challenge target a tutor
/// turn (the referenced one, else the latest) and take the nearest student turn
/// before it as the question.
pub fn resolve_context(conversation: &Conversation, submission: &Submission) -> Result<ModeContext> {
  match submission.kind {
    SubmissionKind::Ask => Ok(ModeContext::Ask { question: submission.payload.text.clone() }),
    SubmissionKind::Image => {
      let image_ref = submission
        .payload
        .image_ref
        .clone()
        .ok_or_else(|| TutorError::InvalidSubmission("image submission without an image".into()))?;
      Ok(ModeContext::Image {
        caption: submission.payload.text.clone(),
        image_ref,
        depth: submission.payload.image_options.depth,
      })
    }
    SubmissionKind::Reexplain | SubmissionKind::Challenge => {
      let target = match submission.context_refs.turn {
        Some(id) => conversation
          .turn(id)
          .filter(|t| t.role == Role::Tutor)
          .ok_or_else(|| TutorError::MissingContext(format!("turn {} is not a tutor turn", id.0)))?,
        None => conversation
          .last_tutor_turn()
          .ok_or_else(|| TutorError::MissingContext("no prior tutor turn".into()))?,
      };
      let question = conversation
        .student_turn_before(target.id)
        .ok_or_else(|| TutorError::MissingContext("no student turn precedes the referenced explanation".into()))?;

      let question = question.text.clone();
      let explanation = target.text.clone();
      Ok(if submission.kind == SubmissionKind::Reexplain {
        ModeContext::Reexplain { question, explanation }
      } else {
        ModeContext::Challenge { question, explanation }
      })
    }
    SubmissionKind::Hint => {
      let active = conversation.active_challenge.clone().ok_or(TutorError::NoActiveChallenge)?;
      if let Some(referenced) = &submission.context_refs.challenge {
        if referenced != &active.id {
          warn!(target: "tutoring", %referenced, active = %active.id, "Hint references a superseded challenge; serving the active one");
        }
      }
      Ok(ModeContext::Hint { challenge: active })
    }
  }
}

impl TutorController {
  pub fn new(
    provider: Arc<dyn CompletionProvider>,
    prompts: Prompts,
    history_window: usize,
    log: Arc<dyn InteractionLog>,
  ) -> Self {
    let classifier = Classifier::new(provider.clone(), prompts.image_classification_system.clone());
    Self { provider, classifier, prompts, history_window, log }
  }

  pub fn prompts(&self) -> &Prompts { &self.prompts }

  /// Process one submission against the session's conversation.
  ///
  /// Errors are limited to caller mistakes (`MissingContext`, `InvalidSubmission`).
  #[instrument(level = "info", skip(self, conversation, submission), fields(kind = submission.kind.as_str(), turns = conversation.turns().len(), provider = self.provider.name()))]
  pub async fn handle(&self, identity: &str, conversation: &mut Conversation, submission: Submission) -> Result<TutorReply> {
    let mode = select_mode(&submission)?;

    let ctx = match resolve_context(conversation, &submission) {
      Ok(ctx) => ctx,
      Err(TutorError::NoActiveChallenge) => {
        warn!(target: "tutoring", "Hint requested without an active challenge; serving canned hint");
        return Ok(self.canned_hint(None));
      }
      Err(e) => {
        info!(target: "tutoring", mode = mode.as_str(), error = %e, "Submission rejected");
        return Err(e);
      }
    };

    let classification = match &ctx {
      ModeContext::Ask { .. } | ModeContext::Image { .. } => self.classifier.classify(&submission).await,
      ModeContext::Reexplain { question, .. } | ModeContext::Challenge { question, .. } => classify_text(question),
      ModeContext::Hint { challenge } => Classification {
        subject_domain: challenge.subject_domain,
        is_direct_problem_request: false,
        image_content_type: None,
      },
    };
    let hinted_challenge = match &ctx {
      ModeContext::Hint { challenge } => Some(challenge.id.clone()),
      _ => None,
    };

    let instructions = contract::build(&self.prompts, &ctx, &classification);
    debug!(
      target: "tutoring",
      subject = classification.subject_domain.as_str(),
      direct = classification.is_direct_problem_request,
      non_solving = instructions.non_solving,
      system_len = instructions.system.len(),
      "Contract built"
    );

    let history = conversation.window(self.history_window);
    let raw = match self.provider.complete(&instructions.system, history, &instructions.input).await {
      Ok(raw) => raw,
      Err(e) => {
        let fault = TutorError::from(e.clone());
        warn!(target: "tutoring", mode = mode.as_str(), error = %e, %fault, "Completion failed; degrading");
        return Ok(self.degraded(mode, hinted_challenge));
      }
    };

    let Some(content) = contract::post_process(&self.prompts, &instructions, classification.is_direct_problem_request, &raw) else {
      warn!(target: "tutoring", mode = mode.as_str(), "Completion was empty after shaping; degrading");
      return Ok(self.degraded(mode, hinted_challenge));
    };

    if instructions.non_solving {
      if let Some(question) = ctx.question() {
        let report = contract::literal_echo(question, &content);
        if report.is_suspect() {
          warn!(target: "tutoring", echoed = ?report.echoed_literals, "Reply reuses literal values from the student's problem");
        }
      }
    }

    // Commit: everything below only runs for a real reply.
    if let ModeContext::Ask { question } = &ctx {
      conversation.push(Role::Student, question.clone(), None);
    }
    if let ModeContext::Image { caption, image_ref, .. } = &ctx {
      conversation.push(Role::Student, caption.clone(), Some(image_ref.clone()));
    }
    let tutor_turn = conversation.push(Role::Tutor, content.clone(), None);

    let challenge_id = match mode {
      SubmissionKind::Challenge => {
        let challenge = Challenge {
          id: Challenge::new_id(),
          source_turn_id: tutor_turn,
          content: content.clone(),
          subject_domain: classification.subject_domain,
        };
        info!(target: "tutoring", challenge_id = %challenge.id, "Challenge issued");
        let id = challenge.id.clone();
        conversation.active_challenge = Some(challenge);
        Some(id)
      }
      _ => hinted_challenge,
    };

    self.log_interaction(InteractionRecord {
      identity: identity.to_string(),
      question: ctx.question().unwrap_or(submission.payload.text.as_str()).to_string(),
      answer: content.clone(),
      subject_domain: classification.subject_domain,
      kind: mode,
      at: chrono::Utc::now(),
    });

    info!(target: "tutoring", mode = mode.as_str(), content_len = content.len(), "Reply built");
    Ok(TutorReply { content, mode, classification: Some(classification), challenge_id, degraded: false })
  }

  fn degraded(&self, mode: SubmissionKind, challenge_id: Option<String>) -> TutorReply {
    if mode == SubmissionKind::Hint {
      return self.canned_hint(challenge_id);
    }
    TutorReply {
      content: self.prompts.apology.clone(),
      mode,
      classification: None,
      challenge_id: None,
      degraded: true,
    }
  }

  fn canned_hint(&self, challenge_id: Option<String>) -> TutorReply {
    let content = self
      .prompts
      .canned_hints
      .choose(&mut rand::thread_rng())
      .cloned()
      .unwrap_or_else(|| self.prompts.apology.clone());
    TutorReply { content, mode: SubmissionKind::Hint, classification: None, challenge_id, degraded: true }
  }

  /// Fire-and-forget: the reply never waits on the log.
  fn log_interaction(&self, record: InteractionRecord) {
    let log = self.log.clone();
    tokio::spawn(async move {
      log.record(record).await;
    });
  }
}
