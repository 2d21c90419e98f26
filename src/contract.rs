//! Instruction contracts sent to the completion provider, and the deterministic
//! post-processing applied to what comes back.
//!
//! Post-processing is textual only. It does not check whether the model leaked
//! the solution to the student's own problem; `literal_echo` merely reports
//! numbers from the question that reappear in the reply.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::config::Prompts;
use crate::domain::{
  AnalysisDepth, Challenge, Classification, ContractViolationReport, ImageContentType, ImageRef, SubmissionKind,
};
use crate::provider::UserInput;
use crate::util::{ends_with_question, fill_template, numeric_literals};

/// Headings that start content a challenge must not carry.
static SOLUTION_HEADING: Lazy<Regex> = Lazy::new(|| {
  Regex::new(r"(?im)^\s*(?:#+\s*)?(?:\*\*)?\s*(?:solutions?|answers?|réponses?|corrigé|hints|indices)\s*(?:\*\*)?\s*:")
    .expect("solution heading regex")
});

/// Everything the controller resolved for one request, per mode.
#[derive(Clone, Debug)]
pub enum ModeContext {
  Ask { question: String },
  Image { caption: String, image_ref: ImageRef, depth: AnalysisDepth },
  Reexplain { question: String, explanation: String },
  Challenge { question: String, explanation: String },
  Hint { challenge: Challenge },
}

impl ModeContext {
  pub fn kind(&self) -> SubmissionKind {
    match self {
      ModeContext::Ask { .. } => SubmissionKind::Ask,
      ModeContext::Image { .. } => SubmissionKind::Image,
      ModeContext::Reexplain { .. } => SubmissionKind::Reexplain,
      ModeContext::Challenge { .. } => SubmissionKind::Challenge,
      ModeContext::Hint { .. } => SubmissionKind::Hint,
    }
  }

  /// The student's own question this request is about, if any.
  pub fn question(&self) -> Option<&str> {
    match self {
      ModeContext::Ask { question }
      | ModeContext::Reexplain { question, .. }
      | ModeContext::Challenge { question, .. } => Some(question.as_str()),
      ModeContext::Image { caption, .. } => Some(caption.as_str()),
      ModeContext::Hint { .. } => None,
    }
  }
}

#[derive(Clone, Debug)]
pub struct InstructionContract {
  pub mode: SubmissionKind,
  pub system: String,
  pub input: UserInput,
  /// True when the non-solving directive is part of `system`.
  pub non_solving: bool,
}

/// Modes where a direct problem request triggers the non-solving directive.
fn guards_against_solving(mode: SubmissionKind) -> bool {
  matches!(mode, SubmissionKind::Ask | SubmissionKind::Image | SubmissionKind::Reexplain)
}

pub fn build(prompts: &Prompts, ctx: &ModeContext, classification: &Classification) -> InstructionContract {
  let subject = classification.subject_domain.as_str();
  let mode = ctx.kind();
  let persona = fill_template(&prompts.persona_system, &[("subject", subject)]);

  let (directive, input) = match ctx {
    ModeContext::Ask { question } => (prompts.ask_directive.clone(), UserInput::text(question.clone())),
    ModeContext::Image { caption, image_ref, depth } => {
      let content_type = classification.image_content_type.unwrap_or(ImageContentType::Unknown);
      let content_type = format!("{:?}", content_type).to_lowercase();
      let mut d = fill_template(&prompts.image_directive, &[("content_type", content_type.as_str())]);
      match depth {
        AnalysisDepth::Standard => {}
        AnalysisDepth::Detailed => {
          d.push('\n');
          d.push_str(&prompts.image_detailed_addendum);
        }
        AnalysisDepth::StepByStep => {
          d.push('\n');
          d.push_str(&prompts.image_step_by_step_addendum);
        }
      }
      let text = if caption.trim().is_empty() { "Can you help me understand this image?".to_string() } else { caption.clone() };
      (d, UserInput { text, image_ref: Some(image_ref.clone()) })
    }
    ModeContext::Reexplain { question, explanation } => (
      fill_template(&prompts.reexplain_directive, &[("question", question.as_str()), ("explanation", explanation.as_str())]),
      UserInput::text("I didn't quite get that. Could you explain it another way?"),
    ),
    ModeContext::Challenge { question, explanation } => (
      fill_template(
        &prompts.challenge_directive,
        &[("subject", subject), ("question", question.as_str()), ("explanation", explanation.as_str())],
      ),
      UserInput::text("Give me a practice problem on this."),
    ),
    ModeContext::Hint { challenge } => (
      fill_template(&prompts.hint_directive, &[("challenge", challenge.content.as_str())]),
      UserInput::text("Can I have a hint?"),
    ),
  };

  let non_solving = classification.is_direct_problem_request && guards_against_solving(mode);
  let mut system = format!("{}\n\n{}", persona, directive);
  if non_solving {
    system.push_str("\n\n");
    system.push_str(&prompts.non_solving_directive);
  }

  InstructionContract { mode, system, input, non_solving }
}

/// Shape the raw model output for the mode. Returns None when nothing usable is left.
pub fn post_process(prompts: &Prompts, contract: &InstructionContract, direct_request: bool, raw: &str) -> Option<String> {
  let text = raw.trim();
  let shaped = match contract.mode {
    SubmissionKind::Challenge => strip_solution(text),
    SubmissionKind::Hint => first_paragraph(text),
    SubmissionKind::Ask | SubmissionKind::Image | SubmissionKind::Reexplain => {
      if direct_request && !text.is_empty() && !ends_with_question(text) {
        format!("{}\n\n{}", text, prompts.clarifying_prompt)
      } else {
        text.to_string()
      }
    }
  };
  if shaped.trim().is_empty() { None } else { Some(shaped) }
}

fn strip_solution(text: &str) -> String {
  match SOLUTION_HEADING.find(text) {
    Some(m) => text[..m.start()].trim_end().to_string(),
    None => text.to_string(),
  }
}

fn first_paragraph(text: &str) -> String {
  text.split("\n\n")
    .map(str::trim)
    .find(|p| !p.is_empty())
    .unwrap_or("")
    .to_string()
}

/// Numbers from the question (other than 0 and 1) that reappear in the reply.
pub fn literal_echo(question: &str, reply: &str) -> ContractViolationReport {
  let in_reply = numeric_literals(reply);
  let echoed_literals = numeric_literals(question)
    .into_iter()
    .filter(|lit| lit != "0" && lit != "1" && in_reply.contains(lit))
    .collect();
  ContractViolationReport { echoed_literals }
}
