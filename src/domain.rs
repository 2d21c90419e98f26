//! Domain models used by the backend: conversation turns, submissions, challenges, classification.

use serde::{Deserialize, Serialize};

/// Who authored a turn.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Role {
  Student,
  Tutor,
}

/// Position of a turn inside its conversation. Turns are append-only,
/// so the position never changes once assigned.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct TurnId(pub usize);

/// Opaque reference to uploaded image content (a `data:` URL in practice).
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImageRef(pub String);

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConversationTurn {
  pub id: TurnId,
  pub role: Role,
  pub text: String,
  #[serde(default)] pub image_ref: Option<ImageRef>,
}

/// A practice problem issued by the tutor. Later hint requests resolve to it.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Challenge {
  pub id: String,
  pub source_turn_id: TurnId,
  pub content: String,
  pub subject_domain: SubjectDomain,
}

impl Challenge {
  pub fn new_id() -> String {
    let millis = chrono::Utc::now().timestamp_millis();
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("challenge-{}-{}", millis, &suffix[..8])
  }
}

/// Ordered transcript of one session plus the challenge hints resolve to.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Conversation {
  turns: Vec<ConversationTurn>,
  #[serde(default)] pub active_challenge: Option<Challenge>,
}

impl Conversation {
  pub fn new() -> Self { Self::default() }

  pub fn turns(&self) -> &[ConversationTurn] { &self.turns }

  pub fn is_empty(&self) -> bool { self.turns.is_empty() }

  pub fn turn(&self, id: TurnId) -> Option<&ConversationTurn> { self.turns.get(id.0) }

  /// Append a turn and return its id. Existing turns are never touched.
  pub fn push(&mut self, role: Role, text: impl Into<String>, image_ref: Option<ImageRef>) -> TurnId {
    let id = TurnId(self.turns.len());
    self.turns.push(ConversationTurn { id, role, text: text.into(), image_ref });
    id
  }

  pub fn last_tutor_turn(&self) -> Option<&ConversationTurn> {
    self.turns.iter().rev().find(|t| t.role == Role::Tutor)
  }

  /// Nearest student turn strictly before `id`, scanning backward.
  pub fn student_turn_before(&self, id: TurnId) -> Option<&ConversationTurn> {
    self.turns[..id.0.min(self.turns.len())]
      .iter()
      .rev()
      .find(|t| t.role == Role::Student)
  }

  /// Last tutor turn whose text matches exactly.
  pub fn find_tutor_turn(&self, text: &str) -> Option<TurnId> {
    self.turns
      .iter()
      .rev()
      .find(|t| t.role == Role::Tutor && t.text == text)
      .map(|t| t.id)
  }

  /// Most recent `n` turns, oldest first.
  pub fn window(&self, n: usize) -> &[ConversationTurn] {
    let start = self.turns.len().saturating_sub(n);
    &self.turns[start..]
  }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionKind {
  Ask,
  Reexplain,
  Challenge,
  Hint,
  Image,
}

impl SubmissionKind {
  pub fn as_str(&self) -> &'static str {
    match self {
      SubmissionKind::Ask => "ask",
      SubmissionKind::Reexplain => "reexplain",
      SubmissionKind::Challenge => "challenge",
      SubmissionKind::Hint => "hint",
      SubmissionKind::Image => "image",
    }
  }
}

/// How thorough an image explanation should be.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum AnalysisDepth {
  #[default]
  Standard,
  Detailed,
  StepByStep,
}

impl AnalysisDepth {
  pub fn parse(s: &str) -> Option<Self> {
    match s.trim().to_lowercase().as_str() {
      "standard" => Some(AnalysisDepth::Standard),
      "detailed" => Some(AnalysisDepth::Detailed),
      "step-by-step" | "step_by_step" | "stepbystep" => Some(AnalysisDepth::StepByStep),
      _ => None,
    }
  }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ImageOptions {
  #[serde(default)] pub subject: Option<SubjectDomain>,
  #[serde(default)] pub depth: AnalysisDepth,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Payload {
  pub text: String,
  #[serde(default)] pub image_ref: Option<ImageRef>,
  #[serde(default)] pub image_options: ImageOptions,
}

/// Explicit pointers to what a reexplain/challenge/hint acts upon.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ContextRefs {
  #[serde(default)] pub turn: Option<TurnId>,
  #[serde(default)] pub challenge: Option<String>,
}

/// One discrete student action routed to the controller.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Submission {
  pub kind: SubmissionKind,
  pub payload: Payload,
  #[serde(default)] pub context_refs: ContextRefs,
}

impl Submission {
  pub fn new(kind: SubmissionKind, text: impl Into<String>) -> Self {
    Self {
      kind,
      payload: Payload { text: text.into(), ..Default::default() },
      context_refs: ContextRefs::default(),
    }
  }

  pub fn with_image(mut self, image_ref: ImageRef, options: ImageOptions) -> Self {
    self.payload.image_ref = Some(image_ref);
    self.payload.image_options = options;
    self
  }

  pub fn referencing_turn(mut self, id: TurnId) -> Self {
    self.context_refs.turn = Some(id);
    self
  }

  pub fn referencing_challenge(mut self, id: impl Into<String>) -> Self {
    self.context_refs.challenge = Some(id.into());
    self
  }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum SubjectDomain {
  Math,
  Language,
  Science,
  History,
  #[default]
  General,
}

impl SubjectDomain {
  pub fn as_str(&self) -> &'static str {
    match self {
      SubjectDomain::Math => "math",
      SubjectDomain::Language => "language",
      SubjectDomain::Science => "science",
      SubjectDomain::History => "history",
      SubjectDomain::General => "general",
    }
  }

  /// Lenient parse used for model output and form fields.
  pub fn parse(s: &str) -> Option<Self> {
    match s.trim().to_lowercase().as_str() {
      "math" | "maths" | "mathematics" | "mathématiques" => Some(SubjectDomain::Math),
      "language" | "languages" | "french" | "english" | "grammar" => Some(SubjectDomain::Language),
      "science" | "sciences" | "physics" | "chemistry" | "biology" => Some(SubjectDomain::Science),
      "history" | "histoire" => Some(SubjectDomain::History),
      "general" => Some(SubjectDomain::General),
      _ => None,
    }
  }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ImageContentType {
  Problem,
  Diagram,
  Text,
  Chart,
  #[default]
  Unknown,
}

impl ImageContentType {
  pub fn parse(s: &str) -> Self {
    match s.trim().to_lowercase().as_str() {
      "problem" | "exercise" => ImageContentType::Problem,
      "diagram" => ImageContentType::Diagram,
      "text" => ImageContentType::Text,
      "chart" | "graph" => ImageContentType::Chart,
      _ => ImageContentType::Unknown,
    }
  }
}

#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq)]
pub struct Classification {
  pub subject_domain: SubjectDomain,
  pub is_direct_problem_request: bool,
  pub image_content_type: Option<ImageContentType>,
}

/// Numeric literals of the student's question that reappear in a reply.
/// Observational only: nothing retries on it.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ContractViolationReport {
  pub echoed_literals: Vec<String>,
}

impl ContractViolationReport {
  pub fn is_suspect(&self) -> bool { !self.echoed_literals.is_empty() }
}
