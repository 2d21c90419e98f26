//! Error types for the tutoring backend.
//!
//! Provider faults never reach the student: the controller turns them into the
//! apology or a canned hint. Only caller mistakes and gate rejections surface.

use thiserror::Error;

/// Faults raised by a completion or speech-to-text provider.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
  /// Transport failure, non-2xx status, or empty output.
  #[error("provider unavailable: {0}")]
  Unavailable(String),

  /// The provider refused the content (content policy).
  #[error("provider rejected the request: {0}")]
  Rejected(String),

  /// Output did not match the requested structure.
  #[error("malformed provider output: {0}")]
  Malformed(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TutorError {
  #[error("completion provider unavailable")]
  ProviderUnavailable,

  #[error("completion provider rejected the request")]
  ProviderRejected,

  /// A reexplain/challenge with no resolvable prior student turn.
  #[error("missing context: {0}")]
  MissingContext(String),

  #[error("no active challenge to hint on")]
  NoActiveChallenge,

  #[error("classification degraded: {0}")]
  ClassificationDegraded(String),

  #[error("invalid submission: {0}")]
  InvalidSubmission(String),

  #[error("usage limit reached for {identity}")]
  UsageLimitExceeded { identity: String },
}

impl From<ProviderError> for TutorError {
  fn from(err: ProviderError) -> Self {
    match err {
      ProviderError::Rejected(_) => TutorError::ProviderRejected,
      ProviderError::Unavailable(_) | ProviderError::Malformed(_) => TutorError::ProviderUnavailable,
    }
  }
}

pub type Result<T> = std::result::Result<T, TutorError>;
