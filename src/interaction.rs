//! Interaction log collaborator.
//!
//! After a successful reply the controller hands a record to the log on a
//! spawned task and does not wait for it. The default sink writes the record as
//! a structured tracing event; a database-backed sink plugs in behind the trait.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use crate::domain::{SubjectDomain, SubmissionKind};

#[derive(Clone, Debug, Serialize)]
pub struct InteractionRecord {
  pub identity: String,
  pub question: String,
  pub answer: String,
  pub subject_domain: SubjectDomain,
  #[serde(rename = "type")]
  pub kind: SubmissionKind,
  pub at: DateTime<Utc>,
}

#[async_trait]
pub trait InteractionLog: Send + Sync {
  async fn record(&self, record: InteractionRecord);
}

pub struct TracingInteractionLog;

#[async_trait]
impl InteractionLog for TracingInteractionLog {
  async fn record(&self, r: InteractionRecord) {
    info!(
      target: "interaction",
      identity = %r.identity,
      kind = r.kind.as_str(),
      subject = r.subject_domain.as_str(),
      question_len = r.question.len(),
      answer_len = r.answer.len(),
      at = %r.at.to_rfc3339(),
      "Interaction recorded"
    );
  }
}

#[cfg(test)]
pub mod testing {
  use std::sync::Mutex;

  use super::*;

  #[derive(Default)]
  pub struct MemoryInteractionLog {
    pub records: Mutex<Vec<InteractionRecord>>,
  }

  #[async_trait]
  impl InteractionLog for MemoryInteractionLog {
    async fn record(&self, record: InteractionRecord) {
      self.records.lock().unwrap().push(record);
    }
  }
}
