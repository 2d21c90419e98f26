//! Content classification: subject domain, direct-problem detection, image content type.
//!
//! Text classification is a pure function over two declarative rule tables
//! evaluated in order (first match wins). Images get one constrained vision call;
//! any failure there degrades to `general` / `unknown` and is only logged.

use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use tracing::{debug, instrument, warn};

use crate::domain::{Classification, ImageContentType, Submission, SubjectDomain};
use crate::error::TutorError;
use crate::provider::{complete_structured, CompletionProvider, UserInput};

/// One row of the subject table.
pub struct DomainRule {
  pub pattern: &'static str,
  pub domain: SubjectDomain,
}

/// Ordered: earlier rows win. Equation shapes come first so "solve 3x + 8 = 9
/// for the physics exam" is still math. They need a single-letter unknown or an
/// `=`, so year ranges and dates ("1914-1918", "5/5/1821") fall through.
pub const DOMAIN_RULES: &[DomainRule] = &[
  DomainRule { pattern: r"\b\d*[a-z]\b\s*(?:\^\s*\d+\s*)?[+\-*/×÷=]\s*\(?\s*\d", domain: SubjectDomain::Math },
  DomainRule { pattern: r"\d\s*(?:[+\-*/×÷^]\s*\(?\s*\d+(?:[.,]\d+)?\s*\)?\s*)*=", domain: SubjectDomain::Math },
  DomainRule {
    pattern: r"\b(equations?|équations?|algebra|algèbre|polynom\w*|fractions?|derivatives?|dérivée\w*|integrals?|intégrale\w*|geometry|géométrie|triangles?|theorem|théorème|pythag\w*|percent\w*|pourcentage\w*|probabilit\w*|statisti\w*|functions?|fonctions?|matri\w+|vectors?|vecteurs?|logarithm\w*|sqrt|racine carrée|multipl\w+|divis\w+|calcul\w*|math\w*)\b",
    domain: SubjectDomain::Math,
  },
  DomainRule {
    pattern: r"\b(grammar|grammaire|conjugat\w*|conjug\w*|verbs?|verbes?|tenses?|temps du|subjonctif|subjunctive|past participle|participe passé|adjectives?|adjectifs?|adverbs?|adverbes?|nouns?|pronouns?|pronoms?|spelling|orthographe|vocabulary|vocabulaire|syntax|syntaxe|punctuation|ponctuation|translat\w*|tradu\w*|accord|plural|pluriel)\b",
    domain: SubjectDomain::Language,
  },
  DomainRule {
    pattern: r"\b(physics|physique|chemistry|chimie|biology|biologie|atoms?|atomes?|molecules?|molécules?|electrons?|électrons?|force|forces|energy|énergie|velocity|vitesse|acceleration|accélération|gravity|gravité|newton|photosynth\w*|cells?|cellules?|dna|adn|reactions?|réactions?|ions?|acids?|acides?|circuits?|voltage|tension électrique|ohm|thermodynam\w*|evolution|évolution)\b",
    domain: SubjectDomain::Science,
  },
  DomainRule {
    pattern: r"\b(history|histoire|historical|historique|revolution|révolution|empires?|medieval|médiéval\w*|middle ages|moyen âge|renaissance|world war|guerre mondiale|wwi+|ancient|antiquité|dynast\w*|monarch\w*|colonial\w*|napol[eé]on|pharaoh\w*|pharaon\w*|treaty|traité|century|siècle|cold war|guerre froide)\b",
    domain: SubjectDomain::History,
  },
];

/// Imperative problem-solving shapes: a leading solve-style verb (with an optional
/// politeness prefix) or an exercise-indicating noun anywhere.
pub const DIRECT_REQUEST_PATTERNS: &[&str] = &[
  r"^\s*(?:please\s+|pls\s+|can you\s+|could you\s+|help me\s+|peux-tu\s+|pouvez-vous\s+|aide-moi à\s+)?(?:solve|calculate|compute|find|determine|evaluate|simplify|factori[sz]e|résou\w*|calcul\w*|trouve\w*|détermin\w*|simplifi\w*|factoris\w*|évalue\w*)\b",
  r"\b(?:exercises?|exercices?|homework|devoirs?|worksheet|fiche d'exercices?)\b",
];

static COMPILED_DOMAIN_RULES: Lazy<Vec<(Regex, SubjectDomain)>> = Lazy::new(|| {
  DOMAIN_RULES
    .iter()
    .map(|r| (Regex::new(&format!("(?i){}", r.pattern)).expect("domain rule regex"), r.domain))
    .collect()
});

static COMPILED_DIRECT_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
  DIRECT_REQUEST_PATTERNS
    .iter()
    .map(|p| Regex::new(&format!("(?i){}", p)).expect("direct request regex"))
    .collect()
});

pub fn subject_domain_of(text: &str) -> SubjectDomain {
  COMPILED_DOMAIN_RULES
    .iter()
    .find(|(re, _)| re.is_match(text))
    .map(|(_, d)| *d)
    .unwrap_or(SubjectDomain::General)
}

pub fn is_direct_problem_request(text: &str) -> bool {
  COMPILED_DIRECT_PATTERNS.iter().any(|re| re.is_match(text))
}

/// Pure text classification.
pub fn classify_text(text: &str) -> Classification {
  Classification {
    subject_domain: subject_domain_of(text),
    is_direct_problem_request: is_direct_problem_request(text),
    image_content_type: None,
  }
}

#[derive(Deserialize)]
struct ImageVerdict {
  #[serde(default)] subject: String,
  #[serde(default)] content_type: String,
}

#[derive(Clone)]
pub struct Classifier {
  provider: Arc<dyn CompletionProvider>,
  image_system: String,
}

impl Classifier {
  pub fn new(provider: Arc<dyn CompletionProvider>, image_system: impl Into<String>) -> Self {
    Self { provider, image_system: image_system.into() }
  }

  /// Classify a submission. Never fails; image faults fall back to safe defaults.
  #[instrument(level = "debug", skip(self, submission), fields(kind = submission.kind.as_str(), has_image = submission.payload.image_ref.is_some()))]
  pub async fn classify(&self, submission: &Submission) -> Classification {
    let text = &submission.payload.text;
    let Some(image_ref) = &submission.payload.image_ref else {
      return classify_text(text);
    };

    let by_text = classify_text(text);
    let (mut subject, content_type) = match self.classify_image(text, image_ref.clone()).await {
      // The caption only refines a verdict the model actually gave.
      Ok((SubjectDomain::General, content_type)) => (by_text.subject_domain, content_type),
      Ok(v) => v,
      Err(e) => {
        warn!(target: "tutoring", error = %e, "Image classification degraded to defaults");
        (SubjectDomain::General, ImageContentType::Unknown)
      }
    };
    if let Some(explicit) = submission.payload.image_options.subject {
      subject = explicit;
    }

    let c = Classification {
      subject_domain: subject,
      is_direct_problem_request: content_type == ImageContentType::Problem || by_text.is_direct_problem_request,
      image_content_type: Some(content_type),
    };
    debug!(target: "tutoring", subject = c.subject_domain.as_str(), content_type = ?content_type, direct = c.is_direct_problem_request, "Image classified");
    c
  }

  async fn classify_image(
    &self,
    caption: &str,
    image_ref: crate::domain::ImageRef,
  ) -> Result<(SubjectDomain, ImageContentType), TutorError> {
    let input = UserInput { text: caption.to_string(), image_ref: Some(image_ref) };
    let verdict: ImageVerdict = complete_structured(self.provider.as_ref(), &self.image_system, &[], &input)
      .await
      .map_err(|e| TutorError::ClassificationDegraded(e.to_string()))?;
    let subject = SubjectDomain::parse(&verdict.subject).unwrap_or_default();
    Ok((subject, ImageContentType::parse(&verdict.content_type)))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::domain::{ImageOptions, ImageRef, SubmissionKind};
  use crate::error::ProviderError;
  use crate::provider::testing::ScriptedProvider;

  fn image_submission(caption: &str) -> Submission {
    Submission::new(SubmissionKind::Image, caption)
      .with_image(ImageRef("data:image/png;base64,AAAA".into()), ImageOptions::default())
  }

  #[test]
  fn french_equation_is_a_direct_math_request() {
    let c = classify_text("Résoudre 3x + 8 = 9");
    assert_eq!(c.subject_domain, SubjectDomain::Math);
    assert!(c.is_direct_problem_request);
    assert!(c.image_content_type.is_none());
  }

  #[test]
  fn subjects_follow_table_order() {
    assert_eq!(subject_domain_of("How do I conjugate être in the subjonctif?"), SubjectDomain::Language);
    assert_eq!(subject_domain_of("Why does gravity pull the moon?"), SubjectDomain::Science);
    assert_eq!(subject_domain_of("What caused the French Revolution?"), SubjectDomain::History);
    assert_eq!(subject_domain_of("What is a good way to take notes?"), SubjectDomain::General);
    // Equation shape outranks science vocabulary.
    assert_eq!(subject_domain_of("energy: 2 * 4 = ?"), SubjectDomain::Math);
    assert_eq!(subject_domain_of("Solve x^2 - 4 = 0"), SubjectDomain::Math);
  }

  #[test]
  fn year_ranges_and_dates_are_not_equations() {
    assert_eq!(subject_domain_of("Napoleon ruled from 1804-1815"), SubjectDomain::History);
    assert_eq!(subject_domain_of("Which treaty closed the war of 1914-1918?"), SubjectDomain::History);
    assert_eq!(subject_domain_of("Why did Napoleon die on 5/5/1821 in exile?"), SubjectDomain::History);
    assert_ne!(subject_domain_of("What happened in Europe during 1914-1918?"), SubjectDomain::Math);
  }

  #[test]
  fn direct_request_detection() {
    assert!(is_direct_problem_request("Solve x^2 - 4 = 0"));
    assert!(is_direct_problem_request("can you calculate the area of this triangle"));
    assert!(is_direct_problem_request("I'm stuck on my homework about fractions"));
    assert!(is_direct_problem_request("Trouve la valeur de x"));
    assert!(!is_direct_problem_request("Why do fractions need a common denominator?"));
    assert!(!is_direct_problem_request("I want to find out why the sky is blue"));
  }

  #[test]
  fn text_classification_is_deterministic() {
    let text = "Calculate the derivative of a polynomial";
    assert_eq!(classify_text(text), classify_text(text));
  }

  #[tokio::test]
  async fn text_submissions_never_call_the_provider() {
    let p = Arc::new(ScriptedProvider::new());
    let classifier = Classifier::new(p.clone(), "classify");
    let c = classifier.classify(&Submission::new(SubmissionKind::Ask, "Solve 2x = 4")).await;
    assert_eq!(c.subject_domain, SubjectDomain::Math);
    assert!(p.calls().is_empty());
  }

  #[tokio::test]
  async fn image_classification_parses_structured_verdict() {
    let p = Arc::new(ScriptedProvider::new().json(serde_json::json!({
      "subject": "science",
      "content_type": "problem"
    })));
    let classifier = Classifier::new(p.clone(), "classify");
    let c = classifier.classify(&image_submission("what is this?")).await;

    assert_eq!(c.subject_domain, SubjectDomain::Science);
    assert_eq!(c.image_content_type, Some(ImageContentType::Problem));
    assert!(c.is_direct_problem_request);
    let calls = p.calls();
    assert_eq!(calls.len(), 1);
    assert!(calls[0].structured && calls[0].had_image);
  }

  #[tokio::test]
  async fn image_classification_failure_degrades_to_defaults() {
    let p = Arc::new(ScriptedProvider::new().json_fail(ProviderError::Unavailable("down".into())));
    let classifier = Classifier::new(p, "classify");
    let c = classifier.classify(&image_submission("explain this chart")).await;

    assert_eq!(c.subject_domain, SubjectDomain::General);
    assert_eq!(c.image_content_type, Some(ImageContentType::Unknown));
    assert!(!c.is_direct_problem_request);
  }

  #[tokio::test]
  async fn failed_image_call_ignores_caption_subject() {
    let p = Arc::new(ScriptedProvider::new().json_fail(ProviderError::Malformed("not json".into())));
    let classifier = Classifier::new(p, "classify");
    let c = classifier.classify(&image_submission("solve this equation")).await;

    assert_eq!(c.subject_domain, SubjectDomain::General);
    assert_eq!(c.image_content_type, Some(ImageContentType::Unknown));
    // A solve-style caption still keeps the non-solving guard on.
    assert!(c.is_direct_problem_request);
  }

  #[tokio::test]
  async fn general_verdict_is_refined_by_caption() {
    let p = Arc::new(ScriptedProvider::new().json(serde_json::json!({ "subject": "general", "content_type": "text" })));
    let classifier = Classifier::new(p, "classify");
    let c = classifier.classify(&image_submission("what does this treaty say?")).await;

    assert_eq!(c.subject_domain, SubjectDomain::History);
    assert_eq!(c.image_content_type, Some(ImageContentType::Text));
  }

  #[tokio::test]
  async fn explicit_subject_overrides_inferred_domain() {
    let p = Arc::new(ScriptedProvider::new().json(serde_json::json!({ "subject": "math", "content_type": "diagram" })));
    let classifier = Classifier::new(p, "classify");
    let sub = Submission::new(SubmissionKind::Image, "")
      .with_image(ImageRef("data:image/png;base64,AAAA".into()), ImageOptions { subject: Some(SubjectDomain::History), ..Default::default() });
    let c = classifier.classify(&sub).await;
    assert_eq!(c.subject_domain, SubjectDomain::History);
    assert_eq!(c.image_content_type, Some(ImageContentType::Diagram));
  }
}
