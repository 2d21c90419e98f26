//! Small utility helpers used across modules.

use once_cell::sync::Lazy;
use regex::Regex;

static TEMPLATE_KEY: Lazy<Regex> =
  Lazy::new(|| Regex::new(r"\{([a-z_]+)\}").expect("template key regex"));

static NUMERIC_LITERAL: Lazy<Regex> =
  Lazy::new(|| Regex::new(r"\d+(?:[.,]\d+)?").expect("numeric literal regex"));

/// Very small and safe string templating.
/// Replaces occurrences of `{key}` in the template with provided values in one
/// pass, so braces inside a value are never expanded. Unknown keys stay as-is.
pub fn fill_template(tpl: &str, pairs: &[(&str, &str)]) -> String {
  TEMPLATE_KEY
    .replace_all(tpl, |caps: &regex::Captures| {
      let key = &caps[1];
      pairs
        .iter()
        .find(|(k, _)| *k == key)
        .map(|(_, v)| v.to_string())
        .unwrap_or_else(|| caps[0].to_string())
    })
    .into_owned()
}

/// Distinct numeric literals in order of first appearance.
pub fn numeric_literals(s: &str) -> Vec<String> {
  let mut out: Vec<String> = Vec::new();
  for m in NUMERIC_LITERAL.find_iter(s) {
    let lit = m.as_str().to_string();
    if !out.contains(&lit) {
      out.push(lit);
    }
  }
  out
}

/// True when the last non-empty line of `s` asks something.
pub fn ends_with_question(s: &str) -> bool {
  s.lines()
    .rev()
    .map(str::trim)
    .find(|l| !l.is_empty())
    .map(|l| l.contains('?') || l.contains('？'))
    .unwrap_or(false)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn fill_template_replaces_known_keys_only() {
    let out = fill_template("{a} and {b} and {c}", &[("a", "1"), ("b", "2")]);
    assert_eq!(out, "1 and 2 and {c}");
  }

  #[test]
  fn fill_template_does_not_expand_braces_inside_values() {
    let out = fill_template(
      "Q: {question}\nE: {explanation}",
      &[("question", "what is {explanation}?"), ("explanation", "a ratio")],
    );
    assert_eq!(out, "Q: what is {explanation}?\nE: a ratio");
  }

  #[test]
  fn numeric_literals_are_deduplicated() {
    assert_eq!(numeric_literals("3x + 8 = 9, then 3 again, 2.5"), vec!["3", "8", "9", "2.5"]);
    assert!(numeric_literals("no digits").is_empty());
  }

  #[test]
  fn question_detection_looks_at_last_line() {
    assert!(ends_with_question("Step one.\nWhat do you notice?\n\n"));
    assert!(!ends_with_question("Is it clear?\nThat's the method."));
    assert!(!ends_with_question(""));
  }
}
