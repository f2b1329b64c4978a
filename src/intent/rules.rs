//! Rule-based intent fallback. Patterns are data, not code — a `RuleSet`
//! can be built from configuration or from the compiled-in defaults, per
//! the Open Question resolved in DESIGN.md.

use regex::Regex;

use crate::types::Intent;

/// A single named pattern matched against the lowercased query text.
pub struct Rule {
    pub intent: Intent,
    pub pattern: Regex,
}

/// An ordered list of rules; the first match wins. Order matters because a
/// query can plausibly match more than one pattern (e.g. "what is the
/// difference between X and Y" matches both factual and exploratory cues).
pub struct RuleSet {
    rules: Vec<Rule>,
}

pub const RULE_BASED_CONFIDENCE: f32 = 0.60;

impl RuleSet {
    pub fn new(rules: Vec<Rule>) -> Self {
        Self { rules }
    }

    /// Compiled-in defaults, evaluated in the order the teacher's own
    /// BM25/vector sanitizers are written: most specific first.
    pub fn defaults() -> Self {
        let specs: &[(&str, Intent)] = &[
            (r"^(what is|what's|who is|who's|when (was|did|is)|where is)\b", Intent::Factual),
            (r"\b(compare|comparison|difference|vs\.?|versus|explain)\b", Intent::Exploratory),
            (r"\b(summarize|summary|overview|about the topic|tl;?dr)\b", Intent::Summary),
        ];
        let rules = specs
            .iter()
            .map(|(pattern, intent)| Rule {
                intent: *intent,
                pattern: Regex::new(pattern).expect("built-in rule pattern must compile"),
            })
            .collect();
        Self::new(rules)
    }

    /// Returns `(intent, RULE_BASED_CONFIDENCE)` on the first matching rule,
    /// else falls back to a short, noun-heavy heuristic for `keyword`, else
    /// `None`.
    pub fn classify(&self, query: &str) -> Option<(Intent, f32)> {
        let lowered = query.to_lowercase();
        for rule in &self.rules {
            if rule.pattern.is_match(&lowered) {
                return Some((rule.intent, RULE_BASED_CONFIDENCE));
            }
        }
        if is_short_keyword_query(&lowered) {
            return Some((Intent::Keyword, RULE_BASED_CONFIDENCE));
        }
        None
    }
}

/// Heuristic for bare keyword queries: short (≤ 4 tokens), no question
/// words, no sentence-ending punctuation.
fn is_short_keyword_query(lowered: &str) -> bool {
    let tokens: Vec<&str> = lowered.split_whitespace().collect();
    if tokens.is_empty() || tokens.len() > 4 {
        return false;
    }
    if lowered.contains('?') {
        return false;
    }
    const QUESTION_WORDS: &[&str] = &["what", "who", "when", "where", "why", "how", "which"];
    !tokens.iter().any(|t| QUESTION_WORDS.contains(t))
}
