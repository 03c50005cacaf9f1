//! Intent classification and the clarification gate.

use serde::Serialize;
use std::fmt;

use crate::llm::Generator;
use crate::rules::ClarificationRule;

/// What the user wants from this turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Intent {
    Greet,
    Feedback,
    Query,
    Irrelevant,
}

impl Intent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::Greet => "greet",
            Intent::Feedback => "feedback",
            Intent::Query => "query",
            Intent::Irrelevant => "irrelevant",
        }
    }

    /// Parse a one-word model answer. Punctuation and case are ignored.
    pub fn parse(answer: &str) -> Option<Intent> {
        let word: String = answer
            .trim()
            .chars()
            .filter(|c| c.is_ascii_alphabetic())
            .collect::<String>()
            .to_ascii_lowercase();
        match word.as_str() {
            "greet" => Some(Intent::Greet),
            "feedback" => Some(Intent::Feedback),
            "query" => Some(Intent::Query),
            "irrelevant" => Some(Intent::Irrelevant),
            _ => None,
        }
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const GREETINGS: &[&str] = &["hi", "hello", "hey", "yo", "sup", "hola"];

/// Deterministic classification used when the model is unavailable or
/// answers with something unrecognised.
pub fn classify_intent_rules(message: &str) -> Intent {
    let m = message.trim().to_lowercase();
    if m.contains("error") && (m.contains("line") || m.contains("column") || m.contains("syntax")) {
        return Intent::Feedback;
    }
    if GREETINGS.contains(&m.as_str()) || m.starts_with("hello") {
        return Intent::Greet;
    }
    Intent::Query
}

fn classifier_prompt(message: &str) -> String {
    format!(
        "Classify the user message strictly into one of: greet | feedback | query | irrelevant.\n\
         - greet: greetings like hi/hello.\n\
         - feedback: pasted DB error or message about a previous query failing.\n\
         - query: a request to produce SQL or retrieve data.\n\
         - irrelevant: anything else.\n\
         Message: {}\nAnswer with one word only.",
        message
    )
}

/// Ask the classifier model first; fall back to [`classify_intent_rules`].
pub async fn classify_intent(message: &str, classifier: Option<&dyn Generator>) -> Intent {
    if let Some(llm) = classifier {
        match llm.complete(&classifier_prompt(message)).await {
            Ok(answer) => match Intent::parse(&answer) {
                Some(intent) => {
                    tracing::debug!(%intent, "intent from classifier");
                    return intent;
                }
                None => tracing::debug!(answer = %answer.trim(), "unrecognised classifier answer"),
            },
            Err(e) => tracing::warn!("Intent classifier failed: {:#}", e),
        }
    }
    classify_intent_rules(message)
}

/// Clarifying questions for ambiguous requests, joined with a space, or
/// `None` when the message is unambiguous. Never blocks the request.
pub fn clarification_questions(message: &str, rules: &[ClarificationRule]) -> Option<String> {
    let m = message.to_lowercase();
    let questions: Vec<&str> = rules
        .iter()
        .filter(|rule| m.contains(&rule.trigger.to_lowercase()))
        .filter(|rule| !rule.satisfied_by.iter().any(|term| mentions(&m, term)))
        .map(|rule| rule.question.as_str())
        .collect();
    if questions.is_empty() {
        None
    } else {
        Some(questions.join(" "))
    }
}

/// Alphanumeric terms match as whole words; anything else as a substring.
fn mentions(haystack: &str, term: &str) -> bool {
    let term = term.to_lowercase();
    if term.is_empty() {
        return false;
    }
    if !term.chars().all(|c| c.is_alphanumeric() || c == '_') {
        return haystack.contains(&term);
    }
    haystack
        .split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .any(|word| word == term)
}
