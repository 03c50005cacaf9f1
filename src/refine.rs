//! Validation and refinement pass.
//!
//! A second model call receives the user's question, the first-pass
//! response and the rendered rule instructions, and answers with a
//! corrected SQL block plus a matching explanation. Failure here never
//! aborts the request: the pre-refinement SQL is kept with a generic
//! explanation.

use crate::extract::{extract_explanation, extract_sql_or_text};
use crate::llm::Generator;
use crate::prompt;

#[derive(Debug, Clone, PartialEq)]
pub struct Refinement {
    pub sql: String,
    pub explanation: String,
    /// False when the fallback was used.
    pub refined: bool,
}

impl Refinement {
    fn fallback(response: &str) -> Self {
        Self {
            sql: extract_sql_or_text(response).unwrap_or_default(),
            explanation: prompt::REFINE_FALLBACK_EXPLANATION.to_string(),
            refined: false,
        }
    }
}

/// Run the refinement call. `validator` is `None` when no credential is
/// configured, which takes the fallback path.
pub async fn refine(
    validator: Option<&dyn Generator>,
    question: &str,
    response: &str,
    instructions: &str,
) -> Refinement {
    let Some(validator) = validator else {
        tracing::warn!("No validator model configured; skipping refinement");
        return Refinement::fallback(response);
    };

    let prompt = prompt::validation(question, response, instructions);
    match validator.complete(&prompt).await {
        Ok(text) => Refinement {
            sql: extract_sql_or_text(&text).unwrap_or_default(),
            explanation: extract_explanation(&text),
            refined: true,
        },
        Err(e) => {
            tracing::warn!("Query validation failed: {:#}", e);
            Refinement::fallback(response)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use async_trait::async_trait;

    struct Fixed(Result<String, String>);

    #[async_trait]
    impl Generator for Fixed {
        fn model_name(&self) -> &str {
            "fixed"
        }
        async fn complete(&self, _prompt: &str) -> Result<String> {
            self.0.clone().map_err(|e| anyhow::anyhow!(e))
        }
    }

    const FIRST: &str = "```sql\nSELECT amount FROM bills;\n```\n\n• Columns used: amount";

    #[tokio::test]
    async fn test_refined_sql_and_explanation() {
        let validator = Fixed(Ok(
            "```sql\nSELECT amount FROM bills WHERE bill_year = 2024;\n```\n\n**Explanation:**\nFilters bills to 2024."
                .to_string(),
        ));
        let r = refine(Some(&validator), "bills 2024", FIRST, "RULES").await;
        assert!(r.refined);
        assert_eq!(r.sql, "SELECT amount FROM bills WHERE bill_year = 2024;");
        assert_eq!(r.explanation, "Filters bills to 2024.");
    }

    #[tokio::test]
    async fn test_failure_keeps_first_pass_sql() {
        let validator = Fixed(Err("timeout".to_string()));
        let r = refine(Some(&validator), "bills", FIRST, "").await;
        assert!(!r.refined);
        assert_eq!(r.sql, "SELECT amount FROM bills;");
        assert_eq!(r.explanation, prompt::REFINE_FALLBACK_EXPLANATION);
    }

    #[tokio::test]
    async fn test_no_validator_uses_fallback() {
        let r = refine(None, "bills", FIRST, "").await;
        assert!(!r.refined);
        assert_eq!(r.sql, "SELECT amount FROM bills;");
    }
}
