//! Generation rule file.
//!
//! The rule file is a JSON document of instruction lists that is rendered
//! into the prompt for the refinement pass. It also carries the deny list of
//! known-hallucinated columns and the clarification rules. Every section is
//! optional; a missing or unparsable file falls back to built-in defaults
//! and is never an error.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

/// Parsed rule file.
#[derive(Debug, Clone, Deserialize)]
pub struct RuleSet {
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
    #[serde(default = "default_core_rules")]
    pub core_rules: Vec<String>,
    #[serde(default)]
    pub query_structure_rules: Vec<String>,
    #[serde(default)]
    pub condition_rules: Vec<String>,
    #[serde(default)]
    pub table_specific_rules: Vec<String>,
    #[serde(default)]
    pub output_format: Option<OutputFormat>,
    #[serde(default)]
    pub error_handling: Vec<String>,
    #[serde(default)]
    pub validation_checklist: Vec<String>,
    #[serde(default)]
    pub known_hallucinations: KnownHallucinations,
    #[serde(default = "default_clarifications")]
    pub clarifications: Vec<ClarificationRule>,
    #[serde(default = "default_assumptions")]
    pub default_assumptions: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OutputFormat {
    #[serde(default)]
    pub sql_query: Option<String>,
    #[serde(default)]
    pub explanation: Option<String>,
}

/// Column names and expressions the model is known to invent.
#[derive(Debug, Clone, Deserialize)]
pub struct KnownHallucinations {
    /// Banned column → the column to use instead.
    #[serde(default = "default_banned_columns")]
    pub banned_columns: BTreeMap<String, String>,
    #[serde(default = "default_banned_patterns")]
    pub banned_patterns: Vec<BannedPattern>,
}

impl Default for KnownHallucinations {
    fn default() -> Self {
        Self {
            banned_columns: default_banned_columns(),
            banned_patterns: default_banned_patterns(),
        }
    }
}

/// A regular expression that must not appear in generated SQL.
#[derive(Debug, Clone, Deserialize)]
pub struct BannedPattern {
    pub pattern: String,
    pub message: String,
}

/// Asks a question when `trigger` appears without any of `satisfied_by`.
#[derive(Debug, Clone, Deserialize)]
pub struct ClarificationRule {
    pub trigger: String,
    #[serde(default)]
    pub satisfied_by: Vec<String>,
    pub question: String,
}

fn default_system_prompt() -> String {
    "You are a precise SQL query generator. Generate EXACTLY what the user asks for.".to_string()
}

fn default_core_rules() -> Vec<String> {
    vec![
        "ONLY implement what is explicitly requested".to_string(),
        "DO NOT add extra conditions unless specifically asked".to_string(),
        "ALWAYS start queries with SELECT".to_string(),
        "Choose the SIMPLEST approach when multiple options exist".to_string(),
    ]
}

fn default_banned_columns() -> BTreeMap<String, String> {
    [("AP_AMOUNT", "AMOUNT"), ("AP_REFERENCE", "REFERENCE")]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn default_banned_patterns() -> Vec<BannedPattern> {
    let year_msg = "Don't use EXTRACT(YEAR FROM DATE_STAMP) or YEAR(DATE_STAMP). Use BILL_YEAR column instead.";
    vec![
        BannedPattern {
            pattern: r"EXTRACT\s*\(\s*YEAR\s+FROM\s+DATE_STAMP\s*\)".to_string(),
            message: year_msg.to_string(),
        },
        BannedPattern {
            pattern: r"YEAR\s*\(\s*DATE_STAMP\s*\)".to_string(),
            message: year_msg.to_string(),
        },
    ]
}

fn default_clarifications() -> Vec<ClarificationRule> {
    vec![
        ClarificationRule {
            trigger: "folio".to_string(),
            satisfied_by: vec!["active".to_string(), "all".to_string()],
            question: "Did you want only active folios or all?".to_string(),
        },
        ClarificationRule {
            trigger: "folio".to_string(),
            satisfied_by: vec!["999-999-99-9".to_string()],
            question: "Do you want me to remove reference folio 999-999-99-9 from results?"
                .to_string(),
        },
    ]
}

fn default_assumptions() -> String {
    "DEFAULTS: active folios; exclude reference folio 999-999-99-9.".to_string()
}

impl Default for RuleSet {
    fn default() -> Self {
        Self {
            system_prompt: default_system_prompt(),
            core_rules: default_core_rules(),
            query_structure_rules: Vec::new(),
            condition_rules: Vec::new(),
            table_specific_rules: Vec::new(),
            output_format: None,
            error_handling: Vec::new(),
            validation_checklist: Vec::new(),
            known_hallucinations: KnownHallucinations::default(),
            clarifications: default_clarifications(),
            default_assumptions: default_assumptions(),
        }
    }
}

/// Load the rule file, falling back to [`RuleSet::default`] on any problem.
pub fn load_rules(path: &Path) -> RuleSet {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) => {
            tracing::warn!(
                "Rule file {} not readable ({}); using default instructions",
                path.display(),
                e
            );
            return RuleSet::default();
        }
    };
    match serde_json::from_str::<RuleSet>(&content) {
        Ok(rules) => rules,
        Err(e) => {
            tracing::warn!(
                "Invalid JSON in rule file {}: {}; using default instructions",
                path.display(),
                e
            );
            RuleSet::default()
        }
    }
}

impl RuleSet {
    /// Render the rules as the instruction block for the refinement prompt.
    pub fn instructions(&self) -> String {
        let mut parts = vec![self.system_prompt.clone()];

        push_section(&mut parts, "CORE RULES", &self.core_rules);
        push_section(&mut parts, "QUERY STRUCTURE RULES", &self.query_structure_rules);
        push_section(&mut parts, "CONDITION RULES", &self.condition_rules);
        push_section(&mut parts, "TABLE-SPECIFIC RULES", &self.table_specific_rules);

        if let Some(fmt) = &self.output_format {
            let items: Vec<String> = [fmt.sql_query.clone(), fmt.explanation.clone()]
                .into_iter()
                .flatten()
                .collect();
            push_section(&mut parts, "OUTPUT FORMAT", &items);
        }

        push_section(&mut parts, "ERROR HANDLING", &self.error_handling);
        push_section(&mut parts, "VALIDATION CHECKLIST", &self.validation_checklist);

        parts.join("\n")
    }
}

fn push_section(parts: &mut Vec<String>, title: &str, items: &[String]) {
    if items.is_empty() {
        return;
    }
    parts.push(format!("\n{}:", title));
    for item in items {
        parts.push(format!("• {}", item));
    }
}

/// Advisory structural checks on a generated query. Never blocks a response.
pub fn lint_sql(sql: &str) -> Vec<String> {
    let mut issues = Vec::new();
    let trimmed = sql.trim();
    if trimmed.is_empty() {
        return issues;
    }
    let upper = trimmed.to_uppercase();
    let words: Vec<&str> = upper
        .split(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .filter(|w| !w.is_empty())
        .collect();
    let has = |kw: &str| words.iter().any(|w| *w == kw);

    if !(upper.starts_with("SELECT") || upper.starts_with("WITH")) {
        issues.push("Query must start with SELECT".to_string());
    }
    if !trimmed.ends_with(';') {
        issues.push("Query should end with semicolon".to_string());
    }
    if has("SELECT") && !has("FROM") {
        issues.push("Missing FROM clause".to_string());
    }
    if has("JOIN") && !has("ON") && !has("USING") {
        issues.push("JOIN without ON condition".to_string());
    }
    issues
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_missing_file_uses_defaults() {
        let rules = load_rules(Path::new("/definitely/not/here.json"));
        assert!(rules.system_prompt.contains("precise SQL query generator"));
        assert_eq!(rules.core_rules.len(), 4);
        assert_eq!(
            rules.known_hallucinations.banned_columns.get("AP_AMOUNT").unwrap(),
            "AMOUNT"
        );
    }

    #[test]
    fn test_invalid_json_uses_defaults() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        write!(f, "{{ not json").unwrap();
        let rules = load_rules(f.path());
        assert_eq!(rules.core_rules, default_core_rules());
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        write!(
            f,
            r#"{{"system_prompt": "Be exact.", "condition_rules": ["Use LIKE for partial text"]}}"#
        )
        .unwrap();
        let rules = load_rules(f.path());
        assert_eq!(rules.system_prompt, "Be exact.");
        assert_eq!(rules.clarifications.len(), 2);
        let text = rules.instructions();
        assert!(text.starts_with("Be exact."));
        assert!(text.contains("\nCONDITION RULES:\n• Use LIKE for partial text"));
        assert!(!text.contains("TABLE-SPECIFIC RULES"));
    }

    #[test]
    fn test_instructions_output_format_section() {
        let rules = RuleSet {
            output_format: Some(OutputFormat {
                sql_query: Some("Provide the complete SQL query first".into()),
                explanation: Some("Follow with a brief explanation".into()),
            }),
            ..RuleSet::default()
        };
        let text = rules.instructions();
        assert!(text.contains(
            "OUTPUT FORMAT:\n• Provide the complete SQL query first\n• Follow with a brief explanation"
        ));
    }

    #[test]
    fn test_lint_clean_query() {
        assert!(lint_sql("SELECT a FROM t WHERE b = 1;").is_empty());
    }

    #[test]
    fn test_lint_findings() {
        let issues = lint_sql("UPDATE t SET a = 1");
        assert!(issues.contains(&"Query must start with SELECT".to_string()));
        assert!(issues.contains(&"Query should end with semicolon".to_string()));

        let issues = lint_sql("SELECT a FROM t JOIN u;");
        assert_eq!(issues, vec!["JOIN without ON condition".to_string()]);

        let issues = lint_sql("SELECT 1;");
        assert_eq!(issues, vec!["Missing FROM clause".to_string()]);
    }
}
