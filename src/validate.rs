//! Deny list of known-hallucinated columns and deprecated expressions.

use regex::{Regex, RegexBuilder};

use crate::rules::KnownHallucinations;

#[derive(Debug)]
struct BannedColumn {
    name: String,
    replacement: String,
    re: Regex,
}

#[derive(Debug)]
struct BannedExpression {
    re: Regex,
    message: String,
}

/// Compiled deny list. Columns are checked before expressions; the first
/// violation found is reported.
#[derive(Debug, Default)]
pub struct DenyList {
    columns: Vec<BannedColumn>,
    expressions: Vec<BannedExpression>,
}

impl DenyList {
    /// Compile from the rule file section. Patterns that fail to compile are
    /// skipped with a warning.
    pub fn from_rules(rules: &KnownHallucinations) -> Self {
        let mut list = DenyList::default();

        for (name, replacement) in &rules.banned_columns {
            let pattern = format!(r"\b{}\b", regex::escape(name));
            match RegexBuilder::new(&pattern).case_insensitive(true).build() {
                Ok(re) => list.columns.push(BannedColumn {
                    name: name.clone(),
                    replacement: replacement.clone(),
                    re,
                }),
                Err(e) => tracing::warn!("Skipping banned column {}: {}", name, e),
            }
        }

        for banned in &rules.banned_patterns {
            match RegexBuilder::new(&banned.pattern)
                .case_insensitive(true)
                .build()
            {
                Ok(re) => list.expressions.push(BannedExpression {
                    re,
                    message: banned.message.clone(),
                }),
                Err(e) => tracing::warn!("Skipping banned pattern {:?}: {}", banned.pattern, e),
            }
        }

        list
    }

    /// Corrective message for the first violation in `sql`, if any.
    pub fn check(&self, sql: &str) -> Option<String> {
        if sql.trim().is_empty() {
            return None;
        }
        for col in &self.columns {
            if col.re.is_match(sql) {
                return Some(if col.replacement.is_empty() {
                    format!(
                        "Invalid column '{}' found. Check schema for correct column name.",
                        col.name
                    )
                } else {
                    format!(
                        "Invalid column '{}' found. Use '{}' instead.",
                        col.name, col.replacement
                    )
                });
            }
        }
        self.expressions
            .iter()
            .find(|e| e.re.is_match(sql))
            .map(|e| e.message.clone())
    }

    pub fn len(&self) -> usize {
        self.columns.len() + self.expressions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::BannedPattern;

    fn defaults() -> DenyList {
        DenyList::from_rules(&KnownHallucinations::default())
    }

    #[test]
    fn test_banned_column_names_replacement() {
        let msg = defaults().check("SELECT AP_AMOUNT FROM bills;").unwrap();
        assert!(msg.contains("AP_AMOUNT"));
        assert!(msg.contains("'AMOUNT'"));
        assert_eq!(msg, "Invalid column 'AP_AMOUNT' found. Use 'AMOUNT' instead.");
    }

    #[test]
    fn test_banned_column_case_insensitive_whole_word() {
        let list = defaults();
        assert!(list.check("select ap_reference from bills;").is_some());
        assert!(list.check("SELECT MAP_AMOUNT_X FROM bills;").is_none());
        assert!(list.check("SELECT AMOUNT FROM bills;").is_none());
    }

    #[test]
    fn test_banned_year_expressions() {
        let list = defaults();
        let msg = list
            .check("SELECT * FROM bills WHERE extract( year from date_stamp ) = 2024;")
            .unwrap();
        assert!(msg.contains("BILL_YEAR"));
        assert!(list.check("SELECT YEAR(DATE_STAMP) FROM bills;").is_some());
    }

    #[test]
    fn test_empty_sql_passes() {
        assert!(defaults().check("").is_none());
    }

    #[test]
    fn test_invalid_pattern_skipped() {
        let rules = KnownHallucinations {
            banned_columns: Default::default(),
            banned_patterns: vec![
                BannedPattern {
                    pattern: "(unclosed".into(),
                    message: "never".into(),
                },
                BannedPattern {
                    pattern: r"NOW\(\)".into(),
                    message: "Use BILL_DATE".into(),
                },
            ],
        };
        let list = DenyList::from_rules(&rules);
        assert_eq!(list.len(), 1);
        assert_eq!(list.check("SELECT now() FROM t;").unwrap(), "Use BILL_DATE");
    }

    #[test]
    fn test_empty_replacement_message() {
        let rules = KnownHallucinations {
            banned_columns: [("GHOST_COL".to_string(), String::new())].into_iter().collect(),
            banned_patterns: Vec::new(),
        };
        let msg = DenyList::from_rules(&rules).check("SELECT ghost_col FROM t;").unwrap();
        assert!(msg.ends_with("Check schema for correct column name."));
    }
}
