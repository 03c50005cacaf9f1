//! Best-effort extraction over free-form model output.
//!
//! Each extractor is an ordered list of matchers; the first matcher with any
//! match wins and the first match within it is used.

use regex::Regex;
use std::sync::LazyLock;

static SQL_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?is)```sql\s*(.*?)\s*```",
        r"(?is)```\s*(SELECT.*?;)\s*```",
        r"(?is)(SELECT.*?;)",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

static EXPLANATION_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?is)\*\*Explanation:\*\*\s*(.*?)(?:\n\n|$)",
        r"(?is)Explanation:\s*(.*?)(?:\n\n|$)",
        r"(?is)Brief explanation:\s*(.*?)(?:\n\n|$)",
        r"(?is)(?:This query|The query|Query explanation):\s*(.*?)(?:\n\n|$)",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

static TABLE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:from|join)\s+((?:[A-Za-z_][A-Za-z0-9_]*\s*\.\s*)*)([A-Za-z_][A-Za-z0-9_]*)")
        .unwrap()
});

static STRING_LITERAL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"'(?:[^']|'')*'").unwrap());

/// Longest trailing explanation kept by the fallback.
const TRAILING_EXPLANATION_CHARS: usize = 200;

/// First SQL statement in `text`: fenced `sql` block, then a fenced block
/// holding `SELECT ... ;`, then a bare `SELECT ... ;`.
pub fn extract_sql(text: &str) -> Option<String> {
    SQL_PATTERNS.iter().find_map(|re| {
        re.captures(text)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().trim().to_string())
    })
}

/// Like [`extract_sql`], but plain text that already reads as a query is
/// returned as-is. Used on refinement output, where the model sometimes
/// answers with the bare statement.
pub fn extract_sql_or_text(text: &str) -> Option<String> {
    if let Some(sql) = extract_sql(text) {
        return Some(sql);
    }
    let trimmed = text.trim();
    if starts_with_keyword(trimmed, "SELECT") || starts_with_keyword(trimmed, "WITH") {
        Some(trimmed.to_string())
    } else {
        None
    }
}

fn starts_with_keyword(text: &str, keyword: &str) -> bool {
    text.as_bytes()
        .get(..keyword.len())
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case(keyword.as_bytes()))
}

/// Explanation from a labelled section, else the text after the last fence.
pub fn extract_explanation(text: &str) -> String {
    for re in EXPLANATION_PATTERNS.iter() {
        if let Some(m) = re.captures(text).and_then(|c| c.get(1)) {
            let found = m.as_str().trim().trim_start_matches('*').trim();
            if !found.is_empty() {
                return found.to_string();
            }
        }
    }

    if let Some(pos) = text.rfind("```") {
        let remaining = text[pos + 3..].trim();
        if remaining.chars().count() > 10 {
            let mut out: String = remaining.chars().take(TRAILING_EXPLANATION_CHARS).collect();
            if remaining.chars().count() > TRAILING_EXPLANATION_CHARS {
                out.push_str("...");
            }
            return out;
        }
    }
    String::new()
}

/// Table names after `FROM`/`JOIN`, lower-cased, unique, in order of
/// appearance. Schema-qualified names yield their last segment.
pub fn extract_tables(sql: &str) -> Vec<String> {
    let cleaned = strip_string_literals(sql);
    let mut tables: Vec<String> = Vec::new();
    for cap in TABLE_RE.captures_iter(&cleaned) {
        let name = cap[2].to_lowercase();
        if !tables.contains(&name) {
            tables.push(name);
        }
    }
    tables
}

/// Replace single-quoted literals with `''` so their contents are not
/// mistaken for identifiers.
pub fn strip_string_literals(sql: &str) -> String {
    STRING_LITERAL_RE.replace_all(sql, "''").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fenced_sql_block_wins() {
        let text = "Here you go:\n```sql\nSELECT AP_AMOUNT FROM bills;\n```\nand SELECT 2;";
        assert_eq!(extract_sql(text).unwrap(), "SELECT AP_AMOUNT FROM bills;");
    }

    #[test]
    fn test_fenced_generic_block() {
        let text = "```\nselect amount from bills;\n```";
        assert_eq!(extract_sql(text).unwrap(), "select amount from bills;");
    }

    #[test]
    fn test_bare_select() {
        let text = "Try this: SELECT a\nFROM t WHERE b = 1; It works.";
        assert_eq!(extract_sql(text).unwrap(), "SELECT a\nFROM t WHERE b = 1;");
    }

    #[test]
    fn test_first_match_within_pattern() {
        let text = "```sql\nSELECT 1;\n```\n```sql\nSELECT 2;\n```";
        assert_eq!(extract_sql(text).unwrap(), "SELECT 1;");
    }

    #[test]
    fn test_nothing_to_extract() {
        assert_eq!(extract_sql("I cannot help with that."), None);
        assert_eq!(extract_sql_or_text("I cannot help with that."), None);
    }

    #[test]
    fn test_extraction_idempotent_on_plain_sql() {
        let sql = "SELECT amount FROM bills WHERE bill_year = 2024;";
        let once = extract_sql(sql).unwrap();
        assert_eq!(once, sql);
        assert_eq!(extract_sql(&once).unwrap(), once);

        let fenced = "```sql\nSELECT a\nFROM t\nWHERE b = 1;\n```";
        let once = extract_sql(fenced).unwrap();
        assert_eq!(extract_sql(&once).unwrap(), once);
    }

    #[test]
    fn test_or_text_returns_unterminated_query() {
        assert_eq!(
            extract_sql_or_text("  SELECT a FROM t  ").unwrap(),
            "SELECT a FROM t"
        );
        assert_eq!(
            extract_sql_or_text("with x as (select 1) select * from x").unwrap(),
            "with x as (select 1) select * from x"
        );
    }

    #[test]
    fn test_or_text_short_and_multibyte_prefixes() {
        assert_eq!(extract_sql_or_text("WITH").unwrap(), "WITH");
        assert_eq!(extract_sql_or_text("WITH é").unwrap(), "WITH é");
        assert_eq!(extract_sql_or_text("Wé"), None);
        assert_eq!(extract_sql_or_text("ünïcode prose"), None);
    }

    #[test]
    fn test_bold_explanation() {
        let text = "```sql\nSELECT 1;\n```\n\n**Explanation:**\nReturns one row.\n\nExtra.";
        assert_eq!(extract_explanation(text), "Returns one row.");
    }

    #[test]
    fn test_plain_explanation() {
        let text = "SELECT 1;\nExplanation: counts bills per year";
        assert_eq!(extract_explanation(text), "counts bills per year");
    }

    #[test]
    fn test_brief_explanation() {
        let text = "Brief explanation: lists active folios\n\nDone";
        assert_eq!(extract_explanation(text), "lists active folios");
    }

    #[test]
    fn test_narrative_explanation() {
        let text = "```sql\nSELECT 1;\n```\nThis query: joins bills to folios";
        assert_eq!(extract_explanation(text), "joins bills to folios");
    }

    #[test]
    fn test_trailing_text_fallback_truncated() {
        let tail = "x".repeat(250);
        let text = format!("```sql\nSELECT 1;\n```\n{}", tail);
        let out = extract_explanation(&text);
        assert_eq!(out.len(), 203);
        assert!(out.ends_with("..."));
    }

    #[test]
    fn test_short_trailing_text_ignored() {
        assert_eq!(extract_explanation("```sql\nSELECT 1;\n```\nok"), "");
    }

    #[test]
    fn test_extract_tables() {
        let sql = "SELECT b.amount FROM Bills b\nLEFT JOIN land_relation r ON r.account_number = b.account_number\nJOIN dbo.land_legal l ON l.folio = r.folio\nJOIN bills b2 ON 1 = 1;";
        assert_eq!(
            extract_tables(sql),
            vec!["bills", "land_relation", "land_legal"]
        );
    }

    #[test]
    fn test_extract_tables_ignores_literals() {
        let sql = "SELECT * FROM bills WHERE note = 'paid from account';";
        assert_eq!(extract_tables(sql), vec!["bills"]);
        assert!(extract_tables("").is_empty());
    }
}
