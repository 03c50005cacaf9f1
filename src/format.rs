//! Vertical SQL layout.
//!
//! Every clause keyword starts a new line and is upper-cased; each `AND`
//! condition sits on its own indented line. Whitespace outside string
//! literals collapses to single spaces, which makes the transform
//! idempotent.

/// Clause keywords, longest first so `LEFT OUTER JOIN` wins over `JOIN`.
const CLAUSES: &[&[&str]] = &[
    &["LEFT", "OUTER", "JOIN"],
    &["RIGHT", "OUTER", "JOIN"],
    &["FULL", "OUTER", "JOIN"],
    &["LEFT", "JOIN"],
    &["RIGHT", "JOIN"],
    &["INNER", "JOIN"],
    &["FULL", "JOIN"],
    &["CROSS", "JOIN"],
    &["GROUP", "BY"],
    &["ORDER", "BY"],
    &["SELECT"],
    &["FROM"],
    &["WHERE"],
    &["HAVING"],
    &["JOIN"],
];

const AND_INDENT: &str = "  ";

/// Format `sql` vertically. Empty input gives an empty string.
pub fn vertical_format_sql(sql: &str) -> String {
    let tokens = tokenize(sql);
    let mut lines: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut pending_between = false;
    let mut i = 0;

    while i < tokens.len() {
        if let Some(clause) = match_clause(&tokens[i..]) {
            flush(&mut lines, &mut current);
            current = clause.join(" ");
            pending_between = false;
            i += clause.len();
            continue;
        }

        let token = &tokens[i];
        if token.eq_ignore_ascii_case("AND") {
            if pending_between {
                push_word(&mut current, "AND");
                pending_between = false;
            } else {
                flush(&mut lines, &mut current);
                current = format!("{}AND", AND_INDENT);
            }
        } else {
            if token.eq_ignore_ascii_case("BETWEEN") {
                pending_between = true;
            }
            push_word(&mut current, token);
        }
        i += 1;
    }
    flush(&mut lines, &mut current);
    lines.join("\n")
}

fn match_clause(tokens: &[String]) -> Option<&'static [&'static str]> {
    CLAUSES.iter().copied().find(|clause| {
        clause.len() <= tokens.len()
            && clause
                .iter()
                .zip(tokens)
                .all(|(kw, tok)| tok.eq_ignore_ascii_case(kw))
    })
}

fn push_word(line: &mut String, word: &str) {
    if !line.is_empty() && !line.ends_with(' ') {
        line.push(' ');
    }
    line.push_str(word);
}

fn flush(lines: &mut Vec<String>, current: &mut String) {
    let line = std::mem::take(current);
    if !line.trim().is_empty() {
        lines.push(line.trim_end().to_string());
    }
}

/// Split on whitespace, keeping single-quoted literals (with `''` escapes)
/// intact inside their token.
fn tokenize(sql: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut chars = sql.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '\'' {
            current.push(c);
            while let Some(inner) = chars.next() {
                current.push(inner);
                if inner == '\'' {
                    if chars.peek() == Some(&'\'') {
                        current.push('\'');
                        chars.next();
                    } else {
                        break;
                    }
                }
            }
        } else if c.is_whitespace() {
            if !current.is_empty() {
                tokens.push(std::mem::take(&mut current));
            }
        } else {
            current.push(c);
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clause_breaks_and_uppercase() {
        let sql = "select amount, bill_year from bills where amount > 0 and bill_year = 2024 order by amount;";
        assert_eq!(
            vertical_format_sql(sql),
            "SELECT amount, bill_year\nFROM bills\nWHERE amount > 0\n  AND bill_year = 2024\nORDER BY amount;"
        );
    }

    #[test]
    fn test_join_variants() {
        let sql = "SELECT * FROM a left join b ON a.id = b.id INNER JOIN c ON c.id = a.id left outer join d ON d.id = a.id";
        assert_eq!(
            vertical_format_sql(sql),
            "SELECT *\nFROM a\nLEFT JOIN b ON a.id = b.id\nINNER JOIN c ON c.id = a.id\nLEFT OUTER JOIN d ON d.id = a.id"
        );
    }

    #[test]
    fn test_newlines_collapsed() {
        let sql = "SELECT a\n,\n b\n\nFROM t\n   GROUP\nBY a";
        assert_eq!(vertical_format_sql(sql), "SELECT a , b\nFROM t\nGROUP BY a");
    }

    #[test]
    fn test_between_and_stays_inline() {
        let sql = "SELECT * FROM bills WHERE amount BETWEEN 1 and 10 AND bill_year = 2024";
        assert_eq!(
            vertical_format_sql(sql),
            "SELECT *\nFROM bills\nWHERE amount BETWEEN 1 AND 10\n  AND bill_year = 2024"
        );
    }

    #[test]
    fn test_literals_untouched() {
        let sql = "SELECT * FROM bills WHERE reference LIKE '%sod  from  and%' AND note = 'it''s where'";
        let out = vertical_format_sql(sql);
        assert!(out.contains("'%sod  from  and%'"));
        assert!(out.contains("'it''s where'"));
        assert_eq!(out.lines().count(), 4);
    }

    #[test]
    fn test_idempotent() {
        let inputs = [
            "select a from t where x = 1 and y = 2 group by a having count(*) > 1 order by a;",
            "SELECT *\nFROM a\nLEFT JOIN b ON a.id = b.id\nWHERE a.x BETWEEN 1 AND 2\n  AND b.y = 'q  r';",
            "",
            "not sql at all",
        ];
        for input in inputs {
            let once = vertical_format_sql(input);
            assert_eq!(vertical_format_sql(&once), once, "input: {:?}", input);
        }
    }

    #[test]
    fn test_empty() {
        assert_eq!(vertical_format_sql(""), "");
        assert_eq!(vertical_format_sql("   \n "), "");
    }
}
