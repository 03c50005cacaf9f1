//! Schema index and `table.column` membership checks.
//!
//! The index maps lower-cased table names to lower-cased column names. It is
//! loaded once from the schema directory at startup and only read afterwards.
//!
//! Two schema file shapes are accepted:
//!
//! ```json
//! { "BILLS": [{"column": "AMOUNT", "type": "NUMBER(12,2)"}, "BILL_YEAR"] }
//! [ {"table": "BILLS", "columns": ["AMOUNT"]}, {"table": "FOLIOS", "fields": ["FOLIO"]} ]
//! ```

use regex::Regex;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use std::sync::LazyLock;

use crate::extract::strip_string_literals;

#[derive(Debug, Clone, Default)]
pub struct SchemaIndex {
    tables: BTreeMap<String, BTreeSet<String>>,
}

impl SchemaIndex {
    /// Load every `*.json` file directly under `dir`.
    ///
    /// A missing directory gives an empty index; unreadable or malformed
    /// files are skipped with a warning.
    pub fn load(dir: &Path) -> Self {
        let mut index = SchemaIndex::default();
        for path in schema_files(dir) {
            let parsed = std::fs::read_to_string(&path)
                .map_err(anyhow::Error::from)
                .and_then(|s| serde_json::from_str::<Value>(&s).map_err(anyhow::Error::from));
            match parsed {
                Ok(value) => index.add_value(&value),
                Err(e) => tracing::warn!("Skipping schema file {}: {}", path.display(), e),
            }
        }
        tracing::debug!(tables = index.tables.len(), "schema index loaded");
        index
    }

    /// Merge one parsed schema document into the index.
    pub fn add_value(&mut self, value: &Value) {
        match value {
            Value::Object(map) => {
                for (table, cols) in map {
                    if let Value::Array(cols) = cols {
                        self.add_table(table, cols);
                    }
                }
            }
            Value::Array(items) => {
                for item in items {
                    let table = item.get("table").and_then(Value::as_str).unwrap_or("");
                    if table.is_empty() {
                        continue;
                    }
                    let cols = item
                        .get("columns")
                        .or_else(|| item.get("fields"))
                        .and_then(Value::as_array);
                    match cols {
                        Some(cols) => self.add_table(table, cols),
                        None => self.add_table(table, &[]),
                    }
                }
            }
            _ => {}
        }
    }

    fn add_table(&mut self, table: &str, cols: &[Value]) {
        let entry = self.tables.entry(table.to_lowercase()).or_default();
        for col in cols {
            if let Some(name) = column_name(col) {
                entry.insert(name.to_lowercase());
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn table_count(&self) -> usize {
        self.tables.len()
    }

    pub fn contains_table(&self, table: &str) -> bool {
        self.tables.contains_key(&table.to_lowercase())
    }

    pub fn contains_column(&self, table: &str, column: &str) -> bool {
        self.tables
            .get(&table.to_lowercase())
            .is_some_and(|cols| cols.contains(&column.to_lowercase()))
    }

    pub fn tables(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }

    /// Check every `table.column` reference in `sql` against the index.
    ///
    /// Qualifiers that are aliases declared in `FROM`/`JOIN` resolve to their
    /// table. Qualified table names (`FROM dbo.bills`) are not column
    /// references. Returns `None` when everything resolves or the index is
    /// empty, otherwise a message naming every invalid pair.
    pub fn check_sql(&self, sql: &str) -> Option<String> {
        if sql.trim().is_empty() || self.is_empty() {
            return None;
        }
        let cleaned = strip_string_literals(sql);
        let aliases = self.aliases(&cleaned);

        let mut invalid: Vec<String> = Vec::new();
        for cap in PAIR_RE.captures_iter(&cleaned) {
            if cap.get(1).is_some() {
                continue;
            }
            let (qualifier, column) = (&cap[2], &cap[3]);
            let q = qualifier.to_lowercase();
            let table = if self.contains_table(&q) {
                Some(q.as_str())
            } else {
                aliases.get(&q).map(String::as_str)
            };
            let ok = table.is_some_and(|t| self.contains_column(t, column));
            if !ok {
                let pair = format!("{}.{}", qualifier, column);
                if !invalid.contains(&pair) {
                    invalid.push(pair);
                }
            }
        }

        if invalid.is_empty() {
            None
        } else {
            Some(
                invalid
                    .iter()
                    .map(|p| format!("Invalid reference: {} is not in schema.", p))
                    .collect::<Vec<_>>()
                    .join(" "),
            )
        }
    }

    /// Alias → schema table, from `FROM t a`, `JOIN t AS a`, `FROM t a, u b`
    /// and `FROM dbo.t a`.
    fn aliases(&self, sql: &str) -> HashMap<String, String> {
        let tokens: Vec<String> = TOKEN_RE
            .find_iter(sql)
            .map(|m| m.as_str().to_lowercase())
            .collect();
        let mut map = HashMap::new();
        let mut in_from = false;
        let mut i = 0;
        while i < tokens.len() {
            let tok = tokens[i].as_str();
            let starts_list = tok == "from" || tok == "join";
            let continues_list = in_from && tok == ",";
            if !(starts_list || continues_list) {
                if is_reserved(tok) && tok != "as" {
                    in_from = false;
                }
                i += 1;
                continue;
            }
            in_from = tok == "from" || continues_list;
            let Some(mut table) = tokens.get(i + 1) else { break };
            let mut j = i + 2;
            // schema-qualified name: keep the last segment
            while tokens.get(j).map(String::as_str) == Some(".") {
                match tokens.get(j + 1) {
                    Some(segment) => table = segment,
                    None => break,
                }
                j += 2;
            }
            let after_table = j;
            if tokens.get(j).map(String::as_str) == Some("as") {
                j += 1;
            }
            if let Some(alias) = tokens.get(j) {
                let is_ident = alias.starts_with(|c: char| c.is_ascii_alphabetic() || c == '_');
                if is_ident && !is_reserved(alias) && self.contains_table(table) {
                    map.insert(alias.clone(), table.clone());
                }
            }
            i = after_table;
        }
        map
    }
}

fn column_name(col: &Value) -> Option<&str> {
    match col {
        Value::String(s) => Some(s.as_str()),
        Value::Object(obj) => obj
            .get("column")
            .or_else(|| obj.get("name"))
            .and_then(Value::as_str),
        _ => None,
    }
    .filter(|s| !s.is_empty())
}

/// Sorted `*.json` files directly under `dir`.
pub fn schema_files(dir: &Path) -> Vec<std::path::PathBuf> {
    let mut files: Vec<_> = match std::fs::read_dir(dir) {
        Ok(rd) => rd
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "json"))
            .collect(),
        Err(_) => Vec::new(),
    };
    files.sort();
    files
}

static PAIR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(\b(?:from|join)\s+)?\b([A-Za-z_][A-Za-z0-9_]*)\s*\.\s*([A-Za-z_][A-Za-z0-9_]*)")
        .unwrap()
});

static TOKEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[A-Za-z_][A-Za-z0-9_]*|\S").unwrap());

fn is_reserved(word: &str) -> bool {
    matches!(
        word,
        "where" | "join" | "left" | "right" | "inner" | "outer" | "full" | "cross" | "on"
            | "group" | "order" | "having" | "limit" | "union" | "using" | "natural" | "as"
            | "select" | "from"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> SchemaIndex {
        let mut index = SchemaIndex::default();
        index.add_value(&serde_json::json!({
            "BILLS": [
                {"column": "ACCOUNT_NUMBER", "type": "VARCHAR2(20)"},
                {"column": "AMOUNT", "type": "NUMBER(12,2)"},
                "BILL_YEAR"
            ]
        }));
        index.add_value(&serde_json::json!([
            {"table": "land_relation", "columns": ["account_number", "folio"]},
            {"table": "land_legal", "fields": [{"name": "FOLIO"}, {"name": "LEGAL_DESC"}]}
        ]));
        index
    }

    #[test]
    fn test_loads_both_shapes_lowercased() {
        let index = fixture();
        assert_eq!(index.table_count(), 3);
        assert!(index.contains_column("bills", "amount"));
        assert!(index.contains_column("BILLS", "Bill_Year"));
        assert!(index.contains_column("land_legal", "legal_desc"));
        assert!(!index.contains_column("land_legal", "account_number"));
    }

    #[test]
    fn test_accepts_pairs_present() {
        let index = fixture();
        let sql = "SELECT bills.amount, land_relation.folio FROM bills JOIN land_relation ON bills.account_number = land_relation.account_number;";
        assert_eq!(index.check_sql(sql), None);
    }

    #[test]
    fn test_rejects_pairs_absent() {
        let index = fixture();
        let msg = index
            .check_sql("SELECT bills.ap_amount FROM bills;")
            .unwrap();
        assert_eq!(msg, "Invalid reference: bills.ap_amount is not in schema.");

        let msg = index
            .check_sql("SELECT ghost.col, bills.nope FROM bills;")
            .unwrap();
        assert!(msg.contains("ghost.col"));
        assert!(msg.contains("bills.nope"));
    }

    #[test]
    fn test_aliases_resolve_to_tables() {
        let index = fixture();
        let sql = "SELECT b.amount, r.folio FROM bills b JOIN land_relation AS r ON b.account_number = r.account_number WHERE b.bill_year = 2024;";
        assert_eq!(index.check_sql(sql), None);
        let bad = "SELECT b.legal_desc FROM bills b;";
        assert!(index.check_sql(bad).unwrap().contains("b.legal_desc"));
    }

    #[test]
    fn test_aliases_on_qualified_tables() {
        let index = fixture();
        let sql = "SELECT b.amount, r.folio FROM dbo.bills b JOIN billing.land_relation AS r ON b.account_number = r.account_number;";
        assert_eq!(index.check_sql(sql), None);
        let bad = "SELECT b.folio FROM dbo.bills b;";
        assert!(index.check_sql(bad).unwrap().contains("b.folio"));
    }

    #[test]
    fn test_ignores_literals_and_qualified_table_names() {
        let index = fixture();
        let sql = "SELECT amount FROM dbo.bills WHERE reference = 'x.y';";
        assert_eq!(index.check_sql(sql), None);
    }

    #[test]
    fn test_empty_index_checks_nothing() {
        let index = SchemaIndex::default();
        assert_eq!(index.check_sql("SELECT a.b FROM a;"), None);
    }

    #[test]
    fn test_load_skips_bad_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("billing_schema.json"), r#"{"BILLS": ["AMOUNT"]}"#)
            .unwrap();
        std::fs::write(dir.path().join("broken.json"), "{ nope").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();
        let index = SchemaIndex::load(dir.path());
        assert_eq!(index.table_count(), 1);
        assert!(index.contains_column("bills", "amount"));
    }

    #[test]
    fn test_load_missing_dir_is_empty() {
        let index = SchemaIndex::load(Path::new("/no/such/schema/dir"));
        assert!(index.is_empty());
    }
}
