//! Retrieval corpus builder.
//!
//! Turns the schema directory and the historical script tree into
//! [`CorpusDocument`]s for the index:
//!
//! - one concise summary document per schema file (high priority);
//! - every script under `IMPORTANT/` (high priority, truncated);
//! - a bounded sample of the other scripts (normal priority, truncated).
//!
//! Also mines the table names most used by the important scripts, which the
//! retrieval prompt carries as a soft preference.

use anyhow::{bail, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use regex::Regex;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use walkdir::WalkDir;

use crate::config::CorpusConfig;
use crate::models::{CorpusDocument, Priority};
use crate::schema::schema_files;

/// Column-name fragments that mark a column as a likely key.
const KEY_FRAGMENTS: &[&str] = &["id", "number", "account", "folio", "date", "amount", "reference"];
const MAX_KEY_COLUMNS: usize = 3;
const MAX_OTHER_COLUMNS: usize = 2;
const DESCRIPTION_CHARS: usize = 50;

static PREFERRED_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\bfrom\s+([a-z_][a-z0-9_]+)|\bjoin\s+([a-z_][a-z0-9_]+)").unwrap()
});

/// Load schema summaries and scripts. No documents at all is an error.
pub fn build_corpus(config: &CorpusConfig) -> Result<Vec<CorpusDocument>> {
    let schema_docs = load_schema_documents(&config.schema_dir);
    let script_docs = load_script_documents(config)?;

    tracing::info!(
        schema = schema_docs.len(),
        scripts = script_docs.len(),
        "corpus loaded"
    );

    let mut docs = schema_docs;
    docs.extend(script_docs);
    if docs.is_empty() {
        bail!("No documents were loaded! Please check your folder structure.");
    }
    Ok(docs)
}

// ============ Schema documents ============

struct ColumnInfo {
    name: String,
    data_type: String,
    description: String,
}

/// One summary document per `*.json` schema file.
pub fn load_schema_documents(schema_dir: &Path) -> Vec<CorpusDocument> {
    if !schema_dir.exists() {
        tracing::warn!("Schema directory not found: {}", schema_dir.display());
        return Vec::new();
    }

    let mut docs = Vec::new();
    for path in schema_files(schema_dir) {
        let value = match std::fs::read_to_string(&path)
            .map_err(anyhow::Error::from)
            .and_then(|s| serde_json::from_str::<Value>(&s).map_err(anyhow::Error::from))
        {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!("Could not load {}: {}", path.display(), e);
                continue;
            }
        };

        let file_name = file_name(&path);
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        let system = stem.replace("_schema", "").to_uppercase();
        let text = summarize_schema(&system, &schema_tables(&value));

        let mut metadata = BTreeMap::new();
        metadata.insert("source".to_string(), "schema".to_string());
        metadata.insert("type".to_string(), "database_schema".to_string());
        metadata.insert("system".to_string(), system);
        metadata.insert("schema_file".to_string(), file_name.clone());
        metadata.insert("priority".to_string(), Priority::High.as_str().to_string());

        docs.push(CorpusDocument {
            id: document_id("schema", &file_name),
            text,
            priority: Priority::High,
            metadata,
        });
    }
    docs
}

/// Table → columns, from either accepted schema shape, in file order.
fn schema_tables(value: &Value) -> Vec<(String, Vec<ColumnInfo>)> {
    match value {
        Value::Object(map) => map
            .iter()
            .filter_map(|(table, cols)| {
                cols.as_array()
                    .map(|cols| (table.clone(), cols.iter().filter_map(column_info).collect()))
            })
            .collect(),
        Value::Array(items) => items
            .iter()
            .filter_map(|item| {
                let table = item.get("table")?.as_str()?.to_string();
                let cols = item
                    .get("columns")
                    .or_else(|| item.get("fields"))
                    .and_then(Value::as_array)
                    .map(|cols| cols.iter().filter_map(column_info).collect())
                    .unwrap_or_default();
                Some((table, cols))
            })
            .collect(),
        _ => Vec::new(),
    }
}

fn column_info(col: &Value) -> Option<ColumnInfo> {
    match col {
        Value::String(name) => Some(ColumnInfo {
            name: name.clone(),
            data_type: String::new(),
            description: String::new(),
        }),
        Value::Object(obj) => {
            let get = |key: &str| obj.get(key).and_then(Value::as_str).unwrap_or("");
            let name = if get("column").is_empty() { get("name") } else { get("column") };
            Some(ColumnInfo {
                name: name.to_string(),
                data_type: get("type").to_string(),
                description: get("description").to_string(),
            })
        }
        _ => None,
    }
}

fn summarize_schema(system: &str, tables: &[(String, Vec<ColumnInfo>)]) -> String {
    let mut text = format!("DATABASE SCHEMA - {} SYSTEM\n\n", system);

    for (table, columns) in tables {
        text.push_str(&format!("Table: {}\n", table));

        let is_key = |c: &ColumnInfo| {
            let lower = c.name.to_lowercase();
            KEY_FRAGMENTS.iter().any(|k| lower.contains(k))
        };
        let mut essential: Vec<usize> = (0..columns.len())
            .filter(|&i| is_key(&columns[i]))
            .take(MAX_KEY_COLUMNS)
            .collect();
        let others: Vec<usize> = (0..columns.len())
            .filter(|i| !essential.contains(i))
            .take(MAX_OTHER_COLUMNS)
            .collect();
        essential.extend(others);

        for &i in &essential {
            text.push_str(&format!("  • {}\n", describe_column(&columns[i])));
        }
        if columns.len() > MAX_KEY_COLUMNS + MAX_OTHER_COLUMNS {
            text.push_str(&format!(
                "  ... and {} more columns\n",
                columns.len() - essential.len()
            ));
        }
        text.push('\n');
    }
    text
}

/// `NAME (TYPE): description`, with the size stripped from the type and the
/// description cut to its first sentence within 50 chars.
fn describe_column(col: &ColumnInfo) -> String {
    let data_type = col.data_type.split('(').next().unwrap_or("").trim();
    let mut desc: String = col.description.chars().take(DESCRIPTION_CHARS).collect();
    if !desc.is_empty() && !desc.ends_with('.') {
        desc = format!("{}...", desc.split('.').next().unwrap_or(""));
    }

    let mut line = col.name.clone();
    if !data_type.is_empty() {
        line.push_str(&format!(" ({})", data_type));
    }
    if !desc.is_empty() {
        line.push_str(&format!(": {}", desc));
    }
    line
}

// ============ Script documents ============

/// Important scripts first, then a bounded sample of the rest.
pub fn load_script_documents(config: &CorpusConfig) -> Result<Vec<CorpusDocument>> {
    let include = build_globset(&config.include_globs)?;
    let mut excludes = vec![
        "**/.git/**".to_string(),
        "**/.DS_Store".to_string(),
    ];
    excludes.extend(config.exclude_globs.clone());
    let exclude = build_globset(&excludes)?;

    let mut docs = Vec::new();

    let important_dir = config.important_dir();
    for path in walk_files(&important_dir, &include, &exclude) {
        let Some(text) = read_script(&path) else { continue };
        let text = truncate(&text, config.important_max_chars, "\n... [truncated for efficiency]");
        let name = file_name(&path);
        let rel = relative(&path, &config.scripts_dir);

        let mut metadata = BTreeMap::new();
        metadata.insert("source".to_string(), "script".to_string());
        metadata.insert("type".to_string(), "sql_example".to_string());
        metadata.insert("priority".to_string(), Priority::High.as_str().to_string());
        metadata.insert("category".to_string(), "important".to_string());
        metadata.insert("file_name".to_string(), name);

        docs.push(CorpusDocument {
            id: document_id("script", &rel),
            text,
            priority: Priority::High,
            metadata,
        });
    }

    let mut others = 0;
    for path in walk_files(&config.scripts_dir, &include, &exclude) {
        if others >= config.max_other_scripts {
            break;
        }
        if path.starts_with(&important_dir) {
            continue;
        }
        let Some(text) = read_script(&path) else { continue };
        let text = truncate(&text, config.other_max_chars, "\n... [truncated]");
        let rel = relative(&path, &config.scripts_dir);
        let category = path
            .parent()
            .and_then(|p| p.file_name())
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        let mut metadata = BTreeMap::new();
        metadata.insert("source".to_string(), "script".to_string());
        metadata.insert("type".to_string(), "sql_example".to_string());
        metadata.insert("priority".to_string(), Priority::Normal.as_str().to_string());
        metadata.insert("category".to_string(), category);
        metadata.insert("file_name".to_string(), file_name(&path));

        docs.push(CorpusDocument {
            id: document_id("script", &rel),
            text,
            priority: Priority::Normal,
            metadata,
        });
        others += 1;
    }

    Ok(docs)
}

/// Files under `root` matching the globs, sorted by path. A missing root
/// yields nothing.
fn walk_files(root: &Path, include: &GlobSet, exclude: &GlobSet) -> Vec<PathBuf> {
    if !root.exists() {
        return Vec::new();
    }
    let mut files: Vec<PathBuf> = WalkDir::new(root)
        .into_iter()
        .filter_map(|e| match e {
            Ok(entry) => Some(entry),
            Err(err) => {
                tracing::warn!("Skipping unreadable entry: {}", err);
                None
            }
        })
        .filter(|e| e.file_type().is_file())
        .filter(|e| {
            let rel = relative(e.path(), root);
            !exclude.is_match(&rel) && include.is_match(&rel)
        })
        .map(|e| e.into_path())
        .collect();
    files.sort();
    files
}

/// Trimmed file text; `None` for empty or unreadable files.
fn read_script(path: &Path) -> Option<String> {
    match std::fs::read(path) {
        Ok(bytes) => {
            let text = String::from_utf8_lossy(&bytes).trim().to_string();
            (!text.is_empty()).then_some(text)
        }
        Err(e) => {
            tracing::warn!("Could not read {}: {}", path.display(), e);
            None
        }
    }
}

fn truncate(text: &str, max_chars: usize, marker: &str) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max_chars).collect();
    out.push_str(marker);
    out
}

fn relative(path: &Path, root: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/")
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}

/// Stable id: SHA-256 of source kind and path.
fn document_id(source: &str, key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    hasher.update(b":");
    hasher.update(key.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

// ============ Preferred tables ============

/// Table names after `FROM`/`JOIN` in the important scripts, most used
/// first (ties by name), at most `limit`.
pub fn mine_preferred_tables(important_dir: &Path, limit: usize) -> Vec<String> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for entry in WalkDir::new(important_dir).into_iter().filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(bytes) = std::fs::read(entry.path()) else { continue };
        let text = String::from_utf8_lossy(&bytes).to_lowercase();
        for cap in PREFERRED_RE.captures_iter(&text) {
            if let Some(m) = cap.get(1).or_else(|| cap.get(2)) {
                *counts.entry(m.as_str().to_string()).or_insert(0) += 1;
            }
        }
    }

    let mut ordered: Vec<(String, usize)> = counts.into_iter().collect();
    ordered.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    ordered.into_iter().take(limit).map(|(t, _)| t).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(path: &Path, content: &str) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    fn corpus_config(root: &Path) -> CorpusConfig {
        CorpusConfig {
            schema_dir: root.join("Schema"),
            scripts_dir: root.join("Historical_Scripts"),
            index_dir: root.join("rag_storage"),
            ..CorpusConfig::default()
        }
    }

    #[test]
    fn test_schema_summary_layout() {
        let dir = tempfile::tempdir().unwrap();
        write(
            &dir.path().join("Schema/billing_schema.json"),
            r#"{"BILLS": [
                {"column": "NOTE", "type": "VARCHAR2(200)", "description": "Free text"},
                {"column": "ACCOUNT_NUMBER", "type": "VARCHAR2(20)", "description": "Account."},
                {"column": "AMOUNT", "type": "NUMBER(12,2)", "description": "Billed amount. Includes tax"},
                {"column": "BILL_DATE", "type": "DATE", "description": ""},
                {"column": "REFERENCE", "type": "VARCHAR2(40)", "description": ""},
                {"column": "STATUS", "type": "CHAR(1)", "description": ""},
                {"column": "CREATED_BY", "type": "VARCHAR2(30)", "description": ""}
            ]}"#,
        );
        let docs = load_schema_documents(&dir.path().join("Schema"));
        assert_eq!(docs.len(), 1);
        let doc = &docs[0];
        assert_eq!(doc.priority, Priority::High);
        assert_eq!(doc.metadata["system"], "BILLING");
        assert_eq!(doc.metadata["schema_file"], "billing_schema.json");

        let expected = "DATABASE SCHEMA - BILLING SYSTEM\n\n\
            Table: BILLS\n\
            \x20 • ACCOUNT_NUMBER (VARCHAR2): Account.\n\
            \x20 • AMOUNT (NUMBER): Billed amount...\n\
            \x20 • BILL_DATE (DATE)\n\
            \x20 • NOTE (VARCHAR2): Free text...\n\
            \x20 • REFERENCE (VARCHAR2)\n\
            \x20 ... and 2 more columns\n\n";
        assert_eq!(doc.text, expected);
    }

    #[test]
    fn test_scripts_priority_truncation_and_cap() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write(
            &root.join("Historical_Scripts/IMPORTANT/a.sql"),
            &"x".repeat(1200),
        );
        write(&root.join("Historical_Scripts/IMPORTANT/empty.sql"), "  \n");
        for i in 0..20 {
            write(
                &root.join(format!("Historical_Scripts/billing/{:02}.sql", i)),
                "SELECT * FROM bills;",
            );
        }
        write(&root.join("Historical_Scripts/misc/long.sql"), &"y".repeat(900));

        let config = corpus_config(root);
        let docs = load_script_documents(&config).unwrap();
        assert_eq!(docs.len(), 1 + 15);

        let important = &docs[0];
        assert_eq!(important.priority, Priority::High);
        assert_eq!(important.metadata["category"], "important");
        assert!(important.text.ends_with("\n... [truncated for efficiency]"));
        assert_eq!(important.text.chars().filter(|c| *c == 'x').count(), 1000);

        assert!(docs[1..].iter().all(|d| d.priority == Priority::Normal));
        assert_eq!(docs[1].metadata["category"], "billing");
    }

    #[test]
    fn test_other_script_truncated() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write(&root.join("Historical_Scripts/misc/long.sql"), &"y".repeat(900));
        let docs = load_script_documents(&corpus_config(root)).unwrap();
        assert_eq!(docs.len(), 1);
        assert!(docs[0].text.ends_with("\n... [truncated]"));
    }

    #[test]
    fn test_exclude_globs() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write(&root.join("Historical_Scripts/misc/keep.sql"), "SELECT 1;");
        write(&root.join("Historical_Scripts/misc/skip.bak"), "SELECT 2;");
        let mut config = corpus_config(root);
        config.exclude_globs = vec!["**/*.bak".to_string()];
        let docs = load_script_documents(&config).unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].metadata["file_name"], "keep.sql");
    }

    #[test]
    fn test_empty_corpus_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = build_corpus(&corpus_config(dir.path())).unwrap_err();
        assert!(err.to_string().contains("No documents were loaded"));
    }

    #[test]
    fn test_document_ids_stable() {
        let dir = tempfile::tempdir().unwrap();
        write(&dir.path().join("Historical_Scripts/misc/a.sql"), "SELECT 1;");
        let config = corpus_config(dir.path());
        let a = load_script_documents(&config).unwrap();
        let b = load_script_documents(&config).unwrap();
        assert_eq!(a[0].id, b[0].id);
    }

    #[test]
    fn test_preferred_tables_ranked() {
        let dir = tempfile::tempdir().unwrap();
        write(
            &dir.path().join("a.sql"),
            "SELECT * FROM land_relation JOIN land_legal ON 1=1;\nselect * from bills;",
        );
        write(&dir.path().join("b.sql"), "SELECT * FROM bills b JOIN folios f ON 1=1;");
        let tables = mine_preferred_tables(dir.path(), 3);
        assert_eq!(tables, vec!["bills", "folios", "land_legal"]);
        assert!(mine_preferred_tables(Path::new("/no/such/dir"), 5).is_empty());
    }
}
