use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tempfile::TempDir;

fn sqlchat_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("sqlchat");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let schema_dir = root.join("Schema");
    fs::create_dir_all(&schema_dir).unwrap();
    fs::write(
        schema_dir.join("billing_schema.json"),
        r#"{"BILLS": [
            {"column": "ACCOUNT_NUMBER", "type": "VARCHAR2(20)", "description": "Account."},
            {"column": "AMOUNT", "type": "NUMBER(12,2)", "description": "Billed amount."}
        ]}"#,
    )
    .unwrap();

    let important = root.join("Scripts/IMPORTANT");
    fs::create_dir_all(&important).unwrap();
    fs::write(
        important.join("totals.sql"),
        "SELECT b.account_number, SUM(b.amount)\nFROM bills b\nGROUP BY b.account_number;",
    )
    .unwrap();
    let reports = root.join("Scripts/reports");
    fs::create_dir_all(&reports).unwrap();
    fs::write(reports.join("recent.sql"), "SELECT * FROM bills WHERE amount > 0;").unwrap();

    let config_content = format!(
        r#"[server]
bind = "127.0.0.1:8002"
sealed = true

[storage]
chat_dir = "{root}/chats"
feedback_path = "{root}/feedback_store.json"

[corpus]
schema_dir = "{root}/Schema"
scripts_dir = "{root}/Scripts"
index_dir = "{root}/rag_storage"

[chunking]
max_tokens = 256
overlap_tokens = 16

[rules]
path = "{root}/mcp_instructions.json"
"#,
        root = root.display()
    );

    let config_path = config_dir.join("sqlchat.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_sqlchat(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = sqlchat_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run sqlchat binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

#[test]
fn test_index_status_before_build() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_sqlchat(&config_path, &["index", "status"]);
    assert!(success, "status failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("docstore.json: missing"));
    assert!(stdout.contains("index not built"));
}

#[test]
fn test_index_build_then_status() {
    let (tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) =
        run_sqlchat(&config_path, &["index", "build", "--progress", "off"]);
    assert!(success, "build failed: stdout={}, stderr={}", stdout, stderr);
    // one schema summary plus two scripts
    assert!(stdout.contains("documents: 3"), "stdout={}", stdout);
    assert!(stdout.contains("embedded: 0"));
    assert!(tmp.path().join("rag_storage/docstore.json").is_file());

    let (stdout, _, success) = run_sqlchat(&config_path, &["index", "status"]);
    assert!(success);
    assert!(stdout.contains("docstore.json: present"));
    assert!(stdout.contains("default__vector_store.json: present"));
    assert!(stdout.contains("documents: 3"));
}

#[test]
fn test_index_build_json_progress() {
    let (_tmp, config_path) = setup_test_env();

    let (_, stderr, success) = run_sqlchat(&config_path, &["index", "build", "--progress", "json"]);
    assert!(success, "build failed: stderr={}", stderr);
    assert!(stderr.contains(r#""phase":"loading""#), "stderr={}", stderr);
}

#[test]
fn test_index_build_empty_corpus_fails() {
    let (tmp, config_path) = setup_test_env();
    fs::remove_dir_all(tmp.path().join("Schema")).unwrap();
    fs::remove_dir_all(tmp.path().join("Scripts")).unwrap();

    let (_, stderr, success) = run_sqlchat(&config_path, &["index", "build", "--progress", "off"]);
    assert!(!success);
    assert!(stderr.contains("No documents were loaded"), "stderr={}", stderr);
}

#[test]
fn test_missing_config_fails() {
    let tmp = TempDir::new().unwrap();
    let missing = tmp.path().join("nope.toml");

    let (_, stderr, success) = run_sqlchat(&missing, &["index", "status"]);
    assert!(!success);
    assert!(stderr.contains("Failed to read config file"));
}

#[test]
fn test_classify_needs_no_config() {
    let tmp = TempDir::new().unwrap();
    let missing = tmp.path().join("nope.toml");

    let (stdout, _, success) = run_sqlchat(&missing, &["classify", "hello"]);
    assert!(success);
    assert_eq!(stdout.trim(), "greet");

    let (stdout, _, _) = run_sqlchat(
        &missing,
        &["classify", "ORA-00904 error at line 3: invalid identifier"],
    );
    assert_eq!(stdout.trim(), "feedback");

    let (stdout, _, _) = run_sqlchat(&missing, &["classify", "total bills for 2024"]);
    assert_eq!(stdout.trim(), "query");
}

#[test]
fn test_format_reads_stdin() {
    let mut child = Command::new(sqlchat_binary())
        .arg("format")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .spawn()
        .unwrap();
    child
        .stdin
        .take()
        .unwrap()
        .write_all(b"select b.amount from bills b where x and y;\n")
        .unwrap();
    let output = child.wait_with_output().unwrap();
    assert!(output.status.success());
    assert_eq!(
        String::from_utf8_lossy(&output.stdout).trim_end(),
        "SELECT b.amount\nFROM bills b\nWHERE x\n  AND y;"
    );
}

#[test]
fn test_classify_prints_clarification() {
    let tmp = TempDir::new().unwrap();
    let missing = tmp.path().join("nope.toml");

    let (stdout, _, success) = run_sqlchat(&missing, &["classify", "list folios"]);
    assert!(success);
    let mut lines = stdout.lines();
    assert_eq!(lines.next(), Some("query"));
    assert!(lines
        .next()
        .unwrap()
        .starts_with("clarify: Did you want only active folios or all?"));
}

#[test]
fn test_ask_honours_seal() {
    let (tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_sqlchat(&config_path, &["ask", "total bills for 2024"]);
    assert!(success, "ask failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("ACCESS DENIED"));
    assert!(!stdout.contains("intent:"));
    assert!(!tmp.path().join("chats").exists());
}
