//! Index build progress reporting.
//!
//! Reports observable progress during `sqlchat index build` so users see
//! what is being loaded, chunked and embedded. Progress is emitted on
//! **stderr** so the stdout report stays parseable for scripts.

use std::io::{IsTerminal, Write};

/// A single progress event for an index build.
#[derive(Clone, Debug)]
pub enum BuildProgressEvent {
    /// Reading schema files and scripts. Total unknown.
    Loading,
    /// Documents chunked so far.
    Chunking { n: u64, total: u64 },
    /// Chunks embedded so far.
    Embedding { n: u64, total: u64 },
    /// Writing the index files.
    Writing,
}

/// Reports build progress. Implementations write to stderr (human or JSON).
pub trait BuildProgressReporter: Send + Sync {
    fn report(&self, event: BuildProgressEvent);
}

/// Human-friendly progress on stderr: "index build  embedding  128 / 1,024 chunks".
pub struct StderrProgress;

impl BuildProgressReporter for StderrProgress {
    fn report(&self, event: BuildProgressEvent) {
        let line = match &event {
            BuildProgressEvent::Loading => "index build  loading corpus...\n".to_string(),
            BuildProgressEvent::Chunking { n, total } => format!(
                "index build  chunking  {} / {} documents\n",
                format_number(*n),
                format_number(*total)
            ),
            BuildProgressEvent::Embedding { n, total } => format!(
                "index build  embedding  {} / {} chunks\n",
                format_number(*n),
                format_number(*total)
            ),
            BuildProgressEvent::Writing => "index build  writing index files...\n".to_string(),
        };
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl BuildProgressReporter for JsonProgress {
    fn report(&self, event: BuildProgressEvent) {
        let obj = match &event {
            BuildProgressEvent::Loading => serde_json::json!({
                "event": "progress",
                "phase": "loading"
            }),
            BuildProgressEvent::Chunking { n, total } => serde_json::json!({
                "event": "progress",
                "phase": "chunking",
                "n": n,
                "total": total
            }),
            BuildProgressEvent::Embedding { n, total } => serde_json::json!({
                "event": "progress",
                "phase": "embedding",
                "n": n,
                "total": total
            }),
            BuildProgressEvent::Writing => serde_json::json!({
                "event": "progress",
                "phase": "writing"
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
            let _ = std::io::stderr().lock().flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl BuildProgressReporter for NoProgress {
    fn report(&self, _event: BuildProgressEvent) {}
}

pub(crate) fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    let chars: Vec<char> = s.chars().rev().collect();
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if std::io::stderr().is_terminal() {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn BuildProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
