use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::SqlChatError;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub corpus: CorpusConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub rules: RulesConfig,
    #[serde(default)]
    pub contact: ContactConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    /// When set, `/query` answers "ACCESS DENIED" without running the pipeline.
    #[serde(default = "default_sealed")]
    pub sealed: bool,
    #[serde(default = "default_frontend_dir")]
    pub frontend_dir: PathBuf,
    /// Route path → HTML file name inside `frontend_dir`.
    #[serde(default = "default_pages")]
    pub pages: BTreeMap<String, String>,
    #[serde(default = "default_favicon")]
    pub favicon: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            sealed: default_sealed(),
            frontend_dir: default_frontend_dir(),
            pages: default_pages(),
            favicon: default_favicon(),
        }
    }
}

fn default_bind() -> String {
    "0.0.0.0:8002".to_string()
}
fn default_sealed() -> bool {
    true
}
fn default_frontend_dir() -> PathBuf {
    PathBuf::from("./frontend")
}
fn default_favicon() -> String {
    "logo.png".to_string()
}

fn default_pages() -> BTreeMap<String, String> {
    [
        ("/", "website2.html"),
        ("/meter-form-processor", "meter-form-processor.html"),
        ("/single-occupancy-discount", "single-occupancy-discount.html"),
        ("/secondary-suite-exemption", "secondary-suite-exemption.html"),
        ("/water-consumption-anomaly", "water-consumption-anomaly.html"),
        ("/sql-query-generator", "sql-query-generator.html"),
        ("/projects", "projects.html"),
        ("/contact", "contact.html"),
    ]
    .into_iter()
    .map(|(route, file)| (route.to_string(), file.to_string()))
    .collect()
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_chat_dir")]
    pub chat_dir: PathBuf,
    #[serde(default = "default_feedback_path")]
    pub feedback_path: PathBuf,
    #[serde(default = "default_feedback_cap")]
    pub feedback_cap: usize,
    #[serde(default = "default_feedback_prompt_limit")]
    pub feedback_prompt_limit: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            chat_dir: default_chat_dir(),
            feedback_path: default_feedback_path(),
            feedback_cap: default_feedback_cap(),
            feedback_prompt_limit: default_feedback_prompt_limit(),
        }
    }
}

fn default_chat_dir() -> PathBuf {
    PathBuf::from("./chatbot_data")
}
fn default_feedback_path() -> PathBuf {
    PathBuf::from("./SQL_App/feedback_store.json")
}
fn default_feedback_cap() -> usize {
    500
}
fn default_feedback_prompt_limit() -> usize {
    100
}

#[derive(Debug, Deserialize, Clone)]
pub struct CorpusConfig {
    #[serde(default = "default_schema_dir")]
    pub schema_dir: PathBuf,
    #[serde(default = "default_scripts_dir")]
    pub scripts_dir: PathBuf,
    /// Sub-directory of `scripts_dir` holding high-priority scripts.
    #[serde(default = "default_important_subdir")]
    pub important_subdir: String,
    #[serde(default = "default_index_dir")]
    pub index_dir: PathBuf,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default = "default_important_max_chars")]
    pub important_max_chars: usize,
    #[serde(default = "default_other_max_chars")]
    pub other_max_chars: usize,
    #[serde(default = "default_max_other_scripts")]
    pub max_other_scripts: usize,
    #[serde(default = "default_preferred_tables_limit")]
    pub preferred_tables_limit: usize,
}

impl Default for CorpusConfig {
    fn default() -> Self {
        Self {
            schema_dir: default_schema_dir(),
            scripts_dir: default_scripts_dir(),
            important_subdir: default_important_subdir(),
            index_dir: default_index_dir(),
            include_globs: default_include_globs(),
            exclude_globs: Vec::new(),
            important_max_chars: default_important_max_chars(),
            other_max_chars: default_other_max_chars(),
            max_other_scripts: default_max_other_scripts(),
            preferred_tables_limit: default_preferred_tables_limit(),
        }
    }
}

impl CorpusConfig {
    pub fn important_dir(&self) -> PathBuf {
        self.scripts_dir.join(&self.important_subdir)
    }
}

fn default_schema_dir() -> PathBuf {
    PathBuf::from("./SQL_App/Schema")
}
fn default_scripts_dir() -> PathBuf {
    PathBuf::from("./SQL_App/Historical_Scripts")
}
fn default_important_subdir() -> String {
    "IMPORTANT".to_string()
}
fn default_index_dir() -> PathBuf {
    PathBuf::from("./SQL_App/rag_storage")
}
fn default_include_globs() -> Vec<String> {
    vec!["**/*".to_string()]
}
fn default_important_max_chars() -> usize {
    1000
}
fn default_other_max_chars() -> usize {
    800
}
fn default_max_other_scripts() -> usize {
    15
}
fn default_preferred_tables_limit() -> usize {
    50
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    #[serde(default = "default_overlap")]
    pub overlap_tokens: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
            overlap_tokens: default_overlap(),
        }
    }
}

fn default_max_tokens() -> usize {
    512
}
fn default_overlap() -> usize {
    50
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_similarity_top_k")]
    pub similarity_top_k: usize,
    /// Result count for the retry after a context-size failure.
    #[serde(default = "default_fallback_top_k")]
    pub fallback_top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            similarity_top_k: default_similarity_top_k(),
            fallback_top_k: default_fallback_top_k(),
        }
    }
}

fn default_similarity_top_k() -> usize {
    3
}
fn default_fallback_top_k() -> usize {
    1
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "disabled".to_string(),
            model: None,
            dims: None,
            url: None,
            batch_size: 64,
            max_retries: 5,
            timeout_secs: 30,
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// Model used for the validation/refinement pass. Defaults to `model`.
    #[serde(default)]
    pub validator_model: Option<String>,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_model_env")]
    pub model_env: String,
    #[serde(default)]
    pub temperature: f32,
    #[serde(default = "default_llm_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_classifier_max_tokens")]
    pub classifier_max_tokens: u32,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_llm_max_retries")]
    pub max_retries: u32,
    /// Ask the model to classify intent before using the rule-based fallback.
    #[serde(default = "default_true")]
    pub classify_intent: bool,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            model: default_model(),
            validator_model: None,
            api_key_env: default_api_key_env(),
            model_env: default_model_env(),
            temperature: 0.0,
            max_tokens: default_llm_max_tokens(),
            classifier_max_tokens: default_classifier_max_tokens(),
            timeout_secs: default_llm_timeout_secs(),
            max_retries: default_llm_max_retries(),
            classify_intent: true,
        }
    }
}

fn default_api_base() -> String {
    "https://api.together.xyz/v1".to_string()
}
fn default_model() -> String {
    "meta-llama/Meta-Llama-3.1-70B-Instruct-Turbo".to_string()
}
fn default_api_key_env() -> String {
    "TOGETHER_API_KEY".to_string()
}
fn default_model_env() -> String {
    "TOGETHER_MODEL".to_string()
}
fn default_llm_max_tokens() -> u32 {
    1024
}
fn default_classifier_max_tokens() -> u32 {
    16
}
fn default_llm_timeout_secs() -> u64 {
    120
}
fn default_llm_max_retries() -> u32 {
    2
}
fn default_true() -> bool {
    true
}

impl LlmConfig {
    /// API key from the configured environment variable, if set and non-empty.
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
    }

    /// Generation model: the environment override wins over the file value.
    pub fn resolved_model(&self) -> String {
        std::env::var(&self.model_env)
            .ok()
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| self.model.clone())
    }

    pub fn resolved_validator_model(&self) -> String {
        self.validator_model
            .clone()
            .unwrap_or_else(|| self.resolved_model())
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RulesConfig {
    #[serde(default = "default_rules_path")]
    pub path: PathBuf,
}

impl Default for RulesConfig {
    fn default() -> Self {
        Self {
            path: default_rules_path(),
        }
    }
}

fn default_rules_path() -> PathBuf {
    PathBuf::from("./SQL_App/mcp_instructions.json")
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ContactConfig {
    /// Recipient used when `TO_EMAIL` is not set.
    #[serde(default)]
    pub to_email: Option<String>,
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let mut config: Config =
        toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    apply_env_overrides(&mut config);
    validate(&config)?;
    Ok(config)
}

/// Applies `SQLCHAT_SEALED` on top of the file value.
pub fn apply_env_overrides(config: &mut Config) {
    if let Ok(v) = std::env::var("SQLCHAT_SEALED") {
        match v.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => config.server.sealed = true,
            "0" | "false" | "no" | "off" => config.server.sealed = false,
            _ => {}
        }
    }
}

/// Check cross-field constraints. Failures are [`SqlChatError::Config`].
pub fn validate(config: &Config) -> Result<()> {
    if config.chunking.max_tokens == 0 {
        return invalid("chunking.max_tokens must be > 0".to_string());
    }
    if config.chunking.overlap_tokens >= config.chunking.max_tokens {
        return invalid("chunking.overlap_tokens must be < chunking.max_tokens".to_string());
    }

    if config.retrieval.similarity_top_k == 0 {
        return invalid("retrieval.similarity_top_k must be >= 1".to_string());
    }
    if config.retrieval.fallback_top_k == 0 {
        return invalid("retrieval.fallback_top_k must be >= 1".to_string());
    }

    if config.storage.feedback_cap == 0 {
        return invalid("storage.feedback_cap must be >= 1".to_string());
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "ollama" | "local" => {}
        other => {
            return invalid(format!(
                "Unknown embedding provider: '{}'. Must be disabled, openai, ollama, or local.",
                other
            ))
        }
    }

    if config.embedding.is_enabled() && config.embedding.provider != "local" {
        if config.embedding.model.is_none() {
            return invalid(format!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            ));
        }
        if config.embedding.dims == Some(0) {
            return invalid("embedding.dims must be > 0".to_string());
        }
    }

    Ok(())
}

fn invalid(message: String) -> Result<()> {
    Err(SqlChatError::Config(message).into())
}
