//! Application context.
//!
//! Everything a request handler reads is built once by
//! [`AppContext::initialize`] and shared read-only behind an `Arc`:
//! configuration, rules, the schema index, the deny list, stores and the
//! external capabilities. A missing index or credential is logged and leaves
//! the matching capability unset; request handling then degrades instead of
//! failing startup.
//!
//! Tests assemble a context with [`AppContext::builder`], injecting stub
//! capabilities and skipping all disk loading.

use serde::Serialize;
use std::sync::Arc;

use crate::config::Config;
use crate::contact::{Mailer, SmtpMailer};
use crate::corpus::mine_preferred_tables;
use crate::feedback::FeedbackLedger;
use crate::index::VectorIndex;
use crate::llm::{ChatCompletionClient, Generator};
use crate::rag::{RagEngine, Retriever};
use crate::rules::{load_rules, RuleSet};
use crate::schema::SchemaIndex;
use crate::session::SessionStore;
use crate::validate::DenyList;

/// What came up at startup.
#[derive(Debug, Clone, Default, Serialize)]
pub struct InitState {
    pub query_engine_initialized: bool,
    pub validator_initialized: bool,
    pub classifier_initialized: bool,
    pub schema_tables: usize,
    pub preferred_tables: usize,
    pub deny_list_entries: usize,
    pub index_nodes: Option<usize>,
    /// Degradations recorded during initialization.
    pub warnings: Vec<String>,
}

pub struct AppContext {
    pub config: Config,
    pub rules: RuleSet,
    /// Rendered rule instructions for the refinement prompt.
    pub instructions: String,
    pub schema: SchemaIndex,
    pub preferred_tables: Vec<String>,
    pub deny_list: DenyList,
    pub sessions: SessionStore,
    pub feedback: FeedbackLedger,
    pub retriever: Option<Arc<dyn Retriever>>,
    pub classifier: Option<Arc<dyn Generator>>,
    pub validator: Option<Arc<dyn Generator>>,
    pub mailer: Arc<dyn Mailer>,
    pub init: InitState,
}

impl AppContext {
    /// Load rules, schema, preferred tables and the index, and connect the
    /// hosted model clients. Never fails; problems are recorded in
    /// [`InitState::warnings`].
    pub fn initialize(config: Config) -> Self {
        let mut warnings = Vec::new();

        let rules = load_rules(&config.rules.path);
        let schema = SchemaIndex::load(&config.corpus.schema_dir);
        if schema.is_empty() {
            warnings.push(format!(
                "No schema tables loaded from {}",
                config.corpus.schema_dir.display()
            ));
        }
        let preferred_tables = schema_valid_tables(
            &schema,
            mine_preferred_tables(
                &config.corpus.important_dir(),
                config.corpus.preferred_tables_limit,
            ),
        );

        let generator: Option<Arc<dyn Generator>> =
            match ChatCompletionClient::generator(&config.llm) {
                Ok(c) => Some(Arc::new(c) as Arc<dyn Generator>),
                Err(e) => {
                    warnings.push(format!("Generator unavailable: {:#}", e));
                    None
                }
            };
        let validator: Option<Arc<dyn Generator>> =
            ChatCompletionClient::validator(&config.llm)
                .ok()
                .map(|c| Arc::new(c) as Arc<dyn Generator>);
        let classifier: Option<Arc<dyn Generator>> = if config.llm.classify_intent {
            ChatCompletionClient::classifier(&config.llm)
                .ok()
                .map(|c| Arc::new(c) as Arc<dyn Generator>)
        } else {
            None
        };

        let mut builder = AppContext::builder(config)
            .rules(rules)
            .schema(schema)
            .preferred_tables(preferred_tables);

        let index_dir = builder.config.corpus.index_dir.clone();
        let mut index_nodes = None;
        match (VectorIndex::load(&index_dir), generator) {
            (Ok(index), Some(generator)) => {
                index_nodes = Some(index.nodes().len());
                let engine = RagEngine::new(
                    index,
                    builder.config.embedding.clone(),
                    generator,
                    builder.preferred_tables.clone(),
                );
                builder = builder.retriever(Arc::new(engine));
            }
            (Err(e), _) => warnings.push(format!("Retrieval index unavailable: {:#}", e)),
            (Ok(_), None) => {
                warnings.push("Retrieval index loaded but no generator configured".to_string())
            }
        }

        if let Some(v) = validator {
            builder = builder.validator(v);
        }
        if let Some(c) = classifier {
            builder = builder.classifier(c);
        }

        let mut ctx = builder.build();
        ctx.init.index_nodes = index_nodes;
        for w in &warnings {
            tracing::warn!("{}", w);
        }
        ctx.init.warnings = warnings;

        tracing::info!(
            schema_tables = ctx.init.schema_tables,
            preferred_tables = ctx.init.preferred_tables,
            query_engine = ctx.init.query_engine_initialized,
            validator = ctx.init.validator_initialized,
            "application context initialized"
        );
        ctx
    }

    pub fn builder(config: Config) -> AppContextBuilder {
        AppContextBuilder {
            config,
            rules: RuleSet::default(),
            schema: SchemaIndex::default(),
            preferred_tables: Vec::new(),
            retriever: None,
            classifier: None,
            validator: None,
            mailer: None,
        }
    }
}

/// Assembles an [`AppContext`] from explicit parts.
pub struct AppContextBuilder {
    config: Config,
    rules: RuleSet,
    schema: SchemaIndex,
    preferred_tables: Vec<String>,
    retriever: Option<Arc<dyn Retriever>>,
    classifier: Option<Arc<dyn Generator>>,
    validator: Option<Arc<dyn Generator>>,
    mailer: Option<Arc<dyn Mailer>>,
}

impl AppContextBuilder {
    pub fn rules(mut self, rules: RuleSet) -> Self {
        self.rules = rules;
        self
    }

    pub fn schema(mut self, schema: SchemaIndex) -> Self {
        self.schema = schema;
        self
    }

    /// Historically preferred tables. When the schema index is non-empty,
    /// tables missing from it are dropped: schema validity wins.
    pub fn preferred_tables(mut self, tables: Vec<String>) -> Self {
        self.preferred_tables = tables;
        self
    }

    pub fn retriever(mut self, retriever: Arc<dyn Retriever>) -> Self {
        self.retriever = Some(retriever);
        self
    }

    pub fn classifier(mut self, classifier: Arc<dyn Generator>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    pub fn validator(mut self, validator: Arc<dyn Generator>) -> Self {
        self.validator = Some(validator);
        self
    }

    pub fn mailer(mut self, mailer: Arc<dyn Mailer>) -> Self {
        self.mailer = Some(mailer);
        self
    }

    pub fn build(self) -> AppContext {
        let config = self.config;
        let schema = self.schema;
        let preferred_tables = schema_valid_tables(&schema, self.preferred_tables);
        let deny_list = DenyList::from_rules(&self.rules.known_hallucinations);
        let instructions = self.rules.instructions();

        let init = InitState {
            query_engine_initialized: self.retriever.is_some(),
            validator_initialized: self.validator.is_some(),
            classifier_initialized: self.classifier.is_some(),
            schema_tables: schema.table_count(),
            preferred_tables: preferred_tables.len(),
            deny_list_entries: deny_list.len(),
            index_nodes: None,
            warnings: Vec::new(),
        };

        AppContext {
            sessions: SessionStore::new(config.storage.chat_dir.clone()),
            feedback: FeedbackLedger::new(
                config.storage.feedback_path.clone(),
                config.storage.feedback_cap,
                config.storage.feedback_prompt_limit,
            ),
            mailer: self
                .mailer
                .unwrap_or_else(|| Arc::new(SmtpMailer::new(config.contact.to_email.clone()))),
            config,
            rules: self.rules,
            instructions,
            schema,
            preferred_tables,
            deny_list,
            retriever: self.retriever,
            classifier: self.classifier,
            validator: self.validator,
            init,
        }
    }
}

/// Drop tables the schema index does not know. An empty index keeps all.
fn schema_valid_tables(schema: &SchemaIndex, tables: Vec<String>) -> Vec<String> {
    if schema.is_empty() {
        return tables;
    }
    tables
        .into_iter()
        .filter(|t| schema.contains_table(t))
        .collect()
}
