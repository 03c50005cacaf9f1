//! Query-generation pipeline.
//!
//! A bounded state machine over at most five sequential external calls:
//!
//! ```text
//! Generated ──▶ SchemaChecked ──▶ Corrected ──▶ Refined ──▶ Locked ──▶ Final
//!  (1 call,      (deny list +     (≤1 call per   (1 call)    (≤1 call)
//!   +1 minimal    schema index)    failed check)
//!   retry on
//!   overflow)
//! ```
//!
//! Every corrective edge is taken at most once. A failing generation never
//! raises: the terminal fallback is a fixed placeholder query.
//!
//! Schema validity dominates the historical table preference: preferred
//! tables only appear in the retrieval prompt as a hint, while schema
//! failures force a regeneration and only schema-valid tables are locked.

use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::is_context_overflow;
use crate::extract::{extract_explanation, extract_sql, extract_sql_or_text, extract_tables};
use crate::format::vertical_format_sql;
use crate::llm::Generator;
use crate::prompt;
use crate::rag::Retriever;
use crate::refine::refine;
use crate::rules::lint_sql;
use crate::schema::SchemaIndex;
use crate::validate::DenyList;

/// Upper bound on external calls for one request.
pub const MAX_EXTERNAL_CALLS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Generated,
    SchemaChecked,
    Corrected,
    Refined,
    Locked,
    Final,
}

/// Result of one pipeline run.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineOutcome {
    pub sql: String,
    pub explanation: String,
    pub locked_tables: Vec<String>,
    /// Advisory structural findings on the final SQL.
    pub lint: Vec<String>,
    pub stages: Vec<Stage>,
    pub external_calls: usize,
    /// True when generation failed and the placeholder was returned.
    pub degraded: bool,
}

/// Borrowed capabilities and read-only state for one run.
pub struct QueryPipeline<'a> {
    pub retriever: Option<&'a dyn Retriever>,
    pub validator: Option<&'a dyn Generator>,
    pub schema: &'a SchemaIndex,
    pub deny_list: &'a DenyList,
    pub instructions: &'a str,
    pub top_k: usize,
    pub fallback_top_k: usize,
}

struct Run<'p, 'a> {
    pipeline: &'p QueryPipeline<'a>,
    calls: AtomicUsize,
    stages: Vec<Stage>,
}

impl Run<'_, '_> {
    fn enter(&mut self, stage: Stage) {
        tracing::debug!(?stage, calls = self.calls.load(Ordering::Relaxed), "pipeline stage");
        self.stages.push(stage);
    }

    async fn query(&self, text: &str, top_k: usize) -> anyhow::Result<String> {
        let retriever = self
            .pipeline
            .retriever
            .ok_or_else(|| anyhow::anyhow!("Retrieval index is not loaded"))?;
        self.calls.fetch_add(1, Ordering::Relaxed);
        retriever.query(text, top_k).await
    }

    /// One corrective regeneration; on failure the previous response stands.
    async fn correct(&self, prompt: String, previous: String) -> String {
        match self.query(&prompt, self.pipeline.top_k).await {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!("Corrective regeneration failed: {:#}", e);
                previous
            }
        }
    }
}

impl<'a> QueryPipeline<'a> {
    /// Run the pipeline for `question` (the user's text) with `context` (the
    /// assembled retrieval context).
    pub async fn run(&self, question: &str, context: &str) -> PipelineOutcome {
        let mut run = Run {
            pipeline: self,
            calls: AtomicUsize::new(0),
            stages: Vec::new(),
        };

        // Generated
        let (mut response, first_ok) = match run.query(context, self.top_k).await {
            Ok(text) => (text, true),
            Err(e) if is_context_overflow(&e) => {
                tracing::warn!("Context overflow, retrying with top_k={}: {:#}", self.fallback_top_k, e);
                match run.query(context, self.fallback_top_k).await {
                    Ok(text) => (text, false),
                    Err(e) => {
                        tracing::warn!("Minimal retrieval also failed: {:#}", e);
                        return run.placeholder();
                    }
                }
            }
            Err(e) => {
                tracing::warn!("Query engine error: {:#}", e);
                return run.placeholder();
            }
        };
        run.enter(Stage::Generated);

        let mut locked_tables = Vec::new();
        if first_ok {
            if let Some(sql) = extract_sql(&response) {
                locked_tables = extract_tables(&sql)
                    .into_iter()
                    .filter(|t| self.schema.contains_table(t))
                    .collect();

                // SchemaChecked / Corrected
                let deny = self.deny_list.check(&sql);
                let schema_err = self.schema.check_sql(&sql);
                run.enter(Stage::SchemaChecked);

                let mut corrected = false;
                let mut current_sql = sql;
                if let Some(msg) = deny {
                    tracing::info!(violation = %msg, "deny-list correction");
                    response = run
                        .correct(prompt::deny_list_correction(context, &msg), response)
                        .await;
                    current_sql = extract_sql(&response).unwrap_or(current_sql);
                    corrected = true;
                }
                let schema_err = if corrected {
                    self.schema.check_sql(&current_sql)
                } else {
                    schema_err
                };
                if let Some(msg) = schema_err {
                    tracing::info!(violation = %msg, "schema correction");
                    response = run
                        .correct(prompt::schema_correction(context, &msg), response)
                        .await;
                    corrected = true;
                }
                if corrected {
                    run.enter(Stage::Corrected);
                }
            }
        }

        // Refined
        let refinement = refine(self.validator, question, &response, self.instructions).await;
        if self.validator.is_some() {
            run.calls.fetch_add(1, Ordering::Relaxed);
        }
        run.enter(Stage::Refined);
        let mut sql = vertical_format_sql(&refinement.sql);
        let mut explanation = refinement.explanation;

        // Locked
        if !locked_tables.is_empty() {
            let present = extract_tables(&sql);
            let missing: Vec<&String> = locked_tables.iter().filter(|t| !present.contains(t)).collect();
            if !missing.is_empty() {
                tracing::info!(?missing, "locked tables dropped by refinement; regenerating");
                match run
                    .query(&prompt::table_lock_constraint(context, &locked_tables), self.top_k)
                    .await
                {
                    Ok(text) => {
                        if let Some(candidate) = extract_sql(&text) {
                            sql = vertical_format_sql(&candidate);
                        }
                    }
                    Err(e) => tracing::warn!("Table-lock regeneration failed: {:#}", e),
                }
            }
            let bullet = format!("• Tables locked: {}", locked_tables.join(", "));
            if !explanation.contains(&bullet) {
                explanation = format!("{}\n{}", bullet, explanation);
            }
            run.enter(Stage::Locked);
        }

        run.finish(sql, explanation, locked_tables, false)
    }
}

impl Run<'_, '_> {
    fn placeholder(mut self) -> PipelineOutcome {
        let sql = extract_sql_or_text(prompt::PLACEHOLDER_RESPONSE).unwrap_or_default();
        let explanation = extract_explanation(prompt::PLACEHOLDER_RESPONSE);
        self.enter(Stage::Generated);
        self.finish(sql, explanation, Vec::new(), true)
    }

    fn finish(
        mut self,
        sql: String,
        explanation: String,
        locked_tables: Vec<String>,
        degraded: bool,
    ) -> PipelineOutcome {
        self.enter(Stage::Final);
        let lint = if sql.is_empty() { Vec::new() } else { lint_sql(&sql) };
        for finding in &lint {
            tracing::debug!(%finding, "lint");
        }
        let external_calls = self.calls.load(Ordering::Relaxed);
        tracing::info!(external_calls, degraded, "pipeline finished");
        PipelineOutcome {
            sql,
            explanation,
            locked_tables,
            lint,
            stages: self.stages,
            external_calls,
            degraded,
        }
    }
}
