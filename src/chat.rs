//! Chat turn handling behind `POST /query` and `sqlchat ask`.

use anyhow::Result;
use std::sync::Arc;
use uuid::Uuid;

use crate::app::AppContext;
use crate::intent::{classify_intent, clarification_questions, Intent};
use crate::models::{ChatMessage, ChatSession, QueryRequest, QueryResponse};
use crate::pipeline::{PipelineOutcome, QueryPipeline};
use crate::prompt;

pub const ACCESS_DENIED: &str = "ACCESS DENIED";

const GREETING: &str = "Hello! I’m here to generate SQL queries for your database. Describe the data you want and I’ll create a query, or paste an error you saw and I’ll fix it.";
const IRRELEVANT_NOTE: &str = "I can only assist with database SQL queries. Please describe the data you want and I’ll build a query for you.";
const FEEDBACK_ACK: &str = "Thanks. I recorded that error and will avoid the pattern next time. Ask again and I will generate a corrected query.";
const FEEDBACK_EXPLANATION: &str = "Recorded feedback.";
const CLARIFY_SUFFIX: &str = " (I'll proceed with defaults if not specified.)";

/// One handled turn, with the details the CLI prints.
#[derive(Debug, Clone)]
pub struct ChatTurn {
    pub response: QueryResponse,
    /// `None` when the request was sealed.
    pub intent: Option<Intent>,
    pub clarification: Option<String>,
    pub outcome: Option<PipelineOutcome>,
}

#[derive(Clone)]
pub struct ChatService {
    ctx: Arc<AppContext>,
}

impl ChatService {
    pub fn new(ctx: Arc<AppContext>) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &AppContext {
        &self.ctx
    }

    pub async fn handle_query(&self, request: QueryRequest) -> Result<QueryResponse> {
        Ok(self.handle(request).await?.response)
    }

    /// Run one turn. Fails only for an unknown session id; everything past
    /// the session lookup degrades instead of erroring.
    pub async fn handle(&self, request: QueryRequest) -> Result<ChatTurn> {
        let ctx = &self.ctx;
        let session_id = request.session_id.filter(|id| !id.trim().is_empty());

        if ctx.config.server.sealed {
            tracing::info!("sealed deployment: query denied");
            return Ok(ChatTurn {
                response: QueryResponse {
                    session_id: session_id.unwrap_or_else(new_id),
                    sql_query: String::new(),
                    explanation: ACCESS_DENIED.to_string(),
                    message_id: new_id(),
                },
                intent: None,
                clarification: None,
                outcome: None,
            });
        }

        let message = request.message;
        let mut session = match session_id {
            Some(id) => ctx.sessions.load(&id).await?,
            None => ChatSession::new(new_id(), &message),
        };
        session.push(ChatMessage::user(&message));

        let intent = classify_intent(&message, ctx.classifier.as_deref()).await;
        tracing::info!(session = %session.session_id, %intent, "chat turn");

        let mut turn = ChatTurn {
            response: QueryResponse {
                session_id: session.session_id.clone(),
                sql_query: String::new(),
                explanation: String::new(),
                message_id: new_id(),
            },
            intent: Some(intent),
            clarification: None,
            outcome: None,
        };

        match intent {
            Intent::Greet => {
                session.push(ChatMessage::assistant(GREETING));
                turn.response.explanation = GREETING.to_string();
            }
            Intent::Irrelevant => {
                session.push(ChatMessage::assistant(IRRELEVANT_NOTE));
                turn.response.explanation = IRRELEVANT_NOTE.to_string();
            }
            Intent::Feedback => {
                if let Err(e) = ctx.feedback.record_message(&message).await {
                    tracing::warn!("Could not record feedback lesson: {:#}", e);
                }
                session.push(ChatMessage::assistant(FEEDBACK_ACK));
                turn.response.explanation = FEEDBACK_EXPLANATION.to_string();
            }
            Intent::Query => {
                let mut user_text = message.clone();
                if let Some(questions) =
                    clarification_questions(&message, &ctx.rules.clarifications)
                {
                    session.push(ChatMessage::assistant(format!("{}{}", questions, CLARIFY_SUFFIX)));
                    user_text = prompt::with_default_assumptions(&message, &ctx.rules.default_assumptions);
                    turn.clarification = Some(questions);
                }

                let lessons = ctx.feedback.prompt_block().await;
                let context = prompt::assemble_context(&user_text, &lessons);

                let pipeline = QueryPipeline {
                    retriever: ctx.retriever.as_deref(),
                    validator: ctx.validator.as_deref(),
                    schema: &ctx.schema,
                    deny_list: &ctx.deny_list,
                    instructions: &ctx.instructions,
                    top_k: ctx.config.retrieval.similarity_top_k,
                    fallback_top_k: ctx.config.retrieval.fallback_top_k,
                };
                let outcome = pipeline.run(&message, &context).await;

                session.push(ChatMessage::assistant_sql(&outcome.sql, &outcome.explanation));
                turn.response.sql_query = outcome.sql.clone();
                turn.response.explanation = outcome.explanation.clone();
                turn.outcome = Some(outcome);
            }
        }

        session.touch();
        if let Err(e) = ctx.sessions.save(&session).await {
            tracing::warn!("Error saving session {}: {:#}", session.session_id, e);
        }
        Ok(turn)
    }
}

fn new_id() -> String {
    Uuid::new_v4().to_string()
}
