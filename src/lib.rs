//! # sqlchat
//!
//! A retrieval-augmented chatbot that turns natural-language requests into
//! SQL for one known database schema.
//!
//! A request is classified by intent. Data requests go through a bounded
//! generate → check → correct → refine → lock pipeline, grounded in a
//! vector index built from schema descriptions and example scripts. Results
//! are kept in per-session chat histories, and user-reported errors are fed
//! back into later prompts as lessons.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌─────────────┐   ┌──────────────┐
//! │   Corpus    │──▶│ Chunk+Embed │──▶│ rag_storage  │
//! │ Schema/SQL  │   │             │   │ (JSON index) │
//! └─────────────┘   └─────────────┘   └──────┬───────┘
//!                                            │
//!                 ┌──────────────────────────┤
//!                 ▼                          ▼
//!           ┌──────────┐  intent   ┌──────────────────┐
//!           │   Chat   │──────────▶│  Query pipeline  │
//!           │ sessions │           │ check/correct/   │
//!           └────┬─────┘           │ refine/lock      │
//!                │                 └──────────────────┘
//!       ┌────────┴────────┐
//!       ▼                 ▼
//!  ┌──────────┐      ┌──────────┐
//!  │   CLI    │      │   HTTP   │
//!  │(sqlchat) │      │  (axum)  │
//!  └──────────┘      └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! sqlchat index build                 # chunk, embed and persist the corpus
//! sqlchat ask "total bills for 2024"  # one turn from the terminal
//! sqlchat serve                       # start the HTTP server
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Typed errors callers branch on |
//! | [`models`] | Sessions, messages, API types |
//! | [`rules`] | Rule file loading and SQL lint |
//! | [`schema`] | Table/column index for SQL checks |
//! | [`extract`] | SQL, explanation and table extraction |
//! | [`format`] | Vertical SQL layout |
//! | [`validate`] | Known-hallucination deny list |
//! | [`intent`] | Intent classification and clarifications |
//! | [`corpus`] | Schema and script documents |
//! | [`chunk`] | Text chunking |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`index`] | Persisted vector index |
//! | [`index_cmd`] | `sqlchat index` commands |
//! | [`progress`] | Index build progress reporting |
//! | [`llm`] | Chat-completion client |
//! | [`rag`] | Retrieval-augmented generation |
//! | [`prompt`] | Prompt templates |
//! | [`refine`] | Validator refinement step |
//! | [`pipeline`] | The bounded query pipeline |
//! | [`feedback`] | Lesson ledger |
//! | [`session`] | Session persistence |
//! | [`contact`] | Contact-form relay |
//! | [`app`] | Shared application context |
//! | [`chat`] | Chat turn handling |
//! | [`server`] | HTTP server |

pub mod app;
pub mod chat;
pub mod chunk;
pub mod config;
pub mod contact;
pub mod corpus;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod feedback;
pub mod format;
pub mod index;
pub mod index_cmd;
pub mod intent;
pub mod llm;
pub mod models;
pub mod pipeline;
pub mod progress;
pub mod prompt;
pub mod rag;
pub mod refine;
pub mod rules;
pub mod schema;
pub mod server;
pub mod session;
pub mod validate;
