//! # Research Core
//!
//! Shared logic for the research query engine: data models, deterministic
//! chunking, the retrieval store abstraction, hybrid score fusion, context
//! assembly, the Writer → Reviewer → FactChecker agent pipeline, guardrails
//! and evaluation metrics.
//!
//! This crate contains no tokio, sqlx, HTTP or filesystem code. External
//! services (index, embedding, generation) are reached only through the
//! [`store::Store`], [`embedding::Embedder`] and [`generation::Generator`]
//! traits, which the `research-engine` application crate implements.
//!
//! ## Request flow
//!
//! ```text
//! query ─▶ guardrails(input) ─▶ search::hybrid_search ─▶ context::assemble
//!       ─▶ pipeline (Draft → Reviewed → FactChecked → Done)
//!       ─▶ guardrails(output) ─▶ metrics / evaluation cache ─▶ response
//! ```

pub mod chunk;
pub mod citations;
pub mod context;
pub mod embedding;
pub mod error;
pub mod generation;
pub mod guardrails;
pub mod metrics;
pub mod models;
pub mod pipeline;
pub mod search;
pub mod store;
pub mod text;

pub use error::{EngineError, EngineResult};
