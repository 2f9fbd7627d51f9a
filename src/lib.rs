//! # Research Engine
//!
//! Answers research questions with citation-backed, fact-checked summaries
//! over a local document index.
//!
//! The algorithms (fusion, context assembly, the agent pipeline, guardrails,
//! metrics) live in `research-core`. This crate wires them to SQLite,
//! HTTP embedding/generation providers, an axum server and the `rqe` CLI.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐   ┌──────────────┐   ┌───────────┐
//! │  Ingestor │──▶│ Chunk+Embed  │──▶│  SQLite   │
//! │ files/API │   │              │   │ FTS5+Vec  │
//! └───────────┘   └──────────────┘   └─────┬─────┘
//!                                          │
//!                              ┌───────────┤
//!                              ▼           ▼
//!                        ┌──────────┐ ┌──────────┐
//!                        │ Retriever│ │Evaluation│
//!                        └────┬─────┘ │  Cache   │
//!                             ▼       └────▲─────┘
//!                   Writer → Reviewer → FactChecker
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] / [`migrate`] | Database connection and schema |
//! | [`sqlite_store`] | `Store` and `EvaluationStore` over SQLite |
//! | [`embedding`] / [`generation`] | Provider implementations |
//! | [`ingest`] | Batch ingestion and file loading |
//! | [`retrieval`] | Timeout/retry-wrapped hybrid retrieval |
//! | [`evaluation`] | Single-flight evaluation cache |
//! | [`engine`] | Request orchestration |
//! | [`server`] | HTTP API |
//! | [`commands`] | CLI command runners |

pub mod commands;
pub mod config;
pub mod db;
pub mod embedding;
pub mod engine;
pub mod evaluation;
pub mod generation;
pub mod http;
pub mod ingest;
pub mod migrate;
pub mod retrieval;
pub mod server;
pub mod sqlite_store;
