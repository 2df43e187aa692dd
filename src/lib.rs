//! # Support RAG
//!
//! A domain-restricted, retrieval-augmented customer support chatbot.
//!
//! Support documents are split into overlapping chunks, embedded, and kept
//! in a SQLite vector store. Each user turn is rewritten into a
//! self-contained query, grounded on the most similar chunks, condensed into
//! a bounded context, and answered by a generation model. Out-of-domain
//! questions are declined and unknown facts are reported as unavailable
//! instead of invented.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌─────────────┐   ┌──────────┐
//! │   Corpus    │──▶│   Ingest    │──▶│  SQLite  │
//! │ (text files)│   │ Chunk+Embed │   │ vectors  │
//! └─────────────┘   └─────────────┘   └────┬─────┘
//!                                          │ search
//!   user ─▶ enhance ─▶ retrieve ◀──────────┘
//!                        │
//!                        ▼
//!                    summarize ─▶ respond ─▶ session
//! ```
//!
//! Embedding and generation calls go through per-provider token buckets
//! ([`rate_limit`]) with a timeout and bounded retries ([`collaborator`]).
//!
//! ## Quick Start
//!
//! ```bash
//! supportbot init                     # create database
//! supportbot ingest                   # chunk and embed the corpus
//! supportbot ask "What is the return window?"
//! supportbot chat                     # interactive session
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`corpus`] | Loading source documents from disk |
//! | [`embedding`] | Embedding providers |
//! | [`generation`] | Generation providers |
//! | [`rate_limit`] | Token-bucket request quotas |
//! | [`collaborator`] | Timeout, retry, and quota around provider calls |
//! | [`ingest`] | Idempotent chunk-and-embed pipeline |
//! | [`sqlite_store`] | SQLite vector store |
//! | [`pipeline`] | Enhance, retrieve, summarize, respond stages |
//! | [`chatbot`] | Per-turn orchestration |
//! | [`stats`] | Knowledge base statistics |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod chatbot;
pub mod collaborator;
pub mod config;
pub mod corpus;
pub mod db;
pub mod embedding;
pub mod generation;
pub mod ingest;
pub mod migrate;
pub mod pipeline;
pub mod rate_limit;
pub mod sqlite_store;
pub mod stats;
