//! # Support RAG Core
//!
//! Shared, I/O-free logic for the support chatbot: data models, the
//! overlapping chunker, collaborator traits (embedding and generation),
//! the vector store abstraction, bounded conversation state, prompt
//! templates, and the pipeline error taxonomy.
//!
//! This crate contains no tokio, sqlx, filesystem, or network
//! dependencies. The application crate wires concrete collaborators,
//! rate limiting, and persistence around it.

pub mod chunk;
pub mod embedding;
pub mod error;
pub mod generation;
pub mod models;
pub mod prompt;
pub mod session;
pub mod store;
