//! # corpus-rag
//!
//! Local retrieval over a small, fixed corpus of Markdown, Word (`.docx`)
//! and PDF documents.
//!
//! Documents are indexed lazily on first use and cached in memory, keyed by
//! path and invalidated by modification time and size. A query is routed to
//! candidate documents, each candidate's chunks are ranked by cosine
//! similarity, and an extractive answer is composed from the best passages.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌─────────────┐   ┌──────────────────────────┐
//! │  Router  │──▶│ QueryEngine │──▶│ IndexStore (LRU, etag)   │
//! │ keywords │   │ cos + top-k │   │ extract → chunk → embed  │
//! └──────────┘   └──────┬──────┘   └──────────────────────────┘
//!                       ▼
//!               ┌──────────────┐
//!               │AnswerComposer│
//!               └──────┬───────┘
//!          ┌───────────┴──────────┐
//!          ▼                      ▼
//!     ┌──────────┐          ┌──────────┐
//!     │   CLI    │          │   HTTP   │
//!     │  (crag)  │          │  (axum)  │
//!     └──────────┘          └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! crag --config crag.toml corpus
//! crag --config crag.toml query "how do I close a ticket?"
//! crag --config crag.toml serve
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration, env overrides, corpus resolution |
//! | [`models`] | Core data types |
//! | [`error`] | Error taxonomy |
//! | [`extract`] | Per-format text extraction and sectioning |
//! | [`chunk`] | Sliding-window chunking |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`store`] | Per-document index cache |
//! | [`router`] | Candidate selection |
//! | [`search`] | Query scoring and ranking |
//! | [`answer`] | Extractive answer composition |
//! | [`service`] | Request validation and response assembly |
//! | [`server`] | HTTP server |

pub mod answer;
pub mod chunk;
pub mod config;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod models;
pub mod router;
pub mod search;
pub mod server;
pub mod service;
pub mod store;
