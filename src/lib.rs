//! # docqa
//!
//! Question answering over a small set of uploaded documents.
//!
//! Documents (PDF, plain text, CSV) are stored by content hash, normalized,
//! and split into overlapping chunks. Questions are answered by refining the
//! question with a language model, retrieving passages with hybrid search
//! (BM25 keyword + dense vector, merged by weighted reciprocal rank fusion),
//! and asking the model for an answer grounded in those passages. When the
//! documents do not contain the answer, a general-knowledge answer is
//! appended and clearly labelled.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌───────────────┐   ┌────────────────────┐
//! │ uploads  │──▶│ DocumentStore │──▶│ Lexical + Vector   │
//! │ pdf/txt/ │   │ hash+parse+   │   │ indexes (snapshot- │
//! │ csv      │   │ chunk         │   │ keyed cache)       │
//! └──────────┘   └───────────────┘   └─────────┬──────────┘
//!                                              │
//!                   ┌──────────────────────────┤
//!                   ▼                          ▼
//!             ┌──────────┐  refine  ┌─────────────────┐
//!             │ Session  │─────────▶│ HybridRetriever │
//!             │  (ask)   │◀─────────│  (RRF merge)    │
//!             └────┬─────┘ passages └─────────────────┘
//!                  ▼
//!          answer + memory + feedback
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! docqa init
//! docqa ingest ./papers ./notes.txt
//! docqa ask "What color is the sky?"
//! docqa search "sky" --k 5
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Typed pipeline errors |
//! | [`models`] | Documents, chunks, snapshots |
//! | [`normalize`] | Control-character stripping |
//! | [`extract`] | Parser registry (pdf, txt, csv) |
//! | [`chunk`] | Boundary-aware text chunking |
//! | [`store`] | Content-addressed document store |
//! | [`lexical`] | BM25 keyword index |
//! | [`vector`] | Vector index and its persistent cache |
//! | [`retriever`] | Hybrid retrieval with rank fusion |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`llm`] | Language model abstraction |
//! | [`refine`] | Question refinement |
//! | [`answer`] | Grounded answer generation |
//! | [`memory`] | Conversation memory |
//! | [`feedback`] | Answer feedback log |
//! | [`session`] | The session context object |
//! | [`commands`] | CLI command handlers |

pub mod answer;
pub mod chunk;
pub mod commands;
pub mod config;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod feedback;
pub mod lexical;
pub mod llm;
pub mod memory;
pub mod models;
pub mod normalize;
pub mod refine;
pub mod retriever;
pub mod session;
pub mod storage;
pub mod store;
pub mod vector;

pub use error::{Error, Result};
pub use session::{IngestError, Providers, Session};
