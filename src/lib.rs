//! # defra-tools
//!
//! Client utilities around a DefraDB node.
//!
//! Three programs share this library:
//!
//! - **`defra-kv`** runs a single GraphQL request against a node that holds
//!   a fixed `KV` collection and prints the result as JSON.
//! - **`defra-relay`** is an HTTP relay: `/defradb` passes requests through
//!   to a node, `/mongodb` speaks a small JSON command protocol against a
//!   MongoDB server, and everything else is served from a static directory
//!   with single-page-app fallback.
//! - **`defra-rag`** is a retrieval-augmented generation demo that loads a
//!   JSONL knowledge base into an in-memory node and compares LLM answers
//!   with and without retrieved context.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌─────────────┐   ┌───────────────┐
//! │ defra-kv │──▶│ node/schema │──▶│ DefraDB (HTTP)│
//! └──────────┘   └─────────────┘   └───────▲───────┘
//!                                          │
//! ┌─────────────┐  /defradb ───────────────┘
//! │ defra-relay │  /mongodb ──▶ DocumentStore ──▶ MongoDB
//! └─────────────┘  GET *    ──▶ static files
//!
//! ┌──────────┐   ┌─────┐   ┌──────────────────────┐
//! │ defra-rag│──▶│ rag │──▶│ node + LLM endpoints │
//! └──────────┘   └─────┘   └──────────────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`logging`] | `tracing` subscriber setup |
//! | [`defra`] | GraphQL client and the [`defra::Database`] seam |
//! | [`collections`] | Document and collection REST calls |
//! | [`backup`] | Backup export and import |
//! | [`p2p`] | Peer, replicator and sync calls |
//! | [`node`] | Spawning or attaching to a node |
//! | [`schema`] | Idempotent collection schemas |
//! | [`query`] | Single-request runner |
//! | [`docstore`] | Document store abstraction, MongoDB backend |
//! | [`command`] | `/mongodb` command protocol |
//! | [`defra_proxy`] | `/defradb` passthrough |
//! | [`static_files`] | Static serving with SPA fallback |
//! | [`server`] | HTTP relay |
//! | [`llm`] | OpenAI-compatible chat and embeddings |
//! | [`rag`] | RAG pipeline |

pub mod backup;
pub mod collections;
pub mod command;
pub mod config;
pub mod defra;
pub mod defra_proxy;
pub mod docstore;
pub mod llm;
pub mod logging;
pub mod node;
pub mod p2p;
pub mod query;
pub mod rag;
pub mod schema;
pub mod server;
pub mod static_files;
