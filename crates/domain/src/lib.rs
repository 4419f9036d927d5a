//! Shared domain types for the CodeLab backend.
//!
//! Every other crate depends on this one: the common error type, the
//! configuration tree, chat/stream primitives for LLM adapters, the tool
//! contract, agent events, and the notebook data model.

pub mod agent;
pub mod chat;
pub mod config;
pub mod error;
pub mod notebook;
pub mod stream;
pub mod tool;
