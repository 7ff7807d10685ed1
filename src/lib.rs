//! Goal-conditioned session handoff engine.
//!
//! Given the current branch of a coding-agent session (a tree of user
//! messages, assistant messages with tool calls, tool results, and prior
//! summarizations) and a short goal for a follow-up session, this crate
//! builds a compact handoff prompt: it indexes the branch into turns,
//! selects the turns worth carrying forward under a token budget, extracts
//! operational highlights and file lists, and runs a two-pass LLM pipeline
//! (extract facts, then compose the prompt) with cancellation and retry.
//!
//! The terminal UI, session persistence writer, and chat-completion
//! transport stay outside: the engine consumes them through the narrow
//! capability traits in [`session`], [`controller`] and [`llm`].

#![forbid(unsafe_code)]

pub mod anchors;
pub mod bundle;
pub mod cancel;
pub mod config;
pub mod controller;
pub mod error;
pub mod goal;
pub mod heuristics;
pub mod indexer;
pub mod llm;
pub mod model;
pub mod operational;
pub mod redact;
pub mod session;
pub mod tokens;

pub use error::{Error, Result};
