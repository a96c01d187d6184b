//! Core domain + application logic for the Claude relay bot.
//!
//! This crate is intentionally framework-agnostic. Telegram and the Anthropic
//! API live behind ports (traits) implemented in adapter crates; the state
//! store, chunker and delivery policy live here.

pub mod chunker;
pub mod config;
pub mod delivery;
pub mod domain;
pub mod errors;
pub mod formatting;
pub mod logging;
pub mod messaging;
pub mod model;
pub mod store;

pub use errors::{Error, Result};
