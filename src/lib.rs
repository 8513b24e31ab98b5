//! Cardfilter: a CardDAV address-book filter compiler and evaluator.
//!
//! A CardDAV `filter` document is parsed into a predicate tree, property names are
//! mapped onto contact attribute keys, text-matches are compiled into mailbox search
//! queries, and the hits are turned into address objects. Predicates the search
//! backend cannot express (is-not-defined, parameter tests) are evaluated in memory.
//!
//! # Architecture
//! - Attribute mapping table (protocol property -> contact attribute keys)
//! - Filter parsing (XML -> predicate tree)
//! - Query compilation (text-match -> backend search query)
//! - Evaluation against a `Mailbox` backend, plus single-record matching

mod types;
mod mapping;
mod expr;
mod query;
mod compiler;
mod backend;
mod context;
mod config;
mod evaluator;
mod filter;

pub use types::*;
pub use mapping::*;
pub use expr::*;
pub use query::*;
pub use compiler::*;
pub use backend::*;
pub use context::*;
pub use config::*;
pub use evaluator::*;
pub use filter::*;

use thiserror::Error;

/// Unified error type for Cardfilter operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CardFilterError {
    #[error("Malformed filter document: {0}")]
    Xml(#[from] roxmltree::Error),
    #[error("No CardDAV filter element in document")]
    MissingFilter,
    #[error("Invalid configuration: {0}")]
    Config(String),
}
