//! Compiler module: compiles text-match predicates into backend search queries.
//!
//! The attribute mapping of the enclosing property decides which contact keys are
//! searched. Keys are taken from every sub-type of the property; param-filter
//! sub-types do not narrow the query.

use crate::expr::TextMatch;
use crate::mapping::AttributeMappingTable;
use crate::query::{QueryTerm, SearchQuery};
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct QueryCompiler {
    table: Arc<AttributeMappingTable>,
}

impl QueryCompiler {
    pub fn new(table: Arc<AttributeMappingTable>) -> Self {
        Self { table }
    }

    pub fn table(&self) -> &AttributeMappingTable {
        &self.table
    }

    /// Compiles `text_match` as a predicate on `enclosing`. Returns `None` when the
    /// property has no mapping, in which case the predicate can never match.
    pub fn compile(&self, text_match: &TextMatch, enclosing: &str) -> Option<SearchQuery> {
        let keys = self.table.attributes_for(enclosing);
        if keys.is_empty() {
            return None;
        }
        let terms = keys
            .into_iter()
            .map(|key| QueryTerm { key: key.to_string(), pattern: text_match.pattern.clone() })
            .collect();
        Some(SearchQuery { negated: text_match.negate, terms })
    }

    /// Compiles against the node the text-match was parsed under.
    pub fn compile_text_match(&self, text_match: &TextMatch) -> Option<SearchQuery> {
        self.compile(text_match, text_match.enclosing_name())
    }
}
