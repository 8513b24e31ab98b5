//! Query module: the structured form of a compiled backend search query.
//!
//! A SearchQuery is an OR over `#key:pattern` terms, optionally negated as a whole.
//! Its Display impl renders the text the mailbox search engine consumes.

use std::fmt;
use serde::{Serialize, Deserialize};

/// One `#key:pattern` field term.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryTerm {
    pub key: String,
    pub pattern: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchQuery {
    pub negated: bool,
    pub terms: Vec<QueryTerm>,
}

impl SearchQuery {
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.terms.iter().map(|t| t.key.as_str())
    }

    /// The same query with the negation flipped.
    pub fn complement(&self) -> SearchQuery {
        SearchQuery { negated: !self.negated, terms: self.terms.clone() }
    }
}

impl fmt::Display for QueryTerm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}:", self.key)?;
        if needs_quoting(&self.pattern) {
            f.write_str("\"")?;
            for c in self.pattern.chars() {
                if c == '"' || c == '\\' {
                    f.write_str("\\")?;
                }
                write!(f, "{}", c)?;
            }
            f.write_str("\"")
        } else {
            f.write_str(&self.pattern)
        }
    }
}

impl fmt::Display for SearchQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.negated {
            f.write_str("!")?;
        }
        f.write_str("(")?;
        for (i, term) in self.terms.iter().enumerate() {
            if i > 0 {
                f.write_str(" OR ")?;
            }
            write!(f, "{}", term)?;
        }
        f.write_str(")")
    }
}

fn needs_quoting(pattern: &str) -> bool {
    pattern.is_empty() || pattern.chars().any(|c| c.is_whitespace() || matches!(c, '(' | ')' | '"' | '\\'))
}
