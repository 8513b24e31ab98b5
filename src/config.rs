//! Config module: options for evaluating filters against a search backend.

use crate::backend::{ItemType, SortBy};
use crate::CardFilterError;
use serde::{Serialize, Deserialize};

pub const DEFAULT_MAX_RESULTS: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluatorConfig {
    /// Upper bound on hits fetched per backend search.
    pub max_results: usize,
    pub sort: SortBy,
    pub target_types: Vec<ItemType>,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            max_results: DEFAULT_MAX_RESULTS,
            sort: SortBy::NameAscending,
            target_types: vec![ItemType::Contact],
        }
    }
}

impl EvaluatorConfig {
    pub fn validate(&self) -> Result<(), CardFilterError> {
        if self.max_results == 0 {
            return Err(CardFilterError::Config("max_results must be greater than zero".to_string()));
        }
        if self.target_types.is_empty() {
            return Err(CardFilterError::Config("target_types must not be empty".to_string()));
        }
        Ok(())
    }
}
