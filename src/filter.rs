//! Filter module: wraps a parsed filter and provides the main execution API.
//!
//! This module provides the AddressbookFilter type.

use crate::config::EvaluatorConfig;
use crate::context::{AddressObject, ContactRecord, DavContext, FolderId};
use crate::evaluator::Evaluator;
use crate::expr::{Filter, FilterParser};
use crate::mapping::AttributeMappingTable;
use crate::CardFilterError;
use std::sync::Arc;

/// A parsed filter, ready for evaluation.
#[derive(Debug, Clone)]
pub struct AddressbookFilter {
    filter: Filter,
    evaluator: Evaluator,
}

impl AddressbookFilter {
    /// Create a filter from an already parsed predicate tree.
    pub fn new(filter: Filter, table: Arc<AttributeMappingTable>, config: EvaluatorConfig) -> Result<Self, CardFilterError> {
        config.validate()?;
        Ok(Self { filter, evaluator: Evaluator::new(table, config) })
    }

    /// Parse a filter document and prepare it for evaluation.
    pub fn parse(xml: &str, table: Arc<AttributeMappingTable>, config: EvaluatorConfig) -> Result<Self, CardFilterError> {
        let filter = FilterParser::parse(xml, &table)?;
        Self::new(filter, table, config)
    }

    /// Address objects in `folder` matching the filter. Never fails; backend
    /// problems surface as missing results and log entries.
    pub fn evaluate(&self, ctx: &DavContext, folder: FolderId) -> Vec<AddressObject> {
        self.evaluator.evaluate(&self.filter, ctx, folder)
    }

    /// Match the filter against a record already in hand.
    pub fn matches<R: ContactRecord + ?Sized>(&self, record: &R) -> bool {
        self.evaluator.matches(&self.filter, record)
    }

    pub fn filter(&self) -> &Filter {
        &self.filter
    }

    pub fn evaluator(&self) -> &Evaluator {
        &self.evaluator
    }
}
