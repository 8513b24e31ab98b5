//! Backend module: the mailbox search interface the evaluator runs compiled queries against.
//!
//! This module provides the Mailbox and QueryResults traits, the SearchSession guard that
//! releases results on every exit path, and InMemoryMailbox, a reference backend.

use crate::context::{Contact, ContactRecord, FolderId, OperationContext};
use crate::query::SearchQuery;
use serde::{Serialize, Deserialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    #[error("Target mailbox unavailable: {0}")]
    MailboxUnavailable(String),
    #[error("Search failed: {0}")]
    Search(String),
    #[error("Failed to release search results: {0}")]
    Release(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[non_exhaustive]
pub enum SortBy {
    #[default]
    NameAscending,
    NameDescending,
    Unsorted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[non_exhaustive]
pub enum ItemType {
    #[default]
    Contact,
    Message,
    Appointment,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SearchHit {
    Contact(Contact),
    Other { id: u32, item_type: ItemType },
}

/// A cursor over search hits. `done` must be called once the caller is finished.
pub trait QueryResults {
    fn next_hit(&mut self) -> Result<Option<SearchHit>, BackendError>;
    fn done(&mut self) -> Result<(), BackendError>;
}

pub trait Mailbox: Send + Sync {
    fn search(
        &self,
        op: &OperationContext,
        query: &SearchQuery,
        types: &[ItemType],
        sort: SortBy,
        limit: usize,
    ) -> Result<Box<dyn QueryResults + '_>, BackendError>;

    /// One page of the contacts stored in `folder`: at most `limit` entries, in
    /// `sort` order, starting at `offset`.
    fn contacts_in(
        &self,
        op: &OperationContext,
        folder: FolderId,
        sort: SortBy,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<Contact>, BackendError>;
}

/// Owns an open result cursor and releases it when dropped. Release failures are
/// logged and swallowed.
pub struct SearchSession<'a> {
    results: Box<dyn QueryResults + 'a>,
}

impl<'a> SearchSession<'a> {
    pub fn new(results: Box<dyn QueryResults + 'a>) -> Self {
        Self { results }
    }

    pub fn next_hit(&mut self) -> Result<Option<SearchHit>, BackendError> {
        self.results.next_hit()
    }
}

impl Drop for SearchSession<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.results.done() {
            debug!(error = %e, "can't release search results");
        }
    }
}

/// A mailbox held entirely in memory. Search terms are matched as case-insensitive
/// substrings of the named contact attribute.
#[derive(Debug, Default)]
pub struct InMemoryMailbox {
    contacts: Vec<Contact>,
    open_sessions: Arc<AtomicUsize>,
}

impl InMemoryMailbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_contacts(contacts: impl IntoIterator<Item = Contact>) -> Self {
        Self { contacts: contacts.into_iter().collect(), ..Self::default() }
    }

    pub fn add(&mut self, contact: Contact) {
        self.contacts.push(contact);
    }

    /// Number of search sessions opened and not yet released.
    pub fn open_sessions(&self) -> usize {
        self.open_sessions.load(Ordering::SeqCst)
    }

    fn term_matches(contact: &Contact, query: &SearchQuery) -> bool {
        let hit = query.terms.iter().any(|term| {
            contact
                .get(&term.key)
                .map(|v| v.to_lowercase().contains(&term.pattern.to_lowercase()))
                .unwrap_or(false)
        });
        hit != query.negated
    }
}

impl Mailbox for InMemoryMailbox {
    fn search(
        &self,
        _op: &OperationContext,
        query: &SearchQuery,
        types: &[ItemType],
        sort: SortBy,
        limit: usize,
    ) -> Result<Box<dyn QueryResults + '_>, BackendError> {
        let mut hits: Vec<&Contact> = if types.contains(&ItemType::Contact) {
            self.contacts.iter().filter(|c| Self::term_matches(c, query)).collect()
        } else {
            Vec::new()
        };
        sort_contacts(&mut hits, sort);
        hits.truncate(limit);
        self.open_sessions.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemoryResults {
            hits: hits.into_iter().cloned().map(SearchHit::Contact).collect::<Vec<_>>().into_iter(),
            open_sessions: Arc::clone(&self.open_sessions),
            released: false,
        }))
    }

    fn contacts_in(
        &self,
        _op: &OperationContext,
        folder: FolderId,
        sort: SortBy,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<Contact>, BackendError> {
        let mut contacts: Vec<&Contact> = self.contacts.iter().filter(|c| c.folder == folder).collect();
        sort_contacts(&mut contacts, sort);
        Ok(contacts.into_iter().skip(offset).take(limit).cloned().collect())
    }
}

fn sort_contacts(contacts: &mut [&Contact], sort: SortBy) {
    match sort {
        SortBy::NameAscending => contacts.sort_by(|a, b| a.sort_name().cmp(&b.sort_name()).then(a.id.cmp(&b.id))),
        SortBy::NameDescending => contacts.sort_by(|a, b| b.sort_name().cmp(&a.sort_name()).then(b.id.cmp(&a.id))),
        SortBy::Unsorted => {}
    }
}

struct MemoryResults {
    hits: std::vec::IntoIter<SearchHit>,
    open_sessions: Arc<AtomicUsize>,
    released: bool,
}

impl QueryResults for MemoryResults {
    fn next_hit(&mut self) -> Result<Option<SearchHit>, BackendError> {
        if self.released {
            return Err(BackendError::Search("results already released".to_string()));
        }
        Ok(self.hits.next())
    }

    fn done(&mut self) -> Result<(), BackendError> {
        if !self.released {
            self.released = true;
            self.open_sessions.fetch_sub(1, Ordering::SeqCst);
        }
        Ok(())
    }
}
