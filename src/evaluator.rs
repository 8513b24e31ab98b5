//! Evaluator module: runs a predicate tree against a mailbox, or against a single record.
//!
//! Search-driven evaluation of a prop-filter follows a fixed precedence:
//! is-not-defined, then text-match, then param-filters. Backend failures never
//! escape; they are logged and the affected branch yields no results.

use crate::backend::{BackendError, Mailbox, SearchHit, SearchSession};
use crate::compiler::QueryCompiler;
use crate::config::EvaluatorConfig;
use crate::context::{AddressObject, ContactRecord, DavContext, FolderId};
use crate::expr::{Filter, FilterTest, ParamFilter, PropFilter, TextMatch};
use crate::mapping::AttributeMappingTable;
use crate::query::SearchQuery;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct Evaluator {
    compiler: QueryCompiler,
    config: EvaluatorConfig,
}

impl Evaluator {
    pub fn new(table: Arc<AttributeMappingTable>, config: EvaluatorConfig) -> Self {
        Self { compiler: QueryCompiler::new(table), config }
    }

    pub fn table(&self) -> &AttributeMappingTable {
        self.compiler.table()
    }

    pub fn config(&self) -> &EvaluatorConfig {
        &self.config
    }

    /// Evaluates every prop-filter and combines the result sets per the filter's test.
    pub fn evaluate(&self, filter: &Filter, ctx: &DavContext, folder: FolderId) -> Vec<AddressObject> {
        let sets = filter
            .prop_filters
            .iter()
            .map(|pf| self.evaluate_prop_filter(pf, ctx, folder))
            .collect();
        combine(sets, filter.test)
    }

    pub fn evaluate_prop_filter(&self, pf: &PropFilter, ctx: &DavContext, folder: FolderId) -> Vec<AddressObject> {
        if pf.is_not_defined {
            self.missing_property(&pf.name, ctx, folder)
        } else if let Some(text_match) = &pf.text_match {
            self.search(text_match, ctx, folder)
        } else if !pf.param_filters.is_empty() {
            let sets = pf.param_filters.iter().map(|p| self.evaluate_param_filter(p, ctx, folder)).collect();
            combine(sets, FilterTest::AnyOf)
        } else {
            Vec::new()
        }
    }

    /// A param-filter's text-match is compiled against the parameter's own name.
    pub fn evaluate_param_filter(&self, pf: &ParamFilter, ctx: &DavContext, folder: FolderId) -> Vec<AddressObject> {
        match &pf.text_match {
            Some(text_match) => self.search(text_match, ctx, folder),
            None => Vec::new(),
        }
    }

    /// Compiles and runs one text-match against the target mailbox. The backend
    /// searches the whole mailbox; hits outside `folder` are dropped here.
    pub fn search(&self, text_match: &TextMatch, ctx: &DavContext, folder: FolderId) -> Vec<AddressObject> {
        let Some(query) = self.compiler.compile_text_match(text_match) else {
            debug!(property = text_match.enclosing_name(), "no attribute mapping, filter never matches");
            return Vec::new();
        };
        let Some(mbox) = ctx.target_mailbox() else {
            debug!(user = ctx.user(), "can't get target mailbox");
            return Vec::new();
        };
        match self.run_search(mbox, ctx, &query, folder) {
            Ok(result) => {
                debug!(query = %query, folder, hits = result.len(), "search filter");
                result
            }
            Err(e) => {
                warn!(error = %e, query = %query, "can't search target mailbox");
                Vec::new()
            }
        }
    }

    fn run_search(
        &self,
        mbox: &dyn Mailbox,
        ctx: &DavContext,
        query: &SearchQuery,
        folder: FolderId,
    ) -> Result<Vec<AddressObject>, BackendError> {
        let results = mbox.search(
            ctx.operation_context(),
            query,
            &self.config.target_types,
            self.config.sort,
            self.config.max_results,
        )?;
        let mut session = SearchSession::new(results);
        let mut out = Vec::new();
        while let Some(hit) = session.next_hit()? {
            match hit {
                SearchHit::Contact(contact) if contact.folder == folder => out.push(AddressObject::new(contact)),
                _ => {}
            }
        }
        Ok(out)
    }

    /// Contacts in `folder` with no value under any key mapped for `property`, in
    /// the configured sort order and at most `max_results` of them.
    fn missing_property(&self, property: &str, ctx: &DavContext, folder: FolderId) -> Vec<AddressObject> {
        let Some(mbox) = ctx.target_mailbox() else {
            debug!(user = ctx.user(), "can't get target mailbox");
            return Vec::new();
        };
        match self.list_missing(mbox, ctx, property, folder) {
            Ok(result) => result,
            Err(e) => {
                warn!(error = %e, folder, "can't list address book contacts");
                Vec::new()
            }
        }
    }

    /// Pages through the folder, each backend call bounded by `max_results`.
    fn list_missing(
        &self,
        mbox: &dyn Mailbox,
        ctx: &DavContext,
        property: &str,
        folder: FolderId,
    ) -> Result<Vec<AddressObject>, BackendError> {
        let limit = self.config.max_results;
        let mut out = Vec::new();
        let mut offset = 0;
        loop {
            let page = mbox.contacts_in(ctx.operation_context(), folder, self.config.sort, offset, limit)?;
            let fetched = page.len();
            for contact in page {
                if out.len() == limit {
                    return Ok(out);
                }
                if self.property_values(&contact, property).is_empty() {
                    out.push(AddressObject::new(contact));
                }
            }
            if fetched < limit || out.len() == limit {
                return Ok(out);
            }
            offset += fetched;
        }
    }

    /// Values a record holds for a protocol property, across all mapped keys.
    /// Unmapped properties have no values.
    pub fn property_values<'r, R: ContactRecord + ?Sized>(&self, record: &'r R, property: &str) -> Vec<&'r str> {
        self.table()
            .attributes_for(property)
            .into_iter()
            .filter_map(|key| record.get(key))
            .collect()
    }

    /// Matches a whole filter against a record already in hand.
    pub fn matches<R: ContactRecord + ?Sized>(&self, filter: &Filter, record: &R) -> bool {
        if filter.prop_filters.is_empty() {
            return false;
        }
        match filter.test {
            FilterTest::AnyOf => filter.prop_filters.iter().any(|pf| self.matches_prop_filter(pf, record)),
            FilterTest::AllOf => filter.prop_filters.iter().all(|pf| self.matches_prop_filter(pf, record)),
        }
    }

    /// An absent property matches exactly when is-not-defined is set. A present one
    /// matches when every param-filter and the text-match hold across its values,
    /// with negation applied after OR-ing over the values as the compiled query does.
    pub fn matches_prop_filter<R: ContactRecord + ?Sized>(&self, pf: &PropFilter, record: &R) -> bool {
        let values = self.property_values(record, &pf.name);
        if values.is_empty() {
            return pf.is_not_defined;
        }
        if pf.is_not_defined {
            return false;
        }
        pf.param_filters.iter().all(|p| self.matches_param_filter(p, &values))
            && pf.text_match.as_ref().map_or(true, |t| t.matches_any(&values))
    }

    /// Records carry no parameter data, so the test runs against the property values.
    pub fn matches_param_filter(&self, pf: &ParamFilter, values: &[&str]) -> bool {
        pf.text_match.as_ref().map_or(true, |t| t.matches_any(values))
    }
}

/// Union (anyof) or intersection (allof) by contact id, in first-seen order.
fn combine(sets: Vec<Vec<AddressObject>>, test: FilterTest) -> Vec<AddressObject> {
    match test {
        FilterTest::AnyOf => {
            let mut seen = HashSet::new();
            sets.into_iter().flatten().filter(|obj| seen.insert(obj.id())).collect()
        }
        FilterTest::AllOf => {
            let mut iter = sets.into_iter();
            let Some(first) = iter.next() else {
                return Vec::new();
            };
            let rest: Vec<HashSet<u32>> = iter.map(|set| set.iter().map(AddressObject::id).collect()).collect();
            let mut seen = HashSet::new();
            first
                .into_iter()
                .filter(|obj| rest.iter().all(|ids| ids.contains(&obj.id())))
                .filter(|obj| seen.insert(obj.id()))
                .collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{InMemoryMailbox, ItemType, QueryResults, SortBy};
    use crate::context::{Contact, OperationContext};
    use crate::types::MatchType;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn evaluator() -> Evaluator {
        Evaluator::new(Arc::new(AttributeMappingTable::carddav_defaults()), EvaluatorConfig::default())
    }

    fn mailbox() -> InMemoryMailbox {
        InMemoryMailbox::with_contacts(vec![
            Contact::new(1, 7).with("fullName", "Alice").with("email", "alice@example.com").with("nickname", "Al"),
            Contact::new(2, 7).with("fullName", "Bob").with("email2", "bob@example.com").with("homePhone", "555-1234"),
            Contact::new(3, 7).with("fullName", "Carol").with("workPhone2", "555-9999"),
            Contact::new(4, 8).with("fullName", "Dave"),
        ])
    }

    fn ctx(mbox: InMemoryMailbox) -> DavContext {
        DavContext::new("user@example.com", Some(Arc::new(mbox)))
    }

    fn prop(name: &str, text_match: Option<TextMatch>) -> PropFilter {
        PropFilter { name: name.into(), text_match, ..Default::default() }
    }

    fn ids(objs: &[AddressObject]) -> Vec<u32> {
        objs.iter().map(AddressObject::id).collect()
    }

    #[test]
    fn test_text_match_search() {
        let pf = prop("EMAIL", Some(TextMatch::new("EMAIL", "example", false)));
        assert_eq!(ids(&evaluator().evaluate_prop_filter(&pf, &ctx(mailbox()), 7)), vec![1, 2]);
    }

    #[test]
    fn test_negated_search() {
        let pf = prop("EMAIL", Some(TextMatch::new("EMAIL", "alice", true)));
        assert_eq!(ids(&evaluator().evaluate_prop_filter(&pf, &ctx(mailbox()), 7)), vec![2, 3]);
    }

    #[test]
    fn test_search_scoped_to_folder() {
        let eval = evaluator();
        let ctx = ctx(mailbox());
        let pf = prop("FN", Some(TextMatch::new("FN", "dave", false)));
        assert!(eval.evaluate_prop_filter(&pf, &ctx, 7).is_empty());
        assert_eq!(ids(&eval.evaluate_prop_filter(&pf, &ctx, 8)), vec![4]);
    }

    #[test]
    fn test_tel_searches_every_subtype() {
        let pf = prop("TEL", Some(TextMatch::new("TEL", "555", false)));
        assert_eq!(ids(&evaluator().evaluate_prop_filter(&pf, &ctx(mailbox()), 7)), vec![2, 3]);
    }

    #[test]
    fn test_unmapped_property_yields_nothing() {
        let pf = prop("PHOTO", Some(TextMatch::new("PHOTO", "a", false)));
        assert!(evaluator().evaluate_prop_filter(&pf, &ctx(mailbox()), 7).is_empty());
    }

    #[test]
    fn test_is_not_defined_enumerates_folder() {
        let pf = PropFilter { name: "NICKNAME".into(), is_not_defined: true, ..Default::default() };
        assert_eq!(ids(&evaluator().evaluate_prop_filter(&pf, &ctx(mailbox()), 7)), vec![2, 3]);
    }

    #[test]
    fn test_is_not_defined_takes_precedence() {
        let pf = PropFilter {
            name: "NICKNAME".into(),
            is_not_defined: true,
            text_match: Some(TextMatch::new("NICKNAME", "Al", false)),
            ..Default::default()
        };
        assert_eq!(ids(&evaluator().evaluate_prop_filter(&pf, &ctx(mailbox()), 7)), vec![2, 3]);
    }

    #[test]
    fn test_param_filters_search_under_param_name() {
        let pf = PropFilter {
            name: "TEL".into(),
            param_filters: vec![ParamFilter {
                name: "TYPE".into(),
                text_match: Some(TextMatch::new("TYPE", "home", false)),
                ..Default::default()
            }],
            ..Default::default()
        };
        // TYPE has no attribute mapping
        assert!(evaluator().evaluate_prop_filter(&pf, &ctx(mailbox()), 7).is_empty());
    }

    #[test]
    fn test_empty_prop_filter_yields_nothing() {
        assert!(evaluator().evaluate_prop_filter(&prop("FN", None), &ctx(mailbox()), 7).is_empty());
    }

    #[test]
    fn test_missing_mailbox_yields_nothing() {
        let ctx = DavContext::new("nobody", None);
        let pf = prop("FN", Some(TextMatch::new("FN", "a", false)));
        assert!(evaluator().evaluate_prop_filter(&pf, &ctx, 7).is_empty());
        let pf = PropFilter { name: "FN".into(), is_not_defined: true, ..Default::default() };
        assert!(evaluator().evaluate_prop_filter(&pf, &ctx, 7).is_empty());
    }

    #[test]
    fn test_max_results_bounds_search() {
        let eval = Evaluator::new(
            Arc::new(AttributeMappingTable::carddav_defaults()),
            EvaluatorConfig { max_results: 1, ..Default::default() },
        );
        let pf = prop("FN", Some(TextMatch::new("FN", "a", false)));
        assert_eq!(ids(&eval.evaluate_prop_filter(&pf, &ctx(mailbox()), 7)), vec![1]);
    }

    struct FailingResults {
        released: Arc<AtomicBool>,
    }

    impl QueryResults for FailingResults {
        fn next_hit(&mut self) -> Result<Option<SearchHit>, BackendError> {
            Err(BackendError::Search("index corrupted".into()))
        }
        fn done(&mut self) -> Result<(), BackendError> {
            self.released.store(true, Ordering::SeqCst);
            Err(BackendError::Release("already closed".into()))
        }
    }

    struct FailingMailbox {
        released: Arc<AtomicBool>,
    }

    impl Mailbox for FailingMailbox {
        fn search(
            &self,
            _op: &OperationContext,
            _query: &SearchQuery,
            _types: &[ItemType],
            _sort: SortBy,
            _limit: usize,
        ) -> Result<Box<dyn QueryResults + '_>, BackendError> {
            Ok(Box::new(FailingResults { released: Arc::clone(&self.released) }))
        }
        fn contacts_in(
            &self,
            _op: &OperationContext,
            _folder: FolderId,
            _sort: SortBy,
            _offset: usize,
            _limit: usize,
        ) -> Result<Vec<Contact>, BackendError> {
            Err(BackendError::MailboxUnavailable("maintenance".into()))
        }
    }

    /// Fails every search touching `failing_key`; everything else goes to `inner`.
    struct PartiallyFailingMailbox {
        inner: InMemoryMailbox,
        failing_key: &'static str,
    }

    impl Mailbox for PartiallyFailingMailbox {
        fn search(
            &self,
            op: &OperationContext,
            query: &SearchQuery,
            types: &[ItemType],
            sort: SortBy,
            limit: usize,
        ) -> Result<Box<dyn QueryResults + '_>, BackendError> {
            if query.keys().any(|k| k == self.failing_key) {
                return Err(BackendError::Search(format!("index for {} offline", self.failing_key)));
            }
            self.inner.search(op, query, types, sort, limit)
        }
        fn contacts_in(
            &self,
            op: &OperationContext,
            folder: FolderId,
            sort: SortBy,
            offset: usize,
            limit: usize,
        ) -> Result<Vec<Contact>, BackendError> {
            self.inner.contacts_in(op, folder, sort, offset, limit)
        }
    }

    #[test]
    fn test_failing_branch_does_not_abort_siblings() {
        let ctx = DavContext::new(
            "u",
            Some(Arc::new(PartiallyFailingMailbox { inner: mailbox(), failing_key: "nickname" })),
        );
        let filter = Filter {
            test: FilterTest::AnyOf,
            prop_filters: vec![
                prop("NICKNAME", Some(TextMatch::new("NICKNAME", "Al", false))),
                prop("EMAIL", Some(TextMatch::new("EMAIL", "example", false))),
            ],
        };
        assert_eq!(ids(&evaluator().evaluate(&filter, &ctx, 7)), vec![1, 2]);
    }

    #[test]
    fn test_backend_failure_degrades_and_releases() {
        let released = Arc::new(AtomicBool::new(false));
        let ctx = DavContext::new("u", Some(Arc::new(FailingMailbox { released: Arc::clone(&released) })));
        let pf = prop("FN", Some(TextMatch::new("FN", "a", false)));
        assert!(evaluator().evaluate_prop_filter(&pf, &ctx, 7).is_empty());
        assert!(released.load(Ordering::SeqCst));
        let pf = PropFilter { name: "FN".into(), is_not_defined: true, ..Default::default() };
        assert!(evaluator().evaluate_prop_filter(&pf, &ctx, 7).is_empty());
    }

    #[test]
    fn test_sessions_released_after_evaluation() {
        let mbox = Arc::new(mailbox());
        let ctx = DavContext::new("u", Some(Arc::clone(&mbox) as Arc<dyn Mailbox>));
        let pf = prop("EMAIL", Some(TextMatch::new("EMAIL", "example", false)));
        for _ in 0..3 {
            evaluator().evaluate_prop_filter(&pf, &ctx, 7);
        }
        assert_eq!(mbox.open_sessions(), 0);
    }

    fn nameless_mailbox() -> InMemoryMailbox {
        InMemoryMailbox::with_contacts(vec![
            Contact::new(1, 7).with("fullName", "Eve").with("nickname", "E"),
            Contact::new(2, 7).with("fullName", "Amy").with("nickname", "A"),
            Contact::new(3, 7).with("fullName", "Dan"),
            Contact::new(4, 7).with("fullName", "Bea").with("nickname", "B"),
            Contact::new(5, 7).with("fullName", "Cal"),
            Contact::new(6, 7).with("fullName", "Fay"),
        ])
    }

    fn bounded(max_results: usize) -> Evaluator {
        Evaluator::new(
            Arc::new(AttributeMappingTable::carddav_defaults()),
            EvaluatorConfig { max_results, ..Default::default() },
        )
    }

    #[test]
    fn test_is_not_defined_sorted_by_name() {
        let pf = PropFilter { name: "NICKNAME".into(), is_not_defined: true, ..Default::default() };
        assert_eq!(ids(&evaluator().evaluate_prop_filter(&pf, &ctx(nameless_mailbox()), 7)), vec![5, 3, 6]);
    }

    #[test]
    fn test_is_not_defined_bounded_by_max_results() {
        let pf = PropFilter { name: "NICKNAME".into(), is_not_defined: true, ..Default::default() };
        assert_eq!(ids(&bounded(2).evaluate_prop_filter(&pf, &ctx(nameless_mailbox()), 7)), vec![5, 3]);
        // The first page (Amy, Bea) holds no matches; later pages are still read
        assert_eq!(ids(&bounded(1).evaluate_prop_filter(&pf, &ctx(nameless_mailbox()), 7)), vec![5]);
        assert_eq!(ids(&bounded(3).evaluate_prop_filter(&pf, &ctx(nameless_mailbox()), 7)), vec![5, 3, 6]);
    }

    #[test]
    fn test_record_negation_agrees_with_search() {
        let record = Contact::new(1, 7).with("email", "alice@x.org").with("email2", "bob@y.org");
        let filter = Filter {
            test: FilterTest::AnyOf,
            prop_filters: vec![prop("EMAIL", Some(TextMatch::new("EMAIL", "alice", true)))],
        };
        let eval = evaluator();
        assert!(eval.evaluate(&filter, &ctx(InMemoryMailbox::with_contacts(vec![record.clone()])), 7).is_empty());
        assert!(!eval.matches(&filter, &record));
        let other = Contact::new(2, 7).with("email", "carol@x.org").with("email2", "bob@y.org");
        assert!(eval.matches(&filter, &other));
    }

    #[test]
    fn test_evaluate_anyof_and_allof() {
        let eval = evaluator();
        let ctx = ctx(mailbox());
        let mut filter = Filter {
            test: FilterTest::AnyOf,
            prop_filters: vec![
                prop("EMAIL", Some(TextMatch::new("EMAIL", "example", false))),
                prop("FN", Some(TextMatch::new("FN", "o", false))),
            ],
        };
        assert_eq!(ids(&eval.evaluate(&filter, &ctx, 7)), vec![1, 2, 3]);
        filter.test = FilterTest::AllOf;
        assert_eq!(ids(&eval.evaluate(&filter, &ctx, 7)), vec![2]);
        assert!(eval.evaluate(&Filter::default(), &ctx, 7).is_empty());
    }

    #[test]
    fn test_record_is_not_defined() {
        let eval = evaluator();
        let pf = PropFilter { name: "NICKNAME".into(), is_not_defined: true, ..Default::default() };
        assert!(eval.matches_prop_filter(&pf, &Contact::new(1, 7).with("fullName", "Bob")));
        assert!(!eval.matches_prop_filter(&pf, &Contact::new(1, 7).with("nickname", "Bobby")));
    }

    #[test]
    fn test_record_absent_property_without_is_not_defined() {
        let pf = prop("NICKNAME", Some(TextMatch::new("NICKNAME", "x", true)));
        assert!(!evaluator().matches_prop_filter(&pf, &Contact::new(1, 7)));
    }

    #[test]
    fn test_record_text_and_param_filters_are_anded() {
        let eval = evaluator();
        let record = Contact::new(1, 7).with("homePhone", "555-1234").with("workPhone", "777-0000");
        let mut pf = prop("TEL", Some(TextMatch::new("TEL", "555", false)));
        assert!(eval.matches_prop_filter(&pf, &record));
        pf.param_filters.push(ParamFilter {
            name: "TYPE".into(),
            text_match: Some(TextMatch::new("TYPE", "1234", false)),
            ..Default::default()
        });
        assert!(eval.matches_prop_filter(&pf, &record));
        pf.param_filters.push(ParamFilter {
            name: "TYPE".into(),
            text_match: Some(TextMatch::new("TYPE", "home", false)),
            ..Default::default()
        });
        assert!(!eval.matches_prop_filter(&pf, &record));
    }

    #[test]
    fn test_record_any_value_may_match() {
        let eval = evaluator();
        let record = Contact::new(1, 7).with("email", "a@x.org").with("email3", "alice@example.com");
        let mut tm = TextMatch::new("EMAIL", "alice@", false);
        tm.match_type = MatchType::StartsWith;
        assert!(eval.matches_prop_filter(&prop("EMAIL", Some(tm)), &record));
    }

    #[test]
    fn test_param_filter_without_text_match_matches() {
        let pf = ParamFilter { name: "TYPE".into(), is_not_defined: true, text_match: None };
        assert!(evaluator().matches_param_filter(&pf, &["anything"]));
    }

    #[test]
    fn test_record_root_filter() {
        let eval = evaluator();
        let record = Contact::new(1, 7).with("fullName", "Alice").with("nickname", "Al");
        let mut filter = Filter {
            test: FilterTest::AnyOf,
            prop_filters: vec![
                prop("FN", Some(TextMatch::new("FN", "alice", false))),
                PropFilter { name: "NICKNAME".into(), is_not_defined: true, ..Default::default() },
            ],
        };
        assert!(eval.matches(&filter, &record));
        filter.test = FilterTest::AllOf;
        assert!(!eval.matches(&filter, &record));
        assert!(!eval.matches(&Filter::default(), &record));
    }

    #[test]
    fn test_combine_dedupes() {
        let a = AddressObject::new(Contact::new(1, 7));
        let b = AddressObject::new(Contact::new(2, 7));
        let sets = vec![vec![a.clone(), b.clone()], vec![b.clone(), a.clone()]];
        assert_eq!(ids(&combine(sets.clone(), FilterTest::AnyOf)), vec![1, 2]);
        assert_eq!(ids(&combine(sets, FilterTest::AllOf)), vec![1, 2]);
        assert_eq!(ids(&combine(vec![vec![a], vec![b]], FilterTest::AllOf)), Vec::<u32>::new());
        assert!(combine(Vec::new(), FilterTest::AllOf).is_empty());
    }
}
