//! Expression (AST) module: the predicate tree parsed from a CardDAV `filter` element.
//!
//! This module provides the Filter, PropFilter, ParamFilter and TextMatch node types,
//! and the FilterParser that builds them from an XML document.
//!
//! ```text
//! <!ELEMENT filter (prop-filter*)>
//! <!ELEMENT prop-filter (is-not-defined | (text-match?, param-filter*))>
//! <!ELEMENT param-filter (is-not-defined | text-match)?>
//! <!ELEMENT text-match (#PCDATA)>
//! <!ATTLIST text-match collation        CDATA "i;ascii-casemap"
//!                      negate-condition (yes | no) "no">
//! ```

use crate::mapping::AttributeMappingTable;
use crate::types::{Collation, MatchType};
use crate::CardFilterError;
use roxmltree::{Document, Node};
use serde::{Serialize, Deserialize};
use tracing::{debug, info};

pub const CARDDAV_NS: &str = "urn:ietf:params:xml:ns:carddav";

pub const E_FILTER: &str = "filter";
pub const E_PROP_FILTER: &str = "prop-filter";
pub const E_PARAM_FILTER: &str = "param-filter";
pub const E_TEXT_MATCH: &str = "text-match";
pub const E_IS_NOT_DEFINED: &str = "is-not-defined";

const A_NAME: &str = "name";
const A_TEST: &str = "test";
const A_COLLATION: &str = "collation";
const A_NEGATE_CONDITION: &str = "negate-condition";
const A_MATCH_TYPE: &str = "match-type";

/// How the prop-filters of a `filter` are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FilterTest {
    #[default]
    AnyOf,
    AllOf,
}

impl FilterTest {
    fn from_attr(value: Option<&str>) -> Self {
        match value {
            Some("allof") => FilterTest::AllOf,
            _ => FilterTest::AnyOf,
        }
    }
}

/// A text predicate. `enclosing` names the node the text-match sits under; the
/// attribute mapping is resolved through that name, not through the text-match itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextMatch {
    pub pattern: String,
    pub negate: bool,
    pub collation: Collation,
    pub match_type: MatchType,
    pub enclosing: String,
}

impl TextMatch {
    pub fn new(enclosing: impl Into<String>, pattern: impl Into<String>, negate: bool) -> Self {
        Self {
            pattern: pattern.into(),
            negate,
            collation: Collation::default(),
            match_type: MatchType::default(),
            enclosing: enclosing.into(),
        }
    }

    pub fn enclosing_name(&self) -> &str {
        &self.enclosing
    }

    /// Tests a single value under this text-match's collation, match type and negation.
    pub fn matches(&self, value: &str) -> bool {
        let value = self.collation.fold(value);
        let pattern = self.collation.fold(&self.pattern);
        self.match_type.test(&value, &pattern) != self.negate
    }

    /// Tests a multi-valued property the way the compiled query does: the pattern
    /// is OR-ed across values and negation applies to that result.
    pub fn matches_any(&self, values: &[&str]) -> bool {
        let pattern = self.collation.fold(&self.pattern);
        let hit = values
            .iter()
            .any(|v| self.match_type.test(&self.collation.fold(v), &pattern));
        hit != self.negate
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ParamFilter {
    pub name: String,
    pub is_not_defined: bool,
    pub text_match: Option<TextMatch>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PropFilter {
    pub name: String,
    pub is_not_defined: bool,
    pub text_match: Option<TextMatch>,
    pub param_filters: Vec<ParamFilter>,
}

/// The root of a parsed filter document.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Filter {
    pub test: FilterTest,
    pub prop_filters: Vec<PropFilter>,
}

impl Filter {
    pub fn is_empty(&self) -> bool {
        self.prop_filters.is_empty()
    }
}

/// A parsed node of any nesting level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterNode {
    Root(Filter),
    Property(PropFilter),
    Parameter(ParamFilter),
}

impl FilterNode {
    pub fn name(&self) -> &str {
        match self {
            FilterNode::Root(_) => "",
            FilterNode::Property(p) => &p.name,
            FilterNode::Parameter(p) => &p.name,
        }
    }

    pub fn level(&self) -> FilterLevel {
        match self {
            FilterNode::Root(_) => FilterLevel::Root,
            FilterNode::Property(_) => FilterLevel::Property,
            FilterNode::Parameter(_) => FilterLevel::Parameter,
        }
    }
}

/// Nesting level of the element being parsed; decides which children are legal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterLevel {
    Root,
    Property,
    Parameter,
}

impl FilterLevel {
    pub fn allows_prop_filters(&self) -> bool {
        matches!(self, FilterLevel::Root)
    }
    pub fn allows_param_filters(&self) -> bool {
        matches!(self, FilterLevel::Property)
    }
    /// text-match and is-not-defined constrain a named node; the root has no name.
    pub fn allows_predicates(&self) -> bool {
        !matches!(self, FilterLevel::Root)
    }
}

#[derive(Default)]
struct Children {
    prop_filters: Vec<PropFilter>,
    param_filters: Vec<ParamFilter>,
    text_match: Option<TextMatch>,
    is_not_defined: bool,
}

/// Builds predicate trees from CardDAV XML. Unrecognized or misplaced children are
/// logged and skipped; only malformed XML fails.
pub struct FilterParser<'a> {
    table: &'a AttributeMappingTable,
}

impl<'a> FilterParser<'a> {
    pub fn new(table: &'a AttributeMappingTable) -> Self {
        Self { table }
    }

    pub fn parse(xml: &str, table: &AttributeMappingTable) -> Result<Filter, CardFilterError> {
        FilterParser::new(table).parse_document(xml)
    }

    /// Parses a document whose root is a CardDAV `filter`, or which contains one
    /// (an `addressbook-query` report body, for instance).
    pub fn parse_document(&self, xml: &str) -> Result<Filter, CardFilterError> {
        let doc = Document::parse(xml)?;
        let filter = doc
            .root()
            .descendants()
            .find(|n| is_carddav(n, E_FILTER))
            .ok_or(CardFilterError::MissingFilter)?;
        Ok(self.parse_filter(filter))
    }

    pub fn parse_filter(&self, elem: Node<'_, '_>) -> Filter {
        let children = self.parse_children(elem, FilterLevel::Root, "");
        Filter {
            test: FilterTest::from_attr(elem.attribute(A_TEST)),
            prop_filters: children.prop_filters,
        }
    }

    /// Parses `elem` as a node of the given nesting level.
    pub fn parse_node(&self, elem: Node<'_, '_>, level: FilterLevel) -> FilterNode {
        match level {
            FilterLevel::Root => FilterNode::Root(self.parse_filter(elem)),
            FilterLevel::Property => FilterNode::Property(self.parse_prop_filter(elem)),
            FilterLevel::Parameter => FilterNode::Parameter(self.parse_param_filter(elem)),
        }
    }

    fn parse_prop_filter(&self, elem: Node<'_, '_>) -> PropFilter {
        let name = elem.attribute(A_NAME).unwrap_or_default().to_string();
        if self.table.lookup(&name).is_none() {
            debug!(property = %name, "prop-filter has no attribute mapping");
        }
        let children = self.parse_children(elem, FilterLevel::Property, &name);
        PropFilter {
            is_not_defined: children.is_not_defined,
            text_match: children.text_match,
            param_filters: children.param_filters,
            name,
        }
    }

    fn parse_param_filter(&self, elem: Node<'_, '_>) -> ParamFilter {
        let name = elem.attribute(A_NAME).unwrap_or_default().to_string();
        let children = self.parse_children(elem, FilterLevel::Parameter, &name);
        ParamFilter {
            is_not_defined: children.is_not_defined,
            text_match: children.text_match,
            name,
        }
    }

    fn parse_text_match(&self, elem: Node<'_, '_>, enclosing: &str) -> TextMatch {
        let collation = match elem.attribute(A_COLLATION) {
            None => Collation::default(),
            Some(name) => Collation::from_name(name).unwrap_or_else(|| {
                info!(collation = name, "unsupported collation, using {}", Collation::ASCII_CASEMAP);
                Collation::default()
            }),
        };
        let match_type = match elem.attribute(A_MATCH_TYPE) {
            None => MatchType::default(),
            Some(name) => MatchType::from_name(name).unwrap_or_else(|| {
                info!(match_type = name, "unsupported match-type, using contains");
                MatchType::default()
            }),
        };
        let pattern: String = elem.children().filter(|n| n.is_text()).filter_map(|n| n.text()).collect();
        TextMatch {
            pattern,
            negate: elem.attribute(A_NEGATE_CONDITION) == Some("yes"),
            collation,
            match_type,
            enclosing: enclosing.to_string(),
        }
    }

    fn parse_children(&self, elem: Node<'_, '_>, level: FilterLevel, name: &str) -> Children {
        let mut out = Children::default();
        for child in elem.children().filter(|n| n.is_element()) {
            let tag = child.tag_name();
            let carddav = tag.namespace() == Some(CARDDAV_NS);
            match tag.name() {
                E_PROP_FILTER if carddav && level.allows_prop_filters() => {
                    out.prop_filters.push(self.parse_prop_filter(child));
                }
                E_PARAM_FILTER if carddav && level.allows_param_filters() => {
                    out.param_filters.push(self.parse_param_filter(child));
                }
                E_TEXT_MATCH if carddav && level.allows_predicates() => {
                    out.text_match = Some(self.parse_text_match(child, name));
                }
                E_IS_NOT_DEFINED if carddav && level.allows_predicates() => {
                    out.is_not_defined = true;
                }
                other => {
                    info!(namespace = tag.namespace().unwrap_or(""), element = other, "unrecognized filter");
                }
            }
        }
        out
    }
}

fn is_carddav(node: &Node<'_, '_>, local: &str) -> bool {
    node.is_element() && node.tag_name().namespace() == Some(CARDDAV_NS) && node.tag_name().name() == local
}
