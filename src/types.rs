//! Types module: defines attribute mappings and text-comparison types for the filter engine.
//!
//! This module provides the AttributeMapping enum plus the Collation and MatchType
//! enums used by text-match predicates.

use icu_casemap::CaseMapper;
use serde::{Serialize, Deserialize};
use std::borrow::Cow;

/// The backend attribute keys registered under one sub-type of a structured property.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubTypeMapping {
    pub subtype: String,
    pub attrs: Vec<String>,
}

/// How a protocol property name maps onto contact attribute keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub enum AttributeMapping {
    /// One property, one backend key (FN -> fullName).
    Simple(String),
    /// Sub-type name -> backend keys, in registration order.
    Structured(Vec<SubTypeMapping>),
}

impl AttributeMapping {
    pub fn is_structured(&self) -> bool {
        matches!(self, AttributeMapping::Structured(_))
    }

    /// Every backend key of this mapping. For structured mappings this is the union
    /// across all sub-types, without duplicates, in registration order.
    pub fn attributes(&self) -> Vec<&str> {
        match self {
            AttributeMapping::Simple(attr) => vec![attr.as_str()],
            AttributeMapping::Structured(subtypes) => {
                let mut out: Vec<&str> = Vec::new();
                for attr in subtypes.iter().flat_map(|s| s.attrs.iter()) {
                    if !out.contains(&attr.as_str()) {
                        out.push(attr);
                    }
                }
                out
            }
        }
    }

    /// Backend keys for a single sub-type. Simple mappings ignore the sub-type;
    /// an unknown sub-type of a structured mapping yields an empty list.
    pub fn attributes_for(&self, subtype: &str) -> Vec<&str> {
        match self {
            AttributeMapping::Simple(attr) => vec![attr.as_str()],
            AttributeMapping::Structured(subtypes) => subtypes
                .iter()
                .find(|s| s.subtype.eq_ignore_ascii_case(subtype))
                .map(|s| s.attrs.iter().map(String::as_str).collect())
                .unwrap_or_default(),
        }
    }

    /// Sub-type names of a structured mapping; empty for simple mappings.
    pub fn subtypes(&self) -> Vec<&str> {
        match self {
            AttributeMapping::Simple(_) => Vec::new(),
            AttributeMapping::Structured(subtypes) => subtypes.iter().map(|s| s.subtype.as_str()).collect(),
        }
    }
}

/// Text comparison collations from RFC 4790 that a text-match may request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[non_exhaustive]
pub enum Collation {
    #[default]
    AsciiCasemap,
    UnicodeCasemap,
    Octet,
}

impl Collation {
    pub const ASCII_CASEMAP: &'static str = "i;ascii-casemap";
    pub const UNICODE_CASEMAP: &'static str = "i;unicode-casemap";
    pub const OCTET: &'static str = "i;octet";

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            Self::ASCII_CASEMAP => Some(Collation::AsciiCasemap),
            Self::UNICODE_CASEMAP => Some(Collation::UnicodeCasemap),
            Self::OCTET => Some(Collation::Octet),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Collation::AsciiCasemap => Self::ASCII_CASEMAP,
            Collation::UnicodeCasemap => Self::UNICODE_CASEMAP,
            Collation::Octet => Self::OCTET,
        }
    }

    /// Normalizes text so two folded strings can be compared byte-wise.
    pub fn fold<'a>(&self, text: &'a str) -> Cow<'a, str> {
        match self {
            Collation::Octet => Cow::Borrowed(text),
            Collation::AsciiCasemap => Cow::Owned(text.to_ascii_lowercase()),
            Collation::UnicodeCasemap => Cow::Owned(CaseMapper::new().fold_string(text).into_owned()),
        }
    }
}

/// How a text-match pattern is compared against a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[non_exhaustive]
pub enum MatchType {
    Equals,
    #[default]
    Contains,
    StartsWith,
    EndsWith,
}

impl MatchType {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "equals" => Some(MatchType::Equals),
            "contains" => Some(MatchType::Contains),
            "starts-with" => Some(MatchType::StartsWith),
            "ends-with" => Some(MatchType::EndsWith),
            _ => None,
        }
    }

    pub fn test(&self, value: &str, pattern: &str) -> bool {
        match self {
            MatchType::Equals => value == pattern,
            MatchType::Contains => value.contains(pattern),
            MatchType::StartsWith => value.starts_with(pattern),
            MatchType::EndsWith => value.ends_with(pattern),
        }
    }
}
