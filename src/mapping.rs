//! Mapping module: the registry translating CardDAV property names into contact attribute keys.
//!
//! This module provides the AttributeMappingTable type and its builder. A table is built once,
//! shared behind an `Arc`, and never mutated afterwards.

use crate::types::{AttributeMapping, SubTypeMapping};
use std::collections::HashMap;
use serde::{Serialize, Deserialize};

/// Contact attribute keys used by the default CardDAV table.
pub mod attrs {
    pub const FULL_NAME: &str = "fullName";
    pub const NICKNAME: &str = "nickname";
    pub const JOB_TITLE: &str = "jobTitle";
    pub const NOTES: &str = "notes";
    pub const HOME_STREET: &str = "homeStreet";
    pub const WORK_STREET: &str = "workStreet";
    pub const HOME_URL: &str = "homeURL";
    pub const WORK_URL: &str = "workURL";
    pub const CAR_PHONE: &str = "carPhone";
    pub const MOBILE_PHONE: &str = "mobilePhone";
    pub const PAGER: &str = "pager";
    pub const OTHER_PHONE: &str = "otherPhone";
    pub const WORK_PHONE: &str = "workPhone";
    pub const WORK_PHONE2: &str = "workPhone2";
    pub const HOME_PHONE: &str = "homePhone";
    pub const HOME_PHONE2: &str = "homePhone2";
    pub const HOME_FAX: &str = "homeFax";
    pub const WORK_FAX: &str = "workFax";
    pub const EMAIL: &str = "email";
    pub const EMAIL2: &str = "email2";
    pub const EMAIL3: &str = "email3";
    pub const COMPANY: &str = "company";
    pub const DEPARTMENT: &str = "department";
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "RawMappingTable")]
#[non_exhaustive]
pub struct AttributeMappingTable {
    mappings: HashMap<String, AttributeMapping>, // keys are upper-case
}

#[derive(Deserialize)]
struct RawMappingTable {
    mappings: HashMap<String, AttributeMapping>,
}

impl From<RawMappingTable> for AttributeMappingTable {
    fn from(raw: RawMappingTable) -> Self {
        let mut builder = AttributeMappingTableBuilder::new();
        for (property, mapping) in raw.mappings {
            builder = match mapping {
                AttributeMapping::Simple(attr) => builder.simple(property, attr),
                AttributeMapping::Structured(subtypes) => subtypes.into_iter().fold(builder, |b, sub| {
                    let keys: Vec<&str> = sub.attrs.iter().map(String::as_str).collect();
                    b.sub_type(property.as_str(), sub.subtype, &keys)
                }),
            };
        }
        builder.build()
    }
}

impl AttributeMappingTable {
    /// The table used for CardDAV address books backed by mailbox contacts.
    pub fn carddav_defaults() -> Self {
        use attrs::*;
        AttributeMappingTableBuilder::new()
            .simple("FN", FULL_NAME)
            .simple("NICKNAME", NICKNAME)
            .simple("TITLE", JOB_TITLE)
            .simple("NOTE", NOTES)
            .sub_type("ADR", "home", &[HOME_STREET])
            .sub_type("ADR", "work", &[WORK_STREET])
            .sub_type("URL", "home", &[HOME_URL])
            .sub_type("URL", "work", &[WORK_URL])
            .sub_type("TEL", "car", &[CAR_PHONE])
            .sub_type("TEL", "cell", &[MOBILE_PHONE])
            .sub_type("TEL", "pager", &[PAGER])
            .sub_type("TEL", "other", &[OTHER_PHONE])
            .sub_type("TEL", "work", &[WORK_PHONE, WORK_PHONE2])
            .sub_type("TEL", "home", &[HOME_PHONE, HOME_PHONE2])
            .sub_type("TEL", "fax", &[HOME_FAX, WORK_FAX])
            .sub_type("EMAIL", "internet", &[EMAIL, EMAIL2, EMAIL3])
            .sub_type("ORG", "work", &[COMPANY, DEPARTMENT])
            .build()
    }

    /// Case-insensitive lookup. Unknown names are an expected outcome, not an error.
    pub fn lookup(&self, property: &str) -> Option<&AttributeMapping> {
        self.mappings.get(&property.to_uppercase())
    }

    /// All backend keys for a property, or an empty list when it has no mapping.
    pub fn attributes_for(&self, property: &str) -> Vec<&str> {
        self.lookup(property).map(|m| m.attributes()).unwrap_or_default()
    }

    /// Backend keys for one sub-type of a property.
    pub fn attributes_for_subtype(&self, property: &str, subtype: &str) -> Vec<&str> {
        self.lookup(property).map(|m| m.attributes_for(subtype)).unwrap_or_default()
    }

    /// Registered property names, sorted.
    pub fn property_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.mappings.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.mappings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct AttributeMappingTableBuilder {
    mappings: HashMap<String, AttributeMapping>,
}

impl AttributeMappingTableBuilder {
    pub fn new() -> Self {
        Self { mappings: HashMap::new() }
    }

    /// Registers a one-to-one mapping, replacing any earlier mapping for `property`.
    pub fn simple(mut self, property: impl Into<String>, attr: impl Into<String>) -> Self {
        let property = property.into().to_uppercase();
        self.mappings.insert(property, AttributeMapping::Simple(attr.into()));
        self
    }

    /// Adds (or replaces) one sub-type of a structured mapping, creating the mapping on
    /// first use. Sub-types are ignored for properties already registered as simple, and
    /// an empty key list is not registered.
    pub fn sub_type(mut self, property: impl Into<String>, subtype: impl Into<String>, attrs: &[&str]) -> Self {
        let property = property.into().to_uppercase();
        let subtype = subtype.into().to_lowercase();
        let mut keys: Vec<String> = Vec::with_capacity(attrs.len());
        for attr in attrs {
            if !keys.iter().any(|k| k == attr) {
                keys.push((*attr).to_string());
            }
        }
        if keys.is_empty() {
            return self;
        }
        let mapping = self
            .mappings
            .entry(property)
            .or_insert_with(|| AttributeMapping::Structured(Vec::new()));
        if let AttributeMapping::Structured(subtypes) = mapping {
            match subtypes.iter_mut().find(|s| s.subtype == subtype) {
                Some(existing) => existing.attrs = keys,
                None => subtypes.push(SubTypeMapping { subtype, attrs: keys }),
            }
        }
        self
    }

    pub fn build(self) -> AttributeMappingTable {
        AttributeMappingTable { mappings: self.mappings }
    }
}
