//! Context module: contact records, address-object results and the per-request context.
//!
//! This module provides the Contact, AddressObject, OperationContext and DavContext types.

use crate::backend::Mailbox;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use serde::{Serialize, Deserialize};

pub type FolderId = u32;

/// Read access to a contact's attributes by backend key.
pub trait ContactRecord {
    fn get(&self, key: &str) -> Option<&str>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub id: u32,
    pub folder: FolderId,
    attrs: BTreeMap<String, String>,
}

impl Contact {
    pub fn new(id: u32, folder: FolderId) -> Self {
        Self { id, folder, attrs: BTreeMap::new() }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }

    /// Sets an attribute. Empty values remove it; a contact never stores blank fields.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        if value.is_empty() {
            self.attrs.remove(&key);
        } else {
            self.attrs.insert(key, value);
        }
    }

    pub fn attrs(&self) -> &BTreeMap<String, String> {
        &self.attrs
    }

    /// The key name-sorted searches order by.
    pub fn sort_name(&self) -> String {
        self.get(crate::mapping::attrs::FULL_NAME)
            .or_else(|| self.get(crate::mapping::attrs::EMAIL))
            .unwrap_or_default()
            .to_lowercase()
    }
}

impl ContactRecord for Contact {
    // Deserialized contacts bypass `set`, so blanks can still be stored.
    fn get(&self, key: &str) -> Option<&str> {
        self.attrs.get(key).map(String::as_str).filter(|v| !v.is_empty())
    }
}

impl ContactRecord for BTreeMap<String, String> {
    fn get(&self, key: &str) -> Option<&str> {
        BTreeMap::get(self, key).map(String::as_str).filter(|v| !v.is_empty())
    }
}

/// A matched contact, as handed back to the transport layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressObject {
    contact: Contact,
}

impl AddressObject {
    pub fn new(contact: Contact) -> Self {
        Self { contact }
    }

    pub fn id(&self) -> u32 {
        self.contact.id
    }

    pub fn contact(&self) -> &Contact {
        &self.contact
    }

    pub fn into_contact(self) -> Contact {
        self.contact
    }

    /// Resource name within the address book collection.
    pub fn href(&self) -> String {
        format!("{}.vcf", self.contact.id)
    }
}

/// Who a backend operation is performed on behalf of.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationContext {
    pub account: String,
}

impl OperationContext {
    pub fn new(account: impl Into<String>) -> Self {
        Self { account: account.into() }
    }
}

/// Per-request state: the authenticated user and the mailbox the request targets, if
/// it could be resolved.
#[derive(Clone)]
pub struct DavContext {
    user: String,
    operation: OperationContext,
    mailbox: Option<Arc<dyn Mailbox>>,
}

impl DavContext {
    pub fn new(user: impl Into<String>, mailbox: Option<Arc<dyn Mailbox>>) -> Self {
        let user = user.into();
        Self { operation: OperationContext::new(user.clone()), user, mailbox }
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn operation_context(&self) -> &OperationContext {
        &self.operation
    }

    pub fn target_mailbox(&self) -> Option<&dyn Mailbox> {
        self.mailbox.as_deref()
    }
}

impl fmt::Debug for DavContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DavContext")
            .field("user", &self.user)
            .field("has_mailbox", &self.mailbox.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::InMemoryMailbox;
    use serde_json;

    #[test]
    fn test_set_and_get_value() {
        let c = Contact::new(1, 7).with("nickname", "Al");
        assert_eq!(c.get("nickname"), Some("Al"));
        assert_eq!(c.get("notes"), None);
    }

    #[test]
    fn test_empty_value_removes_attribute() {
        let mut c = Contact::new(1, 7).with("nickname", "Al");
        c.set("nickname", "");
        assert_eq!(c.get("nickname"), None);
        assert!(c.attrs().is_empty());
    }

    #[test]
    fn test_map_record_skips_blank_values() {
        let mut m = BTreeMap::new();
        m.insert("nickname".to_string(), String::new());
        m.insert("notes".to_string(), "hi".to_string());
        assert_eq!(ContactRecord::get(&m, "nickname"), None);
        assert_eq!(ContactRecord::get(&m, "notes"), Some("hi"));
    }

    #[test]
    fn test_deserialized_blank_value_is_absent() {
        let c: Contact =
            serde_json::from_str(r#"{"id":3,"folder":7,"attrs":{"nickname":"","fullName":""}}"#).unwrap();
        assert_eq!(c.get("nickname"), None);
        assert_eq!(c.sort_name(), "");
    }

    #[test]
    fn test_sort_name_fallbacks() {
        assert_eq!(Contact::new(1, 1).with("fullName", "Bob").sort_name(), "bob");
        assert_eq!(Contact::new(1, 1).with("email", "X@y").sort_name(), "x@y");
        assert_eq!(Contact::new(1, 1).sort_name(), "");
    }

    #[test]
    fn test_address_object() {
        let obj = AddressObject::new(Contact::new(42, 7).with("fullName", "Ann"));
        assert_eq!(obj.id(), 42);
        assert_eq!(obj.href(), "42.vcf");
        assert_eq!(obj.contact().get("fullName"), Some("Ann"));
    }

    #[test]
    fn test_dav_context() {
        let ctx = DavContext::new("ann@example.com", Some(Arc::new(InMemoryMailbox::new())));
        assert_eq!(ctx.user(), "ann@example.com");
        assert_eq!(ctx.operation_context().account, "ann@example.com");
        assert!(ctx.target_mailbox().is_some());
        assert!(DavContext::new("x", None).target_mailbox().is_none());
    }

    #[test]
    fn test_serialization_deserialization() {
        let c = Contact::new(3, 7).with("email", "a@b.c");
        let json = serde_json::to_string(&c).unwrap();
        let deserialized: Contact = serde_json::from_str(&json).unwrap();
        assert_eq!(c, deserialized);
    }
}
