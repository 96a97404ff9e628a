//! Directory entry snapshot model.
//!
//! # Responsibility
//! - Represent one directory object exactly as the directory service returned it.
//! - Provide case-insensitive attribute and object class lookups.
//!
//! # Invariants
//! - `dn` is the directory identity (source key) of the object.
//! - Entries are snapshots; nothing in the browser mutates them in place after
//!   they are handed to the item store.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Naming attribute shared by every object class.
pub const ATTRIBUTE_NAME: &str = "name";
/// Object class attribute name used in filters.
pub const ATTRIBUTE_OBJECT_CLASS: &str = "objectClass";
pub const ATTRIBUTE_DESCRIPTION: &str = "description";
pub const ATTRIBUTE_DISPLAY_NAME: &str = "displayName";
pub const ATTRIBUTE_SAMACCOUNT_NAME: &str = "sAMAccountName";
pub const ATTRIBUTE_USER_ACCOUNT_CONTROL: &str = "userAccountControl";
pub const ATTRIBUTE_MEMBER: &str = "member";
pub const ATTRIBUTE_MEMBER_OF: &str = "memberOf";
pub const ATTRIBUTE_GPLINK: &str = "gPLink";
pub const ATTRIBUTE_GPOPTIONS: &str = "gPOptions";
pub const ATTRIBUTE_SHOW_IN_ADVANCED_VIEW_ONLY: &str = "showInAdvancedViewOnly";

pub const CLASS_TOP: &str = "top";
pub const CLASS_USER: &str = "user";
pub const CLASS_PERSON: &str = "person";
pub const CLASS_ORG_PERSON: &str = "organizationalPerson";
pub const CLASS_GROUP: &str = "group";
pub const CLASS_COMPUTER: &str = "computer";
pub const CLASS_OU: &str = "organizationalUnit";
pub const CLASS_CONTAINER: &str = "container";
pub const CLASS_DOMAIN: &str = "domainDNS";
pub const CLASS_BUILTIN_DOMAIN: &str = "builtinDomain";
pub const CLASS_GP_CONTAINER: &str = "groupPolicyContainer";

/// `userAccountControl` bit for a disabled account.
pub const UAC_ACCOUNT_DISABLE: i64 = 0x0002;

/// `gPOptions` value meaning inheritance is blocked.
pub const GPOPTIONS_BLOCK_INHERITANCE: &str = "1";
/// `gPOptions` value meaning policies are inherited.
pub const GPOPTIONS_INHERIT: &str = "0";

/// Read-only snapshot of one directory object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    /// Distinguished name, the source key of this object.
    pub dn: String,
    /// Object classes, as reported by the directory.
    #[serde(default)]
    pub object_classes: BTreeSet<String>,
    /// Attribute values keyed by attribute name.
    #[serde(default)]
    pub attributes: BTreeMap<String, Vec<String>>,
}

impl Entry {
    /// Creates an entry with the given DN and object classes and no attributes.
    pub fn new<I, S>(dn: impl Into<String>, object_classes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            dn: dn.into(),
            object_classes: object_classes.into_iter().map(Into::into).collect(),
            attributes: BTreeMap::new(),
        }
    }

    /// Builder-style helper that sets one single-valued attribute.
    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_values(name, vec![value.into()]);
        self
    }

    /// Builder-style helper that sets one multi-valued attribute.
    pub fn with_values<I, S>(mut self, name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.set_values(name, values.into_iter().map(Into::into).collect());
        self
    }

    /// Returns the directory identity of this entry.
    pub fn source_key(&self) -> &str {
        &self.dn
    }

    /// Replaces all values of one attribute, matching the name case-insensitively.
    ///
    /// An empty value list removes the attribute.
    pub fn set_values(&mut self, name: impl Into<String>, values: Vec<String>) {
        let name = name.into();
        let existing = self
            .attributes
            .keys()
            .find(|key| key.eq_ignore_ascii_case(&name))
            .cloned();
        if let Some(existing) = existing {
            self.attributes.remove(&existing);
        }
        if !values.is_empty() {
            self.attributes.insert(name, values);
        }
    }

    /// Returns all values of one attribute.
    pub fn get_values(&self, name: &str) -> &[String] {
        if let Some(values) = self.attributes.get(name) {
            return values;
        }
        self.attributes
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, values)| values.as_slice())
            .unwrap_or(&[])
    }

    /// Returns the first value of one attribute.
    pub fn get_string(&self, name: &str) -> Option<&str> {
        self.get_values(name).first().map(String::as_str)
    }

    /// Returns the first value of one attribute parsed as an integer.
    pub fn get_int(&self, name: &str) -> Option<i64> {
        self.get_string(name)
            .and_then(|value| value.trim().parse::<i64>().ok())
    }

    /// Returns the first value of one attribute as an LDAP boolean.
    pub fn get_bool(&self, name: &str) -> bool {
        self.get_string(name)
            .is_some_and(|value| value.eq_ignore_ascii_case("TRUE"))
    }

    pub fn has_attribute(&self, name: &str) -> bool {
        !self.get_values(name).is_empty()
    }

    /// Returns whether this entry carries the given object class.
    pub fn is_class(&self, object_class: &str) -> bool {
        self.object_classes
            .iter()
            .any(|value| value.eq_ignore_ascii_case(object_class))
    }

    /// Returns the most specific object class.
    ///
    /// Directories list classes from `top` down; the last non-`top` class wins.
    /// Computer entries also carry `user`, so `computer` is checked first.
    pub fn primary_class(&self) -> Option<&str> {
        for preferred in [CLASS_COMPUTER, CLASS_GP_CONTAINER] {
            if let Some(found) = self
                .object_classes
                .iter()
                .find(|value| value.eq_ignore_ascii_case(preferred))
            {
                return Some(found.as_str());
            }
        }
        for preferred in [
            CLASS_USER,
            CLASS_GROUP,
            CLASS_OU,
            CLASS_DOMAIN,
            CLASS_BUILTIN_DOMAIN,
            CLASS_CONTAINER,
        ] {
            if let Some(found) = self
                .object_classes
                .iter()
                .find(|value| value.eq_ignore_ascii_case(preferred))
            {
                return Some(found.as_str());
            }
        }
        self.object_classes
            .iter()
            .find(|value| !value.eq_ignore_ascii_case(CLASS_TOP))
            .map(String::as_str)
    }

    /// Returns the user-facing name of this entry.
    ///
    /// Falls back to the RDN value when the `name` attribute is absent.
    pub fn display_name(&self) -> String {
        match self.get_string(ATTRIBUTE_NAME) {
            Some(name) if !name.trim().is_empty() => name.to_string(),
            _ => crate::model::dn::rdn_value(&self.dn),
        }
    }

    /// Returns whether `userAccountControl` marks the account as disabled.
    pub fn account_disabled(&self) -> bool {
        self.get_int(ATTRIBUTE_USER_ACCOUNT_CONTROL)
            .is_some_and(|value| value & UAC_ACCOUNT_DISABLE != 0)
    }

    /// Returns whether `gPOptions` blocks policy inheritance.
    pub fn inheritance_blocked(&self) -> bool {
        self.get_int(ATTRIBUTE_GPOPTIONS)
            .is_some_and(|value| value != 0)
    }
}

#[cfg(test)]
mod tests {
    use super::{Entry, ATTRIBUTE_USER_ACCOUNT_CONTROL, CLASS_COMPUTER, CLASS_USER};

    #[test]
    fn attribute_lookup_ignores_case() {
        let entry = Entry::new("CN=a,DC=x", ["top", "user"]).with_attribute("sAMAccountName", "a");
        assert_eq!(entry.get_string("samaccountname"), Some("a"));
        assert!(entry.is_class("USER"));
    }

    #[test]
    fn set_values_replaces_existing_key_with_other_case() {
        let mut entry = Entry::new("CN=a,DC=x", ["user"]).with_attribute("Description", "old");
        entry.set_values("description", vec!["new".to_string()]);
        assert_eq!(entry.attributes.len(), 1);
        assert_eq!(entry.get_string("DESCRIPTION"), Some("new"));

        entry.set_values("description", vec![]);
        assert!(!entry.has_attribute("description"));
    }

    #[test]
    fn computer_class_wins_over_user() {
        let entry = Entry::new(
            "CN=pc,DC=x",
            ["top", "person", "organizationalPerson", CLASS_USER, CLASS_COMPUTER],
        );
        assert_eq!(entry.primary_class(), Some(CLASS_COMPUTER));
    }

    #[test]
    fn display_name_falls_back_to_rdn() {
        let entry = Entry::new("OU=Sales,DC=x", ["organizationalUnit"]);
        assert_eq!(entry.display_name(), "Sales");
    }

    #[test]
    fn account_disabled_reads_uac_bit() {
        let enabled = Entry::new("CN=a,DC=x", ["user"]).with_attribute(ATTRIBUTE_USER_ACCOUNT_CONTROL, "512");
        let disabled = Entry::new("CN=b,DC=x", ["user"]).with_attribute(ATTRIBUTE_USER_ACCOUNT_CONTROL, "514");
        assert!(!enabled.account_disabled());
        assert!(disabled.account_disabled());
    }
}
