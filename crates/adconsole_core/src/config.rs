//! Browser settings and directory schema rules.
//!
//! # Responsibility
//! - Carry per-session view settings into the controller and behaviors.
//! - Describe which object classes are container-like and which classes may
//!   contain which.
//!
//! # Invariants
//! - Settings are immutable for the lifetime of one controller.
//! - Class names compare ASCII case-insensitively.

use crate::model::entry::{
    CLASS_BUILTIN_DOMAIN, CLASS_COMPUTER, CLASS_CONTAINER, CLASS_DOMAIN, CLASS_GP_CONTAINER,
    CLASS_GROUP, CLASS_OU, CLASS_USER,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::Path;

const DEFAULT_PAGE_SIZE: u32 = 1000;

/// Errors while loading or validating settings.
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(serde_json::Error),
    Invalid(String),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(err) => write!(f, "failed to read settings: {err}"),
            Self::Parse(err) => write!(f, "failed to parse settings: {err}"),
            Self::Invalid(message) => write!(f, "invalid settings: {message}"),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            Self::Parse(err) => Some(err),
            Self::Invalid(_) => None,
        }
    }
}

impl From<std::io::Error> for ConfigError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(value: serde_json::Error) -> Self {
        Self::Parse(value)
    }
}

/// Structural rules of the directory schema used by the browser.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectorySchema {
    /// Classes shown as scope nodes in the tree.
    pub container_classes: Vec<String>,
    /// Object class -> classes allowed as its parent.
    pub possible_superiors: BTreeMap<String, Vec<String>>,
}

impl Default for DirectorySchema {
    fn default() -> Self {
        let account_superiors = vec![
            CLASS_OU.to_string(),
            CLASS_CONTAINER.to_string(),
            CLASS_DOMAIN.to_string(),
            CLASS_BUILTIN_DOMAIN.to_string(),
        ];
        let mut possible_superiors = BTreeMap::new();
        for class in [CLASS_USER, CLASS_COMPUTER, CLASS_GROUP] {
            possible_superiors.insert(class.to_string(), account_superiors.clone());
        }
        possible_superiors.insert(
            CLASS_OU.to_string(),
            vec![CLASS_OU.to_string(), CLASS_DOMAIN.to_string()],
        );
        possible_superiors.insert(
            CLASS_CONTAINER.to_string(),
            vec![
                CLASS_OU.to_string(),
                CLASS_CONTAINER.to_string(),
                CLASS_DOMAIN.to_string(),
            ],
        );
        possible_superiors.insert(
            CLASS_GP_CONTAINER.to_string(),
            vec![CLASS_CONTAINER.to_string()],
        );

        Self {
            container_classes: vec![
                CLASS_DOMAIN.to_string(),
                CLASS_OU.to_string(),
                CLASS_CONTAINER.to_string(),
                CLASS_BUILTIN_DOMAIN.to_string(),
            ],
            possible_superiors,
        }
    }
}

impl DirectorySchema {
    /// Builds a schema with the given container classes and default superiors.
    pub fn with_container_classes<I, S>(classes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            container_classes: classes.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Returns whether any of `classes` is container-like.
    pub fn is_container(&self, classes: &BTreeSet<String>) -> bool {
        classes.iter().any(|class| {
            self.container_classes
                .iter()
                .any(|container| container.eq_ignore_ascii_case(class))
        })
    }

    /// Returns every class allowed to contain an object with `classes`.
    pub fn possible_superiors(&self, classes: &BTreeSet<String>) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        for class in classes {
            let superiors = self
                .possible_superiors
                .iter()
                .find(|(key, _)| key.eq_ignore_ascii_case(class))
                .map(|(_, superiors)| superiors);
            if let Some(superiors) = superiors {
                out.extend(superiors.iter().map(|value| value.to_ascii_lowercase()));
            }
        }
        out
    }

    /// Returns whether an object with `parent_classes` may contain one with `child_classes`.
    pub fn is_valid_superior(
        &self,
        child_classes: &BTreeSet<String>,
        parent_classes: &BTreeSet<String>,
    ) -> bool {
        let superiors = self.possible_superiors(child_classes);
        parent_classes
            .iter()
            .any(|class| superiors.contains(&class.to_ascii_lowercase()))
    }
}

/// Per-session browser settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserSettings {
    /// DN of the domain root shown as the first tree root.
    pub domain_head: String,
    /// Show non-container objects as scope nodes too.
    pub show_non_containers: bool,
    /// Show objects flagged `showInAdvancedViewOnly`.
    pub advanced_features: bool,
    /// Extra filter applied to results listings; containers always pass.
    pub user_filter: String,
    /// Page size for paged searches.
    pub page_size: u32,
    pub schema: DirectorySchema,
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            domain_head: String::new(),
            show_non_containers: false,
            advanced_features: false,
            user_filter: String::new(),
            page_size: DEFAULT_PAGE_SIZE,
            schema: DirectorySchema::default(),
        }
    }
}

impl BrowserSettings {
    /// Creates default settings for one domain.
    pub fn for_domain(domain_head: impl Into<String>) -> Self {
        Self {
            domain_head: domain_head.into(),
            ..Self::default()
        }
    }

    /// Parses and validates settings from JSON.
    pub fn from_json_str(value: &str) -> Result<Self, ConfigError> {
        let settings: Self = serde_json::from_str(value)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reads, parses and validates settings from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.domain_head.trim().is_empty() {
            return Err(ConfigError::Invalid("domain_head must not be blank".to_string()));
        }
        if self.page_size == 0 {
            return Err(ConfigError::Invalid("page_size must be positive".to_string()));
        }
        Ok(())
    }

    /// Returns whether an entry with `classes` gets a scope node.
    pub fn should_be_in_scope(&self, classes: &BTreeSet<String>) -> bool {
        self.show_non_containers || self.schema.is_container(classes)
    }
}

#[cfg(test)]
mod tests {
    use super::{BrowserSettings, ConfigError, DirectorySchema};
    use std::collections::BTreeSet;

    fn classes(values: &[&str]) -> BTreeSet<String> {
        values.iter().map(|value| value.to_string()).collect()
    }

    #[test]
    fn default_schema_classifies_containers() {
        let schema = DirectorySchema::default();
        assert!(schema.is_container(&classes(&["top", "organizationalUnit"])));
        assert!(!schema.is_container(&classes(&["top", "user"])));
    }

    #[test]
    fn superiors_are_case_insensitive() {
        let schema = DirectorySchema::default();
        assert!(schema.is_valid_superior(&classes(&["User"]), &classes(&["ORGANIZATIONALUNIT"])));
        assert!(!schema.is_valid_superior(&classes(&["organizationalUnit"]), &classes(&["group"])));
        assert!(!schema.is_valid_superior(&classes(&["domainDNS"]), &classes(&["domainDNS"])));
    }

    #[test]
    fn settings_parse_with_defaults() {
        let settings =
            BrowserSettings::from_json_str(r#"{"domain_head":"DC=x","show_non_containers":true}"#)
                .unwrap();
        assert_eq!(settings.page_size, 1000);
        assert!(settings.should_be_in_scope(&classes(&["user"])));
        assert!(settings.schema.is_container(&classes(&["domainDNS"])));
    }

    #[test]
    fn settings_validation_rejects_blank_domain() {
        let error = BrowserSettings::from_json_str(r#"{"page_size":10}"#).unwrap_err();
        assert!(matches!(error, ConfigError::Invalid(_)));

        let error = BrowserSettings::from_json_str("{not json").unwrap_err();
        assert!(matches!(error, ConfigError::Parse(_)));
    }
}
