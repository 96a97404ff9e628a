//! Node type to behavior registry.

use crate::behavior::all_policies::AllPoliciesBehavior;
use crate::behavior::object::ObjectBehavior;
use crate::behavior::policy::PolicyBehavior;
use crate::behavior::policy_container::PolicyContainerBehavior;
use crate::behavior::policy_ou::PolicyOuBehavior;
use crate::behavior::NodeBehavior;
use crate::model::node::NodeType;
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

/// Behavior registration and lookup errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    DuplicateBehavior(NodeType),
    BehaviorNotFound(NodeType),
}

impl Display for RegistryError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DuplicateBehavior(node_type) => {
                write!(f, "behavior already registered for {node_type}")
            }
            Self::BehaviorNotFound(node_type) => {
                write!(f, "no behavior registered for {node_type}")
            }
        }
    }
}

impl Error for RegistryError {}

/// One behavior per node type.
#[derive(Default)]
pub struct BehaviorRegistry {
    behaviors: BTreeMap<NodeType, Arc<dyn NodeBehavior>>,
}

impl BehaviorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in behavior of every node type.
    pub fn with_defaults() -> Self {
        let mut behaviors: BTreeMap<NodeType, Arc<dyn NodeBehavior>> = BTreeMap::new();
        for behavior in [
            Arc::new(ObjectBehavior) as Arc<dyn NodeBehavior>,
            Arc::new(PolicyContainerBehavior),
            Arc::new(PolicyOuBehavior),
            Arc::new(PolicyBehavior),
            Arc::new(AllPoliciesBehavior),
        ] {
            behaviors.insert(behavior.node_type(), behavior);
        }
        Self { behaviors }
    }

    /// Registers the behavior for one node type.
    pub fn register(&mut self, behavior: Arc<dyn NodeBehavior>) -> Result<(), RegistryError> {
        let node_type = behavior.node_type();
        if self.behaviors.contains_key(&node_type) {
            return Err(RegistryError::DuplicateBehavior(node_type));
        }
        self.behaviors.insert(node_type, behavior);
        Ok(())
    }

    /// Replaces the behavior of a type, returning the previous one.
    pub fn replace(&mut self, behavior: Arc<dyn NodeBehavior>) -> Option<Arc<dyn NodeBehavior>> {
        self.behaviors.insert(behavior.node_type(), behavior)
    }

    pub fn behavior_for(&self, node_type: NodeType) -> Result<Arc<dyn NodeBehavior>, RegistryError> {
        self.behaviors
            .get(&node_type)
            .cloned()
            .ok_or(RegistryError::BehaviorNotFound(node_type))
    }

    /// Returns registered node types in order.
    pub fn node_types(&self) -> Vec<NodeType> {
        self.behaviors.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.behaviors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.behaviors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::{BehaviorRegistry, RegistryError};
    use crate::behavior::object::ObjectBehavior;
    use crate::model::node::NodeType;
    use std::sync::Arc;

    #[test]
    fn defaults_cover_every_node_type() {
        let registry = BehaviorRegistry::with_defaults();
        assert_eq!(registry.len(), 5);
        for node_type in [
            NodeType::DomainObject,
            NodeType::PolicyContainer,
            NodeType::Policy,
            NodeType::PolicyOrgUnit,
            NodeType::SyntheticFolder,
        ] {
            let behavior = registry
                .behavior_for(node_type)
                .expect("default behavior should exist");
            assert_eq!(behavior.node_type(), node_type);
        }
    }

    #[test]
    fn rejects_duplicate_registration() {
        let mut registry = BehaviorRegistry::new();
        registry
            .register(Arc::new(ObjectBehavior))
            .expect("first registration should succeed");
        let duplicate = registry.register(Arc::new(ObjectBehavior));
        assert_eq!(
            duplicate.err(),
            Some(RegistryError::DuplicateBehavior(NodeType::DomainObject))
        );
    }

    #[test]
    fn missing_behavior_is_an_error() {
        let registry = BehaviorRegistry::new();
        assert!(registry.is_empty());
        assert!(matches!(
            registry.behavior_for(NodeType::Policy),
            Err(RegistryError::BehaviorNotFound(NodeType::Policy))
        ));
    }
}
