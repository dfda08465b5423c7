//! `NodeRegistry`: string / id / language-type lookup over registered
//! `NodeType`s (§4.2, grounded on `NodeTypeRegistry.cpp`).

use std::any::TypeId;
use std::collections::HashMap;

use super::{NodeBehavior, NodeType};
use crate::error::{GraphError, GraphResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeTypeId(pub u32);

#[derive(Default)]
pub struct NodeRegistry {
    types: HashMap<NodeTypeId, NodeType>,
    by_name: HashMap<String, NodeTypeId>,
    by_lang_type: HashMap<TypeId, NodeTypeId>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        NodeRegistry::default()
    }

    /// Register a node type. Idempotent-by-duplicate-rejection: registering
    /// the same `(type_id, type_name)` twice is an error (§4.2: "rejects
    /// duplicate registrations").
    pub fn register(&mut self, node_type: NodeType) -> GraphResult<()> {
        if self.types.contains_key(&node_type.type_id) {
            return Err(GraphError::DuplicateRegistration(format!(
                "node type id {:?} already registered",
                node_type.type_id
            )));
        }
        if self.by_name.contains_key(&node_type.type_name) {
            return Err(GraphError::DuplicateRegistration(format!(
                "node type name {:?} already registered",
                node_type.type_name
            )));
        }
        let id = node_type.type_id;
        let name = node_type.type_name.clone();
        let lang = node_type.lang_type_id;
        self.types.insert(id, node_type);
        self.by_name.insert(name, id);
        if let Some(lang_id) = lang {
            self.by_lang_type.insert(lang_id, id);
        }
        log::info!(target: "rendergraph::registry", "registered node type {id:?}");
        Ok(())
    }

    pub fn by_id(&self, id: NodeTypeId) -> Option<&NodeType> {
        self.types.get(&id)
    }

    pub fn by_name(&self, name: &str) -> Option<&NodeType> {
        self.by_name.get(name).and_then(|id| self.types.get(id))
    }

    pub fn by_lang_type<T: NodeBehavior + 'static>(&self) -> Option<&NodeType> {
        self.by_lang_type
            .get(&TypeId::of::<T>())
            .and_then(|id| self.types.get(id))
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}
