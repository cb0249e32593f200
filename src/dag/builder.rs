//! Graph builder for constructing dependency graphs from components.
//!
//! The builder takes parsed components and constructs a directed graph that
//! the validator can order. Reference errors are caught here; cycles are left
//! to the validator so they can be reported with their exact path.

use crate::component::{Component, SpecDocument, SpecMetadata};
use crate::errors::ParseError;
use std::collections::HashMap;

/// Index into the component list (declaration order).
pub type ComponentIndex = usize;

/// A directed graph of components.
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    /// Components in declaration order
    components: Vec<Component>,
    /// Map from component id to index
    index_map: HashMap<String, ComponentIndex>,
    /// Forward edges: index -> components that depend on it
    forward_edges: Vec<Vec<ComponentIndex>>,
    /// Reverse edges: index -> components it depends on, in declared order
    reverse_edges: Vec<Vec<ComponentIndex>>,
    metadata: SpecMetadata,
    source_hash: String,
}

impl DependencyGraph {
    /// Get the number of components in the graph.
    pub fn len(&self) -> usize {
        self.components.len()
    }

    /// Check if the graph is empty.
    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    pub fn get(&self, index: ComponentIndex) -> Option<&Component> {
        self.components.get(index)
    }

    pub fn get_by_id(&self, id: &str) -> Option<&Component> {
        self.index_map.get(id).and_then(|&i| self.components.get(i))
    }

    pub fn index_of(&self, id: &str) -> Option<ComponentIndex> {
        self.index_map.get(id).copied()
    }

    /// All components in declaration order.
    pub fn components(&self) -> &[Component] {
        &self.components
    }

    pub fn metadata(&self) -> &SpecMetadata {
        &self.metadata
    }

    /// SHA-256 of the spec text this graph was parsed from.
    pub fn source_hash(&self) -> &str {
        &self.source_hash
    }

    /// Components that depend on the given component (forward edges).
    pub fn dependents(&self, index: ComponentIndex) -> &[ComponentIndex] {
        self.forward_edges.get(index).map_or(&[], |v| v.as_slice())
    }

    /// Components the given component depends on (reverse edges).
    pub fn dependencies(&self, index: ComponentIndex) -> &[ComponentIndex] {
        self.reverse_edges.get(index).map_or(&[], |v| v.as_slice())
    }

}

/// Builder for constructing dependency graphs.
pub struct GraphBuilder {
    components: Vec<Component>,
    metadata: SpecMetadata,
    source_hash: String,
}

impl GraphBuilder {
    pub fn new(components: Vec<Component>) -> Self {
        Self {
            components,
            metadata: SpecMetadata::default(),
            source_hash: String::new(),
        }
    }

    /// Start from a parsed document, carrying its metadata and source hash.
    pub fn from_document(document: SpecDocument) -> Self {
        Self {
            components: document.components,
            metadata: document.metadata,
            source_hash: document.source_hash,
        }
    }

    /// Build the graph.
    ///
    /// Validates references:
    /// - Component ids must be unique
    /// - No component may depend on itself
    /// - Every dependency must name an existing component
    pub fn build(self) -> Result<DependencyGraph, ParseError> {
        let mut index_map = HashMap::new();
        for (i, component) in self.components.iter().enumerate() {
            if index_map.contains_key(&component.id) {
                return Err(ParseError::DuplicateId {
                    id: component.id.clone(),
                });
            }
            index_map.insert(component.id.clone(), i);
        }

        let mut forward_edges: Vec<Vec<ComponentIndex>> = vec![Vec::new(); self.components.len()];
        let mut reverse_edges: Vec<Vec<ComponentIndex>> = vec![Vec::new(); self.components.len()];

        for (to_idx, component) in self.components.iter().enumerate() {
            for dep in &component.depends_on {
                if dep == &component.id {
                    return Err(ParseError::SelfDependency {
                        id: component.id.clone(),
                    });
                }
                let from_idx =
                    *index_map
                        .get(dep)
                        .ok_or_else(|| ParseError::UnknownDependency {
                            component: component.id.clone(),
                            dependency: dep.clone(),
                        })?;

                // Repeated declarations of the same dependency collapse to one edge
                if reverse_edges[to_idx].contains(&from_idx) {
                    continue;
                }
                forward_edges[from_idx].push(to_idx);
                reverse_edges[to_idx].push(from_idx);
            }
        }

        Ok(DependencyGraph {
            components: self.components,
            index_map,
            forward_edges,
            reverse_edges,
            metadata: self.metadata,
            source_hash: self.source_hash,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn component(id: &str, deps: Vec<&str>) -> Component {
        Component::new(
            id,
            &format!("src/{}.rs", id),
            deps.into_iter().map(String::from).collect(),
        )
    }

    #[test]
    fn test_build_simple_graph() {
        let components = vec![
            component("A", vec![]),
            component("B", vec!["A"]),
            component("C", vec!["A"]),
            component("D", vec!["B", "C"]),
        ];

        let graph = GraphBuilder::new(components).build().unwrap();

        assert_eq!(graph.len(), 4);
        assert!(graph.dependencies(0).is_empty());
        assert_eq!(graph.dependencies(3), &[1, 2]);
        assert_eq!(graph.dependents(0), &[1, 2]);
    }

    #[test]
    fn test_missing_dependency() {
        let result = GraphBuilder::new(vec![component("A", vec!["ghost"])]).build();
        assert_eq!(
            result.unwrap_err(),
            ParseError::UnknownDependency {
                component: "A".into(),
                dependency: "ghost".into(),
            }
        );
    }

    #[test]
    fn test_duplicate_id() {
        let result =
            GraphBuilder::new(vec![component("A", vec![]), component("A", vec![])]).build();
        assert!(matches!(result.unwrap_err(), ParseError::DuplicateId { .. }));
    }

    #[test]
    fn test_self_dependency() {
        let result = GraphBuilder::new(vec![component("A", vec!["A"])]).build();
        assert_eq!(
            result.unwrap_err(),
            ParseError::SelfDependency { id: "A".into() }
        );
    }

    #[test]
    fn test_repeated_dependency_collapses() {
        let graph = GraphBuilder::new(vec![component("A", vec![]), component("B", vec!["A", "A"])])
            .build()
            .unwrap();
        assert_eq!(graph.dependencies(1), &[0]);
        assert_eq!(graph.dependents(0), &[1]);
    }

    #[test]
    fn test_cycles_are_left_to_the_validator() {
        let graph = GraphBuilder::new(vec![component("A", vec!["B"]), component("B", vec!["A"])])
            .build();
        assert!(graph.is_ok());
    }

    #[test]
    fn test_empty_graph() {
        let graph = GraphBuilder::new(vec![]).build().unwrap();
        assert!(graph.is_empty());
    }
}
