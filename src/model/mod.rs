//! # Model Tree
//!
//! The replay-side mirror of a persisted model: an arena tree with
//! order-sorted child lists and the mutable per-node replay state
//! (`processed`, `empty`, `obj`). ρ-relations are dereferenced into node
//! index pairs while building; an endpoint that names a path absent from the
//! model is corruption and fatal.

use thiserror::Error;

use crate::lattice::TypeTag;
use crate::path::{AccessPath, PathComponent};
use crate::storage::ModelFile;
use crate::value::Value;

/// Model reconstruction failures.
#[derive(Error, Debug)]
pub enum ModelError {
    #[error("ρ-relation endpoint not present in model paths: {path}")]
    DanglingRho { path: String },
}

/// Stable index of a node in the model arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModelNodeId(u32);

impl ModelNodeId {
    fn index(self) -> usize {
        self.0 as usize
    }
}

/// One model node plus its replay state.
#[derive(Debug)]
pub struct ModelNode {
    pub component: Option<PathComponent>,
    pub ty: Option<TypeTag>,
    pub order: Option<u64>,
    pub parent: Option<ModelNodeId>,
    /// Sorted ascending by observation order.
    pub children: Vec<ModelNodeId>,
    /// True when a proper ancestor is an `arg` or `writeProp` node: the
    /// subtree belongs to the synthesizer, not the traversal driver.
    pub synth_territory: bool,
    pub processed: bool,
    pub empty: bool,
    pub obj: Option<Value>,
}

impl ModelNode {
    fn fresh(component: Option<PathComponent>, parent: Option<ModelNodeId>) -> Self {
        ModelNode {
            component,
            ty: None,
            order: None,
            parent,
            children: Vec::new(),
            synth_territory: false,
            processed: false,
            empty: false,
            obj: None,
        }
    }
}

/// The reconstructed model tree.
#[derive(Debug)]
pub struct ModelTree {
    nodes: Vec<ModelNode>,
    rho: Vec<(ModelNodeId, ModelNodeId)>,
}

impl ModelTree {
    /// Rebuild the tree from its persisted form.
    pub fn build(model: &ModelFile) -> Result<Self, ModelError> {
        let mut tree =
            ModelTree { nodes: vec![ModelNode::fresh(None, None)], rho: Vec::new() };

        for record in &model.paths {
            let mut current = tree.root();
            for component in record.path.components() {
                current = tree.child_for(current, component);
            }
            let node = tree.node_mut(current);
            if node.ty.is_none() {
                node.ty = Some(record.ty.clone());
            }
            if node.order.is_none() {
                node.order = Some(record.order);
            }
        }

        // Children in observation order; unordered intermediates sink last.
        for index in 0..tree.nodes.len() {
            let mut children = std::mem::take(&mut tree.nodes[index].children);
            children.sort_by_key(|c| (tree.node(*c).order.is_none(), tree.node(*c).order));
            tree.nodes[index].children = children;
        }

        // Synthesizer territory: below any arg/writeProp node.
        let mut stack = vec![tree.root()];
        while let Some(id) = stack.pop() {
            let owns_subtree = tree.node(id).synth_territory
                || matches!(
                    tree.node(id).component,
                    Some(PathComponent::Arg { .. }) | Some(PathComponent::WriteProp { .. })
                );
            let children = tree.node(id).children.clone();
            for child in children {
                tree.node_mut(child).synth_territory = owns_subtree;
                stack.push(child);
            }
        }

        for (source, sink) in &model.rho_relations {
            let source_id = tree.find(source).ok_or_else(|| ModelError::DanglingRho {
                path: source.to_string(),
            })?;
            let sink_id = tree
                .find(sink)
                .ok_or_else(|| ModelError::DanglingRho { path: sink.to_string() })?;
            tree.rho.push((source_id, sink_id));
        }

        Ok(tree)
    }

    pub fn root(&self) -> ModelNodeId {
        ModelNodeId(0)
    }

    pub fn node(&self, id: ModelNodeId) -> &ModelNode {
        &self.nodes[id.index()]
    }

    pub fn node_mut(&mut self, id: ModelNodeId) -> &mut ModelNode {
        &mut self.nodes[id.index()]
    }

    pub fn len(&self) -> usize {
        self.nodes.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn rho(&self) -> &[(ModelNodeId, ModelNodeId)] {
        &self.rho
    }

    /// All node ids, root excluded.
    pub fn ids(&self) -> impl Iterator<Item = ModelNodeId> {
        (1..self.nodes.len() as u32).map(ModelNodeId)
    }

    fn child_for(&mut self, parent: ModelNodeId, component: &PathComponent) -> ModelNodeId {
        let existing = self
            .node(parent)
            .children
            .iter()
            .find(|c| self.node(**c).component.as_ref() == Some(component))
            .copied();
        if let Some(existing) = existing {
            return existing;
        }
        let id = ModelNodeId(self.nodes.len() as u32);
        self.nodes.push(ModelNode::fresh(Some(component.clone()), Some(parent)));
        self.node_mut(parent).children.push(id);
        id
    }

    pub fn find(&self, path: &AccessPath) -> Option<ModelNodeId> {
        let mut current = self.root();
        'walk: for component in path.components() {
            for child in &self.node(current).children {
                if self.node(*child).component.as_ref() == Some(component) {
                    current = *child;
                    continue 'walk;
                }
            }
            return None;
        }
        Some(current)
    }

    /// Reconstruct the access path ending at `id`.
    pub fn path_of(&self, id: ModelNodeId) -> AccessPath {
        let mut components = Vec::new();
        let mut current = Some(id);
        while let Some(node_id) = current {
            let node = self.node(node_id);
            if let Some(component) = &node.component {
                components.push(component.clone());
            }
            current = node.parent;
        }
        components.reverse();
        AccessPath::from_components(components)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::PathRecord;

    fn record(path: AccessPath, ty: TypeTag, order: u64) -> PathRecord {
        PathRecord { path, ty, order }
    }

    fn access(prop: &str) -> PathComponent {
        PathComponent::AccessProp { prop_name: prop.to_string() }
    }

    fn sample_model() -> ModelFile {
        let root = AccessPath::require("lib");
        let f = root.extend(access("f"));
        let arg = f.extend(PathComponent::Arg { call_id: "c1c1c1".into(), arg_id: 0 });
        let call = f.extend(PathComponent::Call { call_id: "c1c1c1".into() });
        ModelFile {
            paths: vec![
                record(root, TypeTag::Object, 0),
                record(f, TypeTag::Function, 1),
                record(arg.clone(), TypeTag::Function, 2),
                record(call, TypeTag::Undefined, 3),
                record(arg.extend(access("cb")), TypeTag::Function, 4),
            ],
            rho_relations: Vec::new(),
        }
    }

    #[test]
    fn test_build_links_parents_and_sorts_children() {
        let tree = ModelTree::build(&sample_model()).unwrap();
        assert_eq!(tree.len(), 5);
        let root = tree.node(tree.root());
        assert_eq!(root.children.len(), 1);
        let require = tree.node(root.children[0]);
        assert_eq!(require.ty, Some(TypeTag::Object));
        let f = tree.node(require.children[0]);
        assert_eq!(f.children.len(), 2);
        // arg (order 2) sorts before call (order 3).
        let orders: Vec<Option<u64>> =
            f.children.iter().map(|c| tree.node(*c).order).collect();
        assert_eq!(orders, vec![Some(2), Some(3)]);
    }

    #[test]
    fn test_synth_territory_flags() {
        let tree = ModelTree::build(&sample_model()).unwrap();
        let root = AccessPath::require("lib");
        let f = root.extend(access("f"));
        let arg = f.extend(PathComponent::Arg { call_id: "c1c1c1".into(), arg_id: 0 });
        let under_arg = arg.extend(access("cb"));

        assert!(!tree.node(tree.find(&f).unwrap()).synth_territory);
        // The arg node itself is driver territory; its children are not.
        assert!(!tree.node(tree.find(&arg).unwrap()).synth_territory);
        assert!(tree.node(tree.find(&under_arg).unwrap()).synth_territory);
    }

    #[test]
    fn test_dangling_rho_is_fatal() {
        let mut model = sample_model();
        let ghost = AccessPath::require("lib").extend(access("ghost"));
        model.rho_relations.push((ghost.clone(), ghost));
        assert!(matches!(
            ModelTree::build(&model),
            Err(ModelError::DanglingRho { .. })
        ));
    }

    #[test]
    fn test_find_and_path_of_are_inverse() {
        let tree = ModelTree::build(&sample_model()).unwrap();
        for record in &sample_model().paths {
            let id = tree.find(&record.path).unwrap();
            assert_eq!(tree.path_of(id), record.path);
        }
    }
}
