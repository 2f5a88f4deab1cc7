//! # Path Tree
//!
//! All observed access paths, stored as a prefix-shared tree in an index
//! arena. Duplicate components share one node, every node remembers the
//! order in which its path was first observed, and ρ-relations are kept as
//! node-index pairs so that compression can refuse to erase paths whose
//! values participate in one.
//!
//! Nodes are never moved: removal (compression) detaches a subtree from its
//! parent's child groups and tombstones the slots, keeping `NodeId`s stable.

pub mod compress;

pub use compress::CompressionPolicy;

use std::collections::BTreeMap;

use crate::lattice::TypeTag;
use crate::path::{AccessPath, CallId, PathComponent};

/// Stable index of a node in the tree arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u32);

impl NodeId {
    fn index(self) -> usize {
        self.0 as usize
    }
}

/// A recorded ρ-relation: the value produced at `source` was later passed
/// back into the library at argument position `sink`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RhoRelation {
    pub source: NodeId,
    pub sink: NodeId,
}

/// 128-bit structural hash (see `compress`).
pub(crate) type StructuralHash = [u8; 16];

/// Children partitioned by the identity of their next component.
#[derive(Debug, Default)]
pub(crate) struct ChildSet {
    pub(crate) require: BTreeMap<String, NodeId>,
    pub(crate) access: BTreeMap<String, NodeId>,
    pub(crate) write: BTreeMap<String, NodeId>,
    pub(crate) calls: BTreeMap<CallId, NodeId>,
    pub(crate) news: BTreeMap<CallId, NodeId>,
    pub(crate) args: BTreeMap<CallId, BTreeMap<u32, NodeId>>,
}

impl ChildSet {
    fn get(&self, component: &PathComponent) -> Option<NodeId> {
        match component {
            PathComponent::Require { module_name } => self.require.get(module_name).copied(),
            PathComponent::AccessProp { prop_name } => self.access.get(prop_name).copied(),
            PathComponent::WriteProp { prop_name } => self.write.get(prop_name).copied(),
            PathComponent::Call { call_id } => self.calls.get(call_id).copied(),
            PathComponent::New { call_id } => self.news.get(call_id).copied(),
            PathComponent::Arg { call_id, arg_id } => {
                self.args.get(call_id).and_then(|by_arg| by_arg.get(arg_id)).copied()
            }
        }
    }

    fn insert(&mut self, component: &PathComponent, id: NodeId) {
        match component {
            PathComponent::Require { module_name } => {
                self.require.insert(module_name.clone(), id);
            }
            PathComponent::AccessProp { prop_name } => {
                self.access.insert(prop_name.clone(), id);
            }
            PathComponent::WriteProp { prop_name } => {
                self.write.insert(prop_name.clone(), id);
            }
            PathComponent::Call { call_id } => {
                self.calls.insert(call_id.clone(), id);
            }
            PathComponent::New { call_id } => {
                self.news.insert(call_id.clone(), id);
            }
            PathComponent::Arg { call_id, arg_id } => {
                self.args.entry(call_id.clone()).or_default().insert(*arg_id, id);
            }
        }
    }

    fn remove(&mut self, component: &PathComponent) {
        match component {
            PathComponent::Require { module_name } => {
                self.require.remove(module_name);
            }
            PathComponent::AccessProp { prop_name } => {
                self.access.remove(prop_name);
            }
            PathComponent::WriteProp { prop_name } => {
                self.write.remove(prop_name);
            }
            PathComponent::Call { call_id } => {
                self.calls.remove(call_id);
            }
            PathComponent::New { call_id } => {
                self.news.remove(call_id);
            }
            PathComponent::Arg { call_id, arg_id } => {
                if let Some(by_arg) = self.args.get_mut(call_id) {
                    by_arg.remove(arg_id);
                    if by_arg.is_empty() {
                        self.args.remove(call_id);
                    }
                }
            }
        }
    }

    /// All children, in deterministic group order.
    pub(crate) fn iter(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.require
            .values()
            .chain(self.access.values())
            .chain(self.write.values())
            .chain(self.calls.values())
            .chain(self.news.values())
            .copied()
            .chain(self.args.values().flat_map(|by_arg| by_arg.values().copied()))
    }
}

#[derive(Debug)]
pub(crate) struct PathNode {
    pub(crate) component: Option<PathComponent>,
    pub(crate) ty: Option<TypeTag>,
    pub(crate) order: Option<u64>,
    pub(crate) parent: Option<NodeId>,
    pub(crate) children: ChildSet,
    pub(crate) detached: bool,
    // Compression metadata.
    pub(crate) h_full: Option<StructuralHash>,
    pub(crate) h_no_args: Option<StructuralHash>,
    pub(crate) touches_rho: bool,
}

impl PathNode {
    fn fresh(component: Option<PathComponent>, parent: Option<NodeId>, order: Option<u64>) -> Self {
        PathNode {
            component,
            ty: None,
            order,
            parent,
            children: ChildSet::default(),
            detached: false,
            h_full: None,
            h_no_args: None,
            touches_rho: false,
        }
    }
}

/// The prefix tree of all observed access paths.
#[derive(Debug)]
pub struct PathTree {
    pub(crate) nodes: Vec<PathNode>,
    next_order: u64,
    pub(crate) rho: Vec<RhoRelation>,
}

impl PathTree {
    pub fn new() -> Self {
        PathTree {
            nodes: vec![PathNode::fresh(None, None, None)],
            next_order: 0,
            rho: Vec::new(),
        }
    }

    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    pub(crate) fn node(&self, id: NodeId) -> &PathNode {
        &self.nodes[id.index()]
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> &mut PathNode {
        &mut self.nodes[id.index()]
    }

    pub fn ty(&self, id: NodeId) -> Option<&TypeTag> {
        self.node(id).ty.as_ref()
    }

    pub fn order(&self, id: NodeId) -> Option<u64> {
        self.node(id).order
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).parent
    }

    pub fn component(&self, id: NodeId) -> Option<&PathComponent> {
        self.node(id).component.as_ref()
    }

    pub fn touches_rho(&self, id: NodeId) -> bool {
        self.node(id).touches_rho
    }

    /// Number of live (non-root, non-detached) nodes.
    pub fn len(&self) -> usize {
        self.nodes.iter().skip(1).filter(|n| !n.detached).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The child of `parent` labelled `component`, creating it if absent.
    /// Fresh nodes get the next observation order.
    pub fn child_for(&mut self, parent: NodeId, component: &PathComponent) -> NodeId {
        if let Some(existing) = self.node(parent).children.get(component) {
            return existing;
        }
        let order = self.next_order;
        self.next_order += 1;
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(PathNode::fresh(Some(component.clone()), Some(parent), Some(order)));
        self.node_mut(parent).children.insert(component, id);
        id
    }

    /// Record an observation: walk from the root creating one child per
    /// component, then store `ty` on the terminal node. First observation
    /// wins; re-recording an existing path changes nothing.
    pub fn record(&mut self, path: &AccessPath, ty: TypeTag) -> NodeId {
        let mut current = self.root();
        for component in path.components() {
            current = self.child_for(current, component);
        }
        let node = self.node_mut(current);
        if node.ty.is_none() {
            node.ty = Some(ty);
        }
        current
    }

    /// Locate the node for `path`, if it was observed.
    pub fn find(&self, path: &AccessPath) -> Option<NodeId> {
        let mut current = self.root();
        for component in path.components() {
            current = self.node(current).children.get(component)?;
        }
        Some(current)
    }

    /// Reconstruct the full access path ending at `id`.
    pub fn path_of(&self, id: NodeId) -> AccessPath {
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

    /// Register a ρ-relation between two already-recorded paths. The sticky
    /// `touches_rho` flag is raised on every node from each endpoint up to
    /// the root, which is what shields these subtrees from compression.
    pub fn add_rho(&mut self, source: &AccessPath, sink: &AccessPath) -> Option<RhoRelation> {
        let source_id = self.find(source)?;
        let sink_id = self.find(sink)?;
        let relation = RhoRelation { source: source_id, sink: sink_id };
        self.rho.push(relation);
        for endpoint in [source_id, sink_id] {
            let mut current = Some(endpoint);
            while let Some(id) = current {
                let node = self.node_mut(id);
                if node.touches_rho {
                    break;
                }
                node.touches_rho = true;
                current = node.parent;
            }
        }
        Some(relation)
    }

    pub fn rho_relations(&self) -> &[RhoRelation] {
        &self.rho
    }

    /// All recorded observations (path, type, order), ascending by order.
    pub fn observations(&self) -> Vec<(AccessPath, TypeTag, u64)> {
        let mut out: Vec<(AccessPath, TypeTag, u64)> = Vec::new();
        for (index, node) in self.nodes.iter().enumerate() {
            if node.detached || node.parent.is_none() {
                continue;
            }
            if let (Some(ty), Some(order)) = (&node.ty, node.order) {
                out.push((self.path_of(NodeId(index as u32)), ty.clone(), order));
            }
        }
        out.sort_by_key(|(_, _, order)| *order);
        out
    }

    /// Detach the subtree rooted at `id` from the tree.
    pub(crate) fn remove_subtree(&mut self, id: NodeId) {
        if let Some(parent) = self.node(id).parent {
            let component = self.node(id).component.clone();
            if let Some(component) = component {
                self.node_mut(parent).children.remove(&component);
            }
        }
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            stack.extend(self.node(current).children.iter());
            self.node_mut(current).detached = true;
        }
    }

    /// Reassign orders densely (rank-preserving) so that surviving
    /// observations map onto `[0, N)` after compression.
    pub(crate) fn renumber_orders(&mut self) {
        let mut live: Vec<usize> = (1..self.nodes.len())
            .filter(|&i| !self.nodes[i].detached && self.nodes[i].order.is_some())
            .collect();
        live.sort_by_key(|&i| self.nodes[i].order);
        for (rank, index) in live.iter().enumerate() {
            self.nodes[*index].order = Some(rank as u64);
        }
        self.next_order = live.len() as u64;
    }
}

impl Default for PathTree {
    fn default() -> Self {
        Self::new()
    }
}
