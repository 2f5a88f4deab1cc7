//! # Structural-Hash Compression
//!
//! Client programs (test suites especially) exercise the same library surface
//! over and over, so the tree fills with sibling `call` subtrees that differ
//! only in their fresh call identifiers. Compression computes two structural
//! hashes per node and collapses sibling call/new children that are
//! indistinguishable under the configured policy, unless a ρ-relation pins
//! them down.
//!
//! `h_full` covers the whole subtree shape; `h_noArgs` is the same hash with
//! every `arg` group excluded, i.e. shape modulo which arguments were
//! observed. Call identifiers are run-local random identity, not structure:
//! both hashes fold the call/new groups in as sorted multisets of child
//! hashes and the arg group as a sorted multiset of argId-keyed vectors.
//! A node's recorded type participates as its unrefined tag name, so subtrees
//! observed at different types never merge while literal-valued repeats
//! (a counter returning 1, then 2) still do.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;

use super::{NodeId, PathTree, StructuralHash};
use crate::path::CallId;

/// Which hash sibling calls are compared under.
///
/// `NoArgs` is the original behavior: calls that produced identical return
/// shapes collapse even when their argument subtrees differ. `Full` keeps
/// such siblings apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CompressionPolicy {
    NoArgs,
    Full,
}

impl Default for CompressionPolicy {
    fn default() -> Self {
        CompressionPolicy::NoArgs
    }
}

fn truncate(digest: impl AsRef<[u8]>) -> StructuralHash {
    let bytes = digest.as_ref();
    let mut out = [0u8; 16];
    out.copy_from_slice(&bytes[..16]);
    out
}

impl PathTree {
    /// Collapse structurally redundant sibling call/new subtrees, then
    /// renumber the surviving observation orders densely.
    pub fn compress(&mut self, policy: CompressionPolicy) {
        loop {
            self.compute_hashes();
            if !self.sweep(policy) {
                break;
            }
        }
        self.renumber_orders();
    }

    /// Bottom-up computation of `h_full` / `h_noArgs` for every live node.
    /// Explicit stack: observed trees can be deep.
    pub(crate) fn compute_hashes(&mut self) {
        let mut stack = vec![(self.root(), false)];
        while let Some((id, expanded)) = stack.pop() {
            if expanded {
                let (full, no_args) = self.hash_node(id);
                let node = self.node_mut(id);
                node.h_full = Some(full);
                node.h_no_args = Some(no_args);
            } else {
                stack.push((id, true));
                let children: Vec<NodeId> = self.node(id).children.iter().collect();
                for child in children {
                    stack.push((child, false));
                }
            }
        }
    }

    /// Hash one node from its children's cached hashes.
    fn hash_node(&self, id: NodeId) -> (StructuralHash, StructuralHash) {
        let node = self.node(id);
        let ty_name = node.ty.as_ref().map(|t| t.name()).unwrap_or("none");

        let named_groups = [
            ("require", &node.children.require),
            ("accessProp", &node.children.access),
            ("writeProp", &node.children.write),
        ];
        let call_groups = [("call", &node.children.calls), ("new", &node.children.news)];

        let mut full = Sha256::new();
        let mut no_args = Sha256::new();
        for hasher in [&mut full, &mut no_args] {
            hasher.update(b"ty:");
            hasher.update(ty_name.as_bytes());
        }

        for (tag, group) in named_groups {
            full.update(tag.as_bytes());
            no_args.update(tag.as_bytes());
            for (name, child) in group.iter() {
                let child_node = self.node(*child);
                full.update([0u8]);
                full.update(name.as_bytes());
                full.update(child_node.h_full.expect("child hashed before parent"));
                no_args.update([0u8]);
                no_args.update(name.as_bytes());
                no_args.update(child_node.h_no_args.expect("child hashed before parent"));
            }
        }

        // Call identifiers are excluded: sorted multisets of child hashes.
        for (tag, group) in call_groups {
            full.update(tag.as_bytes());
            no_args.update(tag.as_bytes());
            let mut full_hashes: Vec<StructuralHash> = Vec::with_capacity(group.len());
            let mut no_args_hashes: Vec<StructuralHash> = Vec::with_capacity(group.len());
            for child in group.values() {
                let child_node = self.node(*child);
                full_hashes.push(child_node.h_full.expect("child hashed before parent"));
                no_args_hashes.push(child_node.h_no_args.expect("child hashed before parent"));
            }
            full_hashes.sort_unstable();
            no_args_hashes.sort_unstable();
            for hash in full_hashes {
                full.update(hash);
            }
            for hash in no_args_hashes {
                no_args.update(hash);
            }
        }

        // The arg group enters h_full only, as a sorted multiset of
        // argId-keyed vectors (one vector per call site).
        full.update(b"arg");
        let mut per_call: Vec<Vec<u8>> = Vec::with_capacity(node.children.args.len());
        for by_arg in node.children.args.values() {
            let mut buf = Vec::new();
            for (arg_id, child) in by_arg.iter() {
                buf.extend_from_slice(&arg_id.to_le_bytes());
                buf.extend_from_slice(&self.node(*child).h_full.expect("child hashed before parent"));
            }
            per_call.push(buf);
        }
        per_call.sort_unstable();
        for buf in per_call {
            full.update(&buf);
        }

        (truncate(full.finalize()), truncate(no_args.finalize()))
    }

    /// One top-down collapse pass. Returns true if anything was removed.
    fn sweep(&mut self, policy: CompressionPolicy) -> bool {
        let mut changed = false;
        let mut stack = vec![self.root()];
        while let Some(id) = stack.pop() {
            while self.collapse_at(id, policy) {
                changed = true;
            }
            stack.extend(self.node(id).children.iter().collect::<Vec<_>>());
        }
        changed
    }

    /// Collapse one duplicate pair under `id`, if any. Returns true when a
    /// removal happened (the caller loops to a fixed point).
    fn collapse_at(&mut self, id: NodeId, policy: CompressionPolicy) -> bool {
        for group_is_new in [false, true] {
            let group = if group_is_new {
                &self.node(id).children.news
            } else {
                &self.node(id).children.calls
            };
            // Oldest sibling first, so the first observation survives.
            let mut siblings: Vec<(CallId, NodeId)> =
                group.iter().map(|(k, v)| (k.clone(), *v)).collect();
            siblings.sort_by_key(|(_, node)| self.node(*node).order);

            let mut representative: HashMap<StructuralHash, (CallId, NodeId)> = HashMap::new();
            for (call_id, node) in siblings {
                let key = match policy {
                    CompressionPolicy::NoArgs => {
                        self.node(node).h_no_args.expect("hashes computed before sweep")
                    }
                    CompressionPolicy::Full => self.site_hash(id, &call_id, node),
                };
                match representative.get(&key) {
                    None => {
                        representative.insert(key, (call_id, node));
                    }
                    Some((keeper_id, keeper)) => {
                        if self.node(*keeper).touches_rho
                            || self.node(node).touches_rho
                            || self.args_touch_rho(id, keeper_id)
                            || self.args_touch_rho(id, &call_id)
                        {
                            continue;
                        }
                        self.remove_call_site(id, &call_id, node);
                        self.recompute_upward(id);
                        return true;
                    }
                }
            }
        }
        false
    }

    /// Comparison key for the strict policy: the call child's full subtree
    /// hash combined with the argId-keyed vector of its sibling arg subtrees.
    /// The distinguishing argument evidence lives beside the call child, not
    /// inside it, so `h_full` alone would not see it.
    fn site_hash(&self, parent: NodeId, call_id: &CallId, child: NodeId) -> StructuralHash {
        let mut hasher = Sha256::new();
        hasher.update(self.node(child).h_full.expect("hashes computed before sweep"));
        if let Some(by_arg) = self.node(parent).children.args.get(call_id) {
            for (arg_id, arg_node) in by_arg.iter() {
                hasher.update(arg_id.to_le_bytes());
                hasher.update(self.node(*arg_node).h_full.expect("hashes computed before sweep"));
            }
        }
        truncate(hasher.finalize())
    }

    /// Whether any `arg(call_id, ·)` sibling under `parent` touches a ρ-relation.
    fn args_touch_rho(&self, parent: NodeId, call_id: &CallId) -> bool {
        self.node(parent)
            .children
            .args
            .get(call_id)
            .map(|by_arg| by_arg.values().any(|arg| self.node(*arg).touches_rho))
            .unwrap_or(false)
    }

    /// Remove a duplicate call/new child together with its arg siblings,
    /// keeping the representative's argument paths intact.
    fn remove_call_site(&mut self, parent: NodeId, call_id: &CallId, child: NodeId) {
        self.remove_subtree(child);
        let args: Vec<NodeId> = self
            .node(parent)
            .children
            .args
            .get(call_id)
            .map(|by_arg| by_arg.values().copied().collect())
            .unwrap_or_default();
        for arg in args {
            self.remove_subtree(arg);
        }
    }

    /// Re-hash `id` and every ancestor after a removal invalidated them.
    fn recompute_upward(&mut self, id: NodeId) {
        let mut current = Some(id);
        while let Some(node_id) = current {
            let (full, no_args) = self.hash_node(node_id);
            let node = self.node_mut(node_id);
            node.h_full = Some(full);
            node.h_no_args = Some(no_args);
            current = node.parent;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lattice::{LitValue, TypeTag};
    use crate::path::{AccessPath, PathComponent};

    fn access(prop: &str) -> PathComponent {
        PathComponent::AccessProp { prop_name: prop.to_string() }
    }

    fn call(id: &str) -> PathComponent {
        PathComponent::Call { call_id: CallId::from(id) }
    }

    fn arg(id: &str, n: u32) -> PathComponent {
        PathComponent::Arg { call_id: CallId::from(id), arg_id: n }
    }

    /// require(lib).inc called twice, returning 1 and then 2.
    fn counter_tree() -> PathTree {
        let mut tree = PathTree::new();
        let root = AccessPath::require("lib");
        let inc = root.extend(access("inc"));
        tree.record(&root, TypeTag::Object);
        tree.record(&inc, TypeTag::Function);
        tree.record(&inc.extend(call("aaaaa1")), TypeTag::Literal(LitValue::Num(1.0)));
        tree.record(&inc.extend(call("aaaaa2")), TypeTag::Literal(LitValue::Num(2.0)));
        tree
    }

    #[test]
    fn test_identical_sibling_calls_collapse() {
        let mut tree = counter_tree();
        assert_eq!(tree.len(), 4);
        tree.compress(CompressionPolicy::NoArgs);
        // One call survives, the first observed.
        assert_eq!(tree.len(), 3);
        let observations = tree.observations();
        let last = &observations[observations.len() - 1];
        assert_eq!(last.0.to_string(), "require(lib).inc.call(aaaaa1)");
        assert_eq!(last.1, TypeTag::Literal(LitValue::Num(1.0)));
    }

    #[test]
    fn test_compression_renumbers_orders_densely() {
        let mut tree = counter_tree();
        tree.compress(CompressionPolicy::NoArgs);
        let orders: Vec<u64> = tree.observations().iter().map(|(_, _, o)| *o).collect();
        assert_eq!(orders, vec![0, 1, 2]);
    }

    #[test]
    fn test_calls_with_different_return_types_do_not_collapse() {
        let mut tree = PathTree::new();
        let inc = AccessPath::require("lib").extend(access("inc"));
        tree.record(&AccessPath::require("lib"), TypeTag::Object);
        tree.record(&inc, TypeTag::Function);
        tree.record(&inc.extend(call("aaaaa1")), TypeTag::Literal(LitValue::Num(1.0)));
        tree.record(&inc.extend(call("aaaaa2")), TypeTag::Literal(LitValue::Str("one".into())));
        tree.compress(CompressionPolicy::NoArgs);
        assert_eq!(tree.len(), 4);
    }

    #[test]
    fn test_rho_participation_blocks_collapse() {
        let mut tree = counter_tree();
        let inc = AccessPath::require("lib").extend(access("inc"));
        let second = inc.extend(call("aaaaa2"));
        tree.add_rho(&inc, &second).unwrap();
        tree.compress(CompressionPolicy::NoArgs);
        // Both calls survive: the second participates in a ρ-relation.
        assert_eq!(tree.len(), 4);
    }

    #[test]
    fn test_no_args_policy_ignores_argument_differences() {
        let mut tree = PathTree::new();
        let f = AccessPath::require("lib").extend(access("f"));
        tree.record(&AccessPath::require("lib"), TypeTag::Object);
        tree.record(&f, TypeTag::Function);
        tree.record(&f.extend(arg("aaaaa1", 0)), TypeTag::Number);
        tree.record(&f.extend(call("aaaaa1")), TypeTag::Literal(LitValue::Bool(true)));
        tree.record(&f.extend(arg("aaaaa2", 0)), TypeTag::String);
        tree.record(&f.extend(call("aaaaa2")), TypeTag::Literal(LitValue::Bool(true)));

        let mut strict = PathTree::new();
        strict.record(&AccessPath::require("lib"), TypeTag::Object);
        strict.record(&f, TypeTag::Function);
        strict.record(&f.extend(arg("aaaaa1", 0)), TypeTag::Number);
        strict.record(&f.extend(call("aaaaa1")), TypeTag::Literal(LitValue::Bool(true)));
        strict.record(&f.extend(arg("aaaaa2", 0)), TypeTag::String);
        strict.record(&f.extend(call("aaaaa2")), TypeTag::Literal(LitValue::Bool(true)));

        tree.compress(CompressionPolicy::NoArgs);
        // Second call and its arg sibling both go.
        assert_eq!(tree.len(), 4);
        assert!(tree.find(&f.extend(arg("aaaaa2", 0))).is_none());
        assert!(tree.find(&f.extend(arg("aaaaa1", 0))).is_some());

        strict.compress(CompressionPolicy::Full);
        // Different argument shapes keep both call sites under the strict policy.
        assert_eq!(strict.len(), 6);
    }

    #[test]
    fn test_hashes_are_deterministic_across_runs() {
        let mut a = counter_tree();
        let mut b = counter_tree();
        a.compute_hashes();
        b.compute_hashes();
        let root_a = a.node(a.root()).h_full;
        let root_b = b.node(b.root()).h_full;
        assert_eq!(root_a, root_b);
        assert!(root_a.is_some());
    }

    #[test]
    fn test_no_h_no_args_duplicates_survive_without_rho() {
        let mut tree = counter_tree();
        tree.compress(CompressionPolicy::NoArgs);
        tree.compute_hashes();
        let inc = AccessPath::require("lib").extend(access("inc"));
        let parent = tree.find(&inc).unwrap();
        let hashes: Vec<_> = tree
            .node(parent)
            .children
            .calls
            .values()
            .map(|c| tree.node(*c).h_no_args.unwrap())
            .collect();
        let mut deduped = hashes.clone();
        deduped.sort_unstable();
        deduped.dedup();
        assert_eq!(hashes.len(), deduped.len());
    }
}
