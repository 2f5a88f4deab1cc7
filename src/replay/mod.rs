//! # Replayer
//!
//! Drives a demand-ordered traversal of the model tree against a (possibly
//! new) library version. Covariant sites are re-observed and checked for
//! compatibility against the recorded types; contravariant sites are
//! materialized on demand by the synthesizer. The driver owns every node
//! whose ancestors contain no `arg`/`writeProp` component; anything deeper is
//! touched only if the new library actually reaches for it.
//!
//! Incompatibilities are reported as breaking paths (structured warnings and
//! a collected report), never as failures: the point of a check run is to
//! come back with the full list.

pub mod synth;

use serde::Serialize;
use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use thiserror::Error;
use tracing::{debug, warn};

use crate::bridge::{BridgeError, HostBridge};
use crate::lattice::{classify, compatible, TypeTag};
use crate::model::{ModelError, ModelNodeId, ModelTree};
use crate::path::{PathComponent, Variance};
use crate::storage::ModelFile;
use crate::value::{PropKey, Value};

/// Replay failures that prevent the check from running at all. Library
/// incompatibilities are [`Breakage`]s, not errors.
#[derive(Error, Debug)]
pub enum ReplayError {
    #[error(transparent)]
    Model(#[from] ModelError),

    #[error("failed to load module '{module}': {source}")]
    Load { module: String, source: BridgeError },
}

/// One detected incompatibility between the model and the new library.
#[derive(Debug, Clone, Serialize)]
pub struct Breakage {
    pub path: String,
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actual: Option<TypeTag>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub required: Option<TypeTag>,
}

pub(crate) struct ReplayCtx {
    pub(crate) tree: ModelTree,
    pub(crate) breakages: Vec<Breakage>,
}

/// Emit one breaking-path warning and collect it into the report.
pub(crate) fn report_breakage(
    ctx: &Rc<RefCell<ReplayCtx>>,
    path: String,
    reason: &str,
    actual: Option<TypeTag>,
    required: Option<TypeTag>,
) {
    let actual_name = actual.as_ref().map(|t| t.to_string()).unwrap_or_else(|| "-".into());
    let required_name = required.as_ref().map(|t| t.to_string()).unwrap_or_else(|| "-".into());
    warn!(
        breaking_path = %path,
        actual = %actual_name,
        required = %required_name,
        reason,
        "breaking_path"
    );
    ctx.borrow_mut().breakages.push(Breakage { path, reason: reason.to_string(), actual, required });
}

/// The replay driver.
pub struct Replayer {
    ctx: Rc<RefCell<ReplayCtx>>,
    bridge: Rc<HostBridge>,
    root_dir: PathBuf,
    library_override: Option<String>,
}

impl Replayer {
    /// Reconstruct the model tree and prepare a replay against the library
    /// resolvable from `root_dir` (optionally under a different name).
    pub fn new(
        model: &ModelFile,
        bridge: Rc<HostBridge>,
        root_dir: &Path,
        library_override: Option<String>,
    ) -> Result<Self, ReplayError> {
        let mut tree = ModelTree::build(model)?;
        let root = tree.root();
        tree.node_mut(root).processed = true;
        Ok(Replayer {
            ctx: Rc::new(RefCell::new(ReplayCtx { tree, breakages: Vec::new() })),
            bridge,
            root_dir: root_dir.to_path_buf(),
            library_override,
        })
    }

    /// Run the traversal to completion and return the detected breakages.
    pub fn run(&self) -> Result<Vec<Breakage>, ReplayError> {
        while let Some(next) = self.next_ready() {
            self.process(next)?;
        }
        Ok(self.ctx.borrow().breakages.clone())
    }

    /// The unprocessed driver-territory node with the lowest observation
    /// order whose parent has been processed. Ascending order globally
    /// reproduces the phase-1 observation sequence.
    fn next_ready(&self) -> Option<ModelNodeId> {
        let ctx = self.ctx.borrow();
        ctx.tree
            .ids()
            .filter(|id| {
                let node = ctx.tree.node(*id);
                !node.processed
                    && !node.synth_territory
                    && node.parent.map(|p| ctx.tree.node(p).processed).unwrap_or(false)
            })
            .min_by_key(|id| ctx.tree.node(*id).order)
    }

    /// Process `id` and any unprocessed ancestors first (ρ-relation sources
    /// may be reached out of order).
    fn ensure_processed(&self, id: ModelNodeId) -> Result<(), ReplayError> {
        let mut chain = Vec::new();
        {
            let ctx = self.ctx.borrow();
            let mut current = Some(id);
            while let Some(node_id) = current {
                let node = ctx.tree.node(node_id);
                if node.processed {
                    break;
                }
                chain.push(node_id);
                current = node.parent;
            }
        }
        for node_id in chain.into_iter().rev() {
            let in_synth_territory = self.ctx.borrow().tree.node(node_id).synth_territory;
            if in_synth_territory {
                synth::synthesize(&self.ctx, node_id);
            } else {
                self.process(node_id)?;
            }
        }
        Ok(())
    }

    fn process(&self, id: ModelNodeId) -> Result<(), ReplayError> {
        let component = {
            let ctx = self.ctx.borrow();
            let node = ctx.tree.node(id);
            if node.processed {
                return Ok(());
            }
            node.component.clone().expect("root is pre-processed")
        };
        debug!(path = %self.path_string(id), "replay_visit");
        match component {
            PathComponent::Require { module_name } => self.process_require(id, &module_name),
            PathComponent::AccessProp { prop_name } => {
                self.process_access(id, &prop_name);
                Ok(())
            }
            PathComponent::WriteProp { prop_name } => {
                self.process_write(id, &prop_name);
                Ok(())
            }
            PathComponent::Arg { .. } => self.process_arg(id),
            PathComponent::Call { call_id } => {
                self.process_invoke(id, &call_id, false);
                Ok(())
            }
            PathComponent::New { call_id } => {
                self.process_invoke(id, &call_id, true);
                Ok(())
            }
        }
    }

    fn path_string(&self, id: ModelNodeId) -> String {
        self.ctx.borrow().tree.path_of(id).to_string()
    }

    fn mark_processed(&self, id: ModelNodeId, obj: Option<Value>) {
        let mut ctx = self.ctx.borrow_mut();
        let node = ctx.tree.node_mut(id);
        node.processed = true;
        if obj.is_some() {
            node.obj = obj;
        }
    }

    /// Covariant compatibility check with breakage reporting.
    fn check_type(&self, id: ModelNodeId, actual: &TypeTag) {
        let required = self.ctx.borrow().tree.node(id).ty.clone();
        let ok = required.as_ref().map(|req| compatible(actual, req)).unwrap_or(true);
        if !ok {
            report_breakage(
                &self.ctx,
                self.path_string(id),
                "type incompatible with model",
                Some(actual.clone()),
                required,
            );
        }
    }

    fn process_require(&self, id: ModelNodeId, module_name: &str) -> Result<(), ReplayError> {
        let spec = self.library_override.as_deref().unwrap_or(module_name).to_string();
        let value = HostBridge::load_raw(&self.bridge, &spec, &self.root_dir)
            .map_err(|source| ReplayError::Load { module: spec.clone(), source })?;
        let actual = classify(&value, Variance::Covariant);
        self.check_type(id, &actual);
        self.mark_processed(id, Some(value));
        Ok(())
    }

    /// Parent's stored object, or `None` when the parent is empty/undefined.
    fn parent_object(&self, id: ModelNodeId) -> Option<Value> {
        let ctx = self.ctx.borrow();
        let parent = ctx.tree.node(id).parent?;
        let parent_node = ctx.tree.node(parent);
        if parent_node.empty {
            return None;
        }
        match &parent_node.obj {
            None | Some(Value::Undefined) => None,
            Some(value) => Some(value.clone()),
        }
    }

    fn process_access(&self, id: ModelNodeId, prop_name: &str) {
        let Some(parent_obj) = self.parent_object(id) else {
            self.ctx.borrow_mut().tree.node_mut(id).empty = true;
            let required = self.ctx.borrow().tree.node(id).ty.clone();
            report_breakage(
                &self.ctx,
                self.path_string(id),
                "get property of undefined",
                None,
                required,
            );
            self.mark_processed(id, None);
            return;
        };
        match parent_obj.get(&PropKey::name(prop_name)) {
            Ok(value) => {
                let actual = classify(&value, Variance::Covariant);
                self.check_type(id, &actual);
                self.mark_processed(id, Some(value));
            }
            Err(error) => {
                warn!(path = %self.path_string(id), error = %error, "replay_read_failed");
                self.mark_processed(id, None);
            }
        }
    }

    fn process_write(&self, id: ModelNodeId, prop_name: &str) {
        let value = synth::synthesize(&self.ctx, id);
        match self.parent_object(id) {
            Some(parent_obj) => {
                if let Err(error) = parent_obj.set(&PropKey::name(prop_name), value.clone()) {
                    warn!(path = %self.path_string(id), error = %error, "replay_write_failed");
                }
            }
            None => {
                report_breakage(
                    &self.ctx,
                    self.path_string(id),
                    "set property of undefined",
                    None,
                    None,
                );
            }
        }
        self.mark_processed(id, Some(value));
    }

    fn process_arg(&self, id: ModelNodeId) -> Result<(), ReplayError> {
        let source = self
            .ctx
            .borrow()
            .tree
            .rho()
            .iter()
            .find(|(_, sink)| *sink == id)
            .map(|(source, _)| *source);
        if let Some(source) = source {
            // The model asserts identity: reuse the value reconstructed at
            // the source path.
            self.ensure_processed(source)?;
            let obj = self.ctx.borrow().tree.node(source).obj.clone();
            self.mark_processed(id, Some(obj.unwrap_or(Value::Undefined)));
        } else {
            let value = synth::synthesize(&self.ctx, id);
            self.mark_processed(id, Some(value));
        }
        Ok(())
    }

    fn process_invoke(&self, id: ModelNodeId, call_id: &crate::path::CallId, is_new: bool) {
        let Some(callee) = self.parent_object(id) else {
            let required = self.ctx.borrow().tree.node(id).ty.clone();
            report_breakage(
                &self.ctx,
                self.path_string(id),
                if is_new { "construct of undefined" } else { "call of undefined" },
                None,
                required,
            );
            let mut ctx = self.ctx.borrow_mut();
            let node = ctx.tree.node_mut(id);
            node.empty = true;
            node.processed = true;
            return;
        };

        // Dense positional arguments from the already-processed arg siblings
        // of this call site, plus the method receiver if the callee was read
        // off an object.
        let (args, receiver) = {
            let ctx = self.ctx.borrow();
            let node = ctx.tree.node(id);
            let parent = node.parent.expect("invoke nodes have parents");
            let parent_node = ctx.tree.node(parent);

            let mut indexed: Vec<(u32, Value)> = parent_node
                .children
                .iter()
                .filter_map(|sibling| {
                    let sibling_node = ctx.tree.node(*sibling);
                    match &sibling_node.component {
                        Some(PathComponent::Arg { call_id: cid, arg_id })
                            if cid == call_id && sibling_node.processed =>
                        {
                            Some((*arg_id, sibling_node.obj.clone().unwrap_or(Value::Undefined)))
                        }
                        _ => None,
                    }
                })
                .collect();
            indexed.sort_by_key(|(arg_id, _)| *arg_id);
            let arity = indexed.iter().map(|(i, _)| *i as usize + 1).max().unwrap_or(0);
            let mut args = vec![Value::Undefined; arity];
            for (arg_id, value) in indexed {
                args[arg_id as usize] = value;
            }

            let receiver = match &parent_node.component {
                Some(PathComponent::AccessProp { .. }) => parent_node
                    .parent
                    .and_then(|gp| ctx.tree.node(gp).obj.clone())
                    .unwrap_or(Value::Undefined),
                _ => Value::Undefined,
            };
            (args, receiver)
        };

        let result = if is_new { callee.construct(&args) } else { callee.call(receiver, &args) };
        match result {
            Ok(ret) => {
                let actual = classify(&ret, Variance::Covariant);
                self.check_type(id, &actual);
                self.mark_processed(id, Some(ret));
            }
            Err(error) => {
                // Library exceptions are swallowed; traversal continues.
                warn!(path = %self.path_string(id), error = %error, "replay_invocation_failed");
                self.mark_processed(id, None);
            }
        }
    }
}
