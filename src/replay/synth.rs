//! # Value Synthesizer
//!
//! Manufactures stand-ins for client-supplied values during replay, driven by
//! the model's recorded shapes. Primitives with recorded literals come back
//! exactly; everything else is a lazy synthetic mediator that materializes
//! children only when the new library actually reads a property or invokes a
//! callback. Laziness is what keeps cyclic models from recursing forever and
//! replay time proportional to what the library touches.
//!
//! Accesses the model never saw are themselves breaking evidence: they warn
//! with the broken path and fall back to `null` (reads) or `0` (calls).

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use super::{report_breakage, ReplayCtx};
use crate::lattice::{classify, compatible, LitValue, TypeTag};
use crate::model::ModelNodeId;
use crate::path::{CallId, PathComponent, Variance};
use crate::value::{ObjectLike, PlainObject, PropKey, RtResult, Value};

/// Reconstruct a plausible value for the position recorded at `id`, caching
/// it on the node and marking the node processed.
pub(crate) fn synthesize(ctx: &Rc<RefCell<ReplayCtx>>, id: ModelNodeId) -> Value {
    if let Some(cached) = ctx.borrow().tree.node(id).obj.clone() {
        return cached;
    }
    let ty = ctx.borrow().tree.node(id).ty.clone();
    let value = match ty {
        None | Some(TypeTag::Null) => Value::Null,
        Some(TypeTag::Undefined) => Value::Undefined,
        Some(TypeTag::Literal(LitValue::Str(s))) => Value::str(&s),
        Some(TypeTag::Literal(LitValue::Num(n))) => Value::Num(n),
        Some(TypeTag::Literal(LitValue::Bool(b))) => Value::Bool(b),
        Some(TypeTag::Error) => Value::error("synthesized error"),
        Some(TypeTag::Function) => SyntheticValue::function(ctx.clone(), id),
        // object, array, map, set, and unrefined primitives: a synthetic
        // mediator over an empty object.
        Some(_) => SyntheticValue::object(ctx.clone(), id),
    };
    let mut borrow = ctx.borrow_mut();
    let node = borrow.tree.node_mut(id);
    node.obj = Some(value.clone());
    node.processed = true;
    value
}

/// A synthetic mediator: serves property reads from the model's `accessProp`
/// children and (for callables) callback invocations from its `call`/`new`
/// children.
struct SyntheticValue {
    ctx: Rc<RefCell<ReplayCtx>>,
    node: ModelNodeId,
    callable: bool,
    /// Properties the library wrote onto the synthetic value.
    written: RefCell<BTreeMap<PropKey, Value>>,
}

impl SyntheticValue {
    fn object(ctx: Rc<RefCell<ReplayCtx>>, node: ModelNodeId) -> Value {
        Value::Obj(Rc::new(SyntheticValue {
            ctx,
            node,
            callable: false,
            written: RefCell::new(BTreeMap::new()),
        }))
    }

    fn function(ctx: Rc<RefCell<ReplayCtx>>, node: ModelNodeId) -> Value {
        Value::Obj(Rc::new(SyntheticValue {
            ctx,
            node,
            callable: true,
            written: RefCell::new(BTreeMap::new()),
        }))
    }

    fn path_string(&self) -> String {
        self.ctx.borrow().tree.path_of(self.node).to_string()
    }

    /// The `accessProp(name)` child of this node, if the model observed one.
    fn prop_child(&self, name: &str) -> Option<ModelNodeId> {
        let ctx = self.ctx.borrow();
        let node = ctx.tree.node(self.node);
        node.children.iter().copied().find(|child| {
            matches!(
                &ctx.tree.node(*child).component,
                Some(PathComponent::AccessProp { prop_name }) if prop_name == name
            )
        })
    }

    /// Recorded invocations of this callable: `(result node, call id)` pairs
    /// in observation order, filtered by call vs construct semantics.
    fn invocation_sites(&self, construct: bool) -> Vec<(ModelNodeId, CallId)> {
        let ctx = self.ctx.borrow();
        let node = ctx.tree.node(self.node);
        node.children
            .iter()
            .filter_map(|child| match &ctx.tree.node(*child).component {
                Some(PathComponent::Call { call_id }) if !construct => {
                    Some((*child, call_id.clone()))
                }
                Some(PathComponent::New { call_id }) if construct => {
                    Some((*child, call_id.clone()))
                }
                _ => None,
            })
            .collect()
    }

    /// Recorded argument types of one call site, by position.
    fn recorded_arg_types(&self, call_id: &CallId) -> Vec<(u32, Option<TypeTag>)> {
        let ctx = self.ctx.borrow();
        let node = ctx.tree.node(self.node);
        let mut out: Vec<(u32, Option<TypeTag>)> = node
            .children
            .iter()
            .filter_map(|child| {
                let child_node = ctx.tree.node(*child);
                match &child_node.component {
                    Some(PathComponent::Arg { call_id: cid, arg_id }) if cid == call_id => {
                        Some((*arg_id, child_node.ty.clone()))
                    }
                    _ => None,
                }
            })
            .collect();
        out.sort_by_key(|(arg_id, _)| *arg_id);
        out
    }

    /// Find a recorded invocation whose argument types are compatible with
    /// what the library is passing now, and synthesize its result.
    fn invoke(&self, args: &[Value], construct: bool) -> Option<Value> {
        let actual: Vec<TypeTag> =
            args.iter().map(|arg| classify(arg, Variance::Covariant)).collect();
        for (result_node, call_id) in self.invocation_sites(construct) {
            let recorded = self.recorded_arg_types(&call_id);
            let matches = recorded.iter().all(|(arg_id, ty)| {
                let Some(required) = ty else { return true };
                let produced = actual
                    .get(*arg_id as usize)
                    .cloned()
                    .unwrap_or(TypeTag::Undefined);
                compatible(&produced, required)
            });
            if matches {
                return Some(synthesize(&self.ctx, result_node));
            }
        }
        None
    }
}

impl ObjectLike for SyntheticValue {
    fn get(&self, key: &PropKey) -> RtResult<Value> {
        if let Some(value) = self.written.borrow().get(key) {
            return Ok(value.clone());
        }
        let Some(name) = key.as_name() else {
            return Ok(Value::Undefined);
        };
        match self.prop_child(name) {
            Some(child) => Ok(synthesize(&self.ctx, child)),
            None => {
                report_breakage(
                    &self.ctx,
                    format!("{}.{name}", self.path_string()),
                    "unexpected property read on synthesized value",
                    None,
                    None,
                );
                Ok(Value::Null)
            }
        }
    }

    fn set(&self, key: &PropKey, value: Value) -> RtResult<()> {
        self.written.borrow_mut().insert(key.clone(), value);
        Ok(())
    }

    fn call(&self, _this: Value, args: &[Value]) -> RtResult<Value> {
        match self.invoke(args, false) {
            Some(value) => Ok(value),
            None => {
                let actual: Vec<String> = args
                    .iter()
                    .map(|arg| classify(arg, Variance::Contravariant).name().to_string())
                    .collect();
                report_breakage(
                    &self.ctx,
                    self.path_string(),
                    &format!("callback invoked with unrecorded signature [{}]", actual.join(", ")),
                    None,
                    None,
                );
                Ok(Value::Num(0.0))
            }
        }
    }

    fn construct(&self, args: &[Value]) -> RtResult<Value> {
        match self.invoke(args, true) {
            Some(value) => Ok(value),
            None => {
                report_breakage(
                    &self.ctx,
                    self.path_string(),
                    "constructor invoked with unrecorded signature",
                    None,
                    None,
                );
                Ok(PlainObject::new_value())
            }
        }
    }

    fn is_callable(&self) -> bool {
        self.callable
    }

    fn own_keys(&self) -> Vec<PropKey> {
        let ctx = self.ctx.borrow();
        let node = ctx.tree.node(self.node);
        node.children
            .iter()
            .filter_map(|child| match &ctx.tree.node(*child).component {
                Some(PathComponent::AccessProp { prop_name }) => {
                    Some(PropKey::Name(prop_name.clone()))
                }
                _ => None,
            })
            .collect()
    }

    fn describe(&self) -> String {
        if self.callable {
            "synthesized function".to_string()
        } else {
            "synthesized object".to_string()
        }
    }
}
