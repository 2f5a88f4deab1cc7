//! # Interposition Tracer
//!
//! Wraps the subject library in transparent mediators. Every property read,
//! property write, argument, call result, and constructor result that crosses
//! the client/library boundary is classified and recorded into the shared
//! path tree before the operation is delegated to the real value. Returned
//! objects and functions are wrapped recursively; arguments that are already
//! wrapped are recognized by their traced path and registered as ρ-relations
//! instead of being wrapped twice.

use std::cell::RefCell;
use std::rc::Rc;

use tracing::trace;

use crate::lattice::{classify, TypeTag};
use crate::path::{AccessPath, CallId, PathComponent};
use crate::tree::{PathTree, RhoRelation};
use crate::value::{ObjectLike, PropKey, RtResult, Value};

/// Reserved property name through which a mediator reveals its own path.
/// Reads of it are never recorded.
pub const PATH_SENTINEL: &str = "@@__PATH__@@";

struct TraceState {
    tree: PathTree,
}

/// Shared state of one tracing run: the path tree, its ρ-relations, and the
/// order counter. Cheap to clone into every mediator.
pub struct TraceSession {
    state: Rc<RefCell<TraceState>>,
}

impl TraceSession {
    pub fn new() -> Self {
        TraceSession { state: Rc::new(RefCell::new(TraceState { tree: PathTree::new() })) }
    }

    /// Record the root `require` path for a subject module and wrap the
    /// module value if it is an object or function.
    pub fn wrap_root(&self, module_name: &str, value: Value) -> Value {
        let path = AccessPath::require(module_name);
        let ty = classify(&value, path.variance());
        self.state.borrow_mut().tree.record(&path, ty.clone());
        trace!(path = %path, ty = %ty, "trace_root");
        if ty.is_wrappable() {
            wrap(value, path, self.state.clone())
        } else {
            value
        }
    }

    /// Snapshot of all recorded observations, ascending by order.
    pub fn observations(&self) -> Vec<(AccessPath, TypeTag, u64)> {
        self.state.borrow().tree.observations()
    }

    /// ρ-relations as (source, sink) access paths.
    pub fn rho_paths(&self) -> Vec<(AccessPath, AccessPath)> {
        let state = self.state.borrow();
        state
            .tree
            .rho_relations()
            .iter()
            .map(|RhoRelation { source, sink }| {
                (state.tree.path_of(*source), state.tree.path_of(*sink))
            })
            .collect()
    }

    /// Take the grown path tree out of the session. Mediators that outlive
    /// the session keep recording into a detached empty tree.
    pub fn finish(&self) -> PathTree {
        std::mem::take(&mut self.state.borrow_mut().tree)
    }
}

impl Default for TraceSession {
    fn default() -> Self {
        Self::new()
    }
}

/// Wrap an object/function value in a mediator at `path`; other values pass
/// through unchanged.
fn wrap(value: Value, path: AccessPath, state: Rc<RefCell<TraceState>>) -> Value {
    match value {
        Value::Obj(target) => Value::Obj(Rc::new(Mediator { target, path, state })),
        other => other,
    }
}

/// The transparent interposition proxy.
struct Mediator {
    target: Rc<dyn ObjectLike>,
    path: AccessPath,
    state: Rc<RefCell<TraceState>>,
}

impl Mediator {
    fn record(&self, path: &AccessPath, ty: TypeTag) {
        self.state.borrow_mut().tree.record(path, ty);
    }

    /// Record one argument position: classify, detect already-wrapped values
    /// (ρ-relation), wrap fresh objects/functions so library-side inspection
    /// stays traced.
    fn trace_argument(&self, call_id: &CallId, index: usize, arg: &Value) -> Value {
        let arg_path = self
            .path
            .extend(PathComponent::Arg { call_id: call_id.clone(), arg_id: index as u32 });
        let ty = classify(arg, arg_path.variance());
        {
            let mut state = self.state.borrow_mut();
            state.tree.record(&arg_path, ty.clone());
            if let Some(source) = arg.traced_path() {
                state.tree.add_rho(&source, &arg_path);
            }
        }
        if ty.is_wrappable() && arg.traced_path().is_none() {
            wrap(arg.clone(), arg_path, self.state.clone())
        } else {
            arg.clone()
        }
    }

    /// Record a call/new result and wrap it unless it is already wrapped.
    fn trace_result(&self, result_path: AccessPath, ret: Value) -> Value {
        let ty = classify(&ret, result_path.variance());
        self.record(&result_path, ty.clone());
        if ret.traced_path().is_some() {
            ret
        } else if ty.is_wrappable() {
            wrap(ret, result_path, self.state.clone())
        } else {
            ret
        }
    }
}

impl ObjectLike for Mediator {
    fn get(&self, key: &PropKey) -> RtResult<Value> {
        let name = match key {
            // Symbols are not modelled; pass through untouched.
            PropKey::Symbol(_) => return self.target.get(key),
            PropKey::Name(name) => name,
        };
        if name == PATH_SENTINEL {
            return Ok(Value::str(&self.path.to_string()));
        }
        let raw = self.target.get(key)?;
        let extended = self.path.extend(PathComponent::AccessProp { prop_name: name.clone() });
        let ty = classify(&raw, extended.variance());
        self.record(&extended, ty.clone());
        // Host-native builtins go back raw: wrapping them breaks receivers.
        if let Value::Obj(o) = &raw {
            if o.is_native() {
                return Ok(raw);
            }
        }
        if ty.is_wrappable() {
            Ok(wrap(raw, extended, self.state.clone()))
        } else {
            Ok(raw)
        }
    }

    fn set(&self, key: &PropKey, value: Value) -> RtResult<()> {
        let name = match key {
            PropKey::Symbol(_) => return self.target.set(key, value),
            PropKey::Name(name) => name,
        };
        let extended = self.path.extend(PathComponent::WriteProp { prop_name: name.clone() });
        let ty = classify(&value, extended.variance());
        self.record(&extended, ty);
        self.target.set(key, value)
    }

    fn call(&self, this: Value, args: &[Value]) -> RtResult<Value> {
        let call_id = CallId::fresh();
        let wrapped: Vec<Value> = args
            .iter()
            .enumerate()
            .map(|(i, arg)| self.trace_argument(&call_id, i, arg))
            .collect();
        let ret = self.target.call(this.untraced(), &wrapped)?;
        Ok(self.trace_result(self.path.extend(PathComponent::Call { call_id }), ret))
    }

    fn construct(&self, args: &[Value]) -> RtResult<Value> {
        let call_id = CallId::fresh();
        let wrapped: Vec<Value> = args
            .iter()
            .enumerate()
            .map(|(i, arg)| self.trace_argument(&call_id, i, arg))
            .collect();
        let ret = self.target.construct(&wrapped)?;
        Ok(self.trace_result(self.path.extend(PathComponent::New { call_id }), ret))
    }

    fn is_callable(&self) -> bool {
        self.target.is_callable()
    }

    fn own_keys(&self) -> Vec<PropKey> {
        self.target.own_keys()
    }

    fn traced_path(&self) -> Option<AccessPath> {
        Some(self.path.clone())
    }

    fn traced_target(&self) -> Option<Value> {
        Some(Value::Obj(self.target.clone()))
    }

    fn describe(&self) -> String {
        format!("traced {}", self.target.describe())
    }
}
