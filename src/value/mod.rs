//! # Dynamic Value Runtime
//!
//! Runtime values for the traced world: `Null`, `Undefined`, booleans,
//! numbers, strings, arrays, maps, sets, error values, and objects. Every
//! property-bearing or callable value lives behind the [`ObjectLike`] trait,
//! which is the seam the tracer's mediator, the replayer's synthetic values,
//! script closures, and native builtins all plug into.
//!
//! ## Usage
//!
//! ```rust
//! use retrace::value::{PlainObject, PropKey, Value};
//!
//! let obj = PlainObject::new_value();
//! obj.set(&PropKey::name("greet"), Value::str("hello")).unwrap();
//! assert_eq!(obj.get(&PropKey::name("greet")).unwrap().as_str(), Some("hello"));
//! ```

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;
use thiserror::Error;

use crate::path::AccessPath;

/// Runtime faults raised while driving dynamic values.
#[derive(Error, Debug)]
pub enum RtError {
    /// Attempted to invoke a non-function.
    #[error("value is not callable: {0}")]
    NotCallable(String),

    /// Attempted `new` on a value without construct semantics.
    #[error("value is not a constructor: {0}")]
    NotConstructible(String),

    /// Generic dynamic type error.
    #[error("type error: {0}")]
    Type(String),

    /// Unknown identifier during script evaluation.
    #[error("unknown identifier: {0}")]
    UnknownIdent(String),

    /// An error value thrown by library or client code.
    #[error("thrown: {0}")]
    Thrown(String),
}

pub type RtResult<T> = Result<T, RtError>;

/// A property key: a name, or an opaque symbol.
///
/// Symbols carry no name and are never modelled as paths; they exist so the
/// tracer's symbol-passthrough rule has something real to pass through.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PropKey {
    Name(String),
    Symbol(u32),
}

impl PropKey {
    pub fn name(s: &str) -> Self {
        PropKey::Name(s.to_string())
    }

    pub fn as_name(&self) -> Option<&str> {
        match self {
            PropKey::Name(s) => Some(s),
            PropKey::Symbol(_) => None,
        }
    }
}

impl fmt::Display for PropKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropKey::Name(s) => write!(f, "{s}"),
            PropKey::Symbol(id) => write!(f, "@@symbol({id})"),
        }
    }
}

/// The seam through which every object-shaped value is driven.
///
/// Default implementations refuse invocation; implementors opt in to the
/// behaviors they actually have. `traced_path`/`traced_target` are only
/// overridden by the tracer's mediator so that already-wrapped values can be
/// recognized when they flow back into the library as arguments.
pub trait ObjectLike {
    fn get(&self, key: &PropKey) -> RtResult<Value>;

    fn set(&self, key: &PropKey, value: Value) -> RtResult<()>;

    fn call(&self, _this: Value, _args: &[Value]) -> RtResult<Value> {
        Err(RtError::NotCallable(self.describe()))
    }

    fn construct(&self, _args: &[Value]) -> RtResult<Value> {
        Err(RtError::NotConstructible(self.describe()))
    }

    fn is_callable(&self) -> bool {
        false
    }

    /// True for host-native implementations (builtins).
    fn is_native(&self) -> bool {
        false
    }

    fn own_keys(&self) -> Vec<PropKey> {
        Vec::new()
    }

    /// The access path this value was wrapped at, if it is a tracer mediator.
    fn traced_path(&self) -> Option<AccessPath> {
        None
    }

    /// The raw value behind a tracer mediator.
    fn traced_target(&self) -> Option<Value> {
        None
    }

    /// Short human-readable description for error messages.
    fn describe(&self) -> String {
        if self.is_callable() {
            "function".to_string()
        } else {
            "object".to_string()
        }
    }
}

/// An error value (the dynamic world's `Error` instances).
#[derive(Debug)]
pub struct ErrorValue {
    pub message: String,
}

/// A dynamic runtime value.
#[derive(Clone)]
pub enum Value {
    Null,
    Undefined,
    Bool(bool),
    Num(f64),
    Str(Rc<str>),
    Array(Rc<RefCell<Vec<Value>>>),
    Map(Rc<RefCell<Vec<(Value, Value)>>>),
    Set(Rc<RefCell<Vec<Value>>>),
    Error(Rc<ErrorValue>),
    Obj(Rc<dyn ObjectLike>),
}

impl Value {
    pub fn str(s: &str) -> Self {
        Value::Str(Rc::from(s))
    }

    pub fn error(message: &str) -> Self {
        Value::Error(Rc::new(ErrorValue { message: message.to_string() }))
    }

    pub fn array(items: Vec<Value>) -> Self {
        Value::Array(Rc::new(RefCell::new(items)))
    }

    pub fn empty_map() -> Self {
        Value::Map(Rc::new(RefCell::new(Vec::new())))
    }

    pub fn empty_set() -> Self {
        Value::Set(Rc::new(RefCell::new(Vec::new())))
    }

    /// Short tag for diagnostics; mirrors the lattice's tag names.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Undefined => "undefined",
            Value::Bool(_) => "boolean",
            Value::Num(_) => "number",
            Value::Str(_) => "string",
            Value::Array(_) => "array",
            Value::Map(_) => "map",
            Value::Set(_) => "set",
            Value::Error(_) => "error",
            Value::Obj(o) => {
                if o.is_callable() {
                    "function"
                } else {
                    "object"
                }
            }
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_num(&self) -> Option<f64> {
        match self {
            Value::Num(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_obj(&self) -> Option<&Rc<dyn ObjectLike>> {
        match self {
            Value::Obj(o) => Some(o),
            _ => None,
        }
    }

    /// Values with object identity (returned as-is from constructors).
    pub fn is_object_like(&self) -> bool {
        matches!(
            self,
            Value::Obj(_) | Value::Array(_) | Value::Map(_) | Value::Set(_) | Value::Error(_)
        )
    }

    /// JS-flavoured truthiness.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null | Value::Undefined => false,
            Value::Bool(b) => *b,
            Value::Num(n) => *n != 0.0 && !n.is_nan(),
            Value::Str(s) => !s.is_empty(),
            _ => true,
        }
    }

    /// The path this value was wrapped at, if it is a tracer mediator.
    pub fn traced_path(&self) -> Option<AccessPath> {
        self.as_obj().and_then(|o| o.traced_path())
    }

    /// Unwrap a tracer mediator to its raw target; identity otherwise.
    pub fn untraced(&self) -> Value {
        match self.as_obj().and_then(|o| o.traced_target()) {
            Some(raw) => raw,
            None => self.clone(),
        }
    }

    /// Read a property. Non-object values answer the few built-in
    /// pseudo-properties (`length`, `size`) and are otherwise `undefined`.
    pub fn get(&self, key: &PropKey) -> RtResult<Value> {
        match self {
            Value::Obj(o) => o.get(key),
            Value::Array(items) => match key.as_name() {
                Some("length") => Ok(Value::Num(items.borrow().len() as f64)),
                _ => Ok(Value::Undefined),
            },
            Value::Str(s) => match key.as_name() {
                Some("length") => Ok(Value::Num(s.chars().count() as f64)),
                _ => Ok(Value::Undefined),
            },
            Value::Map(entries) => match key.as_name() {
                Some("size") => Ok(Value::Num(entries.borrow().len() as f64)),
                _ => Ok(Value::Undefined),
            },
            Value::Set(items) => match key.as_name() {
                Some("size") => Ok(Value::Num(items.borrow().len() as f64)),
                _ => Ok(Value::Undefined),
            },
            Value::Error(e) => match key.as_name() {
                Some("message") => Ok(Value::str(&e.message)),
                _ => Ok(Value::Undefined),
            },
            _ => Ok(Value::Undefined),
        }
    }

    /// Write a property; only object-shaped values accept writes.
    pub fn set(&self, key: &PropKey, value: Value) -> RtResult<()> {
        match self {
            Value::Obj(o) => o.set(key, value),
            other => Err(RtError::Type(format!(
                "cannot set property '{key}' on {}",
                other.kind()
            ))),
        }
    }

    /// Invoke as a function.
    pub fn call(&self, this: Value, args: &[Value]) -> RtResult<Value> {
        match self {
            Value::Obj(o) if o.is_callable() => o.call(this, args),
            other => Err(RtError::NotCallable(other.kind().to_string())),
        }
    }

    /// Invoke with construct semantics.
    pub fn construct(&self, args: &[Value]) -> RtResult<Value> {
        match self {
            Value::Obj(o) => o.construct(args),
            other => Err(RtError::NotConstructible(other.kind().to_string())),
        }
    }
}

// Identity semantics: reference equality for heap values, structural
// equality for primitives. This is what ρ-relation checks need.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Undefined, Value::Undefined) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Num(a), Value::Num(b)) => a == b || (a.is_nan() && b.is_nan()),
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => Rc::ptr_eq(a, b),
            (Value::Map(a), Value::Map(b)) => Rc::ptr_eq(a, b),
            (Value::Set(a), Value::Set(b)) => Rc::ptr_eq(a, b),
            (Value::Error(a), Value::Error(b)) => Rc::ptr_eq(a, b),
            (Value::Obj(a), Value::Obj(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Undefined => write!(f, "undefined"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Num(n) => write!(f, "{n}"),
            Value::Str(s) => write!(f, "{s:?}"),
            Value::Array(items) => write!(f, "array[{}]", items.borrow().len()),
            Value::Map(entries) => write!(f, "map[{}]", entries.borrow().len()),
            Value::Set(items) => write!(f, "set[{}]", items.borrow().len()),
            Value::Error(e) => write!(f, "error({:?})", e.message),
            Value::Obj(o) => write!(f, "<{}>", o.describe()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Str(s) => write!(f, "{s}"),
            other => write!(f, "{other:?}"),
        }
    }
}

/// An ordinary mutable object: script object literals, constructor results.
pub struct PlainObject {
    props: RefCell<BTreeMap<PropKey, Value>>,
}

impl PlainObject {
    pub fn new() -> Rc<Self> {
        Rc::new(PlainObject { props: RefCell::new(BTreeMap::new()) })
    }

    pub fn new_value() -> Value {
        Value::Obj(Self::new())
    }

    pub fn from_entries(entries: Vec<(String, Value)>) -> Value {
        let obj = Self::new();
        {
            let mut props = obj.props.borrow_mut();
            for (name, value) in entries {
                props.insert(PropKey::Name(name), value);
            }
        }
        Value::Obj(obj)
    }
}

impl Default for PlainObject {
    fn default() -> Self {
        PlainObject { props: RefCell::new(BTreeMap::new()) }
    }
}

impl ObjectLike for PlainObject {
    fn get(&self, key: &PropKey) -> RtResult<Value> {
        Ok(self.props.borrow().get(key).cloned().unwrap_or(Value::Undefined))
    }

    fn set(&self, key: &PropKey, value: Value) -> RtResult<()> {
        self.props.borrow_mut().insert(key.clone(), value);
        Ok(())
    }

    fn own_keys(&self) -> Vec<PropKey> {
        self.props.borrow().keys().cloned().collect()
    }
}

type NativeImpl = Box<dyn Fn(Value, &[Value]) -> RtResult<Value>>;

/// A host-native function. `is_native` is what the tracer's builtin
/// short-circuit keys on.
pub struct NativeFunction {
    name: String,
    func: NativeImpl,
}

impl NativeFunction {
    pub fn new<F>(name: &str, func: F) -> Value
    where
        F: Fn(Value, &[Value]) -> RtResult<Value> + 'static,
    {
        Value::Obj(Rc::new(NativeFunction {
            name: name.to_string(),
            func: Box::new(func),
        }))
    }
}

impl ObjectLike for NativeFunction {
    fn get(&self, key: &PropKey) -> RtResult<Value> {
        match key.as_name() {
            Some("name") => Ok(Value::str(&self.name)),
            _ => Ok(Value::Undefined),
        }
    }

    fn set(&self, _key: &PropKey, _value: Value) -> RtResult<()> {
        Ok(())
    }

    fn call(&self, this: Value, args: &[Value]) -> RtResult<Value> {
        (self.func)(this, args)
    }

    fn construct(&self, args: &[Value]) -> RtResult<Value> {
        let this = PlainObject::new_value();
        let ret = (self.func)(this.clone(), args)?;
        if ret.is_object_like() {
            Ok(ret)
        } else {
            Ok(this)
        }
    }

    fn is_callable(&self) -> bool {
        true
    }

    fn is_native(&self) -> bool {
        true
    }

    fn describe(&self) -> String {
        format!("native fn {}", self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_object_get_set() {
        let obj = PlainObject::new_value();
        assert_eq!(obj.get(&PropKey::name("missing")).unwrap(), Value::Undefined);
        obj.set(&PropKey::name("x"), Value::Num(1.0)).unwrap();
        assert_eq!(obj.get(&PropKey::name("x")).unwrap(), Value::Num(1.0));
    }

    #[test]
    fn test_native_function_call_and_identity() {
        let double = NativeFunction::new("double", |_this, args| {
            let n = args.first().and_then(Value::as_num).unwrap_or(0.0);
            Ok(Value::Num(n * 2.0))
        });
        assert_eq!(double.kind(), "function");
        assert!(double.as_obj().unwrap().is_native());
        let out = double.call(Value::Undefined, &[Value::Num(21.0)]).unwrap();
        assert_eq!(out, Value::Num(42.0));
    }

    #[test]
    fn test_native_construct_returns_this_for_primitive_returns() {
        let ctor = NativeFunction::new("Counter", |this, _args| {
            this.set(&PropKey::name("count"), Value::Num(0.0))?;
            Ok(Value::Undefined)
        });
        let instance = ctor.construct(&[]).unwrap();
        assert_eq!(instance.kind(), "object");
        assert_eq!(instance.get(&PropKey::name("count")).unwrap(), Value::Num(0.0));
    }

    #[test]
    fn test_equality_is_reference_for_objects() {
        let a = PlainObject::new_value();
        let b = PlainObject::new_value();
        assert_ne!(a, b);
        assert_eq!(a, a.clone());
    }

    #[test]
    fn test_pseudo_properties() {
        let arr = Value::array(vec![Value::Num(1.0), Value::Num(2.0)]);
        assert_eq!(arr.get(&PropKey::name("length")).unwrap(), Value::Num(2.0));
        assert_eq!(Value::str("abc").get(&PropKey::name("length")).unwrap(), Value::Num(3.0));
        assert_eq!(Value::empty_set().get(&PropKey::name("size")).unwrap(), Value::Num(0.0));
    }

    #[test]
    fn test_call_on_non_function_fails() {
        let err = Value::Num(3.0).call(Value::Undefined, &[]).unwrap_err();
        assert!(matches!(err, RtError::NotCallable(_)));
    }

    #[test]
    fn test_truthiness() {
        assert!(!Value::Null.is_truthy());
        assert!(!Value::Undefined.is_truthy());
        assert!(!Value::Num(0.0).is_truthy());
        assert!(!Value::str("").is_truthy());
        assert!(Value::str("x").is_truthy());
        assert!(PlainObject::new_value().is_truthy());
    }
}
