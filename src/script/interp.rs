//! Tree-walking evaluator for the script language.
//!
//! Environments are chained scopes with interior mutability; script functions
//! close over the environment they were created in. Method calls pass the
//! receiver as `this`, and `new` on a script function allocates a fresh
//! object that becomes the result unless the body returns an object itself.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::collections::HashMap;
use std::rc::Rc;

use super::ast::{BinOp, Expr, Stmt, UnOp};
use crate::value::{NativeFunction, ObjectLike, PlainObject, PropKey, RtError, RtResult, Value};

/// A lexical scope.
#[derive(Clone)]
pub struct Env {
    inner: Rc<EnvInner>,
}

struct EnvInner {
    vars: RefCell<HashMap<String, Value>>,
    parent: Option<Env>,
}

impl Env {
    pub fn root() -> Env {
        Env { inner: Rc::new(EnvInner { vars: RefCell::new(HashMap::new()), parent: None }) }
    }

    pub fn child(&self) -> Env {
        Env {
            inner: Rc::new(EnvInner {
                vars: RefCell::new(HashMap::new()),
                parent: Some(self.clone()),
            }),
        }
    }

    pub fn define(&self, name: &str, value: Value) {
        self.inner.vars.borrow_mut().insert(name.to_string(), value);
    }

    pub fn lookup(&self, name: &str) -> Option<Value> {
        if let Some(value) = self.inner.vars.borrow().get(name) {
            return Some(value.clone());
        }
        self.inner.parent.as_ref().and_then(|p| p.lookup(name))
    }

    /// Assign to the nearest scope that defines `name`; fall back to defining
    /// in the current scope.
    pub fn assign(&self, name: &str, value: Value) {
        let mut scope = Some(self.clone());
        while let Some(env) = scope {
            if env.inner.vars.borrow().contains_key(name) {
                env.inner.vars.borrow_mut().insert(name.to_string(), value);
                return;
            }
            scope = env.inner.parent.clone();
        }
        self.define(name, value);
    }
}

/// Statement outcome: fall through, or unwind with a return value.
enum Flow {
    Normal,
    Return(Value),
}

/// A closure over script code.
pub struct ScriptFunction {
    params: Vec<String>,
    body: Rc<Vec<Stmt>>,
    env: Env,
    props: RefCell<BTreeMap<PropKey, Value>>,
}

impl ScriptFunction {
    pub fn new(params: Vec<String>, body: Rc<Vec<Stmt>>, env: Env) -> Value {
        Value::Obj(Rc::new(ScriptFunction {
            params,
            body,
            env,
            props: RefCell::new(BTreeMap::new()),
        }))
    }
}

impl ObjectLike for ScriptFunction {
    fn get(&self, key: &PropKey) -> RtResult<Value> {
        Ok(self.props.borrow().get(key).cloned().unwrap_or(Value::Undefined))
    }

    fn set(&self, key: &PropKey, value: Value) -> RtResult<()> {
        self.props.borrow_mut().insert(key.clone(), value);
        Ok(())
    }

    fn call(&self, this: Value, args: &[Value]) -> RtResult<Value> {
        let scope = self.env.child();
        scope.define("this", this);
        for (i, param) in self.params.iter().enumerate() {
            scope.define(param, args.get(i).cloned().unwrap_or(Value::Undefined));
        }
        match exec_block(&self.body, &scope)? {
            Flow::Return(value) => Ok(value),
            Flow::Normal => Ok(Value::Undefined),
        }
    }

    fn construct(&self, args: &[Value]) -> RtResult<Value> {
        let this = PlainObject::new_value();
        let ret = self.call(this.clone(), args)?;
        if ret.is_object_like() {
            Ok(ret)
        } else {
            Ok(this)
        }
    }

    fn is_callable(&self) -> bool {
        true
    }

    fn own_keys(&self) -> Vec<PropKey> {
        self.props.borrow().keys().cloned().collect()
    }

    fn describe(&self) -> String {
        format!("fn({})", self.params.join(", "))
    }
}

fn exec_block(stmts: &[Stmt], env: &Env) -> RtResult<Flow> {
    for stmt in stmts {
        match exec_stmt(stmt, env)? {
            Flow::Normal => {}
            flow @ Flow::Return(_) => return Ok(flow),
        }
    }
    Ok(Flow::Normal)
}

fn exec_stmt(stmt: &Stmt, env: &Env) -> RtResult<Flow> {
    match stmt {
        Stmt::Let { name, init } => {
            let value = eval(init, env)?;
            env.define(name, value);
            Ok(Flow::Normal)
        }
        Stmt::Expr(expr) => {
            eval(expr, env)?;
            Ok(Flow::Normal)
        }
        Stmt::Return(expr) => {
            let value = match expr {
                Some(expr) => eval(expr, env)?,
                None => Value::Undefined,
            };
            Ok(Flow::Return(value))
        }
        Stmt::If { cond, then_branch, else_branch } => {
            if eval(cond, env)?.is_truthy() {
                exec_block(then_branch, &env.child())
            } else if let Some(else_branch) = else_branch {
                exec_block(else_branch, &env.child())
            } else {
                Ok(Flow::Normal)
            }
        }
        Stmt::While { cond, body } => {
            while eval(cond, env)?.is_truthy() {
                if let flow @ Flow::Return(_) = exec_block(body, &env.child())? {
                    return Ok(flow);
                }
            }
            Ok(Flow::Normal)
        }
    }
}

/// Evaluate an expression.
pub fn eval(expr: &Expr, env: &Env) -> RtResult<Value> {
    match expr {
        Expr::Null => Ok(Value::Null),
        Expr::Undefined => Ok(Value::Undefined),
        Expr::Bool(b) => Ok(Value::Bool(*b)),
        Expr::Num(n) => Ok(Value::Num(*n)),
        Expr::Str(s) => Ok(Value::str(s)),
        Expr::Ident(name) => {
            env.lookup(name).ok_or_else(|| RtError::UnknownIdent(name.clone()))
        }
        Expr::Array(items) => {
            let values: RtResult<Vec<Value>> = items.iter().map(|e| eval(e, env)).collect();
            Ok(Value::array(values?))
        }
        Expr::Object(entries) => {
            let mut out = Vec::with_capacity(entries.len());
            for (key, value) in entries {
                out.push((key.clone(), eval(value, env)?));
            }
            Ok(PlainObject::from_entries(out))
        }
        Expr::Member { object, prop } => {
            let object = eval(object, env)?;
            object.get(&PropKey::name(prop))
        }
        Expr::Call { callee, args } => {
            let (func, this) = match &**callee {
                Expr::Member { object, prop } => {
                    let receiver = eval(object, env)?;
                    let func = receiver.get(&PropKey::name(prop))?;
                    (func, receiver)
                }
                other => (eval(other, env)?, Value::Undefined),
            };
            let mut values = Vec::with_capacity(args.len());
            for arg in args {
                values.push(eval(arg, env)?);
            }
            func.call(this, &values)
        }
        Expr::New { callee, args } => {
            let ctor = eval(callee, env)?;
            let mut values = Vec::with_capacity(args.len());
            for arg in args {
                values.push(eval(arg, env)?);
            }
            ctor.construct(&values)
        }
        Expr::Assign { target, value } => {
            let value = eval(value, env)?;
            match &**target {
                Expr::Ident(name) => env.assign(name, value.clone()),
                Expr::Member { object, prop } => {
                    let object = eval(object, env)?;
                    object.set(&PropKey::name(prop), value.clone())?;
                }
                // Unreachable: the parser rejects other targets.
                other => return Err(RtError::Type(format!("bad assignment target: {other:?}"))),
            }
            Ok(value)
        }
        Expr::Binary { op, lhs, rhs } => eval_binary(*op, lhs, rhs, env),
        Expr::Unary { op, expr } => {
            let value = eval(expr, env)?;
            match op {
                UnOp::Not => Ok(Value::Bool(!value.is_truthy())),
                UnOp::Neg => match value.as_num() {
                    Some(n) => Ok(Value::Num(-n)),
                    None => Err(RtError::Type(format!("cannot negate {}", value.kind()))),
                },
            }
        }
        Expr::Function { params, body } => {
            Ok(ScriptFunction::new(params.clone(), body.clone(), env.clone()))
        }
    }
}

fn eval_binary(op: BinOp, lhs: &Expr, rhs: &Expr, env: &Env) -> RtResult<Value> {
    // Short-circuit forms first.
    if op == BinOp::And {
        let left = eval(lhs, env)?;
        return if left.is_truthy() { eval(rhs, env) } else { Ok(left) };
    }
    if op == BinOp::Or {
        let left = eval(lhs, env)?;
        return if left.is_truthy() { Ok(left) } else { eval(rhs, env) };
    }

    let left = eval(lhs, env)?;
    let right = eval(rhs, env)?;
    match op {
        BinOp::Add => match (&left, &right) {
            (Value::Num(a), Value::Num(b)) => Ok(Value::Num(a + b)),
            (Value::Str(_), _) | (_, Value::Str(_)) => {
                Ok(Value::str(&format!("{left}{right}")))
            }
            _ => Err(RtError::Type(format!("cannot add {} and {}", left.kind(), right.kind()))),
        },
        BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Mod => {
            let (a, b) = match (left.as_num(), right.as_num()) {
                (Some(a), Some(b)) => (a, b),
                _ => {
                    return Err(RtError::Type(format!(
                        "arithmetic on {} and {}",
                        left.kind(),
                        right.kind()
                    )))
                }
            };
            Ok(Value::Num(match op {
                BinOp::Sub => a - b,
                BinOp::Mul => a * b,
                BinOp::Div => a / b,
                BinOp::Mod => a % b,
                _ => unreachable!(),
            }))
        }
        BinOp::Eq => Ok(Value::Bool(left == right)),
        BinOp::Ne => Ok(Value::Bool(left != right)),
        BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
            let ordering = match (&left, &right) {
                (Value::Num(a), Value::Num(b)) => a.partial_cmp(b),
                (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
                _ => None,
            };
            let Some(ordering) = ordering else {
                return Err(RtError::Type(format!(
                    "cannot compare {} and {}",
                    left.kind(),
                    right.kind()
                )));
            };
            Ok(Value::Bool(match op {
                BinOp::Lt => ordering == std::cmp::Ordering::Less,
                BinOp::Le => ordering != std::cmp::Ordering::Greater,
                BinOp::Gt => ordering == std::cmp::Ordering::Greater,
                BinOp::Ge => ordering != std::cmp::Ordering::Less,
                _ => unreachable!(),
            }))
        }
        BinOp::And | BinOp::Or => unreachable!(),
    }
}

/// Run a module body.
pub fn exec_program(stmts: &[Stmt], env: &Env) -> RtResult<()> {
    exec_block(stmts, env)?;
    Ok(())
}

/// Fresh root scope with the language builtins bound.
pub fn base_env() -> Env {
    let env = Env::root();
    env.define(
        "print",
        NativeFunction::new("print", |_this, args| {
            let rendered: Vec<String> = args.iter().map(|a| a.to_string()).collect();
            println!("{}", rendered.join(" "));
            Ok(Value::Undefined)
        }),
    );
    env.define(
        "Error",
        NativeFunction::new("Error", |_this, args| {
            let message = args.first().map(|a| a.to_string()).unwrap_or_default();
            Ok(Value::error(&message))
        }),
    );
    env.define("Map", NativeFunction::new("Map", |_this, _args| Ok(Value::empty_map())));
    env.define("Set", NativeFunction::new("Set", |_this, _args| Ok(Value::empty_set())));
    env
}
