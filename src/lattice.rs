//! # Type Lattice
//!
//! Classifies runtime values into a small, fixed set of type tags and decides
//! replay-time compatibility between them. In covariant positions primitives
//! are refined into literal tags carrying the exact observed value; the
//! literal value feeds argument synthesis during replay, while compatibility
//! checking only looks at the primitive's type.
//!
//! Persisted form: plain tags serialize as strings (`"number"`), literals as
//! `{"primType": "...", "value": ...}` with the non-finite sentinels
//! `"Infinity"`, `"-Infinity"` and `"NaN"` encoded as strings.

use serde::de::{self, MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::hash::{Hash, Hasher};

use crate::path::Variance;
use crate::value::Value;

/// The primitive kinds that admit literal refinement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimType {
    String,
    Number,
    Boolean,
}

impl PrimType {
    pub fn name(self) -> &'static str {
        match self {
            PrimType::String => "string",
            PrimType::Number => "number",
            PrimType::Boolean => "boolean",
        }
    }
}

/// The exact value of a refined primitive literal.
#[derive(Debug, Clone)]
pub enum LitValue {
    Str(String),
    Num(f64),
    Bool(bool),
}

impl LitValue {
    pub fn prim_type(&self) -> PrimType {
        match self {
            LitValue::Str(_) => PrimType::String,
            LitValue::Num(_) => PrimType::Number,
            LitValue::Bool(_) => PrimType::Boolean,
        }
    }

    /// Canonical bit pattern; NaN collapses to one representation so that
    /// equality and hashing agree.
    fn canonical_bits(&self) -> u64 {
        match self {
            LitValue::Str(_) | LitValue::Bool(_) => 0,
            LitValue::Num(n) => {
                if n.is_nan() {
                    f64::NAN.to_bits()
                } else if *n == 0.0 {
                    // +0.0 and -0.0 compare equal; hash them alike.
                    0f64.to_bits()
                } else {
                    n.to_bits()
                }
            }
        }
    }
}

impl PartialEq for LitValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (LitValue::Str(a), LitValue::Str(b)) => a == b,
            (LitValue::Bool(a), LitValue::Bool(b)) => a == b,
            (LitValue::Num(a), LitValue::Num(b)) => a == b || (a.is_nan() && b.is_nan()),
            _ => false,
        }
    }
}

impl Eq for LitValue {}

impl Hash for LitValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            LitValue::Str(s) => s.hash(state),
            LitValue::Bool(b) => b.hash(state),
            LitValue::Num(_) => self.canonical_bits().hash(state),
        }
    }
}

/// A type tag from the fixed lattice.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeTag {
    Null,
    Undefined,
    String,
    Number,
    Boolean,
    Array,
    Object,
    Function,
    Map,
    Set,
    Error,
    /// Primitive refined with its exact value (covariant positions only).
    Literal(LitValue),
}

impl TypeTag {
    /// The primitive kind of this tag, refined or not.
    pub fn prim_type(&self) -> Option<PrimType> {
        match self {
            TypeTag::String => Some(PrimType::String),
            TypeTag::Number => Some(PrimType::Number),
            TypeTag::Boolean => Some(PrimType::Boolean),
            TypeTag::Literal(lit) => Some(lit.prim_type()),
            _ => None,
        }
    }

    /// Plain-tag name; literals report their primitive's name.
    pub fn name(&self) -> &'static str {
        match self {
            TypeTag::Null => "null",
            TypeTag::Undefined => "undefined",
            TypeTag::String => "string",
            TypeTag::Number => "number",
            TypeTag::Boolean => "boolean",
            TypeTag::Array => "array",
            TypeTag::Object => "object",
            TypeTag::Function => "function",
            TypeTag::Map => "map",
            TypeTag::Set => "set",
            TypeTag::Error => "error",
            TypeTag::Literal(lit) => lit.prim_type().name(),
        }
    }

    /// Tags whose values the tracer recurses into.
    pub fn is_wrappable(&self) -> bool {
        matches!(self, TypeTag::Object | TypeTag::Function)
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeTag::Literal(LitValue::Str(s)) => write!(f, "string({s:?})"),
            TypeTag::Literal(LitValue::Num(n)) => write!(f, "number({n})"),
            TypeTag::Literal(LitValue::Bool(b)) => write!(f, "boolean({b})"),
            other => write!(f, "{}", other.name()),
        }
    }
}

/// Classify a runtime value into a type tag.
///
/// Dispatch order is fixed: the specific shapes (`error`, `array`, `map`,
/// `set`) take precedence over the generic `object`; primitives refine to
/// literals only in covariant positions.
pub fn classify(value: &Value, variance: Variance) -> TypeTag {
    let covariant = variance == Variance::Covariant;
    match value {
        Value::Null => TypeTag::Null,
        Value::Undefined => TypeTag::Undefined,
        Value::Error(_) => TypeTag::Error,
        Value::Array(_) => TypeTag::Array,
        Value::Map(_) => TypeTag::Map,
        Value::Set(_) => TypeTag::Set,
        Value::Str(s) => {
            if covariant {
                TypeTag::Literal(LitValue::Str(s.to_string()))
            } else {
                TypeTag::String
            }
        }
        Value::Num(n) => {
            if covariant {
                TypeTag::Literal(LitValue::Num(*n))
            } else {
                TypeTag::Number
            }
        }
        Value::Bool(b) => {
            if covariant {
                TypeTag::Literal(LitValue::Bool(*b))
            } else {
                TypeTag::Boolean
            }
        }
        Value::Obj(o) => {
            if o.is_callable() {
                TypeTag::Function
            } else {
                TypeTag::Object
            }
        }
    }
}

/// Decide whether `actual` is acceptable where `required` was recorded.
///
/// - `null` requirements accept anything (untyped position);
/// - `object` widens structurally over `object`/`function`/`map`/`set`;
/// - otherwise the tags must agree, with primitive literals compared by
///   their primitive type.
pub fn compatible(actual: &TypeTag, required: &TypeTag) -> bool {
    if *required == TypeTag::Null {
        return true;
    }
    if *required == TypeTag::Object {
        return matches!(
            actual,
            TypeTag::Object | TypeTag::Function | TypeTag::Map | TypeTag::Set
        );
    }
    if actual == required {
        return true;
    }
    match (actual.prim_type(), required.prim_type()) {
        (Some(a), Some(r)) => a == r,
        _ => false,
    }
}

// Serialized form: a bare string for plain tags, a {primType, value} map for
// literals, with Infinity/-Infinity/NaN as string sentinels.

fn encode_num(n: f64) -> serde_json::Value {
    if n.is_nan() {
        serde_json::Value::String("NaN".to_string())
    } else if n == f64::INFINITY {
        serde_json::Value::String("Infinity".to_string())
    } else if n == f64::NEG_INFINITY {
        serde_json::Value::String("-Infinity".to_string())
    } else {
        serde_json::json!(n)
    }
}

impl Serialize for TypeTag {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            TypeTag::Literal(lit) => {
                let mut map = serializer.serialize_map(Some(2))?;
                map.serialize_entry("primType", lit.prim_type().name())?;
                match lit {
                    LitValue::Str(s) => map.serialize_entry("value", s)?,
                    LitValue::Bool(b) => map.serialize_entry("value", b)?,
                    LitValue::Num(n) => map.serialize_entry("value", &encode_num(*n))?,
                }
                map.end()
            }
            plain => serializer.serialize_str(plain.name()),
        }
    }
}

fn plain_tag(name: &str) -> Option<TypeTag> {
    Some(match name {
        "null" => TypeTag::Null,
        "undefined" => TypeTag::Undefined,
        "string" => TypeTag::String,
        "number" => TypeTag::Number,
        "boolean" => TypeTag::Boolean,
        "array" => TypeTag::Array,
        "object" => TypeTag::Object,
        "function" => TypeTag::Function,
        "map" => TypeTag::Map,
        "set" => TypeTag::Set,
        "error" => TypeTag::Error,
        _ => return None,
    })
}

fn decode_num(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => match s.as_str() {
            "Infinity" => Some(f64::INFINITY),
            "-Infinity" => Some(f64::NEG_INFINITY),
            "NaN" => Some(f64::NAN),
            _ => None,
        },
        _ => None,
    }
}

struct TypeTagVisitor;

impl<'de> Visitor<'de> for TypeTagVisitor {
    type Value = TypeTag;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a type tag string or a {primType, value} literal")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<TypeTag, E> {
        plain_tag(v).ok_or_else(|| E::custom(format!("unknown type tag: {v}")))
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<TypeTag, A::Error> {
        let mut prim_type: Option<String> = None;
        let mut value: Option<serde_json::Value> = None;
        while let Some(key) = map.next_key::<String>()? {
            match key.as_str() {
                "primType" => prim_type = Some(map.next_value()?),
                "value" => value = Some(map.next_value()?),
                other => return Err(de::Error::unknown_field(other, &["primType", "value"])),
            }
        }
        let prim_type = prim_type.ok_or_else(|| de::Error::missing_field("primType"))?;
        let value = value.ok_or_else(|| de::Error::missing_field("value"))?;
        let lit = match prim_type.as_str() {
            "string" => LitValue::Str(
                value
                    .as_str()
                    .ok_or_else(|| de::Error::custom("string literal expects a string value"))?
                    .to_string(),
            ),
            "boolean" => LitValue::Bool(
                value
                    .as_bool()
                    .ok_or_else(|| de::Error::custom("boolean literal expects a bool value"))?,
            ),
            "number" => LitValue::Num(
                decode_num(&value)
                    .ok_or_else(|| de::Error::custom("number literal expects a number or sentinel"))?,
            ),
            other => return Err(de::Error::custom(format!("unknown primType: {other}"))),
        };
        Ok(TypeTag::Literal(lit))
    }
}

impl<'de> Deserialize<'de> for TypeTag {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(TypeTagVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{NativeFunction, PlainObject};

    fn cov(value: &Value) -> TypeTag {
        classify(value, Variance::Covariant)
    }

    fn contra(value: &Value) -> TypeTag {
        classify(value, Variance::Contravariant)
    }

    #[test]
    fn test_classify_dispatch_order() {
        assert_eq!(cov(&Value::Null), TypeTag::Null);
        assert_eq!(cov(&Value::Undefined), TypeTag::Undefined);
        assert_eq!(cov(&Value::error("boom")), TypeTag::Error);
        assert_eq!(cov(&Value::array(vec![])), TypeTag::Array);
        assert_eq!(cov(&Value::empty_map()), TypeTag::Map);
        assert_eq!(cov(&Value::empty_set()), TypeTag::Set);
        assert_eq!(cov(&PlainObject::new_value()), TypeTag::Object);
        let f = NativeFunction::new("f", |_, _| Ok(Value::Undefined));
        assert_eq!(cov(&f), TypeTag::Function);
    }

    #[test]
    fn test_literal_refinement_only_covariant() {
        assert_eq!(
            cov(&Value::str("hello")),
            TypeTag::Literal(LitValue::Str("hello".into()))
        );
        assert_eq!(contra(&Value::str("hello")), TypeTag::String);
        assert_eq!(cov(&Value::Num(5.0)), TypeTag::Literal(LitValue::Num(5.0)));
        assert_eq!(contra(&Value::Num(5.0)), TypeTag::Number);
        assert_eq!(contra(&Value::Bool(true)), TypeTag::Boolean);
    }

    #[test]
    fn test_compatible_null_accepts_anything() {
        assert!(compatible(&TypeTag::Function, &TypeTag::Null));
        assert!(compatible(&TypeTag::Literal(LitValue::Num(1.0)), &TypeTag::Null));
    }

    #[test]
    fn test_compatible_object_widening() {
        assert!(compatible(&TypeTag::Function, &TypeTag::Object));
        assert!(compatible(&TypeTag::Map, &TypeTag::Object));
        assert!(compatible(&TypeTag::Set, &TypeTag::Object));
        assert!(!compatible(&TypeTag::Array, &TypeTag::Object));
        assert!(!compatible(&TypeTag::Number, &TypeTag::Object));
    }

    #[test]
    fn test_compatible_primitives_by_prim_type() {
        let lit5 = TypeTag::Literal(LitValue::Num(5.0));
        let lit7 = TypeTag::Literal(LitValue::Num(7.0));
        assert!(compatible(&lit5, &lit7));
        assert!(compatible(&lit5, &TypeTag::Number));
        assert!(compatible(&TypeTag::Number, &lit5));
        assert!(!compatible(&TypeTag::Literal(LitValue::Str("5".into())), &lit5));
        assert!(!compatible(&TypeTag::Literal(LitValue::Str("x".into())), &TypeTag::Number));
    }

    #[test]
    fn test_compatible_rejects_cross_kind() {
        assert!(!compatible(&TypeTag::String, &TypeTag::Number));
        assert!(!compatible(&TypeTag::Object, &TypeTag::Function));
        assert!(!compatible(&TypeTag::Array, &TypeTag::Set));
    }

    #[test]
    fn test_serde_plain_tags() {
        let json = serde_json::to_string(&TypeTag::Function).unwrap();
        assert_eq!(json, "\"function\"");
        let back: TypeTag = serde_json::from_str(&json).unwrap();
        assert_eq!(back, TypeTag::Function);
    }

    #[test]
    fn test_serde_literal_roundtrip() {
        let tag = TypeTag::Literal(LitValue::Str("hello".into()));
        let json = serde_json::to_value(&tag).unwrap();
        assert_eq!(json["primType"], "string");
        assert_eq!(json["value"], "hello");
        let back: TypeTag = serde_json::from_value(json).unwrap();
        assert_eq!(back, tag);
    }

    #[test]
    fn test_serde_sentinels() {
        for (n, sentinel) in [
            (f64::INFINITY, "Infinity"),
            (f64::NEG_INFINITY, "-Infinity"),
            (f64::NAN, "NaN"),
        ] {
            let tag = TypeTag::Literal(LitValue::Num(n));
            let json = serde_json::to_value(&tag).unwrap();
            assert_eq!(json["value"], *sentinel);
            let back: TypeTag = serde_json::from_value(json).unwrap();
            assert_eq!(back, tag);
        }
    }
}
