//! Access-Path Algebra
//!
//! An access path describes how a value was obtained from (or handed to) the
//! subject library: a `require` root followed by property reads/writes,
//! argument positions, and call/construct results. Paths are compared
//! structurally on their identity keys, and the parity of `arg` + `writeProp`
//! components determines whether a position is produced by the library
//! (covariant) or supplied by the client (contravariant).

use rand::distributions::Alphanumeric;
use rand::{thread_rng, Rng};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Length of a freshly generated call identifier.
const CALL_ID_LEN: usize = 6;

/// Identifier tying together a call result and its argument positions.
///
/// Only required to be unique within a single tracing run; six alphanumeric
/// glyphs give 62^6 possibilities, far beyond any realistic call count.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallId(String);

impl CallId {
    /// Generate a fresh random identifier.
    pub fn fresh() -> Self {
        let id: String = thread_rng()
            .sample_iter(&Alphanumeric)
            .take(CALL_ID_LEN)
            .map(char::from)
            .collect();
        CallId(id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for CallId {
    fn from(s: &str) -> Self {
        CallId(s.to_string())
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One step of an access path.
///
/// The serialized form carries a `compType` discriminator plus the identity
/// keys of the variant, e.g. `{"compType":"arg","callId":"aB3xYz","argId":0}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "compType")]
pub enum PathComponent {
    /// Top-level acquisition of the subject module.
    #[serde(rename = "require")]
    Require {
        #[serde(rename = "moduleName")]
        module_name: String,
    },
    /// Reading a named property.
    #[serde(rename = "accessProp")]
    AccessProp {
        #[serde(rename = "propName")]
        prop_name: String,
    },
    /// Writing a named property.
    #[serde(rename = "writeProp")]
    WriteProp {
        #[serde(rename = "propName")]
        prop_name: String,
    },
    /// Value passed at a positional argument of a call site.
    #[serde(rename = "arg")]
    Arg {
        #[serde(rename = "callId")]
        call_id: CallId,
        #[serde(rename = "argId")]
        arg_id: u32,
    },
    /// Result of an ordinary function invocation.
    #[serde(rename = "call")]
    Call {
        #[serde(rename = "callId")]
        call_id: CallId,
    },
    /// Result of a constructor invocation.
    #[serde(rename = "new")]
    New {
        #[serde(rename = "callId")]
        call_id: CallId,
    },
}

impl PathComponent {
    /// True for the components that flip a path's variance.
    pub fn flips_variance(&self) -> bool {
        matches!(self, PathComponent::Arg { .. } | PathComponent::WriteProp { .. })
    }
}

impl fmt::Display for PathComponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathComponent::Require { module_name } => write!(f, "require({module_name})"),
            PathComponent::AccessProp { prop_name } => write!(f, ".{prop_name}"),
            PathComponent::WriteProp { prop_name } => write!(f, "={prop_name}"),
            PathComponent::Arg { call_id, arg_id } => write!(f, ".arg({call_id},{arg_id})"),
            PathComponent::Call { call_id } => write!(f, ".call({call_id})"),
            PathComponent::New { call_id } => write!(f, ".new({call_id})"),
        }
    }
}

/// Whether a position is produced by the library or supplied by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Variance {
    /// The library produces the value at this position.
    Covariant,
    /// The client supplies the value at this position.
    Contravariant,
}

/// An ordered sequence of path components, rooted at a `require`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccessPath(Vec<PathComponent>);

impl AccessPath {
    /// The root path for a subject module.
    pub fn require(module_name: &str) -> Self {
        AccessPath(vec![PathComponent::Require {
            module_name: module_name.to_string(),
        }])
    }

    pub fn from_components(components: Vec<PathComponent>) -> Self {
        AccessPath(components)
    }

    /// A new path with `component` appended.
    pub fn extend(&self, component: PathComponent) -> Self {
        let mut components = self.0.clone();
        components.push(component);
        AccessPath(components)
    }

    pub fn components(&self) -> &[PathComponent] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Variance of the complete path: even `arg`+`writeProp` count is
    /// covariant, odd is contravariant.
    pub fn variance(&self) -> Variance {
        let flips = self.0.iter().filter(|c| c.flips_variance()).count();
        if flips % 2 == 0 {
            Variance::Covariant
        } else {
            Variance::Contravariant
        }
    }
}

impl fmt::Display for AccessPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for component in &self.0 {
            write!(f, "{component}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(id: &str) -> PathComponent {
        PathComponent::Call { call_id: CallId::from(id) }
    }

    fn arg(id: &str, n: u32) -> PathComponent {
        PathComponent::Arg { call_id: CallId::from(id), arg_id: n }
    }

    #[test]
    fn test_fresh_call_ids_are_alphanumeric() {
        let id = CallId::fresh();
        assert_eq!(id.as_str().len(), 6);
        assert!(id.as_str().chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn test_variance_parity() {
        let root = AccessPath::require("lib");
        assert_eq!(root.variance(), Variance::Covariant);

        let read = root.extend(PathComponent::AccessProp { prop_name: "f".into() });
        assert_eq!(read.variance(), Variance::Covariant);

        let argument = read.extend(arg("c1", 0));
        assert_eq!(argument.variance(), Variance::Contravariant);

        // An argument the library passes back into a client callback.
        let nested = argument.extend(arg("c2", 0));
        assert_eq!(nested.variance(), Variance::Covariant);

        let write = read.extend(PathComponent::WriteProp { prop_name: "x".into() });
        assert_eq!(write.variance(), Variance::Contravariant);
    }

    #[test]
    fn test_component_serialization_carries_comp_type() {
        let json = serde_json::to_value(&call("aB3xYz")).unwrap();
        assert_eq!(json["compType"], "call");
        assert_eq!(json["callId"], "aB3xYz");

        let json = serde_json::to_value(&arg("aB3xYz", 2)).unwrap();
        assert_eq!(json["compType"], "arg");
        assert_eq!(json["argId"], 2);

        let json = serde_json::to_value(&PathComponent::Require {
            module_name: "left-pad".into(),
        })
        .unwrap();
        assert_eq!(json["compType"], "require");
        assert_eq!(json["moduleName"], "left-pad");
    }

    #[test]
    fn test_component_roundtrip() {
        let components = vec![
            PathComponent::Require { module_name: "lib".into() },
            PathComponent::AccessProp { prop_name: "greet".into() },
            PathComponent::WriteProp { prop_name: "color".into() },
            arg("q1W2e3", 0),
            call("q1W2e3"),
            PathComponent::New { call_id: CallId::from("z9Y8x7") },
        ];
        let path = AccessPath::from_components(components);
        let json = serde_json::to_string(&path).unwrap();
        let back: AccessPath = serde_json::from_str(&json).unwrap();
        assert_eq!(path, back);
    }

    #[test]
    fn test_paths_equal_on_identity_keys() {
        let a = AccessPath::require("lib").extend(call("c1"));
        let b = AccessPath::require("lib").extend(call("c1"));
        let c = AccessPath::require("lib").extend(call("c2"));
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_display_is_compact() {
        let path = AccessPath::require("lib")
            .extend(PathComponent::AccessProp { prop_name: "greet".into() })
            .extend(call("aB3xYz"));
        assert_eq!(path.to_string(), "require(lib).greet.call(aB3xYz)");
    }
}
