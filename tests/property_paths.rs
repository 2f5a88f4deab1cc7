//! Property-based invariants over paths, trees, and persistence (proptest).

use proptest::prelude::*;

use retrace::lattice::{LitValue, TypeTag};
use retrace::storage::ModelFile;
use retrace::tree::PathTree;
use retrace::{AccessPath, PathComponent, Variance};

fn prop_name() -> impl Strategy<Value = String> {
    prop_oneof![Just("a".into()), Just("b".into()), Just("foo".into()), Just("bar".into())]
}

fn call_id() -> impl Strategy<Value = String> {
    prop_oneof![Just("c1c1c1".into()), Just("c2c2c2".into()), Just("c3c3c3".into())]
}

fn component() -> impl Strategy<Value = PathComponent> {
    prop_oneof![
        prop_name().prop_map(|prop_name| PathComponent::AccessProp { prop_name }),
        prop_name().prop_map(|prop_name| PathComponent::WriteProp { prop_name }),
        (call_id(), 0u32..3).prop_map(|(id, arg_id)| PathComponent::Arg {
            call_id: id.as_str().into(),
            arg_id,
        }),
        call_id().prop_map(|id| PathComponent::Call { call_id: id.as_str().into() }),
        call_id().prop_map(|id| PathComponent::New { call_id: id.as_str().into() }),
    ]
}

fn access_path() -> impl Strategy<Value = AccessPath> {
    proptest::collection::vec(component(), 0..6).prop_map(|tail| {
        let mut path = AccessPath::require("lib");
        for component in tail {
            path = path.extend(component);
        }
        path
    })
}

fn type_tag() -> impl Strategy<Value = TypeTag> {
    prop_oneof![
        Just(TypeTag::Null),
        Just(TypeTag::Undefined),
        Just(TypeTag::String),
        Just(TypeTag::Number),
        Just(TypeTag::Boolean),
        Just(TypeTag::Array),
        Just(TypeTag::Object),
        Just(TypeTag::Function),
        Just(TypeTag::Map),
        Just(TypeTag::Set),
        Just(TypeTag::Error),
        any::<bool>().prop_map(|b| TypeTag::Literal(LitValue::Bool(b))),
        "[a-z]{0,8}".prop_map(|s| TypeTag::Literal(LitValue::Str(s))),
        prop_oneof![
            any::<i32>().prop_map(|n| n as f64),
            Just(f64::INFINITY),
            Just(f64::NEG_INFINITY),
            Just(f64::NAN),
        ]
        .prop_map(|n| TypeTag::Literal(LitValue::Num(n))),
    ]
}

/// Record a path the way the tracer does: every prefix before the terminal.
fn record_with_prefixes(tree: &mut PathTree, path: &AccessPath, ty: TypeTag) {
    for len in 1..path.components().len() {
        let prefix = AccessPath::from_components(path.components()[..len].to_vec());
        tree.record(&prefix, TypeTag::Object);
    }
    tree.record(path, ty);
}

proptest! {
    #[test]
    fn variance_equals_parity_of_flipping_components(path in access_path()) {
        let flips = path
            .components()
            .iter()
            .filter(|c| matches!(c, PathComponent::Arg { .. } | PathComponent::WriteProp { .. }))
            .count();
        let expected = if flips % 2 == 0 { Variance::Covariant } else { Variance::Contravariant };
        prop_assert_eq!(path.variance(), expected);
    }

    #[test]
    fn recording_is_idempotent(paths in proptest::collection::vec(access_path(), 1..12)) {
        let mut tree = PathTree::new();
        for path in &paths {
            record_with_prefixes(&mut tree, path, TypeTag::Number);
        }
        let before = tree.observations();
        for path in &paths {
            record_with_prefixes(&mut tree, path, TypeTag::String);
        }
        // Re-recording changed neither structure, types, nor orders.
        prop_assert_eq!(tree.observations(), before);
    }

    #[test]
    fn orders_are_a_dense_bijection(paths in proptest::collection::vec(access_path(), 1..12)) {
        let mut tree = PathTree::new();
        for path in &paths {
            record_with_prefixes(&mut tree, path, TypeTag::Boolean);
        }
        let mut orders: Vec<u64> =
            tree.observations().iter().map(|(_, _, order)| *order).collect();
        orders.sort_unstable();
        let expected: Vec<u64> = (0..orders.len() as u64).collect();
        prop_assert_eq!(orders, expected);
    }

    #[test]
    fn model_json_roundtrips(
        entries in proptest::collection::vec((access_path(), type_tag()), 1..10)
    ) {
        let mut tree = PathTree::new();
        for (path, ty) in &entries {
            record_with_prefixes(&mut tree, path, ty.clone());
        }
        let model = ModelFile::from_tree(&tree);
        let json = serde_json::to_string(&model).unwrap();
        let back: ModelFile = serde_json::from_str(&json).unwrap();
        prop_assert_eq!(back, model);
    }

    #[test]
    fn compression_never_breaks_order_density(
        entries in proptest::collection::vec((access_path(), type_tag()), 1..10)
    ) {
        let mut tree = PathTree::new();
        for (path, ty) in &entries {
            record_with_prefixes(&mut tree, path, ty.clone());
        }
        tree.compress(retrace::CompressionPolicy::NoArgs);
        let mut orders: Vec<u64> =
            tree.observations().iter().map(|(_, _, order)| *order).collect();
        orders.sort_unstable();
        let expected: Vec<u64> = (0..orders.len() as u64).collect();
        prop_assert_eq!(orders, expected);
    }
}
