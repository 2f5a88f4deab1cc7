//! Path-tree insertion and compression benchmarks.
//!
//! The compression case mirrors the motivating workload: a test suite that
//! exercises the same call site many times, producing sibling call subtrees
//! that differ only in their call identifiers.

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use retrace::lattice::{LitValue, TypeTag};
use retrace::tree::{CompressionPolicy, PathTree};
use retrace::{AccessPath, PathComponent};

fn access(prop: &str) -> PathComponent {
    PathComponent::AccessProp { prop_name: prop.to_string() }
}

/// A tree shaped like a looping client: `props` properties, each called
/// `repeats` times with an identical outcome shape.
fn looping_client_tree(props: usize, repeats: usize) -> PathTree {
    let mut tree = PathTree::new();
    let root = AccessPath::require("lib");
    tree.record(&root, TypeTag::Object);
    for p in 0..props {
        let prop = root.extend(access(&format!("op{p}")));
        tree.record(&prop, TypeTag::Function);
        for r in 0..repeats {
            let call_id = format!("c{p:03}x{r:04}");
            let arg = prop.extend(PathComponent::Arg {
                call_id: call_id.as_str().into(),
                arg_id: 0,
            });
            tree.record(&arg, TypeTag::Number);
            let call = prop.extend(PathComponent::Call { call_id: call_id.as_str().into() });
            tree.record(&call, TypeTag::Literal(LitValue::Num(r as f64)));
        }
    }
    tree
}

fn bench_record(c: &mut Criterion) {
    c.bench_function("record_10k_paths", |b| {
        b.iter(|| black_box(looping_client_tree(10, 500)))
    });
}

fn bench_compress(c: &mut Criterion) {
    c.bench_function("compress_repeated_calls", |b| {
        b.iter_with_setup(
            || looping_client_tree(10, 200),
            |mut tree| {
                tree.compress(CompressionPolicy::NoArgs);
                black_box(tree.len())
            },
        )
    });
}

criterion_group!(benches, bench_record, bench_compress);
criterion_main!(benches);
