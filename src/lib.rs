//! # Retrace
//!
//! Model-based detection of breaking API changes in dynamic-module
//! ecosystems. Retrace works in two phases:
//!
//! ## Pipeline Architecture
//!
//! ### Phase 1: Model extraction
//! ```text
//! Client Script(s)
//!     ↓
//! [Host Bridge]        → mediated `load`, subject library wrapped
//!     ↓
//! [Tracer]             → access paths + ρ-relations recorded per interaction
//!     ↓
//! [Path Tree]          → prefix-shared tree, observation orders
//!     ↓
//! [Compression]        → structural-hash collapse of redundant call subtrees
//!     ↓
//! [Persistence]        → model.json (paths + rhoRelations)
//! ```
//!
//! ### Phase 2: Regression check
//! ```text
//! model.json + new library version
//!     ↓
//! [Model Tree]         → arena mirror with per-node replay state
//!     ↓
//! [Replayer]           → demand-ordered traversal, covariant type checks
//!     ↓
//! [Synthesizer]        → lazy stand-ins for client-supplied values
//!     ↓
//! Breaking-path report
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use retrace::{ClientRunner, Config, ExecutionMode, HostBridge, TraceSession};
//! use retrace::storage::{self, ModelFile};
//!
//! // Phase 1: trace a client against the subject library.
//! let config = Config::load()?;
//! let bridge = HostBridge::new("mylib", config.modules.clone(), Some(TraceSession::new()));
//! ClientRunner::new(bridge.clone(), ExecutionMode::Plain).run("client.rt".as_ref())?;
//! let mut tree = bridge.session().unwrap().finish();
//! tree.compress(config.trace.policy);
//! storage::save_model("model.json".as_ref(), &ModelFile::from_tree(&tree))?;
//!
//! // Phase 2: replay the model against a new version.
//! let model = storage::load_model("model.json".as_ref())?;
//! let bridge = HostBridge::new("mylib", config.modules, None);
//! let breakages = retrace::Replayer::new(&model, bridge, ".".as_ref(), None)?.run()?;
//! ```
//!
//! ## Module Organization
//!
//! | Module | Purpose |
//! |--------|---------|
//! | `value` | Dynamic value runtime (`Value`, `ObjectLike`) |
//! | `lattice` | Type tags, classification, compatibility |
//! | `path` | Access-path components and variance |
//! | `tree` | Observed-path tree and structural-hash compression |
//! | `tracer` | Interposition mediator |
//! | `script` | Client/library script language |
//! | `bridge` | Module resolution and client execution |
//! | `model` | Replay-side model tree |
//! | `replay` | Demand-ordered replay and value synthesis |
//! | `storage` | Model and report persistence |

pub mod bridge;
pub mod config;
pub mod lattice;
pub mod model;
pub mod path;
pub mod replay;
pub mod script;
pub mod storage;
pub mod tracer;
pub mod tree;
pub mod value;

pub use bridge::{BridgeError, ClientRunner, ExecutionMode, HostBridge};
pub use config::Config;
pub use lattice::{classify, compatible, TypeTag};
pub use model::{ModelError, ModelTree};
pub use path::{AccessPath, CallId, PathComponent, Variance};
pub use replay::{Breakage, Replayer, ReplayError};
pub use storage::{load_model, save_model, ModelFile};
pub use tracer::TraceSession;
pub use tree::{CompressionPolicy, PathTree};
pub use value::Value;
