//! # Host Bridge
//!
//! Presents a mediated module loader to client scripts: asking for the
//! subject library returns a tracer-wrapped root, every other specifier
//! resolves and loads unmodified. Resolution follows the host convention:
//! relative specifiers resolve against the requesting module's directory with
//! extension fall-through, bare specifiers walk parent `rt_modules`
//! directories reading `module.json` for the entry point (default
//! `index.rt`). The bridge also drives client execution; client errors are
//! logged and skipped so a partial model is still extracted.

use regex::Regex;
use serde::Deserialize;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::ModulesConfig;
use crate::script::{base_env, exec_program, parse_program, Env, ParseError};
use crate::tracer::TraceSession;
use crate::value::{NativeFunction, PlainObject, PropKey, RtError, Value};

/// Bridge failures. Missing subject libraries are configuration errors and
/// fatal; client execution errors never surface here.
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("invalid module specifier: {0}")]
    InvalidSpecifier(String),

    #[error("module not found: '{name}' (from {})", .from.display())]
    ModuleNotFound { name: String, from: PathBuf },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{}: {source}", .file.display())]
    Parse { file: PathBuf, source: ParseError },

    #[error("bad module manifest {}: {source}", .file.display())]
    Manifest { file: PathBuf, source: serde_json::Error },

    #[error("error evaluating {}: {source}", .file.display())]
    Eval { file: PathBuf, source: RtError },

    #[error("client path is not a file or directory: {}", .0.display())]
    BadClientPath(PathBuf),
}

/// `module.json` manifest: the package entry point.
#[derive(Debug, Deserialize)]
struct Manifest {
    main: Option<String>,
}

/// The mediated loader shared by every module of a run.
pub struct HostBridge {
    library: String,
    modules: ModulesConfig,
    session: Option<TraceSession>,
    cache: RefCell<HashMap<PathBuf, Value>>,
    specifier_re: Regex,
}

impl HostBridge {
    /// A bridge that wraps `library` for tracing. Pass `session: None` for
    /// replay-side loading, where nothing is wrapped.
    pub fn new(library: &str, modules: ModulesConfig, session: Option<TraceSession>) -> Rc<Self> {
        Rc::new(HostBridge {
            library: library.to_string(),
            modules,
            session,
            cache: RefCell::new(HashMap::new()),
            specifier_re: Regex::new(r"^[A-Za-z0-9_@][A-Za-z0-9_@.\-/]*$|^\.{1,2}/[A-Za-z0-9_@.\-/]+$")
                .expect("specifier pattern is valid"),
        })
    }

    pub fn session(&self) -> Option<&TraceSession> {
        self.session.as_ref()
    }

    /// Resolve a specifier the way the host runtime would.
    pub fn resolve(&self, spec: &str, from_dir: &Path) -> Result<PathBuf, BridgeError> {
        if !self.specifier_re.is_match(spec) {
            return Err(BridgeError::InvalidSpecifier(spec.to_string()));
        }
        if spec.starts_with("./") || spec.starts_with("../") {
            let base = from_dir.join(spec);
            if let Some(found) = self.resolve_file_or_dir(&base)? {
                return Ok(found);
            }
        } else {
            // Bare specifier: walk parent package directories.
            let mut dir = Some(from_dir.to_path_buf());
            while let Some(current) = dir {
                let base = current.join(&self.modules.dir_name).join(spec);
                if let Some(found) = self.resolve_file_or_dir(&base)? {
                    return Ok(found);
                }
                dir = current.parent().map(Path::to_path_buf);
            }
        }
        Err(BridgeError::ModuleNotFound { name: spec.to_string(), from: from_dir.to_path_buf() })
    }

    /// Try `base` as a file (with extension fall-through), then as a package
    /// directory with a manifest.
    fn resolve_file_or_dir(&self, base: &Path) -> Result<Option<PathBuf>, BridgeError> {
        if base.is_file() {
            return Ok(Some(base.to_path_buf()));
        }
        for ext in &self.modules.extensions {
            let candidate = PathBuf::from(format!("{}.{ext}", base.display()));
            if candidate.is_file() {
                return Ok(Some(candidate));
            }
        }
        if base.is_dir() {
            let manifest_path = base.join("module.json");
            if manifest_path.is_file() {
                let text = fs::read_to_string(&manifest_path)?;
                let manifest: Manifest = serde_json::from_str(&text)
                    .map_err(|source| BridgeError::Manifest { file: manifest_path, source })?;
                if let Some(main) = manifest.main {
                    let entry = base.join(main);
                    if entry.is_file() {
                        return Ok(Some(entry));
                    }
                    return Ok(None);
                }
            }
            let fallback = base.join(format!(
                "index.{}",
                self.modules.extensions.first().map(String::as_str).unwrap_or("rt")
            ));
            if fallback.is_file() {
                return Ok(Some(fallback));
            }
        }
        Ok(None)
    }

    /// The loader handed to scripts: the subject library comes back wrapped,
    /// everything else raw.
    pub fn load(bridge: &Rc<Self>, spec: &str, from_dir: &Path) -> Result<Value, BridgeError> {
        let raw = Self::load_raw(bridge, spec, from_dir)?;
        if spec == bridge.library {
            if let Some(session) = &bridge.session {
                return Ok(session.wrap_root(spec, raw));
            }
        }
        Ok(raw)
    }

    /// Resolve and evaluate a module, without wrapping. Modules are cached
    /// per canonical path; cycles observe the partially-built exports.
    pub fn load_raw(bridge: &Rc<Self>, spec: &str, from_dir: &Path) -> Result<Value, BridgeError> {
        let resolved = bridge.resolve(spec, from_dir)?;
        let canonical = resolved.canonicalize()?;
        if let Some(cached) = bridge.cache.borrow().get(&canonical) {
            return Ok(cached.clone());
        }
        debug!(module = spec, file = %canonical.display(), "module_load");

        let source = fs::read_to_string(&canonical)?;
        let stmts = parse_program(&source)
            .map_err(|source| BridgeError::Parse { file: canonical.clone(), source })?;

        let exports = PlainObject::new_value();
        let module = PlainObject::from_entries(vec![("exports".to_string(), exports.clone())]);
        bridge.cache.borrow_mut().insert(canonical.clone(), exports.clone());

        let env = Self::module_env(bridge, canonical.parent().unwrap_or(Path::new(".")));
        env.define("exports", exports);
        env.define("module", module.clone());
        exec_program(&stmts, &env)
            .map_err(|source| BridgeError::Eval { file: canonical.clone(), source })?;

        // The body may have reassigned module.exports.
        let final_exports = module
            .get(&PropKey::name("exports"))
            .map_err(|source| BridgeError::Eval { file: canonical.clone(), source })?;
        bridge.cache.borrow_mut().insert(canonical, final_exports.clone());
        Ok(final_exports)
    }

    /// Root scope for a module or client file: builtins plus a `load` bound
    /// to the file's directory.
    fn module_env(bridge: &Rc<Self>, dir: &Path) -> Env {
        let env = base_env();
        let bridge = Rc::clone(bridge);
        let dir = dir.to_path_buf();
        env.define(
            "load",
            NativeFunction::new("load", move |_this, args| {
                let name = match args.first().and_then(|v| v.as_str()) {
                    Some(name) => name.to_string(),
                    None => return Err(RtError::Type("load expects a module name".into())),
                };
                HostBridge::load(&bridge, &name, &dir)
                    .map_err(|e| RtError::Thrown(e.to_string()))
            }),
        );
        env
    }
}

/// How client files are executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    /// The file body runs as-is with `load` in scope.
    Plain,
    /// Additionally binds synchronous test-framework shims
    /// (`describe`/`it`/`test`/`before`/`after`).
    TestFramework,
}

/// Drives client execution over the mediated loader.
pub struct ClientRunner {
    bridge: Rc<HostBridge>,
    mode: ExecutionMode,
}

impl ClientRunner {
    pub fn new(bridge: Rc<HostBridge>, mode: ExecutionMode) -> Self {
        ClientRunner { bridge, mode }
    }

    /// Execute a client file, or every script file of a directory in name
    /// order. Returns how many files ran. Per-file failures are logged and
    /// skipped; the paths gathered before the failure are kept.
    pub fn run(&self, client: &Path) -> Result<usize, BridgeError> {
        let mut files = Vec::new();
        if client.is_file() {
            files.push(client.to_path_buf());
        } else if client.is_dir() {
            for entry in fs::read_dir(client)? {
                let path = entry?.path();
                let matches = path
                    .extension()
                    .and_then(|e| e.to_str())
                    .map(|ext| self.bridge.modules.extensions.iter().any(|e| e == ext))
                    .unwrap_or(false);
                if path.is_file() && matches {
                    files.push(path);
                }
            }
            files.sort();
        } else {
            return Err(BridgeError::BadClientPath(client.to_path_buf()));
        }

        for file in &files {
            self.run_file(file);
        }
        Ok(files.len())
    }

    /// Execute one client file; never fatal.
    fn run_file(&self, file: &Path) {
        debug!(file = %file.display(), "client_run");
        let source = match fs::read_to_string(file) {
            Ok(source) => source,
            Err(error) => {
                warn!(file = %file.display(), error = %error, "client_read_failed");
                return;
            }
        };
        let stmts = match parse_program(&source) {
            Ok(stmts) => stmts,
            Err(error) => {
                warn!(file = %file.display(), error = %error, "client_parse_failed");
                return;
            }
        };
        let env = HostBridge::module_env(&self.bridge, file.parent().unwrap_or(Path::new(".")));
        if self.mode == ExecutionMode::TestFramework {
            bind_test_shims(&env);
        }
        if let Err(error) = exec_program(&stmts, &env) {
            warn!(file = %file.display(), error = %error, "client_execution_failed");
        }
    }
}

/// Synchronous shims for the test framework's suite and case registrars:
/// each immediately runs the callback, and a failing case does not stop the
/// remaining ones.
fn bind_test_shims(env: &Env) {
    for registrar in ["describe", "it", "test", "before", "after"] {
        env.define(
            registrar,
            NativeFunction::new(registrar, move |_this, args| {
                let callback = args.iter().find(|a| {
                    a.as_obj().map(|o| o.is_callable()).unwrap_or(false)
                });
                let title = args
                    .first()
                    .and_then(|a| a.as_str())
                    .unwrap_or("<anonymous>")
                    .to_string();
                if let Some(callback) = callback {
                    if let Err(error) = callback.call(Value::Undefined, &[]) {
                        warn!(case = %title, error = %error, "test_case_failed");
                    }
                }
                Ok(Value::Undefined)
            }),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write(dir: &Path, rel: &str, contents: &str) -> PathBuf {
        let path = dir.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, contents).unwrap();
        path
    }

    fn bridge_at(library: &str) -> Rc<HostBridge> {
        HostBridge::new(library, ModulesConfig::default(), Some(TraceSession::new()))
    }

    #[test]
    fn test_relative_resolution_prefers_first_extension() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "util.rt", "exports.a = 1;");
        write(tmp.path(), "util.rts", "exports.a = 2;");
        let bridge = bridge_at("lib");
        let resolved = bridge.resolve("./util", tmp.path()).unwrap();
        assert_eq!(resolved, tmp.path().join("util.rt"));
    }

    #[test]
    fn test_bare_specifier_walks_parent_module_dirs() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "rt_modules/leftpad/index.rt", "exports.pad = 1;");
        let nested = tmp.path().join("a/b");
        fs::create_dir_all(&nested).unwrap();
        let bridge = bridge_at("lib");
        let resolved = bridge.resolve("leftpad", &nested).unwrap();
        assert_eq!(resolved, tmp.path().join("rt_modules/leftpad/index.rt"));
    }

    #[test]
    fn test_manifest_main_overrides_index() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "rt_modules/pkg/module.json", "{\"main\": \"entry.rt\"}");
        write(tmp.path(), "rt_modules/pkg/entry.rt", "exports.ok = true;");
        write(tmp.path(), "rt_modules/pkg/index.rt", "exports.ok = false;");
        let bridge = bridge_at("lib");
        let resolved = bridge.resolve("pkg", tmp.path()).unwrap();
        assert_eq!(resolved, tmp.path().join("rt_modules/pkg/entry.rt"));
    }

    #[test]
    fn test_missing_module_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let bridge = bridge_at("lib");
        let err = bridge.resolve("ghost", tmp.path()).unwrap_err();
        assert!(matches!(err, BridgeError::ModuleNotFound { .. }));
    }

    #[test]
    fn test_invalid_specifier_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let bridge = bridge_at("lib");
        assert!(matches!(
            bridge.resolve("bad name!", tmp.path()),
            Err(BridgeError::InvalidSpecifier(_))
        ));
    }

    #[test]
    fn test_subject_library_comes_back_wrapped_others_raw() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "rt_modules/mylib/index.rt", "exports.greet = \"hello\";");
        write(tmp.path(), "rt_modules/other/index.rt", "exports.x = 1;");
        let bridge = bridge_at("mylib");

        let lib = HostBridge::load(&bridge, "mylib", tmp.path()).unwrap();
        assert!(lib.traced_path().is_some());

        let other = HostBridge::load(&bridge, "other", tmp.path()).unwrap();
        assert!(other.traced_path().is_none());
    }

    #[test]
    fn test_module_cache_returns_same_instance() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "rt_modules/m/index.rt", "exports.obj = {};");
        let bridge = bridge_at("lib");
        let a = HostBridge::load_raw(&bridge, "m", tmp.path()).unwrap();
        let b = HostBridge::load_raw(&bridge, "m", tmp.path()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_module_exports_reassignment() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "rt_modules/f/index.rt", "module.exports = fn(x) { return x; };");
        let bridge = bridge_at("lib");
        let f = HostBridge::load_raw(&bridge, "f", tmp.path()).unwrap();
        assert_eq!(f.kind(), "function");
    }

    #[test]
    fn test_client_runner_traces_through_loader() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "rt_modules/mylib/index.rt", "exports.greet = \"hello\";");
        let client = write(tmp.path(), "client.rt", "let lib = load(\"mylib\");\nlib.greet;\n");

        let bridge = bridge_at("mylib");
        let runner = ClientRunner::new(bridge.clone(), ExecutionMode::Plain);
        assert_eq!(runner.run(&client).unwrap(), 1);

        let observed = bridge.session().unwrap().observations();
        assert_eq!(observed.len(), 2);
        assert_eq!(observed[1].0.to_string(), "require(mylib).greet");
    }

    #[test]
    fn test_client_errors_are_swallowed_and_partial_paths_kept() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "rt_modules/mylib/index.rt", "exports.a = 1;");
        let client =
            write(tmp.path(), "client.rt", "let lib = load(\"mylib\");\nlib.a;\nghost();\n");

        let bridge = bridge_at("mylib");
        let runner = ClientRunner::new(bridge.clone(), ExecutionMode::Plain);
        assert_eq!(runner.run(&client).unwrap(), 1);
        assert_eq!(bridge.session().unwrap().observations().len(), 2);
    }

    #[test]
    fn test_directory_clients_run_in_name_order() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "rt_modules/mylib/index.rt", "exports.a = 1;\nexports.b = 2;");
        let clients = tmp.path().join("clients");
        write(&clients, "b.rt", "load(\"mylib\").b;");
        write(&clients, "a.rt", "load(\"mylib\").a;");
        write(&clients, "notes.txt", "not a script");

        let bridge = bridge_at("mylib");
        let runner = ClientRunner::new(bridge.clone(), ExecutionMode::Plain);
        assert_eq!(runner.run(&clients).unwrap(), 2);

        let observed = bridge.session().unwrap().observations();
        let names: Vec<String> = observed.iter().map(|(p, _, _)| p.to_string()).collect();
        // a.rt ran before b.rt.
        assert_eq!(
            names,
            vec!["require(mylib)", "require(mylib).a", "require(mylib).b"]
        );
    }

    #[test]
    fn test_test_framework_shims_run_synchronously() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "rt_modules/mylib/index.rt", "exports.n = 5;");
        let client = write(
            tmp.path(),
            "spec.rt",
            "let lib = load(\"mylib\");\n\
             describe(\"suite\", fn() {\n\
               it(\"reads n\", fn() { lib.n; });\n\
               it(\"fails\", fn() { ghost(); });\n\
               it(\"still runs\", fn() { lib.n; });\n\
             });\n",
        );

        let bridge = bridge_at("mylib");
        let runner = ClientRunner::new(bridge.clone(), ExecutionMode::TestFramework);
        runner.run(&client).unwrap();
        // The failing case did not stop the third one; lib.n recorded once.
        let observed = bridge.session().unwrap().observations();
        assert_eq!(observed.len(), 2);
    }
}
