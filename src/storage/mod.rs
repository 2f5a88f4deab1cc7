//! # Model Persistence
//!
//! Serializes and parses models in a portable JSON form: a top-level object
//! with `paths` (ordered array of `{path, type, order}` records) and
//! `rhoRelations` (array of `[source, sink]` path pairs). Non-finite number
//! literals travel as the string sentinels `"Infinity"`, `"-Infinity"` and
//! `"NaN"`; the type-tag codec restores them on load. Check runs can also
//! persist their findings as a JSON report.

pub mod error;

pub use error::{StorageError, StorageResult};

use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use crate::lattice::TypeTag;
use crate::path::AccessPath;
use crate::replay::Breakage;
use crate::tree::PathTree;

/// One observed path with its recorded type and observation order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathRecord {
    pub path: AccessPath,
    #[serde(rename = "type")]
    pub ty: TypeTag,
    pub order: u64,
}

/// The persisted model: every observation plus the ρ-relations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelFile {
    pub paths: Vec<PathRecord>,
    #[serde(rename = "rhoRelations")]
    pub rho_relations: Vec<(AccessPath, AccessPath)>,
}

impl ModelFile {
    /// Snapshot a traced path tree into its persisted form.
    pub fn from_tree(tree: &PathTree) -> Self {
        let paths = tree
            .observations()
            .into_iter()
            .map(|(path, ty, order)| PathRecord { path, ty, order })
            .collect();
        let rho_relations = tree
            .rho_relations()
            .iter()
            .map(|relation| (tree.path_of(relation.source), tree.path_of(relation.sink)))
            .collect();
        ModelFile { paths, rho_relations }
    }
}

/// Write a model to disk as JSON.
pub fn save_model(path: &Path, model: &ModelFile) -> StorageResult<()> {
    let file = File::create(path)?;
    let writer = BufWriter::new(file);
    serde_json::to_writer_pretty(writer, model)?;
    Ok(())
}

/// Read a model back from disk.
pub fn load_model(path: &Path) -> StorageResult<ModelFile> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let model: ModelFile = serde_json::from_reader(reader)?;
    if model.paths.is_empty() {
        return Err(StorageError::InvalidModel("model contains no paths".into()));
    }
    Ok(model)
}

/// Outcome of one regression check, for `--out`.
#[derive(Debug, Serialize)]
pub struct CheckReport {
    pub model: String,
    pub library: String,
    pub generated_at: String,
    pub breakages: Vec<Breakage>,
}

impl CheckReport {
    pub fn new(model: &str, library: &str, breakages: Vec<Breakage>) -> Self {
        CheckReport {
            model: model.to_string(),
            library: library.to_string(),
            generated_at: chrono::Utc::now().to_rfc3339(),
            breakages,
        }
    }
}

/// Write a check report to disk as JSON.
pub fn save_report(path: &Path, report: &CheckReport) -> StorageResult<()> {
    let file = File::create(path)?;
    let writer = BufWriter::new(file);
    serde_json::to_writer_pretty(writer, report)?;
    Ok(())
}
