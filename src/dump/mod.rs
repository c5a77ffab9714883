//! Offline materialization of query/static functions.
//!
//! A dump store executes the dumpable functions of a collector ahead of time
//! for a declared set of argument tuples and captures the results in a plain
//! JSON file. A statically-hosted consumer then answers calls from the store
//! (see [`replay`]) instead of a live bridge.
//!
//! # Record keys
//!
//! Records are keyed `"<name>---<arg_hash>"`, with the hash taken over the
//! canonical form of the argument tuple, so argument objects built with a
//! different key order still match. A declared fallback is stored under
//! `"<name>---fallback"`.

// Rust guideline compliant 2026-03

pub mod replay;

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, Utc};
use futures_util::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::DumpError;
use crate::function::{DumpData, DumpSpec, FunctionDef, FunctionKind, Handler};
use crate::hash::arg_hash;

/// Error name recorded for generic handler failures.
const GENERIC_ERROR_NAME: &str = "Error";

/// Separator between the function name and the hash in record keys.
pub const KEY_SEPARATOR: &str = "---";

/// Key for the record of one argument tuple.
pub fn record_key(name: &str, hash: &str) -> String {
    format!("{name}{KEY_SEPARATOR}{hash}")
}

/// Key for a function's fallback record.
pub fn fallback_key(name: &str) -> String {
    format!("{name}{KEY_SEPARATOR}fallback")
}

/// A function present in a dump store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DumpedFunction {
    /// Function name.
    pub name: String,
    /// Invocation kind, kept for consumers that branch on it.
    #[serde(rename = "type")]
    pub kind: FunctionKind,
}

/// Error captured from a failing handler during collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DumpErrorInfo {
    /// Error name, used to reconstruct the failure on replay.
    pub name: String,
    /// Error message.
    pub message: String,
}

/// One materialized call: the inputs plus either an output or an error.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DumpRecord {
    /// The argument tuple this record answers.
    pub inputs: Vec<Value>,
    /// Successful handler output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    /// Captured handler failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<DumpErrorInfo>,
}

/// JSON-serializable materialization of a collector's dumpable functions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DumpStore {
    /// Functions that produced at least one record.
    pub definitions: BTreeMap<String, DumpedFunction>,
    /// Records keyed by `"<name>---<arg_hash>"` / `"<name>---fallback"`.
    pub records: BTreeMap<String, DumpRecord>,
    /// Collection timestamp; absent on hand-built stores.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generated_at: Option<DateTime<Utc>>,
}

impl DumpStore {
    /// Write the store as pretty-printed JSON, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns an error when serialization or the write fails.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(self).context("failed to serialize dump store")?;
        std::fs::write(path, json)
            .with_context(|| format!("failed to write dump store to {}", path.display()))?;
        Ok(())
    }

    /// Read a store back from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error when the file is missing or not a valid store.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read dump store from {}", path.display()))?;
        serde_json::from_str(&json).context("failed to parse dump store")
    }
}

/// How many handler executions may run at once during collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Concurrency {
    /// One at a time.
    #[default]
    Sequential,
    /// The default bounded pool (5).
    Bounded,
    /// An explicit bound.
    Limit(usize),
}

impl Concurrency {
    fn limit(self) -> usize {
        match self {
            Self::Sequential => 1,
            Self::Bounded => 5,
            Self::Limit(n) => n.max(1),
        }
    }
}

/// Options for [`dump_functions`].
#[derive(Debug, Clone, Copy, Default)]
pub struct DumpOptions {
    /// Execution parallelism for setup resolution and handler runs.
    pub concurrency: Concurrency,
}

/// Collect a dump store from a set of definitions.
///
/// Side-effecting kinds (`action`, `event`) carrying a dump spec are rejected
/// before any handler runs. Dumpable definitions without a spec are skipped,
/// except `static` ones, which get an implicit single no-argument input.
///
/// # Errors
///
/// Returns `DumpError::NotDumpable` for the validation failure above, and
/// `DumpError::Setup`/`DumpError::Factory` when resolving a definition or
/// evaluating its dump factory fails. Individual handler failures do not fail
/// the collection; they become error records.
pub async fn dump_functions<Ctx: Clone + Send + Sync + 'static>(
    defs: &[Arc<FunctionDef<Ctx>>],
    ctx: &Ctx,
    options: &DumpOptions,
) -> Result<DumpStore, DumpError> {
    // Validation pass, before any execution
    for def in defs {
        if !def.kind().dumpable() && def.declared_dump().is_some() {
            return Err(DumpError::NotDumpable {
                name: def.name().to_string(),
                kind: def.kind().to_string(),
            });
        }
    }

    let candidates: Vec<Arc<FunctionDef<Ctx>>> = defs
        .iter()
        .filter(|def| {
            def.kind().dumpable()
                && (def.declared_dump().is_some() || def.kind() == FunctionKind::Static)
        })
        .cloned()
        .collect();

    let limit = options.concurrency.limit();

    // Phase 1: resolve setups and materialize dump data, bounded
    let prepared: Vec<Result<(Arc<FunctionDef<Ctx>>, Handler, DumpData), DumpError>> =
        stream::iter(candidates.into_iter().map(|def| {
            let ctx = ctx.clone();
            async move {
                let name = def.name().to_string();
                let (handler, spec) = {
                    let resolved = def.resolve(&ctx).await.map_err(|e| DumpError::Setup {
                        name: name.clone(),
                        message: e.to_string(),
                    })?;
                    (resolved.handler.clone(), resolved.dump.clone())
                };

                let data = match spec {
                    Some(DumpSpec::Static(data)) => data,
                    Some(DumpSpec::Factory(factory)) => factory(ctx.clone(), handler.clone())
                        .await
                        .map_err(|e| DumpError::Factory {
                            name: name.clone(),
                            message: e.to_string(),
                        })?,
                    // Static kind with no explicit spec: one no-argument call
                    None => DumpData::inputs(vec![vec![]]),
                };
                Ok((def, handler, data))
            }
        }))
        .buffer_unordered(limit)
        .collect()
        .await;

    let mut store = DumpStore {
        generated_at: Some(Utc::now()),
        ..DumpStore::default()
    };
    let mut kinds: HashMap<String, FunctionKind> = HashMap::new();

    struct ExecTask {
        name: String,
        handler: Handler,
        inputs: Vec<Value>,
    }
    let mut exec_tasks = Vec::new();

    for prepared in prepared {
        let (def, handler, data) = prepared?;
        let name = def.name().to_string();
        kinds.insert(name.clone(), def.kind());

        // Pre-supplied records are copied verbatim, keyed by their inputs
        for record in data.records {
            let key = record_key(&name, &arg_hash(&record.inputs));
            store.records.insert(key, record);
            mark(&mut store, &kinds, &name);
        }
        if let Some(fallback) = data.fallback {
            store.records.insert(
                fallback_key(&name),
                DumpRecord {
                    inputs: Vec::new(),
                    output: Some(fallback),
                    error: None,
                },
            );
            mark(&mut store, &kinds, &name);
        }
        for inputs in data.inputs {
            exec_tasks.push(ExecTask {
                name: name.clone(),
                handler: handler.clone(),
                inputs,
            });
        }
    }

    // Phase 2: execute declared inputs, bounded
    let executed: Vec<(String, String, DumpRecord)> = stream::iter(exec_tasks.into_iter().map(
        |task| async move {
            let key = record_key(&task.name, &arg_hash(&task.inputs));
            let record = match (task.handler)(task.inputs.clone()).await {
                Ok(output) => DumpRecord {
                    inputs: task.inputs,
                    output: Some(output),
                    error: None,
                },
                Err(e) => DumpRecord {
                    inputs: task.inputs,
                    output: None,
                    error: Some(DumpErrorInfo {
                        name: GENERIC_ERROR_NAME.to_string(),
                        message: e.to_string(),
                    }),
                },
            };
            (task.name, key, record)
        },
    ))
    .buffer_unordered(limit)
    .collect()
    .await;

    for (name, key, record) in executed {
        store.records.insert(key, record);
        mark(&mut store, &kinds, &name);
    }

    log::info!(
        "[Dump] collected {} record(s) across {} function(s)",
        store.records.len(),
        store.definitions.len()
    );
    Ok(store)
}

fn mark(store: &mut DumpStore, kinds: &HashMap<String, FunctionKind>, name: &str) {
    if !store.definitions.contains_key(name) {
        if let Some(kind) = kinds.get(name) {
            store.definitions.insert(
                name.to_string(),
                DumpedFunction {
                    name: name.to_string(),
                    kind: *kind,
                },
            );
        }
    }
}
