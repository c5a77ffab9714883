//! Read-only call client answering from a dump store.
//!
//! Implements the same [`FunctionCaller`] interface as a live collector, so
//! consumer wiring does not care whether a bridge or a replay client is
//! behind it. Calling a function absent from the store fails immediately;
//! calling a known function with unrecorded arguments invokes the miss hook,
//! then falls back to the fallback record when one exists.

// Rust guideline compliant 2026-03

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use super::{fallback_key, record_key, DumpRecord, DumpStore};
use crate::collector::FunctionCaller;
use crate::error::CallError;
use crate::hash::arg_hash;

/// Hook invoked with the name and arguments of every replay miss.
pub type MissHook = Arc<dyn Fn(&str, &[Value]) + Send + Sync>;

/// [`FunctionCaller`] serving calls from a [`DumpStore`].
pub struct ReplayClient {
    store: Arc<DumpStore>,
    on_miss: Option<MissHook>,
}

impl std::fmt::Debug for ReplayClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplayClient")
            .field("functions", &self.store.definitions.len())
            .field("records", &self.store.records.len())
            .finish_non_exhaustive()
    }
}

impl ReplayClient {
    /// Wrap a store, with an optional observability hook for misses.
    pub fn from_store(store: DumpStore, on_miss: Option<MissHook>) -> Self {
        Self {
            store: Arc::new(store),
            on_miss,
        }
    }

    fn materialize(record: &DumpRecord) -> Result<Value, CallError> {
        if let Some(error) = &record.error {
            return Err(CallError::Replayed {
                name: error.name.clone(),
                message: error.message.clone(),
            });
        }
        Ok(record.output.clone().unwrap_or(Value::Null))
    }
}

#[async_trait]
impl FunctionCaller for ReplayClient {
    async fn call(&self, name: &str, args: Vec<Value>) -> Result<Value, CallError> {
        // Unknown function: fail before any argument matching
        if !self.store.definitions.contains_key(name) {
            return Err(CallError::FunctionNotFound(name.to_string()));
        }

        let key = record_key(name, &arg_hash(&args));
        if let Some(record) = self.store.records.get(&key) {
            return Self::materialize(record);
        }

        log::debug!("[Replay] miss for '{name}'");
        if let Some(hook) = &self.on_miss {
            hook(name, &args);
        }

        if let Some(fallback) = self.store.records.get(&fallback_key(name)) {
            return Self::materialize(fallback);
        }

        Err(CallError::NoDumpMatch {
            function: name.to_string(),
            args: serde_json::to_string(&args).unwrap_or_else(|_| "<unprintable>".to_string()),
        })
    }

    fn has(&self, name: &str) -> bool {
        self.store.definitions.contains_key(name)
    }

    fn names(&self) -> Vec<String> {
        self.store.definitions.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dump::{dump_functions, DumpOptions};
    use crate::function::{sync_handler, DumpData, FunctionDef};
    use serde_json::json;
    use std::sync::Mutex;

    async fn sum_store(with_fallback: bool) -> DumpStore {
        let mut def = FunctionDef::<()>::query("sum")
            .handler(sync_handler(|args| {
                let a = args[0].as_i64().unwrap_or(0);
                let b = args[1].as_i64().unwrap_or(0);
                Ok(json!(a + b))
            }))
            .dump_inputs(vec![vec![json!(1), json!(2)], vec![json!(3), json!(4)]]);
        if with_fallback {
            def = def.fallback(json!(-1));
        }
        dump_functions(&[Arc::new(def)], &(), &DumpOptions::default())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_replay_hits_recorded_inputs() {
        let client = ReplayClient::from_store(sum_store(false).await, None);
        assert_eq!(
            client.call("sum", vec![json!(1), json!(2)]).await.unwrap(),
            json!(3)
        );
        assert_eq!(
            client.call("sum", vec![json!(3), json!(4)]).await.unwrap(),
            json!(7)
        );
    }

    #[tokio::test]
    async fn test_replay_miss_without_fallback_is_descriptive() {
        let misses = Arc::new(Mutex::new(Vec::<String>::new()));
        let misses2 = misses.clone();
        let client = ReplayClient::from_store(
            sum_store(false).await,
            Some(Arc::new(move |name, args| {
                misses2
                    .lock()
                    .unwrap()
                    .push(format!("{name}{args:?}"));
            })),
        );

        let err = client.call("sum", vec![json!(9), json!(9)]).await.unwrap_err();
        match err {
            CallError::NoDumpMatch { function, args } => {
                assert_eq!(function, "sum");
                assert!(args.contains('9'));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(misses.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_replay_miss_with_fallback_serves_fallback() {
        let client = ReplayClient::from_store(sum_store(true).await, None);
        assert_eq!(
            client.call("sum", vec![json!(9), json!(9)]).await.unwrap(),
            json!(-1)
        );
    }

    #[tokio::test]
    async fn test_unknown_function_fails_before_matching() {
        let misses = Arc::new(Mutex::new(0usize));
        let misses2 = misses.clone();
        let client = ReplayClient::from_store(
            sum_store(true).await,
            Some(Arc::new(move |_, _| *misses2.lock().unwrap() += 1)),
        );

        let err = client.call("other", vec![]).await.unwrap_err();
        assert!(matches!(err, CallError::FunctionNotFound(name) if name == "other"));
        // Not a miss: the function does not exist in this dump at all
        assert_eq!(*misses.lock().unwrap(), 0);
        assert!(!client.has("other"));
        assert!(client.has("sum"));
    }

    #[tokio::test]
    async fn test_replayed_error_reconstructs_name_and_message() {
        let flaky = FunctionDef::<()>::query("flaky")
            .handler(sync_handler(|_| anyhow::bail!("backend unavailable")))
            .dump(DumpData::inputs(vec![vec![json!(1)]]));
        let store = dump_functions(&[Arc::new(flaky)], &(), &DumpOptions::default())
            .await
            .unwrap();

        let client = ReplayClient::from_store(store, None);
        let err = client.call("flaky", vec![json!(1)]).await.unwrap_err();
        match err {
            CallError::Replayed { name, message } => {
                assert_eq!(name, "Error");
                assert!(message.contains("backend unavailable"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
