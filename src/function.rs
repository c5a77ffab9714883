//! Function definitions: the unit of a callable capability.
//!
//! A definition owns a name, an invocation kind, a handler (given directly or
//! produced lazily by a `setup` factory), optional argument/return validators,
//! and an optional dump spec describing how to materialize the function for
//! offline replay.
//!
//! # Lazy setup resolution
//!
//! A `setup` factory runs at most once per definition. The first caller
//! drives the resolution; concurrent first callers await the same in-flight
//! future; every later call reuses the cached handler. Failures propagate to
//! the caller and leave the definition unresolved, so the next call retries.

// Rust guideline compliant 2026-03

use std::sync::Arc;

use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::OnceCell;

use crate::dump::DumpRecord;
use crate::error::CallError;

/// Wire-visible invocation kind of a function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FunctionKind {
    /// Takes no meaningful arguments; dumpable and cacheable by default.
    Static,
    /// Performs a side effect; response awaited; never dumpable.
    Action,
    /// Fire-and-forget side effect; no response awaited; never dumpable.
    Event,
    /// Pure-ish read; may be cached and dumped.
    Query,
}

impl FunctionKind {
    /// Whether this kind may carry a dump spec.
    pub fn dumpable(self) -> bool {
        matches!(self, Self::Static | Self::Query)
    }

    /// Lowercase name as it appears on the wire.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Static => "static",
            Self::Action => "action",
            Self::Event => "event",
            Self::Query => "query",
        }
    }
}

impl std::fmt::Display for FunctionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Type-erased async handler over positional JSON arguments.
pub type Handler =
    Arc<dyn Fn(Vec<Value>) -> BoxFuture<'static, anyhow::Result<Value>> + Send + Sync>;

/// Argument validator, run before the handler.
pub type ArgsValidator = Arc<dyn Fn(&[Value]) -> Result<(), String> + Send + Sync>;

/// Return-value validator, run after the handler.
pub type ReturnsValidator = Arc<dyn Fn(&Value) -> Result<(), String> + Send + Sync>;

/// Wrap an async closure into a [`Handler`].
pub fn handler<F, Fut>(f: F) -> Handler
where
    F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = anyhow::Result<Value>> + Send + 'static,
{
    Arc::new(move |args| Box::pin(f(args)))
}

/// Wrap a synchronous closure into a [`Handler`].
pub fn sync_handler<F>(f: F) -> Handler
where
    F: Fn(Vec<Value>) -> anyhow::Result<Value> + Send + Sync + 'static,
{
    Arc::new(move |args| {
        let out = f(args);
        Box::pin(async move { out })
    })
}

/// What a `setup` factory produces: the handler plus an optional dump spec.
pub struct SetupOutput<Ctx> {
    /// The resolved handler.
    pub handler: Handler,
    /// Dump spec discovered during setup; overrides one given at build time.
    pub dump: Option<DumpSpec<Ctx>>,
}

/// Lazily-invoked factory producing the handler under a collector context.
pub type SetupFn<Ctx> =
    Arc<dyn Fn(Ctx) -> BoxFuture<'static, anyhow::Result<SetupOutput<Ctx>>> + Send + Sync>;

/// Wrap an async closure into a [`SetupFn`].
pub fn setup<Ctx, F, Fut>(f: F) -> SetupFn<Ctx>
where
    F: Fn(Ctx) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = anyhow::Result<SetupOutput<Ctx>>> + Send + 'static,
{
    Arc::new(move |ctx| Box::pin(f(ctx)))
}

/// Declared dump material for a function.
#[derive(Clone, Default)]
pub struct DumpData {
    /// Argument tuples to execute the handler with.
    pub inputs: Vec<Vec<Value>>,
    /// Pre-computed records copied verbatim (handler not invoked).
    pub records: Vec<DumpRecord>,
    /// Value served when a replayed call matches no record.
    pub fallback: Option<Value>,
}

impl DumpData {
    /// Dump data consisting only of input tuples.
    pub fn inputs(inputs: Vec<Vec<Value>>) -> Self {
        Self {
            inputs,
            ..Self::default()
        }
    }
}

/// Factory form of a dump spec: receives the context and the resolved handler.
pub type DumpFactory<Ctx> =
    Arc<dyn Fn(Ctx, Handler) -> BoxFuture<'static, anyhow::Result<DumpData>> + Send + Sync>;

/// How a function declares its offline materialization.
#[derive(Clone)]
pub enum DumpSpec<Ctx> {
    /// Fixed dump data declared up front.
    Static(DumpData),
    /// Dump data computed when the dump is collected.
    Factory(DumpFactory<Ctx>),
}

/// Where the handler comes from.
enum HandlerSource<Ctx> {
    /// No handler was attached; calls fail descriptively.
    Missing,
    /// Directly supplied handler.
    Direct(Handler),
    /// Lazily resolved through a setup factory.
    Setup(SetupFn<Ctx>),
}

/// Outcome of resolving a definition: handler plus the effective dump spec.
pub(crate) struct Resolved<Ctx> {
    pub(crate) handler: Handler,
    pub(crate) dump: Option<DumpSpec<Ctx>>,
}

/// A callable capability registered with a [`Collector`](crate::Collector).
pub struct FunctionDef<Ctx> {
    name: String,
    kind: FunctionKind,
    source: HandlerSource<Ctx>,
    dump: Option<DumpSpec<Ctx>>,
    args_check: Option<ArgsValidator>,
    returns_check: Option<ReturnsValidator>,
    resolved: OnceCell<Resolved<Ctx>>,
}

impl<Ctx> std::fmt::Debug for FunctionDef<Ctx> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionDef")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

impl<Ctx: Clone + Send + Sync + 'static> FunctionDef<Ctx> {
    /// Create a definition of the given kind.
    pub fn new(kind: FunctionKind, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            source: HandlerSource::Missing,
            dump: None,
            args_check: None,
            returns_check: None,
            resolved: OnceCell::new(),
        }
    }

    /// Shorthand for a `query` definition.
    pub fn query(name: impl Into<String>) -> Self {
        Self::new(FunctionKind::Query, name)
    }

    /// Shorthand for an `action` definition.
    pub fn action(name: impl Into<String>) -> Self {
        Self::new(FunctionKind::Action, name)
    }

    /// Shorthand for an `event` definition.
    pub fn event(name: impl Into<String>) -> Self {
        Self::new(FunctionKind::Event, name)
    }

    /// Shorthand for a `static` definition.
    pub fn static_fn(name: impl Into<String>) -> Self {
        Self::new(FunctionKind::Static, name)
    }

    /// Attach a direct handler.
    pub fn handler(mut self, h: Handler) -> Self {
        self.source = HandlerSource::Direct(h);
        self
    }

    /// Attach a lazily-resolved setup factory.
    pub fn setup(mut self, s: SetupFn<Ctx>) -> Self {
        self.source = HandlerSource::Setup(s);
        self
    }

    /// Attach a fixed dump spec.
    pub fn dump(mut self, data: DumpData) -> Self {
        self.dump = Some(DumpSpec::Static(data));
        self
    }

    /// Attach a dump factory evaluated at collection time.
    pub fn dump_with(mut self, factory: DumpFactory<Ctx>) -> Self {
        self.dump = Some(DumpSpec::Factory(factory));
        self
    }

    /// Shorthand: declare the input tuples to dump.
    pub fn dump_inputs(self, inputs: Vec<Vec<Value>>) -> Self {
        self.dump(DumpData::inputs(inputs))
    }

    /// Shorthand: declare a replay fallback value, keeping other dump data.
    pub fn fallback(mut self, value: Value) -> Self {
        match &mut self.dump {
            Some(DumpSpec::Static(data)) => data.fallback = Some(value),
            _ => {
                self.dump = Some(DumpSpec::Static(DumpData {
                    fallback: Some(value),
                    ..DumpData::default()
                }));
            }
        }
        self
    }

    /// Attach an argument validator.
    pub fn args_check(mut self, v: ArgsValidator) -> Self {
        self.args_check = Some(v);
        self
    }

    /// Attach a return-value validator.
    pub fn returns_check(mut self, v: ReturnsValidator) -> Self {
        self.returns_check = Some(v);
        self
    }

    /// The unique name within one collector.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The invocation kind.
    pub fn kind(&self) -> FunctionKind {
        self.kind
    }

    /// The dump spec declared at build time (before setup resolution).
    pub fn declared_dump(&self) -> Option<&DumpSpec<Ctx>> {
        self.dump.as_ref()
    }

    /// Resolve the handler, running `setup` at most once.
    pub(crate) async fn resolve(&self, ctx: &Ctx) -> Result<&Resolved<Ctx>, CallError> {
        self.resolved
            .get_or_try_init(|| async {
                match &self.source {
                    HandlerSource::Missing => Err(CallError::Setup {
                        function: self.name.clone(),
                        message: "definition has neither a handler nor a setup".into(),
                    }),
                    HandlerSource::Direct(h) => Ok(Resolved {
                        handler: h.clone(),
                        dump: self.dump.clone(),
                    }),
                    HandlerSource::Setup(s) => {
                        let out = s(ctx.clone()).await.map_err(|e| CallError::Setup {
                            function: self.name.clone(),
                            message: e.to_string(),
                        })?;
                        Ok(Resolved {
                            handler: out.handler,
                            dump: out.dump.or_else(|| self.dump.clone()),
                        })
                    }
                }
            })
            .await
    }

    /// Resolved handler, running `setup` on first use.
    ///
    /// # Errors
    ///
    /// Returns `CallError::Setup` if no handler is attached or the setup
    /// factory fails.
    pub async fn get_handler(&self, ctx: &Ctx) -> Result<Handler, CallError> {
        Ok(self.resolve(ctx).await?.handler.clone())
    }

    /// Run the validators and handler for one call.
    pub(crate) async fn invoke(&self, ctx: &Ctx, args: Vec<Value>) -> Result<Value, CallError> {
        if let Some(check) = &self.args_check {
            check(&args).map_err(|message| CallError::InvalidArgs {
                function: self.name.clone(),
                message,
            })?;
        }

        let handler = self.get_handler(ctx).await?;
        let value = handler(args).await.map_err(|e| CallError::Handler {
            function: self.name.clone(),
            message: e.to_string(),
        })?;

        if let Some(check) = &self.returns_check {
            check(&value).map_err(|message| CallError::InvalidReturn {
                function: self.name.clone(),
                message,
            })?;
        }
        Ok(value)
    }
}
