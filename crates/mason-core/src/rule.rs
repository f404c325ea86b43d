//! Rule, task and check records.
//!
//! A rule maps one or more target specifiers to a handler plus its
//! `depends` and `uses` lists. Handlers are opaque boxed async
//! callables so the data model stays independent of the executor.

use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;

use crate::pattern::Pattern;

/// What a rule claims to build: a concrete name or a `%` pattern.
#[derive(Clone, Debug)]
pub enum TargetSpec {
    Name(String),
    Wildcard(Pattern),
}

impl TargetSpec {
    pub fn display(&self) -> &str {
        match self {
            Self::Name(n) => n,
            Self::Wildcard(p) => p.as_str(),
        }
    }
}

/// Declared dependencies: a fixed list, or a closure invoked with the
/// concrete target at binding time.
#[derive(Clone)]
pub enum Depends {
    Static(Vec<String>),
    Dynamic(Arc<dyn Fn(&str) -> Vec<String> + Send + Sync>),
}

impl Depends {
    pub fn none() -> Self {
        Self::Static(Vec::new())
    }

    /// Materialize the dependency list for `target`.
    pub fn resolve(&self, target: &str) -> Vec<String> {
        match self {
            Self::Static(items) => items.clone(),
            Self::Dynamic(f) => f(target),
        }
    }
}

impl std::fmt::Debug for Depends {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Static(items) => f.debug_tuple("Static").field(items).finish(),
            Self::Dynamic(_) => f.write_str("Dynamic(..)"),
        }
    }
}

/// Failure signal out of a handler or a check probe.
#[derive(Clone, Debug)]
pub struct HandlerError(pub String);

impl std::fmt::Display for HandlerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for HandlerError {}

impl From<String> for HandlerError {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for HandlerError {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<std::io::Error> for HandlerError {
    fn from(e: std::io::Error) -> Self {
        Self(e.to_string())
    }
}

/// Build requests raised from inside a handler. They are not executed
/// immediately; the scheduler drains them after the current run.
#[derive(Clone, Default)]
pub struct DeferredBuilds(Arc<Mutex<Vec<String>>>);

impl DeferredBuilds {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&self, target: impl Into<String>) {
        self.0.lock().expect("deferred-build queue poisoned").push(target.into());
    }

    pub fn drain(&self) -> Vec<String> {
        std::mem::take(&mut *self.0.lock().expect("deferred-build queue poisoned"))
    }
}

/// Argument vector for one handler run: the target plus the bound
/// `depends` in declaration order. `uses` are never passed.
#[derive(Clone)]
pub struct Invocation {
    pub target: String,
    pub deps: Vec<String>,
    builds: DeferredBuilds,
}

impl Invocation {
    pub fn new(target: impl Into<String>, deps: Vec<String>, builds: DeferredBuilds) -> Self {
        Self {
            target: target.into(),
            deps,
            builds,
        }
    }

    /// First dependency, for the common single-input rule shape.
    pub fn dep(&self) -> &str {
        self.deps.first().map(String::as_str).unwrap_or_default()
    }

    /// Request another target to be built after this run completes.
    pub fn build(&self, target: impl Into<String>) {
        self.builds.enqueue(target);
    }
}

pub type HandlerResult = std::result::Result<(), HandlerError>;

pub type Handler = Arc<dyn Fn(Invocation) -> BoxFuture<'static, HandlerResult> + Send + Sync>;

/// Wrap an async closure into a [`Handler`].
pub fn handler<F, Fut>(f: F) -> Handler
where
    F: Fn(Invocation) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = HandlerResult> + Send + 'static,
{
    Arc::new(move |inv| Box::pin(f(inv)))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RuleKind {
    /// Produces a file; staleness is timestamp-driven.
    File,
    /// Phony action; always stale, no output verification.
    Task,
}

/// Immutable after registration.
pub struct Rule {
    pub targets: Vec<TargetSpec>,
    /// Static-pattern template paired with an enumerated target list.
    pub pattern: Option<Pattern>,
    pub depends: Depends,
    pub uses: Vec<String>,
    pub handler: Handler,
    pub kind: RuleKind,
}

impl Rule {
    pub fn is_task(&self) -> bool {
        self.kind == RuleKind::Task
    }
}

impl std::fmt::Debug for Rule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rule")
            .field("targets", &self.targets)
            .field("pattern", &self.pattern)
            .field("depends", &self.depends)
            .field("uses", &self.uses)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

pub type ProbeResult = std::result::Result<serde_json::Value, HandlerError>;

/// Staleness probe for virtual resources. The returned value is opaque;
/// only equality against the persisted value matters.
pub type Probe = Arc<dyn Fn(String) -> BoxFuture<'static, ProbeResult> + Send + Sync>;

/// Wrap an async closure into a [`Probe`].
pub fn probe<F, Fut>(f: F) -> Probe
where
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = ProbeResult> + Send + 'static,
{
    Arc::new(move |name| Box::pin(f(name)))
}

/// A staleness probe paired with the resource patterns it covers.
pub struct Check {
    pub patterns: Vec<Pattern>,
    pub probe: Probe,
}

impl Check {
    pub fn matches(&self, name: &str) -> bool {
        self.patterns.iter().any(|p| p.bind(name).is_some())
    }
}
