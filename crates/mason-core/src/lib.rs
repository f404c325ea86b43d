//! mason-core: the data model behind the Mason build engine.
//!
//! Rules, tasks, checks and the registry that selects the best rule
//! for a target. Everything here is independent of the executor; the
//! engine consumes a finished [`Registry`] and never mutates it.

pub mod error;
pub mod pattern;
pub mod registry;
pub mod rule;

pub use error::{Error, Result};
pub use pattern::{substitute, Pattern};
pub use registry::{Binding, Registry};
pub use rule::{
    handler, probe, Check, DeferredBuilds, Depends, Handler, HandlerError, HandlerResult,
    Invocation, Probe, ProbeResult, Rule, RuleKind, TargetSpec,
};
