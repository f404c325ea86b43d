//! The project definition surface.
//!
//! A build binary constructs a [`Project`] and registers rules, tasks
//! and checks through the builders here; [`crate::cli::run`] hands the
//! finished registry to the engine. Targets, dependencies and uses
//! accept a single name or a sequence of names.

use std::collections::HashMap;
use std::sync::Arc;

use mason_core::{
    handler, probe, Check, Depends, HandlerResult, Invocation, Pattern, ProbeResult, Registry,
    Result, Rule, RuleKind, TargetSpec,
};

/// Accepts a scalar name or a sequence of names.
pub trait IntoNames {
    fn into_names(self) -> Vec<String>;
}

impl IntoNames for &str {
    fn into_names(self) -> Vec<String> {
        vec![self.to_string()]
    }
}

impl IntoNames for String {
    fn into_names(self) -> Vec<String> {
        vec![self]
    }
}

impl IntoNames for Vec<String> {
    fn into_names(self) -> Vec<String> {
        self
    }
}

impl IntoNames for &[&str] {
    fn into_names(self) -> Vec<String> {
        self.iter().map(|s| s.to_string()).collect()
    }
}

impl<const N: usize> IntoNames for [&str; N] {
    fn into_names(self) -> Vec<String> {
        self.iter().map(|s| s.to_string()).collect()
    }
}

impl<const N: usize> IntoNames for [String; N] {
    fn into_names(self) -> Vec<String> {
        self.into_iter().collect()
    }
}

#[derive(Default)]
pub struct Project {
    registry: Registry,
    /// Name -> value pairs populated from `-D KEY=VAL` flags.
    params: HashMap<String, String>,
}

impl Project {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    pub fn set_param(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.params.insert(key.into(), value.into());
    }

    /// Declare a rule for one or more targets. Targets containing `%`
    /// are wildcards. Finish with [`RuleBuilder::run`].
    pub fn rule(&mut self, targets: impl IntoNames) -> RuleBuilder<'_> {
        RuleBuilder {
            project: self,
            targets: targets.into_names(),
            pattern: None,
            depends: Depends::none(),
            uses: Vec::new(),
        }
    }

    /// Declare a named phony task. Tasks are always stale and produce
    /// no artifact. Finish with [`TaskBuilder::run`].
    pub fn task(&mut self, name: impl Into<String>) -> TaskBuilder<'_> {
        TaskBuilder {
            project: self,
            name: name.into(),
            default: false,
            depends: Depends::none(),
            uses: Vec::new(),
        }
    }

    /// Register a staleness probe for virtual resources matching any of
    /// `patterns`. Finish with [`CheckBuilder::probe`].
    pub fn check(&mut self, patterns: impl IntoNames) -> CheckBuilder<'_> {
        CheckBuilder {
            project: self,
            patterns: patterns.into_names(),
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn into_registry(self) -> Registry {
        self.registry
    }
}

pub struct RuleBuilder<'p> {
    project: &'p mut Project,
    targets: Vec<String>,
    pattern: Option<String>,
    depends: Depends,
    uses: Vec<String>,
}

impl RuleBuilder<'_> {
    /// Static-pattern template: maps each enumerated target to a stem
    /// used for `%` substitution in the dependency lists.
    pub fn pattern(mut self, pattern: impl Into<String>) -> Self {
        self.pattern = Some(pattern.into());
        self
    }

    pub fn depends(mut self, depends: impl IntoNames) -> Self {
        self.depends = Depends::Static(depends.into_names());
        self
    }

    /// Dynamic dependencies: the closure receives the concrete target
    /// at binding time.
    pub fn depends_with<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) -> Vec<String> + Send + Sync + 'static,
    {
        self.depends = Depends::Dynamic(Arc::new(f));
        self
    }

    /// Order-only prerequisites: must exist before the handler runs,
    /// never trigger rebuilds, never passed as arguments.
    pub fn uses(mut self, uses: impl IntoNames) -> Self {
        self.uses = uses.into_names();
        self
    }

    /// Attach the handler and register the rule.
    pub fn run<F, Fut>(self, f: F) -> Result<()>
    where
        F: Fn(Invocation) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = HandlerResult> + Send + 'static,
    {
        let targets = self
            .targets
            .iter()
            .map(|t| {
                Ok(if t.contains('%') {
                    TargetSpec::Wildcard(Pattern::new(t.clone())?)
                } else {
                    TargetSpec::Name(t.clone())
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let pattern = self.pattern.map(Pattern::new).transpose()?;
        self.project.registry.add_rule(Rule {
            targets,
            pattern,
            depends: self.depends,
            uses: self.uses,
            handler: handler(f),
            kind: RuleKind::File,
        })?;
        Ok(())
    }
}

pub struct TaskBuilder<'p> {
    project: &'p mut Project,
    name: String,
    default: bool,
    depends: Depends,
    uses: Vec<String>,
}

impl TaskBuilder<'_> {
    /// Make this the task built when no targets are requested. At most
    /// one task per project may be the default.
    pub fn default_task(mut self) -> Self {
        self.default = true;
        self
    }

    pub fn depends(mut self, depends: impl IntoNames) -> Self {
        self.depends = Depends::Static(depends.into_names());
        self
    }

    pub fn uses(mut self, uses: impl IntoNames) -> Self {
        self.uses = uses.into_names();
        self
    }

    pub fn run<F, Fut>(self, f: F) -> Result<()>
    where
        F: Fn(Invocation) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = HandlerResult> + Send + 'static,
    {
        if self.default {
            self.project.registry.set_default(self.name.clone())?;
        }
        self.project.registry.add_rule(Rule {
            targets: vec![TargetSpec::Name(self.name)],
            pattern: None,
            depends: self.depends,
            uses: self.uses,
            handler: handler(f),
            kind: RuleKind::Task,
        })?;
        Ok(())
    }
}

pub struct CheckBuilder<'p> {
    project: &'p mut Project,
    patterns: Vec<String>,
}

impl CheckBuilder<'_> {
    /// Attach the probe and register the check. The probe receives the
    /// concrete resource name and returns an opaque value; a change in
    /// that value between runs marks dependents stale.
    pub fn probe<F, Fut>(self, f: F) -> Result<()>
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = ProbeResult> + Send + 'static,
    {
        let patterns = self
            .patterns
            .into_iter()
            .map(Pattern::new)
            .collect::<Result<Vec<_>>>()?;
        self.project.registry.add_check(Check {
            patterns,
            probe: probe(f),
        });
        Ok(())
    }
}
