//! Rule and check storage plus best-match selection.
//!
//! Rules are kept in registration order; that order is the tie-break
//! for otherwise equal matches. Concrete rules always win over
//! wildcard rules for a target they name.

use crate::error::{Error, Result};
use crate::pattern::{substitute, Pattern};
use crate::rule::{Check, Rule, TargetSpec};

/// A rule bound to a concrete target: which rule, the stem (when the
/// match went through a pattern), and the substituted dependency lists.
#[derive(Clone, Debug)]
pub struct Binding {
    pub rule: usize,
    pub stem: Option<String>,
    pub depends: Vec<String>,
    pub uses: Vec<String>,
}

#[derive(Default)]
pub struct Registry {
    rules: Vec<Rule>,
    checks: Vec<Check>,
    default_task: Option<String>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a rule at the next ordinal.
    ///
    /// A rule carrying a static-pattern template must enumerate its
    /// targets by name; a wildcard specifier there is inconsistent.
    pub fn add_rule(&mut self, rule: Rule) -> Result<usize> {
        if let Some(pattern) = &rule.pattern {
            if rule
                .targets
                .iter()
                .any(|t| matches!(t, TargetSpec::Wildcard(_)))
            {
                return Err(Error::invalid_pattern(
                    pattern.as_str(),
                    "static-pattern rule requires enumerated targets",
                ));
            }
        }
        self.rules.push(rule);
        Ok(self.rules.len() - 1)
    }

    pub fn add_check(&mut self, check: Check) {
        self.checks.push(check);
    }

    /// Mark `name` as the default task. At most one per registry.
    pub fn set_default(&mut self, name: impl Into<String>) -> Result<()> {
        let name = name.into();
        if let Some(first) = &self.default_task {
            return Err(Error::MultipleDefaults {
                first: first.clone(),
                second: name,
            });
        }
        self.default_task = Some(name);
        Ok(())
    }

    pub fn default_task(&self) -> Option<&str> {
        self.default_task.as_deref()
    }

    pub fn rule(&self, idx: usize) -> &Rule {
        &self.rules[idx]
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// First registered check whose patterns cover `name`.
    pub fn find_check(&self, name: &str) -> Option<(usize, &Check)> {
        self.checks.iter().enumerate().find(|(_, c)| c.matches(name))
    }

    pub fn check(&self, idx: usize) -> &Check {
        &self.checks[idx]
    }

    /// Concrete names of every task rule, for `-l` style listings.
    pub fn task_names(&self) -> Vec<&str> {
        self.rules
            .iter()
            .filter(|r| r.is_task())
            .flat_map(|r| r.targets.iter())
            .filter_map(|t| match t {
                TargetSpec::Name(n) => Some(n.as_str()),
                TargetSpec::Wildcard(_) => None,
            })
            .collect()
    }

    /// Select the best rule for `target`, first matching class wins:
    /// concrete enumerated, then static-pattern, then pattern-only
    /// (longest literal prefix, then registration order). `None` means
    /// no rule claims the target; the caller decides whether an
    /// existing file makes it a leaf source node.
    pub fn select(&self, target: &str) -> Result<Option<Binding>> {
        if let Some((idx, rule)) = self.concrete_match(target) {
            return Ok(Some(self.bind(idx, rule, target, None)));
        }
        if let Some((idx, rule, pattern)) = self.static_pattern_match(target) {
            let stem = pattern.bind(target).ok_or_else(|| {
                Error::invalid_pattern(
                    pattern.as_str(),
                    format!("does not match enumerated target '{target}'"),
                )
            })?;
            return Ok(Some(self.bind(idx, rule, target, Some(stem.to_string()))));
        }
        if let Some((idx, rule, stem)) = self.wildcard_match(target) {
            return Ok(Some(self.bind(idx, rule, target, Some(stem))));
        }
        Ok(None)
    }

    fn concrete_match(&self, target: &str) -> Option<(usize, &Rule)> {
        self.rules.iter().enumerate().find(|(_, r)| {
            r.pattern.is_none()
                && r.targets
                    .iter()
                    .any(|t| matches!(t, TargetSpec::Name(n) if n == target))
        })
    }

    fn static_pattern_match(&self, target: &str) -> Option<(usize, &Rule, &Pattern)> {
        self.rules.iter().enumerate().find_map(|(i, r)| {
            let pattern = r.pattern.as_ref()?;
            r.targets
                .iter()
                .any(|t| matches!(t, TargetSpec::Name(n) if n == target))
                .then_some((i, r, pattern))
        })
    }

    fn wildcard_match(&self, target: &str) -> Option<(usize, &Rule, String)> {
        // Longest literal prefix wins; registration order breaks the rest.
        self.rules
            .iter()
            .enumerate()
            .filter_map(|(i, r)| match r.targets.as_slice() {
                [TargetSpec::Wildcard(p)] => {
                    p.bind(target).map(|stem| (i, r, stem.to_string(), p))
                }
                _ => None,
            })
            .max_by(|(i_a, _, _, p_a), (i_b, _, _, p_b)| {
                p_a.literal_prefix_len()
                    .cmp(&p_b.literal_prefix_len())
                    .then(i_b.cmp(i_a))
            })
            .map(|(i, r, stem, _)| (i, r, stem))
    }

    fn bind(&self, idx: usize, rule: &Rule, target: &str, stem: Option<String>) -> Binding {
        let raw_depends = rule.depends.resolve(target);
        let (depends, uses) = match &stem {
            Some(s) => (
                raw_depends.iter().map(|d| substitute(d, s)).collect(),
                rule.uses.iter().map(|u| substitute(u, s)).collect(),
            ),
            None => (raw_depends, rule.uses.clone()),
        };
        Binding {
            rule: idx,
            stem,
            depends,
            uses,
        }
    }
}
