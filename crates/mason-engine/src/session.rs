//! Build session: the engine's public entry point.
//!
//! Owns the registry, loads the check store, resolves the requested
//! targets into a graph, runs scheduling passes (including deferred
//! build waves raised by handlers), and flushes the store on both
//! success and failure exits.

use std::collections::HashSet;
use std::path::PathBuf;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use mason_core::{DeferredBuilds, Error, Registry, Result};

use crate::graph::Graph;
use crate::oracle::Oracle;
use crate::scheduler::{Event, ExecOptions, ExecState, Scheduler};
use crate::store::CheckStore;

/// Name of the state file inside the build directory.
pub const STATE_FILE: &str = ".mason/checks.json";

pub struct BuildOptions {
    pub jobs: usize,
    pub commit_history: bool,
    /// Directory holding persisted state.
    pub build_dir: PathBuf,
    pub interrupt: CancellationToken,
    pub kill: CancellationToken,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            jobs: 1,
            commit_history: false,
            build_dir: PathBuf::from("."),
            interrupt: CancellationToken::new(),
            kill: CancellationToken::new(),
        }
    }
}

/// What a run did. `error` is set for build failures; configuration
/// errors abort before any work and surface as `Err` from [`BuildSession::build`].
#[derive(Debug, Default)]
pub struct BuildReport {
    pub built: Vec<String>,
    pub skipped: Vec<String>,
    pub failed: Vec<String>,
    pub events: Vec<Event>,
    pub error: Option<Error>,
}

impl BuildReport {
    pub fn exit_code(&self) -> u8 {
        self.error.as_ref().map(|e| e.exit_code()).unwrap_or(0)
    }
}

pub struct BuildSession {
    registry: Registry,
    options: BuildOptions,
}

impl BuildSession {
    pub fn new(registry: Registry, options: BuildOptions) -> Self {
        Self { registry, options }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Build `targets` (empty means the default task). Returns `Err`
    /// only for configuration errors, which abort before any handler
    /// runs; build failures come back inside the report.
    pub async fn build(&self, targets: &[String]) -> Result<BuildReport> {
        let requested = self.requested_targets(targets)?;
        info!(targets = ?requested, jobs = self.options.jobs, "build requested");

        // Configuration errors (cycles, unknown targets, bad patterns)
        // surface during graph construction, before any work runs.
        let mut graph = Graph::new();
        for target in &requested {
            graph.add_root(&self.registry, target)?;
        }
        debug!(nodes = graph.len(), "graph resolved");

        let store = CheckStore::load(self.options.build_dir.join(STATE_FILE)).await;
        let mut oracle = Oracle::new(store, self.options.commit_history);
        let exec = ExecOptions {
            jobs: self.options.jobs,
            interrupt: self.options.interrupt.clone(),
            kill: self.options.kill.clone(),
        };

        let deferred = DeferredBuilds::new();
        let mut states: Vec<ExecState> = Vec::new();
        let mut built = HashSet::new();
        let mut events = Vec::new();
        let mut run_error = None;

        loop {
            let outcome = Scheduler::new(
                &graph,
                &self.registry,
                &mut oracle,
                &exec,
                &mut states,
                &mut built,
                &mut events,
                deferred.clone(),
            )
            .run()
            .await;

            if let Err(e) = outcome {
                run_error = Some(e);
                break;
            }

            // Handlers may have requested more targets; resolve them
            // into the same graph and run another pass. Already-built
            // names drain to no-ops through the shared memo table.
            let extra = deferred.drain();
            if extra.is_empty() {
                break;
            }
            debug!(targets = ?extra, "deferred build wave");
            let mut config_error = None;
            for target in extra {
                if let Err(e) = graph.add_root(&self.registry, &target) {
                    config_error = Some(e);
                    break;
                }
            }
            if let Some(e) = config_error {
                run_error = Some(e);
                break;
            }
        }

        if run_error.is_none() {
            if let Some(e) = oracle.take_probe_errors().into_iter().next() {
                run_error = Some(e);
            }
        }

        // The store is flushed even on failure so committed probe
        // values survive.
        oracle.flush_store().await?;

        let mut report = BuildReport {
            events,
            error: run_error,
            ..Default::default()
        };
        for id in graph.ids() {
            // A configuration error in a deferred wave can leave nodes
            // the scheduler never saw.
            let Some(&state) = states.get(id) else { break };
            let name = graph.node(id).name.clone();
            match state {
                ExecState::Built => report.built.push(name),
                ExecState::Skipped => report.skipped.push(name),
                ExecState::Failed => report.failed.push(name),
                _ => {}
            }
        }
        info!(
            built = report.built.len(),
            skipped = report.skipped.len(),
            failed = report.failed.len(),
            "build finished"
        );
        Ok(report)
    }

    fn requested_targets(&self, targets: &[String]) -> Result<Vec<String>> {
        if !targets.is_empty() {
            return Ok(targets.to_vec());
        }
        match self.registry.default_task() {
            Some(name) => Ok(vec![name.to_string()]),
            None => Err(Error::NoRuleForTarget {
                target: "(default task)".to_string(),
            }),
        }
    }
}
