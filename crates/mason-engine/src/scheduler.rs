//! The work scheduler.
//!
//! A single supervisory task drives the node state machine
//! (`Pending -> Ready -> Running -> Built | Skipped | Failed`) and
//! dispatches stale nodes to spawned workers, at most `jobs`
//! concurrent. Handlers report back over an mpsc channel; the
//! supervisor is the only mutator of execution state.

use std::collections::HashSet;

use futures::FutureExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use mason_core::{DeferredBuilds, Error, HandlerError, Invocation, Registry, Result};

use crate::graph::{Graph, NodeId};
use crate::oracle::Oracle;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExecState {
    Pending,
    Ready,
    Running,
    Built,
    Skipped,
    Failed,
}

impl ExecState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Built | Self::Skipped | Self::Failed)
    }
}

/// One state transition, in the order it happened. The integration
/// suite asserts ordering guarantees against this timeline.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Event {
    Started(String),
    Built(String),
    Skipped(String),
    Failed(String),
}

pub struct ExecOptions {
    /// Maximum concurrent handlers, at least 1.
    pub jobs: usize,
    /// First interrupt: stop dispatching, let running handlers finish.
    pub interrupt: CancellationToken,
    /// Second interrupt: tear running handlers down.
    pub kill: CancellationToken,
}

impl Default for ExecOptions {
    fn default() -> Self {
        Self {
            jobs: 1,
            interrupt: CancellationToken::new(),
            kill: CancellationToken::new(),
        }
    }
}

/// One scheduling pass over the graph. `states` and `built` persist
/// across passes so deferred-build waves see earlier results.
pub struct Scheduler<'a> {
    graph: &'a Graph,
    registry: &'a Registry,
    oracle: &'a mut Oracle,
    opts: &'a ExecOptions,
    states: &'a mut Vec<ExecState>,
    built: &'a mut HashSet<NodeId>,
    events: &'a mut Vec<Event>,
    deferred: DeferredBuilds,
    /// Canonical names currently running; one concurrent build per target.
    inflight: HashSet<String>,
    /// Ready-and-stale nodes awaiting a worker slot.
    queue: Vec<NodeId>,
    queued: HashSet<NodeId>,
    running: usize,
    first_error: Option<Error>,
    cancelled: bool,
}

impl<'a> Scheduler<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        graph: &'a Graph,
        registry: &'a Registry,
        oracle: &'a mut Oracle,
        opts: &'a ExecOptions,
        states: &'a mut Vec<ExecState>,
        built: &'a mut HashSet<NodeId>,
        events: &'a mut Vec<Event>,
        deferred: DeferredBuilds,
    ) -> Self {
        states.resize(graph.len(), ExecState::Pending);
        Self {
            graph,
            registry,
            oracle,
            opts,
            states,
            built,
            events,
            deferred,
            inflight: HashSet::new(),
            queue: Vec::new(),
            queued: HashSet::new(),
            running: 0,
            first_error: None,
            cancelled: false,
        }
    }

    /// Run until every root is terminal or the pass is aborted.
    pub async fn run(&mut self) -> Result<()> {
        let jobs = self.opts.jobs.max(1);
        let (tx, mut rx) = mpsc::channel::<(NodeId, std::result::Result<(), HandlerError>)>(
            self.graph.len().max(1),
        );
        let parents = self.graph.parent_map();

        loop {
            if self.opts.interrupt.is_cancelled() && !self.cancelled {
                warn!("interrupt received, no new work will be dispatched");
                self.cancelled = true;
            }

            self.settle().await;
            self.dispatch(jobs, &tx);

            if self.running == 0 {
                // Nothing in flight and nothing dispatchable: either the
                // roots are terminal or the pass was aborted mid-graph.
                break;
            }

            let (id, result) = rx.recv().await.expect("worker channel closed");
            self.running -= 1;
            self.inflight.remove(&self.graph.node(id).name);
            self.complete(id, result, &parents);
        }

        if let Some(err) = self.first_error.take() {
            return Err(err);
        }
        if self.cancelled {
            return Err(Error::Interrupted);
        }
        Ok(())
    }

    /// Promote and skip until fixpoint: `Pending` nodes whose children
    /// are all terminal become `Ready`; `Ready` nodes that are not
    /// stale become `Skipped`; stale ones join the dispatch queue.
    async fn settle(&mut self) {
        loop {
            let mut progressed = false;
            for id in self.graph.ids() {
                if self.states[id] != ExecState::Pending {
                    continue;
                }
                let node = self.graph.node(id);
                let children_done = node
                    .depends
                    .iter()
                    .chain(node.uses.iter())
                    .all(|&c| self.states[c].is_terminal());
                if children_done && !self.halted() {
                    self.states[id] = ExecState::Ready;
                    progressed = true;
                }
            }
            for id in self.graph.ids() {
                if self.states[id] != ExecState::Ready || self.queued.contains(&id) {
                    continue;
                }
                if self.oracle.is_stale(self.graph, self.registry, id, self.built).await {
                    self.queued.insert(id);
                    self.queue.push(id);
                } else {
                    self.states[id] = ExecState::Skipped;
                    self.events.push(Event::Skipped(self.graph.node(id).name.clone()));
                    progressed = true;
                }
            }
            if !progressed {
                break;
            }
        }
        // Dispatch order: topological level, then registration ordinal.
        self.queue.sort_by_key(|&id| {
            let n = self.graph.node(id);
            (n.level, n.ordinal, id)
        });
    }

    fn dispatch(&mut self, jobs: usize, tx: &mpsc::Sender<(NodeId, std::result::Result<(), HandlerError>)>) {
        while self.running < jobs && !self.queue.is_empty() && !self.halted() {
            let id = self.queue.remove(0);
            if self.states[id] != ExecState::Ready {
                // Failed ancestors can invalidate queued entries.
                continue;
            }
            let node = self.graph.node(id);
            if self.inflight.contains(&node.name) {
                // One concurrent build per canonical target. Nodes are
                // memoized by name so this is belt-and-braces; push the
                // entry back for the next round.
                self.queue.push(id);
                break;
            }
            let binding = node
                .binding
                .as_ref()
                .expect("only rule-bound nodes are queued");
            let handler = self.registry.rule(binding.rule).handler.clone();
            let inv = Invocation::new(
                node.name.clone(),
                binding.depends.clone(),
                self.deferred.clone(),
            );

            self.states[id] = ExecState::Running;
            self.inflight.insert(node.name.clone());
            self.running += 1;
            self.events.push(Event::Started(node.name.clone()));
            info!(name = %node.name, "building");

            let tx = tx.clone();
            let kill = self.opts.kill.clone();
            let name = node.name.clone();
            tokio::spawn(async move {
                let result = tokio::select! {
                    r = std::panic::AssertUnwindSafe(handler(inv)).catch_unwind() => {
                        r.unwrap_or_else(|_| Err(HandlerError::from("handler panicked")))
                    }
                    _ = kill.cancelled() => {
                        debug!(name = %name, "handler torn down by interrupt");
                        Err(HandlerError::from("terminated by interrupt"))
                    }
                };
                let _ = tx.send((id, result)).await;
            });
        }
    }

    fn complete(
        &mut self,
        id: NodeId,
        result: std::result::Result<(), HandlerError>,
        parents: &[Vec<NodeId>],
    ) {
        let node = self.graph.node(id);
        match result {
            Ok(()) => {
                if self.output_missing(id) {
                    warn!(name = %node.name, "handler succeeded but produced no output");
                    self.fail(
                        id,
                        Error::TargetNotProduced {
                            target: node.name.clone(),
                        },
                        parents,
                    );
                    return;
                }
                self.states[id] = ExecState::Built;
                self.built.insert(id);
                self.events.push(Event::Built(node.name.clone()));
                info!(name = %node.name, "built");
            }
            Err(e) => {
                let err = Error::handler_failed(&node.name, e.to_string());
                self.fail(id, err, parents);
            }
        }
    }

    /// A file target that claims an output must have produced it.
    /// Tasks never do; `uses`-only prerequisites are exempt.
    fn output_missing(&self, id: NodeId) -> bool {
        let node = self.graph.node(id);
        let Some(binding) = &node.binding else {
            return false;
        };
        if self.registry.rule(binding.rule).is_task() || !node.requires_output {
            return false;
        }
        !std::path::Path::new(&node.name).exists()
    }

    /// Mark `id` failed, propagate to every transitive ancestor through
    /// both edge kinds, and raise the cancellation flag.
    fn fail(&mut self, id: NodeId, err: Error, parents: &[Vec<NodeId>]) {
        warn!(name = %self.graph.node(id).name, error = %err, "build failed");
        self.states[id] = ExecState::Failed;
        self.events.push(Event::Failed(self.graph.node(id).name.clone()));
        if self.first_error.is_none() {
            self.first_error = Some(err);
        }
        self.cancelled = true;

        let mut frontier = vec![id];
        while let Some(n) = frontier.pop() {
            for &p in &parents[n] {
                if self.states[p] == ExecState::Running || self.states[p].is_terminal() {
                    continue;
                }
                self.states[p] = ExecState::Failed;
                self.events.push(Event::Failed(self.graph.node(p).name.clone()));
                frontier.push(p);
            }
        }
    }

    fn halted(&self) -> bool {
        self.cancelled || self.first_error.is_some()
    }
}
