//! The staleness oracle.
//!
//! Decides whether a node needs rebuilding by comparing effective
//! timestamps: filesystem mtimes for file targets, commit times in
//! commit-history mode, and probe-driven synthetic times for virtual
//! resources. `uses` edges are never consulted here.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use mason_core::{Error, Registry, Result};

use crate::git;
use crate::graph::{Graph, NodeId};
use crate::store::CheckStore;

pub struct Oracle {
    /// Single lock around the store; held for the duration of one
    /// probe-and-update, so a probe for the same resource is never
    /// concurrent with itself.
    store: Mutex<CheckStore>,
    commit_history: bool,
    /// Effective timestamps are computed once per node per run.
    cache: HashMap<NodeId, Option<DateTime<Utc>>>,
    /// Probe failures are build errors, but the failing resource is
    /// treated as changed so dependents still rebuild. Collected here
    /// and surfaced when the run finishes.
    probe_errors: Vec<Error>,
}

impl Oracle {
    pub fn new(store: CheckStore, commit_history: bool) -> Self {
        Self {
            store: Mutex::new(store),
            commit_history,
            cache: HashMap::new(),
            probe_errors: Vec::new(),
        }
    }

    /// Drain probe failures recorded so far.
    pub fn take_probe_errors(&mut self) -> Vec<Error> {
        std::mem::take(&mut self.probe_errors)
    }

    pub async fn flush_store(&self) -> Result<()> {
        self.store.lock().await.flush().await
    }

    /// Should `id` be rebuilt this run? `built` is the set of nodes
    /// whose handlers already ran; a rebuilt child makes the parent
    /// unconditionally stale, whatever the timestamps say.
    pub async fn is_stale(
        &mut self,
        graph: &Graph,
        registry: &Registry,
        id: NodeId,
        built: &HashSet<NodeId>,
    ) -> bool {
        let node = graph.node(id);
        let Some(binding) = &node.binding else {
            // Leaf sources and virtual resources have no handler to run.
            // Virtual ones are still probed, so the store records the
            // current value even when no parent consults it this run
            // (a parent with a missing output rebuilds unconditionally).
            if node.is_virtual() {
                let _ = self.effective_timestamp(graph, registry, id).await;
            }
            return false;
        };

        if registry.rule(binding.rule).is_task() {
            return true;
        }

        let my_ts = self.effective_timestamp(graph, registry, id).await;
        let Some(my_ts) = my_ts else {
            debug!(name = %node.name, "output missing, stale");
            return true;
        };

        for &child in &node.depends {
            if built.contains(&child) {
                debug!(name = %node.name, child = %graph.node(child).name, "child rebuilt this run, stale");
                return true;
            }
            if let Some(child_ts) = self.effective_timestamp(graph, registry, child).await {
                if child_ts > my_ts {
                    debug!(
                        name = %node.name,
                        child = %graph.node(child).name,
                        "child newer than target, stale"
                    );
                    return true;
                }
            }
        }
        false
    }

    /// The value compared between parent and child: a file time, a
    /// commit time, or a synthetic "just changed" marker for virtual
    /// resources. `None` stands for missing (negative infinity).
    pub async fn effective_timestamp(
        &mut self,
        graph: &Graph,
        registry: &Registry,
        id: NodeId,
    ) -> Option<DateTime<Utc>> {
        if let Some(&cached) = self.cache.get(&id) {
            return cached;
        }
        let node = graph.node(id);
        let ts = if let Some(check_idx) = node.check {
            Some(self.probe_virtual(registry, check_idx, &node.name).await)
        } else {
            self.file_timestamp(&node.name).await
        };
        self.cache.insert(id, ts);
        ts
    }

    async fn probe_virtual(
        &mut self,
        registry: &Registry,
        check_idx: usize,
        name: &str,
    ) -> DateTime<Utc> {
        let mut store = self.store.lock().await;
        let now = Utc::now();
        let value = match (registry.check(check_idx).probe)(name.to_string()).await {
            Ok(v) => v,
            Err(e) => {
                warn!(resource = name, error = %e, "check probe failed, treating as changed");
                self.probe_errors
                    .push(Error::check_probe_failed(name, e.to_string()));
                return now;
            }
        };
        let outcome = store.probe_and_update(name, value, now);
        if outcome.changed {
            debug!(resource = name, "probe value changed");
        }
        outcome.recorded_at
    }

    async fn file_timestamp(&self, name: &str) -> Option<DateTime<Utc>> {
        if self.commit_history {
            if let Some(ts) = git::committed_timestamp(name).await {
                return Some(ts);
            }
        }
        let meta = tokio::fs::metadata(Path::new(name)).await.ok()?;
        meta.modified().ok().map(DateTime::<Utc>::from)
    }
}
