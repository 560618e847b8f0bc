//! Calls between routines.

use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug, info};

use crate::{BlockId, ControlFlowGraph};

/// A block in one of several routines.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BlockRef {
    pub cfg: usize,
    pub block: BlockId,
}

/// One call site and the entry block it calls.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CallEdge {
    pub caller: BlockRef,
    pub callee: BlockRef,
}

/// Call edges between the routines of a program.
#[derive(Clone, Debug, Default)]
pub struct CallGraph {
    edges: Vec<CallEdge>,
    unknown: Vec<String>,
}

impl CallGraph {
    /// Link every call (and every branch reclassified as a call) to the
    /// block starting with the called label, in any routine.
    #[must_use]
    pub fn build(cfgs: &[ControlFlowGraph]) -> Self {
        let mut entry: FxHashMap<&str, BlockRef> = FxHashMap::default();
        for (c, cfg) in cfgs.iter().enumerate() {
            for id in cfg.ids() {
                if let Some(label) = cfg.block(id).label() {
                    entry.insert(label, BlockRef { cfg: c, block: id });
                }
            }
        }

        let mut edges = Vec::new();
        let mut unknown = FxHashSet::default();
        for (c, cfg) in cfgs.iter().enumerate() {
            for id in cfg.ids() {
                for insn in cfg.block(id).calls() {
                    let Some(dest) = insn.destination().label().map(str::to_string) else {
                        continue;
                    };
                    match entry.get(dest.as_str()) {
                        Some(&callee) => edges.push(CallEdge {
                            caller: BlockRef { cfg: c, block: id },
                            callee,
                        }),
                        None => {
                            unknown.insert(dest);
                        }
                    }
                }
            }
        }

        let mut unknown: Vec<String> = unknown.into_iter().collect();
        unknown.sort_unstable();
        if !unknown.is_empty() {
            info!(labels = ?unknown, "call targets not found in any routine");
        }
        debug!(edges = edges.len(), "built call graph");
        Self { edges, unknown }
    }

    #[must_use]
    pub fn edges(&self) -> &[CallEdge] {
        &self.edges
    }

    /// Call targets that name no block in the program.
    #[must_use]
    pub fn unknown_targets(&self) -> &[String] {
        &self.unknown
    }

    /// Calls made from `caller`.
    pub fn calls_from(&self, caller: BlockRef) -> impl Iterator<Item = &CallEdge> {
        self.edges.iter().filter(move |edge| edge.caller == caller)
    }

    /// Routines that are never called, in order.
    #[must_use]
    pub fn roots(&self, routines: usize) -> Vec<usize> {
        let called: FxHashSet<usize> = self.edges.iter().map(|edge| edge.callee.cfg).collect();
        (0..routines).filter(|c| !called.contains(c)).collect()
    }
}
