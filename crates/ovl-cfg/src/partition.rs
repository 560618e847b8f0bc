//! Splitting a unit graph into routines.

use rustc_hash::FxHashSet;
use tracing::{debug, warn};

use crate::{BlockId, ControlFlowGraph};

/// Weakly connected component index of every block.
///
/// Components are numbered in order of their lowest block.
#[must_use]
pub fn components(cfg: &ControlFlowGraph) -> Vec<usize> {
    const UNASSIGNED: usize = usize::MAX;

    let preds = cfg.predecessors();
    let mut component = vec![UNASSIGNED; cfg.len()];
    let mut next = 0;
    let mut stack = Vec::new();

    for seed in cfg.ids() {
        if component[seed.index()] != UNASSIGNED {
            continue;
        }
        component[seed.index()] = next;
        stack.push(seed);
        while let Some(id) = stack.pop() {
            let neighbours = cfg.successors(id).iter().chain(&preds[id.index()]);
            for &other in neighbours {
                if component[other.index()] == UNASSIGNED {
                    component[other.index()] = next;
                    stack.push(other);
                }
            }
        }
        next += 1;
    }
    component
}

/// Split `cfg` into its weakly connected routines.
///
/// Blocks keep their address order inside each routine. Start blocks are
/// the blocks with no predecessor, plus any block whose label is a routine
/// entry (it may also be reached by fallthrough from a mis-detected
/// neighbour). A routine with no such block gets every block as a start.
#[must_use]
pub fn partition(cfg: ControlFlowGraph, routines: &FxHashSet<String>) -> Vec<ControlFlowGraph> {
    let component = components(&cfg);
    let count = component.iter().copied().max().map_or(0, |max| max + 1);

    // Old id -> (component, new id).
    let mut members: Vec<Vec<BlockId>> = vec![Vec::new(); count];
    let mut remap = vec![BlockId::new(0); cfg.len()];
    for id in cfg.ids() {
        let group = &mut members[component[id.index()]];
        remap[id.index()] = BlockId::new(group.len());
        group.push(id);
    }

    let unit = cfg.unit().to_string();
    let mut slots: Vec<Option<_>> = cfg.into_blocks().into_iter().map(Some).collect();

    members
        .into_iter()
        .map(|ids| {
            let blocks = ids
                .iter()
                .filter_map(|id| slots[id.index()].take())
                .map(|mut block| {
                    for succ in &mut block.successors {
                        *succ = remap[succ.index()];
                    }
                    block
                })
                .collect();

            let mut sub = ControlFlowGraph::new(unit.clone(), blocks);
            let preds = sub.predecessors();
            let mut starts: Vec<BlockId> = sub
                .ids()
                .filter(|&id| {
                    preds[id.index()].is_empty()
                        || sub.block(id).label().is_some_and(|l| routines.contains(l))
                })
                .collect();

            if starts.len() > 1 {
                debug!(unit = %unit, starts = starts.len(), "more than one possible starting block");
            }
            if starts.is_empty() {
                warn!(unit = %unit, line = sub.block(BlockId::new(0)).line(), "cannot find starting block");
                starts = sub.ids().collect();
            }
            sub.set_starts(starts);
            sub
        })
        .collect()
}
