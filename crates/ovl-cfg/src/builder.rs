//! Basic block discovery and linking.

use std::collections::BTreeSet;

use ovl_isa::{Destination, Instruction, SourceUnit};
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug, info, trace_span, warn};

use crate::{BasicBlock, BlockId, ControlFlowGraph, Result, components, partition};

/// Routine entry labels: every `%function` label and every direct call
/// target across all units.
#[must_use]
pub fn routine_labels(units: &[SourceUnit]) -> FxHashSet<String> {
    units.iter().flat_map(SourceUnit::routine_labels).collect()
}

/// Build the routines of one source unit.
///
/// The unit graph is built, calls that land inside their own routine are
/// turned into jumps, and the result is split into routines.
///
/// # Errors
///
/// Returns an error if an instruction would have to be reclassified both
/// as a call and as a jump.
pub fn build_unit(
    unit: &SourceUnit,
    routines: &FxHashSet<String>,
) -> Result<Vec<ControlFlowGraph>> {
    let _span = trace_span!("build_unit", unit = %unit.name).entered();
    let mut cfg = build_graph(unit, routines)?;
    correct_local_calls(&mut cfg)?;
    Ok(partition(cfg, routines))
}

/// Split markers recorded while walking from the entries.
struct Walk {
    processed: Vec<bool>,
    split_before: Vec<bool>,
    split_after: Vec<bool>,
}

/// Build the whole-unit graph before partitioning.
///
/// # Errors
///
/// Returns an error if a branch into a routine cannot be marked as a call.
pub fn build_graph(unit: &SourceUnit, routines: &FxHashSet<String>) -> Result<ControlFlowGraph> {
    let insns = &unit.instructions;

    let mut label_index: FxHashMap<&str, usize> = FxHashMap::default();
    for insn in insns.iter().filter(|insn| insn.is_label()) {
        if let Some(label) = insn.label.as_deref() {
            label_index.insert(label, insn.address);
        }
    }

    let walk = {
        let _span = trace_span!("discover").entered();
        discover(unit, routines, &label_index)
    };
    let blocks = {
        let _span = trace_span!("form_blocks").entered();
        form_blocks(insns, &walk)
    };

    let mut cfg = ControlFlowGraph::new(unit.name.clone(), blocks);
    {
        let _span = trace_span!("link").entered();
        link(&mut cfg, routines, &label_index)?;
    }

    debug!(
        unit = %unit.name,
        blocks = cfg.len(),
        processed = walk.processed.iter().filter(|&&p| p).count(),
        instructions = insns.len(),
        "built unit graph"
    );
    Ok(cfg)
}

/// Walk from every entry, always taking the lowest pending address next.
fn discover(
    unit: &SourceUnit,
    routines: &FxHashSet<String>,
    label_index: &FxHashMap<&str, usize>,
) -> Walk {
    let insns = &unit.instructions;
    let n = insns.len();
    let mut walk = Walk {
        processed: vec![false; n],
        split_before: vec![false; n],
        split_after: vec![false; n],
    };

    let mut entries: BTreeSet<usize> = routines
        .iter()
        .filter_map(|label| label_index.get(label.as_str()).copied())
        .collect();
    let mut done: FxHashSet<usize> = FxHashSet::default();

    while let Some(start) = entries.pop_first() {
        done.insert(start);
        if start >= n {
            warn!(unit = %unit.name, address = start, "block start is not a valid instruction");
            continue;
        }
        walk.split_before[start] = true;
        debug!(unit = %unit.name, address = start, "starting block");

        let enqueue = |address: usize, entries: &mut BTreeSet<usize>| {
            if !done.contains(&address) {
                entries.insert(address);
            }
        };

        let mut address = start;
        while address < n {
            if address != start && walk.processed[address] {
                // Already walked from here; the rest of the walk is known.
                break;
            }
            let insn = &insns[address];
            walk.processed[address] = true;

            if insn.is_call() {
                match insn.destination().label().map(|d| (d, label_index.get(d))) {
                    Some((_, Some(&target))) => {
                        debug!(address, target, "found call");
                        enqueue(target, &mut entries);
                        enqueue(address + 1, &mut entries);
                    }
                    Some((dest, None)) => {
                        info!(unit = %unit.name, line = insn.line, dest, "call destination is not locatable (resolved at link time?)");
                    }
                    None => {}
                }
            }

            if insn.is_branch() {
                match insn.destination() {
                    Destination::Label(dest) => match label_index.get(dest.as_str()) {
                        Some(&target) if !routines.contains(&dest) => {
                            walk.split_before[target] = true;
                            enqueue(target, &mut entries);
                            debug!(address, target, "found branch");
                        }
                        _ => debug!(address, dest = %dest, "branch destination is not local"),
                    },
                    Destination::Indirect | Destination::NotApplicable => {
                        debug!(address, "found indirect branch");
                    }
                }

                walk.split_after[address] = true;
                // The delay slot belongs to the branch; the fallthrough
                // starts after it.
                let slot = usize::from(insn.delay_slot && address + 1 < n);
                if slot == 1 {
                    walk.processed[address + 1] = true;
                }
                if !insn.is_unconditional() {
                    enqueue(address + 1 + slot, &mut entries);
                }
                break;
            }
            address += 1;
        }
    }

    walk
}

/// Cut the processed instructions into blocks at the recorded markers.
///
/// A delay-slot instruction is appended to its branch's block and never
/// starts a block of its own.
fn form_blocks(insns: &[Instruction], walk: &Walk) -> Vec<BasicBlock> {
    let mut blocks = Vec::new();
    let mut current: Option<BasicBlock> = None;

    let mut address = 0;
    while address < insns.len() {
        if !walk.processed[address] {
            blocks.extend(current.take());
            address += 1;
            continue;
        }
        if walk.split_before[address] {
            blocks.extend(current.take());
        }

        let insn = &insns[address];
        match current.as_mut() {
            Some(block) => block.push(insn.clone()),
            None => current = Some(BasicBlock::new(insn.clone())),
        }

        if insn.is_branch() && insn.delay_slot && address + 1 < insns.len() {
            if let Some(block) = current.as_mut() {
                block.push(insns[address + 1].clone());
            }
            blocks.extend(current.take());
            address += 2;
            continue;
        }

        if walk.split_after[address] {
            blocks.extend(current.take());
        }
        address += 1;
    }
    blocks.extend(current);
    blocks
}

/// Add fallthrough and taken edges.
fn link(
    cfg: &mut ControlFlowGraph,
    routines: &FxHashSet<String>,
    label_index: &FxHashMap<&str, usize>,
) -> Result<()> {
    let by_address: FxHashMap<usize, BlockId> = cfg
        .ids()
        .map(|id| (cfg.block(id).address(), id))
        .collect();
    let count = cfg.len();
    let unit = cfg.unit().to_string();

    for id in cfg.ids() {
        let block = cfg.block_mut(id);
        let mut successors = Vec::with_capacity(2);

        let tail = block.tail();
        if !tail.is_unconditional() && id.index() + 1 < count {
            successors.push(BlockId::new(id.index() + 1));
        }

        // A call returns to the fallthrough block and has no taken edge.
        let destination = if tail.is_call() {
            Destination::NotApplicable
        } else {
            tail.destination()
        };
        let line = tail.line;
        match destination {
            Destination::NotApplicable => {}
            Destination::Indirect => debug!(block = %id, "indirect link"),
            Destination::Label(dest) => {
                let local = label_index
                    .get(dest.as_str())
                    .and_then(|address| by_address.get(address))
                    .filter(|_| !routines.contains(&dest));
                if let Some(&target) = local {
                    if !successors.contains(&target) {
                        successors.push(target);
                    }
                } else if routines.contains(&dest) {
                    warn!(
                        unit = %unit,
                        line,
                        insn = %tail.to_string().trim(),
                        dest = %dest,
                        "branch jumps to a routine, treating it as a call"
                    );
                    block.tail_mut().force_call()?;
                } else {
                    warn!(unit = %unit, line, dest = %dest, "link to unknown block");
                }
            }
        }

        block.successors = successors;
    }
    Ok(())
}

/// Turn calls whose target lies in the caller's own routine into jumps.
///
/// The compiler uses `bl` as a long-range jump inside a function. Calls
/// that recurse into their own routine look exactly the same and are
/// rewritten too, so every rewrite is reported.
///
/// # Errors
///
/// Returns an error if a call site was already reclassified as a call.
pub fn correct_local_calls(cfg: &mut ControlFlowGraph) -> Result<()> {
    let component = components(cfg);

    let mut fixes = Vec::new();
    for id in cfg.ids() {
        let tail = cfg.block(id).tail();
        if !tail.is_call() {
            continue;
        }
        let Some(dest) = tail.destination().label().map(str::to_string) else {
            continue;
        };
        let target = cfg
            .ids()
            .find(|&other| cfg.block(other).contains_label(&dest));
        if let Some(target) = target.filter(|t| component[t.index()] == component[id.index()]) {
            warn!(
                unit = %cfg.unit(),
                line = tail.line,
                dest = %dest,
                "call into its own routine treated as a jump (recursion is indistinguishable)"
            );
            fixes.push((id, target));
        }
    }

    for (id, target) in fixes {
        let fallthrough = BlockId::new(id.index() + 1);
        let block = cfg.block_mut(id);
        block.tail_mut().suppress_call()?;
        block.successors.retain(|&succ| succ != fallthrough);
        if !block.successors.contains(&target) {
            block.successors.push(target);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ovl_isa::THUMB2;

    fn unit(text: &str) -> SourceUnit {
        SourceUnit::parse("t.s", text, &THUMB2)
    }

    fn graph(text: &str) -> ControlFlowGraph {
        let unit = unit(text);
        let routines = routine_labels(std::slice::from_ref(&unit));
        build_graph(&unit, &routines).unwrap()
    }

    fn starts(cfg: &ControlFlowGraph) -> Vec<usize> {
        cfg.blocks().iter().map(BasicBlock::address).collect()
    }

    fn succ(cfg: &ControlFlowGraph, index: usize) -> Vec<usize> {
        cfg.successors(BlockId::new(index))
            .iter()
            .map(|s| s.index())
            .collect()
    }

    const DIAMOND: &str = "\
\t.type\tf, %function
f:
\tcmp\tr0, #0
\tbne\t.L2
.L1:
\tmov\tr1, #1
\tb\t.L3
.L2:
\tmov\tr1, #2
.L3:
\tbx\tlr
";

    #[test]
    fn test_diamond_blocks_and_edges() {
        let cfg = graph(DIAMOND);
        assert_eq!(starts(&cfg), vec![0, 3, 6, 8]);
        assert_eq!(succ(&cfg, 0), vec![1, 2]);
        assert_eq!(succ(&cfg, 1), vec![3]);
        assert_eq!(succ(&cfg, 2), vec![3]);
        assert!(succ(&cfg, 3).is_empty());
    }

    #[test]
    fn test_call_splits_block_and_target_is_not_linked() {
        let cfg = graph(
            "\
\t.type\tf, %function
f:
\tpush\t{r4, lr}
\tbl\tg
\tadds\tr0, r0, #1
\tpop\t{r4, pc}
\t.type\tg, %function
g:
\tbx\tlr
",
        );
        assert_eq!(starts(&cfg), vec![0, 3, 5]);
        assert_eq!(succ(&cfg, 0), vec![1]);
        assert!(succ(&cfg, 1).is_empty());
        assert!(succ(&cfg, 2).is_empty());
    }

    #[test]
    fn test_unlocatable_call_does_not_split() {
        let cfg = graph(
            "\
\t.type\tf, %function
f:
\tbl\tputs
\tbx\tlr
",
        );
        assert_eq!(cfg.len(), 1);
        assert_eq!(cfg.block(BlockId::new(0)).instructions().len(), 3);
    }

    #[test]
    fn test_unreached_code_is_not_a_block() {
        let cfg = graph(
            "\
\t.type\tf, %function
f:
\tbx\tlr
.L7:
\t.word\t1234
",
        );
        assert_eq!(cfg.len(), 1);
    }

    #[test]
    fn test_branch_to_routine_becomes_call() {
        let cfg = graph(
            "\
\t.type\tf, %function
f:
\tb\tg
\t.type\tg, %function
g:
\tbx\tlr
",
        );
        let tail = cfg.block(BlockId::new(0)).tail();
        assert!(tail.is_forced_call());
        assert!(succ(&cfg, 0).is_empty());
    }

    #[test]
    fn test_local_call_becomes_jump() {
        let unit = unit(
            "\
\t.type\tf, %function
f:
\tcmp\tr0, #0
\tbeq\t.L3
\tbl\t.L4
.L3:
\tmovs\tr0, #0
.L4:
\tbx\tlr
",
        );
        let routines = routine_labels(std::slice::from_ref(&unit));
        let mut cfg = build_graph(&unit, &routines).unwrap();
        // f -> .L3 -> .L4 share a component with the `bl .L4` block.
        assert_eq!(succ(&cfg, 1), vec![2]);
        correct_local_calls(&mut cfg).unwrap();

        let block = cfg.block(BlockId::new(1));
        assert!(!block.tail().is_call());
        assert!(block.tail().is_unconditional());
        assert_eq!(succ(&cfg, 1), vec![3]);
    }

    #[test]
    fn test_delay_slot_joins_branch_block() {
        let mut unit = unit(
            "\
\t.type\tf, %function
f:
\tcmp\tr0, #0
\tb\t.L2
\tmov\tr1, #0
.L2:
\tbx\tlr
",
        );
        unit.instructions[2] = unit.instructions[2].clone().with_delay_slot();
        let routines = routine_labels(std::slice::from_ref(&unit));
        let cfg = build_graph(&unit, &routines).unwrap();

        let first = cfg.block(BlockId::new(0));
        let ops: Vec<&str> = first
            .instructions()
            .iter()
            .map(|i| i.operator.as_str())
            .collect();
        assert_eq!(ops, vec!["", "cmp", "b", "mov"]);
        assert_eq!(first.tail().operator, "b");
        assert_eq!(succ(&cfg, 0), vec![1]);
        assert_eq!(cfg.block(BlockId::new(1)).label(), Some(".L2"));
    }

    #[test]
    fn test_conditional_delay_slot_is_not_a_block_start() {
        let mut unit = unit(
            "\
\t.type\tf, %function
f:
\tcmp\tr0, #0
\tbne\t.L2
\tmov\tr1, #0
\tmovs\tr0, #1
.L2:
\tbx\tlr
",
        );
        unit.instructions[2] = unit.instructions[2].clone().with_delay_slot();
        let routines = routine_labels(std::slice::from_ref(&unit));
        let cfg = build_graph(&unit, &routines).unwrap();

        assert_eq!(starts(&cfg), vec![0, 4, 5]);
        assert_eq!(succ(&cfg, 0), vec![1, 2]);
        assert_eq!(cfg.block(BlockId::new(0)).tail().operator, "bne");

        let mut addresses: Vec<usize> = cfg
            .blocks()
            .iter()
            .flat_map(|b| b.instructions().iter().map(|i| i.address))
            .collect();
        addresses.sort_unstable();
        assert_eq!(addresses, (0..7).collect::<Vec<_>>());
    }

    #[test]
    fn test_entry_past_end_is_skipped() {
        let unit = unit("\t.type\tf, %function\nf:\n\tbx\tlr\n");
        let mut routines = routine_labels(std::slice::from_ref(&unit));
        let label_index: FxHashMap<&str, usize> = [("f", 0), ("past", 9)].into_iter().collect();
        routines.insert("past".to_string());
        let walk = discover(&unit, &routines, &label_index);
        assert_eq!(walk.processed, vec![true, true]);
        assert!(walk.split_before[0]);
    }

    #[test]
    fn test_branch_into_unknown_block_has_no_edge() {
        let cfg = graph(
            "\
\t.type\tf, %function
f:
\tcmp\tr0, #0
\tbeq\t.Lmissing
\tbx\tlr
",
        );
        assert_eq!(starts(&cfg), vec![0, 3]);
        assert_eq!(succ(&cfg, 0), vec![1]);
    }

    #[test]
    fn test_branch_into_block_middle_is_unlinked() {
        let mut cfg = graph(DIAMOND);
        let routines = FxHashSet::default();
        let label_index: FxHashMap<&str, usize> = [(".L3", 7)].into_iter().collect();
        link(&mut cfg, &routines, &label_index).unwrap();
        // Address 7 is the `mov` inside the `.L2` block.
        assert!(succ(&cfg, 1).is_empty());
    }

    #[test]
    fn test_build_unit_partitions_routines() {
        let unit = unit(
            "\
\t.type\tf, %function
f:
\tbl\tg
\tbx\tlr
\t.type\tg, %function
g:
\tcmp\tr0, #1
\tbne\t.L9
\tmovs\tr0, #0
.L9:
\tbx\tlr
",
        );
        let routines = routine_labels(std::slice::from_ref(&unit));
        let cfgs = build_unit(&unit, &routines).unwrap();
        assert_eq!(cfgs.len(), 2);
        assert_eq!(cfgs[0].block(cfgs[0].starts()[0]).label(), Some("f"));
        assert_eq!(cfgs[1].len(), 3);
        assert_eq!(cfgs[1].block(cfgs[1].starts()[0]).label(), Some("g"));
    }
}
