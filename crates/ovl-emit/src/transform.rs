//! Boundary instrumentation.
//!
//! A Thumb-2 relative branch cannot reach between flash and the RAM overlay,
//! so every control transfer whose source and destination are placed in
//! different regions is rewritten to load the destination address into a
//! register (or straight into `pc`). Blocks placed in RAM are wrapped in the
//! `ramoverlay` section, and calls out of them go through the safe register.

use ovl_cfg::{BasicBlock, BlockId, ControlFlowGraph};
use ovl_isa::{Condition, Destination, Instruction, SourceUnit};
use tracing::{debug, info, trace_span, warn};

use crate::{EditList, OverlayConfig, TransformError};

/// Section that relocated blocks are placed in.
pub const RAM_SECTION: &str = "ramoverlay";

fn uninstrumentable(unit: &str, insn: &Instruction, reason: &'static str) -> TransformError {
    TransformError::Uninstrumentable {
        unit: unit.to_string(),
        line: insn.line,
        insn: insn.to_string().trim().to_string(),
        reason,
    }
}

/// Rewrite PC-relative literal loads so that the block still works after it
/// moves, and align the block start.
///
/// Applied to every block, whatever its placement. The literal pool goes
/// after an unconditional tail; an `instrumented` block gets its pool from
/// [`instrument_block`] instead, after the rewritten exit.
pub fn transform_references(block: &BasicBlock, instrumented: bool, edits: &mut EditList) {
    for insn in block.instructions() {
        if insn.operator != "ldr" || insn.operands.contains(['[', '=']) {
            continue;
        }
        let Some((reg, symbol)) = insn.operands.split_once(',') else {
            continue;
        };
        let (reg, symbol) = (reg.trim(), symbol.trim());
        edits.replace(
            insn.line,
            format!("    ldr {reg}, ={symbol}\n    ldr {reg}, [{reg}]"),
        );
    }

    let tail = block.tail();
    if tail.is_branch() && tail.is_unconditional() && !tail.is_call() && !instrumented {
        edits.after(tail.line, ".ltorg");
    }
    edits.before(block.line(), ".align 2");
}

/// Whether the block's exits cross the RAM/flash boundary.
///
/// A flash block needs instrumenting when any successor is in RAM, a RAM
/// block when any successor is not.
#[must_use]
pub fn needs_instrumentation(cfg: &ControlFlowGraph, id: BlockId) -> bool {
    let successors = cfg.successors(id);
    let in_ram = successors.iter().filter(|&&succ| cfg.in_ram(succ)).count();
    if cfg.in_ram(id) {
        in_ram != successors.len()
    } else {
        in_ram > 0
    }
}

/// Replace the block's exit with a register-indirect transfer.
///
/// The rewritten exit is placed after the tail instruction, and a branch
/// tail is removed. Exits that can fall through jump to a synthesized
/// `fallthrough_<line>` label, recorded in `fallthrough` at `next_line`
/// (the line of the instruction following the block).
///
/// # Errors
///
/// Returns [`TransformError::Uninstrumentable`] if the tail branches to a
/// computed address or has a condition without an inverse.
pub fn instrument_block(
    unit: &str,
    block: &BasicBlock,
    next_line: usize,
    reg: &str,
    edits: &mut EditList,
    fallthrough: &mut EditList,
) -> Result<(), TransformError> {
    let tail = block.tail();
    let line = tail.line;
    let destination = match tail.destination() {
        Destination::Label(label) => Some(label),
        Destination::Indirect if tail.is_branch() => {
            return Err(uninstrumentable(unit, tail, "branch target is not a label"));
        }
        Destination::Indirect | Destination::NotApplicable => None,
    };
    let dest = destination.as_deref().unwrap_or_default();

    let (code, falls_through) = if tail.is_compare_branch() {
        let cond = if tail.stripped_operator() == "cbnz" {
            Condition::Ne
        } else {
            Condition::Eq
        };
        let (c, inv) = (cond.suffix(), cond.inverse().suffix());
        let creg = tail.operands.split(',').next().unwrap_or_default().trim();
        let code = format!(
            "    # cbz/cbnz conditional indirect\n    cmp {creg}, #0\n    ite {c}\n    ldr{c} {reg}, ={dest}+1\n    ldr{inv} {reg}, =fallthrough_{line}+1\n    bx {reg}\n    .ltorg"
        );
        (code, true)
    } else if tail.is_unconditional() {
        (format!("    # Unconditional indirect\n    ldr pc, ={dest}+1\n    .ltorg"), false)
    } else if !tail.is_branch() {
        (
            format!("    # Fallthrough indirect\n    ldr pc, =fallthrough_{line}+1\n    .ltorg"),
            true,
        )
    } else {
        let Some(cond) = Condition::from_branch(&tail.operator) else {
            return Err(uninstrumentable(unit, tail, "condition has no supported inverse"));
        };
        let (c, inv) = (cond.suffix(), cond.inverse().suffix());
        let code = format!(
            "    # Conditional indirect\n    ite {c}\n    ldr{c} {reg}, ={dest}+1\n    ldr{inv} {reg}, =fallthrough_{line}+1\n    bx {reg}\n.ltorg"
        );
        (code, true)
    };

    edits.after(line, code);
    if tail.is_branch() {
        edits.remove(line);
    }
    edits.before(block.line(), format!("# INSTRUMENTED {}", block.line()));
    if falls_through {
        fallthrough.before(next_line, format!("fallthrough_{line}:"));
    }
    debug!(unit, line = block.line(), "instrumented block");
    Ok(())
}

/// Move a block into the RAM overlay section.
///
/// Calls leave RAM through `reg`, `adr` becomes a literal load and a tail
/// branch into another routine becomes a load into `pc`, unless the block is
/// `instrumented` and its exit was already rewritten.
pub fn mark_ram_block(
    unit: &str,
    block: &BasicBlock,
    reg: &str,
    instrumented: bool,
    edits: &mut EditList,
) {
    for insn in block.instructions() {
        if insn.is_call() {
            if let Destination::Label(dest) = insn.destination() {
                edits.replace(insn.line, format!("    ldr {reg}, ={dest}\n    blx {reg}"));
            }
        } else if insn.is_address_generator() {
            if let Some((target, symbol)) = insn.operands.split_once(',') {
                edits.replace(insn.line, format!("    ldr {}, ={}", target.trim(), symbol.trim()));
            }
        }
    }

    let tail = block.tail();
    if tail.is_forced_call() && !instrumented {
        match tail.destination() {
            Destination::Label(dest) if tail.is_unconditional() => {
                edits.replace(tail.line, format!("    ldr pc, ={dest}+1"));
            }
            _ => warn!(unit, line = tail.line, "conditional tail call left relative in RAM"),
        }
    }

    edits.after(tail.line, ".text\n.align 2");
    edits.before(block.line(), format!(".section {RAM_SECTION}, \"x\"\n.align 2"));
}

/// Mark the block start with a `# break unit:line` comment.
pub fn breakpoint_block(unit: &str, block: &BasicBlock, edits: &mut EditList) {
    let marker = format!("# break {unit}:{}", block.line());
    if block.first().is_label() {
        edits.after(block.line(), marker);
    } else {
        edits.before(block.line(), marker);
    }
}

/// Counts from transforming one unit.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TransformStats {
    pub blocks: usize,
    pub in_ram: usize,
    pub instrumented: usize,
}

/// Collect every edit for `unit` from the graphs built from it.
///
/// Graphs of other units in `cfgs` are skipped. All blocks are visited even
/// after a failure so that every uninstrumentable block is logged.
///
/// # Errors
///
/// Returns the first [`TransformError`] encountered.
pub fn transform_unit(
    unit: &SourceUnit,
    cfgs: &[ControlFlowGraph],
    config: &OverlayConfig,
) -> Result<(EditList, TransformStats), TransformError> {
    let _span = trace_span!("transform_unit", unit = %unit.name).entered();
    let reg = config.safe_register.as_str();
    let name = unit.name.as_str();
    let cfgs: Vec<&ControlFlowGraph> = cfgs.iter().filter(|cfg| cfg.unit() == name).collect();

    let mut edits = EditList::new();
    let mut fallthrough = EditList::new();
    let mut stats = TransformStats::default();
    let mut failure = None;

    for cfg in &cfgs {
        for id in cfg.ids() {
            let block = cfg.block(id);
            stats.blocks += 1;
            let needed = needs_instrumentation(cfg, id);
            transform_references(block, needed, &mut edits);

            if needed != cfg.placement(id).instrumented {
                debug!(unit = name, line = block.line(), needed, "instrumentation differs from placement decision");
            }
            if !needed {
                continue;
            }
            let last = block.instructions().last().unwrap_or_else(|| block.tail());
            let next_line = unit
                .instructions
                .get(last.address + 1)
                .map_or(last.line + 1, |insn| insn.line);
            match instrument_block(name, block, next_line, reg, &mut edits, &mut fallthrough) {
                Ok(()) => stats.instrumented += 1,
                Err(err) => {
                    warn!(%err, "uninstrumentable block");
                    failure.get_or_insert(err);
                }
            }
        }
    }

    for cfg in &cfgs {
        for id in cfg.ids().filter(|&id| cfg.in_ram(id)) {
            stats.in_ram += 1;
            mark_ram_block(name, cfg.block(id), reg, needs_instrumentation(cfg, id), &mut edits);
        }
    }

    for cfg in &cfgs {
        for block in cfg.blocks() {
            breakpoint_block(name, block, &mut edits);
        }
    }

    if let Some(err) = failure {
        return Err(err);
    }
    edits.append(fallthrough);
    info!(
        unit = name,
        blocks = stats.blocks,
        in_ram = stats.in_ram,
        instrumented = stats.instrumented,
        "transformed unit"
    );
    Ok((edits, stats))
}

/// Edited text of `unit`, newline terminated.
#[must_use]
pub fn render(unit: &SourceUnit, edits: &EditList) -> String {
    let mut text = edits.apply(&unit.lines).join("\n");
    text.push('\n');
    text
}
