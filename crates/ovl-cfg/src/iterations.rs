//! Block execution count estimates.

use std::path::Path;

use tracing::{debug, info, trace_span, warn};

use crate::{BlockRef, CallGraph, CfgError, ControlFlowGraph, Result};

/// Assumed iterations of every loop.
pub const DEFAULT_LOOP_ESTIMATE: u64 = 10;

/// Calls deeper than this are not followed.
pub const MAX_CALL_DEPTH: usize = 5;

/// Estimate how often every block runs, starting from the uncalled routines.
///
/// A block nested in `d` loops runs `E^d` times its routine's count; a loop
/// header (counted in its own nesting depth) runs `E^(d+1) * (E+1)` times.
/// A routine's count is the count of the block calling it. Every block keeps
/// the largest estimate reached along any call chain.
pub fn estimate_iterations(
    cfgs: &mut [ControlFlowGraph],
    calls: &CallGraph,
    estimate: u64,
    max_depth: usize,
) {
    let _span = trace_span!("estimate_iterations").entered();
    let roots = calls.roots(cfgs.len());
    if roots.is_empty() {
        warn!("every routine is called, no root to estimate iterations from");
    } else if roots.len() > 1 {
        debug!(roots = roots.len(), "more than one root routine");
    }
    for root in roots {
        propagate(cfgs, calls, root, estimate, 1, 0, max_depth);
    }
}

fn propagate(
    cfgs: &mut [ControlFlowGraph],
    calls: &CallGraph,
    index: usize,
    estimate: u64,
    base: u64,
    depth: usize,
    max_depth: usize,
) {
    if depth > max_depth {
        info!(
            routine = %routine_name(&cfgs[index]),
            depth,
            "call depth limit reached, iteration estimate stops here"
        );
        return;
    }

    cfgs[index].analyze_loops();
    for id in cfgs[index].ids() {
        let count = {
            let cfg = &mut cfgs[index];
            let nesting = u32::try_from(cfg.loop_headers_of(id).len()).unwrap_or(u32::MAX);
            let count = if cfg.is_loop_header(id) {
                estimate
                    .saturating_pow(nesting.saturating_add(1))
                    .saturating_mul(estimate.saturating_add(1))
                    .saturating_mul(base)
            } else {
                estimate.saturating_pow(nesting).saturating_mul(base)
            };
            let count = count.max(cfg.iterations(id));
            cfg.set_iterations(id, count);
            count
        };

        let caller = BlockRef { cfg: index, block: id };
        for edge in calls.calls_from(caller) {
            propagate(cfgs, calls, edge.callee.cfg, estimate, count, depth + 1, max_depth);
        }
    }
}

fn routine_name(cfg: &ControlFlowGraph) -> String {
    cfg.starts()
        .first()
        .and_then(|&id| cfg.block(id).label())
        .map_or_else(|| cfg.unit().to_string(), str::to_string)
}

/// Override iteration counts from a profile.
///
/// Each non-empty line is `<unit>:<line> <count>` (or `<unit>_<line>
/// <count>`), naming the source line a block starts at. Entries that match
/// no unit or block are logged and skipped. Returns the number of blocks
/// updated.
///
/// # Errors
///
/// Returns [`CfgError::Profile`] for a line that cannot be parsed.
pub fn apply_profile(cfgs: &mut [ControlFlowGraph], text: &str) -> Result<usize> {
    let mut applied = 0;
    for (n, raw) in text.lines().enumerate() {
        let malformed = || CfgError::Profile {
            line: n + 1,
            text: raw.to_string(),
        };
        let mut fields = raw.split_whitespace();
        let Some(location) = fields.next() else {
            continue;
        };
        let count: u64 = fields
            .next()
            .and_then(|c| c.parse().ok())
            .ok_or_else(malformed)?;
        let delimiter = if location.contains(':') { ':' } else { '_' };
        let (unit, line) = location.rsplit_once(delimiter).ok_or_else(malformed)?;
        let line: usize = line.parse().map_err(|_| malformed())?;

        if !cfgs.iter().any(|cfg| cfg.unit() == unit) {
            warn!(unit, "profile names an unknown source unit");
            continue;
        }

        let mut found = false;
        for cfg in cfgs.iter_mut().filter(|cfg| cfg.unit() == unit) {
            if let Some(id) = cfg.block_at_line(line) {
                cfg.set_iterations(id, count);
                found = true;
                applied += 1;
            }
        }
        if !found {
            warn!(unit, line, "profile names a line that starts no block");
        }
    }
    debug!(applied, "applied iteration profile");
    Ok(applied)
}

/// Read a profile file and apply it with [`apply_profile`].
///
/// # Errors
///
/// Returns an error if the file cannot be read or is malformed.
pub fn load_profile(cfgs: &mut [ControlFlowGraph], path: impl AsRef<Path>) -> Result<usize> {
    let text = std::fs::read_to_string(path)?;
    apply_profile(cfgs, &text)
}
