//! Analyze command.

use std::path::PathBuf;

use ovl::{ControlFlowGraph, Pipeline};
use tracing::error;

use crate::cli::{EXIT_FAILURE, EXIT_SUCCESS, EstimateArgs, build_config};
use crate::terminal::{self, Alignment, Table};

fn routine_name(cfg: &ControlFlowGraph) -> String {
    cfg.starts()
        .first()
        .and_then(|&id| cfg.block(id).label())
        .map_or_else(|| format!("line {}", cfg.blocks()[0].line()), str::to_string)
}

/// Handle the `analyze` command.
pub fn cmd_analyze(files: &[PathBuf], estimate: &EstimateArgs) -> i32 {
    let mut pipeline = Pipeline::new(build_config(estimate, None));
    if let Err(err) = super::prepare(&mut pipeline, files, estimate) {
        error!(error = %err, "analysis failed");
        terminal::error(&err.to_string());
        return EXIT_FAILURE;
    }

    let mut table = Table::new(&["unit", "routine", "blocks", "loops", "max iterations"]).with_alignments(vec![
        Alignment::Left,
        Alignment::Left,
        Alignment::Right,
        Alignment::Right,
        Alignment::Right,
    ]);
    for cfg in pipeline.cfgs().iter().filter(|cfg| !cfg.is_empty()) {
        let max_iterations = cfg.ids().map(|id| cfg.iterations(id)).max().unwrap_or(0);
        table.add_row(vec![
            cfg.unit().to_string(),
            routine_name(cfg),
            cfg.len().to_string(),
            cfg.loop_headers().len().to_string(),
            max_iterations.to_string(),
        ]);
    }
    terminal::header("Routines");
    table.print();

    let summary = pipeline.summary();
    if !summary.unknown_calls.is_empty() {
        terminal::warning(&format!("calls resolved at link time: {}", summary.unknown_calls.join(", ")));
    }
    terminal::success(&format!(
        "{} units, {} routines, {} blocks, {} loop headers",
        summary.units, summary.routines, summary.blocks, summary.loop_headers
    ));
    EXIT_SUCCESS
}
