//! Transform command.

use std::path::{Path, PathBuf};

use ovl::{Decision, Glpsol, Pipeline};
use tracing::{error, info};

use super::SizeOracleHandle;
use crate::cli::{EXIT_FAILURE, EXIT_SUCCESS, EstimateArgs, PlacementArgs, SizeArgs, build_config};
use crate::terminal::{self, StepTracker};

/// Arguments of the `transform` command.
pub struct TransformArgs<'a> {
    pub files: &'a [PathBuf],
    pub solve: bool,
    pub model: Option<&'a Path>,
    pub placement_file: Option<&'a Path>,
    pub register: &'a str,
    pub estimate: &'a EstimateArgs,
    pub placement: &'a PlacementArgs,
    pub size: &'a SizeArgs,
}

/// Handle the `transform` command.
pub fn cmd_transform(args: &TransformArgs<'_>) -> i32 {
    let config = build_config(args.estimate, Some(args.placement)).with_safe_register(args.register);
    let mut pipeline = Pipeline::new(config);
    let mut steps = StepTracker::new(3);

    let spinner = steps.step("Analyzing control flow");
    if let Err(err) = spinner.suspend(|| super::prepare(&mut pipeline, args.files, args.estimate)) {
        error!(error = %err, "analysis failed");
        spinner.finish_with_failure(&err.to_string());
        return EXIT_FAILURE;
    }
    let summary = pipeline.summary();
    spinner.finish_with_success(&format!("{} routines, {} blocks", summary.routines, summary.blocks));

    let spinner = steps.step("Placing basic blocks");
    match spinner.suspend(|| place(&mut pipeline, args)) {
        Ok(placed) => spinner.finish_with_success(&format!("{placed} blocks placed in RAM")),
        Err(err) => {
            error!(error = %err, "placement failed");
            spinner.finish_with_failure(&err.to_string());
            return EXIT_FAILURE;
        }
    }

    let spinner = steps.step("Rewriting assembler");
    let result = spinner.suspend(|| -> ovl::Result<Vec<PathBuf>> {
        let transformed = pipeline.transform()?;
        for unit in &transformed {
            info!(
                unit = %unit.name,
                in_ram = unit.stats.in_ram,
                instrumented = unit.stats.instrumented,
                "transformed unit"
            );
        }
        Pipeline::write_outputs(&transformed)
    });
    match result {
        Ok(paths) => {
            spinner.finish_with_success(&format!("{} units rewritten", paths.len()));
            for path in &paths {
                terminal::path_output(path);
            }
            EXIT_SUCCESS
        }
        Err(err) => {
            spinner.finish_with_failure(&err.to_string());
            EXIT_FAILURE
        }
    }
}

/// Decide the RAM placement; returns the number of blocks placed in RAM.
fn place(pipeline: &mut Pipeline, args: &TransformArgs<'_>) -> ovl::Result<usize> {
    if args.solve {
        let Some(model) = args.model else {
            return Err(ovl::Error::Solver("--solve needs a model".to_string()));
        };
        let mut solver = Glpsol::new(model);
        let mut handle = SizeOracleHandle::open(args.size)?;
        let decision = pipeline.solve(&mut solver, &mut handle.oracle)?;
        handle.close()?;
        info!(
            cost = decision.cost,
            cycles = decision.cycles,
            ram = decision.ram_bytes(),
            "solver decision"
        );
        Ok(pipeline
            .cfgs()
            .iter()
            .map(|cfg| cfg.ids().filter(|&id| cfg.in_ram(id)).count())
            .sum())
    } else if let Some(path) = args.placement_file {
        let decision = Decision::load(path)?;
        Ok(pipeline.apply_decision(&decision))
    } else {
        if pipeline.config().forced.is_empty() {
            terminal::warning("no --solve, --placement or --bb given; every block stays in flash");
        }
        Ok(pipeline.place_forced())
    }
}
