//! Export command.

use std::path::{Path, PathBuf};

use ovl::Pipeline;
use tracing::error;

use super::SizeOracleHandle;
use crate::cli::{EXIT_FAILURE, EXIT_SUCCESS, EstimateArgs, PlacementArgs, SizeArgs, build_config};
use crate::terminal::{self, StepTracker};

/// Handle the `export` command.
pub fn cmd_export(
    files: &[PathBuf],
    output: &Path,
    estimate: &EstimateArgs,
    placement: &PlacementArgs,
    size: &SizeArgs,
) -> i32 {
    let mut steps = StepTracker::new(2);
    let mut pipeline = Pipeline::new(build_config(estimate, Some(placement)));

    let spinner = steps.step("Analyzing control flow");
    if let Err(err) = spinner.suspend(|| super::prepare(&mut pipeline, files, estimate)) {
        error!(error = %err, "analysis failed");
        spinner.finish_with_failure(&err.to_string());
        return EXIT_FAILURE;
    }
    let summary = pipeline.summary();
    spinner.finish_with_success(&format!("{} routines, {} blocks", summary.routines, summary.blocks));

    let spinner = steps.step("Costing basic blocks");
    let result = spinner.suspend(|| -> ovl::Result<()> {
        let mut handle = SizeOracleHandle::open(size)?;
        let problem = pipeline.placement_problem(&mut handle.oracle)?;
        handle.close()?;
        problem.save(output)?;
        Ok(())
    });
    match result {
        Ok(()) => {
            spinner.finish_with_success("Placement problem written");
            terminal::path_output(output);
            EXIT_SUCCESS
        }
        Err(err) => {
            error!(error = %err, "export failed");
            spinner.finish_with_failure(&err.to_string());
            EXIT_FAILURE
        }
    }
}
