//! Overlay pipeline - source units → CFGs → placement → rewritten source.

use std::path::{Path, PathBuf};

use ovl_cfg::{CallGraph, ControlFlowGraph, build_unit, estimate_iterations, load_profile, routine_labels};
use ovl_emit::{Decision, EditList, OverlayConfig, PlacementProblem, TransformStats, place_forced, render, transform_unit};
use ovl_isa::{SizeOracle, SourceUnit, THUMB2};
use tracing::{debug, error, info, trace_span};

use crate::{Error, PlacementSolver, Result};

/// Block and loop counts of the loaded program.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Summary {
    pub units: usize,
    pub routines: usize,
    pub blocks: usize,
    pub loop_headers: usize,
    pub unknown_calls: Vec<String>,
}

/// Rewritten text of one unit.
#[derive(Clone, Debug)]
pub struct TransformedUnit {
    pub name: String,
    pub text: String,
    pub stats: TransformStats,
}

impl TransformedUnit {
    /// Where the rewritten unit is written: `<unit>.out`.
    #[must_use]
    pub fn output_path(&self) -> PathBuf {
        PathBuf::from(format!("{}.out", self.name))
    }
}

/// Overlay placement pipeline.
pub struct Pipeline {
    config: OverlayConfig,
    units: Vec<SourceUnit>,
    cfgs: Vec<ControlFlowGraph>,
    calls: CallGraph,
}

impl Pipeline {
    #[must_use]
    pub fn new(config: OverlayConfig) -> Self {
        Self {
            config,
            units: Vec::new(),
            cfgs: Vec::new(),
            calls: CallGraph::default(),
        }
    }

    #[must_use]
    pub const fn config(&self) -> &OverlayConfig {
        &self.config
    }

    #[must_use]
    pub fn units(&self) -> &[SourceUnit] {
        &self.units
    }

    #[must_use]
    pub fn cfgs(&self) -> &[ControlFlowGraph] {
        &self.cfgs
    }

    #[must_use]
    pub const fn calls(&self) -> &CallGraph {
        &self.calls
    }

    /// Read assembler files. Each unit is named by its path.
    ///
    /// # Errors
    ///
    /// Returns an error if a file cannot be read.
    pub fn load(&mut self, paths: &[PathBuf]) -> Result<()> {
        for path in paths {
            info!(path = %path.display(), "loading");
            self.units.push(SourceUnit::load(path, &THUMB2)?);
        }
        Ok(())
    }

    /// Add an already parsed unit.
    pub fn add_unit(&mut self, unit: SourceUnit) {
        self.units.push(unit);
    }

    /// Build the routine graphs of every unit, link calls and find loops.
    ///
    /// # Errors
    ///
    /// Returns an error if no unit is loaded or a call cannot be
    /// reclassified.
    pub fn build(&mut self) -> Result<()> {
        let _span = trace_span!("build").entered();
        if self.units.is_empty() {
            return Err(Error::NoUnits);
        }
        let routines = routine_labels(&self.units);
        debug!(routines = routines.len(), "collected routine labels");

        self.cfgs.clear();
        for unit in &self.units {
            self.cfgs.extend(build_unit(unit, &routines)?);
        }
        for cfg in &mut self.cfgs {
            cfg.analyze_loops();
        }
        self.calls = CallGraph::build(&self.cfgs);
        info!(units = self.units.len(), routines = self.cfgs.len(), "built control flow graphs");
        Ok(())
    }

    /// Estimate block execution counts from loop nesting.
    pub fn estimate_iterations(&mut self) {
        estimate_iterations(
            &mut self.cfgs,
            &self.calls,
            self.config.loop_estimate,
            self.config.max_call_depth,
        );
    }

    /// Override execution counts from a profile file.
    ///
    /// # Errors
    ///
    /// Returns an error if the profile cannot be read or parsed.
    pub fn apply_profile(&mut self, path: &Path) -> Result<usize> {
        Ok(load_profile(&mut self.cfgs, path)?)
    }

    /// Cost every block for the placement solver.
    ///
    /// # Errors
    ///
    /// Fails if any instruction cannot be costed.
    pub fn placement_problem(&self, oracle: &mut dyn SizeOracle) -> Result<PlacementProblem> {
        Ok(PlacementProblem::build(&self.cfgs, oracle, &self.config)?)
    }

    /// Decide placement with `solver` and attach it to the blocks.
    ///
    /// # Errors
    ///
    /// Fails if costing fails or the solver finds no placement.
    pub fn solve(
        &mut self,
        solver: &mut dyn PlacementSolver,
        oracle: &mut dyn SizeOracle,
    ) -> Result<Decision> {
        let problem = self.placement_problem(oracle)?;
        let decision = solver.solve(&problem)?;
        decision.apply(&mut self.cfgs);
        Ok(decision)
    }

    /// Attach a decision read from an earlier solver run.
    pub fn apply_decision(&mut self, decision: &Decision) -> usize {
        decision.apply(&mut self.cfgs)
    }

    /// Place only the configured forced blocks, without a solver.
    pub fn place_forced(&mut self) -> usize {
        place_forced(&mut self.cfgs, &self.config)
    }

    /// Rewrite every unit for the current placement.
    ///
    /// Every unit is processed before failing, so each uninstrumentable
    /// block is logged.
    ///
    /// # Errors
    ///
    /// Returns the first uninstrumentable block; nothing is produced then.
    pub fn transform(&self) -> Result<Vec<TransformedUnit>> {
        let _span = trace_span!("transform").entered();
        let mut transformed = Vec::with_capacity(self.units.len());
        let mut failures = Vec::new();
        for unit in &self.units {
            match transform_unit(unit, &self.cfgs, &self.config) {
                Ok((edits, stats)) => transformed.push(Self::rendered(unit, &edits, stats)),
                Err(err) => failures.push(err),
            }
        }
        if let Some(first) = failures.into_iter().next() {
            error!("transformation aborted, some blocks cannot be instrumented");
            return Err(first.into());
        }
        Ok(transformed)
    }

    fn rendered(unit: &SourceUnit, edits: &EditList, stats: TransformStats) -> TransformedUnit {
        TransformedUnit {
            name: unit.name.clone(),
            text: render(unit, edits),
            stats,
        }
    }

    /// Write each unit next to its source as `<unit>.out`.
    ///
    /// # Errors
    ///
    /// Returns an error if a file cannot be written.
    pub fn write_outputs(transformed: &[TransformedUnit]) -> Result<Vec<PathBuf>> {
        let mut paths = Vec::with_capacity(transformed.len());
        for unit in transformed {
            let path = unit.output_path();
            std::fs::write(&path, &unit.text)?;
            info!(path = %path.display(), "wrote transformed unit");
            paths.push(path);
        }
        Ok(paths)
    }

    /// Counts for reporting.
    #[must_use]
    pub fn summary(&self) -> Summary {
        Summary {
            units: self.units.len(),
            routines: self.cfgs.len(),
            blocks: self.cfgs.iter().map(ControlFlowGraph::len).sum(),
            loop_headers: self.cfgs.iter().map(|cfg| cfg.loop_headers().len()).sum(),
            unknown_calls: self.calls.unknown_targets().to_vec(),
        }
    }
}
