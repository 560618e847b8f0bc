//! Placement solver backends.

use std::path::{Path, PathBuf};
use std::process::Command;

use ovl_emit::{Decision, PlacementProblem};
use tracing::{debug, error, info};

use crate::{Error, Result};

/// Printed by `glpsol` when the integer problem was solved to optimality.
const OPTIMAL_MARKER: &str = "INTEGER OPTIMAL SOLUTION FOUND";

/// Something that decides which blocks go to RAM.
pub trait PlacementSolver {
    /// Solve `problem`.
    ///
    /// # Errors
    ///
    /// Returns an error if no optimal placement was found.
    fn solve(&mut self, problem: &PlacementProblem) -> Result<Decision>;
}

/// GLPK's `glpsol` run on a MathProg model.
#[derive(Clone, Debug)]
pub struct Glpsol {
    program: String,
    model: PathBuf,
}

impl Glpsol {
    #[must_use]
    pub fn new(model: impl Into<PathBuf>) -> Self {
        Self {
            program: "glpsol".to_string(),
            model: model.into(),
        }
    }

    /// Use a different solver executable.
    #[must_use]
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    #[must_use]
    pub fn model(&self) -> &Path {
        &self.model
    }
}

impl PlacementSolver for Glpsol {
    fn solve(&mut self, problem: &PlacementProblem) -> Result<Decision> {
        let dir = tempfile::tempdir()?;
        let data = dir.path().join("ilp.data");
        let out = dir.path().join("solution.csv");
        problem.save(&data)?;

        info!(model = %self.model.display(), blocks = problem.blocks().len(), "starting placement solver");
        let output = Command::new(&self.program)
            .arg("-d")
            .arg(&data)
            .arg("-m")
            .arg(&self.model)
            .arg("-y")
            .arg(&out)
            .output()
            .map_err(|e| Error::Solver(format!("failed to run {}: {e}", self.program)))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        if !output.status.success() || !stdout.contains(OPTIMAL_MARKER) {
            let stderr = String::from_utf8_lossy(&output.stderr);
            error!(status = ?output.status.code(), "placement solver found no optimal solution");
            return Err(Error::Solver(format!("{stdout}{stderr}")));
        }
        debug!("placement solver finished");

        Ok(Decision::load(&out)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_solver_is_an_error() {
        let problem_text = "#\n# Cost: 1\n#\n# Cycles: 2\n#\n#\n# RAM: 0\n";
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("decision.csv");
        std::fs::write(&path, problem_text).unwrap();

        let decision = Decision::load(&path).unwrap();
        assert_eq!(decision.cycles, 2);

        let mut solver = Glpsol::new("model.mod").with_program("ovl-no-such-solver");
        let cfgs: Vec<ovl_cfg::ControlFlowGraph> = Vec::new();
        let mut oracle = |_: &str, _: Option<&str>| -> std::result::Result<u32, ovl_isa::OracleError> { Ok(2) };
        let problem =
            PlacementProblem::build(&cfgs, &mut oracle, &ovl_emit::OverlayConfig::default()).unwrap();
        assert!(matches!(solver.solve(&problem), Err(Error::Solver(_))));
    }
}
