//! Placement problem export and solver decision import.

use std::fmt::Write as _;
use std::io::Write;
use std::path::Path;

use ovl_cfg::{BasicBlock, BlockRef, ControlFlowGraph, Placement};
use ovl_isa::{Cost, SizeOracle};
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug, info, trace_span, warn};

use crate::{OverlayConfig, PlacementError};

/// Bytes and cycles added by instrumenting a block, by tail kind.
struct BoundaryCost {
    bytes: u32,
    cycles: u32,
}

const COMPARE_BRANCH: BoundaryCost = BoundaryCost { bytes: 8, cycles: 5 };
const FALLTHROUGH: BoundaryCost = BoundaryCost { bytes: 6, cycles: 4 };
const UNCONDITIONAL: BoundaryCost = BoundaryCost { bytes: 2, cycles: 1 };
const CONDITIONAL: BoundaryCost = BoundaryCost { bytes: 6, cycles: 4 };

/// Extra bytes and cycles of each call routed through the safe register.
const CALL_PENALTY: u32 = 2;
/// Extra cycles of each load or store executed from RAM.
const RAM_ACCESS_PENALTY: u32 = 2;

/// Size and cycle overhead of instrumenting `block`.
#[must_use]
pub fn instrumentation_cost(block: &BasicBlock) -> Cost {
    let tail = block.tail();
    let base = if tail.is_compare_branch() {
        COMPARE_BRANCH
    } else if !tail.is_branch() {
        FALLTHROUGH
    } else if tail.is_unconditional() {
        UNCONDITIONAL
    } else {
        CONDITIONAL
    };
    let calls = u32::try_from(block.call_count()).unwrap_or(u32::MAX);
    let extra = calls.saturating_mul(CALL_PENALTY);
    Cost::new(base.bytes + extra, base.cycles + extra)
}

/// Extra cycles of running `block` from RAM.
#[must_use]
pub fn ram_access_cost(block: &BasicBlock) -> u32 {
    u32::try_from(block.memory_access_count())
        .unwrap_or(u32::MAX)
        .saturating_mul(RAM_ACCESS_PENALTY)
}

/// One block of the placement problem.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProblemBlock {
    pub name: String,
    pub location: BlockRef,
    pub cost: Cost,
    pub iterations: u64,
    pub force_ram: bool,
    pub force_flash: bool,
    pub instrumentation: Cost,
    pub ram_access_cycles: u32,
}

/// Block costs and control flow, ready for the placement solver.
#[derive(Clone, Debug)]
pub struct PlacementProblem {
    blocks: Vec<ProblemBlock>,
    successors: Vec<FxHashSet<usize>>,
    e_flash: u32,
    e_ram: u32,
    spare_ram: u32,
    max_cycle_factor: f64,
}

impl PlacementProblem {
    /// Cost every block of `cfgs`.
    ///
    /// # Errors
    ///
    /// Fails on the first instruction that cannot be costed.
    pub fn build(
        cfgs: &[ControlFlowGraph],
        oracle: &mut dyn SizeOracle,
        config: &OverlayConfig,
    ) -> Result<Self, PlacementError> {
        let _span = trace_span!("placement_problem").entered();
        let mut blocks = Vec::new();
        let mut offsets = Vec::with_capacity(cfgs.len());
        for (c, cfg) in cfgs.iter().enumerate() {
            offsets.push(blocks.len());
            for id in cfg.ids() {
                let block = cfg.block(id);
                let force_ram = config.is_forced(cfg.unit(), block.line());
                blocks.push(ProblemBlock {
                    name: cfg.block_name(id),
                    location: BlockRef { cfg: c, block: id },
                    cost: block.cost(oracle)?,
                    iterations: cfg.iterations(id),
                    force_ram,
                    force_flash: config.specified_only && !force_ram,
                    instrumentation: instrumentation_cost(block),
                    ram_access_cycles: ram_access_cost(block),
                });
            }
        }

        let successors = blocks
            .iter()
            .map(|b| {
                let cfg = &cfgs[b.location.cfg];
                let offset = offsets[b.location.cfg];
                cfg.successors(b.location.block)
                    .iter()
                    .map(|succ| offset + succ.index())
                    .collect()
            })
            .collect();

        report_unmatched(cfgs, config);
        debug!(blocks = blocks.len(), "built placement problem");
        Ok(Self {
            blocks,
            successors,
            e_flash: config.e_flash,
            e_ram: config.e_ram,
            spare_ram: config.spare_ram,
            max_cycle_factor: config.max_cycle_factor,
        })
    }

    #[must_use]
    pub fn blocks(&self) -> &[ProblemBlock] {
        &self.blocks
    }

    /// Write the problem as a GLPK MathProg data section.
    ///
    /// # Errors
    ///
    /// Propagates write failures.
    pub fn write_mathprog<W: Write>(&self, out: &mut W) -> std::io::Result<()> {
        out.write_all(self.to_mathprog().as_bytes())
    }

    /// Write the data section to `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        let mut file = std::fs::File::create(path)?;
        self.write_mathprog(&mut file)?;
        info!(path = %path.display(), blocks = self.blocks.len(), "wrote placement problem");
        Ok(())
    }

    /// The GLPK MathProg data section.
    #[must_use]
    pub fn to_mathprog(&self) -> String {
        let names: Vec<&str> = self.blocks.iter().map(|b| b.name.as_str()).collect();
        let width = names.iter().map(|n| n.len()).max().unwrap_or(0);
        let mut text = String::new();

        let _ = write!(text, "set BBs := {};\n\n", names.join(" "));

        let param = |text: &mut String, name: &str, value: fn(&ProblemBlock) -> String| {
            let _ = writeln!(text, "param {name} :=");
            for block in &self.blocks {
                let _ = writeln!(text, "\t{:<width$} {}", block.name, value(block));
            }
            text.push_str(";\n\n");
        };
        param(&mut text, "usize", |b| b.cost.size.to_string());
        param(&mut text, "cyc_cost", |b| b.cost.cycles.to_string());
        param(&mut text, "iterations", |b| b.iterations.to_string());
        param(&mut text, "force_ram", |b| u8::from(b.force_ram).to_string());
        param(&mut text, "force_flash", |b| u8::from(b.force_flash).to_string());
        param(&mut text, "icost_ram", |b| b.instrumentation.size.to_string());
        param(&mut text, "icost_cyc", |b| b.instrumentation.cycles.to_string());
        param(&mut text, "icost_cyc_ram", |b| b.ram_access_cycles.to_string());

        let _ = writeln!(text, "param successors : {} :=", names.join(" "));
        for (i, block) in self.blocks.iter().enumerate() {
            let _ = write!(text, "\t{:<width$}\t\t", block.name);
            for j in 0..self.blocks.len() {
                let _ = write!(text, "{} ", u8::from(self.successors[i].contains(&j)));
            }
            text.push('\n');
        }
        text.push_str(";\n\n");

        let _ = writeln!(text, "param E_flash := {};", self.e_flash);
        let _ = writeln!(text, "param E_ram := {};", self.e_ram);
        let _ = writeln!(text, "param spare_ram := {};", self.spare_ram);
        let _ = writeln!(text, "param max_cycle_factor := {};", self.max_cycle_factor);
        text.push_str("end;\n");
        text
    }
}

fn report_unmatched(cfgs: &[ControlFlowGraph], config: &OverlayConfig) {
    for location in &config.forced {
        let found = cfgs
            .iter()
            .filter(|cfg| cfg.unit() == location.unit)
            .any(|cfg| cfg.block_at_line(location.line).is_some());
        if !found {
            warn!(block = %location, "forced block does not start any basic block");
        }
    }
}

/// Place exactly the forced blocks in RAM, without a solver.
///
/// Returns the number of blocks placed.
pub fn place_forced(cfgs: &mut [ControlFlowGraph], config: &OverlayConfig) -> usize {
    report_unmatched(cfgs, config);
    let mut placed = 0;
    for cfg in cfgs.iter_mut() {
        for id in cfg.ids() {
            if config.is_forced(cfg.unit(), cfg.block(id).line()) {
                cfg.set_placement(
                    id,
                    Placement {
                        in_ram: true,
                        instrumented: false,
                    },
                );
                placed += 1;
            }
        }
    }
    info!(blocks = placed, "placed forced blocks in RAM");
    placed
}

/// Solver answer for one block.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockDecision {
    pub size: u32,
    pub in_ram: bool,
    pub instrumented: bool,
}

/// Placement decision read back from the solver.
///
/// The file starts with `#` comment lines; lines 2, 4 and 7 carry the
/// objective cost, the cycle count and the RAM bytes used as `label: value`.
/// Every other line is a `block,size,in_ram,instrumented` row.
#[derive(Clone, Debug, Default)]
pub struct Decision {
    pub cost: i64,
    pub cycles: i64,
    pub ram_size: i64,
    blocks: FxHashMap<String, BlockDecision>,
}

impl Decision {
    /// Parse solver output.
    ///
    /// # Errors
    ///
    /// Returns [`PlacementError::Decision`] for a missing summary value or a
    /// malformed row.
    pub fn parse(text: &str) -> Result<Self, PlacementError> {
        let lines: Vec<&str> = text.lines().collect();
        let summary = |index: usize| -> Result<i64, PlacementError> {
            let line = lines.get(index).copied().unwrap_or_default();
            line.split(':')
                .nth(1)
                .and_then(|value| value.trim().parse().ok())
                .ok_or_else(|| PlacementError::Decision {
                    line: index + 1,
                    text: line.to_string(),
                })
        };
        let mut decision = Self {
            cost: summary(1)?,
            cycles: summary(3)?,
            ram_size: summary(6)?,
            blocks: FxHashMap::default(),
        };

        for (index, line) in lines.iter().enumerate() {
            if line.starts_with('#') {
                debug!(comment = line.trim(), "solver");
                continue;
            }
            if line.trim().is_empty() {
                continue;
            }
            let malformed = || PlacementError::Decision {
                line: index + 1,
                text: (*line).to_string(),
            };
            let fields: Vec<&str> = line.split(',').map(str::trim).collect();
            let [name, size, in_ram, instrumented, ..] = fields.as_slice() else {
                return Err(malformed());
            };
            decision.blocks.insert(
                (*name).to_string(),
                BlockDecision {
                    size: size.parse().map_err(|_| malformed())?,
                    in_ram: *in_ram == "1",
                    instrumented: *instrumented == "1",
                },
            );
        }
        Ok(decision)
    }

    /// Read a decision file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self, PlacementError> {
        Self::parse(&std::fs::read_to_string(path)?)
    }

    #[must_use]
    pub fn block(&self, name: &str) -> Option<BlockDecision> {
        self.blocks.get(name).copied()
    }

    /// Bytes of code the decision moves to RAM.
    #[must_use]
    pub fn ram_bytes(&self) -> u64 {
        self.blocks
            .values()
            .filter(|b| b.in_ram)
            .map(|b| u64::from(b.size))
            .sum()
    }

    /// Attach the decision to the blocks of `cfgs`.
    ///
    /// Returns the number of blocks placed in RAM.
    pub fn apply(&self, cfgs: &mut [ControlFlowGraph]) -> usize {
        let mut seen = FxHashSet::default();
        let mut placed = 0;
        for cfg in cfgs.iter_mut() {
            for id in cfg.ids() {
                let name = cfg.block_name(id);
                let Some(decision) = self.blocks.get(&name) else {
                    continue;
                };
                cfg.set_placement(
                    id,
                    Placement {
                        in_ram: decision.in_ram,
                        instrumented: decision.instrumented,
                    },
                );
                placed += usize::from(decision.in_ram);
                seen.insert(name);
            }
        }

        let mut unknown: Vec<&String> = self.blocks.keys().filter(|n| !seen.contains(*n)).collect();
        unknown.sort_unstable();
        for name in unknown {
            warn!(block = %name, "placement decision names an unknown block");
        }
        info!(
            cost = self.cost,
            cycles = self.cycles,
            blocks = placed,
            bytes = self.ram_bytes(),
            "applied placement decision"
        );
        placed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ovl_cfg::{BlockId, build_unit, routine_labels};
    use ovl_isa::{OracleError, SourceUnit, THUMB2};

    const PROGRAM: &str = "\
\t.type\tf, %function
f:
\tldr\tr3, [r0]
\tcbz\tr3, .L2
\tbl\tg
.L2:
\tbx\tlr
";

    fn cfgs() -> Vec<ControlFlowGraph> {
        let unit = SourceUnit::parse("u.s", PROGRAM, &THUMB2);
        let routines = routine_labels(std::slice::from_ref(&unit));
        build_unit(&unit, &routines).unwrap()
    }

    fn two_bytes(_: &str, _: Option<&str>) -> Result<u32, OracleError> {
        Ok(2)
    }

    #[test]
    fn test_instrumentation_costs() {
        let cfgs = cfgs();
        let cfg = &cfgs[0];
        // f: ldr, cbz | bl g | .L2: bx lr
        assert_eq!(instrumentation_cost(cfg.block(BlockId::new(0))), Cost::new(8, 5));
        assert_eq!(instrumentation_cost(cfg.block(BlockId::new(1))), Cost::new(8, 6));
        assert_eq!(instrumentation_cost(cfg.block(BlockId::new(2))), Cost::new(2, 1));
        assert_eq!(ram_access_cost(cfg.block(BlockId::new(0))), 2);
    }

    #[test]
    fn test_mathprog_layout() {
        let cfgs = cfgs();
        let config = OverlayConfig::new().with_forced("u.s:5".parse().unwrap());
        let mut oracle = two_bytes;
        let problem = PlacementProblem::build(&cfgs, &mut oracle, &config).unwrap();
        let text = problem.to_mathprog();

        assert!(text.starts_with("set BBs := u.s_f u.s_4 u.s_.L2;\n\n"));
        assert!(text.contains("param force_ram :=\n\tu.s_f   0\n\tu.s_4   0\n\tu.s_.L2 1\n;\n\n"));
        assert!(text.contains("param successors : u.s_f u.s_4 u.s_.L2 :=\n\tu.s_f  \t\t0 1 1 \n"));
        assert!(text.contains("param icost_cyc_ram :=\n\tu.s_f   2\n"));
        assert!(text.ends_with(
            "param E_flash := 100;\nparam E_ram := 66;\nparam spare_ram := 1000;\nparam max_cycle_factor := 1.5;\nend;\n"
        ));
    }

    #[test]
    fn test_decision_roundtrip_onto_blocks() {
        let mut cfgs = cfgs();
        let text = "\
# Solution
# Cost: 1234
#
# Cycles: 99
#
#
# RAM: 6
u.s_f,6,1,1
u.s_4,4,0,0
u.s_.L2,2,1,0
u.s_gone,2,1,0
";
        let decision = Decision::parse(text).unwrap();
        assert_eq!((decision.cost, decision.cycles, decision.ram_size), (1234, 99, 6));
        assert_eq!(decision.ram_bytes(), 10);
        assert_eq!(decision.apply(&mut cfgs), 2);

        let cfg = &cfgs[0];
        assert!(cfg.in_ram(BlockId::new(0)));
        assert!(cfg.placement(BlockId::new(0)).instrumented);
        assert!(!cfg.in_ram(BlockId::new(1)));
        assert!(cfg.in_ram(BlockId::new(2)));
    }

    #[test]
    fn test_decision_errors() {
        assert!(matches!(
            Decision::parse("# only\n# Cost: x\n"),
            Err(PlacementError::Decision { line: 2, .. })
        ));
        let text = "#\n# Cost: 1\n#\n# Cycles: 1\n#\n#\n# RAM: 0\nbroken\n";
        assert!(matches!(
            Decision::parse(text),
            Err(PlacementError::Decision { line: 8, .. })
        ));
    }

    #[test]
    fn test_forced_placement() {
        let mut cfgs = cfgs();
        let config = OverlayConfig::new()
            .with_forced("u.s:1".parse().unwrap())
            .with_forced("u.s:3".parse().unwrap());
        assert_eq!(place_forced(&mut cfgs, &config), 1);
        assert!(cfgs[0].in_ram(BlockId::new(0)));
    }
}
