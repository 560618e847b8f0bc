//! Block arena with per-block annotations.

use rustc_hash::FxHashSet;

use crate::{BasicBlock, BlockId};

/// Immediate loop header links of one block.
///
/// `secondary` is only set for a self-loop block that was already inside
/// another loop: `primary` then points at the block itself and `secondary`
/// at the enclosing header.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LoopLinks {
    pub primary: Option<BlockId>,
    pub secondary: Option<BlockId>,
}

/// Placement decision re-attached to a block.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Placement {
    /// The block is relocated to overlay RAM.
    pub in_ram: bool,
    /// The solver charged boundary instrumentation for this block.
    pub instrumented: bool,
}

/// Basic blocks of one source unit, or of one routine after partitioning.
///
/// Blocks are stored in address order and referenced by [`BlockId`]. Loop,
/// iteration and placement annotations live in arrays indexed the same way.
#[derive(Clone, Debug)]
pub struct ControlFlowGraph {
    unit: String,
    blocks: Vec<BasicBlock>,
    starts: Vec<BlockId>,
    pub(crate) loops: Vec<LoopLinks>,
    pub(crate) headers: FxHashSet<BlockId>,
    iterations: Vec<u64>,
    placement: Vec<Placement>,
}

impl ControlFlowGraph {
    /// Create a graph over `blocks`, which must be in address order.
    #[must_use]
    pub fn new(unit: impl Into<String>, blocks: Vec<BasicBlock>) -> Self {
        let n = blocks.len();
        Self {
            unit: unit.into(),
            blocks,
            starts: Vec::new(),
            loops: vec![LoopLinks::default(); n],
            headers: FxHashSet::default(),
            iterations: vec![1; n],
            placement: vec![Placement::default(); n],
        }
    }

    /// Name of the source unit the blocks come from.
    #[must_use]
    pub fn unit(&self) -> &str {
        &self.unit
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    #[must_use]
    pub fn blocks(&self) -> &[BasicBlock] {
        &self.blocks
    }

    #[must_use]
    pub fn block(&self, id: BlockId) -> &BasicBlock {
        &self.blocks[id.index()]
    }

    pub fn block_mut(&mut self, id: BlockId) -> &mut BasicBlock {
        &mut self.blocks[id.index()]
    }

    /// All block ids in address order.
    pub fn ids(&self) -> impl Iterator<Item = BlockId> + use<> {
        (0..self.blocks.len()).map(BlockId::new)
    }

    #[must_use]
    pub fn successors(&self, id: BlockId) -> &[BlockId] {
        &self.blocks[id.index()].successors
    }

    /// Predecessor lists for every block.
    #[must_use]
    pub fn predecessors(&self) -> Vec<Vec<BlockId>> {
        let mut preds = vec![Vec::new(); self.blocks.len()];
        for id in self.ids() {
            for &succ in self.successors(id) {
                preds[succ.index()].push(id);
            }
        }
        preds
    }

    /// Designated entry blocks.
    #[must_use]
    pub fn starts(&self) -> &[BlockId] {
        &self.starts
    }

    pub fn set_starts(&mut self, starts: Vec<BlockId>) {
        self.starts = starts;
    }

    /// Block whose first instruction is at source `line`.
    #[must_use]
    pub fn block_at_line(&self, line: usize) -> Option<BlockId> {
        self.ids().find(|&id| self.block(id).line() == line)
    }

    /// Block starting with `label`.
    #[must_use]
    pub fn block_with_label(&self, label: &str) -> Option<BlockId> {
        self.ids().find(|&id| self.block(id).label() == Some(label))
    }

    #[must_use]
    pub fn loop_links(&self, id: BlockId) -> LoopLinks {
        self.loops[id.index()]
    }

    /// Estimated or profiled execution count.
    #[must_use]
    pub fn iterations(&self, id: BlockId) -> u64 {
        self.iterations[id.index()]
    }

    pub fn set_iterations(&mut self, id: BlockId, iterations: u64) {
        self.iterations[id.index()] = iterations;
    }

    #[must_use]
    pub fn placement(&self, id: BlockId) -> Placement {
        self.placement[id.index()]
    }

    pub fn set_placement(&mut self, id: BlockId, placement: Placement) {
        self.placement[id.index()] = placement;
    }

    /// Whether `id` is placed in RAM.
    #[must_use]
    pub fn in_ram(&self, id: BlockId) -> bool {
        self.placement[id.index()].in_ram
    }

    /// Block identifier used in the placement problem: `<unit>_<label>` for
    /// blocks that start with a label, `<unit>_<line>` otherwise.
    ///
    /// Characters of the unit name that are not valid in a MathProg symbol
    /// (such as path separators) become `_`.
    #[must_use]
    pub fn block_name(&self, id: BlockId) -> String {
        let unit: String = self
            .unit
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '_' | '.') { c } else { '_' })
            .collect();
        let block = self.block(id);
        match block.label() {
            Some(label) => format!("{unit}_{label}"),
            None => format!("{unit}_{}", block.line()),
        }
    }

    pub(crate) fn into_blocks(self) -> Vec<BasicBlock> {
        self.blocks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ovl_isa::{Instruction, THUMB2};

    #[test]
    fn test_block_names_are_mathprog_symbols() {
        let blocks = vec![
            BasicBlock::new(Instruction::label(&THUMB2, 0, 3, ".L2")),
            BasicBlock::new(Instruction::new(&THUMB2, 1, 7, "bx", "lr")),
        ];
        let cfg = ControlFlowGraph::new("src/app-1/main.s", blocks);
        assert_eq!(cfg.block_name(BlockId::new(0)), "src_app_1_main.s_.L2");
        assert_eq!(cfg.block_name(BlockId::new(1)), "src_app_1_main.s_7");
    }
}
