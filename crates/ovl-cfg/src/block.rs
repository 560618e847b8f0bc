//! Basic blocks.

use std::fmt;

use ovl_isa::{Cost, CostError, Instruction, SizeOracle};

/// Index of a block within its [`crate::ControlFlowGraph`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockId(usize);

impl BlockId {
    #[must_use]
    pub const fn new(index: usize) -> Self {
        Self(index)
    }

    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bb{}", self.0)
    }
}

/// Straight-line run of instructions with a single entry.
///
/// Only the tail instruction (or the branch before a delay-slot
/// instruction) transfers control. Successors are listed fallthrough first.
#[derive(Clone, Debug)]
pub struct BasicBlock {
    instructions: Vec<Instruction>,
    pub successors: Vec<BlockId>,
}

impl BasicBlock {
    /// Create a block starting with `first`.
    #[must_use]
    pub fn new(first: Instruction) -> Self {
        Self {
            instructions: vec![first],
            successors: Vec::new(),
        }
    }

    pub fn push(&mut self, insn: Instruction) {
        self.instructions.push(insn);
    }

    #[must_use]
    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    /// Address of the first instruction.
    #[must_use]
    pub fn address(&self) -> usize {
        self.first().address
    }

    #[must_use]
    pub fn first(&self) -> &Instruction {
        &self.instructions[0]
    }

    /// Source line of the first instruction.
    #[must_use]
    pub fn line(&self) -> usize {
        self.first().line
    }

    /// Label of the block if it starts with a label entry.
    #[must_use]
    pub fn label(&self) -> Option<&str> {
        let first = self.first();
        if first.is_label() {
            first.label.as_deref()
        } else {
            None
        }
    }

    /// Position of the instruction that decides where control goes next.
    ///
    /// This is the last instruction unless the block ends in a branch
    /// followed by its delay-slot instruction.
    #[must_use]
    pub fn tail_index(&self) -> usize {
        let last = self.instructions.len() - 1;
        if self.instructions[last].is_branch() {
            return last;
        }
        if last >= 1 {
            let prev = &self.instructions[last - 1];
            if prev.is_branch() && prev.delay_slot {
                return last - 1;
            }
        }
        last
    }

    #[must_use]
    pub fn tail(&self) -> &Instruction {
        &self.instructions[self.tail_index()]
    }

    pub fn tail_mut(&mut self) -> &mut Instruction {
        let index = self.tail_index();
        &mut self.instructions[index]
    }

    /// Whether `label` is defined inside this block.
    #[must_use]
    pub fn contains_label(&self, label: &str) -> bool {
        self.instructions
            .iter()
            .any(|insn| insn.is_label() && insn.label.as_deref() == Some(label))
    }

    /// Instructions that enter another routine, including branches
    /// reclassified as calls.
    pub fn calls(&self) -> impl Iterator<Item = &Instruction> {
        self.instructions
            .iter()
            .filter(|insn| insn.enters_routine())
    }

    /// Number of call instructions in this block.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls().count()
    }

    /// Number of load and store instructions.
    #[must_use]
    pub fn memory_access_count(&self) -> usize {
        self.instructions
            .iter()
            .filter(|insn| insn.is_load() || insn.is_store())
            .count()
    }

    /// Total size and cycle cost of the block.
    ///
    /// # Errors
    ///
    /// Fails on the first instruction whose cost is unknown.
    pub fn cost(&self, oracle: &mut dyn SizeOracle) -> Result<Cost, CostError> {
        let mut total = Cost::default();
        for insn in &self.instructions {
            total += insn.cost(oracle)?;
        }
        Ok(total)
    }

    /// Encoded size of the block in bytes.
    ///
    /// # Errors
    ///
    /// Propagates oracle failures.
    pub fn size(&self, oracle: &mut dyn SizeOracle) -> Result<u32, CostError> {
        let mut total = 0;
        for insn in &self.instructions {
            total += insn.size(oracle)?;
        }
        Ok(total)
    }
}

impl fmt::Display for BasicBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}", self.address())?;
        for insn in &self.instructions {
            write!(f, "\n{insn}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ovl_isa::{OracleError, THUMB2};

    fn insn(address: usize, operator: &str, operands: &str) -> Instruction {
        Instruction::new(&THUMB2, address, address, operator, operands)
    }

    fn block(insns: Vec<Instruction>) -> BasicBlock {
        let mut iter = insns.into_iter();
        let mut bb = BasicBlock::new(iter.next().unwrap());
        for insn in iter {
            bb.push(insn);
        }
        bb
    }

    #[test]
    fn test_tail_is_last_instruction() {
        let bb = block(vec![insn(0, "cmp", "r0, #0"), insn(1, "bne", ".L2")]);
        assert_eq!(bb.tail_index(), 1);
        assert_eq!(bb.tail().operator, "bne");
    }

    #[test]
    fn test_tail_skips_delay_slot() {
        let bb = block(vec![
            insn(0, "cmp", "r0, #0"),
            insn(1, "b", ".L2").with_delay_slot(),
            insn(2, "mov", "r1, #0"),
        ]);
        assert_eq!(bb.tail_index(), 1);
    }

    #[test]
    fn test_label_and_line() {
        let bb = block(vec![
            Instruction::label(&THUMB2, 4, 10, ".L4"),
            insn(5, "adds", "r0, r0, #1"),
        ]);
        assert_eq!(bb.label(), Some(".L4"));
        assert_eq!(bb.line(), 10);
        assert_eq!(bb.address(), 4);
        assert!(bb.contains_label(".L4"));
        assert!(!bb.contains_label(".L5"));
    }

    #[test]
    fn test_calls_and_memory_accesses() {
        let bb = block(vec![
            insn(0, "ldr", "r0, [r1]"),
            insn(1, "bl", "memcpy"),
            insn(2, "str", "r0, [r2]"),
            insn(3, "bl", "memset"),
        ]);
        assert_eq!(bb.call_count(), 2);
        assert_eq!(bb.memory_access_count(), 2);
    }

    #[test]
    fn test_block_cost_is_sum_of_instructions() {
        let bb = block(vec![
            Instruction::label(&THUMB2, 0, 0, "f"),
            insn(1, "cmp", "r0, #0"),
            insn(2, "ldr", "r0, [r1]"),
            insn(3, "bne", ".L2"),
        ]);
        let mut oracle = |_: &str, _: Option<&str>| -> Result<u32, OracleError> { Ok(2) };
        let expected: Cost = bb
            .instructions()
            .iter()
            .map(|i| i.cost(&mut oracle).unwrap())
            .sum();
        assert_eq!(bb.cost(&mut oracle).unwrap(), expected);
        assert_eq!(expected, Cost::new(6, 6));
        assert_eq!(bb.size(&mut oracle).unwrap(), 6);
    }
}
