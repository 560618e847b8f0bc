//! Static size and cycle costs of single instructions.

use std::iter::Sum;
use std::ops::{Add, AddAssign};

use crate::{CostError, Instruction, OracleError};

/// Encoded-size lookup for one assembler instruction.
///
/// `insn` is the condition-stripped mnemonic plus operands. `target` is the
/// label a branch or literal load refers to, so range-dependent encodings
/// can be sized. Implementations are expected to memoize by `insn`.
pub trait SizeOracle {
    /// Encoded length of `insn` in bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the instruction cannot be encoded.
    fn size(&mut self, insn: &str, target: Option<&str>) -> Result<u32, OracleError>;
}

impl<F> SizeOracle for F
where
    F: FnMut(&str, Option<&str>) -> Result<u32, OracleError>,
{
    fn size(&mut self, insn: &str, target: Option<&str>) -> Result<u32, OracleError> {
        self(insn, target)
    }
}

/// Text and branch target submitted to a [`SizeOracle`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SizeQuery {
    pub text: String,
    pub target: Option<String>,
}

/// Byte size and cycle count.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Cost {
    pub size: u32,
    pub cycles: u32,
}

impl Cost {
    #[must_use]
    pub const fn new(size: u32, cycles: u32) -> Self {
        Self { size, cycles }
    }
}

impl Add for Cost {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self {
            size: self.size + rhs.size,
            cycles: self.cycles + rhs.cycles,
        }
    }
}

impl AddAssign for Cost {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl Sum for Cost {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::default(), Add::add)
    }
}

/// Strip a `+`/`-` offset from a literal reference (`.LC0+4` -> `.LC0`).
fn trim_offset(symbol: &str) -> &str {
    let symbol = symbol.trim();
    let end = symbol.find(['+', '-']).unwrap_or(symbol.len());
    symbol[..end].trim()
}

/// Registers named in a `{...}` list; a range such as `r4-r7` counts each
/// register in it.
fn register_list_len(operands: &str) -> u32 {
    let Some((_, list)) = operands.split_once('{') else {
        return 0;
    };
    let list = list.split('}').next().unwrap_or_default();
    list.split(',')
        .map(str::trim)
        .filter(|reg| !reg.is_empty())
        .map(|reg| {
            reg.split_once('-')
                .and_then(|(low, high)| {
                    let index = |r: &str| r.trim().strip_prefix('r')?.parse::<u32>().ok();
                    Some(index(high)?.checked_sub(index(low)?)? + 1)
                })
                .unwrap_or(1)
        })
        .sum()
}

impl Instruction {
    /// Oracle query for this instruction; `None` for label entries.
    #[must_use]
    pub fn size_query(&self) -> Option<SizeQuery> {
        if self.operator.is_empty() {
            return None;
        }

        let op = self.stripped_operator();
        let text = if self.operands.is_empty() {
            op.to_string()
        } else {
            format!("{op} {}", self.operands)
        };

        let mut target = if self.is_branch() {
            self.destination().label().map(str::to_string)
        } else {
            None
        };

        let isa = self.isa();
        let literal_form = isa.literal_loads.contains(&op) || isa.address_generators.contains(&op);
        if literal_form && !self.operands.contains('[') && !self.operands.contains('=') {
            target = self
                .operands
                .split(',')
                .nth(1)
                .map(trim_offset)
                .filter(|symbol| !symbol.is_empty())
                .map(str::to_string);
        }

        Some(SizeQuery { text, target })
    }

    /// Encoded size in bytes. Label entries occupy no space.
    ///
    /// # Errors
    ///
    /// Propagates oracle failures.
    pub fn size(&self, oracle: &mut dyn SizeOracle) -> Result<u32, CostError> {
        match self.size_query() {
            Some(query) => Ok(oracle.size(&query.text, query.target.as_deref())?),
            None => Ok(0),
        }
    }

    /// Cycle count of this instruction given its encoded size.
    ///
    /// # Errors
    ///
    /// Returns [`CostError::UnknownCycles`] if the operator does not appear
    /// in any cycle class for its encoding width.
    pub fn cycles(&self, size: u32) -> Result<u32, CostError> {
        if size == 0 || self.is_data_word() {
            return Ok(0);
        }

        let isa = self.isa();
        let classes = match size {
            2 => &isa.narrow,
            4 => &isa.wide,
            _ => return Err(self.unknown_cycles(size)),
        };

        let op = self.stripped_operator();
        let registers = register_list_len(&self.operands);

        let (base, mut flush) = if classes.single.contains(&op) {
            (1, false)
        } else if classes.flush.contains(&op) {
            (1, true)
        } else if classes.double.contains(&op) {
            (2, false)
        } else if classes.triple.contains(&op) {
            (3, false)
        } else if classes.multi.contains(&op) {
            (registers.saturating_add(1), false)
        } else if classes.stack.contains(&op) {
            (registers.saturating_add(2), false)
        } else if classes.divide.contains(&op) {
            (isa.divide_cycles, false)
        } else {
            return Err(self.unknown_cycles(size));
        };

        // Any write to the PC refills the pipeline.
        flush |= self.is_branch();

        Ok(if flush {
            base.saturating_add(isa.flush_penalty)
        } else {
            base
        })
    }

    /// Size and cycle cost of this instruction.
    ///
    /// # Errors
    ///
    /// Propagates oracle failures and unknown cycle counts.
    pub fn cost(&self, oracle: &mut dyn SizeOracle) -> Result<Cost, CostError> {
        let size = self.size(oracle)?;
        let cycles = self.cycles(size)?;
        Ok(Cost::new(size, cycles))
    }

    fn unknown_cycles(&self, size: u32) -> CostError {
        CostError::UnknownCycles {
            operator: self.operator.clone(),
            size,
            line: self.line,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::THUMB2;

    fn insn(operator: &str, operands: &str) -> Instruction {
        Instruction::new(&THUMB2, 0, 7, operator, operands)
    }

    fn narrow(_insn: &str, _target: Option<&str>) -> Result<u32, OracleError> {
        Ok(2)
    }

    #[test]
    fn test_size_query_strips_condition() {
        let q = insn("movne", "r0, #1").size_query().unwrap();
        assert_eq!(q.text, "mov r0, #1");
        assert_eq!(q.target, None);
    }

    #[test]
    fn test_size_query_branch_target() {
        let q = insn("bne", ".L4").size_query().unwrap();
        assert_eq!(q.text, "bne .L4");
        assert_eq!(q.target.as_deref(), Some(".L4"));

        let q = insn("bx", "lr").size_query().unwrap();
        assert_eq!(q.target, None);
    }

    #[test]
    fn test_size_query_literal_load_target() {
        let q = insn("ldr", "r3, .LC0+4").size_query().unwrap();
        assert_eq!(q.target.as_deref(), Some(".LC0"));

        let q = insn("adr", "r0, .L8-2").size_query().unwrap();
        assert_eq!(q.target.as_deref(), Some(".L8"));

        assert_eq!(insn("ldr", "r3, [r2, #4]").size_query().unwrap().target, None);
        assert_eq!(insn("ldr", "r3, =.LC0").size_query().unwrap().target, None);
    }

    #[test]
    fn test_label_costs_nothing() {
        let label = Instruction::label(&THUMB2, 0, 0, ".L2");
        assert!(label.size_query().is_none());
        let mut oracle = |_: &str, _: Option<&str>| -> Result<u32, OracleError> {
            panic!("labels must not reach the oracle")
        };
        assert_eq!(label.cost(&mut oracle).unwrap(), Cost::default());
    }

    #[test]
    fn test_cycle_classes() {
        assert_eq!(insn("adds", "r0, r0, #1").cycles(2).unwrap(), 1);
        assert_eq!(insn("ldr", "r0, [r1]").cycles(2).unwrap(), 2);
        assert_eq!(insn("bne", ".L2").cycles(2).unwrap(), 3);
        assert_eq!(insn("bl", "foo").cycles(4).unwrap(), 3);
        assert_eq!(insn("umull", "r0, r1, r2, r3").cycles(4).unwrap(), 3);
        assert_eq!(insn("sdiv", "r0, r1, r2").cycles(4).unwrap(), 6);
    }

    #[test]
    fn test_multi_register_cycles() {
        assert_eq!(insn("push", "{r4, r5, lr}").cycles(2).unwrap(), 5);
        assert_eq!(insn("ldmia", "r0!, {r1, r2}").cycles(2).unwrap(), 3);
        assert_eq!(insn("stmia", "r0!, {r1-r3, r7}").cycles(2).unwrap(), 5);
        assert_eq!(insn("push", "{r4-r7, lr}").cycles(2).unwrap(), 7);
        // Popping into the PC refills the pipeline.
        assert_eq!(insn("pop", "{r4, pc}").cycles(2).unwrap(), 6);
    }

    #[test]
    fn test_conditioned_operator_uses_base_class() {
        assert_eq!(insn("ldrne", "r0, [r1]").cycles(4).unwrap(), 2);
    }

    #[test]
    fn test_unknown_cycles_is_an_error() {
        let err = insn("vadd.f32", "s0, s1, s2").cycles(4).unwrap_err();
        assert!(matches!(
            err,
            CostError::UnknownCycles { size: 4, line: 7, .. }
        ));
        assert!(insn("sdiv", "r0, r1, r2").cycles(2).is_err());
        assert!(insn("add", "r0, r1").cycles(6).is_err());
    }

    #[test]
    fn test_cost_sums() {
        let insns = [insn("cmp", "r0, #0"), insn("bne", ".L2")];
        let total: Cost = insns
            .iter()
            .map(|i| i.cost(&mut narrow).unwrap())
            .sum();
        assert_eq!(total, Cost::new(4, 4));
    }
}
