//! Decoded assembler instruction and its control-flow predicates.

use std::fmt;

use crate::{InstructionSet, IsaError};

/// Resolved target of a control transfer.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Destination {
    /// Not a branch or call.
    NotApplicable,
    /// Computed at run time (register, pop into PC, table branch).
    Indirect,
    /// Symbolic target.
    Label(String),
}

impl Destination {
    /// Symbolic target, if any.
    #[must_use]
    pub fn label(&self) -> Option<&str> {
        match self {
            Self::Label(label) => Some(label),
            Self::NotApplicable | Self::Indirect => None,
        }
    }
}

/// Call reclassification applied by the CFG builder.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CallClass {
    /// Classified by operator only.
    #[default]
    Natural,
    /// A call instruction reused as an intra-routine jump.
    Suppressed,
    /// A plain branch that enters another routine (tail call).
    Forced,
}

/// One decoded line of a source unit: either a label or an instruction.
#[derive(Clone, Debug)]
pub struct Instruction {
    /// Sequence index within the source unit.
    pub address: usize,
    /// Zero-based line in the source unit text.
    pub line: usize,
    /// Label defined at this position (label entries have no operator).
    pub label: Option<String>,
    /// Lower-cased mnemonic.
    pub operator: String,
    /// Operand text.
    pub operands: String,
    /// The following instruction executes in this branch's delay slot.
    pub delay_slot: bool,
    isa: &'static InstructionSet,
    call_class: CallClass,
}

impl Instruction {
    /// Create an instruction.
    pub fn new(
        isa: &'static InstructionSet,
        address: usize,
        line: usize,
        operator: impl Into<String>,
        operands: impl Into<String>,
    ) -> Self {
        Self {
            address,
            line,
            label: None,
            operator: operator.into(),
            operands: operands.into(),
            delay_slot: false,
            isa,
            call_class: CallClass::Natural,
        }
    }

    /// Create a label entry.
    pub fn label(
        isa: &'static InstructionSet,
        address: usize,
        line: usize,
        name: impl Into<String>,
    ) -> Self {
        Self {
            label: Some(name.into()),
            ..Self::new(isa, address, line, "", "")
        }
    }

    /// Mark this branch as having a delay slot.
    #[must_use]
    pub const fn with_delay_slot(mut self) -> Self {
        self.delay_slot = true;
        self
    }

    /// Instruction set table this instruction is classified against.
    #[must_use]
    pub const fn isa(&self) -> &'static InstructionSet {
        self.isa
    }

    /// Whether this entry is a label rather than an instruction.
    #[must_use]
    pub fn is_label(&self) -> bool {
        self.label.is_some() && self.operator.is_empty()
    }

    /// Operator with any condition suffix removed.
    #[must_use]
    pub fn stripped_operator(&self) -> &str {
        self.isa.strip_condition(&self.operator)
    }

    #[must_use]
    pub const fn call_class(&self) -> CallClass {
        self.call_class
    }

    fn writes_pc_via_multi_load(&self) -> bool {
        self.isa
            .multi_load_prefixes
            .iter()
            .any(|prefix| self.operator.starts_with(prefix))
            && self.operands.contains("pc")
    }

    fn writes_pc_directly(&self) -> bool {
        self.isa.pc_writers.contains(&self.operator.as_str()) && self.operands.starts_with("pc")
    }

    fn is_table_branch(&self) -> bool {
        self.isa.table_branches.contains(&self.operator.as_str())
            && self.operands.get(1..3) == Some("pc")
    }

    fn is_natural_call(&self) -> bool {
        self.isa.calls.contains(&self.operator.as_str())
    }

    /// Whether this is a compare-against-zero-and-branch (`cbz`/`cbnz`).
    #[must_use]
    pub fn is_compare_branch(&self) -> bool {
        self.isa.compare_branches.contains(&self.operator.as_str())
    }

    /// Whether this instruction may transfer control somewhere other than
    /// the next instruction (calls excepted).
    #[must_use]
    pub fn is_branch(&self) -> bool {
        let op = self.operator.as_str();
        self.call_class == CallClass::Suppressed
            || self.isa.unconditional_branches.contains(&op)
            || self.isa.conditional_branches.contains(&op)
            || self.is_compare_branch()
            || self.writes_pc_via_multi_load()
            || self.writes_pc_directly()
            || self.is_table_branch()
    }

    /// Whether this branch never falls through.
    #[must_use]
    pub fn is_unconditional(&self) -> bool {
        if !self.is_branch() {
            return false;
        }
        self.call_class == CallClass::Suppressed
            || self
                .isa
                .unconditional_branches
                .contains(&self.operator.as_str())
            || self.writes_pc_via_multi_load()
            || self.writes_pc_directly()
            || self.is_table_branch()
    }

    /// Whether this is a call (branch-and-link) that was not reclassified
    /// as a local jump.
    #[must_use]
    pub fn is_call(&self) -> bool {
        self.is_natural_call() && self.call_class != CallClass::Suppressed
    }

    /// Whether this plain branch was reclassified as a call into another
    /// routine.
    #[must_use]
    pub fn is_forced_call(&self) -> bool {
        self.call_class == CallClass::Forced
    }

    /// Whether this instruction enters another routine, either as a call
    /// or as a branch reclassified as one.
    #[must_use]
    pub fn enters_routine(&self) -> bool {
        self.is_call() || self.is_forced_call()
    }

    #[must_use]
    pub fn is_load(&self) -> bool {
        self.isa.loads.contains(&self.operator.as_str())
    }

    #[must_use]
    pub fn is_store(&self) -> bool {
        self.isa.stores.contains(&self.operator.as_str())
    }

    #[must_use]
    pub fn is_nop(&self) -> bool {
        self.isa.nops.contains(&self.operator.as_str())
    }

    #[must_use]
    pub fn is_data_word(&self) -> bool {
        self.isa.data_words.contains(&self.operator.as_str())
    }

    /// Whether this instruction materialises a PC-relative address (`adr`).
    #[must_use]
    pub fn is_address_generator(&self) -> bool {
        self.isa
            .address_generators
            .contains(&self.stripped_operator())
    }

    /// Resolved target of this branch or call.
    #[must_use]
    pub fn destination(&self) -> Destination {
        if !self.is_branch() && !self.is_natural_call() {
            return Destination::NotApplicable;
        }

        if self.is_compare_branch() {
            return self
                .operands
                .split(',')
                .nth(1)
                .map(str::trim)
                .filter(|target| !target.is_empty())
                .map_or(Destination::Indirect, |target| {
                    Destination::Label(target.to_string())
                });
        }

        let target = self.operands.trim();
        if target.is_empty()
            || self.writes_pc_via_multi_load()
            || self.writes_pc_directly()
            || self.is_table_branch()
            || self.isa.pc_writers.contains(&self.operator.as_str())
            || self.isa.is_register(target)
        {
            return Destination::Indirect;
        }

        Destination::Label(target.to_string())
    }

    /// Reclassify this call as an intra-routine jump.
    ///
    /// # Errors
    ///
    /// Returns an error if the instruction was already marked as a call.
    pub fn suppress_call(&mut self) -> Result<(), IsaError> {
        match self.call_class {
            CallClass::Forced => Err(IsaError::AlreadyForcedCall {
                line: self.line,
                insn: self.to_string(),
            }),
            CallClass::Natural | CallClass::Suppressed => {
                self.call_class = CallClass::Suppressed;
                Ok(())
            }
        }
    }

    /// Reclassify this branch as a call into another routine.
    ///
    /// # Errors
    ///
    /// Returns an error if the instruction was already marked as a jump.
    pub fn force_call(&mut self) -> Result<(), IsaError> {
        match self.call_class {
            CallClass::Suppressed => Err(IsaError::AlreadySuppressedCall {
                line: self.line,
                insn: self.to_string(),
            }),
            CallClass::Natural | CallClass::Forced => {
                self.call_class = CallClass::Forced;
                Ok(())
            }
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(label) = self.label.as_deref().filter(|_| self.operator.is_empty()) {
            return write!(f, "{label}:");
        }
        let marker = if self.call_class == CallClass::Suppressed {
            "* "
        } else {
            ""
        };
        if self.operands.is_empty() {
            write!(f, "    {marker}{}", self.operator)
        } else {
            write!(f, "    {marker}{} {}", self.operator, self.operands)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::THUMB2;

    fn insn(operator: &str, operands: &str) -> Instruction {
        Instruction::new(&THUMB2, 0, 0, operator, operands)
    }

    #[test]
    fn test_conditional_branch() {
        let i = insn("bne", ".L2");
        assert!(i.is_branch());
        assert!(!i.is_unconditional());
        assert!(!i.is_call());
        assert_eq!(i.destination(), Destination::Label(".L2".into()));
    }

    #[test]
    fn test_unconditional_branch() {
        let i = insn("b", ".L3");
        assert!(i.is_branch());
        assert!(i.is_unconditional());
        assert_eq!(i.destination(), Destination::Label(".L3".into()));
    }

    #[test]
    fn test_return_forms_are_indirect() {
        for (op, operands) in [
            ("bx", "lr"),
            ("pop", "{r4, r5, pc}"),
            ("ldmia", "sp!, {r4, pc}"),
            ("mov", "pc, lr"),
            ("ldr", "pc, [sp], #4"),
            ("tbh", "[pc, r3, lsl #1]"),
        ] {
            let i = insn(op, operands);
            assert!(i.is_branch(), "{op} {operands}");
            assert!(i.is_unconditional(), "{op} {operands}");
            assert_eq!(i.destination(), Destination::Indirect, "{op} {operands}");
        }
    }

    #[test]
    fn test_pop_without_pc_is_not_a_branch() {
        let i = insn("pop", "{r4, r5}");
        assert!(!i.is_branch());
        assert!(i.is_load());
        assert_eq!(i.destination(), Destination::NotApplicable);
    }

    #[test]
    fn test_compare_branch_destination() {
        let i = insn("cbz", "r0, .L7");
        assert!(i.is_branch());
        assert!(i.is_compare_branch());
        assert!(!i.is_unconditional());
        assert_eq!(i.destination(), Destination::Label(".L7".into()));
    }

    #[test]
    fn test_calls() {
        let direct = insn("bl", "memcpy");
        assert!(direct.is_call());
        assert!(!direct.is_branch());
        assert_eq!(direct.destination(), Destination::Label("memcpy".into()));

        let indirect = insn("blx", "r3");
        assert!(indirect.is_call());
        assert_eq!(indirect.destination(), Destination::Indirect);
    }

    #[test]
    fn test_non_control_instruction() {
        let i = insn("add", "r0, r0, #1");
        assert!(!i.is_branch());
        assert!(!i.is_call());
        assert_eq!(i.destination(), Destination::NotApplicable);
    }

    #[test]
    fn test_suppress_call_becomes_unconditional_jump() {
        let mut i = insn("bl", ".L9");
        i.suppress_call().unwrap();
        i.suppress_call().unwrap();
        assert!(!i.is_call());
        assert!(i.is_branch());
        assert!(i.is_unconditional());
        assert_eq!(i.destination(), Destination::Label(".L9".into()));
        assert!(i.force_call().is_err());
    }

    #[test]
    fn test_force_call() {
        let mut i = insn("b", "helper");
        i.force_call().unwrap();
        assert!(i.is_forced_call());
        assert!(i.enters_routine());
        assert!(!i.is_call());
        assert!(i.suppress_call().is_err());
    }

    #[test]
    fn test_memory_predicates() {
        assert!(insn("ldr", "r0, [r1]").is_load());
        assert!(insn("push", "{r4, lr}").is_store());
        assert!(insn("nop", "").is_nop());
        assert!(insn(".word", "0x1234").is_data_word());
        assert!(insn("adr", "r0, .L4").is_address_generator());
    }

    #[test]
    fn test_display() {
        assert_eq!(Instruction::label(&THUMB2, 0, 0, "main").to_string(), "main:");
        assert_eq!(insn("cmp", "r0, #0").to_string(), "    cmp r0, #0");
    }
}
