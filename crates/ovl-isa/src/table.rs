//! Instruction set classification tables.
//!
//! Every predicate on [`crate::Instruction`] is answered by looking the
//! operator up in one of these tables. Supporting another instruction set
//! means writing another table, not another instruction type.

/// Cycle cost classes for one encoding width.
#[derive(Debug)]
pub struct CycleClasses {
    /// Single-cycle operators.
    pub single: &'static [&'static str],
    /// Single-cycle operators that always refill the pipeline.
    pub flush: &'static [&'static str],
    /// Two-cycle operators (memory access, address generation).
    pub double: &'static [&'static str],
    /// Three-cycle operators (long multiplies).
    pub triple: &'static [&'static str],
    /// Multi-register transfers: one cycle plus one per register.
    pub multi: &'static [&'static str],
    /// Stack transfers: two cycles plus one per register.
    pub stack: &'static [&'static str],
    /// Hardware divides.
    pub divide: &'static [&'static str],
}

/// Classification table for one instruction set.
#[derive(Debug)]
pub struct InstructionSet {
    pub name: &'static str,
    /// Unconditional direct or register branches.
    pub unconditional_branches: &'static [&'static str],
    /// Branches predicated on a condition code.
    pub conditional_branches: &'static [&'static str],
    /// Compare-against-zero-and-branch forms.
    pub compare_branches: &'static [&'static str],
    /// Operator prefixes of multi-register loads that may pop into the PC.
    pub multi_load_prefixes: &'static [&'static str],
    /// Operators that redirect control when their destination is the PC.
    pub pc_writers: &'static [&'static str],
    /// Table branches (`tbb`/`tbh` with a `[pc, ...]` operand).
    pub table_branches: &'static [&'static str],
    /// Branch-and-link operators.
    pub calls: &'static [&'static str],
    pub loads: &'static [&'static str],
    pub stores: &'static [&'static str],
    pub nops: &'static [&'static str],
    pub data_words: &'static [&'static str],
    /// Operators that materialise a PC-relative address.
    pub address_generators: &'static [&'static str],
    /// Loads that may read a PC-relative literal (`ldr r0, .L5`).
    pub literal_loads: &'static [&'static str],
    /// Condition suffixes removed by [`InstructionSet::strip_condition`].
    pub condition_suffixes: &'static [&'static str],
    /// Register names; an operand naming one of these is not a label.
    pub registers: &'static [&'static str],
    /// Cycles for 2-byte encodings.
    pub narrow: CycleClasses,
    /// Cycles for 4-byte encodings.
    pub wide: CycleClasses,
    /// Extra cycles for refilling the pipeline after a PC write.
    pub flush_penalty: u32,
    /// Cycles for a hardware divide.
    pub divide_cycles: u32,
}

impl InstructionSet {
    /// Shortest mnemonic that may carry a strippable condition suffix.
    const MIN_CONDITIONED_LEN: usize = 5;

    /// Map a conditioned mnemonic to its base form (`ldrne` -> `ldr`).
    ///
    /// Mnemonics of four characters or fewer are returned unchanged, so
    /// base forms such as `bne` or `bls` are never mangled.
    #[must_use]
    pub fn strip_condition<'a>(&self, operator: &'a str) -> &'a str {
        if operator.len() < Self::MIN_CONDITIONED_LEN {
            return operator;
        }
        self.condition_suffixes
            .iter()
            .find(|suffix| operator.ends_with(*suffix))
            .map_or(operator, |suffix| &operator[..operator.len() - suffix.len()])
    }

    /// Whether `operand` names a register rather than a symbol.
    #[must_use]
    pub fn is_register(&self, operand: &str) -> bool {
        let operand = operand.trim();
        self.registers.contains(&operand)
    }
}

/// ARMv7-M Thumb-2 (Cortex-M3).
pub static THUMB2: InstructionSet = InstructionSet {
    name: "thumb2",
    unconditional_branches: &["b", "bx"],
    conditional_branches: &[
        "beq", "bne", "bcs", "bcc", "bhs", "blo", "bmi", "bpl", "bvs", "bvc", "bhi", "bls", "bge",
        "blt", "bgt", "ble",
    ],
    compare_branches: &["cbz", "cbnz"],
    multi_load_prefixes: &["pop", "ldmia"],
    pc_writers: &["mov", "ldr"],
    table_branches: &["tbb", "tbh"],
    calls: &["bl", "blx"],
    loads: &["ldr", "pop", "ldm", "ldmia"],
    stores: &["str", "push", "stm", "stmia"],
    nops: &["nop"],
    data_words: &[".word"],
    address_generators: &["adr"],
    literal_loads: &["ldr"],
    condition_suffixes: &[
        "gt", "le", "lt", "ne", "ge", "eq", "ls", "hi", "cc", "cs", "mi", "pl",
    ],
    registers: &[
        "r0", "r1", "r2", "r3", "r4", "r5", "r6", "r7", "r8", "r9", "r10", "r11", "r12", "r13",
        "r14", "r15", "sl", "fp", "ip", "sp", "lr", "pc",
    ],
    narrow: CycleClasses {
        single: &[
            "adc", "add", "and", "asr", "bic", "cmn", "cmp", "cpy", "eor", "lsl", "lsr", "mov",
            "mul", "mvn", "neg", "orr", "ror", "sbc", "sub", "tst", "rev", "revh", "revsh",
            "sxtb", "sxth", "uxtb", "uxth", "nop", "adds", "movs", "subs", "lsls", "asrs", "orrs",
            "lsrs", "eors", "mvns", "muls", "ands", "negs", "it", "ite", "itt", "ittt", "itttt",
        ],
        flush: &[
            "b", "bl", "bx", "blx", "beq", "bne", "ble", "bgt", "bge", "blt", "bcc", "bcs", "bmi",
            "bpl", "bvs", "bhi", "bls", "cbz", "cbnz",
        ],
        double: &[
            "ldr", "ldrb", "ldrh", "ldrsb", "ldrsh", "str", "strb", "strh", "adr",
        ],
        triple: &[],
        multi: &["ldmia", "stmia"],
        stack: &["push", "pop"],
        divide: &[],
    },
    wide: CycleClasses {
        single: &[
            "adcs", "adds", "cmn", "rsbs", "sbcs", "subs", "cmp", "ands", "tst", "bics", "eors",
            "teq", "orrs", "movs", "orns", "mvns", "adc", "add", "rsb", "sbc", "sub", "and", "bic",
            "eor", "orr", "mov", "orn", "mvn", "nop", "negs", "movw", "movt", "addw", "subw",
            "bfi", "bfc", "ubfx", "sbfx", "asrs", "lsls", "lsrs", "rors", "rrxs", "asr", "lsl",
            "lsr", "ror", "rrx", "rev", "revh", "revsh", "rbit", "clz", "sxtb", "sxth", "uxtb",
            "uxth", "mul", "mla", "mls",
        ],
        flush: &["bl", "b", "beq", "bne"],
        double: &[
            "ldr", "ldrb", "ldrsb", "ldrh", "ldrsh", "str", "strb", "strh", "ldrd", "strd", "adr",
        ],
        triple: &["umull", "smull", "umlal", "smlal"],
        multi: &["ldm", "stm", "stmia", "ldmia"],
        stack: &["push", "pop"],
        divide: &["sdiv", "udiv"],
    },
    flush_penalty: 2,
    divide_cycles: 6,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_condition() {
        assert_eq!(THUMB2.strip_condition("ldrne"), "ldr");
        assert_eq!(THUMB2.strip_condition("movgt"), "mov");
        assert_eq!(THUMB2.strip_condition("addeq"), "add");
    }

    #[test]
    fn test_strip_condition_keeps_short_mnemonics() {
        assert_eq!(THUMB2.strip_condition("bne"), "bne");
        assert_eq!(THUMB2.strip_condition("bls"), "bls");
        assert_eq!(THUMB2.strip_condition("subs"), "subs");
        assert_eq!(THUMB2.strip_condition("cbnz"), "cbnz");
    }

    #[test]
    fn test_is_register() {
        assert!(THUMB2.is_register("r3"));
        assert!(THUMB2.is_register(" lr"));
        assert!(!THUMB2.is_register(".L3"));
        assert!(!THUMB2.is_register("memcpy"));
    }
}
