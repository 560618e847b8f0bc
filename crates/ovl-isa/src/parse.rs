//! Reader for compiler-generated GNU assembler source.

use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, warn};

use crate::{Destination, Instruction, InstructionSet};

static INSTRUCTION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([a-zA-Z0-9.]+)\s*([^;]*)").expect("valid regex"));
static FUNCTION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*\.type\s+([^,]+),\s*%function").expect("valid regex"));

/// Directives that only carry debug or size metadata. They are blanked in
/// the re-emitted text because moved blocks invalidate them.
const DROPPED_DIRECTIVES: &[&str] = &[".cfi", ".size", ".loc"];

/// One assembler source file: its text and decoded instructions.
#[derive(Clone, Debug)]
pub struct SourceUnit {
    /// Unit name used in block identifiers and breakpoint markers.
    pub name: String,
    /// Source lines, with dropped directives blanked.
    pub lines: Vec<String>,
    /// Decoded labels and instructions in source order.
    pub instructions: Vec<Instruction>,
    /// Labels declared with `.type <name>, %function`.
    pub functions: Vec<String>,
}

/// Classification of one source line.
enum Line {
    Label(String),
    Instruction { operator: String, operands: String },
    Ignored,
}

fn classify(line: &str, lineno: usize) -> Line {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Line::Ignored;
    }

    let parts: Vec<&str> = line.split(':').collect();
    let head = parts[0].trim();
    if parts.len() == 2 && !head.contains([' ', '\t']) {
        if !parts[1].trim().is_empty() {
            warn!(line = lineno, text = trimmed, "text after label ignored");
        }
        return Line::Label(head.to_string());
    }

    if trimmed.starts_with(['.', '@']) {
        return Line::Ignored;
    }

    let Some(caps) = INSTRUCTION_RE.captures(trimmed) else {
        warn!(line = lineno, text = trimmed, "unmatched assembler line");
        return Line::Ignored;
    };
    // Trailing `@` comments are not part of the operands.
    let operands = caps[2].split('@').next().unwrap_or_default();
    Line::Instruction {
        operator: caps[1].to_lowercase(),
        operands: operands.trim().to_string(),
    }
}

impl SourceUnit {
    /// Parse assembler text.
    pub fn parse(name: impl Into<String>, text: &str, isa: &'static InstructionSet) -> Self {
        let name = name.into();
        let mut lines: Vec<String> = text.lines().map(str::to_string).collect();
        let mut instructions = Vec::new();
        let mut functions = Vec::new();

        for (lineno, line) in lines.iter_mut().enumerate() {
            let address = instructions.len();
            match classify(line, lineno) {
                Line::Label(label) => {
                    instructions.push(Instruction::label(isa, address, lineno, label));
                }
                Line::Instruction { operator, operands } => {
                    instructions.push(Instruction::new(isa, address, lineno, operator, operands));
                }
                Line::Ignored => {}
            }

            if line.contains("%function") {
                match FUNCTION_RE.captures(line) {
                    Some(caps) => functions.push(caps[1].trim().to_string()),
                    None => warn!(line = lineno, text = line.trim(), "malformed %function directive"),
                }
            }

            if DROPPED_DIRECTIVES.iter().any(|d| line.contains(d)) {
                line.clear();
            }
        }

        debug!(
            unit = %name,
            instructions = instructions.len(),
            functions = functions.len(),
            "parsed source unit"
        );

        Self {
            name,
            lines,
            instructions,
            functions,
        }
    }

    /// Read and parse an assembler file. The unit is named by its path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read.
    pub fn load(path: &Path, isa: &'static InstructionSet) -> std::io::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(Self::parse(path.display().to_string(), &text, isa))
    }

    /// Direct call targets in this unit, in source order.
    pub fn call_targets(&self) -> impl Iterator<Item = String> + '_ {
        self.instructions
            .iter()
            .filter(|insn| insn.is_call())
            .filter_map(|insn| match insn.destination() {
                Destination::Label(label) => Some(label),
                Destination::NotApplicable | Destination::Indirect => None,
            })
    }

    /// Routine entry labels: declared functions followed by call targets.
    #[must_use]
    pub fn routine_labels(&self) -> Vec<String> {
        self.functions
            .iter()
            .cloned()
            .chain(self.call_targets())
            .collect()
    }

    /// Instruction entry defining `label`, if any.
    #[must_use]
    pub fn find_label(&self, label: &str) -> Option<&Instruction> {
        self.instructions
            .iter()
            .find(|insn| insn.label.as_deref() == Some(label))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::THUMB2;

    const SOURCE: &str = "\
\t.syntax unified
\t.text
\t.align\t2
\t.global\tf
\t.type\tf, %function
f:
\t.cfi_startproc
\t@ args = 0, pretend = 0
\tcmp\tr0, #0
\tbne\t.L2
\tbl\tg
.L2:
\tbx\tlr
\t.size\tf, .-f
";

    #[test]
    fn test_parse_labels_and_instructions() {
        let unit = SourceUnit::parse("a.s", SOURCE, &THUMB2);
        let text: Vec<String> = unit.instructions.iter().map(ToString::to_string).collect();
        assert_eq!(
            text,
            vec![
                "f:",
                "    cmp r0, #0",
                "    bne .L2",
                "    bl g",
                ".L2:",
                "    bx lr",
            ]
        );
        assert_eq!(unit.functions, vec!["f"]);
        for (i, insn) in unit.instructions.iter().enumerate() {
            assert_eq!(insn.address, i);
        }
        assert_eq!(unit.instructions[0].line, 5);
    }

    #[test]
    fn test_dropped_directives_are_blanked() {
        let unit = SourceUnit::parse("a.s", SOURCE, &THUMB2);
        assert_eq!(unit.lines.len(), SOURCE.lines().count());
        assert!(unit.lines[6].is_empty());
        assert!(unit.lines[13].is_empty());
        assert_eq!(unit.lines[8], "\tcmp\tr0, #0");
    }

    #[test]
    fn test_routine_labels() {
        let unit = SourceUnit::parse("a.s", SOURCE, &THUMB2);
        assert_eq!(unit.routine_labels(), vec!["f", "g"]);
        assert_eq!(unit.find_label(".L2").map(|i| i.address), Some(4));
    }

    #[test]
    fn test_multi_colon_line_is_an_instruction() {
        let unit = SourceUnit::parse("a.s", "\tmovw\tr3, #:lower16:.LC0\n", &THUMB2);
        assert_eq!(unit.instructions.len(), 1);
        assert_eq!(unit.instructions[0].operator, "movw");
        assert_eq!(unit.instructions[0].operands, "r3, #:lower16:.LC0");
    }
}
