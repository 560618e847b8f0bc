//! Size oracle backed by the GNU ARM assembler.

use std::process::{Command, Stdio};
use std::sync::LazyLock;

use ovl_isa::{OracleError, SizeOracle};
use regex::Regex;
use tracing::{error, trace, trace_span};

/// Toolchain prefix used when none is configured.
pub const DEFAULT_TOOLCHAIN_PREFIX: &str = "arm-none-eabi-";

/// Target CPU used when none is configured.
pub const DEFAULT_CPU: &str = "cortex-m3";

static OBJDUMP_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*[0-9a-f]+:\s*([0-9a-f ]+)").expect("valid regex"));

/// Find an ARM GCC toolchain prefix on `PATH`.
#[must_use]
pub fn find_toolchain() -> Option<String> {
    const PREFIXES: &[&str] = &["arm-none-eabi-", "arm-linux-gnueabihf-", "arm-linux-gnueabi-"];

    PREFIXES
        .iter()
        .find(|prefix| {
            Command::new("which")
                .arg(format!("{prefix}gcc"))
                .output()
                .is_ok_and(|o| o.status.success())
        })
        .map(|prefix| (*prefix).to_string())
}

/// Encoded size of the first instruction in an `objdump -d` listing.
#[must_use]
pub fn parse_objdump_size(listing: &str) -> Option<u32> {
    listing.lines().find_map(|line| {
        let caps = OBJDUMP_RE.captures(line)?;
        let digits = caps[1].chars().filter(|c| !c.is_whitespace()).count();
        u32::try_from(digits / 2).ok().filter(|&size| size > 0)
    })
}

/// Assembles each queried instruction in isolation and measures the object
/// code.
///
/// A queried branch target is defined a few `nop`s after the instruction so
/// the assembler picks the encoding it would use for a short forward
/// reference.
#[derive(Clone, Debug)]
pub struct AssemblerOracle {
    prefix: String,
    cpu: String,
}

impl Default for AssemblerOracle {
    fn default() -> Self {
        Self::new(DEFAULT_TOOLCHAIN_PREFIX)
    }
}

impl AssemblerOracle {
    #[must_use]
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            cpu: DEFAULT_CPU.to_string(),
        }
    }

    #[must_use]
    pub fn with_cpu(mut self, cpu: impl Into<String>) -> Self {
        self.cpu = cpu.into();
        self
    }

    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Assembler source submitted for `insn`.
    #[must_use]
    pub fn source(&self, insn: &str, target: Option<&str>) -> String {
        let mut source = format!(
            "\t.syntax unified\n\
             \t.cpu {cpu}\n\
             \t.fpu softvfp\n\
             \t.eabi_attribute 20, 1\n\
             \t.eabi_attribute 21, 1\n\
             \t.eabi_attribute 23, 3\n\
             \t.eabi_attribute 24, 1\n\
             \t.eabi_attribute 25, 1\n\
             \t.eabi_attribute 26, 1\n\
             \t.eabi_attribute 30, 6\n\
             \t.eabi_attribute 34, 1\n\
             \t.eabi_attribute 18, 4\n\
             \t.thumb\n\
             \n\
             {insn}\n",
            cpu = self.cpu
        );
        if let Some(target) = target {
            source.push_str("nop\nnop\nnop\nnop\n");
            source.push_str(target);
            source.push_str(":\n");
        }
        source
    }

    fn run(&self, tool: &str, configure: impl FnOnce(&mut Command)) -> Result<String, String> {
        let program = format!("{}{tool}", self.prefix);
        let mut cmd = Command::new(&program);
        configure(&mut cmd);
        let output = cmd
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .map_err(|e| format!("failed to run {program}: {e}"))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            error!(stderr = %stderr, "{program} failed");
            return Err(stderr.trim().to_string());
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl SizeOracle for AssemblerOracle {
    fn size(&mut self, insn: &str, target: Option<&str>) -> Result<u32, OracleError> {
        let _span = trace_span!("assemble_insn").entered();
        let fail = |reason: String| OracleError::new(insn, reason);

        let dir = tempfile::tempdir().map_err(|e| fail(e.to_string()))?;
        let asm_path = dir.path().join("insn.s");
        let obj_path = dir.path().join("insn.o");
        std::fs::write(&asm_path, self.source(insn, target)).map_err(|e| fail(e.to_string()))?;

        self.run("gcc", |cmd| {
            cmd.args(["-c", "-mthumb"])
                .arg(format!("-mcpu={}", self.cpu))
                .args(["-x", "assembler"])
                .arg("-o")
                .arg(&obj_path)
                .arg(&asm_path);
        })
        .map_err(&fail)?;

        let listing = self
            .run("objdump", |cmd| {
                cmd.arg("-d").arg(&obj_path);
            })
            .map_err(&fail)?;

        let size = parse_objdump_size(&listing)
            .ok_or_else(|| fail("no instruction in object code".to_string()))?;
        trace!(insn, size, "assembled");
        Ok(size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LISTING: &str = "
insn.o:     file format elf32-littlearm


Disassembly of section .text:

00000000 <.text>:
   0:\tf240 0300 \tmovw\tr3, #0
   4:\tbf00      \tnop
";

    #[test]
    fn test_parse_objdump_wide() {
        assert_eq!(parse_objdump_size(LISTING), Some(4));
    }

    #[test]
    fn test_parse_objdump_narrow() {
        assert_eq!(parse_objdump_size("   0:\t3001      \tadds\tr0, #1\n"), Some(2));
    }

    #[test]
    fn test_parse_objdump_empty() {
        assert_eq!(parse_objdump_size("insn.o:     file format elf32-littlearm\n"), None);
    }

    #[test]
    fn test_source_defines_target() {
        let oracle = AssemblerOracle::default();
        let source = oracle.source("bne .L2", Some(".L2"));
        assert!(source.contains("\t.cpu cortex-m3\n"));
        assert!(source.ends_with("bne .L2\nnop\nnop\nnop\nnop\n.L2:\n"));

        let source = oracle.source("adds r0, r0, #1", None);
        assert!(source.ends_with("adds r0, r0, #1\n"));
    }
}
