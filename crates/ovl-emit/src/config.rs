//! Overlay configuration.

use std::fmt;
use std::str::FromStr;

use crate::PlacementError;

/// A block named by the source line it starts at, written `unit:line`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct BlockLocation {
    pub unit: String,
    pub line: usize,
}

impl FromStr for BlockLocation {
    type Err = PlacementError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || PlacementError::Location(s.to_string());
        let (unit, line) = s.rsplit_once(':').ok_or_else(invalid)?;
        if unit.is_empty() {
            return Err(invalid());
        }
        Ok(Self {
            unit: unit.to_string(),
            line: line.parse().map_err(|_| invalid())?,
        })
    }
}

impl fmt::Display for BlockLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.unit, self.line)
    }
}

/// Placement and rewriting configuration.
#[derive(Clone, Debug)]
pub struct OverlayConfig {
    /// Register reserved for indirect branches (compile with `-ffixed-<reg>`).
    pub safe_register: String,
    /// Assumed iterations of every loop.
    pub loop_estimate: u64,
    /// Call depth followed by iteration estimation.
    pub max_call_depth: usize,
    /// Energy per cycle executing from flash.
    pub e_flash: u32,
    /// Energy per cycle executing from RAM.
    pub e_ram: u32,
    /// RAM bytes available for relocated code.
    pub spare_ram: u32,
    /// Allowed growth of the total cycle count.
    pub max_cycle_factor: f64,
    /// Blocks that must be placed in RAM.
    pub forced: Vec<BlockLocation>,
    /// Keep every block not in `forced` in flash.
    pub specified_only: bool,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            safe_register: "r5".to_string(),
            loop_estimate: 10,
            max_call_depth: 5,
            e_flash: 100,
            e_ram: 66,
            spare_ram: 1000,
            max_cycle_factor: 1.5,
            forced: Vec::new(),
            specified_only: false,
        }
    }
}

impl OverlayConfig {
    /// Create config with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the register clobbered by indirect branches.
    #[must_use]
    pub fn with_safe_register(mut self, register: impl Into<String>) -> Self {
        self.safe_register = register.into();
        self
    }

    /// Set the loop iteration estimate.
    #[must_use]
    pub const fn with_loop_estimate(mut self, estimate: u64) -> Self {
        self.loop_estimate = estimate;
        self
    }

    /// Set the RAM budget for relocated code.
    #[must_use]
    pub const fn with_spare_ram(mut self, bytes: u32) -> Self {
        self.spare_ram = bytes;
        self
    }

    /// Set the allowed cycle growth.
    #[must_use]
    pub const fn with_max_cycle_factor(mut self, factor: f64) -> Self {
        self.max_cycle_factor = factor;
        self
    }

    /// Force a block into RAM.
    #[must_use]
    pub fn with_forced(mut self, location: BlockLocation) -> Self {
        if !self.forced.contains(&location) {
            self.forced.push(location);
        }
        self
    }

    /// Only place forced blocks in RAM.
    #[must_use]
    pub const fn with_specified_only(mut self, enabled: bool) -> Self {
        self.specified_only = enabled;
        self
    }

    /// Whether the block of `unit` starting at `line` is forced into RAM.
    #[must_use]
    pub fn is_forced(&self, unit: &str, line: usize) -> bool {
        self.forced
            .iter()
            .any(|location| location.unit == unit && location.line == line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = OverlayConfig::default();
        assert_eq!(config.safe_register, "r5");
        assert_eq!(config.loop_estimate, 10);
        assert_eq!(config.max_call_depth, 5);
        assert_eq!((config.e_flash, config.e_ram), (100, 66));
        assert_eq!(config.spare_ram, 1000);
        assert!((config.max_cycle_factor - 1.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_block_location() {
        let location: BlockLocation = "dir/main.s:42".parse().unwrap();
        assert_eq!(location.unit, "dir/main.s");
        assert_eq!(location.line, 42);
        assert_eq!(location.to_string(), "dir/main.s:42");

        assert!("main.s".parse::<BlockLocation>().is_err());
        assert!(":4".parse::<BlockLocation>().is_err());
        assert!("main.s:x".parse::<BlockLocation>().is_err());
    }

    #[test]
    fn test_forced_blocks_are_deduplicated() {
        let location = BlockLocation {
            unit: "a.s".to_string(),
            line: 3,
        };
        let config = OverlayConfig::new()
            .with_forced(location.clone())
            .with_forced(location);
        assert_eq!(config.forced.len(), 1);
        assert!(config.is_forced("a.s", 3));
        assert!(!config.is_forced("a.s", 4));
    }
}
