//! Condition codes used to rebuild conditional branches as IT blocks.

use std::fmt;

/// Condition code of a conditional branch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Condition {
    Eq,
    Ne,
    Ge,
    Lt,
    Gt,
    Le,
    Ls,
    Hi,
    Cc,
    Cs,
    Mi,
    Pl,
}

impl Condition {
    /// All conditions that have a supported inverse.
    pub const ALL: [Self; 12] = [
        Self::Eq,
        Self::Ne,
        Self::Ge,
        Self::Lt,
        Self::Gt,
        Self::Le,
        Self::Ls,
        Self::Hi,
        Self::Cc,
        Self::Cs,
        Self::Mi,
        Self::Pl,
    ];

    /// Parse a two-letter condition suffix. `hs`/`lo` are accepted as
    /// aliases of `cs`/`cc`.
    #[must_use]
    pub fn from_suffix(suffix: &str) -> Option<Self> {
        Some(match suffix {
            "eq" => Self::Eq,
            "ne" => Self::Ne,
            "ge" => Self::Ge,
            "lt" => Self::Lt,
            "gt" => Self::Gt,
            "le" => Self::Le,
            "ls" => Self::Ls,
            "hi" => Self::Hi,
            "cc" | "lo" => Self::Cc,
            "cs" | "hs" => Self::Cs,
            "mi" => Self::Mi,
            "pl" => Self::Pl,
            _ => return None,
        })
    }

    /// Condition of a conditional branch mnemonic (`bne` -> `Ne`).
    #[must_use]
    pub fn from_branch(operator: &str) -> Option<Self> {
        let suffix = operator.strip_prefix('b')?;
        if suffix.len() != 2 {
            return None;
        }
        Self::from_suffix(suffix)
    }

    /// Condition that holds exactly when `self` does not.
    #[must_use]
    pub const fn inverse(self) -> Self {
        match self {
            Self::Eq => Self::Ne,
            Self::Ne => Self::Eq,
            Self::Ge => Self::Lt,
            Self::Lt => Self::Ge,
            Self::Gt => Self::Le,
            Self::Le => Self::Gt,
            Self::Ls => Self::Hi,
            Self::Hi => Self::Ls,
            Self::Cc => Self::Cs,
            Self::Cs => Self::Cc,
            Self::Mi => Self::Pl,
            Self::Pl => Self::Mi,
        }
    }

    /// Assembler suffix.
    #[must_use]
    pub const fn suffix(self) -> &'static str {
        match self {
            Self::Eq => "eq",
            Self::Ne => "ne",
            Self::Ge => "ge",
            Self::Lt => "lt",
            Self::Gt => "gt",
            Self::Le => "le",
            Self::Ls => "ls",
            Self::Hi => "hi",
            Self::Cc => "cc",
            Self::Cs => "cs",
            Self::Mi => "mi",
            Self::Pl => "pl",
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.suffix())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inverse_is_involution() {
        for cond in Condition::ALL {
            assert_ne!(cond, cond.inverse());
            assert_eq!(cond, cond.inverse().inverse());
        }
    }

    #[test]
    fn test_from_branch() {
        assert_eq!(Condition::from_branch("bne"), Some(Condition::Ne));
        assert_eq!(Condition::from_branch("bhs"), Some(Condition::Cs));
        assert_eq!(Condition::from_branch("blo"), Some(Condition::Cc));
        assert_eq!(Condition::from_branch("bvs"), None);
        assert_eq!(Condition::from_branch("b"), None);
        assert_eq!(Condition::from_branch("bl"), None);
    }
}
