// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Target CPU architectures and firmware boot modes.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::unknown_entity;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Arch {
    X86_64,
    Aarch64,
    Ppc64le,
    S390x,
}

impl Arch {
    pub fn as_str(&self) -> &'static str {
        match self {
            Arch::X86_64 => "x86_64",
            Arch::Aarch64 => "aarch64",
            Arch::Ppc64le => "ppc64le",
            Arch::S390x => "s390x",
        }
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Arch {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "x86_64" => Arch::X86_64,
            "aarch64" => Arch::Aarch64,
            "ppc64le" => Arch::Ppc64le,
            "s390x" => Arch::S390x,
            o => return Err(unknown_entity(format!("unknown architecture: {}", o))),
        })
    }
}

/// How the firmware finds the bootloader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BootMode {
    #[default]
    None,
    Legacy,
    Uefi,
    Hybrid,
}

impl BootMode {
    pub fn has_legacy(self) -> bool {
        matches!(self, BootMode::Legacy | BootMode::Hybrid)
    }

    pub fn has_uefi(self) -> bool {
        matches!(self, BootMode::Uefi | BootMode::Hybrid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arch() {
        for a in [Arch::X86_64, Arch::Aarch64, Arch::Ppc64le, Arch::S390x] {
            assert_eq!(a.as_str().parse::<Arch>().unwrap(), a);
        }
        assert!("i686".parse::<Arch>().is_err());
        assert_eq!(serde_json::to_string(&Arch::X86_64).unwrap(), "\"x86_64\"");
    }

    #[test]
    fn test_boot_mode() {
        assert!(BootMode::Hybrid.has_legacy() && BootMode::Hybrid.has_uefi());
        assert!(!BootMode::Uefi.has_legacy());
        assert!(!BootMode::None.has_uefi());
    }
}
