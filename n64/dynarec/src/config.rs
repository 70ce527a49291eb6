use std::fmt;
use std::str::FromStr;

use crate::platform::{Platform, AARCH64, X86_64};

/// Which host register description drives allocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlatformKind {
    #[default]
    X86_64,
    Aarch64,
}

impl PlatformKind {
    pub fn platform(self) -> &'static Platform {
        match self {
            PlatformKind::X86_64 => &X86_64,
            PlatformKind::Aarch64 => &AARCH64,
        }
    }
}

impl FromStr for PlatformKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "x86_64" | "x86-64" | "amd64" => Ok(PlatformKind::X86_64),
            "aarch64" | "arm64" => Ok(PlatformKind::Aarch64),
            other => Err(format!("unknown platform '{}' (expected x86_64 or aarch64)", other)),
        }
    }
}

impl fmt::Display for PlatformKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.platform().name)
    }
}

#[derive(Debug, Clone)]
pub struct DynarecConfig {
    /// Bytes of host code kept before everything is flushed
    pub code_cache_size: usize,
    pub platform: PlatformKind,
    /// Skip ahead to the next event when a block is a branch-to-self idle loop
    pub idle_loop_detection: bool,
    /// Log every compiled block's dump at debug level
    pub log_compilations: bool,
}

impl Default for DynarecConfig {
    fn default() -> Self {
        DynarecConfig {
            code_cache_size: 32 * 1024 * 1024,
            platform: PlatformKind::default(),
            idle_loop_detection: true,
            log_compilations: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn platform_names_parse() {
        assert_eq!("x86_64".parse(), Ok(PlatformKind::X86_64));
        assert_eq!("ARM64".parse(), Ok(PlatformKind::Aarch64));
        assert!("mips".parse::<PlatformKind>().is_err());
        assert_eq!(PlatformKind::Aarch64.to_string(), "aarch64");
    }
}
