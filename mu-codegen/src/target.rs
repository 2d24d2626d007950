//! Target configuration and output formats

use std::str::FromStr;
use target_lexicon::{OperatingSystem, Triple};

/// Compilation target specification
#[derive(Debug, Clone)]
pub struct CompilationTarget {
    /// Target triple
    pub triple: Triple,

    /// Whether to use position-independent code
    pub pic: bool,
}

impl CompilationTarget {
    /// Create a target for the host system
    pub fn host() -> Self {
        Self {
            triple: target_lexicon::HOST,
            pic: true,
        }
    }

    /// Create a target from a triple string, `"host"` meaning the running machine
    pub fn from_triple(triple: &str) -> Result<Self, String> {
        if triple == "host" {
            return Ok(Self::host());
        }
        let triple =
            Triple::from_str(triple).map_err(|e| format!("Invalid target triple: {}", e))?;

        // Shared libraries need PIC wherever the system loader relocates them
        let pic = matches!(
            triple.operating_system,
            OperatingSystem::Linux | OperatingSystem::Darwin | OperatingSystem::Freebsd
        );

        Ok(Self { triple, pic })
    }

    /// Whether code for this target can run in the current process
    pub fn is_host(&self) -> bool {
        self.triple == target_lexicon::HOST
    }

    pub fn operating_system(&self) -> OperatingSystem {
        self.triple.operating_system
    }
}

/// Output format for compilation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Dynamic library (.so, .dylib, .dll)
    DynamicLib,

    /// Object file (.o)
    ObjectFile,
}

impl OutputFormat {
    /// Get file extension for this format on the given OS
    pub fn extension(&self, os: OperatingSystem) -> &'static str {
        match self {
            OutputFormat::DynamicLib => match os {
                OperatingSystem::Windows => ".dll",
                OperatingSystem::Darwin | OperatingSystem::MacOSX { .. } => ".dylib",
                _ => ".so",
            },
            OutputFormat::ObjectFile => {
                if os == OperatingSystem::Windows {
                    ".obj"
                } else {
                    ".o"
                }
            }
        }
    }
}
