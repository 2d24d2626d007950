//! Linking object files into shared libraries
//!
//! The system C compiler driver is used as the linker so that the platform's
//! default search paths and startup objects apply.

use anyhow::{anyhow, Result};
use std::path::{Path, PathBuf};
use std::process::Command;
use target_lexicon::OperatingSystem;
use tracing::debug;

use crate::target::{CompilationTarget, OutputFormat};

/// Environment variable naming the linker driver to use
pub const LINKER_ENV: &str = "MU_LINKER";

/// Linker configuration
#[derive(Debug, Clone)]
pub struct LinkerConfig {
    /// Target specification
    pub target: CompilationTarget,

    /// Output format
    pub output_format: OutputFormat,

    /// Libraries to link
    pub libraries: Vec<String>,

    /// Library search paths
    pub library_paths: Vec<PathBuf>,

    /// Additional linker flags
    pub flags: Vec<String>,

    /// Explicit linker driver; overrides the environment and the search
    pub linker: Option<String>,
}

impl LinkerConfig {
    /// Create default linker configuration
    pub fn new(target: CompilationTarget, output_format: OutputFormat) -> Self {
        Self {
            target,
            output_format,
            libraries: vec![],
            library_paths: vec![],
            flags: vec![],
            linker: None,
        }
    }

    /// Add a library to link
    pub fn link_library(&mut self, lib: String) -> &mut Self {
        self.libraries.push(lib);
        self
    }

    /// Add a library search path
    pub fn add_library_path(&mut self, path: PathBuf) -> &mut Self {
        self.library_paths.push(path);
        self
    }

    /// Pass an extra argument to the linker driver, after the libraries
    pub fn add_flag(&mut self, flag: String) -> &mut Self {
        self.flags.push(flag);
        self
    }

    pub fn with_linker(&mut self, linker: Option<String>) -> &mut Self {
        self.linker = linker;
        self
    }

    /// The full command line, without running it
    pub fn command(&self, object_files: &[PathBuf], output_path: &Path) -> Result<Command> {
        let linker = get_linker(self)?;
        let mut cmd = Command::new(linker);

        for obj in object_files {
            cmd.arg(obj);
        }
        cmd.arg("-o").arg(output_path);

        match self.target.operating_system() {
            OperatingSystem::Darwin | OperatingSystem::MacOSX { .. } => {
                if self.output_format == OutputFormat::DynamicLib {
                    cmd.arg("-dynamiclib");
                    // callees outside the bundle are bound at load time
                    cmd.arg("-undefined").arg("dynamic_lookup");
                }
            }
            _ => {
                if self.output_format == OutputFormat::DynamicLib {
                    cmd.arg("-shared");
                }
                if self.target.pic {
                    cmd.arg("-fPIC");
                }
            }
        }

        for path in &self.library_paths {
            cmd.arg(format!("-L{}", path.display()));
        }
        for lib in &self.libraries {
            cmd.arg(format!("-l{}", lib));
        }
        for flag in &self.flags {
            cmd.arg(flag);
        }
        Ok(cmd)
    }
}

/// Link object files into a library
pub fn link(object_files: &[PathBuf], output_path: &Path, config: &LinkerConfig) -> Result<()> {
    let mut cmd = config.command(object_files, output_path)?;
    debug!(command = ?cmd, "linking");

    let output = cmd
        .output()
        .map_err(|e| anyhow!("Failed to run linker {:?}: {}", cmd.get_program(), e))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(anyhow!("Linking failed: {}", stderr.trim()));
    }

    Ok(())
}

/// Get the linker driver: the configured one, then `MU_LINKER`, then the
/// first C compiler driver found on `PATH`
fn get_linker(config: &LinkerConfig) -> Result<String> {
    if let Some(linker) = &config.linker {
        return Ok(linker.clone());
    }
    if let Ok(linker) = std::env::var(LINKER_ENV) {
        if !linker.is_empty() {
            return Ok(linker);
        }
    }

    ["cc", "clang", "gcc"]
        .into_iter()
        .find(|candidate| which::which(candidate).is_ok())
        .map(str::to_string)
        .ok_or_else(|| anyhow!("No suitable linker found; set {} or --linker", LINKER_ENV))
}
