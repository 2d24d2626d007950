//! Start-up options of a runtime instance
//!
//! Options arrive as one whitespace-separated string, e.g.
//! `"--log-level=debug --aot-emit-dir=/tmp/emit"`, and are parsed with clap
//! as if they were the command line of a program called `init_mu`.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use mu_codegen::CodegenOptions;
use mu_core::{Error, Result};

/// Verbosity of the runtime's tracing output
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    None,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn filter(self) -> Option<tracing::Level> {
        match self {
            LogLevel::None => None,
            LogLevel::Error => Some(tracing::Level::ERROR),
            LogLevel::Warn => Some(tracing::Level::WARN),
            LogLevel::Info => Some(tracing::Level::INFO),
            LogLevel::Debug => Some(tracing::Level::DEBUG),
            LogLevel::Trace => Some(tracing::Level::TRACE),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Parser)]
#[command(name = "init_mu", about = "Mu micro VM start-up options", long_about = None)]
#[command(disable_help_flag = true, disable_version_flag = true)]
pub struct VmOptions {
    /// Tracing verbosity
    #[arg(long, value_enum, default_value_t = LogLevel::Info)]
    pub log_level: LogLevel,

    /// Directory for object files and relatively named libraries
    #[arg(long, default_value = "emit")]
    pub aot_emit_dir: PathBuf,

    /// Extra library to link into produced shared libraries
    #[arg(long = "bootimage-external-lib")]
    pub external_libs: Vec<String>,

    /// Extra library search path for linking
    #[arg(long = "bootimage-external-libpath")]
    pub external_libpaths: Vec<PathBuf>,

    /// Extra argument for the linker driver, e.g. `--aot-link-flag=-Wl,-z,now`
    #[arg(long = "aot-link-flag", allow_hyphen_values = true)]
    pub link_flags: Vec<String>,

    /// Code generator optimisation level
    #[arg(long, default_value_t = 2, value_parser = clap::value_parser!(u8).range(0..=3))]
    pub opt_level: u8,

    /// Linker driver; `MU_LINKER` or the first of cc/clang/gcc on PATH when unset
    #[arg(long, env = "MU_LINKER")]
    pub linker: Option<String>,
}

impl Default for VmOptions {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            aot_emit_dir: PathBuf::from("emit"),
            external_libs: Vec::new(),
            external_libpaths: Vec::new(),
            link_flags: Vec::new(),
            opt_level: 2,
            linker: None,
        }
    }
}

impl VmOptions {
    /// Parses a whitespace-separated option string
    pub fn parse(options: &str) -> Result<Self> {
        let args = std::iter::once("init_mu").chain(options.split_whitespace());
        Self::try_parse_from(args).map_err(|e| Error::Config(first_line(&e.to_string())))
    }

    /// Options handed to the code generator
    pub fn codegen(&self) -> CodegenOptions {
        CodegenOptions {
            opt_level: self.opt_level,
            emit_dir: self.aot_emit_dir.clone(),
            external_libs: self.external_libs.clone(),
            external_libpaths: self.external_libpaths.clone(),
            link_flags: self.link_flags.clone(),
            linker: self.linker.clone(),
            ..CodegenOptions::default()
        }
    }

    /// Installs a global `fmt` subscriber at the configured level
    ///
    /// A subscriber installed earlier, by the embedding program or by another
    /// runtime instance, is left in place.
    pub fn init_logging(&self) {
        if let Some(level) = self.log_level.filter() {
            let _ = tracing_subscriber::fmt()
                .with_max_level(level)
                .with_target(false)
                .try_init();
        }
    }
}

fn first_line(message: &str) -> String {
    message
        .lines()
        .next()
        .unwrap_or_default()
        .trim_start_matches("error: ")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = VmOptions::parse("").unwrap();
        assert_eq!(options.log_level, LogLevel::Info);
        assert_eq!(options.aot_emit_dir, PathBuf::from("emit"));
        assert_eq!(options.opt_level, 2);
        assert!(options.external_libs.is_empty());
        assert!(options.link_flags.is_empty());
    }

    #[test]
    fn test_all_flags() {
        let options = VmOptions::parse(
            "--log-level=trace --aot-emit-dir=/tmp/mu \
             --bootimage-external-lib=m --bootimage-external-lib=pthread \
             --bootimage-external-libpath=/opt/lib --opt-level=0 --linker=clang",
        )
        .unwrap();
        assert_eq!(options.log_level, LogLevel::Trace);
        assert_eq!(options.aot_emit_dir, PathBuf::from("/tmp/mu"));
        assert_eq!(options.external_libs, vec!["m", "pthread"]);
        assert_eq!(options.external_libpaths, vec![PathBuf::from("/opt/lib")]);
        assert_eq!(options.opt_level, 0);
        assert_eq!(options.linker.as_deref(), Some("clang"));
    }

    #[test]
    fn test_link_flags_reach_the_code_generator() {
        let options =
            VmOptions::parse("--aot-link-flag=-Wl,-z,now --aot-link-flag -s").unwrap();
        assert_eq!(options.link_flags, vec!["-Wl,-z,now", "-s"]);
        assert_eq!(options.codegen().link_flags, vec!["-Wl,-z,now", "-s"]);
    }

    #[test]
    fn test_space_separated_values() {
        let options = VmOptions::parse("--log-level none  --opt-level 3").unwrap();
        assert_eq!(options.log_level, LogLevel::None);
        assert_eq!(options.opt_level, 3);
    }

    #[test]
    fn test_unknown_flag_is_rejected() {
        let err = VmOptions::parse("--bogus").unwrap_err();
        assert!(matches!(err, Error::Config(ref msg) if msg.contains("--bogus")));
    }

    #[test]
    fn test_bad_values_are_rejected() {
        assert!(matches!(
            VmOptions::parse("--opt-level=7"),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            VmOptions::parse("--log-level=loud"),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_codegen_options() {
        let options = VmOptions::parse("--opt-level=1 --aot-emit-dir=out").unwrap();
        let codegen = options.codegen();
        assert_eq!(codegen.opt_level, 1);
        assert_eq!(codegen.emit_dir, PathBuf::from("out"));
    }
}
