//! Native code generation backend for the Mu micro VM
//!
//! This crate compiles committed function versions ahead of time into a
//! native shared library. Code is generated with Cranelift into an object
//! file in the emit directory, which the system C compiler driver then links.

use std::fs;
use std::path::{Path, PathBuf};

use rustc_hash::FxHashMap;
use tracing::{debug, info};

use mu_core::{CompileFailure, Error, MuId, Namespace, Node, Result};

pub mod compiler;
pub mod linker;
pub mod symbols;
pub mod target;
pub mod types;

pub use compiler::{NativeCompiler, Selected};
pub use linker::LinkerConfig;
pub use symbols::symbol_for;
pub use target::{CompilationTarget, OutputFormat};

/// Options for native code generation
#[derive(Debug, Clone)]
pub struct CodegenOptions {
    /// Target triple (e.g., "x86_64-unknown-linux-gnu"), or "host"
    pub target: String,

    /// Optimization level (0-3)
    pub opt_level: u8,

    /// Directory for intermediate objects and relative output paths
    pub emit_dir: PathBuf,

    /// Output format
    pub output_format: OutputFormat,

    /// Libraries the produced library links against
    pub external_libs: Vec<String>,

    /// Library search paths
    pub external_libpaths: Vec<PathBuf>,

    /// Extra arguments passed to the linker driver
    pub link_flags: Vec<String>,

    /// Linker driver overriding the environment and the default search
    pub linker: Option<String>,
}

impl Default for CodegenOptions {
    fn default() -> Self {
        Self {
            target: "host".to_string(),
            opt_level: 2,
            emit_dir: PathBuf::from("emit"),
            output_format: OutputFormat::DynamicLib,
            external_libs: Vec::new(),
            external_libpaths: Vec::new(),
            link_flags: Vec::new(),
            linker: None,
        }
    }
}

impl CodegenOptions {
    /// Where a requested output path lands: relative paths go into the emit
    /// directory, absolute ones are used as given
    pub fn output_path(&self, output: &Path) -> PathBuf {
        if output.is_absolute() {
            output.to_path_buf()
        } else {
            self.emit_dir.join(output)
        }
    }
}

/// Picks the function versions to compile
///
/// An empty allowlist means the current version of every committed function.
/// Otherwise each id names a function (its current version) or a specific
/// function version. Ids absent from the namespace are rejected outright;
/// ids of the wrong kind, functions without versions and two versions of one
/// function are reported as compile failures.
pub fn select_versions(ns: &Namespace, allowlist: &[MuId]) -> Result<Vec<Selected>> {
    if allowlist.is_empty() {
        return Ok(ns
            .functions()
            .into_iter()
            .filter_map(|(func, _)| {
                ns.current_version(func).map(|ver| Selected { func, ver })
            })
            .collect());
    }

    let mut selected: Vec<Selected> = Vec::with_capacity(allowlist.len());
    let mut by_func: FxHashMap<MuId, MuId> = FxHashMap::default();
    let mut failures = Vec::new();
    let reject = |id: MuId, message: String| CompileFailure {
        func_ver: id,
        name: ns.name_of(id).map(str::to_string),
        message,
    };

    for id in allowlist {
        let choice = match ns.node(*id) {
            None => return Err(Error::UnknownId(*id)),
            Some(Node::Func(_)) => match ns.current_version(*id) {
                Some(ver) => Selected { func: *id, ver },
                None => {
                    failures.push(reject(*id, "function has no committed version".to_string()));
                    continue;
                }
            },
            Some(Node::FuncVer(ver)) => Selected {
                func: ver.func,
                ver: *id,
            },
            Some(node) => {
                failures.push(reject(
                    *id,
                    format!("a {} cannot be compiled", node.kind()),
                ));
                continue;
            }
        };

        match by_func.get(&choice.func) {
            Some(ver) if *ver == choice.ver => continue,
            Some(ver) => failures.push(reject(
                choice.ver,
                format!(
                    "function {} is already selected with version {}",
                    choice.func, ver
                ),
            )),
            None => {
                by_func.insert(choice.func, choice.ver);
                selected.push(choice);
            }
        }
    }

    if !failures.is_empty() {
        return Err(Error::Compile(failures));
    }
    Ok(selected)
}

/// Compiles the selected versions into an object file in the emit directory
pub fn compile_to_object(
    ns: &Namespace,
    output: &Path,
    allowlist: &[MuId],
    options: &CodegenOptions,
) -> Result<PathBuf> {
    let selected = select_versions(ns, allowlist)?;
    let compiler = NativeCompiler::new(options)?;
    let os = compiler.target().operating_system();

    let stem = output
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "mu_bundle".to_string());
    let object_path = options
        .emit_dir
        .join(format!("{}{}", stem, OutputFormat::ObjectFile.extension(os)));

    let bytes = compiler.compile(ns, &selected)?;
    fs::create_dir_all(&options.emit_dir)?;
    fs::write(&object_path, bytes)?;

    debug!(
        object = %object_path.display(),
        functions = selected.len(),
        "object file written"
    );
    Ok(object_path)
}

/// Main entry point for native code generation
///
/// Returns the path of the produced shared library.
pub fn compile_to_sharedlib(
    ns: &Namespace,
    output: &Path,
    allowlist: &[MuId],
    options: &CodegenOptions,
) -> Result<PathBuf> {
    let output_path = options.output_path(output);
    let object_path = compile_to_object(ns, output, allowlist, options)?;

    if let Some(parent) = output_path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let target = CompilationTarget::from_triple(&options.target)
        .map_err(|e| anyhow::anyhow!("Failed to parse target triple: {}", e))?;
    let mut config = LinkerConfig::new(target, options.output_format);
    config.with_linker(options.linker.clone());
    for path in &options.external_libpaths {
        config.add_library_path(path.clone());
    }
    for lib in &options.external_libs {
        config.link_library(lib.clone());
    }
    for flag in &options.link_flags {
        config.add_flag(flag.clone());
    }
    linker::link(&[object_path], &output_path, &config)?;

    info!(library = %output_path.display(), "shared library produced");
    Ok(output_path)
}
