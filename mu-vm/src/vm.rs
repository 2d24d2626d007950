//! The runtime instance and its client contexts

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info};

use mu_core::{IdSpace, MuId, Namespace, Node, Result};

use crate::builder::IrBuilder;
use crate::options::VmOptions;

/// State shared by every context and builder of one runtime instance
#[derive(Debug)]
pub(crate) struct VmShared {
    pub(crate) ids: IdSpace,
    pub(crate) namespace: RwLock<Arc<Namespace>>,
    pub(crate) options: VmOptions,
    contexts: AtomicU32,
}

impl VmShared {
    /// The committed namespace as of now; never observes a partial bundle
    pub(crate) fn snapshot(&self) -> Arc<Namespace> {
        Arc::clone(&self.namespace.read())
    }
}

/// A Mu micro VM instance
///
/// Owns the identifier space and the global namespace. Several instances in
/// one process are independent of each other.
#[derive(Debug, Clone)]
pub struct MuVm {
    shared: Arc<VmShared>,
}

impl MuVm {
    /// Creates a runtime from a whitespace-separated option string
    pub fn new(options: &str) -> Result<Self> {
        let options = VmOptions::parse(options)?;
        Ok(Self::with_options(options))
    }

    pub fn with_options(options: VmOptions) -> Self {
        options.init_logging();
        info!(
            emit_dir = %options.aot_emit_dir.display(),
            opt_level = options.opt_level,
            "Mu VM created"
        );
        Self {
            shared: Arc::new(VmShared {
                ids: IdSpace::new(),
                namespace: RwLock::new(Arc::new(Namespace::new())),
                options,
                contexts: AtomicU32::new(0),
            }),
        }
    }

    pub fn options(&self) -> &VmOptions {
        &self.shared.options
    }

    pub fn new_context(&self) -> Context {
        let serial = self.shared.contexts.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(context = serial, "context created");
        Context {
            shared: Arc::clone(&self.shared),
            serial,
        }
    }

    /// Snapshot of the committed namespace
    pub fn namespace(&self) -> Arc<Namespace> {
        self.shared.snapshot()
    }

    /// Identifier currently bound to `name`
    pub fn id_of(&self, name: &str) -> Option<MuId> {
        self.shared.namespace.read().id_of(name)
    }

    /// Name `id` was generated with
    pub fn name_of(&self, id: MuId) -> Option<String> {
        self.shared.namespace.read().name_of(id).map(str::to_string)
    }

    /// Compiles committed functions into a shared library
    ///
    /// An empty `allowlist` compiles the current version of every function.
    /// Otherwise each listed id names either a function (its current version
    /// is compiled) or one specific function version. A relative `output` is
    /// placed in the emit directory. Returns the path of the library.
    pub fn compile_to_sharedlib(
        &self,
        output: impl AsRef<Path>,
        allowlist: &[MuId],
    ) -> Result<PathBuf> {
        let snapshot = self.shared.snapshot();
        let options = self.shared.options.codegen();
        mu_codegen::compile_to_sharedlib(&snapshot, output.as_ref(), allowlist, &options)
    }
}

/// A client handle to a runtime instance
///
/// Builders are issued through a context; lookups see only committed
/// bundles.
#[derive(Debug, Clone)]
pub struct Context {
    shared: Arc<VmShared>,
    serial: u32,
}

impl Context {
    pub fn new_ir_builder(&self) -> IrBuilder {
        debug!(context = self.serial, "IR builder created");
        IrBuilder::new(Arc::clone(&self.shared))
    }

    pub fn id_of(&self, name: &str) -> Option<MuId> {
        self.shared.namespace.read().id_of(name)
    }

    pub fn name_of(&self, id: MuId) -> Option<String> {
        self.shared.namespace.read().name_of(id).map(str::to_string)
    }

    /// A committed node
    pub fn node(&self, id: MuId) -> Option<Node> {
        self.shared.namespace.read().node(id).cloned()
    }

    /// The current version of a committed function
    pub fn current_version(&self, func: MuId) -> Option<MuId> {
        self.shared.namespace.read().current_version(func)
    }
}

#[cfg(test)]
#[path = "vm_tests.rs"]
mod tests;
