//! Mu micro VM: bundle construction and loading
//!
//! Clients obtain a [`Context`] from a [`MuVm`], declare IR through an
//! [`IrBuilder`] and commit it with [`IrBuilder::load`]. A bundle is
//! validated as a whole and either becomes visible entirely or not at all.
//! Committed functions can be compiled into a native shared library with
//! [`MuVm::compile_to_sharedlib`].

pub mod builder;
pub mod commit;
pub mod options;
pub mod resolver;
pub mod staging;
pub mod vm;

pub use builder::IrBuilder;
pub use commit::LoadReport;
pub use options::{LogLevel, VmOptions};
pub use vm::{Context, MuVm};

pub use mu_core::ir::{BinOptr, CmpOptr, ConvOptr, MemOrd};
pub use mu_core::{
    CompileFailure, Diagnostic, EntityKind, Error, LoadFailure, MuId, Namespace, Node, Reason,
    Result, ShapeError,
};
