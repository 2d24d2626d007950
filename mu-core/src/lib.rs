//! Core types and data structures for the Mu micro VM
//!
//! This crate provides the building blocks shared by the loader and the
//! code generator:
//! - Identifiers and the identifier space
//! - The IR node vocabulary
//! - The committed global namespace
//! - Error and diagnostic types

pub mod diagnostic;
pub mod error;
pub mod id;
pub mod ir;
pub mod namespace;

pub use diagnostic::{CompileFailure, Diagnostic, LoadFailure, Reason, ShapeError};
pub use error::{Error, Result};
pub use id::{IdSpace, MuId};
pub use ir::{EntityKind, Node};
pub use namespace::{CommitBatch, CommitSummary, Namespace, Shadowed};
