//! Structured diagnostics produced when a bundle is rejected or a function
//! version cannot be compiled

use std::fmt;
use thiserror::Error;

use crate::id::MuId;
use crate::ir::{EntityKind, MemOrd};

/// One problem found in a bundle
#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    /// The staged node that carries the problem
    pub node: MuId,
    /// Name of that node, if it was generated with one
    pub name: Option<String>,
    /// The offending reference inside the node, when the problem is about one
    pub reference: Option<MuId>,
    pub reason: Reason,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.node)?;
        if let Some(name) = &self.name {
            write!(f, " ({name})")?;
        }
        if let Some(reference) = self.reference {
            write!(f, " -> {reference}")?;
        }
        write!(f, ": {}", self.reason)
    }
}

/// Why a node was rejected
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Reason {
    #[error("identifier is already defined in the global namespace")]
    DuplicateId,

    #[error("reference does not resolve to any node")]
    DanglingReference,

    #[error("expected {expected}, found {found}")]
    KindMismatch {
        expected: &'static str,
        found: EntityKind,
    },

    #[error("malformed literal: {0}")]
    MalformedLiteral(String),

    #[error("malformed type: {0}")]
    MalformedType(String),

    #[error("malformed code: {0}")]
    MalformedShape(ShapeError),

    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch { expected: String, found: String },

    #[error("name was bound to {previous} ({previous_kind}); cannot rebind it to a {kind}")]
    IncompatibleRedefinition {
        previous: MuId,
        previous_kind: EntityKind,
        kind: EntityKind,
    },
}

/// Structural problems inside a function version
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ShapeError {
    #[error("function version has no basic blocks")]
    NoBlocks,

    #[error("basic block has no instructions")]
    EmptyBlock,

    #[error("basic block does not end with a terminator")]
    MissingTerminator,

    #[error("terminator {inst} is followed by further instructions")]
    TerminatorNotLast { inst: MuId },

    #[error("basic block is unreachable from the entry block")]
    UnreachableBlock,

    #[error("already owned by {first}")]
    MultipleOwners { first: MuId },

    #[error("not owned by any {owner}")]
    Unowned { owner: &'static str },

    #[error("{what}: expected {expected} value(s), found {found}")]
    ArityMismatch {
        what: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("variable is not in scope here")]
    VarOutOfScope,

    #[error("function {func} has more than one version in this bundle")]
    DuplicateVersion { func: MuId },

    #[error("destination block belongs to another function version")]
    ForeignDestination,

    #[error("switch case has the same value as case {first}")]
    DuplicateSwitchCase { first: MuId },

    #[error("field {index} does not exist in a struct of {fields} field(s)")]
    FieldOutOfRange { index: u32, fields: usize },

    #[error("{ord:?} ordering is not valid for a {access}")]
    InvalidOrdering { ord: MemOrd, access: &'static str },
}

/// A rejected bundle: every diagnostic found while validating it
#[derive(Debug, Clone, PartialEq)]
pub struct LoadFailure {
    pub diagnostics: Vec<Diagnostic>,
}

impl LoadFailure {
    /// Whether any diagnostic mentions `node`
    pub fn mentions(&self, node: MuId) -> bool {
        self.diagnostics.iter().any(|d| d.node == node)
    }

    /// Diagnostics whose reason matches `pred`
    pub fn matching<'a>(
        &'a self,
        pred: impl Fn(&Reason) -> bool + 'a,
    ) -> impl Iterator<Item = &'a Diagnostic> + 'a {
        self.diagnostics.iter().filter(move |d| pred(&d.reason))
    }
}

impl fmt::Display for LoadFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} problem(s)", self.diagnostics.len())?;
        for diagnostic in &self.diagnostics {
            write!(f, "; {diagnostic}")?;
        }
        Ok(())
    }
}

/// A function version the code generator could not lower
#[derive(Debug, Clone, PartialEq)]
pub struct CompileFailure {
    pub func_ver: MuId,
    pub name: Option<String>,
    pub message: String,
}

impl CompileFailure {
    pub(crate) fn summary(failures: &[CompileFailure]) -> String {
        failures
            .iter()
            .map(|f| f.to_string())
            .collect::<Vec<_>>()
            .join("; ")
    }
}

impl fmt::Display for CompileFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{} ({}): {}", self.func_ver, name, self.message),
            None => write!(f, "{}: {}", self.func_ver, self.message),
        }
    }
}
