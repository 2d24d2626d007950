//! Atomic merge of a validated bundle into the global namespace

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{info, warn};

use mu_core::{CommitSummary, Error, Namespace, Result, Shadowed};

use crate::resolver;
use crate::staging::Bundle;

/// Outcome of a successful `load`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    /// Nodes added to the namespace
    pub nodes: usize,
    pub names_bound: usize,
    /// Names that now resolve to a node of this bundle instead of an older one
    pub shadowed: Vec<Shadowed>,
}

impl From<CommitSummary> for LoadReport {
    fn from(summary: CommitSummary) -> Self {
        Self {
            nodes: summary.nodes,
            names_bound: summary.names_bound,
            shadowed: summary.shadowed,
        }
    }
}

/// Validates `bundle` and merges it, holding the write lock throughout
///
/// Readers holding an older snapshot keep it; the namespace is cloned
/// before mutation when such a snapshot is outstanding.
pub(crate) fn commit(namespace: &RwLock<Arc<Namespace>>, bundle: Bundle) -> Result<LoadReport> {
    let mut guard = namespace.write();

    let owners = match resolver::resolve(&bundle, &guard) {
        Ok(owners) => owners,
        Err(failure) => {
            warn!(
                nodes = bundle.len(),
                problems = failure.diagnostics.len(),
                "bundle rejected"
            );
            return Err(Error::Load(failure));
        }
    };

    let batch = bundle.into_batch(owners);
    let summary = Arc::make_mut(&mut *guard).commit(batch);
    drop(guard);

    for shadowed in &summary.shadowed {
        warn!(
            name = %shadowed.name,
            previous = %shadowed.previous,
            current = %shadowed.current,
            "name rebound"
        );
    }
    info!(
        nodes = summary.nodes,
        names = summary.names_bound,
        "bundle committed"
    );
    Ok(summary.into())
}
