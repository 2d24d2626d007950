//! Identifiers and the identifier space
//!
//! Every entity a client declares (types, constants, functions, blocks,
//! instructions, local variables) is named by a [`MuId`]. Identifiers are
//! issued by an [`IdSpace`] owned by one runtime instance and are never
//! reused, even after the entity they named has been superseded.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::error::{Error, Result};

/// Identifier of a Mu entity
///
/// Uses NonZeroU32 internally so `Option<MuId>` costs no extra space.
/// MuId(0) is reserved as "no id".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MuId(pub NonZeroU32);

impl MuId {
    /// Creates a new MuId from a u32.
    /// Returns None if the value is 0.
    pub fn new(value: u32) -> Option<Self> {
        NonZeroU32::new(value).map(MuId)
    }

    /// Gets the inner u32 value
    pub fn get(&self) -> u32 {
        self.0.get()
    }
}

impl fmt::Display for MuId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Monotonic identifier allocator shared by every builder of a runtime instance
///
/// # Invariants
/// - issued ids are strictly increasing and start at 1
/// - once `u32::MAX` is reached the space is exhausted for good
#[derive(Debug)]
pub struct IdSpace {
    next: AtomicU32,
}

impl Default for IdSpace {
    fn default() -> Self {
        Self::new()
    }
}

impl IdSpace {
    pub fn new() -> Self {
        Self {
            next: AtomicU32::new(1),
        }
    }

    /// Issues a fresh identifier
    pub fn next_id(&self) -> Result<MuId> {
        let issued = self
            .next
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| {
                if n == u32::MAX {
                    None
                } else {
                    Some(n + 1)
                }
            })
            .map_err(|_| Error::IdSpaceExhausted)?;
        MuId::new(issued).ok_or(Error::IdSpaceExhausted)
    }

    /// Whether `id` has been handed out by this space
    pub fn was_issued(&self, id: MuId) -> bool {
        id.get() < self.next.load(Ordering::Relaxed)
    }

    #[cfg(test)]
    pub(crate) fn starting_at(next: u32) -> Self {
        Self {
            next: AtomicU32::new(next),
        }
    }
}

/// Checks that a symbolic name is usable: non-empty and free of whitespace
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name.chars().any(char::is_whitespace) {
        return Err(Error::InvalidName(name.to_string()));
    }
    Ok(())
}
