//! Correlation references.
//!
//! A [`Reference`] is the only link between a sent command and its eventual
//! acknowledgment or timeout. References are issued monotonically by a
//! [`ReferenceGenerator`] and are never reused for the lifetime of the process.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Opaque 64-bit correlation id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Reference(u64);

impl Reference {
    /// Wrap a raw value. Intended for decoding and tests; live references
    /// come from [`ReferenceGenerator::next`].
    #[inline]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Identifies one master↔worker channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelId(pub u16);

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ch{}", self.0)
    }
}

/// Process-wide monotonic reference source.
///
/// Shared between the master and every worker (`Arc<ReferenceGenerator>`),
/// so any producer can allocate a reference without a round trip.
#[derive(Debug)]
pub struct ReferenceGenerator {
    next: AtomicU64,
}

impl ReferenceGenerator {
    /// Start issuing at 1; 0 is never handed out.
    pub const fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    /// Issue a fresh reference.
    #[inline]
    pub fn next(&self) -> Reference {
        Reference(self.next.fetch_add(1, Ordering::Relaxed))
    }

    /// Number of references issued so far.
    pub fn issued(&self) -> u64 {
        self.next.load(Ordering::Relaxed) - 1
    }
}

impl Default for ReferenceGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn references_are_monotonic() {
        let refs = ReferenceGenerator::new();
        let a = refs.next();
        let b = refs.next();
        assert!(b > a);
        assert_eq!(a.get(), 1);
        assert_eq!(refs.issued(), 2);
    }

    #[test]
    fn references_unique_across_threads() {
        let refs = Arc::new(ReferenceGenerator::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let refs = Arc::clone(&refs);
                thread::spawn(move || (0..1000).map(|_| refs.next()).collect::<Vec<_>>())
            })
            .collect();

        let mut seen = HashSet::new();
        for h in handles {
            for r in h.join().unwrap() {
                assert!(seen.insert(r), "duplicate reference {r}");
            }
        }
        assert_eq!(seen.len(), 4000);
    }
}
