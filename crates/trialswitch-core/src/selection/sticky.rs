//! Sticky routing: deterministic identity -> trial assignment

use super::{SelectionKind, SelectionStrategy};
use crate::context::InvocationContext;
use crate::error::SelectionError;
use crate::ids::{ContractId, TrialKey};
use sha2::{Digest, Sha256};

/// Map `identity` to a bucket in `0..buckets`
///
/// SHA-256 over `salt \0 identity`, first 8 bytes big-endian, modulo the
/// bucket count. Stable across processes and releases.
///
/// # Panics
/// Panics if `buckets` is zero.
#[must_use]
pub fn sticky_bucket(salt: &str, identity: &str, buckets: usize) -> usize {
    assert!(buckets > 0, "sticky routing needs at least one bucket");

    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update([0]);
    hasher.update(identity.as_bytes());
    let digest = hasher.finalize();

    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    let value = u64::from_be_bytes(prefix);

    // buckets <= usize::MAX, so the remainder always fits back
    (value % buckets as u64) as usize
}

/// Assigns callers to non-default trials by identity hash
///
/// Bucket order is the sorted non-default keys, fixed at build time, so
/// re-registering trials in a different order keeps every assignment.
#[derive(Debug)]
pub struct StickyRoutingStrategy {
    name: String,
    salt: String,
    buckets: Vec<TrialKey>,
}

impl StickyRoutingStrategy {
    pub(crate) fn new(contract: &ContractId, name: String, mut buckets: Vec<TrialKey>) -> Self {
        buckets.sort();
        let salt = format!("{contract}/{name}");
        Self {
            name,
            salt,
            buckets,
        }
    }

    /// Key assigned to `identity`
    #[must_use]
    pub fn assign(&self, identity: &str) -> &TrialKey {
        &self.buckets[sticky_bucket(&self.salt, identity, self.buckets.len())]
    }
}

#[async_trait::async_trait]
impl SelectionStrategy for StickyRoutingStrategy {
    fn kind(&self) -> SelectionKind {
        SelectionKind::StickyRouting
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn candidates(&self) -> &[TrialKey] {
        &self.buckets
    }

    async fn resolve(&self, ctx: &InvocationContext) -> Result<TrialKey, SelectionError> {
        let identity = ctx.identity().ok_or_else(|| SelectionError::MissingIdentity {
            name: self.name.clone(),
        })?;
        Ok(self.assign(identity).clone())
    }
}
