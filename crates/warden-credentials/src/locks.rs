//! Per-identity transaction locks.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::OwnedMutexGuard;
use warden_types::CredentialIdentity;

type IdentityMutex = Arc<tokio::sync::Mutex<()>>;

/// One async mutex per identity, created on first use and dropped once no
/// holder or waiter is left.
#[derive(Debug, Default)]
pub(crate) struct IdentityLocks {
    locks: Mutex<HashMap<CredentialIdentity, IdentityMutex>>,
}

impl IdentityLocks {
    /// Wait for exclusive access to `identity`.
    pub(crate) async fn acquire(&self, identity: &CredentialIdentity) -> IdentityGuard<'_> {
        let lock = {
            let mut locks = self.locks.lock();
            locks.entry(identity.clone()).or_default().clone()
        };
        IdentityGuard {
            guard: Some(lock.lock_owned().await),
            identity: identity.clone(),
            locks: self,
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks.lock().len()
    }
}

/// Exclusive access to one identity; released on drop.
pub(crate) struct IdentityGuard<'a> {
    guard: Option<OwnedMutexGuard<()>>,
    identity: CredentialIdentity,
    locks: &'a IdentityLocks,
}

impl Drop for IdentityGuard<'_> {
    fn drop(&mut self) {
        // Waiters clone the entry under the map lock, so a count of one
        // here means nobody else can reach this mutex.
        let mut locks = self.locks.locks.lock();
        drop(self.guard.take());
        if locks
            .get(&self.identity)
            .map_or(false, |lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&self.identity);
        }
    }
}
