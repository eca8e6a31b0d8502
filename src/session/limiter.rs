//! Per-identity admission control.
//!
//! Counts concurrently active sessions for each client host and refuses new
//! ones once a host reaches the configured maximum. An entry exists only
//! while the host has at least one active session, so the table never holds
//! more than the number of currently connected hosts.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::debug;

use super::ClientIdentity;

pub struct SessionLimiter {
    /// 0 disables the limit.
    max_per_identity: u32,
    active: DashMap<ClientIdentity, u32>,
}

impl SessionLimiter {
    pub fn new(max_per_identity: u32) -> Arc<Self> {
        Arc::new(Self {
            max_per_identity,
            active: DashMap::new(),
        })
    }

    pub fn max_per_identity(&self) -> u32 {
        self.max_per_identity
    }

    /// Try to start a session for `identity`.
    ///
    /// Returns a permit that releases the slot when dropped, or `None` if the
    /// host already has `max_per_identity` sessions. The check and the
    /// increment happen under the same entry lock.
    pub fn admit(self: &Arc<Self>, identity: ClientIdentity) -> Option<SessionPermit> {
        match self.active.entry(identity) {
            Entry::Occupied(mut entry) => {
                if self.max_per_identity > 0 && *entry.get() >= self.max_per_identity {
                    debug!(client = %identity, count = *entry.get(), "admission refused");
                    return None;
                }
                *entry.get_mut() += 1;
            }
            Entry::Vacant(entry) => {
                entry.insert(1);
            }
        }

        Some(SessionPermit {
            limiter: Arc::clone(self),
            identity,
        })
    }

    /// Give back one slot for `identity`, dropping the entry at zero.
    /// Unknown identities are ignored.
    pub fn release(&self, identity: ClientIdentity) {
        if let Entry::Occupied(mut entry) = self.active.entry(identity) {
            if *entry.get() <= 1 {
                entry.remove();
            } else {
                *entry.get_mut() -= 1;
            }
        }
    }

    pub fn active_count(&self, identity: ClientIdentity) -> u32 {
        self.active.get(&identity).map(|count| *count).unwrap_or(0)
    }

    /// Number of hosts with at least one active session.
    pub fn tracked_identities(&self) -> usize {
        self.active.len()
    }
}

/// An admitted session's slot. Dropping it calls [`SessionLimiter::release`]
/// exactly once.
pub struct SessionPermit {
    limiter: Arc<SessionLimiter>,
    identity: ClientIdentity,
}

impl SessionPermit {
    pub fn identity(&self) -> ClientIdentity {
        self.identity
    }
}

impl Drop for SessionPermit {
    fn drop(&mut self) {
        self.limiter.release(self.identity);
    }
}

impl std::fmt::Debug for SessionPermit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionPermit")
            .field("identity", &self.identity)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> ClientIdentity {
        s.parse().unwrap()
    }

    #[test]
    fn test_admits_up_to_max() {
        let limiter = SessionLimiter::new(2);
        let a = ip("10.0.0.1");

        let p1 = limiter.admit(a).expect("first");
        assert_eq!(p1.identity(), a);
        let p2 = limiter.admit(a).expect("second");
        assert!(limiter.admit(a).is_none());
        assert_eq!(limiter.active_count(a), 2);

        drop(p1);
        assert_eq!(limiter.active_count(a), 1);
        let _p3 = limiter.admit(a).expect("slot freed");
        assert!(limiter.admit(a).is_none());
        drop(p2);
    }

    #[test]
    fn test_entry_removed_at_zero() {
        let limiter = SessionLimiter::new(3);
        let a = ip("10.0.0.1");

        let permit = limiter.admit(a).unwrap();
        assert_eq!(limiter.tracked_identities(), 1);
        drop(permit);
        assert_eq!(limiter.tracked_identities(), 0);
        assert_eq!(limiter.active_count(a), 0);
    }

    #[test]
    fn test_identities_are_independent() {
        let limiter = SessionLimiter::new(1);
        let _a = limiter.admit(ip("10.0.0.1")).unwrap();
        let _b = limiter.admit(ip("10.0.0.2")).unwrap();
        assert!(limiter.admit(ip("10.0.0.1:4000")).is_none());
        assert_eq!(limiter.tracked_identities(), 2);
    }

    #[test]
    fn test_permit_released_with_unrun_closure() {
        let limiter = SessionLimiter::new(1);
        let a = ip("10.0.0.1");

        let permit = limiter.admit(a).unwrap();
        let callback = move || drop(permit);
        assert!(limiter.admit(a).is_none());

        drop(callback);
        assert_eq!(limiter.tracked_identities(), 0);
        assert!(limiter.admit(a).is_some());
    }

    #[test]
    fn test_release_unknown_is_noop() {
        let limiter = SessionLimiter::new(1);
        limiter.release(ip("10.0.0.9"));
        assert_eq!(limiter.tracked_identities(), 0);

        let _p = limiter.admit(ip("10.0.0.9")).unwrap();
        limiter.release(ip("10.0.0.8"));
        assert_eq!(limiter.active_count(ip("10.0.0.9")), 1);
    }

    #[test]
    fn test_zero_means_unlimited() {
        let limiter = SessionLimiter::new(0);
        let a = ip("10.0.0.1");
        let permits: Vec<_> = (0..50).map(|_| limiter.admit(a).unwrap()).collect();
        assert_eq!(limiter.active_count(a), 50);
        drop(permits);
        assert_eq!(limiter.tracked_identities(), 0);
    }

    #[test]
    fn test_concurrent_admit_release_keeps_counts() {
        let limiter = SessionLimiter::new(4);
        let a = ip("10.0.0.1");

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        if let Some(permit) = limiter.admit(a) {
                            assert!(limiter.active_count(a) <= 4);
                            drop(permit);
                        }
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(limiter.active_count(a), 0);
        assert_eq!(limiter.tracked_identities(), 0);
    }
}
