//! Background execution grants.
//!
//! Platforms that grant only short windows of background execution (budget
//! of roughly 30 s) require the holder to renew the grant before it runs
//! out.  [`GrantSupervisor`] enforces the safe renewal order: a fresh grant
//! is acquired *before* the old one is released, so the process is never
//! without one mid-renewal.
//!
//! [`ExecutionGrant`] abstracts the platform call; on platforms without a
//! grant concept [`UnrestrictedGrant`] supplies no-op grants so the rest of
//! the guard runs unchanged.

use std::time::{Duration, Instant};

use log::{debug, warn};
use thiserror::Error;

// ---------------------------------------------------------------------------
// ExecutionGrant
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum GrantError {
    #[error("platform refused the execution grant: {0}")]
    Refused(String),
}

/// Opaque handle for one granted execution window.
#[derive(Debug)]
pub struct GrantHandle {
    pub id: u64,
    pub acquired_at: Instant,
}

/// Platform seam for acquiring and releasing execution windows.
pub trait ExecutionGrant: Send {
    fn acquire(&mut self) -> Result<GrantHandle, GrantError>;
    fn release(&mut self, handle: GrantHandle);
    /// How long one grant is good for.
    fn budget(&self) -> Duration;
}

// ---------------------------------------------------------------------------
// UnrestrictedGrant
// ---------------------------------------------------------------------------

/// Grant provider for platforms with no background-execution limits.
/// Always grants; releases are logged at debug level only.
pub struct UnrestrictedGrant {
    next_id: u64,
}

impl UnrestrictedGrant {
    pub fn new() -> Self {
        Self { next_id: 1 }
    }
}

impl Default for UnrestrictedGrant {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionGrant for UnrestrictedGrant {
    fn acquire(&mut self) -> Result<GrantHandle, GrantError> {
        let id = self.next_id;
        self.next_id += 1;
        debug!("execution grant {id} acquired (unrestricted platform)");
        Ok(GrantHandle {
            id,
            acquired_at: Instant::now(),
        })
    }

    fn release(&mut self, handle: GrantHandle) {
        debug!("execution grant {} released", handle.id);
    }

    fn budget(&self) -> Duration {
        Duration::MAX
    }
}

// ---------------------------------------------------------------------------
// GrantSupervisor
// ---------------------------------------------------------------------------

/// Holds at most one live grant and renews it new-before-old.
pub struct GrantSupervisor {
    provider: Box<dyn ExecutionGrant>,
    current: Option<GrantHandle>,
}

impl GrantSupervisor {
    pub fn new(provider: Box<dyn ExecutionGrant>) -> Self {
        Self {
            provider,
            current: None,
        }
    }

    pub fn is_held(&self) -> bool {
        self.current.is_some()
    }

    /// Age of the held grant, `None` when none is held.
    pub fn held_for(&self) -> Option<Duration> {
        self.current.as_ref().map(|g| g.acquired_at.elapsed())
    }

    /// Make sure a grant is held, acquiring one if needed.
    pub fn ensure(&mut self) -> Result<(), GrantError> {
        if self.current.is_none() {
            self.current = Some(self.provider.acquire()?);
        }
        Ok(())
    }

    /// Replace the held grant with a fresh one.
    ///
    /// The new grant is acquired first; only on success is the old one
    /// released.  When acquisition fails the old grant is kept so whatever
    /// budget remains is not thrown away.
    pub fn renew(&mut self) -> Result<(), GrantError> {
        let fresh = match self.provider.acquire() {
            Ok(g) => g,
            Err(e) => {
                warn!("grant renewal failed ({e}); keeping the current grant");
                return Err(e);
            }
        };
        if let Some(old) = self.current.replace(fresh) {
            self.provider.release(old);
        }
        Ok(())
    }

    /// Release the held grant, if any.
    pub fn release(&mut self) {
        if let Some(g) = self.current.take() {
            self.provider.release(g);
        }
    }
}

impl Drop for GrantSupervisor {
    fn drop(&mut self) {
        self.release();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use std::sync::atomic::{AtomicBool, Ordering};

    /// Records every acquire/release in order so tests can assert on the
    /// renewal sequence.
    struct MockGrant {
        log: Arc<Mutex<Vec<String>>>,
        next_id: u64,
        fail: Arc<AtomicBool>,
    }

    impl MockGrant {
        fn new(log: Arc<Mutex<Vec<String>>>) -> Self {
            Self::failable(log, Arc::new(AtomicBool::new(false)))
        }

        fn failable(log: Arc<Mutex<Vec<String>>>, fail: Arc<AtomicBool>) -> Self {
            Self {
                log,
                next_id: 1,
                fail,
            }
        }
    }

    impl ExecutionGrant for MockGrant {
        fn acquire(&mut self) -> Result<GrantHandle, GrantError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(GrantError::Refused("simulated".into()));
            }
            let id = self.next_id;
            self.next_id += 1;
            self.log.lock().unwrap().push(format!("acquire:{id}"));
            Ok(GrantHandle {
                id,
                acquired_at: Instant::now(),
            })
        }

        fn release(&mut self, handle: GrantHandle) {
            self.log.lock().unwrap().push(format!("release:{}", handle.id));
        }

        fn budget(&self) -> Duration {
            Duration::from_secs(30)
        }
    }

    #[test]
    fn renew_acquires_before_releasing() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut sup = GrantSupervisor::new(Box::new(MockGrant::new(Arc::clone(&log))));

        sup.ensure().expect("ensure");
        sup.renew().expect("renew");
        sup.release();

        let log = log.lock().unwrap();
        assert_eq!(
            *log,
            vec!["acquire:1", "acquire:2", "release:1", "release:2"],
            "grant 2 must be acquired before grant 1 is released"
        );
    }

    #[test]
    fn ensure_is_idempotent() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut sup = GrantSupervisor::new(Box::new(MockGrant::new(Arc::clone(&log))));

        sup.ensure().expect("ensure");
        sup.ensure().expect("ensure again");
        assert!(sup.is_held());
        assert_eq!(log.lock().unwrap().len(), 1);
    }

    #[test]
    fn failed_renewal_keeps_old_grant() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let fail = Arc::new(AtomicBool::new(false));
        let mut sup = GrantSupervisor::new(Box::new(MockGrant::failable(
            Arc::clone(&log),
            Arc::clone(&fail),
        )));

        sup.ensure().expect("ensure");
        fail.store(true, Ordering::SeqCst);
        assert!(sup.renew().is_err());

        // Grant 1 must still be held; no release was logged.
        assert!(sup.is_held());
        assert_eq!(*log.lock().unwrap(), vec!["acquire:1"]);
    }

    #[test]
    fn drop_releases_held_grant() {
        let log = Arc::new(Mutex::new(Vec::new()));
        {
            let mut sup = GrantSupervisor::new(Box::new(MockGrant::new(Arc::clone(&log))));
            sup.ensure().expect("ensure");
        }
        let log = log.lock().unwrap();
        assert_eq!(*log, vec!["acquire:1", "release:1"]);
    }

    #[test]
    fn unrestricted_grant_always_succeeds() {
        let mut sup = GrantSupervisor::new(Box::new(UnrestrictedGrant::new()));
        sup.ensure().expect("ensure");
        sup.renew().expect("renew");
        assert!(sup.is_held());
        assert!(sup.held_for().is_some());
    }
}
