//! The lifecycle guard: reacts to platform lifecycle events, keeps the
//! background execution grant fresh, and watches pipeline health.
//!
//! The guard runs as a single tokio task selecting over a lifecycle-event
//! channel and four timers (health check, grant renewal, segment flush,
//! heartbeat backup).  All decisions are delegated to a [`Supervised`]
//! target, which in production is the [`SessionManager`]; tests drive the
//! same code with a mock target and a manual event sequence.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use log::{error, info, warn};
use tokio::sync::mpsc;

use crate::config::{LifecycleConfig, PersistenceConfig};
use crate::session::SessionManager;

use super::grant::GrantSupervisor;

// ---------------------------------------------------------------------------
// LifecycleEvent
// ---------------------------------------------------------------------------

/// Platform lifecycle notifications, normalized to one typed enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// The app lost the foreground; background budget rules now apply.
    EnteredBackground,
    /// The app regained the foreground.
    EnteredForeground,
    /// The process is about to exit; flush everything now.
    WillTerminate,
    /// Another audio consumer took the input device.
    InterruptionBegan,
    /// The competing consumer is done.
    InterruptionEnded,
    /// The audio route changed (device unplugged, output switched).
    RouteChanged,
}

// ---------------------------------------------------------------------------
// Supervised
// ---------------------------------------------------------------------------

/// What the guard needs from the thing it supervises.
pub trait Supervised: Send + Sync {
    fn is_healthy(&self) -> bool;
    /// Rebuild the capture path without losing session state.
    fn recover(&self) -> Result<()>;
    fn flush_segment(&self) -> Result<()>;
    fn backup(&self) -> Result<()>;
    /// Force-close any open event, write the minute segment, and push a
    /// full backup.  Called when the process may be killed soon.
    fn checkpoint(&self) -> Result<()>;
    fn pause(&self) -> Result<()>;
    fn resume(&self) -> Result<()>;
    /// Drain buffers and close the session.
    fn shutdown(&self) -> Result<()>;
}

impl Supervised for SessionManager {
    fn is_healthy(&self) -> bool {
        self.is_capture_healthy()
    }

    fn recover(&self) -> Result<()> {
        self.recover_capture()
    }

    fn flush_segment(&self) -> Result<()> {
        self.flush_minute_segment()
    }

    fn backup(&self) -> Result<()> {
        self.heartbeat_backup()
    }

    fn checkpoint(&self) -> Result<()> {
        self.background_checkpoint()
    }

    fn pause(&self) -> Result<()> {
        self.pause_capture()
    }

    fn resume(&self) -> Result<()> {
        self.resume_capture()
    }

    fn shutdown(&self) -> Result<()> {
        self.stop_tracking()
    }
}

// ---------------------------------------------------------------------------
// LifecycleGuard
// ---------------------------------------------------------------------------

pub struct LifecycleGuard {
    lifecycle: LifecycleConfig,
    persistence: PersistenceConfig,
    grants: GrantSupervisor,
    consecutive_failures: AtomicU32,
}

/// Whether the guard loop should keep running after handling an event.
#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

impl LifecycleGuard {
    pub fn new(
        lifecycle: LifecycleConfig,
        persistence: PersistenceConfig,
        grants: GrantSupervisor,
    ) -> Self {
        Self {
            lifecycle,
            persistence,
            grants,
            consecutive_failures: AtomicU32::new(0),
        }
    }

    /// Run until the event channel closes, `WillTerminate` arrives, or
    /// recovery fails `max_recovery_attempts` times in a row.
    pub async fn run(
        mut self,
        target: Arc<dyn Supervised>,
        mut events: mpsc::Receiver<LifecycleEvent>,
    ) {
        let mut health = tokio::time::interval(Duration::from_secs(
            self.lifecycle.health_interval_secs.max(1),
        ));
        let mut grant = tokio::time::interval(Duration::from_secs(
            self.lifecycle.grant_renew_secs.max(1),
        ));
        let mut segment = tokio::time::interval(Duration::from_secs(
            self.persistence.segment_interval_secs.max(1),
        ));
        let mut backup = tokio::time::interval(Duration::from_secs(
            self.persistence.backup_interval_secs.max(1),
        ));
        // The first tick of a tokio interval fires immediately; skip it so
        // the timers start one period out.
        health.tick().await;
        grant.tick().await;
        segment.tick().await;
        backup.tick().await;

        loop {
            tokio::select! {
                maybe_event = events.recv() => {
                    match maybe_event {
                        Some(event) => {
                            if self.handle_event(event, target.as_ref()) == Flow::Stop {
                                break;
                            }
                        }
                        None => {
                            info!("lifecycle channel closed; guard exiting");
                            break;
                        }
                    }
                }
                _ = health.tick() => {
                    if self.health_tick(target.as_ref()) == Flow::Stop {
                        break;
                    }
                }
                _ = grant.tick() => {
                    if self.grants.is_held() {
                        if let Err(e) = self.grants.renew() {
                            warn!("grant renewal failed: {e}");
                        }
                    }
                }
                _ = segment.tick() => {
                    if let Err(e) = target.flush_segment() {
                        error!("segment flush failed: {e}");
                    }
                }
                _ = backup.tick() => {
                    if let Err(e) = target.backup() {
                        error!("heartbeat backup failed: {e}");
                    }
                }
            }
        }
    }

    fn handle_event(&mut self, event: LifecycleEvent, target: &dyn Supervised) -> Flow {
        info!("lifecycle event: {event:?}");
        match event {
            LifecycleEvent::EnteredBackground => {
                if let Err(e) = self.grants.ensure() {
                    warn!("could not obtain background grant: {e}");
                }
                // The OS may suspend or kill us at any point after this;
                // get everything buffered onto disk while we still can.
                if let Err(e) = target.checkpoint() {
                    error!("background checkpoint failed: {e}");
                }
            }
            LifecycleEvent::EnteredForeground => {
                self.grants.release();
            }
            LifecycleEvent::WillTerminate => {
                if let Err(e) = target.flush_segment() {
                    error!("final flush failed: {e}");
                }
                if let Err(e) = target.shutdown() {
                    error!("shutdown failed: {e}");
                }
                self.grants.release();
                return Flow::Stop;
            }
            LifecycleEvent::InterruptionBegan => {
                if let Err(e) = target.pause() {
                    error!("pause failed: {e}");
                }
            }
            LifecycleEvent::InterruptionEnded => {
                if let Err(e) = target.resume() {
                    error!("resume failed: {e}");
                }
            }
            LifecycleEvent::RouteChanged => {
                if let Err(e) = target.recover() {
                    error!("route-change recovery failed: {e}");
                }
            }
        }
        Flow::Continue
    }

    fn health_tick(&self, target: &dyn Supervised) -> Flow {
        if target.is_healthy() {
            self.consecutive_failures.store(0, Ordering::SeqCst);
            return Flow::Continue;
        }

        let failures = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
        warn!("pipeline unhealthy (attempt {failures})");
        match target.recover() {
            Ok(()) => {
                info!("capture recovered");
                self.consecutive_failures.store(0, Ordering::SeqCst);
                Flow::Continue
            }
            Err(e) => {
                error!("recovery attempt {failures} failed: {e}");
                if failures >= self.lifecycle.max_recovery_attempts {
                    error!("recovery exhausted; stopping session cleanly");
                    if let Err(e) = target.shutdown() {
                        error!("shutdown after failed recovery also failed: {e}");
                    }
                    Flow::Stop
                } else {
                    Flow::Continue
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::grant::UnrestrictedGrant;
    use std::sync::atomic::AtomicBool;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MockTarget {
        healthy: AtomicBool,
        recover_ok: AtomicBool,
        calls: Mutex<Vec<&'static str>>,
    }

    impl MockTarget {
        fn new(healthy: bool, recover_ok: bool) -> Self {
            let t = Self::default();
            t.healthy.store(healthy, Ordering::SeqCst);
            t.recover_ok.store(recover_ok, Ordering::SeqCst);
            t
        }

        fn calls(&self) -> Vec<&'static str> {
            self.calls.lock().unwrap().clone()
        }

        fn log(&self, call: &'static str) -> Result<()> {
            self.calls.lock().unwrap().push(call);
            Ok(())
        }
    }

    impl Supervised for MockTarget {
        fn is_healthy(&self) -> bool {
            self.healthy.load(Ordering::SeqCst)
        }
        fn recover(&self) -> Result<()> {
            self.calls.lock().unwrap().push("recover");
            if self.recover_ok.load(Ordering::SeqCst) {
                self.healthy.store(true, Ordering::SeqCst);
                Ok(())
            } else {
                anyhow::bail!("simulated recovery failure")
            }
        }
        fn flush_segment(&self) -> Result<()> {
            self.log("flush")
        }
        fn backup(&self) -> Result<()> {
            self.log("backup")
        }
        fn checkpoint(&self) -> Result<()> {
            self.log("checkpoint")
        }
        fn pause(&self) -> Result<()> {
            self.log("pause")
        }
        fn resume(&self) -> Result<()> {
            self.log("resume")
        }
        fn shutdown(&self) -> Result<()> {
            self.log("shutdown")
        }
    }

    fn guard() -> LifecycleGuard {
        LifecycleGuard::new(
            LifecycleConfig::default(),
            PersistenceConfig::default(),
            GrantSupervisor::new(Box::new(UnrestrictedGrant::new())),
        )
    }

    #[test]
    fn terminate_flushes_then_shuts_down() {
        let mut g = guard();
        let target = MockTarget::new(true, true);

        let flow = g.handle_event(LifecycleEvent::WillTerminate, &target);
        assert_eq!(flow, Flow::Stop);
        assert_eq!(target.calls(), vec!["flush", "shutdown"]);
    }

    #[test]
    fn interruption_pauses_and_resumes() {
        let mut g = guard();
        let target = MockTarget::new(true, true);

        assert_eq!(
            g.handle_event(LifecycleEvent::InterruptionBegan, &target),
            Flow::Continue
        );
        assert_eq!(
            g.handle_event(LifecycleEvent::InterruptionEnded, &target),
            Flow::Continue
        );
        assert_eq!(target.calls(), vec!["pause", "resume"]);
    }

    #[test]
    fn route_change_triggers_recovery() {
        let mut g = guard();
        let target = MockTarget::new(true, true);

        g.handle_event(LifecycleEvent::RouteChanged, &target);
        assert_eq!(target.calls(), vec!["recover"]);
    }

    #[test]
    fn background_acquires_grant_foreground_releases() {
        let mut g = guard();
        let target = MockTarget::new(true, true);

        g.handle_event(LifecycleEvent::EnteredBackground, &target);
        assert!(g.grants.is_held());
        g.handle_event(LifecycleEvent::EnteredForeground, &target);
        assert!(!g.grants.is_held());
    }

    #[test]
    fn background_checkpoints_after_taking_grant() {
        let mut g = guard();
        let target = MockTarget::new(true, true);

        g.handle_event(LifecycleEvent::EnteredBackground, &target);
        assert!(g.grants.is_held(), "grant held while checkpointing");
        assert_eq!(target.calls(), vec!["checkpoint"]);
    }

    #[test]
    fn healthy_target_resets_failure_counter() {
        let g = guard();
        let target = MockTarget::new(true, true);

        assert_eq!(g.health_tick(&target), Flow::Continue);
        assert!(target.calls().is_empty(), "no recovery when healthy");
    }

    #[test]
    fn unhealthy_target_recovers_once() {
        let g = guard();
        let target = MockTarget::new(false, true);

        assert_eq!(g.health_tick(&target), Flow::Continue);
        assert_eq!(target.calls(), vec!["recover"]);
        // Recovery flipped the target healthy; next tick is quiet.
        assert_eq!(g.health_tick(&target), Flow::Continue);
        assert_eq!(target.calls(), vec!["recover"]);
    }

    #[test]
    fn exhausted_recovery_stops_cleanly() {
        let g = guard();
        let target = MockTarget::new(false, false);
        let max = LifecycleConfig::default().max_recovery_attempts;

        for attempt in 1..max {
            assert_eq!(g.health_tick(&target), Flow::Continue, "attempt {attempt}");
        }
        assert_eq!(g.health_tick(&target), Flow::Stop);

        let calls = target.calls();
        assert_eq!(
            calls.iter().filter(|c| **c == "recover").count(),
            max as usize
        );
        assert_eq!(calls.last(), Some(&"shutdown"));
    }

    #[tokio::test]
    async fn run_exits_when_channel_closes() {
        let g = guard();
        let target: Arc<dyn Supervised> = Arc::new(MockTarget::new(true, true));
        let (tx, rx) = mpsc::channel(4);
        drop(tx);
        // Must return promptly rather than hanging on the timers.
        g.run(target, rx).await;
    }

    #[tokio::test]
    async fn run_stops_on_terminate_event() {
        let g = guard();
        let target = Arc::new(MockTarget::new(true, true));
        let (tx, rx) = mpsc::channel(4);
        tx.send(LifecycleEvent::WillTerminate).await.expect("send");

        g.run(Arc::clone(&target) as Arc<dyn Supervised>, rx).await;
        assert_eq!(target.calls(), vec!["flush", "shutdown"]);
    }
}
