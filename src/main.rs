//! Application entry point — Somnoscope.
//!
//! # Startup sequence
//!
//! 1. Initialise logging.
//! 2. Load [`AppConfig`] from disk (returns default on first run).
//! 3. Resolve storage paths and build the [`SessionManager`].
//! 4. Run startup recovery (resume or discard the previous session,
//!    validate the artifact ledger).
//! 5. Start tracking: capture stream + processing thread.
//! 6. Run the [`LifecycleGuard`] on a tokio runtime; Ctrl-C is translated
//!    into a `WillTerminate` event so shutdown always drains the buffers.

use std::sync::Arc;

use tokio::sync::mpsc;

use somnoscope::{
    config::{AppConfig, StoragePaths},
    lifecycle::{GrantSupervisor, LifecycleEvent, LifecycleGuard, Supervised, UnrestrictedGrant},
    session::SessionManager,
};

fn main() -> anyhow::Result<()> {
    // 1. Logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    log::info!("somnoscope starting up");

    // 2. Configuration
    let config = AppConfig::load().unwrap_or_else(|e| {
        log::warn!("Failed to load config ({e}); using defaults");
        AppConfig::default()
    });

    // 3. Storage + manager
    let paths = StoragePaths::new();
    let manager = Arc::new(SessionManager::new(config.clone(), paths)?);

    // 4. Startup recovery before any new audio is written
    let report = manager.recover_state()?;
    if report.session_resumed {
        log::info!("previous session resumed after unclean shutdown");
    }

    // 5. Capture + processing
    manager.start_tracking()?;

    // 6. Lifecycle guard on a small tokio runtime
    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()?;

    let (event_tx, event_rx) = mpsc::channel::<LifecycleEvent>(16);

    // Ctrl-C / SIGTERM become a terminate event so the guard performs the
    // full drain-then-stop sequence.
    {
        let event_tx = event_tx.clone();
        rt.spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                log::info!("interrupt received; shutting down");
                let _ = event_tx.send(LifecycleEvent::WillTerminate).await;
            }
        });
    }

    let guard = LifecycleGuard::new(
        config.lifecycle.clone(),
        config.persistence.clone(),
        GrantSupervisor::new(Box::new(UnrestrictedGrant::new())),
    );

    rt.block_on(guard.run(
        Arc::clone(&manager) as Arc<dyn Supervised>,
        event_rx,
    ));

    log::info!("somnoscope stopped");
    Ok(())
}
