//! The cache coordinator: a [`LocationIndex`] of which nodes hold which
//! files, a [`TransferScheduler`] rationing concurrent copies per host,
//! and the per-connection [`session::SessionHandler`] state machine that
//! ties the two together over the wire protocol.

pub mod acceptor;
pub mod config;
pub mod error;
pub mod location_index;
mod numeric;
pub mod scheduler;
pub mod session;
pub mod signal;
pub mod snapshot;
pub mod stats;
pub mod workers;

pub use acceptor::Acceptor;
pub use config::CoordinatorSettings;
pub use error::{RunError, SessionError};
pub use location_index::LocationIndex;
pub use scheduler::TransferScheduler;
pub use stats::StatsCollector;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use workers::ShutdownSignal;

/// Load configuration, restore the last snapshot, start the background
/// workers and serve connections until SIGTERM or the acceptor's own
/// shutdown signal fires. Returns once every worker thread has joined and
/// a final best-effort snapshot has been attempted.
pub fn run(config_path: &Path) -> Result<(), RunError> {
    let settings = Arc::new(CoordinatorSettings::load(config_path)?);
    tracing::info!(port = settings.port, db_file = %settings.db_file.display(), "starting coordinator");

    let index = Arc::new(LocationIndex::new());
    snapshot::load(&index, &settings.db_file)?;

    let scheduler = Arc::new(TransferScheduler::new(settings.max_copy_server, settings.max_copy_node, settings.max_wait_copy));
    let stats = Arc::new(StatsCollector::new());
    let shutdown = Arc::new(ShutdownSignal::new());

    signal::install();

    let snapshot_worker = workers::spawn_snapshot_worker(
        index.clone(),
        settings.db_file.clone(),
        Duration::from_secs(settings.db_save_interval),
        shutdown.clone(),
    );
    let cleanup_worker = workers::spawn_cleanup_worker(
        index.clone(),
        settings.max_age,
        Duration::from_secs(settings.cleanup_interval),
        shutdown.clone(),
    );
    let stats_worker = workers::spawn_stats_worker(
        stats.clone(),
        index.clone(),
        Duration::from_secs(settings.stat_interval),
        shutdown.clone(),
    );

    let acceptor = Acceptor::bind(settings.clone(), index.clone(), scheduler.clone(), stats.clone(), shutdown.clone())?;
    tracing::info!(addr = ?acceptor.local_addr()?, "accepting connections");

    // The acceptor's own poll loop only watches `shutdown`; relay the
    // process-wide SIGTERM flag into it so both respond to the same signal.
    let sigterm_watch_shutdown = shutdown.clone();
    let sigterm_watcher = std::thread::spawn(move || {
        while !signal::terminated() && !sigterm_watch_shutdown.is_set() {
            std::thread::sleep(Duration::from_millis(200));
        }
        sigterm_watch_shutdown.signal();
    });

    acceptor.serve();

    shutdown.signal();
    let _ = sigterm_watcher.join();
    let _ = snapshot_worker.join();
    let _ = cleanup_worker.join();
    let _ = stats_worker.join();

    match snapshot::try_save(&index, &settings.db_file) {
        Ok(true) => tracing::info!("final snapshot written"),
        Ok(false) => tracing::warn!("skipped final snapshot: index lock unavailable or nothing to save"),
        Err(err) => tracing::error!(error = %err, "final snapshot failed"),
    }

    Ok(())
}
