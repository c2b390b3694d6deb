//! The engine loop: one thread that owns the poll cadence.
//!
//! Every iteration runs the admin commands that arrived since the last tick,
//! then one [`ConnectionManager::poll`], then sleeps for `tick`.  Admin
//! commands and polls therefore never overlap.
//!
//! The loop is synchronous because `queue_output` may block while it retries
//! a full queue; the binary runs it on `tokio::task::spawn_blocking`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, TryRecvError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::{debug, info};

use crate::application::connection_manager::ConnectionManager;

/// What the engine did before it stopped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineSummary {
    pub ticks: u64,
    pub commands: u64,
}

/// Runs until `running` is cleared, then brings every bridge down.
///
/// A closed admin channel is not a reason to stop; the router keeps polling
/// without an admin surface.
pub fn run_engine(
    manager: Arc<ConnectionManager>,
    admin_rx: Receiver<String>,
    tick: Duration,
    running: Arc<AtomicBool>,
) -> EngineSummary {
    let mut summary = EngineSummary::default();
    let mut admin_open = true;
    info!("engine started (tick {} ms)", tick.as_millis());

    while running.load(Ordering::Relaxed) {
        while admin_open {
            match admin_rx.try_recv() {
                Ok(line) => {
                    // Outcome and errors are logged by `interact`.
                    let _ = manager.interact(&line);
                    summary.commands += 1;
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    debug!("admin channel closed");
                    admin_open = false;
                }
            }
        }

        if let Some(report) = manager.poll() {
            if report.inbound > 0 || report.drained > 0 || report.discarded > 0 {
                debug!("tick: {report:?}");
            }
        }
        summary.ticks += 1;
        thread::sleep(tick);
    }

    manager.deactivate_bridges();
    info!(
        "engine stopped after {} tick(s) and {} admin command(s)",
        summary.ticks, summary.commands
    );
    summary
}
