//! The background controller: one OS thread that periodically drains
//! the queue, saves the index, and runs proactive GC.
//!
//! The loop ticks by waiting on a shutdown channel with the configured
//! check period, so a shutdown signal wakes it immediately instead of
//! at the next tick. Work errors are forwarded on the error channel
//! handed out by `Annex::start` — the controller itself never dies on
//! them.

use std::sync::atomic::Ordering;
use std::sync::{mpsc, Arc};
use std::thread::JoinHandle;
use std::time::Instant;

use tracing::{debug, warn};

use crate::error::AnnexError;

use super::{index, Inner};

/// Handle to a running controller thread.
pub(crate) struct ControllerHandle {
    shutdown: mpsc::Sender<()>,
    thread: JoinHandle<()>,
}

impl ControllerHandle {
    /// Signals the controller and waits for it to exit.
    pub(crate) fn stop(self) {
        // A dead receiver means the thread already exited.
        let _ = self.shutdown.send(());
        if self.thread.join().is_err() {
            warn!("Controller thread panicked");
        }
    }
}

/// Spawns the controller thread.
pub(crate) fn spawn(
    inner: Arc<Inner>,
    err_tx: mpsc::Sender<AnnexError>,
) -> std::io::Result<ControllerHandle> {
    let (shutdown_tx, shutdown_rx) = mpsc::channel();
    let thread = std::thread::Builder::new()
        .name("annex-controller".to_string())
        .spawn(move || run(inner, shutdown_rx, err_tx))?;

    Ok(ControllerHandle {
        shutdown: shutdown_tx,
        thread,
    })
}

fn run(inner: Arc<Inner>, shutdown_rx: mpsc::Receiver<()>, err_tx: mpsc::Sender<AnnexError>) {
    let started_at = Instant::now();
    debug!("Controller running");

    loop {
        match shutdown_rx.recv_timeout(inner.config.auto_index_check_duration) {
            Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => break,
            Err(mpsc::RecvTimeoutError::Timeout) => {}
        }
        if inner.is_closing() {
            break;
        }
        tick(&inner, &err_tx, started_at);
    }

    debug!("Controller exiting");
}

/// One controller tick: evaluate the drain, save, and GC conditions.
fn tick(inner: &Inner, err_tx: &mpsc::Sender<AnnexError>, started_at: Instant) {
    let config = &inner.config;

    // Drain: enough queued ops, or a non-empty queue old enough.
    // Suppressed entirely for the configured delay after start.
    if started_at.elapsed() >= config.init_index_delay {
        let pending = inner.vqueue.insert_len() + inner.vqueue.delete_len();
        let age = inner
            .last_drain_at
            .read()
            .ok()
            .and_then(|stamp| *stamp)
            .map_or_else(|| started_at.elapsed(), |at| at.elapsed());

        let should_drain = pending >= config.auto_index_length as u64
            || (pending > 0 && age >= config.auto_index_duration);
        if should_drain {
            debug!(pending, ?age, "Controller draining");
            if let Err(e) = index::run_drain(inner, config.default_pool_size) {
                warn!(error = %e, "Background drain failed");
                let _ = err_tx.send(e);
            }
        }
    }

    // Save: at least one drain since the last save, and the save
    // interval has passed.
    let drains = inner.create_index_count.load(Ordering::SeqCst);
    if !config.in_memory_mode && drains > inner.saved_create_index_count.load(Ordering::SeqCst) {
        let since_save = inner
            .last_save_at
            .read()
            .ok()
            .and_then(|stamp| *stamp)
            .map_or_else(|| started_at.elapsed(), |at| at.elapsed());
        if since_save >= config.auto_save_index_duration {
            if let Err(e) = index::run_save(inner) {
                warn!(error = %e, "Background save failed");
                let _ = err_tx.send(e);
            }
        }
    }

    // GC: the drain counter advanced by at least the stride.
    if config.enable_proactive_gc
        && drains.saturating_sub(inner.gc_create_index_count.load(Ordering::SeqCst))
            >= config.proactive_gc_stride
    {
        index::run_gc(inner);
    }
}
