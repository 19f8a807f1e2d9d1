//! Staking and mining worker threads (spec.md §5: "a staking worker and an
//! optional PoW miner run as long-lived threads that yield cooperatively").
//! Grounded in the teacher's own thread-bootstrap idiom
//! (`commands/top_level.rs`): `thread::Builder::new().name(...)
//! .spawn_with_priority(ThreadPriority::Max, ...)` for the miner, generalized
//! here into a `WorkerHandle` shared by both worker kinds, plus the
//! bounded-timeout shutdown join spec.md §5 asks for that the teacher's
//! fire-and-forget miner thread never implements. `periodic` (a teacher
//! dependency the trimmed copy never used) becomes the staking worker's
//! `STAKER_POLLING_PERIOD` scheduler.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{self, RecvTimeoutError};
use periodic::{Every, Planner};
use thread_priority::{ThreadBuilderExt, ThreadPriority};
use tracing::{info, warn};

/// How often the staking worker re-checks whether it can produce a block
/// (spec.md §5's named interval).
pub const STAKER_POLLING_PERIOD: Duration = Duration::from_secs(1);

/// How long [`WorkerHandle::shutdown`] waits for the thread to join before
/// giving up and logging rather than blocking forever.
const SHUTDOWN_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// A long-lived worker thread plus the means to stop it cooperatively.
/// Dropping a `WorkerHandle` without calling [`Self::shutdown`] leaves the
/// thread running detached — shutdown is always an explicit call, matching
/// spec.md §5's "on shutdown they drain and join within a bounded timeout".
pub struct WorkerHandle {
    stop: Arc<AtomicBool>,
    shutdown_tx: channel::Sender<()>,
    join: Option<JoinHandle<()>>,
    name: &'static str,
}

impl WorkerHandle {
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Has the worker thread already exited (e.g. the body finished or
    /// panicked)?
    pub fn is_finished(&self) -> bool {
        self.join.as_ref().map(JoinHandle::is_finished).unwrap_or(true)
    }

    /// Signals the worker to stop at its next interruption point, then
    /// blocks up to [`SHUTDOWN_JOIN_TIMEOUT`] waiting for it to exit.
    pub fn shutdown(mut self) {
        self.stop.store(true, Ordering::SeqCst);
        let _ = self.shutdown_tx.send(());

        let Some(join) = self.join.take() else { return };
        let name = self.name;
        let (done_tx, done_rx) = channel::bounded::<()>(1);
        thread::spawn(move || {
            let _ = join.join();
            let _ = done_tx.send(());
        });

        match done_rx.recv_timeout(SHUTDOWN_JOIN_TIMEOUT) {
            Ok(()) => info!(worker = name, "worker thread joined cleanly"),
            Err(RecvTimeoutError::Timeout) => {
                warn!(worker = name, "worker thread did not join within the shutdown timeout")
            }
            Err(RecvTimeoutError::Disconnected) => {
                warn!(worker = name, "worker shutdown watcher disconnected unexpectedly")
            }
        }
    }
}

/// Starts the PoS staking worker: `round` is invoked on
/// [`STAKER_POLLING_PERIOD`] via a [`periodic::Planner`], until
/// [`WorkerHandle::shutdown`] is called. `round` should return quickly
/// (spec.md §5: the tip/mempool locks it takes internally are not held
/// across the sleep).
pub fn spawn_staking_worker<F>(round: F) -> WorkerHandle
where
    F: Fn() + Send + 'static,
{
    let stop = Arc::new(AtomicBool::new(false));
    let (shutdown_tx, shutdown_rx) = channel::bounded::<()>(1);

    let join = thread::Builder::new()
        .name("staking".to_string())
        .spawn(move || {
            let mut planner = Planner::new();
            planner.add(round, Every::new(STAKER_POLLING_PERIOD));
            planner.start();

            // Block until shutdown is requested; the planner's own thread
            // keeps firing `round` on schedule in the meantime. `Planner`
            // has no public `stop` method — dropping it here, once this
            // closure returns, is what ends its scheduler thread.
            let _ = shutdown_rx.recv();
        })
        .expect("spawning the staking worker thread should not fail");

    WorkerHandle { stop, shutdown_tx, join: Some(join), name: "staking" }
}

/// Starts the PoW miner at maximum OS thread priority, matching the
/// teacher's `spawn_with_priority(ThreadPriority::Max, ...)` bootstrap.
/// `hash_round` performs one round of hashing and returns `true` if it
/// found a valid block (any outer block-submission side effect is the
/// caller's concern); the loop checks the stop flag between rounds, the
/// only interruption point spec.md §5 promises.
pub fn spawn_pow_miner<F>(hash_round: F) -> WorkerHandle
where
    F: Fn() -> bool + Send + 'static,
{
    let stop = Arc::new(AtomicBool::new(false));
    let stop_for_loop = Arc::clone(&stop);
    let (shutdown_tx, _shutdown_rx) = channel::bounded::<()>(1);

    let join = thread::Builder::new()
        .name("miner".to_string())
        .spawn_with_priority(ThreadPriority::Max, move |_| {
            while !stop_for_loop.load(Ordering::SeqCst) {
                if hash_round() {
                    info!("miner found a valid block");
                }
            }
        })
        .expect("spawning the miner thread should not fail");

    WorkerHandle { stop, shutdown_tx, join: Some(join), name: "miner" }
}
