//! Single-flight, FIFO access to one device.
//!
//! Each device gets one dedicated worker thread fed by a bounded queue.
//! The worker owns the [`DeviceHandle`], so at most one `raw_read` or
//! `shutdown` runs per device at any instant, in submission order.
//! Distinct devices have distinct workers and run in parallel.
//!
//! Every queued job carries a [`Ticket`] progress word shared with the
//! caller:
//!
//! ```text
//! Queued ──start──▶ Running ──finish──▶ Done
//!   │                  │
//!   withdraw           request_cancel
//!   ▼                  ▼
//! Withdrawn        CancelRequested ──forced shutdown──▶ Done (Cancelled)
//! ```
//!
//! A withdrawn job is skipped by the worker without touching the device.
//! A job cancelled while running completes its read, the data is dropped,
//! the device is shut down, and only then is `Cancelled` sent back.
//!
//! A released worker keeps draining whatever was queued before the
//! release. If new work arrives meanwhile, the replacement worker joins its
//! predecessor before its first job, so the one-at-a-time rule holds across
//! the hand-over.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;

use tokio::sync::{mpsc, oneshot};

use crate::cancel::CancelToken;
use crate::error::{Result, RngError};
use crate::handle::{DeviceHandle, StateCell};
use crate::source::EntropySource;

/// Operation executed on the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Op {
    Read(usize),
    Close,
}

const QUEUED: u8 = 0;
const RUNNING: u8 = 1;
const DONE: u8 = 2;
const WITHDRAWN: u8 = 3;
const CANCEL_REQUESTED: u8 = 4;

#[derive(Debug)]
struct Progress(AtomicU8);

impl Progress {
    fn transition(&self, from: u8, to: u8) -> bool {
        self.0
            .compare_exchange(from, to, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn set(&self, to: u8) {
        self.0.store(to, Ordering::Release);
    }
}

struct Job {
    op: Op,
    progress: Arc<Progress>,
    reply: oneshot::Sender<Result<Vec<u8>>>,
}

impl Job {
    fn new(op: Op) -> (Self, Ticket) {
        let progress = Arc::new(Progress(AtomicU8::new(QUEUED)));
        let (tx, rx) = oneshot::channel();
        let job = Job {
            op,
            progress: Arc::clone(&progress),
            reply: tx,
        };
        (job, Ticket { progress, reply: Some(rx) })
    }
}

/// Caller side of a queued job.
///
/// Dropping a ticket whose job has not finished counts as cancellation:
/// a queued job is withdrawn, a running one gets the deferred cleanup.
pub(crate) struct Ticket {
    progress: Arc<Progress>,
    reply: Option<oneshot::Receiver<Result<Vec<u8>>>>,
}

fn flatten(reply: std::result::Result<Result<Vec<u8>>, oneshot::error::RecvError>) -> Result<Vec<u8>> {
    reply.unwrap_or_else(|_| Err(RngError::device("device worker stopped")))
}

fn already_taken() -> Result<Vec<u8>> {
    Err(RngError::device("request reply already consumed"))
}

/// Run a blocking channel operation from synchronous code.
///
/// Tokio's `blocking_*` channel calls panic on a runtime thread, so when a
/// runtime is active the wait moves to a scoped helper thread.
fn off_runtime<T: Send>(f: impl FnOnce() -> T + Send) -> T {
    if tokio::runtime::Handle::try_current().is_err() {
        return f();
    }
    std::thread::scope(|s| s.spawn(f).join()).unwrap_or_else(|panic| std::panic::resume_unwind(panic))
}

impl Ticket {
    /// Block the current thread until the job completes.
    pub(crate) fn wait(mut self) -> Result<Vec<u8>> {
        match self.reply.take() {
            Some(reply) => off_runtime(move || flatten(reply.blocking_recv())),
            None => already_taken(),
        }
    }

    /// Await completion, honouring `cancel`.
    pub(crate) async fn finish(mut self, cancel: &CancelToken) -> Result<Vec<u8>> {
        let Some(mut reply) = self.reply.take() else {
            return already_taken();
        };
        tokio::select! {
            biased;
            result = &mut reply => flatten(result),
            _ = cancel.cancelled() => {
                if self.progress.transition(QUEUED, WITHDRAWN) {
                    log::debug!("request withdrawn before it started");
                    return Err(RngError::Cancelled);
                }
                // Already on the device: wait for the worker's cleanup, or
                // for the result if it finished before we got here.
                self.progress.transition(RUNNING, CANCEL_REQUESTED);
                flatten(reply.await)
            }
        }
    }
}

impl Drop for Ticket {
    fn drop(&mut self) {
        if !self.progress.transition(QUEUED, WITHDRAWN) {
            self.progress.transition(RUNNING, CANCEL_REQUESTED);
        }
    }
}

/// A running worker thread and its queue.
struct Worker {
    tx: mpsc::Sender<Job>,
    thread: JoinHandle<()>,
    /// Dropped by the thread on exit.
    exited: oneshot::Receiver<()>,
}

#[derive(Default)]
struct WorkerSlot {
    live: Option<Worker>,
    /// A released worker that may still be draining its queue. Its
    /// successor joins it before touching the device.
    retiring: Option<JoinHandle<()>>,
}

/// Serializes all device access through one worker thread.
pub(crate) struct AccessSerializer {
    source: Arc<dyn EntropySource>,
    state: StateCell,
    io_retries: u32,
    queue_depth: usize,
    slot: Mutex<WorkerSlot>,
}

impl AccessSerializer {
    pub(crate) fn new(source: Arc<dyn EntropySource>, io_retries: u32, queue_depth: usize) -> Self {
        Self {
            source,
            state: StateCell::default(),
            io_retries,
            queue_depth: queue_depth.max(1),
            slot: Mutex::new(WorkerSlot::default()),
        }
    }

    pub(crate) fn state(&self) -> &StateCell {
        &self.state
    }

    fn slot(&self) -> std::sync::MutexGuard<'_, WorkerSlot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether a worker thread is currently attached.
    pub(crate) fn has_worker(&self) -> bool {
        self.slot().live.as_ref().is_some_and(|w| !w.tx.is_closed())
    }

    /// Queue sender, starting the worker on first use.
    fn sender(&self) -> Result<mpsc::Sender<Job>> {
        let mut slot = self.slot();
        if let Some(w) = slot.live.as_ref() {
            if !w.tx.is_closed() {
                return Ok(w.tx.clone());
            }
        }
        let predecessor = slot.live.take().map(|w| w.thread).or_else(|| slot.retiring.take());
        let (tx, rx) = mpsc::channel(self.queue_depth);
        let (exit_tx, exited) = oneshot::channel();
        let handle = DeviceHandle::new(Arc::clone(&self.source), self.state.clone(), self.io_retries);
        let spawned = std::thread::Builder::new()
            .name(format!("rng-{}", self.source.name()))
            .spawn(move || {
                let _exit = exit_tx;
                if let Some(previous) = predecessor {
                    let _ = previous.join();
                }
                run_worker(handle, rx);
            });
        let thread = spawned?;
        log::debug!("{}: worker started", self.source.name());
        slot.live = Some(Worker {
            tx: tx.clone(),
            thread,
            exited,
        });
        Ok(tx)
    }

    /// Queue `op` from synchronous code. Blocks while the queue is full.
    pub(crate) fn submit_blocking(&self, op: Op) -> Result<Ticket> {
        let (job, ticket) = Job::new(op);
        let tx = self.sender()?;
        off_runtime(move || tx.blocking_send(job)).map_err(|_| RngError::device("device worker stopped"))?;
        Ok(ticket)
    }

    /// Queue `op` from async code. Suspends while the queue is full.
    pub(crate) async fn submit(&self, op: Op) -> Result<Ticket> {
        let (job, ticket) = Job::new(op);
        let tx = self.sender()?;
        tx.send(job)
            .await
            .map_err(|_| RngError::device("device worker stopped"))?;
        Ok(ticket)
    }

    /// Detach the worker. It drains its queue, closes the handle and exits;
    /// the returned receiver resolves (with an error) once it has.
    ///
    /// A request arriving in the meantime starts a new worker that waits
    /// for the old one before touching the device.
    pub(crate) fn release(&self) -> Option<oneshot::Receiver<()>> {
        let mut slot = self.slot();
        let worker = slot.live.take()?;
        drop(worker.tx);
        slot.retiring = Some(worker.thread);
        Some(worker.exited)
    }
}

impl Drop for AccessSerializer {
    fn drop(&mut self) {
        // Let the worker exit on its own; never block in drop.
        let _ = self.release();
    }
}

fn run_worker(mut handle: DeviceHandle, mut rx: mpsc::Receiver<Job>) {
    while let Some(job) = rx.blocking_recv() {
        if !job.progress.transition(QUEUED, RUNNING) {
            log::debug!("{}: skipping withdrawn request", handle.name());
            continue;
        }
        match job.op {
            Op::Read(n) => {
                let result = handle.read(n);
                if job.progress.transition(RUNNING, DONE) {
                    let _ = job.reply.send(result);
                } else {
                    drop(result);
                    log::info!(
                        "{}: request cancelled mid-read, forcing shutdown",
                        handle.name()
                    );
                    if let Err(e) = handle.force_close() {
                        log::warn!("{}: forced shutdown failed: {e}", handle.name());
                    }
                    job.progress.set(DONE);
                    let _ = job.reply.send(Err(RngError::Cancelled));
                }
            }
            Op::Close => {
                // Closing is already the cleanup path; cancellation is moot.
                let result = handle.close().map(|()| Vec::new());
                job.progress.set(DONE);
                let _ = job.reply.send(result);
            }
        }
    }
    if let Err(e) = handle.close() {
        log::warn!("{}: close on worker exit failed: {e}", handle.name());
    }
    log::debug!("{}: worker stopped", handle.name());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::HandleState;
    use crate::source::{SourceInfo, SourceKind};
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    static SLOW_INFO: SourceInfo = SourceInfo {
        name: "slow",
        description: "sleeps before every read",
        kind: SourceKind::Software,
    };

    struct SlowSource {
        delay: Duration,
        reads: AtomicUsize,
        shutdowns: AtomicUsize,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    impl SlowSource {
        fn new(delay_ms: u64) -> Arc<Self> {
            Arc::new(Self {
                delay: Duration::from_millis(delay_ms),
                reads: AtomicUsize::new(0),
                shutdowns: AtomicUsize::new(0),
                in_flight: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            })
        }

        /// Mark one device call (read or shutdown) in progress.
        fn enter(&self) {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
        }

        fn leave(&self) {
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
        }
    }

    impl EntropySource for SlowSource {
        fn info(&self) -> &SourceInfo {
            &SLOW_INFO
        }
        fn probe(&self) -> bool {
            true
        }
        fn raw_read(&self, n_bytes: usize) -> Result<Vec<u8>> {
            self.enter();
            std::thread::sleep(self.delay);
            self.reads.fetch_add(1, Ordering::SeqCst);
            self.leave();
            Ok(vec![0xA5; n_bytes])
        }
        fn shutdown(&self) -> Result<()> {
            self.enter();
            std::thread::sleep(self.delay / 4);
            self.shutdowns.fetch_add(1, Ordering::SeqCst);
            self.leave();
            Ok(())
        }
    }

    fn serializer(src: &Arc<SlowSource>) -> AccessSerializer {
        let source: Arc<dyn EntropySource> = src.clone();
        AccessSerializer::new(source, 0, 8)
    }

    #[test]
    fn worker_starts_lazily() {
        let src = SlowSource::new(0);
        let s = serializer(&src);
        assert!(!s.has_worker());
        assert_eq!(s.submit_blocking(Op::Read(4)).unwrap().wait().unwrap(), vec![0xA5; 4]);
        assert!(s.has_worker());
        assert_eq!(s.state().get(), HandleState::Open);
    }

    #[test]
    fn tickets_complete_in_fifo_order() {
        let src = SlowSource::new(1);
        let s = serializer(&src);
        let tickets: Vec<_> = (1..=5).map(|n| s.submit_blocking(Op::Read(n)).unwrap()).collect();
        for (i, t) in tickets.into_iter().enumerate() {
            assert_eq!(t.wait().unwrap().len(), i + 1);
        }
        assert_eq!(src.reads.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn dropped_queued_ticket_never_reaches_device() {
        let src = SlowSource::new(50);
        let s = serializer(&src);
        let first = s.submit_blocking(Op::Read(1)).unwrap();
        let second = s.submit_blocking(Op::Read(1)).unwrap();
        drop(second);
        first.wait().unwrap();
        // Round-trip a close so the worker has drained the withdrawn job.
        s.submit_blocking(Op::Close).unwrap().wait().unwrap();
        assert_eq!(src.reads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn release_closes_handle_and_joins() {
        let src = SlowSource::new(0);
        let s = serializer(&src);
        s.submit_blocking(Op::Read(2)).unwrap().wait().unwrap();
        let exited = s.release().expect("worker was running");
        assert!(exited.blocking_recv().is_err());
        assert_eq!(src.shutdowns.load(Ordering::SeqCst), 1);
        assert_eq!(s.state().get(), HandleState::Closed);
        assert!(!s.has_worker());
        assert!(s.release().is_none());
    }

    #[tokio::test]
    async fn cancel_while_running_forces_shutdown() {
        let src = SlowSource::new(200);
        let s = serializer(&src);
        let cancel = CancelToken::new();
        let ticket = s.submit(Op::Read(16)).await.unwrap();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });
        let err = ticket.finish(&cancel).await.unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(src.reads.load(Ordering::SeqCst), 1);
        assert_eq!(src.shutdowns.load(Ordering::SeqCst), 1);
        assert_eq!(s.state().get(), HandleState::Closed);
    }

    #[test]
    fn replacement_worker_waits_for_released_one() {
        let src = SlowSource::new(100);
        let s = serializer(&src);
        let first = s.submit_blocking(Op::Read(1)).unwrap();
        let close = s.submit_blocking(Op::Close).unwrap();
        // Queued behind the close; still drained by the released worker.
        let late = s.submit_blocking(Op::Read(1)).unwrap();
        let exited = s.release().expect("worker was running");

        // Starts a new worker while the old one is still busy.
        let fresh = s.submit_blocking(Op::Read(1)).unwrap();
        assert!(s.has_worker());

        first.wait().unwrap();
        close.wait().unwrap();
        late.wait().unwrap();
        fresh.wait().unwrap();
        assert!(exited.blocking_recv().is_err());
        assert_eq!(src.reads.load(Ordering::SeqCst), 3);
        assert_eq!(src.peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn blocking_calls_work_inside_a_runtime() {
        let src = SlowSource::new(0);
        let s = serializer(&src);
        let data = s.submit_blocking(Op::Read(4)).unwrap().wait().unwrap();
        assert_eq!(data, vec![0xA5; 4]);
        s.submit_blocking(Op::Close).unwrap().wait().unwrap();
        assert_eq!(src.shutdowns.load(Ordering::SeqCst), 1);
    }
}
