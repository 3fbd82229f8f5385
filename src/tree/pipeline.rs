//! # Filter Pipeline
//!
//! Tree operations are carried out by concurrent worker threads. As tree
//! operations may be chained, a pipeline of filter stages is constructed;
//! every chained operation is reflected by one stage. Stages read node
//! packages from an input channel and put processed packages on an output
//! channel, a small pipes-and-filters design.
//!
//! ```text
//! input ──► [stage 1] ──► [stage 2] ──► … ──► results
//!              │  ▲           │  ▲
//!              ▼  │           ▼  │
//!             buffer         buffer        (optional re-scheduling queues)
//! ```
//!
//! ## Work Counter
//!
//! A pipeline-global counter tracks the number of packages alive anywhere in
//! the pipeline: in flight on a channel, queued in a stage buffer, or being
//! processed. The discipline is strict:
//!
//! - the counter is incremented *before* a package is placed on any channel,
//! - and decremented *after* a worker (or the result sink) has finished with
//!   the package it took off a channel.
//!
//! A watchdog thread waits for the counter to reach zero and then closes the
//! error channel and the front input channel. Each stage's workers observe
//! their upstream disconnecting, drain any buffer residue and exit, which in
//! turn closes that stage's output; the closure cascades stage by stage to
//! the sink. No channel is ever closed while the counter is non-zero, so an
//! emitter that has taken its counter ticket always finds its target channel
//! alive.
//!
//! ## Non-Blocking Emits
//!
//! Output and buffer channels are small and bounded. A worker never blocks
//! on a send: it tries the channel first and, if full, hands the package to
//! a detached thread that performs the blocking send. Combined with the
//! counter discipline this keeps workers deadlock-free even when every
//! channel in the chain is saturated.
//!
//! ## Ordering
//!
//! With several workers per stage, packages overtake each other in flight.
//! Each package carries a 32-bit serial; the sink reconstructs a
//! deterministic order from serials whenever the selection carries assigned
//! ranks (see the walker for the serial assignment scheme).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use eyre::Report;
use hashbrown::hash_map::Entry;
use hashbrown::HashMap;
use parking_lot::{Condvar, Mutex};
use tracing::{debug, trace};

use super::node::NodeRef;
use crate::config::{
    ERROR_CHANNEL_BOUND, MAX_STAGE_BUFFER, MAX_STAGE_WORKERS, MIN_STAGE_WORKERS,
    PIPELINE_INPUT_BOUND, STAGE_OUTPUT_BOUND,
};

/// The unit transported through a pipeline. Every stage receives packages
/// and emits packages to the next stage.
pub(crate) struct Package<T> {
    pub(crate) node: NodeRef<T>,
    /// Stage-local payload; reset when a package crosses to the next stage.
    pub(crate) local: Local<T>,
    /// Serial number of the node for ordering.
    pub(crate) serial: u32,
}

/// Stage-local data travelling alongside a buffered node.
#[derive(Clone)]
pub(crate) enum Local<T> {
    None,
    /// The position of the node below its parent at the time it was queued.
    Slot { parent: NodeRef<T>, position: usize },
}

/// The callback shape every stage executes.
///
/// Receives the package, a flag telling whether it arrived from the stage's
/// own buffer queue rather than from upstream, and the emit/buffer surface.
pub(crate) type Task<T> =
    Arc<dyn Fn(Package<T>, bool, &TaskContext<'_, T>) -> eyre::Result<()> + Send + Sync>;

/// Counts packages alive in the pipeline; provides the completion event the
/// watchdog blocks on.
pub(crate) struct WorkCounter {
    count: Mutex<u64>,
    zero: Condvar,
}

impl WorkCounter {
    fn new() -> Self {
        WorkCounter {
            count: Mutex::new(0),
            zero: Condvar::new(),
        }
    }

    /// Takes `n` tickets. Must happen before the corresponding enqueue.
    pub(crate) fn add(&self, n: u64) {
        *self.count.lock() += n;
    }

    /// Returns one ticket. Must happen after the package is fully processed.
    pub(crate) fn done(&self) {
        let mut count = self.count.lock();
        debug_assert!(*count > 0, "work counter underflow");
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.zero.notify_all();
        }
    }

    /// Blocks until the counter reaches zero.
    pub(crate) fn wait_zero(&self) {
        let mut count = self.count.lock();
        while *count > 0 {
            self.zero.wait(&mut count);
        }
    }
}

/// The part of a stage shared by its workers: the task, the downstream
/// sender, the optional buffer sender and the pipeline environment.
pub(crate) struct StageCore<T> {
    task: Task<T>,
    output: Sender<Package<T>>,
    buffer_tx: Option<Sender<Package<T>>>,
    errors: Sender<Report>,
    counter: Arc<WorkCounter>,
}

/// A task's view of the outside world while it runs.
pub(crate) struct TaskContext<'a, T> {
    core: &'a StageCore<T>,
}

impl<T: Send + Sync + 'static> TaskContext<'_, T> {
    /// Forwards a node to the next stage. The counter ticket is taken before
    /// the package touches the channel.
    pub(crate) fn emit(&self, node: NodeRef<T>, serial: u32) {
        trace!(serial, "stage emits result");
        self.core.counter.add(1);
        send_or_detach(
            &self.core.output,
            Package {
                node,
                local: Local::None,
                serial,
            },
            &self.core.counter,
        );
    }

    /// Re-queues a node into this stage's own buffer for a later visit.
    pub(crate) fn buffer(&self, node: NodeRef<T>, local: Local<T>, serial: u32) {
        trace!(serial, "stage buffers node");
        let Some(buffer_tx) = &self.core.buffer_tx else {
            debug_assert!(false, "buffering task installed on a stage without buffer");
            return;
        };
        self.core.counter.add(1);
        send_or_detach(
            buffer_tx,
            Package {
                node,
                local,
                serial,
            },
            &self.core.counter,
        );
    }
}

/// Tries a non-blocking send; a full channel moves the send onto a detached
/// thread. Channels close only once the work counter has drained and the
/// package holds a counter ticket, so the send cannot be stranded; if the
/// channel is gone regardless, the ticket is handed back.
fn send_or_detach<T: Send + Sync + 'static>(
    tx: &Sender<Package<T>>,
    pkg: Package<T>,
    counter: &Arc<WorkCounter>,
) {
    match tx.try_send(pkg) {
        Ok(()) => {}
        Err(TrySendError::Full(pkg)) => {
            let tx = tx.clone();
            let counter = counter.clone();
            thread::spawn(move || {
                if tx.send(pkg).is_err() {
                    counter.done();
                }
            });
        }
        Err(TrySendError::Disconnected(_)) => {
            debug_assert!(false, "send into a closed pipeline channel");
            counter.done();
        }
    }
}

/// Reports a task error to the pipeline error channel without blocking the
/// worker.
fn report_error(errors: &Sender<Report>, err: Report) {
    match errors.try_send(err) {
        Ok(()) => {}
        Err(TrySendError::Full(err)) => {
            let errors = errors.clone();
            thread::spawn(move || {
                let _ = errors.send(err);
            });
        }
        Err(TrySendError::Disconnected(_)) => {}
    }
}

/// A chain of filter stages connected by bounded channels.
pub(crate) struct Pipeline<T> {
    pub(crate) counter: Arc<WorkCounter>,
    /// Set once the promise has been obtained; no further stages accepted.
    promising: AtomicBool,
    /// Set once the watchdog has been started.
    running: AtomicBool,
    inner: Mutex<PipelineInner<T>>,
}

struct PipelineInner<T> {
    input_tx: Option<Sender<Package<T>>>,
    /// Output of the last stage; equals the input while no stage exists.
    results_rx: Option<Receiver<Package<T>>>,
    errors_tx: Option<Sender<Report>>,
    errors_rx: Option<Receiver<Report>>,
    stage_count: usize,
}

impl<T: Send + Sync + 'static> Pipeline<T> {
    /// Creates an empty pipeline: the results channel short-circuits to the
    /// input channel until the first stage is appended.
    pub(crate) fn new() -> Arc<Self> {
        let (input_tx, input_rx) = bounded(PIPELINE_INPUT_BOUND);
        let (errors_tx, errors_rx) = bounded(ERROR_CHANNEL_BOUND);
        Arc::new(Pipeline {
            counter: Arc::new(WorkCounter::new()),
            promising: AtomicBool::new(false),
            running: AtomicBool::new(false),
            inner: Mutex::new(PipelineInner {
                input_tx: Some(input_tx),
                results_rx: Some(input_rx),
                errors_tx: Some(errors_tx),
                errors_rx: Some(errors_rx),
                stage_count: 0,
            }),
        })
    }

    /// Has no filter stage been appended yet?
    pub(crate) fn is_empty(&self) -> bool {
        self.inner.lock().stage_count == 0
    }

    /// Marks the pipeline as promised. Returns `false` if it already was.
    pub(crate) fn enter_promise_mode(&self) -> bool {
        !self.promising.swap(true, Ordering::SeqCst)
    }

    pub(crate) fn is_promising(&self) -> bool {
        self.promising.load(Ordering::SeqCst)
    }

    /// Puts a node on the front input channel, taking a counter ticket
    /// first. The input channel is buffered, so this returns promptly.
    pub(crate) fn push(&self, node: NodeRef<T>, serial: u32) {
        let inner = self.inner.lock();
        let Some(input_tx) = &inner.input_tx else {
            return;
        };
        self.counter.add(1);
        let _ = input_tx.send(Package {
            node,
            local: Local::None,
            serial,
        });
    }

    /// Reports an error on the pipeline error channel (best effort once the
    /// watchdog has closed it).
    pub(crate) fn report(&self, err: Report) {
        let inner = self.inner.lock();
        if let Some(errors_tx) = &inner.errors_tx {
            report_error(errors_tx, err);
        }
    }

    /// Appends a filter stage: the previous results channel becomes the new
    /// stage's input, a fresh output channel becomes the pipeline's results,
    /// and the stage's worker pool is started.
    pub(crate) fn append_stage(&self, task: Task<T>, buffered: bool) {
        let mut inner = self.inner.lock();
        debug!(stage = inner.stage_count + 1, buffered, "append tree filter");

        // Both ends are present unless a promise has already claimed the
        // sink; the walker screens for that before appending.
        let Some(input) = inner.results_rx.take() else {
            return;
        };
        let Some(errors) = inner.errors_tx.clone() else {
            inner.results_rx = Some(input);
            return;
        };
        let (output_tx, output_rx) = bounded(STAGE_OUTPUT_BOUND);
        let buffer = buffered.then(|| bounded(MAX_STAGE_BUFFER));

        let core = Arc::new(StageCore {
            task,
            output: output_tx,
            buffer_tx: buffer.as_ref().map(|(tx, _)| tx.clone()),
            errors,
            counter: self.counter.clone(),
        });

        for wno in 1..=worker_pool_size() {
            let core = core.clone();
            let input = input.clone();
            let buffer_rx = buffer.as_ref().map(|(_, rx)| rx.clone());
            thread::spawn(move || match buffer_rx {
                Some(buffer_rx) => buffered_worker(wno, core, input, buffer_rx),
                None => plain_worker(wno, core, input),
            });
        }

        inner.results_rx = Some(output_rx);
        inner.stage_count += 1;
    }

    /// Starts the watchdog that closes the pipeline down once the work
    /// counter drains. Call only after the initial workload is on the input
    /// channel.
    pub(crate) fn start(self: Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let pipe = self;
        thread::spawn(move || {
            pipe.counter.wait_zero();
            debug!("pipeline drained; closing channels");
            let mut inner = pipe.inner.lock();
            inner.errors_tx.take();
            inner.input_tx.take();
            // Stage outputs and buffers close as their workers observe the
            // upstream disconnect and exit.
        });
    }

    /// Hands the result and error receivers to the promise's collector.
    pub(crate) fn take_sink(&self) -> Option<(Receiver<Package<T>>, Receiver<Report>)> {
        let mut inner = self.inner.lock();
        match (inner.results_rx.take(), inner.errors_rx.take()) {
            (Some(results), Some(errors)) => Some((results, errors)),
            _ => None,
        }
    }
}

/// Per-stage worker pool size, clamped to the configured window.
fn worker_pool_size() -> usize {
    thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(MIN_STAGE_WORKERS)
        .clamp(MIN_STAGE_WORKERS, MAX_STAGE_WORKERS)
}

/// Default worker loop for stages without a buffer queue.
fn plain_worker<T: Send + Sync + 'static>(
    wno: usize,
    core: Arc<StageCore<T>>,
    input: Receiver<Package<T>>,
) {
    let ctx = TaskContext { core: &core };
    for pkg in input.iter() {
        let serial = pkg.serial;
        if let Err(err) = (core.task)(pkg, false, &ctx) {
            report_error(&core.errors, err);
        }
        trace!(wno, serial, "stage worker finished task");
        core.counter.done();
    }
}

/// Worker loop for stages with a buffer queue: receives from either the
/// upstream input or the stage's own buffer, whichever is ready.
fn buffered_worker<T: Send + Sync + 'static>(
    wno: usize,
    core: Arc<StageCore<T>>,
    input: Receiver<Package<T>>,
    buffer_rx: Receiver<Package<T>>,
) {
    let ctx = TaskContext { core: &core };
    let run = |pkg: Package<T>, from_buffer: bool| {
        let serial = pkg.serial;
        if let Err(err) = (core.task)(pkg, from_buffer, &ctx) {
            report_error(&core.errors, err);
        }
        trace!(wno, serial, from_buffer, "stage worker finished task");
        core.counter.done();
    };
    loop {
        crossbeam_channel::select! {
            recv(input) -> msg => match msg {
                Ok(pkg) => run(pkg, false),
                Err(_) => {
                    // Upstream only closes after the counter drained, so at
                    // most residue without producers is left in the buffer.
                    while let Ok(pkg) = buffer_rx.try_recv() {
                        run(pkg, true);
                    }
                    break;
                }
            },
            recv(buffer_rx) -> msg => match msg {
                Ok(pkg) => run(pkg, true),
                Err(_) => break,
            },
        }
    }
}

/// Drains the results of the final stage into a duplicate-free selection,
/// then drains the error channel, keeping the most recent error.
///
/// The selection keeps encounter order; when any selected node carries a
/// non-zero rank, it is re-ordered by ascending serial (stable, so ties keep
/// encounter order). For duplicate node identities the last seen serial
/// wins.
pub(crate) fn wait_for_completion<T>(
    results: Receiver<Package<T>>,
    errors: Receiver<Report>,
    counter: &WorkCounter,
) -> (Vec<NodeRef<T>>, Option<Report>) {
    let mut selection: Vec<(NodeRef<T>, u32)> = Vec::new();
    let mut seen: HashMap<usize, usize> = HashMap::new();
    for pkg in results.iter() {
        let key = Arc::as_ptr(&pkg.node) as usize;
        match seen.entry(key) {
            Entry::Occupied(e) => selection[*e.get()].1 = pkg.serial,
            Entry::Vacant(e) => {
                e.insert(selection.len());
                selection.push((pkg.node, pkg.serial));
            }
        }
        counter.done();
    }
    let mut last_error = None;
    for err in errors.iter() {
        last_error = Some(err);
    }
    if selection.iter().any(|(node, _)| node.rank() > 0) {
        selection.sort_by_key(|&(_, serial)| serial);
    }
    (selection.into_iter().map(|(node, _)| node).collect(), last_error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::node::Node;

    #[test]
    fn work_counter_blocks_until_drained() {
        let counter = Arc::new(WorkCounter::new());
        counter.add(2);
        let c = counter.clone();
        let handle = thread::spawn(move || {
            c.wait_zero();
        });
        counter.done();
        assert!(!handle.is_finished());
        counter.done();
        handle.join().unwrap();
    }

    #[test]
    fn sink_collapses_duplicates_and_keeps_last_serial() {
        let (tx, rx) = bounded(8);
        let (_etx, erx) = bounded::<Report>(1);
        let counter = WorkCounter::new();
        let a = Node::new(1);
        let b = Node::new(2);
        a.set_rank(1);
        b.set_rank(1);
        counter.add(3);
        tx.send(Package { node: a.clone(), local: Local::None, serial: 9 }).unwrap();
        tx.send(Package { node: b.clone(), local: Local::None, serial: 5 }).unwrap();
        tx.send(Package { node: a.clone(), local: Local::None, serial: 2 }).unwrap();
        drop(tx);
        drop(_etx);
        let (selection, err) = wait_for_completion(rx, erx, &counter);
        assert!(err.is_none());
        assert_eq!(selection.len(), 2);
        // a's last serial (2) wins, so a sorts before b (5)
        assert!(Arc::ptr_eq(&selection[0], &a));
        assert!(Arc::ptr_eq(&selection[1], &b));
    }

    #[test]
    fn sink_keeps_encounter_order_without_ranks() {
        let (tx, rx) = bounded(8);
        let (_etx, erx) = bounded::<Report>(1);
        let counter = WorkCounter::new();
        let a = Node::new(1);
        let b = Node::new(2);
        counter.add(2);
        tx.send(Package { node: b.clone(), local: Local::None, serial: 7 }).unwrap();
        tx.send(Package { node: a.clone(), local: Local::None, serial: 1 }).unwrap();
        drop(tx);
        drop(_etx);
        let (selection, _) = wait_for_completion(rx, erx, &counter);
        assert!(Arc::ptr_eq(&selection[0], &b), "no rank, no re-ordering");
        assert!(Arc::ptr_eq(&selection[1], &a));
    }
}
