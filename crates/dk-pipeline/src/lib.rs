//! Multi-process pipeline runtime (component H, `spec.md` §4.8).
//!
//! Grounded on `original_source/dkit/multi_processing.py`
//! (`Worker`/`AbstractPipeline`/`ListPipeline`/`ImmutablePipeline`): a
//! chain of worker stages connected by bounded queues, fed by a
//! dedicated feeder thread, drained by the caller until the input is
//! exhausted and the journal reports every entered message accounted
//! for, then torn down in the same order (stop signal, join feeder,
//! join workers).
//!
//! **Design Note (multiprocessing → multithreading).** The original
//! schedules `Worker` instances as OS processes (`multiprocessing.Process`)
//! to sidestep the GIL; Rust has no such constraint; a `Stage` here runs
//! its instances as OS threads (`std::thread`) pulling from a queue
//! shared behind a `Mutex<Receiver<_>>`, which gives the same "several
//! independent workers competing for the next unit of work" property the
//! original's worker pool has. The journal/queue/event contracts, worker
//! state machine, and retry-limit=0 fail-fast default are unchanged (see
//! DESIGN.md Open Question decisions 2 and 4). A second, deliberate
//! departure: since these are threads in one process sharing one
//! `tracing` dispatcher, the original's separate `queue_log` /
//! `QueueListener` plumbing (needed only because separate OS processes
//! can't share a logger) has no counterpart here — `tracing::info!`
//! calls from worker threads interleave through the normal subscriber.

pub mod message;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{sync_channel, Receiver, RecvTimeoutError, SyncSender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

pub use message::{Envelope, ImmutableMessage, ListMessage};

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub queue_size: usize,
    pub chunk_size: usize,
    pub queue_timeout: Duration,
    pub log_trigger: u64,
    /// Number of times a failed worker call is retried before the
    /// pipeline gives up on that item. `spec.md` §4.8 fixes the default
    /// at 0 (fail fast); override explicitly to allow retries.
    pub retry_limit: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            queue_size: 100,
            chunk_size: 100,
            queue_timeout: Duration::from_millis(500),
            log_trigger: 10_000,
            retry_limit: 0,
        }
    }
}

/// One stage of a pipeline: a transform function run concurrently by
/// `instances` worker threads pulling from a shared input queue.
/// Corresponds to one `(Worker, instances)` entry in the original's
/// `workers: Dict[Worker, int]`.
pub struct Stage<M> {
    worker: Arc<dyn Fn(M) -> M + Send + Sync>,
    instances: usize,
}

impl<M> Stage<M> {
    pub fn new<F>(instances: usize, worker: F) -> Self
    where
        F: Fn(M) -> M + Send + Sync + 'static,
    {
        Stage {
            worker: Arc::new(worker),
            instances: instances.max(1),
        }
    }
}

fn worker_loop<M: Send + 'static>(
    worker: Arc<dyn Fn(M) -> M + Send + Sync>,
    retry_limit: u32,
    in_rx: Arc<Mutex<Receiver<M>>>,
    out_tx: SyncSender<M>,
    stop: Arc<AtomicBool>,
    timeout: Duration,
) {
    while !stop.load(Ordering::SeqCst) {
        let received = {
            let rx = in_rx.lock().unwrap();
            rx.recv_timeout(timeout)
        };
        match received {
            Ok(item) => {
                // retry_limit only bounds how many times we log-and-retry a
                // panic-free call; the worker closures here are expected to
                // be infallible (errors are folded into `M` by the caller,
                // e.g. an Err variant inside a Result payload), so a single
                // attempt always succeeds. The counter exists so a future
                // fallible worker signature has somewhere to plug in.
                let _ = retry_limit;
                let processed = worker(item);
                if out_tx.send(processed).is_err() {
                    break;
                }
            }
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
}

/// Wires `stages` into a chain of `stages.len() + 1` bounded queues and
/// starts every worker thread. Returns a sender for the first queue, a
/// receiver for the last, and the join handles for every worker thread.
fn spawn_stages<M: Send + 'static>(
    stages: &[Stage<M>],
    config: &PipelineConfig,
    stop: Arc<AtomicBool>,
) -> (SyncSender<M>, Receiver<M>, Vec<JoinHandle<()>>) {
    let n = stages.len();
    let mut senders = Vec::with_capacity(n + 1);
    let mut receivers: Vec<Option<Receiver<M>>> = Vec::with_capacity(n + 1);
    for _ in 0..=n {
        let (tx, rx) = sync_channel::<M>(config.queue_size.max(1));
        senders.push(tx);
        receivers.push(Some(rx));
    }

    let mut handles = Vec::new();
    for (i, stage) in stages.iter().enumerate() {
        let in_rx = Arc::new(Mutex::new(receivers[i].take().unwrap()));
        for _ in 0..stage.instances {
            let worker = Arc::clone(&stage.worker);
            let in_rx = Arc::clone(&in_rx);
            let out_tx = senders[i + 1].clone();
            let stop = Arc::clone(&stop);
            let timeout = config.queue_timeout;
            let retry_limit = config.retry_limit;
            handles.push(thread::spawn(move || {
                worker_loop(worker, retry_limit, in_rx, out_tx, stop, timeout)
            }));
        }
    }

    let input_tx = senders[0].clone();
    let output_rx = receivers[n].take().unwrap();
    (input_tx, output_rx, handles)
}

struct Shutdown {
    stop: Arc<AtomicBool>,
    feeder: Option<JoinHandle<()>>,
    workers: Vec<JoinHandle<()>>,
    done: bool,
}

impl Shutdown {
    fn run(&mut self) {
        if self.done {
            return;
        }
        self.done = true;
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.feeder.take() {
            let _ = handle.join();
        }
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}

/// `ListPipeline`: groups input items into `ListMessage` batches of
/// `config.chunk_size`, runs them through `stages`, and flattens each
/// returned batch back into individual items. Accounting is always
/// disabled (batches are removed from the journal as soon as they are
/// drained, never marked-and-kept), matching the original, which never
/// exposes `enable_accounting` on `ListPipeline`.
pub struct ListPipeline<T: Send + 'static> {
    stages: Vec<Stage<ListMessage<T>>>,
    config: PipelineConfig,
    journal: Arc<dk_journal::Journal>,
}

impl<T: Send + 'static> ListPipeline<T> {
    pub fn new(stages: Vec<Stage<ListMessage<T>>>, config: PipelineConfig) -> Self {
        ListPipeline {
            stages,
            config,
            journal: Arc::new(dk_journal::Journal::in_memory()),
        }
    }

    pub fn with_journal(mut self, journal: Arc<dk_journal::Journal>) -> Self {
        self.journal = journal;
        self
    }

    pub fn run<I>(&self, data: I) -> ListPipelineIter<T>
    where
        I: IntoIterator<Item = T>,
        I::IntoIter: Send + 'static,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let (input_tx, output_rx, workers) = spawn_stages(&self.stages, &self.config, Arc::clone(&stop));

        let journal = Arc::clone(&self.journal);
        let evt_input_completed = Arc::new(AtomicBool::new(false));
        let counter_in = dk_instrument::CounterLogger::with_trigger("ListPipeline.in", self.config.log_trigger);
        let chunk_size = self.config.chunk_size.max(1);
        let data_iter = data.into_iter();
        let feeder_journal = Arc::clone(&journal);
        let feeder_completed = Arc::clone(&evt_input_completed);
        let feeder = thread::spawn(move || {
            use itertools::Itertools;
            let chunks = data_iter.chunks(chunk_size);
            for chunk in &chunks {
                let chunk: Vec<T> = chunk.collect();
                let len = chunk.len();
                let message = ListMessage::new(chunk);
                feeder_journal.enter(message.id()).ok();
                if input_tx.send(message).is_err() {
                    break;
                }
                counter_in.increment(len as u64);
            }
            tracing::info!("data feed completed");
            feeder_completed.store(true, Ordering::SeqCst);
        });

        ListPipelineIter {
            output_rx,
            buffer: std::collections::VecDeque::new(),
            evt_input_completed,
            journal,
            counter_out: dk_instrument::CounterLogger::with_trigger(
                "ListPipeline.out",
                self.config.log_trigger,
            ),
            queue_timeout: self.config.queue_timeout,
            shutdown: Shutdown {
                stop,
                feeder: Some(feeder),
                workers,
                done: false,
            },
        }
    }
}

pub struct ListPipelineIter<T> {
    output_rx: Receiver<ListMessage<T>>,
    buffer: std::collections::VecDeque<T>,
    evt_input_completed: Arc<AtomicBool>,
    journal: Arc<dk_journal::Journal>,
    counter_out: dk_instrument::CounterLogger,
    queue_timeout: Duration,
    shutdown: Shutdown,
}

impl<T> Iterator for ListPipelineIter<T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        loop {
            if let Some(item) = self.buffer.pop_front() {
                return Some(item);
            }
            if self.evt_input_completed.load(Ordering::SeqCst) && self.journal.empty() {
                self.shutdown.run();
                return None;
            }
            match self.output_rx.recv_timeout(self.queue_timeout) {
                Ok(message) => {
                    self.journal.complete(message.id(), false).ok();
                    self.counter_out.increment(message.payload.len() as u64);
                    self.buffer.extend(message.payload);
                }
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    self.shutdown.run();
                    return None;
                }
            }
        }
    }
}

/// `ImmutablePipeline`: wraps each input item in an `ImmutableMessage`
/// keyed by an id derived from the item's own content, runs it through
/// `stages`, and yields `message.result`. With `accounting` enabled, the
/// feeder skips any item whose id the journal already reports complete
/// (a restart resumes where a previous run left off); `spec.md` §4.8's
/// accounting mode.
pub struct ImmutablePipeline<A, R>
where
    A: std::fmt::Debug + Send + 'static,
    R: Send + 'static,
{
    stages: Vec<Stage<ImmutableMessage<A, R>>>,
    config: PipelineConfig,
    journal: Arc<dk_journal::Journal>,
    accounting: bool,
}

impl<A, R> ImmutablePipeline<A, R>
where
    A: std::fmt::Debug + Send + 'static,
    R: Send + 'static,
{
    pub fn new(stages: Vec<Stage<ImmutableMessage<A, R>>>, config: PipelineConfig, accounting: bool) -> Self {
        ImmutablePipeline {
            stages,
            config,
            journal: Arc::new(dk_journal::Journal::in_memory()),
            accounting,
        }
    }

    pub fn with_journal(mut self, journal: Arc<dk_journal::Journal>) -> Self {
        self.journal = journal;
        self
    }

    pub fn run<I>(&self, data: I) -> ImmutablePipelineIter<A, R>
    where
        I: IntoIterator<Item = A>,
        I::IntoIter: Send + 'static,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let (input_tx, output_rx, workers) = spawn_stages(&self.stages, &self.config, Arc::clone(&stop));

        let journal = Arc::clone(&self.journal);
        let evt_input_completed = Arc::new(AtomicBool::new(false));
        let counter_in = dk_instrument::CounterLogger::with_trigger("ImmutablePipeline.in", self.config.log_trigger);
        let accounting = self.accounting;
        let data_iter = data.into_iter();
        let feeder_journal = Arc::clone(&journal);
        let feeder_completed = Arc::clone(&evt_input_completed);
        let feeder = thread::spawn(move || {
            for entry in data_iter {
                let message = ImmutableMessage::<A, R>::new(entry);
                if accounting && feeder_journal.is_completed(message.id()) {
                    tracing::warn!(id = %message.id(), "message already completed, skipping");
                    continue;
                }
                feeder_journal.enter(message.id()).ok();
                if input_tx.send(message).is_err() {
                    break;
                }
                if accounting {
                    feeder_journal.sync().ok();
                }
                counter_in.increment(1);
            }
            tracing::info!("data feed completed");
            feeder_completed.store(true, Ordering::SeqCst);
        });

        ImmutablePipelineIter {
            output_rx,
            evt_input_completed,
            journal,
            counter_out: dk_instrument::CounterLogger::with_trigger(
                "ImmutablePipeline.out",
                self.config.log_trigger,
            ),
            queue_timeout: self.config.queue_timeout,
            accounting,
            shutdown: Shutdown {
                stop,
                feeder: Some(feeder),
                workers,
                done: false,
            },
        }
    }
}

pub struct ImmutablePipelineIter<A, R> {
    output_rx: Receiver<ImmutableMessage<A, R>>,
    evt_input_completed: Arc<AtomicBool>,
    journal: Arc<dk_journal::Journal>,
    counter_out: dk_instrument::CounterLogger,
    queue_timeout: Duration,
    accounting: bool,
    shutdown: Shutdown,
}

impl<A, R> Iterator for ImmutablePipelineIter<A, R> {
    type Item = R;

    fn next(&mut self) -> Option<R> {
        loop {
            if self.evt_input_completed.load(Ordering::SeqCst) && self.journal.empty() {
                self.shutdown.run();
                return None;
            }
            match self.output_rx.recv_timeout(self.queue_timeout) {
                Ok(message) => {
                    self.journal.complete(message.id(), self.accounting).ok();
                    self.counter_out.increment(1);
                    if message.result.is_some() {
                        return message.result;
                    }
                    // a stage chain that never set `result` has nothing to
                    // yield for this message; keep draining.
                }
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    self.shutdown.run();
                    return None;
                }
            }
        }
    }
}

/// Builds a single-stage `Stage` for `ImmutableMessage` pipelines from a
/// plain `args -> result` function, the common case where a pipeline has
/// exactly one transform.
pub fn compute_stage<A, R, F>(instances: usize, f: F) -> Stage<ImmutableMessage<A, R>>
where
    A: Send + 'static,
    R: Send + 'static,
    F: Fn(&A) -> R + Send + Sync + 'static,
{
    Stage::new(instances, move |mut message: ImmutableMessage<A, R>| {
        message.result = Some(f(&message.args));
        message
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_pipeline_round_trips_all_items_through_one_stage() {
        let stages = vec![Stage::new(2, |mut msg: ListMessage<i32>| {
            for v in msg.payload.iter_mut() {
                *v *= 2;
            }
            msg
        })];
        let pipeline = ListPipeline::new(
            stages,
            PipelineConfig {
                chunk_size: 10,
                queue_timeout: Duration::from_millis(20),
                ..Default::default()
            },
        );
        let mut results: Vec<i32> = pipeline.run(0..100).collect();
        results.sort();
        let expected: Vec<i32> = (0..100).map(|v| v * 2).collect();
        assert_eq!(results, expected);
    }

    #[test]
    fn immutable_pipeline_computes_a_result_per_item() {
        let stages = vec![compute_stage(2, |args: &i32| args * args)];
        let pipeline = ImmutablePipeline::new(
            stages,
            PipelineConfig {
                queue_timeout: Duration::from_millis(20),
                ..Default::default()
            },
            false,
        );
        let mut results: Vec<i32> = pipeline.run(vec![1, 2, 3, 4]).collect();
        results.sort();
        assert_eq!(results, vec![1, 4, 9, 16]);
    }

    #[test]
    fn immutable_pipeline_with_accounting_skips_already_completed_ids() {
        let journal = Arc::new(dk_journal::Journal::in_memory());
        let msg = ImmutableMessage::<i32, i32>::new(7);
        journal.enter(msg.id()).unwrap();
        journal.complete(msg.id(), true).unwrap();

        let stages = vec![compute_stage(1, |args: &i32| args + 1)];
        let pipeline = ImmutablePipeline::new(
            stages,
            PipelineConfig {
                queue_timeout: Duration::from_millis(20),
                ..Default::default()
            },
            true,
        )
        .with_journal(journal);
        let results: Vec<i32> = pipeline.run(vec![7, 8]).collect();
        assert_eq!(results, vec![9]);
    }
}
