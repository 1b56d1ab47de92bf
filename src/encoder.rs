//! The encoder pool: a dynamic set of workers that compress frames taken
//! from the [`WorkQueue`] and hand the results to the [`Writer`].
//!
//! There is one worker per local thread and one per known encode server.
//! Each worker picks its [`CompressionBackend`] when it is spawned. Server
//! membership changes arrive over a [`ServerDiscovery`] subscription; a
//! watcher thread turns them into [`EncoderPool::servers_list_changed`]
//! calls. Workers for departed servers finish their current frame before
//! exiting.
//!
//! Per-frame failures land in a first-error-wins slot. The first failure
//! aborts the queue so the session drains instead of producing more work,
//! and [`EncoderPool::end`] reports it. Cancellation is one such failure:
//! the cancel flag is read on every `encode`, before every `pop` and on
//! each watcher tick.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, error, info, info_span, warn};

use crate::backend::{BackendProvider, CompressionBackend};
use crate::discovery::{ServerDescription, ServerDiscovery, ServerSetChanged};
use crate::error::{BackendError, EncodeError};
use crate::frame::{CompressedFrame, FrameKey, FrameOrigin, FrameUnit};
use crate::observability::MetricsCollector;
use crate::queue::{Popped, WorkQueue};
use crate::writer::{WriteOutcome, Writer};

const HISTORY_SIZE: usize = 64;
const WATCH_TICK: Duration = Duration::from_millis(100);
const IDLE_POLL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolSettings {
    pub local_threads: usize,
    /// Re-queues allowed per frame after transient failures.
    pub max_frame_retries: u32,
    /// Transient failures in a row before a remote worker gives up on its
    /// server.
    pub max_consecutive_failures: u32,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            local_threads: 1,
            max_frame_retries: 3,
            max_consecutive_failures: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum WorkerKind {
    Local(usize),
    Remote(ServerDescription),
}

struct WorkerEntry {
    kind: WorkerKind,
    retire: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

/// Completion timestamps of recent frames, for the encoding rate.
#[derive(Debug)]
pub struct EventHistory {
    size: usize,
    events: Mutex<VecDeque<Instant>>,
}

impl EventHistory {
    pub fn new(size: usize) -> Self {
        Self {
            size: size.max(2),
            events: Mutex::new(VecDeque::new()),
        }
    }

    pub fn record(&self) {
        self.record_at(Instant::now());
    }

    pub fn record_at(&self, at: Instant) {
        let mut events = self.events.lock().unwrap_or_else(PoisonError::into_inner);
        events.push_back(at);
        while events.len() > self.size {
            events.pop_front();
        }
    }

    /// Frames per second over the recorded window.
    pub fn rate(&self) -> Option<f64> {
        let events = self.events.lock().unwrap_or_else(PoisonError::into_inner);
        let (first, last) = (events.front()?, events.back()?);
        let span = last.duration_since(*first).as_secs_f64();
        if events.len() < 2 || span <= 0.0 {
            return None;
        }
        Some((events.len() - 1) as f64 / span)
    }
}

struct PoolShared {
    settings: PoolSettings,
    queue: WorkQueue,
    writer: Writer,
    provider: Arc<dyn BackendProvider>,
    discovery: ServerDiscovery,
    metrics: MetricsCollector,
    failure: Mutex<Option<EncodeError>>,
    cancel: Arc<AtomicBool>,
    /// Current attempt generation of every frame that has been retried.
    attempts: Mutex<BTreeMap<FrameKey, u32>>,
    workers: Mutex<Vec<WorkerEntry>>,
    live_workers: AtomicUsize,
    frames_enqueued: AtomicU64,
    history: EventHistory,
}

pub struct EncoderPool {
    shared: Arc<PoolShared>,
    watcher: Option<(Arc<AtomicBool>, JoinHandle<()>)>,
    last_origin: [Option<FrameOrigin>; 3],
    ended: bool,
}

impl EncoderPool {
    /// Snapshots the server set and spawns every worker. The queue capacity
    /// is fixed here at twice the initial worker count.
    pub fn begin(
        settings: PoolSettings,
        writer: Writer,
        discovery: ServerDiscovery,
        provider: Arc<dyn BackendProvider>,
        metrics: MetricsCollector,
    ) -> Result<Self, EncodeError> {
        let cancel = Arc::new(AtomicBool::new(false));
        Self::begin_cancellable(settings, writer, discovery, provider, metrics, cancel)
    }

    /// [`begin`](Self::begin) with a caller-owned cancel flag. Setting the
    /// flag stops the pool as if [`cancel`](Self::cancel) had been called.
    pub fn begin_cancellable(
        settings: PoolSettings,
        writer: Writer,
        discovery: ServerDiscovery,
        provider: Arc<dyn BackendProvider>,
        metrics: MetricsCollector,
        cancel: Arc<AtomicBool>,
    ) -> Result<Self, EncodeError> {
        let events = discovery.subscribe();
        let servers = discovery.servers();
        let workers = settings.local_threads + servers.len();
        if workers == 0 {
            return Err(EncodeError::NoEncoders);
        }

        let local_threads = settings.local_threads;
        let mut pool = Self {
            shared: Arc::new(PoolShared {
                settings,
                queue: WorkQueue::for_workers(workers),
                writer,
                provider,
                discovery,
                metrics,
                failure: Mutex::new(None),
                cancel,
                attempts: Mutex::new(BTreeMap::new()),
                workers: Mutex::new(Vec::with_capacity(workers)),
                live_workers: AtomicUsize::new(0),
                frames_enqueued: AtomicU64::new(0),
                history: EventHistory::new(HISTORY_SIZE),
            }),
            watcher: None,
            last_origin: [None, None, None],
            ended: false,
        };

        {
            let mut registry = pool.shared.registry();
            for thread in 0..local_threads {
                pool.shared
                    .spawn_worker(&mut registry, WorkerKind::Local(thread))?;
            }
            for server in &servers {
                pool.shared
                    .spawn_worker(&mut registry, WorkerKind::Remote(server.clone()))?;
            }
        }
        pool.watcher = Some(spawn_watcher(pool.shared.clone(), events)?);

        info!(
            local_threads,
            servers = servers.len(),
            capacity = pool.shared.queue.capacity(),
            "Encoder pool started"
        );
        Ok(pool)
    }

    /// Submits the next frame. Blocks while the queue is full.
    ///
    /// A frame whose origin matches the previous frame for the same eye is
    /// not compressed again; the writer repeats the previous picture.
    ///
    /// Returns `Cancelled` once the pool has stopped accepting work; the
    /// cause is reported by [`end`](Self::end).
    pub fn encode(&mut self, frame: FrameUnit) -> Result<(), EncodeError> {
        if self.shared.check_cancelled() || self.shared.has_failed() {
            return Err(EncodeError::Cancelled);
        }
        self.shared.frames_enqueued.fetch_add(1, Ordering::Relaxed);

        let key = frame.key();
        let slot = key.eyes.slot();
        if frame.origin.is_some() && frame.origin == self.last_origin[slot] {
            match self.shared.writer.repeat(key) {
                Ok(WriteOutcome::Duplicate) => self.shared.metrics.record_duplicate(),
                Ok(_) => {}
                Err(err) => {
                    self.shared.fail(err);
                    return Err(EncodeError::Cancelled);
                }
            }
            debug!(frame = %key, "Repeating previous picture");
            self.shared.metrics.record_repeat();
            self.shared.history.record();
            return Ok(());
        }
        self.last_origin[slot] = frame.origin.clone();

        if self.shared.live_workers.load(Ordering::SeqCst) == 0 {
            self.shared.fail(EncodeError::NoEncoders);
            return Err(EncodeError::Cancelled);
        }
        self.shared.queue.push(frame)
    }

    /// Re-reads the server set: starts workers for new servers and retires
    /// workers whose server has gone.
    pub fn servers_list_changed(&self) {
        self.shared.servers_list_changed();
    }

    /// Stops the pool: queued frames are dropped, workers finish the frame
    /// in hand and exit, and [`end`](Self::end) reports `Cancelled`.
    pub fn cancel(&self) {
        self.shared.cancel.store(true, Ordering::Release);
        self.shared.check_cancelled();
    }

    /// Workers finish their current frame and then wait.
    pub fn pause(&self) {
        info!("Pausing encoder pool");
        self.shared.queue.set_paused(true);
    }

    pub fn resume(&self) {
        info!("Resuming encoder pool");
        self.shared.queue.set_paused(false);
    }

    pub fn is_paused(&self) -> bool {
        self.shared.queue.is_paused()
    }

    /// Frames submitted through [`encode`](Self::encode) so far.
    pub fn video_frames_enqueued(&self) -> u64 {
        self.shared.frames_enqueued.load(Ordering::Relaxed)
    }

    /// Recent frames per second, once at least two frames have completed.
    pub fn current_encoding_rate(&self) -> Option<f64> {
        self.shared.history.rate()
    }

    pub fn live_workers(&self) -> usize {
        self.shared.live_workers.load(Ordering::SeqCst)
    }

    pub fn queue_capacity(&self) -> usize {
        self.shared.queue.capacity()
    }

    /// Waits for outstanding frames, shuts the queue down and joins every
    /// worker. Returns the first recorded failure, if any.
    pub fn end(mut self) -> Result<(), EncodeError> {
        self.stop_watcher();
        let shared = self.shared.clone();
        shared.queue.set_paused(false);
        while !shared.queue.wait_idle_timeout(IDLE_POLL) {
            if shared.live_workers.load(Ordering::SeqCst) == 0 {
                shared.fail(EncodeError::NoEncoders);
            }
        }
        shared.queue.shutdown();
        self.join_workers();
        self.ended = true;

        shared
            .metrics
            .record_producer_stalls(shared.queue.producer_stalls());
        if let Some(err) = shared.take_failure() {
            return Err(err);
        }
        let leftover = shared.queue.size();
        if leftover > 0 {
            return Err(EncodeError::Internal(format!(
                "{leftover} frame(s) left unconsumed after shutdown"
            )));
        }
        info!(
            frames = shared.frames_enqueued.load(Ordering::Relaxed),
            "Encoder pool finished"
        );
        Ok(())
    }

    fn stop_watcher(&mut self) {
        if let Some((stop, handle)) = self.watcher.take() {
            stop.store(true, Ordering::Release);
            let _ = handle.join();
        }
    }

    fn join_workers(&self) {
        loop {
            let entries = std::mem::take(&mut *self.shared.registry());
            if entries.is_empty() {
                return;
            }
            for entry in entries {
                if entry.handle.join().is_err() {
                    self.shared.fail(EncodeError::Internal(format!(
                        "{} worker panicked",
                        entry.kind.label()
                    )));
                }
            }
        }
    }
}

impl Drop for EncoderPool {
    fn drop(&mut self) {
        if self.ended {
            return;
        }
        self.stop_watcher();
        let discarded = self.shared.queue.abort();
        self.join_workers();
        debug!(discarded, "Encoder pool dropped before end");
    }
}

impl WorkerKind {
    fn label(&self) -> String {
        match self {
            WorkerKind::Local(thread) => format!("local thread {thread}"),
            WorkerKind::Remote(server) => format!("server {server}"),
        }
    }
}

impl PoolShared {
    fn registry(&self) -> MutexGuard<'_, Vec<WorkerEntry>> {
        self.workers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn spawn_worker(
        self: &Arc<Self>,
        registry: &mut Vec<WorkerEntry>,
        kind: WorkerKind,
    ) -> Result<(), EncodeError> {
        let backend = match &kind {
            WorkerKind::Local(thread) => self.provider.local(*thread),
            WorkerKind::Remote(server) => self.provider.remote(server),
        };
        let retire = Arc::new(AtomicBool::new(false));
        let name = format!("encode-{}", backend.name());
        let shared = Arc::clone(self);
        let flag = retire.clone();
        let worker_kind = kind.clone();

        self.live_workers.fetch_add(1, Ordering::SeqCst);
        let spawned = thread::Builder::new()
            .name(name)
            .spawn(move || shared.run_worker(backend, worker_kind, flag));
        match spawned {
            Ok(handle) => {
                debug!(worker = %kind.label(), "Spawned encode worker");
                registry.push(WorkerEntry {
                    kind,
                    retire,
                    handle,
                });
                Ok(())
            }
            Err(err) => {
                self.live_workers.fetch_sub(1, Ordering::SeqCst);
                Err(EncodeError::Internal(format!(
                    "failed to spawn {} worker: {err}",
                    kind.label()
                )))
            }
        }
    }

    fn servers_list_changed(self: &Arc<Self>) {
        let servers = self.discovery.servers();
        let wanted: HashSet<String> = servers.iter().map(|s| s.address()).collect();

        let mut registry = self.registry();
        let mut running = HashSet::new();
        let mut departed = Vec::new();
        for entry in registry.iter() {
            let WorkerKind::Remote(server) = &entry.kind else {
                continue;
            };
            if entry.retire.load(Ordering::Acquire) {
                continue;
            }
            let address = server.address();
            if wanted.contains(&address) {
                running.insert(address);
            } else {
                departed.push((address, entry.retire.clone()));
            }
        }

        // New workers first, so the live count never dips to zero while a
        // server is being swapped for another.
        for server in servers {
            if running.contains(&server.address()) {
                continue;
            }
            info!(server = %server, "Starting worker for new encode server");
            if let Err(err) = self.spawn_worker(&mut registry, WorkerKind::Remote(server)) {
                warn!(error = %err, "Could not start worker");
            }
        }
        for (address, retire) in departed {
            info!(server = %address, "Retiring worker for departed encode server");
            retire.store(true, Ordering::Release);
        }
        drop(registry);
        self.queue.wake_workers();
    }

    fn run_worker(
        self: Arc<Self>,
        mut backend: Box<dyn CompressionBackend>,
        kind: WorkerKind,
        retire: Arc<AtomicBool>,
    ) {
        let span = info_span!("encode_worker", backend = %backend.name());
        let _entered = span.enter();
        let _exit = WorkerExit { shared: &*self };
        let mut consecutive_failures = 0u32;

        loop {
            if self.check_cancelled() {
                debug!("Encode cancelled; worker exiting");
                return;
            }
            let mut frame = match self.queue.pop(&retire) {
                Popped::Frame(frame) => frame,
                Popped::Drained => {
                    debug!("Queue drained; worker exiting");
                    return;
                }
                Popped::Retired => {
                    debug!("Worker retired");
                    return;
                }
            };
            let key = frame.key();

            let result = {
                let _timer = self.metrics.start_backend(backend.name());
                backend.compress(&frame)
            };
            match result {
                Ok(compressed) => {
                    consecutive_failures = 0;
                    self.complete(compressed);
                }
                Err(BackendError::Codec(message)) => {
                    consecutive_failures = 0;
                    self.metrics.record_backend_failure(backend.name());
                    self.fail(EncodeError::Unencodable { key, message });
                    self.queue.task_done();
                }
                Err(BackendError::Transient(message)) => {
                    consecutive_failures += 1;
                    self.metrics.record_backend_failure(backend.name());
                    frame.attempt = self.next_attempt(key);
                    if frame.attempt > self.settings.max_frame_retries {
                        self.fail(EncodeError::RetriesExhausted {
                            key,
                            attempts: frame.attempt,
                            message,
                        });
                        self.queue.task_done();
                    } else {
                        warn!(
                            frame = %key,
                            attempt = frame.attempt,
                            error = %message,
                            "Re-queueing frame after transient failure"
                        );
                        self.metrics.record_retry();
                        if self.queue.requeue(frame).is_err() {
                            debug!(frame = %key, "Queue aborted; retry dropped");
                        }
                    }

                    if let WorkerKind::Remote(server) = &kind {
                        if consecutive_failures >= self.settings.max_consecutive_failures.max(1) {
                            warn!(
                                server = %server,
                                failures = consecutive_failures,
                                "Giving up on encode server"
                            );
                            retire.store(true, Ordering::Release);
                            self.discovery.mark_unreachable(&server.address());
                            return;
                        }
                    }
                }
            }
        }
    }

    fn complete(&self, compressed: CompressedFrame) {
        let key = compressed.key();
        if !self.is_current_attempt(key, compressed.attempt) {
            debug!(frame = %key, attempt = compressed.attempt, "Discarding stale attempt");
            self.metrics.record_stale_attempt();
            self.queue.task_done();
            return;
        }
        match self.writer.write(compressed) {
            Ok(WriteOutcome::Duplicate) => self.metrics.record_duplicate(),
            Ok(_) => {}
            Err(err) => self.fail(err),
        }
        self.history.record();
        self.queue.task_done();
    }

    fn is_current_attempt(&self, key: FrameKey, attempt: u32) -> bool {
        let attempts = self.attempts.lock().unwrap_or_else(PoisonError::into_inner);
        attempts.get(&key).copied().unwrap_or(0) == attempt
    }

    fn next_attempt(&self, key: FrameKey) -> u32 {
        let mut attempts = self.attempts.lock().unwrap_or_else(PoisonError::into_inner);
        let generation = attempts.entry(key).or_insert(0);
        *generation += 1;
        *generation
    }

    /// Turns a raised cancel flag into the pool's failure. Returns whether
    /// the flag is set.
    fn check_cancelled(&self) -> bool {
        if !self.cancel.load(Ordering::Acquire) {
            return false;
        }
        self.fail(EncodeError::Cancelled);
        true
    }

    fn has_failed(&self) -> bool {
        self.failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    fn take_failure(&self) -> Option<EncodeError> {
        self.failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Records `err` if it is the first failure and aborts the queue.
    fn fail(&self, err: EncodeError) {
        let mut slot = self.failure.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            debug!(error = %err, "Additional failure after the first");
            return;
        }
        if err.is_cancellation() {
            info!("Encoding cancelled; draining workers");
        } else {
            error!(error = %err, "Encoding failed; draining workers");
        }
        *slot = Some(err);
        drop(slot);
        let discarded = self.queue.abort();
        debug!(discarded, "Discarded queued frames");
    }
}

/// Keeps the live worker count honest however a worker exits.
struct WorkerExit<'a> {
    shared: &'a PoolShared,
}

impl Drop for WorkerExit<'_> {
    fn drop(&mut self) {
        if thread::panicking() {
            self.shared
                .fail(EncodeError::Internal("encode worker panicked".into()));
        }
        let remaining = self.shared.live_workers.fetch_sub(1, Ordering::SeqCst) - 1;
        debug!(remaining, "Worker stopped");
        if remaining == 0 && !self.shared.queue.is_empty() && !self.shared.queue.is_aborted() {
            self.shared.fail(EncodeError::NoEncoders);
        }
    }
}

fn spawn_watcher(
    shared: Arc<PoolShared>,
    events: Receiver<ServerSetChanged>,
) -> Result<(Arc<AtomicBool>, JoinHandle<()>), EncodeError> {
    let stop = Arc::new(AtomicBool::new(false));
    let flag = stop.clone();
    let handle = thread::Builder::new()
        .name("encode-server-watch".into())
        .spawn(move || {
            loop {
                match events.recv_timeout(WATCH_TICK) {
                    Ok(change) => {
                        if flag.load(Ordering::Acquire) {
                            return;
                        }
                        shared.check_cancelled();
                        // Every message carries the full set; only the latest matters.
                        let pending = events.try_iter().count();
                        debug!(
                            servers = change.servers.len(),
                            coalesced = pending,
                            "Server list changed"
                        );
                        shared.servers_list_changed();
                    }
                    Err(RecvTimeoutError::Timeout) => {
                        if flag.load(Ordering::Acquire) {
                            return;
                        }
                        shared.check_cancelled();
                    }
                    Err(RecvTimeoutError::Disconnected) => return,
                }
            }
        })
        .map_err(|err| EncodeError::Internal(format!("failed to spawn server watcher: {err}")))?;
    Ok((stop, handle))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{DecodedImage, Eyes};
    use crate::package::MemoryPackage;
    use crate::time::DcpTime;

    struct Echo;

    impl CompressionBackend for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        fn compress(&mut self, frame: &FrameUnit) -> Result<CompressedFrame, BackendError> {
            Ok(CompressedFrame::for_unit(
                frame,
                frame.index.to_be_bytes().to_vec(),
                Duration::ZERO,
            ))
        }
    }

    struct EchoProvider;

    impl BackendProvider for EchoProvider {
        fn local(&self, _thread: usize) -> Box<dyn CompressionBackend> {
            Box::new(Echo)
        }

        fn remote(&self, _server: &ServerDescription) -> Box<dyn CompressionBackend> {
            Box::new(Echo)
        }
    }

    fn unit(index: u64) -> FrameUnit {
        FrameUnit::new(
            index,
            Eyes::Both,
            DcpTime::from_frames(index as i64, 24.0),
            DecodedImage::black(2, 2),
        )
    }

    fn pool(writer: Writer, local_threads: usize) -> EncoderPool {
        EncoderPool::begin(
            PoolSettings {
                local_threads,
                ..PoolSettings::default()
            },
            writer,
            ServerDiscovery::new(),
            Arc::new(EchoProvider),
            MetricsCollector::new(),
        )
        .unwrap()
    }

    #[test]
    fn event_history_measures_rate() {
        let history = EventHistory::new(8);
        assert!(history.rate().is_none());
        let start = Instant::now();
        for i in 0..5 {
            history.record_at(start + Duration::from_millis(100 * i));
        }
        let rate = history.rate().unwrap();
        assert!((rate - 10.0).abs() < 1e-6);
    }

    #[test]
    fn refuses_to_start_without_encoders() {
        let writer = Writer::new(Box::new(MemoryPackage::new()), 1, false);
        let result = EncoderPool::begin(
            PoolSettings {
                local_threads: 0,
                ..PoolSettings::default()
            },
            writer,
            ServerDiscovery::new(),
            Arc::new(EchoProvider),
            MetricsCollector::new(),
        );
        assert!(matches!(result, Err(EncodeError::NoEncoders)));
    }

    #[test]
    fn encodes_every_frame_in_order() {
        let package = MemoryPackage::new();
        let writer = Writer::new(Box::new(package.clone()), 20, false);
        let mut pool = pool(writer.clone(), 3);
        assert_eq!(pool.queue_capacity(), 6);
        for index in 0..20 {
            pool.encode(unit(index)).unwrap();
        }
        assert_eq!(pool.video_frames_enqueued(), 20);
        pool.end().unwrap();
        writer.finish().unwrap();
        assert_eq!(package.indices(), (0..20).collect::<Vec<_>>());
    }

    #[test]
    fn identical_origins_are_repeated_not_encoded() {
        let package = MemoryPackage::new();
        let writer = Writer::new(Box::new(package.clone()), 4, false);
        let metrics = MetricsCollector::new();
        let mut pool = EncoderPool::begin(
            PoolSettings::default(),
            writer.clone(),
            ServerDiscovery::new(),
            Arc::new(EchoProvider),
            metrics.clone(),
        )
        .unwrap();
        let still = FrameOrigin::Content {
            id: "title".into(),
            frame: 0,
        };
        for index in 0..3 {
            pool.encode(unit(index).with_origin(still.clone())).unwrap();
        }
        pool.encode(unit(3).with_origin(FrameOrigin::Black)).unwrap();
        pool.end().unwrap();

        let summary = writer.finish().unwrap();
        assert_eq!(summary.repeats, 2);
        assert_eq!(metrics.snapshot().repeated_frames, 2);
        let data: Vec<_> = package.appends().into_iter().map(|r| r.data).collect();
        assert_eq!(data[1], data[0]);
        assert_eq!(data[2], data[0]);
        assert_eq!(data[3], 3u64.to_be_bytes().to_vec());
    }

    #[test]
    fn paused_pool_still_finishes_on_end() {
        let package = MemoryPackage::new();
        let writer = Writer::new(Box::new(package.clone()), 2, false);
        let mut pool = pool(writer.clone(), 1);
        pool.pause();
        assert!(pool.is_paused());
        pool.encode(unit(0)).unwrap();
        pool.encode(unit(1)).unwrap();
        pool.end().unwrap();
        assert_eq!(package.indices(), vec![0, 1]);
    }
}
