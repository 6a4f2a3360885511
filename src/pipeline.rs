//! Bounded work queue and worker pool for per-tile processing.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::thread;

use anyhow::{Context, Result, anyhow};
use crossbeam_channel::{Receiver, Sender, bounded};
use indicatif::ProgressBar;
use tracing::{debug, info};

use crate::pmtiles::{Archive, TileEntry};

pub const FALLBACK_THREADS: usize = 4;
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// `requested` if non-zero, else the host's parallelism.
pub fn resolve_threads(requested: usize) -> usize {
    if requested > 0 {
        return requested;
    }
    thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(FALLBACK_THREADS)
}

pub struct TileQueue;

impl TileQueue {
    pub fn bounded(capacity: usize) -> (QueueWriter, QueueReader) {
        let (sender, receiver) = bounded(capacity.max(1));
        (QueueWriter { sender }, QueueReader { receiver })
    }
}

/// Producing end. Dropping or sealing it tells readers no more work comes.
pub struct QueueWriter {
    sender: Sender<TileEntry>,
}

impl QueueWriter {
    /// Blocks while the queue is full. Returns false once every reader is gone.
    pub fn push(&self, entry: TileEntry) -> bool {
        self.sender.send(entry).is_ok()
    }

    pub fn seal(self) {}
}

#[derive(Clone)]
pub struct QueueReader {
    receiver: Receiver<TileEntry>,
}

impl QueueReader {
    /// Next entry, blocking until one arrives; `None` once sealed and empty.
    pub fn pop(&self) -> Option<TileEntry> {
        self.receiver.recv().ok()
    }
}

/// Run-wide result that absorbs one tile's partial result at a time.
pub trait TileAggregate: Send {
    type Partial: Send;

    fn merge(&mut self, tile: &TileEntry, partial: Self::Partial) -> Result<()>;
}

/// An aggregate behind one mutex plus a lock-free feature counter.
pub struct SharedAggregator<A> {
    inner: Mutex<A>,
    total_features: AtomicU64,
}

impl<A: TileAggregate> SharedAggregator<A> {
    pub fn new(inner: A) -> Self {
        Self {
            inner: Mutex::new(inner),
            total_features: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, A>> {
        self.inner
            .lock()
            .map_err(|_| anyhow!("aggregator lock poisoned"))
    }

    pub fn merge_one(&self, tile: &TileEntry, partial: A::Partial, features: u64) -> Result<()> {
        let mut guard = self.lock()?;
        self.total_features.fetch_add(features, Ordering::Relaxed);
        guard.merge(tile, partial)
    }

    pub fn snapshot(&self) -> Result<A>
    where
        A: Clone,
    {
        Ok(self.lock()?.clone())
    }

    pub fn total_features(&self) -> u64 {
        self.total_features.load(Ordering::Relaxed)
    }

    pub fn into_inner(self) -> Result<A> {
        self.inner
            .into_inner()
            .map_err(|_| anyhow!("aggregator lock poisoned"))
    }
}

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Zero means one worker per available core.
    pub threads: usize,
    pub queue_capacity: usize,
    pub progress: Option<ProgressBar>,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            threads: 0,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            progress: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineStats {
    pub threads: usize,
    pub tiles: u64,
    pub features: u64,
}

/// Fetches every tile in `tiles` on a worker pool, hands the bytes to
/// `process` and merges its `(partial, feature_count)` into `aggregator`.
///
/// The first failure stops the run: no fetch starts after it is observed,
/// the producer stops feeding the queue, and the error is returned.
pub fn run<A, P>(
    archive: &Archive,
    tiles: &[TileEntry],
    options: &PipelineOptions,
    aggregator: &SharedAggregator<A>,
    process: P,
) -> Result<PipelineStats>
where
    A: TileAggregate,
    P: Fn(&TileEntry, Vec<u8>) -> Result<(A::Partial, u64)> + Sync,
{
    let threads = resolve_threads(options.threads);
    info!(threads, tiles = tiles.len(), "using {threads} threads");

    let failed = AtomicBool::new(false);
    let first_error: Mutex<Option<anyhow::Error>> = Mutex::new(None);
    let processed = AtomicU64::new(0);

    let record = |err: anyhow::Error| {
        failed.store(true, Ordering::SeqCst);
        let mut slot = first_error
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if slot.is_none() {
            *slot = Some(err);
        }
    };

    let (writer, reader) = TileQueue::bounded(options.queue_capacity);
    thread::scope(|scope| {
        let mut handles = Vec::with_capacity(threads);
        for worker in 0..threads {
            let reader = reader.clone();
            let (record, failed, processed, process) = (&record, &failed, &processed, &process);
            let progress = options.progress.clone();
            handles.push(scope.spawn(move || {
                while let Some(entry) = reader.pop() {
                    if failed.load(Ordering::SeqCst) {
                        break;
                    }
                    debug!(worker, "processing tile {}/{}/{}", entry.zoom, entry.x, entry.y);
                    let result = archive
                        .fetch_entry(&entry)
                        .map_err(anyhow::Error::from)
                        .and_then(|bytes| process(&entry, bytes))
                        .and_then(|(partial, features)| aggregator.merge_one(&entry, partial, features))
                        .with_context(|| format!("tile {}/{}/{}", entry.zoom, entry.x, entry.y));
                    if let Err(err) = result {
                        record(err);
                        break;
                    }
                    let done = processed.fetch_add(1, Ordering::Relaxed) + 1;
                    if let Some(progress) = &progress {
                        progress.inc(1);
                    }
                    if done % 100 == 0 {
                        debug!("processed {done} tiles");
                    }
                }
            }));
        }
        drop(reader);

        for entry in tiles {
            if failed.load(Ordering::SeqCst) || !writer.push(*entry) {
                break;
            }
        }
        writer.seal();

        for handle in handles {
            if handle.join().is_err() {
                record(anyhow!("worker thread panicked"));
            }
        }
    });

    let first_error = first_error
        .into_inner()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    if let Some(err) = first_error {
        return Err(err);
    }

    Ok(PipelineStats {
        threads,
        tiles: processed.load(Ordering::Relaxed),
        features: aggregator.total_features(),
    })
}
