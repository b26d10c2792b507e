//! Decode worker pool: background threads feeding the cache manager.
//!
//! Each worker loops:
//! 1. park on the request queue until work arrives
//! 2. skip the request if its generation went stale while it waited
//! 3. call the format reader synchronously (the long-latency part)
//! 4. send `(request, result-or-error)` back over a channel
//!
//! Reader errors and panics become error values; a worker never dies
//! because one file is bad. In-flight decodes are not interrupted on seek:
//! the generation check at merge time throws their results away.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;

use crossbeam_channel::Sender;
use log::{trace, warn};

use super::request_queue::{Request, RequestQueue, Tier};
use crate::entities::{AudioSegment, ReadError, ReadOptions, ReaderRegistry, VideoFrame};

/// Successful decode payload
#[derive(Debug, Clone)]
pub enum Decoded {
    Video(VideoFrame),
    Audio(AudioSegment),
}

/// What a worker hands back to the manager
#[derive(Debug)]
pub struct WorkerResult {
    pub request: Request,
    pub outcome: Result<Decoded, ReadError>,
}

/// Everything a worker thread needs, cloned into each thread
#[derive(Clone)]
struct WorkerContext {
    queue: Arc<RequestQueue>,
    registry: Arc<ReaderRegistry>,
    read_options: ReadOptions,
    current_generation: Arc<AtomicU64>,
    results: Sender<WorkerResult>,
}

/// Fixed-size decode pool
///
/// # Example
/// ```ignore
/// let workers = Workers::new(4, ctx...)?;
/// queue.enqueue(request);            // some worker picks it up
/// let result = results_rx.recv()?;   // manager merges it
/// ```
pub struct Workers {
    queue: Arc<RequestQueue>,
    handles: Vec<thread::JoinHandle<()>>,
    current_generation: Arc<AtomicU64>,
}

impl std::fmt::Debug for Workers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Workers")
            .field("threads", &self.handles.len())
            .field("generation", &self.current_generation())
            .finish()
    }
}

impl Workers {
    /// Spawn `num_threads` workers pulling from `queue`.
    ///
    /// # Arguments
    ///
    /// * `num_threads` - Number of worker threads (at least 1 is spawned)
    /// * `queue` - Shared request queue
    /// * `registry` - Reader table used to decode requests
    /// * `read_options` - Passed to every reader call
    /// * `generation` - Shared generation counter (owned by the cache manager)
    /// * `results` - Channel back to the manager
    pub fn new(
        num_threads: usize,
        queue: Arc<RequestQueue>,
        registry: Arc<ReaderRegistry>,
        read_options: ReadOptions,
        generation: Arc<AtomicU64>,
        results: Sender<WorkerResult>,
    ) -> std::io::Result<Self> {
        let ctx = WorkerContext {
            queue: Arc::clone(&queue),
            registry,
            read_options,
            current_generation: Arc::clone(&generation),
            results,
        };

        let mut handles = Vec::new();
        for worker_id in 0..num_threads.max(1) {
            let ctx = ctx.clone();
            let spawned = thread::Builder::new()
                .name(format!("tlcache-worker-{}", worker_id))
                .spawn(move || worker_loop(worker_id, ctx));

            match spawned {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    // Don't leave already-started threads parked forever
                    queue.shutdown();
                    return Err(e);
                }
            }
        }

        trace!("Workers initialized: {} threads", handles.len());

        Ok(Self {
            queue,
            handles,
            current_generation: generation,
        })
    }

    /// Number of worker threads
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Generation the workers currently consider fresh
    pub fn current_generation(&self) -> u64 {
        self.current_generation.load(Ordering::Acquire)
    }
}

fn worker_loop(worker_id: usize, ctx: WorkerContext) {
    trace!("Worker {} started", worker_id);

    while let Some(request) = ctx.queue.dequeue_blocking() {
        // Epoch check at execution time, not enqueue time
        if request.generation != ctx.current_generation.load(Ordering::Acquire) {
            trace!(
                "Worker {}: skip stale {:?} frame {} (gen {})",
                worker_id, request.tier, request.time, request.generation
            );
            continue;
        }

        let outcome = decode(&ctx.registry, &request, &ctx.read_options);
        if let Err(e) = &outcome {
            trace!("Worker {}: frame {} failed: {}", worker_id, request.time, e);
        }

        if ctx.results.send(WorkerResult { request, outcome }).is_err() {
            // Manager is gone
            break;
        }
    }

    trace!("Worker {} stopped", worker_id);
}

/// Run the reader for one request, turning panics into permanent errors
pub(crate) fn decode(registry: &ReaderRegistry, request: &Request, options: &ReadOptions) -> Result<Decoded, ReadError> {
    let reader = registry.reader_for(&request.source.path)?;
    let path = request.source.path.as_path();
    let local = request.source.local_frame;

    let result = catch_unwind(AssertUnwindSafe(|| match request.tier {
        Tier::Video => reader.read_video(path, local, options).map(Decoded::Video),
        Tier::Audio => reader.read_audio(path, local, options).map(Decoded::Audio),
    }));

    result.unwrap_or_else(|_| {
        warn!("Reader panicked on {} (frame {})", path.display(), local);
        Err(ReadError::Permanent(format!("reader panicked on {}", path.display())))
    })
}

impl Drop for Workers {
    fn drop(&mut self) {
        use std::time::{Duration, Instant};

        let num_threads = self.handles.len();
        trace!("Workers shutting down ({} threads)...", num_threads);

        self.queue.shutdown();

        // Workers stuck inside a slow reader can't be interrupted; don't
        // hold the caller hostage. Timeout is a safety net.
        let deadline = Instant::now() + Duration::from_millis(500);

        let handles = std::mem::take(&mut self.handles);
        for handle in handles {
            while !handle.is_finished() {
                if Instant::now() >= deadline {
                    trace!("Shutdown timeout reached, detaching remaining workers");
                    return;
                }
                thread::sleep(Duration::from_millis(1));
            }
            let _ = handle.join();
        }

        trace!("All {} workers stopped gracefully", num_threads);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{FrameIdx, MediaReader, SourceRef};
    use crate::core::request_queue::Priority;
    use crossbeam_channel::unbounded;
    use std::path::{Path, PathBuf};
    use std::time::Duration;
    use uuid::Uuid;

    struct FlakyReader;

    impl MediaReader for FlakyReader {
        fn read_video(&self, _path: &Path, frame: FrameIdx, _o: &ReadOptions) -> Result<VideoFrame, ReadError> {
            match frame {
                13 => Err(ReadError::Permanent("bad frame".into())),
                66 => panic!("decoder blew up"),
                _ => Ok(VideoFrame::placeholder(2, 2)),
            }
        }
    }

    fn request(time: FrameIdx, generation: u64) -> Request {
        Request {
            tier: Tier::Video,
            time,
            source: SourceRef {
                clip: Uuid::nil(),
                path: PathBuf::from(format!("f.{time}.flaky")),
                local_frame: time,
            },
            priority: Priority { distance: 0, behind: false },
            generation,
            attempt: 0,
        }
    }

    fn pool(threads: usize) -> (Workers, Arc<RequestQueue>, Arc<AtomicU64>, crossbeam_channel::Receiver<WorkerResult>) {
        let mut registry = ReaderRegistry::new();
        registry.register("flaky", Arc::new(FlakyReader));
        let queue = Arc::new(RequestQueue::new());
        let generation = Arc::new(AtomicU64::new(1));
        let (tx, rx) = unbounded();
        let workers = Workers::new(
            threads,
            Arc::clone(&queue),
            Arc::new(registry),
            ReadOptions::default(),
            Arc::clone(&generation),
            tx,
        )
        .unwrap();
        (workers, queue, generation, rx)
    }

    #[test]
    fn test_decodes_and_reports() {
        let (workers, queue, _gen, rx) = pool(2);
        assert_eq!(workers.len(), 2);

        for t in [1, 2, 13] {
            queue.enqueue(request(t, 1));
        }
        let mut results: Vec<WorkerResult> = (0..3)
            .map(|_| rx.recv_timeout(Duration::from_secs(5)).unwrap())
            .collect();
        results.sort_by_key(|r| r.request.time);

        assert!(matches!(results[0].outcome, Ok(Decoded::Video(_))));
        assert!(matches!(results[1].outcome, Ok(Decoded::Video(_))));
        assert_eq!(results[2].outcome.as_ref().unwrap_err(), &ReadError::Permanent("bad frame".into()));
    }

    #[test]
    fn test_panic_becomes_error() {
        let (_workers, queue, _gen, rx) = pool(1);
        queue.enqueue(request(66, 1));
        let result = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(matches!(result.outcome, Err(ReadError::Permanent(_))));

        // Worker survived the panic
        queue.enqueue(request(1, 1));
        let result = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(result.outcome.is_ok());
    }

    #[test]
    fn test_stale_generation_skipped() {
        let (_workers, queue, generation, rx) = pool(1);
        generation.store(2, Ordering::Release);
        queue.enqueue(request(1, 1));
        queue.enqueue(request(2, 2));

        let result = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(result.request.time, 2);
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
    }

    #[test]
    fn test_unknown_extension_is_unsupported() {
        let (_workers, queue, _gen, rx) = pool(1);
        let mut req = request(1, 1);
        req.source.path = PathBuf::from("movie.mov");
        queue.enqueue(req);
        let result = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(matches!(result.outcome, Err(ReadError::Unsupported(_))));
    }

    #[test]
    fn test_drop_stops_threads() {
        let (workers, queue, _gen, _rx) = pool(3);
        drop(workers);
        assert!(queue.is_shutdown());
    }
}
