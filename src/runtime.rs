//! Sharded request runtime.
//!
//! [`LongOpEngine`] is synchronous and safe to call from any thread; the
//! datastore's atomic claim already keeps one actor from holding two
//! operations. This runtime adds ordering: every request for an actor is
//! routed to the same single-threaded shard, so one actor's requests execute
//! in submission order while different actors proceed in parallel.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use tracing::debug;

use crate::config::RuntimeConfig;
use crate::engine::{LongOpEngine, Request, Response};
use crate::entity::EntityKey;
use crate::error::{ExecutionError, LongOpError, LongOpResult};

enum Job {
    Execute {
        request: Request,
        reply: Sender<LongOpResult<Response>>,
    },

    #[cfg(test)]
    Sleep {
        duration: Duration,
        reply: Sender<()>,
    },
}

struct Shard {
    tx: Sender<Job>,
    worker: Option<JoinHandle<()>>,
}

impl Shard {
    fn start(index: usize, queue_capacity: usize, engine: Arc<LongOpEngine>) -> LongOpResult<Self> {
        let (tx, rx) = bounded::<Job>(queue_capacity.max(1));
        let worker = thread::Builder::new()
            .name(format!("longops-shard-{index}"))
            .spawn(move || run_shard(&rx, &engine))
            .map_err(|e| LongOpError::internal(format!("spawn shard {index}: {e}")))?;
        Ok(Self {
            tx,
            worker: Some(worker),
        })
    }
}

fn run_shard(rx: &Receiver<Job>, engine: &LongOpEngine) {
    // Exits once every sender is dropped and the queue is drained.
    while let Ok(job) = rx.recv() {
        match job {
            Job::Execute { request, reply } => {
                let _ = reply.send(engine.execute(request));
            }

            #[cfg(test)]
            Job::Sleep { duration, reply } => {
                thread::sleep(duration);
                let _ = reply.send(());
            }
        }
    }
}

/// Handle returned by [`LongOpRuntime::submit`].
pub struct ExecutionHandle {
    shard: usize,
    rx: Receiver<LongOpResult<Response>>,
}

impl ExecutionHandle {
    /// The shard executing the request.
    #[must_use]
    pub const fn shard(&self) -> usize {
        self.shard
    }

    /// Waits for the request to finish.
    pub fn join(self) -> LongOpResult<Response> {
        self.rx
            .recv()
            .map_err(|_| LongOpError::Execution(ExecutionError::Disconnected { shard: self.shard }))?
    }

    /// Waits for the request to finish, giving up after `timeout`.
    pub fn join_timeout(self, timeout: Duration) -> LongOpResult<Response> {
        self.rx.recv_timeout(timeout).map_err(|err| match err {
            RecvTimeoutError::Timeout => LongOpError::Execution(ExecutionError::Timeout {
                duration_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            }),
            RecvTimeoutError::Disconnected => {
                LongOpError::Execution(ExecutionError::Disconnected { shard: self.shard })
            }
        })?
    }
}

/// Per-actor serialized worker pool around a shared engine.
pub struct LongOpRuntime {
    engine: Arc<LongOpEngine>,
    shards: Vec<Shard>,
    queue_capacity: usize,
}

impl LongOpRuntime {
    /// Starts one worker thread per shard.
    ///
    /// # Errors
    /// `MalformedInput` for an invalid config, or an internal error if a
    /// worker thread cannot be spawned.
    pub fn new(engine: LongOpEngine, config: &RuntimeConfig) -> LongOpResult<Self> {
        config.validate()?;
        let engine = Arc::new(engine);
        let shards = (0..config.shards)
            .map(|index| Shard::start(index, config.queue_capacity, Arc::clone(&engine)))
            .collect::<LongOpResult<Vec<_>>>()?;
        debug!(shards = shards.len(), queue_capacity = config.queue_capacity, "runtime started");
        Ok(Self {
            engine,
            shards,
            queue_capacity: config.queue_capacity,
        })
    }

    /// Shard owning `actor`.
    #[must_use]
    pub fn shard_for(&self, actor: EntityKey) -> usize {
        let shards = self.shards.len().max(1) as u64;
        usize::try_from(actor.id % shards).unwrap_or(0)
    }

    /// Queues a request on its actor's shard.
    ///
    /// # Errors
    /// `QueueFull` when the shard is saturated; the request is not executed.
    pub fn submit(&self, request: Request) -> LongOpResult<ExecutionHandle> {
        let shard = self.shard_for(request.actor());
        let (reply, rx) = bounded(1);
        self.enqueue(shard, Job::Execute { request, reply })?;
        Ok(ExecutionHandle { shard, rx })
    }

    /// Submits and waits.
    pub fn execute(&self, request: Request) -> LongOpResult<Response> {
        self.submit(request)?.join()
    }

    #[must_use]
    pub fn engine(&self) -> &LongOpEngine {
        &self.engine
    }

    fn enqueue(&self, shard: usize, job: Job) -> LongOpResult<()> {
        let target = self
            .shards
            .get(shard)
            .ok_or(ExecutionError::Disconnected { shard })?;
        target.tx.try_send(job).map_err(|e| match e {
            TrySendError::Full(_) => ExecutionError::QueueFull {
                shard,
                capacity: self.queue_capacity,
            },
            TrySendError::Disconnected(_) => ExecutionError::Disconnected { shard },
        })?;
        Ok(())
    }

    #[cfg(test)]
    fn submit_sleep(&self, shard: usize, duration: Duration) -> LongOpResult<Receiver<()>> {
        let (reply, rx) = bounded(1);
        self.enqueue(shard, Job::Sleep { duration, reply })?;
        Ok(rx)
    }
}

impl Drop for LongOpRuntime {
    fn drop(&mut self) {
        // Dropping the senders lets each worker drain its queue and exit.
        let workers: Vec<JoinHandle<()>> = self
            .shards
            .drain(..)
            .filter_map(|mut shard| shard.worker.take())
            .collect();
        for worker in workers {
            let _ = worker.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::OperationKind;
    use crate::params::BeginRequest;
    use crate::storage::InMemoryDatastore;

    fn runtime(shards: usize, queue_capacity: usize) -> LongOpRuntime {
        let engine = LongOpEngine::new(Arc::new(InMemoryDatastore::new()));
        LongOpRuntime::new(engine, &RuntimeConfig { shards, queue_capacity }).unwrap()
    }

    #[test]
    fn test_actor_always_maps_to_same_shard() {
        let rt = runtime(4, 8);
        let actor = EntityKey::character(10);
        assert_eq!(rt.shard_for(actor), rt.shard_for(actor));
        assert_eq!(rt.shard_for(actor), 2);
        assert_eq!(rt.shard_for(EntityKey::character(13)), 1);
    }

    #[test]
    fn test_requests_reach_the_engine() {
        let rt = runtime(2, 8);
        let actor = EntityKey::character(1);
        let handle = rt.submit(Request::Describe { actor }).unwrap();
        assert_eq!(handle.shard(), 1);
        let err = handle.join().unwrap_err();
        assert!(err.is_user_facing());

        let polled = rt.execute(Request::Poll { actor }).unwrap();
        assert!(matches!(polled, Response::Polled(crate::engine::PollOutcome::Idle)));
    }

    #[test]
    fn test_full_queue_is_reported() {
        let rt = runtime(1, 1);
        let busy = rt.submit_sleep(0, Duration::from_millis(200)).unwrap();
        // The worker may or may not have dequeued the sleep yet; fill what's left.
        let mut saw_full = false;
        let mut pending = Vec::new();
        for _ in 0..4 {
            match rt.submit(Request::BeginTyped {
                actor: EntityKey::character(1),
                kind: OperationKind::Prototype,
                request: BeginRequest::new(5),
            }) {
                Ok(handle) => pending.push(handle),
                Err(err) => {
                    assert!(err.is_retryable());
                    assert!(matches!(err, LongOpError::Execution(ExecutionError::QueueFull { .. })));
                    saw_full = true;
                }
            }
        }
        assert!(saw_full);
        busy.recv().unwrap();
        drop(pending);
    }

    #[test]
    fn test_join_timeout() {
        let rt = runtime(1, 4);
        let _sleep = rt.submit_sleep(0, Duration::from_millis(300)).unwrap();
        let handle = rt.submit(Request::Poll { actor: EntityKey::character(3) }).unwrap();
        let err = handle.join_timeout(Duration::from_millis(10)).unwrap_err();
        assert!(matches!(err, LongOpError::Execution(ExecutionError::Timeout { .. })));
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let engine = LongOpEngine::new(Arc::new(InMemoryDatastore::new()));
        let err = LongOpRuntime::new(engine, &RuntimeConfig { shards: 0, queue_capacity: 4 }).err().expect("invalid config must be rejected");
        assert!(err.is_validation());
    }
}
