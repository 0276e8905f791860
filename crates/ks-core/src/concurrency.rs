use crate::errors::{Error, Result};
use crossbeam_channel::{bounded, Receiver, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, Scope, ScopedJoinHandle};

/// Default number of in-flight blob operations.
pub const MAX_WORKERS: usize = 128;

/// Cancellation token. A child observes its own cancellation and that of every ancestor.
#[derive(Clone, Debug)]
pub struct Context {
    flags: Vec<Arc<AtomicBool>>,
}

impl Default for Context {
    fn default() -> Self {
        Self::background()
    }
}

impl Context {
    pub fn background() -> Self {
        Context {
            flags: vec![Arc::new(AtomicBool::new(false))],
        }
    }

    pub fn child(&self) -> Self {
        let mut flags = Vec::with_capacity(self.flags.len() + 1);
        flags.push(Arc::new(AtomicBool::new(false)));
        flags.extend(self.flags.iter().cloned());
        Context { flags }
    }

    pub fn cancel(&self) {
        if let Some(own) = self.flags.first() {
            own.store(true, Ordering::SeqCst);
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.flags.iter().any(|f| f.load(Ordering::SeqCst))
    }
}

/// Bounded pool of scoped worker threads that reports the first error.
///
/// Once any task fails the queue's context is cancelled: further calls to [`WorkerQueue::go`]
/// return without doing anything, so producers can keep iterating and drain naturally, and
/// [`WorkerQueue::wait`] surfaces the first failure.
pub struct WorkerQueue<'scope, 'env: 'scope> {
    scope: &'scope Scope<'scope, 'env>,
    ctx: Context,
    permits_tx: Sender<()>,
    permits_rx: Receiver<()>,
    first_error: Arc<Mutex<Option<Error>>>,
    handles: Mutex<Vec<ScopedJoinHandle<'scope, ()>>>,
}

impl<'scope, 'env> WorkerQueue<'scope, 'env> {
    /// Runs `body` with a fresh queue and waits for every task it enqueued.
    ///
    /// Tasks may borrow anything that outlives the call.
    pub fn scope<T, F>(ctx: &Context, max_workers: usize, body: F) -> Result<T>
    where
        F: for<'s> FnOnce(&WorkerQueue<'s, 'env>) -> Result<T>,
    {
        thread::scope(|s| {
            let queue = WorkerQueue::new(s, ctx.child(), max_workers);
            let result = body(&queue);
            if result.is_err() {
                queue.ctx.cancel();
            }
            let waited = queue.wait();
            let value = result?;
            waited.map(|_| value)
        })
    }

    fn new(scope: &'scope Scope<'scope, 'env>, ctx: Context, max_workers: usize) -> Self {
        let (permits_tx, permits_rx) = bounded(max_workers.max(1));
        WorkerQueue {
            scope,
            ctx,
            permits_tx,
            permits_rx,
            first_error: Arc::new(Mutex::new(None)),
            handles: Mutex::new(Vec::new()),
        }
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }

    /// Starts `f` on a worker, blocking while `max_workers` tasks are already running.
    pub fn go<F>(&self, f: F)
    where
        F: FnOnce() -> Result<()> + Send + 'scope,
    {
        if self.ctx.is_cancelled() {
            return;
        }
        if self.permits_tx.send(()).is_err() {
            return;
        }
        let ctx = self.ctx.clone();
        let first_error = Arc::clone(&self.first_error);
        let permits = self.permits_rx.clone();
        let handle = self.scope.spawn(move || {
            let result = if ctx.is_cancelled() {
                Err(Error::Cancelled)
            } else {
                f()
            };
            if let Err(err) = result {
                record_error(&first_error, err);
                ctx.cancel();
            }
            let _ = permits.recv();
        });
        self.handles
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(handle);
    }

    /// Joins every started task and returns the first error any of them produced.
    pub fn wait(&self) -> Result<()> {
        let handles: Vec<_> = self
            .handles
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .drain(..)
            .collect();
        for handle in handles {
            if handle.join().is_err() {
                record_error(&self.first_error, Error::other("worker thread panicked"));
            }
        }
        let first = self
            .first_error
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        match first {
            Some(err) => Err(err),
            None if self.ctx.is_cancelled() => Err(Error::Cancelled),
            None => Ok(()),
        }
    }
}

fn record_error(slot: &Mutex<Option<Error>>, err: Error) {
    let mut guard = slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    if guard.is_none() {
        *guard = Some(err);
    }
}
