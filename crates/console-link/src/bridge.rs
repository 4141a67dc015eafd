//! Completion bridge: runs handlers on the caller's context.
//!
//! The network thread never invokes a user handler itself. It packages the
//! call as a job and pushes it onto an unbounded queue; whoever owns the
//! [`CallerQueue`] (a UI loop, a CLI main task) runs the jobs when it is
//! ready to.

use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

/// Unit of work handed to the caller context
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Create a connected bridge/queue pair.
pub fn completion_bridge() -> (CompletionBridge, CallerQueue) {
    let (tx, rx) = mpsc::unbounded_channel();
    (CompletionBridge { tx }, CallerQueue { rx })
}

/// Sending half, cloned into the network context.
#[derive(Clone)]
pub struct CompletionBridge {
    tx: mpsc::UnboundedSender<Job>,
}

impl CompletionBridge {
    /// Queue `handler(payload)` for the caller context.
    ///
    /// Never blocks. Returns `false` if the caller queue is gone, in which
    /// case the handler is dropped without running.
    pub fn deliver<T, F>(&self, handler: F, payload: T) -> bool
    where
        T: Send + 'static,
        F: FnOnce(T) + Send + 'static,
    {
        self.schedule(move || handler(payload))
    }

    /// Queue an arbitrary job for the caller context.
    pub fn schedule(&self, job: impl FnOnce() + Send + 'static) -> bool {
        match self.tx.send(Box::new(job)) {
            Ok(()) => true,
            Err(_) => {
                debug!("Caller queue closed, discarding completion");
                false
            }
        }
    }

    /// Whether the caller queue has been dropped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl fmt::Debug for CompletionBridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionBridge")
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Receiving half, owned by the caller context.
pub struct CallerQueue {
    rx: mpsc::UnboundedReceiver<Job>,
}

impl CallerQueue {
    /// Run every job queued so far without waiting. Returns how many ran.
    ///
    /// Meant to be called once per tick of the caller's own loop.
    pub fn run_pending(&mut self) -> usize {
        let mut ran = 0;
        while let Ok(job) = self.rx.try_recv() {
            job();
            ran += 1;
        }
        ran
    }

    /// Wait for the next job and run it.
    ///
    /// Returns `false` once every bridge has been dropped and the queue is
    /// empty.
    pub async fn run_next(&mut self) -> bool {
        match self.rx.recv().await {
            Some(job) => {
                job();
                true
            }
            None => false,
        }
    }

    /// Blocking variant of [`run_next`](Self::run_next) for threads outside
    /// any async runtime. Panics if called from within one.
    pub fn blocking_run_next(&mut self) -> bool {
        match self.rx.blocking_recv() {
            Some(job) => {
                job();
                true
            }
            None => false,
        }
    }

    /// Jobs waiting to run
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

impl fmt::Debug for CallerQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallerQueue")
            .field("queued", &self.len())
            .finish()
    }
}

/// Registered listener for a stream of notifications
pub type Observer<T> = Arc<dyn Fn(T) + Send + Sync + 'static>;

/// Listeners notified through the bridge, never on the network context.
pub struct Observers<T> {
    list: RwLock<Vec<Observer<T>>>,
}

impl<T: Clone + Send + 'static> Observers<T> {
    pub fn new() -> Self {
        Self {
            list: RwLock::new(Vec::new()),
        }
    }

    pub fn add(&self, observer: impl Fn(T) + Send + Sync + 'static) {
        self.list.write().push(Arc::new(observer));
    }

    /// Schedule every observer with its own copy of `value`.
    pub fn notify(&self, value: T, bridge: &CompletionBridge) {
        for observer in self.list.read().iter() {
            let observer = Arc::clone(observer);
            bridge.deliver(move |v| observer(v), value.clone());
        }
    }

    pub fn len(&self) -> usize {
        self.list.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.read().is_empty()
    }
}

impl<T: Clone + Send + 'static> Default for Observers<T> {
    fn default() -> Self {
        Self::new()
    }
}
