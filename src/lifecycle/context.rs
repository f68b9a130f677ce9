//! Execution contexts.
//!
//! A [`Context`] is a single Tokio task that runs everything submitted to it
//! one poll at a time. Asynchronous results that must be observed "on the
//! caller's context" are delivered by submitting them here.
//!
//! The driver only holds a weak reference to its context. It stops on
//! [`Context::close`], or once every handle is dropped and the work already
//! submitted has finished.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use futures_util::stream::{FuturesUnordered, StreamExt};
use tokio::sync::{broadcast, mpsc};

/// Global atomic counters for IDs.
/// Relaxed ordering is sufficient since we only need uniqueness.
static CONTEXT_ID_COUNTER: AtomicU64 = AtomicU64::new(1);
static HOOK_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

tokio::task_local! {
    static CURRENT: Weak<ContextInner>;
}

/// Unique identifier for a context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextId(u64);

impl ContextId {
    fn next() -> Self {
        Self(CONTEXT_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ctx-{}", self.0)
    }
}

/// Handle returned by [`Context::add_close_hook`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HookId(u64);

/// Scheduling flavour of a context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextKind {
    /// Non-blocking event loop.
    EventLoop,
    /// Context allowed to run blocking work.
    Worker,
    /// Worker whose work may run on several threads at once.
    MultiThreadedWorker,
}

enum Job {
    Run(Box<dyn FnOnce() + Send>),
    Spawn(Pin<Box<dyn Future<Output = ()> + Send>>),
}

type CloseHook = Box<dyn FnOnce() + Send>;

/// Cloneable handle to an execution context.
#[derive(Clone)]
pub struct Context {
    inner: Arc<ContextInner>,
}

struct ContextInner {
    id: ContextId,
    kind: ContextKind,
    jobs: mpsc::UnboundedSender<Job>,
    shutdown: broadcast::Sender<()>,
    closed: AtomicBool,
    close_hooks: Mutex<Vec<(HookId, CloseHook)>>,
}

impl Context {
    /// Start a new context driven by a task on the current Tokio runtime.
    ///
    /// # Panics
    /// Panics when called outside a Tokio runtime, like `tokio::spawn`.
    pub fn new(kind: ContextKind) -> Self {
        let (jobs, rx) = mpsc::unbounded_channel();
        let (shutdown, _) = broadcast::channel(1);
        let ctx = Self {
            inner: Arc::new(ContextInner {
                id: ContextId::next(),
                kind,
                jobs,
                shutdown,
                closed: AtomicBool::new(false),
                close_hooks: Mutex::new(Vec::new()),
            }),
        };

        let shutdown_rx = ctx.inner.shutdown.subscribe();
        tokio::spawn(CURRENT.scope(Arc::downgrade(&ctx.inner), drive(rx, shutdown_rx)));

        tracing::trace!(context = %ctx.id(), kind = ?kind, "Context started");
        ctx
    }

    /// The context the calling code is running on, if any.
    pub fn current() -> Option<Context> {
        CURRENT
            .try_with(Weak::upgrade)
            .ok()
            .flatten()
            .map(|inner| Context { inner })
    }

    pub fn id(&self) -> ContextId {
        self.inner.id
    }

    pub fn kind(&self) -> ContextKind {
        self.inner.kind
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Run a closure on this context. Closures run in submission order.
    ///
    /// Returns `false` if the context is closed and the closure was dropped.
    pub fn execute<F>(&self, f: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        self.submit(Job::Run(Box::new(f)))
    }

    /// Drive a future on this context.
    ///
    /// Returns `false` if the context is closed and the future was dropped.
    pub fn spawn<F>(&self, fut: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.submit(Job::Spawn(Box::pin(fut)))
    }

    fn submit(&self, job: Job) -> bool {
        if self.is_closed() {
            return false;
        }
        self.inner.jobs.send(job).is_ok()
    }

    /// Register a hook that runs when this context closes.
    pub fn add_close_hook<F>(&self, hook: F) -> HookId
    where
        F: FnOnce() + Send + 'static,
    {
        let id = HookId(HOOK_ID_COUNTER.fetch_add(1, Ordering::Relaxed));
        self.inner
            .close_hooks
            .lock()
            .expect("close hook mutex poisoned")
            .push((id, Box::new(hook)));
        id
    }

    /// Remove a previously registered hook. Returns `true` if it was present.
    pub fn remove_close_hook(&self, id: HookId) -> bool {
        let mut hooks = self.inner.close_hooks.lock().expect("close hook mutex poisoned");
        let before = hooks.len();
        hooks.retain(|(hook_id, _)| *hook_id != id);
        hooks.len() != before
    }

    /// Run close hooks and stop the driver. Idempotent.
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        // Taken out first: hooks may call back into remove_close_hook.
        let hooks = std::mem::take(
            &mut *self.inner.close_hooks.lock().expect("close hook mutex poisoned"),
        );
        tracing::debug!(context = %self.id(), hooks = hooks.len(), "Closing context");
        for (_, hook) in hooks {
            hook();
        }

        let _ = self.inner.shutdown.send(());
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("id", &self.inner.id)
            .field("kind", &self.inner.kind)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl PartialEq for Context {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for Context {}

async fn drive(mut jobs: mpsc::UnboundedReceiver<Job>, mut shutdown: broadcast::Receiver<()>) {
    let mut running = FuturesUnordered::new();
    let mut accepting = true;

    loop {
        tokio::select! {
            biased;
            Ok(()) = shutdown.recv() => break,
            job = jobs.recv(), if accepting => match job {
                Some(Job::Run(f)) => f(),
                Some(Job::Spawn(fut)) => running.push(fut),
                // Every handle is gone; finish what is already running.
                None => accepting = false,
            },
            Some(()) = running.next(), if !running.is_empty() => {}
            else => break,
        }
    }

    tracing::trace!(pending = running.len(), "Context driver stopped");
}
