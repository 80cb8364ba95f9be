#![forbid(unsafe_code)]

//! Dedicated dispatch thread.
//!
//! [`DispatchThread`] owns a worker that pulls [`Notification`]s off an
//! unbounded channel and runs them in arrival order. [`DispatchQueue`] is the
//! cheap, cloneable submit side handed to registries.
//!
//! # Shutdown
//!
//! Shutdown is a message like any other, so everything submitted before it
//! still runs. Once the worker sees it, the queue is marked closed under an
//! exclusive lock and the channel is drained one last time; a submitter
//! either got its notification in before the close (and it runs) or observes
//! the closed flag (and gets [`DispatchError::Closed`]).

use std::sync::mpsc;
use std::sync::{Arc, OnceLock, PoisonError, RwLock};
use std::thread::{self, JoinHandle, ThreadId};

use tracing::{debug, warn};

use super::{
    Counters, DispatchError, DispatchStats, Dispatcher, Notification, deliver_isolated,
};

/// Default worker thread name.
const DEFAULT_THREAD_NAME: &str = "ftui-binding";

/// Configuration for a [`DispatchThread`].
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// OS-visible thread name.
    pub thread_name: String,
    /// Worker stack size in bytes (`None` = platform default).
    pub stack_size: Option<usize>,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            thread_name: DEFAULT_THREAD_NAME.to_owned(),
            stack_size: None,
        }
    }
}

impl DispatchConfig {
    /// Set the worker thread name.
    #[must_use]
    pub fn with_thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }

    /// Set the worker stack size.
    #[must_use]
    pub fn with_stack_size(mut self, bytes: usize) -> Self {
        self.stack_size = Some(bytes);
        self
    }
}

/// Messages consumed by the worker.
enum Msg {
    Notify(Notification),
    /// Acknowledge once everything queued ahead of this has run.
    Flush(mpsc::SyncSender<()>),
    Shutdown,
}

struct Shared {
    counters: Counters,
    /// `false` once the worker has begun its final drain.
    open: RwLock<bool>,
    worker: OnceLock<ThreadId>,
}

/// Submit handle for a [`DispatchThread`].
///
/// Clones feed the same worker.
#[derive(Clone)]
pub struct DispatchQueue {
    sender: mpsc::Sender<Msg>,
    shared: Arc<Shared>,
}

impl DispatchQueue {
    /// Queue a notification, reporting whether the worker accepted it.
    pub fn try_submit(&self, notification: Notification) -> Result<(), DispatchError> {
        let open = self.shared.open.read().unwrap_or_else(PoisonError::into_inner);
        if !*open {
            self.shared.counters.rejected();
            return Err(DispatchError::Closed);
        }
        self.shared.counters.accepted();
        if self.sender.send(Msg::Notify(notification)).is_err() {
            self.shared.counters.unaccepted();
            self.shared.counters.rejected();
            return Err(DispatchError::Closed);
        }
        Ok(())
    }

    /// Block until every notification submitted before this call has run.
    ///
    /// Returns [`DispatchError::FlushOnDispatchThread`] when called from a
    /// listener, and [`DispatchError::Closed`] if the worker is gone.
    pub fn flush(&self) -> Result<(), DispatchError> {
        if self.is_dispatch_thread() {
            return Err(DispatchError::FlushOnDispatchThread);
        }
        let (ack_tx, ack_rx) = mpsc::sync_channel(1);
        self.sender
            .send(Msg::Flush(ack_tx))
            .map_err(|_| DispatchError::Closed)?;
        // A flush stranded behind shutdown has its sender dropped with the
        // channel, which wakes us with an error.
        ack_rx.recv().map_err(|_| DispatchError::Closed)
    }

    /// Whether the current thread is this queue's worker.
    #[must_use]
    pub fn is_dispatch_thread(&self) -> bool {
        self.shared.worker.get() == Some(&thread::current().id())
    }

    /// Whether the worker still accepts notifications.
    #[must_use]
    pub fn is_open(&self) -> bool {
        *self.shared.open.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current counters.
    #[must_use]
    pub fn stats(&self) -> DispatchStats {
        self.shared.counters.snapshot()
    }
}

impl Dispatcher for DispatchQueue {
    fn submit(&self, notification: Notification) {
        let seq = notification.seq();
        if let Err(err) = self.try_submit(notification) {
            warn!(seq, %err, "change notification rejected");
        }
    }
}

impl std::fmt::Debug for DispatchQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchQueue")
            .field("open", &self.is_open())
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

/// Owner of the dispatch worker. Dropping it shuts the worker down after the
/// queued notifications have run.
pub struct DispatchThread {
    queue: DispatchQueue,
    handle: Option<JoinHandle<()>>,
}

impl DispatchThread {
    /// Start a worker.
    pub fn spawn(config: DispatchConfig) -> Result<Self, DispatchError> {
        let (sender, receiver) = mpsc::channel::<Msg>();
        let shared = Arc::new(Shared {
            counters: Counters::default(),
            open: RwLock::new(true),
            worker: OnceLock::new(),
        });

        let mut builder = thread::Builder::new().name(config.thread_name.clone());
        if let Some(bytes) = config.stack_size {
            builder = builder.stack_size(bytes);
        }
        let worker_shared = Arc::clone(&shared);
        let handle = builder
            .spawn(move || dispatch_loop(receiver, worker_shared))
            .map_err(DispatchError::Spawn)?;
        let _ = shared.worker.set(handle.thread().id());

        debug!(thread = %config.thread_name, "dispatch thread started");
        Ok(Self {
            queue: DispatchQueue { sender, shared },
            handle: Some(handle),
        })
    }

    /// A submit handle for this worker.
    #[must_use]
    pub fn queue(&self) -> DispatchQueue {
        self.queue.clone()
    }

    /// See [`DispatchQueue::flush`].
    pub fn flush(&self) -> Result<(), DispatchError> {
        self.queue.flush()
    }

    /// Current counters.
    #[must_use]
    pub fn stats(&self) -> DispatchStats {
        self.queue.stats()
    }

    /// Run everything already queued, then stop the worker and join it.
    pub fn shutdown(mut self) {
        self.stop();
    }

    /// Let the worker outlive this handle. It keeps running until every
    /// [`DispatchQueue`] clone is dropped.
    #[must_use]
    pub fn detach(mut self) -> DispatchQueue {
        self.handle.take();
        self.queue.clone()
    }

    fn stop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        let _ = self.queue.sender.send(Msg::Shutdown);
        if handle.join().is_err() {
            warn!("dispatch thread terminated abnormally");
        }
    }
}

impl Drop for DispatchThread {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for DispatchThread {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchThread")
            .field("queue", &self.queue)
            .field("running", &self.handle.is_some())
            .finish()
    }
}

fn dispatch_loop(receiver: mpsc::Receiver<Msg>, shared: Arc<Shared>) {
    loop {
        match receiver.recv() {
            Ok(Msg::Notify(notification)) => deliver_isolated(notification, &shared.counters),
            Ok(Msg::Flush(ack)) => {
                let _ = ack.send(());
            }
            Ok(Msg::Shutdown) => break,
            // Every queue handle is gone; nothing can arrive anymore.
            Err(_) => {
                debug!("dispatch queue disconnected");
                return;
            }
        }
    }

    // Close under the exclusive lock: any submitter that saw `open == true`
    // has finished its send by the time we hold it.
    *shared.open.write().unwrap_or_else(PoisonError::into_inner) = false;
    let mut drained = 0_u64;
    while let Ok(msg) = receiver.try_recv() {
        match msg {
            Msg::Notify(notification) => {
                drained += 1;
                deliver_isolated(notification, &shared.counters);
            }
            Msg::Flush(ack) => {
                let _ = ack.send(());
            }
            Msg::Shutdown => {}
        }
    }
    debug!(drained, stats = ?shared.counters.snapshot(), "dispatch thread stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listener::data_listener;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn recorder(log: &Arc<Mutex<Vec<usize>>>, tag: usize) -> Notification {
        let log = Arc::clone(log);
        Notification::new(data_listener(move || log.lock().unwrap().push(tag)))
    }

    #[test]
    fn start_and_shutdown() {
        let dt = DispatchThread::spawn(DispatchConfig::default()).unwrap();
        dt.shutdown();
    }

    #[test]
    fn runs_in_submission_order() {
        let dt = DispatchThread::spawn(DispatchConfig::default()).unwrap();
        let queue = dt.queue();
        let log = Arc::new(Mutex::new(Vec::new()));

        for tag in 0..100 {
            queue.submit(recorder(&log, tag));
        }
        dt.flush().unwrap();

        assert_eq!(*log.lock().unwrap(), (0..100).collect::<Vec<_>>());
        assert_eq!(dt.stats().executed, 100);
    }

    #[test]
    fn listeners_run_on_worker_thread() {
        let config = DispatchConfig::default().with_thread_name("binding-test");
        let dt = DispatchThread::spawn(config).unwrap();
        let seen = Arc::new(Mutex::new(None));
        let seen_clone = Arc::clone(&seen);
        dt.queue().submit(Notification::new(data_listener(move || {
            *seen_clone.lock().unwrap() = thread::current().name().map(str::to_owned);
        })));
        dt.flush().unwrap();

        assert_eq!(seen.lock().unwrap().as_deref(), Some("binding-test"));
    }

    #[test]
    fn shutdown_runs_queued_work() {
        let dt = DispatchThread::spawn(DispatchConfig::default()).unwrap();
        let queue = dt.queue();
        let hits = Arc::new(AtomicUsize::new(0));
        for _ in 0..50 {
            let hits = Arc::clone(&hits);
            queue.submit(Notification::new(data_listener(move || {
                hits.fetch_add(1, Ordering::SeqCst);
            })));
        }
        dt.shutdown();

        assert_eq!(hits.load(Ordering::SeqCst), 50);
    }

    #[test]
    fn submit_after_shutdown_is_rejected() {
        let dt = DispatchThread::spawn(DispatchConfig::default()).unwrap();
        let queue = dt.queue();
        dt.shutdown();

        assert!(!queue.is_open());
        assert!(matches!(
            queue.try_submit(Notification::new(data_listener(|| {}))),
            Err(DispatchError::Closed)
        ));
        queue.submit(Notification::new(data_listener(|| {})));
        assert_eq!(queue.stats().rejected, 2);
        assert!(matches!(queue.flush(), Err(DispatchError::Closed)));
    }

    #[test]
    fn panicking_listener_does_not_stop_worker() {
        let dt = DispatchThread::spawn(DispatchConfig::default()).unwrap();
        let queue = dt.queue();
        let log = Arc::new(Mutex::new(Vec::new()));

        queue.submit(recorder(&log, 1));
        queue.submit(Notification::new(data_listener(|| {
            panic!("listener failure")
        })));
        queue.submit(recorder(&log, 2));
        dt.flush().unwrap();

        assert_eq!(*log.lock().unwrap(), vec![1, 2]);
        let stats = dt.stats();
        assert_eq!(stats.panicked, 1);
        assert_eq!(stats.executed, 2);
    }

    #[test]
    fn flush_from_listener_is_refused() {
        let dt = DispatchThread::spawn(DispatchConfig::default()).unwrap();
        let queue = dt.queue();
        let result = Arc::new(Mutex::new(None));

        let inner_queue = queue.clone();
        let result_clone = Arc::clone(&result);
        queue.submit(Notification::new(data_listener(move || {
            *result_clone.lock().unwrap() = Some(inner_queue.flush());
        })));
        dt.flush().unwrap();

        assert!(matches!(
            result.lock().unwrap().take(),
            Some(Err(DispatchError::FlushOnDispatchThread))
        ));
    }

    #[test]
    fn listener_may_submit_more_work() {
        let dt = DispatchThread::spawn(DispatchConfig::default()).unwrap();
        let queue = dt.queue();
        let log = Arc::new(Mutex::new(Vec::new()));

        let follow_up = recorder(&log, 2);
        let slot = Mutex::new(Some(follow_up));
        let inner_queue = queue.clone();
        let log_clone = Arc::clone(&log);
        queue.submit(Notification::new(data_listener(move || {
            log_clone.lock().unwrap().push(1);
            if let Some(next) = slot.lock().unwrap().take() {
                inner_queue.submit(next);
            }
        })));
        dt.flush().unwrap();
        // The follow-up was queued behind the first flush marker.
        dt.flush().unwrap();

        assert_eq!(*log.lock().unwrap(), vec![1, 2]);
    }

    #[test]
    fn detached_worker_keeps_running() {
        let dt = DispatchThread::spawn(DispatchConfig::default()).unwrap();
        let queue = dt.detach();
        let hits = Arc::new(AtomicUsize::new(0));
        let hits_clone = Arc::clone(&hits);
        queue.submit(Notification::new(data_listener(move || {
            hits_clone.fetch_add(1, Ordering::SeqCst);
        })));
        queue.flush().unwrap();

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(queue.is_open());
    }

    #[test]
    fn concurrent_submitters_lose_nothing() {
        let dt = DispatchThread::spawn(DispatchConfig::default()).unwrap();
        let hits = Arc::new(AtomicUsize::new(0));

        let workers: Vec<_> = (0..8)
            .map(|_| {
                let queue = dt.queue();
                let hits = Arc::clone(&hits);
                thread::spawn(move || {
                    for _ in 0..250 {
                        let hits = Arc::clone(&hits);
                        queue.submit(Notification::new(data_listener(move || {
                            hits.fetch_add(1, Ordering::SeqCst);
                        })));
                    }
                })
            })
            .collect();
        for w in workers {
            w.join().unwrap();
        }
        dt.flush().unwrap();

        assert_eq!(hits.load(Ordering::SeqCst), 2000);
        assert_eq!(dt.stats().submitted, 2000);
    }

    #[test]
    fn config_builders() {
        let config = DispatchConfig::default()
            .with_thread_name("ui")
            .with_stack_size(256 * 1024);
        assert_eq!(config.thread_name, "ui");
        assert_eq!(config.stack_size, Some(256 * 1024));
        assert_eq!(DispatchConfig::default().thread_name, DEFAULT_THREAD_NAME);
    }
}
