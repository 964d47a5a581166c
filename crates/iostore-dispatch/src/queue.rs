//! Background worker that batches, issues and completes queued reads.
//!
//! Requests move through three stages:
//!
//! 1. **Queued**: appended by [`IoQueue::enqueue`] to a locked list.
//! 2. **Pending**: [`IoQueue::issue_batch_from_queued`] swaps the list out
//!    and sends it to the worker, which wraps it in a batch and issues it.
//! 3. **Completed**: the worker completes issued batches strictly in issue
//!    order, sending their requests to the completed channel drained by
//!    [`IoQueue::dequeue`].
//!
//! Both hand-offs are `tokio` unbounded channels used from plain threads;
//! the worker parks in `blocking_recv` when it has nothing to do.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use iostore_types::{ChunkId, ReadOptions};
use parking_lot::Mutex;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, error, info, warn};

use crate::config::QueueConfig;
use crate::dispatcher::Dispatcher;
use crate::error::{DispatchError, DispatchResult};
use crate::request::{BatchHandle, CompletedRequest, RequestHandle};

/// Passed to the batch-ready callback once a batch has been completed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BatchCompletion {
    /// 1-based count of batches this queue has completed.
    pub sequence: u64,
    /// The batch's requests, in order; already on the completed channel.
    pub requests: Vec<RequestHandle>,
}

/// Invoked on the worker thread after each batch completes.
pub type BatchReadyCallback = Box<dyn Fn(&BatchCompletion) + Send + Sync>;

enum WorkerMessage {
    Batch(Vec<RequestHandle>),
    Shutdown,
}

/// Multi-producer read queue served by one dedicated worker thread.
pub struct IoQueue {
    dispatcher: Arc<Dispatcher>,
    queued: Mutex<Vec<RequestHandle>>,
    pending_tx: UnboundedSender<WorkerMessage>,
    completed_rx: Mutex<UnboundedReceiver<RequestHandle>>,
    /// Requests enqueued but not yet dequeued.
    pending: AtomicUsize,
    stopped: AtomicBool,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl IoQueue {
    /// Start a queue with the default configuration and no callback.
    pub fn new(dispatcher: Arc<Dispatcher>) -> DispatchResult<Self> {
        Self::with_config(dispatcher, &QueueConfig::default(), None)
    }

    pub fn with_callback(
        dispatcher: Arc<Dispatcher>,
        on_batch_ready: BatchReadyCallback,
    ) -> DispatchResult<Self> {
        Self::with_config(dispatcher, &QueueConfig::default(), Some(on_batch_ready))
    }

    /// Start a queue and spawn its worker thread.
    pub fn with_config(
        dispatcher: Arc<Dispatcher>,
        config: &QueueConfig,
        on_batch_ready: Option<BatchReadyCallback>,
    ) -> DispatchResult<Self> {
        let (pending_tx, pending_rx) = mpsc::unbounded_channel();
        let (completed_tx, completed_rx) = mpsc::unbounded_channel();

        let worker = Worker {
            dispatcher: Arc::clone(&dispatcher),
            pending_rx,
            completed_tx,
            on_batch_ready,
            issued: VecDeque::new(),
            completed_batches: 0,
        };
        let handle = std::thread::Builder::new()
            .name(config.thread_name.clone())
            .spawn(move || worker.run())?;
        info!(thread = %config.thread_name, "started io queue worker");

        Ok(Self {
            dispatcher,
            queued: Mutex::new(Vec::new()),
            pending_tx,
            completed_rx: Mutex::new(completed_rx),
            pending: AtomicUsize::new(0),
            stopped: AtomicBool::new(false),
            worker: Mutex::new(Some(handle)),
        })
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Queue one read. Unless `defer_batch` is set, the queued list is
    /// flushed to the worker right away.
    pub fn enqueue(
        &self,
        id: ChunkId,
        options: ReadOptions,
        user_data: u64,
        defer_batch: bool,
    ) -> DispatchResult<()> {
        if self.stopped.load(Ordering::Acquire) {
            return Err(DispatchError::QueueStopped);
        }
        let request = self.dispatcher.alloc_request(id, options, user_data);
        {
            // `stop` flips the flag under this lock, so a push that sees it
            // clear is always ahead of the shutdown message.
            let mut queued = self.queued.lock();
            if self.stopped.load(Ordering::Acquire) {
                drop(queued);
                self.dispatcher.free_request(request);
                return Err(DispatchError::QueueStopped);
            }
            self.pending.fetch_add(1, Ordering::AcqRel);
            queued.push(request);
        }
        if !defer_batch {
            self.issue_batch_from_queued()?;
        }
        Ok(())
    }

    /// Hand every queued request to the worker as one batch.
    ///
    /// Returns `false` if nothing was queued.
    pub fn issue_batch_from_queued(&self) -> DispatchResult<bool> {
        // Swap and send under one lock so flushes reach the worker in the
        // order they took their lists.
        let mut queued = self.queued.lock();
        if queued.is_empty() {
            return Ok(false);
        }
        let requests = std::mem::take(&mut *queued);
        if self.stopped.load(Ordering::Acquire) {
            drop(queued);
            self.release(requests);
            return Err(DispatchError::QueueStopped);
        }
        let count = requests.len();
        match self.pending_tx.send(WorkerMessage::Batch(requests)) {
            Ok(()) => {
                debug!(requests = count, "flushed queued requests");
                Ok(true)
            }
            Err(mpsc::error::SendError(message)) => {
                drop(queued);
                if let WorkerMessage::Batch(requests) = message {
                    self.release(requests);
                }
                Err(DispatchError::QueueStopped)
            }
        }
    }

    /// Pop one completed request without blocking.
    ///
    /// The request is freed; its id, result and user data are returned.
    pub fn dequeue(&self) -> Option<CompletedRequest> {
        loop {
            let handle = self.completed_rx.lock().try_recv().ok()?;
            self.pending.fetch_sub(1, Ordering::AcqRel);
            if let Some(request) = self.dispatcher.free_request(handle) {
                return Some(request.into());
            }
        }
    }

    /// `true` when every enqueued request has been dequeued.
    pub fn is_empty(&self) -> bool {
        self.pending_count() == 0
    }

    pub fn pending_count(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    /// Stop the worker after it has completed every batch already handed to
    /// it, and wait for it to exit. Completed requests stay dequeueable.
    pub fn stop(&self) {
        {
            // Held so no flush can slip in behind the shutdown message.
            let _queued = self.queued.lock();
            if self.stopped.swap(true, Ordering::AcqRel) {
                return;
            }
            let _ = self.pending_tx.send(WorkerMessage::Shutdown);
        }
        if let Some(handle) = self.worker.lock().take() {
            if handle.join().is_err() {
                error!("io queue worker panicked");
            }
        }
        info!("stopped io queue worker");
    }

    fn release(&self, requests: Vec<RequestHandle>) {
        for handle in requests {
            self.dispatcher.free_request(handle);
            self.pending.fetch_sub(1, Ordering::AcqRel);
        }
    }
}

impl Drop for IoQueue {
    fn drop(&mut self) {
        self.stop();
        let queued = std::mem::take(&mut *self.queued.lock());
        let mut leftover = queued.len();
        self.release(queued);
        while self.dequeue().is_some() {
            leftover += 1;
        }
        if leftover > 0 {
            debug!(leftover, "released undelivered requests");
        }
    }
}

impl std::fmt::Debug for IoQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IoQueue")
            .field("pending", &self.pending_count())
            .field("stopped", &self.stopped.load(Ordering::Relaxed))
            .finish()
    }
}

struct Worker {
    dispatcher: Arc<Dispatcher>,
    pending_rx: UnboundedReceiver<WorkerMessage>,
    completed_tx: UnboundedSender<RequestHandle>,
    on_batch_ready: Option<BatchReadyCallback>,
    issued: VecDeque<BatchHandle>,
    completed_batches: u64,
}

impl Worker {
    fn run(mut self) {
        loop {
            let message = if self.issued.is_empty() {
                match self.pending_rx.blocking_recv() {
                    Some(message) => Some(message),
                    None => break,
                }
            } else {
                match self.pending_rx.try_recv() {
                    Ok(message) => Some(message),
                    Err(TryRecvError::Empty) => None,
                    Err(TryRecvError::Disconnected) => break,
                }
            };
            match message {
                Some(WorkerMessage::Batch(requests)) => self.issue(requests),
                Some(WorkerMessage::Shutdown) => break,
                None => {}
            }
            self.complete_ready();
        }
        self.complete_ready();
        if !self.issued.is_empty() {
            warn!(batches = self.issued.len(), "worker exiting with incomplete batches");
        }
        debug!(batches = self.completed_batches, "io queue worker exiting");
    }

    fn issue(&mut self, requests: Vec<RequestHandle>) {
        let batch = self.dispatcher.alloc_batch(requests);
        match self.dispatcher.issue_batch(batch) {
            Ok(()) => self.issued.push_back(batch),
            Err(e) => error!(error = %e, "failed to issue queued batch"),
        }
    }

    /// Complete issued batches from the front while they are ready.
    fn complete_ready(&mut self) {
        while let Some(&batch) = self.issued.front() {
            match self.dispatcher.is_batch_ready(batch) {
                Ok(true) => {}
                Ok(false) => break,
                Err(e) => {
                    warn!(error = %e, "dropping issued batch");
                    self.issued.pop_front();
                    continue;
                }
            }
            self.issued.pop_front();
            let Some(requests) = self.dispatcher.detach_batch(batch) else {
                continue;
            };
            for &request in &requests {
                // The queue owns the receiver for as long as the worker runs.
                let _ = self.completed_tx.send(request);
            }
            self.completed_batches += 1;
            debug!(
                sequence = self.completed_batches,
                requests = requests.len(),
                "completed batch"
            );
            if let Some(callback) = &self.on_batch_ready {
                callback(&BatchCompletion {
                    sequence: self.completed_batches,
                    requests,
                });
            }
        }
    }
}
