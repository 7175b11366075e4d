// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Fixed-size worker pool for packet sealing and `sendto` (§5).
//!
//! Each worker owns a private [`WorkerFramer`] (its own PRNG, the shared
//! private key) and a bounded per-worker queue. `add` enqueues
//! non-blockingly, round-robin by `last_scheduled++ mod N`; `wait` blocks
//! until every per-worker queue has drained. The token handler calls `wait`
//! before forwarding so the ring successor never processes a token ahead of
//! packets this processor originated during the rotation.
//!
//! Workers touch nothing but their own queue, the shared framer pool, and
//! the transport — never sort queues, timers, or membership state.

use crate::crypto::FramerPool;
use crate::identity::ProcessorId;
use crate::transport::Transport;
use crossbeam::queue::ArrayQueue;
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// One item to seal and send: a plaintext buffer (already dispatch-encoded,
/// §4.2) bound for `destination`.
pub struct WorkItem {
    pub destination: ProcessorId,
    pub plaintext: Vec<u8>,
}

/// Atomic fast-path wake notification with a condvar fallback for idle
/// wait, used by each worker's queue and by the pool's `wait()` barrier.
struct WakeNotifier {
    ready: AtomicBool,
    sleeping: Mutex<bool>,
    condvar: Condvar,
}

impl WakeNotifier {
    fn new() -> Self {
        Self {
            ready: AtomicBool::new(false),
            sleeping: Mutex::new(false),
            condvar: Condvar::new(),
        }
    }

    fn notify(&self) {
        self.ready.store(true, Ordering::Release);
        if *self.sleeping.lock() {
            self.condvar.notify_one();
        }
    }

    fn check_and_clear(&self) -> bool {
        self.ready.swap(false, Ordering::Acquire)
    }

    fn wait_timeout(&self, timeout: Duration) {
        let mut sleeping = self.sleeping.lock();
        *sleeping = true;
        let _ = self.condvar.wait_for(&mut sleeping, timeout);
        *sleeping = false;
    }
}

struct Worker {
    queue: Arc<ArrayQueue<WorkItem>>,
    notifier: Arc<WakeNotifier>,
    thread: Option<JoinHandle<()>>,
}

/// Fixed-size pool that performs only packet sealing and send.
pub struct WorkerPool {
    workers: Vec<Worker>,
    last_scheduled: AtomicUsize,
    pending: Arc<AtomicUsize>,
    pending_notifier: Arc<WakeNotifier>,
    shutdown: Arc<AtomicBool>,
}

impl WorkerPool {
    #[must_use]
    pub fn new(
        worker_count: usize,
        queue_capacity: usize,
        framer_pool: FramerPool,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let pending = Arc::new(AtomicUsize::new(0));
        let pending_notifier = Arc::new(WakeNotifier::new());
        let shutdown = Arc::new(AtomicBool::new(false));

        let workers = (0..worker_count.max(1))
            .map(|_| {
                let queue: Arc<ArrayQueue<WorkItem>> = Arc::new(ArrayQueue::new(queue_capacity.max(1)));
                let notifier = Arc::new(WakeNotifier::new());
                let thread = spawn_worker(
                    queue.clone(),
                    notifier.clone(),
                    framer_pool.worker_framer(),
                    transport.clone(),
                    pending.clone(),
                    pending_notifier.clone(),
                    shutdown.clone(),
                );
                Worker {
                    queue,
                    notifier,
                    thread: Some(thread),
                }
            })
            .collect();

        Self {
            workers,
            last_scheduled: AtomicUsize::new(0),
            pending,
            pending_notifier,
            shutdown,
        }
    }

    /// Non-blocking enqueue onto the next worker in round-robin order.
    /// Returns `Err(item)` if that worker's queue is full.
    pub fn add(&self, item: WorkItem) -> Result<(), WorkItem> {
        let idx = self.last_scheduled.fetch_add(1, Ordering::Relaxed) % self.workers.len();
        let worker = &self.workers[idx];
        self.pending.fetch_add(1, Ordering::AcqRel);
        match worker.queue.push(item) {
            Ok(()) => {
                worker.notifier.notify();
                Ok(())
            }
            Err(item) => {
                self.pending.fetch_sub(1, Ordering::AcqRel);
                Err(item)
            }
        }
    }

    /// Block until every per-worker queue has drained.
    pub fn wait(&self) {
        loop {
            if self.pending.load(Ordering::Acquire) == 0 {
                return;
            }
            self.pending_notifier.wait_timeout(Duration::from_millis(5));
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        for worker in &self.workers {
            worker.notifier.notify();
        }
        for worker in &mut self.workers {
            if let Some(handle) = worker.thread.take() {
                let _ = handle.join();
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn spawn_worker(
    queue: Arc<ArrayQueue<WorkItem>>,
    notifier: Arc<WakeNotifier>,
    framer: crate::crypto::WorkerFramer,
    transport: Arc<dyn Transport>,
    pending: Arc<AtomicUsize>,
    pending_notifier: Arc<WakeNotifier>,
    shutdown: Arc<AtomicBool>,
) -> JoinHandle<()> {
    std::thread::spawn(move || loop {
        if shutdown.load(Ordering::Acquire) && queue.is_empty() {
            return;
        }
        match queue.pop() {
            Some(item) => {
                let sealed = framer.seal(&item.plaintext);
                transport.send_to(item.destination, &sealed);
                pending.fetch_sub(1, Ordering::AcqRel);
                pending_notifier.notify();
            }
            None => {
                if notifier.check_and_clear() {
                    continue;
                }
                notifier.wait_timeout(Duration::from_millis(5));
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::test_support::RecordingTransport;
    use std::net::SocketAddr;

    fn pid(o: u8) -> ProcessorId {
        ProcessorId::new(SocketAddr::from(([10, 0, 0, o], 5405)))
    }

    #[test]
    fn add_then_wait_delivers_every_item() {
        let transport = Arc::new(RecordingTransport::default());
        let pool = WorkerPool::new(
            2,
            16,
            FramerPool::new([1u8; crate::crypto::PRIVATE_KEY_LEN]),
            transport.clone(),
        );

        for i in 0..10 {
            pool.add(WorkItem {
                destination: pid(1),
                plaintext: vec![i as u8; 4],
            })
            .unwrap();
        }
        pool.wait();

        assert_eq!(transport.sent.lock().unwrap().len(), 10);
    }

    #[test]
    fn round_robin_spreads_across_workers() {
        let transport = Arc::new(RecordingTransport::default());
        let pool = WorkerPool::new(
            2,
            4,
            FramerPool::new([2u8; crate::crypto::PRIVATE_KEY_LEN]),
            transport,
        );
        assert!(pool
            .add(WorkItem {
                destination: pid(1),
                plaintext: vec![0],
            })
            .is_ok());
        assert!(pool
            .add(WorkItem {
                destination: pid(1),
                plaintext: vec![1],
            })
            .is_ok());
        pool.wait();
    }
}
