//! Release-time-ordered holding queue for delayed packets.
//!
//! One releaser task drains a min-heap keyed by `release_time`; any number of
//! producers may enqueue concurrently (spec §4.3 / §5). Ties — including the
//! common case of two packets on the same circuit computing the same
//! `release_time` — break by ingress sequence, which is what gives FIFO
//! ordering within a circuit at egress (spec §5).

use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{mpsc, Mutex, Notify};
use tracing::trace;

/// One packet awaiting release, generic over the payload the pipeline wants
/// carried through (typically a wrapped `SphinxPacket` plus its egress
/// destination).
#[derive(Debug)]
struct PendingItem<T> {
    payload: T,
    release_time: Instant,
    circuit_id: u64,
    seq: u64,
}

impl<T> PartialEq for PendingItem<T> {
    fn eq(&self, other: &Self) -> bool {
        self.release_time == other.release_time && self.seq == other.seq
    }
}
impl<T> Eq for PendingItem<T> {}

impl<T> PartialOrd for PendingItem<T> {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for PendingItem<T> {
    // `BinaryHeap` is a max-heap; reverse the natural order on
    // (release_time, seq) so the earliest-due, earliest-enqueued item is
    // the one popped first.
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other
            .release_time
            .cmp(&self.release_time)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Holds packets until their computed `release_time`, then emits them on
/// `receiver` in release order.
pub struct DelayScheduler<T: Send + 'static> {
    heap: Arc<Mutex<BinaryHeap<PendingItem<T>>>>,
    notify: Arc<Notify>,
    next_seq: AtomicU64,
    draining: Arc<Notify>,
}

impl<T: Send + 'static> DelayScheduler<T> {
    /// Build a scheduler and spawn its releaser task, returning the
    /// scheduler handle and the channel released packets arrive on.
    pub fn spawn(channel_capacity: usize) -> (Self, mpsc::Receiver<T>) {
        let heap: Arc<Mutex<BinaryHeap<PendingItem<T>>>> = Arc::new(Mutex::new(BinaryHeap::new()));
        let notify = Arc::new(Notify::new());
        let draining = Arc::new(Notify::new());
        let (tx, rx) = mpsc::channel(channel_capacity);

        tokio::spawn(releaser_loop(heap.clone(), notify.clone(), tx));

        (
            Self {
                heap,
                notify,
                next_seq: AtomicU64::new(0),
                draining,
            },
            rx,
        )
    }

    /// Hold `payload` until `release_time`, ordered for FIFO-within-circuit
    /// egress against any other item already queued for `circuit_id`.
    pub async fn enqueue(&self, payload: T, release_time: Instant, circuit_id: u64) {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        {
            let mut heap = self.heap.lock().await;
            heap.push(PendingItem {
                payload,
                release_time,
                circuit_id,
                seq,
            });
        }
        self.notify.notify_one();
    }

    /// Number of packets currently held, awaiting release.
    pub async fn len(&self) -> usize {
        self.heap.lock().await.len()
    }

    /// Release every held packet immediately, ignoring `release_time`, in
    /// release order. Intended for orchestrated shutdown (spec §5:
    /// "the whole scheduler can be drained (flush-all-now) on shutdown").
    pub async fn flush_all_now(&self) -> Vec<T> {
        let mut heap = self.heap.lock().await;
        let mut items: Vec<PendingItem<T>> = std::mem::take(&mut *heap).into_sorted_vec();
        // `into_sorted_vec` is ascending by `Ord`, i.e. descending by our
        // reversed comparator; reverse once more to get release order.
        items.reverse();
        self.draining.notify_waiters();
        items.into_iter().map(|item| item.payload).collect()
    }
}

async fn releaser_loop<T: Send + 'static>(
    heap: Arc<Mutex<BinaryHeap<PendingItem<T>>>>,
    notify: Arc<Notify>,
    tx: mpsc::Sender<T>,
) {
    loop {
        let next_due = {
            let heap = heap.lock().await;
            heap.peek().map(|item| item.release_time)
        };

        match next_due {
            None => notify.notified().await,
            Some(due) => {
                let now = Instant::now();
                if due > now {
                    tokio::select! {
                        _ = tokio::time::sleep(due - now) => {}
                        _ = notify.notified() => continue,
                    }
                }

                let item = {
                    let mut heap = heap.lock().await;
                    match heap.peek() {
                        Some(top) if top.release_time <= Instant::now() => heap.pop(),
                        _ => None,
                    }
                };

                if let Some(item) = item {
                    trace!(circuit_id = item.circuit_id, "releasing delayed packet");
                    if tx.send(item.payload).await.is_err() {
                        return;
                    }
                }
            }
        }
    }
}
