use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

use super::fork::{fork, ForkOutputs};

/// Kept-side output of an [`OverflowBuffer`]. Receiving an item frees one
/// slot of buffer capacity.
pub struct KeptReceiver<T> {
    rx: mpsc::UnboundedReceiver<T>,
    depth: Arc<AtomicUsize>,
}

impl<T> KeptReceiver<T> {
    pub async fn recv(&mut self) -> Option<T> {
        let item = self.rx.recv().await;
        if item.is_some() {
            self.depth.fetch_sub(1, Ordering::AcqRel);
        }
        item
    }
}

/// A buffer that never blocks its producer and never grows past `capacity`:
/// while the kept queue has room, items enter it in order; once it is full,
/// new items bypass it entirely and come out of `overflow` instead. The
/// consumer of `overflow` must treat those items as having skipped the work
/// the kept side feeds.
pub struct OverflowBuffer<T> {
    pub target: mpsc::UnboundedSender<T>,
    pub source: KeptReceiver<T>,
    pub overflow: mpsc::UnboundedReceiver<T>,
    depth: Arc<AtomicUsize>,
}

impl<T: Send + 'static> OverflowBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity >= 1, "overflow buffer needs capacity >= 1");
        let depth = Arc::new(AtomicUsize::new(0));
        let (target, input) = mpsc::unbounded_channel();

        // A fork whose predicate is "the kept queue still has room". The
        // predicate admits the item by bumping the depth; the kept receiver
        // decrements it. Single-task evaluation keeps admit racing-free.
        let gate = depth.clone();
        let ForkOutputs { matched, unmatched } = fork(input, move |_| {
            if gate.load(Ordering::Acquire) < capacity {
                gate.fetch_add(1, Ordering::AcqRel);
                true
            } else {
                false
            }
        });

        Self {
            target,
            source: KeptReceiver {
                rx: matched,
                depth: depth.clone(),
            },
            overflow: unmatched,
            depth,
        }
    }

    /// Items currently waiting in the kept queue.
    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::Acquire)
    }

    /// Handle for diagnostics that outlives the buffer's parts.
    pub fn depth_gauge(&self) -> Arc<AtomicUsize> {
        self.depth.clone()
    }
}
