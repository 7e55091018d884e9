use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

use super::models::{ConnectionEdge, Coordinate};

/// FIFO of edges waiting for a generation job, shared by the graph builder,
/// recovery and the scheduler. A pair is queued at most once.
#[derive(Clone, Debug, Default)]
pub struct PendingQueue(Arc<Mutex<VecDeque<(Coordinate, Coordinate)>>>);

impl PendingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues the edge's pair unless it is already waiting (in either order).
    pub fn push(&self, edge: &ConnectionEdge) -> bool {
        let mut q = self.0.lock();
        if q.iter().any(|&(a, b)| edge.connects(a, b)) {
            return false;
        }
        q.push_back((edge.from, edge.to));
        true
    }

    pub fn pop(&self) -> Option<(Coordinate, Coordinate)> {
        self.0.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.0.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.lock().is_empty()
    }

    pub fn clear(&self) {
        self.0.lock().clear();
    }

    pub fn contents(&self) -> Vec<(Coordinate, Coordinate)> {
        self.0.lock().iter().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifo_and_unordered_dedupe() {
        let a = Coordinate::new(0, 64, 0);
        let b = Coordinate::new(9, 64, 0);
        let c = Coordinate::new(0, 64, 9);
        let q = PendingQueue::new();
        assert!(q.push(&ConnectionEdge::planned(a, b)));
        assert!(!q.push(&ConnectionEdge::planned(b, a)));
        assert!(q.push(&ConnectionEdge::planned(a, c)));
        assert_eq!(q.len(), 2);
        assert_eq!(q.pop(), Some((a, b)));
        assert_eq!(q.pop(), Some((a, c)));
        assert!(q.is_empty());
    }
}
