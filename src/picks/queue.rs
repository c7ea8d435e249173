//! Bounded tick-request queue with drop-oldest back-pressure.
//!
//! The aggregator pushes, the dispatcher pops. On overflow the oldest
//! non-terminal request is shed; terminal requests always survive so the
//! event log is always closed.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use tokio::sync::Notify;

use crate::types::TickRequest;

pub struct TickQueue {
    inner: Mutex<VecDeque<TickRequest>>,
    notify: Notify,
    capacity: usize,
    pub dropped: AtomicU64,
}

impl TickQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(VecDeque::with_capacity(capacity)),
            notify: Notify::new(),
            capacity,
            dropped: AtomicU64::new(0),
        }
    }

    /// Enqueue a request, shedding the oldest non-terminal one when full.
    pub fn push(&self, request: TickRequest) {
        {
            let mut queue = self
                .inner
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            if queue.len() >= self.capacity {
                if let Some(victim) = queue.iter().position(|r| !r.terminal) {
                    let _ = queue.remove(victim);
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                } else if !request.terminal {
                    // Queue full of terminal requests; shed the newcomer.
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                    return;
                }
            }
            queue.push_back(request);
        }
        self.notify.notify_one();
    }

    /// Await the next request.
    pub async fn pop(&self) -> TickRequest {
        loop {
            if let Some(request) = self
                .inner
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .pop_front()
            {
                return request;
            }
            self.notify.notified().await;
        }
    }

    /// Non-blocking pop (drain on shutdown, tests).
    pub fn try_pop(&self) -> Option<TickRequest> {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .pop_front()
    }

    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(tick_index: u32, terminal: bool) -> TickRequest {
        TickRequest {
            event_id: 1,
            tick_index,
            wave_end_time: 0.0,
            station_pick_order: Vec::new(),
            terminal,
        }
    }

    #[test]
    fn overflow_sheds_oldest_non_terminal() {
        let queue = TickQueue::new(3);
        queue.push(request(1, false));
        queue.push(request(2, true));
        queue.push(request(3, false));
        queue.push(request(4, false));

        assert_eq!(queue.dropped.load(Ordering::Relaxed), 1);
        let order: Vec<u32> = std::iter::from_fn(|| queue.try_pop())
            .map(|r| r.tick_index)
            .collect();
        // Tick 1 (oldest non-terminal) was shed; the terminal tick survived.
        assert_eq!(order, [2, 3, 4]);
    }

    #[tokio::test]
    async fn pop_wakes_on_push() {
        let queue = std::sync::Arc::new(TickQueue::new(2));
        let popper = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.pop().await.tick_index })
        };
        tokio::task::yield_now().await;
        queue.push(request(9, false));
        assert_eq!(popper.await.unwrap(), 9);
    }
}
