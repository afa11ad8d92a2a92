// Copyright 2025 eraflo
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! A thread-safe FIFO of pending requests with blocking hand-off.
//!
//! The queue is an unbounded flume channel. Producers hold the sender,
//! consumers block on the receiver. Closing drops the sender: consumers
//! still receive every queued item, then see the disconnect.

use flume::{Receiver, Sender};
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// An ordered queue of requests of one kind.
///
/// Items come out in exactly the order they went in and are never dropped
/// silently: the only way to remove an item is to accept it. Once
/// [`close`](RequestQueue::close)d the queue rejects new items, but the items
/// already queued can still be accepted.
pub struct RequestQueue<T> {
    sender: Mutex<Option<Sender<T>>>,
    receiver: Receiver<T>,
}

impl<T> RequestQueue<T> {
    /// Creates an empty, open queue.
    pub fn new() -> Self {
        let (sender, receiver) = flume::unbounded();
        Self {
            sender: Mutex::new(Some(sender)),
            receiver,
        }
    }

    // Only the sender slot is guarded; sending never panics while it is held.
    fn sender(&self) -> MutexGuard<'_, Option<Sender<T>>> {
        self.sender.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Appends a request, waking a consumer blocked in
    /// [`wait_next_request`](Self::wait_next_request).
    ///
    /// Returns the request back if the queue is closed.
    pub fn add_request(&self, request: T) -> Result<(), T> {
        match self.sender().as_ref() {
            Some(sender) => sender.send(request).map_err(|e| e.into_inner()),
            None => Err(request),
        }
    }

    /// Removes and returns the oldest request without blocking.
    pub fn accept_next_request(&self) -> Option<T> {
        self.receiver.try_recv().ok()
    }

    /// Removes and returns the oldest request, blocking while the queue is
    /// empty and open.
    ///
    /// Returns `None` only once the queue is closed *and* fully drained.
    pub fn wait_next_request(&self) -> Option<T> {
        self.receiver.recv().ok()
    }

    /// Returns `true` if at least one request is pending.
    pub fn has_requests(&self) -> bool {
        !self.receiver.is_empty()
    }

    /// Number of pending requests.
    pub fn count(&self) -> usize {
        self.receiver.len()
    }

    /// Stops accepting new requests and wakes every waiting consumer.
    pub fn close(&self) {
        if self.sender().take().is_some() {
            log::trace!("Request queue closed with {} pending.", self.count());
        }
    }

    /// Returns `true` once [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.sender().is_none()
    }
}

impl<T> Default for RequestQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for RequestQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestQueue")
            .field("pending", &self.count())
            .field("open", &!self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn accepts_in_arrival_order() {
        let queue = RequestQueue::new();
        for i in 0..5 {
            queue.add_request(i).unwrap();
        }
        assert_eq!(queue.count(), 5);

        let drained: Vec<_> = std::iter::from_fn(|| queue.accept_next_request()).collect();
        assert_eq!(drained, vec![0, 1, 2, 3, 4]);
        assert!(!queue.has_requests());
    }

    #[test]
    fn closed_queue_rejects_but_keeps_pending_items() {
        let queue = RequestQueue::new();
        queue.add_request("a").unwrap();
        queue.close();

        assert!(queue.is_closed());
        assert_eq!(queue.add_request("b"), Err("b"));
        assert_eq!(queue.wait_next_request(), Some("a"));
        assert_eq!(queue.wait_next_request(), None);
    }

    #[test]
    fn waiting_consumer_is_woken_by_a_single_push() {
        let queue = Arc::new(RequestQueue::new());
        let (tx, rx) = flume::unbounded();

        let consumer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                let item = queue.wait_next_request();
                tx.send(item).unwrap();
            })
        };

        // Give the consumer time to block on the empty channel.
        thread::sleep(Duration::from_millis(50));
        queue.add_request(42).unwrap();

        let received = rx
            .recv_timeout(Duration::from_secs(2))
            .expect("Consumer should have been woken by the push");
        assert_eq!(received, Some(42));
        consumer.join().unwrap();
    }

    #[test]
    fn close_wakes_idle_consumer() {
        let queue: Arc<RequestQueue<u32>> = Arc::new(RequestQueue::new());
        let consumer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.wait_next_request())
        };

        thread::sleep(Duration::from_millis(30));
        queue.close();
        assert_eq!(consumer.join().unwrap(), None);
    }

    #[test]
    fn multiple_producers_keep_per_producer_order() {
        const PRODUCERS: usize = 4;
        const PER_PRODUCER: usize = 250;

        let queue = Arc::new(RequestQueue::new());
        let producers: Vec<_> = (0..PRODUCERS)
            .map(|p| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || {
                    for seq in 0..PER_PRODUCER {
                        queue.add_request((p, seq)).unwrap();
                    }
                })
            })
            .collect();
        for producer in producers {
            producer.join().unwrap();
        }

        let mut next_expected = [0usize; PRODUCERS];
        while let Some((p, seq)) = queue.accept_next_request() {
            assert_eq!(seq, next_expected[p], "Producer {p} items out of order");
            next_expected[p] += 1;
        }
        assert!(next_expected.iter().all(|&n| n == PER_PRODUCER));
    }
}
