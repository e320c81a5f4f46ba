//! Media chunks and the single-consumer delivery slot

use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// One fixed-interval unit of encoded capture output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaChunk {
    /// Emission order, starting at 0
    pub sequence: u64,
    /// Offset from encoder start in microseconds
    pub timestamp_us: u64,
    pub data: Bytes,
}

impl MediaChunk {
    pub fn new(sequence: u64, data: Bytes) -> Self {
        Self {
            sequence,
            timestamp_us: 0,
            data,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

type Handler = Box<dyn FnMut(MediaChunk) + Send>;

struct SinkInner {
    handler: Mutex<Option<Handler>>,
    next_sequence: AtomicU64,
    emitted: AtomicU64,
}

/// Delivery point shared between an encoder and the registered consumer.
///
/// Emission runs the handler under the slot lock, so chunks reach the
/// consumer one at a time in sequence order.
#[derive(Clone)]
pub struct ChunkSink {
    inner: Arc<SinkInner>,
}

impl ChunkSink {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(SinkInner {
                handler: Mutex::new(None),
                next_sequence: AtomicU64::new(0),
                emitted: AtomicU64::new(0),
            }),
        }
    }

    /// Install the consumer, returning true if one was replaced
    pub fn set_handler(&self, handler: Handler) -> bool {
        self.inner.handler.lock().replace(handler).is_some()
    }

    /// Hand a freshly encoded blob to the consumer
    pub fn emit(&self, data: Bytes, timestamp_us: u64) {
        let mut slot = self.inner.handler.lock();
        let sequence = self.inner.next_sequence.fetch_add(1, Ordering::Relaxed);
        let chunk = MediaChunk {
            sequence,
            timestamp_us,
            data,
        };

        match slot.as_mut() {
            Some(handler) => {
                self.inner.emitted.fetch_add(1, Ordering::Relaxed);
                handler(chunk);
            }
            None => tracing::trace!(sequence, "chunk emitted with no consumer"),
        }
    }

    /// Number of chunks handed to a consumer
    pub fn emitted(&self) -> u64 {
        self.inner.emitted.load(Ordering::Relaxed)
    }
}

impl Default for ChunkSink {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequences_are_monotonic() {
        let sink = ChunkSink::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        sink.set_handler(Box::new(move |chunk| seen_clone.lock().push(chunk.sequence)));

        for _ in 0..4 {
            sink.emit(Bytes::from_static(b"x"), 0);
        }

        assert_eq!(*seen.lock(), vec![0, 1, 2, 3]);
        assert_eq!(sink.emitted(), 4);
    }

    #[test]
    fn test_replaced_handler_is_sole_consumer() {
        let sink = ChunkSink::new();
        let first = Arc::new(AtomicU64::new(0));
        let second = Arc::new(AtomicU64::new(0));

        let f = first.clone();
        assert!(!sink.set_handler(Box::new(move |_| {
            f.fetch_add(1, Ordering::Relaxed);
        })));
        sink.emit(Bytes::from_static(b"a"), 0);

        let s = second.clone();
        assert!(sink.set_handler(Box::new(move |_| {
            s.fetch_add(1, Ordering::Relaxed);
        })));
        sink.emit(Bytes::from_static(b"b"), 0);

        assert_eq!(first.load(Ordering::Relaxed), 1);
        assert_eq!(second.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_emit_without_consumer_is_dropped() {
        let sink = ChunkSink::new();
        sink.emit(Bytes::from_static(b"lost"), 0);
        assert_eq!(sink.emitted(), 0);
    }
}
