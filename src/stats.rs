//! Per-endpoint traffic counters, sampled on demand via
//! [`Statistics::sample`].

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
struct Direction {
    control_frames: AtomicU64,
    text_messages: AtomicU64,
    binary_messages: AtomicU64,
    bytes: AtomicU64,
    compressed_messages: AtomicU64,
    compressed_bytes: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DirectionSnapshot {
    pub control_frames: u64,
    pub text_messages: u64,
    pub binary_messages: u64,
    pub bytes: u64,
    pub compressed_messages: u64,
    pub compressed_bytes: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatisticsSnapshot {
    pub incoming: DirectionSnapshot,
    pub outgoing: DirectionSnapshot,
    /// Uncompressed bytes minus bytes actually transferred, across every
    /// compressed message on both directions. Can be negative (small
    /// messages sometimes grow under DEFLATE), so this is signed.
    pub bytes_saved: i64,
}

#[derive(Debug, Default)]
pub struct Statistics {
    incoming: Direction,
    outgoing: Direction,
    bytes_saved: std::sync::atomic::AtomicI64,
}

impl Direction {
    fn snapshot(&self, reset: bool) -> DirectionSnapshot {
        let load = |counter: &AtomicU64| {
            if reset {
                counter.swap(0, Ordering::Relaxed)
            } else {
                counter.load(Ordering::Relaxed)
            }
        };
        DirectionSnapshot {
            control_frames: load(&self.control_frames),
            text_messages: load(&self.text_messages),
            binary_messages: load(&self.binary_messages),
            bytes: load(&self.bytes),
            compressed_messages: load(&self.compressed_messages),
            compressed_bytes: load(&self.compressed_bytes),
        }
    }
}

impl Statistics {
    pub fn record_incoming_control(&self) {
        self.incoming.control_frames.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_outgoing_control(&self) {
        self.outgoing.control_frames.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_incoming_message(&self, is_text: bool, bytes: usize) {
        let counter = if is_text {
            &self.incoming.text_messages
        } else {
            &self.incoming.binary_messages
        };
        counter.fetch_add(1, Ordering::Relaxed);
        self.incoming.bytes.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_outgoing_message(&self, is_text: bool, bytes: usize) {
        let counter = if is_text {
            &self.outgoing.text_messages
        } else {
            &self.outgoing.binary_messages
        };
        counter.fetch_add(1, Ordering::Relaxed);
        self.outgoing.bytes.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_compression(&self, outgoing: bool, uncompressed_len: usize, wire_len: usize) {
        let direction = if outgoing {
            &self.outgoing
        } else {
            &self.incoming
        };
        direction
            .compressed_messages
            .fetch_add(1, Ordering::Relaxed);
        direction
            .compressed_bytes
            .fetch_add(wire_len as u64, Ordering::Relaxed);
        let saved = uncompressed_len as i64 - wire_len as i64;
        self.bytes_saved.fetch_add(saved, Ordering::Relaxed);
    }

    /// Returns a point-in-time copy of every counter, optionally zeroing
    /// them atomically afterward.
    pub fn sample(&self, reset: bool) -> StatisticsSnapshot {
        StatisticsSnapshot {
            incoming: self.incoming.snapshot(reset),
            outgoing: self.outgoing.snapshot(reset),
            bytes_saved: if reset {
                self.bytes_saved.swap(0, Ordering::Relaxed)
            } else {
                self.bytes_saved.load(Ordering::Relaxed)
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_messages_and_resets() {
        let stats = Statistics::default();
        stats.record_outgoing_message(true, 10);
        stats.record_outgoing_message(false, 20);
        let snapshot = stats.sample(true);
        assert_eq!(snapshot.outgoing.text_messages, 1);
        assert_eq!(snapshot.outgoing.binary_messages, 1);
        assert_eq!(snapshot.outgoing.bytes, 30);
        let second = stats.sample(false);
        assert_eq!(second.outgoing.bytes, 0);
    }

    #[test]
    fn bytes_saved_can_go_negative() {
        let stats = Statistics::default();
        stats.record_compression(true, 5, 12);
        assert_eq!(stats.sample(false).bytes_saved, -7);
    }
}
