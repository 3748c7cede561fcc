//! FIFO of packets encoded before the connection was ready.

use sockio_core::Packet;
use std::collections::VecDeque;

/// An encoded packet waiting for the transport.
#[derive(Debug, Clone, PartialEq)]
pub struct Queued {
    pub encoded: String,
    pub packet: Packet,
}

/// Outgoing packets buffered while not connected.
#[derive(Debug, Clone, Default)]
pub struct OutgoingQueue {
    entries: VecDeque<Queued>,
}

impl OutgoingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, packet: Packet) {
        let encoded = packet.encode();
        self.entries.push_back(Queued { encoded, packet });
    }

    /// Take every entry, in enqueue order.
    pub fn take(&mut self) -> Vec<Queued> {
        self.entries.drain(..).collect()
    }

    /// Discard every entry. Returns how many were dropped.
    pub fn clear(&mut self) -> usize {
        let dropped = self.entries.len();
        self.entries.clear();
        dropped
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
