//! # Inbound Dispatch Queue
//!
//! Decoded inbound publishes are copied into owned, fixed-capacity
//! [`InboundMessage`] records and pushed through a bounded channel to a
//! dedicated consumer task. The user callback runs only on that consumer
//! task, so a slow or blocking handler can never stall the
//! network-processing path: the worst the network task ever does for one
//! message is a bounded timed send, after which the message is dropped.

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use embassy_time::{Duration, with_timeout};
use heapless::{String, Vec};

/// Reference sizing for the topic buffer of an inbound record.
pub const DEFAULT_TOPIC_LEN: usize = 64;
/// Reference sizing for the payload buffer of an inbound record.
pub const DEFAULT_PAYLOAD_LEN: usize = 256;
/// Reference depth of the dispatch queue.
pub const DEFAULT_QUEUE_DEPTH: usize = 4;

/// Periodic wake of the consumer task while the queue is empty.
const CONSUMER_WAKE: Duration = Duration::from_secs(1);

/// The bounded channel carrying owned inbound records to the consumer task.
pub type InboundQueue<const TOPIC_LEN: usize, const PAYLOAD_LEN: usize, const DEPTH: usize> =
    Channel<CriticalSectionRawMutex, InboundMessage<TOPIC_LEN, PAYLOAD_LEN>, DEPTH>;

/// One inbound message with inline storage for topic and payload.
///
/// # Type Parameters
///
/// - `TOPIC_LEN`: Maximum topic string length
/// - `PAYLOAD_LEN`: Maximum payload size
#[derive(Debug, Clone)]
pub struct InboundMessage<const TOPIC_LEN: usize, const PAYLOAD_LEN: usize> {
    topic: String<TOPIC_LEN>,
    payload: Vec<u8, PAYLOAD_LEN>,
}

impl<const TOPIC_LEN: usize, const PAYLOAD_LEN: usize> InboundMessage<TOPIC_LEN, PAYLOAD_LEN> {
    pub(crate) const fn new() -> Self {
        Self {
            topic: String::new(),
            payload: Vec::new(),
        }
    }

    /// The topic the message was published on.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// The message payload bytes.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Copies `topic` into the record. Fails when it does not fit.
    pub(crate) fn set_topic(&mut self, topic: &str) -> Result<(), ()> {
        self.topic.clear();
        self.topic.push_str(topic).map_err(|_| ())
    }

    /// Grows the payload buffer to `len` zeroed bytes for chunked reads.
    /// Fails when `len` exceeds the record capacity.
    pub(crate) fn reserve_payload(&mut self, len: usize) -> Result<&mut [u8], ()> {
        self.payload.clear();
        self.payload.resize(len, 0).map_err(|_| ())?;
        Ok(&mut self.payload)
    }
}

/// Object-safe handler for dispatched subscription messages.
///
/// Stored once at task start and invoked on the consumer task for every
/// message that survived validation and queueing.
pub trait InboundHandler {
    /// Handle one inbound message.
    fn on_message(&mut self, topic: &str, payload: &[u8]);
}

/// Blanket implementation for mutable references to trait objects.
impl<H: InboundHandler + ?Sized> InboundHandler for &mut H {
    fn on_message(&mut self, topic: &str, payload: &[u8]) {
        (**self).on_message(topic, payload)
    }
}

/// Consumer loop: pops one record at a time and runs the handler.
///
/// The pop wakes periodically so the task never parks unboundedly; records
/// free their queue slot as soon as this function drops them.
pub(crate) async fn consume<const T: usize, const P: usize, const D: usize>(
    queue: &InboundQueue<T, P, D>,
    handler: &mut dyn InboundHandler,
) -> ! {
    loop {
        if let Ok(msg) = with_timeout(CONSUMER_WAKE, queue.receive()).await {
            trace!("dispatching {} byte message on {}", msg.payload().len(), msg.topic());
            handler.on_message(msg.topic(), msg.payload());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_copies_topic_and_reserves_payload() {
        let mut msg = InboundMessage::<8, 16>::new();
        assert!(msg.set_topic("/a/b").is_ok());
        let buf = msg.reserve_payload(5).unwrap();
        buf.copy_from_slice(b"hello");
        assert_eq!(msg.topic(), "/a/b");
        assert_eq!(msg.payload(), b"hello");
    }

    #[test]
    fn record_rejects_oversized_parts() {
        let mut msg = InboundMessage::<4, 8>::new();
        assert!(msg.set_topic("/too/long").is_err());
        assert!(msg.reserve_payload(9).is_err());
        assert!(msg.reserve_payload(8).is_ok());
    }
}
