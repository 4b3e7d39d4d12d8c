//! # Wire-Protocol Codec Contract
//!
//! The session core does not frame MQTT control packets itself. It drives a
//! codec collaborator through the [`SessionCodec`] trait and reacts to the
//! [`CodecEvent`]s the codec decodes from the transport.
//!
//! With the Rust 2024 Edition, this trait uses native `async fn`, removing the
//! need for the `#[async_trait]` macro.
//!
//! # Event delivery
//!
//! [`SessionCodec::process_input`] consumes buffered transport bytes and
//! reports at most one decoded event per call. The event may borrow from the
//! codec's receive buffer; the session copies what it needs before touching
//! the codec again. For inbound publishes the codec reports only the header:
//! the payload is pulled afterwards in bounded chunks through
//! [`SessionCodec::read_payload_chunk`], which keeps a single oversized
//! message from ever occupying more than one chunk of session memory.

use core::net::SocketAddr;

/// Represents the Quality of Service (QoS) levels for MQTT messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum QoS {
    AtMostOnce = 0,
    AtLeastOnce = 1,
    ExactlyOnce = 2,
}

/// One entry of the subscription list handed to the session at start.
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Subscription<'a> {
    /// Topic filter to subscribe to.
    pub filter: &'a str,
    /// Maximum QoS requested for matching messages.
    pub qos: QoS,
}

impl<'a> Subscription<'a> {
    pub const fn new(filter: &'a str, qos: QoS) -> Self {
        Self { filter, qos }
    }
}

/// Header of an inbound publish, reported before its payload is consumed.
///
/// `payload_len` is the total number of payload bytes still buffered by the
/// codec; they must be drained through `read_payload_chunk` even when the
/// message is discarded, or the packet stream loses framing.
#[derive(Debug)]
pub struct InboundPublish<'a> {
    pub topic: &'a str,
    pub payload_len: usize,
    pub packet_id: Option<u16>,
    pub qos: QoS,
}

/// A decoded protocol event, as reported by [`SessionCodec::process_input`].
#[derive(Debug)]
pub enum CodecEvent<'a> {
    /// Broker answered the protocol connect. `accepted` is false when the
    /// broker refused the session.
    ConnAck { accepted: bool },
    /// The protocol session ended (broker disconnect or stream loss).
    Disconnect,
    /// Broker acknowledged a subscribe request.
    SubAck { packet_id: u16 },
    /// Broker acknowledged a QoS 1 publish.
    PubAck { packet_id: u16 },
    /// An inbound publish header; payload follows via `read_payload_chunk`.
    Publish(InboundPublish<'a>),
    /// Answer to a keep-alive ping.
    PingResp,
}

/// The protocol codec collaborator driven by the session state machine.
///
/// Implementations own the transport byte stream (socket reads and writes);
/// the session only sequences the calls. All methods are invoked from the
/// network-processing task, except `publish`, which the
/// [`Publisher`](crate::Publisher) calls from arbitrary tasks while holding
/// the shared codec lock.
#[allow(async_fn_in_trait)]
pub trait SessionCodec {
    /// The error type reported by the codec and its transport.
    type Error: core::fmt::Debug;

    /// Open the transport to `broker` and issue the protocol connect.
    /// Completion of the handshake is reported later as a `ConnAck` event.
    async fn connect(&mut self, broker: SocketAddr) -> Result<(), Self::Error>;

    /// Send a protocol disconnect and close the transport.
    async fn disconnect(&mut self) -> Result<(), Self::Error>;

    /// Tear the transport down without a protocol disconnect. Used when a
    /// connect attempt never completed its handshake.
    fn abort(&mut self);

    /// Issue one subscribe request covering the whole topic list.
    async fn subscribe(
        &mut self,
        packet_id: u16,
        topics: &[Subscription<'_>],
    ) -> Result<(), Self::Error>;

    /// Publish `payload` to `topic`.
    async fn publish(
        &mut self,
        topic: &str,
        payload: &[u8],
        qos: QoS,
        packet_id: u16,
    ) -> Result<(), Self::Error>;

    /// Send a keep-alive ping.
    async fn keep_alive(&mut self) -> Result<(), Self::Error>;

    /// Consume buffered input and decode at most one protocol event.
    ///
    /// Returns `Ok(None)` when no complete packet was available.
    async fn process_input(&mut self) -> Result<Option<CodecEvent<'_>>, Self::Error>;

    /// Read up to `buf.len()` payload bytes of the publish most recently
    /// reported by `process_input`. Returns the number of bytes read; zero
    /// means the stream ended early.
    async fn read_payload_chunk(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error>;
}
