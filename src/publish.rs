//! # Publish Synchronizer
//!
//! [`Publisher`] is the application-facing publish entry point. It can be
//! handed to any task; calls are serialized through an async mutex so only
//! one publish is ever in flight, each gets the next non-zero packet id, and
//! the caller blocks until the network task observes the broker's
//! acknowledgement or the publish window elapses. A timeout is reported to
//! the caller and never retried here.

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::mutex::Mutex;
use embassy_sync::signal::Signal;
use embassy_time::{Duration, Instant, with_timeout};
use heapless::String;

use crate::codec::{QoS, SessionCodec};
use crate::error::PublishError;

/// Reference sizing for the shared publish format buffer.
pub const MAX_PUBLISH_LEN: usize = 256;

/// Window the caller blocks on the acknowledgement signal.
pub(crate) const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_millis(2000);

/// Serialized publish state: the id counter and the shared format buffer.
/// Lives behind one mutex; holding its guard for the whole publish call is
/// what forbids concurrent publishes.
pub(crate) struct PublishLane {
    next_id: u16,
    buf: String<MAX_PUBLISH_LEN>,
}

impl PublishLane {
    pub(crate) const fn new() -> Self {
        Self {
            next_id: 1,
            buf: String::new(),
        }
    }

    /// Next packet id; wraps past `u16::MAX`, skipping the reserved zero.
    fn take_id(&mut self) -> u16 {
        let id = self.next_id;
        self.next_id = self.next_id.checked_add(1).unwrap_or(1);
        id
    }
}

/// A handle that publishes with QoS 1 and waits for the acknowledgement.
///
/// Obtained from [`SessionContext::publisher`](crate::SessionContext::publisher);
/// cheap to copy into any task.
pub struct Publisher<'a, C: SessionCodec> {
    codec: &'a Mutex<CriticalSectionRawMutex, C>,
    lane: &'a Mutex<CriticalSectionRawMutex, PublishLane>,
    ack: &'a Signal<CriticalSectionRawMutex, u16>,
    ack_timeout: Duration,
}

impl<'a, C: SessionCodec> Clone for Publisher<'a, C> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<'a, C: SessionCodec> Copy for Publisher<'a, C> {}

impl<'a, C: SessionCodec> Publisher<'a, C> {
    pub(crate) fn new(
        codec: &'a Mutex<CriticalSectionRawMutex, C>,
        lane: &'a Mutex<CriticalSectionRawMutex, PublishLane>,
        ack: &'a Signal<CriticalSectionRawMutex, u16>,
    ) -> Self {
        Self {
            codec,
            lane,
            ack,
            ack_timeout: DEFAULT_ACK_TIMEOUT,
        }
    }

    /// Overrides the acknowledgement window for this handle.
    pub fn with_ack_timeout(mut self, timeout: Duration) -> Self {
        self.ack_timeout = timeout;
        self
    }

    /// Publishes `payload` to `topic` with QoS 1 and waits for the broker's
    /// acknowledgement.
    pub async fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), PublishError<C::Error>> {
        if payload.len() > MAX_PUBLISH_LEN {
            return Err(PublishError::PayloadTooLarge);
        }

        // Holding the lane guard until the ack resolves serializes callers.
        let mut lane = self.lane.lock().await;
        let id = lane.take_id();

        self.ack.reset();
        self.codec
            .lock()
            .await
            .publish(topic, payload, QoS::AtLeastOnce, id)
            .await?;

        self.wait_ack(id).await
    }

    /// Formats a payload into the shared publish buffer and publishes it.
    ///
    /// The formatted text must fit [`MAX_PUBLISH_LEN`] bytes.
    pub async fn publish_fmt(
        &self,
        topic: &str,
        args: core::fmt::Arguments<'_>,
    ) -> Result<(), PublishError<C::Error>> {
        let mut lane = self.lane.lock().await;
        lane.buf.clear();
        core::fmt::write(&mut lane.buf, args).map_err(|_| PublishError::PayloadTooLarge)?;
        let id = lane.take_id();

        self.ack.reset();
        {
            let mut codec = self.codec.lock().await;
            codec
                .publish(topic, lane.buf.as_bytes(), QoS::AtLeastOnce, id)
                .await?;
        }

        self.wait_ack(id).await
    }

    /// Blocks on the acknowledgement signal until the matching id arrives or
    /// the window closes. A stale id (from an ack that raced an earlier
    /// timeout) is logged and skipped without restarting the window.
    async fn wait_ack(&self, id: u16) -> Result<(), PublishError<C::Error>> {
        let deadline = Instant::now() + self.ack_timeout;
        loop {
            let now = Instant::now();
            if now >= deadline {
                error!("publish ack timeout, id {}", id);
                return Err(PublishError::AckTimeout);
            }
            match with_timeout(deadline - now, self.ack.wait()).await {
                Ok(acked) if acked == id => return Ok(()),
                Ok(acked) => warn!("stale publish ack, id {} (waiting for {})", acked, id),
                Err(_) => {
                    error!("publish ack timeout, id {}", id);
                    return Err(PublishError::AckTimeout);
                }
            }
        }
    }
}
