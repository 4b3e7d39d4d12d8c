//! # Transport Gate
//!
//! Every state of the session machine bounds its blocking time by waiting on
//! the active socket handle through [`TransportGate::wait_readable`] instead
//! of reading from the stream directly. The gate is parameterized over the
//! handle type once at construction (plain TCP, TLS, a mock in tests), so the
//! choice of transport is made in one place rather than at each poll site.

use embassy_net::tcp::TcpSocket;
use embassy_time::{Duration, with_timeout};

use crate::fmt::Debug2Format;

/// A socket handle that can signal pending inbound data.
#[allow(async_fn_in_trait)]
pub trait PollReadable {
    /// The error type returned by the underlying poll.
    type Error: core::fmt::Debug;

    /// Completes once the handle has buffered data ready to read.
    async fn poll_readable(&mut self) -> Result<(), Self::Error>;
}

/// Outcome of one bounded readability wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ReadyState {
    /// Data is buffered; `process_input` will make progress.
    Ready,
    /// Nothing arrived within the window.
    TimedOut,
    /// The poll itself failed. Callers treat this like a timeout and retry.
    Failed,
}

/// Bounded readability wait over an arbitrary socket handle.
pub struct TransportGate<P: PollReadable> {
    handle: P,
}

impl<P: PollReadable> TransportGate<P> {
    /// Creates a gate over `handle`.
    pub fn new(handle: P) -> Self {
        Self { handle }
    }

    /// Waits up to `timeout` for the handle to become readable.
    pub async fn wait_readable(&mut self, timeout: Duration) -> ReadyState {
        match with_timeout(timeout, self.handle.poll_readable()).await {
            Ok(Ok(())) => ReadyState::Ready,
            Ok(Err(e)) => {
                error!("socket poll failed: {:?}", Debug2Format(&e));
                ReadyState::Failed
            }
            Err(_) => ReadyState::TimedOut,
        }
    }

    /// Consumes the gate, returning the wrapped handle.
    pub fn into_inner(self) -> P {
        self.handle
    }
}

impl PollReadable for TcpSocket<'_> {
    type Error = core::convert::Infallible;

    async fn poll_readable(&mut self) -> Result<(), Self::Error> {
        self.wait_read_ready().await;
        Ok(())
    }
}
