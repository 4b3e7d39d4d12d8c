//! # Error Types
//!
//! Failures in this crate fall into two groups: errors surfaced to a
//! `publish()` caller, and resolver errors the session retries on its own.
//! The session state machine itself never returns an error; every failure
//! path re-enters an earlier phase.

/// Why a synchronous publish did not complete.
///
/// It is generic over the codec error type `E`, allowing it to wrap specific
/// errors from the underlying protocol codec and its transport.
#[derive(Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PublishError<E> {
    /// The payload does not fit the fixed publish buffer.
    PayloadTooLarge,
    /// No matching acknowledgement arrived within the publish window.
    /// The publish may still have reached the broker; retrying is the
    /// caller's decision.
    AckTimeout,
    /// The codec rejected or failed the publish itself.
    Codec(E),
}

/// Allows the `?` operator to lift codec errors out of a publish call.
impl<E: core::fmt::Debug> From<E> for PublishError<E> {
    fn from(err: E) -> Self {
        PublishError::Codec(err)
    }
}

/// Why a hostname lookup produced no usable broker address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ResolveError {
    /// The DNS query itself failed.
    Lookup,
    /// The query succeeded but returned no usable records.
    NoRecords,
}
