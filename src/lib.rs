//! # Self-Healing MQTT Session for Embedded Systems
//!
//! `mqtt-session` keeps a persistent MQTT client session alive for the whole
//! uptime of a device. It is `no_std` compatible, built upon the
//! [Embassy](https://embassy.dev/) async ecosystem, and treats every failure
//! as a reason to walk its reconnect cycle again rather than to give up.
//!
//! ## Core Features
//!
//! - **`no_std` & `no_alloc`:** Designed to run on bare-metal microcontrollers
//!   without a standard library or dynamic memory allocation. Buffers are
//!   managed using `heapless`.
//! - **Fully Async:** Built with `async/await` on Embassy timers and
//!   networking, ensuring non-blocking operations.
//! - **Rust 2024 Edition:** Uses native `async fn` in traits, removing the
//!   need for `async-trait`.
//! - **Self-Healing:** Resolution, connection, subscription and liveness
//!   failures all feed back into the state machine; the session recovers
//!   without outside intervention.
//! - **Codec Agnostic:** The [`SessionCodec`] trait carries the wire protocol,
//!   so the session logic runs over any MQTT packet implementation.
//! - **Decoupled Dispatch:** Inbound messages cross a bounded queue to a
//!   dedicated consumer task, so a slow handler never stalls the network path.
//!
//! ## Architecture
//!
//! One [`SessionContext`] per broker session, split across two tasks plus any
//! number of publishers:
//!
//! ```ignore
//! static CTX: StaticCell<SessionContext<Codec, 64, 256, 4>> = StaticCell::new();
//!
//! let ctx = CTX.init(SessionContext::new(codec));
//! let config = SessionConfig::new("broker.local", 1883);
//! let subs = [Subscription::new("device/cmd", QoS::AtMostOnce)];
//!
//! spawner.must_spawn(network_task(ctx, config, gate, resolver, &subs));
//! spawner.must_spawn(dispatch_task(ctx, handler));
//! ctx.handle().start();
//!
//! // From any task:
//! ctx.publisher().publish("device/state", b"on").await?;
//! ```
//!
//! The network task owns the state machine and the codec; publishers only
//! ever take short locks on the codec to write a packet, then park on the
//! acknowledgement signal until the network task observes the broker's
//! response.

#![no_std]

// Must come first so the logging shim macros are visible everywhere.
#[macro_use]
mod fmt;

pub mod codec;
pub mod dispatch;
pub mod error;
pub mod publish;
pub mod resolve;
pub mod session;
pub mod transport;

// Re-export key types for easier access at the crate root.
pub use codec::{CodecEvent, InboundPublish, QoS, SessionCodec, Subscription};
pub use dispatch::{InboundHandler, InboundMessage};
pub use error::{PublishError, ResolveError};
pub use publish::Publisher;
pub use resolve::{DnsResolver, ResolveAddr};
pub use session::{SessionConfig, SessionContext, SessionHandle};
pub use transport::{PollReadable, ReadyState, TransportGate};
