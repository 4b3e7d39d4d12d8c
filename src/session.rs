//! # Session State Machine
//!
//! [`SessionContext`] owns everything the broker session needs: the shared
//! codec, the publish lane, the dispatch queue and the cross-task signals.
//! It is built once (typically in a `StaticCell`) and passed by reference
//! into the two task entry points:
//!
//! - [`SessionContext::run_network`] — the network-processing task. Owns the
//!   session state exclusively and loops forever through
//!   resolve → connect → subscribe → connected, reacting to codec events.
//!   Every failure path re-enters an earlier phase; nothing is fatal.
//! - [`SessionContext::run_dispatch`] — the consumer task that runs the
//!   user's [`InboundHandler`] outside the network-processing path.
//!
//! Other tasks interact only through [`Publisher`], the connected flag and
//! the start signal; no session state crosses task boundaries directly.
//!
//! ```ignore
//! static CTX: StaticCell<SessionContext<Codec, 64, 256, 4>> = StaticCell::new();
//!
//! let ctx = CTX.init(SessionContext::new(codec));
//! let config = SessionConfig::new("test.broker.example", 1883);
//! let subs = [Subscription::new("/a/b", QoS::AtMostOnce)];
//!
//! spawner.must_spawn(network_task(ctx, config, gate, resolver, &subs));
//! spawner.must_spawn(dispatch_task(ctx, handler));
//! ctx.handle().start();
//! ```

use core::net::SocketAddr;
use core::sync::atomic::{AtomicBool, Ordering};

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::mutex::Mutex;
use embassy_sync::signal::Signal;
use embassy_time::{Duration, Instant, with_timeout};

use crate::codec::{CodecEvent, SessionCodec, Subscription};
use crate::dispatch::{self, InboundHandler, InboundMessage, InboundQueue};
use crate::fmt::Debug2Format;
use crate::publish::{PublishLane, Publisher};
use crate::resolve::{self, ResolveAddr};
use crate::transport::{PollReadable, ReadyState, TransportGate};

/// Chunk size for copying or draining inbound payload bytes.
const PAYLOAD_CHUNK: usize = 32;

/// Packet id used for the single subscribe request of a session.
const SUBSCRIBE_PACKET_ID: u16 = 1;

/// Broker coordinates and the per-phase wait windows.
#[derive(Debug, Clone, Copy)]
pub struct SessionConfig<'a> {
    /// Broker hostname or literal IP address.
    pub host: &'a str,
    /// Broker port.
    pub port: u16,
    /// Window for the connect-acknowledgement after a protocol connect.
    pub connect_timeout: Duration,
    /// Window for the subscribe-acknowledgement.
    pub subscribe_timeout: Duration,
    /// Per-iteration wait for inbound traffic while connected.
    pub idle_timeout: Duration,
    /// Idle period after which a keep-alive ping is sent.
    pub keep_alive_interval: Duration,
    /// Wait for a free dispatch-queue slot before an inbound message is dropped.
    pub enqueue_timeout: Duration,
}

impl<'a> SessionConfig<'a> {
    /// Configuration with the reference wait windows.
    pub const fn new(host: &'a str, port: u16) -> Self {
        Self {
            host,
            port,
            connect_timeout: Duration::from_millis(2000),
            subscribe_timeout: Duration::from_millis(4000),
            idle_timeout: Duration::from_millis(5000),
            keep_alive_interval: Duration::from_secs(60),
            enqueue_timeout: Duration::from_millis(1000),
        }
    }

    pub const fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub const fn with_subscribe_timeout(mut self, timeout: Duration) -> Self {
        self.subscribe_timeout = timeout;
        self
    }

    pub const fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub const fn with_keep_alive(mut self, interval: Duration) -> Self {
        self.keep_alive_interval = interval;
        self
    }

    pub const fn with_enqueue_timeout(mut self, timeout: Duration) -> Self {
        self.enqueue_timeout = timeout;
        self
    }
}

/// Connection lifecycle phase. Exclusively owned by the network task; other
/// tasks observe the session only through the connected flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    ResolvingAddress,
    ConnectingToBroker,
    SubscribingTopics,
    Connected,
}

/// Kind of the event latched during a bounded wait, so a phase can tell the
/// acknowledgement it waited for apart from unrelated traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EventKind {
    None,
    ConnAck,
    Disconnect,
    SubAck,
    PubAck,
    Publish,
    PingResp,
}

/// Cross-task signals. The connected flag is the only session state other
/// tasks may read.
struct Shared {
    connected: AtomicBool,
    started: Signal<CriticalSectionRawMutex, ()>,
    pub_ack: Signal<CriticalSectionRawMutex, u16>,
}

/// Everything one broker session owns.
///
/// # Type Parameters
///
/// - `C`: the wire-protocol codec collaborator
/// - `TOPIC_LEN` / `PAYLOAD_LEN`: inbound record sizing
/// - `DEPTH`: dispatch queue depth
pub struct SessionContext<
    C,
    const TOPIC_LEN: usize,
    const PAYLOAD_LEN: usize,
    const DEPTH: usize,
> {
    codec: Mutex<CriticalSectionRawMutex, C>,
    lane: Mutex<CriticalSectionRawMutex, PublishLane>,
    queue: InboundQueue<TOPIC_LEN, PAYLOAD_LEN, DEPTH>,
    shared: Shared,
}

impl<C, const TOPIC_LEN: usize, const PAYLOAD_LEN: usize, const DEPTH: usize>
    SessionContext<C, TOPIC_LEN, PAYLOAD_LEN, DEPTH>
where
    C: SessionCodec,
{
    /// Creates an idle session around `codec`. The network task stays parked
    /// until [`SessionHandle::start`] is called.
    pub const fn new(codec: C) -> Self {
        Self {
            codec: Mutex::new(codec),
            lane: Mutex::new(PublishLane::new()),
            queue: InboundQueue::new(),
            shared: Shared {
                connected: AtomicBool::new(false),
                started: Signal::new(),
                pub_ack: Signal::new(),
            },
        }
    }

    /// A publish handle for this session, usable from any task.
    pub fn publisher(&self) -> Publisher<'_, C> {
        Publisher::new(&self.codec, &self.lane, &self.shared.pub_ack)
    }

    /// A control/observation handle for this session.
    pub fn handle(&self) -> SessionHandle<'_> {
        SessionHandle {
            shared: &self.shared,
        }
    }

    /// The network-processing task entry point. Runs forever.
    ///
    /// `subscriptions` is consumed during the subscribe phase of every
    /// (re)connect cycle; an empty list makes that phase succeed immediately.
    pub async fn run_network<G, R>(
        &self,
        config: SessionConfig<'_>,
        gate: TransportGate<G>,
        resolver: R,
        subscriptions: &[Subscription<'_>],
    ) -> !
    where
        G: PollReadable,
        R: ResolveAddr,
    {
        self.shared.started.wait().await;
        info!("mqtt session started, broker {}:{}", config.host, config.port);

        let mut task = NetworkTask {
            ctx: self,
            config,
            gate,
            resolver,
            subscriptions,
            endpoint: BrokerEndpoint {
                host: config.host,
                port: config.port,
                resolved: None,
            },
            subscribed: false,
            keep_alive_at: None,
        };

        let mut state = SessionState::ResolvingAddress;
        loop {
            state = match state {
                SessionState::ResolvingAddress => task.resolve_broker().await,
                SessionState::ConnectingToBroker => task.connect_broker().await,
                SessionState::SubscribingTopics => task.subscribe_topics().await,
                SessionState::Connected => task.connected_tick().await,
            };
        }
    }

    /// The dispatch consumer task entry point. Runs forever.
    pub async fn run_dispatch(&self, handler: &mut dyn InboundHandler) -> ! {
        dispatch::consume(&self.queue, handler).await
    }
}

/// Control and observation handle, detached from the session generics.
#[derive(Clone, Copy)]
pub struct SessionHandle<'a> {
    shared: &'a Shared,
}

impl SessionHandle<'_> {
    /// Releases the network task from its initial idle wait. The only
    /// unbounded wait in the session ends here.
    pub fn start(&self) {
        self.shared.started.signal(());
    }

    /// Whether the protocol-level session is currently up.
    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::Acquire)
    }

    /// Connectivity-provider notification. A lost link clears the connected
    /// flag, which makes the network task tear the session down and walk the
    /// full reconnect cycle on its next iteration.
    pub fn link_changed(&self, up: bool) {
        if !up {
            warn!("network link lost");
            self.shared.connected.store(false, Ordering::Release);
        }
    }
}

/// Broker coordinates for the current cycle. `resolved` is invalidated by
/// every reconnect.
struct BrokerEndpoint<'a> {
    host: &'a str,
    port: u16,
    resolved: Option<SocketAddr>,
}

/// State owned exclusively by the network task.
struct NetworkTask<'a, C, G, R, const T: usize, const P: usize, const D: usize>
where
    C: SessionCodec,
    G: PollReadable,
    R: ResolveAddr,
{
    ctx: &'a SessionContext<C, T, P, D>,
    config: SessionConfig<'a>,
    gate: TransportGate<G>,
    resolver: R,
    subscriptions: &'a [Subscription<'a>],
    endpoint: BrokerEndpoint<'a>,
    subscribed: bool,
    keep_alive_at: Option<Instant>,
}

impl<C, G, R, const T: usize, const P: usize, const D: usize> NetworkTask<'_, C, G, R, T, P, D>
where
    C: SessionCodec,
    G: PollReadable,
    R: ResolveAddr,
{
    /// ResolvingAddress: literal addresses skip the resolver; a failed
    /// lookup retries this state on the next iteration.
    async fn resolve_broker(&mut self) -> SessionState {
        info!("resolving broker {}:{}", self.endpoint.host, self.endpoint.port);
        self.endpoint.resolved = None;

        if let Some(addr) = resolve::literal_addr(self.endpoint.host, self.endpoint.port) {
            debug!("broker address is a literal");
            self.endpoint.resolved = Some(addr);
            return SessionState::ConnectingToBroker;
        }

        match self
            .resolver
            .resolve(self.endpoint.host, self.endpoint.port)
            .await
        {
            Ok(addr) => {
                info!("broker resolved to {:?}", Debug2Format(&addr));
                self.endpoint.resolved = Some(addr);
                SessionState::ConnectingToBroker
            }
            Err(e) => {
                error!("broker resolution failed: {:?}", Debug2Format(&e));
                SessionState::ResolvingAddress
            }
        }
    }

    /// ConnectingToBroker: protocol connect, then one bounded wait for the
    /// connect-acknowledgement. An attempt that never acked is aborted so
    /// the next one starts from a closed transport.
    async fn connect_broker(&mut self) -> SessionState {
        let Some(addr) = self.endpoint.resolved else {
            return SessionState::ResolvingAddress;
        };

        info!("connecting to broker");
        self.ctx.shared.connected.store(false, Ordering::Release);
        {
            let mut codec = self.ctx.codec.lock().await;
            if let Err(e) = codec.connect(addr).await {
                error!("protocol connect failed: {:?}", Debug2Format(&e));
                let _ = codec.disconnect().await;
                return SessionState::ConnectingToBroker;
            }
        }

        if self.gate.wait_readable(self.config.connect_timeout).await == ReadyState::Ready {
            self.pump().await;
        }

        if self.ctx.shared.connected.load(Ordering::Acquire) {
            info!("mqtt client connected");
            SessionState::SubscribingTopics
        } else {
            error!("connect ack timeout, abort");
            self.ctx.codec.lock().await.abort();
            SessionState::ConnectingToBroker
        }
    }

    /// SubscribingTopics: one subscribe request for the whole list, then a
    /// bounded wait that re-polls while unrelated events arrive. An empty
    /// list succeeds immediately. Connected is entered only from here, on an
    /// observed subscribe-acknowledgement.
    async fn subscribe_topics(&mut self) -> SessionState {
        if self.subscriptions.is_empty() {
            warn!("subscription list empty");
            self.keep_alive_at = None;
            return SessionState::Connected;
        }

        info!("subscribing {} topics", self.subscriptions.len());
        self.subscribed = false;
        {
            let mut codec = self.ctx.codec.lock().await;
            if let Err(e) = codec.subscribe(SUBSCRIBE_PACKET_ID, self.subscriptions).await {
                error!("subscribe request failed: {:?}", Debug2Format(&e));
                return SessionState::SubscribingTopics;
            }
        }

        loop {
            match self.gate.wait_readable(self.config.subscribe_timeout).await {
                ReadyState::Ready => match self.pump().await {
                    EventKind::SubAck | EventKind::None => break,
                    _ => {
                        warn!("unexpected event while subscribing, keep waiting");
                        continue;
                    }
                },
                ReadyState::TimedOut | ReadyState::Failed => break,
            }
        }

        if self.subscribed {
            info!("subscribe done");
            self.keep_alive_at = None;
            SessionState::Connected
        } else {
            error!("subscribe timeout");
            SessionState::SubscribingTopics
        }
    }

    /// Connected: one bounded wait for inbound traffic per iteration, a
    /// keep-alive ping whenever the idle deadline passed, and a full reset
    /// to ResolvingAddress the moment the connected flag drops.
    async fn connected_tick(&mut self) -> SessionState {
        let now = Instant::now();
        let ping_due = self.keep_alive_at.is_none_or(|at| now >= at);

        if ping_due {
            info!("keepalive");
            if let Err(e) = self.ctx.codec.lock().await.keep_alive().await {
                error!("keepalive failed: {:?}", Debug2Format(&e));
            }
            self.keep_alive_at = Some(now + self.config.keep_alive_interval);
            return SessionState::Connected;
        }

        if self.gate.wait_readable(self.config.idle_timeout).await == ReadyState::Ready {
            self.pump().await;
        }

        if self.ctx.shared.connected.load(Ordering::Acquire) {
            SessionState::Connected
        } else {
            warn!("session lost, reconnecting");
            let _ = self.ctx.codec.lock().await.disconnect().await;
            self.endpoint.resolved = None;
            self.subscribed = false;
            self.keep_alive_at = None;
            SessionState::ResolvingAddress
        }
    }

    /// Processes at most one decoded event and latches its kind.
    ///
    /// Runs entirely on the network task; the only hand-offs are the
    /// acknowledgement signal and the bounded dispatch queue.
    async fn pump(&mut self) -> EventKind {
        let mut codec = self.ctx.codec.lock().await;
        let evt = match codec.process_input().await {
            Ok(Some(evt)) => evt,
            Ok(None) => return EventKind::None,
            Err(e) => {
                error!("input processing failed: {:?}", Debug2Format(&e));
                return EventKind::None;
            }
        };

        match evt {
            CodecEvent::ConnAck { accepted } => {
                if accepted {
                    self.ctx.shared.connected.store(true, Ordering::Release);
                } else {
                    error!("broker refused the connection");
                }
                EventKind::ConnAck
            }
            CodecEvent::Disconnect => {
                info!("mqtt client disconnected");
                self.ctx.shared.connected.store(false, Ordering::Release);
                EventKind::Disconnect
            }
            CodecEvent::SubAck { packet_id } => {
                debug!("suback, id {}", packet_id);
                self.subscribed = true;
                EventKind::SubAck
            }
            CodecEvent::PubAck { packet_id } => {
                debug!("puback, id {}", packet_id);
                self.ctx.shared.pub_ack.signal(packet_id);
                EventKind::PubAck
            }
            CodecEvent::PingResp => {
                debug!("ping response");
                EventKind::PingResp
            }
            CodecEvent::Publish(head) => {
                debug!("inbound publish on {}, {} bytes", head.topic, head.payload_len);
                let payload_len = head.payload_len;
                let mut record = InboundMessage::<T, P>::new();
                let topic_fits = record.set_topic(head.topic).is_ok();
                let payload_fits = payload_len + 1 <= P;
                let connected = self.ctx.shared.connected.load(Ordering::Acquire);

                if !topic_fits || !payload_fits || !connected {
                    if !topic_fits {
                        error!("inbound topic too long");
                    }
                    if !payload_fits {
                        error!("inbound payload too long: {} bytes", payload_len);
                    }
                    if !connected {
                        warn!("inbound publish before session is up");
                    }
                    drain_payload(&mut *codec, payload_len).await;
                    return EventKind::Publish;
                }

                if !read_payload(&mut *codec, &mut record, payload_len).await {
                    return EventKind::Publish;
                }

                // Free the codec before the queue wait so publishes are not
                // blocked behind a full dispatch queue.
                drop(codec);
                match with_timeout(self.config.enqueue_timeout, self.ctx.queue.send(record)).await
                {
                    Ok(()) => trace!("inbound message queued"),
                    Err(_) => error!("dispatch queue full, message dropped"),
                }
                EventKind::Publish
            }
        }
    }
}

/// Copies `len` payload bytes into `record` in bounded chunks. Returns false
/// (and leaves the stream wherever the failure left it) when the codec read
/// fails or ends early.
async fn read_payload<C, const T: usize, const P: usize>(
    codec: &mut C,
    record: &mut InboundMessage<T, P>,
    len: usize,
) -> bool
where
    C: SessionCodec,
{
    let Ok(buf) = record.reserve_payload(len) else {
        return false;
    };

    let mut idx = 0;
    while idx < len {
        let chunk = (len - idx).min(PAYLOAD_CHUNK);
        match codec.read_payload_chunk(&mut buf[idx..idx + chunk]).await {
            Ok(0) => {
                error!("payload read ended early at {} of {} bytes", idx, len);
                return false;
            }
            Ok(n) => idx += n,
            Err(e) => {
                error!("failure to read payload: {:?}", Debug2Format(&e));
                return false;
            }
        }
    }
    true
}

/// Reads and discards `len` buffered payload bytes so the packet stream
/// keeps its framing after a message is dropped.
async fn drain_payload<C: SessionCodec>(codec: &mut C, len: usize) {
    let mut tmp = [0u8; PAYLOAD_CHUNK];
    let mut remaining = len;
    while remaining > 0 {
        let chunk = remaining.min(PAYLOAD_CHUNK);
        match codec.read_payload_chunk(&mut tmp[..chunk]).await {
            Ok(0) => {
                error!("payload drain ended early, {} bytes left", remaining);
                return;
            }
            Ok(n) => remaining -= n,
            Err(e) => {
                error!("payload drain failed: {:?}", Debug2Format(&e));
                return;
            }
        }
    }
}
