//! # kb-channel
//!
//! Client side of the push notification channel: the envelope codec, a
//! transport abstraction with a WebSocket and an in-process implementation,
//! and [`NotificationChannel`], which keeps one connection alive with
//! exponential-backoff reconnection and fans inbound events out to
//! subscribed handlers.

pub mod channel;
pub mod envelope;
pub mod loopback;
pub mod transport;

pub use channel::{reconnect_delay, ChannelState, EventHandler, NotificationChannel, Subscription};
pub use envelope::{decode, ChannelEvent, ClientMessage, Control, EnvelopeError, Inbound};
pub use loopback::{ConnectAttempt, LoopbackConnector, LoopbackPeer};
pub use transport::{Connector, Frame, Socket, TungsteniteConnector, NORMAL_CLOSURE};
