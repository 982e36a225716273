//! In-process transport.
//!
//! [`LoopbackConnector`] hands out sockets whose server side is a
//! [`LoopbackPeer`] owned by the caller. It records every connect attempt
//! with its (tokio) timestamp, can refuse connections on demand, and can
//! broadcast events to every live peer. Used by tests with paused time and
//! by the offline mode of the staff binary.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::envelope::ChannelEvent;
use crate::transport::{Connector, Frame, Socket};

/// One recorded call to [`Connector::connect`].
#[derive(Debug, Clone)]
pub struct ConnectAttempt {
    pub url: String,
    pub at: Instant,
    pub accepted: bool,
}

#[derive(Default)]
struct ConnectorState {
    refuse_remaining: u32,
    refuse_all: bool,
    attempts: Vec<ConnectAttempt>,
    peers: Vec<LoopbackPeer>,
}

impl ConnectorState {
    fn prune_closed(&mut self) {
        let before = self.peers.len();
        self.peers.retain(|peer| !peer.is_closed());
        let pruned = before - self.peers.len();
        if pruned > 0 {
            tracing::debug!(pruned, live = self.peers.len(), "pruned closed loopback peers");
        }
    }
}

/// Connector whose sockets stay inside the process.
#[derive(Clone, Default)]
pub struct LoopbackConnector {
    state: Arc<Mutex<ConnectorState>>,
}

impl LoopbackConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse the next `n` connect attempts.
    pub fn refuse_next(&self, n: u32) {
        self.state.lock().refuse_remaining = n;
    }

    /// Refuse (`true`) or accept (`false`) every connect attempt.
    pub fn refuse_all(&self, refuse: bool) {
        self.state.lock().refuse_all = refuse;
    }

    /// Number of connect attempts, accepted or not.
    pub fn connect_count(&self) -> usize {
        self.state.lock().attempts.len()
    }

    pub fn attempts(&self) -> Vec<ConnectAttempt> {
        self.state.lock().attempts.clone()
    }

    /// Instants of every connect attempt, in order.
    pub fn connect_times(&self) -> Vec<Instant> {
        self.state.lock().attempts.iter().map(|a| a.at).collect()
    }

    /// Server sides of accepted connections, oldest first. Peers whose
    /// client went away are pruned on the next connect or broadcast.
    pub fn peers(&self) -> Vec<LoopbackPeer> {
        self.state.lock().peers.clone()
    }

    pub fn latest_peer(&self) -> Option<LoopbackPeer> {
        self.state.lock().peers.last().cloned()
    }

    /// Push `event` to every peer whose connection is still up.
    pub fn broadcast(&self, event: &ChannelEvent) {
        let text = event.to_envelope().to_string();
        let mut state = self.state.lock();
        state.prune_closed();
        for peer in state.peers.iter() {
            peer.push_text(text.clone());
        }
    }
}

#[async_trait::async_trait]
impl Connector for LoopbackConnector {
    async fn connect(&self, url: &str) -> anyhow::Result<Box<dyn Socket>> {
        let mut state = self.state.lock();
        let refuse = if state.refuse_all {
            true
        } else if state.refuse_remaining > 0 {
            state.refuse_remaining -= 1;
            true
        } else {
            false
        };
        state.attempts.push(ConnectAttempt {
            url: url.to_string(),
            at: Instant::now(),
            accepted: !refuse,
        });
        if refuse {
            anyhow::bail!("connection refused: {url}");
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let peer = LoopbackPeer {
            to_client: tx,
            shared: Arc::new(Mutex::new(PeerShared::default())),
        };
        state.prune_closed();
        state.peers.push(peer.clone());
        Ok(Box::new(LoopbackSocket {
            from_server: rx,
            shared: Arc::clone(&peer.shared),
        }))
    }
}

enum PeerMsg {
    Frame(Frame),
    /// End the stream without a close frame.
    Drop,
}

#[derive(Default)]
struct PeerShared {
    sent: Vec<String>,
    client_close: Option<u16>,
}

/// Server side of a loopback connection.
#[derive(Clone)]
pub struct LoopbackPeer {
    to_client: mpsc::UnboundedSender<PeerMsg>,
    shared: Arc<Mutex<PeerShared>>,
}

impl LoopbackPeer {
    /// Deliver a raw text payload to the client.
    pub fn push_text(&self, text: impl Into<String>) {
        let _ = self.to_client.send(PeerMsg::Frame(Frame::Text(text.into())));
    }

    /// Deliver `event` encoded as an envelope.
    pub fn push_event(&self, event: &ChannelEvent) {
        self.push_text(event.to_envelope().to_string());
    }

    /// Close from the server side with `code`.
    pub fn close(&self, code: u16) {
        let _ = self.to_client.send(PeerMsg::Frame(Frame::Close {
            code: Some(code),
            reason: String::new(),
        }));
    }

    /// End the connection without a close frame.
    pub fn drop_connection(&self) {
        let _ = self.to_client.send(PeerMsg::Drop);
    }

    /// Text payloads the client sent on this connection.
    pub fn sent_messages(&self) -> Vec<String> {
        self.shared.lock().sent.clone()
    }

    /// Close code the client sent, if it closed.
    pub fn client_close_code(&self) -> Option<u16> {
        self.shared.lock().client_close
    }

    /// `true` once the client side has gone away.
    pub fn is_closed(&self) -> bool {
        self.to_client.is_closed()
    }
}

struct LoopbackSocket {
    from_server: mpsc::UnboundedReceiver<PeerMsg>,
    shared: Arc<Mutex<PeerShared>>,
}

#[async_trait::async_trait]
impl Socket for LoopbackSocket {
    async fn recv(&mut self) -> Option<Frame> {
        match self.from_server.recv().await {
            Some(PeerMsg::Frame(frame)) => Some(frame),
            Some(PeerMsg::Drop) | None => None,
        }
    }

    async fn send_text(&mut self, text: String) -> anyhow::Result<()> {
        let mut shared = self.shared.lock();
        if shared.client_close.is_some() {
            anyhow::bail!("socket already closed");
        }
        shared.sent.push(text);
        Ok(())
    }

    async fn close(&mut self, code: u16, _reason: &str) -> anyhow::Result<()> {
        self.shared.lock().client_close = Some(code);
        self.from_server.close();
        Ok(())
    }
}
