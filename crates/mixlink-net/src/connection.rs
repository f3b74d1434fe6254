//! Connection registry: which other mixlink instances are reachable.
//!
//! Discovery is a two-task handshake on the well-known handshake port:
//!
//! ```text
//! prober   ──/mixlink/ping (broadcast)──►  peer listener
//! listener ◄──/mixlink/pong (unicast)───  (and records the sender)
//! ```
//!
//! Every known peer carries a TTL decremented on each prober sweep and
//! refreshed by any message from that peer; a peer reaching 0 is evicted.
//! Position 0 in the roster is always "self".

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Context;
use rosc::{OscPacket, OscType};
use serde::{Deserialize, Serialize};
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use mixlink_core::ports::{
    CONTROL_RECEIVE_PORT, HANDSHAKE_PORT, HANDSHAKE_SWEEP_SECS, MAX_PEERS, PEER_TTL,
    STREAM_REQUEST_PORT,
};

use crate::endpoint::{host_name, local_ip};
use crate::osc;

// ── Endpoint ──────────────────────────────────────────────────────────────────

/// Description of one reachable engine instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Endpoint {
    pub host_name: String,
    pub ip: String,
    pub handshake_port: u16,
    pub stream_request_port: u16,
    pub control_port: u16,
    /// Remaining handshake sweeps before eviction.
    pub alive: u32,
}

impl Default for Endpoint {
    fn default() -> Self {
        Self {
            host_name: String::new(),
            ip: "127.0.0.1".to_owned(),
            handshake_port: HANDSHAKE_PORT,
            stream_request_port: STREAM_REQUEST_PORT,
            control_port: CONTROL_RECEIVE_PORT,
            alive: PEER_TTL,
        }
    }
}

/// Two endpoints designate the same instance iff address and handshake
/// port match; names and TTLs are advisory.
impl PartialEq for Endpoint {
    fn eq(&self, other: &Self) -> bool {
        self.ip == other.ip && self.handshake_port == other.handshake_port
    }
}

impl Eq for Endpoint {}

// ── Roster ────────────────────────────────────────────────────────────────────

/// Peer list with TTL bookkeeping. Index 0 is self and never expires.
#[derive(Debug)]
struct Roster {
    peers: Vec<Endpoint>,
}

impl Roster {
    fn new(self_info: Endpoint) -> Self {
        Self { peers: vec![self_info] }
    }

    /// Insert or refresh a peer. Returns true when the roster changed.
    fn record(&mut self, incoming: Endpoint) -> bool {
        if incoming == self.peers[0] {
            return false;
        }
        if let Some(known) = self.peers[1..].iter_mut().find(|p| **p == incoming) {
            known.alive = PEER_TTL;
            known.host_name = incoming.host_name;
            known.stream_request_port = incoming.stream_request_port;
            known.control_port = incoming.control_port;
            return false;
        }
        if self.peers.len() >= MAX_PEERS {
            warn!("Peer roster full ({MAX_PEERS}); ignoring {}", incoming.ip);
            return false;
        }
        info!("Peer '{}' at {} connected", incoming.host_name, incoming.ip);
        self.peers.push(incoming);
        true
    }

    /// Decrement all TTLs; evict the dead. Returns true when the roster
    /// changed.
    fn sweep(&mut self) -> bool {
        let before = self.peers.len();
        for peer in &mut self.peers[1..] {
            peer.alive = peer.alive.saturating_sub(1);
        }
        let me = self.peers[0].clone();
        self.peers.retain(|p| p.alive > 0 || *p == me);
        before != self.peers.len()
    }

    fn index_of_name(&self, name: &str) -> Option<usize> {
        self.peers.iter().position(|p| p.host_name == name)
    }

    fn index_of(&self, endpoint: &Endpoint) -> Option<usize> {
        self.peers.iter().position(|p| p == endpoint)
    }
}

// ── ConnectionRegistry ────────────────────────────────────────────────────────

/// Tracks reachable peers; see the module docs for the protocol.
pub struct ConnectionRegistry {
    roster: Arc<Mutex<Roster>>,
    self_info: Endpoint,
    handshake_port: u16,
    stop_tx: Option<watch::Sender<bool>>,
    tasks: Vec<JoinHandle<()>>,
}

impl ConnectionRegistry {
    /// Describe this instance. Ports are those the sibling services listen
    /// on; the advertised address is the primary LAN address.
    pub fn new(stream_request_port: u16, control_port: u16) -> Self {
        Self::with_handshake_port(HANDSHAKE_PORT, stream_request_port, control_port)
    }

    pub fn with_handshake_port(
        handshake_port: u16,
        stream_request_port: u16,
        control_port: u16,
    ) -> Self {
        let self_info = Endpoint {
            host_name: host_name(),
            ip: local_ip(),
            handshake_port,
            stream_request_port,
            control_port,
            alive: PEER_TTL,
        };
        Self {
            roster: Arc::new(Mutex::new(Roster::new(self_info.clone()))),
            self_info,
            handshake_port,
            stop_tx: None,
            tasks: Vec::new(),
        }
    }

    /// Start the listener and the prober. Idempotent: a second call first
    /// terminates the running tasks.
    pub async fn init(&mut self) -> anyhow::Result<()> {
        self.terminate().await;

        let (stop_tx, stop_rx) = watch::channel(false);

        let listener = UdpSocket::bind(("0.0.0.0", self.handshake_port))
            .await
            .with_context(|| format!("binding handshake port {}", self.handshake_port))?;

        let prober = UdpSocket::bind("0.0.0.0:0")
            .await
            .context("binding prober socket")?;
        prober.set_broadcast(true).context("enabling broadcast")?;

        info!(
            "Connected as '{}' ({}), handshake on port {}",
            self.self_info.host_name, self.self_info.ip, self.handshake_port
        );

        self.tasks.push(tokio::spawn(listen(
            listener,
            Arc::clone(&self.roster),
            self.self_info.clone(),
            stop_rx.clone(),
        )));
        self.tasks.push(tokio::spawn(probe(
            prober,
            Arc::clone(&self.roster),
            self.self_info.clone(),
            self.handshake_port,
            stop_rx,
        )));
        self.stop_tx = Some(stop_tx);
        Ok(())
    }

    /// Stop both tasks, waiting at most 2 s each.
    pub async fn terminate(&mut self) {
        if let Some(stop) = self.stop_tx.take() {
            let _ = stop.send(true);
        }
        for task in self.tasks.drain(..) {
            if tokio::time::timeout(Duration::from_secs(2), task).await.is_err() {
                warn!("Connection task failed to terminate");
            }
        }
    }

    pub fn num_hosts(&self) -> usize {
        self.roster.lock().unwrap().peers.len()
    }

    /// Endpoint at `index`; 0 is self. Out-of-range yields self.
    pub fn info(&self, index: usize) -> Endpoint {
        let roster = self.roster.lock().unwrap();
        roster.peers.get(index).unwrap_or(&roster.peers[0]).clone()
    }

    pub fn index_of_name(&self, name: &str) -> Option<usize> {
        self.roster.lock().unwrap().index_of_name(name)
    }

    pub fn index_of(&self, endpoint: &Endpoint) -> Option<usize> {
        self.roster.lock().unwrap().index_of(endpoint)
    }
}

// ── Wire format ───────────────────────────────────────────────────────────────

fn hello_args(info: &Endpoint) -> Vec<OscType> {
    vec![
        OscType::String(info.host_name.clone()),
        OscType::Int(info.stream_request_port as i32),
        OscType::Int(info.control_port as i32),
    ]
}

fn endpoint_from(args: &[OscType], ip: String, handshake_port: u16) -> Option<Endpoint> {
    Some(Endpoint {
        host_name: osc::string(args.first()?)?.to_owned(),
        ip,
        handshake_port,
        stream_request_port: u16::try_from(osc::int(args.get(1)?)?).ok()?,
        control_port: u16::try_from(osc::int(args.get(2)?)?).ok()?,
        alive: PEER_TTL,
    })
}

// ── Tasks ─────────────────────────────────────────────────────────────────────

async fn listen(
    socket: UdpSocket,
    roster: Arc<Mutex<Roster>>,
    self_info: Endpoint,
    mut stop_rx: watch::Receiver<bool>,
) {
    let mut buf = vec![0u8; osc::MAX_DATAGRAM];
    loop {
        tokio::select! {
            _ = stop_rx.changed() => break,
            received = socket.recv_from(&mut buf) => {
                let Ok((len, src)) = received else { break };
                let Ok(OscPacket::Message(msg)) = osc::decode(&buf[..len]) else {
                    continue;
                };
                let suffix = msg.addr.strip_prefix(osc::OSC_PREFIX).unwrap_or_default();
                let Some(peer) = endpoint_from(&msg.args, src.ip().to_string(), self_info.handshake_port) else {
                    debug!("Malformed handshake from {src}");
                    continue;
                };
                match suffix {
                    osc::OSC_PING => {
                        if peer == self_info {
                            continue;
                        }
                        if roster.lock().unwrap().record(peer) {
                            debug!("Roster: {} hosts", roster.lock().unwrap().peers.len());
                        }
                        // answer with a self description, straight to the sender
                        let pong = osc::message(osc::OSC_PONG, hello_args(&self_info));
                        if let Ok(bytes) = osc::encode(&pong) {
                            let _ = socket.send_to(&bytes, src).await;
                        }
                    }
                    osc::OSC_PONG => {
                        roster.lock().unwrap().record(peer);
                    }
                    _ => {}
                }
            }
        }
    }
}

async fn probe(
    socket: UdpSocket,
    roster: Arc<Mutex<Roster>>,
    self_info: Endpoint,
    handshake_port: u16,
    mut stop_rx: watch::Receiver<bool>,
) {
    let mut sweep = tokio::time::interval(Duration::from_secs(HANDSHAKE_SWEEP_SECS));
    let mut buf = vec![0u8; osc::MAX_DATAGRAM];
    loop {
        tokio::select! {
            _ = stop_rx.changed() => break,
            _ = sweep.tick() => {
                if roster.lock().unwrap().sweep() {
                    debug!("Roster: {} hosts", roster.lock().unwrap().peers.len());
                }
                let ping = osc::message(osc::OSC_PING, hello_args(&self_info));
                if let Ok(bytes) = osc::encode(&ping) {
                    if let Err(e) = socket
                        .send_to(&bytes, ("255.255.255.255", handshake_port))
                        .await
                    {
                        debug!("Handshake broadcast failed: {e}");
                    }
                }
            }
            received = socket.recv_from(&mut buf) => {
                // pongs come back on the prober socket
                let Ok((len, src)) = received else { break };
                let Ok(OscPacket::Message(msg)) = osc::decode(&buf[..len]) else {
                    continue;
                };
                if msg.addr.strip_prefix(osc::OSC_PREFIX) == Some(osc::OSC_PONG) {
                    if let Some(peer) =
                        endpoint_from(&msg.args, src.ip().to_string(), handshake_port)
                    {
                        if peer != self_info {
                            roster.lock().unwrap().record(peer);
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(name: &str, ip: &str) -> Endpoint {
        Endpoint {
            host_name: name.to_owned(),
            ip: ip.to_owned(),
            ..Endpoint::default()
        }
    }

    #[test]
    fn equality_is_ip_and_handshake_port() {
        let a = peer("alpha", "192.168.1.2");
        let mut b = peer("beta", "192.168.1.2");
        assert_eq!(a, b);
        b.handshake_port += 1;
        assert_ne!(a, b);
    }

    #[test]
    fn self_is_index_zero_and_never_evicted() {
        let mut roster = Roster::new(peer("me", "192.168.1.1"));
        roster.record(peer("other", "192.168.1.2"));
        assert_eq!(roster.peers.len(), 2);
        for _ in 0..PEER_TTL + 1 {
            roster.sweep();
        }
        assert_eq!(roster.peers.len(), 1);
        assert_eq!(roster.peers[0].host_name, "me");
    }

    #[test]
    fn record_refreshes_ttl_of_known_peer() {
        let mut roster = Roster::new(peer("me", "192.168.1.1"));
        roster.record(peer("other", "192.168.1.2"));
        roster.sweep();
        roster.sweep();
        assert_eq!(roster.peers[1].alive, PEER_TTL - 2);
        roster.record(peer("other", "192.168.1.2"));
        assert_eq!(roster.peers[1].alive, PEER_TTL);
    }

    #[test]
    fn record_ignores_self_and_respects_capacity() {
        let me = peer("me", "192.168.1.1");
        let mut roster = Roster::new(me.clone());
        assert!(!roster.record(me));
        for i in 0..MAX_PEERS + 5 {
            roster.record(peer("p", &format!("10.0.0.{i}")));
        }
        assert_eq!(roster.peers.len(), MAX_PEERS);
    }

    #[test]
    fn index_lookup_by_name_and_endpoint() {
        let mut roster = Roster::new(peer("me", "192.168.1.1"));
        roster.record(peer("other", "192.168.1.2"));
        assert_eq!(roster.index_of_name("other"), Some(1));
        assert_eq!(roster.index_of_name("nobody"), None);
        assert_eq!(roster.index_of(&peer("x", "192.168.1.2")), Some(1));
    }

    #[test]
    fn wire_round_trip() {
        let me = peer("me", "192.168.1.1");
        let args = hello_args(&me);
        let back = endpoint_from(&args, "192.168.1.1".into(), me.handshake_port).unwrap();
        assert_eq!(back, me);
        assert_eq!(back.host_name, "me");
    }
}
