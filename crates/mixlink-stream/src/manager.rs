//! The streaming manager: negotiates and maintains peer stream sessions.
//!
//! Protocol on the stream-request port (all OSC over UDP):
//!
//! ```text
//! peer ──► /mixlink/request    is <reply_port> <client_name>
//! us   ──► /mixlink/offer      iiii <port> <protocol> <width> <height>
//!      or  /mixlink/reject     (manager disabled)
//! peer ──► /mixlink/disconnect i [T]     (port, optional failed flag)
//! ```
//!
//! The media stream re-uses the requester's UDP source port — the peer just
//! proved it can allocate it. Protocol choice: shared memory for local
//! requesters (unless the client failed shared memory before and is
//! blacklisted), H.264 when the low-bandwidth preference is set, JPEG
//! otherwise.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Context;
use rosc::{OscPacket, OscType};
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use mixlink_core::{StreamConfig, StreamProtocol};
use mixlink_grab::{FrameGrabber, GrabFabric, GrabberId};
use mixlink_net::endpoint::is_local;
use mixlink_net::osc;

use crate::streamer::VideoStreamer;

// ── Registry ──────────────────────────────────────────────────────────────────

/// Non-owning handle to one live stream; the fabric owns the grabber.
#[derive(Debug, Clone)]
pub struct StreamHandle {
    pub grabber: GrabberId,
    pub config: StreamConfig,
}

#[derive(Default)]
struct Registry {
    streams: Vec<StreamHandle>,
    /// Clients that failed shared-memory transfer; never offered SHM again.
    blacklist: Vec<String>,
}

// ── Streaming ─────────────────────────────────────────────────────────────────

pub struct Streaming {
    fabric: Arc<GrabFabric>,
    enabled: AtomicBool,
    /// Prefer H.264 over JPEG for remote peers.
    low_bandwidth: AtomicBool,
    registry: Mutex<Registry>,
    port: Mutex<u16>,
    stop_tx: Mutex<Option<watch::Sender<bool>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Streaming {
    pub fn new(fabric: Arc<GrabFabric>) -> Arc<Self> {
        Arc::new(Self {
            fabric,
            enabled: AtomicBool::new(false),
            low_bandwidth: AtomicBool::new(false),
            registry: Mutex::new(Registry::default()),
            port: Mutex::new(0),
            stop_tx: Mutex::new(None),
            task: Mutex::new(None),
        })
    }

    /// Bind the request port (0 for OS-assigned) and start answering.
    pub async fn init(self: &Arc<Self>, port: u16) -> anyhow::Result<()> {
        self.terminate().await;

        let socket = UdpSocket::bind(("0.0.0.0", port))
            .await
            .with_context(|| format!("binding stream request port {port}"))?;
        let bound = socket.local_addr().context("reading bound address")?.port();
        *self.port.lock().unwrap() = bound;
        info!("Stream requests expected on port {bound}");

        let (stop_tx, stop_rx) = watch::channel(false);
        *self.stop_tx.lock().unwrap() = Some(stop_tx);
        let this = Arc::clone(self);
        *self.task.lock().unwrap() = Some(tokio::spawn(listen(this, socket, stop_rx)));
        Ok(())
    }

    pub async fn terminate(&self) {
        if let Some(stop) = self.stop_tx.lock().unwrap().take() {
            let _ = stop.send(true);
        }
        let task = self.task.lock().unwrap().take();
        if let Some(task) = task {
            if tokio::time::timeout(Duration::from_secs(2), task).await.is_err() {
                warn!("Stream listener failed to terminate");
            }
        }
    }

    /// Port the listener is bound to (0 before `init`).
    pub fn port(&self) -> u16 {
        *self.port.lock().unwrap()
    }

    // ── Policy ────────────────────────────────────────────────────────────────

    /// Accept (`true`) or refuse new requests. Disabling also stops every
    /// live stream, synchronously under the registry lock.
    pub fn enable(&self, on: bool) {
        self.enabled.store(on, Ordering::SeqCst);
        if on {
            info!("Accepting stream requests.");
        } else {
            let mut registry = self.registry.lock().unwrap();
            for stream in registry.streams.drain(..) {
                self.fabric.stop(stream.grabber);
            }
            info!("Refusing stream requests. No streaming ongoing.");
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn set_low_bandwidth(&self, on: bool) {
        self.low_bandwidth.store(on, Ordering::SeqCst);
    }

    fn choose_protocol(&self, client_ip: &str, blacklisted: bool) -> StreamProtocol {
        if is_local(client_ip) && !blacklisted {
            StreamProtocol::ShmLocal
        } else if self.low_bandwidth.load(Ordering::SeqCst) {
            StreamProtocol::H264Udp
        } else {
            StreamProtocol::JpegUdp
        }
    }

    // ── Observation (UI side: never blocks) ───────────────────────────────────

    /// Any registered stream currently sending. `try_lock` so the caller
    /// (typically a UI tick) never waits on the negotiation path.
    pub fn busy(&self) -> bool {
        match self.registry.try_lock() {
            Ok(registry) => registry
                .streams
                .iter()
                .any(|s| self.fabric.busy_id(s.grabber)),
            Err(_) => false,
        }
    }

    pub fn list_streams(&self) -> Vec<String> {
        match self.registry.try_lock() {
            Ok(mut registry) => {
                let fabric = &self.fabric;
                // drop handles whose grabber self-finished and was collected
                registry.streams.retain(|s| fabric.contains(s.grabber));
                registry
                    .streams
                    .iter()
                    .filter_map(|s| fabric.info(s.grabber, false))
                    .collect()
            }
            Err(_) => Vec::new(),
        }
    }

    // ── Stream lifecycle ──────────────────────────────────────────────────────

    /// Start an un-negotiated stream to a known receiver (scripted use).
    pub fn add_stream(&self, client_ip: &str, port: u16, client_name: &str) {
        let blacklisted = self
            .registry
            .lock()
            .unwrap()
            .blacklist
            .iter()
            .any(|n| n == client_name);
        let config = StreamConfig {
            protocol: self.choose_protocol(client_ip, blacklisted),
            client_name: client_name.to_owned(),
            client_ip: client_ip.to_owned(),
            port,
            width: self.fabric.width(),
            height: self.fabric.height(),
        };
        self.register(config);
    }

    /// Stop every stream towards `client_name`.
    pub fn remove_streams_named(&self, client_name: &str) {
        let mut registry = self.registry.lock().unwrap();
        registry.streams.retain(|s| {
            if s.config.client_name == client_name {
                info!(
                    "Ending streaming to {}:{}",
                    s.config.client_ip, s.config.port
                );
                self.fabric.stop(s.grabber);
                false
            } else {
                true
            }
        });
    }

    fn register(&self, config: StreamConfig) -> StreamHandle {
        let grabber = self
            .fabric
            .add(FrameGrabber::new(VideoStreamer::new(config.clone())));
        let handle = StreamHandle { grabber, config };
        self.registry.lock().unwrap().streams.push(handle.clone());
        handle
    }

    // ── Inbound messages ──────────────────────────────────────────────────────

    async fn handle_request(
        &self,
        socket: &UdpSocket,
        src: SocketAddr,
        args: &[OscType],
    ) {
        let (Some(reply_port), Some(client_name)) = (
            args.first().and_then(osc::int),
            args.get(1).and_then(osc::string),
        ) else {
            debug!("Malformed stream request from {src}");
            return;
        };
        let Ok(reply_port) = u16::try_from(reply_port) else {
            debug!("Invalid reply port in stream request from {src}");
            return;
        };
        let client_ip = src.ip().to_string();
        let reply_to = (client_ip.as_str(), reply_port);

        if !self.enabled() {
            let reject = osc::message(osc::OSC_STREAM_REJECT, vec![]);
            if let Ok(bytes) = osc::encode(&reject) {
                let _ = socket.send_to(&bytes, reply_to).await;
            }
            warn!(
                "A streaming request from {client_ip} came in and was refused. \
                 Enable sharing on the local network to accept it."
            );
            return;
        }

        info!("{client_ip}:{} wants a stream.", src.port());

        let blacklisted = self
            .registry
            .lock()
            .unwrap()
            .blacklist
            .iter()
            .any(|n| n == client_name);
        let config = StreamConfig {
            protocol: self.choose_protocol(&client_ip, blacklisted),
            client_name: client_name.to_owned(),
            client_ip: client_ip.clone(),
            // the port the request came from is free on the peer: re-use it
            port: src.port(),
            width: self.fabric.width(),
            height: self.fabric.height(),
        };

        let offer = osc::message(
            osc::OSC_STREAM_OFFER,
            vec![
                OscType::Int(i32::from(config.port)),
                OscType::Int(config.protocol.as_i32()),
                OscType::Int(config.width as i32),
                OscType::Int(config.height as i32),
            ],
        );
        if let Ok(bytes) = osc::encode(&offer) {
            let _ = socket.send_to(&bytes, reply_to).await;
        }

        info!(
            "Starting streaming to {}:{} ({})",
            config.client_ip,
            config.port,
            config.protocol.label()
        );
        self.register(config);
    }

    fn handle_disconnect(&self, src: SocketAddr, args: &[OscType]) {
        let Some(port) = args.first().and_then(osc::int) else {
            debug!("Malformed disconnect from {src}");
            return;
        };
        let failed = args.get(1).and_then(osc::boolean).unwrap_or(false);
        let sender_ip = src.ip().to_string();

        let mut registry = self.registry.lock().unwrap();
        let Some(pos) = registry.streams.iter().position(|s| {
            s.config.client_ip == sender_ip && i32::from(s.config.port) == port
        }) else {
            debug!("{sender_ip}:{port} asked to disconnect an unknown stream");
            return;
        };
        let removed = registry.streams.remove(pos);
        self.fabric.stop(removed.grabber);

        if failed && removed.config.protocol == StreamProtocol::ShmLocal {
            info!(
                "{} failed to connect shared memory.",
                removed.config.client_name
            );
            registry.blacklist.push(removed.config.client_name);
        } else {
            info!("{sender_ip}:{port} does not need streaming anymore.");
        }
    }
}

// ── Listener task ─────────────────────────────────────────────────────────────

async fn listen(
    streaming: Arc<Streaming>,
    socket: UdpSocket,
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
                match msg.addr.strip_prefix(osc::OSC_PREFIX) {
                    Some(osc::OSC_STREAM_REQUEST) => {
                        streaming.handle_request(&socket, src, &msg.args).await;
                    }
                    Some(osc::OSC_STREAM_DISCONNECT) => {
                        streaming.handle_disconnect(src, &msg.args);
                    }
                    _ => debug!("Ignoring '{}' from {src}", msg.addr),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_choice_follows_policy() {
        let streaming = Streaming::new(Arc::new(GrabFabric::new()));
        assert_eq!(
            streaming.choose_protocol("127.0.0.1", false),
            StreamProtocol::ShmLocal
        );
        // blacklisted localhost falls back to the network default
        assert_eq!(
            streaming.choose_protocol("127.0.0.1", true),
            StreamProtocol::JpegUdp
        );
        assert_eq!(
            streaming.choose_protocol("203.0.113.9", false),
            StreamProtocol::JpegUdp
        );
        streaming.set_low_bandwidth(true);
        assert_eq!(
            streaming.choose_protocol("203.0.113.9", false),
            StreamProtocol::H264Udp
        );
    }
}
