//! The control endpoint: UDP receiver, dispatch and reply bundles.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Context;
use rosc::{OscMessage, OscPacket, OscType};
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use mixlink_core::ports::{CONTROL_RECEIVE_PORT, CONTROL_SEND_PORT};
use mixlink_net::osc;

use crate::command::{
    self, Command, CurrentCommand, InfoLevel, OutputCommand, SessionCommand, SourceCommand,
    SourceRef,
};
use crate::session::{SessionControl, SourceHandle};
use crate::translator::Translator;

// ── Configuration ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ControlConfig {
    /// Port the receiver listens on (0 for OS-assigned).
    pub receive_port: u16,
    /// Port replies are sent to, on the sender's host.
    pub send_port: u16,
    /// XML translator table, reloaded on `init` and on demand.
    pub translator_file: PathBuf,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            receive_port: CONTROL_RECEIVE_PORT,
            send_port: CONTROL_SEND_PORT,
            translator_file: std::env::temp_dir().join("mixlink_osc.xml"),
        }
    }
}

// ── Control ───────────────────────────────────────────────────────────────────

/// Remote-control endpoint over a session.
pub struct Control {
    session: Arc<dyn SessionControl>,
    translator: Translator,
    config: ControlConfig,
    port: Mutex<u16>,
    stop_tx: Mutex<Option<watch::Sender<bool>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Control {
    pub fn new(session: Arc<dyn SessionControl>, config: ControlConfig) -> Arc<Self> {
        Arc::new(Self {
            session,
            translator: Translator::new(&config.translator_file),
            config,
            port: Mutex::new(0),
            stop_tx: Mutex::new(None),
            task: Mutex::new(None),
        })
    }

    /// Load the translator and start listening. Idempotent: a running
    /// receiver is terminated first.
    pub async fn init(self: &Arc<Self>) -> anyhow::Result<()> {
        self.terminate().await;
        self.translator.reload();

        let socket = UdpSocket::bind(("0.0.0.0", self.config.receive_port))
            .await
            .with_context(|| {
                format!("binding control port {}", self.config.receive_port)
            })?;
        let bound = socket.local_addr().context("reading bound address")?.port();
        *self.port.lock().unwrap() = bound;
        info!("Control listening to UDP on port {bound}");

        let (stop_tx, stop_rx) = watch::channel(false);
        *self.stop_tx.lock().unwrap() = Some(stop_tx);
        let this = Arc::clone(self);
        *self.task.lock().unwrap() = Some(tokio::spawn(receive(this, socket, stop_rx)));
        Ok(())
    }

    /// Break the receive loop; wait at most 2 s, then abandon the receiver.
    pub async fn terminate(&self) {
        if let Some(stop) = self.stop_tx.lock().unwrap().take() {
            let _ = stop.send(true);
        }
        let task = self.task.lock().unwrap().take();
        if let Some(task) = task {
            if tokio::time::timeout(Duration::from_secs(2), task).await.is_err() {
                warn!("Control receiver failed to terminate.");
            }
        }
        *self.port.lock().unwrap() = 0;
    }

    /// Bound receive port (0 while not listening).
    pub fn port(&self) -> u16 {
        *self.port.lock().unwrap()
    }

    pub fn translate(&self, address: &str) -> String {
        self.translator.translate(address)
    }

    pub fn reload_translator(&self) {
        self.translator.reload();
    }

    // ── Dispatch ──────────────────────────────────────────────────────────────

    async fn handle(&self, socket: &UdpSocket, src: SocketAddr, msg: OscMessage) {
        let rendered = osc::pretty(&msg);
        debug!("Control received '{rendered}' from {src}");

        let address = self.translator.translate(&msg.addr);
        let cmd = match command::parse(&address, &msg.args) {
            Ok(cmd) => cmd,
            Err(e) => {
                info!("Ignoring message '{rendered}' from {src}: {e}");
                return;
            }
        };

        let reply_to = SocketAddr::new(src.ip(), self.config.send_port);
        let session = &self.session;

        match cmd {
            Command::Info(InfoLevel::Log) => {
                info!("Control: received '{rendered}' from {src}");
            }
            Command::Info(InfoLevel::Notify) => {
                warn!("Control: received '{rendered}' from {src}");
            }
            Command::Output(cmd) => {
                if apply_output(session.as_ref(), cmd) {
                    self.send_output_status(socket, reply_to).await;
                }
            }
            Command::Session(cmd) => {
                let pad = match cmd {
                    SessionCommand::Version(v) => {
                        // ceil(v) is the distance back from the most recent
                        // snapshot; 0 recalls the most recent
                        let id = v.ceil().max(0.0) as usize;
                        if id < session.snapshot_count() {
                            session.restore_snapshot(id);
                        } else {
                            info!("Snapshot {id} is out of range; ignored");
                        }
                        Some(id)
                    }
                    SessionCommand::Sync => None,
                };
                self.send_output_status(socket, reply_to).await;
                self.send_sources_status(socket, reply_to, pad).await;
            }
            Command::Current(cmd) => match cmd {
                CurrentCommand::Next { pad } => {
                    session.set_current_next();
                    self.send_sources_status(socket, reply_to, to_pad(pad)).await;
                }
                CurrentCommand::Previous { pad } => {
                    session.set_current_previous();
                    self.send_sources_status(socket, reply_to, to_pad(pad)).await;
                }
                CurrentCommand::Select { index, pad } => {
                    if index >= 0 {
                        session.set_current_index(index as usize);
                    }
                    self.send_sources_status(socket, reply_to, to_pad(pad)).await;
                }
                CurrentCommand::Sync { pad } => {
                    self.send_sources_status(socket, reply_to, to_pad(pad)).await;
                }
                CurrentCommand::Apply(cmd) => {
                    if let Some(source) = session.current_source() {
                        if apply_source(source.as_ref(), &cmd) {
                            self.send_current_attributes(socket, reply_to).await;
                        }
                    }
                }
            },
            Command::All(cmd) => {
                if cmd == SourceCommand::Sync {
                    self.send_sources_status(socket, reply_to, None).await;
                } else {
                    for source in session.all_sources() {
                        apply_source(source.as_ref(), &cmd);
                    }
                }
            }
            Command::Selected(cmd) => {
                if cmd == SourceCommand::Sync {
                    self.send_sources_status(socket, reply_to, None).await;
                } else {
                    for source in session.selection() {
                        apply_source(source.as_ref(), &cmd);
                    }
                }
            }
            Command::Source(source_ref, cmd) => {
                let source = match &source_ref {
                    SourceRef::Name(name) => session.find_source(name),
                    SourceRef::Index(index) => usize::try_from(*index)
                        .ok()
                        .and_then(|i| session.source_at(i)),
                };
                let Some(source) = source else {
                    let target = match &source_ref {
                        SourceRef::Name(name) => name.clone(),
                        SourceRef::Index(index) => index.to_string(),
                    };
                    info!("Unknown target '{target}' requested by {src}.");
                    return;
                };
                if cmd == SourceCommand::Sync {
                    self.send_sources_status(socket, reply_to, None).await;
                } else {
                    apply_source(source.as_ref(), &cmd);
                }
            }
        }
    }

    // ── Replies ───────────────────────────────────────────────────────────────

    async fn send_output_status(&self, socket: &UdpSocket, to: SocketAddr) {
        let session = &self.session;
        let bundle = osc::bundle(vec![
            osc::message(
                "/output/enable",
                vec![OscType::Float(if session.render_disabled() { 0.0 } else { 1.0 })],
            ),
            osc::message("/output/fading", vec![OscType::Float(session.fading())]),
        ]);
        send(socket, to, &bundle).await;
    }

    /// Per-source status entries, padded with zeroed entries up to `pad`,
    /// followed by the current-source attributes.
    async fn send_sources_status(
        &self,
        socket: &UdpSocket,
        to: SocketAddr,
        pad: Option<usize>,
    ) {
        let session = &self.session;
        let count = session.source_count();
        let current = session.current_index();

        let mut content = Vec::new();
        for i in 0..count.max(pad.unwrap_or(0)) {
            let selected = current == Some(i) && i < count;
            content.push(osc::message(
                &format!("/current/{i}"),
                vec![OscType::Float(if selected { 1.0 } else { 0.0 })],
            ));
            let alpha = session.source_at(i).map(|s| s.alpha()).unwrap_or(0.0);
            content.push(osc::message(
                &format!("/{i}/alpha"),
                vec![OscType::Float(alpha)],
            ));
        }
        send(socket, to, &osc::bundle(content)).await;

        self.send_current_attributes(socket, to).await;
    }

    async fn send_current_attributes(&self, socket: &UdpSocket, to: SocketAddr) {
        let current = self.session.current_source();
        let (name, play, depth, alpha) = match &current {
            Some(s) => (
                s.name(),
                if s.playing() { 1.0 } else { 0.0 },
                s.depth(),
                s.alpha(),
            ),
            None => (String::new(), 0.0, 0.0, 0.0),
        };
        let bundle = osc::bundle(vec![
            osc::message("/current/name", vec![OscType::String(name)]),
            osc::message("/current/play", vec![OscType::Float(play)]),
            osc::message("/current/depth", vec![OscType::Float(depth)]),
            osc::message("/current/alpha", vec![OscType::Float(alpha)]),
        ]);
        send(socket, to, &bundle).await;
    }
}

fn to_pad(pad: Option<f32>) -> Option<usize> {
    pad.map(|p| p.ceil().max(0.0) as usize)
}

async fn send(socket: &UdpSocket, to: SocketAddr, packet: &OscPacket) {
    match osc::encode(packet) {
        Ok(bytes) => {
            if let Err(e) = socket.send_to(&bytes, to).await {
                debug!("Control reply to {to} failed: {e}");
            }
        }
        Err(e) => debug!("Control reply encoding failed: {e:#}"),
    }
}

// ── Mutation application ──────────────────────────────────────────────────────

/// Apply an output command; true when the command requires feedback.
fn apply_output(session: &dyn SessionControl, cmd: OutputCommand) -> bool {
    match cmd {
        OutputCommand::Enable(v) => {
            session.set_render_disabled(v < 0.5);
            false
        }
        OutputCommand::Disable(v) => {
            session.set_render_disabled(v > 0.5);
            false
        }
        OutputCommand::Fading { target, duration_ms } => {
            session.set_fading_target(target, duration_ms);
            false
        }
        OutputCommand::FadeIn(amount) => {
            session.set_fading_target(session.fading() - amount * 0.01, None);
            true
        }
        OutputCommand::FadeOut(amount) => {
            session.set_fading_target(session.fading() + amount * 0.01, None);
            true
        }
        OutputCommand::Sync => true,
    }
}

/// Apply a source command; true when the command requires feedback.
fn apply_source(source: &dyn SourceHandle, cmd: &SourceCommand) -> bool {
    match cmd {
        SourceCommand::Play(v) => {
            source.set_playing(*v >= 0.5);
            false
        }
        SourceCommand::Pause(v) => {
            source.set_playing(*v < 0.5);
            false
        }
        SourceCommand::Replay => {
            source.replay();
            false
        }
        SourceCommand::Alpha(x) => {
            source.set_alpha(*x);
            false
        }
        // observable mapping: transparency = 1 − alpha
        SourceCommand::Transparency(x) => {
            source.set_alpha(1.0 - *x);
            false
        }
        // loom is a relative alpha nudge, and reports back
        SourceCommand::Loom(x) => {
            source.set_alpha((source.alpha() + 0.01 * *x).clamp(0.0, 1.0));
            true
        }
        SourceCommand::Depth(x) => {
            source.set_depth(*x);
            false
        }
        SourceCommand::Grab { x, y } => {
            source.grab(*x, *y);
            false
        }
        SourceCommand::Resize { x, y } => {
            source.resize(*x, *y);
            false
        }
        SourceCommand::Turn(angle) => {
            source.turn(*angle);
            false
        }
        SourceCommand::Reset => {
            source.reset_geometry();
            false
        }
        SourceCommand::Sync => true,
    }
}

// ── Receive loop ──────────────────────────────────────────────────────────────

fn flatten(packet: OscPacket) -> Vec<OscMessage> {
    match packet {
        OscPacket::Message(m) => vec![m],
        OscPacket::Bundle(b) => b.content.into_iter().flat_map(flatten).collect(),
    }
}

async fn receive(control: Arc<Control>, socket: UdpSocket, mut stop_rx: watch::Receiver<bool>) {
    let mut buf = vec![0u8; osc::MAX_DATAGRAM];
    loop {
        tokio::select! {
            _ = stop_rx.changed() => break,
            received = socket.recv_from(&mut buf) => {
                let Ok((len, src)) = received else { break };
                match osc::decode(&buf[..len]) {
                    Ok(packet) => {
                        for msg in flatten(packet) {
                            control.handle(&socket, src, msg).await;
                        }
                    }
                    Err(e) => debug!("Undecodable control datagram from {src}: {e:#}"),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct MockSource {
        playing: AtomicBool,
        alpha: StdMutex<f32>,
        calls: StdMutex<Vec<String>>,
    }

    impl SourceHandle for MockSource {
        fn name(&self) -> String {
            "mock".to_owned()
        }
        fn playing(&self) -> bool {
            self.playing.load(Ordering::SeqCst)
        }
        fn alpha(&self) -> f32 {
            *self.alpha.lock().unwrap()
        }
        fn depth(&self) -> f32 {
            0.0
        }
        fn set_playing(&self, playing: bool) {
            self.playing.store(playing, Ordering::SeqCst);
        }
        fn replay(&self) {
            self.calls.lock().unwrap().push("replay".to_owned());
        }
        fn set_alpha(&self, alpha: f32) {
            *self.alpha.lock().unwrap() = alpha;
        }
        fn set_depth(&self, _depth: f32) {}
        fn grab(&self, dx: f32, dy: f32) {
            self.calls.lock().unwrap().push(format!("grab {dx} {dy}"));
        }
        fn resize(&self, _sx: f32, _sy: f32) {}
        fn turn(&self, angle: f32) {
            self.calls.lock().unwrap().push(format!("turn {angle}"));
        }
        fn reset_geometry(&self) {
            self.calls.lock().unwrap().push("reset".to_owned());
        }
    }

    #[test]
    fn transparency_is_inverse_alpha() {
        let source = MockSource::default();
        apply_source(&source, &SourceCommand::Transparency(0.3));
        assert!((source.alpha() - 0.7).abs() < 1e-6);
    }

    #[test]
    fn loom_nudges_alpha_and_requests_feedback() {
        let source = MockSource::default();
        source.set_alpha(0.5);
        assert!(apply_source(&source, &SourceCommand::Loom(10.0)));
        assert!((source.alpha() - 0.6).abs() < 1e-6);
        // clamped at 1
        apply_source(&source, &SourceCommand::Loom(1000.0));
        assert_eq!(source.alpha(), 1.0);
    }

    #[test]
    fn pause_inverts_play_threshold() {
        let source = MockSource::default();
        apply_source(&source, &SourceCommand::Play(1.0));
        assert!(source.playing());
        apply_source(&source, &SourceCommand::Pause(1.0));
        assert!(!source.playing());
        // 'pause 0' resumes
        apply_source(&source, &SourceCommand::Pause(0.0));
        assert!(source.playing());
    }
}
