//! End-to-end control scenarios over real UDP sockets on OS-assigned ports.

use std::sync::Arc;
use std::time::Duration;

use rosc::{OscMessage, OscPacket, OscType};
use tokio::net::UdpSocket;

use mixlink_control::{Control, ControlConfig, SessionControl, SourceHandle};
use mixlink_engine::Session;

fn flatten(packet: OscPacket) -> Vec<OscMessage> {
    match packet {
        OscPacket::Message(m) => vec![m],
        OscPacket::Bundle(b) => b.content.into_iter().flat_map(flatten).collect(),
    }
}

/// Collect reply messages until the endpoint goes quiet.
async fn collect_replies(socket: &UdpSocket) -> Vec<OscMessage> {
    let mut messages = Vec::new();
    let mut buf = vec![0u8; 4096];
    while let Ok(Ok((len, _))) =
        tokio::time::timeout(Duration::from_millis(500), socket.recv_from(&mut buf)).await
    {
        if let Ok((_, packet)) = rosc::decoder::decode_udp(&buf[..len]) {
            messages.extend(flatten(packet));
        }
    }
    messages
}

struct Harness {
    control: Arc<Control>,
    session: Arc<Session>,
    sender: UdpSocket,
    replies: UdpSocket,
    _dir: tempfile::TempDir,
}

async fn harness(session: Arc<Session>) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let replies = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let send_port = replies.local_addr().unwrap().port();

    let control = Control::new(
        Arc::clone(&session) as Arc<dyn SessionControl>,
        ControlConfig {
            receive_port: 0,
            send_port,
            translator_file: dir.path().join("osc.xml"),
        },
    );
    control.init().await.unwrap();

    let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    sender
        .connect(("127.0.0.1", control.port()))
        .await
        .unwrap();

    Harness {
        control,
        session,
        sender,
        replies,
        _dir: dir,
    }
}

async fn send(harness: &Harness, addr: &str, args: Vec<OscType>) {
    let packet = OscPacket::Message(OscMessage {
        addr: addr.to_owned(),
        args,
    });
    harness
        .sender
        .send(&rosc::encoder::encode(&packet).unwrap())
        .await
        .unwrap();
}

fn float_of<'a>(messages: &'a [OscMessage], addr: &str) -> Option<f32> {
    messages.iter().find(|m| m.addr == addr).and_then(|m| {
        m.args.first().and_then(|a| match a {
            OscType::Float(f) => Some(*f),
            _ => None,
        })
    })
}

// Scenario: `/mixlink/session/version f v` restores the snapshot ceil(v)
// steps back from the most recent (0 is the most recent; ceil(v) at or past
// the list size is a no-op) and replies with at least the output status
// bundle.
#[tokio::test]
async fn snapshot_recall_restores_and_reports() {
    let session = Session::new();
    let first = session.add_source("gradient");
    session.add_source("checker");

    first.set_alpha(0.25);
    session.take_snapshot(); // distance 2 at send time: the oldest
    first.set_alpha(0.5);
    session.take_snapshot(); // distance 1
    first.set_alpha(0.75);
    session.take_snapshot(); // distance 0: the most recent
    first.set_alpha(1.0);

    let h = harness(session).await;
    send(&h, "/mixlink/session/version", vec![OscType::Float(2.0)]).await;
    let replies = collect_replies(&h.replies).await;

    // two steps back from the most recent: the oldest, alpha 0.25
    assert!((h.session.source_at(0).unwrap().alpha() - 0.25).abs() < 1e-6);

    assert!(float_of(&replies, "/mixlink/output/enable").is_some());
    assert!(float_of(&replies, "/mixlink/output/fading").is_some());

    // distance 0 recalls the most recent snapshot
    send(&h, "/mixlink/session/version", vec![OscType::Float(0.0)]).await;
    collect_replies(&h.replies).await;
    assert!((h.session.source_at(0).unwrap().alpha() - 0.75).abs() < 1e-6);

    // a distance equal to the list size is a no-op
    send(&h, "/mixlink/session/version", vec![OscType::Float(3.0)]).await;
    collect_replies(&h.replies).await;
    assert!((h.session.source_at(0).unwrap().alpha() - 0.75).abs() < 1e-6);

    h.control.terminate().await;
}

// Scenario: with 3 sources and current index 1, `/mixlink/current/next`
// moves the cursor to 2 and reports per-source status plus alphas.
#[tokio::test]
async fn current_next_reports_source_status() {
    let session = Session::new();
    session.add_source("a");
    session.add_source("b");
    session.add_source("c");
    session.set_current_index(1);

    let h = harness(session).await;
    send(&h, "/mixlink/current/next", vec![]).await;
    let replies = collect_replies(&h.replies).await;

    assert_eq!(h.session.current_index(), Some(2));

    assert_eq!(float_of(&replies, "/mixlink/current/0"), Some(0.0));
    assert_eq!(float_of(&replies, "/mixlink/current/1"), Some(0.0));
    assert_eq!(float_of(&replies, "/mixlink/current/2"), Some(1.0));
    for i in 0..3 {
        assert!(
            float_of(&replies, &format!("/mixlink/{i}/alpha")).is_some(),
            "missing alpha status for source {i}"
        );
    }
    // current-source attributes ride along
    assert!(replies.iter().any(|m| m.addr == "/mixlink/current/name"));

    h.control.terminate().await;
}

// Malformed and mistyped messages are dropped without any reply or state
// change.
#[tokio::test]
async fn malformed_messages_are_ignored() {
    let session = Session::new();
    session.add_source("a");

    let h = harness(session).await;
    send(&h, "/other/output/enable", vec![]).await;
    send(
        &h,
        "/mixlink/output/fading",
        vec![OscType::String("loud".to_owned())],
    )
    .await;
    send(&h, "/mixlink/current/alpha", vec![]).await;
    let replies = collect_replies(&h.replies).await;

    assert!(replies.is_empty());
    assert!(!h.session.render_disabled());
    assert_eq!(h.session.source_at(0).unwrap().alpha(), 1.0);

    h.control.terminate().await;
}

// Commands mutate exactly as specified: enable/disable thresholds, fading
// target, per-source geometry.
#[tokio::test]
async fn output_and_source_mutations_apply() {
    let session = Session::new();
    session.add_source("a");

    let h = harness(session).await;

    send(&h, "/mixlink/output/enable", vec![OscType::Float(0.0)]).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(h.session.render_disabled());

    send(&h, "/mixlink/output/enable", vec![]).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!h.session.render_disabled());

    send(
        &h,
        "/mixlink/output/fading",
        vec![OscType::Float(0.8), OscType::Float(200.0)],
    )
    .await;
    send(&h, "/mixlink/a/transparency", vec![OscType::Float(0.3)]).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    h.session.tick(Duration::from_millis(400));
    assert!((h.session.fading() - 0.8).abs() < 1e-6);
    assert!((h.session.source_at(0).unwrap().alpha() - 0.7).abs() < 1e-6);

    h.control.terminate().await;
}

// The translator rewrites foreign addresses before parsing.
#[tokio::test]
async fn translator_maps_foreign_addresses() {
    let dir = tempfile::tempdir().unwrap();
    let translator_file = dir.path().join("osc.xml");
    std::fs::write(
        &translator_file,
        "<translator>\
           <osc><from>/deck/blackout</from><to>/mixlink/output/disable</to></osc>\
         </translator>",
    )
    .unwrap();

    let session = Session::new();
    let replies = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let control = Control::new(
        Arc::clone(&session) as Arc<dyn SessionControl>,
        ControlConfig {
            receive_port: 0,
            send_port: replies.local_addr().unwrap().port(),
            translator_file,
        },
    );
    control.init().await.unwrap();

    let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let packet = OscPacket::Message(OscMessage {
        addr: "/deck/blackout".to_owned(),
        args: vec![],
    });
    sender
        .send_to(
            &rosc::encoder::encode(&packet).unwrap(),
            ("127.0.0.1", control.port()),
        )
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(session.render_disabled());

    control.terminate().await;
}
