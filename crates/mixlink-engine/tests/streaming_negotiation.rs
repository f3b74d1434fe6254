//! Peer stream negotiation scenarios over real UDP sockets.

use std::sync::Arc;
use std::time::Duration;

use rosc::{OscMessage, OscPacket, OscType};
use tokio::net::UdpSocket;

use mixlink_grab::{GrabFabric, GrabberKind};
use mixlink_stream::Streaming;

async fn request(
    client: &UdpSocket,
    replies: &UdpSocket,
    streaming_port: u16,
) -> Option<OscMessage> {
    let reply_port = replies.local_addr().unwrap().port();
    let packet = OscPacket::Message(OscMessage {
        addr: "/mixlink/request".to_owned(),
        args: vec![
            OscType::Int(i32::from(reply_port)),
            OscType::String("probe".to_owned()),
        ],
    });
    client
        .send_to(
            &rosc::encoder::encode(&packet).unwrap(),
            ("127.0.0.1", streaming_port),
        )
        .await
        .unwrap();

    let mut buf = vec![0u8; 1536];
    let (len, _) = tokio::time::timeout(Duration::from_secs(2), replies.recv_from(&mut buf))
        .await
        .ok()?
        .ok()?;
    match rosc::decoder::decode_udp(&buf[..len]).ok()?.1 {
        OscPacket::Message(m) => Some(m),
        _ => None,
    }
}

fn int_arg(msg: &OscMessage, index: usize) -> i32 {
    match msg.args.get(index) {
        Some(OscType::Int(i)) => *i,
        other => panic!("expected int at {index}, got {other:?}"),
    }
}

// Scenario: a localhost request is answered with a shared-memory offer and
// a peer-stream grabber appears in the fabric.
#[tokio::test]
async fn localhost_request_is_offered_shared_memory() {
    let fabric = Arc::new(GrabFabric::new());
    let streaming = Streaming::new(Arc::clone(&fabric));
    streaming.init(0).await.unwrap();
    streaming.enable(true);

    let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let replies = UdpSocket::bind("127.0.0.1:0").await.unwrap();

    let offer = request(&client, &replies, streaming.port())
        .await
        .expect("an offer reply");
    assert_eq!(offer.addr, "/mixlink/offer");
    assert_eq!(offer.args.len(), 4);
    // the media port re-uses the request's source port
    assert_eq!(
        int_arg(&offer, 0),
        i32::from(client.local_addr().unwrap().port())
    );
    // protocol 3 = local shared memory
    assert_eq!(int_arg(&offer, 1), 3);

    assert!(fabric.id_of_kind(GrabberKind::P2P).is_some());
    assert_eq!(streaming.list_streams().len(), 1);

    streaming.terminate().await;
}

// Scenario: after a failed shared-memory disconnect the client is
// blacklisted and re-offered plain JPEG over UDP.
#[tokio::test]
async fn blacklisted_client_falls_back_to_jpeg() {
    let fabric = Arc::new(GrabFabric::new());
    let streaming = Streaming::new(Arc::clone(&fabric));
    streaming.init(0).await.unwrap();
    streaming.enable(true);

    let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let replies = UdpSocket::bind("127.0.0.1:0").await.unwrap();

    let offer = request(&client, &replies, streaming.port())
        .await
        .expect("first offer");
    assert_eq!(int_arg(&offer, 1), 3);
    let media_port = int_arg(&offer, 0);

    // disconnect, flagged as failed
    let disconnect = OscPacket::Message(OscMessage {
        addr: "/mixlink/disconnect".to_owned(),
        args: vec![OscType::Int(media_port), OscType::Bool(true)],
    });
    client
        .send_to(
            &rosc::encoder::encode(&disconnect).unwrap(),
            ("127.0.0.1", streaming.port()),
        )
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    let offer = request(&client, &replies, streaming.port())
        .await
        .expect("second offer");
    // protocol 1 = JPEG over UDP
    assert_eq!(int_arg(&offer, 1), 1);

    streaming.terminate().await;
}

// Disabling the manager rejects new requests and clears the registry.
#[tokio::test]
async fn disabled_manager_rejects_and_clears() {
    let fabric = Arc::new(GrabFabric::new());
    let streaming = Streaming::new(Arc::clone(&fabric));
    streaming.init(0).await.unwrap();
    streaming.enable(true);

    let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let replies = UdpSocket::bind("127.0.0.1:0").await.unwrap();

    let offer = request(&client, &replies, streaming.port())
        .await
        .expect("an offer while enabled");
    assert_eq!(offer.addr, "/mixlink/offer");

    streaming.enable(false);
    assert!(streaming.list_streams().is_empty());
    assert!(!streaming.busy());

    let reply = request(&client, &replies, streaming.port())
        .await
        .expect("a reject while disabled");
    assert_eq!(reply.addr, "/mixlink/reject");

    streaming.terminate().await;
}
