//! `RumqttcLink` against a scripted broker on a local TCP socket

use onenet_device::config::BrokerSection;
use onenet_device::transport::mqtt::{ReconnectConfig, TopicBuilder};
use onenet_device::transport::{
    BrokerLink, ConnectRequest, LinkEvent, TransportError, MQTT_V311_PROTOCOL_LEVEL,
};
use onenet_device::RumqttcLink;
use rumqttc::ConnectReturnCode;
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_test::{assert_err, assert_ok};

const CONNECT: u8 = 0x10;
const SUBSCRIBE: u8 = 0x82;
const DISCONNECT: u8 = 0xE0;

async fn read_packet(stream: &mut TcpStream) -> std::io::Result<(u8, Vec<u8>)> {
    let header = stream.read_u8().await?;
    let mut len = 0usize;
    let mut shift = 0;
    loop {
        let byte = stream.read_u8().await?;
        len |= ((byte & 0x7f) as usize) << shift;
        if byte & 0x80 == 0 {
            break;
        }
        shift += 7;
    }
    let mut body = vec![0; len];
    stream.read_exact(&mut body).await?;
    Ok((header, body))
}

fn encode(header: u8, body: &[u8]) -> Vec<u8> {
    let mut packet = vec![header];
    let mut len = body.len();
    loop {
        let mut byte = (len % 128) as u8;
        len /= 128;
        if len > 0 {
            byte |= 0x80;
        }
        packet.push(byte);
        if len == 0 {
            break;
        }
    }
    packet.extend_from_slice(body);
    packet
}

fn connack(session_present: bool, code: u8) -> Vec<u8> {
    encode(0x20, &[session_present as u8, code])
}

/// SUBACK answering every filter in `subscribe` with `code`
fn suback(subscribe: &[u8], code: u8) -> Vec<u8> {
    let mut filters = 0;
    let mut at = 2;
    while at < subscribe.len() {
        let len = u16::from_be_bytes([subscribe[at], subscribe[at + 1]]) as usize;
        at += 2 + len + 1;
        filters += 1;
    }
    let mut body = subscribe[..2].to_vec();
    body.extend(std::iter::repeat(code).take(filters));
    encode(0x90, &body)
}

fn publish(topic: &str, payload: &[u8]) -> Vec<u8> {
    let mut body = (topic.len() as u16).to_be_bytes().to_vec();
    body.extend_from_slice(topic.as_bytes());
    body.extend_from_slice(payload);
    encode(0x30, &body)
}

/// Accept one client and answer its CONNECT
async fn accept(listener: &TcpListener, session_present: bool, code: u8) -> (TcpStream, Vec<u8>) {
    let (mut stream, _) = listener.accept().await.unwrap();
    let (header, connect) = read_packet(&mut stream).await.unwrap();
    assert_eq!(header, CONNECT);
    stream
        .write_all(&connack(session_present, code))
        .await
        .unwrap();
    (stream, connect)
}

/// Read until the client sends DISCONNECT or goes away
async fn drain(mut stream: TcpStream) -> bool {
    while let Ok((header, _)) = read_packet(&mut stream).await {
        if header == DISCONNECT {
            return true;
        }
    }
    false
}

fn link(port: u16, reconnect: ReconnectConfig) -> RumqttcLink {
    let broker = BrokerSection {
        url: format!("mqtt://127.0.0.1:{port}"),
        allow_plaintext: true,
        connack_timeout_secs: 5,
        ..BrokerSection::default()
    };
    RumqttcLink::new(broker, reconnect)
}

fn fast_retries(max_attempts: Option<u32>) -> ReconnectConfig {
    ReconnectConfig {
        max_attempts,
        backoff_pattern: vec![10],
        sustained_delay: 10,
    }
}

fn request() -> ConnectRequest {
    ConnectRequest {
        client_id: "dev-01".to_string(),
        username: "abc".to_string(),
        password: "version=2018-10-31&res=products%2Fabc%2Fdevices%2Fdev-01".to_string(),
        ca_path: PathBuf::from("/nonexistent/onenet_ca_0"),
        clean_session: false,
        protocol_level: MQTT_V311_PROTOCOL_LEVEL,
    }
}

async fn listener() -> (TcpListener, u16) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    (listener, port)
}

#[tokio::test]
async fn test_connect_sends_persistent_v311_session() {
    let (listener, port) = listener().await;
    let broker = tokio::spawn(async move {
        let (stream, connect) = accept(&listener, false, 0).await;
        (connect, drain(stream).await)
    });

    let mut link = link(port, fast_retries(None));
    let ack = assert_ok!(link.connect(request()).await);
    assert!(!ack.session_present);
    assert!(link.is_open());
    assert_ok!(link.disconnect().await);

    let (connect, saw_disconnect) = broker.await.unwrap();
    // protocol name "MQTT", level, flags
    assert_eq!(&connect[2..6], b"MQTT");
    assert_eq!(connect[6], MQTT_V311_PROTOCOL_LEVEL);
    assert_eq!(connect[7] & 0x02, 0, "clean session must be off");
    assert_eq!(connect[7] & 0xC0, 0xC0, "username and password must be set");
    assert!(saw_disconnect);
    assert!(!link.is_open());
}

#[tokio::test]
async fn test_subscribe_waits_for_suback_and_keeps_early_messages() {
    let topics = TopicBuilder::new("abc", "dev-01");
    let set_topic = topics.property_set();
    let (listener, port) = listener().await;
    let broker = tokio::spawn(async move {
        let (mut stream, _) = accept(&listener, false, 0).await;
        let (header, subscribe) = read_packet(&mut stream).await.unwrap();
        assert_eq!(header, SUBSCRIBE);
        let mut reply = publish(&set_topic, br#"{"id":"1"}"#);
        reply.extend(suback(&subscribe, 0x00));
        stream.write_all(&reply).await.unwrap();
        drain(stream).await
    });

    let mut link = link(port, fast_retries(None));
    assert_ok!(link.connect(request()).await);
    assert_ok!(link.subscribe(topics.subscription_filters()).await);

    match assert_ok!(link.next_event().await) {
        LinkEvent::Message(message) => {
            assert_eq!(message.topic, topics.property_set());
            assert_eq!(message.payload_lossy(), r#"{"id":"1"}"#);
        }
        other => panic!("expected the buffered message, got {other:?}"),
    }

    assert_ok!(link.disconnect().await);
    assert!(broker.await.unwrap());
}

#[tokio::test]
async fn test_rejected_filter_fails_subscribe_but_link_can_disconnect() {
    let (listener, port) = listener().await;
    let broker = tokio::spawn(async move {
        let (mut stream, _) = accept(&listener, false, 0).await;
        let (_, subscribe) = read_packet(&mut stream).await.unwrap();
        stream.write_all(&suback(&subscribe, 0x80)).await.unwrap();
        drain(stream).await
    });

    let mut link = link(port, fast_retries(None));
    assert_ok!(link.connect(request()).await);
    let err = assert_err!(
        link.subscribe(TopicBuilder::new("abc", "dev-01").subscription_filters())
            .await
    );

    assert!(matches!(err, TransportError::Request { .. }));
    assert!(err.to_string().contains("rejected"));
    assert!(link.is_open());
    assert_ok!(link.disconnect().await);
    assert!(broker.await.unwrap());
}

#[tokio::test]
async fn test_dropped_connection_reconnects_with_session_present() {
    let (listener, port) = listener().await;
    let broker = tokio::spawn(async move {
        let (first, _) = accept(&listener, false, 0).await;
        drop(first);
        let (second, _) = accept(&listener, true, 0).await;
        drain(second).await
    });

    let mut link = link(port, fast_retries(None));
    assert_ok!(link.connect(request()).await);

    let event = tokio::time::timeout(Duration::from_secs(5), link.next_event())
        .await
        .unwrap();
    assert_eq!(
        assert_ok!(event),
        LinkEvent::Reconnected {
            session_present: true
        }
    );

    assert_ok!(link.disconnect().await);
    assert!(broker.await.unwrap());
}

#[tokio::test]
async fn test_giving_up_closes_the_link() {
    let (listener, port) = listener().await;
    let mut link = link(port, fast_retries(Some(1)));
    let broker = tokio::spawn(async move {
        let (stream, _) = accept(&listener, false, 0).await;
        // closing both ends makes every reconnect attempt fail
        drop(stream);
        drop(listener);
    });

    assert_ok!(link.connect(request()).await);
    broker.await.unwrap();

    let event = tokio::time::timeout(Duration::from_secs(5), link.next_event())
        .await
        .unwrap();
    assert_err!(event);
    assert!(!link.is_open());
    assert_ok!(link.disconnect().await);
    assert_eq!(assert_ok!(link.next_event().await), LinkEvent::Closed);
}

#[tokio::test]
async fn test_refused_connack_reports_return_code() {
    let (listener, port) = listener().await;
    tokio::spawn(async move {
        let (stream, _) = accept(&listener, false, 5).await;
        drain(stream).await
    });

    let mut link = link(port, fast_retries(None));
    let err = assert_err!(link.connect(request()).await);

    assert_eq!(err.return_code(), Some(ConnectReturnCode::NotAuthorized));
    assert_eq!(err.client_id(), Some("dev-01"));
    assert!(!link.is_open());
}
