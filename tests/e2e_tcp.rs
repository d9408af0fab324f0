//! End-to-end tests of the stream transport against a mock server.

mod common;

use std::thread;
use std::time::Duration;

use funapi_session::compression::CompressionSet;
use funapi_session::prelude::*;
use serde_json::{Value, json};

use common::{Peer, Recorder, bind_tcp, init_tracing, pump_for, pump_until};

const WAIT: Duration = Duration::from_secs(10);

fn text_of(message: &Message, field: &str) -> Option<String> {
    message
        .as_json()
        .and_then(|body| body.get(field))
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// Open a session, echo one message and close
#[test]
fn test_echo_over_tcp() {
    init_tracing();
    let (listener, port) = bind_tcp();

    let server = thread::spawn(move || {
        let mut peer = Peer::accept(&listener);
        let hello = peer.recv();
        assert!(!hello.contains_key("_msgtype"));
        assert!(!hello.contains_key("_sid"));

        peer.send(json!({"_msgtype": "_session_opened", "_sid": "sid-echo"}));
        let echo = peer.recv_typed("echo");
        assert_eq!(echo["_sid"], json!("sid-echo"));
        peer.send(json!({"_msgtype": "echo", "message": echo["message"].clone()}));
        peer.wait_closed();
    });

    let session = Session::new("127.0.0.1", SessionOptionBuilder::new().build());
    let events = Recorder::new();
    let transport_events = Recorder::new();
    let received = Recorder::new();
    {
        let events = events.clone();
        session.add_session_event_callback(move |_, _, event, session_id, _| {
            events.push((event, session_id.to_string()));
        });
        let transport_events = transport_events.clone();
        session.add_transport_event_callback(move |_, protocol, event, _| {
            transport_events.push((protocol, event));
        });
        let received = received.clone();
        session.add_recv_callback(move |_, protocol, message| {
            received.push((protocol, text_of(message, "message")));
        });
    }

    session
        .connect(TransportProtocol::Tcp, port, Encoding::Json)
        .unwrap();
    assert!(pump_until(&session, WAIT, || events.len() == 1));
    assert_eq!(
        events.items(),
        vec![(SessionEventType::Opened, "sid-echo".to_string())]
    );
    assert_eq!(
        transport_events.items()[0],
        (TransportProtocol::Tcp, TransportEventType::Started)
    );
    assert!(session.is_connected());
    assert_eq!(session.session_id().as_text(), "sid-echo");
    assert_eq!(session.default_protocol(), Some(TransportProtocol::Tcp));

    session.send("echo", r#"{"message":"hello"}"#, None).unwrap();
    assert!(pump_until(&session, WAIT, || received.len() == 1));

    session.close();
    server.join().unwrap();
    pump_for(&session, Duration::from_millis(100));

    assert_eq!(
        received.items(),
        vec![(TransportProtocol::Tcp, Some("hello".to_string()))]
    );
    assert!(!session.is_connected());
}

/// Registered handlers take their type away from the receive callbacks
#[test]
fn test_handler_and_recv_timeout() {
    init_tracing();
    let (listener, port) = bind_tcp();

    let server = thread::spawn(move || {
        let mut peer = Peer::accept(&listener);
        // queued before the connection, so it precedes the hello
        peer.recv_typed("login");
        peer.send(json!({"_msgtype": "_session_opened", "_sid": "sid-handler"}));
        peer.send(json!({"_msgtype": "login", "ok": true}));
        peer.send(json!({"_msgtype": "notice", "text": "welcome"}));
        peer.wait_closed();
    });

    let session = Session::new("127.0.0.1", SessionOptionBuilder::new().build());
    let handled = Recorder::new();
    let received = Recorder::new();
    let timed_out = Recorder::new();
    {
        let handled = handled.clone();
        session.register_handler("login", move |_, _, message| {
            handled.push(message.as_json().and_then(|b| b.get("ok")).cloned());
        });
        let received = received.clone();
        session.add_recv_callback(move |_, _, message| {
            received.push(text_of(message, "_msgtype"));
        });
        let timed_out = timed_out.clone();
        session.add_recv_timeout_callback(move |_, msg_type| {
            timed_out.push(msg_type.clone());
        });
    }

    session
        .connect(TransportProtocol::Tcp, port, Encoding::Json)
        .unwrap();
    // never answered
    session.set_recv_timeout("reward", Duration::from_millis(200));
    session.set_recv_timeout("login", Duration::from_secs(30));
    session.send("login", "", None).unwrap();

    assert!(pump_until(&session, WAIT, || received.len() == 1));
    assert!(pump_until(&session, WAIT, || timed_out.len() == 1));
    session.close();
    server.join().unwrap();

    assert_eq!(handled.items(), vec![Some(json!(true))]);
    assert_eq!(received.items(), vec![Some("notice".to_string())]);
    assert_eq!(timed_out.items(), vec![MessageType::from("reward")]);
    assert!(!session.erase_recv_timeout("login"));
}

/// Compressed bodies in both directions
#[test]
fn test_zstd_compressed_echo() {
    init_tracing();
    let (listener, port) = bind_tcp();
    let long_text = "all work and no play ".repeat(40);
    let expected = long_text.clone();

    let server = thread::spawn(move || {
        let mut compression = CompressionSet::new();
        compression.set_default(CompressionType::Zstd).unwrap();
        let mut peer = Peer::accept(&listener).with_compression(compression);
        let echo = peer.recv_typed("echo");
        assert!(peer.last_compressed);
        assert_eq!(echo["text"], json!(expected));
        peer.send(json!({"_msgtype": "echo", "text": echo["text"].clone()}));
        peer.wait_closed();
    });

    let session = Session::new("127.0.0.1", SessionOptionBuilder::new().build());
    let received = Recorder::new();
    {
        let received = received.clone();
        session.add_recv_callback(move |_, _, message| {
            received.push(text_of(message, "text"));
        });
    }

    let option = TcpOptionBuilder::new()
        .compression(CompressionType::Zstd)
        .build()
        .unwrap();
    session
        .connect_with(option.into(), port, Encoding::Json)
        .unwrap();
    session
        .send("echo", &json!({ "text": long_text }).to_string(), None)
        .unwrap();

    assert!(pump_until(&session, WAIT, || received.len() == 1));
    session.close();
    server.join().unwrap();
    assert_eq!(received.items(), vec![Some(long_text)]);
}

/// Nothing listens on the port: a single failed attempt without reconnect
#[test]
fn test_connection_failed_without_reconnect() {
    init_tracing();
    let (listener, port) = bind_tcp();
    drop(listener);

    let session = Session::new("127.0.0.1", SessionOptionBuilder::new().build());
    let transport_events = Recorder::new();
    {
        let transport_events = transport_events.clone();
        session.add_transport_event_callback(move |_, _, event, error| {
            transport_events.push((event, error.is_some()));
        });
    }

    session
        .connect(TransportProtocol::Tcp, port, Encoding::Json)
        .unwrap();
    assert!(pump_until(&session, WAIT, || transport_events.len() == 1));
    assert_eq!(
        transport_events.items(),
        vec![(TransportEventType::ConnectionFailed, true)]
    );
    assert!(!session.is_connected());
}
