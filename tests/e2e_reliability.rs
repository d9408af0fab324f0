//! End-to-end tests of reliable delivery across a reconnect.

mod common;

use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use funapi_session::prelude::*;
use serde_json::{Value, json};

use common::{Peer, Recorder, bind_tcp, init_tracing, pump_until};

const WAIT: Duration = Duration::from_secs(15);

/// A message the server never acknowledged is sent again, with the same
/// sequence number, after the connection is re-established
#[test]
fn test_reconnect_redelivers_unacked() {
    init_tracing();
    let (listener, port) = bind_tcp();

    let server = thread::spawn(move || {
        let mut first = Peer::accept(&listener);
        first.recv();
        first.send(json!({"_msgtype": "_session_opened", "_sid": "sid-reliable"}));
        let chat = first.recv_typed("chat");
        let seq = chat["_seq"].as_u64().expect("numbered message");
        assert_eq!(chat["text"], json!("one"));
        first.close();

        let mut second = Peer::accept(&listener);
        // the reconnect prompt carries the session id and waits for our ack
        let prompt = second.recv();
        assert_eq!(prompt["_sid"], json!("sid-reliable"));
        assert!(!prompt.contains_key("_msgtype"));
        second.send(json!({ "_ack": seq }));

        let again = second.recv_typed("chat");
        assert_eq!(again["_seq"].as_u64(), Some(seq));
        assert_eq!(again["text"], json!("one"));

        second.send(json!({"_msgtype": "reply", "_seq": 500, "_ack": seq + 1, "text": "got it"}));
        // acknowledgement of our numbered reply
        let ack = second.recv();
        assert_eq!(ack["_ack"], json!(501));
        second.wait_closed();
    });

    let option = SessionOptionBuilder::new().session_reliability(true).build();
    let session = Session::new("127.0.0.1", option);
    let opened = Recorder::new();
    let transport_events = Recorder::new();
    let received = Recorder::new();
    {
        let opened = opened.clone();
        session.add_session_event_callback(move |_, _, event, _, _| {
            opened.push(event);
        });
        let transport_events = transport_events.clone();
        session.add_transport_event_callback(move |_, _, event, _| {
            transport_events.push(event);
        });
        let received = received.clone();
        session.add_recv_callback(move |_, _, message| {
            let text = message
                .as_json()
                .and_then(|body| body.get("text"))
                .and_then(Value::as_str)
                .map(str::to_string);
            received.push(text);
        });
    }

    let tcp = TcpOptionBuilder::new().auto_reconnect(true).build().unwrap();
    session.connect_with(tcp.into(), port, Encoding::Json).unwrap();
    assert!(pump_until(&session, WAIT, || opened.len() == 1));

    session.send("chat", r#"{"text":"one"}"#, None).unwrap();
    assert!(pump_until(&session, WAIT, || received.len() == 1));
    assert_eq!(received.items(), vec![Some("got it".to_string())]);

    let events = transport_events.items();
    assert_eq!(events[0], TransportEventType::Started);
    assert!(events.contains(&TransportEventType::Disconnected));
    assert_eq!(events.last(), Some(&TransportEventType::Started));

    session.close();
    server.join().unwrap();
}

/// Several unacknowledged messages come back in sequence order, exactly
/// once, ahead of a message queued while the connection was down
#[test]
fn test_reconnect_redelivers_in_order_before_new_traffic() {
    init_tracing();
    let (listener, port) = bind_tcp();
    let (queued_tx, queued_rx) = mpsc::channel::<()>();

    let server = thread::spawn(move || {
        let mut first = Peer::accept(&listener);
        first.recv();
        first.send(json!({"_msgtype": "_session_opened", "_sid": "sid-ordered"}));
        let mut seqs = Vec::new();
        for text in ["one", "two", "three"] {
            let chat = first.recv_typed("chat");
            assert_eq!(chat["text"], json!(text));
            seqs.push(chat["_seq"].as_u64().expect("numbered message"));
        }
        let after = |n: u32| u64::from((seqs[0] as u32).wrapping_add(n));
        assert_eq!(seqs, vec![after(0), after(1), after(2)]);
        first.close();

        let mut second = Peer::accept(&listener);
        let prompt = second.recv();
        assert_eq!(prompt["_sid"], json!("sid-ordered"));
        assert!(!prompt.contains_key("_msgtype"));

        // acknowledge only "one", after "four" has been queued
        queued_rx.recv_timeout(WAIT).expect("client queued a message");
        second.send(json!({ "_ack": after(1) }));

        let mut redelivered = Vec::new();
        for _ in 0..3 {
            let chat = second.recv_typed("chat");
            redelivered.push((
                chat["text"].as_str().map(str::to_string),
                chat["_seq"].as_u64(),
            ));
        }
        assert_eq!(
            redelivered,
            vec![
                (Some("two".to_string()), Some(after(1))),
                (Some("three".to_string()), Some(after(2))),
                (Some("four".to_string()), Some(after(3))),
            ]
        );

        second.send(json!({"_msgtype": "reply", "_seq": 900, "_ack": after(4), "text": "all"}));
        second.wait_closed()
    });

    let option = SessionOptionBuilder::new().session_reliability(true).build();
    let session = Session::new("127.0.0.1", option);
    let opened = Recorder::new();
    let transport_events = Recorder::new();
    let received = Recorder::new();
    {
        let opened = opened.clone();
        session.add_session_event_callback(move |_, _, event, _, _| {
            opened.push(event);
        });
        let transport_events = transport_events.clone();
        session.add_transport_event_callback(move |_, _, event, _| {
            transport_events.push(event);
        });
        let received = received.clone();
        session.add_recv_callback(move |_, _, message| {
            if let Some(MessageType::Name(name)) = message.msg_type() {
                received.push(name);
            }
        });
    }

    let tcp = TcpOptionBuilder::new().auto_reconnect(true).build().unwrap();
    session.connect_with(tcp.into(), port, Encoding::Json).unwrap();
    assert!(pump_until(&session, WAIT, || opened.len() == 1));

    for text in ["one", "two", "three"] {
        session
            .send("chat", &json!({ "text": text }).to_string(), None)
            .unwrap();
    }
    assert!(pump_until(&session, WAIT, || {
        transport_events
            .items()
            .contains(&TransportEventType::Disconnected)
    }));

    session.send("chat", r#"{"text":"four"}"#, None).unwrap();
    queued_tx.send(()).unwrap();

    assert!(pump_until(&session, WAIT, || !received.is_empty()));
    assert_eq!(received.items(), vec!["reply".to_string()]);

    session.close();
    let after_reply = server.join().unwrap();
    assert!(!after_reply.contains(&"chat".to_string()));
}
