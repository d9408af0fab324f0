//! End-to-end tests of a server-initiated redirect.

mod common;

use std::net::TcpListener;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use funapi_session::prelude::*;
use serde_json::json;

use common::{Peer, Recorder, bind_tcp, init_tracing, pump_until};

const WAIT: Duration = Duration::from_secs(10);

/// Old server: opens the session, then sends everyone to `new_port`.
fn spawn_old_server(listener: TcpListener, new_port: u16) -> JoinHandle<()> {
    thread::spawn(move || {
        let mut peer = Peer::accept(&listener);
        peer.recv();
        peer.send(json!({"_msgtype": "_session_opened", "_sid": "sid-old"}));
        peer.recv_typed("ready");
        peer.send(json!({
            "_msgtype": "_sc_redirect",
            "token": "tok-1",
            "host": "127.0.0.1",
            "flavor": "game,pvp",
            "ports": [{"port": new_port, "protocol": 1, "encoding": 1}],
        }));
        peer.wait_closed();
    })
}

struct Observed {
    events: Recorder<(SessionEventType, Option<EventError>)>,
    received: Recorder<String>,
}

fn observe(session: &Session) -> Observed {
    let events = Recorder::new();
    let received = Recorder::new();
    {
        let events = events.clone();
        session.add_session_event_callback(move |_, _, event, _, error| {
            events.push((event, error.cloned()));
        });
        let received = received.clone();
        session.add_recv_callback(move |_, _, message| {
            if let Some(MessageType::Name(name)) = message.msg_type() {
                received.push(name);
            }
        });
    }
    Observed { events, received }
}

fn event_types(observed: &Observed) -> Vec<SessionEventType> {
    observed.events.items().into_iter().map(|(e, _)| e).collect()
}

/// Messages sent while redirecting reach the new server, in order, once
/// it accepts the token
#[test]
fn test_redirect_releases_held_messages() {
    init_tracing();
    let (old_listener, old_port) = bind_tcp();
    let (new_listener, new_port) = bind_tcp();
    let old_server = spawn_old_server(old_listener, new_port);

    let new_server = thread::spawn(move || {
        let mut peer = Peer::accept(&new_listener);
        let hello = peer.recv();
        assert!(!hello.contains_key("_sid"));
        peer.send(json!({"_msgtype": "_session_opened", "_sid": "sid-new"}));

        let connect = peer.recv_typed("_cs_redirect_connect");
        assert_eq!(connect["token"], json!("tok-1"));
        assert_eq!(connect["_sid"], json!("sid-new"));
        peer.send(json!({"_msgtype": "_cs_redirect_connect", "result": 0}));

        let first = peer.recv();
        let second = peer.recv();
        assert_eq!(first["_msgtype"], json!("queued_1"));
        assert_eq!(second["_msgtype"], json!("queued_2"));
        peer.send(json!({"_msgtype": "welcome"}));
        peer.wait_closed();
    });

    let option = SessionOptionBuilder::new().use_redirect_queue(true).build();
    let session = Session::new("127.0.0.1", option);
    let observed = observe(&session);
    let vetted = Recorder::new();
    {
        let vetted = vetted.clone();
        session.set_redirect_queue_callback(move |protocol, previous, current, queue| {
            vetted.push((protocol, previous.to_vec(), current.to_vec(), queue.len()));
        });
    }

    session
        .connect(TransportProtocol::Tcp, old_port, Encoding::Json)
        .unwrap();
    assert!(pump_until(&session, WAIT, || observed.events.len() == 1));
    session.send("ready", "", None).unwrap();

    assert!(pump_until(&session, WAIT, || session.is_redirecting()));
    session.send("queued_1", "", None).unwrap();
    session.send("queued_2", "", None).unwrap();

    assert!(pump_until(&session, WAIT, || !observed.received.is_empty()));
    assert_eq!(observed.received.items(), vec!["welcome".to_string()]);
    assert_eq!(
        event_types(&observed),
        vec![
            SessionEventType::Opened,
            SessionEventType::RedirectStarted,
            SessionEventType::RedirectSucceeded,
        ]
    );
    assert_eq!(
        vetted.items(),
        vec![(
            TransportProtocol::Tcp,
            Vec::<String>::new(),
            vec!["game".to_string(), "pvp".to_string()],
            2
        )]
    );
    assert!(!session.is_redirecting());
    assert_eq!(session.session_id().as_text(), "sid-new");
    assert_eq!(session.host(), "127.0.0.1");

    session.close();
    old_server.join().unwrap();
    new_server.join().unwrap();
}

/// A rejected token ends the redirect with the reason attached
#[test]
fn test_redirect_rejected_token() {
    init_tracing();
    let (old_listener, old_port) = bind_tcp();
    let (new_listener, new_port) = bind_tcp();
    let old_server = spawn_old_server(old_listener, new_port);

    let new_server = thread::spawn(move || {
        let mut peer = Peer::accept(&new_listener);
        peer.recv();
        peer.send(json!({"_msgtype": "_session_opened", "_sid": "sid-new"}));
        peer.recv_typed("_cs_redirect_connect");
        peer.send(json!({"_msgtype": "_cs_redirect_connect", "result": 1}));
        peer.wait_closed()
    });

    let option = SessionOptionBuilder::new().use_redirect_queue(true).build();
    let session = Session::new("127.0.0.1", option);
    let observed = observe(&session);

    session
        .connect(TransportProtocol::Tcp, old_port, Encoding::Json)
        .unwrap();
    assert!(pump_until(&session, WAIT, || observed.events.len() == 1));
    session.send("ready", "", None).unwrap();
    assert!(pump_until(&session, WAIT, || session.is_redirecting()));
    session.send("held", "", None).unwrap();

    assert!(pump_until(&session, WAIT, || observed.events.len() == 3));
    let events = observed.events.items();
    assert_eq!(events[2].0, SessionEventType::RedirectFailed);
    let error = events[2].1.clone().expect("failure reason");
    assert_eq!(error.error_type, ErrorType::Redirect);
    assert_eq!(error.redirect_code(), Some(RedirectErrorCode::InvalidToken));
    assert!(!session.is_redirecting());

    session.close();
    old_server.join().unwrap();
    // the held message was discarded with the failed redirect
    let seen = new_server.join().unwrap();
    assert!(!seen.contains(&"held".to_string()));
}
