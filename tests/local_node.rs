//! Same-node messaging, links and receive semantics, all without any
//! network dependency: a node only talks to the port mapper once published.

use erlink::pattern::{atom, int_bind, pid_bind, tuple, Capture};
use erlink::{Error, Node, Term};
use std::time::Duration;

fn node(name: &str) -> Node {
    Node::create(name, "secret").expect("node creation is local")
}

#[test]
fn send_by_pid_and_match() {
    let n = node("local1@127.0.0.1");
    let sender = n.create_mailbox();
    let receiver = n.create_mailbox();

    sender
        .send(
            receiver.pid(),
            &Term::tuple(vec![Term::atom("count"), Term::int(42)]),
        )
        .unwrap();

    let msg = receiver.receive_timeout(Duration::from_secs(1)).unwrap();
    let value = Capture::new();
    assert!(msg.matches(&tuple(vec![atom("count"), int_bind(&value)])));
    assert_eq!(value.get(), Some(42));
}

#[test]
fn send_by_registered_name() {
    let n = node("local2@127.0.0.1");
    let worker = n.create_mailbox_named("worker").unwrap();
    let client = n.create_mailbox();

    client
        .send_to_name(
            "worker",
            &Term::tuple(vec![Term::atom("job"), Term::Pid(client.pid().clone())]),
        )
        .unwrap();

    let msg = worker.receive_timeout(Duration::from_secs(1)).unwrap();
    let from = Capture::new();
    assert!(msg.matches(&tuple(vec![atom("job"), pid_bind(&from)])));
    assert_eq!(from.get().as_ref(), Some(client.pid()));

    // The captured pid is routable.
    worker.send(&from.get().unwrap(), &Term::atom("done")).unwrap();
    let reply = client.receive_timeout(Duration::from_secs(1)).unwrap();
    assert!(reply.matches(&atom("done")));
}

#[test]
fn send_reg_to_own_node_delivers_locally() {
    let n = node("local3@127.0.0.1");
    let target = n.create_mailbox_named("echo").unwrap();
    let client = n.create_mailbox();

    client
        .send_reg("echo", "local3@127.0.0.1", &Term::int(7))
        .unwrap();

    let msg = target.receive_timeout(Duration::from_secs(1)).unwrap();
    assert!(msg.matches(&erlink::pattern::int(7)));
}

#[test]
fn unknown_destinations_fail_delivery() {
    let n = node("local4@127.0.0.1");
    let mailbox = n.create_mailbox();

    let err = mailbox
        .send_to_name("nobody", &Term::atom("hi"))
        .unwrap_err();
    assert!(matches!(err, Error::DeliveryFailure(name) if name == "nobody"));

    let ghost = erlink::Pid::new("local4@127.0.0.1", 9999, 0, 0);
    assert!(matches!(
        mailbox.send(&ghost, &Term::atom("hi")),
        Err(Error::DeliveryFailure(_))
    ));
}

#[test]
fn duplicate_names_are_rejected_and_freed_on_drop() {
    let n = node("local5@127.0.0.1");

    let first = n.create_mailbox_named("single").unwrap();
    assert!(n.create_mailbox_named("single").is_err());

    drop(first);
    // The name is reusable once the previous owner is gone.
    let second = n.create_mailbox_named("single").unwrap();
    assert_eq!(second.name(), Some("single"));
}

#[test]
fn receive_timeout_expires_empty() {
    let n = node("local6@127.0.0.1");
    let mailbox = n.create_mailbox();

    let start = std::time::Instant::now();
    let err = mailbox
        .receive_timeout(Duration::from_millis(50))
        .unwrap_err();
    assert!(matches!(err, Error::ReceiveTimeout));
    assert!(start.elapsed() >= Duration::from_millis(50));
}

#[test]
fn receive_wakes_across_threads_in_send_order() {
    let n = node("local7@127.0.0.1");
    let receiver = n.create_mailbox();
    let sender = n.create_mailbox();
    let to = receiver.pid().clone();

    let handle = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(30));
        for i in 0..5 {
            sender.send(&to, &Term::int(i)).unwrap();
        }
    });

    for expected in 0..5 {
        let msg = receiver.receive_timeout(Duration::from_secs(2)).unwrap();
        let got = Capture::new();
        assert!(msg.matches(&int_bind(&got)));
        assert_eq!(got.get(), Some(expected), "delivery out of order");
    }
    handle.join().unwrap();
}

#[test]
fn closing_a_linked_mailbox_breaks_the_link_first() {
    let n = node("local8@127.0.0.1");
    let m1 = n.create_mailbox();
    let m2 = n.create_mailbox();
    let observer = n.create_mailbox();
    let m2_pid = m2.pid().clone();

    m1.link(&m2_pid).unwrap();
    m2.close();

    // A message enqueued after the break must come second.
    observer.send(m1.pid(), &Term::atom("later")).unwrap();

    match m1.receive_timeout(Duration::from_secs(1)) {
        Err(Error::LinkBroken { reason, pid }) => {
            assert_eq!(reason, "normal");
            assert_eq!(pid, m2_pid);
        }
        other => panic!("expected a broken link, got {other:?}"),
    }

    let msg = m1.receive_timeout(Duration::from_secs(1)).unwrap();
    assert!(msg.matches(&atom("later")));
}

#[test]
fn link_is_idempotent_and_unlink_clears_it() {
    let n = node("local9@127.0.0.1");
    let m1 = n.create_mailbox();
    let m2 = n.create_mailbox();

    m1.link(m2.pid()).unwrap();
    m1.link(m2.pid()).unwrap();
    m1.unlink(m2.pid()).unwrap();
    // A second unlink is a no-op.
    m1.unlink(m2.pid()).unwrap();

    // With no link left, closing m2 must not signal m1.
    m2.close();
    assert!(matches!(
        m1.receive_timeout(Duration::from_millis(50)),
        Err(Error::ReceiveTimeout)
    ));
}

#[test]
fn link_breaks_symmetrically() {
    let n = node("local10@127.0.0.1");

    // Close the side that requested the link.
    let m1 = n.create_mailbox();
    let m2 = n.create_mailbox();
    let m1_pid = m1.pid().clone();
    m1.link(m2.pid()).unwrap();
    m1.close();
    match m2.receive_timeout(Duration::from_secs(1)) {
        Err(Error::LinkBroken { reason, pid }) => {
            assert_eq!(reason, "normal");
            assert_eq!(pid, m1_pid);
        }
        other => panic!("expected a broken link, got {other:?}"),
    }
}

#[test]
fn dropping_a_mailbox_closes_it() {
    let n = node("local11@127.0.0.1");
    let m1 = n.create_mailbox();
    let m2 = n.create_mailbox();
    let m2_pid = m2.pid().clone();

    m1.link(&m2_pid).unwrap();
    drop(m2);

    assert!(matches!(
        m1.receive_timeout(Duration::from_secs(1)),
        Err(Error::LinkBroken { reason, pid }) if reason == "normal" && pid == m2_pid
    ));
}

#[test]
fn invalid_node_names_are_rejected() {
    assert!(matches!(
        Node::create("no-at-sign", "cookie"),
        Err(Error::InvalidNodeName(_))
    ));
    assert!(Node::create("bad name@host", "cookie").is_err());
    assert!(Node::create("name@", "cookie").is_err());
}

#[test]
fn fresh_node_has_no_connections() {
    let n = node("local12@127.0.0.1");
    assert!(n.connected_nodes().is_empty());
    assert_eq!(n.name(), "local12@127.0.0.1");
}
