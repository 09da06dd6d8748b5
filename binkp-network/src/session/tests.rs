use super::*;
use crate::testing::Node;
use std::time::Duration;

pub(super) const CLIENT: FtnAddress = FtnAddress::new(2, 5020, 1, 0);
const SERVER: FtnAddress = FtnAddress::new(2, 5020, 2, 0);
const PASSWORD: &str = "s3cr3t";

fn remote() -> SocketAddr {
    "127.0.0.1:24554".parse().unwrap()
}

fn nul(text: &str) -> Frame {
    Frame::command(Command::Nul, text)
}

pub(super) fn command(command: Command, argument: &str) -> Frame {
    Frame::command(command, argument)
}

pub(super) fn drain(session: &mut Session, now: Instant) -> Vec<Frame> {
    std::iter::from_fn(|| session.next_frame(now)).collect()
}

/// an originating session, past the handshake with a remote announcing
/// the given version
pub(super) fn transferring(node: &Node, version: &str, now: Instant) -> Session {
    let mut session = Session::originate(node.context(), remote(), now);
    session.start(now);
    drain(&mut session, now);

    session.receive(nul(&format!("VER remote/1.0 {}", version)), now);
    session.receive(command(Command::Adr, "2:5020/2@fidonet"), now);
    assert_eq!(drain(&mut session, now), vec![command(Command::Pwd, "-")]);

    session.receive(command(Command::Ok, "(U) Unsecure connection with 2:5020/1"), now);
    assert_eq!(session.phase(), Phase::Transfer);
    session
}

/// run the two sessions against each other until they stop talking
fn exchange(client: &mut Session, server: &mut Session, now: Instant) {
    client.start(now);
    server.start(now);

    for _ in 0..10_000 {
        let mut progress = false;
        client.poll(now);
        server.poll(now);

        while let Some(frame) = client.next_frame(now) {
            progress = true;
            server.receive(frame, now);
        }
        while let Some(frame) = server.next_frame(now) {
            progress = true;
            client.receive(frame, now);
        }

        if !progress {
            return;
        }
    }

    panic!("the sessions never settled");
}

#[test]
fn greeting_of_the_originating_side() {
    let now = Instant::now();
    let node = Node::new(CLIENT);
    let mut session = Session::originate(node.context(), remote(), now);

    assert_eq!(session.start(now), Flow::Continue);
    assert_eq!(session.phase(), Phase::Addr);

    let frames = drain(&mut session, now);
    assert_eq!(frames.len(), 7);
    for (frame, keyword) in frames.iter().zip(&["SYS ", "ZYZ ", "LOC ", "NDL ", "VER ", "TIME "]) {
        match frame {
            Frame::Command {
                command: Command::Nul,
                argument,
            } => assert!(argument.starts_with(keyword), "{}", argument),
            frame => panic!("unexpected frame {}", frame),
        }
    }
    assert_eq!(frames[4], nul(&format!("VER {} binkp/1.1", SOFTWARE)));
    assert_eq!(frames[6], command(Command::Adr, "2:5020/1@fidonet"));
}

#[test]
fn greeting_of_the_answering_side() {
    let now = Instant::now();
    let node = Node::new(SERVER);
    let mut session = Session::answer(node.context(), remote(), now);

    session.start(now);
    let frames = drain(&mut session, now);

    assert_eq!(frames.len(), 7);
    match frames.last() {
        Some(Frame::Command {
            command: Command::Nul,
            argument,
        }) => {
            let challenge = argument.strip_prefix("OPT CRAM-MD5-").unwrap();
            assert_eq!(challenge.len(), Challenge::SIZE * 2);
        }
        frame => panic!("unexpected frame {:?}", frame),
    }
}

#[test]
fn one_valid_address_among_malformed_ones() {
    let now = Instant::now();
    let node = Node::new(SERVER);
    let mut session = Session::answer(node.context(), remote(), now);
    session.start(now);
    drain(&mut session, now);

    session.receive(
        command(Command::Adr, "5020/1 2:5020/1@fidonet 2:50x0/3"),
        now,
    );

    assert_eq!(session.phase(), Phase::Auth);
    assert_eq!(session.addresses(), &[CLIENT]);
    assert!(node.registry.is_active(&CLIENT));
    assert_eq!(session.active.len(), 1);
    assert_eq!(
        drain(&mut session, now),
        vec![command(Command::Adr, "2:5020/2@fidonet")]
    );

    session.finish(now);
    assert!(!node.registry.is_active(&CLIENT));
}

#[test]
fn no_valid_address() {
    let now = Instant::now();
    let node = Node::new(SERVER);
    let mut session = Session::answer(node.context(), remote(), now);
    session.start(now);
    drain(&mut session, now);

    let flow = session.receive(command(Command::Adr, "garbage 1/2"), now);

    assert_eq!(flow, Flow::Close);
    assert_eq!(session.phase(), Phase::Error);
    assert_eq!(
        drain(&mut session, now),
        vec![command(Command::Err, "No valid address specified")]
    );
}

#[test]
fn second_session_with_the_same_address_is_busy() {
    let now = Instant::now();
    let node = Node::new(CLIENT);

    let mut first = Session::originate(node.context(), remote(), now);
    let mut second = Session::originate(node.context(), remote(), now);
    first.start(now);
    second.start(now);
    drain(&mut first, now);
    drain(&mut second, now);

    assert_eq!(
        first.receive(command(Command::Adr, "2:5020/2@fidonet"), now),
        Flow::Continue
    );
    assert_eq!(
        second.receive(command(Command::Adr, "2:5020/2@fidonet"), now),
        Flow::Close
    );

    assert_eq!(first.phase(), Phase::Auth);
    assert_eq!(second.phase(), Phase::End);
    assert_eq!(
        drain(&mut second, now),
        vec![command(Command::Bsy, "Already connected with 2:5020/2")]
    );

    let event = second.finish(now);
    assert_eq!(
        event.outcome,
        Outcome::LocalBusy("Already connected with 2:5020/2".to_owned())
    );
    assert!(node.registry.is_active(&SERVER));
}

#[test]
fn too_many_connections() {
    let now = Instant::now();
    let mut node = Node::new(SERVER);
    node.registry = Registry::new(1);

    let mut first = Session::answer(node.context(), remote(), now);
    let mut second = Session::answer(node.context(), remote(), now);

    assert_eq!(first.start(now), Flow::Continue);
    assert_eq!(second.start(now), Flow::Close);
    assert_eq!(
        drain(&mut second, now),
        vec![command(Command::Bsy, "Too many connections")]
    );

    second.finish(now);
    first.finish(now);
    assert_eq!(node.registry.connections(), 0);
}

#[test]
fn one_item_with_a_baseline_remote() {
    let now = Instant::now();
    let node = Node::new(CLIENT);
    node.outbound.add(SERVER, "00000001.pkt", b"0123456789");

    let mut session = Session::originate(node.context(), remote(), now);
    session.start(now);
    let greeting = drain(&mut session, now);
    assert_eq!(greeting.len(), 7);
    assert_eq!(greeting[6], command(Command::Adr, "2:5020/1@fidonet"));

    session.receive(nul("SYS remote station"), now);
    session.receive(nul("VER remote/1.0 binkp/1.0"), now);
    session.receive(command(Command::Adr, "2:5020/2@fidonet"), now);
    assert_eq!(session.version(), Version::V1_0);
    assert_eq!(drain(&mut session, now), vec![command(Command::Pwd, "-")]);

    session.receive(command(Command::Ok, "(U) Unsecure connection with 2:5020/1"), now);
    assert_eq!(
        drain(&mut session, now),
        vec![
            command(Command::File, "00000001.pkt 10 1600000000 0"),
            Frame::data(&b"0123456789"[..]),
        ]
    );

    assert_eq!(session.poll(now), Flow::Continue);
    assert!(drain(&mut session, now).is_empty());

    session.receive(command(Command::Got, "00000001.pkt 10 1600000000"), now);
    assert_eq!(drain(&mut session, now), vec![Frame::bare(Command::Eob)]);

    assert_eq!(session.receive(Frame::bare(Command::Eob), now), Flow::Close);
    assert_eq!(session.phase(), Phase::End);

    let event = session.finish(now);
    assert!(event.is_success());
    assert!(!event.secure);
    assert_eq!(event.address, Some(SERVER));
    assert_eq!(
        event.totals,
        Totals {
            files_sent: 1,
            files_received: 0,
            bytes_sent: 10,
            bytes_received: 0,
        }
    );
    assert_eq!(node.outbound.remaining(), 0);
    assert_eq!(node.events.events(), vec![event]);
}

#[test]
fn new_batch_after_a_transfer_with_an_extended_remote() {
    let now = Instant::now();
    let node = Node::new(CLIENT);
    node.outbound.add(SERVER, "00000001.pkt", b"0123456789");

    let mut session = transferring(&node, "binkp/1.1", now);
    assert_eq!(session.version(), Version::V1_1);
    assert_eq!(drain(&mut session, now).len(), 2);
    session.poll(now);

    session.receive(command(Command::Got, "00000001.pkt 10 1600000000"), now);
    assert_eq!(drain(&mut session, now), vec![Frame::bare(Command::Eob)]);

    // both sides sent M_EOB after 10 bytes: a new batch starts
    assert_eq!(session.receive(Frame::bare(Command::Eob), now), Flow::Continue);
    assert_eq!(session.phase(), Phase::Transfer);
    assert_eq!(session.batch_bytes, 0);
    assert!(!session.remote_eob);
    assert_eq!(session.totals().bytes_sent, 10);

    // nothing in the new batch
    assert_eq!(drain(&mut session, now), vec![Frame::bare(Command::Eob)]);
    assert_eq!(session.receive(Frame::bare(Command::Eob), now), Flow::Close);
    assert_eq!(session.phase(), Phase::End);
    assert_eq!(session.outcome(), Some(&Outcome::Completed));
}

#[test]
fn empty_batch_ends_the_session() {
    let now = Instant::now();
    let node = Node::new(CLIENT);

    let mut session = transferring(&node, "binkp/1.1", now);
    assert_eq!(drain(&mut session, now), vec![Frame::bare(Command::Eob)]);

    assert_eq!(session.receive(Frame::bare(Command::Eob), now), Flow::Close);
    assert_eq!(session.phase(), Phase::End);
}

#[test]
fn resumed_item_is_requested_from_the_start() {
    let now = Instant::now();
    let node = Node::new(CLIENT);
    let mut session = transferring(&node, "binkp/1.0", now);
    drain(&mut session, now);

    session.receive(command(Command::File, "a.pkt 100 5 50"), now);

    assert_eq!(
        drain(&mut session, now),
        vec![command(Command::Get, "a.pkt 100 5 0")]
    );
    assert!(session.incoming.is_none());
}

#[test]
fn receive_an_item() {
    let now = Instant::now();
    let node = Node::new(CLIENT);
    let mut session = transferring(&node, "binkp/1.0", now);
    drain(&mut session, now);

    session.receive(command(Command::File, "my\\x20file.pkt 5 7 0"), now);
    session.receive(Frame::data(&b"abc"[..]), now);
    assert!(drain(&mut session, now).is_empty());

    // the last frame is longer than announced
    session.receive(Frame::data(&b"defgh"[..]), now);
    assert_eq!(
        drain(&mut session, now),
        vec![command(Command::Got, "my\\x20file.pkt 5 7")]
    );

    let received = node.inbound.received();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].0, ItemInfo::new("my file.pkt", 5, 7));
    assert_eq!(received[0].1, b"abcde");
    assert_eq!(session.totals().bytes_received, 5);
    assert_eq!(session.totals().files_received, 1);
    assert_eq!(node.registry.reserved(), 0);
}

#[test]
fn received_item_is_acknowledged_with_the_announced_name() {
    let now = Instant::now();
    let node = Node::new(CLIENT);
    let mut session = transferring(&node, "binkp/1.0", now);
    drain(&mut session, now);

    // a Latin-1 name, not valid UTF-8 once unescaped
    session.receive(command(Command::File, "f\\xe9.pkt 3 7 0"), now);
    session.receive(Frame::data(&b"abc"[..]), now);

    assert_eq!(
        drain(&mut session, now),
        vec![command(Command::Got, "f\\xe9.pkt 3 7")]
    );
    let received = node.inbound.received();
    assert_eq!(received[0].0.name(), "f\u{e9}.pkt");
}

#[test]
fn received_in_memory_without_temporary_directory() {
    let now = Instant::now();
    let mut node = Node::new(CLIENT);
    node.config.temp_directory = "/nonexistent/binkp".into();
    node.config.max_memory_size = 16;
    let mut session = transferring(&node, "binkp/1.0", now);
    drain(&mut session, now);

    session.receive(command(Command::File, "a.pkt 3 7 0"), now);
    session.receive(Frame::data(&b"abc"[..]), now);
    assert_eq!(
        drain(&mut session, now),
        vec![command(Command::Got, "a.pkt 3 7")]
    );
    assert_eq!(node.inbound.received()[0].1, b"abc");

    // too large to be kept in memory
    session.receive(command(Command::File, "b.pkt 100 7 0"), now);
    assert_eq!(
        drain(&mut session, now),
        vec![command(Command::Skip, "b.pkt 100 7")]
    );
    assert!(session.incoming.is_none());
    assert_eq!(node.registry.reserved(), 0);
    assert_eq!(session.phase(), Phase::Transfer);
}

#[test]
fn new_item_discards_the_unfinished_one() {
    let now = Instant::now();
    let node = Node::new(CLIENT);
    let mut session = transferring(&node, "binkp/1.0", now);
    drain(&mut session, now);

    session.receive(command(Command::File, "a.pkt 5 7 0"), now);
    session.receive(Frame::data(&b"ab"[..]), now);
    session.receive(command(Command::File, "b.pkt 3 7 0"), now);
    assert_eq!(node.registry.reserved(), 3);

    session.receive(Frame::data(&b"xyz"[..]), now);
    assert_eq!(
        drain(&mut session, now),
        vec![command(Command::Got, "b.pkt 3 7")]
    );

    let received = node.inbound.received();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].0, ItemInfo::new("b.pkt", 3, 7));
    assert_eq!(received[0].1, b"xyz");
    assert_eq!(session.totals().files_received, 1);
    assert_eq!(node.registry.reserved(), 0);
}

#[test]
fn receive_an_empty_item() {
    let now = Instant::now();
    let node = Node::new(CLIENT);
    let mut session = transferring(&node, "binkp/1.0", now);
    drain(&mut session, now);

    session.receive(command(Command::File, "empty.pkt 0 7 0"), now);

    assert_eq!(
        drain(&mut session, now),
        vec![command(Command::Got, "empty.pkt 0 7")]
    );
    assert_eq!(node.inbound.received()[0].1, b"");
}

#[test]
fn refused_items_are_skipped() {
    let now = Instant::now();
    let mut node = Node::new(CLIENT);
    node.inbound.refuse = true;
    let mut session = transferring(&node, "binkp/1.0", now);
    drain(&mut session, now);

    session.receive(command(Command::File, "a.pkt 3 7 0"), now);
    session.receive(Frame::data(&b"abc"[..]), now);

    assert_eq!(
        drain(&mut session, now),
        vec![command(Command::Skip, "a.pkt 3 7")]
    );
    assert_eq!(session.phase(), Phase::Transfer);
}

#[test]
fn not_enough_space_in_the_inbound() {
    let now = Instant::now();
    let mut node = Node::new(CLIENT);
    node.inbound.free_space = 2;
    let mut session = transferring(&node, "binkp/1.0", now);
    drain(&mut session, now);

    session.receive(command(Command::File, "a.pkt 3 7 0"), now);

    assert_eq!(
        drain(&mut session, now),
        vec![command(Command::Skip, "a.pkt 3 7")]
    );
    assert!(session.incoming.is_none());
}

#[test]
fn skipped_items_are_not_offered_again() {
    let now = Instant::now();
    let node = Node::new(CLIENT);
    node.outbound.add(SERVER, "a.pkt", b"abc");

    let mut session = transferring(&node, "binkp/1.0", now);
    assert_eq!(drain(&mut session, now).len(), 2);
    session.poll(now);

    session.receive(command(Command::Skip, "a.pkt 3 1600000000"), now);

    assert_eq!(drain(&mut session, now), vec![Frame::bare(Command::Eob)]);
    assert_eq!(node.outbound.remaining(), 1);
}

#[test]
fn resend_from_the_requested_offset() {
    let now = Instant::now();
    let node = Node::new(CLIENT);
    node.outbound.add(SERVER, "a.pkt", b"0123456789");

    let mut session = transferring(&node, "binkp/1.0", now);
    drain(&mut session, now);

    session.receive(command(Command::Get, "a.pkt 10 1600000000 4"), now);

    assert_eq!(
        drain(&mut session, now),
        vec![
            command(Command::File, "a.pkt 10 1600000000 4"),
            Frame::data(&b"456789"[..]),
        ]
    );
}

#[test]
fn items_are_sent_in_chunks() {
    let now = Instant::now();
    let mut node = Node::new(CLIENT);
    node.config.frame_size = 4;
    node.outbound.add(SERVER, "a.pkt", b"0123456789");

    let mut session = transferring(&node, "binkp/1.0", now);
    let mut frames = drain(&mut session, now);
    for _ in 0..3 {
        session.poll(now);
        frames.extend(drain(&mut session, now));
    }

    assert_eq!(
        frames,
        vec![
            command(Command::File, "a.pkt 10 1600000000 0"),
            Frame::data(&b"0123"[..]),
            Frame::data(&b"4567"[..]),
            Frame::data(&b"89"[..]),
        ]
    );
}

#[test]
fn queued_chunks_are_not_overwritten() {
    let now = Instant::now();
    let mut node = Node::new(CLIENT);
    node.config.frame_size = 4;
    node.outbound.add(SERVER, "a.pkt", b"0123456789");

    // the frames stay queued while the next chunks are read
    let mut session = transferring(&node, "binkp/1.0", now);
    for _ in 0..3 {
        session.poll(now);
    }

    assert_eq!(
        drain(&mut session, now),
        vec![
            command(Command::File, "a.pkt 10 1600000000 0"),
            Frame::data(&b"0123"[..]),
            Frame::data(&b"4567"[..]),
            Frame::data(&b"89"[..]),
        ]
    );
}

#[test]
fn invalid_password() {
    let now = Instant::now();
    let node = Node::new(SERVER).link(CLIENT, PASSWORD);
    let mut session = Session::answer(node.context(), remote(), now);
    session.start(now);
    session.receive(command(Command::Adr, "2:5020/1@fidonet"), now);
    drain(&mut session, now);

    assert_eq!(
        session.receive(command(Command::Pwd, "wrong"), now),
        Flow::Close
    );
    assert_eq!(
        drain(&mut session, now),
        vec![command(Command::Err, "Invalid password")]
    );
    assert_eq!(
        session.finish(now).outcome,
        Outcome::Protocol("Invalid password".to_owned())
    );
}

#[test]
fn plain_password_is_accepted() {
    let now = Instant::now();
    let node = Node::new(SERVER).link(CLIENT, PASSWORD);
    let mut session = Session::answer(node.context(), remote(), now);
    session.start(now);
    session.receive(command(Command::Adr, "2:5020/1@fidonet"), now);
    drain(&mut session, now);

    session.receive(command(Command::Pwd, PASSWORD), now);

    assert_eq!(session.phase(), Phase::Transfer);
    assert!(session.is_secure());
    assert_eq!(
        drain(&mut session, now),
        vec![
            command(Command::Ok, "(S) Secure connection with 2:5020/1"),
            Frame::bare(Command::Eob),
        ]
    );
}

#[test]
fn unlisted_node_is_accepted_unsecure() {
    let now = Instant::now();
    let node = Node::new(SERVER);
    let mut session = Session::answer(node.context(), remote(), now);
    session.start(now);
    session.receive(command(Command::Adr, "2:5020/1@fidonet"), now);
    drain(&mut session, now);

    session.receive(command(Command::Pwd, "-"), now);

    assert!(!session.is_secure());
    assert_eq!(
        drain(&mut session, now)[0],
        command(Command::Ok, "(U) Unsecure connection with 2:5020/1")
    );
}

#[test]
fn plain_password_without_challenge() {
    let now = Instant::now();
    let node = Node::new(CLIENT).link(SERVER, PASSWORD);
    let mut session = Session::originate(node.context(), remote(), now);
    session.start(now);
    drain(&mut session, now);

    session.receive(command(Command::Adr, "2:5020/2@fidonet"), now);

    assert_eq!(
        drain(&mut session, now),
        vec![command(Command::Pwd, PASSWORD)]
    );
}

#[test]
fn command_out_of_phase() {
    let now = Instant::now();
    let node = Node::new(CLIENT);
    let mut session = Session::originate(node.context(), remote(), now);
    session.start(now);
    drain(&mut session, now);

    assert_eq!(
        session.receive(command(Command::File, "a.pkt 1 1 0"), now),
        Flow::Close
    );
    assert_eq!(
        drain(&mut session, now),
        vec![command(Command::Err, "Unexpected M_FILE")]
    );
    assert_eq!(session.phase(), Phase::Error);
}

#[test]
fn remote_busy_and_error() {
    let now = Instant::now();
    let node = Node::new(CLIENT);

    let mut session = Session::originate(node.context(), remote(), now);
    session.start(now);
    assert_eq!(
        session.receive(command(Command::Bsy, "Too many connections"), now),
        Flow::Close
    );
    assert_eq!(session.phase(), Phase::End);
    assert!(!session.finish(now).is_success());

    let mut session = Session::originate(node.context(), remote(), now);
    session.start(now);
    session.receive(command(Command::Err, "go away"), now);
    assert_eq!(session.phase(), Phase::Error);
    assert_eq!(
        session.finish(now).outcome,
        Outcome::RemoteError("go away".to_owned())
    );
}

#[test]
fn handshake_timeout() {
    let now = Instant::now();
    let node = Node::new(CLIENT);
    let mut session = Session::originate(node.context(), remote(), now);
    session.start(now);
    drain(&mut session, now);

    assert_eq!(session.poll(now + Duration::from_secs(5)), Flow::Continue);
    assert_eq!(session.poll(now + Duration::from_secs(11)), Flow::Close);
    assert_eq!(session.outcome(), Some(&Outcome::Timeout));
}

#[test]
fn inactivity_timeout() {
    let now = Instant::now();
    let node = Node::new(CLIENT);
    let mut session = transferring(&node, "binkp/1.0", now);
    drain(&mut session, now);

    assert_eq!(session.poll(now + Duration::from_secs(25)), Flow::Continue);
    assert!(session.timeout_warned);
    assert_eq!(session.poll(now + Duration::from_secs(31)), Flow::Close);
    assert_eq!(session.phase(), Phase::Error);
    assert_eq!(session.outcome(), Some(&Outcome::Timeout));
}

#[test]
fn secure_exchange_in_both_directions() {
    let now = Instant::now();
    let client_node = Node::new(CLIENT).link(SERVER, PASSWORD);
    let server_node = Node::new(SERVER).link(CLIENT, PASSWORD);

    client_node.outbound.add(SERVER, "00000001.pkt", b"first packet");
    client_node.outbound.add(SERVER, "00000002.pkt", &[0xA5; 100_000]);
    server_node.outbound.add(CLIENT, "00000003.pkt", b"reply");

    let mut client = Session::originate(client_node.context(), remote(), now);
    let mut server = Session::answer(server_node.context(), remote(), now);
    exchange(&mut client, &mut server, now);

    assert_eq!(client.phase(), Phase::End);
    assert_eq!(server.phase(), Phase::End);
    assert!(client.is_secure());
    assert!(server.is_secure());
    assert_eq!(client.version(), Version::V1_1);

    let received = server_node.inbound.received();
    assert_eq!(received.len(), 2);
    assert_eq!(received[0].1, b"first packet");
    assert_eq!(received[1].1, vec![0xA5; 100_000]);
    assert_eq!(client_node.inbound.received()[0].1, b"reply");

    assert_eq!(client_node.outbound.remaining(), 0);
    assert_eq!(server_node.outbound.remaining(), 0);

    let client_event = client.finish(now);
    let server_event = server.finish(now);
    assert!(client_event.is_success() && server_event.is_success());
    assert_eq!(client_event.address, Some(SERVER));
    assert_eq!(server_event.address, Some(CLIENT));
    assert_eq!(
        client_event.totals,
        Totals {
            files_sent: 2,
            files_received: 1,
            bytes_sent: 100_012,
            bytes_received: 5,
        }
    );
    assert_eq!(server_event.totals.bytes_received, 100_012);
    assert_eq!(client_node.registry.connections(), 0);
    assert!(!server_node.registry.is_active(&CLIENT));
}
