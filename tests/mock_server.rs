use std::fs;
use std::io::{ErrorKind, Read, Write};
use std::net::TcpStream;
use std::thread;
use std::time::Duration;

use byteorder::{BigEndian, WriteBytesExt};
use pretty_assertions::assert_eq;
use tempfile::TempDir;

use mockwire::{Error, ErrorCategory, MockServer, SessionRecorder};

const REQUEST: &[u8] = b"GET / HTTP/1.1\r\n";
const RESPONSE: &[u8] = b"HTTP/1.1 200 OK\r\n";

fn server() -> MockServer {
    let _ = env_logger::try_init();
    MockServer::builder()
        .poll_interval(Duration::from_millis(10))
        .recorder(SessionRecorder::disabled())
        .bind()
        .expect("could not bind mock server")
}

fn connect(server: &MockServer) -> TcpStream {
    let stream = TcpStream::connect(server.local_addr()).expect("could not connect to mock server");
    stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
    stream
}

fn read_exactly(stream: &mut TcpStream, len: usize) -> Vec<u8> {
    let mut buffer = vec![0; len];
    stream.read_exact(&mut buffer).unwrap();
    buffer
}

fn assert_nothing_pending(stream: &mut TcpStream) {
    stream.set_read_timeout(Some(Duration::from_millis(100))).unwrap();
    let mut buffer = [0; 1];
    match stream.read(&mut buffer) {
        Err(err) => assert!(matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut), "unexpected error {err}"),
        Ok(n) => panic!("peer received {n} byte(s) too early: {:?}", &buffer[..n]),
    }
    stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
}

#[test]
fn http_request_and_response() {
    let server = server();
    server.expected().send(REQUEST);
    server.response().send(RESPONSE);

    let mut peer = connect(&server);
    peer.write_all(REQUEST).unwrap();
    assert_eq!(read_exactly(&mut peer, RESPONSE.len()), RESPONSE);

    server.verify().unwrap();
}

#[test]
fn mismatch_still_sends_response() {
    let server = server();
    server.expected().send(REQUEST);
    server.response().send(RESPONSE);

    let mut peer = connect(&server);
    peer.write_all(b"GET /x HTTP/1.1\r\n").unwrap();
    assert_eq!(read_exactly(&mut peer, RESPONSE.len()), RESPONSE);

    match server.verify() {
        Err(Error::Mismatch { offset, expected, actual }) => {
            assert_eq!(offset, 5);
            assert_eq!(expected, b' ');
            assert_eq!(actual, b'x');
        }
        other => panic!("expected mismatch, got {other:?}"),
    }
}

#[test]
fn drain_skips_later_expectations() {
    let server = server();
    server.expected().send(b"HELO\r\n");
    server.response().send(b"250 hi\r\n");
    server.expected().send(b"QUIT\r\n");
    server.response().send(b"221 bye\r\n");

    let mut peer = connect(&server);
    peer.write_all(b"EHLO\r\n").unwrap();
    assert_eq!(read_exactly(&mut peer, 17), b"250 hi\r\n221 bye\r\n");

    let error = server.verify().unwrap_err();
    assert_eq!(error.category(), ErrorCategory::Match);
}

#[test]
fn divergence_reported_at_first_differing_byte() {
    let expected = b"0123456789";

    for k in [0, 1, 4, 9] {
        let server = server();
        server.expected().send(expected);

        let mut sent = expected.to_vec();
        sent[k] = b'#';

        let mut peer = connect(&server);
        peer.write_all(&sent).unwrap();
        drop(peer);

        match server.verify() {
            Err(Error::Mismatch { offset, actual, .. }) => {
                assert_eq!(offset, k);
                assert_eq!(actual, b'#');
            }
            other => panic!("divergence at {k}: expected mismatch, got {other:?}"),
        }
    }
}

#[test]
fn every_byte_value_matches() {
    let payload: Vec<u8> = (0..=255).collect();

    let server = server();
    server.expected().send(&payload);
    server.response().send(b"ok");

    let mut peer = connect(&server);
    peer.write_all(&payload).unwrap();
    assert_eq!(read_exactly(&mut peer, 2), b"ok");

    server.verify().unwrap();
}

#[test]
fn byte_at_a_time_peer() {
    let server = server();
    server.expected().send(REQUEST);
    server.response().send(RESPONSE);

    let mut peer = connect(&server);
    peer.set_nodelay(true).unwrap();
    for byte in REQUEST {
        peer.write_all(&[*byte]).unwrap();
        thread::sleep(Duration::from_millis(1));
    }
    assert_eq!(read_exactly(&mut peer, RESPONSE.len()), RESPONSE);

    server.verify().unwrap();
}

#[test]
fn responses_wait_for_earlier_expectations() {
    let server = server();
    server.expected().send(b"A");
    server.response().send(b"X");
    server.expected().send(b"B");
    server.response().send(b"Y");

    let mut peer = connect(&server);
    assert_nothing_pending(&mut peer);

    peer.write_all(b"A").unwrap();
    assert_eq!(read_exactly(&mut peer, 1), b"X");
    assert_nothing_pending(&mut peer);

    peer.write_all(b"B").unwrap();
    assert_eq!(read_exactly(&mut peer, 1), b"Y");

    server.verify().unwrap();
}

#[test]
fn scripting_while_connected() {
    let server = server();
    let expected = server.expected();
    let response = server.response();

    let mut peer = connect(&server);
    peer.write_all(b"ping").unwrap();

    let scripter = thread::spawn(move || {
        thread::sleep(Duration::from_millis(20));
        expected.send(b"ping");
        response.send(b"pong");
    });

    assert_eq!(read_exactly(&mut peer, 4), b"pong");
    scripter.join().unwrap();

    server.verify().unwrap();
}

#[test]
fn length_prefixed_frames() {
    let server = server();

    let mut expected = server.expected();
    expected.write_u32::<BigEndian>(5).unwrap();
    expected.write_all(b"hello").unwrap();

    let mut response = server.response();
    response.write_u32::<BigEndian>(2).unwrap();
    response.write_all(b"hi").unwrap();

    let mut peer = connect(&server);
    peer.write_all(&[0, 0, 0, 5]).unwrap();
    peer.write_all(b"hello").unwrap();
    assert_eq!(read_exactly(&mut peer, 6), [0, 0, 0, 2, b'h', b'i']);

    server.verify().unwrap();
}

#[test]
fn peer_never_connects() {
    let server = server();
    server.verify().unwrap();
}

#[test]
fn peer_never_connects_with_script() {
    let server = server();
    server.expected().send(REQUEST);
    server.response().send(RESPONSE);

    match server.verify() {
        Err(Error::PendingActions(count)) => assert_eq!(count, 2),
        other => panic!("expected pending actions, got {other:?}"),
    }
}

#[test]
fn empty_writes_are_ignored() {
    let server = server();
    server.expected().send(b"");
    server.response().send(Vec::<u8>::new());

    server.verify().unwrap();
}

#[test]
fn unmatched_peer_bytes_fail_verification() {
    let server = server();
    server.expected().send(b"A");
    server.response().send(b"X");

    let mut peer = connect(&server);
    peer.write_all(b"A").unwrap();
    assert_eq!(read_exactly(&mut peer, 1), b"X");
    peer.write_all(b"extra").unwrap();
    thread::sleep(Duration::from_millis(50));

    let error = server.verify().unwrap_err();
    assert_eq!(error.category(), ErrorCategory::Verification);
}

#[test]
fn session_transcript_recorded() {
    let _ = env_logger::try_init();
    let temp_dir = TempDir::new().unwrap();
    let recorder = SessionRecorder::in_dir(temp_dir.path());
    let recording_dir = recorder.recording_dir().unwrap().to_path_buf();

    let server = MockServer::builder().recorder(recorder).bind().unwrap();
    server.expected().send(REQUEST);
    server.response().send(RESPONSE);

    let mut peer = connect(&server);
    peer.write_all(REQUEST).unwrap();
    assert_eq!(read_exactly(&mut peer, RESPONSE.len()), RESPONSE);
    server.verify().unwrap();

    let mut files: Vec<_> = fs::read_dir(&recording_dir).unwrap().map(|entry| entry.unwrap().path()).collect();
    files.sort();

    let mut received = Vec::new();
    let mut sent = Vec::new();
    for path in files {
        let name = path.file_name().unwrap().to_str().unwrap().to_string();
        if name.ends_with("-received.bin") {
            received.extend(fs::read(&path).unwrap());
        } else if name.ends_with("-sent.bin") {
            sent.extend(fs::read(&path).unwrap());
        }
    }

    assert_eq!(received, REQUEST);
    assert_eq!(sent, RESPONSE);
}
