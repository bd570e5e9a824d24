//! Acceptor tests over TLS
//!
//! Detection runs on decrypted bytes; handshake failures and stalled
//! handshakes never reach a detector.

mod common;

use std::io::Write;
use std::sync::atomic::Ordering;
use std::thread;
use std::time::Duration;

use common::{exchange, plain_connect, read_all, server_tls, tls_connect, write_self_signed, TestServer};
use protocol_acceptor::tls::{get_cert_fingerprint, get_cert_subject};

#[test]
fn test_tls_echo() {
    let server = TestServer::start(Some(server_tls()));
    let mut client = tls_connect(server.addr);

    let response = exchange(&mut client, b"echo testing is fun\n");
    assert_eq!(response, b"echo testing is fun\n");
    assert_eq!(server.echo.load(Ordering::SeqCst), 1);
}

#[test]
fn test_tls_uppercase() {
    let server = TestServer::start(Some(server_tls()));
    let mut client = tls_connect(server.addr);

    let response = exchange(&mut client, b"uppercase testing is fun\n");
    assert_eq!(response, b"UPPERCASE TESTING IS FUN\n");
}

#[test]
fn test_tls_unknown_protocol_rejected() {
    let server = TestServer::start(Some(server_tls()));
    let mut client = tls_connect(server.addr);

    let response = exchange(&mut client, b"no such protocol\n");
    assert!(response.is_empty(), "received {:?}", response);
    assert_eq!(server.handoffs(), 0);
    assert_eq!(server.handle.stats().timed_out, 1);
}

#[test]
fn test_plaintext_client_on_tls_listener() {
    let server = TestServer::start(Some(server_tls()));
    let mut client = plain_connect(server.addr);

    // Anything received is at most a TLS alert, never a protocol reply
    let response = exchange(&mut client, b"echo testing is fun\n");
    assert!(!response.windows(4).any(|w| w == b"echo"), "received {:?}", response);
    assert_eq!(server.handoffs(), 0);
    assert_eq!(server.handle.stats().handshake_failures, 1);
}

#[test]
fn test_handshake_never_started() {
    let server = TestServer::start(Some(server_tls()));
    let mut client = plain_connect(server.addr);

    assert!(read_all(&mut client).is_empty());
    assert_eq!(server.handle.stats().timed_out, 1);
}

#[test]
fn test_tls_slow_client_within_timeout() {
    let server = TestServer::start(Some(server_tls()));
    let mut client = tls_connect(server.addr);

    thread::sleep(Duration::from_millis(500));
    let response = exchange(&mut client, b"echo slow\n");
    assert_eq!(response, b"echo slow\n");
}

#[test]
fn test_tls_slow_client_past_timeout() {
    let server = TestServer::start(Some(server_tls()));
    let mut client = tls_connect(server.addr);

    thread::sleep(Duration::from_millis(2500));
    let response = exchange(&mut client, b"echo late\n");
    assert!(response.is_empty(), "received {:?}", response);
    assert_eq!(server.handoffs(), 0);
}

#[test]
fn test_tls_concurrent_clients() {
    let server = TestServer::start(Some(server_tls()));
    let addr = server.addr;

    let clients: Vec<_> = (0..5)
        .map(|i| {
            thread::spawn(move || {
                let mut client = tls_connect(addr);
                client.write_all(format!("uppercase tls {}", i).as_bytes()).unwrap();
                let response = exchange(&mut client, b"\n");
                assert_eq!(response, format!("UPPERCASE TLS {}\n", i).into_bytes());
            })
        })
        .collect();

    for client in clients {
        client.join().unwrap();
    }
    assert_eq!(server.uppercase.load(Ordering::SeqCst), 5);
}

#[test]
fn test_certificate_inspection() {
    let dir = tempfile::tempdir().unwrap();
    let (cert, _key) = write_self_signed(dir.path());

    assert_eq!(get_cert_subject(&cert).unwrap(), "CN=localhost");
    assert_eq!(get_cert_fingerprint(&cert).unwrap().split(':').count(), 32);
}
