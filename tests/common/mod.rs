//! Shared helpers for integration tests
//!
//! Acceptors are bound to `127.0.0.1:0` and served on a background thread;
//! clients are plain blocking sockets or OpenSSL client streams.

#![allow(dead_code)]

use openssl::asn1::Asn1Time;
use openssl::bn::BigNum;
use openssl::ec::{EcGroup, EcKey};
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::PKey;
use openssl::ssl::{SslAcceptor, SslConnector, SslMethod, SslStream, SslVerifyMode};
use openssl::x509::{X509NameBuilder, X509};
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use protocol_acceptor::config::TlsConfig;
use protocol_acceptor::{create_tls_acceptor, Acceptor, AcceptorHandle, Connection, ProtocolDetector};

/// Detection timeout used by most tests
pub const TIMEOUT: Duration = Duration::from_secs(1);

/// Write a self-signed P-256 certificate and key into `dir`
pub fn write_self_signed(dir: &Path) -> (PathBuf, PathBuf) {
    let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1).unwrap();
    let key = PKey::from_ec_key(EcKey::generate(&group).unwrap()).unwrap();

    let mut name = X509NameBuilder::new().unwrap();
    name.append_entry_by_nid(Nid::COMMONNAME, "localhost").unwrap();
    let name = name.build();

    let mut builder = X509::builder().unwrap();
    builder.set_version(2).unwrap();
    let serial = BigNum::from_u32(1).unwrap().to_asn1_integer().unwrap();
    builder.set_serial_number(&serial).unwrap();
    builder.set_subject_name(&name).unwrap();
    builder.set_issuer_name(&name).unwrap();
    builder.set_pubkey(&key).unwrap();
    builder.set_not_before(&Asn1Time::days_from_now(0).unwrap()).unwrap();
    builder.set_not_after(&Asn1Time::days_from_now(1).unwrap()).unwrap();
    builder.sign(&key, MessageDigest::sha256()).unwrap();
    let cert = builder.build();

    let cert_path = dir.join("server.crt");
    let key_path = dir.join("server.key");
    std::fs::write(&cert_path, cert.to_pem().unwrap()).unwrap();
    std::fs::write(&key_path, key.private_key_to_pem_pkcs8().unwrap()).unwrap();
    (cert_path, key_path)
}

/// Server TLS context backed by a fresh self-signed certificate
pub fn server_tls() -> SslAcceptor {
    let dir = tempfile::tempdir().unwrap();
    let (cert, key) = write_self_signed(dir.path());
    create_tls_acceptor(&TlsConfig::new(cert, key)).unwrap()
}

/// TLS client that accepts any server certificate
pub fn tls_connect(addr: SocketAddr) -> SslStream<TcpStream> {
    let mut builder = SslConnector::builder(SslMethod::tls()).unwrap();
    builder.set_verify(SslVerifyMode::NONE);
    let connector = builder.build();

    let tcp = TcpStream::connect(addr).unwrap();
    tcp.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
    connector
        .configure()
        .unwrap()
        .verify_hostname(false)
        .connect("localhost", tcp)
        .unwrap()
}

pub fn plain_connect(addr: SocketAddr) -> TcpStream {
    let stream = TcpStream::connect(addr).unwrap();
    stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
    stream
}

/// Line protocol: reads one line and answers with `transform(line)`
pub struct LineDetector {
    name: &'static str,
    transform: fn(&str) -> String,
    pub handoffs: Arc<AtomicUsize>,
}

impl LineDetector {
    pub fn echo() -> Self {
        Self {
            name: "echo",
            transform: |line| line.to_string(),
            handoffs: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn uppercase() -> Self {
        Self {
            name: "uppercase",
            transform: |line| line.to_uppercase(),
            handoffs: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl ProtocolDetector for LineDetector {
    fn name(&self) -> &str {
        self.name
    }

    fn handoff(&self, mut connection: Connection, _peer_addr: SocketAddr) {
        self.handoffs.fetch_add(1, Ordering::SeqCst);
        connection.set_read_timeout(Some(Duration::from_secs(5))).unwrap();

        let mut line = String::new();
        if BufReader::new(&mut connection).read_line(&mut line).is_err() {
            return;
        }
        let _ = connection.write_all((self.transform)(&line).as_bytes());
        let _ = connection.shutdown();
    }
}

/// Acceptor served on a background thread, stopped on drop
pub struct TestServer {
    pub addr: SocketAddr,
    pub handle: AcceptorHandle,
    pub echo: Arc<AtomicUsize>,
    pub uppercase: Arc<AtomicUsize>,
    thread: Option<JoinHandle<Acceptor>>,
}

impl TestServer {
    /// Serve `echo` and `uppercase` with a one second detection timeout
    pub fn start(tls: Option<SslAcceptor>) -> Self {
        let mut builder = Acceptor::builder().detection_timeout(TIMEOUT);
        if let Some(tls) = tls {
            builder = builder.tls(tls);
        }
        let mut acceptor = builder.bind("127.0.0.1", 0).unwrap();

        let echo = LineDetector::echo();
        let uppercase = LineDetector::uppercase();
        let echo_count = Arc::clone(&echo.handoffs);
        let uppercase_count = Arc::clone(&uppercase.handoffs);
        acceptor.add_detector(echo).unwrap();
        acceptor.add_detector(uppercase).unwrap();

        Self::serve(acceptor, echo_count, uppercase_count)
    }

    pub fn serve(acceptor: Acceptor, echo: Arc<AtomicUsize>, uppercase: Arc<AtomicUsize>) -> Self {
        let addr = acceptor.local_addr();
        let handle = acceptor.handle();
        let thread = thread::spawn(move || {
            acceptor.serve_forever().unwrap();
            acceptor
        });

        Self {
            addr,
            handle,
            echo,
            uppercase,
            thread: Some(thread),
        }
    }

    pub fn handoffs(&self) -> usize {
        self.echo.load(Ordering::SeqCst) + self.uppercase.load(Ordering::SeqCst)
    }

    /// Stop the acceptor and return it once `serve_forever` has returned
    pub fn shutdown(mut self) -> Acceptor {
        self.handle.stop();
        self.thread.take().unwrap().join().unwrap()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.stop();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

/// Send `request` and collect everything the server returns before closing
///
/// Resets surface as errors; whatever arrived before them is returned.
pub fn exchange<S: Read + Write>(stream: &mut S, request: &[u8]) -> Vec<u8> {
    let _ = stream.write_all(request);
    read_all(stream)
}

pub fn read_all<S: Read>(stream: &mut S) -> Vec<u8> {
    let mut received = Vec::new();
    let mut buf = [0u8; 1024];
    loop {
        match stream.read(&mut buf) {
            Ok(0) | Err(_) => return received,
            Ok(n) => received.extend_from_slice(&buf[..n]),
        }
    }
}

/// Wait until `condition` holds, panicking after five seconds
pub fn wait_for(mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        thread::sleep(Duration::from_millis(10));
    }
}
