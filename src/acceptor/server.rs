//! Acceptor
//!
//! The acceptor owns the listening socket, the detector registry and the
//! optional TLS context. Binding happens in [`Acceptor::start`]; nothing runs
//! until [`Acceptor::serve_forever`] is called.

use log::info;
use openssl::ssl::SslAcceptor;
use socket2::{Domain, Protocol, Socket, Type};
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use super::dispatcher::Dispatcher;
use super::handle::{AcceptorHandle, Shared};
use super::stats::StatsSnapshot;
use crate::common::{resolve_bind_addr, AcceptorError, Result};
use crate::config::{defaults, DetectionConfig};
use crate::protocol::{DetectorRegistry, ProtocolDetector};

/// Builder for [`Acceptor`]
///
/// # Example
///
/// ```no_run
/// use std::time::Duration;
/// use protocol_acceptor::Acceptor;
///
/// # fn main() -> protocol_acceptor::Result<()> {
/// let acceptor = Acceptor::builder()
///     .detection_timeout(Duration::from_secs(5))
///     .max_buffer_size(1024)
///     .bind("127.0.0.1", 9000)?;
/// # Ok(())
/// # }
/// ```
pub struct AcceptorBuilder {
    config: DetectionConfig,
    tls: Option<SslAcceptor>,
    backlog: i32,
    detectors: Vec<Arc<dyn ProtocolDetector>>,
}

impl Default for AcceptorBuilder {
    fn default() -> Self {
        Self {
            config: DetectionConfig::default(),
            tls: None,
            backlog: defaults::BACKLOG,
            detectors: Vec::new(),
        }
    }
}

impl AcceptorBuilder {
    /// Maximum time a connection may stay unidentified, handshake included
    pub fn detection_timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    /// Buffer size at which an unmatched connection is given up on
    pub fn max_buffer_size(mut self, size: usize) -> Self {
        self.config.max_buffer_size = size;
        self
    }

    /// Upper bound on a single read from a pending connection
    pub fn read_chunk_size(mut self, size: usize) -> Self {
        self.config.read_chunk_size = size;
        self
    }

    /// Replace all detection settings at once
    pub fn detection_config(mut self, config: DetectionConfig) -> Self {
        self.config = config;
        self
    }

    /// Wrap every accepted connection in a server-side TLS handshake
    pub fn tls(mut self, acceptor: SslAcceptor) -> Self {
        self.tls = Some(acceptor);
        self
    }

    /// Listen backlog
    pub fn backlog(mut self, backlog: i32) -> Self {
        self.backlog = backlog;
        self
    }

    /// Register a detector ahead of binding
    ///
    /// Duplicate names are reported by [`bind`](Self::bind).
    pub fn detector<D: ProtocolDetector + 'static>(mut self, detector: D) -> Self {
        self.detectors.push(Arc::new(detector));
        self
    }

    /// Validate the settings and start listening
    ///
    /// # Errors
    ///
    /// Returns [`AcceptorError::Configuration`] for invalid settings,
    /// duplicate detectors or detectors that cannot fit the buffer, and [`AcceptorError::Bind`] when the address
    /// cannot be bound.
    pub fn bind(self, host: &str, port: u16) -> Result<Acceptor> {
        self.config.validate()?;
        if self.backlog <= 0 {
            return Err(AcceptorError::Configuration(format!(
                "Listen backlog must be positive, got {}",
                self.backlog
            )));
        }

        let mut registry = DetectorRegistry::new();
        for detector in self.detectors {
            check_window(detector.as_ref(), &self.config)?;
            registry.register(detector)?;
        }

        let addr = resolve_bind_addr(host, port)?;
        let listener = listen(addr, self.backlog).map_err(|source| AcceptorError::Bind {
            addr: addr.to_string(),
            source,
        })?;
        let local_addr = listener.local_addr()?;

        info!(
            "Bound {} (detection timeout {:?}, {})",
            local_addr,
            self.config.timeout,
            if self.tls.is_some() { "TLS" } else { "plain" }
        );

        Ok(Acceptor {
            registry,
            tls: self.tls,
            config: self.config,
            shared: Arc::new(Shared::new(listener, local_addr)),
        })
    }
}

/// A detector that needs more bytes than the buffer may hold can never match
fn check_window(detector: &dyn ProtocolDetector, config: &DetectionConfig) -> Result<()> {
    if detector.required_size() > config.max_buffer_size {
        return Err(AcceptorError::Configuration(format!(
            "Detector '{}' requires {} bytes but the detection buffer holds {}",
            detector.name(),
            detector.required_size(),
            config.max_buffer_size
        )));
    }
    Ok(())
}

fn listen(addr: SocketAddr, backlog: i32) -> io::Result<std::net::TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.bind(&addr.into())?;
    socket.listen(backlog)?;
    socket.set_nonblocking(true)?;
    Ok(socket.into())
}

/// Multi-protocol connection acceptor
///
/// Accepts plain or TLS connections on one port and routes each to the first
/// registered detector that recognizes its opening bytes.
pub struct Acceptor {
    registry: DetectorRegistry,
    tls: Option<SslAcceptor>,
    config: DetectionConfig,
    shared: Arc<Shared>,
}

impl Acceptor {
    /// Bind `host:port` with default detection settings
    ///
    /// With `tls` set, every connection must complete a TLS handshake before
    /// its decrypted bytes are offered to detectors.
    pub fn start(host: &str, port: u16, tls: Option<SslAcceptor>) -> Result<Self> {
        let mut builder = Self::builder();
        if let Some(tls) = tls {
            builder = builder.tls(tls);
        }
        builder.bind(host, port)
    }

    pub fn builder() -> AcceptorBuilder {
        AcceptorBuilder::default()
    }

    /// Register a detector
    ///
    /// Detectors are evaluated in registration order.
    ///
    /// # Errors
    ///
    /// Returns [`AcceptorError::Configuration`] if the name is taken or the
    /// detector requires more bytes than `max_buffer_size`.
    pub fn add_detector<D: ProtocolDetector + 'static>(&mut self, detector: D) -> Result<()> {
        check_window(&detector, &self.config)?;
        self.registry.register(Arc::new(detector))
    }

    /// Run the dispatcher on the calling thread until [`stop`](Self::stop)
    ///
    /// # Errors
    ///
    /// Returns [`AcceptorError::Stopped`] if the acceptor was stopped or has
    /// already been served.
    pub fn serve_forever(&self) -> Result<()> {
        let listener = self.shared.take_listener().ok_or(AcceptorError::Stopped)?;

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;

        runtime.block_on(async {
            let listener = tokio::net::TcpListener::from_std(listener)?;
            Dispatcher::new(
                listener,
                &self.registry,
                self.tls.as_ref(),
                &self.config,
                &self.shared,
            )
            .run()
            .await;
            Ok::<(), AcceptorError>(())
        })
    }

    /// Request the dispatcher to exit
    ///
    /// Idempotent. Already handed-off connections are not affected.
    pub fn stop(&self) {
        self.shared.stop();
    }

    /// Handle for stopping the acceptor from another thread
    pub fn handle(&self) -> AcceptorHandle {
        AcceptorHandle::new(Arc::clone(&self.shared))
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.shared.local_addr()
    }

    pub fn is_tls(&self) -> bool {
        self.tls.is_some()
    }

    pub fn detection_config(&self) -> &DetectionConfig {
        &self.config
    }

    pub fn detectors(&self) -> &DetectorRegistry {
        &self.registry
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.shared.stats.snapshot()
    }
}

impl fmt::Debug for Acceptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Acceptor")
            .field("local_addr", &self.local_addr())
            .field("tls", &self.is_tls())
            .field("config", &self.config)
            .field("detectors", &self.registry)
            .finish()
    }
}
