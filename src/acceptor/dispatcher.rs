//! Dispatcher loop
//!
//! One task multiplexes the listener and every pending connection. Pending
//! connections live in a `FuturesUnordered` owned by the loop, so their
//! buffers and the pending set itself are only ever touched from here.

use futures::future::LocalBoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use log::{debug, error, info, warn};
use openssl::ssl::SslAcceptor;
use std::sync::Arc;
use std::thread;
use tokio::net::TcpListener;
use tokio::time::timeout_at;

use super::handle::Shared;
use super::pending::{CloseReason, PendingConnection};
use crate::config::DetectionConfig;
use crate::protocol::{DetectorRegistry, ProtocolDetector};

/// How a pending connection left the pending set
enum Outcome {
    Matched {
        pending: PendingConnection,
        detector: Arc<dyn ProtocolDetector>,
    },
    Closed {
        pending: PendingConnection,
        reason: CloseReason,
    },
}

pub(crate) struct Dispatcher<'a> {
    listener: TcpListener,
    registry: &'a DetectorRegistry,
    tls: Option<&'a SslAcceptor>,
    config: &'a DetectionConfig,
    shared: &'a Shared,
}

impl<'a> Dispatcher<'a> {
    pub(crate) fn new(
        listener: TcpListener,
        registry: &'a DetectorRegistry,
        tls: Option<&'a SslAcceptor>,
        config: &'a DetectionConfig,
        shared: &'a Shared,
    ) -> Self {
        Self {
            listener,
            registry,
            tls,
            config,
            shared,
        }
    }

    /// Run until `stop` is requested
    ///
    /// Connections still pending when the loop exits are dropped, which
    /// closes their sockets. Handed-off connections are unaffected.
    pub(crate) async fn run(self) {
        let mut pending: FuturesUnordered<LocalBoxFuture<'a, Outcome>> = FuturesUnordered::new();
        let stopped = self.shared.stopped();
        tokio::pin!(stopped);

        info!(
            "Acceptor listening on {} ({}), detectors: {:?}",
            self.shared.local_addr(),
            if self.tls.is_some() { "TLS" } else { "plain" },
            self.registry.names()
        );

        loop {
            tokio::select! {
                biased;

                _ = &mut stopped => break,

                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer_addr)) => {
                        debug!("Accepted connection from {}", peer_addr);
                        self.shared.stats.record_accepted();
                        let connection = PendingConnection::new(stream, peer_addr, self.tls.is_some());
                        pending.push(Box::pin(drive(connection, self.tls, self.registry, self.config)));
                    }
                    Err(e) => {
                        error!("Error accepting connection: {}", e);
                    }
                },

                Some(outcome) = pending.next(), if !pending.is_empty() => self.settle(outcome),
            }

            self.shared.stats.set_pending(pending.len());
        }

        if !pending.is_empty() {
            debug!("Dropping {} pending connections", pending.len());
        }
        self.shared.stats.set_pending(0);
        info!("Acceptor on {} stopped", self.shared.local_addr());
    }

    fn settle(&self, outcome: Outcome) {
        match outcome {
            Outcome::Matched { pending, detector } => self.handoff(pending, detector),
            Outcome::Closed { pending, reason } => {
                match &reason {
                    CloseReason::Disconnected => {
                        debug!("{} disconnected before a protocol was detected", pending.peer_addr());
                    }
                    CloseReason::Io(e) => {
                        debug!("Dropping {} after I/O error: {}", pending.peer_addr(), e);
                    }
                    _ => {
                        debug!(
                            "Closing {} after {:?} ({} bytes buffered, handshake {}): {}",
                            pending.peer_addr(),
                            pending.age(),
                            pending.buffered().len(),
                            if pending.is_handshake_complete() { "complete" } else { "pending" },
                            reason
                        );
                        pending.abort();
                    }
                }
                self.shared.stats.record_closed(&reason);
            }
        }
    }

    /// Transfer ownership of an identified connection to its detector
    ///
    /// The pending connection is consumed here, so the dispatcher cannot
    /// touch it again; the handler runs on its own thread.
    fn handoff(&self, pending: PendingConnection, detector: Arc<dyn ProtocolDetector>) {
        let peer_addr = pending.peer_addr();
        let connection = match pending.into_connection() {
            Ok(connection) => connection,
            Err(e) => {
                warn!("Failed to detach {} for '{}': {}", peer_addr, detector.name(), e);
                self.shared.stats.record_closed(&CloseReason::Io(e));
                return;
            }
        };

        debug!(
            "Handing off {} to '{}' after {:?}",
            peer_addr,
            detector.name(),
            connection.pending_for()
        );
        self.shared.stats.record_handoff(detector.name());

        let name = format!("handoff-{}", detector.name());
        let spawned = thread::Builder::new()
            .name(name)
            .spawn(move || detector.handoff(connection, peer_addr));
        if let Err(e) = spawned {
            error!("Failed to start handler thread for {}: {}", peer_addr, e);
        }
    }
}

/// Identify one connection, bounded by its detection deadline
async fn drive(
    mut pending: PendingConnection,
    tls: Option<&SslAcceptor>,
    registry: &DetectorRegistry,
    config: &DetectionConfig,
) -> Outcome {
    let deadline = pending.deadline(config.timeout);
    let result = timeout_at(deadline, pending.identify(tls, registry, config)).await;

    match result {
        Ok(Ok(detector)) => Outcome::Matched { pending, detector },
        Ok(Err(reason)) => Outcome::Closed { pending, reason },
        Err(_) => Outcome::Closed {
            pending,
            reason: CloseReason::DetectionTimeout(config.timeout),
        },
    }
}
