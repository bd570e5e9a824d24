//! Acceptor control handle
//!
//! The dispatcher runs on whatever thread called `serve_forever`, so stopping
//! it has to work from any other thread. [`AcceptorHandle`] carries the
//! shared lifecycle state without borrowing the acceptor itself.

use log::info;
use std::net::{SocketAddr, TcpListener};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::Notify;

use super::stats::{AcceptorStats, StatsSnapshot};

/// Lifecycle state shared by an acceptor, its dispatcher and its handles
#[derive(Debug)]
pub(crate) struct Shared {
    local_addr: SocketAddr,
    stopped: AtomicBool,
    wakeup: Notify,
    /// Listening socket until `serve_forever` claims it
    listener: Mutex<Option<TcpListener>>,
    pub(crate) stats: AcceptorStats,
}

impl Shared {
    pub(crate) fn new(listener: TcpListener, local_addr: SocketAddr) -> Self {
        Self {
            local_addr,
            stopped: AtomicBool::new(false),
            wakeup: Notify::new(),
            listener: Mutex::new(Some(listener)),
            stats: AcceptorStats::default(),
        }
    }

    pub(crate) fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub(crate) fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Hand the listener to the dispatcher; `None` once stopped or served
    pub(crate) fn take_listener(&self) -> Option<TcpListener> {
        let mut listener = self.listener.lock().unwrap_or_else(PoisonError::into_inner);
        if self.is_stopped() {
            return None;
        }
        listener.take()
    }

    /// Resolves once `stop` has been requested
    pub(crate) async fn stopped(&self) {
        while !self.is_stopped() {
            self.wakeup.notified().await;
        }
    }

    pub(crate) fn stop(&self) {
        // The listener lock orders this against `take_listener`
        let mut listener = self.listener.lock().unwrap_or_else(PoisonError::into_inner);
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }

        info!("Stopping acceptor on {}", self.local_addr);
        // Closes the socket if the dispatcher never started
        listener.take();
        self.wakeup.notify_one();
    }
}

/// Cloneable handle for stopping an acceptor from other threads
#[derive(Debug, Clone)]
pub struct AcceptorHandle {
    shared: Arc<Shared>,
}

impl AcceptorHandle {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    /// Ask the dispatcher to exit after its current iteration
    ///
    /// Idempotent, and safe to call before, during or after `serve_forever`.
    pub fn stop(&self) {
        self.shared.stop();
    }

    pub fn is_stopped(&self) -> bool {
        self.shared.is_stopped()
    }

    /// Address the acceptor listens on
    pub fn local_addr(&self) -> SocketAddr {
        self.shared.local_addr()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.shared.stats.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shared() -> Arc<Shared> {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        Arc::new(Shared::new(listener, addr))
    }

    #[test]
    fn test_stop_is_idempotent() {
        let shared = shared();
        let handle = AcceptorHandle::new(Arc::clone(&shared));
        assert!(!handle.is_stopped());

        handle.stop();
        handle.clone().stop();
        assert!(handle.is_stopped());
        assert!(shared.take_listener().is_none());
    }

    #[test]
    fn test_listener_claimed_once() {
        let shared = shared();
        assert!(shared.take_listener().is_some());
        assert!(shared.take_listener().is_none());
    }

    #[tokio::test]
    async fn test_stopped_resolves_after_stop() {
        let shared = shared();
        let waiter = Arc::clone(&shared);
        let task = tokio::spawn(async move { waiter.stopped().await });

        tokio::task::yield_now().await;
        shared.stop();
        tokio::time::timeout(std::time::Duration::from_secs(1), task)
            .await
            .expect("stopped() should resolve")
            .unwrap();
    }

    #[tokio::test]
    async fn test_stopped_resolves_when_stop_came_first() {
        let shared = shared();
        shared.stop();
        tokio::time::timeout(std::time::Duration::from_millis(100), shared.stopped())
            .await
            .expect("stopped() should resolve immediately");
    }
}
