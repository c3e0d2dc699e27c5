//! Graceful shutdown coordination for portal servers
//!
//! Each started network portal owns one [`GracefulShutdown`]. Accept loops
//! select on [`GracefulShutdown::wait`], every accepted connection holds a
//! [`ConnectionGuard`], and `Stop` triggers the coordinator then drains the
//! remaining connections up to the configured timeout.
//!
//! ```rust,no_run
//! use portico::shutdown::{GracefulShutdown, ShutdownConfig};
//!
//! # async fn run(listener: tokio::net::TcpListener) {
//! let shutdown = GracefulShutdown::new(ShutdownConfig::default());
//!
//! loop {
//!     tokio::select! {
//!         _ = shutdown.wait() => break,
//!         accepted = listener.accept() => {
//!             let _guard = shutdown.connection_guard();
//!             // serve the connection while the guard is alive
//!         }
//!     }
//! }
//!
//! shutdown.drain_connections().await;
//! # }
//! ```

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::sleep;
use tracing::{error, info, warn};

/// Configuration for graceful shutdown
#[derive(Debug, Clone)]
pub struct ShutdownConfig {
    /// Maximum time to wait for in-flight connections to finish (default: 5s)
    pub drain_timeout: Duration,
    /// Whether to also trigger on SIGTERM/SIGINT (default: false)
    pub enable_signal_handlers: bool,
    /// Poll interval while draining (default: 50ms)
    pub drain_poll_interval: Duration,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            drain_timeout: Duration::from_secs(5),
            enable_signal_handlers: false,
            drain_poll_interval: Duration::from_millis(50),
        }
    }
}

impl ShutdownConfig {
    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    /// Trigger on process signals as well as on `Stop`
    pub fn with_signal_handlers(mut self) -> Self {
        self.enable_signal_handlers = true;
        self
    }
}

/// Graceful shutdown coordinator
///
/// Clones share state.
#[derive(Clone)]
pub struct GracefulShutdown {
    config: ShutdownConfig,
    shutdown_notifier: Arc<Notify>,
    shutdown_triggered: Arc<AtomicBool>,
    active_connections: Arc<AtomicU64>,
    draining: Arc<AtomicBool>,
}

impl GracefulShutdown {
    pub fn new(config: ShutdownConfig) -> Self {
        let shutdown = Self {
            config,
            shutdown_notifier: Arc::new(Notify::new()),
            shutdown_triggered: Arc::new(AtomicBool::new(false)),
            active_connections: Arc::new(AtomicU64::new(0)),
            draining: Arc::new(AtomicBool::new(false)),
        };

        if shutdown.config.enable_signal_handlers {
            shutdown.setup_signal_handlers();
        }

        shutdown
    }

    /// Set up handlers for SIGTERM and SIGINT
    fn setup_signal_handlers(&self) {
        let shutdown = self.clone();

        tokio::spawn(async move {
            #[cfg(unix)]
            {
                use tokio::signal::unix::{signal, SignalKind};

                let (mut sigterm, mut sigint) =
                    match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                        (Ok(term), Ok(int)) => (term, int),
                        (Err(e), _) | (_, Err(e)) => {
                            error!("Failed to register signal handlers: {}", e);
                            return;
                        }
                    };

                tokio::select! {
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down portal"),
                    _ = sigint.recv() => info!("Received SIGINT, shutting down portal"),
                }
            }

            #[cfg(windows)]
            {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    error!("Failed to listen for Ctrl+C: {}", e);
                    return;
                }
                info!("Received Ctrl+C, shutting down portal");
            }

            shutdown.trigger();
        });
    }

    /// Resolves once shutdown has been triggered, even if that happened
    /// before the call
    pub async fn wait(&self) {
        let notified = self.shutdown_notifier.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        if self.is_shutdown() {
            return;
        }
        notified.await;
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown_triggered.load(Ordering::SeqCst)
    }

    pub fn trigger(&self) {
        if !self.shutdown_triggered.swap(true, Ordering::SeqCst) {
            info!("Shutdown triggered");
        }
        self.shutdown_notifier.notify_waiters();
    }

    pub fn connection_started(&self) {
        self.active_connections.fetch_add(1, Ordering::SeqCst);
    }

    pub fn connection_finished(&self) {
        let prev = self.active_connections.fetch_sub(1, Ordering::SeqCst);
        if prev == 0 {
            warn!("Connection finished but counter was already 0");
            self.active_connections.store(0, Ordering::SeqCst);
        }
    }

    pub fn active_connection_count(&self) -> u64 {
        self.active_connections.load(Ordering::SeqCst)
    }

    /// Track a connection until the returned guard is dropped
    pub fn connection_guard(&self) -> ConnectionGuard {
        self.connection_started();
        ConnectionGuard {
            shutdown: self.clone(),
        }
    }

    /// Wait for in-flight connections, up to the drain timeout
    ///
    /// Returns false if connections were still active at the deadline.
    pub async fn drain_connections(&self) -> bool {
        self.draining.store(true, Ordering::SeqCst);

        let active = self.active_connection_count();
        if active == 0 {
            return true;
        }

        info!(
            "Draining {} active connection(s), timeout: {:?}",
            active, self.config.drain_timeout
        );

        let start = std::time::Instant::now();
        loop {
            let current = self.active_connection_count();
            if current == 0 {
                info!("All connections drained");
                return true;
            }

            if start.elapsed() >= self.config.drain_timeout {
                warn!("Drain timeout reached with {} connection(s) still active", current);
                return false;
            }

            sleep(self.config.drain_poll_interval).await;
        }
    }

    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::SeqCst)
    }

    pub fn config(&self) -> &ShutdownConfig {
        &self.config
    }
}

/// RAII guard for connection lifetime
pub struct ConnectionGuard {
    shutdown: GracefulShutdown,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.shutdown.connection_finished();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_shutdown_trigger() {
        let shutdown = GracefulShutdown::new(ShutdownConfig::default());
        assert!(!shutdown.is_shutdown());

        shutdown.trigger();
        assert!(shutdown.is_shutdown());
    }

    #[tokio::test]
    async fn test_connection_guard() {
        let shutdown = GracefulShutdown::new(ShutdownConfig::default());

        {
            let _a = shutdown.connection_guard();
            let _b = shutdown.connection_guard();
            assert_eq!(shutdown.active_connection_count(), 2);
        }

        assert_eq!(shutdown.active_connection_count(), 0);
    }

    #[tokio::test]
    async fn test_drain_with_connections() {
        let shutdown = GracefulShutdown::new(
            ShutdownConfig::default().with_drain_timeout(Duration::from_secs(2)),
        );

        let guard = shutdown.connection_guard();
        tokio::spawn(async move {
            sleep(Duration::from_millis(100)).await;
            drop(guard);
        });

        assert!(shutdown.drain_connections().await);
        assert!(shutdown.is_draining());
    }

    #[tokio::test]
    async fn test_drain_timeout() {
        let shutdown = GracefulShutdown::new(
            ShutdownConfig::default().with_drain_timeout(Duration::from_millis(100)),
        );

        let _guard = shutdown.connection_guard();
        assert!(!shutdown.drain_connections().await);
        assert_eq!(shutdown.active_connection_count(), 1);
    }

    #[tokio::test]
    async fn test_wait_after_trigger() {
        let shutdown = GracefulShutdown::new(ShutdownConfig::default());
        shutdown.trigger();

        // must not hang when the trigger already happened
        tokio::time::timeout(Duration::from_secs(1), shutdown.wait())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_wait_for_trigger() {
        let shutdown = GracefulShutdown::new(ShutdownConfig::default());

        let trigger = shutdown.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(50)).await;
            trigger.trigger();
        });

        shutdown.wait().await;
        assert!(shutdown.is_shutdown());
    }
}
