//! Unix socket listener.

use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UnixListener;
use tokio::sync::{Notify, Semaphore};
use tracing::{debug, error, info, warn};

use crate::audit::AuditLogger;
use crate::auth::RequestVerifier;
use crate::config::Settings;
use crate::error::ServiceError;

use super::handle_connection;

/// Request and connection counters for monitoring.
#[derive(Debug, Default)]
pub struct ConnectionMetrics {
    /// Total requests processed.
    pub requests_total: AtomicU64,
    /// Requests that failed authentication or could not be parsed.
    pub requests_rejected: AtomicU64,
    /// Currently active connections.
    pub active_connections: AtomicUsize,
}

impl ConnectionMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one processed request.
    pub fn record_request(&self, accepted: bool) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
        if !accepted {
            self.requests_rejected.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn total_requests(&self) -> u64 {
        self.requests_total.load(Ordering::Relaxed)
    }

    pub fn rejected_requests(&self) -> u64 {
        self.requests_rejected.load(Ordering::Relaxed)
    }

    pub fn active(&self) -> usize {
        self.active_connections.load(Ordering::Relaxed)
    }
}

/// Unix socket server.
pub struct SocketListener {
    listener: UnixListener,
    settings: Arc<Settings>,
    verifier: Arc<RequestVerifier>,
    audit_logger: Option<Arc<AuditLogger>>,
    metrics: Arc<ConnectionMetrics>,
    /// Semaphore for connection limiting
    connection_semaphore: Arc<Semaphore>,
}

impl SocketListener {
    /// Create and bind a new socket listener.
    pub async fn bind(
        settings: Arc<Settings>,
        verifier: Arc<RequestVerifier>,
    ) -> Result<Self, ServiceError> {
        let socket_path = &settings.socket.path;

        // Security: Use symlink_metadata to detect symlinks without following them
        if let Ok(metadata) = std::fs::symlink_metadata(socket_path) {
            if metadata.file_type().is_symlink() {
                return Err(ServiceError::Socket {
                    message: format!(
                        "Socket path {} is a symlink, refusing to remove for security",
                        socket_path.display()
                    ),
                });
            }

            std::fs::remove_file(socket_path).map_err(|e| ServiceError::Socket {
                message: format!(
                    "Failed to remove existing socket file {}: {}",
                    socket_path.display(),
                    e
                ),
            })?;
        }

        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ServiceError::Socket {
                message: format!(
                    "Failed to create socket directory {}: {}",
                    parent.display(),
                    e
                ),
            })?;
        }

        let listener = UnixListener::bind(socket_path).map_err(|e| ServiceError::Socket {
            message: format!("Failed to bind to socket {}: {}", socket_path.display(), e),
        })?;

        Self::set_socket_permissions(socket_path, &settings.socket.permissions)?;

        let metrics = Arc::new(ConnectionMetrics::new());

        let connection_semaphore =
            Arc::new(Semaphore::new(settings.limits.max_concurrent_connections));
        info!(
            max_connections = settings.limits.max_concurrent_connections,
            "Connection limiting enabled"
        );

        let audit_logger = if settings.audit.enabled {
            match AuditLogger::new(&settings.audit.log_path) {
                Ok(logger) => {
                    info!(
                        path = %settings.audit.log_path.display(),
                        "Audit logging enabled"
                    );
                    Some(Arc::new(logger))
                }
                Err(e) => {
                    warn!(
                        error = %e,
                        path = %settings.audit.log_path.display(),
                        "Failed to create audit logger, audit logging disabled"
                    );
                    None
                }
            }
        } else {
            info!("Audit logging disabled");
            None
        };

        info!(path = %socket_path.display(), "Socket listener bound");

        Ok(Self {
            listener,
            settings,
            verifier,
            audit_logger,
            metrics,
            connection_semaphore,
        })
    }

    /// Get connection metrics.
    pub fn metrics(&self) -> Arc<ConnectionMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Get the request verifier.
    pub fn verifier(&self) -> Arc<RequestVerifier> {
        Arc::clone(&self.verifier)
    }

    fn set_socket_permissions(path: &Path, permissions_str: &str) -> Result<(), ServiceError> {
        let mode = u32::from_str_radix(permissions_str, 8).map_err(|e| ServiceError::Socket {
            message: format!("Invalid socket permissions '{}': {}", permissions_str, e),
        })?;

        std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).map_err(|e| {
            ServiceError::Socket {
                message: format!(
                    "Failed to set socket permissions on {}: {}",
                    path.display(),
                    e
                ),
            }
        })
    }

    /// Run the socket listener, accepting connections.
    ///
    /// The listener will stop accepting new connections when `shutdown` is notified.
    /// Active connections will continue until they complete or are explicitly closed.
    pub async fn run(&self, shutdown: Arc<Notify>) -> Result<(), ServiceError> {
        info!("Socket listener running, waiting for connections...");

        loop {
            tokio::select! {
                result = self.listener.accept() => {
                    match result {
                        Ok((stream, _addr)) => {
                            let permit = match self.connection_semaphore.clone().try_acquire_owned() {
                                Ok(permit) => permit,
                                Err(_) => {
                                    warn!(
                                        max = self.settings.limits.max_concurrent_connections,
                                        "Connection limit reached, rejecting connection"
                                    );
                                    continue;
                                }
                            };

                            let settings = Arc::clone(&self.settings);
                            let verifier = Arc::clone(&self.verifier);
                            let audit_logger = self.audit_logger.clone();
                            let metrics = Arc::clone(&self.metrics);

                            metrics.active_connections.fetch_add(1, Ordering::Relaxed);
                            debug!(active = metrics.active(), "New connection accepted");

                            tokio::spawn(async move {
                                let _permit = permit; // Released when the task completes
                                if let Err(e) = handle_connection(
                                    stream,
                                    settings,
                                    verifier,
                                    audit_logger,
                                    Arc::clone(&metrics),
                                ).await {
                                    error!(error = %e, "Connection handler error");
                                }

                                metrics.active_connections.fetch_sub(1, Ordering::Relaxed);
                                debug!(active = metrics.active(), "Connection closed");
                            });
                        }
                        Err(e) => {
                            warn!(error = %e, "Failed to accept connection");
                        }
                    }
                }
                _ = shutdown.notified() => {
                    info!("Shutdown signal received, stopping listener");
                    break;
                }
            }
        }

        Ok(())
    }

    /// Wait for all active connections to drain.
    ///
    /// Returns immediately if there are no active connections.
    pub async fn wait_for_drain(&self) {
        let poll_interval = Duration::from_millis(100);

        while self.metrics.active() > 0 {
            debug!(
                active = self.metrics.active(),
                "Waiting for connections to drain"
            );
            tokio::time::sleep(poll_interval).await;
        }

        info!("All connections drained");
    }
}
