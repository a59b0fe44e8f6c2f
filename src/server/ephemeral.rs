//! Per-bundle registry service lifecycle.
//!
//! `Created → Listening → Serving → Draining → Stopped`. [`PendingRegistry`]
//! is `Created`, [`EphemeralRegistry`] is `Listening`; [`ServingRegistry`] is
//! the handle returned by [`EphemeralRegistry::serve`] and owns the rest. Serve errors after bind are
//! only observable through [`ServingRegistry::wait`] or the shutdown result.

use crate::config::ServerConfig;
use crate::error::{Result, SyncError};
use crate::server::{router, RegistryStorage};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Created,
    Listening,
    Serving,
    Draining,
    Stopped,
}

/// A registry configured for a bundle but not yet bound.
#[derive(Debug, Clone)]
pub struct PendingRegistry {
    bundle: String,
    config: ServerConfig,
}

impl PendingRegistry {
    pub fn bundle(&self) -> &str {
        &self.bundle
    }

    pub fn state(&self) -> ServiceState {
        ServiceState::Created
    }

    /// Validate the storage root and bind the listener.
    pub async fn bind(self) -> Result<EphemeralRegistry> {
        let Self { bundle, config } = self;
        let bind_err = |reason: String| SyncError::Bind {
            bundle: bundle.clone(),
            reason,
        };

        let metadata = tokio::fs::metadata(&config.root)
            .await
            .map_err(|e| bind_err(format!("registry root {}: {}", config.root.display(), e)))?;
        if !metadata.is_dir() {
            return Err(bind_err(format!(
                "registry root {} is not a directory",
                config.root.display()
            )));
        }

        let listener = TcpListener::bind(&config.http_addr)
            .await
            .map_err(|e| bind_err(format!("listen on {}: {}", config.http_addr, e)))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| bind_err(format!("local address: {}", e)))?;

        tracing::debug!(bundle = %bundle, addr = %local_addr, root = %config.root.display(), "registry listening");

        Ok(EphemeralRegistry {
            bundle,
            config,
            listener,
            local_addr,
        })
    }
}

/// A bound but not yet serving registry.
#[derive(Debug)]
pub struct EphemeralRegistry {
    bundle: String,
    config: ServerConfig,
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl EphemeralRegistry {
    pub fn create(bundle: impl Into<String>, config: ServerConfig) -> PendingRegistry {
        PendingRegistry {
            bundle: bundle.into(),
            config,
        }
    }

    /// Shorthand for [`EphemeralRegistry::create`] followed by [`PendingRegistry::bind`].
    pub async fn bind(bundle: impl Into<String>, config: ServerConfig) -> Result<Self> {
        Self::create(bundle, config).bind().await
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn state(&self) -> ServiceState {
        ServiceState::Listening
    }

    /// Start serving on a background task.
    pub fn serve(self) -> ServingRegistry {
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let app = router(RegistryStorage::new(&self.config.root));
        let bundle = self.bundle.clone();
        let listener = self.listener;

        let task = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
                .map_err(|e| SyncError::Serve {
                    bundle,
                    reason: e.to_string(),
                })
        });

        tracing::info!(bundle = %self.bundle, addr = %self.local_addr, "registry serving");

        ServingRegistry {
            bundle: self.bundle,
            local_addr: self.local_addr,
            shutdown_timeout: self.config.shutdown_timeout,
            shutdown_tx: Some(shutdown_tx),
            task: Some(task),
            state: ServiceState::Serving,
        }
    }
}

/// Handle to a running registry. Dropping it aborts the server task.
#[derive(Debug)]
pub struct ServingRegistry {
    bundle: String,
    local_addr: SocketAddr,
    shutdown_timeout: std::time::Duration,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<Result<()>>>,
    state: ServiceState,
}

impl ServingRegistry {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn bundle(&self) -> &str {
        &self.bundle
    }

    pub fn state(&self) -> ServiceState {
        self.state
    }

    /// Resolves when the server task ends on its own; pending forever once taken.
    pub async fn wait(&mut self) -> Result<()> {
        let Some(task) = self.task.as_mut() else {
            return std::future::pending().await;
        };
        let result = join_result(&self.bundle, task.await);
        self.task = None;
        self.state = ServiceState::Stopped;
        result
    }

    /// Graceful shutdown bounded by the configured timeout, then abort.
    pub async fn shutdown(mut self) -> Result<()> {
        self.state = ServiceState::Draining;
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }

        let Some(mut task) = self.task.take() else {
            self.state = ServiceState::Stopped;
            return Ok(());
        };

        let result = match tokio::time::timeout(self.shutdown_timeout, &mut task).await {
            Ok(joined) => join_result(&self.bundle, joined),
            Err(_) => {
                task.abort();
                tracing::warn!(
                    bundle = %self.bundle,
                    timeout_secs = self.shutdown_timeout.as_secs(),
                    "registry did not drain in time, aborted"
                );
                Ok(())
            }
        };
        self.state = ServiceState::Stopped;
        tracing::debug!(bundle = %self.bundle, "registry stopped");
        result
    }
}

#[cfg(test)]
impl ServingRegistry {
    /// Kill the server task without the graceful path.
    pub(crate) fn abort_server(&self) {
        if let Some(task) = &self.task {
            task.abort();
        }
    }
}

impl Drop for ServingRegistry {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

fn join_result(
    bundle: &str,
    joined: std::result::Result<Result<()>, tokio::task::JoinError>,
) -> Result<()> {
    match joined {
        Ok(result) => result,
        Err(e) if e.is_cancelled() => Ok(()),
        Err(e) => Err(SyncError::Serve {
            bundle: bundle.to_string(),
            reason: e.to_string(),
        }),
    }
}
