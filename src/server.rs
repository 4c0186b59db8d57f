use anyhow::{anyhow, Result};
use std::future::Future;
use axum::Router;
use parking_lot::Mutex;
use std::net::SocketAddr;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// The listening socket and the task serving it.
///
/// `stop()` begins a graceful shutdown: the listener closes and in-flight
/// requests run to completion. It may be called any number of times,
/// including before `start()`.
pub struct Server {
    router: Router,
    addr: SocketAddr,
    local_addr: Mutex<Option<SocketAddr>>,
    shutdown: Mutex<Option<oneshot::Sender<()>>>,
    task: tokio::sync::Mutex<Option<JoinHandle<std::io::Result<()>>>>,
}

impl Server {
    pub fn new(router: Router, addr: SocketAddr) -> Self {
        Self {
            router,
            addr,
            local_addr: Mutex::new(None),
            shutdown: Mutex::new(None),
            task: tokio::sync::Mutex::new(None),
        }
    }

    /// Bind and begin serving. Returns the bound address; calling again before
    /// `stop()` returns the same address.
    pub async fn start(&self) -> Result<SocketAddr> {
        if let Some(addr) = *self.local_addr.lock() {
            return Ok(addr);
        }

        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        let local_addr = listener.local_addr()?;
        let (tx, rx) = oneshot::channel::<()>();

        let service = self
            .router
            .clone()
            .into_make_service_with_connect_info::<SocketAddr>();
        let handle = tokio::spawn(async move {
            axum::serve(listener, service)
                .with_graceful_shutdown(async move {
                    let _ = rx.await;
                })
                .await
        });

        *self.task.lock().await = Some(handle);
        *self.shutdown.lock() = Some(tx);
        *self.local_addr.lock() = Some(local_addr);

        info!("HTTP server listening on {}", local_addr);
        Ok(local_addr)
    }

    pub fn stop(&self) {
        match self.shutdown.lock().take() {
            Some(tx) => {
                let _ = tx.send(());
                *self.local_addr.lock() = None;
                info!("HTTP server closing listener");
            }
            None => debug!("HTTP server not running"),
        }
    }

    /// Serve until `signal` resolves, then stop and drain. The serving task
    /// ending on its own is an error, even if it ended cleanly.
    pub async fn run_until(&self, signal: impl Future<Output = ()>) -> Result<()> {
        let outcome = tokio::select! {
            _ = signal => {
                info!("Received shutdown signal");
                Ok(())
            }
            result = self.wait() => {
                let err = result
                    .err()
                    .unwrap_or_else(|| anyhow!("HTTP server stopped without a shutdown signal"));
                error!("HTTP server terminated unexpectedly: {:#}", err);
                Err(err)
            }
        };

        self.stop();
        self.wait().await?;
        outcome
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock()
    }

    /// Wait for the serving task to finish. Returns immediately if the server
    /// was never started or has already been waited on.
    pub async fn wait(&self) -> Result<()> {
        let mut task = self.task.lock().await;
        if let Some(handle) = task.as_mut() {
            let result = handle.await;
            *task = None;
            result??;
        }
        Ok(())
    }
}
