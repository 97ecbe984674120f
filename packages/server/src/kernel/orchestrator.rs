//! Orchestrator owning the per-stage workers.
//!
//! Each worker is a [`Service`] with an explicit lifecycle: spawned
//! with a child cancellation token, stopped by cancelling the root
//! token. Shutdown stops new polls; in-flight attempts always finish,
//! so no job is ever left half-committed.

use anyhow::Result;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// A long-running background service with cooperative shutdown.
#[async_trait]
pub trait Service: Send + 'static {
    fn name(&self) -> &'static str;

    async fn run(self: Box<Self>, shutdown: CancellationToken) -> Result<()>;
}

/// Starts and stops the registered services as one unit.
pub struct Orchestrator {
    services: Vec<Box<dyn Service>>,
    shutdown: CancellationToken,
}

impl Default for Orchestrator {
    fn default() -> Self {
        Self::new()
    }
}

impl Orchestrator {
    pub fn new() -> Self {
        Self {
            services: Vec::new(),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn register(&mut self, service: impl Service) {
        self.services.push(Box::new(service));
    }

    /// Token to cancel from outside (tests, embedding processes).
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Run all services until the shutdown token fires, then wait for
    /// each to drain.
    pub async fn run(self) -> Result<()> {
        info!(services = self.services.len(), "orchestrator starting");

        let mut handles = Vec::with_capacity(self.services.len());
        for service in self.services {
            let name = service.name();
            let token = self.shutdown.child_token();
            handles.push((name, tokio::spawn(service.run(token))));
        }

        for (name, handle) in handles {
            match handle.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(service = name, error = %e, "service exited with error"),
                Err(e) => error!(service = name, error = %e, "service task panicked"),
            }
        }

        info!("orchestrator stopped");
        Ok(())
    }

    /// Convenience wrapper: run until Ctrl+C.
    pub async fn run_until_shutdown(self) -> Result<()> {
        let shutdown = self.shutdown_token();
        tokio::spawn(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("received shutdown signal");
            shutdown.cancel();
        });

        self.run().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    struct LoopingService {
        stopped: Arc<AtomicBool>,
    }

    #[async_trait]
    impl Service for LoopingService {
        fn name(&self) -> &'static str {
            "looping"
        }

        async fn run(self: Box<Self>, shutdown: CancellationToken) -> Result<()> {
            shutdown.cancelled().await;
            self.stopped.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn cancelling_the_token_stops_every_service() {
        let mut orchestrator = Orchestrator::new();
        let first = Arc::new(AtomicBool::new(false));
        let second = Arc::new(AtomicBool::new(false));
        orchestrator.register(LoopingService {
            stopped: first.clone(),
        });
        orchestrator.register(LoopingService {
            stopped: second.clone(),
        });

        let token = orchestrator.shutdown_token();
        token.cancel();
        orchestrator.run().await.unwrap();

        assert!(first.load(Ordering::SeqCst));
        assert!(second.load(Ordering::SeqCst));
    }
}
