//! Workflow lifecycle
//!
//! The [`Supervisor`] starts every configured workflow, each under its own
//! child of the process shutdown token, and stops them all when that token is
//! cancelled. A watch that cannot be established aborts startup; inbound
//! workflows that fail later only log and stop themselves.

use std::sync::Arc;

use bucketsync_core::config::Config;
use bucketsync_core::credentials::CredentialResolver;
use bucketsync_core::ports::{MessageBroker, StorageConnector};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::inbound::{InboundHandle, InboundPipeline};
use crate::outbound::{OutboundHandle, OutboundPipeline};
use crate::SyncError;

pub struct Supervisor {
    config: Config,
    storage: Arc<dyn StorageConnector>,
    broker: Arc<dyn MessageBroker>,
    shutdown: CancellationToken,
}

impl Supervisor {
    pub fn new(
        config: Config,
        storage: Arc<dyn StorageConnector>,
        broker: Arc<dyn MessageBroker>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            config,
            storage,
            broker,
            shutdown,
        }
    }

    /// Starts outbound workflows first, then inbound ones
    ///
    /// # Errors
    /// Returns the first outbound start failure; workflows already started
    /// are stopped before returning.
    pub async fn start(&self) -> Result<RunningWorkflows, SyncError> {
        let credentials = CredentialResolver::new(self.config.remotes.clone());
        let backoff = self.config.retry.backoff();
        let mut running = RunningWorkflows::default();

        for workflow in &self.config.outbound {
            let started = OutboundPipeline::start(
                workflow.clone(),
                credentials.clone(),
                self.storage.clone(),
                self.shutdown.child_token(),
            );
            match started {
                Ok(handle) => running.outbound.push(handle),
                Err(e) => {
                    error!(workflow = %workflow.name, error = %e, "Failed to start outbound workflow");
                    running.shutdown().await;
                    return Err(e);
                }
            }
        }

        for workflow in &self.config.inbound {
            running.inbound.push(InboundPipeline::start(
                workflow.clone(),
                credentials.clone(),
                self.storage.clone(),
                self.broker.clone(),
                backoff,
                self.shutdown.child_token(),
            ));
        }

        info!(
            outbound = running.outbound.len(),
            inbound = running.inbound.len(),
            "All workflows started"
        );
        Ok(running)
    }

    /// Starts every workflow and runs until the shutdown token is cancelled.
    pub async fn run(self) -> Result<(), SyncError> {
        let running = self.start().await?;
        self.shutdown.cancelled().await;
        info!("Shutdown requested, stopping workflows");
        running.shutdown().await;
        Ok(())
    }
}

/// Handles of the started workflows.
#[derive(Debug, Default)]
pub struct RunningWorkflows {
    outbound: Vec<OutboundHandle>,
    inbound: Vec<InboundHandle>,
}

impl RunningWorkflows {
    pub fn outbound(&self) -> &[OutboundHandle] {
        &self.outbound
    }

    pub fn inbound(&self) -> &[InboundHandle] {
        &self.inbound
    }

    /// Cancels every workflow and waits for all of them to stop.
    pub async fn shutdown(self) {
        for handle in self.outbound {
            handle.close().await;
        }
        for handle in self.inbound {
            let name = handle.name().to_string();
            // Failures were logged when they happened
            if let Err(e) = handle.close().await {
                info!(workflow = %name, error = %e, "Inbound workflow had stopped with an error");
            }
        }
        info!("All workflows stopped");
    }
}
