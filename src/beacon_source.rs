use crate::config::BeaconNodeSourceConfig;
use crate::error::Result;
use crate::ethereum::EthereumNetworkConfig;
use crate::frame::{EventSource, Frame, FrameMetadata};
use crate::source::{FrameCallback, Source};
use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use uuid::Uuid;

const FORK_CHOICE_PATH: &str = "/eth/v1/debug/fork_choice";

/// Polls a beacon node's fork choice debug endpoint on a fixed interval and
/// hands each dump to the registered callback.
pub struct BeaconNodeSource {
    inner: Arc<Inner>,
}

struct Inner {
    name: String,
    config: BeaconNodeSourceConfig,
    ethereum: EthereumNetworkConfig,
    client: reqwest::Client,
    callback: Mutex<Option<FrameCallback>>,
    shutdown: CancellationToken,
}

impl BeaconNodeSource {
    pub fn new(
        name: String,
        config: BeaconNodeSourceConfig,
        ethereum: EthereumNetworkConfig,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .context("failed to build beacon node http client")?;

        Ok(Self {
            inner: Arc::new(Inner {
                name,
                config,
                ethereum,
                client,
                callback: Mutex::new(None),
                shutdown: CancellationToken::new(),
            }),
        })
    }
}

impl Inner {
    async fn poll_once(&self) -> Result<()> {
        let url = format!(
            "{}{}",
            self.config.endpoint.trim_end_matches('/'),
            FORK_CHOICE_PATH
        );

        let data: serde_json::Value = self
            .client
            .get(&url)
            .send()
            .await
            .context("failed to fetch fork choice dump")?
            .error_for_status()
            .context("beacon node returned an error status")?
            .json()
            .await
            .context("failed to decode fork choice dump")?;

        let fetched_at = Utc::now();

        let frame = Frame {
            metadata: FrameMetadata {
                id: Uuid::new_v4().to_string(),
                node: self.name.clone(),
                fetched_at,
                wall_clock_slot: self.ethereum.wall_clock_slot(fetched_at),
                wall_clock_epoch: self.ethereum.wall_clock_epoch(fetched_at),
                labels: self.config.labels.clone(),
                consensus_client: self.config.consensus_client.clone(),
                event_source: EventSource::BeaconNode,
            },
            data,
        };

        debug!(
            source = %self.name,
            id = %frame.metadata.id,
            slot = frame.metadata.wall_clock_slot,
            "Fetched fork choice frame"
        );

        let callback = self.callback.lock().clone();

        if let Some(callback) = callback {
            callback(frame);
        }

        Ok(())
    }

    async fn poll_loop(self: Arc<Self>) {
        let interval = Duration::from_secs(self.config.polling_interval_secs);

        // Poll immediately; the interval paces subsequent fetches.
        loop {
            if let Err(err) = self.poll_once().await {
                error!(source = %self.name, error = %err, "Failed to poll beacon node");
            }

            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = self.shutdown.cancelled() => {
                    info!(source = %self.name, "Beacon node source stopped");

                    return;
                }
            }
        }
    }
}

#[async_trait]
impl Source for BeaconNodeSource {
    fn name(&self) -> &str {
        &self.inner.name
    }

    fn source_type(&self) -> &str {
        "beacon_node"
    }

    async fn start(&self) -> Result<()> {
        info!(
            source = %self.inner.name,
            endpoint = %self.inner.config.endpoint,
            interval_secs = self.inner.config.polling_interval_secs,
            "Starting beacon node source"
        );

        tokio::spawn(self.inner.clone().poll_loop());

        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.inner.shutdown.cancel();

        Ok(())
    }

    fn on_frame(&self, callback: FrameCallback) {
        *self.inner.callback.lock() = Some(callback);
    }
}
