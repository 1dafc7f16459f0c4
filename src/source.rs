use crate::beacon_source::BeaconNodeSource;
use crate::config::{NamedSourceConfig, SourceConfig};
use crate::error::{Error, Result};
use crate::ethereum::EthereumNetworkConfig;
use crate::frame::Frame;
use async_trait::async_trait;
use std::sync::Arc;

/// Callback a source invokes for every frame it produces. The registered
/// callback is expected to be cheap: the service's implementation spawns a
/// task per frame, so sources never block on ingestion.
pub type FrameCallback = Arc<dyn Fn(Frame) + Send + Sync>;

/// A producer of frames. The core registers exactly one callback per active
/// source at startup and calls `start` for each; `stop` is called for every
/// source on shutdown.
///
/// No ordering is guaranteed across frames, within or across sources.
#[async_trait]
pub trait Source: Send + Sync {
    /// The user-defined name of the source.
    fn name(&self) -> &str;

    /// The type of the source (the config `type` tag).
    fn source_type(&self) -> &str;

    async fn start(&self) -> Result<()>;

    async fn stop(&self) -> Result<()>;

    /// Register the frame callback. Must be called before `start`.
    fn on_frame(&self, callback: FrameCallback);
}

impl std::fmt::Debug for dyn Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Source")
            .field("name", &self.name())
            .field("source_type", &self.source_type())
            .finish()
    }
}

/// Build a source from its typed configuration.
///
/// `xatu_http` frames arrive through an external push receiver rather than
/// this binary; its config shape is accepted so deployments can share one
/// config file, but construction here is refused with a typed error.
pub fn from_config(
    config: &NamedSourceConfig,
    ethereum: &EthereumNetworkConfig,
) -> Result<Box<dyn Source>> {
    match &config.config {
        SourceConfig::BeaconNode(beacon_config) => Ok(Box::new(BeaconNodeSource::new(
            config.name.clone(),
            beacon_config.clone(),
            ethereum.clone(),
        )?)),
        SourceConfig::XatuHttp(_) => {
            Err(Error::UnsupportedSourceType("xatu_http".to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BeaconNodeSourceConfig, XatuHttpSourceConfig};

    #[test]
    fn test_beacon_node_source_is_constructed() {
        let config = NamedSourceConfig {
            name: "local".to_string(),
            config: SourceConfig::BeaconNode(BeaconNodeSourceConfig {
                endpoint: "http://localhost:5052".to_string(),
                polling_interval_secs: 12,
                request_timeout_secs: 10,
                labels: vec![],
                consensus_client: String::new(),
            }),
        };

        let source = from_config(&config, &EthereumNetworkConfig::default()).unwrap();

        assert_eq!(source.name(), "local");
        assert_eq!(source.source_type(), "beacon_node");
    }

    #[test]
    fn test_xatu_http_is_refused_with_typed_error() {
        let config = NamedSourceConfig {
            name: "sentries".to_string(),
            config: SourceConfig::XatuHttp(XatuHttpSourceConfig {
                listen_addr: "0.0.0.0:9095".to_string(),
            }),
        };

        let err = from_config(&config, &EthereumNetworkConfig::default()).unwrap_err();

        assert!(matches!(err, Error::UnsupportedSourceType(_)));
    }

    #[test]
    fn test_unknown_source_type_is_rejected_at_deserialization() {
        let raw = serde_json::json!({
            "name": "mystery",
            "type": "carrier_pigeon",
        });

        assert!(serde_json::from_value::<NamedSourceConfig>(raw).is_err());
    }
}
