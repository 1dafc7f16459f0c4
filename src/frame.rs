use crate::error::{Error, Result};
use anyhow::Context;
use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::{Read, Write};

/// How a frame was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EventSource {
    /// Recorded before the field existed; repaired by backfill.
    #[default]
    Unknown,
    /// Polled directly from a beacon node.
    BeaconNode,
    /// Received from a Xatu sentry polling its beacon node.
    XatuPolling,
    /// Received from a Xatu sentry reorg event.
    XatuReorgEvent,
}

impl EventSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventSource::Unknown => "unknown",
            EventSource::BeaconNode => "beacon_node",
            EventSource::XatuPolling => "xatu_polling",
            EventSource::XatuReorgEvent => "xatu_reorg_event",
        }
    }

    /// Parse a stored value. Unrecognized strings decode as `Unknown` so
    /// rows written by older schema versions stay readable.
    pub fn parse(value: &str) -> Self {
        match value {
            "beacon_node" => EventSource::BeaconNode,
            "xatu_polling" => EventSource::XatuPolling,
            "xatu_reorg_event" => EventSource::XatuReorgEvent,
            _ => EventSource::Unknown,
        }
    }
}

impl fmt::Display for EventSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity and queryable attributes of a frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameMetadata {
    /// Globally unique frame ID (UUID), the join key between store and index.
    pub id: String,
    /// The node that provided the frame. For a beacon node this is its
    /// configured source name; for Xatu this is the sentry ID.
    pub node: String,
    /// When the frame was fetched.
    pub fetched_at: DateTime<Utc>,
    /// Wall clock slot at the time the frame was fetched.
    pub wall_clock_slot: u64,
    /// Wall clock epoch at the time the frame was fetched.
    pub wall_clock_epoch: u64,
    /// Opaque labels attached to the frame.
    #[serde(default)]
    pub labels: Vec<String>,
    /// Implementation name of the producing consensus client. May be empty
    /// for rows written before the column existed; repaired by backfill.
    #[serde(default)]
    pub consensus_client: String,
    /// How the frame was obtained.
    #[serde(default)]
    pub event_source: EventSource,
}

impl FrameMetadata {
    pub fn validate(&self) -> Result<()> {
        if self.id.is_empty() {
            return Err(Error::InvalidFrame("invalid id".to_string()));
        }

        if self.node.is_empty() {
            return Err(Error::InvalidFrame("invalid node".to_string()));
        }

        if self.fetched_at.timestamp() == 0 {
            return Err(Error::InvalidFrame("invalid fetched_at".to_string()));
        }

        if self.wall_clock_slot == 0 {
            return Err(Error::InvalidFrame("invalid wall clock slot".to_string()));
        }

        if self.wall_clock_epoch == 0 {
            return Err(Error::InvalidFrame("invalid wall clock epoch".to_string()));
        }

        Ok(())
    }
}

/// One captured fork choice dump plus its metadata.
///
/// `data` is the raw dump as returned by the node; the core never
/// interprets it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub metadata: FrameMetadata,
    pub data: serde_json::Value,
}

impl Frame {
    pub fn validate(&self) -> Result<()> {
        if self.data.is_null() {
            return Err(Error::InvalidFrame("invalid data".to_string()));
        }

        self.metadata.validate()
    }

    /// Serialize to JSON and gzip the result. This is the blob format every
    /// store backend persists.
    pub fn to_gzip_json(&self) -> Result<Vec<u8>> {
        let as_json = serde_json::to_vec(self).context("failed to serialize frame")?;

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder
            .write_all(&as_json)
            .context("failed to compress frame")?;

        Ok(encoder.finish().context("failed to compress frame")?)
    }

    /// Inverse of [`Frame::to_gzip_json`].
    pub fn from_gzip_json(data: &[u8]) -> Result<Frame> {
        let mut decoder = GzDecoder::new(data);
        let mut uncompressed = Vec::new();
        decoder
            .read_to_end(&mut uncompressed)
            .context("failed to decompress frame")?;

        Ok(serde_json::from_slice(&uncompressed).context("failed to deserialize frame")?)
    }
}

/// Generate a random valid frame. Test helper, mirrored after the fixture
/// generators the dump producers use.
pub fn fake_frame() -> Frame {
    let slot = 4_000_000 + (rand_u64() % 1_000_000);

    Frame {
        metadata: FrameMetadata {
            id: uuid::Uuid::new_v4().to_string(),
            node: format!("node-{}", uuid::Uuid::new_v4()),
            fetched_at: Utc::now(),
            wall_clock_slot: slot,
            wall_clock_epoch: slot / 32,
            labels: vec!["fixture".to_string()],
            consensus_client: String::new(),
            event_source: EventSource::Unknown,
        },
        data: serde_json::json!({
            "justified_checkpoint": { "epoch": (slot / 32).to_string(), "root": "0x00" },
            "finalized_checkpoint": { "epoch": (slot / 32 - 2).to_string(), "root": "0x00" },
            "fork_choice_nodes": [],
        }),
    }
}

fn rand_u64() -> u64 {
    // uuid v4 is already a CSPRNG output; cheap source of test randomness
    // without pulling in a rand dependency.
    uuid::Uuid::new_v4().as_u128() as u64
}
