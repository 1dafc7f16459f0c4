use crate::error::{Error, Result};
use crate::frame::EventSource;
use crate::indexer::Indexer;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Label convention the consensus-client backfill parses.
pub const CONSENSUS_CLIENT_LABEL_PREFIX: &str = "consensus_client_implementation=";

/// Label convention the event-source backfill parses.
pub const XATU_EVENT_NAME_LABEL_PREFIX: &str = "xatu_event_name=";

const XATU_POLLING_EVENT: &str = "BEACON_API_ETH_V1_DEBUG_FORK_CHOICE";
const XATU_REORG_EVENT: &str = "BEACON_API_ETH_V1_DEBUG_FORK_CHOICE_REORG";

/// Batch repair of metadata recorded before the consensus-client and
/// event-source columns existed. Each job is idempotent and safe to run
/// repeatedly alongside live ingestion: it only touches rows still in the
/// legacy partial state.
pub struct Backfill {
    indexer: Indexer,
    batch_size: i64,
    pause: Duration,
}

impl Backfill {
    pub fn new(indexer: Indexer) -> Self {
        Self {
            indexer,
            batch_size: 1000,
            pause: Duration::from_millis(500),
        }
    }

    /// Override the batch size and inter-batch pause. Mostly for tests.
    pub fn with_pacing(mut self, batch_size: i64, pause: Duration) -> Self {
        self.batch_size = batch_size;
        self.pause = pause;

        self
    }

    /// Run the backfills, then prune the promoted labels once both report
    /// zero remaining candidates.
    pub async fn run(&self) -> Result<()> {
        let clients = self.backfill_consensus_client().await?;
        let sources = self.backfill_event_source().await?;

        info!(
            consensus_clients = clients,
            event_sources = sources,
            "Backfill passes complete"
        );

        let pruned = self.delete_useless_labels().await?;

        info!(labels = pruned, "Pruned promoted labels");

        Ok(())
    }

    /// Populate `consensus_client` on frames that never had it, deriving it
    /// from the conventional label when present and `"unknown"` otherwise.
    /// Returns the number of frames updated.
    #[instrument(skip(self))]
    pub async fn backfill_consensus_client(&self) -> Result<u64> {
        let mut updated = 0;

        loop {
            let candidates = self
                .indexer
                .list_frames_missing_consensus_client(self.batch_size)
                .await?;

            if candidates.is_empty() {
                return Ok(updated);
            }

            for mut metadata in candidates {
                metadata.consensus_client = metadata
                    .labels
                    .iter()
                    .find_map(|label| label.strip_prefix(CONSENSUS_CLIENT_LABEL_PREFIX))
                    .filter(|value| !value.is_empty())
                    .unwrap_or("unknown")
                    .to_string();

                self.indexer.update_frame_metadata(&metadata).await?;
                updated += 1;
            }

            debug!(updated, "Consensus client backfill batch complete");

            tokio::time::sleep(self.pause).await;
        }
    }

    /// Populate `event_source` on frames that never had it. Defaults to
    /// `beacon_node`; reclassified by the Xatu event-name label when the
    /// frame carries one. Returns the number of frames updated.
    #[instrument(skip(self))]
    pub async fn backfill_event_source(&self) -> Result<u64> {
        let mut updated = 0;

        loop {
            let candidates = self
                .indexer
                .list_frames_missing_event_source(self.batch_size)
                .await?;

            if candidates.is_empty() {
                return Ok(updated);
            }

            for mut metadata in candidates {
                let event_name = metadata
                    .labels
                    .iter()
                    .find_map(|label| label.strip_prefix(XATU_EVENT_NAME_LABEL_PREFIX));

                metadata.event_source = match event_name {
                    Some(XATU_REORG_EVENT) => EventSource::XatuReorgEvent,
                    Some(XATU_POLLING_EVENT) => EventSource::XatuPolling,
                    _ => EventSource::BeaconNode,
                };

                self.indexer.update_frame_metadata(&metadata).await?;
                updated += 1;
            }

            debug!(updated, "Event source backfill batch complete");

            tokio::time::sleep(self.pause).await;
        }
    }

    /// Delete the label rows whose information has been promoted into
    /// first-class metadata columns. Refuses to run while either backfill
    /// still has candidates, and rate-limits between deletion passes.
    #[instrument(skip(self))]
    pub async fn delete_useless_labels(&self) -> Result<u64> {
        let clients_remaining = self.indexer.count_frames_missing_consensus_client().await?;
        let sources_remaining = self.indexer.count_frames_missing_event_source().await?;

        if clients_remaining > 0 || sources_remaining > 0 {
            warn!(
                clients_remaining,
                sources_remaining,
                "Refusing to prune labels while backfill candidates remain"
            );

            return Err(Error::Internal(anyhow::anyhow!(
                "{} frames still awaiting backfill",
                clients_remaining + sources_remaining
            )));
        }

        let mut deleted = 0;

        for prefix in [CONSENSUS_CLIENT_LABEL_PREFIX, XATU_EVENT_NAME_LABEL_PREFIX] {
            loop {
                let batch = self
                    .indexer
                    .delete_labels_with_prefix(prefix, self.batch_size)
                    .await?;

                deleted += batch;

                if batch == 0 {
                    break;
                }

                tokio::time::sleep(self.pause).await;
            }
        }

        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IndexerConfig;
    use crate::filter::{FrameFilter, PaginationCursor};
    use crate::frame::fake_frame;

    async fn test_indexer() -> Indexer {
        let config = IndexerConfig {
            dsn: "sqlite::memory:".to_string(),
            max_connections: 1,
            connect_timeout_secs: 5,
            run_migrations: true,
        };

        let indexer = Indexer::new(&config).await.unwrap();
        indexer.run_migrations().await.unwrap();

        indexer
    }

    fn backfill(indexer: &Indexer) -> Backfill {
        Backfill::new(indexer.clone()).with_pacing(100, Duration::from_millis(0))
    }

    async fn insert_legacy_frame(indexer: &Indexer, labels: &[&str]) -> String {
        let mut metadata = fake_frame().metadata;
        metadata.labels = labels.iter().map(|l| l.to_string()).collect();
        metadata.consensus_client = String::new();
        metadata.event_source = EventSource::Unknown;

        indexer.insert_frame_metadata(&metadata).await.unwrap();

        metadata.id
    }

    async fn get_metadata(indexer: &Indexer, id: &str) -> crate::frame::FrameMetadata {
        indexer
            .list_frame_metadata(&FrameFilter::default(), &PaginationCursor::max_page())
            .await
            .unwrap()
            .into_iter()
            .find(|m| m.id == id)
            .unwrap()
    }

    #[tokio::test]
    async fn test_consensus_client_derived_from_label() {
        let indexer = test_indexer().await;
        let labelled =
            insert_legacy_frame(&indexer, &["consensus_client_implementation=teku"]).await;
        let bare = insert_legacy_frame(&indexer, &[]).await;

        let updated = backfill(&indexer).backfill_consensus_client().await.unwrap();
        assert_eq!(updated, 2);

        assert_eq!(get_metadata(&indexer, &labelled).await.consensus_client, "teku");
        assert_eq!(get_metadata(&indexer, &bare).await.consensus_client, "unknown");

        // Idempotent: a second pass finds nothing to do.
        let updated = backfill(&indexer).backfill_consensus_client().await.unwrap();
        assert_eq!(updated, 0);
    }

    #[tokio::test]
    async fn test_event_source_classification() {
        let indexer = test_indexer().await;
        let polling = insert_legacy_frame(
            &indexer,
            &["xatu_event_name=BEACON_API_ETH_V1_DEBUG_FORK_CHOICE"],
        )
        .await;
        let reorg = insert_legacy_frame(
            &indexer,
            &["xatu_event_name=BEACON_API_ETH_V1_DEBUG_FORK_CHOICE_REORG"],
        )
        .await;
        let bare = insert_legacy_frame(&indexer, &[]).await;

        backfill(&indexer).backfill_event_source().await.unwrap();

        assert_eq!(
            get_metadata(&indexer, &polling).await.event_source,
            EventSource::XatuPolling
        );
        assert_eq!(
            get_metadata(&indexer, &reorg).await.event_source,
            EventSource::XatuReorgEvent
        );
        assert_eq!(
            get_metadata(&indexer, &bare).await.event_source,
            EventSource::BeaconNode
        );
    }

    #[tokio::test]
    async fn test_prune_refused_while_candidates_remain() {
        let indexer = test_indexer().await;
        insert_legacy_frame(&indexer, &["consensus_client_implementation=prysm"]).await;

        let err = backfill(&indexer).delete_useless_labels().await.unwrap_err();
        assert!(matches!(err, Error::Internal(_)));
    }

    #[tokio::test]
    async fn test_full_run_prunes_promoted_labels() {
        let indexer = test_indexer().await;
        let id = insert_legacy_frame(
            &indexer,
            &[
                "consensus_client_implementation=nimbus",
                "xatu_event_name=BEACON_API_ETH_V1_DEBUG_FORK_CHOICE",
                "network=mainnet",
            ],
        )
        .await;

        backfill(&indexer).run().await.unwrap();

        let metadata = get_metadata(&indexer, &id).await;
        assert_eq!(metadata.consensus_client, "nimbus");
        assert_eq!(metadata.event_source, EventSource::XatuPolling);
        assert_eq!(metadata.labels, vec!["network=mainnet".to_string()]);
    }
}
