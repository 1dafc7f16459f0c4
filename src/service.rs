use crate::error::{Error, Result};
use crate::filter::{FrameFilter, OrderBy, PaginationCursor, PaginationResponse, MAX_PAGE_SIZE};
use crate::frame::{Frame, FrameMetadata};
use crate::indexer::Indexer;
use crate::metrics::MetricsSink;
use crate::source::{FrameCallback, Source};
use crate::store::FrameStore;
use anyhow::Context;
use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

/// The ingestion core: receives frames from sources, persists them through
/// the store, indexes their metadata, and serves reads and filtered
/// listings. Also owns the retention purge loop.
///
/// Writes are store-then-index. If indexing fails after the blob is
/// persisted the frame stays retrievable by ID and absent from listings;
/// the error is surfaced so the producer can retry, and a retried save hits
/// the store's conflict check rather than silently duplicating.
pub struct ForkChoiceService {
    sources: Vec<Box<dyn Source>>,
    store: Arc<dyn FrameStore>,
    indexer: Indexer,
    metrics: Arc<dyn MetricsSink>,
    retention_period: Duration,
    purge_interval: Duration,
}

impl ForkChoiceService {
    pub fn new(
        sources: Vec<Box<dyn Source>>,
        store: Arc<dyn FrameStore>,
        indexer: Indexer,
        metrics: Arc<dyn MetricsSink>,
        retention_period: Duration,
        purge_interval: Duration,
    ) -> Self {
        Self {
            sources,
            store,
            indexer,
            metrics,
            retention_period,
            purge_interval,
        }
    }

    /// Wire every source's callback to the ingestion path, start the
    /// sources, and spawn the retention loop. Callbacks spawn a task per
    /// frame so slow ingestion never blocks a source's poll loop.
    pub async fn start(self: &Arc<Self>, shutdown: CancellationToken) -> Result<()> {
        for source in &self.sources {
            let callback: FrameCallback = {
                let service = Arc::clone(self);
                let source_name = source.name().to_string();

                Arc::new(move |frame| {
                    let service = Arc::clone(&service);
                    let source_name = source_name.clone();

                    tokio::spawn(async move {
                        if let Err(err) = service.add_new_frame(&source_name, frame).await {
                            error!(source = %source_name, error = %err, "Failed to ingest frame");
                        }
                    });
                })
            };

            source.on_frame(callback);
            source.start().await?;

            info!(source = %source.name(), r#type = %source.source_type(), "Source started");
        }

        let service = Arc::clone(self);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(service.purge_interval) => {}
                    _ = shutdown.cancelled() => {
                        info!("Retention loop stopped");

                        return;
                    }
                }

                match service.purge_old_frames().await {
                    Ok(purged) if purged > 0 => info!(purged, "Purged expired frames"),
                    Ok(_) => {}
                    Err(err) => error!(error = %err, "Retention pass failed"),
                }
            }
        });

        Ok(())
    }

    /// Stop every source. Failures are logged and do not abort the rest of
    /// the shutdown.
    pub async fn stop(&self) {
        for source in &self.sources {
            if let Err(err) = source.stop().await {
                warn!(source = %source.name(), error = %err, "Failed to stop source");
            }
        }
    }

    /// Validate, persist, and index a new frame.
    #[instrument(skip(self, frame), fields(source = %source_name, id = %frame.metadata.id))]
    pub async fn add_new_frame(&self, source_name: &str, frame: Frame) -> Result<()> {
        frame.validate()?;

        self.store
            .save_frame(&frame)
            .await
            .map_err(|err| self.surface("save_frame", err))?;

        if let Err(err) = self.indexer.insert_frame_metadata(&frame.metadata).await {
            warn!(
                id = %frame.metadata.id,
                "Frame stored but not indexed; it is retrievable by ID only"
            );

            return Err(self.surface("index_frame", err));
        }

        self.metrics.frame_added(source_name);

        info!(
            node = %frame.metadata.node,
            slot = frame.metadata.wall_clock_slot,
            "Added frame"
        );

        Ok(())
    }

    pub async fn get_frame(&self, id: &str) -> Result<Frame> {
        if id.is_empty() {
            return Err(Error::InvalidId);
        }

        self.store
            .get_frame(id)
            .await
            .map_err(|err| self.surface("get_frame", err))
    }

    pub async fn delete_frame(&self, id: &str) -> Result<()> {
        if id.is_empty() {
            return Err(Error::InvalidId);
        }

        self.remove_frame(id)
            .await
            .map_err(|err| self.surface("delete_frame", err))?;

        self.metrics.frame_deleted();

        info!(id = %id, "Deleted frame");

        Ok(())
    }

    /// Metadata listing. The empty filter is allowed here; it pages over
    /// everything.
    pub async fn list_metadata(
        &self,
        filter: &FrameFilter,
        page: &PaginationCursor,
    ) -> Result<(Vec<FrameMetadata>, PaginationResponse)> {
        let total = self
            .indexer
            .count_frame_metadata(filter)
            .await
            .map_err(|err| self.surface("count_metadata", err))?;

        let items = self
            .indexer
            .list_frame_metadata(filter, page)
            .await
            .map_err(|err| self.surface("list_metadata", err))?;

        Ok((items, PaginationResponse { total }))
    }

    /// Distinct nodes with at least one matching frame. Requires a
    /// predicate.
    pub async fn list_nodes(
        &self,
        filter: &FrameFilter,
        page: &PaginationCursor,
    ) -> Result<(Vec<String>, PaginationResponse)> {
        filter.validate_has_predicate()?;

        let total = self
            .indexer
            .count_nodes_with_frames(filter)
            .await
            .map_err(|err| self.surface("count_nodes", err))?;

        let items = self
            .indexer
            .list_nodes_with_frames(filter, page)
            .await
            .map_err(|err| self.surface("list_nodes", err))?;

        Ok((items, PaginationResponse { total }))
    }

    /// Distinct wall clock slots with at least one matching frame.
    pub async fn list_slots(
        &self,
        filter: &FrameFilter,
        page: &PaginationCursor,
    ) -> Result<(Vec<u64>, PaginationResponse)> {
        filter.validate_has_predicate()?;

        let total = self
            .indexer
            .count_slots_with_frames(filter)
            .await
            .map_err(|err| self.surface("count_slots", err))?;

        let items = self
            .indexer
            .list_slots_with_frames(filter, page)
            .await
            .map_err(|err| self.surface("list_slots", err))?;

        Ok((items, PaginationResponse { total }))
    }

    /// Distinct wall clock epochs with at least one matching frame.
    pub async fn list_epochs(
        &self,
        filter: &FrameFilter,
        page: &PaginationCursor,
    ) -> Result<(Vec<u64>, PaginationResponse)> {
        filter.validate_has_predicate()?;

        let total = self
            .indexer
            .count_epochs_with_frames(filter)
            .await
            .map_err(|err| self.surface("count_epochs", err))?;

        let items = self
            .indexer
            .list_epochs_with_frames(filter, page)
            .await
            .map_err(|err| self.surface("list_epochs", err))?;

        Ok((items, PaginationResponse { total }))
    }

    /// Distinct label names carried by matching frames.
    pub async fn list_labels(
        &self,
        filter: &FrameFilter,
        page: &PaginationCursor,
    ) -> Result<(Vec<String>, PaginationResponse)> {
        filter.validate_has_predicate()?;

        let total = self
            .indexer
            .count_labels_with_frames(filter)
            .await
            .map_err(|err| self.surface("count_labels", err))?;

        let items = self
            .indexer
            .list_labels_with_frames(filter, page)
            .await
            .map_err(|err| self.surface("list_labels", err))?;

        Ok((items, PaginationResponse { total }))
    }

    /// Delete every frame fetched before the retention cutoff, oldest
    /// first. A single frame failing to delete is logged and skipped; the
    /// pass continues and the next pass retries it.
    #[instrument(skip(self))]
    pub async fn purge_old_frames(&self) -> Result<u64> {
        let retention = ChronoDuration::from_std(self.retention_period)
            .context("retention period out of range")?;
        let cutoff = Utc::now() - retention;

        let filter = FrameFilter {
            before: Some(cutoff),
            ..Default::default()
        };
        let page = PaginationCursor {
            offset: 0,
            limit: MAX_PAGE_SIZE,
            order_by: OrderBy::FetchedAtAsc,
        };

        let mut purged = 0u64;

        loop {
            let batch = self.indexer.list_frame_metadata(&filter, &page).await?;

            if batch.is_empty() {
                break;
            }

            let batch_len = batch.len() as i64;
            let mut removed = 0u64;

            for metadata in batch {
                match self.remove_frame(&metadata.id).await {
                    Ok(()) => removed += 1,
                    Err(err) => {
                        warn!(id = %metadata.id, error = %err, "Failed to purge frame");
                        self.metrics.operation_failed("purge_frame");
                    }
                }
            }

            purged += removed;

            // Stop when the index is drained, or when nothing in a full
            // batch could be removed (retrying immediately would spin).
            if batch_len < MAX_PAGE_SIZE || removed == 0 {
                break;
            }
        }

        if purged > 0 {
            self.metrics.frames_purged(purged);
        }

        Ok(purged)
    }

    /// Store-first removal. Tolerates a frame present on only one side, so
    /// retries after partial failures converge; only a frame absent from
    /// both is not found.
    async fn remove_frame(&self, id: &str) -> Result<()> {
        let stored = match self.store.delete_frame(id).await {
            Ok(()) => true,
            Err(Error::FrameNotFound) => false,
            Err(err) => return Err(err),
        };

        match self.indexer.delete_frame_metadata(id).await {
            Ok(()) => Ok(()),
            Err(Error::FrameNotFound) if stored => Ok(()),
            Err(err) => Err(err),
        }
    }

    /// Public-boundary error mapping: backend causes are logged and counted
    /// here, then collapsed to [`Error::UnknownServerError`]. Typed
    /// variants pass through untouched.
    fn surface(&self, operation: &'static str, err: Error) -> Error {
        match err {
            Error::Internal(cause) => {
                error!(operation, error = %cause, "Operation failed");
                self.metrics.operation_failed(operation);

                Error::UnknownServerError
            }
            other => other,
        }
    }
}
