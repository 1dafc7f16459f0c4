use crate::config::IndexerConfig;
use crate::error::{Error, Result};
use crate::filter::{bind_filter, FrameFilter, PaginationCursor};
use crate::frame::{EventSource, FrameMetadata};
use anyhow::Context;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::FromRow;
use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, instrument};

/// Cap on how many label rows a single intersection query will scan.
const LABEL_SCAN_LIMIT: i64 = 30_000;

/// Relational secondary index over frame metadata and labels.
///
/// Two tables: `frame_metadata` keyed by frame ID, and
/// `frame_metadata_labels`, many label rows per frame. Concurrency control
/// is delegated to the engine's transactions; every statement here is
/// well-scoped.
#[derive(Clone)]
pub struct Indexer {
    pool: SqlitePool,
}

/// Database shape of a metadata row; labels are loaded separately and
/// attached per page.
#[derive(Debug, FromRow)]
struct FrameMetadataRow {
    id: String,
    node: String,
    fetched_at: DateTime<Utc>,
    wall_clock_slot: i64,
    wall_clock_epoch: i64,
    consensus_client: String,
    event_source: String,
}

impl FrameMetadataRow {
    fn into_metadata(self, labels: Vec<String>) -> FrameMetadata {
        FrameMetadata {
            id: self.id,
            node: self.node,
            fetched_at: self.fetched_at,
            wall_clock_slot: self.wall_clock_slot as u64,
            wall_clock_epoch: self.wall_clock_epoch as u64,
            labels,
            consensus_client: self.consensus_client,
            event_source: EventSource::parse(&self.event_source),
        }
    }
}

#[derive(Debug, FromRow)]
struct LabelRow {
    frame_id: String,
    name: String,
}

const METADATA_COLUMNS: &str =
    "id, node, fetched_at, wall_clock_slot, wall_clock_epoch, consensus_client, event_source";

/// Escape LIKE wildcards so label prefixes containing `_` match literally.
fn like_prefix_pattern(prefix: &str) -> String {
    let mut escaped = String::with_capacity(prefix.len() + 1);

    for c in prefix.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }

        escaped.push(c);
    }

    escaped.push('%');

    escaped
}

/// Append ` AND column IN ($n,...)` for `count` binds.
fn push_in_clause(sql: &mut String, column: &str, count: usize, param_count: &mut usize) {
    sql.push_str(&format!(" AND {} IN (", column));

    for i in 0..count {
        if i > 0 {
            sql.push(',');
        }

        *param_count += 1;
        sql.push_str(&format!("${}", param_count));
    }

    sql.push(')');
}

impl Indexer {
    /// Connect to the index database.
    pub async fn new(config: &IndexerConfig) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(&config.dsn)
            .context("invalid indexer dsn")?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .connect_with(options)
            .await
            .context("failed to connect to index database")?;

        info!(dsn = %config.dsn, "Connected to index database");

        Ok(Self { pool })
    }

    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("failed to run index migrations")?;

        info!("Index migrations completed");

        Ok(())
    }

    /// The connection pool, exposed for health checks and direct-table test
    /// assertions.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Insert a metadata row and one label row per label, atomically.
    #[instrument(skip(self, metadata), fields(id = %metadata.id, node = %metadata.node))]
    pub async fn insert_frame_metadata(&self, metadata: &FrameMetadata) -> Result<()> {
        let created_at = Utc::now();

        let mut tx = self
            .pool
            .begin()
            .await
            .context("failed to begin transaction")?;

        sqlx::query(
            r#"
            INSERT INTO frame_metadata (
                id, node, fetched_at, wall_clock_slot, wall_clock_epoch,
                consensus_client, event_source, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(&metadata.id)
        .bind(&metadata.node)
        .bind(metadata.fetched_at)
        .bind(metadata.wall_clock_slot as i64)
        .bind(metadata.wall_clock_epoch as i64)
        .bind(&metadata.consensus_client)
        .bind(metadata.event_source.as_str())
        .bind(created_at)
        .execute(&mut *tx)
        .await
        .context("failed to insert frame metadata")?;

        for label in &metadata.labels {
            sqlx::query(
                "INSERT INTO frame_metadata_labels (name, frame_id, created_at) VALUES ($1, $2, $3)",
            )
            .bind(label)
            .bind(&metadata.id)
            .bind(created_at)
            .execute(&mut *tx)
            .await
            .context("failed to insert frame label")?;
        }

        tx.commit().await.context("failed to commit frame metadata")?;

        debug!(labels = metadata.labels.len(), "Indexed frame metadata");

        Ok(())
    }

    /// Remove the metadata row and every label row for the frame. A delete
    /// of a frame that is not indexed is an error, not a silent success.
    #[instrument(skip(self), fields(id = %id))]
    pub async fn delete_frame_metadata(&self, id: &str) -> Result<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("failed to begin transaction")?;

        sqlx::query("DELETE FROM frame_metadata_labels WHERE frame_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .context("failed to delete frame labels")?;

        let result = sqlx::query("DELETE FROM frame_metadata WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .context("failed to delete frame metadata")?;

        if result.rows_affected() == 0 {
            // Dropping the transaction rolls back the label delete.
            return Err(Error::FrameNotFound);
        }

        tx.commit()
            .await
            .context("failed to commit frame metadata delete")?;

        debug!("Deleted frame metadata");

        Ok(())
    }

    /// Backfill-only update of the promoted metadata columns. Must affect
    /// exactly one row.
    pub async fn update_frame_metadata(&self, metadata: &FrameMetadata) -> Result<()> {
        let result = sqlx::query(
            "UPDATE frame_metadata SET consensus_client = $1, event_source = $2 WHERE id = $3",
        )
        .bind(&metadata.consensus_client)
        .bind(metadata.event_source.as_str())
        .bind(&metadata.id)
        .execute(&self.pool)
        .await
        .context("failed to update frame metadata")?;

        match result.rows_affected() {
            0 => Err(Error::FrameNotFound),
            1 => Ok(()),
            n => Err(Error::Internal(anyhow::anyhow!(
                "update of frame {} affected {} rows",
                metadata.id,
                n
            ))),
        }
    }

    pub async fn count_frame_metadata(&self, filter: &FrameFilter) -> Result<i64> {
        let ids = match self.label_restriction(filter).await? {
            Some(ids) if ids.is_empty() => return Ok(0),
            other => other,
        };

        let mut sql = String::from("SELECT COUNT(*) FROM frame_metadata WHERE 1=1");
        let mut params = 0;
        filter.push_predicates(&mut sql, &mut params);

        if let Some(ref ids) = ids {
            push_in_clause(&mut sql, "id", ids.len(), &mut params);
        }

        let mut query = sqlx::query_scalar::<_, i64>(&sql);
        query = bind_filter!(query, filter);

        if let Some(ref ids) = ids {
            for id in ids {
                query = query.bind(id.clone());
            }
        }

        Ok(query
            .fetch_one(&self.pool)
            .await
            .context("failed to count frame metadata")?)
    }

    pub async fn list_frame_metadata(
        &self,
        filter: &FrameFilter,
        page: &PaginationCursor,
    ) -> Result<Vec<FrameMetadata>> {
        let ids = match self.label_restriction(filter).await? {
            Some(ids) if ids.is_empty() => return Ok(Vec::new()),
            other => other,
        };

        let mut sql = format!("SELECT {} FROM frame_metadata WHERE 1=1", METADATA_COLUMNS);
        let mut params = 0;
        filter.push_predicates(&mut sql, &mut params);

        if let Some(ref ids) = ids {
            push_in_clause(&mut sql, "id", ids.len(), &mut params);
        }

        page.push_sql(&mut sql);

        let mut query = sqlx::query_as::<_, FrameMetadataRow>(&sql);
        query = bind_filter!(query, filter);

        if let Some(ref ids) = ids {
            for id in ids {
                query = query.bind(id.clone());
            }
        }

        let rows = query
            .fetch_all(&self.pool)
            .await
            .context("failed to list frame metadata")?;

        self.attach_labels(rows).await
    }

    pub async fn count_nodes_with_frames(&self, filter: &FrameFilter) -> Result<i64> {
        self.count_distinct_column("node", filter).await
    }

    pub async fn list_nodes_with_frames(
        &self,
        filter: &FrameFilter,
        page: &PaginationCursor,
    ) -> Result<Vec<String>> {
        self.list_distinct_column::<String>("node", filter, page)
            .await
    }

    pub async fn count_slots_with_frames(&self, filter: &FrameFilter) -> Result<i64> {
        self.count_distinct_column("wall_clock_slot", filter).await
    }

    pub async fn list_slots_with_frames(
        &self,
        filter: &FrameFilter,
        page: &PaginationCursor,
    ) -> Result<Vec<u64>> {
        let slots = self
            .list_distinct_column::<i64>("wall_clock_slot", filter, page)
            .await?;

        Ok(slots.into_iter().map(|s| s as u64).collect())
    }

    pub async fn count_epochs_with_frames(&self, filter: &FrameFilter) -> Result<i64> {
        self.count_distinct_column("wall_clock_epoch", filter).await
    }

    pub async fn list_epochs_with_frames(
        &self,
        filter: &FrameFilter,
        page: &PaginationCursor,
    ) -> Result<Vec<u64>> {
        let epochs = self
            .list_distinct_column::<i64>("wall_clock_epoch", filter, page)
            .await?;

        Ok(epochs.into_iter().map(|e| e as u64).collect())
    }

    /// Distinct label names carried by frames matching the filter.
    pub async fn count_labels_with_frames(&self, filter: &FrameFilter) -> Result<i64> {
        let ids = self.matching_frame_ids(filter).await?;

        if ids.is_empty() {
            return Ok(0);
        }

        let mut sql = String::from(
            "SELECT COUNT(DISTINCT name) FROM frame_metadata_labels WHERE 1=1",
        );
        let mut params = 0;
        push_in_clause(&mut sql, "frame_id", ids.len(), &mut params);

        let mut query = sqlx::query_scalar::<_, i64>(&sql);
        for id in &ids {
            query = query.bind(id.clone());
        }

        Ok(query
            .fetch_one(&self.pool)
            .await
            .context("failed to count labels")?)
    }

    pub async fn list_labels_with_frames(
        &self,
        filter: &FrameFilter,
        page: &PaginationCursor,
    ) -> Result<Vec<String>> {
        let ids = self.matching_frame_ids(filter).await?;

        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut sql =
            String::from("SELECT DISTINCT name FROM frame_metadata_labels WHERE 1=1");
        let mut params = 0;
        push_in_clause(&mut sql, "frame_id", ids.len(), &mut params);
        sql.push_str(&format!(
            " ORDER BY name ASC LIMIT {} OFFSET {}",
            page.effective_limit(),
            page.effective_offset()
        ));

        let mut query = sqlx::query_scalar::<_, String>(&sql);
        for id in &ids {
            query = query.bind(id.clone());
        }

        Ok(query
            .fetch_all(&self.pool)
            .await
            .context("failed to list labels")?)
    }

    /// Frames whose consensus client column was never populated; backfill
    /// candidates.
    pub async fn list_frames_missing_consensus_client(
        &self,
        limit: i64,
    ) -> Result<Vec<FrameMetadata>> {
        let sql = format!(
            "SELECT {} FROM frame_metadata WHERE consensus_client = '' ORDER BY created_at ASC LIMIT $1",
            METADATA_COLUMNS
        );

        let rows = sqlx::query_as::<_, FrameMetadataRow>(&sql)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .context("failed to list consensus client backfill candidates")?;

        self.attach_labels(rows).await
    }

    pub async fn count_frames_missing_consensus_client(&self) -> Result<i64> {
        Ok(sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM frame_metadata WHERE consensus_client = ''",
        )
        .fetch_one(&self.pool)
        .await
        .context("failed to count consensus client backfill candidates")?)
    }

    /// Frames whose event source column was never populated.
    pub async fn list_frames_missing_event_source(&self, limit: i64) -> Result<Vec<FrameMetadata>> {
        let sql = format!(
            "SELECT {} FROM frame_metadata WHERE event_source = '' OR event_source = 'unknown' ORDER BY created_at ASC LIMIT $1",
            METADATA_COLUMNS
        );

        let rows = sqlx::query_as::<_, FrameMetadataRow>(&sql)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .context("failed to list event source backfill candidates")?;

        self.attach_labels(rows).await
    }

    pub async fn count_frames_missing_event_source(&self) -> Result<i64> {
        Ok(sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM frame_metadata WHERE event_source = '' OR event_source = 'unknown'",
        )
        .fetch_one(&self.pool)
        .await
        .context("failed to count event source backfill candidates")?)
    }

    /// Delete up to `limit` label rows whose name starts with `prefix`.
    /// Used to prune labels whose information has been promoted into
    /// first-class metadata columns.
    pub async fn delete_labels_with_prefix(&self, prefix: &str, limit: i64) -> Result<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM frame_metadata_labels WHERE id IN (
                SELECT id FROM frame_metadata_labels WHERE name LIKE $1 ESCAPE '\' LIMIT $2
            )
            "#,
        )
        .bind(like_prefix_pattern(prefix))
        .bind(limit)
        .execute(&self.pool)
        .await
        .context("failed to delete labels by prefix")?;

        Ok(result.rows_affected())
    }

    pub async fn count_labels_with_prefix(&self, prefix: &str) -> Result<i64> {
        Ok(sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM frame_metadata_labels WHERE name LIKE $1 ESCAPE '\\'",
        )
        .bind(like_prefix_pattern(prefix))
        .fetch_one(&self.pool)
        .await
        .context("failed to count labels by prefix")?)
    }

    /// Resolve the filter's label restriction to a frame-ID set.
    ///
    /// `None` means no restriction; `Some(vec![])` means the restriction is
    /// unsatisfiable and the caller must return an empty result. An empty
    /// requested set ("match these zero labels") is unsatisfiable by design,
    /// distinct from the absent filter that matches everything.
    async fn label_restriction(&self, filter: &FrameFilter) -> Result<Option<Vec<String>>> {
        match &filter.labels {
            None => Ok(None),
            Some(labels) => Ok(Some(self.frame_ids_with_labels(labels, filter).await?)),
        }
    }

    /// The label intersection query: frames that carry EVERY requested
    /// label. Scans the label table for rows matching any requested name,
    /// newest first up to a cap, then keeps the frame IDs whose distinct
    /// match count equals the requested set size.
    async fn frame_ids_with_labels(
        &self,
        labels: &[String],
        filter: &FrameFilter,
    ) -> Result<Vec<String>> {
        let mut requested: Vec<&str> = labels.iter().map(String::as_str).collect();
        requested.sort_unstable();
        requested.dedup();

        if requested.is_empty() {
            return Ok(Vec::new());
        }

        let mut sql = String::from("SELECT frame_id, name FROM frame_metadata_labels WHERE 1=1");
        let mut params = 0;
        push_in_clause(&mut sql, "name", requested.len(), &mut params);

        // Bound the scan by the filter's time window where one is given.
        if filter.after.is_some() {
            params += 1;
            sql.push_str(&format!(" AND created_at >= ${}", params));
        }

        if filter.before.is_some() {
            params += 1;
            sql.push_str(&format!(" AND created_at < ${}", params));
        }

        sql.push_str(&format!(
            " ORDER BY created_at DESC LIMIT {}",
            LABEL_SCAN_LIMIT
        ));

        let mut query = sqlx::query_as::<_, LabelRow>(&sql);

        for name in &requested {
            query = query.bind(name.to_string());
        }

        if let Some(after) = filter.after {
            query = query.bind(after);
        }

        if let Some(before) = filter.before {
            query = query.bind(before);
        }

        let rows = query
            .fetch_all(&self.pool)
            .await
            .context("failed to query frame labels")?;

        let mut matched: HashMap<String, HashSet<String>> = HashMap::new();

        for row in rows {
            matched.entry(row.frame_id).or_default().insert(row.name);
        }

        // AND semantics: every requested label must have matched.
        Ok(matched
            .into_iter()
            .filter(|(_, names)| names.len() == requested.len())
            .map(|(frame_id, _)| frame_id)
            .collect())
    }

    /// IDs of the frames matching a filter, bounded by the maximum page.
    async fn matching_frame_ids(&self, filter: &FrameFilter) -> Result<Vec<String>> {
        let metadata = self
            .list_frame_metadata(filter, &PaginationCursor::max_page())
            .await?;

        Ok(metadata.into_iter().map(|m| m.id).collect())
    }

    async fn count_distinct_column(&self, column: &str, filter: &FrameFilter) -> Result<i64> {
        let ids = match self.label_restriction(filter).await? {
            Some(ids) if ids.is_empty() => return Ok(0),
            other => other,
        };

        let mut sql = format!(
            "SELECT COUNT(DISTINCT {}) FROM frame_metadata WHERE 1=1",
            column
        );
        let mut params = 0;
        filter.push_predicates(&mut sql, &mut params);

        if let Some(ref ids) = ids {
            push_in_clause(&mut sql, "id", ids.len(), &mut params);
        }

        let mut query = sqlx::query_scalar::<_, i64>(&sql);
        query = bind_filter!(query, filter);

        if let Some(ref ids) = ids {
            for id in ids {
                query = query.bind(id.clone());
            }
        }

        Ok(query
            .fetch_one(&self.pool)
            .await
            .context("failed to count distinct column")?)
    }

    async fn list_distinct_column<T>(
        &self,
        column: &str,
        filter: &FrameFilter,
        page: &PaginationCursor,
    ) -> Result<Vec<T>>
    where
        T: Send + Unpin + for<'r> sqlx::Decode<'r, sqlx::Sqlite> + sqlx::Type<sqlx::Sqlite>,
    {
        let ids = match self.label_restriction(filter).await? {
            Some(ids) if ids.is_empty() => return Ok(Vec::new()),
            other => other,
        };

        let mut sql = format!("SELECT DISTINCT {} FROM frame_metadata WHERE 1=1", column);
        let mut params = 0;
        filter.push_predicates(&mut sql, &mut params);

        if let Some(ref ids) = ids {
            push_in_clause(&mut sql, "id", ids.len(), &mut params);
        }

        sql.push_str(&format!(
            " ORDER BY {} ASC LIMIT {} OFFSET {}",
            column,
            page.effective_limit(),
            page.effective_offset()
        ));

        let mut query = sqlx::query_scalar::<_, T>(&sql);
        query = bind_filter!(query, filter);

        if let Some(ref ids) = ids {
            for id in ids {
                query = query.bind(id.clone());
            }
        }

        Ok(query
            .fetch_all(&self.pool)
            .await
            .context("failed to list distinct column")?)
    }

    /// Load the label rows for a page of metadata and attach them.
    async fn attach_labels(&self, rows: Vec<FrameMetadataRow>) -> Result<Vec<FrameMetadata>> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }

        let mut sql = String::from("SELECT frame_id, name FROM frame_metadata_labels WHERE 1=1");
        let mut params = 0;
        push_in_clause(&mut sql, "frame_id", rows.len(), &mut params);
        sql.push_str(" ORDER BY id ASC");

        let mut query = sqlx::query_as::<_, LabelRow>(&sql);

        for row in &rows {
            query = query.bind(row.id.clone());
        }

        let label_rows = query
            .fetch_all(&self.pool)
            .await
            .context("failed to load frame labels")?;

        let mut by_frame: HashMap<String, Vec<String>> = HashMap::new();

        for label in label_rows {
            by_frame.entry(label.frame_id).or_default().push(label.name);
        }

        Ok(rows
            .into_iter()
            .map(|row| {
                let labels = by_frame.remove(&row.id).unwrap_or_default();

                row.into_metadata(labels)
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::{OrderBy, MAX_PAGE_SIZE};
    use crate::frame::fake_frame;
    use chrono::Duration as ChronoDuration;

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

    fn metadata_with_labels(labels: &[&str]) -> FrameMetadata {
        let mut metadata = fake_frame().metadata;
        metadata.labels = labels.iter().map(|l| l.to_string()).collect();

        metadata
    }

    #[tokio::test]
    async fn test_insert_and_list_round_trip() {
        let indexer = test_indexer().await;
        let metadata = metadata_with_labels(&["a", "b"]);

        indexer.insert_frame_metadata(&metadata).await.unwrap();

        let listed = indexer
            .list_frame_metadata(&FrameFilter::default(), &PaginationCursor::default())
            .await
            .unwrap();

        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, metadata.id);
        assert_eq!(listed[0].node, metadata.node);
        assert_eq!(listed[0].wall_clock_slot, metadata.wall_clock_slot);
        assert_eq!(listed[0].labels, vec!["a".to_string(), "b".to_string()]);
    }

    #[tokio::test]
    async fn test_label_intersection_is_and_not_or() {
        let indexer = test_indexer().await;

        let f1 = metadata_with_labels(&["a", "b", "c"]);
        let f2 = metadata_with_labels(&["a", "d"]);
        indexer.insert_frame_metadata(&f1).await.unwrap();
        indexer.insert_frame_metadata(&f2).await.unwrap();

        let filter = FrameFilter {
            labels: Some(vec!["a".to_string(), "b".to_string()]),
            ..Default::default()
        };

        let listed = indexer
            .list_frame_metadata(&filter, &PaginationCursor::default())
            .await
            .unwrap();

        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, f1.id);
        assert_eq!(indexer.count_frame_metadata(&filter).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_empty_label_set_matches_nothing() {
        let indexer = test_indexer().await;
        indexer
            .insert_frame_metadata(&metadata_with_labels(&["a"]))
            .await
            .unwrap();

        let filter = FrameFilter {
            labels: Some(vec![]),
            ..Default::default()
        };

        assert!(indexer
            .list_frame_metadata(&filter, &PaginationCursor::default())
            .await
            .unwrap()
            .is_empty());
        assert_eq!(indexer.count_frame_metadata(&filter).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_nil_label_filter_matches_everything() {
        let indexer = test_indexer().await;
        indexer
            .insert_frame_metadata(&metadata_with_labels(&["a"]))
            .await
            .unwrap();
        indexer
            .insert_frame_metadata(&metadata_with_labels(&["b"]))
            .await
            .unwrap();

        let listed = indexer
            .list_frame_metadata(&FrameFilter::default(), &PaginationCursor::default())
            .await
            .unwrap();

        assert_eq!(listed.len(), 2);
    }

    #[tokio::test]
    async fn test_duplicate_requested_labels_are_deduped() {
        let indexer = test_indexer().await;
        let f1 = metadata_with_labels(&["a"]);
        indexer.insert_frame_metadata(&f1).await.unwrap();

        let filter = FrameFilter {
            labels: Some(vec!["a".to_string(), "a".to_string()]),
            ..Default::default()
        };

        assert_eq!(indexer.count_frame_metadata(&filter).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_node_and_slot_predicates() {
        let indexer = test_indexer().await;

        let mut m1 = metadata_with_labels(&[]);
        m1.node = "lighthouse-1".to_string();
        m1.wall_clock_slot = 100;
        let mut m2 = metadata_with_labels(&[]);
        m2.node = "teku-1".to_string();
        m2.wall_clock_slot = 200;
        indexer.insert_frame_metadata(&m1).await.unwrap();
        indexer.insert_frame_metadata(&m2).await.unwrap();

        let filter = FrameFilter {
            node: Some("lighthouse-1".to_string()),
            ..Default::default()
        };
        let listed = indexer
            .list_frame_metadata(&filter, &PaginationCursor::default())
            .await
            .unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, m1.id);

        let filter = FrameFilter {
            slot: Some(200),
            ..Default::default()
        };
        let listed = indexer
            .list_frame_metadata(&filter, &PaginationCursor::default())
            .await
            .unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, m2.id);
    }

    #[tokio::test]
    async fn test_before_is_exclusive_and_after_inclusive() {
        let indexer = test_indexer().await;

        let mut metadata = metadata_with_labels(&[]);
        let at = Utc::now();
        metadata.fetched_at = at;
        indexer.insert_frame_metadata(&metadata).await.unwrap();

        let before_filter = FrameFilter {
            before: Some(at),
            ..Default::default()
        };
        assert_eq!(
            indexer.count_frame_metadata(&before_filter).await.unwrap(),
            0
        );

        let after_filter = FrameFilter {
            after: Some(at),
            ..Default::default()
        };
        assert_eq!(
            indexer.count_frame_metadata(&after_filter).await.unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn test_event_source_and_consensus_client_predicates() {
        let indexer = test_indexer().await;

        let mut m1 = metadata_with_labels(&[]);
        m1.consensus_client = "teku".to_string();
        m1.event_source = EventSource::BeaconNode;
        let mut m2 = metadata_with_labels(&[]);
        m2.consensus_client = "prysm".to_string();
        m2.event_source = EventSource::XatuPolling;
        indexer.insert_frame_metadata(&m1).await.unwrap();
        indexer.insert_frame_metadata(&m2).await.unwrap();

        let filter = FrameFilter {
            consensus_client: Some("teku".to_string()),
            event_source: Some(EventSource::BeaconNode),
            ..Default::default()
        };

        let listed = indexer
            .list_frame_metadata(&filter, &PaginationCursor::default())
            .await
            .unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, m1.id);
    }

    #[tokio::test]
    async fn test_pagination_partitions_without_gaps_or_duplicates() {
        let indexer = test_indexer().await;
        let base = Utc::now();

        let mut inserted = Vec::new();
        for i in 0..12 {
            let mut metadata = metadata_with_labels(&[]);
            metadata.fetched_at = base + ChronoDuration::seconds(i);
            inserted.push(metadata.id.clone());
            indexer.insert_frame_metadata(&metadata).await.unwrap();
        }

        let mut seen = Vec::new();
        let mut offset = 0;
        loop {
            let page = PaginationCursor {
                offset,
                limit: 5,
                order_by: OrderBy::FetchedAtAsc,
            };
            let listed = indexer
                .list_frame_metadata(&FrameFilter::default(), &page)
                .await
                .unwrap();

            if listed.is_empty() {
                break;
            }

            if offset < 10 {
                assert_eq!(listed.len(), 5);
            } else {
                assert_eq!(listed.len(), 2);
            }

            seen.extend(listed.into_iter().map(|m| m.id));
            offset += 5;
        }

        assert_eq!(seen, inserted);
    }

    #[tokio::test]
    async fn test_count_matches_unbounded_list() {
        let indexer = test_indexer().await;

        for _ in 0..7 {
            indexer
                .insert_frame_metadata(&metadata_with_labels(&["x"]))
                .await
                .unwrap();
        }

        let filter = FrameFilter {
            labels: Some(vec!["x".to_string()]),
            ..Default::default()
        };
        let page = PaginationCursor {
            offset: 0,
            limit: MAX_PAGE_SIZE,
            order_by: OrderBy::default(),
        };

        let listed = indexer.list_frame_metadata(&filter, &page).await.unwrap();
        let count = indexer.count_frame_metadata(&filter).await.unwrap();

        assert_eq!(listed.len() as i64, count);
        assert_eq!(count, 7);
    }

    #[tokio::test]
    async fn test_delete_cascades_to_labels() {
        let indexer = test_indexer().await;
        let metadata = metadata_with_labels(&["a", "b", "c"]);
        indexer.insert_frame_metadata(&metadata).await.unwrap();

        indexer.delete_frame_metadata(&metadata.id).await.unwrap();

        // Direct label-table scan: nothing may reference the frame.
        let remaining: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM frame_metadata_labels WHERE frame_id = $1",
        )
        .bind(&metadata.id)
        .fetch_one(indexer.pool())
        .await
        .unwrap();

        assert_eq!(remaining, 0);
    }

    #[tokio::test]
    async fn test_delete_missing_metadata_is_not_found() {
        let indexer = test_indexer().await;

        assert!(matches!(
            indexer.delete_frame_metadata("nonexistent").await.unwrap_err(),
            Error::FrameNotFound
        ));
    }

    #[tokio::test]
    async fn test_update_affects_exactly_one_row() {
        let indexer = test_indexer().await;
        let mut metadata = metadata_with_labels(&[]);
        indexer.insert_frame_metadata(&metadata).await.unwrap();

        metadata.consensus_client = "lodestar".to_string();
        metadata.event_source = EventSource::BeaconNode;
        indexer.update_frame_metadata(&metadata).await.unwrap();

        let listed = indexer
            .list_frame_metadata(&FrameFilter::default(), &PaginationCursor::default())
            .await
            .unwrap();
        assert_eq!(listed[0].consensus_client, "lodestar");
        assert_eq!(listed[0].event_source, EventSource::BeaconNode);

        let mut missing = metadata_with_labels(&[]);
        missing.id = "nonexistent".to_string();
        assert!(matches!(
            indexer.update_frame_metadata(&missing).await.unwrap_err(),
            Error::FrameNotFound
        ));
    }

    #[tokio::test]
    async fn test_distinct_nodes_slots_epochs() {
        let indexer = test_indexer().await;

        for (node, slot) in [("n1", 100u64), ("n1", 101), ("n2", 100)] {
            let mut metadata = metadata_with_labels(&[]);
            metadata.node = node.to_string();
            metadata.wall_clock_slot = slot;
            metadata.wall_clock_epoch = slot / 32;
            indexer.insert_frame_metadata(&metadata).await.unwrap();
        }

        let filter = FrameFilter {
            after: Some(Utc::now() - ChronoDuration::hours(1)),
            ..Default::default()
        };
        let page = PaginationCursor::default();

        assert_eq!(indexer.count_nodes_with_frames(&filter).await.unwrap(), 2);
        assert_eq!(
            indexer.list_nodes_with_frames(&filter, &page).await.unwrap(),
            vec!["n1".to_string(), "n2".to_string()]
        );

        assert_eq!(indexer.count_slots_with_frames(&filter).await.unwrap(), 2);
        assert_eq!(
            indexer.list_slots_with_frames(&filter, &page).await.unwrap(),
            vec![100, 101]
        );

        assert_eq!(indexer.count_epochs_with_frames(&filter).await.unwrap(), 1);
        assert_eq!(
            indexer
                .list_epochs_with_frames(&filter, &page)
                .await
                .unwrap(),
            vec![3]
        );
    }

    #[tokio::test]
    async fn test_distinct_labels_for_matching_frames() {
        let indexer = test_indexer().await;

        let mut m1 = metadata_with_labels(&["a", "b"]);
        m1.node = "n1".to_string();
        let mut m2 = metadata_with_labels(&["b", "c"]);
        m2.node = "n2".to_string();
        indexer.insert_frame_metadata(&m1).await.unwrap();
        indexer.insert_frame_metadata(&m2).await.unwrap();

        let filter = FrameFilter {
            node: Some("n1".to_string()),
            ..Default::default()
        };
        let page = PaginationCursor::default();

        assert_eq!(
            indexer
                .list_labels_with_frames(&filter, &page)
                .await
                .unwrap(),
            vec!["a".to_string(), "b".to_string()]
        );
        assert_eq!(indexer.count_labels_with_frames(&filter).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_label_prefix_pruning() {
        let indexer = test_indexer().await;

        let metadata = metadata_with_labels(&[
            "consensus_client_implementation=teku",
            "keep_me",
        ]);
        indexer.insert_frame_metadata(&metadata).await.unwrap();

        assert_eq!(
            indexer
                .count_labels_with_prefix("consensus_client_implementation=")
                .await
                .unwrap(),
            1
        );

        let deleted = indexer
            .delete_labels_with_prefix("consensus_client_implementation=", 100)
            .await
            .unwrap();
        assert_eq!(deleted, 1);

        let listed = indexer
            .list_frame_metadata(&FrameFilter::default(), &PaginationCursor::default())
            .await
            .unwrap();
        assert_eq!(listed[0].labels, vec!["keep_me".to_string()]);
    }
}
