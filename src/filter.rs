use crate::error::{Error, Result};
use crate::frame::EventSource;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Hard server-side cap on page sizes, regardless of caller input.
pub const MAX_PAGE_SIZE: i64 = 1000;

/// Page size used when the caller does not supply one.
pub const DEFAULT_PAGE_SIZE: i64 = 100;

/// Optional predicates over frame metadata. An empty filter matches
/// everything; the derived distinct listings require at least one
/// predicate (`validate_has_predicate`).
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct FrameFilter {
    /// Match frames from this node.
    pub node: Option<String>,
    /// Exclusive upper bound on `fetched_at`.
    pub before: Option<DateTime<Utc>>,
    /// Inclusive lower bound on `fetched_at`.
    pub after: Option<DateTime<Utc>>,
    /// Match frames captured at this wall clock slot.
    pub slot: Option<u64>,
    /// Match frames captured at this wall clock epoch.
    pub epoch: Option<u64>,
    /// Labels the frame must ALL carry. `None` applies no label
    /// restriction; `Some(vec![])` matches nothing.
    pub labels: Option<Vec<String>>,
    /// Match frames from this consensus client implementation.
    pub consensus_client: Option<String>,
    /// Match frames obtained this way.
    pub event_source: Option<EventSource>,
}

impl FrameFilter {
    pub fn is_empty(&self) -> bool {
        self.node.is_none()
            && self.before.is_none()
            && self.after.is_none()
            && self.slot.is_none()
            && self.epoch.is_none()
            && self.labels.is_none()
            && self.consensus_client.is_none()
            && self.event_source.is_none()
    }

    /// The distinct nodes/slots/epochs/labels listings refuse unbounded
    /// scans; at least one predicate must be set.
    pub fn validate_has_predicate(&self) -> Result<()> {
        if self.is_empty() {
            return Err(Error::InvalidFilter(
                "at least one predicate must be specified".to_string(),
            ));
        }

        Ok(())
    }

    /// Append ` AND column = $n` clauses for every set predicate, in the
    /// fixed order `bind_filter!` binds them. Label restrictions are
    /// handled separately by the indexer.
    pub(crate) fn push_predicates(&self, sql: &mut String, param_count: &mut usize) {
        if self.node.is_some() {
            *param_count += 1;
            sql.push_str(&format!(" AND node = ${}", param_count));
        }

        if self.before.is_some() {
            *param_count += 1;
            sql.push_str(&format!(" AND fetched_at < ${}", param_count));
        }

        if self.after.is_some() {
            *param_count += 1;
            sql.push_str(&format!(" AND fetched_at >= ${}", param_count));
        }

        if self.slot.is_some() {
            *param_count += 1;
            sql.push_str(&format!(" AND wall_clock_slot = ${}", param_count));
        }

        if self.epoch.is_some() {
            *param_count += 1;
            sql.push_str(&format!(" AND wall_clock_epoch = ${}", param_count));
        }

        if self.consensus_client.is_some() {
            *param_count += 1;
            sql.push_str(&format!(" AND consensus_client = ${}", param_count));
        }

        if self.event_source.is_some() {
            *param_count += 1;
            sql.push_str(&format!(" AND event_source = ${}", param_count));
        }
    }
}

/// Bind the set predicates of a [`FrameFilter`] onto a sqlx query, in the
/// same order `push_predicates` numbered them. Works for both `query` and
/// `query_as` builders.
macro_rules! bind_filter {
    ($query:expr, $filter:expr) => {{
        let mut query = $query;

        if let Some(ref node) = $filter.node {
            query = query.bind(node.clone());
        }
        if let Some(before) = $filter.before {
            query = query.bind(before);
        }
        if let Some(after) = $filter.after {
            query = query.bind(after);
        }
        if let Some(slot) = $filter.slot {
            query = query.bind(slot as i64);
        }
        if let Some(epoch) = $filter.epoch {
            query = query.bind(epoch as i64);
        }
        if let Some(ref consensus_client) = $filter.consensus_client {
            query = query.bind(consensus_client.clone());
        }
        if let Some(event_source) = $filter.event_source {
            query = query.bind(event_source.as_str());
        }

        query
    }};
}

pub(crate) use bind_filter;

/// Whitelisted sort orders. ORDER BY clauses are never built from caller
/// supplied text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderBy {
    #[default]
    FetchedAtAsc,
    FetchedAtDesc,
    WallClockSlotAsc,
    WallClockSlotDesc,
    WallClockEpochAsc,
    WallClockEpochDesc,
    NodeAsc,
}

impl OrderBy {
    pub(crate) fn as_sql(&self) -> &'static str {
        match self {
            OrderBy::FetchedAtAsc => "fetched_at ASC",
            OrderBy::FetchedAtDesc => "fetched_at DESC",
            OrderBy::WallClockSlotAsc => "wall_clock_slot ASC",
            OrderBy::WallClockSlotDesc => "wall_clock_slot DESC",
            OrderBy::WallClockEpochAsc => "wall_clock_epoch ASC",
            OrderBy::WallClockEpochDesc => "wall_clock_epoch DESC",
            OrderBy::NodeAsc => "node ASC",
        }
    }
}

/// Offset/limit pagination over a filtered listing.
#[derive(Debug, Clone, Deserialize)]
pub struct PaginationCursor {
    #[serde(default)]
    pub offset: i64,
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub order_by: OrderBy,
}

fn default_limit() -> i64 {
    DEFAULT_PAGE_SIZE
}

impl Default for PaginationCursor {
    fn default() -> Self {
        Self {
            offset: 0,
            limit: DEFAULT_PAGE_SIZE,
            order_by: OrderBy::default(),
        }
    }
}

impl PaginationCursor {
    /// A cursor covering the largest page the server will return.
    pub fn max_page() -> Self {
        Self {
            offset: 0,
            limit: MAX_PAGE_SIZE,
            order_by: OrderBy::default(),
        }
    }

    /// Caller-supplied limits are capped at [`MAX_PAGE_SIZE`]; non-positive
    /// limits fall back to the default.
    pub fn effective_limit(&self) -> i64 {
        if self.limit <= 0 {
            DEFAULT_PAGE_SIZE
        } else {
            self.limit.min(MAX_PAGE_SIZE)
        }
    }

    pub fn effective_offset(&self) -> i64 {
        self.offset.max(0)
    }

    pub(crate) fn push_sql(&self, sql: &mut String) {
        sql.push_str(&format!(
            " ORDER BY {} LIMIT {} OFFSET {}",
            self.order_by.as_sql(),
            self.effective_limit(),
            self.effective_offset()
        ));
    }
}

/// Total-count metadata returned alongside every listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PaginationResponse {
    pub total: i64,
}
