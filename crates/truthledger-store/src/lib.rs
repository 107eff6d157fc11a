//! Store contract for the truth ledger.
//!
//! The relational persistence layer is an external collaborator; the core
//! pipeline talks to this trait and nothing else. The contract encodes the
//! transactional groupings the pipeline relies on:
//! - a document and its snippet batch land together,
//! - one extracted value lands as group-upsert + claim-upsert + count
//!   increment + evidence insert, atomically,
//! - truth metrics are upserted whole,
//! - at most one `running` sync row per sync type.
//!
//! Row-shaping happens here too: joined reads come back as flat records
//! (`EvidenceDetail`), so core code never sees column naming.
//!
//! `MemoryStore` is the shipped reference implementation; it enforces the
//! same unique constraints a relational backend would.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use truthledger_model::{
    Attribute, Claim, ClaimKey, ClaimValue, ConflictGroup, Document, Entity, EntityType,
    FieldLink, LedgerResult, ReviewQueueItem, ReviewStatus, Scope, Snippet, SnippetType, Source,
    SourceFeed, SourceUrl, Stance, SyncState, SyncStatus, TruthMetrics,
};

pub mod memory;

pub use memory::MemoryStore;

/// Shared handle to a store implementation.
pub type DynStore = Arc<dyn Store>;

// ============================================================================
// Flat row shapes
// ============================================================================

/// One extracted value, persisted atomically.
#[derive(Debug, Clone)]
pub struct ClaimObservation {
    pub entity_id: Uuid,
    pub attribute_id: Uuid,
    pub scope: Scope,
    pub value: ClaimValue,
    pub unit: Option<String>,
    pub snippet_id: Uuid,
    pub quote: String,
    pub stance: Stance,
    pub extraction_confidence: f64,
}

/// What `record_claim_observation` did.
#[derive(Debug, Clone)]
pub struct ObservationOutcome {
    pub claim_id: Uuid,
    pub claim_key: ClaimKey,
    pub claim_created: bool,
    pub evidence_created: bool,
}

/// What `insert_derived_claim` did.
#[derive(Debug, Clone)]
pub struct DerivedOutcome {
    pub claim_id: Uuid,
    pub created: bool,
    pub evidence_copied: usize,
}

/// Field-link upsert disposition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldLinkOutcome {
    Inserted,
    Updated,
    Unchanged,
}

/// Evidence joined through snippet → document → source, flattened.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceDetail {
    pub evidence_id: Uuid,
    pub claim_id: Uuid,
    pub snippet_id: Uuid,
    pub quote: String,
    pub stance: Stance,
    pub extraction_confidence: f64,
    pub snippet_locator: String,
    pub snippet_type: SnippetType,
    pub document_id: Uuid,
    pub document_title: String,
    pub document_url: String,
    pub doc_type: String,
    pub published_at: Option<DateTime<Utc>>,
    /// True iff some other document names this one as its predecessor.
    pub is_superseded: bool,
    pub source_id: Uuid,
    pub source_name: String,
    pub source_type: String,
    pub base_trust: f64,
    /// Independence cluster id, falling back to the source id.
    pub cluster_key: String,
}

/// Per-claim evidence aggregates the conflict detector reads.
#[derive(Debug, Clone, Default)]
pub struct ClaimEvidenceStats {
    pub evidence_count: usize,
    pub newest_published: Option<DateTime<Utc>>,
}

/// Scorer selection filters. Empty filters mean "all stale claims".
#[derive(Debug, Clone, Default)]
pub struct ScoreFilter {
    pub claim_ids: Option<Vec<Uuid>>,
    pub conflict_group_keys: Option<Vec<ClaimKey>>,
    pub entity_ids: Option<Vec<Uuid>>,
    pub force_rescore: bool,
}

/// Read-side pipeline counters behind the status output.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineStats {
    pub sources: usize,
    pub documents: usize,
    pub snippets: usize,
    pub entities: usize,
    pub attributes: usize,
    pub claims: usize,
    pub derived_claims: usize,
    pub evidence: usize,
    pub conflict_groups: usize,
    pub groups_with_conflict: usize,
    pub scored_claims: usize,
    pub field_links: usize,
    pub review_pending: usize,
}

// ============================================================================
// Store trait
// ============================================================================

/// Abstract transactional store. Every method is a suspension point.
#[async_trait]
pub trait Store: Send + Sync {
    // ------------------------------------------------------------------
    // Sources
    // ------------------------------------------------------------------

    /// Insert a source; `Conflict` on duplicate name.
    async fn insert_source(&self, source: Source) -> LedgerResult<Source>;
    async fn update_source(&self, source: Source) -> LedgerResult<()>;
    /// Delete a source and cascade to its feeds, URLs, documents, and their
    /// snippets/evidence.
    async fn delete_source(&self, id: Uuid) -> LedgerResult<()>;
    async fn source(&self, id: Uuid) -> LedgerResult<Option<Source>>;
    async fn source_by_name(&self, name: &str) -> LedgerResult<Option<Source>>;
    async fn list_sources(&self) -> LedgerResult<Vec<Source>>;

    // ------------------------------------------------------------------
    // Feeds and URLs
    // ------------------------------------------------------------------

    /// Insert a feed; `Conflict` on duplicate `(source_id, feed_url)`.
    async fn insert_feed(&self, feed: SourceFeed) -> LedgerResult<SourceFeed>;
    async fn list_feeds(&self, only_active: bool) -> LedgerResult<Vec<SourceFeed>>;
    /// Active feeds whose refresh interval has elapsed (or never fetched).
    async fn feeds_due(&self, now: DateTime<Utc>) -> LedgerResult<Vec<SourceFeed>>;
    /// Success resets `error_count` and `last_error`.
    async fn mark_feed_success(&self, feed_id: Uuid, now: DateTime<Utc>) -> LedgerResult<()>;
    /// Failure increments `error_count` and records the message.
    async fn mark_feed_failure(&self, feed_id: Uuid, error: &str) -> LedgerResult<()>;

    /// Insert a URL; `Conflict` on duplicate `(source_id, url)`.
    async fn insert_source_url(&self, url: SourceUrl) -> LedgerResult<SourceUrl>;
    async fn list_source_urls(
        &self,
        source_id: Uuid,
        only_active: bool,
    ) -> LedgerResult<Vec<SourceUrl>>;
    async fn mark_source_url_fetched(&self, id: Uuid, now: DateTime<Utc>) -> LedgerResult<()>;

    // ------------------------------------------------------------------
    // Documents and snippets
    // ------------------------------------------------------------------

    async fn document(&self, id: Uuid) -> LedgerResult<Option<Document>>;
    async fn document_by_content(
        &self,
        source_id: Uuid,
        content_hash: &str,
    ) -> LedgerResult<Option<Document>>;
    /// Most recent (by `created_at`) document for `(source_id, url)`.
    async fn latest_document_for_url(
        &self,
        source_id: Uuid,
        url: &str,
    ) -> LedgerResult<Option<Document>>;
    /// Insert a document together with its snippet batch (one transaction).
    /// Snippets deduplicate on `(document_id, snippet_hash)`; returns the
    /// stored document and the number of snippets actually created.
    async fn insert_document(
        &self,
        document: Document,
        snippets: Vec<Snippet>,
    ) -> LedgerResult<(Document, usize)>;
    /// True iff some document names this one as its predecessor.
    async fn is_superseded(&self, document_id: Uuid) -> LedgerResult<bool>;
    async fn list_documents(&self) -> LedgerResult<Vec<Document>>;

    // ------------------------------------------------------------------
    // Entities and attributes
    // ------------------------------------------------------------------

    /// Insert an entity; `Conflict` on duplicate canonical name.
    async fn insert_entity(&self, entity: Entity) -> LedgerResult<Entity>;
    async fn entity(&self, id: Uuid) -> LedgerResult<Option<Entity>>;
    async fn entity_by_name(&self, canonical_name: &str) -> LedgerResult<Option<Entity>>;
    async fn entity_by_domain_ref(
        &self,
        entity_type: EntityType,
        domain_id: i64,
    ) -> LedgerResult<Option<Entity>>;
    async fn list_entities(&self) -> LedgerResult<Vec<Entity>>;
    /// Append an alias if not already present.
    async fn add_entity_alias(&self, id: Uuid, alias: &str) -> LedgerResult<()>;

    /// Upsert by canonical name ("created on demand").
    async fn ensure_attribute(&self, attribute: Attribute) -> LedgerResult<Attribute>;
    async fn attribute(&self, id: Uuid) -> LedgerResult<Option<Attribute>>;
    async fn attribute_by_name(&self, canonical_name: &str) -> LedgerResult<Option<Attribute>>;
    async fn list_attributes(&self) -> LedgerResult<Vec<Attribute>>;

    // ------------------------------------------------------------------
    // Extraction
    // ------------------------------------------------------------------

    /// Snippets with no evidence rows yet, optionally restricted to the
    /// given documents, ordered by `created_at` ascending, capped at `limit`.
    async fn snippets_needing_extraction(
        &self,
        document_ids: Option<&[Uuid]>,
        limit: usize,
    ) -> LedgerResult<Vec<Snippet>>;
    async fn snippet(&self, id: Uuid) -> LedgerResult<Option<Snippet>>;
    /// Atomic unit of extraction persistence: conflict-group upsert, claim
    /// reuse-or-insert (bumping the group's claim count on insert), evidence
    /// insert (deduplicated on `(claim_id, snippet_id)`).
    async fn record_claim_observation(
        &self,
        observation: ClaimObservation,
    ) -> LedgerResult<ObservationOutcome>;

    // ------------------------------------------------------------------
    // Conflict groups and claims
    // ------------------------------------------------------------------

    async fn conflict_group(&self, key: ClaimKey) -> LedgerResult<Option<ConflictGroup>>;
    /// Groups with claims, `status_factual = unknown` unless `force_recheck`,
    /// capped at `limit`.
    async fn conflict_groups_to_check(
        &self,
        force_recheck: bool,
        limit: usize,
    ) -> LedgerResult<Vec<ConflictGroup>>;
    async fn update_conflict_group(&self, group: ConflictGroup) -> LedgerResult<()>;
    async fn list_conflict_groups(&self) -> LedgerResult<Vec<ConflictGroup>>;

    async fn claim(&self, id: Uuid) -> LedgerResult<Option<Claim>>;
    async fn claims_in_group(&self, key: ClaimKey) -> LedgerResult<Vec<Claim>>;
    async fn list_claims(&self) -> LedgerResult<Vec<Claim>>;
    async fn claim_evidence_stats(&self, claim_id: Uuid) -> LedgerResult<ClaimEvidenceStats>;
    /// Raw (non-derived) claims for `(entity, attribute)` joined with their
    /// truth metrics, if scored.
    async fn raw_claims_with_truth(
        &self,
        entity_id: Uuid,
        attribute_id: Uuid,
    ) -> LedgerResult<Vec<(Claim, Option<TruthMetrics>)>>;

    // ------------------------------------------------------------------
    // Derivation
    // ------------------------------------------------------------------

    /// Atomic derived-claim insert: group upsert for the domain key, claim
    /// insert unless `(claim_key, derived_from_claim_id)` already exists,
    /// count increment, and evidence copy from the source claim.
    async fn insert_derived_claim(&self, claim: Claim) -> LedgerResult<DerivedOutcome>;
    async fn upsert_field_link(&self, link: FieldLink) -> LedgerResult<FieldLinkOutcome>;
    async fn field_link(
        &self,
        entity_id: Uuid,
        field_name: &str,
    ) -> LedgerResult<Option<FieldLink>>;
    async fn list_field_links(&self) -> LedgerResult<Vec<FieldLink>>;

    // ------------------------------------------------------------------
    // Scoring
    // ------------------------------------------------------------------

    /// Claims with no metrics or stale metrics (`computed_at < updated_at`),
    /// restricted by the filter, ordered by `created_at` ascending.
    async fn claims_needing_scores(
        &self,
        filter: &ScoreFilter,
        limit: usize,
    ) -> LedgerResult<Vec<Claim>>;
    /// Flattened evidence join, ordered by `published_at` descending with
    /// nulls last.
    async fn evidence_details(&self, claim_id: Uuid) -> LedgerResult<Vec<EvidenceDetail>>;
    async fn truth_metrics(&self, claim_id: Uuid) -> LedgerResult<Option<TruthMetrics>>;
    async fn upsert_truth_metrics(&self, metrics: TruthMetrics) -> LedgerResult<()>;

    // ------------------------------------------------------------------
    // Review queue
    // ------------------------------------------------------------------

    /// Insert unless a pending item for the same `(item_type, item_ref)`
    /// exists; returns whether a row was created.
    async fn enqueue_review(&self, item: ReviewQueueItem) -> LedgerResult<bool>;
    async fn list_review_items(
        &self,
        status: Option<ReviewStatus>,
    ) -> LedgerResult<Vec<ReviewQueueItem>>;
    async fn resolve_review_item(
        &self,
        id: Uuid,
        status: ReviewStatus,
        notes: Option<String>,
        resolved_by: Option<String>,
    ) -> LedgerResult<()>;

    // ------------------------------------------------------------------
    // Sync status
    // ------------------------------------------------------------------

    /// Open a `running` row; `Conflict` if one already exists for the type.
    async fn begin_sync(
        &self,
        sync_type: &str,
        metadata: serde_json::Value,
    ) -> LedgerResult<SyncStatus>;
    /// Transition a row to a terminal state.
    async fn finish_sync(
        &self,
        id: Uuid,
        state: SyncState,
        records_synced: u64,
        error_message: Option<String>,
    ) -> LedgerResult<()>;
    /// Most recent row per sync type.
    async fn latest_sync_statuses(&self) -> LedgerResult<Vec<SyncStatus>>;
    async fn running_sync_statuses(&self) -> LedgerResult<Vec<SyncStatus>>;
    /// Mark `running` rows started before `cutoff` as `timeout`; returns the
    /// number of rows reaped.
    async fn reap_stuck_syncs(
        &self,
        cutoff: DateTime<Utc>,
        timeout_hours: u64,
    ) -> LedgerResult<usize>;

    // ------------------------------------------------------------------
    // Stats
    // ------------------------------------------------------------------

    async fn pipeline_stats(&self) -> LedgerResult<PipelineStats>;
}
