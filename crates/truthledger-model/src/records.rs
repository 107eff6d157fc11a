//! Persistent record types.
//!
//! Every struct here maps 1:1 to a stored row. Records are immutable once
//! written unless a lifecycle explicitly says otherwise (conflict groups are
//! mutated by the extractor and detector, truth metrics are upserted by the
//! scorer, sync rows transition once to a terminal state).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::claim_key::ClaimKey;
use crate::scope::Scope;

// ============================================================================
// Sources
// ============================================================================

/// A publisher of documents (agency, manufacturer, press, forum, ...).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Source {
    pub id: Uuid,
    /// Unique human-readable name ("NASA", "SpaceX", ...).
    pub name: String,
    pub source_type: String,
    /// Baseline trust in [0, 1].
    pub base_trust: f64,
    /// Sources in the same cluster are treated as correlated; evidence past
    /// the first within a cluster is discounted.
    pub independence_cluster_id: Option<String>,
    pub default_doc_type: String,
    pub is_active: bool,
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl Source {
    /// The cluster key used by the scorer: explicit cluster id, else the
    /// source's own id (each un-clustered source is independent).
    pub fn cluster_key(&self) -> String {
        self.independence_cluster_id
            .clone()
            .unwrap_or_else(|| self.id.to_string())
    }
}

/// Feed kinds the fetcher understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedType {
    Rss,
    Atom,
    Json,
    Html,
    Api,
}

/// A polled feed belonging to a source. `(source_id, feed_url)` is unique.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceFeed {
    pub id: Uuid,
    pub source_id: Uuid,
    pub feed_url: String,
    pub feed_type: FeedType,
    pub refresh_interval_minutes: i64,
    pub max_items: usize,
    pub is_active: bool,
    pub last_fetched_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub error_count: u32,
    pub created_at: DateTime<Utc>,
}

impl SourceFeed {
    /// A feed is due iff it has never been fetched or the refresh interval
    /// has elapsed.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        match self.last_fetched_at {
            None => true,
            Some(last) => now - last > chrono::Duration::minutes(self.refresh_interval_minutes),
        }
    }
}

/// A standalone URL registered for a source. `(source_id, url)` is unique.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceUrl {
    pub id: Uuid,
    pub source_id: Uuid,
    pub url: String,
    pub is_active: bool,
    pub last_fetched_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// Documents and snippets
// ============================================================================

/// A fetched document, content-addressed by `(source_id, content_hash)`.
/// Never mutated in place; a changed page at the same URL becomes a new
/// document whose `supersedes_document_id` points at its predecessor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: Uuid,
    pub source_id: Uuid,
    pub url: String,
    pub title: String,
    pub doc_type: String,
    /// SHA-256 hex of the normalized content.
    pub content_hash: String,
    pub raw_content: String,
    pub published_at: Option<DateTime<Utc>>,
    pub retrieved_at: DateTime<Utc>,
    pub supersedes_document_id: Option<Uuid>,
    pub version_label: Option<String>,
    /// Feed URL this document arrived through, if any.
    pub feed_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Snippet shapes, detected during snippetization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnippetType {
    Text,
    Table,
    List,
    Equation,
}

/// A locatable text unit of a document. `(document_id, snippet_hash)` is
/// unique; the locator is deterministic under re-ingest of identical content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snippet {
    pub id: Uuid,
    pub document_id: Uuid,
    /// `<url-path>#p<index>:<first-20-chars>`, plus `:<i>` for sub-snippets.
    pub locator: String,
    pub text: String,
    /// SHA-256 hex over `locator || '\0' || text`.
    pub snippet_hash: String,
    pub snippet_type: SnippetType,
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// Entities and attributes
// ============================================================================

/// Entity kinds the extractors know how to target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Engine,
    LaunchVehicle,
    Country,
}

impl EntityType {
    /// Attribute namespace prefix this entity type accepts.
    pub const fn attribute_namespace(self) -> &'static str {
        match self {
            EntityType::Engine => "engines.",
            EntityType::LaunchVehicle => "launch_vehicles.",
            EntityType::Country => "countries.",
        }
    }
}

/// A named thing claims are about (an engine, a launch vehicle, ...).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    pub id: Uuid,
    /// Unique canonical name.
    pub canonical_name: String,
    pub entity_type: EntityType,
    pub aliases: Vec<String>,
    /// Cross-reference into the domain tables, keyed by entity type.
    pub domain_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

impl Entity {
    /// All names this entity answers to, canonical name included.
    pub fn all_names(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.canonical_name.as_str()).chain(self.aliases.iter().map(|s| s.as_str()))
    }
}

/// Value types an attribute can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    Number,
    String,
    Enum,
    Bool,
}

/// A named typed field, e.g. `engines.isp_s`. Created on demand.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attribute {
    pub id: Uuid,
    /// Unique canonical name, namespaced by entity type.
    pub canonical_name: String,
    pub value_type: ValueType,
    pub unit: Option<String>,
    /// Absolute tolerance for numeric equivalence, if configured.
    pub tolerance_abs: Option<f64>,
    /// Relative tolerance in [0, 1]; default 0.02.
    pub tolerance_rel: f64,
    pub created_at: DateTime<Utc>,
}

impl Attribute {
    /// Two numeric values are equivalent iff
    /// `|a - b| <= max(tolerance_abs, tolerance_rel * max(|a|, |b|))`.
    pub fn numbers_equivalent(&self, a: f64, b: f64) -> bool {
        let abs = self.tolerance_abs.unwrap_or(0.0);
        let rel = self.tolerance_rel * a.abs().max(b.abs());
        (a - b).abs() <= abs.max(rel)
    }
}

// ============================================================================
// Claims, evidence, conflict groups
// ============================================================================

/// A claim's value payload. Equality for claim dedup compares value and type,
/// never the extraction confidence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimValue {
    #[serde(flatten)]
    pub body: ValueBody,
    pub confidence: f64,
}

/// Typed value body, tagged the way the stored JSON is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum ValueBody {
    Number(f64),
    String(String),
    Enum(String),
    Bool(bool),
}

impl ValueBody {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            ValueBody::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Render for human-facing output.
    pub fn display(&self) -> String {
        match self {
            ValueBody::Number(n) => format!("{n}"),
            ValueBody::String(s) | ValueBody::Enum(s) => s.clone(),
            ValueBody::Bool(b) => b.to_string(),
        }
    }
}

impl ClaimValue {
    pub fn number(value: f64, confidence: f64) -> Self {
        Self {
            body: ValueBody::Number(value),
            confidence,
        }
    }

    /// Same stored value (value + type), ignoring confidence.
    pub fn same_value(&self, other: &ClaimValue) -> bool {
        self.body == other.body
    }
}

/// A specific value for `(entity, attribute, scope)`, raw or derived.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claim {
    pub id: Uuid,
    pub claim_key: ClaimKey,
    pub entity_id: Uuid,
    pub attribute_id: Uuid,
    pub value: ClaimValue,
    pub unit: Option<String>,
    pub scope: Scope,
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_to: Option<DateTime<Utc>>,
    pub is_derived: bool,
    pub derived_from_claim_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Evidence stance toward its claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stance {
    Support,
    Contradict,
    Neutral,
}

/// A link from a claim to the snippet that backs it. `(claim_id, snippet_id)`
/// is unique; stance is immutable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Evidence {
    pub id: Uuid,
    pub claim_id: Uuid,
    pub snippet_id: Uuid,
    pub quote: String,
    pub stance: Stance,
    pub extraction_confidence: f64,
    pub created_at: DateTime<Utc>,
}

/// Detector verdict for a conflict group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FactualStatus {
    Unknown,
    NoConflict,
    ResolvedByVersioning,
    ActiveConflict,
    NeedsReview,
}

/// The bucket of competing claims for one `(entity, attribute, scope)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictGroup {
    pub claim_key: ClaimKey,
    pub entity_id: Uuid,
    pub attribute_id: Uuid,
    pub scope: Scope,
    pub conflict_present: bool,
    pub status_factual: FactualStatus,
    pub claim_count: u64,
    /// Detector details merged in on each run (value classes, leading value).
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// Truth metrics, field links, review queue
// ============================================================================

/// Scorer output for one claim. Upserted whole; readers never see torn rows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TruthMetrics {
    pub claim_id: Uuid,
    pub claim_key: ClaimKey,
    /// Evidence-derived score in [0, 1].
    pub truth_raw: f64,
    pub support_score: f64,
    pub contradiction_score: f64,
    pub independent_sources: u32,
    /// Mean recency across evidence.
    pub recency_score: f64,
    pub specificity_score: f64,
    /// Explanation payload: evidence counts, cluster sizes, top contributors.
    pub factors: serde_json::Value,
    pub computed_at: DateTime<Utc>,
}

/// Weak reference from a domain field into a claim-key bucket.
/// `(entity_id, field_name)` is unique.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldLink {
    pub id: Uuid,
    pub entity_id: Uuid,
    pub field_name: String,
    pub claim_key: ClaimKey,
    pub auto_update: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// What a review item points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewItemType {
    ConflictGroup,
    Claim,
    Entity,
    Document,
}

/// Review workflow states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewStatus {
    Pending,
    InReview,
    Resolved,
    Dismissed,
}

/// An item awaiting human attention. At most one pending item per
/// `(item_type, item_id)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewQueueItem {
    pub id: Uuid,
    pub item_type: ReviewItemType,
    /// Identity of the referenced item; claim-key hex for conflict groups,
    /// UUID string otherwise.
    pub item_ref: String,
    pub reason: String,
    /// 1 (lowest) to 10 (highest).
    pub priority: u8,
    pub status: ReviewStatus,
    pub notes: Option<String>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolved_by: Option<String>,
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// Sync status
// ============================================================================

/// Job run states. `Running` is the only non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncState {
    Running,
    Success,
    Failed,
    Cancelled,
    Timeout,
}

impl SyncState {
    pub fn is_terminal(self) -> bool {
        self != SyncState::Running
    }
}

/// One recorded run of a pipeline stage. At most one `running` row per
/// `sync_type` at a time (enforced by the orchestrator via the store).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncStatus {
    pub id: Uuid,
    pub sync_type: String,
    pub state: SyncState,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub records_synced: u64,
    pub error_message: Option<String>,
    pub metadata: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claim_value_dedup_ignores_confidence() {
        let a = ClaimValue::number(2_300_000.0, 0.8);
        let b = ClaimValue::number(2_300_000.0, 0.95);
        assert!(a.same_value(&b));

        let c = ClaimValue::number(2_400_000.0, 0.8);
        assert!(!a.same_value(&c));
    }

    #[test]
    fn value_body_serializes_with_type_tag() {
        let v = ClaimValue::number(335.0, 0.8);
        let json = serde_json::to_value(&v).unwrap();
        assert_eq!(json["type"], "number");
        assert_eq!(json["value"], 335.0);
        assert_eq!(json["confidence"], 0.8);
    }

    #[test]
    fn tolerance_uses_max_of_abs_and_rel() {
        let attr = Attribute {
            id: Uuid::new_v4(),
            canonical_name: "engines.isp_s".to_string(),
            value_type: ValueType::Number,
            unit: Some("s".to_string()),
            tolerance_abs: Some(1.0),
            tolerance_rel: 0.02,
            created_at: Utc::now(),
        };
        // Relative: 0.02 * 335 = 6.7 dominates the absolute 1.0.
        assert!(attr.numbers_equivalent(335.0, 340.0));
        assert!(!attr.numbers_equivalent(335.0, 345.0));
        // Absolute dominates near zero.
        assert!(attr.numbers_equivalent(0.0, 0.9));
    }

    #[test]
    fn feed_due_when_never_fetched_or_stale() {
        let now = Utc::now();
        let mut feed = SourceFeed {
            id: Uuid::new_v4(),
            source_id: Uuid::new_v4(),
            feed_url: "https://example.com/feed.xml".to_string(),
            feed_type: FeedType::Rss,
            refresh_interval_minutes: 60,
            max_items: 50,
            is_active: true,
            last_fetched_at: None,
            last_error: None,
            error_count: 0,
            created_at: now,
        };
        assert!(feed.is_due(now));

        feed.last_fetched_at = Some(now - chrono::Duration::minutes(30));
        assert!(!feed.is_due(now));

        feed.last_fetched_at = Some(now - chrono::Duration::minutes(61));
        assert!(feed.is_due(now));
    }

    #[test]
    fn entity_namespace_matches_type() {
        assert_eq!(EntityType::Engine.attribute_namespace(), "engines.");
        assert_eq!(
            EntityType::LaunchVehicle.attribute_namespace(),
            "launch_vehicles."
        );
    }

    #[test]
    fn cluster_key_falls_back_to_source_id() {
        let mut source = Source {
            id: Uuid::new_v4(),
            name: "NASA".to_string(),
            source_type: "agency".to_string(),
            base_trust: 0.95,
            independence_cluster_id: None,
            default_doc_type: "technical_report".to_string(),
            is_active: true,
            tags: vec![],
            created_at: Utc::now(),
        };
        assert_eq!(source.cluster_key(), source.id.to_string());
        source.independence_cluster_id = Some("us_gov".to_string());
        assert_eq!(source.cluster_key(), "us_gov");
    }
}
