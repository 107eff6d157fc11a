//! In-memory reference store.
//!
//! Backs the test suite and the CLI. Tables live behind one `RwLock`; every
//! trait method takes the lock once, so the multi-step writes the contract
//! calls "transactional" are atomic here by construction.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use uuid::Uuid;

use truthledger_model::{
    compute_claim_key, Attribute, Claim, ClaimKey, ConflictGroup, Document, Entity, EntityType,
    Evidence, FactualStatus, FieldLink, LedgerError, LedgerResult, ReviewQueueItem, ReviewStatus,
    Snippet, Source, SourceFeed, SourceUrl, SyncState, SyncStatus, TruthMetrics,
};

use crate::{
    ClaimEvidenceStats, ClaimObservation, DerivedOutcome, EvidenceDetail, FieldLinkOutcome,
    ObservationOutcome, PipelineStats, ScoreFilter, Store,
};

// ============================================================================
// Tables
// ============================================================================

#[derive(Default)]
struct Tables {
    sources: HashMap<Uuid, Source>,
    feeds: HashMap<Uuid, SourceFeed>,
    urls: HashMap<Uuid, SourceUrl>,
    documents: HashMap<Uuid, Document>,
    snippets: HashMap<Uuid, Snippet>,
    entities: HashMap<Uuid, Entity>,
    attributes: HashMap<Uuid, Attribute>,
    groups: HashMap<ClaimKey, ConflictGroup>,
    claims: HashMap<Uuid, Claim>,
    evidence: HashMap<Uuid, Evidence>,
    metrics: HashMap<Uuid, TruthMetrics>,
    field_links: HashMap<Uuid, FieldLink>,
    review_items: HashMap<Uuid, ReviewQueueItem>,
    syncs: HashMap<Uuid, SyncStatus>,
}

impl Tables {
    fn evidence_exists(&self, claim_id: Uuid, snippet_id: Uuid) -> bool {
        self.evidence
            .values()
            .any(|e| e.claim_id == claim_id && e.snippet_id == snippet_id)
    }

    fn snippet_has_evidence(&self, snippet_id: Uuid) -> bool {
        self.evidence.values().any(|e| e.snippet_id == snippet_id)
    }

    fn document_is_superseded(&self, document_id: Uuid) -> bool {
        self.documents
            .values()
            .any(|d| d.supersedes_document_id == Some(document_id))
    }
}

/// Reference implementation of [`Store`] over process memory.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    // ------------------------------------------------------------------
    // Sources
    // ------------------------------------------------------------------

    async fn insert_source(&self, source: Source) -> LedgerResult<Source> {
        if !(0.0..=1.0).contains(&source.base_trust) {
            return Err(LedgerError::Validation(format!(
                "base_trust out of range: {}",
                source.base_trust
            )));
        }
        let mut t = self.inner.write();
        if t.sources.values().any(|s| s.name == source.name) {
            return Err(LedgerError::Conflict(format!(
                "source name already exists: {}",
                source.name
            )));
        }
        t.sources.insert(source.id, source.clone());
        Ok(source)
    }

    async fn update_source(&self, source: Source) -> LedgerResult<()> {
        let mut t = self.inner.write();
        if !t.sources.contains_key(&source.id) {
            return Err(LedgerError::NotFound(format!("source {}", source.id)));
        }
        if t.sources
            .values()
            .any(|s| s.id != source.id && s.name == source.name)
        {
            return Err(LedgerError::Conflict(format!(
                "source name already exists: {}",
                source.name
            )));
        }
        t.sources.insert(source.id, source);
        Ok(())
    }

    async fn delete_source(&self, id: Uuid) -> LedgerResult<()> {
        let mut t = self.inner.write();
        if t.sources.remove(&id).is_none() {
            return Err(LedgerError::NotFound(format!("source {id}")));
        }
        t.feeds.retain(|_, f| f.source_id != id);
        t.urls.retain(|_, u| u.source_id != id);
        let doc_ids: Vec<Uuid> = t
            .documents
            .values()
            .filter(|d| d.source_id == id)
            .map(|d| d.id)
            .collect();
        t.documents.retain(|_, d| d.source_id != id);
        let snippet_ids: Vec<Uuid> = t
            .snippets
            .values()
            .filter(|s| doc_ids.contains(&s.document_id))
            .map(|s| s.id)
            .collect();
        t.snippets.retain(|_, s| !doc_ids.contains(&s.document_id));
        t.evidence.retain(|_, e| !snippet_ids.contains(&e.snippet_id));
        Ok(())
    }

    async fn source(&self, id: Uuid) -> LedgerResult<Option<Source>> {
        Ok(self.inner.read().sources.get(&id).cloned())
    }

    async fn source_by_name(&self, name: &str) -> LedgerResult<Option<Source>> {
        Ok(self
            .inner
            .read()
            .sources
            .values()
            .find(|s| s.name == name)
            .cloned())
    }

    async fn list_sources(&self) -> LedgerResult<Vec<Source>> {
        let mut out: Vec<Source> = self.inner.read().sources.values().cloned().collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }

    // ------------------------------------------------------------------
    // Feeds and URLs
    // ------------------------------------------------------------------

    async fn insert_feed(&self, feed: SourceFeed) -> LedgerResult<SourceFeed> {
        let mut t = self.inner.write();
        if !t.sources.contains_key(&feed.source_id) {
            return Err(LedgerError::NotFound(format!("source {}", feed.source_id)));
        }
        if t.feeds
            .values()
            .any(|f| f.source_id == feed.source_id && f.feed_url == feed.feed_url)
        {
            return Err(LedgerError::Conflict(format!(
                "feed already registered: {}",
                feed.feed_url
            )));
        }
        t.feeds.insert(feed.id, feed.clone());
        Ok(feed)
    }

    async fn list_feeds(&self, only_active: bool) -> LedgerResult<Vec<SourceFeed>> {
        let mut out: Vec<SourceFeed> = self
            .inner
            .read()
            .feeds
            .values()
            .filter(|f| !only_active || f.is_active)
            .cloned()
            .collect();
        out.sort_by(|a, b| a.feed_url.cmp(&b.feed_url));
        Ok(out)
    }

    async fn feeds_due(&self, now: DateTime<Utc>) -> LedgerResult<Vec<SourceFeed>> {
        let mut out: Vec<SourceFeed> = self
            .inner
            .read()
            .feeds
            .values()
            .filter(|f| f.is_active && f.is_due(now))
            .cloned()
            .collect();
        out.sort_by(|a, b| a.feed_url.cmp(&b.feed_url));
        Ok(out)
    }

    async fn mark_feed_success(&self, feed_id: Uuid, now: DateTime<Utc>) -> LedgerResult<()> {
        let mut t = self.inner.write();
        let feed = t
            .feeds
            .get_mut(&feed_id)
            .ok_or_else(|| LedgerError::NotFound(format!("feed {feed_id}")))?;
        feed.last_fetched_at = Some(now);
        feed.last_error = None;
        feed.error_count = 0;
        Ok(())
    }

    async fn mark_feed_failure(&self, feed_id: Uuid, error: &str) -> LedgerResult<()> {
        let mut t = self.inner.write();
        let feed = t
            .feeds
            .get_mut(&feed_id)
            .ok_or_else(|| LedgerError::NotFound(format!("feed {feed_id}")))?;
        feed.error_count += 1;
        feed.last_error = Some(error.to_string());
        Ok(())
    }

    async fn insert_source_url(&self, url: SourceUrl) -> LedgerResult<SourceUrl> {
        let mut t = self.inner.write();
        if !t.sources.contains_key(&url.source_id) {
            return Err(LedgerError::NotFound(format!("source {}", url.source_id)));
        }
        if t.urls
            .values()
            .any(|u| u.source_id == url.source_id && u.url == url.url)
        {
            return Err(LedgerError::Conflict(format!(
                "url already registered: {}",
                url.url
            )));
        }
        t.urls.insert(url.id, url.clone());
        Ok(url)
    }

    async fn list_source_urls(
        &self,
        source_id: Uuid,
        only_active: bool,
    ) -> LedgerResult<Vec<SourceUrl>> {
        let mut out: Vec<SourceUrl> = self
            .inner
            .read()
            .urls
            .values()
            .filter(|u| u.source_id == source_id && (!only_active || u.is_active))
            .cloned()
            .collect();
        out.sort_by(|a, b| a.url.cmp(&b.url));
        Ok(out)
    }

    async fn mark_source_url_fetched(&self, id: Uuid, now: DateTime<Utc>) -> LedgerResult<()> {
        let mut t = self.inner.write();
        let url = t
            .urls
            .get_mut(&id)
            .ok_or_else(|| LedgerError::NotFound(format!("source url {id}")))?;
        url.last_fetched_at = Some(now);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Documents and snippets
    // ------------------------------------------------------------------

    async fn document(&self, id: Uuid) -> LedgerResult<Option<Document>> {
        Ok(self.inner.read().documents.get(&id).cloned())
    }

    async fn document_by_content(
        &self,
        source_id: Uuid,
        content_hash: &str,
    ) -> LedgerResult<Option<Document>> {
        Ok(self
            .inner
            .read()
            .documents
            .values()
            .find(|d| d.source_id == source_id && d.content_hash == content_hash)
            .cloned())
    }

    async fn latest_document_for_url(
        &self,
        source_id: Uuid,
        url: &str,
    ) -> LedgerResult<Option<Document>> {
        Ok(self
            .inner
            .read()
            .documents
            .values()
            .filter(|d| d.source_id == source_id && d.url == url)
            .max_by_key(|d| d.created_at)
            .cloned())
    }

    async fn insert_document(
        &self,
        document: Document,
        snippets: Vec<Snippet>,
    ) -> LedgerResult<(Document, usize)> {
        let mut t = self.inner.write();
        if !t.sources.contains_key(&document.source_id) {
            return Err(LedgerError::NotFound(format!(
                "source {}",
                document.source_id
            )));
        }
        if t.documents
            .values()
            .any(|d| d.source_id == document.source_id && d.content_hash == document.content_hash)
        {
            return Err(LedgerError::Conflict(format!(
                "document content already stored for source {}",
                document.source_id
            )));
        }
        t.documents.insert(document.id, document.clone());

        let mut created = 0usize;
        for snippet in snippets {
            let duplicate = t
                .snippets
                .values()
                .any(|s| s.document_id == snippet.document_id && s.snippet_hash == snippet.snippet_hash);
            if duplicate {
                continue;
            }
            t.snippets.insert(snippet.id, snippet);
            created += 1;
        }
        Ok((document, created))
    }

    async fn is_superseded(&self, document_id: Uuid) -> LedgerResult<bool> {
        Ok(self.inner.read().document_is_superseded(document_id))
    }

    async fn list_documents(&self) -> LedgerResult<Vec<Document>> {
        let mut out: Vec<Document> = self.inner.read().documents.values().cloned().collect();
        out.sort_by_key(|d| d.created_at);
        Ok(out)
    }

    // ------------------------------------------------------------------
    // Entities and attributes
    // ------------------------------------------------------------------

    async fn insert_entity(&self, entity: Entity) -> LedgerResult<Entity> {
        let mut t = self.inner.write();
        if t.entities
            .values()
            .any(|e| e.canonical_name == entity.canonical_name)
        {
            return Err(LedgerError::Conflict(format!(
                "entity already exists: {}",
                entity.canonical_name
            )));
        }
        t.entities.insert(entity.id, entity.clone());
        Ok(entity)
    }

    async fn entity(&self, id: Uuid) -> LedgerResult<Option<Entity>> {
        Ok(self.inner.read().entities.get(&id).cloned())
    }

    async fn entity_by_name(&self, canonical_name: &str) -> LedgerResult<Option<Entity>> {
        Ok(self
            .inner
            .read()
            .entities
            .values()
            .find(|e| e.canonical_name == canonical_name)
            .cloned())
    }

    async fn entity_by_domain_ref(
        &self,
        entity_type: EntityType,
        domain_id: i64,
    ) -> LedgerResult<Option<Entity>> {
        Ok(self
            .inner
            .read()
            .entities
            .values()
            .find(|e| e.entity_type == entity_type && e.domain_id == Some(domain_id))
            .cloned())
    }

    async fn list_entities(&self) -> LedgerResult<Vec<Entity>> {
        let mut out: Vec<Entity> = self.inner.read().entities.values().cloned().collect();
        out.sort_by(|a, b| a.canonical_name.cmp(&b.canonical_name));
        Ok(out)
    }

    async fn add_entity_alias(&self, id: Uuid, alias: &str) -> LedgerResult<()> {
        let mut t = self.inner.write();
        let entity = t
            .entities
            .get_mut(&id)
            .ok_or_else(|| LedgerError::NotFound(format!("entity {id}")))?;
        if !entity.aliases.iter().any(|a| a == alias) {
            entity.aliases.push(alias.to_string());
        }
        Ok(())
    }

    async fn ensure_attribute(&self, attribute: Attribute) -> LedgerResult<Attribute> {
        if !(0.0..=1.0).contains(&attribute.tolerance_rel) {
            return Err(LedgerError::Validation(format!(
                "tolerance_rel out of range: {}",
                attribute.tolerance_rel
            )));
        }
        let mut t = self.inner.write();
        if let Some(existing) = t
            .attributes
            .values()
            .find(|a| a.canonical_name == attribute.canonical_name)
        {
            return Ok(existing.clone());
        }
        t.attributes.insert(attribute.id, attribute.clone());
        Ok(attribute)
    }

    async fn attribute(&self, id: Uuid) -> LedgerResult<Option<Attribute>> {
        Ok(self.inner.read().attributes.get(&id).cloned())
    }

    async fn attribute_by_name(&self, canonical_name: &str) -> LedgerResult<Option<Attribute>> {
        Ok(self
            .inner
            .read()
            .attributes
            .values()
            .find(|a| a.canonical_name == canonical_name)
            .cloned())
    }

    async fn list_attributes(&self) -> LedgerResult<Vec<Attribute>> {
        let mut out: Vec<Attribute> = self.inner.read().attributes.values().cloned().collect();
        out.sort_by(|a, b| a.canonical_name.cmp(&b.canonical_name));
        Ok(out)
    }

    // ------------------------------------------------------------------
    // Extraction
    // ------------------------------------------------------------------

    async fn snippets_needing_extraction(
        &self,
        document_ids: Option<&[Uuid]>,
        limit: usize,
    ) -> LedgerResult<Vec<Snippet>> {
        let t = self.inner.read();
        let mut out: Vec<Snippet> = t
            .snippets
            .values()
            .filter(|s| match document_ids {
                Some(ids) => ids.contains(&s.document_id),
                None => true,
            })
            .filter(|s| !t.snippet_has_evidence(s.id))
            .cloned()
            .collect();
        out.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.locator.cmp(&b.locator))
        });
        out.truncate(limit);
        Ok(out)
    }

    async fn snippet(&self, id: Uuid) -> LedgerResult<Option<Snippet>> {
        Ok(self.inner.read().snippets.get(&id).cloned())
    }

    async fn record_claim_observation(
        &self,
        observation: ClaimObservation,
    ) -> LedgerResult<ObservationOutcome> {
        let claim_key = compute_claim_key(
            observation.entity_id,
            observation.attribute_id,
            &observation.scope,
        )?;

        let mut t = self.inner.write();
        if !t.snippets.contains_key(&observation.snippet_id) {
            return Err(LedgerError::NotFound(format!(
                "snippet {}",
                observation.snippet_id
            )));
        }
        let now = Utc::now();

        // Group upsert (ignore on conflict).
        t.groups.entry(claim_key).or_insert_with(|| ConflictGroup {
            claim_key,
            entity_id: observation.entity_id,
            attribute_id: observation.attribute_id,
            scope: observation.scope.clone(),
            conflict_present: false,
            status_factual: FactualStatus::Unknown,
            claim_count: 0,
            metadata: serde_json::Value::Null,
            created_at: now,
        });

        // Claim reuse-or-insert; inserts bump the group count.
        let existing = t
            .claims
            .values()
            .find(|c| c.claim_key == claim_key && c.value.same_value(&observation.value))
            .map(|c| c.id);
        let (claim_id, claim_created) = match existing {
            Some(id) => (id, false),
            None => {
                let claim = Claim {
                    id: Uuid::new_v4(),
                    claim_key,
                    entity_id: observation.entity_id,
                    attribute_id: observation.attribute_id,
                    value: observation.value.clone(),
                    unit: observation.unit.clone(),
                    scope: observation.scope.clone(),
                    valid_from: None,
                    valid_to: None,
                    is_derived: false,
                    derived_from_claim_id: None,
                    created_at: now,
                    updated_at: now,
                };
                let id = claim.id;
                t.claims.insert(id, claim);
                if let Some(group) = t.groups.get_mut(&claim_key) {
                    group.claim_count += 1;
                }
                (id, true)
            }
        };

        // Evidence insert; the unique constraint suppresses duplicates.
        let evidence_created = if t.evidence_exists(claim_id, observation.snippet_id) {
            false
        } else {
            let evidence = Evidence {
                id: Uuid::new_v4(),
                claim_id,
                snippet_id: observation.snippet_id,
                quote: observation.quote.clone(),
                stance: observation.stance,
                extraction_confidence: observation.extraction_confidence,
                created_at: now,
            };
            t.evidence.insert(evidence.id, evidence);
            if let Some(claim) = t.claims.get_mut(&claim_id) {
                claim.updated_at = now;
            }
            true
        };

        Ok(ObservationOutcome {
            claim_id,
            claim_key,
            claim_created,
            evidence_created,
        })
    }

    // ------------------------------------------------------------------
    // Conflict groups and claims
    // ------------------------------------------------------------------

    async fn conflict_group(&self, key: ClaimKey) -> LedgerResult<Option<ConflictGroup>> {
        Ok(self.inner.read().groups.get(&key).cloned())
    }

    async fn conflict_groups_to_check(
        &self,
        force_recheck: bool,
        limit: usize,
    ) -> LedgerResult<Vec<ConflictGroup>> {
        let mut out: Vec<ConflictGroup> = self
            .inner
            .read()
            .groups
            .values()
            .filter(|g| g.claim_count > 0)
            .filter(|g| force_recheck || g.status_factual == FactualStatus::Unknown)
            .cloned()
            .collect();
        out.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.claim_key.cmp(&b.claim_key))
        });
        out.truncate(limit);
        Ok(out)
    }

    async fn update_conflict_group(&self, group: ConflictGroup) -> LedgerResult<()> {
        let mut t = self.inner.write();
        if !t.groups.contains_key(&group.claim_key) {
            return Err(LedgerError::NotFound(format!(
                "conflict group {}",
                group.claim_key
            )));
        }
        t.groups.insert(group.claim_key, group);
        Ok(())
    }

    async fn list_conflict_groups(&self) -> LedgerResult<Vec<ConflictGroup>> {
        let mut out: Vec<ConflictGroup> = self.inner.read().groups.values().cloned().collect();
        out.sort_by(|a, b| a.claim_key.cmp(&b.claim_key));
        Ok(out)
    }

    async fn claim(&self, id: Uuid) -> LedgerResult<Option<Claim>> {
        Ok(self.inner.read().claims.get(&id).cloned())
    }

    async fn claims_in_group(&self, key: ClaimKey) -> LedgerResult<Vec<Claim>> {
        let mut out: Vec<Claim> = self
            .inner
            .read()
            .claims
            .values()
            .filter(|c| c.claim_key == key)
            .cloned()
            .collect();
        out.sort_by_key(|c| c.created_at);
        Ok(out)
    }

    async fn list_claims(&self) -> LedgerResult<Vec<Claim>> {
        let mut out: Vec<Claim> = self.inner.read().claims.values().cloned().collect();
        out.sort_by_key(|c| c.created_at);
        Ok(out)
    }

    async fn claim_evidence_stats(&self, claim_id: Uuid) -> LedgerResult<ClaimEvidenceStats> {
        let t = self.inner.read();
        let mut stats = ClaimEvidenceStats::default();
        for evidence in t.evidence.values().filter(|e| e.claim_id == claim_id) {
            stats.evidence_count += 1;
            let published = t
                .snippets
                .get(&evidence.snippet_id)
                .and_then(|s| t.documents.get(&s.document_id))
                .and_then(|d| d.published_at);
            if let Some(p) = published {
                stats.newest_published = Some(match stats.newest_published {
                    Some(existing) => existing.max(p),
                    None => p,
                });
            }
        }
        Ok(stats)
    }

    async fn raw_claims_with_truth(
        &self,
        entity_id: Uuid,
        attribute_id: Uuid,
    ) -> LedgerResult<Vec<(Claim, Option<TruthMetrics>)>> {
        let t = self.inner.read();
        let mut out: Vec<(Claim, Option<TruthMetrics>)> = t
            .claims
            .values()
            .filter(|c| {
                !c.is_derived && c.entity_id == entity_id && c.attribute_id == attribute_id
            })
            .map(|c| (c.clone(), t.metrics.get(&c.id).cloned()))
            .collect();
        out.sort_by_key(|(c, _)| c.created_at);
        Ok(out)
    }

    // ------------------------------------------------------------------
    // Derivation
    // ------------------------------------------------------------------

    async fn insert_derived_claim(&self, claim: Claim) -> LedgerResult<DerivedOutcome> {
        let source_claim_id = claim.derived_from_claim_id.ok_or_else(|| {
            LedgerError::Validation("derived claim must name its source claim".to_string())
        })?;
        if !claim.is_derived {
            return Err(LedgerError::Validation(
                "insert_derived_claim requires is_derived".to_string(),
            ));
        }

        let mut t = self.inner.write();
        if !t.claims.contains_key(&source_claim_id) {
            return Err(LedgerError::NotFound(format!("claim {source_claim_id}")));
        }
        let now = Utc::now();

        t.groups.entry(claim.claim_key).or_insert_with(|| ConflictGroup {
            claim_key: claim.claim_key,
            entity_id: claim.entity_id,
            attribute_id: claim.attribute_id,
            scope: claim.scope.clone(),
            conflict_present: false,
            status_factual: FactualStatus::Unknown,
            claim_count: 0,
            metadata: serde_json::Value::Null,
            created_at: now,
        });

        let existing = t
            .claims
            .values()
            .find(|c| {
                c.claim_key == claim.claim_key && c.derived_from_claim_id == Some(source_claim_id)
            })
            .map(|c| c.id);
        let (claim_id, created) = match existing {
            Some(id) => (id, false),
            None => {
                let id = claim.id;
                t.claims.insert(id, claim.clone());
                if let Some(group) = t.groups.get_mut(&claim.claim_key) {
                    group.claim_count += 1;
                }
                (id, true)
            }
        };

        // Copy evidence from the source claim, idempotent on
        // (claim_id, snippet_id).
        let source_evidence: Vec<Evidence> = t
            .evidence
            .values()
            .filter(|e| e.claim_id == source_claim_id)
            .cloned()
            .collect();
        let mut copied = 0usize;
        for src in source_evidence {
            if t.evidence_exists(claim_id, src.snippet_id) {
                continue;
            }
            let copy = Evidence {
                id: Uuid::new_v4(),
                claim_id,
                snippet_id: src.snippet_id,
                quote: src.quote.clone(),
                stance: src.stance,
                extraction_confidence: src.extraction_confidence,
                created_at: now,
            };
            t.evidence.insert(copy.id, copy);
            copied += 1;
        }
        if copied > 0 {
            if let Some(c) = t.claims.get_mut(&claim_id) {
                c.updated_at = now;
            }
        }

        Ok(DerivedOutcome {
            claim_id,
            created,
            evidence_copied: copied,
        })
    }

    async fn upsert_field_link(&self, link: FieldLink) -> LedgerResult<FieldLinkOutcome> {
        let mut t = self.inner.write();
        let existing = t
            .field_links
            .values()
            .find(|l| l.entity_id == link.entity_id && l.field_name == link.field_name)
            .map(|l| (l.id, l.claim_key));
        match existing {
            None => {
                t.field_links.insert(link.id, link);
                Ok(FieldLinkOutcome::Inserted)
            }
            Some((_, key)) if key == link.claim_key => Ok(FieldLinkOutcome::Unchanged),
            Some((id, _)) => {
                if let Some(existing) = t.field_links.get_mut(&id) {
                    existing.claim_key = link.claim_key;
                    existing.auto_update = link.auto_update;
                    existing.updated_at = Utc::now();
                }
                Ok(FieldLinkOutcome::Updated)
            }
        }
    }

    async fn field_link(
        &self,
        entity_id: Uuid,
        field_name: &str,
    ) -> LedgerResult<Option<FieldLink>> {
        Ok(self
            .inner
            .read()
            .field_links
            .values()
            .find(|l| l.entity_id == entity_id && l.field_name == field_name)
            .cloned())
    }

    async fn list_field_links(&self) -> LedgerResult<Vec<FieldLink>> {
        let mut out: Vec<FieldLink> = self.inner.read().field_links.values().cloned().collect();
        out.sort_by(|a, b| {
            a.entity_id
                .cmp(&b.entity_id)
                .then_with(|| a.field_name.cmp(&b.field_name))
        });
        Ok(out)
    }

    // ------------------------------------------------------------------
    // Scoring
    // ------------------------------------------------------------------

    async fn claims_needing_scores(
        &self,
        filter: &ScoreFilter,
        limit: usize,
    ) -> LedgerResult<Vec<Claim>> {
        let t = self.inner.read();
        let mut out: Vec<Claim> = t
            .claims
            .values()
            .filter(|c| {
                if let Some(ids) = &filter.claim_ids {
                    if !ids.contains(&c.id) {
                        return false;
                    }
                }
                if let Some(keys) = &filter.conflict_group_keys {
                    if !keys.contains(&c.claim_key) {
                        return false;
                    }
                }
                if let Some(ids) = &filter.entity_ids {
                    if !ids.contains(&c.entity_id) {
                        return false;
                    }
                }
                if filter.force_rescore {
                    return true;
                }
                match t.metrics.get(&c.id) {
                    None => true,
                    Some(m) => m.computed_at < c.updated_at,
                }
            })
            .cloned()
            .collect();
        out.sort_by_key(|c| c.created_at);
        out.truncate(limit);
        Ok(out)
    }

    async fn evidence_details(&self, claim_id: Uuid) -> LedgerResult<Vec<EvidenceDetail>> {
        let t = self.inner.read();
        let mut out = Vec::new();
        for evidence in t.evidence.values().filter(|e| e.claim_id == claim_id) {
            let snippet = t.snippets.get(&evidence.snippet_id).ok_or_else(|| {
                LedgerError::Store(format!("evidence {} has no snippet", evidence.id))
            })?;
            let document = t.documents.get(&snippet.document_id).ok_or_else(|| {
                LedgerError::Store(format!("snippet {} has no document", snippet.id))
            })?;
            let source = t.sources.get(&document.source_id).ok_or_else(|| {
                LedgerError::Store(format!("document {} has no source", document.id))
            })?;
            out.push(EvidenceDetail {
                evidence_id: evidence.id,
                claim_id,
                snippet_id: snippet.id,
                quote: evidence.quote.clone(),
                stance: evidence.stance,
                extraction_confidence: evidence.extraction_confidence,
                snippet_locator: snippet.locator.clone(),
                snippet_type: snippet.snippet_type,
                document_id: document.id,
                document_title: document.title.clone(),
                document_url: document.url.clone(),
                doc_type: document.doc_type.clone(),
                published_at: document.published_at,
                is_superseded: t.document_is_superseded(document.id),
                source_id: source.id,
                source_name: source.name.clone(),
                source_type: source.source_type.clone(),
                base_trust: source.base_trust,
                cluster_key: source.cluster_key(),
            });
        }
        // published_at descending, nulls last.
        out.sort_by(|a, b| match (b.published_at, a.published_at) {
            (Some(x), Some(y)) => x.cmp(&y),
            (Some(_), None) => std::cmp::Ordering::Greater,
            (None, Some(_)) => std::cmp::Ordering::Less,
            (None, None) => std::cmp::Ordering::Equal,
        });
        Ok(out)
    }

    async fn truth_metrics(&self, claim_id: Uuid) -> LedgerResult<Option<TruthMetrics>> {
        Ok(self.inner.read().metrics.get(&claim_id).cloned())
    }

    async fn upsert_truth_metrics(&self, metrics: TruthMetrics) -> LedgerResult<()> {
        let mut t = self.inner.write();
        if !t.claims.contains_key(&metrics.claim_id) {
            return Err(LedgerError::NotFound(format!("claim {}", metrics.claim_id)));
        }
        t.metrics.insert(metrics.claim_id, metrics);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Review queue
    // ------------------------------------------------------------------

    async fn enqueue_review(&self, item: ReviewQueueItem) -> LedgerResult<bool> {
        let mut t = self.inner.write();
        let duplicate = t.review_items.values().any(|r| {
            r.item_type == item.item_type
                && r.item_ref == item.item_ref
                && r.status == ReviewStatus::Pending
        });
        if duplicate {
            return Ok(false);
        }
        t.review_items.insert(item.id, item);
        Ok(true)
    }

    async fn list_review_items(
        &self,
        status: Option<ReviewStatus>,
    ) -> LedgerResult<Vec<ReviewQueueItem>> {
        let mut out: Vec<ReviewQueueItem> = self
            .inner
            .read()
            .review_items
            .values()
            .filter(|r| status.map(|s| r.status == s).unwrap_or(true))
            .cloned()
            .collect();
        out.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| a.created_at.cmp(&b.created_at))
        });
        Ok(out)
    }

    async fn resolve_review_item(
        &self,
        id: Uuid,
        status: ReviewStatus,
        notes: Option<String>,
        resolved_by: Option<String>,
    ) -> LedgerResult<()> {
        if matches!(status, ReviewStatus::Pending) {
            return Err(LedgerError::Validation(
                "cannot resolve a review item back to pending".to_string(),
            ));
        }
        let mut t = self.inner.write();
        let item = t
            .review_items
            .get_mut(&id)
            .ok_or_else(|| LedgerError::NotFound(format!("review item {id}")))?;
        item.status = status;
        item.notes = notes;
        if matches!(status, ReviewStatus::Resolved | ReviewStatus::Dismissed) {
            item.resolved_at = Some(Utc::now());
            item.resolved_by = resolved_by;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Sync status
    // ------------------------------------------------------------------

    async fn begin_sync(
        &self,
        sync_type: &str,
        metadata: serde_json::Value,
    ) -> LedgerResult<SyncStatus> {
        let mut t = self.inner.write();
        if t.syncs
            .values()
            .any(|s| s.sync_type == sync_type && s.state == SyncState::Running)
        {
            return Err(LedgerError::Conflict(format!(
                "job already running: {sync_type}"
            )));
        }
        let status = SyncStatus {
            id: Uuid::new_v4(),
            sync_type: sync_type.to_string(),
            state: SyncState::Running,
            started_at: Utc::now(),
            completed_at: None,
            records_synced: 0,
            error_message: None,
            metadata,
        };
        t.syncs.insert(status.id, status.clone());
        Ok(status)
    }

    async fn finish_sync(
        &self,
        id: Uuid,
        state: SyncState,
        records_synced: u64,
        error_message: Option<String>,
    ) -> LedgerResult<()> {
        if !state.is_terminal() {
            return Err(LedgerError::Validation(
                "finish_sync requires a terminal state".to_string(),
            ));
        }
        let mut t = self.inner.write();
        let status = t
            .syncs
            .get_mut(&id)
            .ok_or_else(|| LedgerError::NotFound(format!("sync status {id}")))?;
        if status.state.is_terminal() {
            // Already finished (e.g. cancel raced completion); keep the first
            // terminal transition.
            return Ok(());
        }
        status.state = state;
        status.completed_at = Some(Utc::now());
        status.records_synced = records_synced;
        status.error_message = error_message;
        Ok(())
    }

    async fn latest_sync_statuses(&self) -> LedgerResult<Vec<SyncStatus>> {
        let t = self.inner.read();
        let mut latest: HashMap<String, SyncStatus> = HashMap::new();
        for status in t.syncs.values() {
            match latest.get(&status.sync_type) {
                Some(existing) if existing.started_at >= status.started_at => {}
                _ => {
                    latest.insert(status.sync_type.clone(), status.clone());
                }
            }
        }
        let mut out: Vec<SyncStatus> = latest.into_values().collect();
        out.sort_by(|a, b| a.sync_type.cmp(&b.sync_type));
        Ok(out)
    }

    async fn running_sync_statuses(&self) -> LedgerResult<Vec<SyncStatus>> {
        let mut out: Vec<SyncStatus> = self
            .inner
            .read()
            .syncs
            .values()
            .filter(|s| s.state == SyncState::Running)
            .cloned()
            .collect();
        out.sort_by_key(|s| s.started_at);
        Ok(out)
    }

    async fn reap_stuck_syncs(
        &self,
        cutoff: DateTime<Utc>,
        timeout_hours: u64,
    ) -> LedgerResult<usize> {
        let mut t = self.inner.write();
        let now = Utc::now();
        let mut reaped = 0usize;
        for status in t.syncs.values_mut() {
            if status.state == SyncState::Running && status.started_at < cutoff {
                status.state = SyncState::Timeout;
                status.completed_at = Some(now);
                status.error_message = Some(format!(
                    "Job timed out after {timeout_hours} hours of running"
                ));
                reaped += 1;
            }
        }
        if reaped > 0 {
            tracing::warn!(reaped, "marked stuck sync rows as timed out");
        }
        Ok(reaped)
    }

    // ------------------------------------------------------------------
    // Stats
    // ------------------------------------------------------------------

    async fn pipeline_stats(&self) -> LedgerResult<PipelineStats> {
        let t = self.inner.read();
        Ok(PipelineStats {
            sources: t.sources.len(),
            documents: t.documents.len(),
            snippets: t.snippets.len(),
            entities: t.entities.len(),
            attributes: t.attributes.len(),
            claims: t.claims.values().filter(|c| !c.is_derived).count(),
            derived_claims: t.claims.values().filter(|c| c.is_derived).count(),
            evidence: t.evidence.len(),
            conflict_groups: t.groups.len(),
            groups_with_conflict: t.groups.values().filter(|g| g.conflict_present).count(),
            scored_claims: t.metrics.len(),
            field_links: t.field_links.len(),
            review_pending: t
                .review_items
                .values()
                .filter(|r| r.status == ReviewStatus::Pending)
                .count(),
        })
    }
}
