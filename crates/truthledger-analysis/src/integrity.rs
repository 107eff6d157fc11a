//! Ledger integrity checks.
//!
//! Re-verifies the invariants the pipeline is supposed to maintain, straight
//! against the store. Critical violations indicate corrupted writes; the CLI
//! exits non-zero on any of them.

use std::collections::{HashMap, HashSet};
use tracing::info;

use truthledger_model::{compute_claim_key, LedgerResult, SyncState};
use truthledger_store::{DynStore, Store};

/// One failed check.
#[derive(Debug, Clone)]
pub struct IntegrityViolation {
    pub check: String,
    pub message: String,
    pub critical: bool,
}

/// Full check result.
#[derive(Debug, Clone, Default)]
pub struct IntegrityReport {
    pub checks_run: u64,
    pub violations: Vec<IntegrityViolation>,
}

impl IntegrityReport {
    pub fn is_clean(&self) -> bool {
        self.violations.is_empty()
    }

    pub fn has_critical(&self) -> bool {
        self.violations.iter().any(|v| v.critical)
    }

    fn violation(&mut self, check: &str, message: String, critical: bool) {
        self.violations.push(IntegrityViolation {
            check: check.to_string(),
            message,
            critical,
        });
    }
}

/// Run every invariant check.
pub async fn run_integrity_check(store: &DynStore) -> LedgerResult<IntegrityReport> {
    let mut report = IntegrityReport::default();

    let claims = store.list_claims().await?;
    let groups = store.list_conflict_groups().await?;
    let documents = store.list_documents().await?;
    let field_links = store.list_field_links().await?;

    // 1. Every claim's key matches the hash of its (entity, attribute, scope).
    report.checks_run += 1;
    for claim in &claims {
        match compute_claim_key(claim.entity_id, claim.attribute_id, &claim.scope) {
            Ok(expected) if expected == claim.claim_key => {}
            Ok(expected) => report.violation(
                "claim_key_hash",
                format!(
                    "claim {}: stored key {} != computed {expected}",
                    claim.id, claim.claim_key
                ),
                true,
            ),
            Err(e) => report.violation(
                "claim_key_hash",
                format!("claim {}: scope does not canonicalize: {e}", claim.id),
                true,
            ),
        }
    }

    // 2. Group claim counts match the claims actually stored.
    report.checks_run += 1;
    let mut counts: HashMap<_, u64> = HashMap::new();
    for claim in &claims {
        *counts.entry(claim.claim_key).or_insert(0) += 1;
    }
    for group in &groups {
        let actual = counts.get(&group.claim_key).copied().unwrap_or(0);
        if group.claim_count != actual {
            report.violation(
                "group_claim_count",
                format!(
                    "group {}: claim_count {} but {actual} claims stored",
                    group.claim_key, group.claim_count
                ),
                true,
            );
        }
    }

    // 3. Evidence rows are unique per (claim, snippet).
    report.checks_run += 1;
    for claim in &claims {
        let details = store.evidence_details(claim.id).await?;
        let mut seen = HashSet::new();
        for d in &details {
            if !seen.insert(d.snippet_id) {
                report.violation(
                    "evidence_unique",
                    format!("claim {}: duplicate evidence for snippet {}", claim.id, d.snippet_id),
                    true,
                );
            }
        }
    }

    // 4. Documents are unique per (source, content hash).
    report.checks_run += 1;
    let mut doc_keys = HashSet::new();
    for doc in &documents {
        if !doc_keys.insert((doc.source_id, doc.content_hash.clone())) {
            report.violation(
                "document_content_unique",
                format!("document {}: duplicate (source, content_hash)", doc.id),
                true,
            );
        }
    }

    // 5. Metric ranges.
    report.checks_run += 1;
    for claim in &claims {
        if let Some(m) = store.truth_metrics(claim.id).await? {
            if !(0.0..=1.0).contains(&m.truth_raw)
                || m.support_score < 0.0
                || m.contradiction_score < 0.0
            {
                report.violation(
                    "metric_ranges",
                    format!(
                        "claim {}: truth_raw={} support={} contradiction={}",
                        claim.id, m.truth_raw, m.support_score, m.contradiction_score
                    ),
                    true,
                );
            }
        }
    }

    // 7. Field links point at existing conflict groups.
    report.checks_run += 1;
    let group_keys: HashSet<_> = groups.iter().map(|g| g.claim_key).collect();
    for link in &field_links {
        if !group_keys.contains(&link.claim_key) {
            report.violation(
                "field_link_target",
                format!(
                    "field link ({}, {}) targets missing group {}",
                    link.entity_id, link.field_name, link.claim_key
                ),
                true,
            );
        }
    }

    // 8. At most one running sync row per type.
    report.checks_run += 1;
    let mut running_types = HashSet::new();
    for status in store.running_sync_statuses().await? {
        if status.state == SyncState::Running && !running_types.insert(status.sync_type.clone()) {
            report.violation(
                "single_running_sync",
                format!("sync type {} has multiple running rows", status.sync_type),
                true,
            );
        }
    }

    // 9. Every derived claim has a field link to its bucket.
    report.checks_run += 1;
    let linked_keys: HashSet<_> = field_links.iter().map(|l| l.claim_key).collect();
    for claim in claims.iter().filter(|c| c.is_derived) {
        if !linked_keys.contains(&claim.claim_key) {
            report.violation(
                "derived_claim_link",
                format!("derived claim {} has no field link", claim.id),
                false,
            );
        }
    }

    info!(
        checks = report.checks_run,
        violations = report.violations.len(),
        "integrity check finished"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::sync::Arc;
    use truthledger_model::{
        Attribute, ClaimValue, Entity, EntityType, Scope, Source, Stance, ValueType,
    };
    use truthledger_store::{ClaimObservation, MemoryStore, Store};
    use uuid::Uuid;

    #[tokio::test]
    async fn clean_store_passes() {
        let store: DynStore = Arc::new(MemoryStore::new());
        let report = run_integrity_check(&store).await.unwrap();
        assert!(report.is_clean());
        assert!(report.checks_run >= 7);
    }

    #[tokio::test]
    async fn populated_store_passes_after_pipeline_writes() {
        let store: DynStore = Arc::new(MemoryStore::new());
        let source = store
            .insert_source(Source {
                id: Uuid::new_v4(),
                name: "NASA".to_string(),
                source_type: "agency".to_string(),
                base_trust: 0.95,
                independence_cluster_id: None,
                default_doc_type: "technical_report".to_string(),
                is_active: true,
                tags: vec![],
                created_at: Utc::now(),
            })
            .await
            .unwrap();
        let doc = truthledger_model::Document {
            id: Uuid::new_v4(),
            source_id: source.id,
            url: "https://example.com/x".to_string(),
            title: "x".to_string(),
            doc_type: "technical_report".to_string(),
            content_hash: "h".to_string(),
            raw_content: "b".to_string(),
            published_at: None,
            retrieved_at: Utc::now(),
            supersedes_document_id: None,
            version_label: None,
            feed_url: None,
            created_at: Utc::now(),
        };
        let snippet = truthledger_model::Snippet {
            id: Uuid::new_v4(),
            document_id: doc.id,
            locator: "/x#p0:b".to_string(),
            text: "b".to_string(),
            snippet_hash: "sh".to_string(),
            snippet_type: truthledger_model::SnippetType::Text,
            created_at: Utc::now(),
        };
        store.insert_document(doc, vec![snippet.clone()]).await.unwrap();
        let entity = store
            .insert_entity(Entity {
                id: Uuid::new_v4(),
                canonical_name: "Raptor".to_string(),
                entity_type: EntityType::Engine,
                aliases: vec![],
                domain_id: None,
                created_at: Utc::now(),
            })
            .await
            .unwrap();
        let attribute = store
            .ensure_attribute(Attribute {
                id: Uuid::new_v4(),
                canonical_name: "engines.isp_s".to_string(),
                value_type: ValueType::Number,
                unit: Some("s".to_string()),
                tolerance_abs: None,
                tolerance_rel: 0.02,
                created_at: Utc::now(),
            })
            .await
            .unwrap();
        store
            .record_claim_observation(ClaimObservation {
                entity_id: entity.id,
                attribute_id: attribute.id,
                scope: Scope::from_pairs([("altitude", "vac")]),
                value: ClaimValue::number(350.0, 0.8),
                unit: Some("s".to_string()),
                snippet_id: snippet.id,
                quote: "q".to_string(),
                stance: Stance::Support,
                extraction_confidence: 0.8,
            })
            .await
            .unwrap();

        let report = run_integrity_check(&store).await.unwrap();
        assert!(report.is_clean(), "violations: {:?}", report.violations);
    }
}
