//! Fact resolution: query-time combination of raw truth and the caller's
//! confidence dial.
//!
//! A query names a claim-key bucket directly, or indirectly through a
//! FieldLink (by entity id or by domain cross-reference). Claims in the
//! bucket are ranked by slider-adjusted `truth_display`; slider-interpolated
//! gates decide whether a best answer is elected at all.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use truthledger_model::{
    compute_truth_display, mode_label, ClaimKey, DisplayPolicy, EntityType, LedgerResult, Scope,
    Stance, ValueBody,
};
use truthledger_store::{DynStore, Store};

/// The three query shapes; exactly one is used per resolution.
#[derive(Debug, Clone)]
pub enum FactQuery {
    /// Direct claim-key lookup.
    ClaimKey(ClaimKey),
    /// Through a FieldLink.
    Field { entity_id: Uuid, field_name: String },
    /// Through an entity's domain cross-id, then a FieldLink.
    DomainField {
        entity_type: EntityType,
        domain_id: i64,
        field_name: String,
    },
}

/// Resolver verdict on whether the best answer may be shown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DisplayStatus {
    Supported,
    Insufficient,
    Disputed,
    Unknown,
}

/// One evidence row in a resolver response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolvedEvidence {
    pub document_title: String,
    pub published_at: Option<DateTime<Utc>>,
    pub source_name: String,
    pub source_type: String,
    pub snippet_locator: String,
    pub quote: String,
    pub stance: Stance,
    pub extraction_confidence: f64,
}

/// One candidate answer, display-scored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolvedClaim {
    pub claim_id: Uuid,
    pub value: ValueBody,
    pub unit: Option<String>,
    pub scope: Scope,
    pub truth_raw: Option<f64>,
    pub truth_display: f64,
    pub support_score: f64,
    pub contradiction_score: f64,
    pub independent_sources: u32,
    pub computed_at: Option<DateTime<Utc>>,
    pub evidence: Vec<ResolvedEvidence>,
}

/// Context block on every response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResponseMetadata {
    pub entity_name: Option<String>,
    pub attribute_name: Option<String>,
    pub scope: Option<Scope>,
    pub computed_at: Option<DateTime<Utc>>,
}

/// Resolver response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FactResponse {
    pub claim_key: Option<ClaimKey>,
    pub truth_slider: f64,
    pub mode_label: String,
    pub best_answer: Option<ResolvedClaim>,
    pub status_display: DisplayStatus,
    pub conflict_present: bool,
    pub alternatives: Vec<ResolvedClaim>,
    pub metadata: ResponseMetadata,
}

/// Resolve a fact query under a confidence slider (clamped to [0, 1]).
pub async fn resolve_fact(
    store: &DynStore,
    policy: &DisplayPolicy,
    query: &FactQuery,
    truth_slider: f64,
) -> LedgerResult<FactResponse> {
    let slider = truth_slider.clamp(0.0, 1.0);
    let label = mode_label(slider).to_string();

    // Resolve the query to a conflict group.
    let group = match query {
        FactQuery::ClaimKey(key) => store.conflict_group(*key).await?,
        FactQuery::Field {
            entity_id,
            field_name,
        } => match store.field_link(*entity_id, field_name).await? {
            Some(link) => store.conflict_group(link.claim_key).await?,
            None => None,
        },
        FactQuery::DomainField {
            entity_type,
            domain_id,
            field_name,
        } => match store.entity_by_domain_ref(*entity_type, *domain_id).await? {
            Some(entity) => match store.field_link(entity.id, field_name).await? {
                Some(link) => store.conflict_group(link.claim_key).await?,
                None => None,
            },
            None => None,
        },
    };

    let Some(group) = group else {
        debug!("fact query resolved to no conflict group");
        return Ok(FactResponse {
            claim_key: match query {
                FactQuery::ClaimKey(key) => Some(*key),
                _ => None,
            },
            truth_slider: slider,
            mode_label: label,
            best_answer: None,
            status_display: DisplayStatus::Unknown,
            conflict_present: false,
            alternatives: Vec::new(),
            metadata: ResponseMetadata::default(),
        });
    };

    // Load all claims with metrics and evidence summaries.
    let claims = store.claims_in_group(group.claim_key).await?;
    let mut alternatives: Vec<ResolvedClaim> = Vec::with_capacity(claims.len());
    for claim in &claims {
        let metrics = store.truth_metrics(claim.id).await?;
        let evidence = store
            .evidence_details(claim.id)
            .await?
            .into_iter()
            .map(|d| ResolvedEvidence {
                document_title: d.document_title,
                published_at: d.published_at,
                source_name: d.source_name,
                source_type: d.source_type,
                snippet_locator: d.snippet_locator,
                quote: d.quote,
                stance: d.stance,
                extraction_confidence: d.extraction_confidence,
            })
            .collect();

        let truth_raw = metrics.as_ref().map(|m| m.truth_raw);
        alternatives.push(ResolvedClaim {
            claim_id: claim.id,
            value: claim.value.body.clone(),
            unit: claim.unit.clone(),
            scope: claim.scope.clone(),
            truth_raw,
            truth_display: compute_truth_display(truth_raw.unwrap_or(0.0), slider),
            support_score: metrics.as_ref().map(|m| m.support_score).unwrap_or(0.0),
            contradiction_score: metrics
                .as_ref()
                .map(|m| m.contradiction_score)
                .unwrap_or(0.0),
            independent_sources: metrics
                .as_ref()
                .map(|m| m.independent_sources)
                .unwrap_or(0),
            computed_at: metrics.as_ref().map(|m| m.computed_at),
            evidence,
        });
    }

    alternatives.sort_by(|a, b| {
        b.truth_display
            .partial_cmp(&a.truth_display)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    // Display gates.
    let gates = policy.gates_at(slider);
    let best_passes = alternatives.first().map(|best| {
        let margin_ok = match alternatives.get(1) {
            Some(second) => best.truth_display - second.truth_display >= gates.tie_margin,
            None => true,
        };
        best.truth_display >= gates.min_truth
            && f64::from(best.independent_sources) >= gates.min_independent_sources
            && best.contradiction_score <= gates.max_allowed_contradiction
            && margin_ok
    });

    let (best_answer, status) = match best_passes {
        Some(true) => (
            Some(alternatives[0].clone()),
            DisplayStatus::Supported,
        ),
        Some(false) => (
            None,
            compute_display_status(group.conflict_present, !alternatives.is_empty()),
        ),
        None => (None, DisplayStatus::Unknown),
    };

    let metadata = {
        let entity = store.entity(group.entity_id).await?;
        let attribute = store.attribute(group.attribute_id).await?;
        ResponseMetadata {
            entity_name: entity.map(|e| e.canonical_name),
            attribute_name: attribute.map(|a| a.canonical_name),
            scope: Some(group.scope.clone()),
            computed_at: alternatives.iter().filter_map(|a| a.computed_at).max(),
        }
    };

    Ok(FactResponse {
        claim_key: Some(group.claim_key),
        truth_slider: slider,
        mode_label: label,
        best_answer,
        status_display: status,
        conflict_present: group.conflict_present,
        alternatives,
        metadata,
    })
}

/// Status when the gates refuse a best answer.
fn compute_display_status(conflict_present: bool, has_candidates: bool) -> DisplayStatus {
    if !has_candidates {
        DisplayStatus::Unknown
    } else if conflict_present {
        DisplayStatus::Disputed
    } else {
        DisplayStatus::Insufficient
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use truthledger_model::{
        compute_claim_key, Attribute, ClaimValue, Entity, FactualStatus, Source, TruthMetrics,
        ValueType,
    };
    use truthledger_store::{ClaimObservation, MemoryStore, Store};

    struct Fixture {
        store: DynStore,
        key: ClaimKey,
        entity_id: Uuid,
        claim_id: Uuid,
    }

    /// One claim, one NASA-grade evidence row, scored to the given metrics.
    async fn fixture(truth_raw: f64, independent: u32, contradiction: f64) -> Fixture {
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
            url: "https://example.com/raptor".to_string(),
            title: "Raptor specs".to_string(),
            doc_type: "technical_report".to_string(),
            content_hash: "h".to_string(),
            raw_content: "body".to_string(),
            published_at: Some(Utc::now()),
            retrieved_at: Utc::now(),
            supersedes_document_id: None,
            version_label: None,
            feed_url: None,
            created_at: Utc::now(),
        };
        let snippet = truthledger_model::Snippet {
            id: Uuid::new_v4(),
            document_id: doc.id,
            locator: "/raptor#p0:x".to_string(),
            text: "Isp of 350 s in vacuum".to_string(),
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
                domain_id: Some(7),
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

        let scope = Scope::from_pairs([("altitude", "vac")]);
        let outcome = store
            .record_claim_observation(ClaimObservation {
                entity_id: entity.id,
                attribute_id: attribute.id,
                scope: scope.clone(),
                value: ClaimValue::number(350.0, 0.85),
                unit: Some("s".to_string()),
                snippet_id: snippet.id,
                quote: "Isp of 350 s".to_string(),
                stance: Stance::Support,
                extraction_confidence: 0.85,
            })
            .await
            .unwrap();

        store
            .upsert_truth_metrics(TruthMetrics {
                claim_id: outcome.claim_id,
                claim_key: outcome.claim_key,
                truth_raw,
                support_score: truth_raw,
                contradiction_score: contradiction,
                independent_sources: independent,
                recency_score: 0.9,
                specificity_score: 1.0,
                factors: serde_json::Value::Null,
                computed_at: Utc::now(),
            })
            .await
            .unwrap();

        let key = compute_claim_key(entity.id, attribute.id, &scope).unwrap();
        Fixture {
            store,
            key,
            entity_id: entity.id,
            claim_id: outcome.claim_id,
        }
    }

    #[tokio::test]
    async fn unknown_key_returns_structured_not_found() {
        let store: DynStore = Arc::new(MemoryStore::new());
        let response = resolve_fact(
            &store,
            &DisplayPolicy::default(),
            &FactQuery::ClaimKey(ClaimKey([9u8; 32])),
            0.5,
        )
        .await
        .unwrap();
        assert_eq!(response.status_display, DisplayStatus::Unknown);
        assert!(response.best_answer.is_none());
        assert!(response.alternatives.is_empty());
    }

    #[tokio::test]
    async fn strong_claim_is_supported_at_midpoint() {
        let f = fixture(0.85, 3, 0.0).await;
        let response = resolve_fact(
            &f.store,
            &DisplayPolicy::default(),
            &FactQuery::ClaimKey(f.key),
            0.5,
        )
        .await
        .unwrap();
        assert_eq!(response.status_display, DisplayStatus::Supported);
        let best = response.best_answer.unwrap();
        assert_eq!(best.claim_id, f.claim_id);
        assert_eq!(best.value.as_number(), Some(350.0));
        assert_eq!(best.evidence.len(), 1);
        assert_eq!(response.mode_label, "Balanced");
        assert_eq!(response.metadata.entity_name.as_deref(), Some("Raptor"));
        assert_eq!(
            response.metadata.attribute_name.as_deref(),
            Some("engines.isp_s")
        );
    }

    #[tokio::test]
    async fn conservative_slider_gates_out_single_source() {
        // One independent source: the conservative gate needs two.
        let f = fixture(0.85, 1, 0.0).await;
        let response = resolve_fact(
            &f.store,
            &DisplayPolicy::default(),
            &FactQuery::ClaimKey(f.key),
            0.0,
        )
        .await
        .unwrap();
        assert!(response.best_answer.is_none());
        assert_eq!(response.status_display, DisplayStatus::Insufficient);
        assert_eq!(response.mode_label, "Conservative");

        // The assertive end accepts the same claim.
        let response = resolve_fact(
            &f.store,
            &DisplayPolicy::default(),
            &FactQuery::ClaimKey(f.key),
            1.0,
        )
        .await
        .unwrap();
        assert_eq!(response.status_display, DisplayStatus::Supported);
        assert_eq!(response.mode_label, "Assertive");
    }

    #[tokio::test]
    async fn slider_clamps_out_of_range() {
        let f = fixture(0.85, 3, 0.0).await;
        let low = resolve_fact(
            &f.store,
            &DisplayPolicy::default(),
            &FactQuery::ClaimKey(f.key),
            -5.0,
        )
        .await
        .unwrap();
        assert_eq!(low.truth_slider, 0.0);
        let high = resolve_fact(
            &f.store,
            &DisplayPolicy::default(),
            &FactQuery::ClaimKey(f.key),
            5.0,
        )
        .await
        .unwrap();
        assert_eq!(high.truth_slider, 1.0);
    }

    #[tokio::test]
    async fn field_query_resolves_via_field_link() {
        let f = fixture(0.85, 3, 0.0).await;
        // Point a field link at the raw bucket.
        f.store
            .upsert_field_link(truthledger_model::FieldLink {
                id: Uuid::new_v4(),
                entity_id: f.entity_id,
                field_name: "engines.isp_s".to_string(),
                claim_key: f.key,
                auto_update: true,
                created_at: Utc::now(),
                updated_at: Utc::now(),
            })
            .await
            .unwrap();

        let by_field = resolve_fact(
            &f.store,
            &DisplayPolicy::default(),
            &FactQuery::Field {
                entity_id: f.entity_id,
                field_name: "engines.isp_s".to_string(),
            },
            0.5,
        )
        .await
        .unwrap();
        assert_eq!(by_field.status_display, DisplayStatus::Supported);

        let by_domain = resolve_fact(
            &f.store,
            &DisplayPolicy::default(),
            &FactQuery::DomainField {
                entity_type: EntityType::Engine,
                domain_id: 7,
                field_name: "engines.isp_s".to_string(),
            },
            0.5,
        )
        .await
        .unwrap();
        assert_eq!(by_domain.status_display, DisplayStatus::Supported);

        let missing = resolve_fact(
            &f.store,
            &DisplayPolicy::default(),
            &FactQuery::Field {
                entity_id: f.entity_id,
                field_name: "engines.nonexistent".to_string(),
            },
            0.5,
        )
        .await
        .unwrap();
        assert_eq!(missing.status_display, DisplayStatus::Unknown);
    }

    #[tokio::test]
    async fn contested_group_reads_disputed() {
        let f = fixture(0.85, 3, 0.0).await;
        // Flag the group as conflicted and crank contradiction past any gate.
        let mut group = f.store.conflict_group(f.key).await.unwrap().unwrap();
        group.conflict_present = true;
        group.status_factual = FactualStatus::ActiveConflict;
        f.store.update_conflict_group(group).await.unwrap();

        let mut metrics = f.store.truth_metrics(f.claim_id).await.unwrap().unwrap();
        metrics.contradiction_score = 10.0;
        f.store.upsert_truth_metrics(metrics).await.unwrap();

        let response = resolve_fact(
            &f.store,
            &DisplayPolicy::default(),
            &FactQuery::ClaimKey(f.key),
            0.5,
        )
        .await
        .unwrap();
        assert!(response.best_answer.is_none());
        assert_eq!(response.status_display, DisplayStatus::Disputed);
        assert!(response.conflict_present);
    }
}
