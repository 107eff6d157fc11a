//! The extraction run loop.
//!
//! Loads entities and attributes into per-run caches, walks unprocessed
//! snippets oldest-first, matches entities by alias scan, runs every
//! applicable extractor, and persists each hit atomically through the store.
//! Cancellation is checked before every snippet; progress is reported every
//! ten.

use chrono::Utc;
use tracing::{debug, info};
use uuid::Uuid;

use truthledger_model::{
    report_progress, Attribute, CancelToken, ClaimValue, Entity, LedgerResult, ProgressFn,
    SnippetType, Stance, ValueBody,
};
use truthledger_store::{ClaimObservation, DynStore, Store};

use crate::patterns::{AttributeExtractor, ExtractorRegistry};
use crate::scope_infer::infer_scope;
use crate::units::{convert, parse_number};

/// Confidence model constants.
const BASE_CONFIDENCE: f64 = 0.70;
const ALIAS_PROXIMITY_BONUS: f64 = 0.15;
const TABLE_BONUS: f64 = 0.10;
const CONFIDENCE_CAP: f64 = 0.95;
/// Alias must appear within this many chars of a match to earn the bonus.
const PROXIMITY_WINDOW: usize = 200;
/// Quote window on each side of a match.
const QUOTE_WINDOW: usize = 150;

/// Extraction run options.
#[derive(Debug, Clone)]
pub struct ExtractOptions {
    /// Restrict to snippets of these documents.
    pub document_ids: Option<Vec<Uuid>>,
    /// Snippet cap per run.
    pub limit: usize,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            document_ids: None,
            limit: 1000,
        }
    }
}

/// Extraction run result.
#[derive(Debug, Clone, Default)]
pub struct ExtractReport {
    pub snippets_processed: u64,
    pub snippets_skipped_no_entity: u64,
    pub claims_created: u64,
    pub evidence_created: u64,
}

/// Run extraction over unprocessed snippets.
pub async fn run_extraction(
    store: &DynStore,
    registry: &ExtractorRegistry,
    options: &ExtractOptions,
    cancel: &CancelToken,
    progress: &ProgressFn,
) -> LedgerResult<ExtractReport> {
    // Per-run caches: entity alias map (lowercased) and attributes by name.
    let entities = store.list_entities().await?;
    let mut attributes: Vec<(String, Attribute)> = Vec::new();
    for extractor in registry.extractors() {
        let attribute = store
            .ensure_attribute(Attribute {
                id: Uuid::new_v4(),
                canonical_name: extractor.attribute.clone(),
                value_type: extractor.value_type,
                unit: Some(extractor.target_unit.clone()),
                tolerance_abs: None,
                tolerance_rel: 0.02,
                created_at: Utc::now(),
            })
            .await?;
        attributes.push((extractor.attribute.clone(), attribute));
    }

    let snippets = store
        .snippets_needing_extraction(options.document_ids.as_deref(), options.limit)
        .await?;
    let total = snippets.len() as u64;
    let mut report = ExtractReport::default();

    for (index, snippet) in snippets.iter().enumerate() {
        cancel.check()?;
        if index % 10 == 0 {
            report_progress(
                progress,
                index as u64,
                total,
                format!("extracting snippet {index}/{total}"),
            );
        }

        let text_lower = snippet.text.to_lowercase();
        let matched: Vec<&Entity> = entities
            .iter()
            .filter(|e| {
                e.all_names()
                    .any(|name| text_lower.contains(&name.to_lowercase()))
            })
            .collect();
        if matched.is_empty() {
            report.snippets_skipped_no_entity += 1;
            report.snippets_processed += 1;
            continue;
        }

        let scope = infer_scope(&text_lower);

        for entity in &matched {
            for extractor in registry.for_entity_type(entity.entity_type) {
                let Some((_, attribute)) = attributes
                    .iter()
                    .find(|(name, _)| *name == extractor.attribute)
                else {
                    continue;
                };

                for hit in find_hits(extractor, &snippet.text) {
                    cancel.check()?;

                    let confidence = compute_confidence(
                        &text_lower,
                        entity,
                        hit.match_start,
                        snippet.snippet_type,
                    );
                    let quote = quote_around(&snippet.text, hit.match_start, hit.match_end);

                    let outcome = store
                        .record_claim_observation(ClaimObservation {
                            entity_id: entity.id,
                            attribute_id: attribute.id,
                            scope: scope.clone(),
                            value: ClaimValue {
                                body: ValueBody::Number(hit.value),
                                confidence,
                            },
                            unit: Some(extractor.target_unit.clone()),
                            snippet_id: snippet.id,
                            quote,
                            stance: Stance::Support,
                            extraction_confidence: confidence,
                        })
                        .await?;

                    report.claims_created += u64::from(outcome.claim_created);
                    report.evidence_created += u64::from(outcome.evidence_created);
                    debug!(
                        entity = %entity.canonical_name,
                        attribute = %extractor.attribute,
                        value = hit.value,
                        confidence,
                        "recorded observation"
                    );
                }
            }
        }
        report.snippets_processed += 1;
    }

    report_progress(progress, total, total, "extraction complete");
    info!(
        snippets = report.snippets_processed,
        claims = report.claims_created,
        evidence = report.evidence_created,
        "extraction finished"
    );
    Ok(report)
}

/// One regex hit, value already unit-normalized.
#[derive(Debug, Clone)]
struct Hit {
    value: f64,
    match_start: usize,
    match_end: usize,
}

/// Run every pattern of an extractor over snippet text.
fn find_hits(extractor: &AttributeExtractor, text: &str) -> Vec<Hit> {
    let mut hits = Vec::new();
    for pattern in &extractor.patterns {
        for caps in pattern.captures_iter(text) {
            let full = caps.get(0).unwrap();
            let Some(value_raw) = caps.get(1) else {
                continue;
            };
            let Some(parsed) = parse_number(value_raw.as_str()) else {
                continue;
            };
            let unit = caps
                .get(2)
                .map(|m| m.as_str().to_string())
                .unwrap_or_else(|| extractor.target_unit.clone());
            hits.push(Hit {
                value: convert(parsed, &unit, &extractor.unit_factors),
                match_start: full.start(),
                match_end: full.end(),
            });
        }
    }
    hits
}

/// Base 0.70, +0.15 for alias proximity, +0.10 for table snippets, cap 0.95.
fn compute_confidence(
    text_lower: &str,
    entity: &Entity,
    match_start: usize,
    snippet_type: SnippetType,
) -> f64 {
    let mut confidence = BASE_CONFIDENCE;

    let near_alias = entity.all_names().any(|name| {
        let name = name.to_lowercase();
        let mut from = 0usize;
        while let Some(pos) = text_lower[from..].find(&name) {
            let at = from + pos;
            if at.abs_diff(match_start) <= PROXIMITY_WINDOW {
                return true;
            }
            from = at + name.len();
        }
        false
    });
    if near_alias {
        confidence += ALIAS_PROXIMITY_BONUS;
    }
    if snippet_type == SnippetType::Table {
        confidence += TABLE_BONUS;
    }
    confidence.min(CONFIDENCE_CAP)
}

/// ±150 chars around the match, ellipsis-trimmed, whitespace-collapsed.
fn quote_around(text: &str, start: usize, end: usize) -> String {
    let from = floor_char_boundary(text, start.saturating_sub(QUOTE_WINDOW));
    let to = ceil_char_boundary(text, (end + QUOTE_WINDOW).min(text.len()));

    let mut quote = String::new();
    if from > 0 {
        quote.push('…');
    }
    quote.push_str(text[from..to].trim());
    if to < text.len() {
        quote.push('…');
    }
    quote.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn floor_char_boundary(text: &str, mut index: usize) -> usize {
    while index > 0 && !text.is_char_boundary(index) {
        index -= 1;
    }
    index
}

fn ceil_char_boundary(text: &str, mut index: usize) -> usize {
    while index < text.len() && !text.is_char_boundary(index) {
        index += 1;
    }
    index
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use truthledger_model::{noop_progress, EntityType, Scope as ModelScope, Source};
    use truthledger_store::{MemoryStore, Store};

    async fn seeded(
        text: &str,
    ) -> (DynStore, Entity) {
        let store: DynStore = Arc::new(MemoryStore::new());
        let source = store
            .insert_source(Source {
                id: Uuid::new_v4(),
                name: "SpaceX".to_string(),
                source_type: "manufacturer".to_string(),
                base_trust: 0.85,
                independence_cluster_id: None,
                default_doc_type: "spec_sheet".to_string(),
                is_active: true,
                tags: vec![],
                created_at: Utc::now(),
            })
            .await
            .unwrap();

        let doc_id = Uuid::new_v4();
        let document = truthledger_model::Document {
            id: doc_id,
            source_id: source.id,
            url: "https://example.com/raptor".to_string(),
            title: "Raptor".to_string(),
            doc_type: "spec_sheet".to_string(),
            content_hash: truthledger_model::sha256_hex(text),
            raw_content: text.to_string(),
            published_at: None,
            retrieved_at: Utc::now(),
            supersedes_document_id: None,
            version_label: None,
            feed_url: None,
            created_at: Utc::now(),
        };
        let snippet = truthledger_model::Snippet {
            id: Uuid::new_v4(),
            document_id: doc_id,
            locator: "/raptor#p0:x".to_string(),
            text: text.to_string(),
            snippet_hash: truthledger_model::sha256_hex(&format!("/raptor#p0:x\0{text}")),
            snippet_type: SnippetType::Text,
            created_at: Utc::now(),
        };
        store.insert_document(document, vec![snippet]).await.unwrap();

        let entity = store
            .insert_entity(Entity {
                id: Uuid::new_v4(),
                canonical_name: "Raptor".to_string(),
                entity_type: EntityType::Engine,
                aliases: vec!["Raptor 2".to_string()],
                domain_id: Some(7),
                created_at: Utc::now(),
            })
            .await
            .unwrap();

        (store, entity)
    }

    #[tokio::test]
    async fn extracts_thrust_with_unit_conversion_and_scope() {
        let (store, entity) =
            seeded("The Raptor engine produces 2,300 kN of thrust at sea level.").await;
        let registry = ExtractorRegistry::canonical();
        let report = run_extraction(
            &store,
            &registry,
            &ExtractOptions::default(),
            &CancelToken::new(),
            &noop_progress(),
        )
        .await
        .unwrap();

        assert_eq!(report.snippets_processed, 1);
        assert_eq!(report.claims_created, 1);
        assert_eq!(report.evidence_created, 1);

        let claims = store.list_claims().await.unwrap();
        assert_eq!(claims.len(), 1);
        let claim = &claims[0];
        assert_eq!(claim.entity_id, entity.id);
        assert_eq!(claim.value.body.as_number(), Some(2_300_000.0));
        assert_eq!(claim.unit.as_deref(), Some("n"));

        let expected_scope = ModelScope::from_pairs([("altitude", "sl")]);
        assert_eq!(
            claim.scope.canonical_json().unwrap(),
            expected_scope.canonical_json().unwrap()
        );
        // Alias proximity bonus applies: 0.70 + 0.15.
        assert!((claim.value.confidence - 0.85).abs() < 1e-9);

        let details = store.evidence_details(claim.id).await.unwrap();
        assert_eq!(details.len(), 1);
        assert!(details[0].quote.contains("2,300 kN"));
        assert_eq!(details[0].stance, Stance::Support);
    }

    #[tokio::test]
    async fn rerun_creates_no_new_evidence() {
        let (store, _) = seeded("Raptor thrust of 2,300 kN at sea level.").await;
        let registry = ExtractorRegistry::canonical();
        let opts = ExtractOptions::default();
        let first = run_extraction(&store, &registry, &opts, &CancelToken::new(), &noop_progress())
            .await
            .unwrap();
        assert_eq!(first.evidence_created, 1);

        // Snippet now has evidence, so the second run selects nothing.
        let second = run_extraction(&store, &registry, &opts, &CancelToken::new(), &noop_progress())
            .await
            .unwrap();
        assert_eq!(second.snippets_processed, 0);
        assert_eq!(second.evidence_created, 0);
    }

    #[tokio::test]
    async fn snippet_without_entity_is_skipped() {
        let (store, _) = seeded("Some engine produces 1,000 kN of thrust but names no names.")
            .await;
        // Remove the only entity match by renaming the snippet's subject: the
        // seeded entity is "Raptor", which this text does not mention.
        let registry = ExtractorRegistry::canonical();
        let report = run_extraction(
            &store,
            &registry,
            &ExtractOptions::default(),
            &CancelToken::new(),
            &noop_progress(),
        )
        .await
        .unwrap();
        assert_eq!(report.snippets_skipped_no_entity, 1);
        assert_eq!(report.claims_created, 0);
    }

    #[tokio::test]
    async fn cancellation_aborts_before_work() {
        let (store, _) = seeded("Raptor thrust of 2,300 kN.").await;
        let registry = ExtractorRegistry::canonical();
        let cancel = CancelToken::new();
        cancel.cancel();
        let err = run_extraction(
            &store,
            &registry,
            &ExtractOptions::default(),
            &cancel,
            &noop_progress(),
        )
        .await
        .unwrap_err();
        assert!(err.is_cancelled());
        assert!(store.list_claims().await.unwrap().is_empty());
    }

    #[test]
    fn quote_window_is_trimmed_and_collapsed() {
        let text = format!("{} VALUE 42 kN {}", "x".repeat(400), "y".repeat(400));
        let start = 401;
        let end = start + 11;
        let quote = quote_around(&text, start, end);
        assert!(quote.starts_with('…'));
        assert!(quote.ends_with('…'));
        assert!(quote.contains("VALUE 42 kN"));
        assert!(quote.len() < 350);
    }
}
