//! Derivation: promote the best raw claim per `(entity, domain field)` into
//! a derived claim in the normalized `domain_default_v1` scope.
//!
//! Rules pick candidates (scope-filtered, optionally truth-gated) and an
//! aggregation elects one. The derived claim shares the source claim's
//! evidence and gets a FieldLink so domain fields resolve straight to its
//! bucket.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use truthledger_model::{
    compute_claim_key, report_progress, CancelToken, Claim, ClaimValue, Entity, FieldLink,
    LedgerResult, ProgressFn, Scope, ScopeValue, TruthMetrics, ValueBody,
};
use truthledger_store::{DynStore, FieldLinkOutcome, Store};

/// Scope profile derived claims are normalized into.
pub const DOMAIN_PROFILE: &str = "domain_default_v1";

/// How a rule elects one claim from its candidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Aggregation {
    BestSupported,
    Latest,
    Max,
    Min,
    Average,
}

/// One derivation rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DerivationRule {
    /// Source attribute canonical name.
    pub attribute: String,
    /// Target domain field, e.g. `engines.thrust_n`.
    pub field_name: String,
    /// Subset-match filter on raw claim scopes.
    #[serde(default)]
    pub scope_filter: Scope,
    pub aggregation: Aggregation,
    /// Exclude scored claims below this; unscored claims always pass.
    #[serde(default)]
    pub min_truth_raw: Option<f64>,
}

impl DerivationRule {
    /// Rules follow the attribute namespace, so applicability matches the
    /// extractors'.
    pub fn applies_to(&self, entity: &Entity) -> bool {
        self.attribute
            .starts_with(entity.entity_type.attribute_namespace())
    }
}

/// The shipped rule set: one best-supported rule per canonical attribute.
pub fn default_rules() -> Vec<DerivationRule> {
    vec![
        DerivationRule {
            attribute: "engines.isp_s".to_string(),
            field_name: "engines.isp_s".to_string(),
            scope_filter: Scope::from_pairs([("altitude", "vac")]),
            aggregation: Aggregation::BestSupported,
            min_truth_raw: Some(0.5),
        },
        DerivationRule {
            attribute: "engines.thrust_n".to_string(),
            field_name: "engines.thrust_n".to_string(),
            scope_filter: Scope::from_pairs([("altitude", "sl")]),
            aggregation: Aggregation::BestSupported,
            min_truth_raw: None,
        },
        DerivationRule {
            attribute: "engines.mass_kg".to_string(),
            field_name: "engines.mass_kg".to_string(),
            scope_filter: Scope::new(),
            aggregation: Aggregation::BestSupported,
            min_truth_raw: None,
        },
        DerivationRule {
            attribute: "engines.chamber_pressure_bar".to_string(),
            field_name: "engines.chamber_pressure_bar".to_string(),
            scope_filter: Scope::new(),
            aggregation: Aggregation::BestSupported,
            min_truth_raw: None,
        },
        DerivationRule {
            attribute: "launch_vehicles.payload_to_leo_kg".to_string(),
            field_name: "launch_vehicles.payload_to_leo_kg".to_string(),
            scope_filter: Scope::new(),
            aggregation: Aggregation::BestSupported,
            min_truth_raw: None,
        },
    ]
}

/// Derivation run options.
#[derive(Debug, Clone, Default)]
pub struct DeriveOptions {
    /// Restrict to these entities.
    pub entity_ids: Option<Vec<Uuid>>,
}

/// Derivation run result.
#[derive(Debug, Clone, Default)]
pub struct DeriveReport {
    pub entities_processed: u64,
    pub claims_derived: u64,
    pub links_created: u64,
    pub links_updated: u64,
    pub evidence_copied: u64,
}

/// Run derivation for every entity (canonical-name order), one rule at a
/// time. Cancellation is checked per entity; progress reported every five.
pub async fn run_derivation(
    store: &DynStore,
    rules: &[DerivationRule],
    options: &DeriveOptions,
    cancel: &CancelToken,
    progress: &ProgressFn,
) -> LedgerResult<DeriveReport> {
    let entities: Vec<Entity> = store
        .list_entities()
        .await?
        .into_iter()
        .filter(|e| match &options.entity_ids {
            Some(ids) => ids.contains(&e.id),
            None => true,
        })
        .collect();
    let total = entities.len() as u64;
    let mut report = DeriveReport::default();

    for (index, entity) in entities.iter().enumerate() {
        cancel.check()?;
        if index % 5 == 0 {
            report_progress(
                progress,
                index as u64,
                total,
                format!("deriving {}", entity.canonical_name),
            );
        }

        for rule in rules.iter().filter(|r| r.applies_to(entity)) {
            cancel.check()?;
            let Some(attribute) = store.attribute_by_name(&rule.attribute).await? else {
                continue;
            };

            let mut candidates: Vec<(Claim, Option<TruthMetrics>)> = store
                .raw_claims_with_truth(entity.id, attribute.id)
                .await?
                .into_iter()
                .filter(|(claim, metrics)| {
                    claim.scope.is_superset_of(&rule.scope_filter)
                        && match (rule.min_truth_raw, metrics) {
                            (Some(min), Some(m)) => m.truth_raw >= min,
                            _ => true,
                        }
                })
                .collect();
            if candidates.is_empty() {
                continue;
            }

            // truth_raw DESC NULLS LAST, then created_at DESC.
            candidates.sort_by(|(ca, ma), (cb, mb)| {
                let ta = ma.as_ref().map(|m| m.truth_raw);
                let tb = mb.as_ref().map(|m| m.truth_raw);
                match (tb, ta) {
                    (Some(x), Some(y)) => x
                        .partial_cmp(&y)
                        .unwrap_or(std::cmp::Ordering::Equal)
                        .then_with(|| cb.created_at.cmp(&ca.created_at)),
                    (Some(_), None) => std::cmp::Ordering::Greater,
                    (None, Some(_)) => std::cmp::Ordering::Less,
                    (None, None) => cb.created_at.cmp(&ca.created_at),
                }
            });

            let Some((chosen, value)) = elect(&candidates, rule.aggregation) else {
                continue;
            };

            let mut domain_scope = Scope::new();
            domain_scope.insert_text("profile", DOMAIN_PROFILE);
            domain_scope.insert_text("field", rule.field_name.clone());
            domain_scope.insert(
                "derived_from_scope",
                ScopeValue::Nested(chosen.scope.clone()),
            );
            let derived_key = compute_claim_key(entity.id, attribute.id, &domain_scope)?;

            let now = Utc::now();
            let outcome = store
                .insert_derived_claim(Claim {
                    id: Uuid::new_v4(),
                    claim_key: derived_key,
                    entity_id: entity.id,
                    attribute_id: attribute.id,
                    value,
                    unit: chosen.unit.clone(),
                    scope: domain_scope,
                    valid_from: None,
                    valid_to: None,
                    is_derived: true,
                    derived_from_claim_id: Some(chosen.id),
                    created_at: now,
                    updated_at: now,
                })
                .await?;
            report.claims_derived += u64::from(outcome.created);
            report.evidence_copied += outcome.evidence_copied as u64;

            let link_outcome = store
                .upsert_field_link(FieldLink {
                    id: Uuid::new_v4(),
                    entity_id: entity.id,
                    field_name: rule.field_name.clone(),
                    claim_key: derived_key,
                    auto_update: true,
                    created_at: now,
                    updated_at: now,
                })
                .await?;
            match link_outcome {
                FieldLinkOutcome::Inserted => report.links_created += 1,
                FieldLinkOutcome::Updated => report.links_updated += 1,
                FieldLinkOutcome::Unchanged => {}
            }

            debug!(
                entity = %entity.canonical_name,
                field = %rule.field_name,
                derived = outcome.created,
                "derivation rule applied"
            );
        }
        report.entities_processed += 1;
    }

    report_progress(progress, total, total, "derivation complete");
    info!(
        entities = report.entities_processed,
        derived = report.claims_derived,
        links = report.links_created + report.links_updated,
        "derivation finished"
    );
    Ok(report)
}

/// Elect one claim (and its value) per the aggregation. Candidates arrive
/// pre-sorted best-supported first.
fn elect(
    candidates: &[(Claim, Option<TruthMetrics>)],
    aggregation: Aggregation,
) -> Option<(Claim, ClaimValue)> {
    match aggregation {
        Aggregation::BestSupported => candidates
            .first()
            .map(|(c, _)| (c.clone(), c.value.clone())),
        Aggregation::Latest => candidates
            .iter()
            .max_by_key(|(c, _)| c.created_at)
            .map(|(c, _)| (c.clone(), c.value.clone())),
        Aggregation::Max => candidates
            .iter()
            .filter(|(c, _)| c.value.body.as_number().is_some())
            .max_by(|(a, _), (b, _)| {
                compare_numbers(a.value.body.as_number(), b.value.body.as_number())
            })
            .map(|(c, _)| (c.clone(), c.value.clone())),
        Aggregation::Min => candidates
            .iter()
            .filter(|(c, _)| c.value.body.as_number().is_some())
            .min_by(|(a, _), (b, _)| {
                compare_numbers(a.value.body.as_number(), b.value.body.as_number())
            })
            .map(|(c, _)| (c.clone(), c.value.clone())),
        Aggregation::Average => {
            let numbers: Vec<f64> = candidates
                .iter()
                .filter_map(|(c, _)| c.value.body.as_number())
                .collect();
            if numbers.is_empty() {
                return None;
            }
            let mean = numbers.iter().sum::<f64>() / numbers.len() as f64;
            // Synthetic copy of the first candidate, value replaced.
            candidates.first().map(|(c, _)| {
                (
                    c.clone(),
                    ClaimValue {
                        body: ValueBody::Number(mean),
                        confidence: c.value.confidence,
                    },
                )
            })
        }
    }
}

fn compare_numbers(a: Option<f64>, b: Option<f64>) -> std::cmp::Ordering {
    a.partial_cmp(&b).unwrap_or(std::cmp::Ordering::Equal)
}
