//! Conflict detection over claim-key buckets.
//!
//! Claims in a group partition into equivalence classes under the
//! attribute's numeric tolerance. One class is consensus; several classes
//! get arbitrated: versioning first (a clearly newer class wins), then
//! evidence quality (a clearly better-supported class leads), else the group
//! goes to human review.

use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use tracing::{debug, info};
use uuid::Uuid;

use truthledger_model::{
    report_progress, Attribute, CancelToken, Claim, FactualStatus, LedgerResult, ProgressFn,
    ReviewItemType, ReviewQueueItem, ReviewStatus, ValueBody,
};
use truthledger_store::{DynStore, Store};

/// A newer value class must be at least this much newer to win by versioning.
const VERSIONING_MIN_AGE_GAP_DAYS: i64 = 180;
/// The leading class must have at least twice the runner-up's evidence (and
/// at least this many rows) to win by evidence quality.
const EVIDENCE_DOMINANCE_FACTOR: usize = 2;
const EVIDENCE_DOMINANCE_MIN: usize = 2;

const REVIEW_REASON: &str = "Multiple conflicting values with comparable evidence";

/// Detection run options.
#[derive(Debug, Clone)]
pub struct DetectOptions {
    /// Re-check groups that already have a verdict.
    pub force_recheck: bool,
    /// Group cap per run.
    pub limit: usize,
}

impl Default for DetectOptions {
    fn default() -> Self {
        Self {
            force_recheck: false,
            limit: 500,
        }
    }
}

/// Detection run result.
#[derive(Debug, Clone, Default)]
pub struct ConflictReport {
    pub groups_checked: u64,
    pub no_conflict: u64,
    pub resolved_by_versioning: u64,
    pub active_conflict: u64,
    pub needs_review: u64,
    pub review_items_created: u64,
}

/// One equivalence class of claims agreeing on a value.
#[derive(Debug, Clone)]
struct ValueClass {
    representative: ValueBody,
    claim_ids: Vec<Uuid>,
    evidence_total: usize,
    newest_evidence: Option<DateTime<Utc>>,
}

/// Classify each selected conflict group and persist the verdicts.
pub async fn run_conflict_detection(
    store: &DynStore,
    options: &DetectOptions,
    cancel: &CancelToken,
    progress: &ProgressFn,
) -> LedgerResult<ConflictReport> {
    let groups = store
        .conflict_groups_to_check(options.force_recheck, options.limit)
        .await?;
    let total = groups.len() as u64;
    let mut report = ConflictReport::default();

    for (index, group) in groups.into_iter().enumerate() {
        cancel.check()?;
        if index % 10 == 0 {
            report_progress(
                progress,
                index as u64,
                total,
                format!("checking group {index}/{total}"),
            );
        }

        let claims = store.claims_in_group(group.claim_key).await?;
        let attribute = store.attribute(group.attribute_id).await?;

        let mut classes: Vec<ValueClass> = Vec::new();
        for claim in &claims {
            cancel.check()?;
            let stats = store.claim_evidence_stats(claim.id).await?;
            match classes
                .iter_mut()
                .find(|c| values_equivalent(&c.representative, &claim.value.body, attribute.as_ref()))
            {
                Some(class) => {
                    class.claim_ids.push(claim.id);
                    class.evidence_total += stats.evidence_count;
                    class.newest_evidence = max_date(class.newest_evidence, stats.newest_published);
                }
                None => classes.push(ValueClass {
                    representative: claim.value.body.clone(),
                    claim_ids: vec![claim.id],
                    evidence_total: stats.evidence_count,
                    newest_evidence: stats.newest_published,
                }),
            }
        }

        let verdict = classify(&claims, &classes);
        debug!(
            group = %group.claim_key,
            claims = claims.len(),
            classes = classes.len(),
            status = ?verdict.status,
            "group classified"
        );

        let mut updated = group.clone();
        updated.conflict_present = verdict.conflict_present;
        updated.status_factual = verdict.status;
        updated.metadata = merge_metadata(&group.metadata, verdict.details);
        store.update_conflict_group(updated).await?;

        match verdict.status {
            FactualStatus::NoConflict => report.no_conflict += 1,
            FactualStatus::ResolvedByVersioning => report.resolved_by_versioning += 1,
            FactualStatus::ActiveConflict => report.active_conflict += 1,
            FactualStatus::NeedsReview => {
                report.needs_review += 1;
                let created = store
                    .enqueue_review(ReviewQueueItem {
                        id: Uuid::new_v4(),
                        item_type: ReviewItemType::ConflictGroup,
                        item_ref: group.claim_key.to_hex(),
                        reason: REVIEW_REASON.to_string(),
                        priority: 5,
                        status: ReviewStatus::Pending,
                        notes: None,
                        resolved_at: None,
                        resolved_by: None,
                        created_at: Utc::now(),
                    })
                    .await?;
                report.review_items_created += u64::from(created);
            }
            FactualStatus::Unknown => {}
        }
        report.groups_checked += 1;
    }

    report_progress(progress, total, total, "conflict detection complete");
    info!(
        checked = report.groups_checked,
        conflicts = report.active_conflict + report.needs_review + report.resolved_by_versioning,
        review = report.needs_review,
        "conflict detection finished"
    );
    Ok(report)
}

struct Verdict {
    status: FactualStatus,
    conflict_present: bool,
    details: serde_json::Value,
}

fn classify(claims: &[Claim], classes: &[ValueClass]) -> Verdict {
    if claims.len() <= 1 || classes.len() <= 1 {
        return Verdict {
            status: FactualStatus::NoConflict,
            conflict_present: false,
            details: json!({"value_classes": classes.len(), "claims": claims.len()}),
        };
    }

    // Versioning: newest class wins if clearly newer and at least as well
    // evidenced as the runner-up.
    let mut by_date: Vec<&ValueClass> = classes.iter().collect();
    by_date.sort_by_key(|c| std::cmp::Reverse(c.newest_evidence));
    if let (Some(newest), Some(runner_up)) = (by_date.first(), by_date.get(1)) {
        if let (Some(newest_date), Some(runner_date)) =
            (newest.newest_evidence, runner_up.newest_evidence)
        {
            let gap = newest_date - runner_date;
            if gap >= Duration::days(VERSIONING_MIN_AGE_GAP_DAYS)
                && newest.evidence_total >= runner_up.evidence_total
            {
                return Verdict {
                    status: FactualStatus::ResolvedByVersioning,
                    conflict_present: true,
                    details: json!({
                        "conflict_type": "value_disagreement",
                        "value_classes": classes.len(),
                        "newest_value": newest.representative.display(),
                        "age_gap_days": gap.num_days(),
                    }),
                };
            }
        }
    }

    // Evidence quality: a class with twice the runner-up's evidence leads.
    let mut by_evidence: Vec<&ValueClass> = classes.iter().collect();
    by_evidence.sort_by_key(|c| std::cmp::Reverse(c.evidence_total));
    let top = by_evidence[0];
    let second = by_evidence[1];
    if top.evidence_total >= EVIDENCE_DOMINANCE_FACTOR * second.evidence_total
        && top.evidence_total >= EVIDENCE_DOMINANCE_MIN
    {
        return Verdict {
            status: FactualStatus::ActiveConflict,
            conflict_present: true,
            details: json!({
                "conflict_type": "value_disagreement",
                "value_classes": classes.len(),
                "leading_value": top.representative.display(),
                "leading_evidence": top.evidence_total,
                "runner_up_evidence": second.evidence_total,
            }),
        };
    }

    Verdict {
        status: FactualStatus::NeedsReview,
        conflict_present: true,
        details: json!({
            "conflict_type": "value_disagreement",
            "value_classes": classes.len(),
            "reason": REVIEW_REASON,
        }),
    }
}

/// Type mismatches never compare equal; numbers use the attribute tolerance;
/// everything else is strict equality.
fn values_equivalent(a: &ValueBody, b: &ValueBody, attribute: Option<&Attribute>) -> bool {
    match (a, b) {
        (ValueBody::Number(x), ValueBody::Number(y)) => match attribute {
            Some(attr) => attr.numbers_equivalent(*x, *y),
            None => {
                // Tolerance defaults when the attribute row is unavailable.
                (x - y).abs() <= 0.02 * x.abs().max(y.abs())
            }
        },
        (ValueBody::String(x), ValueBody::String(y)) => x == y,
        (ValueBody::Enum(x), ValueBody::Enum(y)) => x == y,
        (ValueBody::Bool(x), ValueBody::Bool(y)) => x == y,
        _ => false,
    }
}

fn max_date(a: Option<DateTime<Utc>>, b: Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
    match (a, b) {
        (Some(x), Some(y)) => Some(x.max(y)),
        (x, None) => x,
        (None, y) => y,
    }
}

/// Merge detector details into the group's metadata under a stable key.
fn merge_metadata(existing: &serde_json::Value, details: serde_json::Value) -> serde_json::Value {
    let mut base = match existing {
        serde_json::Value::Object(map) => map.clone(),
        _ => serde_json::Map::new(),
    };
    base.insert("conflict_detection".to_string(), details);
    serde_json::Value::Object(base)
}
