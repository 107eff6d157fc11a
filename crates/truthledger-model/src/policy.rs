//! Scoring and display policy tables.
//!
//! These are the tunable constants the scorer and resolver interpolate over.
//! The defaults pin the shipped behavior; tests in the scorer and resolver
//! crates assert table-driven values against them.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

// ============================================================================
// Scoring policy
// ============================================================================

/// Constants feeding `truth_raw` computation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringPolicy {
    /// Weight multiplier per document type; unknown types use the `other`
    /// entry.
    pub doc_type_multipliers: HashMap<String, f64>,
    /// Document types whose aggregate support is capped relative to
    /// high-quality support.
    pub low_quality_doc_types: HashSet<String>,
    /// Low-quality support may contribute at most this ratio of high-quality
    /// support.
    pub low_quality_cap_ratio: f64,
    /// Uncertainty prior `k` in `support / (support + contradiction + k)`.
    pub prior_k: f64,
    /// Half-life of the recency decay, in days.
    pub recency_half_life_days: f64,
    /// Lower bound of the recency decay for dated, non-superseded documents.
    pub recency_floor: f64,
    /// Flat recency for documents that have a successor.
    pub superseded_recency: f64,
    /// Recency for documents with no publish date.
    pub undated_recency: f64,
}

impl Default for ScoringPolicy {
    fn default() -> Self {
        let doc_type_multipliers = HashMap::from([
            ("technical_report".to_string(), 1.0),
            ("spec_sheet".to_string(), 1.0),
            ("press_release".to_string(), 0.8),
            ("news_article".to_string(), 0.7),
            ("wiki".to_string(), 0.5),
            ("blog_post".to_string(), 0.4),
            ("forum_post".to_string(), 0.2),
            ("other".to_string(), 0.5),
        ]);
        let low_quality_doc_types = HashSet::from([
            "forum_post".to_string(),
            "blog_post".to_string(),
            "wiki".to_string(),
        ]);
        Self {
            doc_type_multipliers,
            low_quality_doc_types,
            low_quality_cap_ratio: 0.5,
            prior_k: 1.0,
            recency_half_life_days: 730.0,
            recency_floor: 0.05,
            superseded_recency: 0.1,
            undated_recency: 0.5,
        }
    }
}

impl ScoringPolicy {
    /// Multiplier for a document type, falling back to `other`.
    pub fn doc_type_multiplier(&self, doc_type: &str) -> f64 {
        self.doc_type_multipliers
            .get(doc_type)
            .or_else(|| self.doc_type_multipliers.get("other"))
            .copied()
            .unwrap_or(0.5)
    }

    pub fn is_low_quality(&self, doc_type: &str) -> bool {
        self.low_quality_doc_types.contains(doc_type)
    }

    /// Exponential half-life decay over document age. Superseded documents
    /// score a flat low value regardless of age; undated documents score a
    /// neutral constant.
    pub fn recency_score(&self, age_days: Option<f64>, is_superseded: bool) -> f64 {
        if is_superseded {
            return self.superseded_recency;
        }
        match age_days {
            None => self.undated_recency,
            Some(age) => {
                let age = age.max(0.0);
                let decay = 0.5_f64.powf(age / self.recency_half_life_days);
                decay.max(self.recency_floor)
            }
        }
    }

    /// Diminishing returns within an independence cluster: the k-th evidence
    /// row (1-based, most recent first) weighs `1/k`.
    pub fn cluster_weight(&self, position_in_cluster: usize) -> f64 {
        1.0 / (position_in_cluster.max(1) as f64)
    }
}

// ============================================================================
// Display policy
// ============================================================================

/// Gates applied to the resolver's best answer at one end of the slider.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DisplayGates {
    pub min_truth: f64,
    pub min_independent_sources: f64,
    pub max_allowed_contradiction: f64,
    pub tie_margin: f64,
}

/// Slider-interpolated display thresholds. `conservative` is the slider=0
/// row, `assertive` the slider=1 row; intermediate sliders interpolate
/// linearly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisplayPolicy {
    pub conservative: DisplayGates,
    pub assertive: DisplayGates,
}

impl Default for DisplayPolicy {
    fn default() -> Self {
        Self {
            conservative: DisplayGates {
                min_truth: 0.75,
                min_independent_sources: 2.0,
                max_allowed_contradiction: 0.35,
                tie_margin: 0.15,
            },
            assertive: DisplayGates {
                min_truth: 0.40,
                min_independent_sources: 1.0,
                max_allowed_contradiction: 1.5,
                tie_margin: 0.02,
            },
        }
    }
}

impl DisplayPolicy {
    /// Gate thresholds at a given slider position (slider clamped to [0, 1]).
    pub fn gates_at(&self, slider: f64) -> DisplayGates {
        let t = slider.clamp(0.0, 1.0);
        let lerp = |a: f64, b: f64| a + (b - a) * t;
        DisplayGates {
            min_truth: lerp(self.conservative.min_truth, self.assertive.min_truth),
            min_independent_sources: lerp(
                self.conservative.min_independent_sources,
                self.assertive.min_independent_sources,
            ),
            max_allowed_contradiction: lerp(
                self.conservative.max_allowed_contradiction,
                self.assertive.max_allowed_contradiction,
            ),
            tie_margin: lerp(self.conservative.tie_margin, self.assertive.tie_margin),
        }
    }
}

/// Adjust `truth_raw` by the caller's confidence dial.
///
/// Exponent warp: `truth_raw ^ 2^(1 - 2*slider)`. At slider 0.5 the exponent
/// is 1 (identity); below it the exponent exceeds 1 (conservative, scores
/// pushed down); above it the exponent drops below 1 (assertive, scores
/// pulled up). Monotone non-decreasing in both arguments on [0, 1].
pub fn compute_truth_display(truth_raw: f64, slider: f64) -> f64 {
    let raw = truth_raw.clamp(0.0, 1.0);
    let t = slider.clamp(0.0, 1.0);
    let exponent = 2.0_f64.powf(1.0 - 2.0 * t);
    raw.powf(exponent)
}

/// Human label for a slider position.
pub fn mode_label(slider: f64) -> &'static str {
    let t = slider.clamp(0.0, 1.0);
    if t < 0.33 {
        "Conservative"
    } else if t < 0.67 {
        "Balanced"
    } else {
        "Assertive"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn doc_type_multiplier_falls_back_to_other() {
        let policy = ScoringPolicy::default();
        assert_relative_eq!(policy.doc_type_multiplier("technical_report"), 1.0);
        assert_relative_eq!(policy.doc_type_multiplier("forum_post"), 0.2);
        assert_relative_eq!(policy.doc_type_multiplier("carrier_pigeon"), 0.5);
    }

    #[test]
    fn recency_curve_pinned_values() {
        let policy = ScoringPolicy::default();
        // Fresh document: full weight.
        assert_relative_eq!(policy.recency_score(Some(0.0), false), 1.0);
        // One half-life: half weight.
        assert_relative_eq!(policy.recency_score(Some(730.0), false), 0.5, epsilon = 1e-9);
        // Two half-lives: quarter weight.
        assert_relative_eq!(
            policy.recency_score(Some(1460.0), false),
            0.25,
            epsilon = 1e-9
        );
        // Ancient documents hit the floor.
        assert_relative_eq!(policy.recency_score(Some(40_000.0), false), 0.05);
        // Supersession dominates age.
        assert_relative_eq!(policy.recency_score(Some(0.0), true), 0.1);
        // Undated documents get the neutral constant.
        assert_relative_eq!(policy.recency_score(None, false), 0.5);
    }

    #[test]
    fn cluster_weights_are_harmonic() {
        let policy = ScoringPolicy::default();
        assert_relative_eq!(policy.cluster_weight(1), 1.0);
        assert_relative_eq!(policy.cluster_weight(2), 0.5);
        assert_relative_eq!(policy.cluster_weight(3), 1.0 / 3.0);
        // Position zero is treated as first.
        assert_relative_eq!(policy.cluster_weight(0), 1.0);
    }

    #[test]
    fn truth_display_identity_at_midpoint() {
        for raw in [0.0, 0.25, 0.5, 0.9, 1.0] {
            assert_relative_eq!(compute_truth_display(raw, 0.5), raw, epsilon = 1e-12);
        }
    }

    #[test]
    fn truth_display_conservative_and_assertive() {
        let raw = 0.6;
        assert!(compute_truth_display(raw, 0.0) < raw);
        assert!(compute_truth_display(raw, 1.0) > raw);
        // Slider out of range clamps.
        assert_relative_eq!(
            compute_truth_display(raw, -3.0),
            compute_truth_display(raw, 0.0)
        );
        assert_relative_eq!(
            compute_truth_display(raw, 7.0),
            compute_truth_display(raw, 1.0)
        );
    }

    #[test]
    fn truth_display_is_monotone() {
        let mut prev = 0.0;
        for i in 0..=20 {
            let raw = i as f64 / 20.0;
            let d = compute_truth_display(raw, 0.2);
            assert!(d >= prev);
            prev = d;
        }
        let mut prev = 0.0;
        for i in 0..=20 {
            let slider = i as f64 / 20.0;
            let d = compute_truth_display(0.6, slider);
            assert!(d >= prev);
            prev = d;
        }
    }

    #[test]
    fn gates_interpolate_linearly() {
        let policy = DisplayPolicy::default();
        let mid = policy.gates_at(0.5);
        assert_relative_eq!(mid.min_truth, (0.75 + 0.40) / 2.0);
        assert_relative_eq!(mid.min_independent_sources, 1.5);
        let low = policy.gates_at(-1.0);
        assert_relative_eq!(low.min_truth, 0.75);
    }

    #[test]
    fn mode_labels() {
        assert_eq!(mode_label(0.0), "Conservative");
        assert_eq!(mode_label(0.32), "Conservative");
        assert_eq!(mode_label(0.5), "Balanced");
        assert_eq!(mode_label(0.67), "Assertive");
        assert_eq!(mode_label(1.0), "Assertive");
    }
}
