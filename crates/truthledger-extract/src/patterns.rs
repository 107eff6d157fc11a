//! The extractor registry and its canonical members.
//!
//! Each extractor targets one attribute with an ordered regex list: capture
//! group 1 is the value, optional group 2 the unit. Extra extractors can be
//! registered from config; their patterns are validated on load.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use truthledger_model::{EntityType, LedgerError, LedgerResult, ValueType};

use crate::units::{isp_factors, mass_factors, pressure_factors, thrust_factors};

/// A compiled per-attribute extractor.
#[derive(Debug, Clone)]
pub struct AttributeExtractor {
    /// Full attribute canonical name, e.g. `engines.isp_s`.
    pub attribute: String,
    /// Ordered patterns; group 1 = value, optional group 2 = unit.
    pub patterns: Vec<Regex>,
    /// Unit claims are stored in.
    pub target_unit: String,
    /// Lowercase unit → factor into the target unit.
    pub unit_factors: HashMap<String, f64>,
    /// Attribute value type for on-demand attribute creation.
    pub value_type: ValueType,
}

impl AttributeExtractor {
    /// True iff this extractor's attribute belongs to the entity type's
    /// namespace (`engines.*` for engines, `launch_vehicles.*` for launch
    /// vehicles).
    pub fn applies_to(&self, entity_type: EntityType) -> bool {
        self.attribute.starts_with(entity_type.attribute_namespace())
    }
}

/// Serializable extractor definition (config-registered extractors).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractorSpec {
    pub attribute: String,
    pub patterns: Vec<String>,
    pub target_unit: String,
    #[serde(default)]
    pub unit_factors: HashMap<String, f64>,
}

impl ExtractorSpec {
    /// Compile, rejecting invalid regexes and patterns without a value group.
    pub fn compile(&self) -> LedgerResult<AttributeExtractor> {
        if self.patterns.is_empty() {
            return Err(LedgerError::Validation(format!(
                "extractor {}: no patterns",
                self.attribute
            )));
        }
        let mut patterns = Vec::with_capacity(self.patterns.len());
        for raw in &self.patterns {
            let regex = Regex::new(raw).map_err(|e| {
                LedgerError::Validation(format!("extractor {}: bad regex: {e}", self.attribute))
            })?;
            if regex.captures_len() < 2 {
                return Err(LedgerError::Validation(format!(
                    "extractor {}: pattern has no value capture group",
                    self.attribute
                )));
            }
            patterns.push(regex);
        }
        let unit_factors = self
            .unit_factors
            .iter()
            .map(|(k, v)| (k.to_lowercase(), *v))
            .collect();
        Ok(AttributeExtractor {
            attribute: self.attribute.clone(),
            patterns,
            target_unit: self.target_unit.clone(),
            unit_factors,
            value_type: ValueType::Number,
        })
    }
}

/// The set of extractors an extraction run uses.
#[derive(Debug, Clone)]
pub struct ExtractorRegistry {
    extractors: Vec<AttributeExtractor>,
}

impl ExtractorRegistry {
    /// The five canonical extractors.
    pub fn canonical() -> Self {
        Self {
            extractors: canonical_extractors(),
        }
    }

    pub fn empty() -> Self {
        Self {
            extractors: Vec::new(),
        }
    }

    /// Register an additional extractor from its spec.
    pub fn register(&mut self, spec: &ExtractorSpec) -> LedgerResult<()> {
        self.extractors.push(spec.compile()?);
        Ok(())
    }

    pub fn extractors(&self) -> &[AttributeExtractor] {
        &self.extractors
    }

    pub fn for_entity_type(
        &self,
        entity_type: EntityType,
    ) -> impl Iterator<Item = &AttributeExtractor> {
        self.extractors
            .iter()
            .filter(move |e| e.applies_to(entity_type))
    }
}

/// Build the canonical extractor set: specific impulse, thrust, dry mass,
/// chamber pressure, payload to LEO.
pub fn canonical_extractors() -> Vec<AttributeExtractor> {
    vec![
        AttributeExtractor {
            attribute: "engines.isp_s".to_string(),
            patterns: vec![
                // "specific impulse of 350 s", "Isp: 311 seconds", "vacuum Isp of 380"
                Regex::new(
                    r"(?i)(?:specific impulse|isp)\s*(?:of|is|:|=)?\s*(?:about|around|approximately|~)?\s*([\d,]+(?:\.\d+)?)\s*(s|sec|seconds)?\b",
                )
                .unwrap(),
            ],
            target_unit: "s".to_string(),
            unit_factors: isp_factors(),
            value_type: ValueType::Number,
        },
        AttributeExtractor {
            attribute: "engines.thrust_n".to_string(),
            patterns: vec![
                // "produces 2,300 kN of thrust", "thrust of 845 kN"
                Regex::new(
                    r"(?i)(?:produces|generates|delivers|thrust\s+(?:of|is|:|=)?)\s*(?:about|around|approximately|~)?\s*([\d,]+(?:\.\d+)?)\s*(n|kn|mn|lbf|klbf)\b",
                )
                .unwrap(),
                // "2,300 kN of thrust"
                Regex::new(r"(?i)([\d,]+(?:\.\d+)?)\s*(kn|mn|lbf|klbf)\s+(?:of\s+)?thrust").unwrap(),
            ],
            target_unit: "n".to_string(),
            unit_factors: thrust_factors(),
            value_type: ValueType::Number,
        },
        AttributeExtractor {
            attribute: "engines.mass_kg".to_string(),
            patterns: vec![
                // "dry mass of 1,600 kg", "mass: 470 kg", "weighs 1.6 t"
                Regex::new(
                    r"(?i)(?:dry\s+)?(?:mass|weight)\s*(?:of|is|:|=)?\s*([\d,]+(?:\.\d+)?)\s*(kg|t|tonnes?|lbs?)\b",
                )
                .unwrap(),
                Regex::new(r"(?i)weighs\s*(?:about|around|~)?\s*([\d,]+(?:\.\d+)?)\s*(kg|t|tonnes?|lbs?)\b")
                    .unwrap(),
            ],
            target_unit: "kg".to_string(),
            unit_factors: mass_factors(),
            value_type: ValueType::Number,
        },
        AttributeExtractor {
            attribute: "engines.chamber_pressure_bar".to_string(),
            patterns: vec![
                Regex::new(
                    r"(?i)chamber pressure\s*(?:of|is|:|=)?\s*(?:about|around|~)?\s*([\d,]+(?:\.\d+)?)\s*(bar|mpa|psi|atm)\b",
                )
                .unwrap(),
            ],
            target_unit: "bar".to_string(),
            unit_factors: pressure_factors(),
            value_type: ValueType::Number,
        },
        AttributeExtractor {
            attribute: "launch_vehicles.payload_to_leo_kg".to_string(),
            patterns: vec![
                // "22,800 kg to LEO", "17.8 t to low Earth orbit"
                Regex::new(
                    r"(?i)([\d,]+(?:\.\d+)?)\s*(kg|t|tonnes?|lbs?)\s+(?:of payload\s+)?to\s+(?:leo|low earth orbit)",
                )
                .unwrap(),
                // "payload to LEO of 22,800 kg"
                Regex::new(
                    r"(?i)payload\s+to\s+(?:leo|low earth orbit)\s*(?:of|is|:|=)?\s*([\d,]+(?:\.\d+)?)\s*(kg|t|tonnes?|lbs?)\b",
                )
                .unwrap(),
            ],
            target_unit: "kg".to_string(),
            unit_factors: mass_factors(),
            value_type: ValueType::Number,
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_set_has_five_extractors() {
        let registry = ExtractorRegistry::canonical();
        assert_eq!(registry.extractors().len(), 5);
        let engine_count = registry.for_entity_type(EntityType::Engine).count();
        assert_eq!(engine_count, 4);
        let lv_count = registry.for_entity_type(EntityType::LaunchVehicle).count();
        assert_eq!(lv_count, 1);
    }

    #[test]
    fn thrust_pattern_captures_value_and_unit() {
        let registry = ExtractorRegistry::canonical();
        let thrust = registry
            .extractors()
            .iter()
            .find(|e| e.attribute == "engines.thrust_n")
            .unwrap();
        let caps = thrust.patterns[0]
            .captures("The Raptor engine produces 2,300 kN of thrust at sea level.")
            .unwrap();
        assert_eq!(&caps[1], "2,300");
        assert_eq!(&caps[2], "kN");
    }

    #[test]
    fn isp_pattern_matches_without_unit() {
        let registry = ExtractorRegistry::canonical();
        let isp = registry
            .extractors()
            .iter()
            .find(|e| e.attribute == "engines.isp_s")
            .unwrap();
        let caps = isp.patterns[0]
            .captures("vacuum specific impulse of 380")
            .unwrap();
        assert_eq!(&caps[1], "380");
        assert!(caps.get(2).is_none());
    }

    #[test]
    fn spec_compile_validates_patterns() {
        let bad_regex = ExtractorSpec {
            attribute: "engines.burn_time_s".to_string(),
            patterns: vec!["([".to_string()],
            target_unit: "s".to_string(),
            unit_factors: HashMap::new(),
        };
        assert!(matches!(
            bad_regex.compile(),
            Err(LedgerError::Validation(_))
        ));

        let no_group = ExtractorSpec {
            attribute: "engines.burn_time_s".to_string(),
            patterns: vec![r"(?i)burn time".to_string()],
            target_unit: "s".to_string(),
            unit_factors: HashMap::new(),
        };
        assert!(matches!(no_group.compile(), Err(LedgerError::Validation(_))));

        let good = ExtractorSpec {
            attribute: "engines.burn_time_s".to_string(),
            patterns: vec![r"(?i)burn time\s*(?:of)?\s*([\d,]+)\s*(s|min)?".to_string()],
            target_unit: "s".to_string(),
            unit_factors: HashMap::from([("min".to_string(), 60.0)]),
        };
        let compiled = good.compile().unwrap();
        assert_eq!(compiled.attribute, "engines.burn_time_s");
        assert_eq!(compiled.unit_factors.get("min"), Some(&60.0));
    }
}
