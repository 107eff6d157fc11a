//! Seed loading: sources, feeds, URLs, entities, attributes, and extra
//! extractors from one JSON file.
//!
//! Idempotent by unique name: a seed that is already present is skipped, so
//! re-running with the same file is safe.

use anyhow::{Context, Result};
use chrono::Utc;
use serde::Deserialize;
use std::path::Path;
use uuid::Uuid;

use truthledger_extract::{ExtractorRegistry, ExtractorSpec};
use truthledger_model::{
    Attribute, Entity, EntityType, FeedType, Source, SourceFeed, SourceUrl, ValueType,
};
use truthledger_store::{DynStore, Store};

#[derive(Debug, Deserialize)]
pub struct SeedFile {
    #[serde(default)]
    pub sources: Vec<SeedSource>,
    #[serde(default)]
    pub entities: Vec<SeedEntity>,
    #[serde(default)]
    pub attributes: Vec<SeedAttribute>,
    #[serde(default)]
    pub extractors: Vec<ExtractorSpec>,
}

#[derive(Debug, Deserialize)]
pub struct SeedSource {
    pub name: String,
    pub source_type: String,
    pub base_trust: f64,
    #[serde(default)]
    pub independence_cluster_id: Option<String>,
    pub default_doc_type: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub feeds: Vec<SeedFeed>,
    #[serde(default)]
    pub urls: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct SeedFeed {
    pub feed_url: String,
    pub feed_type: FeedType,
    #[serde(default = "default_refresh_minutes")]
    pub refresh_interval_minutes: i64,
    #[serde(default = "default_max_items")]
    pub max_items: usize,
}

fn default_refresh_minutes() -> i64 {
    60
}

fn default_max_items() -> usize {
    50
}

#[derive(Debug, Deserialize)]
pub struct SeedEntity {
    pub canonical_name: String,
    pub entity_type: EntityType,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub domain_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct SeedAttribute {
    pub canonical_name: String,
    pub value_type: ValueType,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub tolerance_abs: Option<f64>,
    #[serde(default = "default_tolerance_rel")]
    pub tolerance_rel: f64,
}

fn default_tolerance_rel() -> f64 {
    0.02
}

#[derive(Debug, Default)]
pub struct SeedSummary {
    pub sources: usize,
    pub feeds: usize,
    pub urls: usize,
    pub entities: usize,
    pub attributes: usize,
    pub extractors: usize,
}

/// Parse a seed file from disk.
pub fn read_seed_file(path: &Path) -> Result<SeedFile> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read seed file: {}", path.display()))?;
    serde_json::from_str(&text)
        .with_context(|| format!("failed to parse seed file: {}", path.display()))
}

/// Upsert everything in the seed into the store and register extractors.
pub async fn apply_seed(
    store: &DynStore,
    registry: &mut ExtractorRegistry,
    seed: &SeedFile,
) -> Result<SeedSummary> {
    let mut summary = SeedSummary::default();
    let now = Utc::now();

    for seed_source in &seed.sources {
        let source = match store.source_by_name(&seed_source.name).await? {
            Some(existing) => existing,
            None => {
                summary.sources += 1;
                store
                    .insert_source(Source {
                        id: Uuid::new_v4(),
                        name: seed_source.name.clone(),
                        source_type: seed_source.source_type.clone(),
                        base_trust: seed_source.base_trust,
                        independence_cluster_id: seed_source.independence_cluster_id.clone(),
                        default_doc_type: seed_source.default_doc_type.clone(),
                        is_active: true,
                        tags: seed_source.tags.clone(),
                        created_at: now,
                    })
                    .await?
            }
        };

        for feed in &seed_source.feeds {
            let inserted = store
                .insert_feed(SourceFeed {
                    id: Uuid::new_v4(),
                    source_id: source.id,
                    feed_url: feed.feed_url.clone(),
                    feed_type: feed.feed_type,
                    refresh_interval_minutes: feed.refresh_interval_minutes,
                    max_items: feed.max_items,
                    is_active: true,
                    last_fetched_at: None,
                    last_error: None,
                    error_count: 0,
                    created_at: now,
                })
                .await;
            match inserted {
                Ok(_) => summary.feeds += 1,
                Err(truthledger_model::LedgerError::Conflict(_)) => {}
                Err(e) => return Err(e.into()),
            }
        }

        for url in &seed_source.urls {
            let inserted = store
                .insert_source_url(SourceUrl {
                    id: Uuid::new_v4(),
                    source_id: source.id,
                    url: url.clone(),
                    is_active: true,
                    last_fetched_at: None,
                    created_at: now,
                })
                .await;
            match inserted {
                Ok(_) => summary.urls += 1,
                Err(truthledger_model::LedgerError::Conflict(_)) => {}
                Err(e) => return Err(e.into()),
            }
        }
    }

    for seed_entity in &seed.entities {
        if store
            .entity_by_name(&seed_entity.canonical_name)
            .await?
            .is_none()
        {
            store
                .insert_entity(Entity {
                    id: Uuid::new_v4(),
                    canonical_name: seed_entity.canonical_name.clone(),
                    entity_type: seed_entity.entity_type,
                    aliases: seed_entity.aliases.clone(),
                    domain_id: seed_entity.domain_id,
                    created_at: now,
                })
                .await?;
            summary.entities += 1;
        }
    }

    for seed_attribute in &seed.attributes {
        store
            .ensure_attribute(Attribute {
                id: Uuid::new_v4(),
                canonical_name: seed_attribute.canonical_name.clone(),
                value_type: seed_attribute.value_type,
                unit: seed_attribute.unit.clone(),
                tolerance_abs: seed_attribute.tolerance_abs,
                tolerance_rel: seed_attribute.tolerance_rel,
                created_at: now,
            })
            .await?;
        summary.attributes += 1;
    }

    for spec in &seed.extractors {
        registry
            .register(spec)
            .with_context(|| format!("invalid extractor spec for {}", spec.attribute))?;
        summary.extractors += 1;
    }

    Ok(summary)
}
