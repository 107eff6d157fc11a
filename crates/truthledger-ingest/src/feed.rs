//! Feed polling: RSS, Atom, and JSON feeds.
//!
//! Parsers are regex-driven over the raw feed body, CDATA-aware, and tolerant
//! of missing fields. The feed fetcher selects item URLs (capped per feed),
//! hands them to the ingestor, and keeps per-feed status: success resets the
//! error counter, failure increments it and records the message.

use chrono::{DateTime, Utc};
use regex::Regex;
use tracing::{debug, info, warn};

use truthledger_model::{
    report_progress, CancelToken, FeedType, LedgerError, LedgerResult, ProgressFn, SourceFeed,
};
use truthledger_store::{DynStore, Store};

use crate::html::{decode_entities, parse_instant};
use crate::ingestor::{IngestOptions, Ingestor};
use crate::DEFAULT_FEED_MAX_ITEMS;

// ============================================================================
// Feed items
// ============================================================================

/// One entry parsed out of a feed document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedItem {
    pub title: Option<String>,
    pub url: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub summary: Option<String>,
    pub author: Option<String>,
    pub categories: Vec<String>,
}

/// Parse a feed body according to its declared type.
pub fn parse_feed(feed_type: FeedType, body: &str) -> LedgerResult<Vec<FeedItem>> {
    match feed_type {
        FeedType::Rss => Ok(parse_rss(body)),
        FeedType::Atom => Ok(parse_atom(body)),
        FeedType::Json => parse_json_feed(body),
        FeedType::Html | FeedType::Api => Err(LedgerError::Validation(format!(
            "feed type {feed_type:?} has no item parser"
        ))),
    }
}

// ----------------------------------------------------------------------
// RSS
// ----------------------------------------------------------------------

fn parse_rss(body: &str) -> Vec<FeedItem> {
    let item_re = Regex::new(r"(?is)<item\b[^>]*>(.*?)</item>").unwrap();
    let mut items = Vec::new();
    for caps in item_re.captures_iter(body) {
        let block = &caps[1];
        let link = tag_text(block, "link").or_else(|| tag_text(block, "guid"));
        items.push(FeedItem {
            title: tag_text(block, "title"),
            url: link,
            published_at: tag_text(block, "pubDate").and_then(|d| parse_instant(&d)),
            summary: tag_text(block, "description"),
            author: tag_text(block, "author").or_else(|| tag_text(block, "dc:creator")),
            categories: tag_texts(block, "category"),
        });
    }
    items
}

// ----------------------------------------------------------------------
// Atom
// ----------------------------------------------------------------------

fn parse_atom(body: &str) -> Vec<FeedItem> {
    let entry_re = Regex::new(r"(?is)<entry\b[^>]*>(.*?)</entry>").unwrap();
    let mut items = Vec::new();
    for caps in entry_re.captures_iter(body) {
        let block = &caps[1];
        items.push(FeedItem {
            title: tag_text(block, "title"),
            url: atom_link(block),
            published_at: tag_text(block, "updated")
                .or_else(|| tag_text(block, "published"))
                .and_then(|d| parse_instant(&d)),
            summary: tag_text(block, "summary").or_else(|| tag_text(block, "content")),
            author: atom_author(block),
            categories: atom_categories(block),
        });
    }
    items
}

/// Prefer `<link rel="alternate" href>`, else the first `href`.
fn atom_link(block: &str) -> Option<String> {
    let link_re = Regex::new(r#"(?is)<link\b([^>]*)/?>"#).unwrap();
    let href_re = Regex::new(r#"href="([^"]+)""#).unwrap();
    let rel_re = Regex::new(r#"rel="([^"]+)""#).unwrap();

    let mut first = None;
    for caps in link_re.captures_iter(block) {
        let attrs = &caps[1];
        let Some(href) = href_re.captures(attrs).map(|c| c[1].to_string()) else {
            continue;
        };
        let rel = rel_re.captures(attrs).map(|c| c[1].to_string());
        if rel.as_deref() == Some("alternate") {
            return Some(href);
        }
        first.get_or_insert(href);
    }
    first
}

fn atom_author(block: &str) -> Option<String> {
    let author_re = Regex::new(r"(?is)<author\b[^>]*>(.*?)</author>").unwrap();
    let block = author_re.captures(block)?.get(1)?.as_str().to_string();
    tag_text(&block, "name")
}

fn atom_categories(block: &str) -> Vec<String> {
    let cat_re = Regex::new(r#"(?is)<category\b[^>]*term="([^"]+)"[^>]*/?>"#).unwrap();
    cat_re
        .captures_iter(block)
        .map(|c| c[1].to_string())
        .collect()
}

// ----------------------------------------------------------------------
// JSON feeds
// ----------------------------------------------------------------------

/// Accept the JSON Feed schema (`items[*]`) or a plain array with heuristic
/// field names.
fn parse_json_feed(body: &str) -> LedgerResult<Vec<FeedItem>> {
    let value: serde_json::Value = serde_json::from_str(body)
        .map_err(|e| LedgerError::Validation(format!("invalid json feed: {e}")))?;

    let entries = match &value {
        serde_json::Value::Object(obj) => obj
            .get("items")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default(),
        serde_json::Value::Array(arr) => arr.clone(),
        _ => {
            return Err(LedgerError::Validation(
                "json feed must be an object with items or an array".to_string(),
            ))
        }
    };

    let mut items = Vec::new();
    for entry in &entries {
        let Some(obj) = entry.as_object() else {
            continue;
        };
        let str_field = |keys: &[&str]| {
            keys.iter()
                .find_map(|k| obj.get(*k).and_then(|v| v.as_str()))
                .map(|s| s.to_string())
        };
        items.push(FeedItem {
            title: str_field(&["title", "name"]),
            url: str_field(&["url", "link"]),
            published_at: str_field(&["date_published", "date", "published_at", "created_at"])
                .and_then(|d| parse_instant(&d)),
            summary: str_field(&["content_text", "description", "summary"]),
            author: obj
                .get("author")
                .and_then(|a| a.get("name"))
                .and_then(|n| n.as_str())
                .map(|s| s.to_string())
                .or_else(|| str_field(&["author"])),
            categories: obj
                .get("tags")
                .and_then(|t| t.as_array())
                .map(|arr| {
                    arr.iter()
                        .filter_map(|v| v.as_str().map(|s| s.to_string()))
                        .collect()
                })
                .unwrap_or_default(),
        });
    }
    Ok(items)
}

// ----------------------------------------------------------------------
// Shared tag helpers
// ----------------------------------------------------------------------

/// First `<tag>...</tag>` body: CDATA unwrapped, entities decoded, inner tags
/// stripped, whitespace trimmed.
fn tag_text(block: &str, tag: &str) -> Option<String> {
    let re = Regex::new(&format!(
        r"(?is)<{tag}\b[^>]*>(.*?)</{tag}>",
        tag = regex::escape(tag)
    ))
    .unwrap();
    let raw = re.captures(block)?.get(1)?.as_str();
    let text = clean_tag_body(raw);
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

fn tag_texts(block: &str, tag: &str) -> Vec<String> {
    let re = Regex::new(&format!(
        r"(?is)<{tag}\b[^>]*>(.*?)</{tag}>",
        tag = regex::escape(tag)
    ))
    .unwrap();
    re.captures_iter(block)
        .filter_map(|c| {
            let text = clean_tag_body(c.get(1).map(|m| m.as_str()).unwrap_or_default());
            if text.is_empty() {
                None
            } else {
                Some(text)
            }
        })
        .collect()
}

fn clean_tag_body(raw: &str) -> String {
    let cdata_re = Regex::new(r"(?s)<!\[CDATA\[(.*?)\]\]>").unwrap();
    let unwrapped = match cdata_re.captures(raw) {
        Some(c) => c[1].to_string(),
        None => raw.to_string(),
    };
    let tag_re = Regex::new(r"<[^>]+>").unwrap();
    let stripped = tag_re.replace_all(&unwrapped, " ");
    let ws_re = Regex::new(r"\s+").unwrap();
    ws_re
        .replace_all(&decode_entities(&stripped), " ")
        .trim()
        .to_string()
}

// ============================================================================
// Feed fetcher
// ============================================================================

/// One feed's refresh outcome.
#[derive(Debug, Clone, Default)]
pub struct FeedRefreshReport {
    pub items_seen: usize,
    pub items_selected: usize,
    pub documents_created: u64,
    pub documents_updated: u64,
    pub snippets_created: u64,
    pub url_errors: usize,
}

/// Batch outcome over every due feed.
#[derive(Debug, Clone, Default)]
pub struct FeedIngestReport {
    pub feeds_refreshed: usize,
    pub feeds_failed: usize,
    pub items_seen: usize,
    pub documents_created: u64,
    pub documents_updated: u64,
    pub snippets_created: u64,
    pub errors: Vec<String>,
}

/// Polls feeds and delegates item URLs to the ingestor.
#[derive(Clone)]
pub struct FeedFetcher {
    ingestor: Ingestor,
    store: DynStore,
    fetcher: crate::fetch::PageFetcher,
}

impl FeedFetcher {
    pub fn new(store: DynStore, ingestor: Ingestor, fetcher: crate::fetch::PageFetcher) -> Self {
        Self {
            ingestor,
            store,
            fetcher,
        }
    }

    /// Refresh one feed: fetch, parse, ingest up to `max_items` item URLs.
    pub async fn refresh_feed(
        &self,
        feed: &SourceFeed,
        cancel: &CancelToken,
        progress: &ProgressFn,
    ) -> LedgerResult<FeedRefreshReport> {
        cancel.check()?;
        let timeout = std::time::Duration::from_secs(crate::DEFAULT_FETCH_TIMEOUT_SECS);
        let page = self.fetcher.fetch(&feed.feed_url, timeout).await?.body;

        let items = parse_feed(feed.feed_type, &page)?;
        let items_seen = items.len();

        let max_items = if feed.max_items == 0 {
            DEFAULT_FEED_MAX_ITEMS
        } else {
            feed.max_items
        };
        let selected: Vec<FeedItem> = items.into_iter().take(max_items).collect();
        let items_selected = selected.len();

        let mut report = FeedRefreshReport {
            items_seen,
            items_selected,
            ..Default::default()
        };

        for item in &selected {
            cancel.check()?;
            let Some(url) = &item.url else {
                continue;
            };
            let options = IngestOptions {
                feed_url: Some(feed.feed_url.clone()),
                published_hint: item.published_at,
                ..Default::default()
            };
            let ingest = self
                .ingestor
                .ingest(feed.source_id, std::slice::from_ref(url), &options, cancel, progress)
                .await?;
            report.documents_created += ingest.documents_created;
            report.documents_updated += ingest.documents_updated;
            report.snippets_created += ingest.snippets_created;
            report.url_errors += ingest.errors.len();
        }

        debug!(
            feed = %feed.feed_url,
            items = items_seen,
            selected = items_selected,
            created = report.documents_created,
            "feed refreshed"
        );
        Ok(report)
    }

    /// Refresh every due feed. Per-feed failures update the feed's status and
    /// are collected; cancellation propagates.
    pub async fn refresh_due_feeds(
        &self,
        now: DateTime<Utc>,
        cancel: &CancelToken,
        progress: &ProgressFn,
    ) -> LedgerResult<FeedIngestReport> {
        let due = self.store.feeds_due(now).await?;
        let total = due.len() as u64;
        let mut report = FeedIngestReport::default();

        for (index, feed) in due.iter().enumerate() {
            cancel.check()?;
            report_progress(
                progress,
                index as u64,
                total,
                format!("refreshing {}", feed.feed_url),
            );

            match self.refresh_feed(feed, cancel, progress).await {
                Ok(feed_report) => {
                    self.store.mark_feed_success(feed.id, Utc::now()).await?;
                    report.feeds_refreshed += 1;
                    report.items_seen += feed_report.items_seen;
                    report.documents_created += feed_report.documents_created;
                    report.documents_updated += feed_report.documents_updated;
                    report.snippets_created += feed_report.snippets_created;
                }
                Err(LedgerError::Cancelled) => return Err(LedgerError::Cancelled),
                Err(e) => {
                    warn!(feed = %feed.feed_url, error = %e, "feed refresh failed");
                    self.store.mark_feed_failure(feed.id, &e.to_string()).await?;
                    report.feeds_failed += 1;
                    report.errors.push(format!("{}: {e}", feed.feed_url));
                }
            }
        }

        report_progress(progress, total, total, "feed refresh complete");
        info!(
            refreshed = report.feeds_refreshed,
            failed = report.feeds_failed,
            created = report.documents_created,
            "feed ingest finished"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RSS_SAMPLE: &str = r#"<?xml version="1.0"?>
<rss version="2.0" xmlns:dc="http://purl.org/dc/elements/1.1/">
  <channel>
    <title>Launch News</title>
    <item>
      <title><![CDATA[Raptor 3 hits 2,600 kN]]></title>
      <link>https://example.com/raptor-3</link>
      <pubDate>Wed, 05 Apr 2023 10:00:00 GMT</pubDate>
      <description><![CDATA[<p>Test &amp; flight data</p>]]></description>
      <dc:creator>Jane</dc:creator>
      <category>engines</category>
      <category>starship</category>
    </item>
    <item>
      <title>No link item</title>
      <guid>https://example.com/guid-only</guid>
    </item>
  </channel>
</rss>"#;

    const ATOM_SAMPLE: &str = r#"<?xml version="1.0"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <entry>
    <title>Vulcan flies</title>
    <link rel="self" href="https://example.com/self"/>
    <link rel="alternate" href="https://example.com/vulcan"/>
    <updated>2024-01-08T12:00:00Z</updated>
    <summary>First flight</summary>
    <author><name>Tory</name></author>
    <category term="launch"/>
  </entry>
</feed>"#;

    #[test]
    fn rss_items_parse_with_cdata_and_fallback_guid() {
        let items = parse_rss(RSS_SAMPLE);
        assert_eq!(items.len(), 2);

        let first = &items[0];
        assert_eq!(first.title.as_deref(), Some("Raptor 3 hits 2,600 kN"));
        assert_eq!(first.url.as_deref(), Some("https://example.com/raptor-3"));
        assert_eq!(first.author.as_deref(), Some("Jane"));
        assert_eq!(first.categories, vec!["engines", "starship"]);
        assert_eq!(first.summary.as_deref(), Some("Test & flight data"));
        assert!(first.published_at.is_some());

        assert_eq!(
            items[1].url.as_deref(),
            Some("https://example.com/guid-only")
        );
    }

    #[test]
    fn atom_prefers_alternate_link() {
        let items = parse_atom(ATOM_SAMPLE);
        assert_eq!(items.len(), 1);
        let item = &items[0];
        assert_eq!(item.url.as_deref(), Some("https://example.com/vulcan"));
        assert_eq!(item.author.as_deref(), Some("Tory"));
        assert_eq!(item.categories, vec!["launch"]);
        assert!(item.published_at.is_some());
    }

    #[test]
    fn json_feed_schema_and_plain_array_both_parse() {
        let schema = r#"{"version": "https://jsonfeed.org/version/1.1",
            "items": [{"id": "1", "title": "Electron", "url": "https://example.com/electron",
                       "date_published": "2023-06-01T00:00:00Z"}]}"#;
        let items = parse_json_feed(schema).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].url.as_deref(), Some("https://example.com/electron"));

        let array = r#"[{"name": "Neutron", "link": "https://example.com/neutron",
                         "published_at": "2024-02-02"}]"#;
        let items = parse_json_feed(array).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].title.as_deref(), Some("Neutron"));
        assert!(items[0].published_at.is_some());

        assert!(parse_json_feed("not json").is_err());
        assert!(parse_json_feed(r#""just a string""#).is_err());
    }

    #[test]
    fn html_and_api_feed_types_are_rejected() {
        assert!(parse_feed(FeedType::Html, "<html/>").is_err());
        assert!(parse_feed(FeedType::Api, "{}").is_err());
    }
}
