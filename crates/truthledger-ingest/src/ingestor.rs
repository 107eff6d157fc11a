//! The ingestor: URLs in, documents + snippets out.
//!
//! Content addressing: a page whose normalized text hashes to something the
//! source has already stored is a no-op. New content at a previously seen URL
//! becomes a new document superseding the most recent prior one; the
//! predecessor is never touched.

use chrono::Utc;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

use truthledger_model::{
    report_progress, sha256_hex, CancelToken, Document, LedgerError, LedgerResult, ProgressFn,
    Source,
};
use truthledger_store::{DynStore, Store};

use crate::fetch::PageFetcher;
use crate::html::clean_html;
use crate::snippet::snippetize;
use crate::DEFAULT_FETCH_TIMEOUT_SECS;

/// Per-call ingestion knobs.
#[derive(Debug, Clone, Default)]
pub struct IngestOptions {
    /// Overrides the source's default document type.
    pub doc_type: Option<String>,
    /// Per-request timeout; defaults to 30 s.
    pub timeout: Option<Duration>,
    /// Feed URL recorded on documents that arrived through a feed.
    pub feed_url: Option<String>,
    /// Publish date fallback when the page itself carries none (feeds know
    /// their items' dates).
    pub published_hint: Option<chrono::DateTime<Utc>>,
}

/// One URL's failure, collected rather than propagated.
#[derive(Debug, Clone)]
pub struct IngestUrlError {
    pub url: String,
    pub message: String,
}

/// Batch result of an ingest run.
#[derive(Debug, Clone, Default)]
pub struct IngestReport {
    pub documents_created: u64,
    pub documents_updated: u64,
    pub snippets_created: u64,
    pub errors: Vec<IngestUrlError>,
}

/// Outcome of ingesting one page's content.
#[derive(Debug, Clone, Default)]
pub struct DocumentOutcome {
    pub created: bool,
    pub updated: bool,
    pub snippets_created: u64,
    pub document_id: Option<Uuid>,
}

/// Fetches URLs for a source and persists documents + snippets.
#[derive(Clone)]
pub struct Ingestor {
    store: DynStore,
    fetcher: PageFetcher,
}

impl Ingestor {
    pub fn new(store: DynStore, fetcher: PageFetcher) -> Self {
        Self { store, fetcher }
    }

    pub fn store(&self) -> &DynStore {
        &self.store
    }

    /// Ingest a batch of URLs for a source. Fetch failures are collected per
    /// URL; only a missing source or a store failure aborts the batch.
    pub async fn ingest(
        &self,
        source_id: Uuid,
        urls: &[String],
        options: &IngestOptions,
        cancel: &CancelToken,
        progress: &ProgressFn,
    ) -> LedgerResult<IngestReport> {
        let source = self
            .store
            .source(source_id)
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("source {source_id}")))?;

        let timeout = options
            .timeout
            .unwrap_or(Duration::from_secs(DEFAULT_FETCH_TIMEOUT_SECS));
        let mut report = IngestReport::default();
        let total = urls.len() as u64;

        for (index, url) in urls.iter().enumerate() {
            cancel.check()?;
            report_progress(progress, index as u64, total, format!("fetching {url}"));

            let page = match self.fetcher.fetch(url, timeout).await {
                Ok(page) => page,
                Err(e) => {
                    debug!(url, error = %e, "fetch failed");
                    report.errors.push(IngestUrlError {
                        url: url.clone(),
                        message: e.to_string(),
                    });
                    continue;
                }
            };

            cancel.check()?;
            match self.ingest_content(&source, url, &page.body, options).await {
                Ok(outcome) => {
                    report.documents_created += u64::from(outcome.created);
                    report.documents_updated += u64::from(outcome.updated);
                    report.snippets_created += outcome.snippets_created;
                }
                Err(e) if e.is_transient() => {
                    report.errors.push(IngestUrlError {
                        url: url.clone(),
                        message: e.to_string(),
                    });
                }
                Err(e) => return Err(e),
            }
        }

        report_progress(progress, total, total, "ingest complete");
        info!(
            source = %source.name,
            created = report.documents_created,
            updated = report.documents_updated,
            snippets = report.snippets_created,
            errors = report.errors.len(),
            "url ingest finished"
        );
        Ok(report)
    }

    /// Ingest already-fetched content: clean, content-address, version, and
    /// snippetize. The document and its snippets land in one transaction.
    pub async fn ingest_content(
        &self,
        source: &Source,
        url: &str,
        html: &str,
        options: &IngestOptions,
    ) -> LedgerResult<DocumentOutcome> {
        let page = clean_html(html, url);
        let content_hash = sha256_hex(&page.text);

        // Identical content for this source: nothing to do.
        if let Some(existing) = self
            .store
            .document_by_content(source.id, &content_hash)
            .await?
        {
            debug!(url, document = %existing.id, "content unchanged, skipping");
            return Ok(DocumentOutcome {
                created: false,
                updated: false,
                snippets_created: 0,
                document_id: Some(existing.id),
            });
        }

        // New content. Link the most recent prior document at this URL as the
        // predecessor; the predecessor row stays untouched.
        let predecessor = self.store.latest_document_for_url(source.id, url).await?;
        let is_new_version = predecessor.is_some();
        let now = Utc::now();

        let document = Document {
            id: Uuid::new_v4(),
            source_id: source.id,
            url: url.to_string(),
            title: page.title,
            doc_type: options
                .doc_type
                .clone()
                .unwrap_or_else(|| source.default_doc_type.clone()),
            content_hash,
            raw_content: page.text.clone(),
            published_at: page.published_at.or(options.published_hint),
            retrieved_at: now,
            supersedes_document_id: predecessor.as_ref().map(|d| d.id),
            version_label: None,
            feed_url: options.feed_url.clone(),
            created_at: now,
        };

        let snippets = snippetize(document.id, url, &page.text, now);
        let (stored, snippets_created) = self.store.insert_document(document, snippets).await?;

        debug!(
            url,
            document = %stored.id,
            superseded = ?stored.supersedes_document_id,
            snippets = snippets_created,
            "document stored"
        );

        Ok(DocumentOutcome {
            created: !is_new_version,
            updated: is_new_version,
            snippets_created: snippets_created as u64,
            document_id: Some(stored.id),
        })
    }
}
