//! Document ingestion for the truth ledger.
//!
//! Turns URLs and feeds into stored, content-addressed documents and
//! locatable snippets:
//! - fetch pages (explicit User-Agent, per-request timeouts, size caps),
//! - clean HTML down to readable text (title, published date, body),
//! - content-address by SHA-256 and chain versions via supersedes links,
//! - split into snippets with deterministic locators,
//! - poll RSS/Atom/JSON feeds and hand their item URLs to the ingestor.
//!
//! Failures are per-URL and per-feed; a batch never dies because one page
//! timed out.

pub mod feed;
pub mod fetch;
pub mod html;
pub mod ingestor;
pub mod snippet;

pub use feed::*;
pub use fetch::*;
pub use html::*;
pub use ingestor::*;
pub use snippet::*;

/// User-Agent sent with every outbound request.
pub const USER_AGENT: &str = "TruthLedger/1.0";

/// Default per-request timeout for direct URL ingestion, in seconds.
pub const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 30;

/// Default item cap per feed refresh.
pub const DEFAULT_FEED_MAX_ITEMS: usize = 50;
