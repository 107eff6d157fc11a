//! Truth ledger data model
//!
//! Shared record types and value algebra for the ingestion → extraction →
//! conflict → derivation → scoring pipeline:
//! - Persistent records (sources, documents, snippets, claims, evidence, ...)
//! - Scope canonicalization and the claim-key digest
//! - Error taxonomy used by every stage
//! - Scoring and display policy tables
//!
//! All identifiers are opaque UUIDs; all timestamps are UTC instants. The
//! claim key is the one content-derived identity: a SHA-256 digest over
//! `(entity_id, attribute_id, canonical(scope))`.

pub mod claim_key;
pub mod control;
pub mod error;
pub mod policy;
pub mod records;
pub mod scope;

pub use claim_key::*;
pub use control::*;
pub use error::*;
pub use policy::*;
pub use records::*;
pub use scope::*;
