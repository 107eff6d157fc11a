//! Numeric attribute extraction.
//!
//! A registry of per-attribute extractors runs ordered regexes over snippets:
//! capture group 1 is the value, optional group 2 the unit. Values are
//! normalized into the attribute's target unit, scopes inferred from context
//! (vacuum vs sea level, throttle), and each hit lands as a claim + evidence
//! pair under its deterministic claim key.

pub mod extractor;
pub mod patterns;
pub mod scope_infer;
pub mod units;

pub use extractor::*;
pub use patterns::*;
pub use scope_infer::*;
pub use units::*;
