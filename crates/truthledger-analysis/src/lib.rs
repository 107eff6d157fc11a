//! Analysis stages: conflict detection, derivation, scoring, resolution.
//!
//! Everything downstream of extraction lives here:
//! - the conflict detector classifies each claim-key bucket's consistency,
//! - the deriver promotes the best raw claim per domain field,
//! - the scorer turns weighted evidence into `truth_raw`,
//! - the fact resolver answers queries under a caller confidence dial,
//! - the integrity checker re-verifies the ledger's invariants.

pub mod conflicts;
pub mod derive;
pub mod integrity;
pub mod resolve;
pub mod score;

pub use conflicts::*;
pub use derive::*;
pub use integrity::*;
pub use resolve::*;
pub use score::*;
