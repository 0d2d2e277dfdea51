//! zkflow Replay
//!
//! Anti-replay detection for generated proofs. A proof is reduced to a
//! [`ProofFingerprint`] and the [`ReplayDetector`] remembers every
//! fingerprint it has observed, across all workflow runs sharing it.

mod detector;
mod fingerprint;

pub use detector::{AntiReplayResult, ReplayContext, ReplayDetector, ReplayRecord};
pub use fingerprint::{NONCE_FIELD, ProofFingerprint};
