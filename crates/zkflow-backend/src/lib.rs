//! zkflow Backend
//!
//! The capabilities a proof workflow delegates to: credential
//! transformation, proof generation, proof verification and proof sharing.
//! The engine only ever talks to these traits; the zero-knowledge math lives
//! behind them.
//!
//! The `mock` feature (on by default) provides deterministic SHA-256 based
//! implementations for development and tests. They provide no
//! zero-knowledge guarantees.

mod error;
#[cfg(feature = "mock")]
pub mod mock;
mod traits;
mod types;

pub use error::BackendError;
pub use traits::{CredentialTransformer, ProvingBackend, ShareBackend, VerificationBackend};
pub use types::{ProofBundle, ShareReceipt, ShareRequest};
