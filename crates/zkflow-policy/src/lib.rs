//! zkflow Policy
//!
//! Compliance evaluation for generated proofs. A [`CompliancePolicy`] is a
//! declarative rule set (allowed algorithms, maximum proof age, minimum
//! security level, named custom validators) that the [`PolicyEnforcer`]
//! checks against a [`PolicyRequest`].
//!
//! Evaluation never stops at the first failed rule: every violation is
//! reported so callers can show the complete picture.

mod enforcer;
mod policy;

pub use enforcer::{
  FnValidator, PolicyComplianceResult, PolicyEnforcer, PolicyRequest, PolicyRule, PolicyViolation,
  ProofValidator,
};
pub use policy::{CompliancePolicy, Enforcement};
