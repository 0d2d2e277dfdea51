use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::fingerprint::ProofFingerprint;

const DEFAULT_MAX_CONTEXTS: usize = 16;

/// Where a fingerprint was observed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayContext {
  pub workflow_id: String,
  pub step_id: String,
  pub observed_at: DateTime<Utc>,
}

impl ReplayContext {
  pub fn new(workflow_id: impl Into<String>, step_id: impl Into<String>) -> Self {
    Self {
      workflow_id: workflow_id.into(),
      step_id: step_id.into(),
      observed_at: Utc::now(),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayRecord {
  pub fingerprint: ProofFingerprint,
  pub first_seen: DateTime<Utc>,
  pub last_seen: DateTime<Utc>,
  pub observation_count: u64,
  /// Most recent observation contexts, oldest first.
  pub contexts: VecDeque<ReplayContext>,
}

/// Outcome of a replay check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AntiReplayResult {
  pub is_replay: bool,
  pub fingerprint: ProofFingerprint,
  pub first_seen: DateTime<Utc>,
  pub observation_count: u64,
  /// Contexts of earlier observations. Empty on first sight.
  pub prior_contexts: Vec<ReplayContext>,
}

/// Process-wide registry of observed proof fingerprints.
///
/// Backed by a sharded map, so concurrent checks from different workflow
/// runs never serialize on a single lock. Check-and-record is atomic per
/// fingerprint: of two concurrent first observations, exactly one is
/// reported as fresh.
pub struct ReplayDetector {
  records: DashMap<ProofFingerprint, ReplayRecord>,
  max_contexts: usize,
}

impl ReplayDetector {
  pub fn new() -> Self {
    Self::with_max_contexts(DEFAULT_MAX_CONTEXTS)
  }

  /// Keep at most `max_contexts` observation contexts per fingerprint.
  pub fn with_max_contexts(max_contexts: usize) -> Self {
    Self {
      records: DashMap::new(),
      max_contexts: max_contexts.max(1),
    }
  }

  /// Record an observation and report whether the fingerprint was seen
  /// before.
  pub fn check(&self, fingerprint: &ProofFingerprint, context: ReplayContext) -> AntiReplayResult {
    let observed_at = context.observed_at;

    match self.records.entry(fingerprint.clone()) {
      Entry::Vacant(vacant) => {
        debug!(fingerprint = %fingerprint, workflow_id = %context.workflow_id, "proof_first_seen");
        vacant.insert(ReplayRecord {
          fingerprint: fingerprint.clone(),
          first_seen: observed_at,
          last_seen: observed_at,
          observation_count: 1,
          contexts: VecDeque::from([context]),
        });
        AntiReplayResult {
          is_replay: false,
          fingerprint: fingerprint.clone(),
          first_seen: observed_at,
          observation_count: 1,
          prior_contexts: Vec::new(),
        }
      }
      Entry::Occupied(mut occupied) => {
        let record = occupied.get_mut();
        let prior_contexts: Vec<ReplayContext> = record.contexts.iter().cloned().collect();

        record.observation_count += 1;
        record.last_seen = observed_at;
        record.contexts.push_back(context);
        while record.contexts.len() > self.max_contexts {
          record.contexts.pop_front();
        }

        warn!(
          fingerprint = %fingerprint,
          observation_count = record.observation_count,
          "proof_replay_detected"
        );

        AntiReplayResult {
          is_replay: true,
          fingerprint: fingerprint.clone(),
          first_seen: record.first_seen,
          observation_count: record.observation_count,
          prior_contexts,
        }
      }
    }
  }

  /// Record an observation without inspecting the outcome.
  pub fn record(&self, fingerprint: &ProofFingerprint, context: ReplayContext) {
    self.check(fingerprint, context);
  }

  pub fn contains(&self, fingerprint: &ProofFingerprint) -> bool {
    self.records.contains_key(fingerprint)
  }

  /// Times a fingerprint has been observed. `0` if never.
  pub fn observation_count(&self, fingerprint: &ProofFingerprint) -> u64 {
    self
      .records
      .get(fingerprint)
      .map(|r| r.observation_count)
      .unwrap_or(0)
  }

  pub fn get(&self, fingerprint: &ProofFingerprint) -> Option<ReplayRecord> {
    self.records.get(fingerprint).map(|r| r.clone())
  }

  /// Forget fingerprints not observed since `cutoff`. Returns how many were
  /// removed.
  pub fn prune(&self, cutoff: DateTime<Utc>) -> usize {
    let before = self.records.len();
    self.records.retain(|_, record| record.last_seen >= cutoff);
    let removed = before.saturating_sub(self.records.len());
    if removed > 0 {
      debug!(removed, "replay_records_pruned");
    }
    removed
  }

  pub fn len(&self) -> usize {
    self.records.len()
  }

  pub fn is_empty(&self) -> bool {
    self.records.is_empty()
  }
}

impl Default for ReplayDetector {
  fn default() -> Self {
    Self::new()
  }
}
