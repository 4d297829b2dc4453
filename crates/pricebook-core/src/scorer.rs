//! Candidate scoring and the accept/queue decision.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
  catalog::MaterialId,
  resolver::{AliasMatch, MatchStrength},
  suggest::AiSuggestion,
  unmatched::QueueReason,
};

pub const EXACT_CONFIDENCE: f64 = 1.0;
pub const NORMALIZED_CONFIDENCE: f64 = 0.95;
/// Fuzzy matches never look exact.
pub const FUZZY_CAP: f64 = 0.89;
/// AI alone never clears the default auto-accept threshold.
pub const AI_CAP: f64 = 0.85;

/// What produced a candidate, strongest first.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum MatchBasis {
  Exact,
  NormalizedExact,
  Fuzzy,
  Ai,
}

impl From<MatchStrength> for MatchBasis {
  fn from(s: MatchStrength) -> Self {
    match s {
      MatchStrength::Exact => Self::Exact,
      MatchStrength::NormalizedExact => Self::NormalizedExact,
      MatchStrength::Fuzzy => Self::Fuzzy,
    }
  }
}

#[derive(Debug, Clone, Serialize)]
pub struct Candidate {
  pub material_id: MaterialId,
  pub confidence:  f64,
  pub basis:       MatchBasis,
  pub alias_id:    Option<Uuid>,
}

/// Whether the resolver found an exact match, which makes any AI call moot.
pub fn has_exact(matches: &[AliasMatch]) -> bool {
  matches.iter().any(|m| m.strength == MatchStrength::Exact)
}

/// Merge resolver output and an optional AI suggestion into one ranked list.
///
/// Exact matches short-circuit everything else. Candidates are merged per
/// material keeping the highest confidence, then sorted by confidence
/// (descending) and material id.
pub fn score(
  matches: &[AliasMatch],
  suggestion: Option<&AiSuggestion>,
) -> Vec<Candidate> {
  let from_alias = |m: &AliasMatch| Candidate {
    material_id: m.material_id.clone(),
    confidence:  match m.strength {
      MatchStrength::Exact => EXACT_CONFIDENCE,
      MatchStrength::NormalizedExact => NORMALIZED_CONFIDENCE,
      MatchStrength::Fuzzy => m.similarity.min(FUZZY_CAP),
    },
    basis:       m.strength.into(),
    alias_id:    m.alias_id,
  };

  if has_exact(matches) {
    return rank(
      matches
        .iter()
        .filter(|m| m.strength == MatchStrength::Exact)
        .map(from_alias)
        .collect(),
    );
  }

  let mut candidates: Vec<Candidate> = matches.iter().map(from_alias).collect();

  if let Some(s) = suggestion
    && !matches.iter().any(|m| m.material_id == s.material_id)
  {
    candidates.push(Candidate {
      material_id: s.material_id.clone(),
      confidence:  s.confidence.clamp(0.0, 1.0).min(AI_CAP),
      basis:       MatchBasis::Ai,
      alias_id:    None,
    });
  }

  rank(candidates)
}

fn rank(candidates: Vec<Candidate>) -> Vec<Candidate> {
  let mut best: HashMap<MaterialId, Candidate> = HashMap::new();
  for c in candidates {
    match best.get(&c.material_id) {
      Some(kept)
        if kept.confidence > c.confidence
          || (kept.confidence == c.confidence && kept.basis <= c.basis) => {}
      _ => {
        best.insert(c.material_id.clone(), c);
      }
    }
  }

  let mut ranked: Vec<Candidate> = best.into_values().collect();
  ranked.sort_by(|a, b| {
    b.confidence
      .total_cmp(&a.confidence)
      .then_with(|| a.material_id.cmp(&b.material_id))
  });
  ranked
}

// ─── Decision ────────────────────────────────────────────────────────────────

/// Confidence policy for automatic commits.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AcceptPolicy {
  pub auto_accept_threshold: f64,
  /// A runner-up closer than this to the top candidate blocks auto-accept.
  pub ambiguity_margin:      f64,
}

impl Default for AcceptPolicy {
  fn default() -> Self {
    Self { auto_accept_threshold: 0.95, ambiguity_margin: 0.05 }
  }
}

#[derive(Debug, Clone)]
pub enum Verdict {
  Accept(Candidate),
  Queue {
    reason:     QueueReason,
    suggestion: Option<Candidate>,
  },
}

pub fn decide(candidates: &[Candidate], policy: &AcceptPolicy) -> Verdict {
  let Some(top) = candidates.first() else {
    return Verdict::Queue { reason: QueueReason::NoCandidate, suggestion: None };
  };

  if top.confidence < policy.auto_accept_threshold {
    return Verdict::Queue {
      reason:     QueueReason::LowConfidence,
      suggestion: Some(top.clone()),
    };
  }

  if let Some(runner_up) = candidates.get(1)
    && top.confidence - runner_up.confidence < policy.ambiguity_margin
  {
    return Verdict::Queue {
      reason:     QueueReason::AmbiguousMatch,
      suggestion: Some(top.clone()),
    };
  }

  Verdict::Accept(top.clone())
}
