//! Candidate lookup, merging and primary-match selection.

use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::customer::{Customer, CustomerDirectory};
use crate::lead::{CustomerId, MatchConfidence, NormalizedIdentifiers};
use crate::scoring;

/// Which identifier types matched between a lead and a customer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchedFields {
    pub tax_id: bool,
    pub phone: bool,
    pub email: bool,
}

impl MatchedFields {
    pub fn count(&self) -> u32 {
        self.tax_id as u32 + self.phone as u32 + self.email as u32
    }

    /// Field labels for audit payloads, strongest first.
    pub fn labels(&self) -> Vec<&'static str> {
        let mut labels = Vec::new();
        if self.tax_id {
            labels.push("tax_id");
        }
        if self.phone {
            labels.push("phone");
        }
        if self.email {
            labels.push("email");
        }
        labels
    }
}

/// A directory record sharing at least one normalized identifier with
/// the lead under evaluation. Transient: lives for one evaluation only.
#[derive(Debug, Clone)]
pub struct MatchCandidate {
    pub customer: Customer,
    pub matched: MatchedFields,
}

/// A candidate with its computed score and band.
#[derive(Debug, Clone)]
pub struct ScoredCandidate {
    pub customer: Customer,
    pub matched: MatchedFields,
    pub score: u32,
    pub confidence: MatchConfidence,
}

impl From<MatchCandidate> for ScoredCandidate {
    fn from(candidate: MatchCandidate) -> Self {
        let score = scoring::score(candidate.matched);
        Self {
            customer: candidate.customer,
            matched: candidate.matched,
            score,
            confidence: scoring::band(score),
        }
    }
}

/// Issue one equality lookup per present identifier and merge the
/// results by customer id, accumulating matched-field sets.
///
/// A failed or timed-out lookup contributes no candidates but never
/// aborts the other lookups; partial candidate information is valid
/// input to the scorer. An empty result is a normal outcome.
#[instrument(skip_all)]
pub async fn find_candidates(
    directory: &(dyn CustomerDirectory + Send + Sync),
    normalized: &NormalizedIdentifiers,
    exclude: Option<CustomerId>,
) -> Vec<MatchCandidate> {
    let mut candidates: Vec<MatchCandidate> = Vec::new();

    if let Some(tax_id) = normalized.tax_id.as_deref() {
        match directory.find_by_tax_id(tax_id, exclude).await {
            Ok(customers) => {
                for customer in customers {
                    merge(&mut candidates, customer, |m| m.tax_id = true);
                }
            }
            Err(e) => {
                tracing::warn!("tax id lookup failed, continuing without it: {}", e);
                metrics::counter!("lead_candidate_lookup_failures_total", "identifier" => "tax_id")
                    .increment(1);
            }
        }
    }

    if let Some(phone) = normalized.phone.as_deref() {
        match directory.find_by_phone_or_mobile(phone, exclude).await {
            Ok(customers) => {
                for customer in customers {
                    merge(&mut candidates, customer, |m| m.phone = true);
                }
            }
            Err(e) => {
                tracing::warn!("phone lookup failed, continuing without it: {}", e);
                metrics::counter!("lead_candidate_lookup_failures_total", "identifier" => "phone")
                    .increment(1);
            }
        }
    }

    if let Some(email) = normalized.email.as_deref() {
        match directory.find_by_email(email, exclude).await {
            Ok(customers) => {
                for customer in customers {
                    merge(&mut candidates, customer, |m| m.email = true);
                }
            }
            Err(e) => {
                tracing::warn!("email lookup failed, continuing without it: {}", e);
                metrics::counter!("lead_candidate_lookup_failures_total", "identifier" => "email")
                    .increment(1);
            }
        }
    }

    candidates
}

fn merge<F>(candidates: &mut Vec<MatchCandidate>, customer: Customer, mark: F)
where
    F: Fn(&mut MatchedFields),
{
    if let Some(existing) = candidates.iter_mut().find(|c| c.customer.id == customer.id) {
        mark(&mut existing.matched);
    } else {
        let mut matched = MatchedFields::default();
        mark(&mut matched);
        candidates.push(MatchCandidate { customer, matched });
    }
}

/// Select the single primary match from a non-empty scored set.
///
/// Highest score wins. Ties prefer candidates that already have an
/// assigned owner; remaining ties go to the most recently modified
/// customer (creation time when never modified). Total and
/// deterministic for a fixed input.
pub fn select_primary(candidates: &[ScoredCandidate]) -> Option<&ScoredCandidate> {
    let top_score = candidates.iter().map(|c| c.score).max()?;
    let tied: Vec<&ScoredCandidate> = candidates
        .iter()
        .filter(|c| c.score == top_score)
        .collect();

    if tied.len() == 1 {
        return Some(tied[0]);
    }

    // Recency only breaks ties within the owner-having subset, when
    // there is one.
    let with_owner: Vec<&ScoredCandidate> = tied
        .iter()
        .copied()
        .filter(|c| c.customer.owner.is_some())
        .collect();
    let pool = if with_owner.is_empty() {
        &tied
    } else {
        &with_owner
    };

    pool.iter().copied().max_by_key(|c| c.customer.recency())
}
