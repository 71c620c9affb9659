//! Confidence scoring over matched identifier types.
//!
//! Weights are fixed constants, not learned. A lone tax id hit scores
//! 60 and therefore lands in the Low band despite being the strongest
//! single identifier; the thresholds are authoritative.

use crate::lead::MatchConfidence;
use crate::matching::MatchedFields;

pub const TAX_ID_WEIGHT: u32 = 60;
pub const PHONE_WEIGHT: u32 = 25;
pub const EMAIL_WEIGHT: u32 = 15;
pub const MULTI_MATCH_BONUS: u32 = 10;
pub const MAX_SCORE: u32 = 100;

/// Additive score over the matched identifier types, capped at 100.
pub fn score(matched: MatchedFields) -> u32 {
    let mut score = 0;
    if matched.tax_id {
        score += TAX_ID_WEIGHT;
    }
    if matched.phone {
        score += PHONE_WEIGHT;
    }
    if matched.email {
        score += EMAIL_WEIGHT;
    }
    if matched.count() >= 2 {
        score += MULTI_MATCH_BONUS;
    }
    score.min(MAX_SCORE)
}

/// Map a score to its confidence band. `MatchConfidence::None` is
/// reserved for the zero-candidate case and never produced here.
pub fn band(score: u32) -> MatchConfidence {
    match score {
        95.. => MatchConfidence::VeryHigh,
        85.. => MatchConfidence::High,
        70.. => MatchConfidence::Medium,
        _ => MatchConfidence::Low,
    }
}
