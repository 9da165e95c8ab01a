//! Award strategy scoring
//!
//! Pure functions from a contract's bid set (plus each bidder's trust) to a
//! winner. `reputation_weighted` normalizes price and ETA against the bid
//! set's own maxima so scores are scale-free per auction, applies the
//! issuer's hard filters, and blends with the issuer's weight vector
//! (0.25 each when the issuer has no preference row).

use crate::storage::{AwardStrategyKind, BidRecord, UserPreferences};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use std::cmp::Ordering;

/// A bid joined with the bidder's current trust score
#[derive(Debug, Clone)]
pub struct ScoredBid {
    /// The bid under consideration
    pub bid: BidRecord,
    /// Bidder's composite trust score
    pub trust: f64,
}

impl ScoredBid {
    fn price_f64(&self) -> f64 {
        self.bid.price.to_f64().unwrap_or(f64::MAX)
    }
}

/// Picks the winning bid under `strategy`, or `None` when no bid qualifies
#[must_use]
pub fn select_winner<'a>(
    strategy: AwardStrategyKind,
    bids: &'a [ScoredBid],
    preferences: &UserPreferences,
) -> Option<&'a ScoredBid> {
    if bids.is_empty() {
        return None;
    }
    match strategy {
        AwardStrategyKind::LowestPrice => bids.iter().min_by(|a, b| {
            cmp_f64(a.price_f64(), b.price_f64())
                .then_with(|| cmp_f64(b.bid.confidence.as_f64(), a.bid.confidence.as_f64()))
                .then_with(|| cmp_f64(b.trust, a.trust))
        }),
        AwardStrategyKind::Fastest => bids.iter().min_by(|a, b| {
            cmp_f64(a.bid.eta_seconds, b.bid.eta_seconds)
                .then_with(|| cmp_f64(b.bid.confidence.as_f64(), a.bid.confidence.as_f64()))
                .then_with(|| cmp_f64(b.trust, a.trust))
        }),
        AwardStrategyKind::HighestTrust => bids.iter().min_by(|a, b| {
            cmp_f64(b.trust, a.trust).then_with(|| cmp_f64(a.price_f64(), b.price_f64()))
        }),
        AwardStrategyKind::ReputationWeighted => weighted_winner(bids, preferences),
    }
}

fn weighted_winner<'a>(
    bids: &'a [ScoredBid],
    preferences: &UserPreferences,
) -> Option<&'a ScoredBid> {
    let qualified: Vec<&ScoredBid> = bids
        .iter()
        .filter(|candidate| passes_filters(candidate, preferences))
        .collect();

    let price_max = qualified
        .iter()
        .map(|c| c.price_f64())
        .fold(0.0_f64, f64::max);
    let eta_max = qualified
        .iter()
        .map(|c| c.bid.eta_seconds)
        .fold(0.0_f64, f64::max);

    qualified
        .into_iter()
        .max_by(|a, b| {
            cmp_f64(
                weighted_score(a, preferences, price_max, eta_max),
                weighted_score(b, preferences, price_max, eta_max),
            )
        })
}

fn passes_filters(candidate: &ScoredBid, preferences: &UserPreferences) -> bool {
    if let Some(max_price) = preferences.max_price {
        if candidate.bid.price > max_price {
            return false;
        }
    }
    if candidate.bid.confidence.as_f64() < preferences.min_confidence {
        return false;
    }
    if let Some(max_latency) = preferences.max_latency {
        if candidate.bid.eta_seconds > max_latency {
            return false;
        }
    }
    if candidate.trust < preferences.min_reputation {
        return false;
    }
    if preferences.free_only && candidate.bid.price > Decimal::ZERO {
        return false;
    }
    true
}

/// `w_p·(1 - price/P_max) + w_c·confidence + w_s·(1 - eta/E_max) + w_r·trust`
///
/// A zero maximum means every bid is free (or instant); the corresponding
/// term contributes its full weight.
fn weighted_score(
    candidate: &ScoredBid,
    preferences: &UserPreferences,
    price_max: f64,
    eta_max: f64,
) -> f64 {
    let price_score = if price_max > 0.0 {
        1.0 - candidate.price_f64() / price_max
    } else {
        1.0
    };
    let speed_score = if eta_max > 0.0 {
        1.0 - candidate.bid.eta_seconds / eta_max
    } else {
        1.0
    };
    preferences.price_weight * price_score
        + preferences.performance_weight * candidate.bid.confidence.as_f64()
        + preferences.speed_weight * speed_score
        + preferences.reputation_weight * candidate.trust
}

fn cmp_f64(a: f64, b: f64) -> Ordering {
    a.partial_cmp(&b).unwrap_or(Ordering::Equal)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain_types::{AgentId, BidId, ConfidenceValue, ContractId};
    use chrono::Utc;

    fn scored(price: i64, eta: f64, confidence: f64, trust: f64) -> ScoredBid {
        ScoredBid {
            bid: BidRecord {
                id: BidId::generate(),
                contract_id: ContractId::generate(),
                agent_id: AgentId::generate(),
                price: Decimal::new(price, 0),
                eta_seconds: eta,
                confidence: ConfidenceValue::try_new(confidence).unwrap(),
                created_at: Utc::now(),
            },
            trust,
        }
    }

    #[test]
    fn lowest_price_picks_cheapest() {
        let bids = vec![
            scored(8, 30.0, 0.9, 0.5),
            scored(6, 45.0, 0.8, 0.5),
            scored(9, 20.0, 0.7, 0.5),
        ];
        let winner = select_winner(
            AwardStrategyKind::LowestPrice,
            &bids,
            &UserPreferences::default(),
        )
        .unwrap();
        assert_eq!(winner.bid.price, Decimal::new(6, 0));
    }

    #[test]
    fn lowest_price_ties_break_by_confidence_then_trust() {
        let bids = vec![
            scored(5, 30.0, 0.7, 0.9),
            scored(5, 30.0, 0.9, 0.1),
            scored(5, 30.0, 0.9, 0.8),
        ];
        let winner = select_winner(
            AwardStrategyKind::LowestPrice,
            &bids,
            &UserPreferences::default(),
        )
        .unwrap();
        assert_eq!(winner.bid.confidence.as_f64(), 0.9);
        assert_eq!(winner.trust, 0.8);
    }

    #[test]
    fn fastest_picks_minimum_eta() {
        let bids = vec![scored(8, 30.0, 0.9, 0.5), scored(9, 20.0, 0.7, 0.5)];
        let winner = select_winner(
            AwardStrategyKind::Fastest,
            &bids,
            &UserPreferences::default(),
        )
        .unwrap();
        assert_eq!(winner.bid.eta_seconds, 20.0);
    }

    #[test]
    fn highest_trust_ties_break_by_price() {
        let bids = vec![scored(9, 30.0, 0.9, 0.8), scored(6, 30.0, 0.9, 0.8)];
        let winner = select_winner(
            AwardStrategyKind::HighestTrust,
            &bids,
            &UserPreferences::default(),
        )
        .unwrap();
        assert_eq!(winner.bid.price, Decimal::new(6, 0));
    }

    #[test]
    fn weighted_prefers_balanced_bid() {
        // Equal weights: the expensive-but-instant, confident, trusted bid
        // should beat a cheap slow one from an untrusted agent.
        let bids = vec![scored(10, 1.0, 0.95, 0.95), scored(1, 60.0, 0.5, 0.1)];
        let winner = select_winner(
            AwardStrategyKind::ReputationWeighted,
            &bids,
            &UserPreferences::default(),
        )
        .unwrap();
        assert_eq!(winner.bid.price, Decimal::new(10, 0));
    }

    #[test]
    fn weighted_filters_exclude_and_can_leave_no_winner() {
        let bids = vec![scored(10, 30.0, 0.9, 0.5)];
        let prefs = UserPreferences {
            max_price: Some(Decimal::new(5, 0)),
            ..UserPreferences::default()
        };
        assert!(select_winner(AwardStrategyKind::ReputationWeighted, &bids, &prefs).is_none());
    }

    #[test]
    fn free_only_filter() {
        let bids = vec![scored(3, 10.0, 0.9, 0.9), scored(0, 50.0, 0.5, 0.2)];
        let prefs = UserPreferences {
            free_only: true,
            ..UserPreferences::default()
        };
        let winner =
            select_winner(AwardStrategyKind::ReputationWeighted, &bids, &prefs).unwrap();
        assert_eq!(winner.bid.price, Decimal::ZERO);
    }

    #[test]
    fn empty_bid_set_has_no_winner() {
        assert!(
            select_winner(
                AwardStrategyKind::LowestPrice,
                &[],
                &UserPreferences::default()
            )
            .is_none()
        );
    }
}
