use std::cmp::Ordering;

use crate::config::SearchConfig;
use crate::types::{ScoredDocument, Tier};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    pub high: f32,
    pub floor: f32,
}

impl Thresholds {
    pub fn from_config(config: &SearchConfig) -> Self {
        Self {
            high: config.relevance_high_threshold,
            floor: config.relevance_floor,
        }
    }

    /// `high` at or above the high threshold, `related` at or above the floor,
    /// otherwise `discarded`. Non-finite scores are discarded.
    pub fn tier(&self, score: f32) -> Tier {
        if !score.is_finite() {
            Tier::Discarded
        } else if score >= self.high {
            Tier::High
        } else if score >= self.floor {
            Tier::Related
        } else {
            Tier::Discarded
        }
    }
}

#[derive(Debug, Default)]
pub struct Tiers {
    pub high: Vec<ScoredDocument>,
    pub related: Vec<ScoredDocument>,
    pub discarded: usize,
}

/// Splits scored documents into tiers, each ordered by descending score with
/// ties broken by ascending provider rank.
pub fn partition(scored: Vec<ScoredDocument>) -> Tiers {
    let mut tiers = Tiers::default();
    for doc in scored {
        match doc.tier {
            Tier::High => tiers.high.push(doc),
            Tier::Related => tiers.related.push(doc),
            Tier::Discarded => tiers.discarded += 1,
        }
    }
    tiers.high.sort_by(by_relevance);
    tiers.related.sort_by(by_relevance);
    tiers
}

fn by_relevance(a: &ScoredDocument, b: &ScoredDocument) -> Ordering {
    b.relevance_score
        .total_cmp(&a.relevance_score)
        .then(a.document.source_rank.cmp(&b.document.source_rank))
}
