//! Rating aggregates
//!
//! Pure folds over a reviewee's ratings. Only approved public ratings count;
//! category averages use only the ratings that supplied that category.

use serde::Serialize;

use crate::rating::Rating;
use crate::users::Reputation;

/// Canonical reputation for a set of ratings
pub fn aggregate(ratings: &[Rating]) -> Reputation {
    let (sum, count) = ratings
        .iter()
        .filter(|r| r.is_visible())
        .fold((0u64, 0u32), |(sum, count), r| (sum + u64::from(r.rating), count + 1));

    if count == 0 {
        return Reputation::EMPTY;
    }
    Reputation {
        average_rating: sum as f64 / f64::from(count),
        total_ratings: count,
    }
}

/// Fold one more visible rating into a materialized reputation
pub fn increment(current: Reputation, score: u8) -> Reputation {
    let count = f64::from(current.total_ratings);
    Reputation {
        average_rating: (current.average_rating * count + f64::from(score)) / (count + 1.0),
        total_ratings: current.total_ratings + 1,
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct CategoryAverages {
    pub communication: Option<f64>,
    pub skill_level: Option<f64>,
    pub punctuality: Option<f64>,
    pub helpfulness: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserRatingStats {
    pub user_id: String,
    pub average_rating: f64,
    pub total_ratings: u32,
    pub category_averages: CategoryAverages,
    /// Share of ratings with `would_recommend`, 0.0 - 1.0
    pub recommendation_rate: f64,
    /// Count of 1..=5 star ratings, index 0 is one star
    pub distribution: [u32; 5],
}

impl UserRatingStats {
    pub fn from_ratings(user_id: &str, ratings: &[Rating]) -> Self {
        let visible: Vec<&Rating> = ratings.iter().filter(|r| r.is_visible()).collect();
        let reputation = aggregate(ratings);

        let mut sums = [0u32; 4];
        let mut counts = [0u32; 4];
        let mut distribution = [0u32; 5];
        let mut recommended = 0u32;

        for rating in &visible {
            for (i, (_, score)) in rating.categories.entries().into_iter().enumerate() {
                if let Some(score) = score {
                    sums[i] += u32::from(score);
                    counts[i] += 1;
                }
            }
            if let Some(slot) = distribution.get_mut(usize::from(rating.rating).saturating_sub(1)) {
                *slot += 1;
            }
            if rating.would_recommend {
                recommended += 1;
            }
        }

        let avg = |i: usize| (counts[i] > 0).then(|| f64::from(sums[i]) / f64::from(counts[i]));

        Self {
            user_id: user_id.to_string(),
            average_rating: reputation.average_rating,
            total_ratings: reputation.total_ratings,
            category_averages: CategoryAverages {
                communication: avg(0),
                skill_level: avg(1),
                punctuality: avg(2),
                helpfulness: avg(3),
            },
            recommendation_rate: if visible.is_empty() {
                0.0
            } else {
                f64::from(recommended) / visible.len() as f64
            },
            distribution,
        }
    }
}
