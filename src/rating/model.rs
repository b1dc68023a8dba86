//! Rating entity and its edit payloads

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};
use crate::swap::require_id;

pub const MIN_SCORE: u8 = 1;
pub const MAX_SCORE: u8 = 5;
pub const MAX_FEEDBACK_CHARS: usize = 1000;
pub const MAX_FLAG_REASON_CHARS: usize = 500;

fn check_score(field: &'static str, value: u8) -> CoreResult<()> {
    if !(MIN_SCORE..=MAX_SCORE).contains(&value) {
        return Err(CoreError::validation(
            field,
            format!("must be between {} and {}, got {}", MIN_SCORE, MAX_SCORE, value),
        ));
    }
    Ok(())
}

fn check_feedback(feedback: Option<&str>) -> CoreResult<()> {
    if let Some(text) = feedback {
        if text.chars().count() > MAX_FEEDBACK_CHARS {
            return Err(CoreError::validation(
                "feedback",
                format!("must be at most {} characters", MAX_FEEDBACK_CHARS),
            ));
        }
    }
    Ok(())
}

/// Optional per-category scores; any subset may be present
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryScores {
    pub communication: Option<u8>,
    pub skill_level: Option<u8>,
    pub punctuality: Option<u8>,
    pub helpfulness: Option<u8>,
}

impl CategoryScores {
    pub fn entries(&self) -> [(&'static str, Option<u8>); 4] {
        [
            ("communication", self.communication),
            ("skill_level", self.skill_level),
            ("punctuality", self.punctuality),
            ("helpfulness", self.helpfulness),
        ]
    }

    pub fn validate(&self) -> CoreResult<()> {
        const FIELDS: [&str; 4] = [
            "categories.communication",
            "categories.skill_level",
            "categories.punctuality",
            "categories.helpfulness",
        ];
        for (field, (_, score)) in FIELDS.into_iter().zip(self.entries()) {
            if let Some(score) = score {
                check_score(field, score)?;
            }
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.entries().iter().all(|(_, score)| score.is_none())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rating {
    pub id: Uuid,
    pub swap_id: Uuid,
    pub reviewer: String,
    pub reviewee: String,
    pub rating: u8,
    pub feedback: Option<String>,
    pub categories: CategoryScores,
    pub would_recommend: bool,
    pub is_public: bool,
    pub is_anonymous: bool,

    // Moderation
    pub is_approved: bool,
    pub is_flagged: bool,
    pub flag_reason: Option<String>,
    pub admin_reviewed: bool,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Rating {
    /// Counted in reputation aggregates
    pub fn is_visible(&self) -> bool {
        self.is_approved && self.is_public
    }

    pub fn within_edit_window(&self, now: DateTime<Utc>, window: Duration) -> bool {
        now - self.created_at < window
    }

    /// Public view; hides the reviewer when the rating is anonymous
    pub fn to_public(&self) -> PublicRating {
        PublicRating {
            id: self.id,
            swap_id: self.swap_id,
            reviewer: if self.is_anonymous {
                None
            } else {
                Some(self.reviewer.clone())
            },
            rating: self.rating,
            feedback: self.feedback.clone(),
            categories: self.categories,
            would_recommend: self.would_recommend,
            created_at: self.created_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PublicRating {
    pub id: Uuid,
    pub swap_id: Uuid,
    pub reviewer: Option<String>,
    pub rating: u8,
    pub feedback: Option<String>,
    pub categories: CategoryScores,
    pub would_recommend: bool,
    pub created_at: DateTime<Utc>,
}

/// Submission payload; unset flags take their defaults
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewRating {
    pub swap_id: Uuid,
    pub reviewer: String,
    pub reviewee: String,
    pub rating: u8,
    pub feedback: Option<String>,
    pub categories: Option<CategoryScores>,
    /// Defaults to true
    pub would_recommend: Option<bool>,
    /// Defaults to true
    pub is_public: Option<bool>,
    /// Defaults to false
    pub is_anonymous: Option<bool>,
}

impl NewRating {
    pub fn new(
        swap_id: Uuid,
        reviewer: impl Into<String>,
        reviewee: impl Into<String>,
        rating: u8,
    ) -> Self {
        Self {
            swap_id,
            reviewer: reviewer.into(),
            reviewee: reviewee.into(),
            rating,
            ..Default::default()
        }
    }

    pub fn with_feedback(mut self, feedback: impl Into<String>) -> Self {
        self.feedback = Some(feedback.into());
        self
    }

    pub fn with_categories(mut self, categories: CategoryScores) -> Self {
        self.categories = Some(categories);
        self
    }

    pub fn private(mut self) -> Self {
        self.is_public = Some(false);
        self
    }

    pub fn validate(&self) -> CoreResult<()> {
        require_id("reviewer", &self.reviewer)?;
        require_id("reviewee", &self.reviewee)?;
        check_score("rating", self.rating)?;
        check_feedback(self.feedback.as_deref())?;
        if let Some(ref categories) = self.categories {
            categories.validate()?;
        }
        Ok(())
    }

    pub fn into_rating(self, now: DateTime<Utc>) -> Rating {
        Rating {
            id: Uuid::new_v4(),
            swap_id: self.swap_id,
            reviewer: self.reviewer,
            reviewee: self.reviewee,
            rating: self.rating,
            feedback: self
                .feedback
                .map(|f| f.trim().to_string())
                .filter(|f| !f.is_empty()),
            categories: self.categories.unwrap_or_default(),
            would_recommend: self.would_recommend.unwrap_or(true),
            is_public: self.is_public.unwrap_or(true),
            is_anonymous: self.is_anonymous.unwrap_or(false),
            is_approved: true,
            is_flagged: false,
            flag_reason: None,
            admin_reviewed: false,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Reviewer edits; `None` leaves a field unchanged
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RatingEdit {
    pub rating: Option<u8>,
    /// `Some(None)` clears the feedback
    pub feedback: Option<Option<String>>,
    pub categories: Option<CategoryScores>,
    pub would_recommend: Option<bool>,
    pub is_public: Option<bool>,
    pub is_anonymous: Option<bool>,
}

impl RatingEdit {
    pub fn score(rating: u8) -> Self {
        Self {
            rating: Some(rating),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rating.is_none()
            && self.feedback.is_none()
            && self.categories.is_none()
            && self.would_recommend.is_none()
            && self.is_public.is_none()
            && self.is_anonymous.is_none()
    }

    pub fn validate(&self) -> CoreResult<()> {
        if self.is_empty() {
            return Err(CoreError::validation("edit", "no fields to update"));
        }
        if let Some(rating) = self.rating {
            check_score("rating", rating)?;
        }
        if let Some(Some(ref feedback)) = self.feedback {
            check_feedback(Some(feedback))?;
        }
        if let Some(ref categories) = self.categories {
            categories.validate()?;
        }
        Ok(())
    }

    pub fn apply(&self, rating: &mut Rating, now: DateTime<Utc>) {
        if let Some(score) = self.rating {
            rating.rating = score;
        }
        if let Some(ref feedback) = self.feedback {
            rating.feedback = feedback
                .as_ref()
                .map(|f| f.trim().to_string())
                .filter(|f| !f.is_empty());
        }
        if let Some(categories) = self.categories {
            rating.categories = categories;
        }
        if let Some(recommend) = self.would_recommend {
            rating.would_recommend = recommend;
        }
        if let Some(public) = self.is_public {
            rating.is_public = public;
        }
        if let Some(anonymous) = self.is_anonymous {
            rating.is_anonymous = anonymous;
        }
        rating.updated_at = now;
    }
}
