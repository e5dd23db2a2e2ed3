//! Per-(user, concept) Beta-distributed mastery beliefs.
//!
//! The classification is a pure function of `(alpha, beta)`; persistence of
//! belief rows lives at the bottom of this module.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use uuid::Uuid;

use crate::db::Database;

pub const CONFIDENCE_THRESHOLD: f64 = 0.7;
pub const MASTERED_THRESHOLD: f64 = 0.8;
pub const GAP_THRESHOLD: f64 = 0.5;

/// Largest f64 below 1.0; confidence never reaches certainty.
const MAX_CONFIDENCE: f64 = 1.0 - f64::EPSILON / 2.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BeliefStatus {
    Mastered,
    Gap,
    Borderline,
    Uncertain,
}

/// Self-reported familiarity captured at enrollment, mapped to a Beta prior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Familiarity {
    #[default]
    Unknown,
    Low,
    Medium,
    High,
}

impl Familiarity {
    /// Priors carry at most four pseudo-observations, which keeps confidence
    /// below the classification threshold until real responses arrive.
    pub fn prior(&self) -> (f64, f64) {
        match self {
            Self::Unknown => (1.0, 1.0),
            Self::Low => (1.0, 2.0),
            Self::Medium => (2.0, 2.0),
            Self::High => (3.0, 1.0),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BeliefError {
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    #[error(transparent)]
    Sql(#[from] sqlx::Error),
}

/// Derived view of a Beta(alpha, beta) belief.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Classification {
    pub mean: f64,
    pub confidence: f64,
    pub status: BeliefStatus,
}

pub fn mean(alpha: f64, beta: f64) -> f64 {
    alpha / (alpha + beta)
}

pub fn confidence(alpha: f64, beta: f64) -> f64 {
    let total = alpha + beta;
    (total / (total + 2.0)).min(MAX_CONFIDENCE)
}

/// Threshold rule over an already-derived mean and confidence.
pub fn status_for(mean: f64, confidence: f64) -> BeliefStatus {
    if confidence < CONFIDENCE_THRESHOLD {
        BeliefStatus::Uncertain
    } else if mean >= MASTERED_THRESHOLD {
        BeliefStatus::Mastered
    } else if mean < GAP_THRESHOLD {
        BeliefStatus::Gap
    } else {
        BeliefStatus::Borderline
    }
}

pub fn validate_parameters(alpha: f64, beta: f64) -> Result<(), BeliefError> {
    if !(alpha.is_finite() && alpha > 0.0) {
        return Err(BeliefError::InvalidParameter(format!("alpha must be positive, got {alpha}")));
    }
    if !(beta.is_finite() && beta > 0.0) {
        return Err(BeliefError::InvalidParameter(format!("beta must be positive, got {beta}")));
    }
    if !(alpha + beta).is_finite() {
        return Err(BeliefError::InvalidParameter(format!(
            "alpha + beta overflows: {alpha} + {beta}"
        )));
    }
    Ok(())
}

pub fn classify(alpha: f64, beta: f64) -> Result<Classification, BeliefError> {
    validate_parameters(alpha, beta)?;
    let mean = mean(alpha, beta);
    let confidence = confidence(alpha, beta);
    Ok(Classification {
        mean,
        confidence,
        status: status_for(mean, confidence),
    })
}

pub(crate) fn validate_id(field: &str, value: &str) -> Result<(), BeliefError> {
    if value.trim().is_empty() {
        return Err(BeliefError::InvalidParameter(format!("{field} must not be empty")));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BeliefState {
    pub user_id: String,
    pub concept_id: String,
    pub alpha: f64,
    pub beta: f64,
    pub response_count: i64,
    pub updated_at: DateTime<Utc>,
}

impl BeliefState {
    pub fn new(
        user_id: impl Into<String>,
        concept_id: impl Into<String>,
        alpha: f64,
        beta: f64,
    ) -> Result<Self, BeliefError> {
        let user_id = user_id.into();
        let concept_id = concept_id.into();
        validate_id("user_id", &user_id)?;
        validate_id("concept_id", &concept_id)?;
        validate_parameters(alpha, beta)?;
        Ok(Self {
            user_id,
            concept_id,
            alpha,
            beta,
            response_count: 0,
            updated_at: Utc::now(),
        })
    }

    pub fn with_prior(
        user_id: impl Into<String>,
        concept_id: impl Into<String>,
        familiarity: Familiarity,
    ) -> Result<Self, BeliefError> {
        let (alpha, beta) = familiarity.prior();
        Self::new(user_id, concept_id, alpha, beta)
    }

    pub fn mean(&self) -> f64 {
        mean(self.alpha, self.beta)
    }

    pub fn confidence(&self) -> f64 {
        confidence(self.alpha, self.beta)
    }

    pub fn status(&self) -> BeliefStatus {
        status_for(self.mean(), self.confidence())
    }

    pub fn classification(&self) -> Classification {
        Classification {
            mean: self.mean(),
            confidence: self.confidence(),
            status: self.status(),
        }
    }

    /// Conjugate update for one observed response.
    pub fn apply_response(&mut self, correct: bool, weight: f64) -> Result<(), BeliefError> {
        if !(weight.is_finite() && weight > 0.0) {
            return Err(BeliefError::InvalidParameter(format!("weight must be positive, got {weight}")));
        }
        let (alpha, beta) = if correct {
            (self.alpha + weight, self.beta)
        } else {
            (self.alpha, self.beta + weight)
        };
        validate_parameters(alpha, beta)?;
        self.alpha = alpha;
        self.beta = beta;
        self.response_count += 1;
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn reset(&mut self, familiarity: Familiarity) {
        let (alpha, beta) = familiarity.prior();
        self.alpha = alpha;
        self.beta = beta;
        self.response_count = 0;
        self.updated_at = Utc::now();
    }
}

// ---------------------------------------------------------------------------
// Persistence
// ---------------------------------------------------------------------------

/// Creates prior beliefs for every concept of the course the user has no
/// row for yet. Existing rows are left untouched, so concurrent or repeated
/// calls converge on one row per concept. Returns the number inserted.
pub async fn initialize_beliefs(
    db: &Database,
    user_id: &str,
    course_id: &str,
    familiarity: Familiarity,
) -> Result<u64, BeliefError> {
    validate_id("user_id", user_id)?;
    validate_id("course_id", course_id)?;
    let (alpha, beta) = familiarity.prior();

    // One autocommit statement: the write lock is taken up front, so racing
    // initializers wait on busy_timeout instead of failing a stale read.
    let inserted = sqlx::query(
        r#"
        INSERT INTO "belief_states" (
            "id", "user_id", "concept_id", "alpha", "beta", "response_count", "updated_at"
        )
        SELECT lower(hex(randomblob(16))), ?, c."id", ?, ?, 0, ?
        FROM "concepts" c
        WHERE c."course_id" = ?
        ON CONFLICT ("user_id", "concept_id") DO NOTHING
        "#,
    )
    .bind(user_id)
    .bind(alpha)
    .bind(beta)
    .bind(Utc::now().timestamp_millis())
    .bind(course_id)
    .execute(db.pool())
    .await?
    .rows_affected();

    tracing::debug!(user_id, course_id, inserted, "initialized belief states");
    Ok(inserted)
}

pub async fn get_belief(
    db: &Database,
    user_id: &str,
    concept_id: &str,
) -> Result<Option<BeliefState>, BeliefError> {
    let row = sqlx::query(
        r#"
        SELECT "user_id", "concept_id", "alpha", "beta", "response_count", "updated_at"
        FROM "belief_states"
        WHERE "user_id" = ? AND "concept_id" = ?
        LIMIT 1
        "#,
    )
    .bind(user_id)
    .bind(concept_id)
    .fetch_optional(db.pool())
    .await?;
    Ok(row.as_ref().map(map_belief_row))
}

pub async fn get_beliefs_for_course(
    db: &Database,
    user_id: &str,
    course_id: &str,
) -> Result<Vec<BeliefState>, BeliefError> {
    validate_id("user_id", user_id)?;
    validate_id("course_id", course_id)?;
    let rows = sqlx::query(
        r#"
        SELECT b."user_id", b."concept_id", b."alpha", b."beta", b."response_count", b."updated_at"
        FROM "belief_states" b
        JOIN "concepts" c ON c."id" = b."concept_id"
        WHERE b."user_id" = ? AND c."course_id" = ?
        ORDER BY b."concept_id" ASC
        "#,
    )
    .bind(user_id)
    .bind(course_id)
    .fetch_all(db.pool())
    .await?;
    Ok(rows.iter().map(map_belief_row).collect())
}

/// Upserts a belief produced by the response updater. Last write wins.
pub async fn save_belief(db: &Database, belief: &BeliefState) -> Result<(), BeliefError> {
    validate_id("user_id", &belief.user_id)?;
    validate_id("concept_id", &belief.concept_id)?;
    validate_parameters(belief.alpha, belief.beta)?;

    sqlx::query(
        r#"
        INSERT INTO "belief_states" (
            "id", "user_id", "concept_id", "alpha", "beta", "response_count", "updated_at"
        ) VALUES (?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT ("user_id", "concept_id") DO UPDATE SET
            "alpha" = excluded."alpha",
            "beta" = excluded."beta",
            "response_count" = excluded."response_count",
            "updated_at" = excluded."updated_at"
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(&belief.user_id)
    .bind(&belief.concept_id)
    .bind(belief.alpha)
    .bind(belief.beta)
    .bind(belief.response_count)
    .bind(belief.updated_at.timestamp_millis())
    .execute(db.pool())
    .await?;
    Ok(())
}

/// Reinitializes one belief to its prior. Returns false when no row existed.
pub async fn reset_belief(
    db: &Database,
    user_id: &str,
    concept_id: &str,
    familiarity: Familiarity,
) -> Result<bool, BeliefError> {
    validate_id("user_id", user_id)?;
    validate_id("concept_id", concept_id)?;
    let (alpha, beta) = familiarity.prior();

    let result = sqlx::query(
        r#"
        UPDATE "belief_states"
        SET "alpha" = ?, "beta" = ?, "response_count" = 0, "updated_at" = ?
        WHERE "user_id" = ? AND "concept_id" = ?
        "#,
    )
    .bind(alpha)
    .bind(beta)
    .bind(Utc::now().timestamp_millis())
    .bind(user_id)
    .bind(concept_id)
    .execute(db.pool())
    .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn count_beliefs(db: &Database, user_id: &str, course_id: &str) -> Result<i64, BeliefError> {
    let count = sqlx::query_scalar(
        r#"
        SELECT COUNT(*)
        FROM "belief_states" b
        JOIN "concepts" c ON c."id" = b."concept_id"
        WHERE b."user_id" = ? AND c."course_id" = ?
        "#,
    )
    .bind(user_id)
    .bind(course_id)
    .fetch_one(db.pool())
    .await?;
    Ok(count)
}

fn map_belief_row(row: &SqliteRow) -> BeliefState {
    let updated_ms: i64 = row.try_get("updated_at").unwrap_or(0);
    BeliefState {
        user_id: row.try_get("user_id").unwrap_or_default(),
        concept_id: row.try_get("concept_id").unwrap_or_default(),
        alpha: row.try_get("alpha").unwrap_or(1.0),
        beta: row.try_get("beta").unwrap_or(1.0),
        response_count: row.try_get("response_count").unwrap_or(0),
        updated_at: DateTime::from_timestamp_millis(updated_ms).unwrap_or_else(Utc::now),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uninformative_prior_is_uncertain() {
        let c = classify(1.0, 1.0).unwrap();
        assert_eq!(c.status, BeliefStatus::Uncertain);
        assert!((c.mean - 0.5).abs() < 1e-12);
        assert!((c.confidence - 0.5).abs() < 1e-12);
    }

    #[test]
    fn boundaries_are_inclusive_on_the_higher_side() {
        assert_eq!(classify(16.0, 4.0).unwrap().status, BeliefStatus::Mastered);
        assert_eq!(classify(10.0, 10.0).unwrap().status, BeliefStatus::Borderline);
        assert_eq!(classify(2.0, 20.0).unwrap().status, BeliefStatus::Gap);
    }

    #[test]
    fn confidence_threshold_gates_classification() {
        // 4.5 pseudo-observations: confidence 0.69 despite a high mean
        assert_eq!(classify(4.0, 0.5).unwrap().status, BeliefStatus::Uncertain);
        // 5 pseudo-observations: confidence 0.714, mean 0.7
        assert_eq!(classify(3.5, 1.5).unwrap().status, BeliefStatus::Borderline);
        assert_eq!(status_for(0.95, 0.69), BeliefStatus::Uncertain);
        assert_eq!(status_for(0.95, 0.70), BeliefStatus::Mastered);
    }

    #[test]
    fn non_positive_parameters_are_rejected() {
        assert!(matches!(classify(0.0, 1.0), Err(BeliefError::InvalidParameter(_))));
        assert!(matches!(classify(1.0, -2.0), Err(BeliefError::InvalidParameter(_))));
        assert!(matches!(classify(f64::NAN, 1.0), Err(BeliefError::InvalidParameter(_))));
        assert!(matches!(classify(1.0, f64::INFINITY), Err(BeliefError::InvalidParameter(_))));
    }

    #[test]
    fn huge_parameters_keep_confidence_below_one() {
        let c = classify(1e17, 1.0).unwrap();
        assert!(c.confidence < 1.0);
        assert_eq!(c.status, BeliefStatus::Mastered);

        let c = classify(1e300, 1e300).unwrap();
        assert!(c.confidence < 1.0);
        assert!((c.mean - 0.5).abs() < 1e-12);
        assert_eq!(c.status, BeliefStatus::Borderline);

        assert!(matches!(classify(1e308, 1e308), Err(BeliefError::InvalidParameter(_))));
        assert!(matches!(classify(f64::MAX, f64::MAX), Err(BeliefError::InvalidParameter(_))));
    }

    #[test]
    fn overflowing_response_is_rejected_without_mutation() {
        let mut belief = BeliefState::new("u1", "c1", f64::MAX, 1.0).unwrap();
        assert!(belief.apply_response(true, f64::MAX).is_err());
        assert_eq!(belief.alpha, f64::MAX);
        assert_eq!(belief.response_count, 0);
    }

    #[test]
    fn every_familiarity_prior_stays_uncertain() {
        for familiarity in [Familiarity::Unknown, Familiarity::Low, Familiarity::Medium, Familiarity::High] {
            let (alpha, beta) = familiarity.prior();
            assert_eq!(classify(alpha, beta).unwrap().status, BeliefStatus::Uncertain);
        }
    }

    #[test]
    fn responses_move_the_estimate() {
        let mut belief = BeliefState::new("u1", "c1", 1.0, 1.0).unwrap();
        for _ in 0..15 {
            belief.apply_response(true, 1.0).unwrap();
        }
        belief.apply_response(false, 1.0).unwrap();
        assert_eq!(belief.response_count, 16);
        assert_eq!(belief.status(), BeliefStatus::Mastered);

        belief.reset(Familiarity::Unknown);
        assert_eq!(belief.response_count, 0);
        assert_eq!(belief.status(), BeliefStatus::Uncertain);
    }

    #[test]
    fn blank_ids_are_rejected() {
        assert!(matches!(
            BeliefState::new(" ", "c1", 1.0, 1.0),
            Err(BeliefError::InvalidParameter(_))
        ));
        let mut belief = BeliefState::new("u1", "c1", 1.0, 1.0).unwrap();
        assert!(belief.apply_response(true, 0.0).is_err());
    }
}
