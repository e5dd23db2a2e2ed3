//! Coverage reports over a learner's belief states.
//!
//! Only the summary (counts and percentages) is cached; knowledge-area
//! breakdowns and detail lists are always computed from live rows.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::Row;

use crate::cache::keys::{coverage_summary_key, COVERAGE_SUMMARY_TTL};
use crate::cache::SummaryCache;
use crate::db::operations::{self, KnowledgeAreaRecord};
use crate::db::Database;
use crate::services::belief_state::{classify, BeliefError, BeliefStatus};

const QUESTIONS_PER_UNCERTAIN_CONCEPT: usize = 4;
const CONCEPTS_PER_QUESTION: usize = 2;

#[derive(Debug, thiserror::Error)]
pub enum CoverageError {
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    #[error(transparent)]
    Belief(#[from] BeliefError),
    #[error(transparent)]
    Sql(#[from] sqlx::Error),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusCounts {
    pub mastered: usize,
    pub gap: usize,
    pub borderline: usize,
    pub uncertain: usize,
}

impl StatusCounts {
    pub fn record(&mut self, status: BeliefStatus) {
        match status {
            BeliefStatus::Mastered => self.mastered += 1,
            BeliefStatus::Gap => self.gap += 1,
            BeliefStatus::Borderline => self.borderline += 1,
            BeliefStatus::Uncertain => self.uncertain += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.mastered + self.gap + self.borderline + self.uncertain
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoverageSummary {
    pub user_id: String,
    pub course_id: String,
    pub total_concepts: usize,
    #[serde(flatten)]
    pub counts: StatusCounts,
    pub coverage_percentage: f64,
    pub confidence_percentage: f64,
    pub estimated_questions_remaining: usize,
    pub computed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KnowledgeAreaCoverage {
    pub knowledge_area_id: String,
    pub name: String,
    pub display_order: Option<i64>,
    pub total_concepts: usize,
    #[serde(flatten)]
    pub counts: StatusCounts,
    pub readiness: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoverageReport {
    #[serde(flatten)]
    pub summary: CoverageSummary,
    pub knowledge_areas: Vec<KnowledgeAreaCoverage>,
    pub from_cache: bool,
}

/// One concept's belief as shown in reports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConceptMastery {
    pub concept_id: String,
    pub name: String,
    pub knowledge_area_id: String,
    pub mean: f64,
    pub confidence: f64,
    pub status: BeliefStatus,
    pub response_count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetailedCoverage {
    #[serde(flatten)]
    pub report: CoverageReport,
    pub mastered: Vec<ConceptMastery>,
    pub gaps: Vec<ConceptMastery>,
    pub borderline: Vec<ConceptMastery>,
    pub uncertain: Vec<ConceptMastery>,
}

fn ratio(part: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 / total as f64
    }
}

pub fn summarize(user_id: &str, course_id: &str, concepts: &[ConceptMastery]) -> CoverageSummary {
    let mut counts = StatusCounts::default();
    for concept in concepts {
        counts.record(concept.status);
    }
    let total = counts.total();

    CoverageSummary {
        user_id: user_id.to_string(),
        course_id: course_id.to_string(),
        total_concepts: total,
        counts,
        coverage_percentage: ratio(counts.mastered, total),
        confidence_percentage: ratio(counts.mastered + counts.gap + counts.borderline, total),
        estimated_questions_remaining: counts.uncertain * QUESTIONS_PER_UNCERTAIN_CONCEPT
            / CONCEPTS_PER_QUESTION,
        computed_at: Utc::now(),
    }
}

/// Per-area counts in the course's display order. Areas that only appear on
/// concepts (not in the course configuration) follow, ordered by id.
pub fn knowledge_area_breakdown(
    concepts: &[ConceptMastery],
    areas: &[KnowledgeAreaRecord],
) -> Vec<KnowledgeAreaCoverage> {
    let mut counts: HashMap<&str, StatusCounts> = HashMap::new();
    for concept in concepts {
        counts
            .entry(concept.knowledge_area_id.as_str())
            .or_default()
            .record(concept.status);
    }

    let mut configured: Vec<&KnowledgeAreaRecord> = areas.iter().collect();
    configured.sort_by(|a, b| a.display_order.cmp(&b.display_order).then_with(|| a.id.cmp(&b.id)));

    let mut breakdown: Vec<KnowledgeAreaCoverage> = configured
        .iter()
        .map(|area| {
            let area_counts = counts.remove(area.id.as_str()).unwrap_or_default();
            area_coverage(&area.id, &area.name, Some(area.display_order), area_counts)
        })
        .collect();

    let mut unconfigured: Vec<(&str, StatusCounts)> = counts.into_iter().collect();
    unconfigured.sort_by(|a, b| a.0.cmp(b.0));
    breakdown.extend(
        unconfigured
            .into_iter()
            .map(|(id, area_counts)| area_coverage(id, id, None, area_counts)),
    );

    breakdown
}

fn area_coverage(id: &str, name: &str, display_order: Option<i64>, counts: StatusCounts) -> KnowledgeAreaCoverage {
    let total = counts.total();
    KnowledgeAreaCoverage {
        knowledge_area_id: id.to_string(),
        name: name.to_string(),
        display_order,
        total_concepts: total,
        counts,
        readiness: ratio(counts.mastered, total),
    }
}

fn by_mean(a: &ConceptMastery, b: &ConceptMastery) -> Ordering {
    a.mean.total_cmp(&b.mean).then_with(|| a.concept_id.cmp(&b.concept_id))
}

/// Gap concepts, worst first.
pub fn gap_concepts(concepts: &[ConceptMastery], limit: Option<usize>) -> Vec<ConceptMastery> {
    let mut gaps: Vec<ConceptMastery> = concepts
        .iter()
        .filter(|c| c.status == BeliefStatus::Gap)
        .cloned()
        .collect();
    gaps.sort_by(by_mean);
    if let Some(limit) = limit {
        gaps.truncate(limit);
    }
    gaps
}

/// Splits concepts by status: mastered strongest first, gaps and borderline
/// weakest first, uncertain least confident first.
pub fn partition_by_status(
    concepts: &[ConceptMastery],
) -> (Vec<ConceptMastery>, Vec<ConceptMastery>, Vec<ConceptMastery>, Vec<ConceptMastery>) {
    let mut mastered = Vec::new();
    let mut gaps = Vec::new();
    let mut borderline = Vec::new();
    let mut uncertain = Vec::new();

    for concept in concepts.iter().cloned() {
        match concept.status {
            BeliefStatus::Mastered => mastered.push(concept),
            BeliefStatus::Gap => gaps.push(concept),
            BeliefStatus::Borderline => borderline.push(concept),
            BeliefStatus::Uncertain => uncertain.push(concept),
        }
    }

    mastered.sort_by(|a, b| b.mean.total_cmp(&a.mean).then_with(|| a.concept_id.cmp(&b.concept_id)));
    gaps.sort_by(by_mean);
    borderline.sort_by(by_mean);
    uncertain.sort_by(|a, b| {
        a.confidence
            .total_cmp(&b.confidence)
            .then_with(|| a.concept_id.cmp(&b.concept_id))
    });

    (mastered, gaps, borderline, uncertain)
}

pub struct CoverageAnalyzer {
    db: Database,
    cache: Arc<SummaryCache>,
    ttl: Duration,
    /// Bumped on every invalidation; a summary computed under an older
    /// generation is never written back.
    generation: AtomicU64,
}

impl CoverageAnalyzer {
    pub fn new(db: Database, cache: Arc<SummaryCache>) -> Self {
        Self::with_ttl(db, cache, COVERAGE_SUMMARY_TTL)
    }

    pub fn with_ttl(db: Database, cache: Arc<SummaryCache>, ttl: Duration) -> Self {
        Self {
            db,
            cache,
            ttl,
            generation: AtomicU64::new(0),
        }
    }

    pub async fn analyze_coverage(
        &self,
        user_id: &str,
        course_id: &str,
        use_cache: bool,
    ) -> Result<CoverageReport, CoverageError> {
        validate_ids(user_id, course_id)?;

        let cached = if use_cache {
            self.cached_summary(user_id, course_id).await
        } else {
            None
        };
        let from_cache = cached.is_some();

        let generation = self.current_generation();
        let concepts = self.load_concepts(user_id, course_id).await?;
        let areas = operations::fetch_knowledge_areas(&self.db, course_id).await?;

        let summary = match cached {
            Some(summary) => summary,
            None => {
                let summary = summarize(user_id, course_id, &concepts);
                self.store_summary(&summary, generation).await;
                summary
            }
        };

        Ok(CoverageReport {
            summary,
            knowledge_areas: knowledge_area_breakdown(&concepts, &areas),
            from_cache,
        })
    }

    /// Summary only; served from cache without touching storage on a hit.
    pub async fn coverage_summary(
        &self,
        user_id: &str,
        course_id: &str,
        use_cache: bool,
    ) -> Result<CoverageSummary, CoverageError> {
        validate_ids(user_id, course_id)?;
        if use_cache {
            if let Some(summary) = self.cached_summary(user_id, course_id).await {
                return Ok(summary);
            }
        }

        let generation = self.current_generation();
        let concepts = self.load_concepts(user_id, course_id).await?;
        let summary = summarize(user_id, course_id, &concepts);
        self.store_summary(&summary, generation).await;
        Ok(summary)
    }

    pub async fn get_gap_concepts(
        &self,
        user_id: &str,
        course_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<ConceptMastery>, CoverageError> {
        validate_ids(user_id, course_id)?;
        let concepts = self.load_concepts(user_id, course_id).await?;
        Ok(gap_concepts(&concepts, limit))
    }

    pub async fn get_detailed_coverage(
        &self,
        user_id: &str,
        course_id: &str,
    ) -> Result<DetailedCoverage, CoverageError> {
        validate_ids(user_id, course_id)?;
        let generation = self.current_generation();
        let concepts = self.load_concepts(user_id, course_id).await?;
        let areas = operations::fetch_knowledge_areas(&self.db, course_id).await?;

        let summary = summarize(user_id, course_id, &concepts);
        self.store_summary(&summary, generation).await;
        let knowledge_areas = knowledge_area_breakdown(&concepts, &areas);
        let (mastered, gaps, borderline, uncertain) = partition_by_status(&concepts);

        Ok(DetailedCoverage {
            report: CoverageReport {
                summary,
                knowledge_areas,
                from_cache: false,
            },
            mastered,
            gaps,
            borderline,
            uncertain,
        })
    }

    /// Drops the cached summary; call whenever the user's beliefs change.
    pub async fn invalidate(&self, user_id: &str) {
        self.generation.fetch_add(1, AtomicOrdering::SeqCst);
        self.cache.delete(&coverage_summary_key(user_id)).await;
        tracing::debug!(user_id, "coverage summary invalidated");
    }

    async fn cached_summary(&self, user_id: &str, course_id: &str) -> Option<CoverageSummary> {
        let summary: CoverageSummary = self.cache.get(&coverage_summary_key(user_id)).await?;
        if summary.course_id != course_id {
            tracing::debug!(user_id, course_id, cached_course = %summary.course_id, "coverage cache course mismatch");
            return None;
        }
        tracing::debug!(user_id, course_id, "coverage cache hit");
        Some(summary)
    }

    fn current_generation(&self) -> u64 {
        self.generation.load(AtomicOrdering::SeqCst)
    }

    /// Writes the summary unless an invalidation landed after its rows were
    /// read. A write racing an invalidation is rolled back by a second delete.
    async fn store_summary(&self, summary: &CoverageSummary, generation: u64) {
        if self.current_generation() != generation {
            tracing::debug!(user_id = %summary.user_id, "coverage summary stale, not cached");
            return;
        }
        let key = coverage_summary_key(&summary.user_id);
        self.cache.set(&key, summary, self.ttl).await;
        if self.current_generation() != generation {
            self.cache.delete(&key).await;
        }
    }

    async fn load_concepts(&self, user_id: &str, course_id: &str) -> Result<Vec<ConceptMastery>, CoverageError> {
        let rows = sqlx::query(
            r#"
            SELECT b."concept_id", c."name", c."knowledge_area_id",
                   b."alpha", b."beta", b."response_count"
            FROM "belief_states" b
            JOIN "concepts" c ON c."id" = b."concept_id"
            WHERE b."user_id" = ? AND c."course_id" = ?
            ORDER BY b."concept_id" ASC
            "#,
        )
        .bind(user_id)
        .bind(course_id)
        .fetch_all(self.db.pool())
        .await?;

        let mut concepts = Vec::with_capacity(rows.len());
        for row in &rows {
            let alpha: f64 = row.try_get("alpha").unwrap_or(1.0);
            let beta: f64 = row.try_get("beta").unwrap_or(1.0);
            let classification = classify(alpha, beta)?;
            concepts.push(ConceptMastery {
                concept_id: row.try_get("concept_id").unwrap_or_default(),
                name: row.try_get("name").unwrap_or_default(),
                knowledge_area_id: row.try_get("knowledge_area_id").unwrap_or_default(),
                mean: classification.mean,
                confidence: classification.confidence,
                status: classification.status,
                response_count: row.try_get("response_count").unwrap_or(0),
            });
        }
        Ok(concepts)
    }
}

fn validate_ids(user_id: &str, course_id: &str) -> Result<(), CoverageError> {
    if user_id.trim().is_empty() {
        return Err(CoverageError::InvalidParameter("user_id must not be empty".to_string()));
    }
    if course_id.trim().is_empty() {
        return Err(CoverageError::InvalidParameter("course_id must not be empty".to_string()));
    }
    Ok(())
}
