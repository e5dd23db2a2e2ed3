//! Greedy diagnostic question selection.
//!
//! Each round scores every eligible question by the concepts it would newly
//! cover, its discrimination and the headroom left in its knowledge area, and
//! takes the best. Ties go to the earliest question in pool order, so the
//! ranked sequence is reproducible; only the final presentation order is
//! shuffled.

use std::collections::{BTreeSet, HashMap, HashSet};

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::db::operations::{self, QuestionRecord};
use crate::db::Database;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectorWeights {
    pub coverage: f64,
    pub discrimination: f64,
    pub balance: f64,
}

impl Default for SelectorWeights {
    fn default() -> Self {
        Self {
            coverage: 10.0,
            discrimination: 5.0,
            balance: 2.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectorConfig {
    pub min_questions: usize,
    pub max_questions: usize,
    pub default_questions: usize,
    pub max_per_knowledge_area: usize,
    /// Used for questions without a calibrated discrimination.
    pub default_discrimination: f64,
    pub weights: SelectorWeights,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            min_questions: 12,
            max_questions: 20,
            default_questions: 15,
            max_per_knowledge_area: 4,
            default_discrimination: 1.0,
            weights: SelectorWeights::default(),
        }
    }
}

impl SelectorConfig {
    /// Requested size clamped into `[min_questions, max_questions]`.
    pub fn target_count(&self, requested: Option<usize>) -> usize {
        let lower = self.min_questions.min(self.max_questions);
        requested
            .unwrap_or(self.default_questions)
            .clamp(lower, self.max_questions)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SelectorError {
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    #[error(transparent)]
    Sql(#[from] sqlx::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticSelection {
    pub questions: Vec<QuestionRecord>,
    pub covered_concept_ids: Vec<String>,
    pub total_concepts: usize,
    pub target_count: usize,
}

impl DiagnosticSelection {
    /// True when the pool ran out or every knowledge area hit its cap first.
    pub fn is_short(&self) -> bool {
        self.questions.len() < self.target_count
    }

    pub fn coverage_ratio(&self) -> f64 {
        if self.total_concepts == 0 {
            return 0.0;
        }
        self.covered_concept_ids.len() as f64 / self.total_concepts as f64
    }
}

struct Candidate<'a> {
    question: &'a QuestionRecord,
    concepts: HashSet<&'a str>,
    discrimination: f64,
}

/// Greedy selection in pick order (before any shuffle).
pub fn select_ranked(pool: &[QuestionRecord], target: usize, config: &SelectorConfig) -> Vec<QuestionRecord> {
    let weights = &config.weights;
    let cap = config.max_per_knowledge_area;

    let mut candidates: Vec<Option<Candidate<'_>>> = pool
        .iter()
        .map(|question| {
            Some(Candidate {
                question,
                concepts: question.concept_ids.iter().map(String::as_str).collect(),
                discrimination: question.discrimination.unwrap_or(config.default_discrimination),
            })
        })
        .collect();

    let mut selected: Vec<QuestionRecord> = Vec::with_capacity(target.min(pool.len()));
    let mut covered: HashSet<&str> = HashSet::new();
    let mut per_area: HashMap<&str, usize> = HashMap::new();

    while selected.len() < target {
        let mut best: Option<(usize, f64)> = None;

        for (i, slot) in candidates.iter().enumerate() {
            let Some(candidate) = slot else { continue };
            let area_count = per_area
                .get(candidate.question.knowledge_area_id.as_str())
                .copied()
                .unwrap_or(0);
            if area_count >= cap {
                continue;
            }

            let new_concepts = candidate.concepts.difference(&covered).count();
            let score = weights.coverage * new_concepts as f64
                + weights.discrimination * candidate.discrimination
                + weights.balance * (cap - area_count) as f64;

            if best.map_or(true, |(_, top)| score > top) {
                best = Some((i, score));
            }
        }

        let Some((index, score)) = best else {
            tracing::debug!(
                selected = selected.len(),
                target,
                "diagnostic pool exhausted before reaching target"
            );
            break;
        };

        if let Some(chosen) = candidates[index].take() {
            tracing::trace!(question_id = %chosen.question.id, score, "selected diagnostic question");
            covered.extend(chosen.concepts.iter().copied());
            *per_area
                .entry(chosen.question.knowledge_area_id.as_str())
                .or_insert(0) += 1;
            selected.push(chosen.question.clone());
        }
    }

    selected
}

/// Selects and shuffles with the supplied RNG.
pub fn select_with_rng<R: Rng + ?Sized>(
    pool: &[QuestionRecord],
    requested: Option<usize>,
    total_concepts: usize,
    config: &SelectorConfig,
    rng: &mut R,
) -> DiagnosticSelection {
    let target_count = config.target_count(requested);
    let mut questions = select_ranked(pool, target_count, config);

    let covered: BTreeSet<&str> = questions
        .iter()
        .flat_map(|q| q.concept_ids.iter().map(String::as_str))
        .collect();
    let covered_concept_ids = covered.into_iter().map(str::to_string).collect();

    questions.shuffle(rng);

    DiagnosticSelection {
        questions,
        covered_concept_ids,
        total_concepts,
        target_count,
    }
}

pub fn select(
    pool: &[QuestionRecord],
    requested: Option<usize>,
    total_concepts: usize,
    config: &SelectorConfig,
) -> DiagnosticSelection {
    select_with_rng(pool, requested, total_concepts, config, &mut rand::rng())
}

/// Loads the course's active question pool and selects a diagnostic set.
pub async fn select_for_course(
    db: &Database,
    course_id: &str,
    requested: Option<usize>,
    config: &SelectorConfig,
) -> Result<DiagnosticSelection, SelectorError> {
    if course_id.trim().is_empty() {
        return Err(SelectorError::InvalidParameter("course_id must not be empty".to_string()));
    }

    let pool = operations::fetch_active_questions(db, course_id).await?;
    let total_concepts = operations::count_concepts(db, course_id).await?.max(0) as usize;
    let selection = select(&pool, requested, total_concepts, config);

    tracing::info!(
        course_id,
        pool = pool.len(),
        selected = selection.questions.len(),
        target = selection.target_count,
        covered = selection.covered_concept_ids.len(),
        total_concepts,
        "diagnostic questions selected"
    );
    if selection.is_short() {
        tracing::info!(course_id, "diagnostic selection returned fewer questions than requested");
    }

    Ok(selection)
}
