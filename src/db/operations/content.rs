use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use crate::db::Database;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelationshipType {
    Required,
    Helpful,
    Related,
}

impl RelationshipType {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "required" => Some(Self::Required),
            "helpful" => Some(Self::Helpful),
            "related" => Some(Self::Related),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Required => "required",
            Self::Helpful => "helpful",
            Self::Related => "related",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KnowledgeAreaRecord {
    pub course_id: String,
    pub id: String,
    pub name: String,
    pub display_order: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConceptRecord {
    pub id: String,
    pub course_id: String,
    pub knowledge_area_id: String,
    pub name: String,
    pub difficulty: f64,
    pub prerequisite_depth: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConceptPrerequisiteRecord {
    pub concept_id: String,
    pub prerequisite_concept_id: String,
    pub strength: f64,
    pub relationship_type: RelationshipType,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionRecord {
    pub id: String,
    pub course_id: String,
    pub knowledge_area_id: String,
    pub discrimination: Option<f64>,
    pub concept_ids: Vec<String>,
}

pub async fn insert_course(db: &Database, course_id: &str, name: &str) -> Result<(), sqlx::Error> {
    sqlx::query(r#"INSERT INTO "courses" ("id", "name", "created_at") VALUES (?, ?, ?)"#)
        .bind(course_id)
        .bind(name)
        .bind(chrono::Utc::now().timestamp_millis())
        .execute(db.pool())
        .await?;
    Ok(())
}

pub async fn upsert_knowledge_area(db: &Database, area: &KnowledgeAreaRecord) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO "knowledge_areas" ("course_id", "id", "name", "display_order")
        VALUES (?, ?, ?, ?)
        ON CONFLICT ("course_id", "id") DO UPDATE SET
            "name" = excluded."name",
            "display_order" = excluded."display_order"
        "#,
    )
    .bind(&area.course_id)
    .bind(&area.id)
    .bind(&area.name)
    .bind(area.display_order)
    .execute(db.pool())
    .await?;
    Ok(())
}

pub async fn insert_concept(db: &Database, concept: &ConceptRecord) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO "concepts" (
            "id", "course_id", "knowledge_area_id", "name", "difficulty", "prerequisite_depth"
        ) VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&concept.id)
    .bind(&concept.course_id)
    .bind(&concept.knowledge_area_id)
    .bind(&concept.name)
    .bind(concept.difficulty)
    .bind(concept.prerequisite_depth)
    .execute(db.pool())
    .await?;
    Ok(())
}

pub async fn insert_prerequisite(
    db: &Database,
    edge: &ConceptPrerequisiteRecord,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO "concept_prerequisites" (
            "concept_id", "prerequisite_concept_id", "strength", "relationship_type"
        ) VALUES (?, ?, ?, ?)
        "#,
    )
    .bind(&edge.concept_id)
    .bind(&edge.prerequisite_concept_id)
    .bind(edge.strength)
    .bind(edge.relationship_type.as_str())
    .execute(db.pool())
    .await?;
    Ok(())
}

pub async fn insert_question(db: &Database, question: &QuestionRecord) -> Result<(), sqlx::Error> {
    let mut tx = db.pool().begin().await?;
    sqlx::query(
        r#"
        INSERT INTO "questions" ("id", "course_id", "knowledge_area_id", "discrimination")
        VALUES (?, ?, ?, ?)
        "#,
    )
    .bind(&question.id)
    .bind(&question.course_id)
    .bind(&question.knowledge_area_id)
    .bind(question.discrimination)
    .execute(&mut *tx)
    .await?;

    for concept_id in &question.concept_ids {
        sqlx::query(
            r#"INSERT OR IGNORE INTO "question_concepts" ("question_id", "concept_id") VALUES (?, ?)"#,
        )
        .bind(&question.id)
        .bind(concept_id)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await
}

pub async fn fetch_knowledge_areas(
    db: &Database,
    course_id: &str,
) -> Result<Vec<KnowledgeAreaRecord>, sqlx::Error> {
    let rows = sqlx::query(
        r#"
        SELECT "course_id", "id", "name", "display_order"
        FROM "knowledge_areas"
        WHERE "course_id" = ?
        ORDER BY "display_order" ASC, "id" ASC
        "#,
    )
    .bind(course_id)
    .fetch_all(db.pool())
    .await?;
    Ok(rows.iter().map(map_knowledge_area).collect())
}

/// Concepts ordered by id, optionally restricted to one course.
pub async fn fetch_concepts(
    db: &Database,
    course_id: Option<&str>,
) -> Result<Vec<ConceptRecord>, sqlx::Error> {
    let rows = match course_id {
        Some(course_id) => {
            sqlx::query(
                r#"
                SELECT "id", "course_id", "knowledge_area_id", "name", "difficulty", "prerequisite_depth"
                FROM "concepts"
                WHERE "course_id" = ?
                ORDER BY "id" ASC
                "#,
            )
            .bind(course_id)
            .fetch_all(db.pool())
            .await?
        }
        None => {
            sqlx::query(
                r#"
                SELECT "id", "course_id", "knowledge_area_id", "name", "difficulty", "prerequisite_depth"
                FROM "concepts"
                ORDER BY "id" ASC
                "#,
            )
            .fetch_all(db.pool())
            .await?
        }
    };
    Ok(rows.iter().map(map_concept).collect())
}

pub async fn count_concepts(db: &Database, course_id: &str) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar(r#"SELECT COUNT(*) FROM "concepts" WHERE "course_id" = ?"#)
        .bind(course_id)
        .fetch_one(db.pool())
        .await
}

/// Prerequisite edges whose dependent concept is in scope. Rows carrying an
/// unknown relationship type are dropped with a warning.
pub async fn fetch_prerequisites(
    db: &Database,
    course_id: Option<&str>,
) -> Result<Vec<ConceptPrerequisiteRecord>, sqlx::Error> {
    let rows = match course_id {
        Some(course_id) => {
            sqlx::query(
                r#"
                SELECT cp."concept_id", cp."prerequisite_concept_id", cp."strength", cp."relationship_type"
                FROM "concept_prerequisites" cp
                JOIN "concepts" c ON c."id" = cp."concept_id"
                WHERE c."course_id" = ?
                ORDER BY cp."concept_id" ASC, cp."prerequisite_concept_id" ASC
                "#,
            )
            .bind(course_id)
            .fetch_all(db.pool())
            .await?
        }
        None => {
            sqlx::query(
                r#"
                SELECT "concept_id", "prerequisite_concept_id", "strength", "relationship_type"
                FROM "concept_prerequisites"
                ORDER BY "concept_id" ASC, "prerequisite_concept_id" ASC
                "#,
            )
            .fetch_all(db.pool())
            .await?
        }
    };

    Ok(rows.iter().filter_map(map_prerequisite).collect())
}

/// Active questions with at least one linked concept, in id order.
pub async fn fetch_active_questions(
    db: &Database,
    course_id: &str,
) -> Result<Vec<QuestionRecord>, sqlx::Error> {
    let rows = sqlx::query(
        r#"
        SELECT q."id", q."course_id", q."knowledge_area_id", q."discrimination", qc."concept_id"
        FROM "questions" q
        JOIN "question_concepts" qc ON qc."question_id" = q."id"
        WHERE q."course_id" = ? AND q."is_active" = 1
        ORDER BY q."id" ASC, qc."concept_id" ASC
        "#,
    )
    .bind(course_id)
    .fetch_all(db.pool())
    .await?;

    let mut questions: Vec<QuestionRecord> = Vec::new();
    for row in &rows {
        let id: String = row.try_get("id").unwrap_or_default();
        let concept_id: String = row.try_get("concept_id").unwrap_or_default();
        match questions.last_mut() {
            Some(last) if last.id == id => last.concept_ids.push(concept_id),
            _ => questions.push(QuestionRecord {
                id,
                course_id: row.try_get("course_id").unwrap_or_default(),
                knowledge_area_id: row.try_get("knowledge_area_id").unwrap_or_default(),
                discrimination: row.try_get("discrimination").ok().flatten(),
                concept_ids: vec![concept_id],
            }),
        }
    }
    Ok(questions)
}

fn map_knowledge_area(row: &SqliteRow) -> KnowledgeAreaRecord {
    KnowledgeAreaRecord {
        course_id: row.try_get("course_id").unwrap_or_default(),
        id: row.try_get("id").unwrap_or_default(),
        name: row.try_get("name").unwrap_or_default(),
        display_order: row.try_get("display_order").unwrap_or(0),
    }
}

fn map_concept(row: &SqliteRow) -> ConceptRecord {
    ConceptRecord {
        id: row.try_get("id").unwrap_or_default(),
        course_id: row.try_get("course_id").unwrap_or_default(),
        knowledge_area_id: row.try_get("knowledge_area_id").unwrap_or_default(),
        name: row.try_get("name").unwrap_or_default(),
        difficulty: row.try_get("difficulty").unwrap_or(0.5),
        prerequisite_depth: row.try_get("prerequisite_depth").unwrap_or(0),
    }
}

fn map_prerequisite(row: &SqliteRow) -> Option<ConceptPrerequisiteRecord> {
    let concept_id: String = row.try_get("concept_id").unwrap_or_default();
    let prerequisite_concept_id: String = row.try_get("prerequisite_concept_id").unwrap_or_default();
    let raw_type: String = row.try_get("relationship_type").unwrap_or_default();

    let Some(relationship_type) = RelationshipType::parse(&raw_type) else {
        tracing::warn!(
            concept_id = %concept_id,
            prerequisite_concept_id = %prerequisite_concept_id,
            relationship_type = %raw_type,
            "skipping prerequisite edge with unknown relationship type"
        );
        return None;
    };

    Some(ConceptPrerequisiteRecord {
        concept_id,
        prerequisite_concept_id,
        strength: row.try_get("strength").unwrap_or(1.0),
        relationship_type,
    })
}
