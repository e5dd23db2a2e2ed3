#![allow(dead_code)]

use danci_mastery_core::db::operations::{
    self, ConceptPrerequisiteRecord, ConceptRecord, KnowledgeAreaRecord, QuestionRecord,
    RelationshipType,
};
use danci_mastery_core::db::Database;

pub async fn memory_db() -> Database {
    Database::connect_in_memory()
        .await
        .expect("in-memory database")
}

pub async fn seed_course(db: &Database, course_id: &str, areas: &[(&str, i64)]) {
    operations::insert_course(db, course_id, &format!("Course {course_id}"))
        .await
        .expect("insert course");
    for (id, order) in areas {
        operations::upsert_knowledge_area(
            db,
            &KnowledgeAreaRecord {
                course_id: course_id.to_string(),
                id: id.to_string(),
                name: format!("Area {id}"),
                display_order: *order,
            },
        )
        .await
        .expect("insert knowledge area");
    }
}

pub async fn add_concept(db: &Database, course_id: &str, concept_id: &str, area_id: &str) {
    operations::insert_concept(
        db,
        &ConceptRecord {
            id: concept_id.to_string(),
            course_id: course_id.to_string(),
            knowledge_area_id: area_id.to_string(),
            name: concept_id.to_uppercase(),
            difficulty: 0.5,
            prerequisite_depth: 0,
        },
    )
    .await
    .expect("insert concept");
}

pub async fn add_edge(db: &Database, concept_id: &str, prerequisite_id: &str) {
    operations::insert_prerequisite(
        db,
        &ConceptPrerequisiteRecord {
            concept_id: concept_id.to_string(),
            prerequisite_concept_id: prerequisite_id.to_string(),
            strength: 1.0,
            relationship_type: RelationshipType::Required,
        },
    )
    .await
    .expect("insert prerequisite");
}

pub async fn add_question(
    db: &Database,
    course_id: &str,
    question_id: &str,
    area_id: &str,
    discrimination: f64,
    concept_ids: &[&str],
) {
    operations::insert_question(
        db,
        &QuestionRecord {
            id: question_id.to_string(),
            course_id: course_id.to_string(),
            knowledge_area_id: area_id.to_string(),
            discrimination: Some(discrimination),
            concept_ids: concept_ids.iter().map(|c| c.to_string()).collect(),
        },
    )
    .await
    .expect("insert question");
}
