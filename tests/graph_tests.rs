//! Prerequisite graph cache loaded from storage.

mod common;

use std::sync::Arc;

use danci_mastery_core::db::Database;
use danci_mastery_core::services::prerequisite_graph::{GraphError, PrerequisiteGraphCache};

use common::{add_concept, add_edge, memory_db, seed_course};

async fn branching_course(db: &Database) {
    // root -> {left, right}; left -> left_leaf; right -> right_leaf
    seed_course(db, "course-1", &[("ka", 1)]).await;
    for id in ["root", "left", "right", "left_leaf", "right_leaf"] {
        add_concept(db, "course-1", id, "ka").await;
    }
    add_edge(db, "left", "root").await;
    add_edge(db, "right", "root").await;
    add_edge(db, "left_leaf", "left").await;
    add_edge(db, "right_leaf", "right").await;
}

#[tokio::test]
async fn test_branching_course_roots_and_dependents() {
    let db = memory_db().await;
    branching_course(&db).await;

    let graph = PrerequisiteGraphCache::default();
    let stats = graph.load(&db, Some("course-1")).await.unwrap();

    assert_eq!(stats.node_count, 5);
    assert_eq!(stats.edge_count, 4);
    assert_eq!(stats.root_count, 1);
    assert_eq!(stats.course_id.as_deref(), Some("course-1"));
    assert!(!stats.slow_build);

    assert_eq!(graph.get_root_concepts().unwrap(), vec!["root".to_string()]);
    assert_eq!(
        graph.get_dependents("root").unwrap(),
        vec!["left".to_string(), "right".to_string()]
    );
    assert_eq!(graph.get_depth("left_leaf").unwrap(), 2);
    assert!(graph.get_prerequisite_chain("root", 10).unwrap().is_empty());

    let chain = graph.get_prerequisite_chain("right_leaf", 10).unwrap();
    let pairs: Vec<(&str, u32)> = chain.iter().map(|e| (e.concept_id.as_str(), e.depth)).collect();
    assert_eq!(pairs, vec![("right", 1), ("root", 2)]);
}

#[tokio::test]
async fn test_chain_and_diamond_from_storage() {
    let db = memory_db().await;
    seed_course(&db, "chain", &[]).await;
    for id in ["a", "b", "c", "d"] {
        add_concept(&db, "chain", id, "ka").await;
    }
    add_edge(&db, "b", "a").await;
    add_edge(&db, "c", "b").await;
    add_edge(&db, "d", "c").await;

    seed_course(&db, "diamond", &[]).await;
    for id in ["da", "db", "dc", "dd"] {
        add_concept(&db, "diamond", id, "ka").await;
    }
    add_edge(&db, "db", "da").await;
    add_edge(&db, "dc", "da").await;
    add_edge(&db, "dd", "db").await;
    add_edge(&db, "dd", "dc").await;

    let graph = PrerequisiteGraphCache::default();
    let stats = graph.load(&db, None).await.unwrap();
    assert_eq!(stats.node_count, 8);
    assert_eq!(stats.course_id, None);

    let chain = graph.get_prerequisite_chain("d", 10).unwrap();
    let pairs: Vec<(&str, u32)> = chain.iter().map(|e| (e.concept_id.as_str(), e.depth)).collect();
    assert_eq!(pairs, vec![("c", 1), ("b", 2), ("a", 3)]);

    let diamond = graph.get_prerequisite_chain("dd", 10).unwrap();
    assert_eq!(diamond.iter().filter(|e| e.concept_id == "da").count(), 1);
    assert_eq!(diamond.len(), 3);
}

#[tokio::test]
async fn test_course_scope_excludes_other_courses() {
    let db = memory_db().await;
    branching_course(&db).await;
    seed_course(&db, "course-2", &[]).await;
    add_concept(&db, "course-2", "other", "ka").await;
    add_edge(&db, "other", "root").await;

    let graph = PrerequisiteGraphCache::default();
    let stats = graph.load(&db, Some("course-1")).await.unwrap();
    assert_eq!(stats.node_count, 5);
    assert_eq!(stats.edge_count, 4);
    assert_eq!(graph.get_dependents("root").unwrap().len(), 2);
}

#[tokio::test]
async fn test_reload_picks_up_content_changes() {
    let db = memory_db().await;
    branching_course(&db).await;

    let graph = PrerequisiteGraphCache::default();
    graph.load(&db, Some("course-1")).await.unwrap();
    assert_eq!(graph.get_depth("left_leaf").unwrap(), 2);

    add_concept(&db, "course-1", "capstone", "ka").await;
    add_edge(&db, "capstone", "left_leaf").await;
    let stats = graph.reload(&db).await.unwrap();

    assert_eq!(stats.node_count, 6);
    assert_eq!(stats.course_id.as_deref(), Some("course-1"));
    assert_eq!(graph.get_depth("capstone").unwrap(), 3);
}

#[tokio::test]
async fn test_concurrent_loads_are_serialized() {
    let db = memory_db().await;
    branching_course(&db).await;

    let graph = Arc::new(PrerequisiteGraphCache::default());
    let (first, second) = tokio::join!(
        graph.load(&db, Some("course-1")),
        graph.load(&db, Some("course-1"))
    );
    let first = first.unwrap();
    let second = second.unwrap();

    assert_eq!(first.node_count, second.node_count);
    assert_eq!(first.edge_count, second.edge_count);
    let stats = graph.get_statistics().unwrap();
    assert_eq!(stats.node_count, 5);
    assert_eq!(stats.edge_count, 4);
}

#[tokio::test]
async fn test_queries_before_load_fail() {
    let graph = PrerequisiteGraphCache::default();
    assert!(matches!(graph.get_prerequisites("a"), Err(GraphError::NotLoaded)));
    assert!(matches!(graph.get_prerequisite_chain("a", 3), Err(GraphError::NotLoaded)));

    let db = memory_db().await;
    assert!(matches!(
        graph.load(&db, Some("  ")).await,
        Err(GraphError::InvalidParameter(_))
    ));
    assert!(!graph.is_loaded());
}

#[tokio::test]
async fn test_file_backed_database() {
    let temp_dir = tempfile::TempDir::new().expect("failed to create temp dir");
    let db_path = temp_dir.path().join("nested").join("mastery.db");
    let url = format!("sqlite:{}?mode=rwc", db_path.display());

    {
        let db = Database::connect(&url).await.unwrap();
        branching_course(&db).await;
    }
    assert!(db_path.exists());

    let db = Database::connect(&url).await.unwrap();
    let graph = PrerequisiteGraphCache::default();
    let stats = graph.load(&db, Some("course-1")).await.unwrap();
    assert_eq!(stats.node_count, 5);
}
