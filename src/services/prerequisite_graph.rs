//! In-memory prerequisite DAG.
//!
//! Concepts are stored in an arena addressed by dense indices; forward
//! (`concept -> prerequisites`) and reverse (`prerequisite -> dependents`)
//! adjacency are index lists. A build produces an immutable [`GraphSnapshot`]
//! which the cache swaps in whole, so readers only ever see a completed graph.
//!
//! The edge set is assumed acyclic. A cyclic edge set is reported and
//! tolerated: traversal still terminates thanks to its visited set, but the
//! depth of nodes on or behind a cycle falls back to the stored value.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::db::operations::{self, ConceptPrerequisiteRecord, ConceptRecord, RelationshipType};
use crate::db::Database;

pub const DEFAULT_SLOW_BUILD_THRESHOLD: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    #[error("prerequisite graph has not been loaded")]
    NotLoaded,
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    #[error(transparent)]
    Sql(#[from] sqlx::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrerequisiteLink {
    pub prerequisite_id: String,
    pub strength: f64,
    pub relationship_type: RelationshipType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainEntry {
    pub concept_id: String,
    pub depth: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphStatistics {
    pub course_id: Option<String>,
    pub node_count: usize,
    pub edge_count: usize,
    pub root_count: usize,
    pub cyclic_node_count: usize,
    pub build_duration_ms: u64,
    pub slow_build: bool,
    pub loaded_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct ConceptNode {
    id: String,
    knowledge_area_id: String,
    depth: u32,
}

#[derive(Debug, Clone, Copy)]
struct Edge {
    target: usize,
    strength: f64,
    relationship_type: RelationshipType,
}

#[derive(Debug)]
pub struct GraphSnapshot {
    index: HashMap<String, usize>,
    nodes: Vec<ConceptNode>,
    prerequisites: Vec<Vec<Edge>>,
    dependents: Vec<Vec<usize>>,
    roots: Vec<usize>,
    stats: GraphStatistics,
}

impl GraphSnapshot {
    /// Builds a snapshot from concept and edge rows. Edges touching concepts
    /// outside `concepts`, self-loops and duplicates are dropped.
    pub fn build(
        course_id: Option<&str>,
        concepts: &[ConceptRecord],
        edges: &[ConceptPrerequisiteRecord],
    ) -> Self {
        let mut index = HashMap::with_capacity(concepts.len());
        let mut nodes = Vec::with_capacity(concepts.len());
        let mut stored_depths = Vec::with_capacity(concepts.len());

        for concept in concepts {
            if index.contains_key(&concept.id) {
                tracing::warn!(concept_id = %concept.id, "duplicate concept row ignored");
                continue;
            }
            index.insert(concept.id.clone(), nodes.len());
            stored_depths.push(concept.prerequisite_depth.max(0) as u32);
            nodes.push(ConceptNode {
                id: concept.id.clone(),
                knowledge_area_id: concept.knowledge_area_id.clone(),
                depth: 0,
            });
        }

        let mut prerequisites: Vec<Vec<Edge>> = vec![Vec::new(); nodes.len()];
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); nodes.len()];
        let mut seen: HashSet<(usize, usize)> = HashSet::with_capacity(edges.len());
        let mut edge_count = 0usize;

        for edge in edges {
            let (Some(&from), Some(&to)) = (
                index.get(&edge.concept_id),
                index.get(&edge.prerequisite_concept_id),
            ) else {
                tracing::debug!(
                    concept_id = %edge.concept_id,
                    prerequisite_concept_id = %edge.prerequisite_concept_id,
                    "edge references a concept outside the loaded set"
                );
                continue;
            };
            if from == to {
                tracing::warn!(concept_id = %edge.concept_id, "self-loop prerequisite ignored");
                continue;
            }
            if !seen.insert((from, to)) {
                continue;
            }

            let strength = if (0.0..=1.0).contains(&edge.strength) {
                edge.strength
            } else {
                tracing::warn!(
                    concept_id = %edge.concept_id,
                    prerequisite_concept_id = %edge.prerequisite_concept_id,
                    strength = edge.strength,
                    "prerequisite strength outside [0, 1], clamping"
                );
                if edge.strength.is_nan() {
                    0.0
                } else {
                    edge.strength.clamp(0.0, 1.0)
                }
            };

            prerequisites[from].push(Edge {
                target: to,
                strength,
                relationship_type: edge.relationship_type,
            });
            dependents[to].push(from);
            edge_count += 1;
        }

        for list in prerequisites.iter_mut() {
            list.sort_by(|a, b| {
                b.strength
                    .total_cmp(&a.strength)
                    .then_with(|| nodes[a.target].id.cmp(&nodes[b.target].id))
            });
        }
        for list in dependents.iter_mut() {
            list.sort_by(|a, b| nodes[*a].id.cmp(&nodes[*b].id));
        }

        let mut roots: Vec<usize> = (0..nodes.len()).filter(|&i| prerequisites[i].is_empty()).collect();
        roots.sort_by(|a, b| nodes[*a].id.cmp(&nodes[*b].id));

        let cyclic = assign_depths(&mut nodes, &prerequisites, &dependents, &stored_depths);
        if cyclic > 0 {
            tracing::warn!(
                course_id = course_id.unwrap_or("*"),
                cyclic_nodes = cyclic,
                "prerequisite cycle detected; depths behind the cycle use stored values"
            );
        }

        let stats = GraphStatistics {
            course_id: course_id.map(str::to_string),
            node_count: nodes.len(),
            edge_count,
            root_count: roots.len(),
            cyclic_node_count: cyclic,
            build_duration_ms: 0,
            slow_build: false,
            loaded_at: Utc::now(),
        };

        Self {
            index,
            nodes,
            prerequisites,
            dependents,
            roots,
            stats,
        }
    }

    pub fn statistics(&self) -> &GraphStatistics {
        &self.stats
    }

    pub fn course_id(&self) -> Option<&str> {
        self.stats.course_id.as_deref()
    }

    pub fn contains(&self, concept_id: &str) -> bool {
        self.index.contains_key(concept_id)
    }

    pub fn knowledge_area_of(&self, concept_id: &str) -> Option<&str> {
        self.index
            .get(concept_id)
            .map(|&i| self.nodes[i].knowledge_area_id.as_str())
    }

    /// Direct prerequisites, strongest first.
    pub fn prerequisites(&self, concept_id: &str) -> Vec<PrerequisiteLink> {
        let Some(&node) = self.index.get(concept_id) else {
            return Vec::new();
        };
        self.prerequisites[node]
            .iter()
            .map(|edge| PrerequisiteLink {
                prerequisite_id: self.nodes[edge.target].id.clone(),
                strength: edge.strength,
                relationship_type: edge.relationship_type,
            })
            .collect()
    }

    /// Breadth-first walk backward through prerequisites. Direct prerequisites
    /// sit at depth 1; nodes are never re-queued, so each concept appears once
    /// at its shortest distance. Sorted by `(depth, concept_id)`.
    pub fn prerequisite_chain(&self, concept_id: &str, max_depth: u32) -> Vec<ChainEntry> {
        let Some(&start) = self.index.get(concept_id) else {
            return Vec::new();
        };
        if max_depth == 0 {
            return Vec::new();
        }

        let mut visited = vec![false; self.nodes.len()];
        visited[start] = true;
        let mut queue: VecDeque<(usize, u32)> = VecDeque::new();
        for edge in &self.prerequisites[start] {
            if !visited[edge.target] {
                visited[edge.target] = true;
                queue.push_back((edge.target, 1));
            }
        }

        let mut chain = Vec::new();
        while let Some((node, depth)) = queue.pop_front() {
            chain.push((node, depth));
            if depth >= max_depth {
                continue;
            }
            for edge in &self.prerequisites[node] {
                if !visited[edge.target] {
                    visited[edge.target] = true;
                    queue.push_back((edge.target, depth + 1));
                }
            }
        }

        chain.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| self.nodes[a.0].id.cmp(&self.nodes[b.0].id)));
        chain
            .into_iter()
            .map(|(node, depth)| ChainEntry {
                concept_id: self.nodes[node].id.clone(),
                depth,
            })
            .collect()
    }

    pub fn dependents(&self, concept_id: &str) -> Vec<String> {
        let Some(&node) = self.index.get(concept_id) else {
            return Vec::new();
        };
        self.dependents[node]
            .iter()
            .map(|&i| self.nodes[i].id.clone())
            .collect()
    }

    /// Longest prerequisite path length from a root; 0 for roots and for
    /// concepts not in the graph.
    pub fn depth(&self, concept_id: &str) -> u32 {
        self.index
            .get(concept_id)
            .map(|&i| self.nodes[i].depth)
            .unwrap_or(0)
    }

    pub fn root_concepts(&self) -> Vec<String> {
        self.roots.iter().map(|&i| self.nodes[i].id.clone()).collect()
    }
}

/// Longest-path depths in topological (Kahn) order. Nodes never reaching
/// in-degree zero sit on or behind a cycle and keep their stored depth.
/// Returns how many nodes that applied to.
fn assign_depths(
    nodes: &mut [ConceptNode],
    prerequisites: &[Vec<Edge>],
    dependents: &[Vec<usize>],
    stored_depths: &[u32],
) -> usize {
    let mut in_degree: Vec<usize> = prerequisites.iter().map(Vec::len).collect();
    let mut depth = vec![0u32; nodes.len()];
    let mut queue: VecDeque<usize> = (0..nodes.len()).filter(|&i| in_degree[i] == 0).collect();
    let mut processed = 0usize;

    while let Some(node) = queue.pop_front() {
        processed += 1;
        for &dependent in &dependents[node] {
            depth[dependent] = depth[dependent].max(depth[node] + 1);
            in_degree[dependent] -= 1;
            if in_degree[dependent] == 0 {
                queue.push_back(dependent);
            }
        }
    }

    for (i, node) in nodes.iter_mut().enumerate() {
        node.depth = if in_degree[i] == 0 { depth[i] } else { stored_depths[i] };
    }

    nodes.len() - processed
}

/// Process-wide prerequisite graph with an explicit load/reload lifecycle.
///
/// Builds are serialized by `build_lock`; a caller arriving during a build
/// waits for it and then runs its own. Queries clone the current snapshot
/// pointer and never block on a build.
pub struct PrerequisiteGraphCache {
    snapshot: RwLock<Option<Arc<GraphSnapshot>>>,
    build_lock: Mutex<()>,
    slow_build_threshold: Duration,
}

impl PrerequisiteGraphCache {
    pub fn new(slow_build_threshold: Duration) -> Self {
        Self {
            snapshot: RwLock::new(None),
            build_lock: Mutex::new(()),
            slow_build_threshold,
        }
    }

    /// Rebuilds the graph from storage, optionally scoped to one course.
    pub async fn load(
        &self,
        db: &Database,
        course_id: Option<&str>,
    ) -> Result<GraphStatistics, GraphError> {
        if let Some(course_id) = course_id {
            validate_id("course_id", course_id)?;
        }

        let _guard = self.build_lock.lock().await;
        let started = Instant::now();

        let concepts = operations::fetch_concepts(db, course_id).await?;
        let edges = operations::fetch_prerequisites(db, course_id).await?;
        let snapshot = GraphSnapshot::build(course_id, &concepts, &edges);

        Ok(self.install(snapshot, started))
    }

    /// Full rebuild with the same course scope as the current graph.
    pub async fn reload(&self, db: &Database) -> Result<GraphStatistics, GraphError> {
        let scope = self
            .snapshot
            .read()
            .as_ref()
            .and_then(|s| s.course_id().map(str::to_string));
        self.load(db, scope.as_deref()).await
    }

    /// Builds from rows already in hand, under the same exclusion as [`load`].
    ///
    /// [`load`]: Self::load
    pub async fn load_records(
        &self,
        course_id: Option<&str>,
        concepts: &[ConceptRecord],
        edges: &[ConceptPrerequisiteRecord],
    ) -> GraphStatistics {
        let _guard = self.build_lock.lock().await;
        let started = Instant::now();
        let snapshot = GraphSnapshot::build(course_id, concepts, edges);
        self.install(snapshot, started)
    }

    fn install(&self, mut snapshot: GraphSnapshot, started: Instant) -> GraphStatistics {
        let elapsed = started.elapsed();
        snapshot.stats.build_duration_ms = elapsed.as_millis() as u64;
        snapshot.stats.slow_build = elapsed >= self.slow_build_threshold;
        snapshot.stats.loaded_at = Utc::now();

        let stats = snapshot.stats.clone();
        if stats.slow_build {
            tracing::warn!(
                duration_ms = stats.build_duration_ms,
                threshold_ms = self.slow_build_threshold.as_millis() as u64,
                "prerequisite graph build exceeded threshold"
            );
        }
        tracing::info!(
            course_id = stats.course_id.as_deref().unwrap_or("*"),
            nodes = stats.node_count,
            edges = stats.edge_count,
            roots = stats.root_count,
            duration_ms = stats.build_duration_ms,
            "prerequisite graph loaded"
        );

        *self.snapshot.write() = Some(Arc::new(snapshot));
        stats
    }

    pub fn is_loaded(&self) -> bool {
        self.snapshot.read().is_some()
    }

    pub fn snapshot(&self) -> Result<Arc<GraphSnapshot>, GraphError> {
        self.snapshot.read().clone().ok_or(GraphError::NotLoaded)
    }

    pub fn get_statistics(&self) -> Result<GraphStatistics, GraphError> {
        Ok(self.snapshot()?.statistics().clone())
    }

    pub fn get_prerequisites(&self, concept_id: &str) -> Result<Vec<PrerequisiteLink>, GraphError> {
        validate_id("concept_id", concept_id)?;
        Ok(self.snapshot()?.prerequisites(concept_id))
    }

    pub fn get_prerequisite_chain(
        &self,
        concept_id: &str,
        max_depth: u32,
    ) -> Result<Vec<ChainEntry>, GraphError> {
        validate_id("concept_id", concept_id)?;
        Ok(self.snapshot()?.prerequisite_chain(concept_id, max_depth))
    }

    pub fn get_dependents(&self, concept_id: &str) -> Result<Vec<String>, GraphError> {
        validate_id("concept_id", concept_id)?;
        Ok(self.snapshot()?.dependents(concept_id))
    }

    pub fn get_depth(&self, concept_id: &str) -> Result<u32, GraphError> {
        validate_id("concept_id", concept_id)?;
        Ok(self.snapshot()?.depth(concept_id))
    }

    pub fn get_root_concepts(&self) -> Result<Vec<String>, GraphError> {
        Ok(self.snapshot()?.root_concepts())
    }
}

impl Default for PrerequisiteGraphCache {
    fn default() -> Self {
        Self::new(DEFAULT_SLOW_BUILD_THRESHOLD)
    }
}

fn validate_id(field: &str, value: &str) -> Result<(), GraphError> {
    if value.trim().is_empty() {
        return Err(GraphError::InvalidParameter(format!("{field} must not be empty")));
    }
    Ok(())
}
