use std::sync::Arc;

use thiserror::Error;

use crate::cache::SummaryCache;
use crate::config::Config;
use crate::db::{Database, DbInitError};
use crate::services::belief_state::{self, BeliefError, BeliefState, Familiarity};
use crate::services::coverage_analyzer::CoverageAnalyzer;
use crate::services::diagnostic_selector::{self, DiagnosticSelection, SelectorConfig, SelectorError};
use crate::services::prerequisite_graph::{GraphError, GraphStatistics, PrerequisiteGraphCache};

#[derive(Debug, Error)]
pub enum CoreInitError {
    #[error(transparent)]
    Database(#[from] DbInitError),
}

/// Explicitly constructed owner of the graph cache, coverage analyzer and
/// storage handle. Cheap to clone; clones share the same graph and cache.
#[derive(Clone)]
pub struct MasteryCore {
    db: Database,
    cache: Arc<SummaryCache>,
    graph: Arc<PrerequisiteGraphCache>,
    analyzer: Arc<CoverageAnalyzer>,
    selector: Arc<SelectorConfig>,
}

impl MasteryCore {
    pub fn new(db: Database, cache: Arc<SummaryCache>, config: &Config) -> Self {
        let analyzer = CoverageAnalyzer::with_ttl(db.clone(), Arc::clone(&cache), config.coverage_cache_ttl);
        Self {
            graph: Arc::new(PrerequisiteGraphCache::new(config.graph_build_warn)),
            analyzer: Arc::new(analyzer),
            selector: Arc::new(config.selector.clone()),
            cache,
            db,
        }
    }

    /// Connects storage and the summary cache. The graph is not loaded;
    /// call [`load_graph`](Self::load_graph) once at startup.
    pub async fn from_config(config: &Config) -> Result<Self, CoreInitError> {
        let db = Database::connect(&config.database_url).await?;
        let cache = SummaryCache::from_url(config.redis_url.as_deref()).await;
        tracing::info!(cache = cache.backend(), "summary cache ready");
        Ok(Self::new(db, Arc::new(cache), config))
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn cache(&self) -> Arc<SummaryCache> {
        Arc::clone(&self.cache)
    }

    pub fn graph(&self) -> Arc<PrerequisiteGraphCache> {
        Arc::clone(&self.graph)
    }

    pub fn analyzer(&self) -> Arc<CoverageAnalyzer> {
        Arc::clone(&self.analyzer)
    }

    pub async fn load_graph(&self, course_id: Option<&str>) -> Result<GraphStatistics, GraphError> {
        self.graph.load(&self.db, course_id).await
    }

    /// Hook for content changes: full rebuild in the current scope.
    pub async fn reload_graph(&self) -> Result<GraphStatistics, GraphError> {
        self.graph.reload(&self.db).await
    }

    pub async fn select_diagnostic(
        &self,
        course_id: &str,
        requested: Option<usize>,
    ) -> Result<DiagnosticSelection, SelectorError> {
        diagnostic_selector::select_for_course(&self.db, course_id, requested, &self.selector).await
    }

    pub async fn initialize_user(
        &self,
        user_id: &str,
        course_id: &str,
        familiarity: Familiarity,
    ) -> Result<u64, BeliefError> {
        let inserted = belief_state::initialize_beliefs(&self.db, user_id, course_id, familiarity).await?;
        if inserted > 0 {
            self.analyzer.invalidate(user_id).await;
        }
        Ok(inserted)
    }

    /// Persists an updated belief and drops the user's cached summary.
    pub async fn record_belief(&self, belief: &BeliefState) -> Result<(), BeliefError> {
        belief_state::save_belief(&self.db, belief).await?;
        self.analyzer.invalidate(&belief.user_id).await;
        Ok(())
    }

    pub async fn reset_belief(
        &self,
        user_id: &str,
        concept_id: &str,
        familiarity: Familiarity,
    ) -> Result<bool, BeliefError> {
        let reset = belief_state::reset_belief(&self.db, user_id, concept_id, familiarity).await?;
        if reset {
            self.analyzer.invalidate(user_id).await;
        }
        Ok(reset)
    }
}
