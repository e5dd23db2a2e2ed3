use std::time::Duration;

use crate::services::diagnostic_selector::SelectorConfig;

const DEFAULT_DATABASE_URL: &str = "sqlite:./data/mastery.db?mode=rwc";

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub redis_url: Option<String>,
    pub log_level: String,
    pub graph_build_warn: Duration,
    pub coverage_cache_ttl: Duration,
    pub selector: SelectorConfig,
}

impl Config {
    pub fn from_env() -> Self {
        let database_url =
            std::env::var("DATABASE_URL").unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string());
        let redis_url = std::env::var("REDIS_URL").ok().filter(|url| !url.trim().is_empty());
        let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());

        let defaults = SelectorConfig::default();
        let selector = SelectorConfig {
            min_questions: env_usize("DIAGNOSTIC_MIN_QUESTIONS", defaults.min_questions),
            max_questions: env_usize("DIAGNOSTIC_MAX_QUESTIONS", defaults.max_questions),
            default_questions: env_usize("DIAGNOSTIC_DEFAULT_QUESTIONS", defaults.default_questions),
            max_per_knowledge_area: env_usize("DIAGNOSTIC_MAX_PER_KA", defaults.max_per_knowledge_area),
            ..defaults
        };

        Self {
            database_url,
            redis_url,
            log_level,
            graph_build_warn: Duration::from_millis(env_u64("GRAPH_BUILD_WARN_MS", 5000)),
            coverage_cache_ttl: Duration::from_secs(env_u64("COVERAGE_CACHE_TTL_SECS", 5 * 60)),
            selector,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: DEFAULT_DATABASE_URL.to_string(),
            redis_url: None,
            log_level: "info".to_string(),
            graph_build_warn: Duration::from_secs(5),
            coverage_cache_ttl: Duration::from_secs(5 * 60),
            selector: SelectorConfig::default(),
        }
    }
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<usize>().ok())
        .unwrap_or(default)
}
